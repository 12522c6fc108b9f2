pub mod device;
pub mod instances;
pub mod renderer;
pub mod target;

pub use device::*;
pub use instances::{InstanceBuffer, InstanceStaging};
pub use renderer::*;
pub use target::*;
