pub mod convert;
pub mod grain;
pub mod grid;
pub mod physics;
pub mod store;

pub use convert::{
    decode_drawing, drawing_to_grains, filler_grains, image_to_grains, load_image,
    scaled_dimensions, ScaledDimensions,
};
pub use grain::{Grain, GrainStats};
pub use grid::{GrainId, OccupancyGrid};
pub use physics::SandPhysics;
pub use store::{FrameTarget, SandStore};
