//! Sandfall Core Engine
//!
//! Falling-sand grain simulation: image-to-grain conversion, a grid-indexed
//! physics engine, an instanced wgpu renderer and the store that drives them.

pub mod error;
pub mod gpu;
pub mod shaders;
pub mod sim;

// Re-export main types
pub use error::*;
pub use gpu::*;
pub use sim::*;

// Re-export params from sandfall-params
pub use sandfall_params::*;
