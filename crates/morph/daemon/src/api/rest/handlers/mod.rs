//! API request handlers

mod health;
mod registry;
mod transform;

pub use health::*;
pub use registry::*;
pub use transform::*;
