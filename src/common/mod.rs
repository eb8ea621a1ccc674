//! Common utilities, traits, and errors

mod error;
pub mod rng;
mod traits;
pub mod validation;

pub use error::{Result, SketchError};
pub use rng::SketchRng;
pub use traits::{Mergeable, Sketch};
