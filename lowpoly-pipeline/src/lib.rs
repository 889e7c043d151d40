//! # lowpoly pipeline
//!
//! Job orchestration for the high-to-low asset pipeline.
//!
//! A job imports a scan, simplifies and repairs a working copy, conforms it
//! back onto the scan, unwraps it, bakes base color and normal atlases and
//! exports a textured GLB together with a manifest.

pub mod options;
pub mod state;
pub mod orchestrator;

// Re-export commonly used items
pub use options::*;
pub use state::*;
pub use orchestrator::*;
