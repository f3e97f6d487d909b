//! vidshift Core
//!
//! Video conversion core: batch selection, a single-job conversion controller
//! driving ffmpeg, and export of the finished artifact to a gallery album or
//! the share mechanism.

pub mod batch;
pub mod export;
pub mod ffmpeg;
pub mod fs;
pub mod jobs;
pub mod naming;
pub mod picker;
pub mod settings;

// Re-export common types
mod types;
pub use types::*;

mod error;
pub use error::*;
