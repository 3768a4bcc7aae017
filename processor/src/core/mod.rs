//! Dubflow Core Engine
//!
//! Translation pipeline core: media utilities, audio composition, task storage,
//! the per-job orchestrator and the task pull loop that feeds it.

pub mod composer;
pub mod ffmpeg;
pub mod fs;
pub mod jobs;
pub mod pipeline;
pub mod remote;
pub mod settings;
pub mod storage;

// Re-export common types
mod types;
pub use types::*;

mod error;
pub use error::*;

#[cfg(test)]
pub(crate) mod testing;
