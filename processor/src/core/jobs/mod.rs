//! Job System Module
//!
//! Pulls queued tasks on a fixed interval and runs each admitted task on its
//! own tokio task, bounded by a [`SlotPool`].

mod admission;
mod worker;

pub use admission::*;
pub use worker::*;

use async_trait::async_trait;

use crate::core::pipeline::JobOutcome;
use crate::core::storage::QueueEntry;
use crate::core::CoreResult;

/// Executes one dequeued task to a terminal outcome.
///
/// Implementations record their own failures; the pull loop only logs the outcome.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, entry: QueueEntry) -> JobOutcome;
}

/// Parse a raw queue message.
pub fn parse_entry(raw: &str) -> CoreResult<QueueEntry> {
    QueueEntry::parse(raw)
}
