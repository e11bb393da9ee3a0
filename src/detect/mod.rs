//! Drop and corruption detection over a finished session.

pub mod content;
pub mod engine;

pub use content::{compare, ContentCheck};
pub use engine::DropDetector;

use serde::Serialize;

/// Bytes lost between a DUT and its AUX port. Never negative: a receiver that
/// somehow saw more than was sent counts as zero loss.
pub fn dropped_bytes(sent: u64, received: u64) -> u64 {
    sent.saturating_sub(received)
}

/// Outcome for one DUT→AUX pair.
#[derive(Debug, Clone, Serialize)]
pub struct PairAccount {
    pub dut: String,
    pub aux: String,
    pub sent: u64,
    pub received: u64,
    pub dropped: u64,
    pub content: ContentCheck,
}

impl PairAccount {
    pub fn lossless(&self) -> bool {
        self.dropped == 0
    }
}
