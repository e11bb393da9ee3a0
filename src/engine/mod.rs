//! Per-port traffic tasks.
//!
//! Every DUT port gets a [`SenderTask`] and every AUX port a
//! [`ReceiverTask`]. A task owns its port handle and its byte counter
//! outright; nothing is shared between tasks except the session's
//! [`CancellationToken`]. The count comes back to the controller as a
//! [`PortTally`] through the task's join handle, so it is only ever read after
//! the task has finished.

pub mod receiver;
pub mod sender;

pub use receiver::ReceiverTask;
pub use sender::SenderTask;

use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::HarnessConfig;
use crate::traffic::pacing_interval;

/// Which side of a pair a task drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Sender,
    Receiver,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Sender => write!(f, "sender"),
            Role::Receiver => write!(f, "receiver"),
        }
    }
}

/// Parameters shared by every task of a session.
#[derive(Debug, Clone)]
pub struct TaskParams {
    /// How long senders transmit.
    pub duration: Duration,
    /// Gap between sender writes.
    pub interval: Duration,
    /// Bound on a single receiver read.
    pub read_timeout: Duration,
    /// Most bytes a single receiver read may return.
    pub max_read: usize,
    pub start_delay: Duration,
    pub drain_delay: Duration,
    /// Extra listening time receivers get beyond `duration`.
    pub receiver_grace: Duration,
    /// Keep every chunk for a content comparison.
    pub trace: bool,
}

impl TaskParams {
    pub fn new(duration: Duration, baud: u32, trace: bool, config: &HarnessConfig) -> Self {
        Self {
            duration,
            interval: pacing_interval(baud),
            read_timeout: Duration::from_millis(config.link.read_timeout_ms),
            max_read: config.link.max_read_bytes.max(1),
            start_delay: config.timing.start_delay(),
            drain_delay: config.timing.drain_delay(),
            receiver_grace: config.timing.receiver_grace(),
            trace,
        }
    }
}

/// Final account of one task.
#[derive(Debug, Clone)]
pub struct PortTally {
    pub port: String,
    pub role: Role,
    /// Bytes written (sender) or read (receiver).
    pub bytes: u64,
    /// Chunks in order, when tracing.
    pub trace: Option<Vec<String>>,
    /// Reads that returned nothing.
    pub timeouts: u64,
    /// The error that ended the task early, if any.
    pub fault: Option<String>,
}

impl PortTally {
    pub fn new(port: impl Into<String>, role: Role, trace: bool) -> Self {
        Self {
            port: port.into(),
            role,
            bytes: 0,
            trace: trace.then(Vec::new),
            timeouts: 0,
            fault: None,
        }
    }

    fn record(&mut self, len: usize, chunk: impl FnOnce() -> String) {
        self.bytes += len as u64;
        if let Some(trace) = self.trace.as_mut() {
            trace.push(chunk());
        }
    }

    /// Concatenated trace, if one was kept.
    pub fn traced_text(&self) -> Option<String> {
        self.trace.as_ref().map(|chunks| chunks.concat())
    }
}

/// Sleep for `period` unless the session is cancelled first.
///
/// Returns `false` when cancelled.
async fn idle(cancel: &CancellationToken, period: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(period) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_from_config() {
        let cfg = HarnessConfig::default();
        let params = TaskParams::new(Duration::from_secs(10), 300, true, &cfg);
        assert_eq!(params.interval, Duration::from_millis(250));
        assert_eq!(params.read_timeout, Duration::from_secs(2));
        assert_eq!(params.receiver_grace, Duration::from_secs(5));
        assert_eq!(params.max_read, 256);
        assert!(params.trace);
    }

    #[test]
    fn test_tally_trace_only_when_enabled() {
        let mut quiet = PortTally::new("p", Role::Sender, false);
        quiet.record(3, || "abc".to_string());
        assert_eq!(quiet.bytes, 3);
        assert!(quiet.traced_text().is_none());

        let mut traced = PortTally::new("p", Role::Receiver, true);
        traced.record(1, || "a".to_string());
        traced.record(2, || "bc".to_string());
        assert_eq!(traced.bytes, 3);
        assert_eq!(traced.traced_text().as_deref(), Some("abc"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_cut_short_by_cancel() {
        let cancel = CancellationToken::new();
        assert!(idle(&cancel, Duration::from_millis(5)).await);
        cancel.cancel();
        assert!(!idle(&cancel, Duration::from_secs(3600)).await);
    }
}
