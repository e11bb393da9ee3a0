use tracing::{debug, info, warn};

use crate::detect::{compare, dropped_bytes, ContentCheck, PairAccount};
use crate::engine::PortTally;

/// Turns the sender and receiver tallies of a finished session into per-pair
/// accounts and a pass/fail verdict.
#[derive(Debug, Clone, Copy, Default)]
pub struct DropDetector {
    strict_content: bool,
}

impl DropDetector {
    /// With `strict_content`, a content mismatch fails the session even when
    /// no bytes are missing.
    pub fn new(strict_content: bool) -> Self {
        Self { strict_content }
    }

    /// Account for every `(sender, receiver)` pair.
    ///
    /// Must only be called once every task of the session has been joined.
    /// The tallies are consumed so traced chunks are freed as soon as they
    /// have been compared.
    pub fn evaluate(&self, pairs: Vec<(PortTally, PortTally)>) -> Vec<PairAccount> {
        let tracing_on = pairs
            .iter()
            .any(|(s, r)| s.trace.is_some() || r.trace.is_some());
        if tracing_on {
            info!("comparing sent and received data");
        }

        pairs
            .into_iter()
            .map(|(sender, receiver)| self.account(sender, receiver))
            .collect()
    }

    fn account(&self, sender: PortTally, receiver: PortTally) -> PairAccount {
        let dropped = dropped_bytes(sender.bytes, receiver.bytes);

        let content = match (sender.traced_text(), receiver.traced_text()) {
            (Some(sent), Some(received)) => {
                debug!(
                    dut = sender.port.as_str(),
                    aux = receiver.port.as_str(),
                    sent = sent.as_str(),
                    received = received.as_str(),
                    "traced content"
                );
                let check = compare(&sent, &received);
                if check.is_mismatch() {
                    warn!(
                        dut = sender.port.as_str(),
                        aux = receiver.port.as_str(),
                        sent = sent.as_str(),
                        received = received.as_str(),
                        "data mismatch"
                    );
                } else {
                    info!(dut = sender.port.as_str(), aux = receiver.port.as_str(), "data match");
                }
                check
            }
            (None, None) => ContentCheck::Skipped,
            _ => {
                warn!(
                    dut = sender.port.as_str(),
                    aux = receiver.port.as_str(),
                    "trace missing on one side, content not compared"
                );
                ContentCheck::Skipped
            }
        };

        PairAccount {
            dut: sender.port,
            aux: receiver.port,
            sent: sender.bytes,
            received: receiver.bytes,
            dropped,
            content,
        }
    }

    /// Whether the accounts describe a clean session.
    pub fn passed(&self, accounts: &[PairAccount]) -> bool {
        accounts.iter().all(|a| {
            a.lossless() && !(self.strict_content && a.content.is_mismatch())
        })
    }

    /// Log sent, received and dropped counts per port.
    pub fn log_summary(accounts: &[PairAccount]) {
        info!("sent characters:");
        for a in accounts {
            info!(port = a.dut.as_str(), count = a.sent, "sent");
        }
        info!("received characters:");
        for a in accounts {
            info!(port = a.aux.as_str(), count = a.received, "received");
        }
        info!("dropped characters:");
        for a in accounts {
            info!(port = a.aux.as_str(), count = a.dropped, "dropped");
        }
    }
}
