//! AUX-side task: reads whatever arrives and counts it.

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::link::PortHandle;

use super::{idle, PortTally, Role, TaskParams};

/// Listens on one AUX port for the sender's duration plus a grace period, or
/// until the session is cancelled. Empty reads are expected between sender
/// writes and only produce a warning; any other read error cancels the
/// session.
pub struct ReceiverTask {
    port: Box<dyn PortHandle>,
    params: TaskParams,
    cancel: CancellationToken,
}

impl ReceiverTask {
    pub fn new(port: Box<dyn PortHandle>, params: TaskParams, cancel: CancellationToken) -> Self {
        Self {
            port,
            params,
            cancel,
        }
    }

    pub fn spawn(self) -> JoinHandle<PortTally> {
        tokio::spawn(self.run())
    }

    /// Run to completion. The port is closed on every path out.
    pub async fn run(mut self) -> PortTally {
        let mut tally = PortTally::new(self.port.name(), Role::Receiver, self.params.trace);

        self.listen(&mut tally).await;

        tokio::time::sleep(self.params.drain_delay).await;
        self.port.close().await;

        info!(
            port = tally.port.as_str(),
            bytes_received = tally.bytes,
            timeouts = tally.timeouts,
            failed = tally.fault.is_some(),
            "receiver finished"
        );
        tally
    }

    async fn listen(&mut self, tally: &mut PortTally) {
        if !idle(&self.cancel, self.params.start_delay).await {
            debug!(port = tally.port.as_str(), "cancelled before first read");
            return;
        }

        let start = Instant::now();
        let deadline = start + self.params.duration + self.params.receiver_grace;

        while Instant::now() < deadline && !self.cancel.is_cancelled() {
            let chunk = match self
                .port
                .read(self.params.max_read, self.params.read_timeout)
                .await
            {
                Ok(chunk) => chunk,
                Err(e) => {
                    error!(port = tally.port.as_str(), error = %e, "read failed, cancelling session");
                    tally.fault = Some(e.to_string());
                    self.cancel.cancel();
                    return;
                }
            };

            if chunk.is_empty() {
                tally.timeouts += 1;
                warn!(
                    port = tally.port.as_str(),
                    elapsed_sec = start.elapsed().as_secs_f64(),
                    "timeout: no data received"
                );
                continue;
            }

            let trace = self.params.trace;
            let text = || String::from_utf8_lossy(&chunk).into_owned();
            if trace {
                debug!(
                    port = tally.port.as_str(),
                    payload = text().as_str(),
                    elapsed_sec = start.elapsed().as_secs_f64(),
                    "received"
                );
            }
            tally.record(chunk.len(), text);
        }
    }
}
