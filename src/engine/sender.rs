//! DUT-side task: writes paced synthetic traffic and counts it.

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::link::PortHandle;
use crate::traffic::TrafficGenerator;

use super::{idle, PortTally, Role, TaskParams};

/// Transmits on one DUT port until its deadline or until the session is
/// cancelled. A write failure cancels the whole session.
pub struct SenderTask {
    port: Box<dyn PortHandle>,
    generator: TrafficGenerator,
    params: TaskParams,
    cancel: CancellationToken,
}

impl SenderTask {
    pub fn new(
        port: Box<dyn PortHandle>,
        generator: TrafficGenerator,
        params: TaskParams,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            port,
            generator,
            params,
            cancel,
        }
    }

    pub fn spawn(self) -> JoinHandle<PortTally> {
        tokio::spawn(self.run())
    }

    /// Run to completion. The port is closed on every path out.
    pub async fn run(mut self) -> PortTally {
        let mut tally = PortTally::new(self.port.name(), Role::Sender, self.params.trace);
        debug!(
            port = tally.port.as_str(),
            chunk_len = self.generator.chunk_len(),
            interval_ms = self.params.interval.as_millis() as u64,
            "sender starting"
        );

        self.transmit(&mut tally).await;

        tokio::time::sleep(self.params.drain_delay).await;
        self.port.close().await;

        info!(
            port = tally.port.as_str(),
            bytes_sent = tally.bytes,
            failed = tally.fault.is_some(),
            "sender finished"
        );
        tally
    }

    async fn transmit(&mut self, tally: &mut PortTally) {
        if !idle(&self.cancel, self.params.start_delay).await {
            debug!(port = tally.port.as_str(), "cancelled before first write");
            return;
        }

        let start = Instant::now();
        let deadline = start + self.params.duration;

        while Instant::now() < deadline && !self.cancel.is_cancelled() {
            let payload = self.generator.next_chunk();

            if let Err(e) = self.port.write(payload.as_bytes()).await {
                error!(port = tally.port.as_str(), error = %e, "write failed, cancelling session");
                tally.fault = Some(e.to_string());
                self.cancel.cancel();
                return;
            }

            if self.params.trace {
                debug!(
                    port = tally.port.as_str(),
                    payload = payload.as_str(),
                    elapsed_sec = start.elapsed().as_secs_f64(),
                    "sent"
                );
            }
            let len = payload.len();
            tally.record(len, || payload);

            if !idle(&self.cancel, self.params.interval).await {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::LinkConfig;
    use crate::link::loopback::{Fault, LoopbackOpener};
    use crate::link::{LinkSettings, PortOpener};

    fn params(duration_ms: u64, trace: bool) -> TaskParams {
        TaskParams {
            duration: Duration::from_millis(duration_ms),
            interval: Duration::from_millis(10),
            read_timeout: Duration::from_millis(100),
            max_read: 64,
            start_delay: Duration::from_millis(5),
            drain_delay: Duration::from_millis(20),
            receiver_grace: Duration::from_millis(200),
            trace,
        }
    }

    async fn open(opener: &LoopbackOpener, name: &str) -> Box<dyn PortHandle> {
        let settings = LinkSettings::new(9600, &LinkConfig::default());
        opener.open(name, &settings).await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_sender_counts_and_closes() {
        let opener = LoopbackOpener::new();
        opener.link("dut", "aux");
        let port = open(&opener, "dut").await;

        let task = SenderTask::new(
            port,
            TrafficGenerator::seeded(2, 1),
            params(1000, true),
            CancellationToken::new(),
        );
        let tally = task.spawn().await.unwrap();

        assert!(tally.fault.is_none());
        assert!((190..=200).contains(&tally.bytes), "sent {} bytes", tally.bytes);
        let text = tally.traced_text().unwrap();
        assert_eq!(text.len() as u64, tally.bytes);
        assert_eq!(opener.close_count("dut"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_cancels_session() {
        let opener = LoopbackOpener::new();
        opener.link("dut", "aux");
        opener.inject("dut", 1, Fault::FailWrite { on_call: 2 });
        let port = open(&opener, "dut").await;

        let cancel = CancellationToken::new();
        let task = SenderTask::new(port, TrafficGenerator::new(1), params(1000, false), cancel.clone());
        let tally = task.spawn().await.unwrap();

        assert!(cancel.is_cancelled());
        assert_eq!(tally.bytes, 1);
        assert!(tally.fault.as_deref().unwrap().contains("injected write failure"));
        assert_eq!(opener.close_count("dut"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_start_still_closes() {
        let opener = LoopbackOpener::new();
        opener.link("dut", "aux");
        let port = open(&opener, "dut").await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let task = SenderTask::new(port, TrafficGenerator::new(1), params(1000, false), cancel);
        let tally = task.spawn().await.unwrap();

        assert_eq!(tally.bytes, 0);
        assert!(tally.fault.is_none());
        assert_eq!(opener.close_count("dut"), 1);
    }
}
