//! Campaign controller.
//!
//! Runs stress sessions back to back over the configured port topology. A
//! session opens every DUT/AUX pair, spawns one [`SenderTask`] and one
//! [`ReceiverTask`] per pair, joins all of them and hands the tallies to the
//! [`DropDetector`]. The campaign stops at the first failed session, after the
//! requested number of iterations, or when interrupted.

pub mod report;
pub mod state;

pub use report::{format_summary, CampaignReport, SessionResult, StopReason, TaskFault};
pub use state::CampaignState;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{BaudRate, ConfigError, HarnessConfig};
use crate::detect::DropDetector;
use crate::engine::{PortTally, ReceiverTask, Role, SenderTask, TaskParams};
use crate::link::{LinkError, LinkSettings, PortOpener, PortPair};
use crate::traffic::TrafficGenerator;

#[derive(Debug, Error)]
pub enum CampaignError {
    #[error("invalid campaign configuration: {0}")]
    Config(#[from] ConfigError),
}

/// What to run, as given on the command line.
#[derive(Debug, Clone, Copy)]
pub struct CampaignPlan {
    /// How long each session's senders transmit.
    pub duration: Duration,
    pub baud: BaudRate,
    /// Keep every chunk and compare content after each session.
    pub detailed_logging: bool,
    /// Sessions to run when not continuous.
    pub iterations: u32,
    /// Keep running sessions until one fails or the campaign is interrupted.
    pub continuous: bool,
}

impl CampaignPlan {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.duration.is_zero() {
            return Err(ConfigError::ZeroDuration);
        }
        if self.iterations == 0 {
            return Err(ConfigError::ZeroIterations);
        }
        Ok(())
    }
}

pub struct Campaign {
    opener: Arc<dyn PortOpener>,
    config: HarnessConfig,
    plan: CampaignPlan,
    detector: DropDetector,
    interrupt: CancellationToken,
    /// Cancellation for the current session, a child of `interrupt`.
    session: CancellationToken,
    state: CampaignState,
}

impl Campaign {
    /// Validate the plan and configuration. Nothing is opened here.
    pub fn new(
        opener: Arc<dyn PortOpener>,
        config: HarnessConfig,
        plan: CampaignPlan,
    ) -> Result<Self, CampaignError> {
        plan.validate()?;
        config.validate()?;

        let interrupt = CancellationToken::new();
        Ok(Self {
            opener,
            detector: DropDetector::new(config.check.strict_content),
            config,
            plan,
            session: interrupt.child_token(),
            interrupt,
            state: CampaignState::Idle,
        })
    }

    /// Token that stops the campaign when cancelled. In-flight tasks are
    /// cancelled and joined before [`Campaign::run`] returns.
    pub fn interrupt_handle(&self) -> CancellationToken {
        self.interrupt.clone()
    }

    pub async fn run(mut self) -> CampaignReport {
        info!(
            pairs = self.config.ports.dut.len(),
            baud = self.plan.baud.value(),
            duration_sec = self.plan.duration.as_secs(),
            iterations = self.plan.iterations,
            continuous = self.plan.continuous,
            "starting stress campaign"
        );

        let mut sessions = Vec::new();
        let mut iteration: u32 = 0;

        let stop_reason = loop {
            if self.interrupt.is_cancelled() {
                break StopReason::Interrupted;
            }

            iteration += 1;
            let result = self.run_session(iteration).await;
            let passed = result.passed;
            sessions.push(result);

            if self.interrupt.is_cancelled() {
                break StopReason::Interrupted;
            }
            if !passed {
                break StopReason::SessionFailed { iteration };
            }
            if !self.plan.continuous && iteration >= self.plan.iterations {
                break StopReason::Completed;
            }
            self.transition(CampaignState::Continue);
        };

        self.transition(CampaignState::Stopped);
        info!(sessions = sessions.len(), reason = %stop_reason, "Test completed");

        CampaignReport {
            sessions,
            stop_reason,
        }
    }

    fn transition(&mut self, next: CampaignState) {
        if !self.state.allows(next) {
            warn!(from = %self.state, to = %next, "unexpected campaign state transition");
        }
        debug!(from = %self.state, to = %next, "campaign state");
        self.state = next;
    }

    async fn run_session(&mut self, iteration: u32) -> SessionResult {
        let id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(iteration, session = %id, "Starting iteration {}", iteration);

        // A child of the interrupt token: an interrupt reaches every session,
        // but a session's own failure never outlives it.
        self.session = self.interrupt.child_token();
        let cancel = self.session.clone();

        self.transition(CampaignState::OpeningPorts);
        let settings = LinkSettings::new(self.plan.baud.value(), &self.config.link);

        let pairs = match self.open_all(&settings).await {
            Ok(pairs) => pairs,
            Err(e) => {
                error!(iteration, error = %e, "could not open ports, session aborted");
                cancel.cancel();
                self.transition(CampaignState::Evaluating);
                info!(iteration, passed = false, "Finished iteration {}", iteration);
                return SessionResult {
                    id,
                    iteration,
                    started_at,
                    pairs: Vec::new(),
                    faults: Vec::new(),
                    open_error: Some(e.to_string()),
                    interrupted: self.interrupt.is_cancelled(),
                    passed: false,
                };
            }
        };

        self.transition(CampaignState::Running);
        let tallies = self.run_tasks(pairs, &cancel).await;
        cancel.cancel();
        // An interrupted session ran for less than the requested duration,
        // so its counts prove nothing either way.
        let interrupted = self.interrupt.is_cancelled();

        self.transition(CampaignState::Evaluating);
        let faults: Vec<TaskFault> = tallies
            .iter()
            .flat_map(|(s, r)| [s, r])
            .filter_map(|t| {
                t.fault.as_ref().map(|reason| TaskFault {
                    port: t.port.clone(),
                    role: t.role,
                    reason: reason.clone(),
                })
            })
            .collect();

        let accounts = self.detector.evaluate(tallies);
        DropDetector::log_summary(&accounts);
        let passed = !interrupted && faults.is_empty() && self.detector.passed(&accounts);

        if interrupted {
            warn!(iteration, "Finished iteration {} early: interrupted", iteration);
        } else if passed {
            info!(iteration, passed, "Finished iteration {}", iteration);
        } else {
            warn!(
                iteration,
                passed,
                faults = faults.len(),
                dropped = accounts.iter().map(|a| a.dropped).sum::<u64>(),
                "Finished iteration {}",
                iteration
            );
        }

        SessionResult {
            id,
            iteration,
            started_at,
            pairs: accounts,
            faults,
            open_error: None,
            interrupted,
            passed,
        }
    }

    /// Open every pair in topology order. On failure, every handle opened so
    /// far is closed before the error is returned.
    async fn open_all(&self, settings: &LinkSettings) -> Result<Vec<PortPair>, LinkError> {
        let mut opened: Vec<PortPair> = Vec::with_capacity(self.config.ports.dut.len());

        for (dut, aux) in self.config.ports.pairs() {
            match PortPair::open(self.opener.as_ref(), dut, aux, settings).await {
                Ok(pair) => opened.push(pair),
                Err(e) => {
                    for pair in opened {
                        pair.close().await;
                    }
                    return Err(e);
                }
            }
        }

        Ok(opened)
    }

    /// Spawn both tasks of every pair and wait for all of them.
    async fn run_tasks(
        &self,
        pairs: Vec<PortPair>,
        cancel: &CancellationToken,
    ) -> Vec<(PortTally, PortTally)> {
        let params = TaskParams::new(
            self.plan.duration,
            self.plan.baud.value(),
            self.plan.detailed_logging,
            &self.config,
        );
        let chunk_len = self.config.traffic.chunk_len;

        let mut joins = Vec::with_capacity(pairs.len());
        for (index, pair) in pairs.into_iter().enumerate() {
            let generator = match self.config.traffic.seed {
                Some(seed) => TrafficGenerator::seeded(chunk_len, seed.wrapping_add(index as u64)),
                None => TrafficGenerator::new(chunk_len),
            };
            let PortPair {
                dut_name,
                aux_name,
                dut,
                aux,
            } = pair;

            let sender = SenderTask::new(dut, generator, params.clone(), cancel.clone()).spawn();
            let receiver = ReceiverTask::new(aux, params.clone(), cancel.clone()).spawn();
            debug!(dut = dut_name.as_str(), aux = aux_name.as_str(), "pair tasks spawned");

            let cancel = cancel.clone();
            joins.push(async move {
                tokio::join!(
                    join_task(sender, dut_name, Role::Sender, cancel.clone()),
                    join_task(receiver, aux_name, Role::Receiver, cancel),
                )
            });
        }

        join_all(joins).await
    }
}

/// Await a task. A task that panicked or was aborted becomes a faulted tally
/// and cancels the rest of the session.
async fn join_task(
    handle: JoinHandle<PortTally>,
    port: String,
    role: Role,
    cancel: CancellationToken,
) -> PortTally {
    match handle.await {
        Ok(tally) => tally,
        Err(e) => {
            error!(port = port.as_str(), %role, error = %e, "task did not finish, cancelling session");
            cancel.cancel();
            let mut tally = PortTally::new(port, role, false);
            tally.fault = Some(if e.is_panic() {
                "task panicked".to_string()
            } else {
                e.to_string()
            });
            tally
        }
    }
}
