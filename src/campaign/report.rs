//! Session results and campaign report formatting.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::detect::{ContentCheck, PairAccount};
use crate::engine::Role;

/// An error that ended a task early.
#[derive(Debug, Clone, Serialize)]
pub struct TaskFault {
    pub port: String,
    pub role: Role,
    pub reason: String,
}

/// Outcome of one stress session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionResult {
    pub id: Uuid,
    /// 1-based.
    pub iteration: u32,
    pub started_at: DateTime<Utc>,
    pub pairs: Vec<PairAccount>,
    pub faults: Vec<TaskFault>,
    /// Set when the session never got past opening its ports.
    pub open_error: Option<String>,
    /// Cut short by an interrupt. Never counts as passed.
    pub interrupted: bool,
    pub passed: bool,
}

impl SessionResult {
    pub fn total_dropped(&self) -> u64 {
        self.pairs.iter().map(|p| p.dropped).sum()
    }
}

/// Why a campaign ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    /// Every requested iteration ran.
    Completed,
    SessionFailed { iteration: u32 },
    Interrupted,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Completed => write!(f, "completed"),
            StopReason::SessionFailed { iteration } => {
                write!(f, "session {} failed", iteration)
            }
            StopReason::Interrupted => write!(f, "interrupted"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CampaignReport {
    pub sessions: Vec<SessionResult>,
    pub stop_reason: StopReason,
}

impl CampaignReport {
    /// True when at least one session ran to completion and every completed
    /// session passed. A session cut short by an interrupt is ignored, so an
    /// interrupt that lands before any session finished is never a pass.
    pub fn passed(&self) -> bool {
        let mut completed = self.sessions.iter().filter(|s| !s.interrupted).peekable();
        completed.peek().is_some() && completed.all(|s| s.passed)
    }
}

fn content_label(content: &ContentCheck) -> String {
    match content {
        ContentCheck::Skipped => "-".to_string(),
        ContentCheck::Match => "match".to_string(),
        ContentCheck::Mismatch {
            first_difference, ..
        } => format!("mismatch@{}", first_difference),
    }
}

/// Format a campaign report as a human-readable table.
pub fn format_summary(report: &CampaignReport) -> String {
    let mut out = String::new();

    for session in &report.sessions {
        let status = if session.interrupted {
            "INTERRUPTED"
        } else if session.passed {
            "PASS"
        } else {
            "FAIL"
        };
        out.push_str(&format!(
            "\nIteration {} ({}) started {}: {}\n",
            session.iteration,
            session.id,
            session.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
            status,
        ));

        if let Some(err) = &session.open_error {
            out.push_str(&format!("  open failed: {}\n", err));
            continue;
        }

        out.push_str(&format!(
            "  {:<16} | {:<16} | {:>10} | {:>10} | {:>8} | Content\n",
            "DUT", "AUX", "Sent", "Received", "Dropped"
        ));
        out.push_str(&format!(
            "  {:-<16}-|-{:-<16}-|-{:-<10}-|-{:-<10}-|-{:-<8}-|-{:-<12}\n",
            "", "", "", "", "", ""
        ));
        for pair in &session.pairs {
            out.push_str(&format!(
                "  {:<16} | {:<16} | {:>10} | {:>10} | {:>8} | {}\n",
                pair.dut,
                pair.aux,
                pair.sent,
                pair.received,
                pair.dropped,
                content_label(&pair.content),
            ));
        }
        for fault in &session.faults {
            out.push_str(&format!(
                "  fault on {} ({}): {}\n",
                fault.port, fault.role, fault.reason
            ));
        }
        let dropped = session.total_dropped();
        if dropped > 0 {
            out.push_str(&format!("  {} byte{} dropped\n", dropped, if dropped == 1 { "" } else { "s" }));
        }
    }

    let passed = report.sessions.iter().filter(|s| s.passed).count();
    out.push_str(&format!(
        "\n{} of {} session{} passed, stopped: {}\n",
        passed,
        report.sessions.len(),
        if report.sessions.len() == 1 { "" } else { "s" },
        report.stop_reason,
    ));
    out
}
