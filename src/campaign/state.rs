use serde::Serialize;

/// Where the campaign controller is in its session cycle.
///
/// `Idle → OpeningPorts → Running → Evaluating → (Continue | Stopped)`, with
/// `Continue` leading back to `OpeningPorts`. An open failure skips
/// `Running` and goes straight to `Evaluating`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignState {
    Idle,
    OpeningPorts,
    Running,
    Evaluating,
    Continue,
    Stopped,
}

impl CampaignState {
    /// Whether `next` is a legal successor of `self`.
    pub fn allows(self, next: CampaignState) -> bool {
        use CampaignState::*;
        matches!(
            (self, next),
            (Idle, OpeningPorts)
                | (Idle, Stopped)
                | (OpeningPorts, Running)
                | (OpeningPorts, Evaluating)
                | (Running, Evaluating)
                | (Evaluating, Continue)
                | (Evaluating, Stopped)
                | (Continue, OpeningPorts)
                | (Continue, Stopped)
        )
    }
}

impl std::fmt::Display for CampaignState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CampaignState::Idle => "idle",
            CampaignState::OpeningPorts => "opening_ports",
            CampaignState::Running => "running",
            CampaignState::Evaluating => "evaluating",
            CampaignState::Continue => "continue",
            CampaignState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::CampaignState::*;

    #[test]
    fn test_normal_cycle_is_legal() {
        let cycle = [Idle, OpeningPorts, Running, Evaluating, Continue, OpeningPorts];
        for w in cycle.windows(2) {
            assert!(w[0].allows(w[1]), "{} -> {}", w[0], w[1]);
        }
        assert!(Evaluating.allows(Stopped));
    }

    #[test]
    fn test_open_failure_skips_running() {
        assert!(OpeningPorts.allows(Evaluating));
        assert!(!Idle.allows(Running));
        assert!(!Running.allows(Continue));
    }

    #[test]
    fn test_nothing_follows_stopped() {
        for next in [Idle, OpeningPorts, Running, Evaluating, Continue, Stopped] {
            assert!(!Stopped.allows(next), "stopped -> {}", next);
        }
    }
}
