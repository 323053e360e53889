//! Remote status interpretation
//!
//! Maps the raw remote instance status onto the coarse deployment status the
//! record store persists, and detects transitions worth surfacing.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse deployment status persisted on the record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Provisioning,
    Running,
    Stopped,
    Error,
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeploymentStatus::Provisioning => "provisioning",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Stopped => "stopped",
            DeploymentStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Map a raw remote status (lowercased) onto a deployment status. Statuses
/// outside the known set leave the previous mapping in place rather than
/// flapping to error.
pub fn map_raw_status(raw: &str, previous: DeploymentStatus) -> DeploymentStatus {
    match raw {
        "running" => DeploymentStatus::Running,
        "terminated" | "stopped" => DeploymentStatus::Stopped,
        "staging" | "provisioning" => DeploymentStatus::Provisioning,
        _ => previous,
    }
}

/// Whether the instance is mid-change and worth polling quickly
pub fn is_transitional(raw: &str) -> bool {
    matches!(raw, "provisioning" | "staging" | "stopping" | "suspending")
}

/// Whether the status is a settled end state
pub fn is_stable(raw: &str) -> bool {
    matches!(raw, "running" | "terminated" | "stopped")
}

/// A settled change in raw status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTransition {
    /// Last stable status observed before the change
    pub from: Option<String>,
    pub to: String,
    pub mapped: DeploymentStatus,
}

/// Emit a transition only when the current status is stable and differs from
/// the last *stable* status observed. Intermediate reads (staging, stopping)
/// never produce events and never become the `from` side: the sequence
/// `running -> staging -> terminated` yields exactly one event,
/// `running -> terminated`.
pub fn detect_transition(
    last_stable: Option<&str>,
    current_raw: &str,
    mapped: DeploymentStatus,
) -> Option<StatusTransition> {
    if last_stable == Some(current_raw) || !is_stable(current_raw) {
        return None;
    }
    Some(StatusTransition {
        from: last_stable.map(|s| s.to_string()),
        to: current_raw.to_string(),
        mapped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_statuses_map_directly() {
        let prev = DeploymentStatus::Provisioning;
        assert_eq!(map_raw_status("running", prev), DeploymentStatus::Running);
        assert_eq!(map_raw_status("terminated", prev), DeploymentStatus::Stopped);
        assert_eq!(map_raw_status("stopped", prev), DeploymentStatus::Stopped);
        assert_eq!(
            map_raw_status("staging", DeploymentStatus::Running),
            DeploymentStatus::Provisioning
        );
    }

    #[test]
    fn test_unknown_status_keeps_previous() {
        assert_eq!(
            map_raw_status("repairing", DeploymentStatus::Running),
            DeploymentStatus::Running
        );
        assert_eq!(
            map_raw_status("", DeploymentStatus::Stopped),
            DeploymentStatus::Stopped
        );
    }

    #[test]
    fn test_transitional_and_stable_are_disjoint() {
        for raw in ["provisioning", "staging", "stopping", "suspending"] {
            assert!(is_transitional(raw));
            assert!(!is_stable(raw));
        }
        for raw in ["running", "terminated", "stopped"] {
            assert!(is_stable(raw));
            assert!(!is_transitional(raw));
        }
    }

    #[test]
    fn test_transition_requires_change_and_stability() {
        // unchanged: no event
        assert!(detect_transition(Some("running"), "running", DeploymentStatus::Running).is_none());
        // changed but unsettled: no event
        assert!(detect_transition(Some("running"), "stopping", DeploymentStatus::Running).is_none());
        // settled change, bridging the intermediate read: one event
        let t = detect_transition(Some("running"), "terminated", DeploymentStatus::Stopped)
            .unwrap();
        assert_eq!(t.from.as_deref(), Some("running"));
        assert_eq!(t.to, "terminated");
        assert_eq!(t.mapped, DeploymentStatus::Stopped);
    }

    #[test]
    fn test_staged_sequence_yields_single_bridging_event() {
        let mut last_stable: Option<String> = None;
        let mut events = Vec::new();
        for raw in ["running", "staging", "terminated"] {
            let mapped = map_raw_status(raw, DeploymentStatus::Provisioning);
            if let Some(t) = detect_transition(last_stable.as_deref(), raw, mapped) {
                events.push(t);
            }
            if is_stable(raw) {
                last_stable = Some(raw.to_string());
            }
        }
        assert_eq!(events.len(), 2);
        // initial settle, then the bridged stop
        assert_eq!(events[1].from.as_deref(), Some("running"));
        assert_eq!(events[1].to, "terminated");
    }

    #[test]
    fn test_first_observation_of_stable_status_is_a_transition() {
        let t = detect_transition(None, "running", DeploymentStatus::Running).unwrap();
        assert_eq!(t.from, None);
        assert_eq!(t.to, "running");
    }
}
