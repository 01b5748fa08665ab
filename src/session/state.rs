//! Session and billable-slot state machines.

use serde::{Deserialize, Serialize};

/// Externally reported state of a logical session (or of a slot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Not tracked, or removed.
    #[default]
    Stopped,
    /// Being metered.
    Running,
    /// Tracked but not being metered.
    Paused,
}

impl SessionState {
    /// Check if a tracked record may move to the target state.
    ///
    /// Valid transitions:
    /// - Stopped -> Running (begin)
    /// - Running -> Paused
    /// - Paused -> Running
    /// - Running -> Stopped
    /// - Paused -> Stopped
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (*self, target),
            (Stopped, Running)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Stopped)
                | (Paused, Stopped)
        )
    }

    /// True for `Running` and `Paused`.
    pub fn is_live(&self) -> bool {
        !matches!(self, SessionState::Stopped)
    }
}

/// Coordinator-level phase of the billable session for one [`SessionType`].
///
/// `Starting` and `Resuming` are visible while the corresponding backend
/// call is in flight.
///
/// [`SessionType`]: super::SessionType
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    #[default]
    Stopped,
    Starting,
    Running,
    Paused,
    Resuming,
}

impl SlotState {
    /// The state reported to callers.
    ///
    /// In-flight phases are reported optimistically as `Running`.
    pub fn reported(&self) -> SessionState {
        match self {
            SlotState::Stopped => SessionState::Stopped,
            SlotState::Starting | SlotState::Running | SlotState::Resuming => {
                SessionState::Running
            }
            SlotState::Paused => SessionState::Paused,
        }
    }

    /// Check if a backend begin or resume is pending.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, SlotState::Starting | SlotState::Resuming)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        let mut state = SessionState::Stopped;
        for next in [
            SessionState::Running,
            SessionState::Paused,
            SessionState::Running,
            SessionState::Stopped,
        ] {
            assert!(state.can_transition_to(next), "{:?} -> {:?}", state, next);
            state = next;
        }
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!SessionState::Stopped.can_transition_to(SessionState::Paused));
        assert!(!SessionState::Stopped.can_transition_to(SessionState::Stopped));
        assert!(!SessionState::Running.can_transition_to(SessionState::Running));
        assert!(!SessionState::Paused.can_transition_to(SessionState::Paused));
    }

    #[test]
    fn test_is_live() {
        assert!(!SessionState::Stopped.is_live());
        assert!(SessionState::Running.is_live());
        assert!(SessionState::Paused.is_live());
    }

    #[test]
    fn test_slot_reported_state() {
        assert_eq!(SlotState::Stopped.reported(), SessionState::Stopped);
        assert_eq!(SlotState::Starting.reported(), SessionState::Running);
        assert_eq!(SlotState::Running.reported(), SessionState::Running);
        assert_eq!(SlotState::Resuming.reported(), SessionState::Running);
        assert_eq!(SlotState::Paused.reported(), SessionState::Paused);
    }

    #[test]
    fn test_in_flight() {
        assert!(SlotState::Starting.is_in_flight());
        assert!(SlotState::Resuming.is_in_flight());
        assert!(!SlotState::Running.is_in_flight());
        assert!(!SlotState::Paused.is_in_flight());
        assert!(!SlotState::Stopped.is_in_flight());
    }

    #[test]
    fn test_default() {
        assert_eq!(SessionState::default(), SessionState::Stopped);
        assert_eq!(SlotState::default(), SlotState::Stopped);
    }
}
