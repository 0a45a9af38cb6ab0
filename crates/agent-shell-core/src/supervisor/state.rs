//! Supervisor lifecycle state machine.

use serde::Serialize;

/// Lifecycle state of the supervised backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    NotStarted,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

/// Something that happened to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Start,
    Spawned,
    SpawnFailed,
    StopRequested,
    Exited { code: Option<i32>, requested: bool },
    /// Return a finished supervisor to `NotStarted` so it can start again.
    Reset,
}

impl SupervisorState {
    /// Whether `start` may be called in this state.
    pub fn can_start(self) -> bool {
        matches!(
            self,
            SupervisorState::NotStarted | SupervisorState::Stopped | SupervisorState::Failed
        )
    }

    /// Whether a backend process exists (or is being created).
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SupervisorState::Starting | SupervisorState::Running | SupervisorState::Stopping
        )
    }

    /// Apply a transition, or `None` if it is not valid from this state.
    pub fn next(self, transition: Transition) -> Option<SupervisorState> {
        use SupervisorState::*;

        match (self, transition) {
            (NotStarted, Transition::Start) => Some(Starting),
            (Stopped | Failed, Transition::Reset) => Some(NotStarted),
            (Starting, Transition::Spawned) => Some(Running),
            (Starting, Transition::SpawnFailed) => Some(Failed),
            (Running, Transition::StopRequested) => Some(Stopping),
            (Stopping, Transition::StopRequested) => Some(Stopping),
            (Stopping, Transition::Exited { .. }) => Some(Stopped),
            (Running, Transition::Exited { requested: true, .. }) => Some(Stopped),
            // An exit nobody asked for is a crash unless the backend said it was done
            (Running, Transition::Exited { code: Some(0), .. }) => Some(Stopped),
            (Running, Transition::Exited { .. }) => Some(Failed),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SupervisorState::*;
    use super::*;

    #[test]
    fn test_happy_path() {
        let state = NotStarted.next(Transition::Start).unwrap();
        assert_eq!(state, Starting);
        let state = state.next(Transition::Spawned).unwrap();
        assert_eq!(state, Running);
        let state = state.next(Transition::StopRequested).unwrap();
        assert_eq!(state, Stopping);
        let state = state
            .next(Transition::Exited {
                code: None,
                requested: true,
            })
            .unwrap();
        assert_eq!(state, Stopped);
    }

    #[test]
    fn test_unrequested_exit() {
        let crash = Transition::Exited {
            code: Some(1),
            requested: false,
        };
        let killed = Transition::Exited {
            code: None,
            requested: false,
        };
        let clean = Transition::Exited {
            code: Some(0),
            requested: false,
        };

        assert_eq!(Running.next(crash), Some(Failed));
        assert_eq!(Running.next(killed), Some(Failed));
        assert_eq!(Running.next(clean), Some(Stopped));
    }

    #[test]
    fn test_start_only_from_idle_states() {
        assert!(NotStarted.can_start());
        assert!(Stopped.can_start());
        assert!(Failed.can_start());
        assert!(!Starting.can_start());
        assert!(!Running.can_start());
        assert!(!Stopping.can_start());

        assert_eq!(Running.next(Transition::Start), None);
        assert_eq!(Failed.next(Transition::Reset), Some(NotStarted));
    }

    #[test]
    fn test_invalid_transitions() {
        assert_eq!(NotStarted.next(Transition::Spawned), None);
        assert_eq!(Stopped.next(Transition::StopRequested), None);
        assert_eq!(Starting.next(Transition::StopRequested), None);
    }

    #[test]
    fn test_serialization() {
        assert_eq!(
            serde_json::to_string(&NotStarted).unwrap(),
            r#""not_started""#
        );
    }
}
