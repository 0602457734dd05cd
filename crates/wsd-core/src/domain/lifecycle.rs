//! Server lifecycle state machine.
//!
//! ```text
//!  Uncreated ──create()──▶ Created ──run()──▶ Running ──stop()──▶ Stopped
//! ```
//!
//! Every other combination of state and operation is rejected with
//! [`LifecycleError::InvalidTransition`].  `Stopped` is terminal: a server is
//! not restartable, a new instance has to be built instead.

use std::fmt;

use thiserror::Error;

/// Where a server is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Constructed, no listeners yet.
    Uncreated,
    /// Listeners bound, `on_create` hooks fired.
    Created,
    /// `on_start` hooks fired, the reactor loop owns the thread.
    Running,
    /// `on_stop` hooks fired, listeners closed, reactor halted.
    Stopped,
}

/// A lifecycle operation that requests a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleOperation {
    Create,
    Run,
    Stop,
}

/// Error returned when an operation is not allowed in the current state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("cannot {operation} a server that is {state}")]
    InvalidTransition {
        operation: LifecycleOperation,
        state: LifecycleState,
    },
}

impl LifecycleState {
    /// Returns the state reached by applying `operation`, or an error if the
    /// operation is out of order.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidTransition`] for any transition not
    /// shown in the module diagram.
    pub fn transition(self, operation: LifecycleOperation) -> Result<Self, LifecycleError> {
        use LifecycleOperation::*;
        use LifecycleState::*;

        match (self, operation) {
            (Uncreated, Create) => Ok(Created),
            (Created, Run) => Ok(Running),
            (Running, Stop) => Ok(Stopped),
            (state, operation) => Err(LifecycleError::InvalidTransition { operation, state }),
        }
    }

    /// `true` once the server can never accept connections again.
    pub fn is_terminal(self) -> bool {
        self == LifecycleState::Stopped
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Uncreated => "uncreated",
            LifecycleState::Created => "created",
            LifecycleState::Running => "running",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

impl fmt::Display for LifecycleOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleOperation::Create => "create",
            LifecycleOperation::Run => "run",
            LifecycleOperation::Stop => "stop",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::LifecycleOperation::*;
    use super::LifecycleState::*;
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        // Arrange
        let state = Uncreated;

        // Act
        let created = state.transition(Create).unwrap();
        let running = created.transition(Run).unwrap();
        let stopped = running.transition(Stop).unwrap();

        // Assert
        assert_eq!(created, Created);
        assert_eq!(running, Running);
        assert_eq!(stopped, Stopped);
        assert!(stopped.is_terminal());
    }

    #[test]
    fn test_run_before_create_is_rejected() {
        assert_eq!(
            Uncreated.transition(Run),
            Err(LifecycleError::InvalidTransition {
                operation: Run,
                state: Uncreated
            })
        );
    }

    #[test]
    fn test_stop_before_run_is_rejected() {
        assert!(Created.transition(Stop).is_err());
        assert!(Uncreated.transition(Stop).is_err());
    }

    #[test]
    fn test_double_stop_is_rejected() {
        assert!(Stopped.transition(Stop).is_err());
    }

    #[test]
    fn test_create_twice_is_rejected() {
        assert!(Created.transition(Create).is_err());
    }

    #[test]
    fn test_stopped_is_not_restartable() {
        for op in [Create, Run, Stop] {
            assert!(Stopped.transition(op).is_err(), "{op} after stop must fail");
        }
    }

    #[test]
    fn test_error_message_names_operation_and_state() {
        let err = Created.transition(Stop).unwrap_err();
        assert_eq!(err.to_string(), "cannot stop a server that is created");
    }
}
