use std::fmt;

use super::error::{DispatchError, StageError};

/// Stops the primary action of a request
///
/// Raised from `prepare`, a `before` stage or the action itself. The
/// remaining `before` stages and the action are skipped; middleware that
/// already entered still get `after` and `after_finish`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Interrupt;

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request interrupted")
    }
}

/// Why a stage stopped short of completing normally
#[derive(Debug)]
pub enum Halt {
    Interrupted(Interrupt),
    Failed(StageError),
}

impl From<Interrupt> for Halt {
    fn from(interrupt: Interrupt) -> Self {
        Halt::Interrupted(interrupt)
    }
}

impl From<StageError> for Halt {
    fn from(error: StageError) -> Self {
        Halt::Failed(error)
    }
}

impl From<DispatchError> for Halt {
    fn from(error: DispatchError) -> Self {
        Halt::Failed(error.into())
    }
}

/// What stage code returns; `?` works on anything convertible into a `Halt`
pub type StageResult = Result<(), Halt>;

/// Result of running one stage or action to completion
///
/// The executor matches on this to pick its next transition.
#[derive(Debug)]
pub enum Outcome {
    Completed,
    Interrupted,
    Failed(StageError),
}

impl Outcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed)
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Outcome::Interrupted)
    }

    /// Collapse into a result, treating an interrupt as success
    pub fn into_result(self) -> Result<(), StageError> {
        match self {
            Outcome::Completed | Outcome::Interrupted => Ok(()),
            Outcome::Failed(error) => Err(error),
        }
    }
}

impl From<StageResult> for Outcome {
    fn from(result: StageResult) -> Self {
        match result {
            Ok(()) => Outcome::Completed,
            Err(Halt::Interrupted(_)) => Outcome::Interrupted,
            Err(Halt::Failed(error)) => Outcome::Failed(error),
        }
    }
}
