//! Try/catch/finally records
//!
//! Each `entertry` pushes one record that walks InTry → InCatch → InFinally
//! and is popped by `leavefinally`. Control transfers that would leave the
//! protected range are parked in the record's exit action and replayed once
//! the finally body completes.

use crate::loader::ModuleId;
use crate::value::Value;

/// Phase of an active try construct
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryPhase {
    /// Executing the try body
    InTry,
    /// Executing the catch body
    InCatch,
    /// Executing the finally body
    InFinally,
}

/// Deferred control transfer, replayed by `leavefinally`
#[derive(Debug, Clone, Default)]
pub enum ExitAction {
    /// Fall through after the finally body
    #[default]
    None,
    /// `ret`
    Return,
    /// `retval` with its value
    ReturnValue(Value),
    /// `retctor`
    ReturnCtor,
    /// Branch to an absolute address
    Branch(usize),
    /// Propagate an exception outward
    Throw(Value),
}

/// One active try construct
#[derive(Debug, Clone)]
pub struct ExceptionRecord {
    /// Address of the `entertry`
    pub try_offset: usize,
    /// Catch body, if there is a catch clause
    pub catch_offset: Option<usize>,
    /// Finally body
    pub finally_offset: usize,
    /// Current phase
    pub phase: TryPhase,
    /// Module at try entry
    pub module: ModuleId,
    /// Call depth at try entry
    pub call_depth: usize,
    /// Data pointer at try entry
    pub dp: usize,
    /// Stack depth at try entry
    pub stack_depth: usize,
    /// What to do after the finally body
    pub exit_action: ExitAction,
    /// Exception handed to the catch body
    pub exception: Option<Value>,
}

impl ExceptionRecord {
    /// Whether `target` stays inside the try and catch bodies
    pub fn covers(&self, target: usize) -> bool {
        (self.try_offset..self.finally_offset).contains(&target)
    }

    /// Whether a branch or return from here must run the finally body first
    pub fn intercepts(&self) -> bool {
        matches!(self.phase, TryPhase::InTry | TryPhase::InCatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ExceptionRecord {
        ExceptionRecord {
            try_offset: 10,
            catch_offset: Some(20),
            finally_offset: 30,
            phase: TryPhase::InTry,
            module: ModuleId::new(0),
            call_depth: 0,
            dp: 0,
            stack_depth: 0,
            exit_action: ExitAction::None,
            exception: None,
        }
    }

    #[test]
    fn test_covers_try_and_catch_bodies() {
        let record = record();
        assert!(record.covers(10));
        assert!(record.covers(25));
        assert!(!record.covers(30));
        assert!(!record.covers(9));
    }

    #[test]
    fn test_finally_phase_does_not_intercept() {
        let mut record = record();
        assert!(record.intercepts());
        record.phase = TryPhase::InCatch;
        assert!(record.intercepts());
        record.phase = TryPhase::InFinally;
        assert!(!record.intercepts());
    }
}
