//! Virtual machine execution

pub mod exception;
mod interpreter;
mod opcodes;

pub use exception::{ExceptionRecord, ExitAction, TryPhase};
pub use interpreter::Vm;
