//! Try, catch and finally opcodes

use crate::scheduler::ThreadContext;
use crate::value::Value;
use crate::vm::exception::{ExceptionRecord, ExitAction, TryPhase};
use crate::vm::interpreter::{Interpreter, OpcodeResult};
use crate::vm::opcodes::control_flow::ReturnKind;
use crate::{VmError, VmResult};
use om_bytecode::{Instruction, Opcode, Operand};
use tracing::trace;

/// Unwind calls and stack back to where `record` was entered
fn rewind(thread: &mut ThreadContext, record: &ExceptionRecord) {
    if thread.calls.len() > record.call_depth {
        thread.frame = thread.calls[record.call_depth].saved_frame;
        thread.calls.truncate(record.call_depth);
    }
    thread.dp = record.dp;
    thread.module = record.module;
    thread.stack.truncate(record.stack_depth);
}

impl<'a> Interpreter<'a> {
    pub(in crate::vm) fn exec_exception_ops(
        &mut self,
        instr: &Instruction,
    ) -> VmResult<OpcodeResult> {
        match instr.opcode {
            Opcode::EnterTry => {
                let (catch, finally) = match instr.operand {
                    Operand::TryPair { catch, finally } => (catch, finally),
                    _ => (0, 0),
                };
                let thread = self.thread();
                let record = ExceptionRecord {
                    try_offset: instr.offset,
                    catch_offset: (catch != 0).then(|| Self::target(instr, catch)),
                    finally_offset: Self::target(instr, finally),
                    phase: TryPhase::InTry,
                    module: thread.module,
                    call_depth: thread.calls.len(),
                    dp: thread.dp,
                    stack_depth: thread.stack.depth(),
                    exit_action: ExitAction::None,
                    exception: None,
                };
                trace!(
                    try_offset = record.try_offset,
                    catch = ?record.catch_offset,
                    finally = record.finally_offset,
                    "entered try"
                );
                thread.handlers.push(record);
            }

            Opcode::LeaveTry => {
                self.expect_phase(TryPhase::InTry, "leavetry")?;
                self.enter_finally(ExitAction::None);
            }

            Opcode::LeaveCatch => {
                self.expect_phase(TryPhase::InCatch, "leavecatch")?;
                self.enter_finally(ExitAction::None);
            }

            Opcode::LeaveFinally => {
                self.expect_phase(TryPhase::InFinally, "leavefinally")?;
                let record = self
                    .thread()
                    .handlers
                    .pop()
                    .ok_or(VmError::IllegalExceptionState("leavefinally"))?;
                return self.replay(record.exit_action);
            }

            Opcode::Throw => {
                let exception = self.pop()?;
                self.raise(exception)?;
            }

            Opcode::Rethrow => {
                self.expect_phase(TryPhase::InCatch, "rethrow")?;
                let thread = self.thread();
                if let Some(record) = thread.handlers.last() {
                    let record = record.clone();
                    rewind(thread, &record);
                    let exception = record.exception.unwrap_or_default();
                    self.enter_finally(ExitAction::Throw(exception));
                }
            }

            _ => unreachable!("Not an exception opcode: {:?}", instr.opcode),
        }
        Ok(OpcodeResult::Continue)
    }

    /// The innermost record must belong to this frame and be in `phase`
    fn expect_phase(&mut self, phase: TryPhase, op: &'static str) -> VmResult<()> {
        let thread = self.thread();
        let depth = thread.calls.len();
        match thread.handlers.last() {
            Some(record) if record.phase == phase && record.call_depth == depth => Ok(()),
            _ => Err(VmError::IllegalExceptionState(op)),
        }
    }

    /// Carry out the transfer a finally body deferred
    fn replay(&mut self, action: ExitAction) -> VmResult<OpcodeResult> {
        match action {
            ExitAction::None => Ok(OpcodeResult::Continue),
            ExitAction::Return => self.return_from(ReturnKind::Void, None),
            ExitAction::ReturnValue(value) => self.return_from(ReturnKind::Value, Some(value)),
            ExitAction::ReturnCtor => self.return_from(ReturnKind::Ctor, None),
            ExitAction::Branch(target) => {
                self.branch_to(target);
                Ok(OpcodeResult::Continue)
            }
            ExitAction::Throw(exception) => {
                self.raise(exception)?;
                Ok(OpcodeResult::Continue)
            }
        }
    }

    /// Propagate a thrown value to the innermost record that can take it
    ///
    /// A record in its try body hands the value to its catch body (or, with
    /// no catch clause, to its finally body). A record in its catch body
    /// runs its finally body and rethrows afterwards. Records already in
    /// their finally body are abandoned.
    pub(in crate::vm) fn raise(&mut self, exception: Value) -> VmResult<()> {
        loop {
            let Some(record) = self.thread().handlers.last().cloned() else {
                return Err(VmError::UncaughtException(self.describe(&exception)));
            };
            let thread = self.thread();
            match record.phase {
                TryPhase::InTry => {
                    rewind(thread, &record);
                    match record.catch_offset {
                        Some(catch) => {
                            trace!(catch, "exception caught");
                            if let Some(top) = thread.handlers.last_mut() {
                                top.phase = TryPhase::InCatch;
                                top.exception = Some(exception.clone());
                            }
                            thread.stack.push(exception)?;
                            thread.ip = catch;
                        }
                        None => self.enter_finally(ExitAction::Throw(exception)),
                    }
                    return Ok(());
                }
                TryPhase::InCatch => {
                    rewind(thread, &record);
                    self.enter_finally(ExitAction::Throw(exception));
                    return Ok(());
                }
                TryPhase::InFinally => {
                    thread.handlers.pop();
                }
            }
        }
    }
}
