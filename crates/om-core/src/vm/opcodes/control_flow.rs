//! Branch, case and return opcodes
//!
//! Every transfer goes through `branch_to` or `return_from`, which hand it
//! to the innermost try record of the current frame when the transfer
//! would leave the protected range. The record parks the transfer and
//! runs the finally body first.

use crate::numeric::{self, CompareOp};
use crate::scheduler::FrameKind;
use crate::value::Value;
use crate::vm::exception::{ExitAction, TryPhase};
use crate::vm::interpreter::{Interpreter, OpcodeResult};
use crate::{VmError, VmResult};
use om_bytecode::{Instruction, Opcode, Operand};
use tracing::trace;

/// Return form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(in crate::vm) enum ReturnKind {
    /// `ret`
    Void,
    /// `retval`
    Value,
    /// `retctor`
    Ctor,
}

impl<'a> Interpreter<'a> {
    pub(in crate::vm) fn exec_control_ops(
        &mut self,
        instr: &Instruction,
    ) -> VmResult<OpcodeResult> {
        let offset = match instr.operand {
            Operand::Offset(off) => off,
            _ => 0,
        };
        let target = Self::target(instr, offset);

        match instr.opcode {
            Opcode::Jmp => self.branch_to(target),

            Opcode::Jt | Opcode::Jf => {
                let value = self.pop()?;
                let condition = value.as_bool().ok_or_else(|| {
                    VmError::TypeError(format!(
                        "{} needs a bool, got {}",
                        instr.opcode.name(),
                        value.type_name()
                    ))
                })?;
                if condition == (instr.opcode == Opcode::Jt) {
                    self.branch_to(target);
                }
            }

            Opcode::Jce => self.compare_branch(CompareOp::Eq, target)?,
            Opcode::Jcne => self.compare_branch(CompareOp::Ne, target)?,
            Opcode::Jcl => self.compare_branch(CompareOp::Lt, target)?,
            Opcode::Jcle => self.compare_branch(CompareOp::Le, target)?,
            Opcode::Jcg => self.compare_branch(CompareOp::Gt, target)?,
            Opcode::Jcge => self.compare_branch(CompareOp::Ge, target)?,

            Opcode::Case => {
                let value = self.pop()?;
                let index = value.as_integral().ok_or_else(|| {
                    VmError::TypeError(format!("case needs an integer, got {}", value.type_name()))
                })?;
                if let Operand::Table(table) = &instr.operand {
                    // out-of-range values fall through to the default code
                    if let Some(off) = usize::try_from(index).ok().and_then(|i| table.get(i)) {
                        self.branch_to(Self::target(instr, *off));
                    }
                }
            }

            Opcode::Ret => return self.return_from(ReturnKind::Void, None),
            Opcode::RetVal => {
                let value = self.pop()?;
                return self.return_from(ReturnKind::Value, Some(value));
            }
            Opcode::RetCtor => return self.return_from(ReturnKind::Ctor, None),

            _ => unreachable!("Not a control-flow opcode: {:?}", instr.opcode),
        }
        Ok(OpcodeResult::Continue)
    }

    fn compare_branch(&mut self, op: CompareOp, target: usize) -> VmResult<()> {
        let b = self.pop()?;
        let a = self.pop()?;
        if numeric::compare(op, &a, &b)? {
            self.branch_to(target);
        }
        Ok(())
    }

    /// Index of the current frame's innermost try record, if it still
    /// guards its try or catch body
    fn intercepting_record(&mut self) -> Option<usize> {
        let thread = self.thread();
        let depth = thread.calls.len();
        match thread.handlers.last() {
            Some(record) if record.call_depth == depth && record.intercepts() => {
                Some(thread.handlers.len() - 1)
            }
            _ => None,
        }
    }

    /// Park `action` in the innermost record and run its finally body
    pub(in crate::vm) fn enter_finally(&mut self, action: ExitAction) {
        let thread = self.thread();
        if let Some(record) = thread.handlers.last_mut() {
            trace!(finally = record.finally_offset, ?action, "entering finally");
            record.phase = TryPhase::InFinally;
            record.exit_action = action;
            thread.stack.truncate(record.stack_depth);
            thread.ip = record.finally_offset;
        }
    }

    /// Jump, running the finally body first when leaving a try range
    pub(in crate::vm) fn branch_to(&mut self, target: usize) {
        if let Some(index) = self.intercepting_record() {
            if !self.thread().handlers[index].covers(target) {
                self.enter_finally(ExitAction::Branch(target));
                return;
            }
        }
        self.thread().ip = target;
    }

    /// Return from the current frame, running pending finally bodies first
    pub(in crate::vm) fn return_from(
        &mut self,
        kind: ReturnKind,
        value: Option<Value>,
    ) -> VmResult<OpcodeResult> {
        if self.intercepting_record().is_some() {
            let action = match (kind, value) {
                (ReturnKind::Value, Some(value)) => ExitAction::ReturnValue(value),
                (ReturnKind::Ctor, _) => ExitAction::ReturnCtor,
                _ => ExitAction::Return,
            };
            self.enter_finally(action);
            return Ok(OpcodeResult::Continue);
        }

        let thread = self.thread();
        let Some(call) = thread.calls.pop() else {
            // returning out of the entry sequence ends the thread
            return self.exit_thread();
        };

        // records left by this frame (already finished) die with it
        let depth = thread.calls.len();
        while thread.handlers.last().map_or(false, |r| r.call_depth > depth) {
            thread.handlers.pop();
        }

        let dp = thread.dp;
        match (thread.frame.kind, kind) {
            // the re-executed `loadclass` pushes the class itself
            (FrameKind::Initializer, _) => thread.stack.truncate(dp),
            (FrameKind::Constructor, _) | (_, ReturnKind::Ctor) => thread.stack.truncate(dp + 1),
            (_, ReturnKind::Value) => {
                thread.stack.truncate(dp);
                thread.stack.push(value.unwrap_or_default())?;
            }
            (FrameKind::Invoke, ReturnKind::Void) => {
                thread.stack.truncate(dp);
                thread.stack.push(Value::Null)?;
            }
            (_, ReturnKind::Void) => thread.stack.truncate(dp),
        }

        thread.dp = call.saved_dp;
        thread.ip = call.return_ip;
        thread.module = call.saved_module;
        thread.frame = call.saved_frame;
        Ok(OpcodeResult::Continue)
    }
}
