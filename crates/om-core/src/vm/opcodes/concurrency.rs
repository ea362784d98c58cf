//! Thread and monitor opcodes
//!
//! Blocking opcodes only record the new thread state and yield; the
//! scheduler decides when the thread resumes.

use crate::scheduler::{MonitorKey, ThreadId, ThreadState};
use crate::value::Value;
use crate::vm::interpreter::{Interpreter, OpcodeResult};
use crate::{VmError, VmResult};
use om_bytecode::{Instruction, Opcode};
use tracing::debug;

impl<'a> Interpreter<'a> {
    pub(in crate::vm) fn exec_concurrency_ops(
        &mut self,
        instr: &Instruction,
    ) -> VmResult<OpcodeResult> {
        match instr.opcode {
            Opcode::Fork => {
                let child = self.scheduler.fork_current()?;
                if let Some(thread) = self.scheduler.thread_mut(child) {
                    thread.stack.push(Value::Int(0))?;
                }
                self.push(Value::Int(child.as_u32() as i32))?;
            }

            Opcode::Join => {
                let value = self.pop()?;
                let id = value
                    .as_integral()
                    .and_then(|id| u32::try_from(id).ok())
                    .map(ThreadId::new)
                    .ok_or_else(|| VmError::IllegalTarget {
                        op: "join",
                        value: self.describe(&value),
                    })?;
                let thread = self.thread();
                if id == thread.id {
                    return Err(VmError::IllegalTarget {
                        op: "join",
                        value: id.to_string(),
                    });
                }
                if self.scheduler.contains(id) {
                    self.thread().state = ThreadState::Joining(id);
                    return Ok(OpcodeResult::Yield);
                }
            }

            Opcode::Exit => return self.exit_thread(),

            Opcode::Nice => {
                self.thread().state = ThreadState::Suspending;
                return Ok(OpcodeResult::Yield);
            }

            Opcode::Sleep => {
                let value = self.pop()?;
                let millis = value.as_integral().ok_or_else(|| {
                    VmError::TypeError(format!("sleep needs an integer, got {}", value.type_name()))
                })?;
                let wake = self.clock.now() + self.clock.ticks_for_millis(millis);
                self.thread().state = ThreadState::Sleeping(wake);
                return Ok(OpcodeResult::Yield);
            }

            Opcode::Wait => {
                let target = self.pop()?;
                let key = self.monitor_key(&target, "wait")?;
                if !self.scheduler.try_acquire(key, &target) {
                    self.thread().state = ThreadState::Waiting { key, target };
                    return Ok(OpcodeResult::Yield);
                }
            }

            Opcode::Signal => {
                let target = self.pop()?;
                let key = self.monitor_key(&target, "signal")?;
                if !self.scheduler.release(key) {
                    return Err(VmError::MonitorNotHeld(self.describe(&target)));
                }
            }

            Opcode::ThreadId => {
                let id = self.thread().id;
                self.push(Value::Int(id.as_u32() as i32))?;
            }

            _ => unreachable!("Not a concurrency opcode: {:?}", instr.opcode),
        }
        Ok(OpcodeResult::Continue)
    }

    /// Finish the running thread
    ///
    /// The main thread's result is the value above its argument slot. The
    /// last thread to exit halts the engine.
    pub(in crate::vm) fn exit_thread(&mut self) -> VmResult<OpcodeResult> {
        let last = self.scheduler.thread_count() == 1;
        let thread = self.thread();
        if thread.id == ThreadId::MAIN {
            let result = match thread.stack.depth() {
                0 | 1 => Value::Null,
                _ => thread.stack.peek()?.clone(),
            };
            self.result = result;
        }
        let thread = self.thread();
        debug!(thread = %thread.id, last, "thread exit");
        if last {
            return Ok(OpcodeResult::Halt);
        }
        thread.state = ThreadState::Exiting;
        Ok(OpcodeResult::Yield)
    }

    fn monitor_key(&self, target: &Value, op: &'static str) -> VmResult<MonitorKey> {
        match target {
            Value::Object(object) => Ok(MonitorKey::Object(object.identity())),
            Value::Array(array) => Ok(MonitorKey::Array(std::rc::Rc::as_ptr(array) as usize)),
            Value::Class(class) => Ok(MonitorKey::Class(*class)),
            other => Err(VmError::IllegalTarget {
                op,
                value: self.describe(other),
            }),
        }
    }
}
