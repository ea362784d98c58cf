//! Stack, constant and local-slot opcodes

use crate::value::Value;
use crate::vm::interpreter::{Interpreter, OpcodeResult};
use crate::{VmError, VmResult};
use om_bytecode::{Instruction, Opcode, Operand};

impl<'a> Interpreter<'a> {
    pub(in crate::vm) fn exec_stack_ops(&mut self, instr: &Instruction) -> VmResult<OpcodeResult> {
        match instr.opcode {
            Opcode::Nop => {}

            Opcode::Pop => {
                self.pop()?;
            }

            Opcode::Dup => {
                let top = self.thread().stack.peek()?.clone();
                self.push(top)?;
            }

            Opcode::Swap => {
                let a = self.pop()?;
                let b = self.pop()?;
                self.push(a)?;
                self.push(b)?;
            }

            Opcode::PushNull => self.push(Value::Null)?,
            Opcode::PushTrue => self.push(Value::Bool(true))?,
            Opcode::PushFalse => self.push(Value::Bool(false))?,

            Opcode::PushByte
            | Opcode::PushChar
            | Opcode::PushShort
            | Opcode::PushInt
            | Opcode::PushLong
            | Opcode::PushDouble => {
                let value = match instr.operand {
                    Operand::Byte(v) => Value::Byte(v),
                    Operand::Char(v) => Value::Char(v),
                    Operand::Short(v) => Value::Short(v),
                    Operand::Int(v) => Value::Int(v),
                    Operand::Long(v) => Value::Long(v),
                    Operand::Double(v) => Value::Double(v),
                    _ => Value::Null,
                };
                self.push(value)?;
            }

            Opcode::PushString => {
                let string = self.module().string(Self::index_operand(instr))?;
                self.push(Value::Str(string))?;
            }

            Opcode::LoadLocal => {
                let slot = Self::index_operand(instr);
                let thread = self.thread();
                let value = thread
                    .stack
                    .get(thread.dp + slot as usize)
                    .cloned()
                    .ok_or(VmError::InvalidLocal(slot))?;
                self.push(value)?;
            }

            Opcode::StoreLocal => {
                let slot = Self::index_operand(instr);
                let value = self.pop()?;
                let thread = self.thread();
                let index = thread.dp + slot as usize;
                if !thread.stack.set(index, value) {
                    return Err(VmError::InvalidLocal(slot));
                }
            }

            _ => unreachable!("Not a stack opcode: {:?}", instr.opcode),
        }
        Ok(OpcodeResult::Continue)
    }
}
