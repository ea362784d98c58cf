//! Array opcodes

use crate::value::{ArrayRef, Value};
use crate::vm::interpreter::{Interpreter, OpcodeResult};
use crate::{VmError, VmResult};
use om_bytecode::{Instruction, Opcode, Operand};

impl<'a> Interpreter<'a> {
    pub(in crate::vm) fn exec_array_ops(&mut self, instr: &Instruction) -> VmResult<OpcodeResult> {
        match instr.opcode {
            Opcode::NewArray => {
                let length = self.pop()?;
                let length = self.integral(&length, "array length")?;
                if length < 0 {
                    return Err(VmError::NegativeLength(length));
                }
                let len = usize::try_from(length)
                    .ok()
                    .filter(|len| *len <= self.options.max_array_len)
                    .ok_or(VmError::ArrayTooLarge(length))?;
                let mut items = Vec::new();
                items
                    .try_reserve_exact(len)
                    .map_err(|_| VmError::ArrayTooLarge(length))?;
                items.resize(len, Value::Null);
                self.push(Value::array(items))?;
            }

            Opcode::ArrayLoad => {
                let index = self.pop()?;
                let array = self.pop()?;
                let array = self.array_operand(&array, "arrayload")?;
                let index = self.integral(&index, "array index")?;
                let items = array.borrow();
                let value = element_index(index, items.len()).map(|i| items[i].clone())?;
                drop(items);
                self.push(value)?;
            }

            Opcode::ArrayStore => {
                let value = self.pop()?;
                let index = self.pop()?;
                let array = self.pop()?;
                let array = self.array_operand(&array, "arraystore")?;
                let index = self.integral(&index, "array index")?;
                let mut items = array.borrow_mut();
                let slot = element_index(index, items.len())?;
                items[slot] = value;
            }

            Opcode::ArrayLength => {
                let array = self.pop()?;
                let array = self.array_operand(&array, "arraylength")?;
                let length = array.borrow().len();
                self.push(Value::Int(length as i32))?;
            }

            Opcode::MakeArray => {
                let count = match instr.operand {
                    Operand::Count(count) => count as usize,
                    _ => 0,
                };
                let items = self.thread().stack.pop_n(count)?;
                self.push(Value::array(items))?;
            }

            _ => unreachable!("Not an array opcode: {:?}", instr.opcode),
        }
        Ok(OpcodeResult::Continue)
    }

    fn integral(&self, value: &Value, what: &str) -> VmResult<i64> {
        value.as_integral().ok_or_else(|| {
            VmError::TypeError(format!("{} must be an integer, got {}", what, value.type_name()))
        })
    }

    fn array_operand(&self, value: &Value, op: &'static str) -> VmResult<ArrayRef> {
        match value {
            Value::Array(array) => Ok(array.clone()),
            Value::Null => Err(VmError::NullReceiver(op.to_string())),
            other => Err(VmError::TypeError(format!(
                "{} needs an array, got {}",
                op,
                other.type_name()
            ))),
        }
    }
}

fn element_index(index: i64, length: usize) -> VmResult<usize> {
    usize::try_from(index)
        .ok()
        .filter(|i| *i < length)
        .ok_or(VmError::IndexOutOfBounds { index, length })
}
