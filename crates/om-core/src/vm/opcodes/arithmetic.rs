//! Arithmetic, conversion and comparison opcodes

use crate::numeric::{self, ArithOp, CompareOp};
use crate::value::Value;
use crate::vm::interpreter::{Interpreter, OpcodeResult};
use crate::{VmError, VmResult};
use om_bytecode::{ConvertKind, Instruction, Opcode, Operand};

impl<'a> Interpreter<'a> {
    pub(in crate::vm) fn exec_arithmetic_ops(
        &mut self,
        instr: &Instruction,
    ) -> VmResult<OpcodeResult> {
        let result = match instr.opcode {
            Opcode::Add => {
                let b = self.pop()?;
                let a = self.pop()?;
                if matches!(a, Value::Str(_)) || matches!(b, Value::Str(_)) {
                    let mut joined = self.describe(&a);
                    joined.push_str(&self.describe(&b));
                    Value::string(joined)
                } else {
                    numeric::arith(ArithOp::Add, &a, &b)?
                }
            }
            Opcode::Sub => self.binary(ArithOp::Sub)?,
            Opcode::Mul => self.binary(ArithOp::Mul)?,
            Opcode::Div => self.binary(ArithOp::Div)?,
            Opcode::Mod => self.binary(ArithOp::Mod)?,

            Opcode::Neg => {
                let value = self.pop()?;
                numeric::negate(&value)?
            }
            Opcode::Not => {
                let value = self.pop()?;
                numeric::not(&value)?
            }

            Opcode::Convert => {
                let code = match instr.operand {
                    Operand::Byte(code) => code,
                    _ => 0,
                };
                let kind = ConvertKind::from_u8(code).ok_or_else(|| {
                    VmError::TypeError(format!("unknown conversion kind {}", code))
                })?;
                let value = self.pop()?;
                match kind {
                    ConvertKind::String => Value::string(self.describe(&value)),
                    kind => numeric::convert(&value, kind)?,
                }
            }

            Opcode::Ce => self.comparison(CompareOp::Eq)?,
            Opcode::Cne => self.comparison(CompareOp::Ne)?,
            Opcode::Cl => self.comparison(CompareOp::Lt)?,
            Opcode::Cle => self.comparison(CompareOp::Le)?,
            Opcode::Cg => self.comparison(CompareOp::Gt)?,
            Opcode::Cge => self.comparison(CompareOp::Ge)?,

            _ => unreachable!("Not an arithmetic opcode: {:?}", instr.opcode),
        };
        self.push(result)?;
        Ok(OpcodeResult::Continue)
    }

    fn binary(&mut self, op: ArithOp) -> VmResult<Value> {
        let b = self.pop()?;
        let a = self.pop()?;
        numeric::arith(op, &a, &b)
    }

    fn comparison(&mut self, op: CompareOp) -> VmResult<Value> {
        let b = self.pop()?;
        let a = self.pop()?;
        Ok(Value::Bool(numeric::compare(op, &a, &b)?))
    }
}
