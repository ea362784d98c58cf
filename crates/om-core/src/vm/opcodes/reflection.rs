//! Reflective opcodes
//!
//! `hierarchy`, `fields` and `methods` describe the class of an object or
//! class value as arrays of strings. `getfield`, `setfield` and `invoke`
//! take the member name as a string instead of a table index.

use crate::class::ClassDef;
use crate::scheduler::FrameKind;
use crate::symbols::{MethodKey, Symbol};
use crate::value::Value;
use crate::vm::interpreter::{Interpreter, OpcodeResult};
use crate::{VmError, VmResult};
use om_bytecode::{Instruction, Opcode};

impl<'a> Interpreter<'a> {
    pub(in crate::vm) fn exec_reflection_ops(
        &mut self,
        instr: &Instruction,
    ) -> VmResult<OpcodeResult> {
        let program = self.program;
        match instr.opcode {
            Opcode::Hierarchy => {
                let target = self.pop()?;
                let class = self.member_class_id(&target, "hierarchy")?;
                let names = program
                    .catalog
                    .hierarchy(class)
                    .into_iter()
                    .map(|id| Value::string(program.catalog.name(id)))
                    .collect();
                self.push(Value::array(names))?;
            }

            Opcode::Fields => {
                let target = self.pop()?;
                let def = self.member_class(&target, "fields")?;
                let names = self.field_names(def);
                self.push(Value::array(names))?;
            }

            Opcode::Methods => {
                let target = self.pop()?;
                let def = self.member_class(&target, "methods")?;
                let mut signatures: Vec<String> = def
                    .methods
                    .keys()
                    .map(|key| program.symbols.signature(*key))
                    .collect();
                signatures.sort();
                self.push(Value::array(signatures.into_iter().map(Value::string).collect()))?;
            }

            Opcode::GetField => {
                let name = self.pop()?;
                let target = self.pop()?;
                let def = self.member_class(&target, "getfield")?;
                let symbol = self.field_symbol(def, &name)?;
                let value = self.read_field(&target, symbol)?;
                self.push(value)?;
            }

            Opcode::SetField => {
                let value = self.pop()?;
                let name = self.pop()?;
                let target = self.pop()?;
                let def = self.member_class(&target, "setfield")?;
                let symbol = self.field_symbol(def, &name)?;
                self.write_field(&target, symbol, value)?;
            }

            Opcode::Invoke => {
                let args = self.pop()?;
                let name = self.pop()?;
                let target = self.pop()?;
                let args = match &args {
                    Value::Array(items) => items.borrow().clone(),
                    other => {
                        return Err(VmError::TypeError(format!(
                            "invoke needs an argument array, got {}",
                            other.type_name()
                        )))
                    }
                };
                let def = self.member_class(&target, "invoke")?;
                let method = self.member_name(&name, "invoke")?;
                let arity = u16::try_from(args.len()).map_err(|_| {
                    VmError::TypeError(format!(
                        "invoke of {} passes {} arguments, more than a method can take",
                        method,
                        args.len()
                    ))
                })?;
                let key = program
                    .symbols
                    .get(method)
                    .map(|symbol| MethodKey::new(symbol, arity))
                    .ok_or_else(|| VmError::UnknownMethod {
                        class: def.qualified.clone(),
                        method: method.to_string(),
                        arity,
                    })?;
                self.push(target)?;
                for arg in args {
                    self.push(arg)?;
                }
                self.call_method(key, FrameKind::Invoke)?;
            }

            _ => unreachable!("Not a reflection opcode: {:?}", instr.opcode),
        }
        Ok(OpcodeResult::Continue)
    }

    /// Field names ordered statics first, then by slot
    fn field_names(&self, def: &ClassDef) -> Vec<Value> {
        if let Some(facade) = &def.facade {
            return facade
                .static_fields()
                .into_iter()
                .chain(facade.instance_fields())
                .map(Value::string)
                .collect();
        }
        let mut fields: Vec<_> = def.fields.iter().collect();
        fields.sort_by_key(|(_, slot)| (!slot.is_static, slot.slot));
        fields
            .into_iter()
            .map(|(name, _)| Value::string(self.program.symbols.name(*name)))
            .collect()
    }

    fn member_name<'v>(&self, name: &'v Value, op: &str) -> VmResult<&'v str> {
        name.as_str().ok_or_else(|| {
            VmError::TypeError(format!(
                "{} needs a member name string, got {}",
                op,
                name.type_name()
            ))
        })
    }

    fn field_symbol(&self, def: &ClassDef, name: &Value) -> VmResult<Symbol> {
        let field = self.member_name(name, "field access")?;
        self.program
            .symbols
            .get(field)
            .ok_or_else(|| VmError::UnknownField {
                class: def.qualified.clone(),
                field: field.to_string(),
            })
    }
}
