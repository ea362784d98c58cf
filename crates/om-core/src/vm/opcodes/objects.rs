//! Field access and type test opcodes

use crate::class::{ClassDef, ClassId, FieldSlot};
use crate::facade::FacadeTarget;
use crate::symbols::Symbol;
use crate::value::{ObjectStorage, Value};
use crate::vm::interpreter::{Interpreter, OpcodeResult};
use crate::{VmError, VmResult};
use om_bytecode::{Instruction, Opcode};

/// Facade view of a receiver: instances pass their native handle
pub(in crate::vm) fn facade_target(target: &Value) -> FacadeTarget<'_> {
    match target {
        Value::Object(object) => match object.handle() {
            Some(handle) => FacadeTarget::Instance(handle),
            None => FacadeTarget::Static,
        },
        _ => FacadeTarget::Static,
    }
}

impl<'a> Interpreter<'a> {
    pub(in crate::vm) fn exec_object_ops(
        &mut self,
        instr: &Instruction,
    ) -> VmResult<OpcodeResult> {
        let index = Self::index_operand(instr);
        match instr.opcode {
            Opcode::LoadField => {
                let name = self.module().field_name(index)?;
                let target = self.pop()?;
                let value = self.read_field(&target, name)?;
                self.push(value)?;
            }

            Opcode::StoreField => {
                let name = self.module().field_name(index)?;
                let value = self.pop()?;
                let target = self.pop()?;
                self.write_field(&target, name, value)?;
            }

            Opcode::InstanceOf => {
                let class = self.module().class_ref(index)?;
                let value = self.pop()?;
                let result = match &value {
                    Value::Object(object) => self.program.catalog.is_subclass(object.class, class),
                    Value::Null => false,
                    other => {
                        return Err(VmError::IllegalTarget {
                            op: "instanceof",
                            value: self.describe(other),
                        })
                    }
                };
                self.push(Value::Bool(result))?;
            }

            _ => unreachable!("Not an object opcode: {:?}", instr.opcode),
        }
        Ok(OpcodeResult::Continue)
    }

    /// Class a member access on `target` resolves against
    pub(in crate::vm) fn member_class(&self, target: &Value, member: &str) -> VmResult<&'a ClassDef> {
        let class = self.member_class_id(target, member)?;
        Ok(self.program.catalog.get(class))
    }

    /// Class id of an object or class value
    pub(in crate::vm) fn member_class_id(&self, target: &Value, member: &str) -> VmResult<ClassId> {
        match target {
            Value::Object(object) => Ok(object.class),
            Value::Class(class) => Ok(*class),
            Value::Null => Err(VmError::NullReceiver(member.to_string())),
            other => Err(VmError::NotAnObject(self.describe(other))),
        }
    }

    /// Slot of a bytecode-class field; instance fields need an object
    fn field_slot(&self, def: &ClassDef, target: &Value, name: Symbol) -> VmResult<FieldSlot> {
        let field = self.program.symbols.name(name);
        let slot = def.field(name).ok_or_else(|| VmError::UnknownField {
            class: def.qualified.clone(),
            field: field.to_string(),
        })?;
        if !slot.is_static && !matches!(target, Value::Object(_)) {
            return Err(VmError::NotStatic {
                class: def.qualified.clone(),
                member: field.to_string(),
            });
        }
        Ok(slot)
    }

    /// Read a field of an object or class
    pub(in crate::vm) fn read_field(&self, target: &Value, name: Symbol) -> VmResult<Value> {
        let field = self.program.symbols.name(name);
        let def = self.member_class(target, field)?;
        if let Some(facade) = &def.facade {
            return facade.get_field(facade_target(target), field);
        }
        let slot = self.field_slot(def, target, name)?;
        match target {
            Value::Object(object) if !slot.is_static => match &*object.storage {
                ObjectStorage::Fields(fields) => Ok((slot.slot as usize)
                    .checked_sub(1)
                    .and_then(|index| fields.borrow().get(index).cloned())
                    .unwrap_or_default()),
                ObjectStorage::Native(_) => Ok(Value::Null),
            },
            _ => Ok(def.static_value(slot.slot)),
        }
    }

    /// Write a field of an object or class
    pub(in crate::vm) fn write_field(&self, target: &Value, name: Symbol, value: Value) -> VmResult<()> {
        let field = self.program.symbols.name(name);
        let def = self.member_class(target, field)?;
        if let Some(facade) = &def.facade {
            return facade.set_field(facade_target(target), field, value);
        }
        let slot = self.field_slot(def, target, name)?;
        match target {
            Value::Object(object) if !slot.is_static => {
                let index = (slot.slot as usize).checked_sub(1);
                if let (ObjectStorage::Fields(fields), Some(index)) = (&*object.storage, index) {
                    let mut fields = fields.borrow_mut();
                    if index >= fields.len() {
                        fields.resize(index + 1, Value::Null);
                    }
                    fields[index] = value;
                }
            }
            _ => def.set_static(slot.slot, value),
        }
        Ok(())
    }
}
