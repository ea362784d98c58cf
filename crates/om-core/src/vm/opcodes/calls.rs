//! Class loading, instantiation and method call opcodes
//!
//! A call leaves the receiver at the callee's data pointer with the
//! arguments above it, followed by the callee's extra locals.

use crate::class::{ClassId, MethodBody, MethodEntry};
use crate::scheduler::{CallRecord, Frame, FrameKind};
use crate::symbols::MethodKey;
use crate::value::{ObjectRef, Value};
use crate::vm::interpreter::{Interpreter, OpcodeResult};
use crate::vm::opcodes::objects::facade_target;
use crate::{VmError, VmResult};
use om_bytecode::{Instruction, Opcode};
use tracing::{debug, trace};

impl<'a> Interpreter<'a> {
    pub(in crate::vm) fn exec_call_ops(&mut self, instr: &Instruction) -> VmResult<OpcodeResult> {
        let program = self.program;
        let index = Self::index_operand(instr);
        match instr.opcode {
            Opcode::LoadClass => {
                let class = self.module().class_ref(index)?;
                if self.initialize(class, instr.offset)? {
                    // `loadclass` runs again once the initializer returns
                    return Ok(OpcodeResult::Continue);
                }
                self.push(Value::Class(class))?;
            }

            Opcode::New => {
                let class = self.module().class_ref(index)?;
                let def = program.catalog.get(class);
                let object = match &def.facade {
                    Some(facade) => ObjectRef::native(class, facade.new_instance()?),
                    None => ObjectRef::with_fields(class, def.instance_field_count as usize),
                };
                self.push(Value::Object(object))?;
            }

            Opcode::Call => {
                let key = self.module().method_call(index)?;
                self.call_method(key, FrameKind::Normal)?;
            }

            Opcode::Super => {
                let value = self.pop()?;
                let catalog = &program.catalog;
                let declaring = self
                    .thread()
                    .frame
                    .class
                    .ok_or_else(|| VmError::NoParent("<entry>".to_string()))?;
                let parent = catalog
                    .get(declaring)
                    .parent
                    .ok_or_else(|| VmError::NoParent(catalog.name(declaring).to_string()))?;
                let view = match value {
                    Value::Object(object) => Value::Object(object.view_as(parent)),
                    Value::Class(_) => Value::Class(parent),
                    Value::Null => return Err(VmError::NullReceiver("super".to_string())),
                    other => return Err(VmError::NotAnObject(self.describe(&other))),
                };
                self.push(view)?;
            }

            _ => unreachable!("Not a call opcode: {:?}", instr.opcode),
        }
        Ok(OpcodeResult::Continue)
    }

    /// Trip the class's initialization latch
    ///
    /// Enumeration constants are stored right away. Returns true if a
    /// static initializer frame was entered, which returns to `resume_ip`.
    fn initialize(&mut self, class: ClassId, resume_ip: usize) -> VmResult<bool> {
        let program = self.program;
        let def = program.catalog.get(class);
        if !def.begin_initialization() {
            return Ok(false);
        }
        debug!(class = %def.qualified, "initializing class");
        for (name, value) in &def.enum_values {
            if let Some(slot) = def.field(*name) {
                def.set_static(slot.slot, Value::Int(*value));
            }
        }

        let initializer = self
            .initializer
            .map(|name| MethodKey::new(name, 0))
            .and_then(|key| def.method(key).map(|entry| (key, *entry)));
        match initializer {
            Some((key, entry)) if entry.declaring == class => {
                self.push(Value::Class(class))?;
                self.enter_frame(class, key, entry, FrameKind::Initializer, resume_ip)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Dispatch a call whose receiver and arguments are on the stack
    ///
    /// Facade methods complete immediately and push their result.
    pub(in crate::vm) fn call_method(&mut self, key: MethodKey, kind: FrameKind) -> VmResult<()> {
        let program = self.program;
        let arity = key.arity as usize;
        let receiver = self.thread().stack.peek_n(arity)?.clone();
        let class = match &receiver {
            Value::Object(object) => object.class,
            Value::Class(class) => *class,
            Value::Null => {
                return Err(VmError::NullReceiver(program.symbols.signature(key)));
            }
            other => return Err(VmError::NotAnObject(self.describe(other))),
        };

        let def = program.catalog.get(class);
        let entry = *def.method(key).ok_or_else(|| VmError::UnknownMethod {
            class: def.qualified.clone(),
            method: program.symbols.name(key.name).to_string(),
            arity: key.arity,
        })?;
        if matches!(receiver, Value::Class(_)) && !entry.is_static {
            return Err(VmError::NotStatic {
                class: def.qualified.clone(),
                member: program.symbols.signature(key),
            });
        }

        match entry.body {
            MethodBody::Native => {
                let facade = def.facade.as_ref().ok_or_else(|| VmError::Facade {
                    facade: def.qualified.clone(),
                    message: "native method without a facade".to_string(),
                })?;
                let args = self.thread().stack.pop_n(arity)?;
                self.pop()?;
                let target = facade_target(&receiver);
                let name = program.symbols.name(key.name);
                trace!(class = %def.qualified, method = name, "facade call");
                let result = facade.call(target, name, &args)?;
                self.push(result)?;
            }
            MethodBody::Bytecode { .. } => {
                let kind = match kind {
                    FrameKind::Normal if Some(key.name) == self.constructor => {
                        FrameKind::Constructor
                    }
                    kind => kind,
                };
                let return_ip = self.thread().ip;
                self.enter_frame(class, key, entry, kind, return_ip)?;
            }
        }
        Ok(())
    }

    /// Push a call record and jump into a bytecode method
    fn enter_frame(
        &mut self,
        class: ClassId,
        key: MethodKey,
        entry: MethodEntry,
        kind: FrameKind,
        return_ip: usize,
    ) -> VmResult<()> {
        let MethodBody::Bytecode {
            address,
            local_count,
        } = entry.body
        else {
            return Ok(());
        };
        let max_depth = self.options.max_call_depth;
        let thread = self.thread();
        if thread.calls.len() >= max_depth {
            return Err(VmError::CallDepthExceeded(max_depth));
        }
        let depth = thread.stack.depth();
        let dp = depth
            .checked_sub(key.arity as usize + 1)
            .ok_or(VmError::StackUnderflow)?;

        thread.calls.push(CallRecord {
            saved_dp: thread.dp,
            return_ip,
            saved_module: thread.module,
            saved_frame: thread.frame,
        });
        thread.stack.reserve_locals(local_count as usize)?;
        thread.dp = dp;
        thread.ip = address;
        thread.module = entry.module;
        thread.frame = Frame {
            class: Some(entry.declaring),
            method: Some(key),
            kind,
        };
        trace!(
            class = class.index(),
            address,
            depth = thread.calls.len(),
            "entered method"
        );
        Ok(())
    }
}
