//! Code and unit emission
//!
//! `CodeBuilder` emits one instruction per call. Forward branches are
//! emitted with a wide placeholder and a [`Label`]; anchoring the label
//! back-patches every site that refers to it. `UnitBuilder` adds the
//! metadata tables and produces a [`CompiledUnit`].

use crate::encoder::BytecodeWriter;
use crate::metadata::{encode_records, ClassHeader, ClassKind, MetaRecord};
use crate::opcode::{ConvertKind, Opcode, OperandKind, Width};
use crate::switch::SwitchStrategy;
use crate::unit::CompiledUnit;
use std::collections::HashMap;
use std::hash::Hash;
use thiserror::Error;

/// Emission errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// A label was branched to but never anchored
    #[error("label {label} referenced at offset {site} was never anchored")]
    UnresolvedLabel {
        /// Label number
        label: usize,
        /// Offset of the first referencing instruction
        site: usize,
    },

    /// A branch distance does not fit in 32 bits
    #[error("branch at offset {0} does not fit in a 32-bit offset")]
    OffsetOverflow(usize),
}

/// Branch target placeholder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(usize);

impl Label {
    /// Label number, in creation order
    pub fn id(self) -> usize {
        self.0
    }
}

/// Offsets emitted by `enter_try`
#[derive(Debug, Clone, Copy)]
pub struct TryLabels {
    /// Catch body (absent for try/finally)
    pub catch: Option<Label>,
    /// Finally body
    pub finally: Label,
}

/// Targets of a lowered switch
#[derive(Debug, Clone)]
pub struct SwitchLabels {
    /// One label per case value, in the order given
    pub cases: Vec<Label>,
    /// Taken when no case matches
    pub default: Label,
}

#[derive(Debug, Clone, Copy)]
struct Site {
    /// Start of the instruction carrying the offset
    instr: usize,
    /// Position of the offset bytes
    at: usize,
    width: Width,
}

#[derive(Debug, Default)]
struct LabelState {
    sites: Vec<Site>,
    target: Option<usize>,
}

macro_rules! simple_ops {
    ($($(#[$doc:meta])* $name:ident => $op:ident;)*) => {
        $(
            $(#[$doc])*
            pub fn $name(&mut self) {
                self.emit_op(Opcode::$op);
            }
        )*
    };
}

macro_rules! index_ops {
    ($($(#[$doc:meta])* $name:ident => $op:ident;)*) => {
        $(
            $(#[$doc])*
            pub fn $name(&mut self, index: u32) {
                self.emit_index(Opcode::$op, index);
            }
        )*
    };
}

/// Instruction stream builder
#[derive(Debug, Default)]
pub struct CodeBuilder {
    writer: BytecodeWriter,
    labels: Vec<LabelState>,
    overflow: Option<usize>,
}

impl CodeBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Offset the next instruction will be emitted at
    pub fn position(&self) -> usize {
        self.writer.offset()
    }

    /// Bytes emitted so far (placeholders included)
    pub fn bytes(&self) -> &[u8] {
        self.writer.buffer()
    }

    // ===== Generic emission =====

    /// Emit an opcode that takes no operand
    pub fn emit_op(&mut self, opcode: Opcode) {
        debug_assert_eq!(opcode.operand(), OperandKind::None, "{} takes an operand", opcode);
        self.writer.emit_opcode(opcode, Width::Narrow);
    }

    /// Emit an index-operand opcode at the narrowest width for `index`
    pub fn emit_index(&mut self, opcode: Opcode, index: u32) {
        debug_assert_eq!(opcode.operand(), OperandKind::Index, "{} takes no index", opcode);
        let width = Width::for_index(index);
        self.writer.emit_opcode(opcode, width);
        self.writer.emit_index(width, index);
    }

    simple_ops! {
        /// `nop`
        emit_nop => Nop;
        /// `pop`
        emit_pop => Pop;
        /// `dup`
        emit_dup => Dup;
        /// `swap`
        emit_swap => Swap;
        /// `pushnull`
        emit_push_null => PushNull;
        /// `super`
        emit_super => Super;
        /// `ret`
        emit_ret => Ret;
        /// `retval`
        emit_ret_val => RetVal;
        /// `retctor`
        emit_ret_ctor => RetCtor;
        /// `add`
        emit_add => Add;
        /// `sub`
        emit_sub => Sub;
        /// `mul`
        emit_mul => Mul;
        /// `div`
        emit_div => Div;
        /// `mod`
        emit_mod => Mod;
        /// `neg`
        emit_neg => Neg;
        /// `not`
        emit_not => Not;
        /// `ce`
        emit_ce => Ce;
        /// `cne`
        emit_cne => Cne;
        /// `cl`
        emit_cl => Cl;
        /// `cle`
        emit_cle => Cle;
        /// `cg`
        emit_cg => Cg;
        /// `cge`
        emit_cge => Cge;
        /// `leavetry`
        emit_leave_try => LeaveTry;
        /// `leavecatch`
        emit_leave_catch => LeaveCatch;
        /// `leavefinally`
        emit_leave_finally => LeaveFinally;
        /// `throw`
        emit_throw => Throw;
        /// `rethrow`
        emit_rethrow => Rethrow;
        /// `newarray`
        emit_new_array => NewArray;
        /// `arrayload`
        emit_array_load => ArrayLoad;
        /// `arraystore`
        emit_array_store => ArrayStore;
        /// `arraylength`
        emit_array_length => ArrayLength;
        /// `fork`
        emit_fork => Fork;
        /// `join`
        emit_join => Join;
        /// `exit`
        emit_exit => Exit;
        /// `nice`
        emit_nice => Nice;
        /// `sleep`
        emit_sleep => Sleep;
        /// `wait`
        emit_wait => Wait;
        /// `signal`
        emit_signal => Signal;
        /// `threadid`
        emit_thread_id => ThreadId;
        /// `hierarchy`
        emit_hierarchy => Hierarchy;
        /// `fields`
        emit_fields => Fields;
        /// `methods`
        emit_methods => Methods;
        /// `getfield`
        emit_get_field => GetField;
        /// `setfield`
        emit_set_field => SetField;
        /// `invoke`
        emit_invoke => Invoke;
    }

    index_ops! {
        /// `pushstring` (string number)
        emit_push_string => PushString;
        /// `loadlocal` (frame slot)
        emit_load_local => LoadLocal;
        /// `storelocal` (frame slot)
        emit_store_local => StoreLocal;
        /// `loadfield` (field-access number)
        emit_load_field => LoadField;
        /// `storefield` (field-access number)
        emit_store_field => StoreField;
        /// `loadclass` (class-ref number)
        emit_load_class => LoadClass;
        /// `new` (class-ref number)
        emit_new => New;
        /// `call` (method-call number)
        emit_call => Call;
        /// `instanceof` (class-ref number)
        emit_instance_of => InstanceOf;
    }

    // ===== Constants =====

    /// `pushtrue` / `pushfalse`
    pub fn emit_push_bool(&mut self, value: bool) {
        self.emit_op(if value {
            Opcode::PushTrue
        } else {
            Opcode::PushFalse
        });
    }

    /// `pushbyte`
    pub fn emit_push_byte(&mut self, value: u8) {
        self.writer.emit_opcode(Opcode::PushByte, Width::Narrow);
        self.writer.emit_u8(value);
    }

    /// `pushchar`
    pub fn emit_push_char(&mut self, value: u16) {
        self.writer.emit_opcode(Opcode::PushChar, Width::Narrow);
        self.writer.emit_u16(value);
    }

    /// `pushshort`
    pub fn emit_push_short(&mut self, value: i16) {
        self.writer.emit_opcode(Opcode::PushShort, Width::Narrow);
        self.writer.emit_i16(value);
    }

    /// `pushint`
    pub fn emit_push_int(&mut self, value: i32) {
        self.writer.emit_opcode(Opcode::PushInt, Width::Narrow);
        self.writer.emit_i32(value);
    }

    /// `pushlong`
    pub fn emit_push_long(&mut self, value: i64) {
        self.writer.emit_opcode(Opcode::PushLong, Width::Narrow);
        self.writer.emit_i64(value);
    }

    /// `pushdouble`
    pub fn emit_push_double(&mut self, value: f64) {
        self.writer.emit_opcode(Opcode::PushDouble, Width::Narrow);
        self.writer.emit_f64(value);
    }

    /// `convert`
    pub fn emit_convert(&mut self, kind: ConvertKind) {
        self.writer.emit_opcode(Opcode::Convert, Width::Narrow);
        self.writer.emit_u8(kind as u8);
    }

    /// `makearray`
    pub fn emit_make_array(&mut self, count: u16) {
        self.writer.emit_opcode(Opcode::MakeArray, Width::Narrow);
        self.writer.emit_u16(count);
    }

    // ===== Labels & branches =====

    /// Create a label with no target yet
    pub fn new_label(&mut self) -> Label {
        self.labels.push(LabelState::default());
        Label(self.labels.len() - 1)
    }

    /// Emit a branch to `label`
    ///
    /// If the label is already anchored the offset is written immediately,
    /// otherwise a wide placeholder waits for [`CodeBuilder::anchor`].
    pub fn emit_branch(&mut self, opcode: Opcode, label: Label) {
        debug_assert!(opcode.is_jump(), "{} is not a branch", opcode);
        let instr = self.position();
        self.writer.emit_opcode(opcode, Width::Wide);
        self.add_site(label, instr);
    }

    /// Emit a branch to a fresh label and return it
    pub fn emit_jump(&mut self, opcode: Opcode) -> Label {
        let label = self.new_label();
        self.emit_branch(opcode, label);
        label
    }

    /// Emit a branch to a known target at minimal width
    pub fn jump_to(&mut self, opcode: Opcode, target: usize) {
        debug_assert!(opcode.is_jump(), "{} is not a branch", opcode);
        let instr = self.position();
        let offset = target as i64 - instr as i64;
        let width = Width::for_offset(offset);
        let value = match i32::try_from(offset) {
            Ok(value) => value,
            Err(_) => {
                self.overflow.get_or_insert(instr);
                0
            }
        };
        self.writer.emit_opcode(opcode, width);
        self.writer.emit_offset(width, value);
    }

    /// Emit a `case` table whose entries branch to `labels`
    pub fn emit_case(&mut self, labels: &[Label]) {
        let instr = self.position();
        self.writer.emit_opcode(Opcode::Case, Width::Wide);
        self.writer.emit_u16(labels.len() as u16);
        for &label in labels {
            self.add_site(label, instr);
        }
    }

    /// Emit `entertry`; anchor the returned labels at the catch and finally bodies
    pub fn enter_try(&mut self, has_catch: bool) -> TryLabels {
        let instr = self.position();
        self.writer.emit_opcode(Opcode::EnterTry, Width::Wide);
        let catch = if has_catch {
            let label = self.new_label();
            self.add_site(label, instr);
            Some(label)
        } else {
            self.writer.emit_offset(Width::Wide, 0);
            None
        };
        let finally = self.new_label();
        self.add_site(finally, instr);
        TryLabels { catch, finally }
    }

    /// Anchor a label at the current position
    pub fn anchor(&mut self, label: Label) {
        let pos = self.position();
        self.anchor_to(label, pos);
    }

    /// Anchor a label at an arbitrary position
    pub fn anchor_to(&mut self, label: Label, target: usize) {
        self.labels[label.0].target = Some(target);
        for i in 0..self.labels[label.0].sites.len() {
            let site = self.labels[label.0].sites[i];
            self.patch(site, target);
        }
    }

    fn add_site(&mut self, label: Label, instr: usize) {
        let site = Site {
            instr,
            at: self.position(),
            width: Width::Wide,
        };
        self.writer.emit_offset(site.width, 0);
        if let Some(target) = self.labels[label.0].target {
            self.patch(site, target);
        }
        self.labels[label.0].sites.push(site);
    }

    fn patch(&mut self, site: Site, target: usize) {
        let offset = target as i64 - site.instr as i64;
        match i32::try_from(offset) {
            Ok(value) => self.writer.patch_offset(site.at, site.width, value),
            Err(_) => {
                self.overflow.get_or_insert(site.instr);
            }
        }
    }

    // ===== Switch =====

    /// Lower a switch over the integer on top of the stack
    ///
    /// The subject is stored into `scratch` first so that every target is
    /// reached with the stack as it was before the subject was pushed.
    pub fn switch(&mut self, values: &[i32], scratch: u32) -> SwitchLabels {
        self.emit_store_local(scratch);
        let cases: Vec<Label> = values.iter().map(|_| self.new_label()).collect();
        let default = self.new_label();
        match SwitchStrategy::choose(values) {
            SwitchStrategy::JumpTable { min, span } => {
                self.emit_load_local(scratch);
                if min != 0 {
                    self.emit_push_int(min);
                    self.emit_sub();
                }
                let mut slots = vec![default; span];
                for (value, label) in values.iter().zip(&cases) {
                    slots[(*value as i64 - min as i64) as usize] = *label;
                }
                self.emit_case(&slots);
            }
            SwitchStrategy::CompareChain => {
                for (value, label) in values.iter().zip(&cases) {
                    self.emit_load_local(scratch);
                    self.emit_push_int(*value);
                    self.emit_branch(Opcode::Jce, *label);
                }
            }
        }
        self.emit_branch(Opcode::Jmp, default);
        SwitchLabels { cases, default }
    }

    /// Finish the stream, failing on any label that was used but never anchored
    pub fn finish(self) -> Result<Vec<u8>, BuildError> {
        if let Some(at) = self.overflow {
            return Err(BuildError::OffsetOverflow(at));
        }
        for (label, state) in self.labels.iter().enumerate() {
            if state.target.is_none() {
                if let Some(site) = state.sites.first() {
                    return Err(BuildError::UnresolvedLabel {
                        label,
                        site: site.instr,
                    });
                }
            }
        }
        Ok(self.writer.into_bytes())
    }
}

/// Handle to a class declared in a [`UnitBuilder`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassHandle(usize);

#[derive(Debug)]
struct Interner<K> {
    numbers: HashMap<K, u32>,
    order: Vec<K>,
}

impl<K> Default for Interner<K> {
    fn default() -> Self {
        Self {
            numbers: HashMap::new(),
            order: Vec::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> Interner<K> {
    fn intern(&mut self, key: K) -> u32 {
        if let Some(&number) = self.numbers.get(&key) {
            return number;
        }
        self.order.push(key.clone());
        let number = self.order.len() as u32;
        self.numbers.insert(key, number);
        number
    }
}

#[derive(Debug)]
struct MethodDecl {
    name: String,
    code_offset: u32,
    arg_count: u16,
    local_count: u16,
    is_static: bool,
    locals: Vec<(String, u32)>,
}

#[derive(Debug)]
struct ClassDecl {
    name: String,
    parent: Option<String>,
    kind: ClassKind,
    static_fields: Vec<String>,
    fields: Vec<String>,
    methods: Vec<MethodDecl>,
}

/// Builder for a whole compiled unit
#[derive(Debug)]
pub struct UnitBuilder {
    name: String,
    uses: Vec<String>,
    classes: Vec<ClassDecl>,
    enums: Vec<(String, Vec<(String, i32)>)>,
    strings: Interner<String>,
    class_refs: Interner<String>,
    field_accesses: Interner<String>,
    method_calls: Interner<(String, u16)>,
    code: CodeBuilder,
}

impl UnitBuilder {
    /// Start a unit for the named module
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uses: Vec::new(),
            classes: Vec::new(),
            enums: Vec::new(),
            strings: Interner::default(),
            class_refs: Interner::default(),
            field_accesses: Interner::default(),
            method_calls: Interner::default(),
            code: CodeBuilder::new(),
        }
    }

    /// Instruction stream of the unit
    pub fn code(&mut self) -> &mut CodeBuilder {
        &mut self.code
    }

    /// Declare a dependency
    pub fn use_module(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.uses.contains(&name) {
            self.uses.push(name);
        }
    }

    // ===== Reference tables =====

    /// Intern a string literal, returning its number
    pub fn string(&mut self, value: impl Into<String>) -> u32 {
        self.strings.intern(value.into())
    }

    /// Intern a class reference, returning its number
    pub fn class_ref(&mut self, name: impl Into<String>) -> u32 {
        self.class_refs.intern(name.into())
    }

    /// Intern a field access, returning its number
    pub fn field_ref(&mut self, name: impl Into<String>) -> u32 {
        self.field_accesses.intern(name.into())
    }

    /// Intern a method call signature, returning its number
    pub fn method_ref(&mut self, name: impl Into<String>, arity: u16) -> u32 {
        self.method_calls.intern((name.into(), arity))
    }

    // ===== Declarations =====

    fn declare(&mut self, name: &str, parent: Option<&str>, kind: ClassKind) -> ClassHandle {
        self.classes.push(ClassDecl {
            name: name.to_string(),
            parent: parent.map(str::to_string),
            kind,
            static_fields: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        });
        ClassHandle(self.classes.len() - 1)
    }

    /// Declare a bytecode class
    pub fn class(&mut self, name: &str, parent: Option<&str>) -> ClassHandle {
        self.declare(name, parent, ClassKind::Plain)
    }

    /// Declare a class backed by a native facade
    pub fn facade_class(
        &mut self,
        name: &str,
        parent: Option<&str>,
        native_type: &str,
        extension: &str,
    ) -> ClassHandle {
        self.declare(
            name,
            parent,
            ClassKind::Facade {
                native_type: native_type.to_string(),
                extension: extension.to_string(),
            },
        )
    }

    /// Declare a class mapped onto a host type
    pub fn implicit_class(&mut self, name: &str, host_type: &str) -> ClassHandle {
        self.declare(
            name,
            None,
            ClassKind::Implicit {
                host_type: host_type.to_string(),
            },
        )
    }

    /// Declare an instance field, returning its 1-based slot
    pub fn field(&mut self, class: ClassHandle, name: &str) -> u32 {
        let fields = &mut self.classes[class.0].fields;
        fields.push(name.to_string());
        fields.len() as u32
    }

    /// Declare a static field, returning its 1-based slot
    pub fn static_field(&mut self, class: ClassHandle, name: &str) -> u32 {
        let fields = &mut self.classes[class.0].static_fields;
        fields.push(name.to_string());
        fields.len() as u32
    }

    fn method_decl(
        &mut self,
        class: ClassHandle,
        name: &str,
        arg_count: u16,
        local_count: u16,
        is_static: bool,
    ) -> u32 {
        let code_offset = self.code.position() as u32;
        let methods = &mut self.classes[class.0].methods;
        methods.push(MethodDecl {
            name: name.to_string(),
            code_offset,
            arg_count,
            local_count,
            is_static,
            locals: Vec::new(),
        });
        methods.len() as u32
    }

    /// Declare an instance method whose code starts at the current position
    pub fn begin_method(
        &mut self,
        class: ClassHandle,
        name: &str,
        arg_count: u16,
        local_count: u16,
    ) -> u32 {
        self.method_decl(class, name, arg_count, local_count, false)
    }

    /// Declare a static method whose code starts at the current position
    pub fn begin_static_method(
        &mut self,
        class: ClassHandle,
        name: &str,
        arg_count: u16,
        local_count: u16,
    ) -> u32 {
        self.method_decl(class, name, arg_count, local_count, true)
    }

    /// Name a local slot of the most recently declared method of `class`
    pub fn local_name(&mut self, class: ClassHandle, name: &str, slot: u32) {
        if let Some(method) = self.classes[class.0].methods.last_mut() {
            method.locals.push((name.to_string(), slot));
        }
    }

    /// Declare an enumeration
    pub fn enumeration(&mut self, name: &str, values: &[(&str, i32)]) {
        self.enums.push((
            name.to_string(),
            values.iter().map(|(n, v)| (n.to_string(), *v)).collect(),
        ));
    }

    fn records(&self) -> Vec<MetaRecord> {
        let mut records = vec![MetaRecord::Module {
            name: self.name.clone(),
            class_count: self.class_refs.order.len() as u32,
            field_count: self.field_accesses.order.len() as u32,
            method_count: self.method_calls.order.len() as u32,
            string_count: self.strings.order.len() as u32,
        }];
        records.extend(self.uses.iter().cloned().map(MetaRecord::UseModule));

        for class in &self.classes {
            records.push(MetaRecord::Class(ClassHeader {
                name: class.name.clone(),
                parent: class.parent.clone().unwrap_or_default(),
                static_field_count: class.static_fields.len() as u32,
                instance_field_count: class.fields.len() as u32,
                method_count: class.methods.len() as u32,
                kind: class.kind.clone(),
            }));
            for (i, name) in class.static_fields.iter().enumerate() {
                records.push(MetaRecord::Field {
                    name: name.clone(),
                    number: i as u32 + 1,
                    is_static: true,
                });
            }
            for (i, name) in class.fields.iter().enumerate() {
                records.push(MetaRecord::Field {
                    name: name.clone(),
                    number: i as u32 + 1,
                    is_static: false,
                });
            }
            for (i, method) in class.methods.iter().enumerate() {
                records.push(MetaRecord::Method {
                    name: method.name.clone(),
                    number: i as u32 + 1,
                    code_offset: method.code_offset,
                    returns_value: true,
                    arg_count: method.arg_count,
                    local_count: method.local_count,
                    is_static: method.is_static,
                });
                for (name, number) in &method.locals {
                    records.push(MetaRecord::LocalVariable {
                        name: name.clone(),
                        number: *number,
                    });
                }
            }
        }

        for (name, values) in &self.enums {
            records.push(MetaRecord::Enum {
                name: name.clone(),
                values: values.clone(),
            });
        }
        for (i, value) in self.strings.order.iter().enumerate() {
            records.push(MetaRecord::StringLiteral {
                number: i as u32 + 1,
                value: value.clone(),
                short: value.len() <= u8::MAX as usize,
            });
        }
        for (i, name) in self.class_refs.order.iter().enumerate() {
            records.push(MetaRecord::ClassRef {
                name: name.clone(),
                number: i as u32 + 1,
            });
        }
        for (i, name) in self.field_accesses.order.iter().enumerate() {
            records.push(MetaRecord::FieldAccess {
                name: name.clone(),
                number: i as u32 + 1,
            });
        }
        for (i, (name, arity)) in self.method_calls.order.iter().enumerate() {
            records.push(MetaRecord::MethodCall {
                name: name.clone(),
                arity: *arity,
                number: i as u32 + 1,
            });
        }
        records.push(MetaRecord::End);
        records
    }

    /// Finalize metadata and code
    pub fn finish(self) -> Result<CompiledUnit, BuildError> {
        let metadata = encode_records(&self.records());
        let code = self.code.finish()?;
        Ok(CompiledUnit::new(metadata, code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{decode_stream, Operand};

    #[test]
    fn test_forward_label() {
        let mut code = CodeBuilder::new();
        let end = code.emit_jump(Opcode::Jmp);
        code.emit_nop();
        code.anchor(end);
        code.emit_ret();
        let bytes = code.finish().unwrap();

        let instrs = decode_stream(&bytes).unwrap();
        assert_eq!(instrs[0].width, Width::Wide);
        assert_eq!(instrs[0].targets(), vec![6]);
        assert_eq!(instrs[2].offset, 6);
    }

    #[test]
    fn test_backward_jump_is_narrow() {
        let mut code = CodeBuilder::new();
        let top = code.position();
        code.emit_nop();
        code.jump_to(Opcode::Jmp, top);
        let bytes = code.finish().unwrap();
        assert_eq!(bytes, vec![0x00, Opcode::Jmp.encode(Width::Narrow), 0xFF]);
    }

    #[test]
    fn test_unresolved_label() {
        let mut code = CodeBuilder::new();
        code.emit_nop();
        code.emit_jump(Opcode::Jt);
        assert_eq!(
            code.finish(),
            Err(BuildError::UnresolvedLabel { label: 0, site: 1 })
        );
    }

    #[test]
    fn test_label_shared_by_many_sites() {
        let mut code = CodeBuilder::new();
        let done = code.new_label();
        code.emit_branch(Opcode::Jmp, done);
        code.emit_branch(Opcode::Jf, done);
        code.anchor(done);
        code.emit_branch(Opcode::Jmp, done);
        let bytes = code.finish().unwrap();

        let instrs = decode_stream(&bytes).unwrap();
        assert!(instrs.iter().all(|i| i.targets() == vec![10]));
    }

    #[test]
    fn test_enter_try_without_catch() {
        let mut code = CodeBuilder::new();
        let labels = code.enter_try(false);
        assert!(labels.catch.is_none());
        code.emit_leave_try();
        code.anchor(labels.finally);
        code.emit_leave_finally();
        let bytes = code.finish().unwrap();

        let instrs = decode_stream(&bytes).unwrap();
        assert_eq!(
            instrs[0].operand,
            Operand::TryPair {
                catch: 0,
                finally: 10
            }
        );
    }

    #[test]
    fn test_switch_sparse_values_use_chain() {
        let mut code = CodeBuilder::new();
        let labels = code.switch(&[0, 1_000_000], 1);
        for label in labels.cases.iter().chain(std::iter::once(&labels.default)) {
            code.anchor(*label);
        }
        let instrs = decode_stream(&code.finish().unwrap()).unwrap();
        assert!(instrs.iter().all(|i| i.opcode != Opcode::Case));
        assert_eq!(instrs.iter().filter(|i| i.opcode == Opcode::Jce).count(), 2);
    }

    #[test]
    fn test_switch_dense_values_use_table() {
        let values: Vec<i32> = (0..10).collect();
        let mut code = CodeBuilder::new();
        let labels = code.switch(&values, 1);
        for label in &labels.cases {
            code.anchor(*label);
            code.emit_nop();
        }
        code.anchor(labels.default);
        let instrs = decode_stream(&code.finish().unwrap()).unwrap();
        let case = instrs.iter().find(|i| i.opcode == Opcode::Case).unwrap();
        assert!(matches!(&case.operand, Operand::Table(t) if t.len() == 10));
        assert!(instrs.iter().all(|i| i.opcode != Opcode::Jce));
    }

    #[test]
    fn test_unit_builder_metadata() {
        let mut unit = UnitBuilder::new("shapes");
        unit.use_module("lib");
        let a = unit.class("A", None);
        unit.field(a, "x");
        unit.static_field(a, "count");
        let get_x = unit.field_ref("x");
        unit.begin_method(a, "getX", 0, 0);
        unit.code().emit_load_local(0);
        unit.code().emit_load_field(get_x);
        unit.code().emit_ret_val();
        assert_eq!(unit.string("hi"), 1);
        assert_eq!(unit.string("hi"), 1);
        assert_eq!(unit.method_ref("getX", 0), 1);
        assert_eq!(unit.method_ref("getX", 1), 2);

        let compiled = unit.finish().unwrap();
        let meta = compiled.metadata().unwrap();
        assert_eq!(meta.module, "shapes");
        assert_eq!(meta.uses, vec!["lib".to_string()]);
        let a = meta.class("A").unwrap();
        assert_eq!(a.instance_field_count, 1);
        assert_eq!(a.static_field_count, 1);
        assert_eq!(a.methods[0].code_offset, 0);
        assert_eq!(meta.method_calls.len(), 2);
        assert_eq!(meta.strings, vec!["hi".to_string()]);
    }
}
