//! Metadata stream
//!
//! Metadata is a sequence of self-describing tagged records terminated by an
//! `End` record. `MetaRecord` is the raw streaming form (exactly
//! round-trippable), `UnitMetadata` the validated view built from it.

use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use crate::unit::UnitError;
use serde::Serialize;

/// Record tags
pub mod tag {
    /// End of metadata
    pub const END: u8 = 0x00;
    /// Module header
    pub const MODULE: u8 = 0x01;
    /// Dependency
    pub const USE_MODULE: u8 = 0x02;
    /// Bytecode class
    pub const CLASS: u8 = 0x03;
    /// Native-backed class
    pub const FACADE_CLASS: u8 = 0x04;
    /// Class mapped onto a host type
    pub const IMPLICIT_CLASS: u8 = 0x05;
    /// Instance field
    pub const FIELD: u8 = 0x06;
    /// Static field
    pub const STATIC_FIELD: u8 = 0x07;
    /// Instance method
    pub const METHOD: u8 = 0x08;
    /// Static method
    pub const STATIC_METHOD: u8 = 0x09;
    /// Local variable name (diagnostic)
    pub const LOCAL_VARIABLE: u8 = 0x0A;
    /// String literal, u32 length
    pub const STRING_LITERAL: u8 = 0x0B;
    /// String literal, u8 length
    pub const SHORT_STRING: u8 = 0x0C;
    /// Class reference table entry
    pub const CLASS_REF: u8 = 0x0D;
    /// Field access table entry
    pub const FIELD_ACCESS: u8 = 0x0E;
    /// Method call table entry
    pub const METHOD_CALL: u8 = 0x0F;
    /// Enumeration
    pub const ENUM: u8 = 0x10;
}

/// Constructor method name
pub const CONSTRUCTOR: &str = "<init>";

/// Static initializer method name
pub const STATIC_INITIALIZER: &str = "<clinit>";

/// How a class is backed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClassKind {
    /// Ordinary bytecode class
    Plain,
    /// Backed by a native facade
    Facade {
        /// Registry name of the native type
        native_type: String,
        /// Extension handle (opaque to the VM)
        extension: String,
    },
    /// Maps onto a host type
    Implicit {
        /// Registry name of the host type
        host_type: String,
    },
}

/// Class declaration header
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassHeader {
    /// Class name
    pub name: String,
    /// Parent class name (empty = root)
    pub parent: String,
    /// Number of static field records that follow
    pub static_field_count: u32,
    /// Number of instance field records that follow
    pub instance_field_count: u32,
    /// Number of method records that follow
    pub method_count: u32,
    /// Backing
    pub kind: ClassKind,
}

/// One metadata record
#[derive(Debug, Clone, PartialEq)]
pub enum MetaRecord {
    /// Terminator
    End,
    /// Module header with reference-table sizes
    Module {
        /// Module name
        name: String,
        /// Class reference count
        class_count: u32,
        /// Field access count
        field_count: u32,
        /// Method call count
        method_count: u32,
        /// String literal count
        string_count: u32,
    },
    /// Dependency on another module
    UseModule(String),
    /// Class declaration
    Class(ClassHeader),
    /// Field declaration
    Field {
        /// Field name
        name: String,
        /// 1-based slot within its kind
        number: u32,
        /// Static or instance
        is_static: bool,
    },
    /// Method declaration
    Method {
        /// Method name
        name: String,
        /// 1-based method number within the class
        number: u32,
        /// Entry offset into the unit's code
        code_offset: u32,
        /// Always-true returns-value flag
        returns_value: bool,
        /// Argument count (receiver excluded)
        arg_count: u16,
        /// Extra local slots beyond the arguments
        local_count: u16,
        /// Static or instance
        is_static: bool,
    },
    /// Local variable name
    LocalVariable {
        /// Variable name
        name: String,
        /// Frame slot
        number: u32,
    },
    /// String literal
    StringLiteral {
        /// 1-based string number
        number: u32,
        /// Contents
        value: String,
        /// Encoded with a u8 length
        short: bool,
    },
    /// Class reference table entry
    ClassRef {
        /// Short or qualified class name
        name: String,
        /// 1-based number
        number: u32,
    },
    /// Field access table entry
    FieldAccess {
        /// Field name
        name: String,
        /// 1-based number
        number: u32,
    },
    /// Method call table entry
    MethodCall {
        /// Method name
        name: String,
        /// Argument count
        arity: u16,
        /// 1-based number
        number: u32,
    },
    /// Enumeration
    Enum {
        /// Enum name
        name: String,
        /// Members in declaration order
        values: Vec<(String, i32)>,
    },
}

impl MetaRecord {
    /// Record name used in diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            MetaRecord::End => "End",
            MetaRecord::Module { .. } => "Module",
            MetaRecord::UseModule(_) => "UseModule",
            MetaRecord::Class(_) => "Class",
            MetaRecord::Field { .. } => "Field",
            MetaRecord::Method { .. } => "Method",
            MetaRecord::LocalVariable { .. } => "LocalVariable",
            MetaRecord::StringLiteral { .. } => "StringLiteral",
            MetaRecord::ClassRef { .. } => "ClassRef",
            MetaRecord::FieldAccess { .. } => "FieldAccess",
            MetaRecord::MethodCall { .. } => "MethodCall",
            MetaRecord::Enum { .. } => "Enum",
        }
    }

    /// Encode this record
    pub fn write(&self, w: &mut BytecodeWriter) {
        match self {
            MetaRecord::End => w.emit_u8(tag::END),
            MetaRecord::Module {
                name,
                class_count,
                field_count,
                method_count,
                string_count,
            } => {
                w.emit_u8(tag::MODULE);
                w.emit_name(name);
                w.emit_u32(*class_count);
                w.emit_u32(*field_count);
                w.emit_u32(*method_count);
                w.emit_u32(*string_count);
            }
            MetaRecord::UseModule(name) => {
                w.emit_u8(tag::USE_MODULE);
                w.emit_name(name);
            }
            MetaRecord::Class(header) => {
                w.emit_u8(match header.kind {
                    ClassKind::Plain => tag::CLASS,
                    ClassKind::Facade { .. } => tag::FACADE_CLASS,
                    ClassKind::Implicit { .. } => tag::IMPLICIT_CLASS,
                });
                w.emit_name(&header.name);
                w.emit_name(&header.parent);
                w.emit_u32(header.static_field_count);
                w.emit_u32(header.instance_field_count);
                w.emit_u32(header.method_count);
                match &header.kind {
                    ClassKind::Plain => {}
                    ClassKind::Facade {
                        native_type,
                        extension,
                    } => {
                        w.emit_name(native_type);
                        w.emit_name(extension);
                    }
                    ClassKind::Implicit { host_type } => w.emit_name(host_type),
                }
            }
            MetaRecord::Field {
                name,
                number,
                is_static,
            } => {
                w.emit_u8(if *is_static { tag::STATIC_FIELD } else { tag::FIELD });
                w.emit_name(name);
                w.emit_u32(*number);
            }
            MetaRecord::Method {
                name,
                number,
                code_offset,
                returns_value,
                arg_count,
                local_count,
                is_static,
            } => {
                w.emit_u8(if *is_static { tag::STATIC_METHOD } else { tag::METHOD });
                w.emit_name(name);
                w.emit_u32(*number);
                w.emit_u32(*code_offset);
                w.emit_u8(*returns_value as u8);
                w.emit_u16(*arg_count);
                w.emit_u16(*local_count);
            }
            MetaRecord::LocalVariable { name, number } => {
                w.emit_u8(tag::LOCAL_VARIABLE);
                w.emit_name(name);
                w.emit_u32(*number);
            }
            MetaRecord::StringLiteral {
                number,
                value,
                short,
            } => {
                if *short {
                    w.emit_u8(tag::SHORT_STRING);
                    w.emit_u32(*number);
                    w.emit_u8(value.len() as u8);
                } else {
                    w.emit_u8(tag::STRING_LITERAL);
                    w.emit_u32(*number);
                    w.emit_u32(value.len() as u32);
                }
                w.emit_bytes(value.as_bytes());
            }
            MetaRecord::ClassRef { name, number } => {
                w.emit_u8(tag::CLASS_REF);
                w.emit_name(name);
                w.emit_u32(*number);
            }
            MetaRecord::FieldAccess { name, number } => {
                w.emit_u8(tag::FIELD_ACCESS);
                w.emit_name(name);
                w.emit_u32(*number);
            }
            MetaRecord::MethodCall {
                name,
                arity,
                number,
            } => {
                w.emit_u8(tag::METHOD_CALL);
                w.emit_name(name);
                w.emit_u16(*arity);
                w.emit_u32(*number);
            }
            MetaRecord::Enum { name, values } => {
                w.emit_u8(tag::ENUM);
                w.emit_name(name);
                w.emit_u16(values.len() as u16);
                for (member, value) in values {
                    w.emit_name(member);
                    w.emit_i32(*value);
                }
            }
        }
    }

    /// Decode one record
    pub fn read(r: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let at = r.position();
        let record = match r.read_u8()? {
            tag::END => MetaRecord::End,
            tag::MODULE => MetaRecord::Module {
                name: r.read_name()?,
                class_count: r.read_u32()?,
                field_count: r.read_u32()?,
                method_count: r.read_u32()?,
                string_count: r.read_u32()?,
            },
            tag::USE_MODULE => MetaRecord::UseModule(r.read_name()?),
            t @ (tag::CLASS | tag::FACADE_CLASS | tag::IMPLICIT_CLASS) => {
                let name = r.read_name()?;
                let parent = r.read_name()?;
                let static_field_count = r.read_u32()?;
                let instance_field_count = r.read_u32()?;
                let method_count = r.read_u32()?;
                let kind = match t {
                    tag::FACADE_CLASS => ClassKind::Facade {
                        native_type: r.read_name()?,
                        extension: r.read_name()?,
                    },
                    tag::IMPLICIT_CLASS => ClassKind::Implicit {
                        host_type: r.read_name()?,
                    },
                    _ => ClassKind::Plain,
                };
                MetaRecord::Class(ClassHeader {
                    name,
                    parent,
                    static_field_count,
                    instance_field_count,
                    method_count,
                    kind,
                })
            }
            t @ (tag::FIELD | tag::STATIC_FIELD) => MetaRecord::Field {
                name: r.read_name()?,
                number: r.read_u32()?,
                is_static: t == tag::STATIC_FIELD,
            },
            t @ (tag::METHOD | tag::STATIC_METHOD) => MetaRecord::Method {
                name: r.read_name()?,
                number: r.read_u32()?,
                code_offset: r.read_u32()?,
                returns_value: r.read_u8()? != 0,
                arg_count: r.read_u16()?,
                local_count: r.read_u16()?,
                is_static: t == tag::STATIC_METHOD,
            },
            tag::LOCAL_VARIABLE => MetaRecord::LocalVariable {
                name: r.read_name()?,
                number: r.read_u32()?,
            },
            tag::STRING_LITERAL => {
                let number = r.read_u32()?;
                let len = r.read_u32()? as usize;
                MetaRecord::StringLiteral {
                    number,
                    value: r.read_utf8(len)?,
                    short: false,
                }
            }
            tag::SHORT_STRING => {
                let number = r.read_u32()?;
                let len = r.read_u8()? as usize;
                MetaRecord::StringLiteral {
                    number,
                    value: r.read_utf8(len)?,
                    short: true,
                }
            }
            tag::CLASS_REF => MetaRecord::ClassRef {
                name: r.read_name()?,
                number: r.read_u32()?,
            },
            tag::FIELD_ACCESS => MetaRecord::FieldAccess {
                name: r.read_name()?,
                number: r.read_u32()?,
            },
            tag::METHOD_CALL => MetaRecord::MethodCall {
                name: r.read_name()?,
                arity: r.read_u16()?,
                number: r.read_u32()?,
            },
            tag::ENUM => {
                let name = r.read_name()?;
                let count = r.read_u16()? as usize;
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    values.push((r.read_name()?, r.read_i32()?));
                }
                MetaRecord::Enum { name, values }
            }
            other => return Err(DecodeError::InvalidTag(other, at)),
        };
        Ok(record)
    }
}

/// Decode records up to and including `End`
pub fn decode_records(bytes: &[u8]) -> Result<Vec<MetaRecord>, UnitError> {
    let mut reader = BytecodeReader::new(bytes);
    let mut records = Vec::new();
    loop {
        if !reader.has_more() {
            return Err(UnitError::MissingEnd);
        }
        let record = MetaRecord::read(&mut reader)?;
        let done = record == MetaRecord::End;
        records.push(record);
        if done {
            break;
        }
    }
    if reader.has_more() {
        return Err(UnitError::TrailingMetadata(reader.remaining()));
    }
    Ok(records)
}

/// Encode records (the caller includes the trailing `End`)
pub fn encode_records(records: &[MetaRecord]) -> Vec<u8> {
    let mut writer = BytecodeWriter::new();
    for record in records {
        record.write(&mut writer);
    }
    writer.into_bytes()
}

/// Declared field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldInfo {
    /// Field name
    pub name: String,
    /// 1-based slot within its kind
    pub number: u32,
    /// Static or instance
    pub is_static: bool,
}

/// Declared local variable name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalInfo {
    /// Variable name
    pub name: String,
    /// Frame slot
    pub number: u32,
}

/// Declared method
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodInfo {
    /// Method name
    pub name: String,
    /// 1-based method number
    pub number: u32,
    /// Entry offset into the unit's code
    pub code_offset: u32,
    /// Returns-value flag
    pub returns_value: bool,
    /// Argument count
    pub arg_count: u16,
    /// Extra local slots
    pub local_count: u16,
    /// Static or instance
    pub is_static: bool,
    /// Local variable names
    pub locals: Vec<LocalInfo>,
}

impl MethodInfo {
    /// Whether this is a constructor
    pub fn is_constructor(&self) -> bool {
        self.name == CONSTRUCTOR
    }
}

/// Declared class
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassInfo {
    /// Class name
    pub name: String,
    /// Parent class name
    pub parent: Option<String>,
    /// Backing
    pub kind: ClassKind,
    /// Static field count
    pub static_field_count: u32,
    /// Instance field count
    pub instance_field_count: u32,
    /// Fields
    pub fields: Vec<FieldInfo>,
    /// Methods
    pub methods: Vec<MethodInfo>,
}

/// Method call table entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MethodRef {
    /// Method name
    pub name: String,
    /// Argument count
    pub arity: u16,
}

/// Declared enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnumInfo {
    /// Enum name
    pub name: String,
    /// Members in declaration order
    pub values: Vec<(String, i32)>,
}

/// Validated metadata of one compiled unit
///
/// Reference tables are indexed by `number - 1`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UnitMetadata {
    /// Module name
    pub module: String,
    /// Used modules in declaration order
    pub uses: Vec<String>,
    /// Declared classes
    pub classes: Vec<ClassInfo>,
    /// Declared enums
    pub enums: Vec<EnumInfo>,
    /// String literal table
    pub strings: Vec<String>,
    /// Class reference table
    pub class_refs: Vec<String>,
    /// Field access table
    pub field_accesses: Vec<String>,
    /// Method call table
    pub method_calls: Vec<MethodRef>,
}

/// Body of the class whose field/method records are being read
struct OpenClass {
    info: ClassInfo,
    method_count: u32,
}

impl OpenClass {
    fn remaining(&self) -> u32 {
        let declared = self.info.static_field_count as u64
            + self.info.instance_field_count as u64
            + self.method_count as u64;
        let seen = self.info.fields.len() as u64 + self.info.methods.len() as u64;
        declared.saturating_sub(seen) as u32
    }
}

fn place<T>(
    table: &mut [Option<T>],
    name: &'static str,
    number: u32,
    value: T,
) -> Result<(), UnitError> {
    let max = table.len() as u32;
    if number == 0 || number > max {
        return Err(UnitError::NumberOutOfRange {
            table: name,
            number,
            max,
        });
    }
    let slot = &mut table[number as usize - 1];
    if slot.is_some() {
        return Err(UnitError::DuplicateNumber {
            table: name,
            number,
        });
    }
    *slot = Some(value);
    Ok(())
}

fn seal<T>(table: Vec<Option<T>>, name: &'static str) -> Result<Vec<T>, UnitError> {
    table
        .into_iter()
        .enumerate()
        .map(|(i, entry)| {
            entry.ok_or(UnitError::MissingEntry {
                table: name,
                number: i as u32 + 1,
            })
        })
        .collect()
}

impl UnitMetadata {
    /// Validate a record stream and build the view
    pub fn from_records(records: &[MetaRecord]) -> Result<Self, UnitError> {
        let mut iter = records.iter();
        let (module, counts) = match iter.next() {
            Some(MetaRecord::Module {
                name,
                class_count,
                field_count,
                method_count,
                string_count,
            }) => (
                name.clone(),
                (*class_count, *field_count, *method_count, *string_count),
            ),
            _ => return Err(UnitError::MissingModule),
        };

        let mut meta = UnitMetadata {
            module,
            ..Default::default()
        };
        let mut class_refs: Vec<Option<String>> = vec![None; counts.0 as usize];
        let mut field_accesses: Vec<Option<String>> = vec![None; counts.1 as usize];
        let mut method_calls: Vec<Option<MethodRef>> = vec![None; counts.2 as usize];
        let mut strings: Vec<Option<String>> = vec![None; counts.3 as usize];
        let mut open: Option<OpenClass> = None;
        let mut ended = false;

        for record in iter {
            if ended {
                return Err(UnitError::UnexpectedRecord(record.kind_name()));
            }
            if let Some(class) = open.as_mut() {
                match record {
                    MetaRecord::Field {
                        name,
                        number,
                        is_static,
                    } if class.remaining() > 0 => {
                        let max = if *is_static {
                            class.info.static_field_count
                        } else {
                            class.info.instance_field_count
                        };
                        let table = if *is_static { "static field" } else { "field" };
                        if *number == 0 || *number > max {
                            return Err(UnitError::NumberOutOfRange {
                                table,
                                number: *number,
                                max,
                            });
                        }
                        if class
                            .info
                            .fields
                            .iter()
                            .any(|f| f.is_static == *is_static && f.number == *number)
                        {
                            return Err(UnitError::DuplicateNumber {
                                table,
                                number: *number,
                            });
                        }
                        class.info.fields.push(FieldInfo {
                            name: name.clone(),
                            number: *number,
                            is_static: *is_static,
                        });
                        continue;
                    }
                    MetaRecord::Method {
                        name,
                        number,
                        code_offset,
                        returns_value,
                        arg_count,
                        local_count,
                        is_static,
                    } if class.remaining() > 0 => {
                        if *number == 0 || *number > class.method_count {
                            return Err(UnitError::NumberOutOfRange {
                                table: "method",
                                number: *number,
                                max: class.method_count,
                            });
                        }
                        if class.info.methods.iter().any(|m| m.number == *number) {
                            return Err(UnitError::DuplicateNumber {
                                table: "method",
                                number: *number,
                            });
                        }
                        class.info.methods.push(MethodInfo {
                            name: name.clone(),
                            number: *number,
                            code_offset: *code_offset,
                            returns_value: *returns_value,
                            arg_count: *arg_count,
                            local_count: *local_count,
                            is_static: *is_static,
                            locals: Vec::new(),
                        });
                        continue;
                    }
                    MetaRecord::LocalVariable { name, number } => {
                        if let Some(method) = class.info.methods.last_mut() {
                            method.locals.push(LocalInfo {
                                name: name.clone(),
                                number: *number,
                            });
                            continue;
                        }
                        return Err(UnitError::UnexpectedRecord(record.kind_name()));
                    }
                    _ if class.remaining() > 0 => {
                        return Err(UnitError::IncompleteClass(class.info.name.clone()));
                    }
                    _ => {}
                }
                if let Some(done) = open.take() {
                    meta.classes.push(done.info);
                }
            }

            match record {
                MetaRecord::End => ended = true,
                MetaRecord::UseModule(name) => meta.uses.push(name.clone()),
                MetaRecord::Class(header) => {
                    let class = OpenClass {
                        info: ClassInfo {
                            name: header.name.clone(),
                            parent: (!header.parent.is_empty()).then(|| header.parent.clone()),
                            kind: header.kind.clone(),
                            static_field_count: header.static_field_count,
                            instance_field_count: header.instance_field_count,
                            fields: Vec::new(),
                            methods: Vec::new(),
                        },
                        method_count: header.method_count,
                    };
                    open = Some(class);
                }
                MetaRecord::StringLiteral { number, value, .. } => {
                    place(&mut strings, "string", *number, value.clone())?
                }
                MetaRecord::ClassRef { name, number } => {
                    place(&mut class_refs, "class ref", *number, name.clone())?
                }
                MetaRecord::FieldAccess { name, number } => {
                    place(&mut field_accesses, "field access", *number, name.clone())?
                }
                MetaRecord::MethodCall {
                    name,
                    arity,
                    number,
                } => place(
                    &mut method_calls,
                    "method call",
                    *number,
                    MethodRef {
                        name: name.clone(),
                        arity: *arity,
                    },
                )?,
                MetaRecord::Enum { name, values } => meta.enums.push(EnumInfo {
                    name: name.clone(),
                    values: values.clone(),
                }),
                MetaRecord::Module { .. }
                | MetaRecord::Field { .. }
                | MetaRecord::Method { .. }
                | MetaRecord::LocalVariable { .. } => {
                    return Err(UnitError::UnexpectedRecord(record.kind_name()))
                }
            }
        }

        if let Some(class) = open {
            return Err(UnitError::IncompleteClass(class.info.name));
        }
        if !ended {
            return Err(UnitError::MissingEnd);
        }

        meta.strings = seal(strings, "string")?;
        meta.class_refs = seal(class_refs, "class ref")?;
        meta.field_accesses = seal(field_accesses, "field access")?;
        meta.method_calls = seal(method_calls, "method call")?;
        Ok(meta)
    }

    /// Look up a declared class by name
    pub fn class(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.iter().find(|c| c.name == name)
    }
}
