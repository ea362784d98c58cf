//! OM VM compiled-unit format
//!
//! This crate provides the instruction set, the metadata record stream, the
//! `'O' 'M'` unit file layout, the emission API used by producers, the
//! branch-size optimizer and the verifier for the OM virtual machine.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod builder;
pub mod encoder;
pub mod instruction;
pub mod metadata;
pub mod opcode;
pub mod optimizer;
pub mod switch;
pub mod unit;
pub mod verify;

pub use builder::{BuildError, ClassHandle, CodeBuilder, Label, SwitchLabels, TryLabels, UnitBuilder};
pub use encoder::{BytecodeReader, BytecodeWriter, DecodeError};
pub use instruction::{decode_stream, encode_stream, Instruction, Operand};
pub use metadata::{
    ClassInfo, ClassKind, EnumInfo, FieldInfo, MetaRecord, MethodInfo, MethodRef, UnitMetadata,
    CONSTRUCTOR, STATIC_INITIALIZER,
};
pub use opcode::{ConvertKind, IndexTable, Opcode, OperandKind, Width};
pub use optimizer::{optimize, optimize_unit, OptimizeError, Optimized, OptimizedUnit};
pub use switch::SwitchStrategy;
pub use unit::{CompiledUnit, UnitError, MAGIC};
pub use verify::{verify_code, verify_unit, VerifyError};
