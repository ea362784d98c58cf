//! Compiled unit verification

use crate::encoder::DecodeError;
use crate::instruction::{decode_stream, Instruction, Operand};
use crate::metadata::UnitMetadata;
use crate::opcode::{ConvertKind, IndexTable, Opcode};
use crate::unit::{CompiledUnit, UnitError};
use std::collections::HashSet;

/// Verification errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    /// Code stream does not decode
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Metadata is malformed
    #[error("metadata error: {0}")]
    Unit(#[from] UnitError),

    /// Branch, case or try target is not an instruction boundary
    #[error("invalid jump target {target} at offset {offset}")]
    InvalidJumpTarget {
        /// Absolute target
        target: i64,
        /// Offset of the branching instruction
        offset: usize,
    },

    /// Method entry is not an instruction boundary inside the code
    #[error("method {class}.{method} starts at {offset}, which is not an instruction boundary")]
    InvalidMethodOffset {
        /// Declaring class
        class: String,
        /// Method name
        method: String,
        /// Declared code offset
        offset: u32,
    },

    /// Index operand outside its module table
    #[error("invalid {table} reference {index} (table has {max}) at offset {offset}")]
    InvalidReference {
        /// Table name
        table: &'static str,
        /// Referenced number
        index: u32,
        /// Table size
        max: usize,
        /// Offset of the instruction
        offset: usize,
    },

    /// Unknown `convert` target kind
    #[error("invalid conversion kind {kind} at offset {offset}")]
    InvalidConvertKind {
        /// Kind code
        kind: u8,
        /// Offset of the instruction
        offset: usize,
    },
}

/// Verify a compiled unit's metadata and code
pub fn verify_unit(unit: &CompiledUnit) -> Result<UnitMetadata, VerifyError> {
    let meta = unit.metadata()?;
    verify_code(&unit.code, &meta)?;
    Ok(meta)
}

/// Verify a code stream against the unit's metadata
pub fn verify_code(code: &[u8], meta: &UnitMetadata) -> Result<(), VerifyError> {
    let instructions = decode_stream(code)?;
    let boundaries: HashSet<usize> = instructions.iter().map(|i| i.offset).collect();

    for class in &meta.classes {
        for method in &class.methods {
            if !boundaries.contains(&(method.code_offset as usize)) {
                return Err(VerifyError::InvalidMethodOffset {
                    class: class.name.clone(),
                    method: method.name.clone(),
                    offset: method.code_offset,
                });
            }
        }
    }

    for instr in &instructions {
        verify_targets(instr, &boundaries)?;
        verify_references(instr, meta)?;
    }
    Ok(())
}

fn verify_targets(instr: &Instruction, boundaries: &HashSet<usize>) -> Result<(), VerifyError> {
    for target in instr.targets() {
        let valid = usize::try_from(target)
            .map(|t| boundaries.contains(&t))
            .unwrap_or(false);
        if !valid {
            return Err(VerifyError::InvalidJumpTarget {
                target,
                offset: instr.offset,
            });
        }
    }
    Ok(())
}

fn verify_references(instr: &Instruction, meta: &UnitMetadata) -> Result<(), VerifyError> {
    match (&instr.operand, instr.opcode.index_table()) {
        (Operand::Index(index), Some(table)) => {
            let (name, max) = match table {
                IndexTable::Local => return Ok(()),
                IndexTable::String => ("string", meta.strings.len()),
                IndexTable::Class => ("class", meta.class_refs.len()),
                IndexTable::Field => ("field", meta.field_accesses.len()),
                IndexTable::Method => ("method", meta.method_calls.len()),
            };
            if *index == 0 || *index as usize > max {
                return Err(VerifyError::InvalidReference {
                    table: name,
                    index: *index,
                    max,
                    offset: instr.offset,
                });
            }
        }
        (Operand::Byte(kind), _) if instr.opcode == Opcode::Convert => {
            if ConvertKind::from_u8(*kind).is_none() {
                return Err(VerifyError::InvalidConvertKind {
                    kind: *kind,
                    offset: instr.offset,
                });
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::UnitBuilder;
    use crate::encoder::BytecodeWriter;
    use crate::opcode::Width;

    fn with_code(code: Vec<u8>) -> CompiledUnit {
        let unit = UnitBuilder::new("t").finish().unwrap();
        CompiledUnit::new(unit.metadata, code)
    }

    #[test]
    fn test_verify_built_unit() {
        let mut unit = UnitBuilder::new("t");
        let class = unit.class("Main", None);
        unit.begin_static_method(class, "main", 0, 0);
        let hello = unit.string("hello");
        unit.code().emit_push_string(hello);
        unit.code().emit_pop();
        unit.code().emit_ret();
        let compiled = unit.finish().unwrap();
        let meta = verify_unit(&compiled).unwrap();
        assert_eq!(meta.module, "t");
    }

    #[test]
    fn test_verify_invalid_opcode() {
        let result = verify_unit(&with_code(vec![0xFF]));
        assert!(matches!(
            result,
            Err(VerifyError::Decode(DecodeError::InvalidOpcode(0xFF, 0)))
        ));
    }

    #[test]
    fn test_verify_jump_into_operand() {
        let mut w = BytecodeWriter::new();
        w.emit_opcode(Opcode::Jmp, Width::Narrow);
        w.emit_offset(Width::Narrow, 3);
        w.emit_opcode(Opcode::PushInt, Width::Narrow);
        w.emit_i32(0);
        let result = verify_unit(&with_code(w.into_bytes()));
        assert_eq!(
            result,
            Err(VerifyError::InvalidJumpTarget {
                target: 3,
                offset: 0
            })
        );
    }

    #[test]
    fn test_verify_reference_out_of_table() {
        let mut w = BytecodeWriter::new();
        w.emit_opcode(Opcode::LoadClass, Width::Narrow);
        w.emit_index(Width::Narrow, 1);
        let result = verify_unit(&with_code(w.into_bytes()));
        assert!(matches!(
            result,
            Err(VerifyError::InvalidReference {
                table: "class",
                index: 1,
                max: 0,
                ..
            })
        ));
    }

    #[test]
    fn test_verify_method_offset() {
        let mut unit = UnitBuilder::new("t");
        let class = unit.class("Main", None);
        unit.code().emit_push_int(1);
        unit.code().emit_ret();
        unit.begin_static_method(class, "late", 0, 0);
        let compiled = unit.finish().unwrap();
        assert!(matches!(
            verify_unit(&compiled),
            Err(VerifyError::InvalidMethodOffset { offset: 6, .. })
        ));
    }

    #[test]
    fn test_verify_convert_kind() {
        let code = vec![Opcode::PushInt.base(), 0, 0, 0, 0, Opcode::Convert.base(), 99];
        assert!(matches!(
            verify_unit(&with_code(code)),
            Err(VerifyError::InvalidConvertKind { kind: 99, .. })
        ));
    }
}
