//! Decoded instructions
//!
//! An `Instruction` keeps the operand width it was encoded with, so decoding
//! a stream and re-encoding it reproduces the original bytes exactly.

use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use crate::opcode::{Opcode, OperandKind, Width};
use std::fmt;

/// Instruction operand
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand
    None,
    /// `u8` immediate (pushbyte value, convert kind)
    Byte(u8),
    /// `u16` char code unit
    Char(u16),
    /// `i16` immediate
    Short(i16),
    /// `i32` immediate
    Int(i32),
    /// `i64` immediate
    Long(i64),
    /// `f64` immediate
    Double(f64),
    /// `u16` element count (makearray)
    Count(u16),
    /// Table index or local slot
    Index(u32),
    /// Relative branch offset
    Offset(i32),
    /// Case jump table offsets
    Table(Vec<i32>),
    /// Try entry offsets; a zero catch offset means no catch clause
    TryPair {
        /// Offset of the catch body
        catch: i32,
        /// Offset of the finally body
        finally: i32,
    },
}

/// One decoded instruction
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Byte offset of the opcode within its stream
    pub offset: usize,
    /// Opcode family
    pub opcode: Opcode,
    /// Operand width (narrow for fixed-operand opcodes)
    pub width: Width,
    /// Operand
    pub operand: Operand,
}

impl Instruction {
    /// Encoded size in bytes at the current width
    pub fn size(&self) -> usize {
        self.size_at(self.width)
    }

    /// Encoded size in bytes if the variable operand had the given width
    pub fn size_at(&self, width: Width) -> usize {
        1 + match self.opcode.operand() {
            OperandKind::None => 0,
            OperandKind::U8 => 1,
            OperandKind::U16 | OperandKind::I16 => 2,
            OperandKind::I32 => 4,
            OperandKind::I64 | OperandKind::F64 => 8,
            OperandKind::Index | OperandKind::Offset => width.bytes(),
            OperandKind::CaseTable => 2 + self.offsets().len() * width.bytes(),
            OperandKind::TryPair => 2 * width.bytes(),
        }
    }

    /// Relative offsets carried by a branch, case table or try entry
    ///
    /// A try entry without a catch clause reports only its finally offset.
    pub fn offsets(&self) -> Vec<i32> {
        match &self.operand {
            Operand::Offset(off) => vec![*off],
            Operand::Table(table) => table.clone(),
            Operand::TryPair { catch, finally } if *catch == 0 => vec![*finally],
            Operand::TryPair { catch, finally } => vec![*catch, *finally],
            _ => Vec::new(),
        }
    }

    /// Absolute branch targets
    pub fn targets(&self) -> Vec<i64> {
        self.offsets()
            .into_iter()
            .map(|off| self.offset as i64 + off as i64)
            .collect()
    }

    /// Narrowest width able to hold every offset or the index operand
    pub fn minimal_width(&self) -> Width {
        match &self.operand {
            Operand::Index(index) => Width::for_index(*index),
            Operand::Offset(off) => Width::for_offset(*off as i64),
            Operand::Table(table) => table
                .iter()
                .map(|off| Width::for_offset(*off as i64))
                .max()
                .unwrap_or(Width::Narrow),
            Operand::TryPair { catch, finally } => {
                Width::for_offset(*catch as i64).max(Width::for_offset(*finally as i64))
            }
            _ => Width::Narrow,
        }
    }

    /// Decode the instruction starting at `pos`
    pub fn decode_at(code: &[u8], pos: usize) -> Result<Self, DecodeError> {
        let mut reader = BytecodeReader::new(code);
        reader.seek(pos);
        Self::read(&mut reader)
    }

    /// Decode one instruction from a reader
    pub fn read(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let offset = reader.position();
        let (opcode, width) = reader.read_opcode()?;
        let operand = match opcode.operand() {
            OperandKind::None => Operand::None,
            OperandKind::U8 => Operand::Byte(reader.read_u8()?),
            OperandKind::U16 if opcode == Opcode::MakeArray => Operand::Count(reader.read_u16()?),
            OperandKind::U16 => Operand::Char(reader.read_u16()?),
            OperandKind::I16 => Operand::Short(reader.read_i16()?),
            OperandKind::I32 => Operand::Int(reader.read_i32()?),
            OperandKind::I64 => Operand::Long(reader.read_i64()?),
            OperandKind::F64 => Operand::Double(reader.read_f64()?),
            OperandKind::Index => Operand::Index(reader.read_index(width)?),
            OperandKind::Offset => Operand::Offset(reader.read_offset(width)?),
            OperandKind::CaseTable => {
                let count = reader.read_u16()? as usize;
                let mut table = Vec::with_capacity(count);
                for _ in 0..count {
                    table.push(reader.read_offset(width)?);
                }
                Operand::Table(table)
            }
            OperandKind::TryPair => Operand::TryPair {
                catch: reader.read_offset(width)?,
                finally: reader.read_offset(width)?,
            },
        };
        Ok(Self {
            offset,
            opcode,
            width,
            operand,
        })
    }

    /// Encode at the instruction's own width
    pub fn write(&self, writer: &mut BytecodeWriter) {
        writer.emit_opcode(self.opcode, self.width);
        let width = self.width;
        match &self.operand {
            Operand::None => {}
            Operand::Byte(v) => writer.emit_u8(*v),
            Operand::Char(v) | Operand::Count(v) => writer.emit_u16(*v),
            Operand::Short(v) => writer.emit_i16(*v),
            Operand::Int(v) => writer.emit_i32(*v),
            Operand::Long(v) => writer.emit_i64(*v),
            Operand::Double(v) => writer.emit_f64(*v),
            Operand::Index(v) => writer.emit_index(width, *v),
            Operand::Offset(v) => writer.emit_offset(width, *v),
            Operand::Table(table) => {
                writer.emit_u16(table.len() as u16);
                for off in table {
                    writer.emit_offset(width, *off);
                }
            }
            Operand::TryPair { catch, finally } => {
                writer.emit_offset(width, *catch);
                writer.emit_offset(width, *finally);
            }
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06}  {}", self.offset, self.opcode)?;
        match &self.operand {
            Operand::None => Ok(()),
            Operand::Byte(v) => write!(f, " {}", v),
            Operand::Char(v) | Operand::Count(v) => write!(f, " {}", v),
            Operand::Short(v) => write!(f, " {}", v),
            Operand::Int(v) => write!(f, " {}", v),
            Operand::Long(v) => write!(f, " {}", v),
            Operand::Double(v) => write!(f, " {}", v),
            Operand::Index(v) => write!(f, " #{}", v),
            Operand::Offset(_) | Operand::Table(_) | Operand::TryPair { .. } => {
                let targets: Vec<String> = self.targets().iter().map(|t| format!("@{}", t)).collect();
                write!(f, " {}", targets.join(", "))
            }
        }
    }
}

/// Decode a whole instruction stream
pub fn decode_stream(code: &[u8]) -> Result<Vec<Instruction>, DecodeError> {
    let mut reader = BytecodeReader::new(code);
    let mut instructions = Vec::new();
    while reader.has_more() {
        instructions.push(Instruction::read(&mut reader)?);
    }
    Ok(instructions)
}

/// Encode instructions back to bytes, each at its own width
pub fn encode_stream(instructions: &[Instruction]) -> Vec<u8> {
    let mut writer = BytecodeWriter::with_capacity(instructions.len() * 3);
    for instr in instructions {
        instr.write(&mut writer);
    }
    writer.into_bytes()
}
