//! Low-level byte encoding and decoding
//!
//! `BytecodeWriter` and `BytecodeReader` handle little-endian primitives,
//! width-selected index/offset operands and length-prefixed names. Both the
//! metadata stream and the instruction stream are built on top of them.

use crate::opcode::{Opcode, Width};
use thiserror::Error;

/// Errors that can occur while decoding raw bytes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Unexpected end of stream
    #[error("unexpected end of stream at offset {0}")]
    UnexpectedEnd(usize),

    /// Invalid UTF-8 string
    #[error("invalid UTF-8 string at offset {0}")]
    InvalidUtf8(usize),

    /// Unknown opcode byte
    #[error("invalid opcode {0:#04x} at offset {1}")]
    InvalidOpcode(u8, usize),

    /// Unknown metadata record tag
    #[error("invalid metadata tag {0:#04x} at offset {1}")]
    InvalidTag(u8, usize),
}

/// Byte writer for metadata records and instructions
#[derive(Debug, Default, Clone)]
pub struct BytecodeWriter {
    pub(crate) buffer: Vec<u8>,
}

impl BytecodeWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Create a writer with reserved capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Bytes written so far
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume the writer
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Current write offset
    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    // ===== Primitives =====

    /// Emit a raw byte
    pub fn emit_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Emit a signed byte
    pub fn emit_i8(&mut self, value: i8) {
        self.buffer.push(value as u8);
    }

    /// Emit a 16-bit unsigned integer (little-endian)
    pub fn emit_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 16-bit signed integer (little-endian)
    pub fn emit_i16(&mut self, value: i16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit unsigned integer (little-endian)
    pub fn emit_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit signed integer (little-endian)
    pub fn emit_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit signed integer (little-endian)
    pub fn emit_i64(&mut self, value: i64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit float (little-endian)
    pub fn emit_f64(&mut self, value: f64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit raw bytes
    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Emit an opcode byte for the given operand width
    pub fn emit_opcode(&mut self, opcode: Opcode, width: Width) {
        self.emit_u8(opcode.encode(width));
    }

    // ===== Variable-width operands =====

    /// Emit an unsigned index at the given width
    ///
    /// The caller guarantees the value fits; it is truncated otherwise.
    pub fn emit_index(&mut self, width: Width, value: u32) {
        debug_assert!(Width::for_index(value) <= width);
        match width {
            Width::Narrow => self.emit_u8(value as u8),
            Width::Medium => self.emit_u16(value as u16),
            Width::Wide => self.emit_u32(value),
        }
    }

    /// Emit a signed offset at the given width
    pub fn emit_offset(&mut self, width: Width, value: i32) {
        debug_assert!(Width::for_offset(value as i64) <= width);
        match width {
            Width::Narrow => self.emit_i8(value as i8),
            Width::Medium => self.emit_i16(value as i16),
            Width::Wide => self.emit_i32(value),
        }
    }

    /// Overwrite a previously emitted offset in place
    pub fn patch_offset(&mut self, at: usize, width: Width, value: i32) {
        match width {
            Width::Narrow => self.buffer[at] = value as i8 as u8,
            Width::Medium => {
                self.buffer[at..at + 2].copy_from_slice(&(value as i16).to_le_bytes())
            }
            Width::Wide => self.buffer[at..at + 4].copy_from_slice(&value.to_le_bytes()),
        }
    }

    /// Overwrite a previously emitted u32 in place
    pub fn patch_u32(&mut self, at: usize, value: u32) {
        self.buffer[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    // ===== Names =====

    /// Emit a name (u16 length + UTF-8)
    pub fn emit_name(&mut self, name: &str) {
        self.emit_u16(name.len() as u16);
        self.emit_bytes(name.as_bytes());
    }
}

/// Byte reader with bounds-checked primitive reads
#[derive(Debug, Clone)]
pub struct BytecodeReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> BytecodeReader<'a> {
    /// Create a reader over a byte slice
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Current read position
    pub fn position(&self) -> usize {
        self.position
    }

    /// Move to an absolute position
    pub fn seek(&mut self, position: usize) {
        self.position = position;
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    /// Whether any bytes are left
    pub fn has_more(&self) -> bool {
        self.position < self.buffer.len()
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let end = self.position + N;
        let slice = self
            .buffer
            .get(self.position..end)
            .ok_or(DecodeError::UnexpectedEnd(self.position))?;
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(slice);
        self.position = end;
        Ok(bytes)
    }

    /// Read a byte
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take::<1>()?[0])
    }

    /// Read a signed byte
    pub fn read_i8(&mut self) -> Result<i8, DecodeError> {
        Ok(self.take::<1>()?[0] as i8)
    }

    /// Read a 16-bit unsigned integer (little-endian)
    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        self.take().map(u16::from_le_bytes)
    }

    /// Read a 16-bit signed integer (little-endian)
    pub fn read_i16(&mut self) -> Result<i16, DecodeError> {
        self.take().map(i16::from_le_bytes)
    }

    /// Read a 32-bit unsigned integer (little-endian)
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        self.take().map(u32::from_le_bytes)
    }

    /// Read a 32-bit signed integer (little-endian)
    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        self.take().map(i32::from_le_bytes)
    }

    /// Read a 64-bit signed integer (little-endian)
    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        self.take().map(i64::from_le_bytes)
    }

    /// Read a 64-bit float (little-endian)
    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        self.take().map(f64::from_le_bytes)
    }

    /// Read a fixed number of bytes
    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.position + count;
        let bytes = self
            .buffer
            .get(self.position..end)
            .ok_or(DecodeError::UnexpectedEnd(self.position))?;
        self.position = end;
        Ok(bytes)
    }

    /// Read an unsigned index of the given width
    pub fn read_index(&mut self, width: Width) -> Result<u32, DecodeError> {
        Ok(match width {
            Width::Narrow => self.read_u8()? as u32,
            Width::Medium => self.read_u16()? as u32,
            Width::Wide => self.read_u32()?,
        })
    }

    /// Read a signed offset of the given width
    pub fn read_offset(&mut self, width: Width) -> Result<i32, DecodeError> {
        Ok(match width {
            Width::Narrow => self.read_i8()? as i32,
            Width::Medium => self.read_i16()? as i32,
            Width::Wide => self.read_i32()?,
        })
    }

    /// Read UTF-8 text of a known byte length
    pub fn read_utf8(&mut self, len: usize) -> Result<String, DecodeError> {
        let start = self.position;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8(start))
    }

    /// Read a name (u16 length + UTF-8)
    pub fn read_name(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u16()? as usize;
        self.read_utf8(len)
    }

    /// Read an opcode byte and split it into family and width
    pub fn read_opcode(&mut self) -> Result<(Opcode, Width), DecodeError> {
        let at = self.position;
        let byte = self.read_u8()?;
        Opcode::decode(byte).ok_or(DecodeError::InvalidOpcode(byte, at))
    }
}
