//! Compiled unit file format
//!
//! Layout: `'O' 'M'` magic, `i32 metaLength`, `i32 codeLength` (both
//! little-endian), the metadata stream, then the instruction stream.

use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use crate::instruction::{decode_stream, Instruction};
use crate::metadata::{decode_records, MetaRecord, UnitMetadata};
use thiserror::Error;

/// Magic bytes at the start of every compiled unit
pub const MAGIC: [u8; 2] = *b"OM";

/// Size of the fixed header (magic + two lengths)
pub const HEADER_SIZE: usize = 10;

/// File extension used by resolvers
pub const EXTENSION: &str = "om";

/// Compiled unit format errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitError {
    /// Byte-level decode failure
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// File does not start with `'O' 'M'`
    #[error("invalid magic {0:?}, expected \"OM\"")]
    InvalidMagic([u8; 2]),

    /// File shorter than the fixed header
    #[error("unit too short: {0} bytes")]
    TooShort(usize),

    /// Negative section length in the header
    #[error("negative {section} length {length}")]
    NegativeLength {
        /// Section name
        section: &'static str,
        /// Declared length
        length: i32,
    },

    /// Section lengths disagree with the file size
    #[error("length mismatch: header declares {declared} bytes, file holds {actual}")]
    LengthMismatch {
        /// Bytes declared by the header
        declared: usize,
        /// Bytes actually present after the header
        actual: usize,
    },

    /// Metadata does not start with a `Module` record
    #[error("metadata must start with a Module record")]
    MissingModule,

    /// Metadata has no `End` record
    #[error("metadata is not terminated by End")]
    MissingEnd,

    /// Bytes after the `End` record
    #[error("{0} bytes of trailing metadata after End")]
    TrailingMetadata(usize),

    /// Record not allowed at this point of the stream
    #[error("unexpected {0} record")]
    UnexpectedRecord(&'static str),

    /// Class body has fewer field/method records than declared
    #[error("class {0} is missing field or method records")]
    IncompleteClass(String),

    /// Number outside the declared range of its table
    #[error("{table} number {number} out of range 1..={max}")]
    NumberOutOfRange {
        /// Table name
        table: &'static str,
        /// Offending number
        number: u32,
        /// Declared size
        max: u32,
    },

    /// Number defined twice
    #[error("{table} number {number} defined twice")]
    DuplicateNumber {
        /// Table name
        table: &'static str,
        /// Offending number
        number: u32,
    },

    /// Table entry never defined
    #[error("{table} number {number} is never defined")]
    MissingEntry {
        /// Table name
        table: &'static str,
        /// Missing number
        number: u32,
    },
}

/// Metadata and code of one module, immutable once produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledUnit {
    /// Metadata stream (ends with an `End` record)
    pub metadata: Vec<u8>,
    /// Instruction stream
    pub code: Vec<u8>,
}

impl CompiledUnit {
    /// Create a unit from its two streams
    pub fn new(metadata: Vec<u8>, code: Vec<u8>) -> Self {
        Self { metadata, code }
    }

    /// Encode to the on-disk layout
    pub fn encode(&self) -> Vec<u8> {
        let mut writer =
            BytecodeWriter::with_capacity(HEADER_SIZE + self.metadata.len() + self.code.len());
        writer.emit_bytes(&MAGIC);
        writer.emit_i32(self.metadata.len() as i32);
        writer.emit_i32(self.code.len() as i32);
        writer.emit_bytes(&self.metadata);
        writer.emit_bytes(&self.code);
        writer.into_bytes()
    }

    /// Decode from the on-disk layout
    ///
    /// Only the framing is checked here; use [`CompiledUnit::metadata`] to
    /// validate the metadata grammar.
    pub fn decode(bytes: &[u8]) -> Result<Self, UnitError> {
        if bytes.len() < HEADER_SIZE {
            return Err(UnitError::TooShort(bytes.len()));
        }
        let mut reader = BytecodeReader::new(bytes);
        let magic = [reader.read_u8()?, reader.read_u8()?];
        if magic != MAGIC {
            return Err(UnitError::InvalidMagic(magic));
        }
        let meta_len = reader.read_i32()?;
        let code_len = reader.read_i32()?;
        if meta_len < 0 {
            return Err(UnitError::NegativeLength {
                section: "metadata",
                length: meta_len,
            });
        }
        if code_len < 0 {
            return Err(UnitError::NegativeLength {
                section: "code",
                length: code_len,
            });
        }
        let declared = meta_len as usize + code_len as usize;
        if declared != reader.remaining() {
            return Err(UnitError::LengthMismatch {
                declared,
                actual: reader.remaining(),
            });
        }
        let metadata = reader.read_bytes(meta_len as usize)?.to_vec();
        let code = reader.read_bytes(code_len as usize)?.to_vec();
        Ok(Self { metadata, code })
    }

    /// Raw metadata records
    pub fn records(&self) -> Result<Vec<MetaRecord>, UnitError> {
        decode_records(&self.metadata)
    }

    /// Validated metadata view
    pub fn metadata(&self) -> Result<UnitMetadata, UnitError> {
        UnitMetadata::from_records(&self.records()?)
    }

    /// Decoded instruction stream
    pub fn instructions(&self) -> Result<Vec<Instruction>, DecodeError> {
        decode_stream(&self.code)
    }
}
