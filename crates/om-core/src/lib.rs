//! OM VM Core Runtime
//!
//! This crate provides the virtual machine runtime including:
//! - Module resolution, linking and the class catalog
//! - Single-inheritance flattening and native facade classes
//! - Stack interpreter with try/catch/finally control
//! - Cooperative green-thread scheduler

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod class;
pub mod facade;
pub mod loader;
pub mod numeric;
pub mod options;
pub mod scheduler;
pub mod stack;
pub mod symbols;
pub mod value;
pub mod vm;

pub use class::{Catalog, ClassDef, ClassId, FieldSlot, MethodBody, MethodEntry};
pub use facade::{ConsoleFacade, Facade, FacadeRegistry, FacadeTarget, MethodSig};
pub use loader::{
    FileResolver, LoadError, Loader, MemoryResolver, ModuleId, ModuleRecord, ModuleResolver,
    Program,
};
pub use options::{LoaderOptions, TickSource, VmOptions};
pub use scheduler::{ThreadId, ThreadState};
pub use stack::Stack;
pub use symbols::{MethodKey, Symbol, SymbolTable};
pub use value::{ArrayRef, NativeHandle, ObjectRef, Value};
pub use vm::Vm;

use om_bytecode::DecodeError;

/// Host-level execution faults
///
/// These abort the whole engine and are never visible to program-level
/// try/catch.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VmError {
    /// Stack overflow
    #[error("Stack overflow")]
    StackOverflow,

    /// Stack underflow
    #[error("Stack underflow")]
    StackUnderflow,

    /// Too many nested calls
    #[error("Call depth limit of {0} exceeded")]
    CallDepthExceeded(usize),

    /// Code stream could not be decoded at the instruction pointer
    #[error("Invalid instruction at {offset}: {error}")]
    InvalidInstruction {
        /// Code address
        offset: usize,
        /// Decoder error
        error: DecodeError,
    },

    /// Module-scoped table index out of range
    #[error("Unresolved {table} reference {index} in module {module}")]
    UnresolvedReference {
        /// Table name
        table: &'static str,
        /// 1-based index
        index: u32,
        /// Module name
        module: String,
    },

    /// Local slot beyond the current frame
    #[error("Invalid local slot {0}")]
    InvalidLocal(u32),

    /// Type-incompatible operands
    #[error("Type error: {0}")]
    TypeError(String),

    /// Integer division or modulo by zero
    #[error("Division by zero")]
    DivisionByZero,

    /// A conversion could not be performed
    #[error("Cannot convert {value} to {target}")]
    ConversionFailed {
        /// Rendered source value
        value: String,
        /// Target kind
        target: &'static str,
    },

    /// Field or method used on null
    #[error("Null receiver for {0}")]
    NullReceiver(String),

    /// Field or method used on a value that is not an object or class
    #[error("Not an object: {0}")]
    NotAnObject(String),

    /// Field name not found on a class
    #[error("No field {field} on class {class}")]
    UnknownField {
        /// Class name
        class: String,
        /// Field name
        field: String,
    },

    /// Method signature not found on a class
    #[error("No method {method}/{arity} on class {class}")]
    UnknownMethod {
        /// Class name
        class: String,
        /// Method name
        method: String,
        /// Argument count
        arity: u16,
    },

    /// Instance member used through a class value
    #[error("Instance member {member} used on class {class}")]
    NotStatic {
        /// Class name
        class: String,
        /// Member name
        member: String,
    },

    /// `super` used in a class without a parent
    #[error("Class {0} has no parent")]
    NoParent(String),

    /// Array index out of bounds
    #[error("Index {index} out of bounds for length {length}")]
    IndexOutOfBounds {
        /// Requested index
        index: i64,
        /// Array length
        length: usize,
    },

    /// Negative array length
    #[error("Negative array length {0}")]
    NegativeLength(i64),

    /// Array length over the configured limit or beyond what can be allocated
    #[error("Array length {0} is too large")]
    ArrayTooLarge(i64),

    /// `rethrow` outside a catch body, or leave-* in the wrong phase
    #[error("Illegal {0} in current exception phase")]
    IllegalExceptionState(&'static str),

    /// `wait`/`signal`/`instanceof` on an unsupported value
    #[error("Illegal {op} target: {value}")]
    IllegalTarget {
        /// Opcode name
        op: &'static str,
        /// Rendered value
        value: String,
    },

    /// `signal` on a monitor that is not held
    #[error("Monitor not held: {0}")]
    MonitorNotHeld(String),

    /// Thread limit reached
    #[error("Thread limit of {0} reached")]
    TooManyThreads(usize),

    /// No thread can ever resume
    #[error("Deadlock: {0} thread(s) blocked forever")]
    Deadlock(usize),

    /// The wall-clock ticker thread could not be started
    #[error("Cannot start ticker: {0}")]
    TickerUnavailable(String),

    /// A thrown value escaped every try block
    #[error("Uncaught exception: {0}")]
    UncaughtException(String),

    /// Error reported by a native facade
    #[error("Facade {facade}: {message}")]
    Facade {
        /// Native type name
        facade: String,
        /// Message
        message: String,
    },
}

/// VM execution result
pub type VmResult<T> = Result<T, VmError>;

/// A host fault together with the faulting thread's call trace
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{error}")]
pub struct RunError {
    /// The fault
    pub error: VmError,
    /// `Class.method/arity` lines, innermost first
    pub backtrace: Vec<String>,
}

impl From<VmError> for RunError {
    fn from(error: VmError) -> Self {
        Self {
            error,
            backtrace: Vec::new(),
        }
    }
}
