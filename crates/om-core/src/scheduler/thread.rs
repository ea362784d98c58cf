//! Logical thread state

use crate::class::{Catalog, ClassId};
use crate::loader::ModuleId;
use crate::stack::Stack;
use crate::symbols::{MethodKey, SymbolTable};
use crate::value::Value;
use crate::vm::exception::ExceptionRecord;
use std::fmt;

/// Logical thread identifier; the main thread is 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(u32);

impl ThreadId {
    /// The thread that runs the entry sequence
    pub const MAIN: ThreadId = ThreadId(1);

    /// Create an id
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Numeric id
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a monitor object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonitorKey {
    /// Class instance storage
    Object(usize),
    /// Array storage
    Array(usize),
    /// Class definition
    Class(ClassId),
}

/// Scheduling state of a thread
#[derive(Debug, Clone)]
pub enum ThreadState {
    /// Runnable
    Running,
    /// Gave up the rest of its turn
    Suspending,
    /// Blocked until the monitor is free
    Waiting {
        /// Monitor identity
        key: MonitorKey,
        /// The monitor object
        target: Value,
    },
    /// Blocked until the clock reaches the tick
    Sleeping(u64),
    /// Blocked until the thread is gone
    Joining(ThreadId),
    /// Finished; removed at the next scheduling point
    Exiting,
}

impl ThreadState {
    /// Short state name
    pub fn name(&self) -> &'static str {
        match self {
            ThreadState::Running => "running",
            ThreadState::Suspending => "suspending",
            ThreadState::Waiting { .. } => "waiting",
            ThreadState::Sleeping(_) => "sleeping",
            ThreadState::Joining(_) => "joining",
            ThreadState::Exiting => "exiting",
        }
    }
}

/// How a frame was entered, which decides how it returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// The synthesized entry sequence
    Entry,
    /// Ordinary call
    Normal,
    /// Constructor: always returns the receiver
    Constructor,
    /// Static initializer triggered by `loadclass`
    Initializer,
    /// Reflective `invoke`: a void return yields null
    Invoke,
}

/// The method a frame executes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// Declaring class (none for the entry sequence)
    pub class: Option<ClassId>,
    /// Signature (none for the entry sequence)
    pub method: Option<MethodKey>,
    /// Entry kind
    pub kind: FrameKind,
}

impl Frame {
    /// The entry-sequence frame
    pub fn entry() -> Self {
        Self {
            class: None,
            method: None,
            kind: FrameKind::Entry,
        }
    }

    /// Render as `Class.method/arity`
    pub fn describe(&self, catalog: &Catalog, symbols: &SymbolTable) -> String {
        match (self.class, self.method) {
            (Some(class), Some(method)) => {
                format!("{}.{}", catalog.name(class), symbols.signature(method))
            }
            _ => "<entry>".to_string(),
        }
    }
}

/// Caller state saved by a call
#[derive(Debug, Clone, Copy)]
pub struct CallRecord {
    /// Caller's data pointer
    pub saved_dp: usize,
    /// Address to resume the caller at
    pub return_ip: usize,
    /// Caller's module
    pub saved_module: ModuleId,
    /// Caller's frame
    pub saved_frame: Frame,
}

/// One logical thread's complete register and stack state
#[derive(Debug, Clone)]
pub struct ThreadContext {
    /// Thread id
    pub id: ThreadId,
    /// Scheduling state
    pub state: ThreadState,
    /// Value stack
    pub stack: Stack,
    /// Call stack
    pub calls: Vec<CallRecord>,
    /// Exception-record stack
    pub handlers: Vec<ExceptionRecord>,
    /// Data pointer of the current frame
    pub dp: usize,
    /// Code position
    pub ip: usize,
    /// Module whose tables the current code indexes
    pub module: ModuleId,
    /// Current frame
    pub frame: Frame,
}

impl ThreadContext {
    /// Create a thread about to run at `ip`
    pub fn new(id: ThreadId, ip: usize, module: ModuleId, max_stack: usize) -> Self {
        Self {
            id,
            state: ThreadState::Running,
            stack: Stack::with_capacity(max_stack),
            calls: Vec::new(),
            handlers: Vec::new(),
            dp: 0,
            ip,
            module,
            frame: Frame::entry(),
        }
    }

    /// Copy of this thread with a new id, as produced by `fork`
    pub fn fork(&self, id: ThreadId) -> Self {
        let mut child = self.clone();
        child.id = id;
        child.state = ThreadState::Running;
        child
    }

    /// Current call depth
    pub fn call_depth(&self) -> usize {
        self.calls.len()
    }

    /// Call trace, innermost frame first
    pub fn call_trace(&self, catalog: &Catalog, symbols: &SymbolTable) -> Vec<String> {
        std::iter::once(&self.frame)
            .chain(self.calls.iter().rev().map(|c| &c.saved_frame))
            .map(|frame| frame.describe(catalog, symbols))
            .collect()
    }
}
