//! Opcodes and operand widths for the OM VM
//!
//! Every instruction starts with one opcode byte. Opcodes that carry an index
//! or a branch offset come in three encodings (narrow, medium, wide) that
//! occupy three consecutive byte values: `base`, `base + 1`, `base + 2`.
//!
//! Byte ranges:
//! - 0x00-0x0F: stack manipulation & constants
//! - 0x10-0x2F: strings, locals, fields, classes, calls (variable width)
//! - 0x30-0x3F: super & returns
//! - 0x40-0x4F: arithmetic, logic & comparison
//! - 0x50-0x6F: branches & case tables (variable width)
//! - 0x70-0x7F: exception handling
//! - 0x80-0x8F: arrays
//! - 0x90-0x9F: threads & monitors
//! - 0xA0-0xAF: reflection

use serde::Serialize;
use std::fmt;

/// Byte size of a variable-width operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Width {
    /// 1 byte (`u8` index / `i8` offset)
    Narrow,
    /// 2 bytes (`u16` index / `i16` offset)
    Medium,
    /// 4 bytes (`u32` index / `i32` offset)
    Wide,
}

impl Width {
    /// All widths, narrowest first
    pub const ALL: [Width; 3] = [Width::Narrow, Width::Medium, Width::Wide];

    /// Number of bytes used by one operand of this width
    #[inline]
    pub const fn bytes(self) -> usize {
        match self {
            Width::Narrow => 1,
            Width::Medium => 2,
            Width::Wide => 4,
        }
    }

    /// Distance from the family's base opcode byte
    #[inline]
    pub const fn step(self) -> u8 {
        match self {
            Width::Narrow => 0,
            Width::Medium => 1,
            Width::Wide => 2,
        }
    }

    /// Narrowest width able to hold an unsigned index
    pub fn for_index(index: u32) -> Width {
        if index <= u8::MAX as u32 {
            Width::Narrow
        } else if index <= u16::MAX as u32 {
            Width::Medium
        } else {
            Width::Wide
        }
    }

    /// Narrowest width able to hold a signed relative offset
    pub fn for_offset(offset: i64) -> Width {
        if (i8::MIN as i64..=i8::MAX as i64).contains(&offset) {
            Width::Narrow
        } else if (i16::MIN as i64..=i16::MAX as i64).contains(&offset) {
            Width::Medium
        } else {
            Width::Wide
        }
    }
}

/// Shape of the operand that follows an opcode byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// No operand
    None,
    /// Fixed `u8`
    U8,
    /// Fixed `u16`
    U16,
    /// Fixed `i16`
    I16,
    /// Fixed `i32`
    I32,
    /// Fixed `i64`
    I64,
    /// Fixed `f64`
    F64,
    /// Variable-width unsigned table index
    Index,
    /// Variable-width signed branch offset
    Offset,
    /// `u16` count followed by that many variable-width offsets
    CaseTable,
    /// Two variable-width offsets (catch, finally)
    TryPair,
}

impl OperandKind {
    /// Whether the operand is encoded at a selectable width
    #[inline]
    pub const fn is_variable(self) -> bool {
        matches!(
            self,
            OperandKind::Index | OperandKind::Offset | OperandKind::CaseTable | OperandKind::TryPair
        )
    }

    /// Whether the operand holds branch offsets
    #[inline]
    pub const fn is_branch(self) -> bool {
        matches!(
            self,
            OperandKind::Offset | OperandKind::CaseTable | OperandKind::TryPair
        )
    }
}

/// Which per-module reference table an index operand points into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexTable {
    /// Frame-relative local slot (not a module table)
    Local,
    /// String literal table
    String,
    /// Class reference table
    Class,
    /// Field access table
    Field,
    /// Method call table
    Method,
}

/// Instruction opcode (one per family; the operand width is tracked separately)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Opcode {
    // ===== Stack Manipulation & Constants (0x00-0x0F) =====
    /// No operation
    Nop = 0x00,
    /// Pop top value
    Pop = 0x01,
    /// Duplicate top value
    Dup = 0x02,
    /// Swap top two values
    Swap = 0x03,
    /// Push null
    PushNull = 0x04,
    /// Push true
    PushTrue = 0x05,
    /// Push false
    PushFalse = 0x06,
    /// Push byte (operand: u8)
    PushByte = 0x07,
    /// Push char (operand: u16 code unit)
    PushChar = 0x08,
    /// Push short (operand: i16)
    PushShort = 0x09,
    /// Push int (operand: i32)
    PushInt = 0x0A,
    /// Push long (operand: i64)
    PushLong = 0x0B,
    /// Push double (operand: f64)
    PushDouble = 0x0C,

    // ===== Variable-width index families (0x10-0x2F) =====
    /// Push string literal (operand: string number)
    PushString = 0x10,
    /// Push frame slot (operand: slot, 0 = receiver)
    LoadLocal = 0x13,
    /// Pop into frame slot (operand: slot)
    StoreLocal = 0x16,
    /// Pop object, push field (operand: field-access number)
    LoadField = 0x19,
    /// Pop value, pop object, store field (operand: field-access number)
    StoreField = 0x1C,
    /// Push class definition, running its static initializer once (operand: class-ref number)
    LoadClass = 0x1F,
    /// Push a new instance with null fields (operand: class-ref number)
    New = 0x22,
    /// Call method on the receiver below the arguments (operand: method-call number)
    Call = 0x25,
    /// Pop value, push whether it is an instance of the class (operand: class-ref number)
    InstanceOf = 0x28,

    // ===== Super & Returns (0x30-0x3F) =====
    /// Pop object or class, push its parent-class view
    Super = 0x30,
    /// Void return
    Ret = 0x31,
    /// Value return
    RetVal = 0x32,
    /// Constructor return (keeps the receiver)
    RetCtor = 0x33,

    // ===== Arithmetic, Logic & Comparison (0x40-0x4F) =====
    /// a + b (string concatenation if either side is a string)
    Add = 0x40,
    /// a - b
    Sub = 0x41,
    /// a * b
    Mul = 0x42,
    /// a / b
    Div = 0x43,
    /// a % b
    Mod = 0x44,
    /// -a
    Neg = 0x45,
    /// !a
    Not = 0x46,
    /// Convert top value to another kind (operand: u8 kind code)
    Convert = 0x47,
    /// a == b
    Ce = 0x48,
    /// a != b
    Cne = 0x49,
    /// a < b
    Cl = 0x4A,
    /// a <= b
    Cle = 0x4B,
    /// a > b
    Cg = 0x4C,
    /// a >= b
    Cge = 0x4D,

    // ===== Branches (0x50-0x6F) =====
    /// Unconditional jump
    Jmp = 0x50,
    /// Pop bool, jump if true
    Jt = 0x53,
    /// Pop bool, jump if false
    Jf = 0x56,
    /// Pop b, pop a, jump if a == b
    Jce = 0x59,
    /// Pop b, pop a, jump if a != b
    Jcne = 0x5C,
    /// Pop b, pop a, jump if a < b
    Jcl = 0x5F,
    /// Pop b, pop a, jump if a <= b
    Jcle = 0x62,
    /// Pop b, pop a, jump if a > b
    Jcg = 0x65,
    /// Pop b, pop a, jump if a >= b
    Jcge = 0x68,
    /// Pop index, jump through table entry or fall through
    Case = 0x6B,

    // ===== Exception Handling (0x70-0x7F) =====
    /// Enter try block (operands: catch offset, finally offset)
    EnterTry = 0x70,
    /// Normal exit from a try body
    LeaveTry = 0x73,
    /// Normal exit from a catch body
    LeaveCatch = 0x74,
    /// End of finally body: pop record, apply deferred exit
    LeaveFinally = 0x75,
    /// Pop value and throw it
    Throw = 0x76,
    /// Re-throw the exception being handled
    Rethrow = 0x77,

    // ===== Arrays (0x80-0x8F) =====
    /// Pop length, push array of nulls
    NewArray = 0x80,
    /// Pop index, pop array, push element
    ArrayLoad = 0x81,
    /// Pop value, pop index, pop array, store element
    ArrayStore = 0x82,
    /// Pop array, push length
    ArrayLength = 0x83,
    /// Pop N values into a new array (operand: u16 count)
    MakeArray = 0x84,

    // ===== Threads & Monitors (0x90-0x9F) =====
    /// Clone the current thread; child sees 0, parent sees child id
    Fork = 0x90,
    /// Pop thread id, block until it is gone
    Join = 0x91,
    /// Terminate the current thread
    Exit = 0x92,
    /// Yield to the scheduler
    Nice = 0x93,
    /// Pop milliseconds, sleep
    Sleep = 0x94,
    /// Pop object, acquire its monitor
    Wait = 0x95,
    /// Pop object, release its monitor
    Signal = 0x96,
    /// Push current thread id
    ThreadId = 0x97,

    // ===== Reflection (0xA0-0xAF) =====
    /// Pop object/class, push array of class names up to the root
    Hierarchy = 0xA0,
    /// Pop object/class, push array of field names
    Fields = 0xA1,
    /// Pop object/class, push array of method signatures
    Methods = 0xA2,
    /// Pop name, pop object, push named field
    GetField = 0xA3,
    /// Pop value, pop name, pop object, store named field
    SetField = 0xA4,
    /// Pop args array, pop name, pop object, call named method
    Invoke = 0xA5,
}

impl Opcode {
    /// Every opcode family, in byte order
    pub const ALL: [Opcode; 75] = [
        Opcode::Nop,
        Opcode::Pop,
        Opcode::Dup,
        Opcode::Swap,
        Opcode::PushNull,
        Opcode::PushTrue,
        Opcode::PushFalse,
        Opcode::PushByte,
        Opcode::PushChar,
        Opcode::PushShort,
        Opcode::PushInt,
        Opcode::PushLong,
        Opcode::PushDouble,
        Opcode::PushString,
        Opcode::LoadLocal,
        Opcode::StoreLocal,
        Opcode::LoadField,
        Opcode::StoreField,
        Opcode::LoadClass,
        Opcode::New,
        Opcode::Call,
        Opcode::InstanceOf,
        Opcode::Super,
        Opcode::Ret,
        Opcode::RetVal,
        Opcode::RetCtor,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Mod,
        Opcode::Neg,
        Opcode::Not,
        Opcode::Convert,
        Opcode::Ce,
        Opcode::Cne,
        Opcode::Cl,
        Opcode::Cle,
        Opcode::Cg,
        Opcode::Cge,
        Opcode::Jmp,
        Opcode::Jt,
        Opcode::Jf,
        Opcode::Jce,
        Opcode::Jcne,
        Opcode::Jcl,
        Opcode::Jcle,
        Opcode::Jcg,
        Opcode::Jcge,
        Opcode::Case,
        Opcode::EnterTry,
        Opcode::LeaveTry,
        Opcode::LeaveCatch,
        Opcode::LeaveFinally,
        Opcode::Throw,
        Opcode::Rethrow,
        Opcode::NewArray,
        Opcode::ArrayLoad,
        Opcode::ArrayStore,
        Opcode::ArrayLength,
        Opcode::MakeArray,
        Opcode::Fork,
        Opcode::Join,
        Opcode::Exit,
        Opcode::Nice,
        Opcode::Sleep,
        Opcode::Wait,
        Opcode::Signal,
        Opcode::ThreadId,
        Opcode::Hierarchy,
        Opcode::Fields,
        Opcode::Methods,
        Opcode::GetField,
        Opcode::SetField,
        Opcode::Invoke,
    ];

    /// Base byte of this opcode family
    #[inline]
    pub const fn base(self) -> u8 {
        self as u8
    }

    /// Encoded opcode byte for the given operand width
    ///
    /// Fixed-operand opcodes ignore the width.
    #[inline]
    pub fn encode(self, width: Width) -> u8 {
        if self.operand().is_variable() {
            self.base() + width.step()
        } else {
            self.base()
        }
    }

    /// Decode an opcode byte into its family and operand width
    pub fn decode(byte: u8) -> Option<(Opcode, Width)> {
        DECODE_TABLE[byte as usize]
    }

    /// Operand shape for this opcode
    pub const fn operand(self) -> OperandKind {
        use Opcode::*;
        match self {
            PushByte => OperandKind::U8,
            PushChar => OperandKind::U16,
            PushShort => OperandKind::I16,
            PushInt => OperandKind::I32,
            PushLong => OperandKind::I64,
            PushDouble => OperandKind::F64,
            Convert => OperandKind::U8,
            MakeArray => OperandKind::U16,
            PushString | LoadLocal | StoreLocal | LoadField | StoreField | LoadClass | New
            | Call | InstanceOf => OperandKind::Index,
            Jmp | Jt | Jf | Jce | Jcne | Jcl | Jcle | Jcg | Jcge => OperandKind::Offset,
            Case => OperandKind::CaseTable,
            EnterTry => OperandKind::TryPair,
            _ => OperandKind::None,
        }
    }

    /// Module table referenced by an index operand
    pub const fn index_table(self) -> Option<IndexTable> {
        use Opcode::*;
        match self {
            PushString => Some(IndexTable::String),
            LoadLocal | StoreLocal => Some(IndexTable::Local),
            LoadField | StoreField => Some(IndexTable::Field),
            LoadClass | New | InstanceOf => Some(IndexTable::Class),
            Call => Some(IndexTable::Method),
            _ => None,
        }
    }

    /// Whether this is a conditional or unconditional branch
    pub const fn is_jump(self) -> bool {
        matches!(self.operand(), OperandKind::Offset)
    }

    /// Whether this is a fused compare-and-branch
    pub const fn is_compare_branch(self) -> bool {
        use Opcode::*;
        matches!(self, Jce | Jcne | Jcl | Jcle | Jcg | Jcge)
    }

    /// Whether this is a return
    pub const fn is_return(self) -> bool {
        matches!(self, Opcode::Ret | Opcode::RetVal | Opcode::RetCtor)
    }

    /// Whether control never falls through to the next instruction
    pub const fn is_terminator(self) -> bool {
        matches!(
            self,
            Opcode::Jmp
                | Opcode::Ret
                | Opcode::RetVal
                | Opcode::RetCtor
                | Opcode::Throw
                | Opcode::Rethrow
                | Opcode::Exit
        )
    }

    /// Whether this is a reflective opcode
    pub const fn is_reflection(self) -> bool {
        matches!(
            self,
            Opcode::Hierarchy
                | Opcode::Fields
                | Opcode::Methods
                | Opcode::GetField
                | Opcode::SetField
                | Opcode::Invoke
        )
    }

    /// Lower-case mnemonic
    pub fn name(self) -> &'static str {
        use Opcode::*;
        match self {
            Nop => "nop",
            Pop => "pop",
            Dup => "dup",
            Swap => "swap",
            PushNull => "pushnull",
            PushTrue => "pushtrue",
            PushFalse => "pushfalse",
            PushByte => "pushbyte",
            PushChar => "pushchar",
            PushShort => "pushshort",
            PushInt => "pushint",
            PushLong => "pushlong",
            PushDouble => "pushdouble",
            PushString => "pushstring",
            LoadLocal => "loadlocal",
            StoreLocal => "storelocal",
            LoadField => "loadfield",
            StoreField => "storefield",
            LoadClass => "loadclass",
            New => "new",
            Call => "call",
            InstanceOf => "instanceof",
            Super => "super",
            Ret => "ret",
            RetVal => "retval",
            RetCtor => "retctor",
            Add => "add",
            Sub => "sub",
            Mul => "mul",
            Div => "div",
            Mod => "mod",
            Neg => "neg",
            Not => "not",
            Convert => "convert",
            Ce => "ce",
            Cne => "cne",
            Cl => "cl",
            Cle => "cle",
            Cg => "cg",
            Cge => "cge",
            Jmp => "jmp",
            Jt => "jt",
            Jf => "jf",
            Jce => "jce",
            Jcne => "jcne",
            Jcl => "jcl",
            Jcle => "jcle",
            Jcg => "jcg",
            Jcge => "jcge",
            Case => "case",
            EnterTry => "entertry",
            LeaveTry => "leavetry",
            LeaveCatch => "leavecatch",
            LeaveFinally => "leavefinally",
            Throw => "throw",
            Rethrow => "rethrow",
            NewArray => "newarray",
            ArrayLoad => "arrayload",
            ArrayStore => "arraystore",
            ArrayLength => "arraylength",
            MakeArray => "makearray",
            Fork => "fork",
            Join => "join",
            Exit => "exit",
            Nice => "nice",
            Sleep => "sleep",
            Wait => "wait",
            Signal => "signal",
            ThreadId => "threadid",
            Hierarchy => "hierarchy",
            Fields => "fields",
            Methods => "methods",
            GetField => "getfield",
            SetField => "setfield",
            Invoke => "invoke",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Target kind of a `convert` instruction
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ConvertKind {
    /// To byte
    Byte = 1,
    /// To char
    Char = 2,
    /// To short
    Short = 3,
    /// To int
    Int = 4,
    /// To long
    Long = 5,
    /// To double
    Double = 6,
    /// To bool
    Bool = 7,
    /// To string (textual form)
    String = 8,
}

impl ConvertKind {
    /// Decode a kind code
    pub fn from_u8(code: u8) -> Option<Self> {
        Some(match code {
            1 => ConvertKind::Byte,
            2 => ConvertKind::Char,
            3 => ConvertKind::Short,
            4 => ConvertKind::Int,
            5 => ConvertKind::Long,
            6 => ConvertKind::Double,
            7 => ConvertKind::Bool,
            8 => ConvertKind::String,
            _ => return None,
        })
    }
}

const fn build_decode_table() -> [Option<(Opcode, Width)>; 256] {
    let mut table: [Option<(Opcode, Width)>; 256] = [None; 256];
    let mut i = 0;
    while i < Opcode::ALL.len() {
        let op = Opcode::ALL[i];
        let base = op as u8 as usize;
        if op.operand().is_variable() {
            table[base] = Some((op, Width::Narrow));
            table[base + 1] = Some((op, Width::Medium));
            table[base + 2] = Some((op, Width::Wide));
        } else {
            table[base] = Some((op, Width::Narrow));
        }
        i += 1;
    }
    table
}

static DECODE_TABLE: [Option<(Opcode, Width)>; 256] = build_decode_table();
