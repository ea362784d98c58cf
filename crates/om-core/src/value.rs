//! Runtime value representation
//!
//! Values form a closed set of kinds. Primitive kinds are stored inline;
//! strings, arrays and class instances are reference counted and shared
//! between every thread that holds them.

use crate::class::ClassId;
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Opaque native state behind a facade instance
pub type NativeHandle = Rc<dyn Any>;

/// Shared, mutable array storage
pub type ArrayRef = Rc<RefCell<Vec<Value>>>;

/// Backing storage of a class instance
#[derive(Debug)]
pub enum ObjectStorage {
    /// Flattened instance field array (slot `n` lives at index `n - 1`)
    Fields(RefCell<Vec<Value>>),
    /// Facade instance
    Native(NativeHandle),
}

/// A class instance seen through one class of its hierarchy
///
/// `super` produces a second view of the same storage with the parent
/// class, so fields stay shared between both views.
#[derive(Debug, Clone)]
pub struct ObjectRef {
    /// Class the object is viewed as
    pub class: ClassId,
    /// Shared storage
    pub storage: Rc<ObjectStorage>,
}

impl ObjectRef {
    /// Create an instance with `field_count` null fields
    pub fn with_fields(class: ClassId, field_count: usize) -> Self {
        Self {
            class,
            storage: Rc::new(ObjectStorage::Fields(RefCell::new(vec![
                Value::Null;
                field_count
            ]))),
        }
    }

    /// Create a facade instance
    pub fn native(class: ClassId, handle: NativeHandle) -> Self {
        Self {
            class,
            storage: Rc::new(ObjectStorage::Native(handle)),
        }
    }

    /// Same object viewed as another class
    pub fn view_as(&self, class: ClassId) -> Self {
        Self {
            class,
            storage: Rc::clone(&self.storage),
        }
    }

    /// Storage address, stable for the object's lifetime
    pub fn identity(&self) -> usize {
        Rc::as_ptr(&self.storage) as *const () as usize
    }

    /// Native handle if this is a facade instance
    pub fn handle(&self) -> Option<&NativeHandle> {
        match &*self.storage {
            ObjectStorage::Native(handle) => Some(handle),
            ObjectStorage::Fields(_) => None,
        }
    }
}

/// Runtime value
#[derive(Clone, Default)]
pub enum Value {
    /// Null reference
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// Unsigned 8-bit integer
    Byte(u8),
    /// UTF-16 code unit
    Char(u16),
    /// 16-bit integer
    Short(i16),
    /// 32-bit integer
    Int(i32),
    /// 64-bit integer
    Long(i64),
    /// 64-bit float
    Double(f64),
    /// Immutable string
    Str(Rc<str>),
    /// Array of values
    Array(ArrayRef),
    /// Class instance
    Object(ObjectRef),
    /// Class definition
    Class(ClassId),
}

impl Value {
    /// Create a string value
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::Str(Rc::from(s.as_ref()))
    }

    /// Create an array value
    pub fn array(values: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(values)))
    }

    /// Check if this value is null
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Boolean payload
    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integral payload widened to `i64`
    pub fn as_integral(&self) -> Option<i64> {
        match *self {
            Value::Byte(v) => Some(v as i64),
            Value::Char(v) => Some(v as i64),
            Value::Short(v) => Some(v as i64),
            Value::Int(v) => Some(v as i64),
            Value::Long(v) => Some(v),
            _ => None,
        }
    }

    /// String payload
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Kind name used in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Byte(_) => "byte",
            Value::Char(_) => "char",
            Value::Short(_) => "short",
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Double(_) => "double",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Class(_) => "class",
        }
    }

    /// Reference identity; a `super` view is identical to its object
    pub fn same_ref(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(&a.storage, &b.storage),
            (Value::Class(a), Value::Class(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Array(a) => f.debug_list().entries(a.borrow().iter()).finish(),
            Value::Object(o) => write!(f, "Object({}@{:#x})", o.class.index(), o.identity()),
            Value::Class(c) => write!(f, "Class({})", c.index()),
            other => write!(f, "{}({})", other.type_name(), other),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Byte(v) => write!(f, "{}", v),
            Value::Char(c) => match char::from_u32(*c as u32) {
                Some(c) => write!(f, "{}", c),
                None => write!(f, "\\u{:04x}", c),
            },
            Value::Short(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{}", s),
            Value::Array(a) => {
                write!(f, "[")?;
                for (i, item) in a.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match item {
                        Value::Array(inner) => write!(f, "array[{}]", inner.borrow().len())?,
                        other => write!(f, "{}", other)?,
                    }
                }
                write!(f, "]")
            }
            Value::Object(_) => write!(f, "<object>"),
            Value::Class(_) => write!(f, "<class>"),
        }
    }
}
