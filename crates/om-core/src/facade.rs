//! Native facade classes
//!
//! A facade backs a class with native code. The engine never looks inside
//! one: every field and method access on a facade class or instance is
//! forwarded through the [`Facade`] trait, and the facade's own
//! introspection is what fills the class's field and method maps at link
//! time.

use crate::value::{NativeHandle, Value};
use crate::{VmError, VmResult};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;
use std::sync::Arc;

/// Method signature exposed by a facade
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSig {
    /// Method name
    pub name: String,
    /// Argument count
    pub arity: u16,
}

impl MethodSig {
    /// Create a signature
    pub fn new(name: impl Into<String>, arity: u16) -> Self {
        Self {
            name: name.into(),
            arity,
        }
    }
}

/// Receiver of a facade operation
#[derive(Debug, Clone, Copy)]
pub enum FacadeTarget<'a> {
    /// The class itself
    Static,
    /// One instance
    Instance(&'a NativeHandle),
}

/// Native capability behind a facade class
pub trait Facade {
    /// Registry name, e.g. `om.Console`
    fn type_name(&self) -> &str;

    /// Names of static fields
    fn static_fields(&self) -> Vec<String>;

    /// Names of instance fields
    fn instance_fields(&self) -> Vec<String>;

    /// Static method signatures
    fn static_methods(&self) -> Vec<MethodSig>;

    /// Instance method signatures
    fn instance_methods(&self) -> Vec<MethodSig>;

    /// Create the native state of a new instance
    fn new_instance(&self) -> VmResult<NativeHandle>;

    /// Read a field
    fn get_field(&self, target: FacadeTarget<'_>, name: &str) -> VmResult<Value>;

    /// Write a field
    fn set_field(&self, target: FacadeTarget<'_>, name: &str, value: Value) -> VmResult<()>;

    /// Call a method; every facade method produces a value (`null` for none)
    fn call(&self, target: FacadeTarget<'_>, name: &str, args: &[Value]) -> VmResult<Value>;
}

/// Facades by native type name
#[derive(Default, Clone)]
pub struct FacadeRegistry {
    facades: FxHashMap<String, Rc<dyn Facade>>,
}

impl FacadeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in facades, console writing to stdout
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Rc::new(ConsoleFacade::stdout()));
        registry
    }

    /// Register a facade under its type name, replacing any previous one
    pub fn register(&mut self, facade: Rc<dyn Facade>) {
        self.facades.insert(facade.type_name().to_string(), facade);
    }

    /// Look up a facade
    pub fn get(&self, type_name: &str) -> Option<Rc<dyn Facade>> {
        self.facades.get(type_name).cloned()
    }

    /// Registered type names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.facades.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for FacadeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.facades.keys()).finish()
    }
}

/// Registry name of the console facade
pub const CONSOLE_TYPE: &str = "om.Console";

/// Captured console output shared with the host
#[derive(Debug, Clone, Default)]
pub struct ConsoleBuffer(Arc<Mutex<String>>);

impl ConsoleBuffer {
    /// Everything written so far
    pub fn contents(&self) -> String {
        self.0.lock().clone()
    }

    /// Written text split into lines
    pub fn lines(&self) -> Vec<String> {
        self.0.lock().lines().map(str::to_string).collect()
    }
}

#[derive(Debug)]
enum Sink {
    Stdout,
    Buffer(ConsoleBuffer),
}

/// Console output facade
///
/// Static and instance `print/1` and `println/1`; the static field `lines`
/// counts completed lines and each instance has a `prefix` field prepended
/// to what it prints.
#[derive(Debug)]
pub struct ConsoleFacade {
    sink: Sink,
    lines: Mutex<i64>,
}

struct ConsoleInstance {
    prefix: RefCell<String>,
}

impl ConsoleFacade {
    /// Console writing to the process's stdout
    pub fn stdout() -> Self {
        Self {
            sink: Sink::Stdout,
            lines: Mutex::new(0),
        }
    }

    /// Console writing into a buffer the caller can read back
    pub fn capture() -> (Self, ConsoleBuffer) {
        let buffer = ConsoleBuffer::default();
        let console = Self {
            sink: Sink::Buffer(buffer.clone()),
            lines: Mutex::new(0),
        };
        (console, buffer)
    }

    fn error(&self, message: impl Into<String>) -> VmError {
        VmError::Facade {
            facade: CONSOLE_TYPE.to_string(),
            message: message.into(),
        }
    }

    fn instance<'a>(&self, target: FacadeTarget<'a>) -> VmResult<Option<&'a ConsoleInstance>> {
        match target {
            FacadeTarget::Static => Ok(None),
            FacadeTarget::Instance(handle) => handle
                .downcast_ref::<ConsoleInstance>()
                .map(Some)
                .ok_or_else(|| self.error("foreign native handle")),
        }
    }

    fn write(&self, text: &str, newline: bool) -> VmResult<()> {
        match &self.sink {
            Sink::Stdout => {
                let stdout = std::io::stdout();
                let mut out = stdout.lock();
                let result = if newline {
                    writeln!(out, "{}", text).and_then(|_| out.flush())
                } else {
                    write!(out, "{}", text)
                };
                result.map_err(|e| self.error(e.to_string()))?;
            }
            Sink::Buffer(buffer) => {
                let mut guard = buffer.0.lock();
                guard.push_str(text);
                if newline {
                    guard.push('\n');
                }
            }
        }
        if newline {
            *self.lines.lock() += 1;
        }
        Ok(())
    }
}

impl Facade for ConsoleFacade {
    fn type_name(&self) -> &str {
        CONSOLE_TYPE
    }

    fn static_fields(&self) -> Vec<String> {
        vec!["lines".to_string()]
    }

    fn instance_fields(&self) -> Vec<String> {
        vec!["prefix".to_string()]
    }

    fn static_methods(&self) -> Vec<MethodSig> {
        vec![MethodSig::new("print", 1), MethodSig::new("println", 1)]
    }

    fn instance_methods(&self) -> Vec<MethodSig> {
        self.static_methods()
    }

    fn new_instance(&self) -> VmResult<NativeHandle> {
        Ok(Rc::new(ConsoleInstance {
            prefix: RefCell::new(String::new()),
        }))
    }

    fn get_field(&self, target: FacadeTarget<'_>, name: &str) -> VmResult<Value> {
        match (self.instance(target)?, name) {
            (_, "lines") => Ok(Value::Long(*self.lines.lock())),
            (Some(instance), "prefix") => Ok(Value::string(instance.prefix.borrow().as_str())),
            _ => Err(self.error(format!("no field {}", name))),
        }
    }

    fn set_field(&self, target: FacadeTarget<'_>, name: &str, value: Value) -> VmResult<()> {
        match (self.instance(target)?, name) {
            (Some(instance), "prefix") => {
                *instance.prefix.borrow_mut() = value.to_string();
                Ok(())
            }
            (_, "lines") => Err(self.error("field lines is read-only")),
            _ => Err(self.error(format!("no field {}", name))),
        }
    }

    fn call(&self, target: FacadeTarget<'_>, name: &str, args: &[Value]) -> VmResult<Value> {
        let instance = self.instance(target)?;
        let newline = match (name, args.len()) {
            ("print", 1) => false,
            ("println", 1) => true,
            _ => return Err(self.error(format!("no method {}/{}", name, args.len()))),
        };
        let text = match instance {
            Some(instance) => format!("{}{}", instance.prefix.borrow(), args[0]),
            None => args[0].to_string(),
        };
        self.write(&text, newline)?;
        Ok(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_capture() {
        let (console, buffer) = ConsoleFacade::capture();
        console
            .call(FacadeTarget::Static, "print", &[Value::string("a")])
            .unwrap();
        console
            .call(FacadeTarget::Static, "println", &[Value::Int(1)])
            .unwrap();
        assert_eq!(buffer.contents(), "a1\n");
        assert!(matches!(
            console.get_field(FacadeTarget::Static, "lines").unwrap(),
            Value::Long(1)
        ));
    }

    #[test]
    fn test_console_instance_prefix() {
        let (console, buffer) = ConsoleFacade::capture();
        let handle = console.new_instance().unwrap();
        let target = FacadeTarget::Instance(&handle);
        console
            .set_field(target, "prefix", Value::string("> "))
            .unwrap();
        console
            .call(target, "println", &[Value::string("hi")])
            .unwrap();
        assert_eq!(buffer.lines(), vec!["> hi".to_string()]);
    }

    #[test]
    fn test_console_rejects_unknown_members() {
        let (console, _) = ConsoleFacade::capture();
        assert!(console.call(FacadeTarget::Static, "beep", &[]).is_err());
        assert!(console
            .set_field(FacadeTarget::Static, "lines", Value::Int(3))
            .is_err());
        assert!(console.get_field(FacadeTarget::Static, "prefix").is_err());
    }

    #[test]
    fn test_registry_defaults() {
        let registry = FacadeRegistry::with_defaults();
        assert!(registry.get(CONSOLE_TYPE).is_some());
        assert!(registry.get("om.Missing").is_none());
    }
}
