//! Class catalog and inheritance flattening
//!
//! Classes are registered with only their own declarations. Before
//! execution starts, [`Catalog::flatten_all`] merges every ancestor's field
//! slots and methods into each descendant exactly once, so an inherited,
//! non-overridden method resolves straight to the ancestor's code address
//! without a runtime walk up the hierarchy.

use crate::facade::Facade;
use crate::loader::{LoadError, ModuleId};
use crate::symbols::{MethodKey, Symbol, SymbolTable};
use crate::value::Value;
use om_bytecode::{CONSTRUCTOR, STATIC_INITIALIZER};
use rustc_hash::{FxHashMap, FxHashSet};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::debug;

/// Index of a class in the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(u32);

impl ClassId {
    /// Create an id from a catalog index
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Catalog index
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Where a field lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSlot {
    /// 1-based slot in the instance field array or the static array
    pub slot: u32,
    /// Static or instance
    pub is_static: bool,
}

/// How a method is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodBody {
    /// Bytecode in the merged code segment
    Bytecode {
        /// Entry address
        address: usize,
        /// Locals beyond the arguments
        local_count: u16,
    },
    /// Forwarded to the class's facade
    Native,
}

/// Resolved method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodEntry {
    /// Module whose tables the code indexes
    pub module: ModuleId,
    /// Argument count
    pub arg_count: u16,
    /// Body
    pub body: MethodBody,
    /// Static method
    pub is_static: bool,
    /// Class that declares the code
    pub declaring: ClassId,
}

/// A class definition
pub struct ClassDef {
    /// Short name
    pub name: String,
    /// `module.Name`
    pub qualified: String,
    /// Declaring module
    pub module: ModuleId,
    /// Parent, resolved at link time
    pub parent: Option<ClassId>,
    /// Instance field count (flattened once expanded)
    pub instance_field_count: u32,
    /// Field map (flattened once expanded)
    pub fields: FxHashMap<Symbol, FieldSlot>,
    /// Method map (flattened once expanded)
    pub methods: FxHashMap<MethodKey, MethodEntry>,
    /// Static storage (slot `n` at index `n - 1`)
    pub statics: RefCell<Vec<Value>>,
    /// Native backing
    pub facade: Option<Rc<dyn Facade>>,
    /// Enumeration constants written to statics on initialization
    pub enum_values: Vec<(Symbol, i32)>,
    expanded: bool,
    initialized: Cell<bool>,
}

impl ClassDef {
    /// Create an empty definition
    pub fn new(name: impl Into<String>, module_name: &str, module: ModuleId) -> Self {
        let name = name.into();
        Self {
            qualified: format!("{}.{}", module_name, name),
            name,
            module,
            parent: None,
            instance_field_count: 0,
            fields: FxHashMap::default(),
            methods: FxHashMap::default(),
            statics: RefCell::new(Vec::new()),
            facade: None,
            enum_values: Vec::new(),
            expanded: false,
            initialized: Cell::new(false),
        }
    }

    /// Declare an own field
    pub fn declare_field(
        &mut self,
        symbols: &SymbolTable,
        name: Symbol,
        slot: FieldSlot,
    ) -> Result<(), LoadError> {
        if self.fields.insert(name, slot).is_some() {
            return Err(LoadError::DuplicateField {
                class: self.qualified.clone(),
                field: symbols.name(name).to_string(),
            });
        }
        if slot.is_static {
            let mut statics = self.statics.borrow_mut();
            if statics.len() < slot.slot as usize {
                statics.resize(slot.slot as usize, Value::Null);
            }
        } else {
            self.instance_field_count = self.instance_field_count.max(slot.slot);
        }
        Ok(())
    }

    /// Declare an own method
    pub fn declare_method(
        &mut self,
        symbols: &SymbolTable,
        key: MethodKey,
        entry: MethodEntry,
    ) -> Result<(), LoadError> {
        if self.methods.insert(key, entry).is_some() {
            return Err(LoadError::DuplicateMethod {
                class: self.qualified.clone(),
                method: symbols.signature(key),
            });
        }
        Ok(())
    }

    /// Look up a field
    pub fn field(&self, name: Symbol) -> Option<FieldSlot> {
        self.fields.get(&name).copied()
    }

    /// Look up a method
    pub fn method(&self, key: MethodKey) -> Option<&MethodEntry> {
        self.methods.get(&key)
    }

    /// Whether ancestors have been merged in
    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    /// Whether static initialization has been triggered
    pub fn is_initialized(&self) -> bool {
        self.initialized.get()
    }

    /// Trip the initialization latch; true only the first time
    pub fn begin_initialization(&self) -> bool {
        !self.initialized.replace(true)
    }

    /// Read a static slot
    pub fn static_value(&self, slot: u32) -> Value {
        (slot as usize)
            .checked_sub(1)
            .and_then(|index| self.statics.borrow().get(index).cloned())
            .unwrap_or_default()
    }

    /// Write a static slot
    pub fn set_static(&self, slot: u32, value: Value) {
        let Some(index) = (slot as usize).checked_sub(1) else {
            return;
        };
        let mut statics = self.statics.borrow_mut();
        if index >= statics.len() {
            statics.resize(index + 1, Value::Null);
        }
        statics[index] = value;
    }
}

impl std::fmt::Debug for ClassDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassDef")
            .field("qualified", &self.qualified)
            .field("parent", &self.parent)
            .field("instance_field_count", &self.instance_field_count)
            .field("fields", &self.fields.len())
            .field("methods", &self.methods.len())
            .field("facade", &self.facade.as_ref().map(|f| f.type_name().to_string()))
            .finish()
    }
}

/// Every class of a linked program
#[derive(Debug, Default)]
pub struct Catalog {
    classes: Vec<ClassDef>,
    by_name: FxHashMap<String, ClassId>,
}

impl Catalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class under its qualified name
    pub fn register(&mut self, class: ClassDef) -> Result<ClassId, LoadError> {
        if self.by_name.contains_key(&class.qualified) {
            return Err(LoadError::DuplicateClass(class.qualified));
        }
        let id = ClassId(self.classes.len() as u32);
        debug!(class = %class.qualified, id = id.0, "registered class");
        self.by_name.insert(class.qualified.clone(), id);
        self.classes.push(class);
        Ok(id)
    }

    /// Class by id
    pub fn get(&self, id: ClassId) -> &ClassDef {
        &self.classes[id.index()]
    }

    /// Mutable class by id
    pub fn get_mut(&mut self, id: ClassId) -> &mut ClassDef {
        &mut self.classes[id.index()]
    }

    /// Look up a class by qualified name
    pub fn find(&self, qualified: &str) -> Option<ClassId> {
        self.by_name.get(qualified).copied()
    }

    /// Number of classes
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Check if the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// All class ids in registration order
    pub fn ids(&self) -> impl Iterator<Item = ClassId> {
        (0..self.classes.len() as u32).map(ClassId)
    }

    /// Qualified name of a class
    pub fn name(&self, id: ClassId) -> &str {
        &self.get(id).qualified
    }

    /// `class` followed by its ancestors
    pub fn hierarchy(&self, class: ClassId) -> Vec<ClassId> {
        let mut chain = vec![class];
        let mut current = self.get(class).parent;
        while let Some(parent) = current {
            if chain.contains(&parent) {
                break;
            }
            chain.push(parent);
            current = self.get(parent).parent;
        }
        chain
    }

    /// Whether `class` is `ancestor` or inherits from it
    pub fn is_subclass(&self, class: ClassId, ancestor: ClassId) -> bool {
        self.hierarchy(class).contains(&ancestor)
    }

    /// Flatten every class
    pub fn flatten_all(&mut self, symbols: &SymbolTable) -> Result<(), LoadError> {
        let skip: FxHashSet<Symbol> = [CONSTRUCTOR, STATIC_INITIALIZER]
            .iter()
            .filter_map(|name| symbols.get(name))
            .collect();
        let mut in_progress = FxHashSet::default();
        for id in 0..self.classes.len() as u32 {
            self.flatten(ClassId(id), &skip, &mut in_progress)?;
        }
        Ok(())
    }

    /// Merge ancestors into `id`; runs at most once per class
    fn flatten(
        &mut self,
        id: ClassId,
        skip: &FxHashSet<Symbol>,
        in_progress: &mut FxHashSet<ClassId>,
    ) -> Result<(), LoadError> {
        if self.get(id).expanded {
            return Ok(());
        }
        if !in_progress.insert(id) {
            return Err(LoadError::InheritanceCycle(self.get(id).qualified.clone()));
        }

        if let Some(parent) = self.get(id).parent {
            self.flatten(parent, skip, in_progress)?;

            let parent_def = self.get(parent);
            let parent_statics = parent_def.statics.borrow().len() as u32;
            let parent_instance = parent_def.instance_field_count;
            let inherited_fields: Vec<_> = parent_def.fields.iter().map(|(k, v)| (*k, *v)).collect();
            let inherited_methods: Vec<_> = parent_def
                .methods
                .iter()
                .filter(|(key, _)| !skip.contains(&key.name))
                .map(|(k, v)| (*k, *v))
                .collect();

            let class = self.get_mut(id);
            for slot in class.fields.values_mut() {
                slot.slot += if slot.is_static {
                    parent_statics
                } else {
                    parent_instance
                };
            }
            {
                // Per-class static array: parent-sized room in front of own statics
                let mut statics = class.statics.borrow_mut();
                let own = std::mem::take(&mut *statics);
                statics.resize(parent_statics as usize, Value::Null);
                statics.extend(own);
            }
            class.instance_field_count += parent_instance;
            for (name, slot) in inherited_fields {
                class.fields.entry(name).or_insert(slot);
            }
            for (key, entry) in inherited_methods {
                class.methods.entry(key).or_insert(entry);
            }
        }

        let class = self.get_mut(id);
        class.expanded = true;
        in_progress.remove(&id);
        debug!(
            class = %class.qualified,
            fields = class.fields.len(),
            methods = class.methods.len(),
            instance_fields = class.instance_field_count,
            "flattened class"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module() -> ModuleId {
        ModuleId::new(0)
    }

    fn method(class: u32, address: usize) -> MethodEntry {
        MethodEntry {
            module: module(),
            arg_count: 0,
            body: MethodBody::Bytecode {
                address,
                local_count: 0,
            },
            is_static: false,
            declaring: ClassId(class),
        }
    }

    fn instance(slot: u32) -> FieldSlot {
        FieldSlot {
            slot,
            is_static: false,
        }
    }

    #[test]
    fn test_flatten_shifts_own_slots() {
        let mut symbols = SymbolTable::new();
        let x = symbols.intern("x");
        let y = symbols.intern("y");
        let mut catalog = Catalog::new();

        let mut a = ClassDef::new("A", "m", module());
        a.declare_field(&symbols, x, instance(1)).unwrap();
        let a = catalog.register(a).unwrap();

        let mut b = ClassDef::new("B", "m", module());
        b.parent = Some(a);
        b.declare_field(&symbols, y, instance(1)).unwrap();
        let b = catalog.register(b).unwrap();

        catalog.flatten_all(&symbols).unwrap();
        let b = catalog.get(b);
        assert_eq!(b.field(x), Some(instance(1)));
        assert_eq!(b.field(y), Some(instance(2)));
        assert_eq!(b.instance_field_count, 2);
    }

    #[test]
    fn test_flatten_inherits_methods_but_not_constructors() {
        let mut symbols = SymbolTable::new();
        let run = MethodKey::new(symbols.intern("run"), 0);
        let init = MethodKey::new(symbols.intern(CONSTRUCTOR), 0);
        let stop = MethodKey::new(symbols.intern("stop"), 0);
        let mut catalog = Catalog::new();

        let mut a = ClassDef::new("A", "m", module());
        a.declare_method(&symbols, run, method(0, 10)).unwrap();
        a.declare_method(&symbols, init, method(0, 20)).unwrap();
        a.declare_method(&symbols, stop, method(0, 30)).unwrap();
        let a = catalog.register(a).unwrap();

        let mut b = ClassDef::new("B", "m", module());
        b.parent = Some(a);
        b.declare_method(&symbols, stop, method(1, 40)).unwrap();
        let b = catalog.register(b).unwrap();

        catalog.flatten_all(&symbols).unwrap();
        let b = catalog.get(b);
        assert_eq!(b.method(run), Some(&method(0, 10)));
        assert_eq!(b.method(stop), Some(&method(1, 40)));
        assert_eq!(b.method(init), None);
    }

    #[test]
    fn test_flatten_is_idempotent() {
        let mut symbols = SymbolTable::new();
        let x = symbols.intern("x");
        let s = symbols.intern("s");
        let mut catalog = Catalog::new();

        let mut a = ClassDef::new("A", "m", module());
        a.declare_field(&symbols, x, instance(1)).unwrap();
        a.declare_field(&symbols, s, FieldSlot { slot: 1, is_static: true })
            .unwrap();
        let a = catalog.register(a).unwrap();
        let mut b = ClassDef::new("B", "m", module());
        b.parent = Some(a);
        let t = symbols.intern("t");
        b.declare_field(&symbols, t, FieldSlot { slot: 1, is_static: true })
            .unwrap();
        let b = catalog.register(b).unwrap();

        catalog.flatten_all(&symbols).unwrap();
        let once = catalog.get(b).fields.clone();
        catalog.flatten_all(&symbols).unwrap();
        assert_eq!(catalog.get(b).fields, once);
        assert_eq!(catalog.get(b).field(t), Some(FieldSlot { slot: 2, is_static: true }));
        assert_eq!(catalog.get(b).statics.borrow().len(), 2);
    }

    #[test]
    fn test_flatten_detects_cycles() {
        let symbols = SymbolTable::new();
        let mut catalog = Catalog::new();
        let a = catalog.register(ClassDef::new("A", "m", module())).unwrap();
        let b = catalog.register(ClassDef::new("B", "m", module())).unwrap();
        catalog.get_mut(a).parent = Some(b);
        catalog.get_mut(b).parent = Some(a);
        assert!(matches!(
            catalog.flatten_all(&symbols),
            Err(LoadError::InheritanceCycle(_))
        ));
    }

    #[test]
    fn test_duplicates_rejected() {
        let mut symbols = SymbolTable::new();
        let x = symbols.intern("x");
        let mut catalog = Catalog::new();
        let mut a = ClassDef::new("A", "m", module());
        a.declare_field(&symbols, x, instance(1)).unwrap();
        assert!(matches!(
            a.declare_field(&symbols, x, instance(2)),
            Err(LoadError::DuplicateField { .. })
        ));
        catalog.register(a).unwrap();
        assert!(matches!(
            catalog.register(ClassDef::new("A", "m", module())),
            Err(LoadError::DuplicateClass(name)) if name == "m.A"
        ));
    }

    #[test]
    fn test_hierarchy_and_subclass() {
        let mut catalog = Catalog::new();
        let a = catalog.register(ClassDef::new("A", "m", module())).unwrap();
        let mut b = ClassDef::new("B", "m", module());
        b.parent = Some(a);
        let b = catalog.register(b).unwrap();
        assert_eq!(catalog.hierarchy(b), vec![b, a]);
        assert!(catalog.is_subclass(b, a));
        assert!(!catalog.is_subclass(a, b));
    }
}
