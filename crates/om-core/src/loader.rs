//! Module resolution, loading and linking
//!
//! The loader pulls in the main module and, breadth-first, every module it
//! uses. Linking concatenates their code into one segment, rebases method
//! entries, resolves each module's class references, registers classes
//! (attaching native facades), synthesizes the entry sequence and finally
//! flattens inheritance.

use crate::class::{Catalog, ClassDef, ClassId, FieldSlot, MethodBody, MethodEntry};
use crate::facade::{Facade, FacadeRegistry};
use crate::options::LoaderOptions;
use crate::symbols::{MethodKey, SymbolTable};
use crate::value::Value;
use crate::{VmError, VmResult};
use om_bytecode::{
    optimize, verify_unit, BytecodeWriter, ClassInfo, ClassKind, CompiledUnit, Opcode,
    OptimizeError, UnitError, UnitMetadata, VerifyError, Width,
};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, warn};

/// Name of the synthesized entry module
pub const ENTRY_MODULE: &str = "<entry>";

/// Name of the program entry method
pub const MAIN: &str = "main";

/// Errors that can occur while loading and linking
#[derive(Debug, Error)]
pub enum LoadError {
    /// Module file could not be read
    #[error("Cannot read module file {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// No resolver knows the module
    #[error("Module not found: {name} (searched {searched:?})")]
    ModuleNotFound {
        /// Module name
        name: String,
        /// Locations tried
        searched: Vec<PathBuf>,
    },

    /// The unit declares a different module name than requested
    #[error("Requested module {requested} but unit declares {found}")]
    NameMismatch {
        /// Requested name
        requested: String,
        /// Declared name
        found: String,
    },

    /// Malformed unit
    #[error("Module {module}: {source}")]
    Unit {
        /// Module name or path
        module: String,
        /// Underlying error
        source: UnitError,
    },

    /// Unit failed verification
    #[error("Module {module} failed verification: {source}")]
    Verify {
        /// Module name
        module: String,
        /// Underlying error
        source: VerifyError,
    },

    /// Branch optimization of the merged segment failed
    #[error("Branch optimization failed: {0}")]
    Optimize(#[from] OptimizeError),

    /// Two classes with the same qualified name
    #[error("Duplicate class {0}")]
    DuplicateClass(String),

    /// Field declared twice in one class
    #[error("Duplicate field {field} in class {class}")]
    DuplicateField {
        /// Class name
        class: String,
        /// Field name
        field: String,
    },

    /// Method signature declared twice in one class
    #[error("Duplicate method {method} in class {class}")]
    DuplicateMethod {
        /// Class name
        class: String,
        /// Signature
        method: String,
    },

    /// Class reference or parent that names no class
    #[error("Unresolved class {name} referenced from module {module}")]
    UnresolvedClass {
        /// Referencing module
        module: String,
        /// Referenced name
        name: String,
    },

    /// Short class name found in several used modules
    #[error("Ambiguous class {name}: {candidates:?}")]
    AmbiguousClass {
        /// Referenced name
        name: String,
        /// Matching qualified names
        candidates: Vec<String>,
    },

    /// Facade or implicit class whose native type is not registered
    #[error("Class {class} needs unregistered native type {native_type}")]
    UnknownFacade {
        /// Class name
        class: String,
        /// Native type name
        native_type: String,
    },

    /// Inheritance to or from a facade class
    #[error("Class {class} cannot inherit from {parent}: facade classes do not take part in inheritance")]
    FacadeInheritance {
        /// Class name
        class: String,
        /// Parent name
        parent: String,
    },

    /// A class is its own ancestor
    #[error("Inheritance cycle through {0}")]
    InheritanceCycle(String),

    /// Main module has no class declaring a static `main`
    #[error("Module {0} declares no static main/1 or main/0")]
    MissingEntryPoint(String),
}

/// Source of compiled units by module name
pub trait ModuleResolver {
    /// Produce the unit of a module
    fn resolve(&self, name: &str) -> Result<CompiledUnit, LoadError>;
}

/// Resolves `<name>.om` in a list of directories
#[derive(Debug, Clone, Default)]
pub struct FileResolver {
    search_paths: Vec<PathBuf>,
}

impl FileResolver {
    /// Create a resolver over `search_paths`, searched in order
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    /// Create a resolver over the loader options' search paths
    pub fn from_options(options: &LoaderOptions) -> Self {
        Self::new(options.search_paths.clone())
    }

    /// Read and decode a unit file
    pub fn load_file(path: &Path) -> Result<CompiledUnit, LoadError> {
        let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        CompiledUnit::decode(&bytes).map_err(|source| LoadError::Unit {
            module: path.display().to_string(),
            source,
        })
    }
}

impl ModuleResolver for FileResolver {
    fn resolve(&self, name: &str) -> Result<CompiledUnit, LoadError> {
        let file = format!("{}.{}", name, om_bytecode::unit::EXTENSION);
        let mut searched = Vec::with_capacity(self.search_paths.len());
        for dir in &self.search_paths {
            let path = dir.join(&file);
            if path.is_file() {
                debug!(module = name, path = %path.display(), "resolved module file");
                return Self::load_file(&path);
            }
            searched.push(path);
        }
        Err(LoadError::ModuleNotFound {
            name: name.to_string(),
            searched,
        })
    }
}

/// Resolves modules from units held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryResolver {
    units: FxHashMap<String, CompiledUnit>,
}

impl MemoryResolver {
    /// Create an empty resolver
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a unit under a module name
    pub fn insert(&mut self, name: impl Into<String>, unit: CompiledUnit) {
        self.units.insert(name.into(), unit);
    }

    /// Add a unit under the module name its metadata declares
    pub fn add(&mut self, unit: CompiledUnit) -> Result<(), LoadError> {
        let meta = unit.metadata().map_err(|source| LoadError::Unit {
            module: "<memory>".to_string(),
            source,
        })?;
        self.units.insert(meta.module, unit);
        Ok(())
    }
}

impl ModuleResolver for MemoryResolver {
    fn resolve(&self, name: &str) -> Result<CompiledUnit, LoadError> {
        self.units
            .get(name)
            .cloned()
            .ok_or_else(|| LoadError::ModuleNotFound {
                name: name.to_string(),
                searched: Vec::new(),
            })
    }
}

/// Index of a linked module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(u32);

impl ModuleId {
    /// Create an id from a module index
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Module index
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A module's reference tables, resolved at link time
#[derive(Debug, Clone)]
pub struct ModuleRecord {
    /// Module name
    pub name: String,
    /// Used modules
    pub uses: Vec<String>,
    /// Class references
    pub class_refs: Vec<ClassId>,
    /// Field access names
    pub field_names: Vec<crate::symbols::Symbol>,
    /// Method call signatures
    pub method_calls: Vec<MethodKey>,
    /// String literals
    pub strings: Vec<Rc<str>>,
}

impl ModuleRecord {
    fn lookup<'a, T>(&self, table: &'static str, items: &'a [T], index: u32) -> VmResult<&'a T> {
        index
            .checked_sub(1)
            .and_then(|i| items.get(i as usize))
            .ok_or_else(|| VmError::UnresolvedReference {
                table,
                index,
                module: self.name.clone(),
            })
    }

    /// Class reference by 1-based number
    pub fn class_ref(&self, index: u32) -> VmResult<ClassId> {
        self.lookup("class", &self.class_refs, index).copied()
    }

    /// Field name by 1-based number
    pub fn field_name(&self, index: u32) -> VmResult<crate::symbols::Symbol> {
        self.lookup("field", &self.field_names, index).copied()
    }

    /// Method signature by 1-based number
    pub fn method_call(&self, index: u32) -> VmResult<MethodKey> {
        self.lookup("method", &self.method_calls, index).copied()
    }

    /// String literal by 1-based number
    pub fn string(&self, index: u32) -> VmResult<Rc<str>> {
        self.lookup("string", &self.strings, index).cloned()
    }
}

/// A linked, ready-to-run program
#[derive(Debug)]
pub struct Program {
    /// Merged code segment
    pub code: Vec<u8>,
    /// Linked modules; the last one is the synthesized entry module
    pub modules: Vec<ModuleRecord>,
    /// Flattened classes
    pub catalog: Catalog,
    /// Interned names
    pub symbols: SymbolTable,
    /// Address of the entry sequence
    pub entry: usize,
    /// Module the entry sequence runs in
    pub entry_module: ModuleId,
    /// Class declaring `main`
    pub main_class: ClassId,
    /// Whether `main` takes the argument array
    pub main_takes_args: bool,
}

impl Program {
    /// Module by id
    pub fn module(&self, id: ModuleId) -> &ModuleRecord {
        &self.modules[id.index()]
    }

    /// Look up a module by name
    pub fn find_module(&self, name: &str) -> Option<ModuleId> {
        self.modules
            .iter()
            .position(|m| m.name == name)
            .map(|i| ModuleId(i as u32))
    }

    /// Render a value with class names resolved
    ///
    /// Objects print as `<module.Class>`, classes as their qualified name.
    /// Nested arrays are not expanded.
    pub fn describe(&self, value: &Value) -> String {
        match value {
            Value::Array(items) => {
                let items: Vec<String> = items
                    .borrow()
                    .iter()
                    .map(|item| match item {
                        Value::Array(inner) => format!("array[{}]", inner.borrow().len()),
                        other => self.describe(other),
                    })
                    .collect();
                format!("[{}]", items.join(", "))
            }
            _ => self.describe_scalar(value),
        }
    }

    fn describe_scalar(&self, value: &Value) -> String {
        match value {
            Value::Object(object) => format!("<{}>", self.catalog.name(object.class)),
            Value::Class(class) => self.catalog.name(*class).to_string(),
            other => other.to_string(),
        }
    }
}

struct LoadedUnit {
    unit: CompiledUnit,
    meta: UnitMetadata,
}

/// Loads and links a program
pub struct Loader<R> {
    resolver: R,
    options: LoaderOptions,
    facades: FacadeRegistry,
}

impl<R: ModuleResolver> Loader<R> {
    /// Create a loader with the built-in facades
    pub fn new(resolver: R, options: LoaderOptions) -> Self {
        Self {
            resolver,
            options,
            facades: FacadeRegistry::with_defaults(),
        }
    }

    /// Replace the facade registry
    pub fn with_facades(mut self, facades: FacadeRegistry) -> Self {
        self.facades = facades;
        self
    }

    /// Load the named main module and everything it uses
    pub fn load(&self, main: &str) -> Result<Program, LoadError> {
        let unit = self.resolver.resolve(main)?;
        let loaded = self.check(main, unit)?;
        if loaded.meta.module != main {
            return Err(LoadError::NameMismatch {
                requested: main.to_string(),
                found: loaded.meta.module,
            });
        }
        self.load_from(loaded)
    }

    /// Load from an already decoded main unit
    pub fn load_unit(&self, unit: CompiledUnit) -> Result<Program, LoadError> {
        let meta = unit.metadata().map_err(|source| LoadError::Unit {
            module: "<main>".to_string(),
            source,
        })?;
        let loaded = self.check(&meta.module, unit)?;
        self.load_from(loaded)
    }

    fn check(&self, name: &str, unit: CompiledUnit) -> Result<LoadedUnit, LoadError> {
        let meta = if self.options.verify {
            verify_unit(&unit).map_err(|source| LoadError::Verify {
                module: name.to_string(),
                source,
            })?
        } else {
            unit.metadata().map_err(|source| LoadError::Unit {
                module: name.to_string(),
                source,
            })?
        };
        Ok(LoadedUnit { unit, meta })
    }

    fn load_from(&self, main: LoadedUnit) -> Result<Program, LoadError> {
        let mut seen: FxHashSet<String> = FxHashSet::default();
        seen.insert(main.meta.module.clone());
        let mut queue: VecDeque<String> = main.meta.uses.iter().cloned().collect();
        let mut units = vec![main];

        while let Some(name) = queue.pop_front() {
            if !seen.insert(name.clone()) {
                continue;
            }
            let unit = self.resolver.resolve(&name)?;
            let loaded = self.check(&name, unit)?;
            if loaded.meta.module != name {
                return Err(LoadError::NameMismatch {
                    requested: name,
                    found: loaded.meta.module,
                });
            }
            queue.extend(
                loaded
                    .meta
                    .uses
                    .iter()
                    .filter(|u| !seen.contains(*u))
                    .cloned(),
            );
            units.push(loaded);
        }

        debug!(
            modules = ?units.iter().map(|u| u.meta.module.as_str()).collect::<Vec<_>>(),
            "loaded modules"
        );
        Linker::new(&self.facades, &self.options).link(units)
    }
}

struct PendingParent {
    class: ClassId,
    module: usize,
    name: String,
}

/// One linking run
struct Linker<'a> {
    facades: &'a FacadeRegistry,
    options: &'a LoaderOptions,
    catalog: Catalog,
    symbols: SymbolTable,
    /// Module names by index, for qualified-name resolution
    names: Vec<String>,
    uses: Vec<Vec<String>>,
}

impl<'a> Linker<'a> {
    fn new(facades: &'a FacadeRegistry, options: &'a LoaderOptions) -> Self {
        Self {
            facades,
            options,
            catalog: Catalog::new(),
            symbols: SymbolTable::new(),
            names: Vec::new(),
            uses: Vec::new(),
        }
    }

    fn link(mut self, units: Vec<LoadedUnit>) -> Result<Program, LoadError> {
        let mut code = Vec::new();
        let mut bases = Vec::with_capacity(units.len());
        for loaded in &units {
            bases.push(code.len());
            code.extend_from_slice(&loaded.unit.code);
            self.names.push(loaded.meta.module.clone());
            self.uses.push(loaded.meta.uses.clone());
        }

        let mut parents = Vec::new();
        for (index, loaded) in units.iter().enumerate() {
            let module = ModuleId(index as u32);
            if loaded.meta.classes.is_empty() && loaded.meta.enums.is_empty() {
                warn!(module = %loaded.meta.module, "module declares no classes");
            }
            for class in &loaded.meta.classes {
                let id = self.register_class(module, bases[index], class)?;
                if let Some(parent) = &class.parent {
                    parents.push(PendingParent {
                        class: id,
                        module: index,
                        name: parent.clone(),
                    });
                }
            }
            for enumeration in &loaded.meta.enums {
                let mut def = ClassDef::new(&enumeration.name, &loaded.meta.module, module);
                for (slot, (name, value)) in enumeration.values.iter().enumerate() {
                    let symbol = self.symbols.intern(name);
                    def.declare_field(
                        &self.symbols,
                        symbol,
                        FieldSlot {
                            slot: slot as u32 + 1,
                            is_static: true,
                        },
                    )?;
                    def.enum_values.push((symbol, *value));
                }
                self.catalog.register(def)?;
            }
        }

        for pending in parents {
            let parent = self.resolve_class(pending.module, &pending.name)?;
            let child = self.catalog.get(pending.class);
            if child.facade.is_some() || self.catalog.get(parent).facade.is_some() {
                return Err(LoadError::FacadeInheritance {
                    class: child.qualified.clone(),
                    parent: self.catalog.name(parent).to_string(),
                });
            }
            self.catalog.get_mut(pending.class).parent = Some(parent);
        }

        let mut modules = Vec::with_capacity(units.len() + 1);
        for (index, loaded) in units.iter().enumerate() {
            let meta = &loaded.meta;
            let class_refs = meta
                .class_refs
                .iter()
                .map(|name| self.resolve_class(index, name))
                .collect::<Result<_, _>>()?;
            let field_names = meta
                .field_accesses
                .iter()
                .map(|name| self.symbols.intern(name))
                .collect();
            let method_calls = meta
                .method_calls
                .iter()
                .map(|m| MethodKey::new(self.symbols.intern(&m.name), m.arity))
                .collect();
            modules.push(ModuleRecord {
                name: meta.module.clone(),
                uses: meta.uses.clone(),
                class_refs,
                field_names,
                method_calls,
                strings: meta.strings.iter().map(|s| Rc::from(s.as_str())).collect(),
            });
        }

        let (main_class, main_key) = self.find_main()?;
        let main_takes_args = main_key.arity == 1;
        let entry = code.len();
        let mut writer = BytecodeWriter::new();
        writer.emit_opcode(Opcode::LoadClass, Width::Narrow);
        writer.emit_index(Width::Narrow, 1);
        if main_takes_args {
            writer.emit_opcode(Opcode::LoadLocal, Width::Narrow);
            writer.emit_index(Width::Narrow, 0);
        }
        writer.emit_opcode(Opcode::Call, Width::Narrow);
        writer.emit_index(Width::Narrow, 1);
        writer.emit_opcode(Opcode::Exit, Width::Narrow);
        code.extend(writer.into_bytes());
        let entry_module = ModuleId(modules.len() as u32);
        modules.push(ModuleRecord {
            name: ENTRY_MODULE.to_string(),
            uses: Vec::new(),
            class_refs: vec![main_class],
            field_names: Vec::new(),
            method_calls: vec![main_key],
            strings: Vec::new(),
        });

        let mut entry = entry;
        if self.options.optimize_branches {
            let (optimized, new_entry) = self.optimize_segment(&code, entry)?;
            code = optimized;
            entry = new_entry;
        }

        self.catalog.flatten_all(&self.symbols)?;
        debug!(
            classes = self.catalog.len(),
            code = code.len(),
            entry,
            "linked program"
        );

        Ok(Program {
            code,
            modules,
            catalog: self.catalog,
            symbols: self.symbols,
            entry,
            entry_module,
            main_class,
            main_takes_args,
        })
    }

    fn register_class(
        &mut self,
        module: ModuleId,
        base: usize,
        info: &ClassInfo,
    ) -> Result<ClassId, LoadError> {
        let module_name = &self.names[module.index()];
        let mut def = ClassDef::new(&info.name, module_name, module);
        let id = ClassId::new(self.catalog.len() as u32);

        let native_type = match &info.kind {
            ClassKind::Plain => None,
            ClassKind::Facade { native_type, .. } => Some(native_type),
            ClassKind::Implicit { host_type } => Some(host_type),
        };

        match native_type {
            Some(native_type) => {
                let facade =
                    self.facades
                        .get(native_type)
                        .ok_or_else(|| LoadError::UnknownFacade {
                            class: def.qualified.clone(),
                            native_type: native_type.clone(),
                        })?;
                self.declare_facade_members(&mut def, id, module, facade.as_ref())?;
                def.facade = Some(facade);
            }
            None => {
                for field in &info.fields {
                    let symbol = self.symbols.intern(&field.name);
                    def.declare_field(
                        &self.symbols,
                        symbol,
                        FieldSlot {
                            slot: field.number,
                            is_static: field.is_static,
                        },
                    )?;
                }
                for method in &info.methods {
                    let key = MethodKey::new(self.symbols.intern(&method.name), method.arg_count);
                    def.declare_method(
                        &self.symbols,
                        key,
                        MethodEntry {
                            module,
                            arg_count: method.arg_count,
                            body: MethodBody::Bytecode {
                                address: base + method.code_offset as usize,
                                local_count: method.local_count,
                            },
                            is_static: method.is_static,
                            declaring: id,
                        },
                    )?;
                }
            }
        }

        self.catalog.register(def)
    }

    fn declare_facade_members(
        &mut self,
        def: &mut ClassDef,
        id: ClassId,
        module: ModuleId,
        facade: &dyn Facade,
    ) -> Result<(), LoadError> {
        for (is_static, names) in [
            (true, facade.static_fields()),
            (false, facade.instance_fields()),
        ] {
            for (slot, name) in names.iter().enumerate() {
                let symbol = self.symbols.intern(name);
                def.declare_field(
                    &self.symbols,
                    symbol,
                    FieldSlot {
                        slot: slot as u32 + 1,
                        is_static,
                    },
                )?;
            }
        }
        for (is_static, sigs) in [
            (true, facade.static_methods()),
            (false, facade.instance_methods()),
        ] {
            for sig in sigs {
                let key = MethodKey::new(self.symbols.intern(&sig.name), sig.arity);
                // A signature offered both statically and per instance maps once
                def.methods.entry(key).or_insert(MethodEntry {
                    module,
                    arg_count: sig.arity,
                    body: MethodBody::Native,
                    is_static,
                    declaring: id,
                });
            }
        }
        Ok(())
    }

    /// Resolve a class name as seen from module `from`
    fn resolve_class(&self, from: usize, name: &str) -> Result<ClassId, LoadError> {
        if let Some(id) = self.catalog.find(name) {
            return Ok(id);
        }
        let own = format!("{}.{}", self.names[from], name);
        if let Some(id) = self.catalog.find(&own) {
            return Ok(id);
        }
        let mut candidates: Vec<(String, ClassId)> = self.uses[from]
            .iter()
            .filter_map(|used| {
                let qualified = format!("{}.{}", used, name);
                self.catalog.find(&qualified).map(|id| (qualified, id))
            })
            .collect();
        candidates.dedup_by(|a, b| a.1 == b.1);
        match candidates.len() {
            1 => Ok(candidates[0].1),
            0 => Err(LoadError::UnresolvedClass {
                module: self.names[from].clone(),
                name: name.to_string(),
            }),
            _ => Err(LoadError::AmbiguousClass {
                name: name.to_string(),
                candidates: candidates.into_iter().map(|(n, _)| n).collect(),
            }),
        }
    }

    /// First class of the main module with a static `main/1`, else `main/0`
    fn find_main(&mut self) -> Result<(ClassId, MethodKey), LoadError> {
        let main = self.symbols.intern(MAIN);
        let main_module = ModuleId(0);
        for arity in [1, 0] {
            let key = MethodKey::new(main, arity);
            for id in self.catalog.ids() {
                let class = self.catalog.get(id);
                if class.module != main_module || class.facade.is_some() {
                    continue;
                }
                if class.method(key).map_or(false, |m| m.is_static) {
                    return Ok((id, key));
                }
            }
        }
        Err(LoadError::MissingEntryPoint(self.names[0].clone()))
    }

    /// Branch-optimize the merged segment, moving method entries along
    fn optimize_segment(&mut self, code: &[u8], entry: usize) -> Result<(Vec<u8>, usize), LoadError> {
        let mut addresses: Vec<u32> = vec![entry as u32];
        for id in self.catalog.ids() {
            for method in self.catalog.get(id).methods.values() {
                if let MethodBody::Bytecode { address, .. } = method.body {
                    addresses.push(address as u32);
                }
            }
        }
        let optimized = optimize(code, &addresses)?;
        let moved: FxHashMap<u32, u32> = addresses
            .iter()
            .copied()
            .zip(optimized.entry_points.iter().copied())
            .collect();

        let ids: Vec<ClassId> = self.catalog.ids().collect();
        for id in ids {
            for method in self.catalog.get_mut(id).methods.values_mut() {
                if let MethodBody::Bytecode { address, .. } = &mut method.body {
                    if let Some(&new) = moved.get(&(*address as u32)) {
                        *address = new as usize;
                    }
                }
            }
        }
        debug!(
            passes = optimized.passes,
            bytes_saved = optimized.bytes_saved,
            "optimized merged code segment"
        );
        let entry = moved.get(&(entry as u32)).copied().unwrap_or(entry as u32) as usize;
        Ok((optimized.code, entry))
    }
}
