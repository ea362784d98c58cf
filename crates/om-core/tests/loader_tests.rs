//! Integration tests for module resolution and linking

mod common;

use common::{link, unit, APP};
use om_bytecode::{CompiledUnit, Opcode, UnitBuilder};
use om_core::{
    FacadeRegistry, FileResolver, LoadError, Loader, LoaderOptions, MemoryResolver, TickSource,
    Value, Vm, VmOptions,
};
use std::fs;
use std::path::Path;

/// `lib.Util.twice(n)` returns `n * 2`
fn library() -> CompiledUnit {
    let mut b = UnitBuilder::new("lib");
    let util = b.class("Util", None);
    b.begin_static_method(util, "twice", 1, 0);
    let code = b.code();
    code.emit_load_local(1);
    code.emit_push_int(2);
    code.emit_mul();
    code.emit_ret_val();
    unit(b)
}

/// `app.Main.main()` returns `Util.twice(21)`
fn application() -> CompiledUnit {
    let mut b = UnitBuilder::new(APP);
    b.use_module("lib");
    let util = b.class_ref("Util");
    let twice = b.method_ref("twice", 1);
    let main = b.class("Main", None);
    b.begin_static_method(main, "main", 0, 0);
    let code = b.code();
    code.emit_load_class(util);
    code.emit_push_int(21);
    code.emit_call(twice);
    code.emit_ret_val();
    unit(b)
}

fn write_unit(dir: &Path, name: &str, unit: &CompiledUnit) {
    fs::write(dir.join(format!("{}.om", name)), unit.encode()).unwrap();
}

fn run(program: om_core::Program) -> Value {
    Vm::new(program, VmOptions::default().with_tick(TickSource::Steps(1000)))
        .run(&[])
        .unwrap()
}

#[test]
fn test_links_modules_from_search_path() {
    let libs = tempfile::tempdir().unwrap();
    let apps = tempfile::tempdir().unwrap();
    write_unit(libs.path(), "lib", &library());
    write_unit(apps.path(), APP, &application());

    let resolver = FileResolver::new(vec![apps.path().to_path_buf(), libs.path().to_path_buf()]);
    let program = Loader::new(resolver, LoaderOptions::default())
        .load(APP)
        .unwrap();
    assert_eq!(program.modules.len(), 3);
    assert!(program.find_module("lib").is_some());
    assert!(matches!(run(program), Value::Int(42)));
}

#[test]
fn test_unoptimized_program_runs_the_same() {
    let mut resolver = MemoryResolver::new();
    resolver.add(library()).unwrap();
    resolver.add(application()).unwrap();
    let program = Loader::new(resolver, LoaderOptions::default().with_optimize(false))
        .load(APP)
        .unwrap();
    assert!(matches!(run(program), Value::Int(42)));
}

#[test]
fn test_missing_module() {
    let dir = tempfile::tempdir().unwrap();
    write_unit(dir.path(), APP, &application());
    let resolver = FileResolver::new(vec![dir.path().to_path_buf()]);

    match Loader::new(resolver, LoaderOptions::default()).load(APP) {
        Err(LoadError::ModuleNotFound { name, searched }) => {
            assert_eq!(name, "lib");
            assert_eq!(searched, vec![dir.path().join("lib.om")]);
        }
        other => panic!("unexpected {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_file_named_after_another_module() {
    let dir = tempfile::tempdir().unwrap();
    write_unit(dir.path(), "lib", &library());
    write_unit(dir.path(), APP, &library());
    let resolver = FileResolver::new(vec![dir.path().to_path_buf()]);

    match Loader::new(resolver, LoaderOptions::default()).load(APP) {
        Err(LoadError::NameMismatch { requested, found }) => {
            assert_eq!(requested, APP);
            assert_eq!(found, "lib");
        }
        other => panic!("unexpected {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_corrupt_unit_file() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("app.om"), b"XX\x00\x00").unwrap();
    let resolver = FileResolver::new(vec![dir.path().to_path_buf()]);
    assert!(matches!(
        Loader::new(resolver, LoaderOptions::default()).load(APP),
        Err(LoadError::Unit { .. })
    ));
}

#[test]
fn test_ambiguous_short_name() {
    let mut other = UnitBuilder::new("other");
    let util = other.class("Util", None);
    other.begin_static_method(util, "twice", 1, 0);
    other.code().emit_push_int(0);
    other.code().emit_ret_val();

    let mut b = UnitBuilder::new(APP);
    b.use_module("lib");
    b.use_module("other");
    let util_ref = b.class_ref("Util");
    let main = b.class("Main", None);
    b.begin_static_method(main, "main", 0, 0);
    b.code().emit_load_class(util_ref);
    b.code().emit_ret_val();

    let mut resolver = MemoryResolver::new();
    resolver.add(library()).unwrap();
    resolver.add(unit(other)).unwrap();
    resolver.add(unit(b)).unwrap();
    match Loader::new(resolver, LoaderOptions::default()).load(APP) {
        Err(LoadError::AmbiguousClass { name, mut candidates }) => {
            assert_eq!(name, "Util");
            candidates.sort();
            assert_eq!(candidates, vec!["lib.Util", "other.Util"]);
        }
        other => panic!("unexpected {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_qualified_reference_resolves_ambiguity() {
    let mut b = UnitBuilder::new(APP);
    b.use_module("lib");
    let util = b.class_ref("lib.Util");
    let twice = b.method_ref("twice", 1);
    let main = b.class("Main", None);
    b.begin_static_method(main, "main", 0, 0);
    let code = b.code();
    code.emit_load_class(util);
    code.emit_push_int(4);
    code.emit_call(twice);
    code.emit_ret_val();

    let (program, _) = link(vec![library(), unit(b)], APP);
    assert!(matches!(run(program), Value::Int(8)));
}

#[test]
fn test_missing_entry_point() {
    let mut b = UnitBuilder::new(APP);
    let main = b.class("Main", None);
    b.begin_method(main, "main", 0, 0);
    b.code().emit_ret();

    let mut resolver = MemoryResolver::new();
    resolver.add(unit(b)).unwrap();
    match Loader::new(resolver, LoaderOptions::default()).load(APP) {
        Err(LoadError::MissingEntryPoint(module)) => assert_eq!(module, APP),
        other => panic!("unexpected {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_main_with_args_preferred() {
    let mut b = UnitBuilder::new(APP);
    let main = b.class("Main", None);
    b.begin_static_method(main, "main", 0, 0);
    b.code().emit_push_int(0);
    b.code().emit_ret_val();
    b.begin_static_method(main, "main", 1, 0);
    b.code().emit_load_local(1);
    b.code().emit_array_length();
    b.code().emit_ret_val();

    let (program, _) = link(vec![unit(b)], APP);
    assert!(program.main_takes_args);
    let value = Vm::new(program, VmOptions::default().with_tick(TickSource::Steps(1000)))
        .run(&["a".to_string(), "b".to_string()])
        .unwrap();
    assert!(matches!(value, Value::Int(2)));
}

#[test]
fn test_unregistered_facade() {
    let mut b = UnitBuilder::new(APP);
    b.facade_class("Socket", None, "net.Socket", "");
    let main = b.class("Main", None);
    b.begin_static_method(main, "main", 0, 0);
    b.code().emit_ret();

    let mut resolver = MemoryResolver::new();
    resolver.add(unit(b)).unwrap();
    let loader =
        Loader::new(resolver, LoaderOptions::default()).with_facades(FacadeRegistry::new());
    match loader.load(APP) {
        Err(LoadError::UnknownFacade { class, native_type }) => {
            assert_eq!(class, "app.Socket");
            assert_eq!(native_type, "net.Socket");
        }
        other => panic!("unexpected {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_inheritance_cycle_rejected() {
    let mut b = UnitBuilder::new(APP);
    b.class("A", Some("B"));
    b.class("B", Some("A"));
    let main = b.class("Main", None);
    b.begin_static_method(main, "main", 0, 0);
    b.code().emit_ret();

    let mut resolver = MemoryResolver::new();
    resolver.add(unit(b)).unwrap();
    assert!(matches!(
        Loader::new(resolver, LoaderOptions::default()).load(APP),
        Err(LoadError::InheritanceCycle(_))
    ));
}

#[test]
fn test_entry_survives_optimization() {
    // a long forward jump that the optimizer narrows ahead of the entry
    let mut b = UnitBuilder::new(APP);
    let main = b.class("Main", None);
    b.begin_static_method(main, "main", 0, 0);
    let code = b.code();
    let skip = code.emit_jump(Opcode::Jmp);
    for _ in 0..8 {
        code.emit_nop();
    }
    code.anchor(skip);
    code.emit_push_int(9);
    code.emit_ret_val();

    let (program, _) = link(vec![unit(b)], APP);
    assert!(matches!(run(program), Value::Int(9)));
}
