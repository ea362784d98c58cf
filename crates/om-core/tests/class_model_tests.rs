//! Integration tests for the class model
//!
//! Tests cover:
//! - Inheritance flattening of fields and methods
//! - Constructors and `super` views
//! - Static initialization and enumerations
//! - Facade classes
//! - Reflection opcodes

mod common;

use common::{declare_console, items, link, println, run, strings, APP};
use om_bytecode::{UnitBuilder, CONSTRUCTOR, STATIC_INITIALIZER};
use om_core::{Value, VmError};

/// `Base { x; <init>/1; get_x/0; name/0 }` and
/// `Derived : Base { y; <init>/2; sum/0; name/0 }`
fn shapes(b: &mut UnitBuilder) {
    let x = b.field_ref("x");
    let y = b.field_ref("y");
    let name = b.method_ref("name", 0);
    let base_text = b.string("base");
    let derived_text = b.string("+derived");

    let base = b.class("Base", None);
    b.field(base, "x");
    b.begin_method(base, CONSTRUCTOR, 1, 0);
    let code = b.code();
    code.emit_load_local(0);
    code.emit_load_local(1);
    code.emit_store_field(x);
    code.emit_ret_ctor();
    b.begin_method(base, "get_x", 0, 0);
    let code = b.code();
    code.emit_load_local(0);
    code.emit_load_field(x);
    code.emit_ret_val();
    b.begin_method(base, "name", 0, 0);
    let code = b.code();
    code.emit_push_string(base_text);
    code.emit_ret_val();

    let derived = b.class("Derived", Some("Base"));
    b.field(derived, "y");
    b.begin_method(derived, CONSTRUCTOR, 2, 0);
    let code = b.code();
    code.emit_load_local(0);
    code.emit_load_local(1);
    code.emit_store_field(x);
    code.emit_load_local(0);
    code.emit_load_local(2);
    code.emit_store_field(y);
    code.emit_ret_ctor();
    b.begin_method(derived, "sum", 0, 0);
    let code = b.code();
    code.emit_load_local(0);
    code.emit_load_field(x);
    code.emit_load_local(0);
    code.emit_load_field(y);
    code.emit_add();
    code.emit_ret_val();
    b.begin_method(derived, "name", 0, 0);
    let code = b.code();
    code.emit_load_local(0);
    code.emit_super();
    code.emit_call(name);
    code.emit_push_string(derived_text);
    code.emit_add();
    code.emit_ret_val();
}

#[test]
fn test_inherited_members_and_super() {
    let mut b = UnitBuilder::new(APP);
    shapes(&mut b);
    let derived_ref = b.class_ref("Derived");
    let ctor = b.method_ref(CONSTRUCTOR, 2);
    let get_x = b.method_ref("get_x", 0);
    let sum = b.method_ref("sum", 0);
    let name = b.method_ref("name", 0);
    let main = b.class("Main", None);
    b.begin_static_method(main, "main", 0, 1);
    let code = b.code();
    code.emit_new(derived_ref);
    code.emit_push_int(3);
    code.emit_push_int(4);
    code.emit_call(ctor);
    code.emit_store_local(1);
    code.emit_load_local(1);
    code.emit_call(get_x);
    code.emit_load_local(1);
    code.emit_call(sum);
    code.emit_add();
    code.emit_load_local(1);
    code.emit_call(name);
    code.emit_add();
    code.emit_ret_val();

    // 3 + 7 = 10, then "base+derived"
    assert_eq!(run(b).value().as_str(), Some("10base+derived"));
}

#[test]
fn test_flattened_slots() {
    let mut b = UnitBuilder::new(APP);
    shapes(&mut b);
    let main = b.class("Main", None);
    b.begin_static_method(main, "main", 0, 0);
    b.code().emit_ret();

    let (program, _) = link(vec![common::unit(b)], APP);
    let symbols = &program.symbols;
    let catalog = &program.catalog;
    let derived = catalog.get(catalog.find("app.Derived").unwrap());
    let x = derived.field(symbols.get("x").unwrap()).unwrap();
    let y = derived.field(symbols.get("y").unwrap()).unwrap();
    assert_eq!((x.slot, y.slot), (1, 2));
    assert_eq!(derived.instance_field_count, 2);

    let key = |name: &str, arity| om_core::MethodKey::new(symbols.get(name).unwrap(), arity);
    let base = catalog.find("app.Base").unwrap();
    assert_eq!(derived.method(key("get_x", 0)).unwrap().declaring, base);
    assert_ne!(derived.method(key("name", 0)).unwrap().declaring, base);
    // constructors are not inherited
    assert!(derived.method(key(CONSTRUCTOR, 1)).is_none());
    assert!(derived.method(key(CONSTRUCTOR, 2)).is_some());
}

#[test]
fn test_instance_field_on_class_value() {
    let mut b = UnitBuilder::new(APP);
    let x = b.field_ref("x");
    let point = b.class("Point", None);
    b.field(point, "x");
    let point_ref = b.class_ref("Point");
    let main = b.class("Main", None);
    b.begin_static_method(main, "main", 0, 0);
    let code = b.code();
    code.emit_load_class(point_ref);
    code.emit_load_field(x);
    code.emit_ret_val();

    let err = run(b).result.unwrap_err();
    assert!(matches!(err.error, VmError::NotStatic { .. }));
}

#[test]
fn test_call_on_null_receiver() {
    let mut b = UnitBuilder::new(APP);
    let get = b.method_ref("get", 0);
    let main = b.class("Main", None);
    b.begin_static_method(main, "main", 0, 0);
    let code = b.code();
    code.emit_push_null();
    code.emit_call(get);
    code.emit_ret_val();

    let err = run(b).result.unwrap_err();
    assert_eq!(err.error, VmError::NullReceiver("get/0".to_string()));
}

#[test]
fn test_static_initializer_runs_once() {
    let mut b = UnitBuilder::new(APP);
    declare_console(&mut b);
    let count = b.field_ref("count");
    let config_ref = b.class_ref("Config");
    let config = b.class("Config", None);
    b.static_field(config, "count");
    b.begin_static_method(config, STATIC_INITIALIZER, 0, 0);
    println(&mut b, "init");
    let code = b.code();
    code.emit_load_local(0);
    code.emit_push_int(41);
    code.emit_store_field(count);
    code.emit_ret();

    let main = b.class("Main", None);
    b.begin_static_method(main, "main", 0, 0);
    let code = b.code();
    code.emit_load_class(config_ref);
    code.emit_load_field(count);
    code.emit_load_class(config_ref);
    code.emit_load_field(count);
    code.emit_add();
    code.emit_ret_val();

    let run = run(b);
    assert_eq!(run.lines(), vec!["init"]);
    assert!(matches!(run.value(), Value::Int(82)));
}

#[test]
fn test_enum_values_populated_on_load() {
    let mut b = UnitBuilder::new(APP);
    b.enumeration("Color", &[("Red", 1), ("Green", 2), ("Blue", 4)]);
    let color = b.class_ref("Color");
    let green = b.field_ref("Green");
    let blue = b.field_ref("Blue");
    let main = b.class("Main", None);
    b.begin_static_method(main, "main", 0, 0);
    let code = b.code();
    code.emit_load_class(color);
    code.emit_load_field(green);
    code.emit_load_class(color);
    code.emit_load_field(blue);
    code.emit_add();
    code.emit_ret_val();

    assert!(matches!(run(b).value(), Value::Int(6)));
}

#[test]
fn test_console_facade_fields_and_methods() {
    let mut b = UnitBuilder::new(APP);
    declare_console(&mut b);
    let console = b.class_ref("Console");
    let prefix = b.field_ref("prefix");
    let lines = b.field_ref("lines");
    let arrow = b.string("> ");
    let hi = b.string("hi");
    let println = b.method_ref("println", 1);
    let main = b.class("Main", None);
    b.begin_static_method(main, "main", 0, 0);
    let code = b.code();
    code.emit_new(console);
    code.emit_dup();
    code.emit_push_string(arrow);
    code.emit_store_field(prefix);
    code.emit_push_string(hi);
    code.emit_call(println);
    code.emit_pop();
    code.emit_load_class(console);
    code.emit_load_field(lines);
    code.emit_ret_val();

    let run = run(b);
    assert_eq!(run.lines(), vec!["> hi"]);
    assert!(matches!(run.value(), Value::Long(1)));
}

#[test]
fn test_reflection() {
    let mut b = UnitBuilder::new(APP);
    let x = b.field_ref("x");
    let point = b.class("Point", None);
    b.field(point, "x");
    b.field(point, "y");
    b.static_field(point, "origin");
    b.begin_method(point, "scaled", 1, 0);
    let code = b.code();
    code.emit_load_local(0);
    code.emit_load_field(x);
    code.emit_load_local(1);
    code.emit_mul();
    code.emit_ret_val();
    b.begin_method(point, "reset", 0, 0);
    b.code().emit_ret();
    let point3 = b.class("Point3", Some("Point"));
    b.field(point3, "z");

    let point3_ref = b.class_ref("Point3");
    let x_name = b.string("x");
    let scaled = b.string("scaled");
    let reset = b.string("reset");
    let main = b.class("Main", None);
    b.begin_static_method(main, "main", 0, 1);
    let code = b.code();
    code.emit_new(point3_ref);
    code.emit_store_local(1);
    code.emit_load_local(1);
    code.emit_push_string(x_name);
    code.emit_push_int(5);
    code.emit_set_field();
    // [0] getfield
    code.emit_load_local(1);
    code.emit_push_string(x_name);
    code.emit_get_field();
    // [1] hierarchy, [2] fields, [3] methods
    code.emit_load_local(1);
    code.emit_hierarchy();
    code.emit_load_local(1);
    code.emit_fields();
    code.emit_load_local(1);
    code.emit_methods();
    // [4] invoke scaled(3), [5] invoke reset()
    code.emit_load_local(1);
    code.emit_push_string(scaled);
    code.emit_push_int(3);
    code.emit_make_array(1);
    code.emit_invoke();
    code.emit_load_local(1);
    code.emit_push_string(reset);
    code.emit_make_array(0);
    code.emit_invoke();
    code.emit_make_array(6);
    code.emit_ret_val();

    let result = items(&run(b).value());
    assert!(matches!(result[0], Value::Int(5)));
    assert_eq!(strings(&result[1]), vec!["app.Point3", "app.Point"]);
    assert_eq!(strings(&result[2]), vec!["origin", "x", "y", "z"]);
    assert_eq!(strings(&result[3]), vec!["reset/0", "scaled/1"]);
    assert!(matches!(result[4], Value::Int(15)));
    assert!(result[5].is_null());
}

#[test]
fn test_invoke_rejects_argument_count_beyond_arity_range() {
    let mut b = UnitBuilder::new(APP);
    let point = b.class("Point", None);
    b.begin_method(point, "reset", 0, 0);
    b.code().emit_ret();
    let point_ref = b.class_ref("Point");
    let reset = b.string("reset");
    let main = b.class("Main", None);
    b.begin_static_method(main, "main", 0, 0);
    let code = b.code();
    code.emit_new(point_ref);
    code.emit_push_string(reset);
    code.emit_push_int(65_536);
    code.emit_new_array();
    code.emit_invoke();
    code.emit_ret_val();

    let err = run(b).result.unwrap_err();
    assert!(matches!(err.error, VmError::TypeError(_)));
}

#[test]
fn test_instanceof() {
    let mut b = UnitBuilder::new(APP);
    b.class("Base", None);
    b.class("Derived", Some("Base"));
    let base_ref = b.class_ref("Base");
    let derived_ref = b.class_ref("Derived");
    let main = b.class("Main", None);
    b.begin_static_method(main, "main", 0, 0);
    let code = b.code();
    code.emit_new(derived_ref);
    code.emit_instance_of(base_ref);
    code.emit_new(base_ref);
    code.emit_instance_of(derived_ref);
    code.emit_push_null();
    code.emit_instance_of(base_ref);
    code.emit_make_array(3);
    code.emit_ret_val();

    let result = items(&run(b).value());
    assert!(matches!(result[0], Value::Bool(true)));
    assert!(matches!(result[1], Value::Bool(false)));
    assert!(matches!(result[2], Value::Bool(false)));
}
