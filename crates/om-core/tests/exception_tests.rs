//! Integration tests for try/catch/finally
//!
//! Tests cover:
//! - Catching thrown values, within a frame and across calls
//! - The finally body running exactly once on fall-through, return,
//!   branch out and nested throw
//! - Uncaught exceptions and illegal phase transitions

mod common;

use common::{declare_console, println, println_top, run, APP};
use om_bytecode::{Opcode, UnitBuilder};
use om_core::{Value, VmError};

fn app() -> (UnitBuilder, om_bytecode::ClassHandle) {
    let mut b = UnitBuilder::new(APP);
    declare_console(&mut b);
    let main = b.class("Main", None);
    (b, main)
}

#[test]
fn test_throw_caught_then_finally() {
    // s = 0; try { throw "boom" } catch { s = s + 1 } finally { print } return s
    let (mut b, main) = app();
    let boom = b.string("boom");
    b.begin_static_method(main, "main", 0, 1);
    let code = b.code();
    code.emit_push_int(0);
    code.emit_store_local(1);
    let labels = code.enter_try(true);
    code.emit_push_string(boom);
    code.emit_throw();
    code.emit_leave_try();
    code.anchor(labels.catch.unwrap());
    code.emit_pop();
    code.emit_load_local(1);
    code.emit_push_int(1);
    code.emit_add();
    code.emit_store_local(1);
    code.emit_leave_catch();
    code.anchor(labels.finally);
    println(&mut b, "finally");
    let code = b.code();
    code.emit_leave_finally();
    code.emit_load_local(1);
    code.emit_ret_val();

    let run = run(b);
    assert_eq!(run.lines(), vec!["finally"]);
    assert!(matches!(run.value(), Value::Int(1)));
}

#[test]
fn test_finally_on_fall_through() {
    let (mut b, main) = app();
    b.begin_static_method(main, "main", 0, 0);
    let labels = b.code().enter_try(false);
    println(&mut b, "body");
    let code = b.code();
    code.emit_leave_try();
    code.anchor(labels.finally);
    println(&mut b, "finally");
    b.code().emit_leave_finally();
    println(&mut b, "after");
    b.code().emit_ret();

    assert_eq!(run(b).lines(), vec!["body", "finally", "after"]);
}

#[test]
fn test_return_inside_try_runs_finally() {
    let (mut b, main) = app();
    let main_ref = b.class_ref("Main");
    let compute = b.method_ref("compute", 0);
    b.begin_static_method(main, "main", 0, 0);
    let code = b.code();
    code.emit_load_class(main_ref);
    code.emit_call(compute);
    code.emit_ret_val();

    b.begin_static_method(main, "compute", 0, 0);
    let code = b.code();
    let labels = code.enter_try(false);
    code.emit_push_int(10);
    code.emit_ret_val();
    code.emit_leave_try();
    code.anchor(labels.finally);
    println(&mut b, "finally");
    let code = b.code();
    code.emit_leave_finally();
    code.emit_push_int(99);
    code.emit_ret_val();

    let run = run(b);
    assert_eq!(run.lines(), vec!["finally"]);
    assert!(matches!(run.value(), Value::Int(10)));
}

#[test]
fn test_return_inside_catch_runs_finally_once() {
    let (mut b, main) = app();
    let oops = b.string("oops");
    b.begin_static_method(main, "main", 0, 0);
    let code = b.code();
    let labels = code.enter_try(true);
    code.emit_push_string(oops);
    code.emit_throw();
    code.emit_leave_try();
    code.anchor(labels.catch.unwrap());
    code.emit_pop();
    code.emit_push_int(5);
    code.emit_ret_val();
    code.emit_leave_catch();
    code.anchor(labels.finally);
    println(&mut b, "finally");
    let code = b.code();
    code.emit_leave_finally();
    code.emit_push_int(0);
    code.emit_ret_val();

    let run = run(b);
    assert_eq!(run.lines(), vec!["finally"]);
    assert!(matches!(run.value(), Value::Int(5)));
}

#[test]
fn test_branch_out_of_try_runs_finally_each_time() {
    // i = 0; loop { try { i += 1; if i == 3 break } finally { print } }
    let (mut b, main) = app();
    b.begin_static_method(main, "main", 0, 1);
    let code = b.code();
    code.emit_push_int(0);
    code.emit_store_local(1);
    let top = code.position();
    let labels = code.enter_try(false);
    code.emit_load_local(1);
    code.emit_push_int(1);
    code.emit_add();
    code.emit_store_local(1);
    code.emit_load_local(1);
    code.emit_push_int(3);
    let done = code.emit_jump(Opcode::Jce);
    code.emit_leave_try();
    code.anchor(labels.finally);
    println(&mut b, "finally");
    let code = b.code();
    code.emit_leave_finally();
    code.jump_to(Opcode::Jmp, top);
    code.anchor(done);
    code.emit_load_local(1);
    code.emit_ret_val();

    let run = run(b);
    assert_eq!(run.lines(), vec!["finally", "finally", "finally"]);
    assert!(matches!(run.value(), Value::Int(3)));
}

#[test]
fn test_nested_throw_from_catch() {
    let (mut b, main) = app();
    let first = b.string("first");
    let second = b.string("second");
    b.begin_static_method(main, "main", 0, 0);
    let code = b.code();
    let outer = code.enter_try(true);
    let inner = code.enter_try(true);
    code.emit_push_string(first);
    code.emit_throw();
    code.emit_leave_try();
    code.anchor(inner.catch.unwrap());
    code.emit_pop();
    code.emit_push_string(second);
    code.emit_throw();
    code.emit_leave_catch();
    code.anchor(inner.finally);
    println(&mut b, "inner finally");
    let code = b.code();
    code.emit_leave_finally();
    code.emit_leave_try();
    code.anchor(outer.catch.unwrap());
    println_top(&mut b);
    b.code().emit_leave_catch();
    b.code().anchor(outer.finally);
    println(&mut b, "outer finally");
    let code = b.code();
    code.emit_leave_finally();
    code.emit_push_int(1);
    code.emit_ret_val();

    let run = run(b);
    assert_eq!(run.lines(), vec!["inner finally", "second", "outer finally"]);
    assert!(matches!(run.value(), Value::Int(1)));
}

#[test]
fn test_exception_unwinds_calls() {
    let (mut b, main) = app();
    let main_ref = b.class_ref("Main");
    let fail = b.method_ref("fail", 1);
    let deep = b.string("deep");
    b.begin_static_method(main, "main", 0, 1);
    let code = b.code();
    let labels = code.enter_try(true);
    code.emit_load_class(main_ref);
    code.emit_push_int(3);
    code.emit_call(fail);
    code.emit_pop();
    code.emit_leave_try();
    code.anchor(labels.catch.unwrap());
    code.emit_store_local(1);
    code.emit_leave_catch();
    code.anchor(labels.finally);
    code.emit_leave_finally();
    code.emit_load_local(1);
    code.emit_ret_val();

    // fail(n) recurses n times, then throws
    b.begin_static_method(main, "fail", 1, 0);
    let code = b.code();
    code.emit_load_local(1);
    code.emit_push_int(0);
    let bottom = code.emit_jump(Opcode::Jce);
    code.emit_load_class(main_ref);
    code.emit_load_local(1);
    code.emit_push_int(1);
    code.emit_sub();
    code.emit_call(fail);
    code.emit_ret_val();
    code.anchor(bottom);
    code.emit_push_string(deep);
    code.emit_throw();

    assert_eq!(run(b).value().as_str(), Some("deep"));
}

#[test]
fn test_try_without_catch_propagates_after_finally() {
    let (mut b, main) = app();
    let lost = b.string("lost");
    b.begin_static_method(main, "main", 0, 0);
    let code = b.code();
    let labels = code.enter_try(false);
    code.emit_push_string(lost);
    code.emit_throw();
    code.emit_leave_try();
    code.anchor(labels.finally);
    println(&mut b, "finally");
    b.code().emit_leave_finally();
    b.code().emit_ret();

    let run = run(b);
    assert_eq!(run.lines(), vec!["finally"]);
    let err = run.result.unwrap_err();
    assert_eq!(err.error, VmError::UncaughtException("lost".to_string()));
}

#[test]
fn test_uncaught_exception_aborts() {
    let (mut b, main) = app();
    let oops = b.string("oops");
    b.begin_static_method(main, "main", 0, 0);
    let code = b.code();
    code.emit_push_string(oops);
    code.emit_throw();

    let err = run(b).result.unwrap_err();
    assert_eq!(err.error, VmError::UncaughtException("oops".to_string()));
}

#[test]
fn test_rethrow_outside_catch_is_a_fault() {
    let (mut b, main) = app();
    b.begin_static_method(main, "main", 0, 0);
    b.code().emit_rethrow();

    let err = run(b).result.unwrap_err();
    assert_eq!(err.error, VmError::IllegalExceptionState("rethrow"));
}

#[test]
fn test_rethrow_reaches_outer_handler() {
    let (mut b, main) = app();
    let inner_value = b.string("inner");
    b.begin_static_method(main, "main", 0, 1);
    let code = b.code();
    let outer = code.enter_try(true);
    let inner = code.enter_try(true);
    code.emit_push_string(inner_value);
    code.emit_throw();
    code.emit_leave_try();
    code.anchor(inner.catch.unwrap());
    code.emit_pop();
    code.emit_rethrow();
    code.emit_leave_catch();
    code.anchor(inner.finally);
    println(&mut b, "inner finally");
    let code = b.code();
    code.emit_leave_finally();
    code.emit_leave_try();
    code.anchor(outer.catch.unwrap());
    code.emit_store_local(1);
    code.emit_leave_catch();
    code.anchor(outer.finally);
    code.emit_leave_finally();
    code.emit_load_local(1);
    code.emit_ret_val();

    let run = run(b);
    assert_eq!(run.lines(), vec!["inner finally"]);
    assert_eq!(run.value().as_str(), Some("inner"));
}
