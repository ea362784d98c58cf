//! Integration tests for the green-thread scheduler
//!
//! Tests cover:
//! - fork/join with shared static and instance state
//! - Interleaving at nice, sleep and exit
//! - Monitors and deadlock detection

mod common;

use common::{declare_console, println, run, run_with, unit, APP};
use om_bytecode::{Opcode, UnitBuilder};
use om_core::{Value, VmError};

#[test]
fn test_fork_join_shares_static_fields() {
    let mut b = UnitBuilder::new(APP);
    let counter = b.field_ref("counter");
    let main_ref = b.class_ref("Main");
    let main = b.class("Main", None);
    b.static_field(main, "counter");
    b.begin_static_method(main, "main", 0, 1);
    let code = b.code();
    code.emit_fork();
    code.emit_store_local(1);
    code.emit_load_local(1);
    code.emit_push_int(0);
    let child = code.emit_jump(Opcode::Jce);
    // parent
    code.emit_load_local(1);
    code.emit_join();
    code.emit_load_class(main_ref);
    code.emit_load_field(counter);
    code.emit_ret_val();
    // child
    code.anchor(child);
    code.emit_load_class(main_ref);
    code.emit_push_int(7);
    code.emit_store_field(counter);
    code.emit_exit();

    assert!(matches!(run(b).value(), Value::Int(7)));
}

#[test]
fn test_join_sees_instance_field_written_by_child() {
    let mut b = UnitBuilder::new(APP);
    let value = b.field_ref("value");
    let cell = b.class("Cell", None);
    b.field(cell, "value");
    let cell_ref = b.class_ref("Cell");
    let main = b.class("Main", None);
    b.begin_static_method(main, "main", 0, 2);
    let code = b.code();
    code.emit_new(cell_ref);
    code.emit_store_local(1);
    code.emit_fork();
    code.emit_store_local(2);
    code.emit_load_local(2);
    code.emit_push_int(0);
    let child = code.emit_jump(Opcode::Jce);
    // parent
    code.emit_load_local(2);
    code.emit_join();
    code.emit_load_local(1);
    code.emit_load_field(value);
    code.emit_ret_val();
    // child
    code.anchor(child);
    code.emit_load_local(1);
    code.emit_push_int(41);
    code.emit_store_field(value);
    code.emit_exit();

    assert!(matches!(run(b).value(), Value::Int(41)));
}

#[test]
fn test_nice_and_exit_interleave() {
    let mut b = UnitBuilder::new(APP);
    declare_console(&mut b);
    let main = b.class("Main", None);
    b.begin_static_method(main, "main", 0, 1);
    let code = b.code();
    code.emit_fork();
    code.emit_store_local(1);
    code.emit_load_local(1);
    code.emit_push_int(0);
    let child = code.emit_jump(Opcode::Jce);
    println(&mut b, "parent 1");
    b.code().emit_nice();
    println(&mut b, "parent 2");
    let code = b.code();
    code.emit_load_local(1);
    code.emit_join();
    code.emit_ret();
    code.anchor(child);
    println(&mut b, "child");
    b.code().emit_exit();

    let run = run(b);
    assert_eq!(run.lines(), vec!["parent 1", "child", "parent 2"]);
    assert!(run.value().is_null());
}

#[test]
fn test_thread_ids() {
    let mut b = UnitBuilder::new(APP);
    let result = b.field_ref("child_id");
    let main_ref = b.class_ref("Main");
    let main = b.class("Main", None);
    b.static_field(main, "child_id");
    b.begin_static_method(main, "main", 0, 1);
    let code = b.code();
    code.emit_fork();
    code.emit_store_local(1);
    code.emit_load_local(1);
    code.emit_push_int(0);
    let child = code.emit_jump(Opcode::Jce);
    code.emit_load_local(1);
    code.emit_join();
    code.emit_thread_id();
    code.emit_load_local(1);
    code.emit_load_class(main_ref);
    code.emit_load_field(result);
    code.emit_make_array(3);
    code.emit_ret_val();
    code.anchor(child);
    code.emit_load_class(main_ref);
    code.emit_thread_id();
    code.emit_store_field(result);
    code.emit_exit();

    let ids = common::items(&run(b).value());
    assert!(matches!(ids[0], Value::Int(1)));
    assert!(matches!(ids[1], Value::Int(2)));
    assert!(matches!(ids[2], Value::Int(2)));
}

#[test]
fn test_sleeping_thread_wakes() {
    let mut b = UnitBuilder::new(APP);
    declare_console(&mut b);
    let main = b.class("Main", None);
    b.begin_static_method(main, "main", 0, 1);
    let code = b.code();
    code.emit_fork();
    code.emit_store_local(1);
    code.emit_load_local(1);
    code.emit_push_int(0);
    let child = code.emit_jump(Opcode::Jce);
    code.emit_load_local(1);
    code.emit_join();
    println(&mut b, "joined");
    b.code().emit_ret();
    b.code().anchor(child);
    b.code().emit_push_int(25);
    b.code().emit_sleep();
    println(&mut b, "woke");
    b.code().emit_exit();

    let run = run(b);
    assert_eq!(run.lines(), vec!["woke", "joined"]);
}

#[test]
fn test_time_slices_interleave_busy_threads() {
    // both threads spin 200 iterations; a small step budget forces switches
    let mut b = UnitBuilder::new(APP);
    let main = b.class("Main", None);
    let last = b.field_ref("last");
    let flips = b.field_ref("flips");
    let main_ref = b.class_ref("Main");
    b.static_field(main, "last");
    b.static_field(main, "flips");
    b.begin_static_method(main, "main", 0, 2);
    let code = b.code();
    code.emit_load_class(main_ref);
    code.emit_push_int(0);
    code.emit_store_field(flips);
    code.emit_load_class(main_ref);
    code.emit_push_int(0);
    code.emit_store_field(last);
    code.emit_fork();
    code.emit_store_local(1);
    code.emit_push_int(0);
    code.emit_store_local(2);
    let top = code.position();
    code.emit_load_local(2);
    code.emit_push_int(200);
    let done = code.emit_jump(Opcode::Jcge);
    // if last != threadid { flips += 1; last = threadid }
    code.emit_load_class(main_ref);
    code.emit_load_field(last);
    code.emit_thread_id();
    let same = code.emit_jump(Opcode::Jce);
    code.emit_load_class(main_ref);
    code.emit_load_class(main_ref);
    code.emit_load_field(flips);
    code.emit_push_int(1);
    code.emit_add();
    code.emit_store_field(flips);
    code.emit_load_class(main_ref);
    code.emit_thread_id();
    code.emit_store_field(last);
    code.anchor(same);
    code.emit_load_local(2);
    code.emit_push_int(1);
    code.emit_add();
    code.emit_store_local(2);
    code.jump_to(Opcode::Jmp, top);
    code.anchor(done);
    code.emit_load_local(1);
    code.emit_push_int(0);
    let child_exit = code.emit_jump(Opcode::Jce);
    code.emit_load_local(1);
    code.emit_join();
    code.emit_load_class(main_ref);
    code.emit_load_field(flips);
    code.emit_ret_val();
    code.anchor(child_exit);
    code.emit_exit();

    let run = run_with(vec![unit(b)], 25, &[]);
    match run.value() {
        Value::Int(flips) => assert!(flips > 2, "only {} switches", flips),
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn test_wait_signal() {
    let mut b = UnitBuilder::new(APP);
    let main_ref = b.class_ref("Main");
    let main = b.class("Main", None);
    b.begin_static_method(main, "main", 0, 0);
    let code = b.code();
    code.emit_load_class(main_ref);
    code.emit_wait();
    code.emit_load_class(main_ref);
    code.emit_signal();
    code.emit_load_class(main_ref);
    code.emit_wait();
    code.emit_load_class(main_ref);
    code.emit_signal();
    code.emit_push_int(1);
    code.emit_ret_val();

    assert!(matches!(run(b).value(), Value::Int(1)));
}

#[test]
fn test_monitor_blocks_other_thread() {
    let mut b = UnitBuilder::new(APP);
    declare_console(&mut b);
    let main_ref = b.class_ref("Main");
    let main = b.class("Main", None);
    b.begin_static_method(main, "main", 0, 1);
    let code = b.code();
    code.emit_load_class(main_ref);
    code.emit_wait();
    code.emit_fork();
    code.emit_store_local(1);
    code.emit_load_local(1);
    code.emit_push_int(0);
    let child = code.emit_jump(Opcode::Jce);
    code.emit_nice();
    println(&mut b, "parent releases");
    let code = b.code();
    code.emit_load_class(main_ref);
    code.emit_signal();
    code.emit_load_local(1);
    code.emit_join();
    code.emit_ret();
    code.anchor(child);
    code.emit_load_class(main_ref);
    code.emit_wait();
    println(&mut b, "child acquired");
    let code = b.code();
    code.emit_load_class(main_ref);
    code.emit_signal();
    code.emit_exit();

    assert_eq!(run(b).lines(), vec!["parent releases", "child acquired"]);
}

#[test]
fn test_signal_without_wait_is_a_fault() {
    let mut b = UnitBuilder::new(APP);
    let main_ref = b.class_ref("Main");
    let main = b.class("Main", None);
    b.begin_static_method(main, "main", 0, 0);
    let code = b.code();
    code.emit_load_class(main_ref);
    code.emit_signal();
    code.emit_ret();

    let err = run(b).result.unwrap_err();
    assert_eq!(err.error, VmError::MonitorNotHeld("app.Main".to_string()));
}

#[test]
fn test_self_deadlock_reported() {
    let mut b = UnitBuilder::new(APP);
    let main_ref = b.class_ref("Main");
    let main = b.class("Main", None);
    b.begin_static_method(main, "main", 0, 0);
    let code = b.code();
    code.emit_load_class(main_ref);
    code.emit_wait();
    code.emit_load_class(main_ref);
    code.emit_wait();
    code.emit_ret();

    let err = run(b).result.unwrap_err();
    assert_eq!(err.error, VmError::Deadlock(1));
}

#[test]
fn test_wait_on_integer_is_a_fault() {
    let mut b = UnitBuilder::new(APP);
    let main = b.class("Main", None);
    b.begin_static_method(main, "main", 0, 0);
    let code = b.code();
    code.emit_push_int(3);
    code.emit_wait();
    code.emit_ret();

    let err = run(b).result.unwrap_err();
    assert!(matches!(err.error, VmError::IllegalTarget { op: "wait", .. }));
}
