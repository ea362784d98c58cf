//! Shared helpers for the om-core integration tests
#![allow(dead_code)]

use om_bytecode::{CompiledUnit, UnitBuilder};
use om_core::facade::ConsoleBuffer;
use om_core::{
    ConsoleFacade, FacadeRegistry, Loader, LoaderOptions, MemoryResolver, Program, RunError,
    TickSource, Value, Vm, VmOptions,
};
use std::rc::Rc;

/// Module name used by single-module tests
pub const APP: &str = "app";

/// Outcome of running a program with a captured console
pub struct Run {
    pub result: Result<Value, RunError>,
    pub console: ConsoleBuffer,
}

impl Run {
    pub fn value(self) -> Value {
        match self.result {
            Ok(value) => value,
            Err(e) => panic!("run failed: {} at {:?}", e, e.backtrace),
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.console.lines()
    }
}

/// Finish a unit builder
pub fn unit(builder: UnitBuilder) -> CompiledUnit {
    builder.finish().expect("unit builds")
}

/// Link `main` from the given units with a capturing console
pub fn link(units: Vec<CompiledUnit>, main: &str) -> (Program, ConsoleBuffer) {
    let mut resolver = MemoryResolver::new();
    for unit in units {
        resolver.add(unit).expect("unit metadata decodes");
    }
    let (console, buffer) = ConsoleFacade::capture();
    let mut facades = FacadeRegistry::new();
    facades.register(Rc::new(console));
    let program = Loader::new(resolver, LoaderOptions::default())
        .with_facades(facades)
        .load(main)
        .expect("program links");
    (program, buffer)
}

/// Run with a deterministic step clock
pub fn run_with(units: Vec<CompiledUnit>, steps: u64, args: &[&str]) -> Run {
    let (program, console) = link(units, APP);
    let vm = Vm::new(program, VmOptions::default().with_tick(TickSource::Steps(steps)));
    let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
    Run {
        result: vm.run(&args),
        console,
    }
}

/// Run the single module `app`
pub fn run(builder: UnitBuilder) -> Run {
    run_with(vec![unit(builder)], 10_000, &[])
}

/// Emit `Console.println(<string>)` leaving the stack unchanged
pub fn println(b: &mut UnitBuilder, text: &str) {
    let console = b.class_ref("Console");
    let string = b.string(text);
    let println = b.method_ref("println", 1);
    let code = b.code();
    code.emit_load_class(console);
    code.emit_push_string(string);
    code.emit_call(println);
    code.emit_pop();
}

/// Emit `Console.println(<top of stack>)`, consuming it
pub fn println_top(b: &mut UnitBuilder) {
    let console = b.class_ref("Console");
    let println = b.method_ref("println", 1);
    let code = b.code();
    code.emit_load_class(console);
    code.emit_swap();
    code.emit_call(println);
    code.emit_pop();
}

/// Declare the console facade class in a unit
pub fn declare_console(b: &mut UnitBuilder) {
    b.facade_class("Console", None, om_core::facade::CONSOLE_TYPE, "");
}

/// Elements of an array value
pub fn items(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.borrow().clone(),
        other => panic!("expected an array, got {:?}", other),
    }
}

/// Strings of an array value
pub fn strings(value: &Value) -> Vec<String> {
    items(value).iter().map(|v| v.to_string()).collect()
}
