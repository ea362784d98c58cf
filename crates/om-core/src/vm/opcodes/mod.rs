//! Opcode handler modules for the interpreter
//!
//! Each module implements one opcode family as methods on `Interpreter`.

mod arithmetic;
mod arrays;
mod calls;
mod concurrency;
mod control_flow;
mod exceptions;
mod objects;
mod reflection;
mod stack;
