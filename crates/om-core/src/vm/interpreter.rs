//! Virtual machine interpreter

use crate::loader::{ModuleRecord, Program};
use crate::options::VmOptions;
use crate::scheduler::{Clock, Scheduler, ThreadContext, ThreadId};
use crate::symbols::Symbol;
use crate::value::Value;
use crate::{RunError, VmError, VmResult};
use om_bytecode::{Instruction, Opcode, Operand, CONSTRUCTOR, STATIC_INITIALIZER};
use tracing::{debug, trace};

/// What the run loop does after an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpcodeResult {
    /// Keep running the current thread
    Continue,
    /// The current thread blocked, yielded or exited; pick another
    Yield,
    /// The last thread exited
    Halt,
}

/// OM virtual machine
pub struct Vm {
    program: Program,
    options: VmOptions,
}

impl Vm {
    /// Create a VM for a linked program
    pub fn new(program: Program, options: VmOptions) -> Self {
        Self { program, options }
    }

    /// The linked program
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Execution options
    pub fn options(&self) -> &VmOptions {
        &self.options
    }

    /// Run the entry sequence until the last thread exits
    ///
    /// `args` become the string array handed to `main`. Returns the value
    /// left on top of the main thread's stack when it exited, or null.
    pub fn run(&self, args: &[String]) -> Result<Value, RunError> {
        let program = &self.program;
        let clock = Clock::start(self.options.tick)?;

        let mut main = ThreadContext::new(
            ThreadId::MAIN,
            program.entry,
            program.entry_module,
            self.options.max_stack,
        );
        main.stack
            .push(Value::array(args.iter().map(Value::string).collect()))?;

        debug!(
            main = program.catalog.name(program.main_class),
            args = args.len(),
            "starting program"
        );
        let scheduler = Scheduler::new(main, self.options.max_threads);
        Interpreter::new(program, &self.options, scheduler, clock).run()
    }
}

/// Execution state of one run
pub(crate) struct Interpreter<'a> {
    pub(super) program: &'a Program,
    pub(super) options: &'a VmOptions,
    pub(super) scheduler: Scheduler,
    pub(super) clock: Clock,
    /// Captured when the main thread exits
    pub(super) result: Value,
    pub(super) constructor: Option<Symbol>,
    pub(super) initializer: Option<Symbol>,
}

impl<'a> Interpreter<'a> {
    fn new(
        program: &'a Program,
        options: &'a VmOptions,
        scheduler: Scheduler,
        clock: Clock,
    ) -> Self {
        Self {
            program,
            options,
            scheduler,
            clock,
            result: Value::Null,
            constructor: program.symbols.get(CONSTRUCTOR),
            initializer: program.symbols.get(STATIC_INITIALIZER),
        }
    }

    fn run(mut self) -> Result<Value, RunError> {
        match self.run_loop() {
            Ok(()) => Ok(self.result),
            Err(error) => {
                let thread = self.scheduler.current();
                let backtrace = thread.call_trace(&self.program.catalog, &self.program.symbols);
                debug!(thread = %thread.id, %error, "run aborted");
                Err(RunError { error, backtrace })
            }
        }
    }

    fn run_loop(&mut self) -> VmResult<()> {
        loop {
            if self.clock.take_reschedule() && self.reschedule()?.is_none() {
                return Ok(());
            }

            let program = self.program;
            let ip = self.scheduler.current().ip;
            let instr = Instruction::decode_at(&program.code, ip)
                .map_err(|error| VmError::InvalidInstruction { offset: ip, error })?;
            self.scheduler.current_mut().ip = instr.offset + instr.size();
            self.clock.step();

            trace!(thread = %self.scheduler.current().id, "{}", instr);
            match self.execute(&instr)? {
                OpcodeResult::Continue => {}
                OpcodeResult::Yield => {
                    if self.reschedule()?.is_none() {
                        return Ok(());
                    }
                }
                OpcodeResult::Halt => return Ok(()),
            }
        }
    }

    fn reschedule(&mut self) -> VmResult<Option<ThreadId>> {
        self.scheduler.schedule(&mut self.clock)
    }

    fn execute(&mut self, instr: &Instruction) -> VmResult<OpcodeResult> {
        use Opcode::*;
        match instr.opcode {
            Nop | Pop | Dup | Swap | PushNull | PushTrue | PushFalse | PushByte | PushChar
            | PushShort | PushInt | PushLong | PushDouble | PushString | LoadLocal
            | StoreLocal => self.exec_stack_ops(instr),

            Add | Sub | Mul | Div | Mod | Neg | Not | Convert | Ce | Cne | Cl | Cle | Cg
            | Cge => self.exec_arithmetic_ops(instr),

            Jmp | Jt | Jf | Jce | Jcne | Jcl | Jcle | Jcg | Jcge | Case | Ret | RetVal
            | RetCtor => self.exec_control_ops(instr),

            LoadClass | New | Call | Super => self.exec_call_ops(instr),

            LoadField | StoreField | InstanceOf => self.exec_object_ops(instr),

            EnterTry | LeaveTry | LeaveCatch | LeaveFinally | Throw | Rethrow => {
                self.exec_exception_ops(instr)
            }

            NewArray | ArrayLoad | ArrayStore | ArrayLength | MakeArray => {
                self.exec_array_ops(instr)
            }

            Fork | Join | Exit | Nice | Sleep | Wait | Signal | ThreadId => {
                self.exec_concurrency_ops(instr)
            }

            Hierarchy | Fields | Methods | GetField | SetField | Invoke => {
                self.exec_reflection_ops(instr)
            }
        }
    }

    // ===== Helpers shared by the handler modules =====

    /// The running thread
    #[inline]
    pub(super) fn thread(&mut self) -> &mut ThreadContext {
        self.scheduler.current_mut()
    }

    #[inline]
    pub(super) fn push(&mut self, value: Value) -> VmResult<()> {
        self.scheduler.current_mut().stack.push(value)
    }

    #[inline]
    pub(super) fn pop(&mut self) -> VmResult<Value> {
        self.scheduler.current_mut().stack.pop()
    }

    /// Tables of the module the current code belongs to
    pub(super) fn module(&self) -> &'a ModuleRecord {
        self.program.module(self.scheduler.current().module)
    }

    /// Render a value for messages and string concatenation
    pub(super) fn describe(&self, value: &Value) -> String {
        self.program.describe(value)
    }

    /// Index or slot operand
    pub(super) fn index_operand(instr: &Instruction) -> u32 {
        match instr.operand {
            Operand::Index(index) => index,
            _ => 0,
        }
    }

    /// Absolute target of a relative offset
    pub(super) fn target(instr: &Instruction, offset: i32) -> usize {
        (instr.offset as i64 + offset as i64).max(0) as usize
    }
}
