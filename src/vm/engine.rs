//! VM Engine Core
//!
//! This module contains the shared VM state and the instruction dispatch loop.
//!
//! ## Architecture
//!
//! Register-style execution modelled on the Zend VM:
//! - **Execution contexts**: one [`ExecutionContext`] per activation (script,
//!   function, method, closure, included file, generator body) holding its own
//!   variable and temporary slots
//! - **Shared state**: globals, function table, class registry, static
//!   properties, constants and reference cells live on the [`VM`]
//! - **Nested calls**: synchronous recursion, a fresh context per call
//!
//! ## Delegated Responsibilities
//!
//! - **Operand resolution**: [`operand`](crate::vm::operand) - read/write by operand kind, places
//! - **Arithmetic operations**: [`opcodes::arithmetic`](crate::vm::opcodes::arithmetic)
//! - **Bitwise and logical operations**: [`opcodes::bitwise`](crate::vm::opcodes::bitwise)
//! - **Comparison operations**: [`opcodes::comparison`](crate::vm::opcodes::comparison)
//! - **Jumps, switch/match and foreach**: [`opcodes::control_flow`](crate::vm::opcodes::control_flow)
//! - **Array operations**: [`opcodes::array_ops`](crate::vm::opcodes::array_ops)
//! - **Echo, exit, ropes, constants, include**: [`opcodes::special`](crate::vm::opcodes::special)
//! - **Variables**: [`variable_ops`](crate::vm::variable_ops)
//! - **Call protocol**: [`callable`](crate::vm::callable)
//! - **Objects and static properties**: [`class_resolution`](crate::vm::class_resolution)
//! - **Exceptions**: [`exception`](crate::vm::exception)
//! - **Generators**: [`generator`](crate::vm::generator)
//!
//! ## Error Handling
//!
//! - **No Panics**: malformed bytecode and runtime faults return [`VmError`]
//! - **Language exceptions** travel as [`VmError::Exception`] until a handler
//!   in some activation catches them
//! - **Diagnostics** (notices, warnings) go through [`ErrorHandler`]
//!
//! ## References
//!
//! - Zend VM: `$PHP_SRC_PATH/Zend/zend_execute.c` - Main execution loop
//! - Zend VM handlers: `$PHP_SRC_PATH/Zend/zend_vm_def.h`

use crate::compiler::chunk::{CodeChunk, Program, UserFunc};
use crate::core::heap::{Arena, Handle};
use crate::core::value::Val;
use crate::runtime::context::{ClassRegistry, InMemoryClassRegistry};
use crate::runtime::include::SourceCompiler;
use crate::runtime::registry::{BuiltinRegistry, ExtensionRegistry};
use crate::vm::assign_op::BinaryOp;
use crate::vm::frame::ExecutionContext;
use crate::vm::inc_dec::IncDecOp;
use crate::vm::opcode::{Instruction, OpCode};
use crate::vm::opcodes::comparison::CompareOp;
use crate::vm::opcodes::control_flow::CondJump;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::io::{self, Write};
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VmError {
    /// Wrong operand type for an operation
    #[error("Type error in {operation}: expected {expected}, got {got}")]
    TypeError {
        expected: String,
        got: String,
        operation: &'static str,
    },
    #[error("Undefined variable: ${name}")]
    UndefinedVariable { name: String },
    #[error("Call to undefined function {name}()")]
    UndefinedFunction { name: String },
    #[error("Class \"{name}\" not found")]
    UndefinedClass { name: String },
    #[error("Call to undefined method {class}::{method}()")]
    UndefinedMethod { class: String, method: String },
    #[error("Undefined property: {class}::${property}")]
    UndefinedProperty { class: String, property: String },
    #[error("Undefined constant \"{name}\"")]
    UndefinedConstant { name: String },
    #[error("Division by zero")]
    DivisionByZero,
    #[error("Modulo by zero")]
    ModuloByZero,
    #[error(
        "Too few arguments to function {function}(), {passed} passed and at least {expected} expected"
    )]
    MissingArgument {
        function: String,
        passed: usize,
        expected: usize,
    },
    #[error("Unsupported opcode {0:?}")]
    UnsupportedOpcode(OpCode),
    #[error("Not implemented: {0}")]
    NotImplemented(String),
    #[error("Instruction limit of {0} exceeded")]
    InstructionLimit(u64),
    /// Generic runtime error
    #[error("{0}")]
    RuntimeError(String),
    /// Language-level exception object in flight
    #[error("{}", describe_exception(.0))]
    Exception(Val),
}

fn describe_exception(val: &Val) -> String {
    match val {
        Val::Object(obj) => {
            let obj = obj.borrow();
            let message = match obj.get("message") {
                Some(Val::String(s)) => String::from_utf8_lossy(s).into_owned(),
                _ => String::new(),
            };
            format!(
                "Uncaught exception '{}' with message '{}'",
                obj.class, message
            )
        }
        other => format!("Uncaught exception of type {}", other.type_name()),
    }
}

/// PHP error levels matching Zend constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorLevel {
    Notice,      // E_NOTICE
    Warning,     // E_WARNING
    Error,       // E_ERROR
    ParseError,  // E_PARSE
    UserNotice,  // E_USER_NOTICE
    UserWarning, // E_USER_WARNING
    UserError,   // E_USER_ERROR
    Deprecated,  // E_DEPRECATED
}

impl ErrorLevel {
    /// Convert error level to the corresponding bitmask value
    pub fn to_bitmask(self) -> u32 {
        match self {
            ErrorLevel::Error => 1,
            ErrorLevel::Warning => 2,
            ErrorLevel::ParseError => 4,
            ErrorLevel::Notice => 8,
            ErrorLevel::UserError => 256,
            ErrorLevel::UserWarning => 512,
            ErrorLevel::UserNotice => 1024,
            ErrorLevel::Deprecated => 8192,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ErrorLevel::Notice => "Notice",
            ErrorLevel::Warning => "Warning",
            ErrorLevel::Error => "Fatal error",
            ErrorLevel::ParseError => "Parse error",
            ErrorLevel::UserNotice => "User notice",
            ErrorLevel::UserWarning => "User warning",
            ErrorLevel::UserError => "User error",
            ErrorLevel::Deprecated => "Deprecated",
        }
    }
}

pub trait ErrorHandler {
    /// Report an error/warning/notice at runtime
    fn report(&mut self, level: ErrorLevel, message: &str);
}

/// Default error handler that writes to stderr
pub struct StderrErrorHandler {
    stderr: io::Stderr,
}

impl Default for StderrErrorHandler {
    fn default() -> Self {
        Self {
            stderr: io::stderr(),
        }
    }
}

impl ErrorHandler for StderrErrorHandler {
    fn report(&mut self, level: ErrorLevel, message: &str) {
        let _ = writeln!(self.stderr, "{}: {}", level.label(), message);
        let _ = self.stderr.flush();
    }
}

/// Capturing error handler for testing and output capture
pub struct CapturingErrorHandler<F: FnMut(ErrorLevel, &str)> {
    callback: F,
}

impl<F: FnMut(ErrorLevel, &str)> CapturingErrorHandler<F> {
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F: FnMut(ErrorLevel, &str)> ErrorHandler for CapturingErrorHandler<F> {
    fn report(&mut self, level: ErrorLevel, message: &str) {
        (self.callback)(level, message);
    }
}

pub trait OutputWriter {
    fn write(&mut self, bytes: &[u8]) -> Result<(), VmError>;
    fn flush(&mut self) -> Result<(), VmError> {
        Ok(())
    }
}

pub struct StdoutWriter {
    stdout: io::Stdout,
}

impl Default for StdoutWriter {
    fn default() -> Self {
        Self {
            stdout: io::stdout(),
        }
    }
}

impl OutputWriter for StdoutWriter {
    fn write(&mut self, bytes: &[u8]) -> Result<(), VmError> {
        self.stdout
            .write_all(bytes)
            .map_err(|e| VmError::RuntimeError(format!("Failed to write output: {}", e)))
    }

    fn flush(&mut self) -> Result<(), VmError> {
        self.stdout
            .flush()
            .map_err(|e| VmError::RuntimeError(format!("Failed to flush output: {}", e)))
    }
}

/// Capturing output writer for testing
pub struct CapturingOutputWriter<F: FnMut(&[u8])> {
    callback: F,
}

impl<F: FnMut(&[u8])> CapturingOutputWriter<F> {
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F: FnMut(&[u8])> OutputWriter for CapturingOutputWriter<F> {
    fn write(&mut self, bytes: &[u8]) -> Result<(), VmError> {
        (self.callback)(bytes);
        Ok(())
    }
}

pub struct VM {
    pub arena: Arena,
    pub builtins: Arc<dyn BuiltinRegistry>,
    pub classes: Box<dyn ClassRegistry>,
    /// Compiles included files and eval'd code; absent means include/eval are unavailable
    pub compiler: Option<Box<dyn SourceCompiler>>,
    /// User functions keyed by lowercase name
    pub functions: HashMap<String, Rc<UserFunc>>,
    pub globals: IndexMap<Rc<str>, Handle>,
    pub constants: HashMap<String, Val>,
    /// Static property cells keyed by lowercase class name
    pub(crate) static_props: HashMap<String, IndexMap<Rc<str>, Handle>>,
    /// `static $x` cells keyed by function body address and slot. The body
    /// is held alongside so its address cannot be reused by a later unit.
    pub(crate) statics: HashMap<(usize, u32), (Rc<CodeChunk>, Handle)>,
    pub included_files: HashSet<PathBuf>,
    pub output_writer: Box<dyn OutputWriter>,
    pub error_handler: Box<dyn ErrorHandler>,
    pub exit_status: Option<i32>,
    pub last_return_value: Option<Val>,
    pub(crate) debug: bool,
    pub(crate) instruction_limit: u64,
    /// Recorded only; wall-clock limits are not enforced
    pub(crate) max_execution_time: u64,
    pub(crate) working_dir: Option<PathBuf>,
    /// Profiling: count of opcodes executed
    pub(crate) opcodes_executed: u64,
    /// Profiling: count of function calls
    pub(crate) function_calls: u64,
    pub(crate) depth: usize,
}

impl Default for VM {
    fn default() -> Self {
        Self::new(
            Arc::new(ExtensionRegistry::with_core_functions()),
            Box::new(InMemoryClassRegistry::with_core_classes()),
        )
    }
}

impl VM {
    pub fn new(builtins: Arc<dyn BuiltinRegistry>, classes: Box<dyn ClassRegistry>) -> Self {
        Self {
            arena: Arena::new(),
            builtins,
            classes,
            compiler: None,
            functions: HashMap::new(),
            globals: IndexMap::new(),
            constants: HashMap::new(),
            static_props: HashMap::new(),
            statics: HashMap::new(),
            included_files: HashSet::new(),
            output_writer: Box::new(StdoutWriter::default()),
            error_handler: Box::new(StderrErrorHandler::default()),
            exit_status: None,
            last_return_value: None,
            debug: false,
            instruction_limit: 10_000_000,
            max_execution_time: 0,
            working_dir: None,
            opcodes_executed: 0,
            function_calls: 0,
            depth: 0,
        }
    }

    pub fn with_output(mut self, writer: Box<dyn OutputWriter>) -> Self {
        self.output_writer = writer;
        self
    }

    pub fn with_compiler(mut self, compiler: Box<dyn SourceCompiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    /// Enable per-instruction tracing and the runaway-loop ceiling
    pub fn set_debug(&mut self, debug: bool, instruction_limit: u64) {
        self.debug = debug;
        self.instruction_limit = instruction_limit;
    }

    pub fn opcodes_executed(&self) -> u64 {
        self.opcodes_executed
    }

    pub fn function_calls(&self) -> u64 {
        self.function_calls
    }

    /// Make a compiled unit's functions and classes visible, returning its main body
    pub fn load_program(&mut self, program: Program) -> Rc<CodeChunk> {
        for func in program.functions {
            self.define_function(func);
        }
        for class in program.classes {
            tracing::debug!(class = %class.name, "registering class");
            self.classes.register_class(class);
        }
        program.main
    }

    pub fn define_function(&mut self, func: Rc<UserFunc>) {
        self.functions.insert(func.name.to_ascii_lowercase(), func);
    }

    pub fn find_function(&self, name: &str) -> Option<Rc<UserFunc>> {
        let name = name.strip_prefix('\\').unwrap_or(name);
        self.functions.get(&name.to_ascii_lowercase()).cloned()
    }

    /// Load and run a program in the global scope
    pub fn run_program(&mut self, program: Program) -> Result<Val, VmError> {
        let main = self.load_program(program);
        self.run(main)
    }

    /// Run a top-level chunk. Its named variables are the globals.
    pub fn run(&mut self, chunk: Rc<CodeChunk>) -> Result<Val, VmError> {
        let mut ctx = ExecutionContext::new(chunk);
        self.bind_globals(&mut ctx);
        let result = self.run_loop(&mut ctx);
        self.output_writer.flush()?;
        result?;
        let value = self.arena.deref(&ctx.return_value).clone();
        self.last_return_value = Some(value.clone());
        Ok(value)
    }

    /// Alias every named slot of a top-level context to its global cell
    pub(crate) fn bind_globals(&mut self, ctx: &mut ExecutionContext) {
        let names = ctx.chunk.var_names.clone();
        for (slot, name) in names.iter().enumerate() {
            let handle = self.global_cell(name);
            ctx.vars.insert(slot as u32, Val::Reference(handle));
        }
    }

    /// Cell backing a global variable, created empty on first use
    pub fn global_cell(&mut self, name: &str) -> Handle {
        if let Some(handle) = self.globals.get(name) {
            return *handle;
        }
        let handle = self.arena.alloc(Val::Null);
        self.globals.insert(Rc::from(name), handle);
        handle
    }

    pub fn set_global(&mut self, name: &str, value: Val) {
        let handle = self.global_cell(name);
        self.arena.set(handle, value);
    }

    pub fn get_global(&self, name: &str) -> Option<Val> {
        self.globals
            .get(name)
            .map(|h| self.arena.get(*h).clone())
    }

    pub(crate) fn echo(&mut self, bytes: &[u8]) -> Result<(), VmError> {
        self.output_writer.write(bytes)
    }

    pub(crate) fn report_error(&mut self, level: ErrorLevel, message: &str) {
        self.error_handler.report(level, message);
    }

    /// Fetch-decode-execute until the context halts.
    ///
    /// Language exceptions are matched against this context's handlers first;
    /// when none applies the context halts and the exception propagates to the
    /// caller's loop.
    pub fn run_loop(&mut self, ctx: &mut ExecutionContext) -> Result<(), VmError> {
        self.depth += 1;
        let result = self.dispatch_until_halt(ctx);
        self.depth -= 1;
        result
    }

    fn dispatch_until_halt(&mut self, ctx: &mut ExecutionContext) -> Result<(), VmError> {
        while !ctx.halted {
            if self.exit_status.is_some() {
                ctx.halted = true;
                break;
            }

            let Some(&inst) = ctx.chunk.code.get(ctx.ip) else {
                // Falling off the end is an implicit `return null`
                ctx.halted = true;
                break;
            };

            self.opcodes_executed += 1;
            if self.debug {
                if self.opcodes_executed > self.instruction_limit {
                    ctx.halted = true;
                    return Err(VmError::InstructionLimit(self.instruction_limit));
                }
                tracing::trace!(
                    ip = ctx.ip,
                    opcode = ?inst.opcode,
                    function = ctx.function_name(),
                    depth = self.depth,
                    "dispatch"
                );
            }

            ctx.opline = ctx.ip;
            ctx.ip += 1;

            match self.execute_instruction(ctx, inst) {
                Ok(()) => {}
                Err(VmError::Exception(exception)) => {
                    if !self.handle_exception(ctx, exception.clone())? {
                        ctx.halted = true;
                        return Err(VmError::Exception(exception));
                    }
                }
                Err(e) => {
                    ctx.halted = true;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Execute one instruction; `ctx.ip` already points past it
    pub(crate) fn execute_instruction(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        match inst.opcode {
            OpCode::Nop | OpCode::ExtStmt | OpCode::ExtNop => Ok(()),
            // Only ever consumed by the instruction before it
            OpCode::OpData => Err(VmError::UnsupportedOpcode(inst.opcode)),

            OpCode::Add => self.exec_arith(ctx, inst, BinaryOp::Add),
            OpCode::Sub => self.exec_arith(ctx, inst, BinaryOp::Sub),
            OpCode::Mul => self.exec_arith(ctx, inst, BinaryOp::Mul),
            OpCode::Div => self.exec_arith(ctx, inst, BinaryOp::Div),
            OpCode::Mod => self.exec_arith(ctx, inst, BinaryOp::Mod),
            OpCode::Pow => self.exec_arith(ctx, inst, BinaryOp::Pow),
            OpCode::Concat | OpCode::FastConcat => self.exec_concat(ctx, inst),

            OpCode::BwAnd => self.exec_bitwise(ctx, inst, BinaryOp::BwAnd),
            OpCode::BwOr => self.exec_bitwise(ctx, inst, BinaryOp::BwOr),
            OpCode::BwXor => self.exec_bitwise(ctx, inst, BinaryOp::BwXor),
            OpCode::Sl => self.exec_bitwise(ctx, inst, BinaryOp::Sl),
            OpCode::Sr => self.exec_bitwise(ctx, inst, BinaryOp::Sr),
            OpCode::BwNot => self.exec_bw_not(ctx, inst),

            OpCode::BoolNot => self.exec_bool_not(ctx, inst),
            OpCode::Bool => self.exec_bool(ctx, inst),
            OpCode::BoolXor | OpCode::BoolAnd | OpCode::BoolOr => self.exec_logical(ctx, inst),

            OpCode::IsEqual | OpCode::Case => self.exec_compare(ctx, inst, CompareOp::Equal),
            OpCode::IsNotEqual => self.exec_compare(ctx, inst, CompareOp::NotEqual),
            OpCode::IsIdentical | OpCode::CaseStrict => {
                self.exec_compare(ctx, inst, CompareOp::Identical)
            }
            OpCode::IsNotIdentical => self.exec_compare(ctx, inst, CompareOp::NotIdentical),
            OpCode::IsSmaller => self.exec_compare(ctx, inst, CompareOp::Less),
            OpCode::IsSmallerOrEqual => self.exec_compare(ctx, inst, CompareOp::LessOrEqual),
            OpCode::IsGreater => self.exec_compare(ctx, inst, CompareOp::Greater),
            OpCode::IsGreaterOrEqual => self.exec_compare(ctx, inst, CompareOp::GreaterOrEqual),
            OpCode::Spaceship => self.exec_compare(ctx, inst, CompareOp::Spaceship),

            OpCode::Assign => self.exec_assign(ctx, inst),
            OpCode::AssignRef => self.exec_assign_ref(ctx, inst),
            OpCode::AssignOp => self.exec_assign_op(ctx, inst),
            OpCode::QmAssign | OpCode::CopyTmp => self.exec_qm_assign(ctx, inst),
            OpCode::Free => self.exec_free(ctx, inst),
            OpCode::PreInc => self.exec_inc_dec(ctx, inst, IncDecOp::PreInc),
            OpCode::PreDec => self.exec_inc_dec(ctx, inst, IncDecOp::PreDec),
            OpCode::PostInc => self.exec_inc_dec(ctx, inst, IncDecOp::PostInc),
            OpCode::PostDec => self.exec_inc_dec(ctx, inst, IncDecOp::PostDec),
            OpCode::UnsetCv => self.exec_unset_cv(ctx, inst),
            OpCode::IssetIsemptyCv => self.exec_isset_isempty_cv(ctx, inst),
            OpCode::BindGlobal => self.exec_bind_global(ctx, inst),
            OpCode::BindStatic => self.exec_bind_static(ctx, inst),

            OpCode::Cast => self.exec_cast(ctx, inst),
            OpCode::Strlen => self.exec_strlen(ctx, inst),
            OpCode::Count => self.exec_count(ctx, inst),
            OpCode::GetClass => self.exec_get_class(ctx, inst),
            OpCode::GetCalledClass => self.exec_get_called_class(ctx, inst),
            OpCode::GetType => self.exec_get_type(ctx, inst),
            OpCode::Instanceof => self.exec_instanceof(ctx, inst),
            OpCode::FuncNumArgs => self.exec_func_num_args(ctx, inst),
            OpCode::FuncGetArgs => self.exec_func_get_args(ctx, inst),

            OpCode::RopeInit => self.exec_rope_init(ctx, inst),
            OpCode::RopeAdd => self.exec_rope_add(ctx, inst),
            OpCode::RopeEnd => self.exec_rope_end(ctx, inst),

            OpCode::Jmp => self.exec_jmp(ctx, inst),
            OpCode::Jmpz => self.exec_cond_jump(ctx, inst, CondJump::IfFalse),
            OpCode::Jmpnz => self.exec_cond_jump(ctx, inst, CondJump::IfTrue),
            OpCode::JmpzEx => self.exec_cond_jump(ctx, inst, CondJump::IfFalseEx),
            OpCode::JmpnzEx => self.exec_cond_jump(ctx, inst, CondJump::IfTrueEx),
            OpCode::JmpSet => self.exec_cond_jump(ctx, inst, CondJump::Set),
            OpCode::Coalesce => self.exec_cond_jump(ctx, inst, CondJump::Coalesce),
            OpCode::JmpNull => self.exec_cond_jump(ctx, inst, CondJump::Null),
            OpCode::SwitchLong | OpCode::SwitchString => self.exec_switch(ctx, inst),
            OpCode::Match => self.exec_match(ctx, inst),
            OpCode::MatchError => self.exec_match_error(ctx, inst),

            OpCode::InitArray => self.exec_init_array(ctx, inst),
            OpCode::AddArrayElement => self.exec_add_array_element(ctx, inst),
            OpCode::AddArrayUnpack => self.exec_add_array_unpack(ctx, inst),
            OpCode::FetchDimR | OpCode::FetchListR => self.exec_fetch_dim_r(ctx, inst, false),
            OpCode::FetchDimIs => self.exec_fetch_dim_r(ctx, inst, true),
            OpCode::FetchDimW
            | OpCode::FetchDimRw
            | OpCode::FetchDimUnset
            | OpCode::FetchDimFuncArg => self.exec_fetch_dim_w(ctx, inst),
            OpCode::AssignDim => self.exec_assign_dim(ctx, inst),
            OpCode::AssignDimOp => self.exec_assign_dim_op(ctx, inst),
            OpCode::UnsetDim => self.exec_unset_dim(ctx, inst),
            OpCode::IssetIsemptyDimObj => self.exec_isset_isempty_dim(ctx, inst),
            OpCode::InArray => self.exec_in_array(ctx, inst),
            OpCode::ArrayKeyExists => self.exec_array_key_exists(ctx, inst),

            OpCode::FeResetR => self.exec_fe_reset(ctx, inst, false),
            OpCode::FeResetRw => self.exec_fe_reset(ctx, inst, true),
            OpCode::FeFetchR => self.exec_fe_fetch(ctx, inst, false),
            OpCode::FeFetchRw => self.exec_fe_fetch(ctx, inst, true),
            OpCode::FeFree => self.exec_fe_free(ctx, inst),

            OpCode::InitFcall | OpCode::InitFcallByName | OpCode::InitNsFcallByName => {
                self.exec_init_fcall(ctx, inst)
            }
            OpCode::InitDynamicCall | OpCode::InitUserCall => {
                self.exec_init_dynamic_call(ctx, inst)
            }
            OpCode::InitMethodCall => self.exec_init_method_call(ctx, inst),
            OpCode::InitStaticMethodCall => self.exec_init_static_method_call(ctx, inst),
            OpCode::InitCtorCall => self.exec_init_ctor_call(ctx, inst),
            OpCode::SendVal | OpCode::SendValEx => self.exec_send_val(ctx, inst),
            OpCode::SendVar | OpCode::SendVarNoRef => self.exec_send_var(ctx, inst, false),
            OpCode::SendVarEx => self.exec_send_var(ctx, inst, true),
            OpCode::SendRef => self.exec_send_ref(ctx, inst),
            OpCode::SendUnpack => self.exec_send_unpack(ctx, inst),
            OpCode::DoFcall
            | OpCode::DoIcall
            | OpCode::DoUcall
            | OpCode::DoFcallByName
            | OpCode::CallCtor => self.exec_do_call(ctx, inst),
            OpCode::Return | OpCode::GeneratorReturn => self.exec_return(ctx, inst, false),
            OpCode::ReturnByRef => self.exec_return(ctx, inst, true),
            OpCode::DeclareLambdaFunction => self.exec_declare_lambda(ctx, inst),
            OpCode::BindLexical => self.exec_bind_lexical(ctx, inst),

            OpCode::New => self.exec_new(ctx, inst),
            OpCode::Clone => self.exec_clone(ctx, inst),
            OpCode::FetchObjR => self.exec_fetch_obj_r(ctx, inst, false),
            OpCode::FetchObjIs => self.exec_fetch_obj_r(ctx, inst, true),
            OpCode::FetchObjW | OpCode::FetchObjRw | OpCode::FetchObjFuncArg => {
                self.exec_fetch_obj_w(ctx, inst)
            }
            OpCode::AssignObj => self.exec_assign_obj(ctx, inst),
            OpCode::AssignObjOp => self.exec_assign_obj_op(ctx, inst),
            OpCode::UnsetObj => self.exec_unset_obj(ctx, inst),
            OpCode::IssetIsemptyPropObj => self.exec_isset_isempty_prop(ctx, inst),
            OpCode::PreIncObj => self.exec_inc_dec_obj(ctx, inst, IncDecOp::PreInc),
            OpCode::PreDecObj => self.exec_inc_dec_obj(ctx, inst, IncDecOp::PreDec),
            OpCode::PostIncObj => self.exec_inc_dec_obj(ctx, inst, IncDecOp::PostInc),
            OpCode::PostDecObj => self.exec_inc_dec_obj(ctx, inst, IncDecOp::PostDec),
            OpCode::FetchThis => self.exec_fetch_this(ctx, inst),
            OpCode::FetchClassName => self.exec_fetch_class_name(ctx, inst),

            OpCode::FetchStaticPropR => self.exec_fetch_static_prop_r(ctx, inst, false),
            OpCode::FetchStaticPropIs => self.exec_fetch_static_prop_r(ctx, inst, true),
            OpCode::FetchStaticPropW
            | OpCode::FetchStaticPropRw
            | OpCode::FetchStaticPropFuncArg => self.exec_fetch_static_prop_w(ctx, inst),
            OpCode::AssignStaticProp => self.exec_assign_static_prop(ctx, inst),
            OpCode::AssignStaticPropOp => self.exec_assign_static_prop_op(ctx, inst),
            OpCode::PreIncStaticProp => self.exec_inc_dec_static_prop(ctx, inst, IncDecOp::PreInc),
            OpCode::PreDecStaticProp => self.exec_inc_dec_static_prop(ctx, inst, IncDecOp::PreDec),
            OpCode::PostIncStaticProp => {
                self.exec_inc_dec_static_prop(ctx, inst, IncDecOp::PostInc)
            }
            OpCode::PostDecStaticProp => {
                self.exec_inc_dec_static_prop(ctx, inst, IncDecOp::PostDec)
            }
            OpCode::IssetIsemptyStaticProp => self.exec_isset_isempty_static_prop(ctx, inst),

            OpCode::FetchClassConstant => self.exec_fetch_class_constant(ctx, inst),
            OpCode::DeclareConst => self.exec_declare_const(ctx, inst),
            OpCode::FetchConstant => self.exec_fetch_constant(ctx, inst),

            OpCode::Catch => self.exec_catch(ctx, inst),
            OpCode::Throw => self.exec_throw(ctx, inst),
            OpCode::FastRet => self.exec_fast_ret(ctx),
            OpCode::DiscardException => {
                ctx.exception = None;
                Ok(())
            }
            OpCode::HandleException => match ctx.exception.take() {
                Some(exception) => Err(VmError::Exception(exception)),
                None => Ok(()),
            },

            OpCode::Yield => self.exec_yield(ctx, inst),
            OpCode::YieldFrom => self.exec_yield_from(ctx, inst),

            OpCode::Echo => self.exec_echo(ctx, inst),
            OpCode::Exit => self.exec_exit(ctx, inst),
            OpCode::IncludeOrEval => self.exec_include_or_eval(ctx, inst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::ObjectData;
    use std::cell::RefCell;

    #[test]
    fn test_exception_display_mentions_class_and_message() {
        let mut obj = ObjectData::new(Rc::from("RuntimeException"));
        obj.set(Rc::from("message"), Val::string("boom"));
        let err = VmError::Exception(Val::Object(Rc::new(RefCell::new(obj))));
        assert_eq!(
            err.to_string(),
            "Uncaught exception 'RuntimeException' with message 'boom'"
        );
    }

    #[test]
    fn test_globals_are_shared_cells() {
        let mut vm = VM::default();
        vm.set_global("answer", Val::Int(42));
        let h1 = vm.global_cell("answer");
        let h2 = vm.global_cell("answer");
        assert_eq!(h1, h2);
        assert_eq!(vm.get_global("answer"), Some(Val::Int(42)));
        assert_eq!(vm.get_global("missing"), None);
    }
}
