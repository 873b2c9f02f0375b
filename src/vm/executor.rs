//! Centralized execution API
//!
//! One entry point for hosts and tests that want to run compiled bytecode
//! with a given configuration and collect what it printed.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use php_vm::vm::executor::{execute_program, ExecutionConfig};
//!
//! let result = execute_program(program, ExecutionConfig::default())?;
//! assert_eq!(result.stdout, "30");
//! ```

use crate::compiler::chunk::{CodeChunk, Program};
use crate::core::value::Val;
use crate::runtime::include::SourceCompiler;
use crate::vm::engine::{CapturingErrorHandler, CapturingOutputWriter, VM, VmError};
use serde::Deserialize;
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

/// Result of running a program
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Final return value of the main body (`null` when it fell off the end)
    pub value: Val,
    /// Captured ECHO output
    pub stdout: String,
    /// Captured diagnostics, one `Level: message` line each
    pub stderr: String,
    /// Status passed to `exit`, if the program exited
    pub exit_status: Option<i32>,
    pub duration_us: u64,
    pub opcodes_executed: u64,
    pub function_calls: u64,
}

/// Configuration for a run
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Per-instruction tracing plus the instruction ceiling
    pub debug: bool,
    /// Only enforced in debug mode
    pub instruction_limit: u64,
    /// Seconds; recorded but not enforced
    pub max_execution_time: u64,
    /// Base directory for relative include paths
    pub working_dir: Option<PathBuf>,
    /// Initial global variables
    #[serde(skip)]
    pub globals: Vec<(String, Val)>,
    /// Capture output streams into the result instead of stdout/stderr
    pub capture_output: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            debug: false,
            instruction_limit: 10_000_000,
            max_execution_time: 0,
            working_dir: None,
            globals: Vec::new(),
            capture_output: true,
        }
    }
}

impl ExecutionConfig {
    /// Load from JSON; missing fields keep their defaults
    pub fn from_json(text: &str) -> Result<Self, VmError> {
        serde_json::from_str(text)
            .map_err(|e| VmError::RuntimeError(format!("Invalid execution config: {}", e)))
    }

    pub fn with_global(mut self, name: impl Into<String>, value: Val) -> Self {
        self.globals.push((name.into(), value));
        self
    }
}

/// Run a compiled program with the default registries
pub fn execute_program(program: Program, config: ExecutionConfig) -> Result<ExecutionResult, VmError> {
    execute_with(VM::default(), program, config)
}

/// Run a bare main body
pub fn execute_chunk(chunk: CodeChunk, config: ExecutionConfig) -> Result<ExecutionResult, VmError> {
    execute_program(
        Program {
            main: Rc::new(chunk),
            functions: Vec::new(),
            classes: Vec::new(),
        },
        config,
    )
}

/// Run a program with include/eval support
pub fn execute_program_with_compiler(
    program: Program,
    compiler: Box<dyn SourceCompiler>,
    config: ExecutionConfig,
) -> Result<ExecutionResult, VmError> {
    execute_with(VM::default().with_compiler(compiler), program, config)
}

/// Run on a caller-prepared VM (custom registries or collaborators)
pub fn execute_with(
    mut vm: VM,
    program: Program,
    config: ExecutionConfig,
) -> Result<ExecutionResult, VmError> {
    let start = std::time::Instant::now();

    vm.set_debug(config.debug, config.instruction_limit);
    vm.max_execution_time = config.max_execution_time;
    vm.working_dir = config.working_dir.clone();
    for (name, value) in config.globals {
        vm.set_global(&name, value);
    }

    let captured_stdout = Rc::new(RefCell::new(Vec::<u8>::new()));
    let captured_stderr = Rc::new(RefCell::new(Vec::<u8>::new()));

    if config.capture_output {
        let stdout_clone = captured_stdout.clone();
        vm.output_writer = Box::new(CapturingOutputWriter::new(move |bytes: &[u8]| {
            stdout_clone.borrow_mut().extend_from_slice(bytes);
        }));

        let stderr_clone = captured_stderr.clone();
        vm.error_handler = Box::new(CapturingErrorHandler::new(move |level, message: &str| {
            let formatted = format!("{}: {}\n", level.label(), message);
            stderr_clone
                .borrow_mut()
                .extend_from_slice(formatted.as_bytes());
        }));
    }

    let value = vm.run_program(program)?;
    let duration_us = start.elapsed().as_micros() as u64;

    let stdout = String::from_utf8_lossy(&captured_stdout.borrow()).into_owned();
    let stderr = String::from_utf8_lossy(&captured_stderr.borrow()).into_owned();

    Ok(ExecutionResult {
        value,
        stdout,
        stderr,
        exit_status: vm.exit_status,
        duration_us,
        opcodes_executed: vm.opcodes_executed(),
        function_calls: vm.function_calls(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::opcode::{Instruction, OpCode, Operand};

    fn echo_sum() -> CodeChunk {
        CodeChunk {
            code: vec![
                Instruction::new(OpCode::Add)
                    .op1(Operand::Cv(0))
                    .op2(Operand::Cv(1))
                    .result(Operand::Tmp(0)),
                Instruction::new(OpCode::Echo).op1(Operand::Tmp(0)),
                Instruction::new(OpCode::Return).op1(Operand::Tmp(0)),
            ],
            var_names: vec![Rc::from("x"), Rc::from("y")],
            ..Default::default()
        }
    }

    #[test]
    fn test_globals_seed_named_slots() {
        let config = ExecutionConfig::default()
            .with_global("x", Val::Int(10))
            .with_global("y", Val::Int(20));
        let result = execute_chunk(echo_sum(), config).unwrap();
        assert_eq!(result.stdout, "30");
        assert_eq!(result.value, Val::Int(30));
        assert_eq!(result.opcodes_executed, 3);
    }

    #[test]
    fn test_config_from_json_keeps_defaults() {
        let config =
            ExecutionConfig::from_json(r#"{"debug": true, "working_dir": "/tmp"}"#).unwrap();
        assert!(config.debug);
        assert_eq!(config.instruction_limit, 10_000_000);
        assert_eq!(config.working_dir, Some(PathBuf::from("/tmp")));
        assert!(config.capture_output);
        assert!(ExecutionConfig::from_json("[1, 2]").is_err());
    }

    #[test]
    fn test_instruction_ceiling_in_debug_mode() {
        let chunk = CodeChunk {
            code: vec![Instruction::new(OpCode::Jmp).op1(Operand::Num(0))],
            ..Default::default()
        };
        let config = ExecutionConfig {
            debug: true,
            instruction_limit: 100,
            ..Default::default()
        };
        let err = execute_chunk(chunk, config).unwrap_err();
        assert!(matches!(err, VmError::InstructionLimit(100)));
    }

    #[test]
    fn test_diagnostics_are_captured() {
        let chunk = CodeChunk {
            code: vec![
                Instruction::new(OpCode::Add)
                    .op1(Operand::Const(0))
                    .op2(Operand::Const(1))
                    .result(Operand::Tmp(0)),
                Instruction::new(OpCode::Return).op1(Operand::Tmp(0)),
            ],
            constants: vec![Val::string("abc"), Val::Int(1)],
            ..Default::default()
        };
        let result = execute_chunk(chunk, ExecutionConfig::default()).unwrap();
        assert_eq!(result.value, Val::Int(1));
        assert!(result.stderr.starts_with("Warning: A non-numeric value"));
    }
}
