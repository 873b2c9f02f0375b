//! Common test helpers for integration tests
//!
//! Integration tests assemble bytecode with [`ChunkEmitter`] and run it
//! through the centralized `vm::executor` API, so every test sees the same
//! output capture and configuration as an embedding host.

#![allow(dead_code)]

use php_vm::compiler::chunk::{CodeChunk, Program, UserFunc};
use php_vm::compiler::emitter::ChunkEmitter;
use php_vm::core::value::Val;
use php_vm::runtime::context::ClassDef;
use php_vm::vm::engine::VmError;
use php_vm::vm::executor::{ExecutionConfig, ExecutionResult, execute_program};
use php_vm::vm::opcode::{Instruction, OpCode, Operand};
use std::rc::Rc;

pub fn program(main: CodeChunk, functions: Vec<UserFunc>, classes: Vec<ClassDef>) -> Program {
    Program {
        main: Rc::new(main),
        functions: functions.into_iter().map(Rc::new).collect(),
        classes,
    }
}

/// Run a bare main body, panicking on fatal errors
pub fn run_chunk(chunk: CodeChunk) -> ExecutionResult {
    run_program(program(chunk, Vec::new(), Vec::new()))
}

pub fn run_program(program: Program) -> ExecutionResult {
    execute_program(program, ExecutionConfig::default()).expect("program should run")
}

/// Run a program that is expected to fail
pub fn run_program_err(program: Program) -> VmError {
    match execute_program(program, ExecutionConfig::default()) {
        Ok(result) => panic!("expected failure, got output {:?}", result.stdout),
        Err(err) => err,
    }
}

pub fn echo(e: &mut ChunkEmitter, value: Operand) {
    e.emit(Instruction::new(OpCode::Echo).op1(value));
}

pub fn echo_str(e: &mut ChunkEmitter, text: &str) {
    let c = e.constant(Val::string(text));
    echo(e, c);
}

pub fn assign(e: &mut ChunkEmitter, target: Operand, value: Operand) {
    e.emit(Instruction::new(OpCode::Assign).op1(target).op2(value));
}

/// `name(args...)` through INIT_FCALL / SEND_VAL / DO_FCALL
pub fn call(e: &mut ChunkEmitter, name: &str, args: &[Operand], result: Operand) {
    let callee = e.constant(Val::string(name));
    e.emit(
        Instruction::new(OpCode::InitFcall)
            .op1(Operand::Num(args.len() as u32))
            .op2(callee),
    );
    for arg in args {
        e.emit(Instruction::new(OpCode::SendVal).op1(*arg));
    }
    e.emit(Instruction::new(OpCode::DoFcall).result(result));
}

/// `$obj->method(args...)`
pub fn method_call(
    e: &mut ChunkEmitter,
    object: Operand,
    method: &str,
    args: &[Operand],
    result: Operand,
) {
    let name = e.constant(Val::string(method));
    e.emit(
        Instruction::new(OpCode::InitMethodCall)
            .op1(object)
            .op2(name)
            .result(Operand::Num(args.len() as u32)),
    );
    for arg in args {
        e.emit(Instruction::new(OpCode::SendVal).op1(*arg));
    }
    e.emit(Instruction::new(OpCode::DoFcall).result(result));
}

pub fn ret(e: &mut ChunkEmitter, value: Operand) {
    e.emit(Instruction::new(OpCode::Return).op1(value));
}

/// `new Class(args...)` through NEW / INIT_CTOR_CALL / CALL_CTOR
pub fn new_object(e: &mut ChunkEmitter, class: &str, args: &[Operand], result: Operand) {
    let name = e.constant(Val::string(class));
    e.emit(Instruction::new(OpCode::New).op1(name).result(result));
    e.emit(
        Instruction::new(OpCode::InitCtorCall)
            .op1(result)
            .result(Operand::Num(args.len() as u32)),
    );
    for arg in args {
        e.emit(Instruction::new(OpCode::SendVal).op1(*arg));
    }
    e.emit(Instruction::new(OpCode::CallCtor).result(result));
}
