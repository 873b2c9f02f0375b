mod common;

use common::*;
use php_vm::compiler::chunk::FuncParam;
use php_vm::compiler::emitter::ChunkEmitter;
use php_vm::core::value::Val;
use php_vm::vm::engine::VmError;
use php_vm::vm::opcode::{CastKind, Instruction, OpCode, Operand};

#[test]
fn test_add_and_echo() {
    let mut e = ChunkEmitter::new("main");
    let a = e.var("a");
    let b = e.var("b");
    let ten = e.constant(Val::Int(10));
    let twenty = e.constant(Val::Int(20));
    assign(&mut e, a, ten);
    assign(&mut e, b, twenty);
    let sum = e.temp();
    e.emit(Instruction::new(OpCode::Add).op1(a).op2(b).result(sum));
    echo(&mut e, sum);

    let result = run_chunk(e.finish());
    assert_eq!(result.stdout, "30");
    assert_eq!(result.stderr, "");
}

#[test]
fn test_division_by_zero_is_fatal() {
    let mut e = ChunkEmitter::new("main");
    let one = e.constant(Val::Int(1));
    let zero = e.constant(Val::Int(0));
    let t = e.temp();
    e.emit(Instruction::new(OpCode::Div).op1(one).op2(zero).result(t));
    echo_str(&mut e, "not reached");

    let err = run_program_err(program(e.finish(), Vec::new(), Vec::new()));
    assert!(matches!(err, VmError::DivisionByZero));
}

#[test]
fn test_exact_division_stays_integer() {
    let mut e = ChunkEmitter::new("main");
    let six = e.constant(Val::Int(6));
    let three = e.constant(Val::Int(3));
    let four = e.constant(Val::Int(4));
    let t = e.temp();
    e.emit(Instruction::new(OpCode::Div).op1(six).op2(three).result(t));
    echo(&mut e, t);
    echo_str(&mut e, " ");
    let u = e.temp();
    e.emit(Instruction::new(OpCode::Div).op1(six).op2(four).result(u));
    echo(&mut e, u);

    assert_eq!(run_chunk(e.finish()).stdout, "2 1.5");
}

#[test]
fn test_loose_and_strict_equality() {
    let mut e = ChunkEmitter::new("main");
    let text = e.constant(Val::string("10"));
    let num = e.constant(Val::Int(10));
    let loose = e.temp();
    let strict = e.temp();
    e.emit(Instruction::new(OpCode::IsEqual).op1(text).op2(num).result(loose));
    e.emit(Instruction::new(OpCode::IsIdentical).op1(text).op2(num).result(strict));
    let cast = e.temp();
    e.emit(
        Instruction::new(OpCode::Cast)
            .op1(strict)
            .result(cast)
            .ext(CastKind::Int as u8),
    );
    echo(&mut e, loose);
    echo(&mut e, cast);

    assert_eq!(run_chunk(e.finish()).stdout, "10");
}

#[test]
fn test_count_and_array_merge_builtins() {
    let mut e = ChunkEmitter::new("main");
    let one = e.constant(Val::Int(1));
    let two = e.constant(Val::Int(2));
    let three = e.constant(Val::Int(3));
    let left = e.temp();
    e.emit(Instruction::new(OpCode::InitArray).op1(one).result(left));
    e.emit(Instruction::new(OpCode::AddArrayElement).op1(two).result(left));
    let right = e.temp();
    e.emit(Instruction::new(OpCode::InitArray).op1(three).result(right));

    let merged = e.temp();
    call(&mut e, "array_merge", &[left, right], merged);
    let n = e.temp();
    e.emit(Instruction::new(OpCode::Count).op1(merged).result(n));
    echo(&mut e, n);

    let last_key = e.constant(Val::Int(2));
    let last = e.temp();
    e.emit(Instruction::new(OpCode::FetchDimR).op1(merged).op2(last_key).result(last));
    echo(&mut e, last);

    let len = e.temp();
    let word = e.constant(Val::string("hello"));
    call(&mut e, "strlen", &[word], len);
    echo(&mut e, len);

    assert_eq!(run_chunk(e.finish()).stdout, "335");
}

#[test]
fn test_cast_scalar_to_array_wraps_it() {
    let mut e = ChunkEmitter::new("main");
    let text = e.constant(Val::string("x"));
    let arr = e.temp();
    e.emit(
        Instruction::new(OpCode::Cast)
            .op1(text)
            .result(arr)
            .ext(CastKind::Array as u8),
    );
    let n = e.temp();
    e.emit(Instruction::new(OpCode::Count).op1(arr).result(n));
    echo(&mut e, n);
    let zero = e.constant(Val::Int(0));
    let first = e.temp();
    e.emit(Instruction::new(OpCode::FetchDimR).op1(arr).op2(zero).result(first));
    echo(&mut e, first);

    assert_eq!(run_chunk(e.finish()).stdout, "1x");
}

#[test]
fn test_user_function_with_default_parameter() {
    // function greet($name, $greeting = "Hello") { return $greeting . ", " . $name; }
    let mut f = ChunkEmitter::new("greet");
    let name = f.var("name");
    let greeting = f.var("greeting");
    let sep = f.constant(Val::string(", "));
    let t = f.temp();
    f.emit(Instruction::new(OpCode::Concat).op1(greeting).op2(sep).result(t));
    let u = f.temp();
    f.emit(Instruction::new(OpCode::Concat).op1(t).op2(name).result(u));
    ret(&mut f, u);
    let greet = f.finish_function(
        "greet",
        vec![
            FuncParam::required("name"),
            FuncParam::optional("greeting", Val::string("Hello")),
        ],
    );

    let mut e = ChunkEmitter::new("main");
    let world = e.constant(Val::string("World"));
    let out = e.temp();
    call(&mut e, "greet", &[world], out);
    echo(&mut e, out);

    let result = run_program(program(e.finish(), vec![greet], Vec::new()));
    assert_eq!(result.stdout, "Hello, World");
    assert_eq!(result.function_calls, 1);
}

#[test]
fn test_missing_argument_is_reported() {
    let mut f = ChunkEmitter::new("needs_one");
    let x = f.var("x");
    ret(&mut f, x);
    let needs_one = f.finish_function("needs_one", vec![FuncParam::required("x")]);

    let mut e = ChunkEmitter::new("main");
    let out = e.temp();
    call(&mut e, "needs_one", &[], out);

    let err = run_program_err(program(e.finish(), vec![needs_one], Vec::new()));
    assert!(err.to_string().starts_with("Too few arguments to function needs_one()"));
}

#[test]
fn test_exit_stops_all_frames() {
    // function stop() { exit(3); }
    let mut f = ChunkEmitter::new("stop");
    let code = f.constant(Val::Int(3));
    f.emit(Instruction::new(OpCode::Exit).op1(code));
    let stop = f.finish_function("stop", Vec::new());

    let mut e = ChunkEmitter::new("main");
    echo_str(&mut e, "before");
    let out = e.temp();
    call(&mut e, "stop", &[], out);
    echo_str(&mut e, "after");

    let result = run_program(program(e.finish(), vec![stop], Vec::new()));
    assert_eq!(result.stdout, "before");
    assert_eq!(result.exit_status, Some(3));
}

#[test]
fn test_exit_with_string_prints_it() {
    let mut e = ChunkEmitter::new("main");
    let message = e.constant(Val::string("bye"));
    e.emit(Instruction::new(OpCode::Exit).op1(message));
    echo_str(&mut e, "after");

    let result = run_chunk(e.finish());
    assert_eq!(result.stdout, "bye");
    assert_eq!(result.exit_status, Some(0));
}

#[test]
fn test_out_of_range_exit_code_is_clamped() {
    let mut e = ChunkEmitter::new("main");
    let code = e.constant(Val::Int(1 << 40));
    e.emit(Instruction::new(OpCode::Exit).op1(code));

    assert_eq!(run_chunk(e.finish()).exit_status, Some(255));
}

#[test]
fn test_unused_operand_reads_null() {
    let mut e = ChunkEmitter::new("main");
    let t = e.temp();
    e.emit(Instruction::new(OpCode::QmAssign).op1(Operand::Unused).result(t));
    ret(&mut e, t);
    assert_eq!(run_chunk(e.finish()).value, Val::Null);
}
