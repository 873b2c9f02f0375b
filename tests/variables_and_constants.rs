mod common;

use common::*;
use php_vm::compiler::emitter::ChunkEmitter;
use php_vm::core::value::Val;
use php_vm::vm::assign_op::BinaryOp;
use php_vm::vm::executor::{ExecutionConfig, execute_program};
use php_vm::vm::opcode::{Instruction, OpCode};

#[test]
fn test_static_variable_survives_calls() {
    // function counter() { static $n = 0; $n++; return $n; }
    let mut f = ChunkEmitter::new("counter");
    let n = f.var("n");
    let zero = f.constant(Val::Int(0));
    f.emit(Instruction::new(OpCode::BindStatic).op1(n).op2(zero));
    let old = f.temp();
    f.emit(Instruction::new(OpCode::PostInc).op1(n).result(old));
    ret(&mut f, n);
    let counter = f.finish_function("counter", Vec::new());

    let mut e = ChunkEmitter::new("main");
    for _ in 0..3 {
        let out = e.temp();
        call(&mut e, "counter", &[], out);
        echo(&mut e, out);
    }

    let result = run_program(program(e.finish(), vec![counter], Vec::new()));
    assert_eq!(result.stdout, "123");
}

#[test]
fn test_global_statement_binds_to_global_cell() {
    // function bump() { global $total; $total .= "!"; }
    let mut f = ChunkEmitter::new("bump");
    let total = f.var("total");
    let name = f.constant(Val::string("total"));
    f.emit(Instruction::new(OpCode::BindGlobal).op1(total).op2(name));
    let bang = f.constant(Val::string("!"));
    f.emit(
        Instruction::new(OpCode::AssignOp)
            .op1(total)
            .op2(bang)
            .ext(BinaryOp::Concat as u8),
    );
    let bump = f.finish_function("bump", Vec::new());

    let mut e = ChunkEmitter::new("main");
    let total = e.var("total");
    let hi = e.constant(Val::string("hi"));
    assign(&mut e, total, hi);
    for _ in 0..2 {
        let out = e.temp();
        call(&mut e, "bump", &[], out);
    }
    echo(&mut e, total);

    let result = run_program(program(e.finish(), vec![bump], Vec::new()));
    assert_eq!(result.stdout, "hi!!");
}

#[test]
fn test_assign_ref_aliases_variables() {
    // $a = 1; $b = &$a; $b = 5; echo $a;
    let mut e = ChunkEmitter::new("main");
    let a = e.var("a");
    let b = e.var("b");
    let one = e.constant(Val::Int(1));
    let five = e.constant(Val::Int(5));
    assign(&mut e, a, one);
    e.emit(Instruction::new(OpCode::AssignRef).op1(b).op2(a));
    assign(&mut e, b, five);
    echo(&mut e, a);

    assert_eq!(run_chunk(e.finish()).stdout, "5");
}

#[test]
fn test_constants_declare_and_fetch() {
    // const GREETING = "hey"; echo GREETING;
    let mut e = ChunkEmitter::new("main");
    let name = e.constant(Val::string("GREETING"));
    let value = e.constant(Val::string("hey"));
    e.emit(Instruction::new(OpCode::DeclareConst).op1(name).op2(value));
    let t = e.temp();
    e.emit(Instruction::new(OpCode::FetchConstant).op2(name).result(t));
    echo(&mut e, t);

    assert_eq!(run_chunk(e.finish()).stdout, "hey");
}

#[test]
fn test_undefined_constant_is_an_error() {
    let mut e = ChunkEmitter::new("main");
    let name = e.constant(Val::string("NOPE"));
    let t = e.temp();
    e.emit(Instruction::new(OpCode::FetchConstant).op2(name).result(t));

    let err = run_program_err(program(e.finish(), Vec::new(), Vec::new()));
    assert!(err.to_string().contains("Undefined constant \"NOPE\""));
}

#[test]
fn test_rope_builds_interpolated_string() {
    // "x=$x;"
    let mut e = ChunkEmitter::new("main");
    let x = e.var("x");
    let seven = e.constant(Val::Int(7));
    assign(&mut e, x, seven);
    let prefix = e.constant(Val::string("x="));
    let suffix = e.constant(Val::string(";"));
    let rope = e.temp();
    e.emit(Instruction::new(OpCode::RopeInit).op2(prefix).result(rope));
    e.emit(Instruction::new(OpCode::RopeAdd).op1(rope).op2(x).result(rope));
    let out = e.temp();
    e.emit(Instruction::new(OpCode::RopeEnd).op1(rope).op2(suffix).result(out));
    echo(&mut e, out);

    assert_eq!(run_chunk(e.finish()).stdout, "x=7;");
}

#[test]
fn test_globals_from_config_are_visible() {
    let mut e = ChunkEmitter::new("main");
    let name = e.var("name");
    echo_str(&mut e, "hello ");
    echo(&mut e, name);

    let config = ExecutionConfig::default().with_global("name", Val::string("vm"));
    let result = execute_program(program(e.finish(), Vec::new(), Vec::new()), config).unwrap();
    assert_eq!(result.stdout, "hello vm");
}

#[test]
fn test_string_increment_and_decrement_are_numeric() {
    // $s = "abc"; $s++; $t = "abc"; $t--; $u = "1.5"; ++$u; echo $s, "|", $t, "|", $u;
    let mut e = ChunkEmitter::new("main");
    let s = e.var("s");
    let t = e.var("t");
    let u = e.var("u");
    let abc = e.constant(Val::string("abc"));
    let decimal = e.constant(Val::string("1.5"));
    assign(&mut e, s, abc);
    assign(&mut e, t, abc);
    assign(&mut e, u, decimal);
    let old = e.temp();
    e.emit(Instruction::new(OpCode::PostInc).op1(s).result(old));
    let old = e.temp();
    e.emit(Instruction::new(OpCode::PostDec).op1(t).result(old));
    let new = e.temp();
    e.emit(Instruction::new(OpCode::PreInc).op1(u).result(new));
    echo(&mut e, s);
    echo_str(&mut e, "|");
    echo(&mut e, t);
    echo_str(&mut e, "|");
    echo(&mut e, u);

    assert_eq!(run_chunk(e.finish()).stdout, "1|-1|2.5");
}
