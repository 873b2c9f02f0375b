mod common;

use common::*;
use php_vm::compiler::chunk::FuncParam;
use php_vm::compiler::emitter::ChunkEmitter;
use php_vm::core::value::Val;
use php_vm::runtime::context::ClassDef;
use php_vm::vm::opcode::{BIND_REF, Instruction, OpCode, Operand};
use std::rc::Rc;

/// function () use ($x) { $x = $x + <delta>; return $x; }
fn adder_closure(name: &str, delta: i64) -> php_vm::compiler::chunk::UserFunc {
    let mut f = ChunkEmitter::new(name);
    let x = f.var("x");
    let d = f.constant(Val::Int(delta));
    let t = f.temp();
    f.emit(Instruction::new(OpCode::Add).op1(x).op2(d).result(t));
    assign(&mut f, x, t);
    ret(&mut f, x);
    f.finish_function(name, Vec::new())
}

fn declare_closure(e: &mut ChunkEmitter, name: &str, captured: Operand, by_ref: bool) -> Operand {
    let body = e.constant(Val::string(name));
    let closure = e.temp();
    e.emit(Instruction::new(OpCode::DeclareLambdaFunction).op1(body).result(closure));
    let bind = Instruction::new(OpCode::BindLexical)
        .op1(closure)
        .op2(captured)
        .result(Operand::Num(0));
    e.emit(if by_ref { bind.ext(BIND_REF) } else { bind });
    closure
}

fn call_closure(e: &mut ChunkEmitter, callable: Operand, result: Operand) {
    e.emit(
        Instruction::new(OpCode::InitDynamicCall)
            .op1(Operand::Num(0))
            .op2(callable),
    );
    e.emit(Instruction::new(OpCode::DoFcall).result(result));
}

#[test]
fn test_closure_captures_by_value() {
    // $x = 1; $f = function () use ($x) {...}; $x = 100; echo $f(), " ", $x;
    let mut e = ChunkEmitter::new("main");
    let x = e.var("x");
    let f = e.var("f");
    let one = e.constant(Val::Int(1));
    assign(&mut e, x, one);
    let closure = declare_closure(&mut e, "{closure:value}", x, false);
    assign(&mut e, f, closure);
    let hundred = e.constant(Val::Int(100));
    assign(&mut e, x, hundred);
    let out = e.temp();
    call_closure(&mut e, f, out);
    echo(&mut e, out);
    echo_str(&mut e, " ");
    echo(&mut e, x);

    let result = run_program(program(
        e.finish(),
        vec![adder_closure("{closure:value}", 10)],
        Vec::new(),
    ));
    assert_eq!(result.stdout, "11 100");
}

#[test]
fn test_closure_captures_by_reference() {
    // $x = 1; $g = function () use (&$x) {...}; $g(); $g(); echo $x;
    let mut e = ChunkEmitter::new("main");
    let x = e.var("x");
    let g = e.var("g");
    let one = e.constant(Val::Int(1));
    assign(&mut e, x, one);
    let closure = declare_closure(&mut e, "{closure:ref}", x, true);
    assign(&mut e, g, closure);
    let first = e.temp();
    call_closure(&mut e, g, first);
    let second = e.temp();
    call_closure(&mut e, g, second);
    echo(&mut e, x);

    let result = run_program(program(
        e.finish(),
        vec![adder_closure("{closure:ref}", 10)],
        Vec::new(),
    ));
    assert_eq!(result.stdout, "21");
}

#[test]
fn test_method_reads_this_property() {
    // class Point { public $x = 3; function getX() { return $this->x; } }
    let mut m = ChunkEmitter::new("getX");
    m.var("this");
    let prop = m.constant(Val::string("x"));
    let t = m.temp();
    m.emit(Instruction::new(OpCode::FetchObjR).op2(prop).result(t));
    ret(&mut m, t);
    let mut get_x = m.finish_function("getX", Vec::new());
    get_x.is_method = true;

    let mut point = ClassDef::new("Point");
    point.add_property("x", Val::Int(3));
    point.add_user_method(Rc::new(get_x));

    let mut e = ChunkEmitter::new("main");
    let p = e.var("p");
    let obj = e.temp();
    new_object(&mut e, "Point", &[], obj);
    assign(&mut e, p, obj);
    let out = e.temp();
    method_call(&mut e, p, "getX", &[], out);
    echo(&mut e, out);

    let result = run_program(program(e.finish(), Vec::new(), vec![point]));
    assert_eq!(result.stdout, "3");
}

#[test]
fn test_static_method_call() {
    // class M { static function twice($v) { return $v * 2; } } echo M::twice(21);
    let mut m = ChunkEmitter::new("twice");
    let v = m.var("v");
    let two = m.constant(Val::Int(2));
    let t = m.temp();
    m.emit(Instruction::new(OpCode::Mul).op1(v).op2(two).result(t));
    ret(&mut m, t);
    let mut twice = m.finish_function("twice", vec![FuncParam::required("v")]);
    twice.is_static = true;

    let mut class = ClassDef::new("M");
    class.add_user_method(Rc::new(twice));

    let mut e = ChunkEmitter::new("main");
    let name = e.constant(Val::string("M"));
    let method = e.constant(Val::string("twice"));
    let arg = e.constant(Val::Int(21));
    e.emit(
        Instruction::new(OpCode::InitStaticMethodCall)
            .op1(name)
            .op2(method)
            .result(Operand::Num(1)),
    );
    e.emit(Instruction::new(OpCode::SendVal).op1(arg));
    let out = e.temp();
    e.emit(Instruction::new(OpCode::DoFcall).result(out));
    echo(&mut e, out);

    let result = run_program(program(e.finish(), Vec::new(), vec![class]));
    assert_eq!(result.stdout, "42");
}

#[test]
fn test_static_property_is_shared_with_subclasses() {
    // class Counter { static $n = 0; } class Sub extends Counter {}
    // Sub::$n = 5; ++Counter::$n; echo Sub::$n;
    let mut counter = ClassDef::new("Counter");
    counter.add_static_property("n", Val::Int(0));
    let sub = ClassDef::new("Sub").extends("Counter");

    let mut e = ChunkEmitter::new("main");
    let sub_name = e.constant(Val::string("Sub"));
    let counter_name = e.constant(Val::string("Counter"));
    let prop = e.constant(Val::string("n"));
    let five = e.constant(Val::Int(5));
    e.emit(Instruction::new(OpCode::AssignStaticProp).op1(sub_name).op2(prop));
    e.emit(Instruction::new(OpCode::OpData).op1(five));
    let t = e.temp();
    e.emit(
        Instruction::new(OpCode::PreIncStaticProp)
            .op1(counter_name)
            .op2(prop)
            .result(t),
    );
    let read = e.temp();
    e.emit(
        Instruction::new(OpCode::FetchStaticPropR)
            .op1(sub_name)
            .op2(prop)
            .result(read),
    );
    echo(&mut e, read);

    let result = run_program(program(e.finish(), Vec::new(), vec![counter, sub]));
    assert_eq!(result.stdout, "6");
}

#[test]
fn test_undeclared_static_property_read_fails() {
    let mut e = ChunkEmitter::new("main");
    let class = e.constant(Val::string("Counter"));
    let prop = e.constant(Val::string("missing"));
    let t = e.temp();
    e.emit(Instruction::new(OpCode::FetchStaticPropR).op1(class).op2(prop).result(t));

    let mut counter = ClassDef::new("Counter");
    counter.add_static_property("n", Val::Int(0));
    let err = run_program_err(program(e.finish(), Vec::new(), vec![counter]));
    assert!(err.to_string().contains("Access to undeclared static property Counter::$missing"));
}

/// class A { public $n = 7; function who() { return $this->n; } }
fn base_with_instance_method() -> ClassDef {
    let mut m = ChunkEmitter::new("who");
    m.var("this");
    let prop = m.constant(Val::string("n"));
    let t = m.temp();
    m.emit(Instruction::new(OpCode::FetchObjR).op2(prop).result(t));
    ret(&mut m, t);
    let mut who = m.finish_function("who", Vec::new());
    who.is_method = true;

    let mut a = ClassDef::new("A");
    a.add_property("n", Val::Int(7));
    a.add_user_method(Rc::new(who));
    a
}

fn static_call(e: &mut ChunkEmitter, class: &str, method: &str, result: Operand) {
    let class = e.constant(Val::string(class));
    let method = e.constant(Val::string(method));
    e.emit(
        Instruction::new(OpCode::InitStaticMethodCall)
            .op1(class)
            .op2(method)
            .result(Operand::Num(0)),
    );
    e.emit(Instruction::new(OpCode::DoFcall).result(result));
}

#[test]
fn test_parent_call_runs_instance_method_on_current_object() {
    // class B extends A { function who() { return parent::who(); } }
    // echo (new B)->who();
    let mut m = ChunkEmitter::new("who");
    m.var("this");
    let t = m.temp();
    static_call(&mut m, "parent", "who", t);
    ret(&mut m, t);
    let mut who = m.finish_function("who", Vec::new());
    who.is_method = true;
    let mut b = ClassDef::new("B").extends("A");
    b.add_user_method(Rc::new(who));

    let mut e = ChunkEmitter::new("main");
    let obj = e.temp();
    new_object(&mut e, "B", &[], obj);
    let out = e.temp();
    method_call(&mut e, obj, "who", &[], out);
    echo(&mut e, out);

    let result = run_program(program(
        e.finish(),
        Vec::new(),
        vec![base_with_instance_method(), b],
    ));
    assert_eq!(result.stdout, "7");
}

#[test]
fn test_instance_method_called_statically_without_object_fails() {
    // echo A::who();
    let mut e = ChunkEmitter::new("main");
    let out = e.temp();
    static_call(&mut e, "A", "who", out);
    echo(&mut e, out);

    let err = run_program_err(program(
        e.finish(),
        Vec::new(),
        vec![base_with_instance_method()],
    ));
    assert!(err
        .to_string()
        .contains("Non-static method A::who() cannot be called statically"));
}
