// Coroutines: the yield/resume handshake through native functions.

use super::*;
use crate::lua_value::ProtoBuilder;
use crate::lua_vm::opcode::{Instruction, OpCode, rk_const};
use crate::lua_vm::ThreadStatus;

#[test]
fn test_resume_runs_to_completion() {
    let mut vm = LuaVm::new();
    let mut b = ProtoBuilder::new("body").params(1).stack_size(3);
    let k1 = b.constant(num(1.0));
    b.emit(Instruction::abc(OpCode::Add, 1, 0, rk_const(k1)));
    b.emit(Instruction::abc(OpCode::Return, 1, 2, 0));
    let body = vm.load(b.build());
    let co = vm.create_coroutine(body);
    let co_id = co.thvalue();

    let s = vm.main_state();
    let (done, vals) = s.resume_thread(co_id, vec![num(41.0)]).unwrap();
    assert!(done);
    assert_eq!(expect_number(&vals[0]), 42.0);
    assert_eq!(vm.pool.thread(co_id).status(), ThreadStatus::Dead);
}

#[test]
fn test_yield_suspends_and_resume_finishes_call() {
    // body: return 1 + yieldfn(5)
    let mut vm = LuaVm::new();
    open_test_shims(&mut vm);

    let yname = vm.create_string("yieldfn");
    let mut b = ProtoBuilder::new("body").stack_size(3);
    let ky = b.constant(yname);
    let k1 = b.constant(num(1.0));
    let k5 = b.constant(num(5.0));
    b.emit(Instruction::abx(OpCode::GetGlobal, 0, ky as u32));
    b.emit(Instruction::abx(OpCode::LoadK, 1, k5 as u32));
    b.emit(Instruction::abc(OpCode::Call, 0, 2, 2)); // R0 = yieldfn(5)
    b.emit(Instruction::abc(OpCode::Add, 0, rk_const(k1), 0));
    b.emit(Instruction::abc(OpCode::Return, 0, 2, 0));
    let body = vm.load(b.build());
    let co = vm.create_coroutine(body);
    let co_id = co.thvalue();

    let s = vm.main_state();
    // first resume: suspends inside the call, carrying its argument out
    let (done, vals) = s.resume_thread(co_id, vec![]).unwrap();
    assert!(!done);
    assert_eq!(expect_number(&vals[0]), 5.0);
    assert_eq!(vm.pool.thread(co_id).status(), ThreadStatus::Suspended);

    // second resume: the argument becomes the call's result
    let s = vm.main_state();
    let (done, vals) = s.resume_thread(co_id, vec![num(41.0)]).unwrap();
    assert!(done);
    assert_eq!(expect_number(&vals[0]), 42.0);
}

#[test]
fn test_yield_multiple_values_roundtrip() {
    let mut vm = LuaVm::new();
    open_test_shims(&mut vm);

    // body: local a, b = yieldfn(1, 2); return a + b
    let yname = vm.create_string("yieldfn");
    let mut b = ProtoBuilder::new("body").stack_size(4);
    let ky = b.constant(yname);
    let k1 = b.constant(num(1.0));
    let k2 = b.constant(num(2.0));
    b.emit(Instruction::abx(OpCode::GetGlobal, 0, ky as u32));
    b.emit(Instruction::abx(OpCode::LoadK, 1, k1 as u32));
    b.emit(Instruction::abx(OpCode::LoadK, 2, k2 as u32));
    b.emit(Instruction::abc(OpCode::Call, 0, 3, 3)); // a, b = yieldfn(1, 2)
    b.emit(Instruction::abc(OpCode::Add, 0, 0, 1));
    b.emit(Instruction::abc(OpCode::Return, 0, 2, 0));
    let body = vm.load(b.build());
    let co = vm.create_coroutine(body);
    let co_id = co.thvalue();

    let s = vm.main_state();
    let (done, vals) = s.resume_thread(co_id, vec![]).unwrap();
    assert!(!done);
    assert_eq!(vals.len(), 2);
    assert_eq!(expect_number(&vals[1]), 2.0);

    let s = vm.main_state();
    let (done, vals) = s.resume_thread(co_id, vec![num(10.0), num(20.0)]).unwrap();
    assert!(done);
    assert_eq!(expect_number(&vals[0]), 30.0);
}

#[test]
fn test_resume_dead_coroutine_errors() {
    let mut vm = LuaVm::new();
    let mut b = ProtoBuilder::new("noop").stack_size(2);
    b.emit(Instruction::abc(OpCode::Return, 0, 1, 0));
    let body = vm.load(b.build());
    let co = vm.create_coroutine(body);
    let co_id = co.thvalue();

    let s = vm.main_state();
    let (done, _) = s.resume_thread(co_id, vec![]).unwrap();
    assert!(done);
    let s = vm.main_state();
    assert!(s.resume_thread(co_id, vec![]).is_err());
    assert_eq!(vm.error_message(), "cannot resume dead coroutine");
}

#[test]
fn test_error_in_coroutine_kills_it() {
    let mut vm = LuaVm::new();
    open_test_shims(&mut vm);
    let ename = vm.create_string("error");
    let bad = vm.create_string("bad");
    let mut b = ProtoBuilder::new("fails").stack_size(3);
    let ke = b.constant(ename);
    let kb = b.constant(bad);
    b.emit(Instruction::abx(OpCode::GetGlobal, 0, ke as u32));
    b.emit(Instruction::abx(OpCode::LoadK, 1, kb as u32));
    b.emit(Instruction::abc(OpCode::Call, 0, 2, 1));
    b.emit(Instruction::abc(OpCode::Return, 0, 1, 0));
    let body = vm.load(b.build());
    let co = vm.create_coroutine(body);
    let co_id = co.thvalue();

    let s = vm.main_state();
    assert!(s.resume_thread(co_id, vec![]).is_err());
    assert_eq!(vm.error_message(), "bad");
    assert_eq!(vm.pool.thread(co_id).status(), ThreadStatus::Dead);
}

#[test]
fn test_native_body_coroutine() {
    // the coroutine body itself is a native function that yields
    fn body(s: &mut LuaState) -> LuaResult<usize> {
        let v = s.arg(1);
        Err(s.yield_with(vec![v]))
    }
    let mut vm = LuaVm::new();
    let co = vm.create_coroutine(crate::lua_value::LuaValue::cfunction(body));
    let co_id = co.thvalue();

    let s = vm.main_state();
    let (done, vals) = s.resume_thread(co_id, vec![num(3.0)]).unwrap();
    assert!(!done);
    assert_eq!(expect_number(&vals[0]), 3.0);

    // finishing resume: the argument becomes the body's result
    let s = vm.main_state();
    let (done, vals) = s.resume_thread(co_id, vec![num(8.0)]).unwrap();
    assert!(done);
    assert_eq!(expect_number(&vals[0]), 8.0);
}
