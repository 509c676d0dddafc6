// Debug hooks: count and line events, call/return events, and hook
// yields that re-execute the interrupted instruction on resume.

use super::*;
use crate::lua_value::ProtoBuilder;
use crate::lua_vm::opcode::{Instruction, OpCode, rk_const};
use crate::lua_vm::{HookAction, HookEvent, MASK_CALL, MASK_COUNT, MASK_LINE, MASK_RET};

fn bump_global(s: &mut LuaState, name: &str) {
    let vm = s.vm_mut();
    let v = vm.get_global(name).as_number().unwrap_or(0.0);
    vm.set_global(name, num(v + 1.0));
}

fn counting_hook(s: &mut LuaState, e: HookEvent) -> LuaResult<HookAction> {
    match e {
        HookEvent::Count => bump_global(s, "count_hits"),
        HookEvent::Line(_) => bump_global(s, "line_hits"),
        HookEvent::Call => bump_global(s, "call_hits"),
        HookEvent::Return => bump_global(s, "ret_hits"),
    }
    Ok(HookAction::Continue)
}

fn yield_once_hook(s: &mut LuaState, e: HookEvent) -> LuaResult<HookAction> {
    if matches!(e, HookEvent::Count) {
        let vm = s.vm_mut();
        if vm.get_global("hook_yielded").is_nil() {
            vm.set_global("hook_yielded", crate::lua_value::LuaValue::boolean(true));
            return Ok(HookAction::Yield);
        }
    }
    Ok(HookAction::Continue)
}

/// for i = 1, 10 do sum = sum + i end; return sum
fn sum_loop_proto() -> std::rc::Rc<crate::lua_value::Proto> {
    let mut b = ProtoBuilder::new("sumloop").stack_size(6);
    let k0 = b.constant(num(0.0));
    let k1 = b.constant(num(1.0));
    let k10 = b.constant(num(10.0));
    b.emit_line(Instruction::abx(OpCode::LoadK, 0, k0 as u32), 1);
    b.emit_line(Instruction::abx(OpCode::LoadK, 1, k1 as u32), 2);
    b.emit_line(Instruction::abx(OpCode::LoadK, 2, k10 as u32), 2);
    b.emit_line(Instruction::abx(OpCode::LoadK, 3, k1 as u32), 2);
    b.emit_line(Instruction::asbx(OpCode::ForPrep, 1, 1), 2);
    b.emit_line(Instruction::abc(OpCode::Add, 0, 0, 4), 3);
    b.emit_line(Instruction::asbx(OpCode::ForLoop, 1, -2), 2);
    b.emit_line(Instruction::abc(OpCode::Return, 0, 2, 0), 4);
    b.build()
}

#[test]
fn test_count_hook_fires() {
    let mut vm = LuaVm::new();
    vm.main_state().set_hook(Some(counting_hook), MASK_COUNT, 3);
    let main = vm.load(sum_loop_proto());
    let r = vm.call_function(main, vec![]).unwrap();
    assert_eq!(expect_number(&r[0]), 55.0);
    let hits = vm.get_global("count_hits").as_number().unwrap_or(0.0);
    assert!(hits >= 5.0, "count hook fired {hits} times");
    vm.main_state().set_hook(None, 0, 0);
}

#[test]
fn test_line_hook_fires_per_line() {
    let mut vm = LuaVm::new();
    vm.main_state().set_hook(Some(counting_hook), MASK_LINE, 0);
    let main = vm.load(sum_loop_proto());
    let r = vm.call_function(main, vec![]).unwrap();
    assert_eq!(expect_number(&r[0]), 55.0);
    let hits = vm.get_global("line_hits").as_number().unwrap_or(0.0);
    // entry line, loop line transitions and the return line
    assert!(hits >= 4.0, "line hook fired {hits} times");
    vm.main_state().set_hook(None, 0, 0);
}

#[test]
fn test_call_return_hooks() {
    let mut vm = LuaVm::new();

    let mut inner = ProtoBuilder::new("inner").stack_size(2);
    let k = inner.constant(num(1.0));
    inner.emit(Instruction::abx(OpCode::LoadK, 0, k as u32));
    inner.emit(Instruction::abc(OpCode::Return, 0, 2, 0));
    let inner = vm.load(inner.build());
    vm.set_global("inner", inner);

    let iname = vm.create_string("inner");
    let mut b = ProtoBuilder::new("outer").stack_size(3);
    let ki = b.constant(iname);
    b.emit(Instruction::abx(OpCode::GetGlobal, 0, ki as u32));
    b.emit(Instruction::abc(OpCode::Call, 0, 1, 2));
    b.emit(Instruction::abc(OpCode::Return, 0, 2, 0));
    let outer = vm.load(b.build());

    vm.main_state()
        .set_hook(Some(counting_hook), MASK_CALL | MASK_RET, 0);
    vm.call_function(outer, vec![]).unwrap();
    vm.main_state().set_hook(None, 0, 0);

    let calls = vm.get_global("call_hits").as_number().unwrap_or(0.0);
    let rets = vm.get_global("ret_hits").as_number().unwrap_or(0.0);
    assert!(calls >= 2.0, "call hook fired {calls} times");
    assert!(rets >= 2.0, "return hook fired {rets} times");
}

#[test]
fn test_hook_yield_resumes_same_instruction() {
    // a counting hook yields once in the middle of the loop; after the
    // resume the program still computes the right answer
    let mut vm = LuaVm::new();
    let main = vm.load(sum_loop_proto());
    let co = vm.create_coroutine(main);
    let co_id = co.thvalue();
    vm.pool
        .thread_mut(co_id)
        .set_hook(Some(yield_once_hook), MASK_COUNT, 5);

    let s = vm.main_state();
    let (done, vals) = s.resume_thread(co_id, vec![]).unwrap();
    assert!(!done, "hook yield suspends the thread");
    assert!(vals.is_empty());

    let s = vm.main_state();
    let (done, vals) = s.resume_thread(co_id, vec![]).unwrap();
    assert!(done);
    assert_eq!(expect_number(&vals[0]), 55.0);
    assert!(!vm.get_global("hook_yielded").is_nil());
}
