// Closures and upvalues: shared cells, capture forms, CLOSE, and the
// open -> closed transition.

use super::*;
use crate::lua_value::ProtoBuilder;
use crate::lua_vm::opcode::{Instruction, OpCode};
use std::rc::Rc;

/// getter prototype: `function() return x end` over one upvalue.
fn getter_proto() -> Rc<crate::lua_value::Proto> {
    let mut b = ProtoBuilder::new("getter").upvalues(1).stack_size(2);
    b.emit(Instruction::abc(OpCode::GetUpval, 0, 0, 0));
    b.emit(Instruction::abc(OpCode::Return, 0, 2, 0));
    b.build()
}

/// setter prototype: `function(v) x = v end` over one upvalue.
fn setter_proto() -> Rc<crate::lua_value::Proto> {
    let mut b = ProtoBuilder::new("setter").params(1).upvalues(1).stack_size(2);
    b.emit(Instruction::abc(OpCode::SetUpval, 0, 0, 0));
    b.emit(Instruction::abc(OpCode::Return, 0, 1, 0));
    b.build()
}

/// Build: local x = <init>; return getter, setter  (both capture x).
fn make_pair_proto(init: f64) -> Rc<crate::lua_value::Proto> {
    let mut b = ProtoBuilder::new("pair").stack_size(4);
    let k = b.constant(num(init));
    let pg = b.proto(getter_proto());
    let ps = b.proto(setter_proto());
    b.emit(Instruction::abx(OpCode::LoadK, 0, k as u32));
    b.emit(Instruction::abx(OpCode::Closure, 1, pg as u32));
    b.emit(Instruction::abc(OpCode::Move, 0, 0, 0)); // capture local 0
    b.emit(Instruction::abx(OpCode::Closure, 2, ps as u32));
    b.emit(Instruction::abc(OpCode::Move, 0, 0, 0)); // same local: shared cell
    b.emit(Instruction::abc(OpCode::Return, 1, 3, 0));
    b.build()
}

#[test]
fn test_closed_upvalue_sharing() {
    // after the frame exits, both closures still see one shared cell
    let mut vm = LuaVm::new();
    let pair = vm.load(make_pair_proto(10.0));
    let r = vm.call_function(pair, vec![]).unwrap();
    let (getter, setter) = (r[0], r[1]);

    let g = vm.call_function(getter, vec![]).unwrap();
    assert_eq!(expect_number(&g[0]), 10.0);

    vm.call_function(setter, vec![num(99.0)]).unwrap();
    let g = vm.call_function(getter, vec![]).unwrap();
    assert_eq!(expect_number(&g[0]), 99.0);
}

#[test]
fn test_open_upvalue_aliases_stack_slot() {
    // writing through the setter while the frame is live updates the
    // frame's local
    let mut vm = LuaVm::new();
    let mut b = ProtoBuilder::new("live").stack_size(6);
    let k10 = b.constant(num(10.0));
    let k99 = b.constant(num(99.0));
    let ps = b.proto(setter_proto());
    b.emit(Instruction::abx(OpCode::LoadK, 0, k10 as u32)); // x = 10
    b.emit(Instruction::abx(OpCode::Closure, 1, ps as u32));
    b.emit(Instruction::abc(OpCode::Move, 0, 0, 0)); // capture x
    b.emit(Instruction::abc(OpCode::Move, 2, 1, 0)); // func
    b.emit(Instruction::abx(OpCode::LoadK, 3, k99 as u32));
    b.emit(Instruction::abc(OpCode::Call, 2, 2, 1)); // setter(99)
    b.emit(Instruction::abc(OpCode::Return, 0, 2, 0)); // return x
    let main = vm.load(b.build());
    let r = vm.call_function(main, vec![]).unwrap();
    assert_eq!(expect_number(&r[0]), 99.0);
}

#[test]
fn test_upvalue_capture_from_enclosing_closure() {
    // a nested closure shares the enclosing closure's upvalue (GETUPVAL
    // capture form)
    let mut vm = LuaVm::new();

    // innermost: return x (upvalue)
    let inner = getter_proto();
    // middle: captures x as its own upvalue, returns a getter over it
    let mut b = ProtoBuilder::new("middle").upvalues(1).stack_size(2);
    let pi = b.proto(inner);
    b.emit(Instruction::abx(OpCode::Closure, 0, pi as u32));
    b.emit(Instruction::abc(OpCode::GetUpval, 0, 0, 0)); // share enclosing upvalue
    b.emit(Instruction::abc(OpCode::Return, 0, 2, 0));
    let middle = b.build();

    // outer: local x = 5; m = closure(middle over x); return m()
    let mut b = ProtoBuilder::new("outer").stack_size(4);
    let k5 = b.constant(num(5.0));
    let pm = b.proto(middle);
    b.emit(Instruction::abx(OpCode::LoadK, 0, k5 as u32));
    b.emit(Instruction::abx(OpCode::Closure, 1, pm as u32));
    b.emit(Instruction::abc(OpCode::Move, 0, 0, 0)); // capture x
    b.emit(Instruction::abc(OpCode::Call, 1, 1, 2)); // inner getter
    b.emit(Instruction::abc(OpCode::Call, 1, 1, 2)); // x
    b.emit(Instruction::abc(OpCode::Return, 1, 2, 0));
    let outer = vm.load(b.build());
    let r = vm.call_function(outer, vec![]).unwrap();
    assert_eq!(expect_number(&r[0]), 5.0);
}

#[test]
fn test_close_opcode() {
    // CLOSE forces cells shut while the frame is still live: later writes
    // to the local are no longer observed
    let mut vm = LuaVm::new();
    let mut b = ProtoBuilder::new("close").stack_size(5);
    let k1 = b.constant(num(1.0));
    let k2 = b.constant(num(2.0));
    let pg = b.proto(getter_proto());
    b.emit(Instruction::abx(OpCode::LoadK, 0, k1 as u32)); // x = 1
    b.emit(Instruction::abx(OpCode::Closure, 1, pg as u32));
    b.emit(Instruction::abc(OpCode::Move, 0, 0, 0)); // capture x
    b.emit(Instruction::abc(OpCode::Close, 0, 0, 0)); // close cells >= R0
    b.emit(Instruction::abx(OpCode::LoadK, 0, k2 as u32)); // x = 2 (unseen)
    b.emit(Instruction::abc(OpCode::Call, 1, 1, 2));
    b.emit(Instruction::abc(OpCode::Return, 1, 2, 0));
    let main = vm.load(b.build());
    let r = vm.call_function(main, vec![]).unwrap();
    assert_eq!(expect_number(&r[0]), 1.0);
}

#[test]
fn test_separate_locals_get_separate_cells() {
    // two CLOSURE sequences over different locals must not share
    let mut vm = LuaVm::new();
    let mut b = ProtoBuilder::new("two_cells").stack_size(5);
    let k1 = b.constant(num(1.0));
    let k2 = b.constant(num(2.0));
    let pg = b.proto(getter_proto());
    let pg2 = b.proto(getter_proto());
    b.emit(Instruction::abx(OpCode::LoadK, 0, k1 as u32));
    b.emit(Instruction::abx(OpCode::LoadK, 1, k2 as u32));
    b.emit(Instruction::abx(OpCode::Closure, 2, pg as u32));
    b.emit(Instruction::abc(OpCode::Move, 0, 0, 0)); // over R0
    b.emit(Instruction::abx(OpCode::Closure, 3, pg2 as u32));
    b.emit(Instruction::abc(OpCode::Move, 0, 1, 0)); // over R1
    b.emit(Instruction::abc(OpCode::Return, 2, 3, 0));
    let main = vm.load(b.build());
    let r = vm.call_function(main, vec![]).unwrap();
    let a = vm.call_function(r[0], vec![]).unwrap();
    let b2 = vm.call_function(r[1], vec![]).unwrap();
    assert_eq!(expect_number(&a[0]), 1.0);
    assert_eq!(expect_number(&b2[0]), 2.0);
}
