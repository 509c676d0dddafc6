/*----------------------------------------------------------------------
  The dispatch loop.

  Single-loop execution: function calls and returns update the frame
  stack and jump back to 'startfunc, which reloads the frame context
  (function, base, saved program counter). Anything that can call out —
  metamethods, table chains, native functions, the concat engine, the
  debug hook — gets the program counter saved first and the base
  re-derived afterwards, because the value stack may have been
  reallocated underneath the instruction.
----------------------------------------------------------------------*/

pub mod call;
mod concat;
mod coroutine;
mod metamethod;
mod table_ops;

pub use concat::vm_concat;
pub use coroutine::{do_yield, resume};
pub use metamethod::{
    TmKind, call_bin_tm, call_tm, call_tm_res, equal_obj, get_metatable, get_tm_by_obj,
    less_equal, less_than, to_number, to_string_value,
};
pub use table_ops::{vm_gettable, vm_settable};

use crate::lua_value::LuaValue;
use crate::lua_vm::lua_limits::{LFIELDS_PER_FLUSH, MAXSTACK};
use crate::lua_vm::lua_state::{HookAction, HookEvent, MASK_COUNT, MASK_LINE};
use crate::lua_vm::opcode::OpCode;
use crate::lua_vm::{LuaError, LuaResult, LuaState};

use call::{PrecallResult, call_value, poscall, precall};
use metamethod::arith;

/// Run interpreted frames until the frame stack shrinks back to
/// `target_depth`.
pub fn lua_execute(s: &mut LuaState, target_depth: usize) -> LuaResult<()> {
    'startfunc: loop {
        if s.call_depth() <= target_depth {
            return Ok(());
        }
        let frame_idx = s.call_depth() - 1;

        // A finished call may have left the logical top below the frame's
        // register window with stale values above it; clear them so the
        // collector never sees dangling references. The top itself is not
        // raised, so a pending variadic result count stays intact.
        {
            let ci_top = s.frame(frame_idx).top;
            if s.stack_top < ci_top {
                s.grow_stack(ci_top);
                for i in s.stack_top..ci_top {
                    s.stack[i] = LuaValue::nil();
                }
            }
        }

        // A native frame at the top here means a yield was resumed without
        // finishing the call protocol; the resume path handles that before
        // re-entering, so this is a Lua frame.
        let (func_value, mut base, mut pc) = {
            let ci = s.frame(frame_idx);
            debug_assert!(ci.is_lua());
            (ci.func, ci.base, ci.saved_pc as usize)
        };
        let fid = func_value.clvalue();
        let (proto, globals) = {
            let cl = s.vm().pool.closure(fid);
            (cl.proto.clone(), cl.globals)
        };

        macro_rules! save_pc {
            () => {
                s.set_frame_pc(frame_idx, pc as u32)
            };
        }
        // base is re-derived after anything that can reallocate the stack
        // or re-enter the VM
        macro_rules! restore_base {
            () => {
                base = s.frame_base(frame_idx)
            };
        }
        macro_rules! rk {
            ($f:expr) => {{
                let f = $f as usize;
                if f < MAXSTACK {
                    s.stack_get(base + f)
                } else {
                    proto.constants[f - MAXSTACK]
                }
            }};
        }
        // conditional instructions either skip the following JMP or take it
        macro_rules! do_cond_jump {
            ($cond:expr) => {
                if $cond {
                    let offset = proto.code[pc].get_sbx();
                    pc = (pc as i64 + offset as i64 + 1) as usize;
                } else {
                    pc += 1;
                }
            };
        }

        loop {
            let instr = proto.code[pc];
            pc += 1;

            // line/count hooks run before the instruction; a yielding hook
            // backs the program counter up so the instruction re-executes
            // on resume
            if s.hook_mask & (MASK_LINE | MASK_COUNT) != 0 {
                s.hook_count -= 1;
                if s.hook_count == 0 || s.hook_mask & MASK_LINE != 0 {
                    let action = traceexec(s, frame_idx, pc, &proto)?;
                    if action == HookAction::Yield {
                        if s.nny > 0 {
                            return Err(s.rt_error(
                                "attempt to yield across metamethod/C-call boundary",
                            ));
                        }
                        s.set_frame_pc(frame_idx, (pc - 1) as u32);
                        s.yield_values.clear();
                        return Err(LuaError::Yield);
                    }
                    // the hook may have re-entered the VM
                    restore_base!();
                }
            }

            match instr.get_opcode() {
                OpCode::Move => {
                    let v = s.stack_get(base + instr.get_b() as usize);
                    s.stack_set(base + instr.get_a() as usize, v);
                }
                OpCode::LoadK => {
                    let k = proto.constants[instr.get_bx() as usize];
                    s.stack_set(base + instr.get_a() as usize, k);
                }
                OpCode::LoadBool => {
                    let b = instr.get_b() != 0;
                    s.stack_set(base + instr.get_a() as usize, LuaValue::boolean(b));
                    if instr.get_c() != 0 {
                        pc += 1; // skip next instruction
                    }
                }
                OpCode::LoadNil => {
                    let a = instr.get_a() as usize;
                    let b = instr.get_b() as usize;
                    for i in a..=b {
                        s.stack_set(base + i, LuaValue::nil());
                    }
                }
                OpCode::GetUpval => {
                    let b = instr.get_b() as usize;
                    let uv = s.vm().pool.closure(fid).upvalues[b];
                    let v = s.upvalue_get(uv);
                    s.stack_set(base + instr.get_a() as usize, v);
                }
                OpCode::SetUpval => {
                    let b = instr.get_b() as usize;
                    let uv = s.vm().pool.closure(fid).upvalues[b];
                    let v = s.stack_get(base + instr.get_a() as usize);
                    s.upvalue_set(uv, v);
                }
                OpCode::GetGlobal => {
                    let k = proto.constants[instr.get_bx() as usize];
                    save_pc!();
                    let v = vm_gettable(s, globals, k)?;
                    restore_base!();
                    s.stack_set(base + instr.get_a() as usize, v);
                }
                OpCode::SetGlobal => {
                    let k = proto.constants[instr.get_bx() as usize];
                    let v = s.stack_get(base + instr.get_a() as usize);
                    save_pc!();
                    vm_settable(s, globals, k, v)?;
                    restore_base!();
                }
                OpCode::GetTable => {
                    let t = s.stack_get(base + instr.get_b() as usize);
                    let k = rk!(instr.get_c());
                    save_pc!();
                    let v = vm_gettable(s, t, k)?;
                    restore_base!();
                    s.stack_set(base + instr.get_a() as usize, v);
                }
                OpCode::SetTable => {
                    let t = s.stack_get(base + instr.get_a() as usize);
                    let k = rk!(instr.get_b());
                    let v = rk!(instr.get_c());
                    save_pc!();
                    vm_settable(s, t, k, v)?;
                    restore_base!();
                }
                OpCode::NewTable => {
                    let array_hint = crate::lua_vm::opcode::fb2int(instr.get_b()) as usize;
                    let hash_hint = instr.get_c() as usize;
                    let t = s.vm_mut().create_table(array_hint, hash_hint);
                    s.stack_set(base + instr.get_a() as usize, t);
                    save_pc!();
                    s.vm_mut().check_gc();
                    restore_base!();
                }
                OpCode::Self_ => {
                    let a = instr.get_a() as usize;
                    let rb = s.stack_get(base + instr.get_b() as usize);
                    let k = rk!(instr.get_c());
                    s.stack_set(base + a + 1, rb);
                    save_pc!();
                    let v = vm_gettable(s, rb, k)?;
                    restore_base!();
                    s.stack_set(base + a, v);
                }
                OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div => {
                    let a = instr.get_a() as usize;
                    let rb = rk!(instr.get_b());
                    let rc = rk!(instr.get_c());
                    if rb.is_number() && rc.is_number() {
                        let (b, c) = (rb.nvalue(), rc.nvalue());
                        let r = match instr.get_opcode() {
                            OpCode::Add => b + c,
                            OpCode::Sub => b - c,
                            OpCode::Mul => b * c,
                            _ => b / c,
                        };
                        s.stack_set(base + a, LuaValue::number(r));
                    } else {
                        let event = match instr.get_opcode() {
                            OpCode::Add => TmKind::Add,
                            OpCode::Sub => TmKind::Sub,
                            OpCode::Mul => TmKind::Mul,
                            _ => TmKind::Div,
                        };
                        save_pc!();
                        arith(s, base + a, rb, rc, event, globals)?;
                        restore_base!();
                    }
                }
                OpCode::Pow => {
                    // no inline fast path: `^` always goes through the
                    // global handler or the metamethod protocol
                    let a = instr.get_a() as usize;
                    let rb = rk!(instr.get_b());
                    let rc = rk!(instr.get_c());
                    save_pc!();
                    arith(s, base + a, rb, rc, TmKind::Pow, globals)?;
                    restore_base!();
                }
                OpCode::Unm => {
                    let a = instr.get_a() as usize;
                    let rb = s.stack_get(base + instr.get_b() as usize);
                    if let Some(n) = to_number(s, &rb) {
                        s.stack_set(base + a, LuaValue::number(-n));
                    } else {
                        save_pc!();
                        match call_bin_tm(s, rb, LuaValue::nil(), TmKind::Unm)? {
                            Some(r) => {
                                restore_base!();
                                s.stack_set(base + a, r);
                            }
                            None => return Err(s.arith_error(&rb, &LuaValue::nil())),
                        }
                    }
                }
                OpCode::Not => {
                    let rb = s.stack_get(base + instr.get_b() as usize);
                    s.stack_set(
                        base + instr.get_a() as usize,
                        LuaValue::boolean(rb.is_falsy()),
                    );
                }
                OpCode::Concat => {
                    let a = instr.get_a() as usize;
                    let b = instr.get_b() as usize;
                    let c = instr.get_c() as usize;
                    save_pc!();
                    vm_concat(s, c - b + 1, base + c)?;
                    s.vm_mut().check_gc();
                    restore_base!();
                    let v = s.stack_get(base + b);
                    s.stack_set(base + a, v);
                }
                OpCode::Jmp => {
                    pc = (pc as i64 + instr.get_sbx() as i64) as usize;
                }
                OpCode::Eq => {
                    let rb = rk!(instr.get_b());
                    let rc = rk!(instr.get_c());
                    save_pc!();
                    let r = equal_obj(s, rb, rc)?;
                    restore_base!();
                    do_cond_jump!(r == (instr.get_a() != 0));
                }
                OpCode::Lt => {
                    let rb = rk!(instr.get_b());
                    let rc = rk!(instr.get_c());
                    save_pc!();
                    let r = less_than(s, rb, rc)?;
                    restore_base!();
                    do_cond_jump!(r == (instr.get_a() != 0));
                }
                OpCode::Le => {
                    let rb = rk!(instr.get_b());
                    let rc = rk!(instr.get_c());
                    save_pc!();
                    let r = less_equal(s, rb, rc)?;
                    restore_base!();
                    do_cond_jump!(r == (instr.get_a() != 0));
                }
                OpCode::Test => {
                    let rb = s.stack_get(base + instr.get_b() as usize);
                    if rb.is_falsy() == (instr.get_c() != 0) {
                        pc += 1;
                    } else {
                        s.stack_set(base + instr.get_a() as usize, rb);
                        let offset = proto.code[pc].get_sbx();
                        pc = (pc as i64 + offset as i64 + 1) as usize;
                    }
                }
                OpCode::Call => {
                    let ra = base + instr.get_a() as usize;
                    let b = instr.get_b() as usize;
                    if b != 0 {
                        s.set_top(ra + b); // else the previous instruction set the top
                    }
                    let nresults = instr.get_c() as i32 - 1;
                    save_pc!();
                    match precall(s, ra, nresults)? {
                        PrecallResult::CFinished => {
                            if nresults >= 0 {
                                let t = s.frame(frame_idx).top;
                                s.set_top(t);
                            }
                            restore_base!();
                        }
                        PrecallResult::Lua => {
                            continue 'startfunc;
                        }
                    }
                }
                OpCode::TailCall => {
                    let ra = base + instr.get_a() as usize;
                    let b = instr.get_b() as usize;
                    if b != 0 {
                        s.set_top(ra + b);
                    }
                    save_pc!();
                    match precall(s, ra, -1)? {
                        PrecallResult::CFinished => {
                            // native tail target ran inline; the following
                            // RETURN picks its results up from the top
                            restore_base!();
                        }
                        PrecallResult::Lua => {
                            // fold the new frame into the current one
                            let (new_func, new_base, new_top) = {
                                let ci = s.frame(s.call_depth() - 1);
                                (ci.func, ci.base, ci.top)
                            };
                            let new_frame_size = new_top - new_base;
                            if s.has_open_upvalues() {
                                s.close_upvalues(base);
                            }
                            let func_pos = base - 1;
                            let move_from = new_base - 1;
                            let n = s.get_top() - move_from;
                            for i in 0..n {
                                let v = s.stack_get(move_from + i);
                                s.stack_set(func_pos + i, v);
                            }
                            s.pop_frame();
                            let ci = s.frame_mut(frame_idx);
                            ci.func = new_func;
                            ci.base = base;
                            ci.top = base + new_frame_size;
                            ci.saved_pc = 0;
                            ci.tailcalls += 1;
                            let t = ci.top;
                            s.set_top(t);
                            continue 'startfunc;
                        }
                    }
                }
                OpCode::Return => {
                    let ra = base + instr.get_a() as usize;
                    let b = instr.get_b() as usize;
                    if b != 0 {
                        s.set_top(ra + b - 1);
                    }
                    if s.has_open_upvalues() {
                        s.close_upvalues(base);
                    }
                    save_pc!();
                    let nresults = s.frame(frame_idx).nresults;
                    poscall(s, nresults, ra)?;
                    if s.call_depth() <= target_depth {
                        return Ok(());
                    }
                    // restore the caller's register window unless it is
                    // collecting a variadic result count
                    if nresults >= 0 {
                        let t = s.frame(s.call_depth() - 1).top;
                        s.set_top(t);
                    }
                    continue 'startfunc;
                }
                OpCode::ForLoop => {
                    let ra = base + instr.get_a() as usize;
                    let (idx0, limit, step) = (
                        s.stack_get(ra),
                        s.stack_get(ra + 1),
                        s.stack_get(ra + 2),
                    );
                    if !idx0.is_number() || !limit.is_number() || !step.is_number() {
                        save_pc!();
                        return Err(s.rt_error("'for' initial value must be a number"));
                    }
                    let step = step.nvalue();
                    let idx = idx0.nvalue() + step;
                    let limit = limit.nvalue();
                    let in_range = if step > 0.0 { idx <= limit } else { idx >= limit };
                    if in_range {
                        pc = (pc as i64 + instr.get_sbx() as i64) as usize;
                        s.stack_set(ra, LuaValue::number(idx)); // internal index
                        s.stack_set(ra + 3, LuaValue::number(idx)); // user variable
                    }
                }
                OpCode::ForPrep => {
                    let ra = base + instr.get_a() as usize;
                    save_pc!();
                    let init = match to_number(s, &s.stack_get(ra)) {
                        Some(n) => n,
                        None => {
                            return Err(s.rt_error("'for' initial value must be a number"));
                        }
                    };
                    let limit = match to_number(s, &s.stack_get(ra + 1)) {
                        Some(n) => n,
                        None => return Err(s.rt_error("'for' limit must be a number")),
                    };
                    let step = match to_number(s, &s.stack_get(ra + 2)) {
                        Some(n) => n,
                        None => return Err(s.rt_error("'for' step must be a number")),
                    };
                    s.stack_set(ra + 1, LuaValue::number(limit));
                    s.stack_set(ra + 2, LuaValue::number(step));
                    // pre-decrement: the first FORLOOP iteration restores it
                    s.stack_set(ra, LuaValue::number(init - step));
                    pc = (pc as i64 + instr.get_sbx() as i64) as usize;
                }
                OpCode::TForLoop => {
                    let a = instr.get_a() as usize;
                    let ra = base + a;
                    let cb = ra + 3; // call base
                    let (f, state_v, ctrl) = (
                        s.stack_get(ra),
                        s.stack_get(ra + 1),
                        s.stack_get(ra + 2),
                    );
                    s.stack_set(cb, f);
                    s.stack_set(cb + 1, state_v);
                    s.stack_set(cb + 2, ctrl);
                    s.set_top(cb + 3); // function + 2 arguments
                    save_pc!();
                    call_value(s, cb, instr.get_c() as i32)?;
                    {
                        let t = s.frame(frame_idx).top;
                        s.set_top(t);
                    }
                    restore_base!();
                    let cb = base + a + 3; // the call may have moved the stack
                    let first = s.stack_get(cb);
                    if first.is_nil() {
                        pc += 1; // loop is over: skip the jump back
                    } else {
                        s.stack_set(cb - 1, first); // save control variable
                        let offset = proto.code[pc].get_sbx();
                        pc = (pc as i64 + offset as i64 + 1) as usize;
                    }
                }
                OpCode::TForPrep => {
                    // legacy generic-for: a table control value is shifted
                    // to the state slot and the global iteration function
                    // takes its place
                    let ra = base + instr.get_a() as usize;
                    let v = s.stack_get(ra);
                    if v.is_table() {
                        s.stack_set(ra + 1, v);
                        let key = s.vm().const_strings.str_next;
                        let next = s.vm().pool.table(globals.hvalue()).raw_get(&key);
                        s.stack_set(ra, next);
                    }
                    pc = (pc as i64 + instr.get_sbx() as i64) as usize;
                }
                OpCode::SetList | OpCode::SetListO => {
                    let ra = base + instr.get_a() as usize;
                    let t = s.stack_get(ra);
                    if !t.is_table() {
                        save_pc!();
                        return Err(s.type_error(&t, "index"));
                    }
                    let bx = instr.get_bx();
                    let n = if instr.get_opcode() == OpCode::SetList {
                        ((bx & (LFIELDS_PER_FLUSH - 1)) + 1) as usize
                    } else {
                        let n = s.get_top() - ra - 1;
                        let top = s.frame(frame_idx).top;
                        s.set_top(top);
                        n
                    };
                    let offset = (bx & !(LFIELDS_PER_FLUSH - 1)) as usize;
                    let tid = t.hvalue();
                    for j in 1..=n {
                        let v = s.stack_get(ra + j);
                        let vm = s.vm_mut();
                        let _ = vm.raw_set(tid, LuaValue::number((offset + j) as f64), v);
                    }
                }
                OpCode::Close => {
                    let ra = base + instr.get_a() as usize;
                    s.close_upvalues(ra);
                }
                OpCode::Closure => {
                    let bx = instr.get_bx() as usize;
                    let child = proto.protos[bx].clone();
                    let nup = child.nups;
                    let mut upvals = Vec::with_capacity(nup);
                    for _ in 0..nup {
                        // capture pseudo-instructions follow the CLOSURE
                        let pseudo = proto.code[pc];
                        pc += 1;
                        match pseudo.get_opcode() {
                            OpCode::GetUpval => {
                                let b = pseudo.get_b() as usize;
                                upvals.push(s.vm().pool.closure(fid).upvalues[b]);
                            }
                            OpCode::Move => {
                                let b = pseudo.get_b() as usize;
                                upvals.push(s.find_or_create_upvalue(base + b));
                            }
                            _ => {
                                save_pc!();
                                return Err(s.rt_error("malformed closure capture"));
                            }
                        }
                    }
                    // the new closure inherits the enclosing closure's
                    // globals table
                    let clv = s.vm_mut().create_closure_with_env(child, upvals, globals);
                    s.stack_set(base + instr.get_a() as usize, clv);
                    save_pc!();
                    s.vm_mut().check_gc();
                    restore_base!();
                }
            }
        }
    }
}

/// Line/count hook driver. The frame's saved program counter doubles as
/// the "previous position" used to detect backward jumps and new lines.
fn traceexec(
    s: &mut LuaState,
    frame_idx: usize,
    pc: usize,
    proto: &crate::lua_value::Proto,
) -> LuaResult<HookAction> {
    let mask = s.hook_mask;
    let oldpc = s.frame(frame_idx).saved_pc as usize;
    s.set_frame_pc(frame_idx, pc as u32);
    if mask & MASK_COUNT != 0 && s.hook_count == 0 {
        s.hook_count = s.base_hook_count;
        return s.call_hook(HookEvent::Count);
    }
    if mask & MASK_LINE != 0 {
        let npc = pc - 1; // the instruction about to execute
        let newline = proto.line_at(npc);
        // fire on function entry, backward jumps, and line changes
        if npc == 0 || pc <= oldpc || newline != proto.line_at(oldpc.saturating_sub(1)) {
            return s.call_hook(HookEvent::Line(newline));
        }
    }
    Ok(HookAction::Continue)
}

/// Protected call boundary: push `func` and `args` on `s`, run to
/// completion, and collect the results. On error the frames opened by
/// this call are popped, their open upvalues closed, the stack truncated,
/// and the error object left readable in the state.
pub fn protected_call(
    s: &mut LuaState,
    func: LuaValue,
    args: Vec<LuaValue>,
) -> LuaResult<Vec<LuaValue>> {
    let saved_depth = s.call_depth();
    let saved_top = s.get_top();
    let func_idx = saved_top;
    s.push_value(func);
    for a in args {
        s.push_value(a);
    }
    match call_value(s, func_idx, -1) {
        Ok(()) => {
            let top = s.get_top();
            let mut results = Vec::with_capacity(top - func_idx);
            for i in func_idx..top {
                results.push(s.stack_get(i));
            }
            s.set_top(saved_top);
            Ok(results)
        }
        Err(e) => {
            s.close_upvalues(saved_top);
            s.truncate_frames(saved_depth);
            s.set_top(saved_top);
            Err(e)
        }
    }
}
