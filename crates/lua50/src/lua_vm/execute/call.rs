// Call and return machinery: frame installation, argument adjustment,
// native calls, result placement, and the generic entry point used by
// metamethods and the host API.

use crate::lua_value::LuaValue;
use crate::lua_vm::call_info::{CallInfo, call_status};
use crate::lua_vm::execute::lua_execute;
use crate::lua_vm::execute::metamethod::{TmKind, get_tm_by_obj};
use crate::lua_vm::lua_limits::LUA_MINSTACK;
use crate::lua_vm::lua_state::{HookEvent, MASK_CALL, MASK_RET};
use crate::lua_vm::{LuaError, LuaResult, LuaState};

/// What `precall` did with the function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrecallResult {
    /// A new interpreted frame was installed; the dispatch loop must
    /// reroute to it.
    Lua,
    /// A native function ran to completion; its results are in place.
    CFinished,
}

/// Prepare (and for native functions, perform) a call to the value at
/// `func_idx`, whose arguments sit between it and the current top.
pub fn precall(s: &mut LuaState, func_idx: usize, nresults: i32) -> LuaResult<PrecallResult> {
    let mut func = s.stack_get(func_idx);

    if !func.is_function() {
        // `__call`: the original value becomes the first argument
        let tm = get_tm_by_obj(s, &func, TmKind::Call);
        if !tm.is_function() {
            return Err(s.type_error(&func, "call"));
        }
        let top = s.get_top();
        s.grow_stack(top + 1);
        let mut i = top;
        while i > func_idx {
            let v = s.stack_get(i - 1);
            s.stack_set(i, v);
            i -= 1;
        }
        s.stack_set(func_idx, tm);
        s.set_top(top + 1);
        func = tm;
    }

    let base = func_idx + 1;
    if func.is_cfunction() {
        // native call: frame for bookkeeping, run inline, place results
        let nargs = s.get_top() - base;
        s.grow_stack(s.get_top() + LUA_MINSTACK);
        s.push_frame(CallInfo::new_c(func, base, base + nargs + LUA_MINSTACK, nresults))?;
        if s.hook_mask & MASK_CALL != 0 {
            s.call_hook(HookEvent::Call)?;
        }
        let f = func.fvalue();
        match f(s) {
            Ok(nres) => {
                let first_result = s.get_top() - nres;
                poscall(s, nresults, first_result)?;
                Ok(PrecallResult::CFinished)
            }
            Err(LuaError::Yield) => {
                // suspended mid-call: keep the frame, discard anything the
                // function left on the stack, and finish on resume
                let ci = s.current_frame_mut().expect("yielding frame");
                ci.call_status |= call_status::CIST_YIELDED;
                s.set_top(base);
                Err(LuaError::Yield)
            }
            Err(e) => Err(e),
        }
    } else {
        let fid = func.clvalue();
        let proto = s.vm().pool.closure(fid).proto.clone();
        let nargs = s.get_top() - base;

        s.grow_stack(base + proto.maxstacksize);
        // fresh registers beyond the arguments start out nil
        for i in nargs..proto.maxstacksize {
            s.stack_set(base + i, LuaValue::nil());
        }

        if proto.is_vararg {
            // collect extra arguments into the `arg` table, stored in the
            // register after the fixed parameters
            let nfix = proto.numparams;
            let extras = nargs.saturating_sub(nfix);
            let arg_table = {
                let vm = s.vm_mut();
                vm.create_table(extras, 1)
            };
            let tid = arg_table.hvalue();
            for i in 0..extras {
                let v = s.stack_get(base + nfix + i);
                let vm = s.vm_mut();
                let _ = vm.raw_set(tid, LuaValue::number((i + 1) as f64), v);
            }
            let n_key = s.vm_mut().create_string("n");
            let vm = s.vm_mut();
            let _ = vm.raw_set(tid, n_key, LuaValue::number(extras as f64));
            s.stack_set(base + nfix, arg_table);
            for i in (nfix + 1)..proto.maxstacksize {
                s.stack_set(base + i, LuaValue::nil());
            }
        }

        let frame_top = base + proto.maxstacksize;
        s.set_top(frame_top);
        s.push_frame(CallInfo::new_lua(func, base, frame_top, nresults))?;
        if s.hook_mask & MASK_CALL != 0 {
            s.call_hook(HookEvent::Call)?;
        }
        Ok(PrecallResult::Lua)
    }
}

/// Finish a call: move up to `nresults` results down to the function
/// slot, pad with nil, and pop the frame.
pub fn poscall(s: &mut LuaState, nresults: i32, first_result: usize) -> LuaResult<()> {
    if s.hook_mask & MASK_RET != 0 {
        s.call_hook(HookEvent::Return)?;
    }
    let frame = s.current_frame().expect("poscall without a frame");
    let func_pos = frame.base - 1;
    s.pop_frame();

    let got = s.get_top().saturating_sub(first_result);
    let wanted = if nresults < 0 { got } else { nresults as usize };
    let ncopy = got.min(wanted);
    for i in 0..ncopy {
        let v = s.stack_get(first_result + i);
        s.stack_set(func_pos + i, v);
    }
    for i in ncopy..wanted {
        s.stack_set(func_pos + i, LuaValue::nil());
    }
    s.set_top(func_pos + wanted);
    Ok(())
}

/// Generic call: run the value at `func_idx` to completion, leaving its
/// results at `func_idx`. This is the path every metamethod invocation,
/// iterator call and host call goes through; it re-enters the dispatch
/// loop for interpreted callees, so a yield cannot cross it.
pub fn call_value(s: &mut LuaState, func_idx: usize, nresults: i32) -> LuaResult<()> {
    s.enter_ccall()?;
    s.nny += 1;
    let result = (|| -> LuaResult<()> {
        match precall(s, func_idx, nresults)? {
            PrecallResult::CFinished => Ok(()),
            PrecallResult::Lua => {
                let target = s.call_depth() - 1;
                lua_execute(s, target)
            }
        }
    })();
    s.nny -= 1;
    s.leave_ccall();
    result
}
