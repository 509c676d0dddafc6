// Coroutine handshake: explicit yield/resume context switching.
//
// A thread suspends either when a native function yields during a CALL
// (the frame is kept and marked; the resume arguments become the call's
// results) or when a debug hook yields (the interrupted instruction
// re-executes on resume). A yield that would have to cross a native
// re-entry into the VM is an error.

use crate::gc::ThreadId;
use crate::lua_value::LuaValue;
use crate::lua_vm::call_info::call_status;
use crate::lua_vm::execute::call::{poscall, precall, PrecallResult};
use crate::lua_vm::execute::lua_execute;
use crate::lua_vm::lua_state::ThreadStatus;
use crate::lua_vm::{LuaError, LuaResult, LuaState};

/// Suspend the current thread, handing `values` to the resumer. Returns
/// the error to propagate out of the native function.
pub fn do_yield(s: &mut LuaState, values: Vec<LuaValue>) -> LuaError {
    if s.nny > 0 {
        return s.rt_error("attempt to yield across metamethod/C-call boundary");
    }
    s.yield_values = values;
    LuaError::Yield
}

/// Resume `co` from the state `s` (which becomes `Normal` while the
/// coroutine runs). `Ok((true, values))` means the coroutine finished,
/// `Ok((false, values))` that it yielded; an error from inside the
/// coroutine kills it and re-raises in the resumer with the coroutine's
/// error object.
pub fn resume(
    s: &mut LuaState,
    co_id: ThreadId,
    args: Vec<LuaValue>,
) -> LuaResult<(bool, Vec<LuaValue>)> {
    if co_id == s.handle() {
        return Err(s.rt_error("cannot resume non-suspended coroutine"));
    }
    let co: &mut LuaState = unsafe { &mut *s.vm_mut().pool.thread_ptr(co_id) };
    match co.status() {
        ThreadStatus::Dead => return Err(s.rt_error("cannot resume dead coroutine")),
        ThreadStatus::Running | ThreadStatus::Normal => {
            return Err(s.rt_error("cannot resume non-suspended coroutine"));
        }
        ThreadStatus::Suspended => {}
    }

    s.status = ThreadStatus::Normal;
    co.status = ThreadStatus::Running;
    let result = resume_run(co, args);
    s.status = ThreadStatus::Running;

    match result {
        Ok(values) => {
            co.status = ThreadStatus::Dead;
            Ok((true, values))
        }
        Err(LuaError::Yield) => {
            co.status = ThreadStatus::Suspended;
            Ok((false, std::mem::take(&mut co.yield_values)))
        }
        Err(e) => {
            co.status = ThreadStatus::Dead;
            s.error_value = co.error_value;
            Err(e)
        }
    }
}

fn resume_run(co: &mut LuaState, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    if co.call_depth() == 0 {
        // first resume: the coroutine body sits at slot 0
        for a in args {
            co.push_value(a);
        }
        match precall(co, 0, -1)? {
            PrecallResult::CFinished => {}
            PrecallResult::Lua => lua_execute(co, 0)?,
        }
    } else {
        let ci = co.current_frame().expect("resumable frame");
        if !ci.is_lua() && ci.is_yielded() {
            // finish the interrupted native call: the resume arguments
            // are its results
            let nresults = ci.nresults;
            let first_result = co.get_top();
            for a in args {
                co.push_value(a);
            }
            co.current_frame_mut().expect("resumable frame").call_status &=
                !call_status::CIST_YIELDED;
            poscall(co, nresults, first_result)?;
            if co.call_depth() == 0 {
                // the yielded call was the coroutine body itself
                return Ok(collect_results(co));
            }
            // the interrupted CALL expected a fixed result count: restore
            // the caller's register window
            if nresults >= 0 {
                let top = co.current_frame().expect("caller frame").top;
                co.set_top(top);
            }
            lua_execute(co, 0)?;
        } else {
            // hook yield: the saved program counter re-executes the
            // interrupted instruction
            lua_execute(co, 0)?;
        }
    }
    Ok(collect_results(co))
}

fn collect_results(co: &mut LuaState) -> Vec<LuaValue> {
    let top = co.get_top();
    let mut out = Vec::with_capacity(top);
    for i in 0..top {
        out.push(co.stack_get(i));
    }
    co.set_top(0);
    out
}
