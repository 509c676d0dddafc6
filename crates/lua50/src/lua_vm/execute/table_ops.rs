// Index read/write with the full metamethod protocol.
//
// Chains through `__index` / `__newindex` tables are bounded by
// MAXTAGLOOP; a metatable read is treated as stable for the duration of
// one operation.

use crate::lua_value::{LuaValue, TableKeyError};
use crate::lua_vm::execute::metamethod::{
    TmKind, call_tm, call_tm_res, fast_tm, get_tm_by_obj,
};
use crate::lua_vm::lua_limits::MAXTAGLOOP;
use crate::lua_vm::{LuaResult, LuaState};

/// `t[key]` with metamethods.
pub fn vm_gettable(s: &mut LuaState, t: LuaValue, key: LuaValue) -> LuaResult<LuaValue> {
    let mut t = t;
    for _ in 0..MAXTAGLOOP {
        if let Some(tid) = t.as_table_id() {
            let res = s.vm().pool.table(tid).raw_get(&key);
            if !res.is_nil() {
                return Ok(res);
            }
            let mt = s.vm().pool.table(tid).metatable;
            let tm = fast_tm(s, mt, TmKind::Index);
            if tm.is_nil() {
                return Ok(res);
            }
            if tm.is_function() {
                return call_tm_res(s, tm, t, key);
            }
            t = tm; // chain the lookup through a table handler
        } else {
            let tm = get_tm_by_obj(s, &t, TmKind::Index);
            if tm.is_nil() {
                return Err(s.type_error(&t, "index"));
            }
            if tm.is_function() {
                return call_tm_res(s, tm, t, key);
            }
            t = tm;
        }
    }
    Err(s.rt_error("loop in gettable"))
}

/// `t[key] = value` with metamethods.
pub fn vm_settable(
    s: &mut LuaState,
    t: LuaValue,
    key: LuaValue,
    value: LuaValue,
) -> LuaResult<()> {
    let mut t = t;
    for _ in 0..MAXTAGLOOP {
        if let Some(tid) = t.as_table_id() {
            let old = s.vm().pool.table(tid).raw_get(&key);
            let mt = s.vm().pool.table(tid).metatable;
            if !old.is_nil() || fast_tm(s, mt, TmKind::NewIndex).is_nil() {
                return raw_set_checked(s, t, key, value);
            }
            let tm = fast_tm(s, mt, TmKind::NewIndex);
            if tm.is_function() {
                return call_tm(s, tm, t, key, value);
            }
            t = tm;
        } else {
            let tm = get_tm_by_obj(s, &t, TmKind::NewIndex);
            if tm.is_nil() {
                return Err(s.type_error(&t, "index"));
            }
            if tm.is_function() {
                return call_tm(s, tm, t, key, value);
            }
            t = tm;
        }
    }
    Err(s.rt_error("loop in settable"))
}

/// Primitive table store with key validation and the write barrier.
pub fn raw_set_checked(
    s: &mut LuaState,
    t: LuaValue,
    key: LuaValue,
    value: LuaValue,
) -> LuaResult<()> {
    let vm = s.vm_mut();
    match vm.raw_set(t.hvalue(), key, value) {
        Ok(()) => Ok(()),
        Err(TableKeyError::Nil) => Err(s.rt_error("table index is nil")),
        Err(TableKeyError::NaN) => Err(s.rt_error("table index is NaN")),
    }
}
