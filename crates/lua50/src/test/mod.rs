// End-to-end tests: programs are assembled by hand through ProtoBuilder
// (the same surface the external compiler targets) and run on a fresh VM.

mod test_closures;
mod test_coroutines;
mod test_gc;
mod test_hooks;

pub use crate::lua_value::LuaValue;
pub use crate::lua_vm::{LuaResult, LuaState, LuaVm};

pub fn num(n: f64) -> LuaValue {
    LuaValue::number(n)
}

pub fn expect_number(v: &LuaValue) -> f64 {
    v.as_number().expect("number result")
}

pub fn str_of(vm: &LuaVm, v: &LuaValue) -> String {
    let id = v.as_string_id().expect("string result");
    vm.pool.get_string(id).to_str_lossy().into_owned()
}

// ===== Native shims used by the test programs =====

/// `error(v)`: raise with an arbitrary error object.
pub fn lib_error(s: &mut LuaState) -> LuaResult<usize> {
    let v = s.arg(1);
    Err(s.error_with_value(v))
}

/// `next(t, k)`: the raw iteration primitive.
pub fn lib_next(s: &mut LuaState) -> LuaResult<usize> {
    let t = s.arg(1);
    let k = s.arg(2);
    let Some(tid) = t.as_table_id() else {
        return Err(s.type_error(&t, "index"));
    };
    match s.vm().pool.table(tid).next(&k) {
        Ok(Some((nk, nv))) => {
            s.push_value(nk);
            s.push_value(nv);
            Ok(2)
        }
        Ok(None) => {
            s.push_value(LuaValue::nil());
            Ok(1)
        }
        Err(()) => Err(s.rt_error("invalid key to 'next'")),
    }
}

/// `pcall(f, ...)`: protected call returning a status plus results.
pub fn lib_pcall(s: &mut LuaState) -> LuaResult<usize> {
    let func = s.arg(1);
    let n = s.arg_count();
    let args: Vec<LuaValue> = (2..=n).map(|i| s.arg(i)).collect();
    let (ok, vals) = s.pcall(func, args)?;
    s.push_value(LuaValue::boolean(ok));
    for v in &vals {
        s.push_value(*v);
    }
    Ok(1 + vals.len())
}

/// `yieldfn(...)`: suspend the running coroutine with the arguments.
pub fn lib_yield(s: &mut LuaState) -> LuaResult<usize> {
    let n = s.arg_count();
    let args: Vec<LuaValue> = (1..=n).map(|i| s.arg(i)).collect();
    Err(s.yield_with(args))
}

/// Install the shims every test program may reference.
pub fn open_test_shims(vm: &mut LuaVm) {
    vm.register("error", lib_error);
    vm.register("next", lib_next);
    vm.register("pcall", lib_pcall);
    vm.register("yieldfn", lib_yield);
}
