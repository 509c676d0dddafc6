// Host-facing surface on the execution state: stack manipulation with
// signed indexes, metamethod-aware field access, calls, protected calls,
// and the coroutine handshake. Native functions receive the state with
// their arguments between the frame base and the top.

use crate::gc::ThreadId;
use crate::lua_value::LuaValue;
use crate::lua_vm::execute::{
    do_yield, protected_call, resume, vm_gettable, vm_settable,
};
use crate::lua_vm::{LuaError, LuaResult, LuaState};

impl LuaState {
    /// Resolve a signed stack index: positive counts from the current
    /// frame's base (1 is the first slot), negative from the top (-1 is
    /// the last pushed value).
    pub fn abs_index(&self, idx: i32) -> usize {
        if idx > 0 {
            let base = self.current_frame().map_or(0, |ci| ci.base);
            base + idx as usize - 1
        } else {
            debug_assert!(idx < 0 && (-idx as usize) <= self.get_top());
            (self.get_top() as i64 + idx as i64) as usize
        }
    }

    /// Value at a signed index.
    pub fn value_at(&self, idx: i32) -> LuaValue {
        self.stack_get(self.abs_index(idx))
    }

    /// Move the top value into a signed index, shifting values up.
    pub fn insert(&mut self, idx: i32) {
        let pos = self.abs_index(idx);
        let top = self.get_top();
        if top == 0 || pos >= top {
            return;
        }
        let v = self.stack_get(top - 1);
        let mut i = top - 1;
        while i > pos {
            let below = self.stack_get(i - 1);
            self.stack_set(i, below);
            i -= 1;
        }
        self.stack_set(pos, v);
    }

    /// Remove the value at a signed index, shifting values down.
    pub fn remove(&mut self, idx: i32) {
        let pos = self.abs_index(idx);
        let top = self.get_top();
        if pos >= top {
            return;
        }
        for i in pos..top - 1 {
            let above = self.stack_get(i + 1);
            self.stack_set(i, above);
        }
        self.set_top(top - 1);
    }

    // ===== Native-function argument access =====

    /// Number of arguments passed to the running native function.
    pub fn arg_count(&self) -> usize {
        let base = self.current_frame().map_or(0, |ci| ci.base);
        self.get_top().saturating_sub(base)
    }

    /// Argument `i` (1-based) of the running native function.
    pub fn arg(&self, i: usize) -> LuaValue {
        debug_assert!(i >= 1);
        let base = self.current_frame().map_or(0, |ci| ci.base);
        let idx = base + i - 1;
        if idx < self.get_top() {
            self.stack_get(idx)
        } else {
            LuaValue::nil()
        }
    }

    // ===== Field access through the metamethod protocol =====

    pub fn get_field(&mut self, t: LuaValue, key: &str) -> LuaResult<LuaValue> {
        let k = self.vm_mut().create_string(key);
        vm_gettable(self, t, k)
    }

    pub fn set_field(&mut self, t: LuaValue, key: &str, v: LuaValue) -> LuaResult<()> {
        let k = self.vm_mut().create_string(key);
        vm_settable(self, t, k, v)
    }

    pub fn get_index(&mut self, t: LuaValue, key: LuaValue) -> LuaResult<LuaValue> {
        vm_gettable(self, t, key)
    }

    pub fn set_index(&mut self, t: LuaValue, key: LuaValue, v: LuaValue) -> LuaResult<()> {
        vm_settable(self, t, key, v)
    }

    // ===== Calls =====

    /// Call a function, collecting all results.
    pub fn call(&mut self, func: LuaValue, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
        protected_call(self, func, args)
    }

    /// Protected call: errors are caught at this boundary and returned as
    /// `(false, [error object])`; a yield cannot cross it.
    pub fn pcall(
        &mut self,
        func: LuaValue,
        args: Vec<LuaValue>,
    ) -> LuaResult<(bool, Vec<LuaValue>)> {
        match protected_call(self, func, args) {
            Ok(results) => Ok((true, results)),
            Err(LuaError::Yield) => Err(LuaError::Yield),
            Err(_) => {
                let e = self.error_value;
                self.error_value = LuaValue::nil();
                Ok((false, vec![e]))
            }
        }
    }

    // ===== Coroutines =====

    /// Suspend this thread with the given values; the returned error is
    /// what the native function should propagate.
    pub fn yield_with(&mut self, values: Vec<LuaValue>) -> LuaError {
        do_yield(self, values)
    }

    /// Resume a coroutine from this thread.
    pub fn resume_thread(
        &mut self,
        co: ThreadId,
        args: Vec<LuaValue>,
    ) -> LuaResult<(bool, Vec<LuaValue>)> {
        resume(self, co, args)
    }
}
