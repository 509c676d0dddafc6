// The concatenation engine.
//
// Works on a run of stack slots ending at an absolute index: repeatedly
// either dispatches `__concat` on the last two values or collects the
// maximal right-anchored run of string-coercible values into one interned
// string, until a single value remains. Coercions write the slot in
// place, as the reference implementation does.

use crate::lua_value::{LuaValue, number_to_str};
use crate::lua_vm::execute::metamethod::{TmKind, call_bin_tm};
use crate::lua_vm::lua_limits::MAX_STRING_SIZE;
use crate::lua_vm::{LuaResult, LuaState};

/// Coerce a stack slot to a string in place. Returns false when the slot
/// holds neither a string nor a number.
fn to_string_slot(s: &mut LuaState, idx: usize) -> bool {
    let v = s.stack_get(idx);
    if v.is_string() {
        return true;
    }
    if v.is_number() {
        let text = number_to_str(v.nvalue());
        let sv = s.vm_mut().create_string(&text);
        s.stack_set(idx, sv);
        return true;
    }
    false
}

#[inline]
fn slot_str_len(s: &LuaState, idx: usize) -> usize {
    s.vm().pool.get_string(s.stack_get(idx).tsvalue()).len()
}

/// Concatenate `total` values ending at absolute stack index `last`,
/// leaving the single result at `last - total + 1`.
pub fn vm_concat(s: &mut LuaState, mut total: usize, mut last: usize) -> LuaResult<()> {
    debug_assert!(total >= 1);
    while total > 1 {
        let top = last + 1; // one past the last value of the run
        let n; // values consumed by this pass (at least 2)
        if !to_string_slot(s, top - 2) || !to_string_slot(s, top - 1) {
            let v1 = s.stack_get(top - 2);
            let v2 = s.stack_get(top - 1);
            match call_bin_tm(s, v1, v2, TmKind::Concat)? {
                Some(r) => s.stack_set(top - 2, r),
                None => return Err(s.concat_error(&v1, &v2)),
            }
            n = 2;
        } else if slot_str_len(s, top - 1) == 0 {
            // empty tail: the left value is already a string; do nothing
            n = 2;
        } else {
            // at least two strings: collect as many as possible
            let mut tl = slot_str_len(s, top - 1) + slot_str_len(s, top - 2);
            n = {
                let mut n = 2;
                while n < total && to_string_slot(s, top - n - 1) {
                    tl += slot_str_len(s, top - n - 1);
                    if tl > MAX_STRING_SIZE {
                        return Err(s.rt_error("string size overflow"));
                    }
                    n += 1;
                }
                n
            };
            let mut buffer = Vec::with_capacity(tl);
            for i in (1..=n).rev() {
                let sid = s.stack_get(top - i).tsvalue();
                buffer.extend_from_slice(s.vm().pool.get_string(sid).as_bytes());
            }
            let result = s.vm_mut().create_string_bytes(&buffer);
            s.stack_set(top - n, result);
        }
        total -= n - 1; // n values became one
        last -= n - 1;
    }
    Ok(())
}
