// Per-call bookkeeping, one record per active function call.

use crate::lua_value::LuaValue;

/// Call status flags.
pub mod call_status {
    /// Interpreted function (has bytecode)
    pub const CIST_LUA: u8 = 1 << 0;
    /// Native function
    pub const CIST_C: u8 = 1 << 1;
    /// Native function suspended by a yield; the resume arguments become
    /// its results
    pub const CIST_YIELDED: u8 = 1 << 2;
}

/// One activation record. `base` points immediately after the function
/// slot; `top` is the frame's register limit (`base + maxstacksize` for
/// interpreted functions).
#[derive(Clone)]
pub struct CallInfo {
    /// The function being executed
    pub func: LuaValue,
    /// First register slot of this frame
    pub base: usize,
    /// Frame register limit
    pub top: usize,
    /// Saved program counter while a nested call runs
    pub saved_pc: u32,
    /// Results expected by the caller (-1 = all)
    pub nresults: i32,
    /// Tail calls folded into this frame (for tracebacks)
    pub tailcalls: u32,
    /// CIST_* flags
    pub call_status: u8,
}

impl CallInfo {
    pub fn new_lua(func: LuaValue, base: usize, top: usize, nresults: i32) -> Self {
        Self {
            func,
            base,
            top,
            saved_pc: 0,
            nresults,
            tailcalls: 0,
            call_status: call_status::CIST_LUA,
        }
    }

    pub fn new_c(func: LuaValue, base: usize, top: usize, nresults: i32) -> Self {
        Self {
            func,
            base,
            top,
            saved_pc: 0,
            nresults,
            tailcalls: 0,
            call_status: call_status::CIST_C,
        }
    }

    #[inline(always)]
    pub fn is_lua(&self) -> bool {
        self.call_status & call_status::CIST_LUA != 0
    }

    #[inline(always)]
    pub fn is_yielded(&self) -> bool {
        self.call_status & call_status::CIST_YIELDED != 0
    }
}

impl Default for CallInfo {
    fn default() -> Self {
        Self {
            func: LuaValue::nil(),
            base: 0,
            top: 0,
            saved_pc: 0,
            nresults: -1,
            tailcalls: 0,
            call_status: 0,
        }
    }
}
