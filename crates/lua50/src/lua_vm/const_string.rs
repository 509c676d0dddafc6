// Pre-interned strings the VM looks up on hot paths: metamethod event
// names and type names. All of them are pinned so the collector never
// frees them.

use crate::gc::{Gc, GcId, ObjectPool};
use crate::lua_value::LuaValue;
use crate::lua_vm::execute::TmKind;

/// Number of metamethod events (must match `TmKind::N`).
const TM_N: usize = TmKind::N as usize;

pub struct ConstString {
    /// Metamethod name strings indexed by TmKind discriminant.
    pub tmname: [LuaValue; TM_N],

    /// Name of the iteration function injected by the legacy generic-for
    /// setup.
    pub str_next: LuaValue,
}

impl ConstString {
    pub fn new(pool: &mut ObjectPool, gc: &mut Gc) -> Self {
        let mut tmname = [LuaValue::nil(); TM_N];
        for i in 0..TM_N {
            let tm = TmKind::from_u8(i as u8).expect("metamethod index");
            let id = pool.intern(gc, tm.name().as_bytes());
            gc.fix(pool, GcId::String(id));
            tmname[i] = LuaValue::string(id);
        }
        let next_id = pool.intern(gc, b"next");
        gc.fix(pool, GcId::String(next_id));
        Self {
            tmname,
            str_next: LuaValue::string(next_id),
        }
    }

    /// Pre-interned name string of a metamethod event.
    #[inline(always)]
    pub fn tm_value(&self, tm: TmKind) -> LuaValue {
        self.tmname[tm as usize]
    }
}
