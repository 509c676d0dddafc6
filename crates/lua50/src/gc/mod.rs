// Incremental tri-color mark-and-sweep collector.
//
// Objects carry one mark byte: two white bits (the current white flips
// every cycle), a black bit, and a fixed bit for objects that must never
// be collected (metamethod name strings, the main thread). Gray = no
// color bit set.
//
// The mutator's obligations are the barrier/checkpoint surface:
// - `barrier`: called after storing a collectable value into an existing
//   heap object; re-grays the value when the holder is already black.
// - `check_gc` (driven by allocation debt): runs bounded collection steps
//   at instruction checkpoints, always after a new object has been
//   published into a reachable slot.
//
// Thread stacks are not barriered; every reachable thread is re-traversed
// in the atomic phase before the white flips.

mod gc_id;
mod object_pool;

pub use gc_id::*;
pub use object_pool::{GcBox, ObjectPool};

use crate::lua_value::{LuaValue, Proto, Upvalue};
use crate::lua_vm::ThreadStatus;
use crate::lua_vm::lua_limits::{GC_PAUSE_MUL, GC_STEP_SIZE, GC_STEP_WORK};

pub const WHITE0: u8 = 0x01;
pub const WHITE1: u8 = 0x02;
pub const BLACK: u8 = 0x04;
pub const FIXED: u8 = 0x08;

const WHITE_BITS: u8 = WHITE0 | WHITE1;
const COLOR_BITS: u8 = WHITE_BITS | BLACK;

/// Collector phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcState {
    /// Between cycles
    Pause,
    /// Marking reachable objects
    Propagate,
    /// Freeing dead objects, arena by arena
    Sweep,
}

pub struct Gc {
    pub state: GcState,
    /// The white of the current cycle (WHITE0 or WHITE1).
    pub current_white: u8,
    /// Gray work list.
    gray: Vec<GcId>,
    /// Allocation debt: when positive, collection steps are due.
    pub debt: isize,
    /// Rough live-byte estimate.
    pub total_bytes: usize,
    /// Sweep position: (arena index, slot index).
    sweep: (usize, usize),
    /// Completed collection cycles.
    pub cycles: usize,
    /// Collection disabled (host API).
    pub stopped: bool,
}

impl Default for Gc {
    fn default() -> Self {
        Self::new()
    }
}

impl Gc {
    pub fn new() -> Self {
        Self {
            state: GcState::Pause,
            current_white: WHITE0,
            gray: Vec::new(),
            debt: -(GC_STEP_SIZE as isize * 4),
            total_bytes: 0,
            sweep: (0, 0),
            cycles: 0,
            stopped: false,
        }
    }

    #[inline(always)]
    pub fn account_alloc(&mut self, size: usize) {
        self.total_bytes += size;
        self.debt += size as isize;
    }

    #[inline(always)]
    fn account_free(&mut self, size: usize) {
        self.total_bytes = self.total_bytes.saturating_sub(size);
    }

    #[inline(always)]
    fn other_white(&self) -> u8 {
        self.current_white ^ WHITE_BITS
    }

    /// Pin an object: it survives every collection.
    pub fn fix(&mut self, pool: &mut ObjectPool, id: GcId) {
        if let Some(m) = pool.mark_of(id) {
            pool.set_mark(id, m | FIXED);
        }
    }

    // ===== Barrier =====

    /// Forward write barrier: `holder` just had `value` stored into it. If
    /// the holder is already black while the value is still white, the
    /// invariant (black never points to white) would break; re-gray the
    /// value.
    pub fn barrier(&mut self, pool: &mut ObjectPool, holder: GcId, value: &LuaValue) {
        if self.state != GcState::Propagate {
            return;
        }
        let Some(holder_mark) = pool.mark_of(holder) else {
            return;
        };
        if holder_mark & BLACK == 0 {
            return;
        }
        self.mark_value(pool, value);
    }

    // ===== Marking =====

    pub fn mark_value(&mut self, pool: &mut ObjectPool, v: &LuaValue) {
        if let Some(id) = v.gc_id() {
            self.mark_object(pool, id);
        }
    }

    pub fn mark_object(&mut self, pool: &mut ObjectPool, id: GcId) {
        let Some(mark) = pool.mark_of(id) else {
            return;
        };
        if mark & WHITE_BITS == 0 {
            return; // already gray or black
        }
        match id {
            // strings have no children: blacken immediately
            GcId::String(_) => pool.set_mark(id, (mark & !COLOR_BITS) | BLACK),
            _ => {
                pool.set_mark(id, mark & !COLOR_BITS); // gray
                self.gray.push(id);
            }
        }
    }

    fn blacken(&mut self, pool: &mut ObjectPool, id: GcId) {
        if let Some(mark) = pool.mark_of(id) {
            pool.set_mark(id, (mark & !COLOR_BITS) | BLACK);
        }
    }

    /// Traverse one gray object, marking its children.
    fn propagate_one(&mut self, pool: &mut ObjectPool, id: GcId) {
        match id {
            GcId::Table(tid) => {
                let mut children: Vec<LuaValue> = Vec::new();
                {
                    let t = pool.table(tid);
                    if let Some(mt) = t.metatable {
                        children.push(LuaValue::table(mt));
                    }
                    t.for_each(|k, v| {
                        if k.is_collectable() {
                            children.push(*k);
                        }
                        if v.is_collectable() {
                            children.push(*v);
                        }
                    });
                }
                for c in &children {
                    self.mark_value(pool, c);
                }
            }
            GcId::Function(fid) => {
                let (globals, upvals, proto) = {
                    let cl = pool.closure(fid);
                    (cl.globals, cl.upvalues.clone(), cl.proto.clone())
                };
                self.mark_value(pool, &globals);
                for uv in upvals {
                    self.mark_object(pool, GcId::Upval(uv));
                }
                self.mark_proto(pool, &proto);
            }
            GcId::Userdata(uid) => {
                if let Some(mt) = pool.userdata(uid).metatable {
                    self.mark_object(pool, GcId::Table(mt));
                }
            }
            GcId::Upval(uid) => {
                if let Upvalue::Closed(v) = pool.upvalue(uid) {
                    let v = *v;
                    self.mark_value(pool, &v);
                }
                // open cells alias a live stack slot; thread traversal
                // covers the value
            }
            GcId::Thread(tid) => {
                self.traverse_thread(pool, tid);
            }
            GcId::String(_) => {}
        }
        self.blacken(pool, id);
    }

    /// Mark every string constant reachable through a prototype tree.
    fn mark_proto(&mut self, pool: &mut ObjectPool, proto: &Proto) {
        for k in &proto.constants {
            if k.is_collectable() {
                let k = *k;
                self.mark_value(pool, &k);
            }
        }
        for child in &proto.protos {
            self.mark_proto(pool, child);
        }
    }

    /// Mark a thread's stack, frames, open upvalues and pending values.
    fn traverse_thread(&mut self, pool: &mut ObjectPool, tid: ThreadId) {
        let mut values: Vec<LuaValue> = Vec::new();
        let mut upvals: Vec<UpvalId> = Vec::new();
        {
            let s = pool.thread(tid);
            let limit = s.gc_stack_limit();
            for i in 0..limit {
                let v = s.stack_value(i);
                if v.is_collectable() {
                    values.push(v);
                }
            }
            s.gc_collect_roots(&mut values, &mut upvals);
        }
        for v in &values {
            self.mark_value(pool, v);
        }
        for uv in upvals {
            self.mark_object(pool, GcId::Upval(uv));
        }
    }

    // ===== Stepping =====

    /// Run bounded collection work; called from allocation checkpoints
    /// while the debt is positive.
    pub fn step(&mut self, pool: &mut ObjectPool, roots: &[LuaValue]) {
        if self.stopped {
            self.debt = isize::MIN / 2;
            return;
        }
        match self.state {
            GcState::Pause => {
                self.start_cycle(pool, roots);
            }
            GcState::Propagate => {
                let mut work = GC_STEP_WORK;
                while work > 0 {
                    let Some(id) = self.gray.pop() else { break };
                    self.propagate_one(pool, id);
                    work -= 1;
                }
                if self.gray.is_empty() {
                    self.atomic(pool, roots);
                }
            }
            GcState::Sweep => {
                self.sweep_step(pool, GC_STEP_WORK);
            }
        }
        self.debt -= GC_STEP_SIZE as isize;
    }

    /// Run a complete collection cycle to the end.
    pub fn full(&mut self, pool: &mut ObjectPool, roots: &[LuaValue]) {
        // finish an in-flight cycle first so every object gets one
        // consistent marking pass
        while self.state != GcState::Pause {
            self.step_unbounded(pool, roots);
        }
        self.start_cycle(pool, roots);
        while self.state != GcState::Pause {
            self.step_unbounded(pool, roots);
        }
    }

    fn step_unbounded(&mut self, pool: &mut ObjectPool, roots: &[LuaValue]) {
        match self.state {
            GcState::Pause => self.start_cycle(pool, roots),
            GcState::Propagate => {
                while let Some(id) = self.gray.pop() {
                    self.propagate_one(pool, id);
                }
                self.atomic(pool, roots);
            }
            GcState::Sweep => self.sweep_step(pool, usize::MAX),
        }
    }

    fn start_cycle(&mut self, pool: &mut ObjectPool, roots: &[LuaValue]) {
        self.gray.clear();
        for r in roots {
            let r = *r;
            self.mark_value(pool, &r);
        }
        self.mark_active_threads(pool);
        self.state = GcState::Propagate;
    }

    /// Running and suspended-resumer threads are anchored by the native
    /// call stack even when no value on the heap refers to them.
    fn mark_active_threads(&mut self, pool: &mut ObjectPool) {
        for i in 0..pool.threads.len() {
            let tid = ThreadId(i as u32);
            if pool.threads[i].is_none() {
                continue;
            }
            let status = pool.thread(tid).status();
            if matches!(status, ThreadStatus::Running | ThreadStatus::Normal) {
                self.mark_object(pool, GcId::Thread(tid));
            }
        }
    }

    /// Finish marking: re-traverse roots and every reachable thread (their
    /// stacks are not barriered), drain the gray list, flip the white and
    /// enter the sweep phase.
    fn atomic(&mut self, pool: &mut ObjectPool, roots: &[LuaValue]) {
        for r in roots {
            let r = *r;
            self.mark_value(pool, &r);
        }
        self.mark_active_threads(pool);
        // iterate to a fixpoint: traversing one thread may reveal another
        loop {
            while let Some(id) = self.gray.pop() {
                self.propagate_one(pool, id);
            }
            let mut found = false;
            for i in 0..pool.threads.len() {
                let tid = ThreadId(i as u32);
                let Some(mark) = pool.mark_of(GcId::Thread(tid)) else {
                    continue;
                };
                // fixed (main) threads are always re-scanned; reachable
                // ones were blackened during propagate
                if mark & FIXED != 0 || mark & WHITE_BITS == 0 {
                    self.traverse_thread(pool, tid);
                    if !self.gray.is_empty() {
                        found = true;
                    }
                }
            }
            if !found {
                break;
            }
        }
        self.current_white = self.other_white();
        self.state = GcState::Sweep;
        self.sweep = (0, 0);
    }

    /// Sweep up to `budget` slots; dead objects (still carrying the old
    /// white) are freed, survivors are repainted with the new white.
    fn sweep_step(&mut self, pool: &mut ObjectPool, budget: usize) {
        let dead_white = self.other_white();
        let mut budget = budget;
        while budget > 0 {
            let (arena, idx) = self.sweep;
            let len = match arena {
                0 => pool.strings.len(),
                1 => pool.tables.len(),
                2 => pool.functions.len(),
                3 => pool.userdata.len(),
                4 => pool.threads.len(),
                5 => pool.upvalues.len(),
                _ => {
                    self.finish_cycle();
                    return;
                }
            };
            if idx >= len {
                self.sweep = (arena + 1, 0);
                continue;
            }
            let id = match arena {
                0 => GcId::String(StringId(idx as u32)),
                1 => GcId::Table(TableId(idx as u32)),
                2 => GcId::Function(FunctionId(idx as u32)),
                3 => GcId::Userdata(UserdataId(idx as u32)),
                4 => GcId::Thread(ThreadId(idx as u32)),
                _ => GcId::Upval(UpvalId(idx as u32)),
            };
            if let Some(mark) = pool.mark_of(id) {
                if mark & FIXED != 0 {
                    pool.set_mark(id, (mark & !COLOR_BITS) | self.current_white);
                } else if mark & dead_white != 0 {
                    self.free_object(pool, id);
                } else {
                    pool.set_mark(id, (mark & !COLOR_BITS) | self.current_white);
                }
            }
            self.sweep = (arena, idx + 1);
            budget -= 1;
        }
    }

    fn free_object(&mut self, pool: &mut ObjectPool, id: GcId) {
        match id {
            GcId::String(i) => {
                let size =
                    std::mem::size_of::<crate::lua_value::LuaString>() + pool.get_string(i).len();
                self.account_free(size);
                pool.free_string(i);
            }
            GcId::Table(i) => {
                self.account_free(std::mem::size_of::<crate::lua_value::LuaTable>());
                pool.free_table(i);
            }
            GcId::Function(i) => {
                self.account_free(std::mem::size_of::<crate::lua_value::LClosure>());
                pool.free_function(i);
            }
            GcId::Userdata(i) => {
                self.account_free(std::mem::size_of::<crate::lua_value::LuaUserdata>());
                pool.free_userdata(i);
            }
            GcId::Thread(i) => {
                self.account_free(std::mem::size_of::<crate::lua_vm::LuaState>());
                pool.free_thread(i);
            }
            GcId::Upval(i) => {
                self.account_free(std::mem::size_of::<Upvalue>());
                pool.free_upvalue(i);
            }
        }
    }

    fn finish_cycle(&mut self) {
        self.state = GcState::Pause;
        self.cycles += 1;
        // pause until the live estimate grows by GC_PAUSE_MUL percent
        let threshold = self.total_bytes / 100 * GC_PAUSE_MUL;
        self.debt = -(threshold.max(GC_STEP_SIZE * 4) as isize);
    }
}
