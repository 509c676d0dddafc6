// The global state: object pool, collector, globals/registry tables, and
// the main thread. Every execution state holds a back pointer to this.

mod api;
mod call_info;
mod const_string;
pub mod execute;
mod lua_error;
pub mod lua_limits;
mod lua_state;
pub mod opcode;

use std::rc::Rc;

pub use call_info::CallInfo;
pub use const_string::ConstString;
pub use execute::{TmKind, get_metatable, resume, do_yield};
pub use lua_error::LuaError;
pub use lua_state::{
    Hook, HookAction, HookEvent, LuaState, MASK_CALL, MASK_COUNT, MASK_LINE, MASK_RET,
    ThreadStatus,
};
pub use opcode::{Instruction, OpCode};

use crate::gc::{Gc, GcId, ObjectPool, TableId, ThreadId, UpvalId};
use crate::lua_value::{
    LClosure, LuaTable, LuaUserdata, LuaValue, Proto, TableKeyError, Upvalue,
};

pub type LuaResult<T> = Result<T, LuaError>;

/// Native function callable from the VM: arguments start at the frame
/// base, the return value is the number of results left on top.
pub type CFunction = fn(&mut LuaState) -> LuaResult<usize>;

/// Global VM state shared by the main thread and every coroutine.
pub struct LuaVm {
    pub pool: ObjectPool,
    pub gc: Gc,
    /// Global environment table.
    pub(crate) globals: LuaValue,
    /// Registry: host-visible table outside the reach of executed code.
    pub(crate) registry: LuaValue,
    pub const_strings: ConstString,
    main: ThreadId,
}

impl LuaVm {
    /// Create a global state with its main thread, globals and registry.
    /// Boxed so the back pointers in execution states stay valid.
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> Box<LuaVm> {
        let mut pool = ObjectPool::new();
        let mut gc = Gc::new();
        let const_strings = ConstString::new(&mut pool, &mut gc);
        let mut vm = Box::new(LuaVm {
            pool,
            gc,
            globals: LuaValue::nil(),
            registry: LuaValue::nil(),
            const_strings,
            main: ThreadId(u32::MAX),
        });

        let ptr: *mut LuaVm = &mut *vm;
        let main_id = {
            let state = LuaState::new(ptr);
            vm.pool.create_thread(&mut vm.gc, state)
        };
        vm.pool.thread_mut(main_id).set_handle(main_id);
        vm.pool.thread_mut(main_id).status = ThreadStatus::Running;
        vm.gc.fix(&mut vm.pool, GcId::Thread(main_id));
        vm.main = main_id;

        vm.registry = vm.create_table(0, 8);
        vm.globals = vm.create_table(0, 32);
        vm
    }

    #[inline(always)]
    pub fn main_thread(&self) -> ThreadId {
        self.main
    }

    /// The main thread's execution state. Thread boxes are address-stable
    /// inside the pool.
    pub fn main_state(&mut self) -> &mut LuaState {
        unsafe { &mut *self.pool.thread_ptr(self.main) }
    }

    #[inline(always)]
    pub fn globals(&self) -> LuaValue {
        self.globals
    }

    #[inline(always)]
    pub fn registry(&self) -> LuaValue {
        self.registry
    }

    // ===== Allocation =====

    pub fn create_string(&mut self, s: &str) -> LuaValue {
        LuaValue::string(self.pool.intern(&mut self.gc, s.as_bytes()))
    }

    pub fn create_string_bytes(&mut self, bytes: &[u8]) -> LuaValue {
        LuaValue::string(self.pool.intern(&mut self.gc, bytes))
    }

    pub fn create_table(&mut self, array_hint: usize, hash_hint: usize) -> LuaValue {
        LuaValue::table(self.pool.create_table(&mut self.gc, array_hint, hash_hint))
    }

    pub(crate) fn create_upvalue(&mut self, uv: Upvalue) -> UpvalId {
        self.pool.create_upvalue(&mut self.gc, uv)
    }

    /// Instantiate a closure over a prototype; the closure captures the
    /// current globals table.
    pub fn create_closure(&mut self, proto: Rc<Proto>, upvalues: Vec<UpvalId>) -> LuaValue {
        let globals = self.globals;
        self.create_closure_with_env(proto, upvalues, globals)
    }

    /// Instantiate a closure with an explicit globals table (closures
    /// created at run time inherit their creator's).
    pub(crate) fn create_closure_with_env(
        &mut self,
        proto: Rc<Proto>,
        upvalues: Vec<UpvalId>,
        globals: LuaValue,
    ) -> LuaValue {
        debug_assert_eq!(proto.nups, upvalues.len());
        let cl = LClosure::new(proto, upvalues, globals);
        LuaValue::function(self.pool.create_function(&mut self.gc, cl))
    }

    /// Top-level entry for compiler output: a closure with no upvalues.
    pub fn load(&mut self, proto: Rc<Proto>) -> LuaValue {
        debug_assert_eq!(proto.nups, 0, "top-level chunks capture no upvalues");
        self.create_closure(proto, Vec::new())
    }

    pub fn create_userdata(&mut self, data: Box<dyn std::any::Any>) -> LuaValue {
        LuaValue::userdata(self.pool.create_userdata(&mut self.gc, LuaUserdata::new(data)))
    }

    /// Create a coroutine whose body is `func`.
    pub fn create_coroutine(&mut self, func: LuaValue) -> LuaValue {
        let ptr: *mut LuaVm = self;
        let mut state = LuaState::new(ptr);
        state.push_value(func);
        let id = self.pool.create_thread(&mut self.gc, state);
        self.pool.thread_mut(id).set_handle(id);
        LuaValue::thread(id)
    }

    // ===== Raw table access =====

    /// Primitive read, no metamethods.
    pub fn raw_get(&self, t: TableId, key: &LuaValue) -> LuaValue {
        self.pool.table(t).raw_get(key)
    }

    /// Primitive write, no metamethods, with the write barrier for both
    /// the key and the value.
    pub fn raw_set(
        &mut self,
        t: TableId,
        key: LuaValue,
        value: LuaValue,
    ) -> Result<(), TableKeyError> {
        self.pool.table_mut(t).raw_set(key, value)?;
        if key.is_collectable() {
            self.gc.barrier(&mut self.pool, GcId::Table(t), &key);
        }
        if value.is_collectable() {
            self.gc.barrier(&mut self.pool, GcId::Table(t), &value);
        }
        Ok(())
    }

    pub fn table(&self, t: TableId) -> &LuaTable {
        self.pool.table(t)
    }

    // ===== Globals =====

    pub fn set_global(&mut self, name: &str, value: LuaValue) {
        let key = self.create_string(name);
        let g = self.globals.hvalue();
        let _ = self.raw_set(g, key, value);
    }

    pub fn get_global(&mut self, name: &str) -> LuaValue {
        let key = self.create_string(name);
        self.raw_get(self.globals.hvalue(), &key)
    }

    /// Register a native function under a global name.
    pub fn register(&mut self, name: &str, f: CFunction) {
        self.set_global(name, LuaValue::cfunction(f));
    }

    // ===== Metatables =====

    /// Set or clear the metatable of a table or userdata value.
    pub fn set_metatable(&mut self, v: LuaValue, mt: Option<LuaValue>) -> bool {
        let mt_id = match mt {
            Some(m) if m.is_table() => Some(m.hvalue()),
            Some(_) => return false,
            None => None,
        };
        if let Some(t) = v.as_table_id() {
            self.pool.table_mut(t).metatable = mt_id;
            if let Some(m) = mt_id {
                let mv = LuaValue::table(m);
                self.gc.barrier(&mut self.pool, GcId::Table(t), &mv);
            }
            true
        } else if v.is_userdata() {
            let u = v.uvalue();
            self.pool.userdata_mut(u).metatable = mt_id;
            if let Some(m) = mt_id {
                let mv = LuaValue::table(m);
                self.gc.barrier(&mut self.pool, GcId::Userdata(u), &mv);
            }
            true
        } else {
            false
        }
    }

    pub fn get_metatable_value(&self, v: &LuaValue) -> LuaValue {
        let mt = if let Some(t) = v.as_table_id() {
            self.pool.table(t).metatable
        } else if v.is_userdata() {
            self.pool.userdata(v.uvalue()).metatable
        } else {
            None
        };
        mt.map(LuaValue::table).unwrap_or(LuaValue::nil())
    }

    // ===== Calls =====

    /// Call a function on the main thread, returning all of its results.
    /// Acts as a protected boundary: on error the stack and frames are
    /// unwound and the error object stays readable in the main state.
    pub fn call_function(&mut self, func: LuaValue, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
        let s = self.main_state();
        execute::protected_call(s, func, args)
    }

    /// Load a prototype and run it immediately.
    pub fn execute_proto(&mut self, proto: Rc<Proto>) -> LuaResult<Vec<LuaValue>> {
        let func = self.load(proto);
        self.call_function(func, Vec::new())
    }

    /// Error object left by the last failed call on the main thread.
    pub fn error_value(&mut self) -> LuaValue {
        self.main_state().error_value()
    }

    /// Readable rendering of the last error object.
    pub fn error_message(&mut self) -> String {
        let v = self.error_value();
        if let Some(id) = v.as_string_id() {
            self.pool.get_string(id).to_str_lossy().into_owned()
        } else {
            format!("{:?}", v)
        }
    }

    // ===== GC control =====

    /// Allocation checkpoint: run collection steps while debt remains.
    pub fn check_gc(&mut self) {
        while self.gc.debt > 0 && !self.gc.stopped {
            let roots = [self.registry, self.globals];
            self.gc.step(&mut self.pool, &roots);
        }
    }

    /// Run a complete collection cycle.
    pub fn collect_garbage(&mut self) {
        let roots = [self.registry, self.globals];
        self.gc.full(&mut self.pool, &roots);
    }
}
