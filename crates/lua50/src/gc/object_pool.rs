// Slotted arenas for all collectable objects, plus the global string
// intern table.
//
// Objects are addressed by typed 32-bit handles (slot indexes). Freed
// slots go on per-arena free lists and are reused by later allocations.
// Thread objects are boxed so their address stays stable while the arena
// vector grows underneath a running coroutine.

use ahash::AHashMap;

use crate::gc::{
    FunctionId, Gc, GcId, StringId, TableId, ThreadId, UpvalId, UserdataId,
};
use crate::lua_value::{LClosure, LuaString, LuaTable, LuaUserdata, Upvalue};
use crate::lua_vm::LuaState;

/// Header carried by every pooled object: one mark byte for the collector.
pub struct GcBox<T> {
    pub mark: u8,
    pub data: T,
}

pub struct ObjectPool {
    pub(crate) strings: Vec<Option<GcBox<LuaString>>>,
    pub(crate) tables: Vec<Option<GcBox<LuaTable>>>,
    pub(crate) functions: Vec<Option<GcBox<LClosure>>>,
    pub(crate) userdata: Vec<Option<GcBox<LuaUserdata>>>,
    pub(crate) threads: Vec<Option<Box<GcBox<LuaState>>>>,
    pub(crate) upvalues: Vec<Option<GcBox<Upvalue>>>,

    free_strings: Vec<u32>,
    free_tables: Vec<u32>,
    free_functions: Vec<u32>,
    free_userdata: Vec<u32>,
    free_threads: Vec<u32>,
    free_upvalues: Vec<u32>,

    /// Content hash -> interned string handles with that hash.
    interner: AHashMap<u64, Vec<StringId>>,
    hasher: ahash::RandomState,
}

impl Default for ObjectPool {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! alloc_slot {
    ($self:ident, $arena:ident, $free:ident, $boxed:expr) => {{
        if let Some(idx) = $self.$free.pop() {
            $self.$arena[idx as usize] = Some($boxed);
            idx
        } else {
            $self.$arena.push(Some($boxed));
            ($self.$arena.len() - 1) as u32
        }
    }};
}

impl ObjectPool {
    pub fn new() -> Self {
        Self {
            strings: Vec::new(),
            tables: Vec::new(),
            functions: Vec::new(),
            userdata: Vec::new(),
            threads: Vec::new(),
            upvalues: Vec::new(),
            free_strings: Vec::new(),
            free_tables: Vec::new(),
            free_functions: Vec::new(),
            free_userdata: Vec::new(),
            free_threads: Vec::new(),
            free_upvalues: Vec::new(),
            interner: AHashMap::new(),
            hasher: ahash::RandomState::with_seeds(0x1505, 0x9E37, 0x79B9, 0x7F4A),
        }
    }

    // ===== Strings =====

    /// Intern a byte string: returns the existing handle when the content
    /// is already pooled, otherwise allocates a new object.
    pub fn intern(&mut self, gc: &mut Gc, bytes: &[u8]) -> StringId {
        use std::hash::{BuildHasher, Hasher};
        let mut h = self.hasher.build_hasher();
        h.write(bytes);
        let hash = h.finish();

        if let Some(bucket) = self.interner.get(&hash) {
            for &id in bucket {
                if self.get_string(id).as_bytes() == bytes {
                    return id;
                }
            }
        }
        let obj = GcBox {
            mark: gc.current_white,
            data: LuaString::new(bytes.into(), hash),
        };
        gc.account_alloc(std::mem::size_of::<LuaString>() + bytes.len());
        let idx = alloc_slot!(self, strings, free_strings, obj);
        let id = StringId(idx);
        self.interner.entry(hash).or_default().push(id);
        id
    }

    #[inline(always)]
    pub fn get_string(&self, id: StringId) -> &LuaString {
        self.strings[id.0 as usize].as_ref().expect("dead string").data_ref()
    }

    // ===== Tables =====

    pub fn create_table(&mut self, gc: &mut Gc, array_hint: usize, hash_hint: usize) -> TableId {
        let obj = GcBox {
            mark: gc.current_white,
            data: LuaTable::new(array_hint, hash_hint),
        };
        gc.account_alloc(std::mem::size_of::<LuaTable>() + array_hint * 16);
        TableId(alloc_slot!(self, tables, free_tables, obj))
    }

    #[inline(always)]
    pub fn table(&self, id: TableId) -> &LuaTable {
        &self.tables[id.0 as usize].as_ref().expect("dead table").data
    }

    #[inline(always)]
    pub fn table_mut(&mut self, id: TableId) -> &mut LuaTable {
        &mut self.tables[id.0 as usize].as_mut().expect("dead table").data
    }

    // ===== Closures =====

    pub fn create_function(&mut self, gc: &mut Gc, cl: LClosure) -> FunctionId {
        gc.account_alloc(std::mem::size_of::<LClosure>() + cl.upvalues.len() * 8);
        let obj = GcBox { mark: gc.current_white, data: cl };
        FunctionId(alloc_slot!(self, functions, free_functions, obj))
    }

    #[inline(always)]
    pub fn closure(&self, id: FunctionId) -> &LClosure {
        &self.functions[id.0 as usize].as_ref().expect("dead closure").data
    }

    // ===== Userdata =====

    pub fn create_userdata(&mut self, gc: &mut Gc, u: LuaUserdata) -> UserdataId {
        gc.account_alloc(std::mem::size_of::<LuaUserdata>());
        let obj = GcBox { mark: gc.current_white, data: u };
        UserdataId(alloc_slot!(self, userdata, free_userdata, obj))
    }

    #[inline(always)]
    pub fn userdata(&self, id: UserdataId) -> &LuaUserdata {
        &self.userdata[id.0 as usize].as_ref().expect("dead userdata").data
    }

    #[inline(always)]
    pub fn userdata_mut(&mut self, id: UserdataId) -> &mut LuaUserdata {
        &mut self.userdata[id.0 as usize].as_mut().expect("dead userdata").data
    }

    // ===== Threads =====

    pub fn create_thread(&mut self, gc: &mut Gc, state: LuaState) -> ThreadId {
        gc.account_alloc(std::mem::size_of::<LuaState>());
        let obj = Box::new(GcBox { mark: gc.current_white, data: state });
        let idx = alloc_slot!(self, threads, free_threads, obj);
        ThreadId(idx)
    }

    #[inline(always)]
    pub fn thread(&self, id: ThreadId) -> &LuaState {
        &self.threads[id.0 as usize].as_ref().expect("dead thread").data
    }

    #[inline(always)]
    pub fn thread_mut(&mut self, id: ThreadId) -> &mut LuaState {
        &mut self.threads[id.0 as usize].as_mut().expect("dead thread").data
    }

    /// Raw pointer to a thread state. Thread boxes are address-stable, so
    /// the pointer survives pool growth; it is invalidated only when the
    /// thread itself is collected.
    #[inline(always)]
    pub fn thread_ptr(&mut self, id: ThreadId) -> *mut LuaState {
        &mut self.threads[id.0 as usize].as_mut().expect("dead thread").data as *mut LuaState
    }

    // ===== Upvalues =====

    pub fn create_upvalue(&mut self, gc: &mut Gc, uv: Upvalue) -> UpvalId {
        gc.account_alloc(std::mem::size_of::<Upvalue>());
        let obj = GcBox { mark: gc.current_white, data: uv };
        UpvalId(alloc_slot!(self, upvalues, free_upvalues, obj))
    }

    #[inline(always)]
    pub fn upvalue(&self, id: UpvalId) -> &Upvalue {
        &self.upvalues[id.0 as usize].as_ref().expect("dead upvalue").data
    }

    #[inline(always)]
    pub fn upvalue_mut(&mut self, id: UpvalId) -> &mut Upvalue {
        &mut self.upvalues[id.0 as usize].as_mut().expect("dead upvalue").data
    }

    // ===== Marks =====

    /// Mark byte of an object, or None when the slot is dead.
    pub fn mark_of(&self, id: GcId) -> Option<u8> {
        match id {
            GcId::String(i) => self.strings[i.0 as usize].as_ref().map(|b| b.mark),
            GcId::Table(i) => self.tables[i.0 as usize].as_ref().map(|b| b.mark),
            GcId::Function(i) => self.functions[i.0 as usize].as_ref().map(|b| b.mark),
            GcId::Userdata(i) => self.userdata[i.0 as usize].as_ref().map(|b| b.mark),
            GcId::Thread(i) => self.threads[i.0 as usize].as_ref().map(|b| b.mark),
            GcId::Upval(i) => self.upvalues[i.0 as usize].as_ref().map(|b| b.mark),
        }
    }

    pub fn set_mark(&mut self, id: GcId, mark: u8) {
        match id {
            GcId::String(i) => {
                if let Some(b) = self.strings[i.0 as usize].as_mut() {
                    b.mark = mark;
                }
            }
            GcId::Table(i) => {
                if let Some(b) = self.tables[i.0 as usize].as_mut() {
                    b.mark = mark;
                }
            }
            GcId::Function(i) => {
                if let Some(b) = self.functions[i.0 as usize].as_mut() {
                    b.mark = mark;
                }
            }
            GcId::Userdata(i) => {
                if let Some(b) = self.userdata[i.0 as usize].as_mut() {
                    b.mark = mark;
                }
            }
            GcId::Thread(i) => {
                if let Some(b) = self.threads[i.0 as usize].as_mut() {
                    b.mark = mark;
                }
            }
            GcId::Upval(i) => {
                if let Some(b) = self.upvalues[i.0 as usize].as_mut() {
                    b.mark = mark;
                }
            }
        }
    }

    // ===== Sweeping =====

    pub(crate) fn free_string(&mut self, id: StringId) {
        if let Some(b) = self.strings[id.0 as usize].take() {
            let hash = b.data.hash();
            if let Some(bucket) = self.interner.get_mut(&hash) {
                bucket.retain(|&s| s != id);
                if bucket.is_empty() {
                    self.interner.remove(&hash);
                }
            }
            self.free_strings.push(id.0);
        }
    }

    pub(crate) fn free_table(&mut self, id: TableId) {
        if self.tables[id.0 as usize].take().is_some() {
            self.free_tables.push(id.0);
        }
    }

    pub(crate) fn free_function(&mut self, id: FunctionId) {
        if self.functions[id.0 as usize].take().is_some() {
            self.free_functions.push(id.0);
        }
    }

    pub(crate) fn free_userdata(&mut self, id: UserdataId) {
        if self.userdata[id.0 as usize].take().is_some() {
            self.free_userdata.push(id.0);
        }
    }

    pub(crate) fn free_thread(&mut self, id: ThreadId) {
        if self.threads[id.0 as usize].take().is_some() {
            self.free_threads.push(id.0);
        }
    }

    pub(crate) fn free_upvalue(&mut self, id: UpvalId) {
        if self.upvalues[id.0 as usize].take().is_some() {
            self.free_upvalues.push(id.0);
        }
    }

    /// Live object count across all arenas (diagnostics).
    pub fn live_objects(&self) -> usize {
        self.strings.iter().filter(|s| s.is_some()).count()
            + self.tables.iter().filter(|s| s.is_some()).count()
            + self.functions.iter().filter(|s| s.is_some()).count()
            + self.userdata.iter().filter(|s| s.is_some()).count()
            + self.threads.iter().filter(|s| s.is_some()).count()
            + self.upvalues.iter().filter(|s| s.is_some()).count()
    }
}

// Small helper so get_string can return a reference out of the Option
// without an intermediate binding.
impl<T> GcBox<T> {
    #[inline(always)]
    fn data_ref(&self) -> &T {
        &self.data
    }
}
