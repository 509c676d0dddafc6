// Closures, upvalue cells and userdata objects.

use std::any::Any;
use std::rc::Rc;

use crate::gc::{TableId, ThreadId, UpvalId};
use crate::lua_value::{LuaValue, Proto};

/// An interpreted closure: a shared prototype, the captured upvalue cells,
/// and the globals table it resolves GETGLOBAL/SETGLOBAL through.
pub struct LClosure {
    pub proto: Rc<Proto>,
    pub upvalues: Vec<UpvalId>,
    pub globals: LuaValue,
}

impl LClosure {
    pub fn new(proto: Rc<Proto>, upvalues: Vec<UpvalId>, globals: LuaValue) -> Self {
        Self { proto, upvalues, globals }
    }
}

/// An upvalue cell. While the owning frame is live the cell aliases one of
/// its stack slots (`Open`); when the frame exits, the slot's value is
/// copied into the cell (`Closed`). Closures capturing the same local
/// share one cell.
pub enum Upvalue {
    Open { thread: ThreadId, index: usize },
    Closed(LuaValue),
}

/// A managed block of host data with an optional metatable.
pub struct LuaUserdata {
    pub data: Box<dyn Any>,
    pub metatable: Option<TableId>,
}

impl LuaUserdata {
    pub fn new(data: Box<dyn Any>) -> Self {
        Self { data, metatable: None }
    }
}
