// Lua 5.0 virtual machine core
// Register-based bytecode execution with an incremental collector.

#[cfg(test)]
mod test;

pub mod gc;
pub mod lua_value;
pub mod lua_vm;

pub use lua_value::{LuaTable, LuaValue, Proto, ProtoBuilder};
pub use lua_vm::{
    CFunction, Instruction, LuaError, LuaResult, LuaState, LuaVm, OpCode,
};
