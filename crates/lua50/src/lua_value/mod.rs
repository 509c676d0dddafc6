// Value model and heap object layouts.

mod chunk;
mod lua_closure;
mod lua_string;
mod lua_table;
#[allow(clippy::module_inception)]
pub mod lua_value;

pub use chunk::{Proto, ProtoBuilder};
pub use lua_closure::{LClosure, LuaUserdata, Upvalue};
pub use lua_string::{LuaString, number_to_str, str_to_number};
pub use lua_table::{LuaTable, TableKeyError};
pub use lua_value::LuaValue;
