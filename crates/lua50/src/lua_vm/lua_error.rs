/// Lightweight error kind - one byte. The actual error object (any value,
/// typically an interned string) lives in the faulting state and is
/// retrieved at the protected-call boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LuaError {
    /// Runtime error - error object stored in the state
    Runtime,
    /// Syntax error - produced by the external compiler, delivered as a
    /// value
    Syntax,
    /// Call depth exceeded
    StackOverflow,
    /// Coroutine suspension - not an error; values stored in the state
    Yield,
}

impl std::fmt::Display for LuaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LuaError::Runtime => write!(f, "runtime error"),
            LuaError::Syntax => write!(f, "syntax error"),
            LuaError::StackOverflow => write!(f, "stack overflow"),
            LuaError::Yield => write!(f, "yield"),
        }
    }
}

impl std::error::Error for LuaError {}
