//! Centralized VM limits and configuration constants.
//!
//! All magic numbers that control VM behavior are collected here
//! for easy tuning and configuration.

// ===== Registers and operands =====

/// Maximum number of registers in a function frame. Register-or-constant
/// operand fields below this value index the stack; values at or above it
/// index the constant pool at (value - MAXSTACK).
pub const MAXSTACK: usize = 250;

// ===== Stack =====

/// Extra stack slots above a frame's top for metamethod calls and
/// temporaries.
pub const EXTRA_STACK: usize = 5;

/// Minimum guaranteed stack slots available to native functions.
pub const LUA_MINSTACK: usize = 20;

/// Initial stack capacity for new execution states.
pub const BASIC_STACK_SIZE: usize = 2 * LUA_MINSTACK;

/// Maximum function call nesting depth before a stack-overflow error.
pub const LUAI_MAXCALLS: usize = 20_000;

/// Maximum depth for nested native-boundary re-entries into the VM
/// (metamethod calls, protected calls, resumes).
pub const LUAI_MAXCCALLS: usize = 200;

// ===== Metamethods =====

/// Maximum depth for `__index` / `__newindex` and comparison metamethod
/// chains. Exceeding it raises "loop in gettable" / "loop in settable".
pub const MAXTAGLOOP: usize = 100;

// ===== Tables =====

/// Number of list items flushed per SETLIST instruction; the instruction's
/// Bx field encodes `offset + (n - 1)` where `offset` is a multiple of this.
pub const LFIELDS_PER_FLUSH: u32 = 32;

// ===== Strings =====

/// Maximum byte length of a string produced by concatenation.
pub const MAX_STRING_SIZE: usize = isize::MAX as usize;

/// Significant digits used when formatting numbers as strings (`%.14g`).
pub const LUAI_NUMDIGITS: usize = 14;

// ===== GC defaults =====

/// Allocation debt (in bytes) that triggers a collection step.
pub const GC_STEP_SIZE: usize = 1024;

/// Number of objects traversed or swept per collection step.
pub const GC_STEP_WORK: usize = 64;

/// Pause multiplier: after a full cycle the next one starts when the live
/// set has grown by this percentage.
pub const GC_PAUSE_MUL: usize = 200;
