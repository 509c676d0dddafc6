mod instruction;

pub use instruction::{Instruction, fb2int, int2fb, is_k, k_index, rk_const};

/// Instruction format modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpMode {
    IABC,
    IABx,
    IAsBx,
}

/// Complete Lua 5.0 opcode set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Move = 0,  // R[A] := R[B]
    LoadK,     // R[A] := K[Bx]
    LoadBool,  // R[A] := (bool)B; if C, pc++
    LoadNil,   // R[A] ... R[B] := nil
    GetUpval,  // R[A] := UpValue[B]
    GetGlobal, // R[A] := Globals[K[Bx]]
    GetTable,  // R[A] := R[B][RK(C)]
    SetGlobal, // Globals[K[Bx]] := R[A]
    SetUpval,  // UpValue[B] := R[A]
    SetTable,  // R[A][RK(B)] := RK(C)
    NewTable,  // R[A] := {} (array hint fb-encoded in B, hash hint in C)
    Self_,     // R[A+1] := R[B]; R[A] := R[B][RK(C)]
    Add,       // R[A] := RK(B) + RK(C)
    Sub,       // R[A] := RK(B) - RK(C)
    Mul,       // R[A] := RK(B) * RK(C)
    Div,       // R[A] := RK(B) / RK(C)
    Pow,       // R[A] := RK(B) ^ RK(C)
    Unm,       // R[A] := -R[B]
    Not,       // R[A] := not R[B]
    Concat,    // R[A] := R[B] .. ... .. R[C]
    Jmp,       // pc += sBx
    Eq,        // if (RK(B) == RK(C)) ~= A then pc++ else take following JMP
    Lt,        // if (RK(B) <  RK(C)) ~= A then pc++ else take following JMP
    Le,        // if (RK(B) <= RK(C)) ~= A then pc++ else take following JMP
    Test,      // if boolean(R[B]) == C then R[A] := R[B]; take following JMP
    Call,      // R[A] ... := R[A](R[A+1] ... R[A+B-1])
    TailCall,  // return R[A](R[A+1] ... R[A+B-1])
    Return,    // return R[A] ... R[A+B-2]
    ForLoop,   // R[A] += R[A+2]; if in range, pc += sBx and R[A+3] := R[A]
    ForPrep,   // check loop operands; R[A] -= R[A+2]; pc += sBx
    TForLoop,  // R[A+3] ... := R[A](R[A+1], R[A+2]); loop while non-nil
    TForPrep,  // legacy generic-for setup; pc += sBx
    SetList,   // R[A][offset+i] := R[A+i], i = 1 .. (Bx % FPF) + 1
    SetListO,  // same, item count taken from current top
    Close,     // close upvalues at stack positions >= R[A]
    Closure,   // R[A] := closure(KPROTO[Bx]); followed by capture pseudo-ops
}

pub const NUM_OPCODES: usize = OpCode::Closure as usize + 1;

impl OpCode {
    #[inline(always)]
    pub fn from_u8(byte: u8) -> Self {
        debug_assert!((byte as usize) < NUM_OPCODES);
        unsafe { std::mem::transmute(byte) }
    }

    /// Instruction format mode for this opcode.
    pub fn get_mode(self) -> OpMode {
        use OpCode::*;
        match self {
            LoadK | GetGlobal | SetGlobal | SetList | SetListO | Closure => OpMode::IABx,
            Jmp | ForLoop | ForPrep | TForPrep => OpMode::IAsBx,
            _ => OpMode::IABC,
        }
    }

    /// Instructions that consume the stack top set by a previous
    /// instruction (variadic argument or result counts).
    #[inline(always)]
    pub fn uses_top(self) -> bool {
        use OpCode::*;
        matches!(self, Call | TailCall | Return | SetListO)
    }
}
