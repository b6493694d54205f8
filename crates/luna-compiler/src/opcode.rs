//! Lua 5.2 opcodes and instruction encoding.
//!
//! Instruction format (32 bits):
//! - Bits 0-5: OpCode (6 bits)
//! - Bits 6-13: A (8 bits)
//! - For iABC format:
//!   - Bits 14-22: C (9 bits)
//!   - Bits 23-31: B (9 bits)
//! - For iABx: Bx = bits 14-31 (unsigned 18 bits)
//! - For iAsBx: sBx = Bx - offset (signed interpretation)
//! - For iAx: Ax = bits 6-31 (26 bits, unsigned)

use std::fmt;

/// Size constants for instruction fields.
const SIZE_OP: u32 = 6;
const SIZE_A: u32 = 8;
const SIZE_B: u32 = 9;
const SIZE_C: u32 = 9;
const SIZE_BX: u32 = SIZE_B + SIZE_C; // 18
const SIZE_AX: u32 = SIZE_A + SIZE_B + SIZE_C; // 26

/// Position constants.
const POS_OP: u32 = 0;
const POS_A: u32 = POS_OP + SIZE_OP; // 6
const POS_C: u32 = POS_A + SIZE_A; // 14
const POS_B: u32 = POS_C + SIZE_C; // 23
const POS_BX: u32 = POS_C;
const POS_AX: u32 = POS_A;

/// Mask helpers.
const fn mask(n: u32) -> u32 {
    if n >= 32 {
        u32::MAX
    } else {
        (1 << n) - 1
    }
}

pub const MAX_A: u32 = mask(SIZE_A); // 255
pub const MAX_B: u32 = mask(SIZE_B); // 511
pub const MAX_C: u32 = mask(SIZE_C); // 511
pub const MAX_BX: u32 = mask(SIZE_BX); // 262143
pub const MAX_SBX: i32 = (MAX_BX >> 1) as i32; // 131071
pub const MIN_SBX: i32 = -MAX_SBX;
pub const MAX_AX: u32 = mask(SIZE_AX); // 67108863

const OFFSET_SBX: i32 = MAX_SBX;

/// This bit marks a B/C operand as a constant index rather than a register.
pub const BITRK: u32 = 1 << (SIZE_B - 1);

/// Largest constant index usable directly as an RK operand.
pub const MAX_INDEX_RK: u32 = BITRK - 1;

/// Invalid register that fits in 8 bits.
pub const NO_REG: u32 = MAX_A;

/// Number of list items to accumulate before a SETLIST instruction.
pub const LFIELDS_PER_FLUSH: u32 = 50;

/// Returns true if an RK operand refers to a constant.
pub fn is_k(x: u32) -> bool {
    x & BITRK != 0
}

/// Constant index encoded in an RK operand.
pub fn index_k(x: u32) -> u32 {
    x & !BITRK
}

/// Encode a constant index as an RK operand.
pub fn rk_as_k(x: u32) -> u32 {
    x | BITRK
}

/// Convert an integer to a "floating point byte" (`eeeeexxx`), rounding up.
pub fn int2fb(mut x: u32) -> u32 {
    let mut e = 0;
    if x < 8 {
        return x;
    }
    while x >= 0x10 {
        x = (x + 1) >> 1;
        e += 1;
    }
    ((e + 1) << 3) | (x - 8)
}

/// Inverse of [`int2fb`].
pub fn fb2int(x: u32) -> u32 {
    let e = (x >> 3) & 0x1f;
    if e == 0 {
        x
    } else {
        ((x & 7) + 8) << (e - 1)
    }
}

/// All 40 Lua 5.2 opcodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Move = 0,
    LoadK,
    LoadKX,
    LoadBool,
    LoadNil,
    GetUpval,
    GetTabUp,
    GetTable,
    SetTabUp,
    SetUpval,
    SetTable,
    NewTable,
    Self_,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Unm,
    Not,
    Len,
    Concat,
    Jmp,
    Eq,
    Lt,
    Le,
    Test,
    TestSet,
    Call,
    TailCall,
    Return,
    ForLoop,
    ForPrep,
    TForCall,
    TForLoop,
    SetList,
    Closure,
    VarArg,
    ExtraArg,
}

/// How an opcode uses its B or C operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpArgMode {
    /// Argument is not used.
    N,
    /// Argument is used as a plain number.
    U,
    /// Argument is a register or a jump offset.
    R,
    /// Argument is a constant or register/constant.
    K,
}

impl OpCode {
    /// Number of opcodes.
    pub const COUNT: usize = 40;

    /// Every opcode, in encoding order.
    pub const ALL: [OpCode; Self::COUNT] = {
        use OpCode::*;
        [
            Move, LoadK, LoadKX, LoadBool, LoadNil, GetUpval, GetTabUp, GetTable, SetTabUp,
            SetUpval, SetTable, NewTable, Self_, Add, Sub, Mul, Div, Mod, Pow, Unm, Not, Len,
            Concat, Jmp, Eq, Lt, Le, Test, TestSet, Call, TailCall, Return, ForLoop, ForPrep,
            TForCall, TForLoop, SetList, Closure, VarArg, ExtraArg,
        ]
    };

    /// Get the opcode from a u8 value.
    pub fn from_u8(val: u8) -> Option<OpCode> {
        Self::ALL.get(val as usize).copied()
    }

    /// Get the instruction format for this opcode.
    pub fn format(&self) -> InstructionFormat {
        use InstructionFormat::*;
        use OpCode::*;
        match self {
            ExtraArg => IAx,
            LoadK | LoadKX | Closure => IABx,
            Jmp | ForLoop | ForPrep | TForLoop => IAsBx,
            _ => IABC,
        }
    }

    /// Returns true if this opcode is a test (the next instruction is a jump).
    pub fn is_test(&self) -> bool {
        use OpCode::*;
        matches!(self, Eq | Lt | Le | Test | TestSet | TForLoop)
    }

    /// How operand B is used.
    pub fn b_mode(&self) -> OpArgMode {
        use OpArgMode::*;
        use OpCode::*;
        match self {
            Move | GetTable | Self_ | Unm | Not | Len | Concat | Jmp | TestSet | ForLoop
            | ForPrep | TForLoop => R,
            LoadK | SetTabUp | SetTable | Add | Sub | Mul | Div | Mod | Pow | Eq | Lt | Le => K,
            LoadKX | Test | TForCall => N,
            _ => U,
        }
    }

    /// How operand C is used.
    pub fn c_mode(&self) -> OpArgMode {
        use OpArgMode::*;
        use OpCode::*;
        match self {
            GetTabUp | GetTable | SetTabUp | SetTable | Self_ | Add | Sub | Mul | Div | Mod
            | Pow | Eq | Lt | Le => K,
            Concat => R,
            LoadBool | NewTable | Test | TestSet | Call | TailCall | TForCall | SetList
            | ExtraArg => U,
            _ => N,
        }
    }

    /// Get the name of this opcode.
    pub fn name(&self) -> &'static str {
        use OpCode::*;
        match self {
            Move => "MOVE",
            LoadK => "LOADK",
            LoadKX => "LOADKX",
            LoadBool => "LOADBOOL",
            LoadNil => "LOADNIL",
            GetUpval => "GETUPVAL",
            GetTabUp => "GETTABUP",
            GetTable => "GETTABLE",
            SetTabUp => "SETTABUP",
            SetUpval => "SETUPVAL",
            SetTable => "SETTABLE",
            NewTable => "NEWTABLE",
            Self_ => "SELF",
            Add => "ADD",
            Sub => "SUB",
            Mul => "MUL",
            Div => "DIV",
            Mod => "MOD",
            Pow => "POW",
            Unm => "UNM",
            Not => "NOT",
            Len => "LEN",
            Concat => "CONCAT",
            Jmp => "JMP",
            Eq => "EQ",
            Lt => "LT",
            Le => "LE",
            Test => "TEST",
            TestSet => "TESTSET",
            Call => "CALL",
            TailCall => "TAILCALL",
            Return => "RETURN",
            ForLoop => "FORLOOP",
            ForPrep => "FORPREP",
            TForCall => "TFORCALL",
            TForLoop => "TFORLOOP",
            SetList => "SETLIST",
            Closure => "CLOSURE",
            VarArg => "VARARG",
            ExtraArg => "EXTRAARG",
        }
    }
}

/// Instruction format types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstructionFormat {
    IABC,
    IABx,
    IAsBx, // signed Bx, same bits as ABx
    IAx,
}

/// A 32-bit Lua bytecode instruction.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction(pub u32);

impl Instruction {
    // ---- Constructors ----

    /// Create an iABC instruction.
    pub fn abc(op: OpCode, a: u32, b: u32, c: u32) -> Self {
        debug_assert!(a <= MAX_A && b <= MAX_B && c <= MAX_C, "ABC out of range");
        let mut i = (op as u32) << POS_OP;
        i |= (a & MAX_A) << POS_A;
        i |= (b & MAX_B) << POS_B;
        i |= (c & MAX_C) << POS_C;
        Instruction(i)
    }

    /// Create an iABx instruction.
    pub fn abx(op: OpCode, a: u32, bx: u32) -> Self {
        debug_assert!(bx <= MAX_BX, "Bx out of range: {bx}");
        let mut i = (op as u32) << POS_OP;
        i |= (a & MAX_A) << POS_A;
        i |= (bx & MAX_BX) << POS_BX;
        Instruction(i)
    }

    /// Create an iAsBx instruction (signed Bx).
    pub fn asbx(op: OpCode, a: u32, sbx: i32) -> Self {
        debug_assert!((MIN_SBX..=MAX_SBX).contains(&sbx), "sBx out of range: {sbx}");
        Self::abx(op, a, (sbx + OFFSET_SBX) as u32)
    }

    /// Create an iAx instruction.
    pub fn ax(op: OpCode, ax: u32) -> Self {
        debug_assert!(ax <= MAX_AX, "Ax out of range: {ax}");
        let mut i = (op as u32) << POS_OP;
        i |= (ax & MAX_AX) << POS_AX;
        Instruction(i)
    }

    // ---- Decoders ----

    /// Get the opcode.
    pub fn opcode(&self) -> OpCode {
        let val = (self.0 >> POS_OP) & mask(SIZE_OP);
        OpCode::from_u8(val as u8).unwrap_or(OpCode::Move)
    }

    /// Returns true if the opcode bits name a real opcode.
    pub fn has_valid_opcode(&self) -> bool {
        ((self.0 >> POS_OP) & mask(SIZE_OP)) < OpCode::COUNT as u32
    }

    /// Get field A.
    pub fn a(&self) -> u32 {
        (self.0 >> POS_A) & MAX_A
    }

    /// Get field B.
    pub fn b(&self) -> u32 {
        (self.0 >> POS_B) & MAX_B
    }

    /// Get field C.
    pub fn c(&self) -> u32 {
        (self.0 >> POS_C) & MAX_C
    }

    /// Get field Bx (unsigned).
    pub fn bx(&self) -> u32 {
        (self.0 >> POS_BX) & MAX_BX
    }

    /// Get field sBx (signed).
    pub fn sbx(&self) -> i32 {
        self.bx() as i32 - OFFSET_SBX
    }

    /// Get field Ax (unsigned).
    pub fn ax_field(&self) -> u32 {
        (self.0 >> POS_AX) & MAX_AX
    }

    // ---- Mutators (for backpatching) ----

    fn set_field(&mut self, value: u32, pos: u32, size: u32) {
        let m = mask(size) << pos;
        self.0 = (self.0 & !m) | ((value << pos) & m);
    }

    /// Replace the opcode.
    pub fn set_opcode(&mut self, op: OpCode) {
        self.set_field(op as u32, POS_OP, SIZE_OP);
    }

    /// Set field A.
    pub fn set_a(&mut self, a: u32) {
        self.set_field(a, POS_A, SIZE_A);
    }

    /// Set field B.
    pub fn set_b(&mut self, b: u32) {
        self.set_field(b, POS_B, SIZE_B);
    }

    /// Set field C.
    pub fn set_c(&mut self, c: u32) {
        self.set_field(c, POS_C, SIZE_C);
    }

    /// Set field Bx.
    pub fn set_bx(&mut self, bx: u32) {
        self.set_field(bx, POS_BX, SIZE_BX);
    }

    /// Set field sBx.
    pub fn set_sbx(&mut self, sbx: i32) {
        debug_assert!((MIN_SBX..=MAX_SBX).contains(&sbx));
        self.set_bx((sbx + OFFSET_SBX) as u32);
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = self.opcode();
        write!(f, "{}", op.name())?;
        match op.format() {
            InstructionFormat::IABC => {
                write!(f, " A={} B={} C={}", self.a(), self.b(), self.c())?;
            }
            InstructionFormat::IABx => {
                write!(f, " A={} Bx={}", self.a(), self.bx())?;
            }
            InstructionFormat::IAsBx => {
                write!(f, " A={} sBx={}", self.a(), self.sbx())?;
            }
            InstructionFormat::IAx => {
                write!(f, " Ax={}", self.ax_field())?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
