//! Expression descriptors and operator tables.

use crate::limits::NO_JUMP;
use crate::token::Token;

/// Describes where an expression's value currently lives.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ExprKind {
    /// No value (empty expression list).
    Void,
    /// Nil literal.
    Nil,
    /// True literal.
    True,
    /// False literal.
    False,
    /// Constant at the given pool index.
    K(u32),
    /// Numeric literal not yet placed in the pool.
    Number(f64),
    /// Value in a fixed register.
    NonReloc(u32),
    /// Active local variable in the given register.
    Local(u32),
    /// Upvalue at the given index.
    Upval(u32),
    /// `table[key]`. `table` is a register, or an upvalue index when
    /// `in_upval` is set; `key` is an RK operand.
    Indexed { table: u32, key: u32, in_upval: bool },
    /// Result of a comparison: the pc of its jump.
    Jmp(usize),
    /// Instruction at pc whose destination register is not yet set.
    Relocable(usize),
    /// Open function call at pc.
    Call(usize),
    /// Vararg expression at pc.
    VarArg(usize),
}

/// An expression descriptor with its pending true/false exit lists.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExprDesc {
    pub kind: ExprKind,
    /// Patch list of jumps taken when the expression is true.
    pub t: i32,
    /// Patch list of jumps taken when the expression is false.
    pub f: i32,
}

impl ExprDesc {
    pub fn new(kind: ExprKind) -> Self {
        ExprDesc { kind, t: NO_JUMP, f: NO_JUMP }
    }

    pub fn void() -> Self {
        Self::new(ExprKind::Void)
    }

    /// Returns true if either exit list is non-empty.
    pub fn has_jumps(&self) -> bool {
        self.t != self.f
    }

    /// A numeric literal with no pending jumps.
    pub fn numeral(&self) -> Option<f64> {
        match self.kind {
            ExprKind::Number(n) if !self.has_jumps() => Some(n),
            _ => None,
        }
    }

    /// Calls and varargs may produce any number of values.
    pub fn has_multret(&self) -> bool {
        matches!(self.kind, ExprKind::Call(_) | ExprKind::VarArg(_))
    }

    /// Can appear on the left of an assignment.
    pub fn is_var(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Local(_) | ExprKind::Upval(_) | ExprKind::Indexed { .. }
        )
    }

    /// Register held by a `NonReloc` or `Local` expression.
    pub fn reg(&self) -> Option<u32> {
        match self.kind {
            ExprKind::NonReloc(r) | ExprKind::Local(r) => Some(r),
            _ => None,
        }
    }
}

/// Binary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Concat,
    Eq,
    Lt,
    Le,
    Ne,
    Gt,
    Ge,
    And,
    Or,
}

/// Unary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp {
    Minus,
    Not,
    Len,
}

/// Priority for the operand of a unary operator.
pub const UNARY_PRIORITY: u8 = 8;

impl BinOp {
    pub fn from_token(token: &Token) -> Option<BinOp> {
        let op = match token {
            Token::Plus => BinOp::Add,
            Token::Minus => BinOp::Sub,
            Token::Star => BinOp::Mul,
            Token::Slash => BinOp::Div,
            Token::Percent => BinOp::Mod,
            Token::Caret => BinOp::Pow,
            Token::DotDot => BinOp::Concat,
            Token::Equal => BinOp::Eq,
            Token::Less => BinOp::Lt,
            Token::LessEqual => BinOp::Le,
            Token::NotEqual => BinOp::Ne,
            Token::Greater => BinOp::Gt,
            Token::GreaterEqual => BinOp::Ge,
            Token::And => BinOp::And,
            Token::Or => BinOp::Or,
            _ => return None,
        };
        Some(op)
    }

    /// (left, right) priority; right < left makes the operator right-associative.
    pub fn priority(self) -> (u8, u8) {
        match self {
            BinOp::Add | BinOp::Sub => (6, 6),
            BinOp::Mul | BinOp::Div | BinOp::Mod => (7, 7),
            BinOp::Pow => (10, 9),
            BinOp::Concat => (5, 4),
            BinOp::Eq | BinOp::Lt | BinOp::Le | BinOp::Ne | BinOp::Gt | BinOp::Ge => (3, 3),
            BinOp::And => (2, 2),
            BinOp::Or => (1, 1),
        }
    }

    pub fn is_arith(self) -> bool {
        matches!(
            self,
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod | BinOp::Pow
        )
    }
}

impl UnOp {
    pub fn from_token(token: &Token) -> Option<UnOp> {
        match token {
            Token::Minus => Some(UnOp::Minus),
            Token::Not => Some(UnOp::Not),
            Token::Hash => Some(UnOp::Len),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jump_lists() {
        let mut e = ExprDesc::new(ExprKind::Nil);
        assert!(!e.has_jumps());
        e.t = 3;
        assert!(e.has_jumps());
    }

    #[test]
    fn test_numeral_requires_no_jumps() {
        let mut e = ExprDesc::new(ExprKind::Number(2.0));
        assert_eq!(e.numeral(), Some(2.0));
        e.f = 0;
        assert_eq!(e.numeral(), None);
    }

    #[test]
    fn test_priorities() {
        let (l, r) = BinOp::Pow.priority();
        assert!(r < l);
        let (l, r) = BinOp::Concat.priority();
        assert!(r < l);
        assert!(BinOp::Mul.priority().0 > BinOp::Add.priority().0);
        assert!(UNARY_PRIORITY > BinOp::Mul.priority().0);
        assert!(UNARY_PRIORITY < BinOp::Pow.priority().0);
    }

    #[test]
    fn test_from_token() {
        assert_eq!(BinOp::from_token(&Token::NotEqual), Some(BinOp::Ne));
        assert_eq!(BinOp::from_token(&Token::Hash), None);
        assert_eq!(UnOp::from_token(&Token::Hash), Some(UnOp::Len));
        assert_eq!(UnOp::from_token(&Token::Plus), None);
    }
}
