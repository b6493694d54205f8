use luna_core::string::StringId;
use std::fmt;

/// Source location of a token: its line and byte range in the chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Span {
    pub line: u32,
    pub start: usize,
    pub end: usize,
}

/// A token with its source location.
#[derive(Clone, Debug, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

/// All Lua 5.2 tokens.
#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    // --- Keywords (22) ---
    And,
    Break,
    Do,
    Else,
    ElseIf,
    End,
    False,
    For,
    Function,
    Goto,
    If,
    In,
    Local,
    Nil,
    Not,
    Or,
    Repeat,
    Return,
    Then,
    True,
    Until,
    While,

    // --- Literals ---
    Number(f64),
    String(StringId),
    Name(StringId),

    // --- Single-char operators/punctuation ---
    Plus,      // +
    Minus,     // -
    Star,      // *
    Slash,     // /
    Percent,   // %
    Caret,     // ^
    Hash,      // #
    Less,      // <
    Greater,   // >
    Assign,    // =
    LParen,    // (
    RParen,    // )
    LBrace,    // {
    RBrace,    // }
    LBracket,  // [
    RBracket,  // ]
    Semi,      // ;
    Colon,     // :
    Comma,     // ,
    Dot,       // .
    /// Any other single byte; the parser decides whether it is meaningful.
    Other(u8),

    // --- Multi-char operators ---
    DotDot,       // ..
    DotDotDot,    // ...
    Equal,        // ==
    GreaterEqual, // >=
    LessEqual,    // <=
    NotEqual,     // ~=
    DoubleColon,  // ::

    Eof,
}

impl Token {
    /// Look up a keyword from its source text.
    pub fn keyword_from_str(s: &[u8]) -> Option<Token> {
        let tok = match s {
            b"and" => Token::And,
            b"break" => Token::Break,
            b"do" => Token::Do,
            b"else" => Token::Else,
            b"elseif" => Token::ElseIf,
            b"end" => Token::End,
            b"false" => Token::False,
            b"for" => Token::For,
            b"function" => Token::Function,
            b"goto" => Token::Goto,
            b"if" => Token::If,
            b"in" => Token::In,
            b"local" => Token::Local,
            b"nil" => Token::Nil,
            b"not" => Token::Not,
            b"or" => Token::Or,
            b"repeat" => Token::Repeat,
            b"return" => Token::Return,
            b"then" => Token::Then,
            b"true" => Token::True,
            b"until" => Token::Until,
            b"while" => Token::While,
            _ => return None,
        };
        Some(tok)
    }

    /// Fixed source text of keywords and operators.
    fn text(&self) -> Option<&'static str> {
        let s = match self {
            Token::And => "and",
            Token::Break => "break",
            Token::Do => "do",
            Token::Else => "else",
            Token::ElseIf => "elseif",
            Token::End => "end",
            Token::False => "false",
            Token::For => "for",
            Token::Function => "function",
            Token::Goto => "goto",
            Token::If => "if",
            Token::In => "in",
            Token::Local => "local",
            Token::Nil => "nil",
            Token::Not => "not",
            Token::Or => "or",
            Token::Repeat => "repeat",
            Token::Return => "return",
            Token::Then => "then",
            Token::True => "true",
            Token::Until => "until",
            Token::While => "while",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Caret => "^",
            Token::Hash => "#",
            Token::Less => "<",
            Token::Greater => ">",
            Token::Assign => "=",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::Semi => ";",
            Token::Colon => ":",
            Token::Comma => ",",
            Token::Dot => ".",
            Token::DotDot => "..",
            Token::DotDotDot => "...",
            Token::Equal => "==",
            Token::GreaterEqual => ">=",
            Token::LessEqual => "<=",
            Token::NotEqual => "~=",
            Token::DoubleColon => "::",
            _ => return None,
        };
        Some(s)
    }

    /// Returns true for tokens that carry source text of their own.
    pub fn has_payload(&self) -> bool {
        matches!(self, Token::Number(_) | Token::String(_) | Token::Name(_))
    }
}

/// Renders a token the way diagnostics name it: quoted text for fixed tokens,
/// `char(N)` for control bytes, and `<name>`-style placeholders for literals.
impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(text) = self.text() {
            return write!(f, "'{text}'");
        }
        match self {
            Token::Other(c) if c.is_ascii_control() => write!(f, "char({c})"),
            Token::Other(c) => write!(f, "'{}'", *c as char),
            Token::Number(_) => write!(f, "<number>"),
            Token::String(_) => write!(f, "<string>"),
            Token::Name(_) => write!(f, "<name>"),
            _ => write!(f, "<eof>"),
        }
    }
}
