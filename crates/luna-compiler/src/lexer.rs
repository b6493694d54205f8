use crate::error::{chunkid, CompileError, ErrorKind};
use crate::limits::MAX_LINES;
use crate::token::{Span, SpannedToken, Token};
use luna_core::string::StringInterner;

/// Pull-based lexer for Lua 5.2 with one token of lookahead.
///
/// The lexer is not primed on construction: call [`Lexer::advance`] once to
/// read the first token.
pub struct Lexer<'a> {
    source: &'a [u8],
    pos: usize,
    line: u32,
    chunk: String,
    current: SpannedToken,
    ahead: Option<SpannedToken>,
    pub strings: StringInterner,
    /// Line of the last consumed token.
    pub lastline: u32,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer from source bytes and a chunk name.
    pub fn new(source: &'a [u8], chunkname: &str) -> Self {
        Self::with_strings(source, chunkname, StringInterner::new())
    }

    /// Create a new lexer reusing an existing string interner.
    pub fn with_strings(source: &'a [u8], chunkname: &str, strings: StringInterner) -> Self {
        let mut lexer = Lexer {
            source,
            pos: 0,
            line: 1,
            chunk: chunkid(chunkname),
            current: SpannedToken {
                token: Token::Eof,
                span: Span { line: 1, start: 0, end: 0 },
            },
            ahead: None,
            strings,
            lastline: 1,
        };
        lexer.skip_shebang();
        lexer
    }

    /// The current (not yet consumed) token.
    pub fn current(&self) -> &SpannedToken {
        &self.current
    }

    /// The current token without its span.
    pub fn token(&self) -> &Token {
        &self.current.token
    }

    /// Get current line number.
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Chunk id used in diagnostics.
    pub fn chunk(&self) -> &str {
        &self.chunk
    }

    /// Consume the current token and read the next one.
    pub fn advance(&mut self) -> Result<(), CompileError> {
        self.lastline = self.line;
        self.current = match self.ahead.take() {
            Some(tok) => tok,
            None => self.scan()?,
        };
        log::trace!("token {:?} at line {}", self.current.token, self.current.span.line);
        Ok(())
    }

    /// Peek one token past the current one.
    pub fn lookahead(&mut self) -> Result<&Token, CompileError> {
        if self.ahead.is_none() {
            let tok = self.scan()?;
            self.ahead = Some(tok);
        }
        match &self.ahead {
            Some(tok) => Ok(&tok.token),
            None => Ok(&Token::Eof),
        }
    }

    // ---- Diagnostics ----

    /// Text of a token as shown after `near`.
    pub fn token_text(&self, tok: &SpannedToken) -> String {
        if tok.token.has_payload() {
            self.quoted(tok.span.start, tok.span.end)
        } else {
            tok.token.to_string()
        }
    }

    /// Error without a `near` part.
    pub fn error(&self, kind: ErrorKind, msg: impl Into<String>) -> CompileError {
        CompileError {
            kind,
            chunk: self.chunk.clone(),
            line: self.line,
            message: msg.into(),
        }
    }

    /// Error pointing at the current token.
    pub fn error_near_current(&self, kind: ErrorKind, msg: &str) -> CompileError {
        let near = self.token_text(&self.current);
        self.error(kind, format!("{msg} near {near}"))
    }

    fn error_near_text(&self, msg: &str, start: usize) -> CompileError {
        let end = (self.pos + 1).min(self.source.len());
        let near = self.quoted(start, end);
        self.error(ErrorKind::Lexical, format!("{msg} near {near}"))
    }

    fn error_near_eof(&self, msg: &str) -> CompileError {
        self.error(ErrorKind::Lexical, format!("{msg} near <eof>"))
    }

    fn quoted(&self, start: usize, end: usize) -> String {
        let end = end.min(self.source.len());
        let start = start.min(end);
        format!("'{}'", String::from_utf8_lossy(&self.source[start..end]))
    }

    // ---- Internal scanning ----

    fn skip_shebang(&mut self) {
        if self.peek() == Some(b'#') {
            while let Some(ch) = self.peek() {
                if ch == b'\n' || ch == b'\r' {
                    break;
                }
                self.pos += 1;
            }
        }
    }

    fn peek(&self) -> Option<u8> {
        self.source.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.source.get(self.pos + offset).copied()
    }

    /// Consume a newline sequence: `\n`, `\r`, `\n\r` or `\r\n` count once.
    fn inc_line(&mut self) -> Result<(), CompileError> {
        let old = self.peek();
        self.pos += 1;
        if let Some(ch) = self.peek() {
            if (ch == b'\n' || ch == b'\r') && Some(ch) != old {
                self.pos += 1;
            }
        }
        self.line += 1;
        if self.line >= MAX_LINES {
            return Err(self.error(ErrorKind::Limit, "chunk has too many lines"));
        }
        Ok(())
    }

    fn scan(&mut self) -> Result<SpannedToken, CompileError> {
        loop {
            let start = self.pos;
            let line = self.line;
            let Some(ch) = self.peek() else {
                return Ok(self.make(Token::Eof, start, line));
            };
            let token = match ch {
                b'\n' | b'\r' => {
                    self.inc_line()?;
                    continue;
                }
                b' ' | b'\t' | 0x0B | 0x0C => {
                    self.pos += 1;
                    continue;
                }
                b'-' => {
                    if self.peek_at(1) != Some(b'-') {
                        self.pos += 1;
                        Token::Minus
                    } else {
                        self.pos += 2;
                        self.skip_comment()?;
                        continue;
                    }
                }
                b'[' => {
                    let sep = self.skip_sep();
                    if sep >= 0 {
                        let content = self.read_long_string(sep as usize, false)?;
                        Token::String(self.strings.intern(&content))
                    } else if sep == -1 {
                        Token::LBracket
                    } else {
                        let near = self.quoted(start, self.pos);
                        return Err(self.error(
                            ErrorKind::Lexical,
                            format!("invalid long string delimiter near {near}"),
                        ));
                    }
                }
                b'=' => self.one_or_two(b'=', Token::Assign, Token::Equal),
                b'<' => self.one_or_two(b'=', Token::Less, Token::LessEqual),
                b'>' => self.one_or_two(b'=', Token::Greater, Token::GreaterEqual),
                b'~' => self.one_or_two(b'=', Token::Other(b'~'), Token::NotEqual),
                b':' => self.one_or_two(b':', Token::Colon, Token::DoubleColon),
                b'"' | b'\'' => {
                    let content = self.read_string(ch)?;
                    Token::String(self.strings.intern(&content))
                }
                b'.' => {
                    if self.peek_at(1) == Some(b'.') {
                        if self.peek_at(2) == Some(b'.') {
                            self.pos += 3;
                            Token::DotDotDot
                        } else {
                            self.pos += 2;
                            Token::DotDot
                        }
                    } else if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
                        self.pos += 1;
                        self.read_numeral(start)?
                    } else {
                        self.pos += 1;
                        Token::Dot
                    }
                }
                b'0'..=b'9' => self.read_numeral(start)?,
                _ if is_ident_start(ch) => {
                    while self.peek().is_some_and(is_ident_continue) {
                        self.pos += 1;
                    }
                    let text = &self.source[start..self.pos];
                    match Token::keyword_from_str(text) {
                        Some(kw) => kw,
                        None => Token::Name(self.strings.intern(text)),
                    }
                }
                _ => {
                    self.pos += 1;
                    match ch {
                        b'+' => Token::Plus,
                        b'*' => Token::Star,
                        b'/' => Token::Slash,
                        b'%' => Token::Percent,
                        b'^' => Token::Caret,
                        b'#' => Token::Hash,
                        b'(' => Token::LParen,
                        b')' => Token::RParen,
                        b'{' => Token::LBrace,
                        b'}' => Token::RBrace,
                        b']' => Token::RBracket,
                        b';' => Token::Semi,
                        b',' => Token::Comma,
                        other => Token::Other(other),
                    }
                }
            };
            return Ok(self.make(token, start, line));
        }
    }

    fn make(&self, token: Token, start: usize, line: u32) -> SpannedToken {
        SpannedToken {
            token,
            span: Span { line, start, end: self.pos },
        }
    }

    fn one_or_two(&mut self, second: u8, single: Token, double: Token) -> Token {
        self.pos += 1;
        if self.peek() == Some(second) {
            self.pos += 1;
            double
        } else {
            single
        }
    }

    /// Skip a comment whose `--` has already been consumed.
    fn skip_comment(&mut self) -> Result<(), CompileError> {
        if self.peek() == Some(b'[') {
            let sep = self.skip_sep();
            if sep >= 0 {
                self.read_long_string(sep as usize, true)?;
                return Ok(());
            }
        }
        while let Some(ch) = self.peek() {
            if ch == b'\n' || ch == b'\r' {
                break;
            }
            self.pos += 1;
        }
        Ok(())
    }

    /// Consume `[=*` or `]=*`. Returns the level if the same bracket follows,
    /// otherwise `-(level) - 1`.
    fn skip_sep(&mut self) -> i32 {
        let bracket = self.peek();
        self.pos += 1;
        let mut count = 0;
        while self.peek() == Some(b'=') {
            self.pos += 1;
            count += 1;
        }
        if self.peek() == bracket {
            count
        } else {
            -count - 1
        }
    }

    /// Read a long string or comment; the opening `[=*` has been consumed and
    /// the second `[` is the current byte.
    fn read_long_string(&mut self, sep: usize, comment: bool) -> Result<Vec<u8>, CompileError> {
        self.pos += 1;
        if matches!(self.peek(), Some(b'\n' | b'\r')) {
            self.inc_line()?;
        }
        let mut buf = Vec::new();
        loop {
            match self.peek() {
                None => {
                    let what = if comment { "comment" } else { "string" };
                    return Err(self.error_near_eof(&format!("unfinished long {what}")));
                }
                Some(b']') => {
                    let bracket_start = self.pos;
                    if self.skip_sep() == sep as i32 {
                        self.pos += 1;
                        return Ok(buf);
                    }
                    if !comment {
                        buf.extend_from_slice(&self.source[bracket_start..self.pos]);
                    }
                }
                Some(b'\n' | b'\r') => {
                    if !comment {
                        buf.push(b'\n');
                    }
                    self.inc_line()?;
                }
                Some(ch) => {
                    if !comment {
                        buf.push(ch);
                    }
                    self.pos += 1;
                }
            }
        }
    }

    fn read_string(&mut self, delim: u8) -> Result<Vec<u8>, CompileError> {
        let start = self.pos;
        self.pos += 1;
        let mut buf = Vec::new();
        loop {
            let Some(ch) = self.peek() else {
                return Err(self.error_near_eof("unfinished string"));
            };
            match ch {
                b'\n' | b'\r' => {
                    let near = self.quoted(start, self.pos);
                    return Err(self.error(
                        ErrorKind::Lexical,
                        format!("unfinished string near {near}"),
                    ));
                }
                b'\\' => {
                    self.pos += 1;
                    self.read_escape(start, &mut buf)?;
                }
                _ if ch == delim => {
                    self.pos += 1;
                    return Ok(buf);
                }
                _ => {
                    buf.push(ch);
                    self.pos += 1;
                }
            }
        }
    }

    /// Decode one escape sequence; the backslash has been consumed.
    fn read_escape(&mut self, start: usize, buf: &mut Vec<u8>) -> Result<(), CompileError> {
        let Some(ch) = self.peek() else {
            // Reported as an unfinished string by the caller.
            return Ok(());
        };
        let byte = match ch {
            b'a' => 0x07,
            b'b' => 0x08,
            b'f' => 0x0C,
            b'n' => b'\n',
            b'r' => b'\r',
            b't' => b'\t',
            b'v' => 0x0B,
            b'\\' | b'"' | b'\'' => ch,
            b'\n' | b'\r' => {
                buf.push(b'\n');
                return self.inc_line();
            }
            b'x' => {
                let mut value = 0u8;
                for _ in 0..2 {
                    self.pos += 1;
                    match self.peek() {
                        Some(h) if h.is_ascii_hexdigit() => value = (value << 4) | hex_value(h),
                        _ => return Err(self.error_near_text("hexadecimal digit expected", start)),
                    }
                }
                value
            }
            b'z' => {
                self.pos += 1;
                while let Some(c) = self.peek() {
                    match c {
                        b'\n' | b'\r' => self.inc_line()?,
                        b' ' | b'\t' | 0x0B | 0x0C => self.pos += 1,
                        _ => break,
                    }
                }
                return Ok(());
            }
            b'0'..=b'9' => {
                let mut value: u32 = 0;
                let mut digits = 0;
                while digits < 3 {
                    match self.peek() {
                        Some(d) if d.is_ascii_digit() => {
                            value = value * 10 + (d - b'0') as u32;
                            digits += 1;
                            self.pos += 1;
                        }
                        _ => break,
                    }
                }
                if value > u8::MAX as u32 {
                    self.pos -= 1;
                    return Err(self.error_near_text("decimal escape too large", start));
                }
                buf.push(value as u8);
                return Ok(());
            }
            _ => return Err(self.error_near_text("invalid escape sequence", start)),
        };
        buf.push(byte);
        self.pos += 1;
        Ok(())
    }

    /// Read a numeral starting at `start`. Hex numerals accept a fraction and
    /// a binary exponent.
    fn read_numeral(&mut self, start: usize) -> Result<Token, CompileError> {
        let mut expo = [b'E', b'e'];
        if self.pos == start && self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x' | b'X')) {
            self.pos += 2;
            expo = [b'P', b'p'];
        }
        loop {
            match self.peek() {
                Some(c) if expo.contains(&c) => {
                    self.pos += 1;
                    if matches!(self.peek(), Some(b'+' | b'-')) {
                        self.pos += 1;
                    }
                }
                Some(c) if c.is_ascii_hexdigit() || c == b'.' => self.pos += 1,
                _ => break,
            }
        }
        let text = &self.source[start..self.pos];
        let value = if expo[0] == b'P' {
            parse_hex_float(text)
        } else {
            std::str::from_utf8(text).ok().and_then(|s| s.parse::<f64>().ok())
        };
        match value {
            Some(n) => Ok(Token::Number(n)),
            None => {
                let near = self.quoted(start, self.pos);
                Err(self.error(ErrorKind::Lexical, format!("malformed number near {near}")))
            }
        }
    }
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

fn is_ident_continue(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'_'
}

fn hex_value(ch: u8) -> u8 {
    match ch {
        b'0'..=b'9' => ch - b'0',
        b'a'..=b'f' => ch - b'a' + 10,
        _ => ch - b'A' + 10,
    }
}

/// Parse `0x` numerals with optional fraction and `p` exponent.
///
/// Mantissa digits accumulate in a double; every fractional digit moves the
/// binary exponent down by 4.
pub fn parse_hex_float(text: &[u8]) -> Option<f64> {
    let digits = text.strip_prefix(b"0x").or_else(|| text.strip_prefix(b"0X"))?;
    let mut mantissa = 0.0f64;
    let mut exp: i32 = 0;
    let mut any_digit = false;
    let mut seen_dot = false;
    let mut i = 0;
    while i < digits.len() {
        let c = digits[i];
        if c == b'.' {
            if seen_dot {
                return None;
            }
            seen_dot = true;
        } else if c.is_ascii_hexdigit() {
            mantissa = mantissa * 16.0 + hex_value(c) as f64;
            if seen_dot {
                exp -= 4;
            }
            any_digit = true;
        } else {
            break;
        }
        i += 1;
    }
    if !any_digit {
        return None;
    }
    if i < digits.len() {
        if !matches!(digits[i], b'p' | b'P') {
            return None;
        }
        i += 1;
        let negative = match digits.get(i) {
            Some(b'-') => {
                i += 1;
                true
            }
            Some(b'+') => {
                i += 1;
                false
            }
            _ => false,
        };
        let exp_digits = &digits[i..];
        if exp_digits.is_empty() || !exp_digits.iter().all(u8::is_ascii_digit) {
            return None;
        }
        let mut e: i32 = 0;
        for d in exp_digits {
            e = e.saturating_mul(10).saturating_add((d - b'0') as i32);
        }
        exp = exp.saturating_add(if negative { -e } else { e });
    }
    Some(ldexp(mantissa, exp))
}

/// `x * 2^exp` without overflowing the intermediate power.
fn ldexp(mut x: f64, mut exp: i32) -> f64 {
    while exp > 1000 {
        x *= 2f64.powi(1000);
        exp -= 1000;
    }
    while exp < -1000 {
        x *= 2f64.powi(-1000);
        exp += 1000;
    }
    x * 2f64.powi(exp)
}
