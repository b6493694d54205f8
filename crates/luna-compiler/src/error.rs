//! Compile errors and chunk ids.

use crate::limits::MAX_SRC;

/// Broad category of a compile error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed token: bad escape, unfinished string, malformed number.
    Lexical,
    /// Unexpected token.
    Syntax,
    /// Well-formed but invalid program: bad goto, duplicate label, misplaced `...`.
    Semantic,
    /// A hard compiler limit was exceeded.
    Limit,
}

/// Compiler error. Compilation stops at the first one.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("{chunk}:{line}: {message}")]
pub struct CompileError {
    pub kind: ErrorKind,
    /// Chunk id as shown to the user.
    pub chunk: String,
    pub line: u32,
    /// Message, including the `near` part when there is one.
    pub message: String,
}

/// Build the user-visible id of a chunk from its name.
///
/// `=name` is shown verbatim, `@file` as the file name, and anything else as
/// `[string "first line"]`. Long ids are cut to fit `MAX_SRC` with `...`.
pub fn chunkid(source: &str) -> String {
    const RETS: &str = "...";
    const PRE: &str = "[string \"";
    const POS: &str = "\"]";
    let budget = MAX_SRC - 1;

    if let Some(rest) = source.strip_prefix('=') {
        return rest.chars().take(budget).collect();
    }
    if let Some(rest) = source.strip_prefix('@') {
        let len = rest.chars().count();
        if len <= budget {
            return rest.to_string();
        }
        let keep = budget - RETS.len();
        let tail: String = rest.chars().skip(len - keep).collect();
        return format!("{RETS}{tail}");
    }

    let first_line = source.split(['\n', '\r']).next().unwrap_or("");
    let room = budget - PRE.len() - RETS.len() - POS.len();
    let len = first_line.chars().count();
    if len < room && first_line.len() == source.len() {
        format!("{PRE}{source}{POS}")
    } else {
        let head: String = first_line.chars().take(room).collect();
        format!("{PRE}{head}{RETS}{POS}")
    }
}
