//! Byte-string interning.
//!
//! Every name and string literal the compiler sees is stored once and referred
//! to by a `StringId`. Ids are dense and assigned in insertion order, so the
//! interner can be handed to the dumper and disassembler alongside the
//! prototype tree that references it.

use indexmap::IndexSet;
use std::borrow::Cow;
use std::fmt;

/// An opaque handle to a string in the interner.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct StringId(pub u32);

impl fmt::Display for StringId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// String interner: owns all strings and deduplicates them.
#[derive(Clone, Default)]
pub struct StringInterner {
    strings: IndexSet<Box<[u8]>>,
}

impl StringInterner {
    /// Create a new empty interner.
    pub fn new() -> Self {
        StringInterner {
            strings: IndexSet::new(),
        }
    }

    /// Intern a byte string, returning the existing id if already present.
    pub fn intern(&mut self, bytes: &[u8]) -> StringId {
        if let Some(idx) = self.strings.get_index_of(bytes) {
            return StringId(idx as u32);
        }
        let (idx, _) = self.strings.insert_full(bytes.into());
        StringId(idx as u32)
    }

    /// Look up a string without interning it.
    pub fn find(&self, bytes: &[u8]) -> Option<StringId> {
        self.strings.get_index_of(bytes).map(|idx| StringId(idx as u32))
    }

    /// Get the bytes of an interned string. Unknown ids yield an empty slice.
    pub fn get_bytes(&self, id: StringId) -> &[u8] {
        self.strings
            .get_index(id.0 as usize)
            .map(|b| &**b)
            .unwrap_or(&[])
    }

    /// Get an interned string as text, replacing invalid UTF-8.
    pub fn get_str_lossy(&self, id: StringId) -> Cow<'_, str> {
        String::from_utf8_lossy(self.get_bytes(id))
    }

    /// Number of distinct strings.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// Returns true if no strings have been interned.
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

impl fmt::Debug for StringInterner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.strings.iter().map(|s| String::from_utf8_lossy(s)))
            .finish()
    }
}
