//! Lua 5.2 binary chunks: serialization (dump) and deserialization (undump).
//!
//! The header records the byte order, the C type sizes and the number
//! format of the writer; a reader must agree on all of them or reject the
//! chunk.

use crate::opcode::Instruction;
use crate::proto::{Constant, LocalVar, Proto, UpvalDesc};
use luna_core::number::{as_i32, fmt_number};
use luna_core::string::{StringId, StringInterner};
use std::io::{self, Write};

// Lua 5.2 binary header constants
const LUA_SIGNATURE: &[u8; 4] = b"\x1bLua";
const LUAC_VERSION: u8 = 0x52;
const LUAC_FORMAT: u8 = 0;
const LUAC_TAIL: &[u8; 6] = b"\x19\x93\r\n\x1a\n";
const SIZE_INT: u8 = 4;
const SIZE_SIZE_T: u8 = 4;
const SIZE_INSTRUCTION: u8 = 4;

/// Length of the chunk header in bytes.
pub const HEADER_SIZE: usize = 18;

// Constant type tags
const LUA_TNIL: u8 = 0;
const LUA_TBOOLEAN: u8 = 1;
const LUA_TNUMBER: u8 = 3;
const LUA_TSTRING: u8 = 4;
/// Exact 32-bit integers under [`NumberFormat::NumPatchInt32`] (-2 as a byte).
const LUA_TINT: u8 = 0xfe;

/// Byte order of every multi-byte value in the chunk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Endianness {
    #[default]
    Little,
    Big,
}

/// How numbers are stored.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NumberFormat {
    /// Every number is an 8-byte double.
    #[default]
    FloatsOrDoubles,
    /// Every number is a 4-byte integer; non-integers cannot be dumped.
    IntsOnly,
    /// Exact 32-bit integers are tagged ints, everything else is a double.
    NumPatchInt32,
}

impl NumberFormat {
    /// The format byte written in the header.
    pub fn code(self) -> u8 {
        match self {
            NumberFormat::FloatsOrDoubles => 0,
            NumberFormat::IntsOnly => 1,
            NumberFormat::NumPatchInt32 => 4,
        }
    }

    /// The format recorded by a header format byte.
    pub fn from_code(code: u8) -> Option<NumberFormat> {
        match code {
            0 => Some(NumberFormat::FloatsOrDoubles),
            1 => Some(NumberFormat::IntsOnly),
            4 => Some(NumberFormat::NumPatchInt32),
            _ => None,
        }
    }

    /// `sizeof(lua_Number)` as recorded in the header.
    pub fn number_size(self) -> u8 {
        match self {
            NumberFormat::IntsOnly => 4,
            _ => 8,
        }
    }
}

/// Options controlling the dump format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DumpOptions {
    /// Omit source names, line info, locals and upvalue names.
    pub strip: bool,
    pub endianness: Endianness,
    pub number_format: NumberFormat,
}

/// The exact header bytes for a set of options.
pub fn header(opts: &DumpOptions) -> [u8; HEADER_SIZE] {
    let mut h = [0u8; HEADER_SIZE];
    h[..4].copy_from_slice(LUA_SIGNATURE);
    h[4] = LUAC_VERSION;
    h[5] = LUAC_FORMAT;
    h[6] = (opts.endianness == Endianness::Little) as u8;
    h[7] = SIZE_INT;
    h[8] = SIZE_SIZE_T;
    h[9] = SIZE_INSTRUCTION;
    h[10] = opts.number_format.number_size();
    h[11] = opts.number_format.code();
    h[12..].copy_from_slice(LUAC_TAIL);
    h
}

// ─── Dumper ─────────────────────────────────────────────────────────────

/// Error type for dump failures.
#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    #[error("cannot write chunk: {0}")]
    Io(#[from] io::Error),
    #[error("number {0} is not an integer")]
    NotAnInteger(String),
}

/// Serialize a prototype tree into `out`.
pub fn dump<W: Write>(
    proto: &Proto,
    strings: &StringInterner,
    out: W,
    opts: &DumpOptions,
) -> Result<(), DumpError> {
    let mut d = Dumper { out, strings, opts: *opts };
    d.out.write_all(&header(opts))?;
    d.function(proto)?;
    d.out.flush()?;
    Ok(())
}

/// Serialize a prototype tree into a byte vector.
pub fn dump_to_vec(proto: &Proto, strings: &StringInterner, opts: &DumpOptions) -> Result<Vec<u8>, DumpError> {
    let mut out = Vec::new();
    dump(proto, strings, &mut out, opts)?;
    log::debug!(
        "dumped chunk: {} bytes ({:?}, {:?}{})",
        out.len(),
        opts.endianness,
        opts.number_format,
        if opts.strip { ", stripped" } else { "" }
    );
    Ok(out)
}

struct Dumper<'a, W> {
    out: W,
    strings: &'a StringInterner,
    opts: DumpOptions,
}

impl<W: Write> Dumper<'_, W> {
    fn byte(&mut self, b: u8) -> Result<(), DumpError> {
        self.out.write_all(&[b])?;
        Ok(())
    }

    fn u32(&mut self, v: u32) -> Result<(), DumpError> {
        let bytes = match self.opts.endianness {
            Endianness::Little => v.to_le_bytes(),
            Endianness::Big => v.to_be_bytes(),
        };
        self.out.write_all(&bytes)?;
        Ok(())
    }

    fn int(&mut self, v: i32) -> Result<(), DumpError> {
        self.u32(v as u32)
    }

    fn count(&mut self, n: usize) -> Result<(), DumpError> {
        self.u32(n as u32)
    }

    fn double(&mut self, n: f64) -> Result<(), DumpError> {
        let bytes = match self.opts.endianness {
            Endianness::Little => n.to_bits().to_le_bytes(),
            Endianness::Big => n.to_bits().to_be_bytes(),
        };
        self.out.write_all(&bytes)?;
        Ok(())
    }

    /// Absent strings are a zero size; present ones are size+1, bytes, NUL.
    fn string(&mut self, s: Option<StringId>) -> Result<(), DumpError> {
        match s {
            None => self.count(0),
            Some(id) => {
                let bytes = self.strings.get_bytes(id);
                self.count(bytes.len() + 1)?;
                self.out.write_all(bytes)?;
                self.byte(0)
            }
        }
    }

    fn number(&mut self, n: f64) -> Result<(), DumpError> {
        match self.opts.number_format {
            NumberFormat::FloatsOrDoubles => {
                self.byte(LUA_TNUMBER)?;
                self.double(n)
            }
            NumberFormat::IntsOnly => match as_i32(n) {
                Some(i) => {
                    self.byte(LUA_TNUMBER)?;
                    self.int(i)
                }
                None => Err(DumpError::NotAnInteger(fmt_number(n))),
            },
            NumberFormat::NumPatchInt32 => match exact_int(n) {
                Some(i) => {
                    self.byte(LUA_TINT)?;
                    self.int(i)
                }
                None => {
                    self.byte(LUA_TNUMBER)?;
                    self.double(n)
                }
            },
        }
    }

    fn function(&mut self, proto: &Proto) -> Result<(), DumpError> {
        self.int(proto.line_defined as i32)?;
        self.int(proto.last_line_defined as i32)?;
        self.byte(proto.num_params)?;
        self.byte(proto.is_vararg as u8)?;
        self.byte(proto.max_stack_size)?;

        // Code
        self.count(proto.code.len())?;
        for inst in &proto.code {
            self.u32(inst.0)?;
        }

        // Constants
        self.count(proto.constants.len())?;
        for k in &proto.constants {
            match *k {
                Constant::Nil => self.byte(LUA_TNIL)?,
                Constant::Boolean(b) => {
                    self.byte(LUA_TBOOLEAN)?;
                    self.byte(b as u8)?;
                }
                Constant::Number(n) => self.number(n)?,
                Constant::String(id) => {
                    self.byte(LUA_TSTRING)?;
                    self.string(Some(id))?;
                }
            }
        }

        // Protos (child functions)
        self.count(proto.protos.len())?;
        for child in &proto.protos {
            self.function(child)?;
        }

        // Upvalues
        self.count(proto.upvalues.len())?;
        for uv in &proto.upvalues {
            self.byte(uv.in_stack as u8)?;
            self.byte(uv.index)?;
        }

        // Debug info
        if self.opts.strip {
            self.string(None)?;
            self.count(0)?;
            self.count(0)?;
            self.count(0)?;
            return Ok(());
        }
        self.string(proto.source)?;
        self.count(proto.line_info.len())?;
        for &line in &proto.line_info {
            self.int(line as i32)?;
        }
        self.count(proto.local_vars.len())?;
        for var in &proto.local_vars {
            self.string(Some(var.name))?;
            self.int(var.start_pc as i32)?;
            self.int(var.end_pc as i32)?;
        }
        self.count(proto.upvalues.len())?;
        for uv in &proto.upvalues {
            self.string(uv.name)?;
        }
        Ok(())
    }
}

/// The value as an `i32` if it round-trips exactly, keeping `-0` a double.
fn exact_int(n: f64) -> Option<i32> {
    if n == 0.0 && n.is_sign_negative() {
        return None;
    }
    as_i32(n)
}

// ─── Undumper ───────────────────────────────────────────────────────────

/// Error type for undump failures.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum UndumpError {
    #[error("not a binary chunk")]
    NotBinaryChunk,
    #[error("version mismatch")]
    VersionMismatch,
    #[error("format mismatch")]
    FormatMismatch,
    #[error("endianness mismatch")]
    EndiannessMismatch,
    #[error("size mismatch")]
    SizeMismatch,
    #[error("number format mismatch")]
    NumberFormatMismatch,
    #[error("corrupted chunk")]
    Corrupted,
    #[error("truncated chunk")]
    Truncated,
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    opts: DumpOptions,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], UndumpError> {
        if n > self.remaining() {
            return Err(UndumpError::Truncated);
        }
        let data = self.data;
        let slice = &data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8, UndumpError> {
        Ok(self.bytes(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, UndumpError> {
        let b = self.bytes(4)?;
        let raw = [b[0], b[1], b[2], b[3]];
        Ok(match self.opts.endianness {
            Endianness::Little => u32::from_le_bytes(raw),
            Endianness::Big => u32::from_be_bytes(raw),
        })
    }

    fn int(&mut self) -> Result<i32, UndumpError> {
        self.u32().map(|v| v as i32)
    }

    /// A non-negative int, as used for line numbers and pcs.
    fn uint(&mut self) -> Result<u32, UndumpError> {
        let v = self.int()?;
        u32::try_from(v).map_err(|_| UndumpError::Corrupted)
    }

    /// An element count. Each element takes at least `min_size` bytes, which
    /// bounds the count by the remaining input.
    fn count(&mut self, min_size: usize) -> Result<usize, UndumpError> {
        let n = self.uint()? as usize;
        if n.saturating_mul(min_size) > self.remaining() {
            return Err(UndumpError::Truncated);
        }
        Ok(n)
    }

    fn double(&mut self) -> Result<f64, UndumpError> {
        let b = self.bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        let bits = match self.opts.endianness {
            Endianness::Little => u64::from_le_bytes(raw),
            Endianness::Big => u64::from_be_bytes(raw),
        };
        Ok(f64::from_bits(bits))
    }

    fn string(&mut self, strings: &mut StringInterner) -> Result<Option<StringId>, UndumpError> {
        let size = self.uint()? as usize;
        if size == 0 {
            return Ok(None);
        }
        let bytes = self.bytes(size)?;
        let (text, nul) = bytes.split_at(size - 1);
        if nul != [0] {
            return Err(UndumpError::Corrupted);
        }
        Ok(Some(strings.intern(text)))
    }

    fn number(&mut self) -> Result<f64, UndumpError> {
        match self.opts.number_format {
            NumberFormat::IntsOnly => Ok(self.int()? as f64),
            _ => self.double(),
        }
    }
}

/// Deserialize a binary chunk written with `opts` into a prototype tree.
/// Strings are interned into `strings`.
pub fn undump(data: &[u8], opts: &DumpOptions, strings: &mut StringInterner) -> Result<Proto, UndumpError> {
    verify_header(data, opts)?;
    let mut reader = Reader {
        data,
        pos: HEADER_SIZE,
        opts: *opts,
    };
    let proto = read_function(&mut reader, strings)?;
    if reader.remaining() != 0 {
        return Err(UndumpError::Corrupted);
    }
    Ok(proto)
}

/// Returns true if `data` starts with the binary chunk signature.
pub fn is_binary_chunk(data: &[u8]) -> bool {
    data.starts_with(LUA_SIGNATURE)
}

fn verify_header(data: &[u8], opts: &DumpOptions) -> Result<(), UndumpError> {
    if !is_binary_chunk(data) {
        return Err(UndumpError::NotBinaryChunk);
    }
    let Some(found) = data.get(..HEADER_SIZE) else {
        return Err(UndumpError::Truncated);
    };
    let expected = header(opts);
    if found[4] != expected[4] {
        return Err(UndumpError::VersionMismatch);
    }
    if found[5] != expected[5] {
        return Err(UndumpError::FormatMismatch);
    }
    if found[6] != expected[6] {
        return Err(UndumpError::EndiannessMismatch);
    }
    if found[7..10] != expected[7..10] {
        return Err(UndumpError::SizeMismatch);
    }
    if NumberFormat::from_code(found[11]) != Some(opts.number_format) {
        return Err(UndumpError::NumberFormatMismatch);
    }
    if found[10] != expected[10] {
        return Err(UndumpError::SizeMismatch);
    }
    if found[12..] != expected[12..] {
        return Err(UndumpError::Corrupted);
    }
    Ok(())
}

fn read_function(reader: &mut Reader, strings: &mut StringInterner) -> Result<Proto, UndumpError> {
    let mut proto = Proto::new();
    proto.line_defined = reader.uint()?;
    proto.last_line_defined = reader.uint()?;
    proto.num_params = reader.byte()?;
    proto.is_vararg = reader.byte()? != 0;
    proto.max_stack_size = reader.byte()?;

    // Code
    let n = reader.count(4)?;
    proto.code = (0..n)
        .map(|_| reader.u32().map(Instruction))
        .collect::<Result<_, _>>()?;

    // Constants
    let n = reader.count(1)?;
    proto.constants = Vec::with_capacity(n);
    for _ in 0..n {
        let k = match reader.byte()? {
            LUA_TNIL => Constant::Nil,
            LUA_TBOOLEAN => Constant::Boolean(reader.byte()? != 0),
            LUA_TNUMBER => Constant::Number(reader.number()?),
            LUA_TINT => Constant::Number(reader.int()? as f64),
            LUA_TSTRING => Constant::String(reader.string(strings)?.ok_or(UndumpError::Corrupted)?),
            _ => return Err(UndumpError::Corrupted),
        };
        proto.constants.push(k);
    }

    // Protos (child functions)
    let n = reader.count(1)?;
    proto.protos = Vec::with_capacity(n);
    for _ in 0..n {
        proto.protos.push(read_function(reader, strings)?);
    }

    // Upvalues
    let n = reader.count(2)?;
    proto.upvalues = Vec::with_capacity(n);
    for _ in 0..n {
        let in_stack = reader.byte()? != 0;
        let index = reader.byte()?;
        proto.upvalues.push(UpvalDesc {
            name: None, // filled in the debug section
            in_stack,
            index,
        });
    }

    // Debug info
    proto.source = reader.string(strings)?;
    let n = reader.count(4)?;
    proto.line_info = (0..n).map(|_| reader.uint()).collect::<Result<_, _>>()?;
    let n = reader.count(12)?;
    proto.local_vars = Vec::with_capacity(n);
    for _ in 0..n {
        let name = reader.string(strings)?.ok_or(UndumpError::Corrupted)?;
        let start_pc = reader.uint()?;
        let end_pc = reader.uint()?;
        proto.local_vars.push(LocalVar { name, start_pc, end_pc });
    }
    let n = reader.count(4)?;
    if n > proto.upvalues.len() {
        return Err(UndumpError::Corrupted);
    }
    for i in 0..n {
        proto.upvalues[i].name = reader.string(strings)?;
    }
    Ok(proto)
}
