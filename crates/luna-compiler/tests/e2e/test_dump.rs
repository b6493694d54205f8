use super::helpers::*;
use luna_compiler::dump::{dump_to_vec, header, undump, DumpOptions, Endianness, NumberFormat, HEADER_SIZE};
use luna_compiler::opcode::{Instruction, OpCode};
use luna_compiler::proto::Proto;
use luna_core::string::StringInterner;

fn trivial_function() -> Proto {
    let mut p = Proto::new();
    p.emit(Instruction::abc(OpCode::Return, 0, 1, 0), 1);
    p
}

#[test]
fn e2e_dump_header_matches_options() {
    let p = trivial_function();
    let strings = StringInterner::new();
    for (endianness, number_format, endian_byte, number_size, format_byte) in [
        (Endianness::Little, NumberFormat::FloatsOrDoubles, 1, 8, 0),
        (Endianness::Big, NumberFormat::FloatsOrDoubles, 0, 8, 0),
        (Endianness::Little, NumberFormat::IntsOnly, 1, 4, 1),
        (Endianness::Big, NumberFormat::NumPatchInt32, 0, 8, 4),
    ] {
        let opts = DumpOptions {
            strip: false,
            endianness,
            number_format,
        };
        let bytes = dump_to_vec(&p, &strings, &opts).unwrap();
        let h = &bytes[..HEADER_SIZE];
        assert_eq!(h, &header(&opts)[..]);
        assert_eq!(&h[..4], b"\x1bLua");
        assert_eq!(h[4], 0x52);
        assert_eq!(h[5], 0);
        assert_eq!(h[6], endian_byte);
        assert_eq!(&h[7..10], &[4, 4, 4]);
        assert_eq!(h[10], number_size);
        assert_eq!(h[11], format_byte);
        assert_eq!(&h[12..], b"\x19\x93\r\n\x1a\n");
    }
}

#[test]
fn e2e_dump_is_deterministic() {
    let (p, strings) = compile_str("local t = {} for i = 1, 10 do t[i] = i * 2 end return t");
    let opts = DumpOptions::default();
    let a = dump_to_vec(&p, &strings, &opts).unwrap();
    let b = dump_to_vec(&p, &strings, &opts).unwrap();
    assert_eq!(a, b);
}

#[test]
fn e2e_strip_shrinks_chunk() {
    let (p, strings) = compile_str("local function f(a, b)\n  return a + b\nend\nreturn f(1, 2)");
    let full = dump_to_vec(&p, &strings, &DumpOptions::default()).unwrap();
    let stripped = dump_to_vec(
        &p,
        &strings,
        &DumpOptions {
            strip: true,
            ..Default::default()
        },
    )
    .unwrap();
    assert!(stripped.len() < full.len());
    // The source name appears only in the unstripped chunk.
    let has_source = |bytes: &[u8]| bytes.windows(5).any(|w| w == b"=test");
    assert!(has_source(&full));
    assert!(!has_source(&stripped));
}

#[test]
fn e2e_string_constant_encoding() {
    let (p, strings) = compile_str("return 'ab'");
    let bytes = dump_to_vec(
        &p,
        &strings,
        &DumpOptions {
            strip: true,
            ..Default::default()
        },
    )
    .unwrap();
    // Tag 4, size 3 (length + 1), the bytes, then NUL.
    let encoded = [4, 3, 0, 0, 0, b'a', b'b', 0];
    assert!(bytes.windows(encoded.len()).any(|w| w == encoded));
}

#[test]
fn e2e_undump_nested_functions() {
    let source = "local function outer()\n  local x = 1\n  return function() return x end\nend\nreturn outer";
    let (p, strings) = compile_str(source);
    let opts = DumpOptions {
        strip: false,
        endianness: Endianness::Big,
        number_format: NumberFormat::FloatsOrDoubles,
    };
    let bytes = dump_to_vec(&p, &strings, &opts).unwrap();
    let mut restored = StringInterner::new();
    let q = undump(&bytes, &opts, &mut restored).unwrap();
    let inner = &q.protos[0].protos[0];
    assert_eq!(inner.code, p.protos[0].protos[0].code);
    assert_eq!(inner.line_defined, 3);
    assert!(!inner.upvalues.is_empty());
    assert_eq!(restored.get_str_lossy(inner.upvalues[0].name.unwrap()), "x");
}
