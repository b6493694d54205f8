#![no_main]

use libfuzzer_sys::fuzz_target;
use luna_compiler::compiler::compile;
use luna_compiler::dump::{dump_to_vec, undump, DumpOptions};
use luna_core::string::StringInterner;

fuzz_target!(|data: &[u8]| {
    let opts = DumpOptions::default();

    // Arbitrary bytes must be rejected cleanly.
    let mut strings = StringInterner::new();
    let _ = undump(data, &opts, &mut strings);

    // Anything that compiles must survive a dump/undump/dump cycle unchanged.
    let Ok((proto, strings)) = compile(data, "=fuzz") else {
        return;
    };
    let Ok(bytes) = dump_to_vec(&proto, &strings, &opts) else {
        return;
    };
    let mut restored = StringInterner::new();
    let back = undump(&bytes, &opts, &mut restored).unwrap();
    assert_eq!(dump_to_vec(&back, &restored, &opts).unwrap(), bytes);
});
