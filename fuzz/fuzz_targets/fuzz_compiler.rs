#![no_main]

use libfuzzer_sys::fuzz_target;
use luna_compiler::compiler::compile;
use luna_compiler::disasm::disassemble;

fuzz_target!(|data: &[u8]| {
    // Errors are fine, panics are bugs. Listing exercises every operand decoder.
    if let Ok((proto, strings)) = compile(data, "=fuzz") {
        let _ = disassemble(&proto, &strings);
    }
});
