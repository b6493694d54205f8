#![no_main]

use libfuzzer_sys::fuzz_target;
use luna_compiler::lexer::Lexer;
use luna_compiler::token::Token;

fuzz_target!(|data: &[u8]| {
    let mut lexer = Lexer::new(data, "=fuzz");
    loop {
        match lexer.advance() {
            Ok(()) if *lexer.token() == Token::Eof => break,
            Ok(()) => {}
            Err(_) => break,
        }
    }
});
