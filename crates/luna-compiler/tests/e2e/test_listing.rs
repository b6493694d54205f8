use super::helpers::*;
use luna_compiler::disasm::{disassemble, Listing};

const PROGRAM: &str = "\
local function counter()
  local n = 0
  return function()
    n = n + 1
    return n
  end
end
local c = counter()
print(c(), c())
";

#[test]
fn e2e_listing_covers_every_function() {
    let (p, strings) = compile_str(PROGRAM);
    let out = disassemble(&p, &strings);
    assert!(out.starts_with("\nmain <test:0,0>"));
    assert!(out.contains("function <test:1,7>"));
    assert!(out.contains("function <test:3,6>"));
    assert!(out.contains("SETUPVAL"));
    // Every function gets its own debug sections.
    assert_eq!(out.matches("upvalues (").count(), 3);
}

#[test]
fn e2e_short_listing() {
    let (p, strings) = compile_str(PROGRAM);
    let out = Listing::new(&p, &strings).full(false).to_string();
    assert!(out.contains("CLOSURE"));
    assert!(!out.contains("locals ("));
}
