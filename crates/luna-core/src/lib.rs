//! Luna core types: interned strings and number helpers shared by the compiler and its tools.

pub mod number;
pub mod string;
