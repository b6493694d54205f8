//! Number helpers shared by diagnostics, the disassembler and the dumper.

/// Significant digits used when rendering numbers (`LUAI_NUMFFORMAT` is `%.14g`).
const PRECISION: usize = 14;

/// Format a number the way `printf("%.14g", n)` does.
pub fn fmt_number(n: f64) -> String {
    if n.is_nan() {
        return if n.is_sign_negative() { "-nan" } else { "nan" }.to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if n == 0.0 {
        return if n.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    // Rust's exponent form rounds to the requested digits, which is also
    // what decides between %e and %f for %g.
    let sci = format!("{:.*e}", PRECISION - 1, n);
    let (mantissa, exp) = match sci.split_once('e') {
        Some(parts) => parts,
        None => return sci,
    };
    let exp: i32 = exp.parse().unwrap_or(0);

    if exp < -4 || exp >= PRECISION as i32 {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", trim_fraction(mantissa), sign, exp.abs())
    } else {
        let decimals = (PRECISION as i32 - 1 - exp) as usize;
        trim_fraction(&format!("{n:.decimals$}")).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// The value as an `i32` when it is exactly representable as one.
pub fn as_i32(n: f64) -> Option<i32> {
    let i = n as i32;
    if i as f64 == n {
        Some(i)
    } else {
        None
    }
}

/// Returns true if the number has no fractional part and is finite.
pub fn is_integral(n: f64) -> bool {
    n.is_finite() && n.fract() == 0.0
}
