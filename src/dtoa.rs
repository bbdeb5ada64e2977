//! Number <-> string conversion with JavaScript formatting rules, backed by
//! lexical-core for the shortest round-trip digits and for parsing.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AtodError {
    #[error("invalid number syntax")]
    Syntax,
}

/// Shortest decimal digits of a finite positive number and the exponent
/// `n` such that the value is `0.d1d2... * 10^n`.
fn decimal_digits(d: f64) -> (Vec<u8>, i32) {
    let mut buf = [0u8; lexical_core::BUFFER_SIZE];
    let written = lexical_core::write(d, &mut buf);

    let mut digits = Vec::with_capacity(written.len());
    let mut int_digits: i32 = 0;
    let mut seen_dot = false;
    let mut exp: i32 = 0;
    let mut iter = written.iter().copied().peekable();
    while let Some(b) = iter.next() {
        match b {
            b'0'..=b'9' => {
                digits.push(b);
                if !seen_dot {
                    int_digits += 1;
                }
            }
            b'.' => seen_dot = true,
            b'e' | b'E' => {
                let mut neg = false;
                if let Some(&s) = iter.peek() {
                    if s == b'-' || s == b'+' {
                        neg = s == b'-';
                        iter.next();
                    }
                }
                for e in iter.by_ref() {
                    exp = exp * 10 + (e - b'0') as i32;
                }
                if neg {
                    exp = -exp;
                }
            }
            _ => {}
        }
    }
    let mut n = int_digits + exp;
    let leading = digits.iter().take_while(|&&b| b == b'0').count();
    digits.drain(..leading);
    n -= leading as i32;
    while digits.last() == Some(&b'0') {
        digits.pop();
    }
    if digits.is_empty() {
        digits.push(b'0');
        n = 1;
    }
    (digits, n)
}

/// `Number.prototype.toString()` with radix 10.
pub fn js_number_to_string(d: f64) -> String {
    if d.is_nan() {
        return "NaN".to_string();
    }
    if d == 0.0 {
        return "0".to_string();
    }
    if d.is_infinite() {
        return if d > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if d < 0.0 {
        return format!("-{}", js_number_to_string(-d));
    }
    if d.fract() == 0.0 && d < 1e21 && d <= i64::MAX as f64 {
        let mut buf = [0u8; lexical_core::BUFFER_SIZE];
        let written = lexical_core::write(d as i64, &mut buf);
        return String::from_utf8_lossy(written).into_owned();
    }

    let (digits, n) = decimal_digits(d);
    let k = digits.len() as i32;
    let digits = String::from_utf8_lossy(&digits).into_owned();
    if k <= n && n <= 21 {
        let mut out = digits;
        out.extend(core::iter::repeat('0').take((n - k) as usize));
        out
    } else if 0 < n && n <= 21 {
        format!("{}.{}", &digits[..n as usize], &digits[n as usize..])
    } else if -6 < n && n <= 0 {
        format!("0.{}{}", "0".repeat((-n) as usize), digits)
    } else {
        let e = n - 1;
        let sign = if e < 0 { '-' } else { '+' };
        if k == 1 {
            format!("{digits}e{sign}{}", e.abs())
        } else {
            format!("{}.{}e{sign}{}", &digits[..1], &digits[1..], e.abs())
        }
    }
}

pub fn js_int_to_string(v: i32) -> String {
    let mut buf = [0u8; lexical_core::BUFFER_SIZE];
    String::from_utf8_lossy(lexical_core::write(v, &mut buf)).into_owned()
}

fn is_js_space(c: char) -> bool {
    matches!(
        c,
        '\u{9}' | '\u{a}' | '\u{b}' | '\u{c}' | '\u{d}' | ' ' | '\u{a0}' | '\u{1680}'
            | '\u{2000}'..='\u{200a}'
            | '\u{2028}' | '\u{2029}' | '\u{202f}' | '\u{205f}' | '\u{3000}' | '\u{feff}'
    )
}

fn parse_radix_int(digits: &str, radix: u32) -> Result<f64, AtodError> {
    if digits.is_empty() {
        return Err(AtodError::Syntax);
    }
    let mut val = 0.0f64;
    for c in digits.chars() {
        let d = c.to_digit(radix).ok_or(AtodError::Syntax)?;
        val = val * radix as f64 + d as f64;
    }
    Ok(val)
}

/// Parses a decimal literal: digits, optional fraction, optional exponent.
/// The whole input must be consumed.
pub fn parse_decimal(s: &str) -> Result<f64, AtodError> {
    let bytes = s.as_bytes();
    let mut pos = 0;
    let int_start = pos;
    while pos < bytes.len() && bytes[pos].is_ascii_digit() {
        pos += 1;
    }
    let int_part = &s[int_start..pos];
    let mut frac_part = "";
    if pos < bytes.len() && bytes[pos] == b'.' {
        pos += 1;
        let frac_start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        frac_part = &s[frac_start..pos];
    }
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(AtodError::Syntax);
    }
    let mut exp_part = String::new();
    if pos < bytes.len() && (bytes[pos] == b'e' || bytes[pos] == b'E') {
        pos += 1;
        if pos < bytes.len() && (bytes[pos] == b'+' || bytes[pos] == b'-') {
            exp_part.push(bytes[pos] as char);
            pos += 1;
        }
        let exp_start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        if exp_start == pos {
            return Err(AtodError::Syntax);
        }
        exp_part.push_str(&s[exp_start..pos]);
    }
    if pos != bytes.len() {
        return Err(AtodError::Syntax);
    }
    let mut normalized = String::with_capacity(s.len() + 4);
    normalized.push_str(if int_part.is_empty() { "0" } else { int_part });
    normalized.push('.');
    normalized.push_str(if frac_part.is_empty() { "0" } else { frac_part });
    if !exp_part.is_empty() {
        normalized.push('e');
        normalized.push_str(&exp_part);
    }
    lexical_core::parse::<f64>(normalized.as_bytes()).map_err(|_| AtodError::Syntax)
}

/// Parses an integer literal with a `0x`/`0o`/`0b` prefix already removed.
pub fn parse_radix_literal(digits: &str, radix: u32) -> Result<f64, AtodError> {
    parse_radix_int(digits, radix)
}

/// `ToNumber` applied to a string: surrounding white space is ignored, the
/// empty string is 0, and anything that is not a complete numeric literal is
/// NaN.
pub fn js_string_to_number(s: &str) -> f64 {
    let s = s.trim_matches(is_js_space);
    if s.is_empty() {
        return 0.0;
    }
    let lower_prefix = s.get(..2).map(|p| p.to_ascii_lowercase());
    let radix = match lower_prefix.as_deref() {
        Some("0x") => Some(16),
        Some("0o") => Some(8),
        Some("0b") => Some(2),
        _ => None,
    };
    if let Some(radix) = radix {
        return parse_radix_int(&s[2..], radix).unwrap_or(f64::NAN);
    }
    let (neg, body) = match s.as_bytes()[0] {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };
    let val = if body == "Infinity" {
        f64::INFINITY
    } else {
        match parse_decimal(body) {
            Ok(v) => v,
            Err(_) => return f64::NAN,
        }
    };
    if neg {
        -val
    } else {
        val
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_like_javascript() {
        let cases: &[(f64, &str)] = &[
            (0.0, "0"),
            (-0.0, "0"),
            (1.0, "1"),
            (-42.0, "-42"),
            (1.5, "1.5"),
            (0.1, "0.1"),
            (123.456, "123.456"),
            (1e21, "1e+21"),
            (1.5e22, "1.5e+22"),
            (1e20, "100000000000000000000"),
            (0.000001, "0.000001"),
            (1e-7, "1e-7"),
            (2.5e-8, "2.5e-8"),
            (f64::NAN, "NaN"),
            (f64::NEG_INFINITY, "-Infinity"),
        ];
        for &(d, expected) in cases {
            assert_eq!(js_number_to_string(d), expected, "formatting {d:e}");
        }
    }

    #[test]
    fn parses_numeric_strings() {
        assert_eq!(js_string_to_number("  42 "), 42.0);
        assert_eq!(js_string_to_number(""), 0.0);
        assert_eq!(js_string_to_number("-1.5e3"), -1500.0);
        assert_eq!(js_string_to_number(".5"), 0.5);
        assert_eq!(js_string_to_number("5."), 5.0);
        assert_eq!(js_string_to_number("0x1F"), 31.0);
        assert_eq!(js_string_to_number("0b101"), 5.0);
        assert_eq!(js_string_to_number("-Infinity"), f64::NEG_INFINITY);
        assert!(js_string_to_number("12px").is_nan());
        assert!(js_string_to_number("-0x10").is_nan());
        assert!(js_string_to_number("1e").is_nan());
    }

    #[test]
    fn int_formatting() {
        assert_eq!(js_int_to_string(-123), "-123");
        assert_eq!(js_int_to_string(0), "0");
    }
}
