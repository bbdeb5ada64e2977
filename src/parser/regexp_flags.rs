//! RegExp flag bits and their textual form.

pub const LRE_FLAG_GLOBAL: u32 = 1 << 0;
pub const LRE_FLAG_IGNORECASE: u32 = 1 << 1;
pub const LRE_FLAG_MULTILINE: u32 = 1 << 2;
pub const LRE_FLAG_DOTALL: u32 = 1 << 3;
pub const LRE_FLAG_UNICODE: u32 = 1 << 4;
pub const LRE_FLAG_STICKY: u32 = 1 << 5;

const FLAG_CHARS: [(u8, u32); 6] = [
    (b'g', LRE_FLAG_GLOBAL),
    (b'i', LRE_FLAG_IGNORECASE),
    (b'm', LRE_FLAG_MULTILINE),
    (b's', LRE_FLAG_DOTALL),
    (b'u', LRE_FLAG_UNICODE),
    (b'y', LRE_FLAG_STICKY),
];

/// Parses flag letters. Stops at the first unknown or repeated letter and
/// returns the flags with the number of bytes consumed.
pub fn parse_regexp_flags(buf: &[u8]) -> (u32, usize) {
    let mut flags = 0u32;
    for (idx, c) in buf.iter().enumerate() {
        let Some(&(_, mask)) = FLAG_CHARS.iter().find(|(ch, _)| ch == c) else {
            return (flags, idx);
        };
        if flags & mask != 0 {
            return (flags, idx);
        }
        flags |= mask;
    }
    (flags, buf.len())
}

/// Flag letters in canonical order.
pub fn regexp_flags_to_string(flags: u32) -> String {
    FLAG_CHARS
        .iter()
        .filter(|(_, mask)| flags & mask != 0)
        .map(|(c, _)| *c as char)
        .collect()
}

/// Cheap structural check of a pattern: balanced groups and classes, no
/// dangling escape. Returns the message of the first problem found.
pub fn check_regexp_pattern(pattern: &[u8]) -> Result<(), &'static str> {
    let mut depth = 0u32;
    let mut in_class = false;
    let mut i = 0;
    while i < pattern.len() {
        match pattern[i] {
            b'\\' => {
                if i + 1 >= pattern.len() {
                    return Err("\\ at end of pattern");
                }
                i += 1;
            }
            b'[' if !in_class => in_class = true,
            b']' if in_class => in_class = false,
            b'(' if !in_class => depth += 1,
            b')' if !in_class => {
                if depth == 0 {
                    return Err("unmatched ')'");
                }
                depth -= 1;
            }
            _ => {}
        }
        i += 1;
    }
    if in_class {
        return Err("unterminated character class");
    }
    if depth != 0 {
        return Err("expecting ')'");
    }
    Ok(())
}

#[cfg(all(test, not(miri)))]
mod tests {
    use super::*;

    #[test]
    fn parse_regexp_flags_basic() {
        assert_eq!(
            parse_regexp_flags(b"gim"),
            (LRE_FLAG_GLOBAL | LRE_FLAG_IGNORECASE | LRE_FLAG_MULTILINE, 3)
        );
        assert_eq!(parse_regexp_flags(b""), (0, 0));
    }

    #[test]
    fn parse_regexp_flags_stops_early() {
        assert_eq!(parse_regexp_flags(b"gg"), (LRE_FLAG_GLOBAL, 1));
        assert_eq!(parse_regexp_flags(b"ga"), (LRE_FLAG_GLOBAL, 1));
    }

    #[test]
    fn canonical_flag_order() {
        let (flags, _) = parse_regexp_flags(b"yusmig");
        assert_eq!(regexp_flags_to_string(flags), "gimsuy");
        assert_eq!(regexp_flags_to_string(LRE_FLAG_STICKY | LRE_FLAG_GLOBAL), "gy");
    }

    #[test]
    fn pattern_checks() {
        assert!(check_regexp_pattern(b"a(b|c)*[)(]").is_ok());
        assert!(check_regexp_pattern(b"(a").is_err());
        assert!(check_regexp_pattern(b"a)").is_err());
        assert!(check_regexp_pattern(b"[a").is_err());
        assert!(check_regexp_pattern(b"a\\").is_err());
    }
}
