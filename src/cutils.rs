//! Byte-level helpers: little-endian field access and UTF-8 coding.
//!
//! Heap words and bytecode images are always little-endian, whatever the
//! host byte order.

use zerocopy::byteorder::little_endian;

pub const UTF8_CHAR_LEN_MAX: usize = 4;

pub fn get_u16(tab: &[u8]) -> u16 {
    debug_assert!(tab.len() >= 2);
    little_endian::U16::from_bytes([tab[0], tab[1]]).get()
}

pub fn put_u16(tab: &mut [u8], val: u16) {
    debug_assert!(tab.len() >= 2);
    tab[..2].copy_from_slice(&little_endian::U16::new(val).to_bytes());
}

pub fn get_u32(tab: &[u8]) -> u32 {
    debug_assert!(tab.len() >= 4);
    little_endian::U32::from_bytes([tab[0], tab[1], tab[2], tab[3]]).get()
}

pub fn get_i32(tab: &[u8]) -> i32 {
    debug_assert!(tab.len() >= 4);
    little_endian::I32::from_bytes([tab[0], tab[1], tab[2], tab[3]]).get()
}

pub fn put_u32(tab: &mut [u8], val: u32) {
    debug_assert!(tab.len() >= 4);
    tab[..4].copy_from_slice(&little_endian::U32::new(val).to_bytes());
}

pub fn put_i32(tab: &mut [u8], val: i32) {
    debug_assert!(tab.len() >= 4);
    tab[..4].copy_from_slice(&little_endian::I32::new(val).to_bytes());
}

pub fn get_f64(tab: &[u8]) -> f64 {
    debug_assert!(tab.len() >= 8);
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&tab[..8]);
    little_endian::F64::from_bytes(bytes).get()
}

pub fn put_f64(tab: &mut [u8], val: f64) {
    debug_assert!(tab.len() >= 8);
    tab[..8].copy_from_slice(&little_endian::F64::new(val).to_bytes());
}

/// Encodes `c` as UTF-8 (surrogates are encoded like any other code point).
/// Returns the number of bytes written, 0 if `c` is out of range.
pub fn unicode_to_utf8(buf: &mut [u8; UTF8_CHAR_LEN_MAX], c: u32) -> usize {
    if c < 0x80 {
        buf[0] = c as u8;
        1
    } else if c < 0x800 {
        buf[0] = ((c >> 6) | 0xc0) as u8;
        buf[1] = ((c & 0x3f) | 0x80) as u8;
        2
    } else if c < 0x10000 {
        buf[0] = ((c >> 12) | 0xe0) as u8;
        buf[1] = (((c >> 6) & 0x3f) | 0x80) as u8;
        buf[2] = ((c & 0x3f) | 0x80) as u8;
        3
    } else if c <= 0x10_ffff {
        buf[0] = ((c >> 18) | 0xf0) as u8;
        buf[1] = (((c >> 12) & 0x3f) | 0x80) as u8;
        buf[2] = (((c >> 6) & 0x3f) | 0x80) as u8;
        buf[3] = ((c & 0x3f) | 0x80) as u8;
        4
    } else {
        0
    }
}

pub fn push_utf8(out: &mut Vec<u8>, c: u32) {
    let mut buf = [0u8; UTF8_CHAR_LEN_MAX];
    let len = unicode_to_utf8(&mut buf, c);
    out.extend_from_slice(&buf[..len]);
}

/// Decodes one code point. Invalid sequences decode as a single byte with
/// value U+FFFD so callers always make progress.
pub fn utf8_decode(buf: &[u8]) -> (u32, usize) {
    let Some(&b0) = buf.first() else {
        return (0xfffd, 0);
    };
    if b0 < 0x80 {
        return (b0 as u32, 1);
    }
    let (len, init) = match b0 {
        0xc0..=0xdf => (2, (b0 & 0x1f) as u32),
        0xe0..=0xef => (3, (b0 & 0x0f) as u32),
        0xf0..=0xf7 => (4, (b0 & 0x07) as u32),
        _ => return (0xfffd, 1),
    };
    if buf.len() < len {
        return (0xfffd, 1);
    }
    let mut c = init;
    for &b in &buf[1..len] {
        if b & 0xc0 != 0x80 {
            return (0xfffd, 1);
        }
        c = (c << 6) | (b & 0x3f) as u32;
    }
    let min = [0, 0, 0x80, 0x800, 0x10000][len];
    if c < min || c > 0x10_ffff {
        return (0xfffd, 1);
    }
    (c, len)
}

/// Iterates over the code points of a UTF-8 byte slice.
pub fn utf8_chars(buf: &[u8]) -> impl Iterator<Item = u32> + '_ {
    let mut pos = 0;
    core::iter::from_fn(move || {
        if pos >= buf.len() {
            return None;
        }
        let (c, len) = utf8_decode(&buf[pos..]);
        pos += len.max(1);
        Some(c)
    })
}

/// Length in UTF-16 code units.
pub fn utf16_len(buf: &[u8]) -> usize {
    utf8_chars(buf).map(|c| if c >= 0x10000 { 2 } else { 1 }).sum()
}

#[cfg(all(test, not(miri)))]
mod tests {
    use super::*;

    #[test]
    fn le_accessors() {
        let mut buf = [0u8; 8];
        put_u32(&mut buf, 0xdead_beef);
        assert_eq!(buf[..4], [0xef, 0xbe, 0xad, 0xde]);
        assert_eq!(get_u32(&buf), 0xdead_beef);
        put_u16(&mut buf, 0xacfb);
        assert_eq!(buf[..2], [0xfb, 0xac]);
        assert_eq!(get_u16(&buf), 0xacfb);
        put_i32(&mut buf, -5);
        assert_eq!(get_i32(&buf), -5);
        put_f64(&mut buf, 1.25);
        assert_eq!(get_f64(&buf), 1.25);
    }

    #[test]
    fn utf8_encode_decode() {
        for c in [0x41u32, 0xe9, 0x20ac, 0x1f642, 0xd800] {
            let mut buf = [0u8; UTF8_CHAR_LEN_MAX];
            let len = unicode_to_utf8(&mut buf, c);
            assert_eq!(utf8_decode(&buf[..len]), (c, len));
        }
        assert_eq!(utf8_decode(&[0xff]), (0xfffd, 1));
        assert_eq!(utf8_decode(&[0xe2, 0x82]), (0xfffd, 1));
    }

    #[test]
    fn utf16_length_counts_pairs() {
        assert_eq!(utf16_len(b"abc"), 3);
        assert_eq!(utf16_len("h\u{e9}".as_bytes()), 2);
        assert_eq!(utf16_len("\u{1f642}".as_bytes()), 2);
    }
}
