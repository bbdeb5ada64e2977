//! JSON text to value tree, for `JS_EVAL_JSON`.
//!
//! The tree is turned into heap values by the caller. Strings are kept as
//! WTF-8 so lone surrogates from `\u` escapes survive.

use super::error::{ParseError, ParseResult};
use crate::cutils::{push_utf8, utf8_decode};
use crate::dtoa::parse_decimal;

const JSON_DEPTH_MAX: u32 = 1000;

#[derive(Clone, Debug, PartialEq)]
pub enum JsonValue {
    Null,
    Bool(bool),
    Number(f64),
    String(Vec<u8>),
    Array(Vec<JsonValue>),
    Object(Vec<(Vec<u8>, JsonValue)>),
}

pub fn parse_json(source: &[u8]) -> ParseResult<JsonValue> {
    let mut parser = JsonParser { src: source, pos: 0 };
    let value = parser.value(0)?;
    parser.skip_space();
    if parser.pos != source.len() {
        return Err(parser.error("unexpected data at the end"));
    }
    Ok(value)
}

struct JsonParser<'s> {
    src: &'s [u8],
    pos: usize,
}

impl<'s> JsonParser<'s> {
    fn error(&self, msg: &str) -> ParseError {
        ParseError::new(msg, self.pos)
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn skip_space(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, c: u8, msg: &str) -> ParseResult<()> {
        self.skip_space();
        if self.peek() != Some(c) {
            return Err(self.error(msg));
        }
        self.pos += 1;
        Ok(())
    }

    fn literal(&mut self, word: &[u8], value: JsonValue) -> ParseResult<JsonValue> {
        if self.src[self.pos..].starts_with(word) {
            self.pos += word.len();
            Ok(value)
        } else {
            Err(self.error("unexpected character"))
        }
    }

    fn value(&mut self, depth: u32) -> ParseResult<JsonValue> {
        if depth > JSON_DEPTH_MAX {
            return Err(self.error("too many nested arrays or objects"));
        }
        self.skip_space();
        match self.peek() {
            Some(b'n') => self.literal(b"null", JsonValue::Null),
            Some(b't') => self.literal(b"true", JsonValue::Bool(true)),
            Some(b'f') => self.literal(b"false", JsonValue::Bool(false)),
            Some(b'"') => {
                self.pos += 1;
                self.string().map(JsonValue::String)
            }
            Some(b'-' | b'0'..=b'9') => self.number().map(JsonValue::Number),
            Some(b'[') => {
                self.pos += 1;
                let mut elems = Vec::new();
                self.skip_space();
                if self.peek() == Some(b']') {
                    self.pos += 1;
                    return Ok(JsonValue::Array(elems));
                }
                loop {
                    elems.push(self.value(depth + 1)?);
                    self.skip_space();
                    match self.peek() {
                        Some(b',') => self.pos += 1,
                        Some(b']') => {
                            self.pos += 1;
                            return Ok(JsonValue::Array(elems));
                        }
                        _ => return Err(self.error("expecting ']'")),
                    }
                }
            }
            Some(b'{') => {
                self.pos += 1;
                let mut props = Vec::new();
                self.skip_space();
                if self.peek() == Some(b'}') {
                    self.pos += 1;
                    return Ok(JsonValue::Object(props));
                }
                loop {
                    self.expect(b'"', "expecting '\"'")?;
                    let key = self.string()?;
                    self.expect(b':', "expecting ':'")?;
                    let value = self.value(depth + 1)?;
                    props.push((key, value));
                    self.skip_space();
                    match self.peek() {
                        Some(b',') => self.pos += 1,
                        Some(b'}') => {
                            self.pos += 1;
                            return Ok(JsonValue::Object(props));
                        }
                        _ => return Err(self.error("expecting '}'")),
                    }
                }
            }
            None => Err(self.error("unexpected end of input")),
            Some(_) => Err(self.error("unexpected character")),
        }
    }

    /// String body after the opening quote.
    fn string(&mut self) -> ParseResult<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(self.error("unexpected end of string"));
            };
            match c {
                b'"' => {
                    self.pos += 1;
                    return Ok(out);
                }
                0..=0x1f => return Err(self.error("unexpected character in string")),
                b'\\' => {
                    self.pos += 1;
                    let esc = self.peek().ok_or_else(|| self.error("unexpected end of string"))?;
                    self.pos += 1;
                    let cp = match esc {
                        b'"' => b'"' as u32,
                        b'\\' => b'\\' as u32,
                        b'/' => b'/' as u32,
                        b'b' => 8,
                        b'f' => 12,
                        b'n' => b'\n' as u32,
                        b'r' => b'\r' as u32,
                        b't' => b'\t' as u32,
                        b'u' => self.hex4()?,
                        _ => return Err(self.error("invalid escape sequence")),
                    };
                    push_utf8(&mut out, self.merge_surrogate(cp)?);
                }
                _ if c < 0x80 => {
                    out.push(c);
                    self.pos += 1;
                }
                _ => {
                    let (cp, len) = utf8_decode(&self.src[self.pos..]);
                    push_utf8(&mut out, cp);
                    self.pos += len.max(1);
                }
            }
        }
    }

    fn hex4(&mut self) -> ParseResult<u32> {
        let digits = self
            .src
            .get(self.pos..self.pos + 4)
            .ok_or_else(|| self.error("invalid escape sequence"))?;
        let mut cp = 0u32;
        for &d in digits {
            let v = (d as char).to_digit(16).ok_or_else(|| self.error("invalid escape sequence"))?;
            cp = cp * 16 + v;
        }
        self.pos += 4;
        Ok(cp)
    }

    /// Combines a high surrogate with a following `\uDC00`-`\uDFFF` escape.
    fn merge_surrogate(&mut self, hi: u32) -> ParseResult<u32> {
        if !(0xd800..0xdc00).contains(&hi) || !self.src[self.pos..].starts_with(b"\\u") {
            return Ok(hi);
        }
        let save = self.pos;
        self.pos += 2;
        let lo = self.hex4()?;
        if (0xdc00..0xe000).contains(&lo) {
            Ok(0x10000 + ((hi - 0xd800) << 10) + (lo - 0xdc00))
        } else {
            self.pos = save;
            Ok(hi)
        }
    }

    fn number(&mut self) -> ParseResult<f64> {
        let start = self.pos;
        let negative = self.peek() == Some(b'-');
        if negative {
            self.pos += 1;
        }
        let digits_start = self.pos;
        match self.peek() {
            Some(b'0') => self.pos += 1,
            Some(b'1'..=b'9') => self.digits(),
            _ => return Err(self.error("invalid number literal")),
        }
        if self.peek() == Some(b'.') {
            self.pos += 1;
            if !matches!(self.peek(), Some(b'0'..=b'9')) {
                return Err(self.error("invalid number literal"));
            }
            self.digits();
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            self.pos += 1;
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            if !matches!(self.peek(), Some(b'0'..=b'9')) {
                return Err(self.error("invalid number literal"));
            }
            self.digits();
        }
        let text = core::str::from_utf8(&self.src[digits_start..self.pos])
            .map_err(|_| ParseError::new("invalid number literal", start))?;
        let d = parse_decimal(text).map_err(|_| ParseError::new("invalid number literal", start))?;
        Ok(if negative { -d } else { d })
    }

    fn digits(&mut self) {
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
    }
}

#[cfg(all(test, not(miri)))]
mod tests {
    use super::*;

    #[test]
    fn nested_values() {
        let v = parse_json(br#" {"a": [1, -2.5e1, true, null], "b": {"c": "d"}} "#).unwrap();
        let JsonValue::Object(props) = v else {
            panic!("expected object");
        };
        assert_eq!(props[0].0, b"a");
        assert_eq!(
            props[0].1,
            JsonValue::Array(vec![
                JsonValue::Number(1.0),
                JsonValue::Number(-25.0),
                JsonValue::Bool(true),
                JsonValue::Null
            ])
        );
        assert_eq!(
            props[1].1,
            JsonValue::Object(vec![(b"c".to_vec(), JsonValue::String(b"d".to_vec()))])
        );
    }

    #[test]
    fn string_escapes() {
        let v = parse_json(r#""a\né😀\/""#.as_bytes()).unwrap();
        assert_eq!(v, JsonValue::String("a\n\u{e9}\u{1f600}/".as_bytes().to_vec()));
        let v = parse_json(br#""\ud83d\ude00\u0041""#).unwrap();
        assert_eq!(v, JsonValue::String("\u{1f600}A".as_bytes().to_vec()));
    }

    #[test]
    fn rejects_invalid_text() {
        for bad in [&b"[1,]"[..], b"{a:1}", b"01", b"'x'", b"[1", b"1 2", b"\"\x01\"", b"-"] {
            assert!(parse_json(bad).is_err(), "{:?}", String::from_utf8_lossy(bad));
        }
        let err = parse_json(b"[1, 2 x").unwrap_err();
        assert_eq!(err.message(), "expecting ']'");
        assert_eq!(err.position(), 6);
    }
}
