use crate::cutils::{push_utf8, utf8_decode};
use crate::dtoa::{parse_decimal, parse_radix_literal};

use super::error::{
    ParseError, ParseResult, ERR_INVALID_ESCAPE, ERR_INVALID_NUMBER, ERR_UNEXPECTED_CHARACTER,
    ERR_UNEXPECTED_END_OF_COMMENT, ERR_UNEXPECTED_END_OF_STRING,
};
use super::tokens::{Keyword, Token, PUNCTUATORS};

pub fn is_ident_first(c: u32) -> bool {
    match char::from_u32(c) {
        Some(ch) if ch.is_ascii() => ch.is_ascii_alphabetic() || ch == '_' || ch == '$',
        Some(ch) => ch.is_alphabetic(),
        None => false,
    }
}

pub fn is_ident_next(c: u32) -> bool {
    match char::from_u32(c) {
        Some(ch) if ch.is_ascii() => ch.is_ascii_alphanumeric() || ch == '_' || ch == '$',
        Some(ch) => ch.is_alphanumeric() || ch == '\u{200c}' || ch == '\u{200d}',
        None => false,
    }
}

fn from_hex(c: u8) -> Option<u32> {
    (c as char).to_digit(16)
}

/// Decodes the escape sequence following a backslash. Returns the code
/// point and the number of bytes consumed.
pub fn js_parse_escape(buf: &[u8]) -> Option<(u32, usize)> {
    let c = *buf.first()?;
    let hex = |from: usize, count: usize| -> Option<u32> {
        let digits = buf.get(from..from + count)?;
        digits.iter().try_fold(0u32, |acc, &d| Some((acc << 4) | from_hex(d)?))
    };
    let out = match c {
        b'b' => (0x08, 1),
        b'f' => (0x0c, 1),
        b'n' => (b'\n' as u32, 1),
        b'r' => (b'\r' as u32, 1),
        b't' => (b'\t' as u32, 1),
        b'v' => (0x0b, 1),
        b'x' => (hex(1, 2)?, 3),
        b'u' if buf.get(1) == Some(&b'{') => {
            let end = buf[2..].iter().position(|&b| b == b'}')? + 2;
            if end == 2 || end - 2 > 6 {
                return None;
            }
            let val = hex(2, end - 2)?;
            if val > 0x10_ffff {
                return None;
            }
            (val, end + 1)
        }
        b'u' => (hex(1, 4)?, 5),
        b'0' if !buf.get(1).is_some_and(u8::is_ascii_digit) => (0, 1),
        b'0'..=b'9' => return None,
        _ => {
            let (c, len) = utf8_decode(buf);
            (c, len)
        }
    };
    Some(out)
}

/// A token and where it starts.
#[derive(Clone, Debug, PartialEq)]
pub struct TokenInfo {
    pub token: Token,
    pub pos: usize,
    /// A line terminator precedes the token.
    pub got_lf: bool,
}

#[derive(Clone)]
pub struct Lexer<'s> {
    src: &'s [u8],
    pos: usize,
}

impl<'s> Lexer<'s> {
    pub fn new(src: &'s [u8]) -> Self {
        Self { src, pos: 0 }
    }

    pub fn source(&self) -> &'s [u8] {
        self.src
    }

    fn byte_at(&self, pos: usize) -> u8 {
        self.src.get(pos).copied().unwrap_or(0)
    }

    /// Skips white space and comments. Returns true if a line terminator
    /// was crossed.
    fn skip_space(&mut self) -> ParseResult<bool> {
        let mut got_lf = false;
        loop {
            let c = self.byte_at(self.pos);
            match c {
                b'\n' => {
                    got_lf = true;
                    self.pos += 1;
                }
                b' ' | b'\t' | b'\r' | 0x0b | 0x0c => self.pos += 1,
                b'/' if self.byte_at(self.pos + 1) == b'/' => {
                    while self.pos < self.src.len() && self.src[self.pos] != b'\n' {
                        self.pos += 1;
                    }
                }
                b'/' if self.byte_at(self.pos + 1) == b'*' => {
                    let start = self.pos;
                    self.pos += 2;
                    loop {
                        if self.pos + 1 >= self.src.len() {
                            return Err(ParseError::new(ERR_UNEXPECTED_END_OF_COMMENT, start));
                        }
                        if self.src[self.pos] == b'*' && self.src[self.pos + 1] == b'/' {
                            self.pos += 2;
                            break;
                        }
                        if self.src[self.pos] == b'\n' {
                            got_lf = true;
                        }
                        self.pos += 1;
                    }
                }
                0x80.. => {
                    let (cp, len) = utf8_decode(&self.src[self.pos..]);
                    match cp {
                        0x2028 | 0x2029 => got_lf = true,
                        0xa0 | 0xfeff | 0x1680 | 0x2000..=0x200a | 0x202f | 0x205f | 0x3000 => {}
                        _ => return Ok(got_lf),
                    }
                    self.pos += len;
                }
                _ => return Ok(got_lf),
            }
        }
    }

    pub fn next_token(&mut self) -> ParseResult<TokenInfo> {
        let got_lf = self.skip_space()?;
        let pos = self.pos;
        let c = self.byte_at(pos);
        let token = if pos >= self.src.len() {
            Token::Eof
        } else if c == b'"' || c == b'\'' {
            Token::Str(self.parse_string(c)?)
        } else if c.is_ascii_digit() || (c == b'.' && self.byte_at(pos + 1).is_ascii_digit()) {
            Token::Number(self.parse_number()?)
        } else {
            let (cp, len) = utf8_decode(&self.src[pos..]);
            if is_ident_first(cp) {
                self.parse_ident(len)
            } else {
                self.parse_punct()?
            }
        };
        Ok(TokenInfo { token, pos, got_lf })
    }

    fn parse_ident(&mut self, first_len: usize) -> Token {
        let start = self.pos;
        self.pos += first_len;
        while self.pos < self.src.len() {
            let (cp, len) = utf8_decode(&self.src[self.pos..]);
            if !is_ident_next(cp) {
                break;
            }
            self.pos += len;
        }
        let ident = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        match Keyword::from_ident(&ident) {
            Some(kw) => Token::Keyword(kw),
            None => Token::Ident(ident),
        }
    }

    fn parse_punct(&mut self) -> ParseResult<Token> {
        let rest = &self.src[self.pos..];
        for p in PUNCTUATORS {
            if rest.starts_with(p.as_str().as_bytes()) {
                self.pos += p.as_str().len();
                return Ok(Token::Punct(*p));
            }
        }
        Err(ParseError::new(ERR_UNEXPECTED_CHARACTER, self.pos))
    }

    fn parse_string(&mut self, sep: u8) -> ParseResult<Vec<u8>> {
        let start = self.pos;
        self.pos += 1;
        let mut out = Vec::new();
        let mut pending_high: Option<u32> = None;
        loop {
            let Some(&c) = self.src.get(self.pos) else {
                return Err(ParseError::new(ERR_UNEXPECTED_END_OF_STRING, start));
            };
            if c == sep {
                self.pos += 1;
                break;
            }
            let cp = match c {
                b'\n' | b'\r' => return Err(ParseError::new(ERR_UNEXPECTED_END_OF_STRING, start)),
                b'\\' => {
                    let esc_pos = self.pos;
                    self.pos += 1;
                    match self.byte_at(self.pos) {
                        b'\n' => {
                            self.pos += 1;
                            continue;
                        }
                        b'\r' => {
                            self.pos += 1;
                            if self.byte_at(self.pos) == b'\n' {
                                self.pos += 1;
                            }
                            continue;
                        }
                        _ => {}
                    }
                    let (cp, len) = js_parse_escape(&self.src[self.pos..])
                        .ok_or_else(|| ParseError::new(ERR_INVALID_ESCAPE, esc_pos))?;
                    self.pos += len;
                    cp
                }
                _ => {
                    let (cp, len) = utf8_decode(&self.src[self.pos..]);
                    self.pos += len;
                    cp
                }
            };
            // Escaped surrogate pairs become one code point.
            match (pending_high.take(), cp) {
                (Some(hi), 0xdc00..=0xdfff) => {
                    push_utf8(&mut out, 0x10000 + ((hi - 0xd800) << 10) + (cp - 0xdc00));
                }
                (prev, _) => {
                    if let Some(hi) = prev {
                        push_utf8(&mut out, hi);
                    }
                    if (0xd800..=0xdbff).contains(&cp) {
                        pending_high = Some(cp);
                    } else {
                        push_utf8(&mut out, cp);
                    }
                }
            }
        }
        if let Some(hi) = pending_high {
            push_utf8(&mut out, hi);
        }
        Ok(out)
    }

    fn parse_number(&mut self) -> ParseResult<f64> {
        let start = self.pos;
        let c1 = self.byte_at(start + 1).to_ascii_lowercase();
        let radix = match (self.byte_at(start), c1) {
            (b'0', b'x') => Some(16),
            (b'0', b'o') => Some(8),
            (b'0', b'b') => Some(2),
            _ => None,
        };
        let val = if let Some(radix) = radix {
            self.pos += 2;
            let digits_start = self.pos;
            while self.byte_at(self.pos).is_ascii_alphanumeric() {
                self.pos += 1;
            }
            let digits = String::from_utf8_lossy(&self.src[digits_start..self.pos]);
            parse_radix_literal(&digits, radix).map_err(|_| ParseError::new(ERR_INVALID_NUMBER, start))?
        } else {
            if self.byte_at(start) == b'0' && self.byte_at(start + 1).is_ascii_digit() {
                return Err(ParseError::new(ERR_INVALID_NUMBER, start));
            }
            while self.byte_at(self.pos).is_ascii_digit() {
                self.pos += 1;
            }
            if self.byte_at(self.pos) == b'.' {
                self.pos += 1;
                while self.byte_at(self.pos).is_ascii_digit() {
                    self.pos += 1;
                }
            }
            if matches!(self.byte_at(self.pos), b'e' | b'E') {
                self.pos += 1;
                if matches!(self.byte_at(self.pos), b'+' | b'-') {
                    self.pos += 1;
                }
                while self.byte_at(self.pos).is_ascii_digit() {
                    self.pos += 1;
                }
            }
            let text = String::from_utf8_lossy(&self.src[start..self.pos]);
            parse_decimal(&text).map_err(|_| ParseError::new(ERR_INVALID_NUMBER, start))?
        };
        let (next, _) = utf8_decode(&self.src[self.pos.min(self.src.len())..]);
        if self.pos < self.src.len() && is_ident_next(next) {
            return Err(ParseError::new(ERR_INVALID_NUMBER, start));
        }
        Ok(val)
    }
}

#[cfg(all(test, not(miri)))]
mod tests {
    use super::*;
    use crate::parser::tokens::Punct;

    fn tokens(src: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(src.as_bytes());
        let mut out = Vec::new();
        loop {
            let info = lexer.next_token().unwrap();
            if info.token == Token::Eof {
                return out;
            }
            out.push(info.token);
        }
    }

    #[test]
    fn parse_escape_simple_codes() {
        assert_eq!(js_parse_escape(b"n"), Some((b'\n' as u32, 1)));
        assert_eq!(js_parse_escape(b"x41"), Some((0x41, 3)));
        assert_eq!(js_parse_escape(b"u00e9"), Some((0xe9, 5)));
        assert_eq!(js_parse_escape(b"u{1F600}"), Some((0x1f600, 8)));
        assert_eq!(js_parse_escape(b"0"), Some((0, 1)));
        assert_eq!(js_parse_escape(b"01"), None);
        assert_eq!(js_parse_escape(b"xZ1"), None);
    }

    #[test]
    fn identifiers_keywords_and_punctuators() {
        assert_eq!(
            tokens("let x >>>= y;"),
            vec![
                Token::Keyword(Keyword::Let),
                Token::Ident("x".into()),
                Token::Punct(Punct::ShrAssign),
                Token::Ident("y".into()),
                Token::Punct(Punct::Semi),
            ]
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(tokens("0x1f 0b101 1.5e3 .5"), vec![
            Token::Number(31.0),
            Token::Number(5.0),
            Token::Number(1500.0),
            Token::Number(0.5),
        ]);
        assert!(Lexer::new(b"017").next_token().is_err());
        assert!(Lexer::new(b"3in").next_token().is_err());
    }

    #[test]
    fn strings_merge_surrogate_pairs() {
        assert_eq!(
            tokens(r#"'😀' "a\tb""#),
            vec![
                Token::Str("\u{1F600}".as_bytes().to_vec()),
                Token::Str(b"a\tb".to_vec())
            ]
        );
        assert!(Lexer::new(b"'abc").next_token().is_err());
    }

    #[test]
    fn comments_set_got_lf() {
        let mut lexer = Lexer::new(b"a // c\n/* x\n */ b /* */ c");
        assert!(!lexer.next_token().unwrap().got_lf);
        let b = lexer.next_token().unwrap();
        assert_eq!(b.token, Token::Ident("b".into()));
        assert!(b.got_lf);
        assert!(!lexer.next_token().unwrap().got_lf);
        assert!(Lexer::new(b"/* open").next_token().is_err());
    }
}
