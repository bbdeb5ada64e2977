//! Token kinds.

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Keyword {
    Null,
    False,
    True,
    If,
    Else,
    Return,
    Var,
    This,
    Delete,
    Void,
    Typeof,
    New,
    In,
    Instanceof,
    Do,
    While,
    For,
    Break,
    Continue,
    Switch,
    Case,
    Default,
    Throw,
    Try,
    Catch,
    Finally,
    Function,
    Debugger,
    With,
    Class,
    Const,
    Enum,
    Export,
    Extends,
    Import,
    Super,
    Let,
    Yield,
}

const KEYWORDS: &[(&str, Keyword)] = &[
    ("null", Keyword::Null),
    ("false", Keyword::False),
    ("true", Keyword::True),
    ("if", Keyword::If),
    ("else", Keyword::Else),
    ("return", Keyword::Return),
    ("var", Keyword::Var),
    ("this", Keyword::This),
    ("delete", Keyword::Delete),
    ("void", Keyword::Void),
    ("typeof", Keyword::Typeof),
    ("new", Keyword::New),
    ("in", Keyword::In),
    ("instanceof", Keyword::Instanceof),
    ("do", Keyword::Do),
    ("while", Keyword::While),
    ("for", Keyword::For),
    ("break", Keyword::Break),
    ("continue", Keyword::Continue),
    ("switch", Keyword::Switch),
    ("case", Keyword::Case),
    ("default", Keyword::Default),
    ("throw", Keyword::Throw),
    ("try", Keyword::Try),
    ("catch", Keyword::Catch),
    ("finally", Keyword::Finally),
    ("function", Keyword::Function),
    ("debugger", Keyword::Debugger),
    ("with", Keyword::With),
    ("class", Keyword::Class),
    ("const", Keyword::Const),
    ("enum", Keyword::Enum),
    ("export", Keyword::Export),
    ("extends", Keyword::Extends),
    ("import", Keyword::Import),
    ("super", Keyword::Super),
    ("let", Keyword::Let),
    ("yield", Keyword::Yield),
];

impl Keyword {
    pub fn from_ident(ident: &str) -> Option<Self> {
        KEYWORDS.iter().find(|(name, _)| *name == ident).map(|(_, kw)| *kw)
    }

    pub fn as_str(self) -> &'static str {
        KEYWORDS
            .iter()
            .find(|(_, kw)| *kw == self)
            .map(|(name, _)| *name)
            .unwrap_or("?")
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Punct {
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Semi,
    Comma,
    Dot,
    Question,
    Colon,
    Arrow,
    Assign,
    MulAssign,
    DivAssign,
    ModAssign,
    PlusAssign,
    MinusAssign,
    ShlAssign,
    SarAssign,
    ShrAssign,
    AndAssign,
    XorAssign,
    OrAssign,
    PowAssign,
    LAndAssign,
    LOrAssign,
    NullishAssign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Pow,
    Inc,
    Dec,
    Shl,
    Sar,
    Shr,
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    Neq,
    StrictEq,
    StrictNeq,
    Amp,
    Pipe,
    Caret,
    Bang,
    Tilde,
    LAnd,
    LOr,
    Nullish,
}

impl Punct {
    pub fn as_str(self) -> &'static str {
        match self {
            Punct::LParen => "(",
            Punct::RParen => ")",
            Punct::LBracket => "[",
            Punct::RBracket => "]",
            Punct::LBrace => "{",
            Punct::RBrace => "}",
            Punct::Semi => ";",
            Punct::Comma => ",",
            Punct::Dot => ".",
            Punct::Question => "?",
            Punct::Colon => ":",
            Punct::Arrow => "=>",
            Punct::Assign => "=",
            Punct::MulAssign => "*=",
            Punct::DivAssign => "/=",
            Punct::ModAssign => "%=",
            Punct::PlusAssign => "+=",
            Punct::MinusAssign => "-=",
            Punct::ShlAssign => "<<=",
            Punct::SarAssign => ">>=",
            Punct::ShrAssign => ">>>=",
            Punct::AndAssign => "&=",
            Punct::XorAssign => "^=",
            Punct::OrAssign => "|=",
            Punct::PowAssign => "**=",
            Punct::LAndAssign => "&&=",
            Punct::LOrAssign => "||=",
            Punct::NullishAssign => "??=",
            Punct::Plus => "+",
            Punct::Minus => "-",
            Punct::Star => "*",
            Punct::Slash => "/",
            Punct::Percent => "%",
            Punct::Pow => "**",
            Punct::Inc => "++",
            Punct::Dec => "--",
            Punct::Shl => "<<",
            Punct::Sar => ">>",
            Punct::Shr => ">>>",
            Punct::Lt => "<",
            Punct::Lte => "<=",
            Punct::Gt => ">",
            Punct::Gte => ">=",
            Punct::Eq => "==",
            Punct::Neq => "!=",
            Punct::StrictEq => "===",
            Punct::StrictNeq => "!==",
            Punct::Amp => "&",
            Punct::Pipe => "|",
            Punct::Caret => "^",
            Punct::Bang => "!",
            Punct::Tilde => "~",
            Punct::LAnd => "&&",
            Punct::LOr => "||",
            Punct::Nullish => "??",
        }
    }
}

/// Punctuators ordered so that longer spellings are tried first.
pub(crate) const PUNCTUATORS: &[Punct] = &[
    Punct::ShrAssign,
    Punct::StrictEq,
    Punct::StrictNeq,
    Punct::Shr,
    Punct::ShlAssign,
    Punct::SarAssign,
    Punct::PowAssign,
    Punct::LAndAssign,
    Punct::LOrAssign,
    Punct::NullishAssign,
    Punct::Arrow,
    Punct::MulAssign,
    Punct::DivAssign,
    Punct::ModAssign,
    Punct::PlusAssign,
    Punct::MinusAssign,
    Punct::AndAssign,
    Punct::XorAssign,
    Punct::OrAssign,
    Punct::Pow,
    Punct::Inc,
    Punct::Dec,
    Punct::Shl,
    Punct::Sar,
    Punct::Lte,
    Punct::Gte,
    Punct::Eq,
    Punct::Neq,
    Punct::LAnd,
    Punct::LOr,
    Punct::Nullish,
    Punct::LParen,
    Punct::RParen,
    Punct::LBracket,
    Punct::RBracket,
    Punct::LBrace,
    Punct::RBrace,
    Punct::Semi,
    Punct::Comma,
    Punct::Dot,
    Punct::Question,
    Punct::Colon,
    Punct::Assign,
    Punct::Plus,
    Punct::Minus,
    Punct::Star,
    Punct::Slash,
    Punct::Percent,
    Punct::Lt,
    Punct::Gt,
    Punct::Amp,
    Punct::Pipe,
    Punct::Caret,
    Punct::Bang,
    Punct::Tilde,
];

#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    Number(f64),
    /// String literal content, UTF-8 (lone surrogates kept as 3-byte
    /// sequences).
    Str(Vec<u8>),
    Ident(String),
    Keyword(Keyword),
    Punct(Punct),
    Eof,
}

impl Token {
    pub fn describe(&self) -> String {
        match self {
            Token::Number(_) => "number".into(),
            Token::Str(_) => "string".into(),
            Token::Ident(name) => format!("'{name}'"),
            Token::Keyword(kw) => format!("'{}'", kw.as_str()),
            Token::Punct(p) => format!("'{}'", p.as_str()),
            Token::Eof => "end of input".into(),
        }
    }

    pub fn is_punct(&self, p: Punct) -> bool {
        matches!(self, Token::Punct(q) if *q == p)
    }

    pub fn is_keyword(&self, kw: Keyword) -> bool {
        matches!(self, Token::Keyword(k) if *k == kw)
    }

    /// Identifier, or a keyword usable as a property name.
    pub fn property_name(&self) -> Option<String> {
        match self {
            Token::Ident(name) => Some(name.clone()),
            Token::Keyword(kw) => Some(kw.as_str().to_string()),
            _ => None,
        }
    }
}

#[cfg(all(test, not(miri)))]
mod tests {
    use super::*;

    #[test]
    fn keywords_roundtrip() {
        for (name, kw) in KEYWORDS {
            assert_eq!(Keyword::from_ident(name), Some(*kw));
            assert_eq!(kw.as_str(), *name);
        }
        assert_eq!(Keyword::from_ident("of"), None);
    }

    #[test]
    fn longer_punctuators_come_first() {
        for (i, a) in PUNCTUATORS.iter().enumerate() {
            for b in &PUNCTUATORS[i + 1..] {
                assert!(
                    !b.as_str().starts_with(a.as_str()) || b.as_str() == a.as_str(),
                    "{} shadows {}",
                    a.as_str(),
                    b.as_str()
                );
            }
        }
    }
}
