//! Tokenizing 6502 assembly.
//!
//! This module holds the tokens that characterize 6502 assembly ([`Token`])
//! and the line-bounded lexer over them ([`LineLexer`]).
//!
//! Tokens are deliberately coarse: identifiers, numbers, mnemonics, and directives
//! are all [`Token::Word`]s, and the consumer decides what a word means from context
//! (see [`Word::classify`]).

use std::num::IntErrorKind;
use std::ops::Range;

use logos::{Lexer, Logos};

/// A unit of information in 6502 source code.
#[derive(Debug, Logos, PartialEq, Eq, Clone, Copy)]
#[logos(skip r"[ \t\r\f]+", error = LexErr)]
pub enum Token<'s> {
    /// A run of letters, digits, `_`, and `.`, optionally prefixed by `$` or `%`.
    ///
    /// This covers mnemonics (`LDA`), labels (`loop`, `.local`), directives (`.byte`),
    /// the register names `A`/`X`/`Y` and numeric literals (`42`, `$FF`, `%1010`).
    // Like the number regexes elsewhere, this overmatches (e.g., `$xyz`) and is validated later.
    #[regex(r"[$%]?[A-Za-z0-9_.]+", |lx| lx.slice())]
    Word(&'s str),

    /// A string literal (e.g., `"Hello!"`), without its quotes.
    ///
    /// A string missing its closing quote runs to the end of the line.
    #[regex(r#""[^"\n]*"?"#, lex_str_literal)]
    Str(&'s str),

    /// A character literal (e.g., `'x'`). The closing quote is optional.
    #[regex(r"'[^\n]'?", lex_char_literal)]
    Char(u8),

    /// The `<<` operator.
    #[token("<<")]
    Shl,

    /// The `>>` operator.
    #[token(">>")]
    Shr,

    /// Any other single-character punctuation or operator.
    #[regex(r"[#(),:=+\-*/&|<>]", |lx| char::from(lx.slice().as_bytes()[0]))]
    Punct(char),

    /// A comment, which starts with a semicolon and spans the remaining part of the line.
    #[regex(r";[^\n]*")]
    Comment,
}
impl std::fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Word(w)  => f.write_str(w),
            Token::Str(s)   => write!(f, "{s:?}"),
            Token::Char(c)  => write!(f, "'{}'", char::from(*c)),
            Token::Shl      => f.write_str("<<"),
            Token::Shr      => f.write_str(">>"),
            Token::Punct(c) => write!(f, "{c}"),
            Token::Comment  => f.write_str(";"),
        }
    }
}

fn lex_str_literal<'s>(lx: &Lexer<'s, Token<'s>>) -> &'s str {
    let inner = &lx.slice()[1..];
    inner.strip_suffix('"').unwrap_or(inner)
}
fn lex_char_literal<'s>(lx: &Lexer<'s, Token<'s>>) -> Result<u8, LexErr> {
    let c = lx.slice()[1..].chars().next().ok_or(LexErr::InvalidSymbol)?;
    match c.is_ascii() {
        true  => Ok(c as u8),
        false => Err(LexErr::NonAsciiChar),
    }
}

/// Any errors raised in attempting to tokenize a line or to read a numeric literal.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, thiserror::Error)]
pub enum LexErr {
    /// Numeric literal does not fit in 32 bits.
    #[error("numeric literal is too large")]
    NumberTooLarge,
    /// Hex literal (starting with `$`) has invalid hex digits.
    #[error("invalid hex literal")]
    InvalidHex,
    /// Binary literal (starting with `%`) has digits other than 0 and 1.
    #[error("invalid binary literal")]
    InvalidBinary,
    /// Decimal literal has invalid digits.
    #[error("invalid decimal literal")]
    InvalidDecimal,
    /// Character literal contains a character which isn't ASCII.
    #[error("character literal must be ASCII")]
    NonAsciiChar,
    /// A symbol was used which is not allowed in 6502 assembly files.
    #[default]
    #[error("unrecognized symbol")]
    InvalidSymbol,
}
impl crate::err::Error for LexErr {
    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match self {
            LexErr::NumberTooLarge => Some(format!("the range for a numeric literal is [{}, {}]", i32::MIN, i32::MAX).into()),
            LexErr::InvalidHex     => Some("a hex literal starts with '$' and consists of 0-9, A-F".into()),
            LexErr::InvalidBinary  => Some("a binary literal starts with '%' and consists of 0 and 1".into()),
            LexErr::InvalidDecimal => Some("a decimal literal only consists of digits 0-9".into()),
            LexErr::NonAsciiChar   => None,
            LexErr::InvalidSymbol  => Some("this char does not occur in any token in 6502 assembly".into()),
        }
    }
}

/// The meaning of a [`Token::Word`] when it appears as an operand.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Word<'s> {
    /// A numeric literal.
    Number(i32),
    /// A reference to a symbol (label or value).
    Symbol(&'s str),
}
impl<'s> Word<'s> {
    /// Classifies a word as either a numeric literal or a symbol reference.
    ///
    /// Words starting with `$`, `%`, or a digit are numeric literals
    /// and error if they can't be parsed as one.
    ///
    /// ```
    /// use m6502_ensemble::parse::lex::{LexErr, Word};
    ///
    /// assert_eq!(Word::classify("$FF"), Ok(Word::Number(255)));
    /// assert_eq!(Word::classify("%101"), Ok(Word::Number(5)));
    /// assert_eq!(Word::classify("42"), Ok(Word::Number(42)));
    /// assert_eq!(Word::classify("loop"), Ok(Word::Symbol("loop")));
    /// assert_eq!(Word::classify("$FG"), Err(LexErr::InvalidHex));
    /// ```
    pub fn classify(word: &'s str) -> Result<Self, LexErr> {
        let parsed = if let Some(hex) = word.strip_prefix('$') {
            parse_radix(hex, 16, LexErr::InvalidHex)
        } else if let Some(bin) = word.strip_prefix('%') {
            parse_radix(bin, 2, LexErr::InvalidBinary)
        } else if word.starts_with(|c: char| c.is_ascii_digit()) {
            parse_radix(word, 10, LexErr::InvalidDecimal)
        } else {
            return Ok(Word::Symbol(word));
        };

        parsed.map(Word::Number)
    }
}

fn parse_radix(digits: &str, radix: u32, invalid: LexErr) -> Result<i32, LexErr> {
    // Literals are unsigned in source, but are allowed to fill all 32 bits.
    u32::from_str_radix(digits, radix)
        .map(|n| n as i32)
        .map_err(|e| match e.kind() {
            IntErrorKind::PosOverflow => LexErr::NumberTooLarge,
            _ => invalid,
        })
}

/// Checks whether a word may be used as the name of a label definition.
///
/// A label starts with a letter, `_`, or `.` (for a local label),
/// and is otherwise made of letters, digits, and `_`.
/// Notably, a `.` is not allowed after the first character.
///
/// ```
/// use m6502_ensemble::parse::lex::is_label_name;
///
/// assert!(is_label_name("loop"));
/// assert!(is_label_name(".loop"));
/// assert!(is_label_name("_start2"));
/// assert!(!is_label_name("main.loop"));
/// assert!(!is_label_name("2fast"));
/// assert!(!is_label_name("$10"));
/// ```
pub fn is_label_name(word: &str) -> bool {
    let mut chars = word.chars();
    let Some(first) = chars.next() else { return false };
    let rest = chars.as_str();

    (first.is_ascii_alphabetic() || first == '_' || first == '.')
        && !(first == '.' && rest.is_empty())
        && rest.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A lexer over a single line of source.
///
/// The lexer ends at the end of the line or at the start of a comment,
/// whichever comes first. Once a comment is hit, no further tokens are produced.
///
/// ```
/// use m6502_ensemble::parse::lex::{LineLexer, Token};
///
/// let mut lx = LineLexer::new("  LDA #$10 ; load");
/// assert_eq!(lx.peek(), Ok(Some(Token::Word("LDA"))));
/// assert_eq!(lx.next_token(), Ok(Some(Token::Word("LDA"))));
/// assert_eq!(lx.next_token(), Ok(Some(Token::Punct('#'))));
/// assert_eq!(lx.next_token(), Ok(Some(Token::Word("$10"))));
/// assert_eq!(lx.next_token(), Ok(None));
/// ```
#[derive(Clone)]
pub struct LineLexer<'s> {
    inner: Lexer<'s, Token<'s>>,
    done: bool,
}
impl<'s> LineLexer<'s> {
    /// Creates a lexer over the given line.
    pub fn new(line: &'s str) -> Self {
        Self { inner: Token::lexer(line), done: false }
    }

    /// Advances to the next token of the line.
    ///
    /// This returns `Ok(None)` once the end of the line or a comment is reached.
    pub fn next_token(&mut self) -> Result<Option<Token<'s>>, LexErr> {
        if self.done { return Ok(None) };

        match self.inner.next() {
            None | Some(Ok(Token::Comment)) => {
                self.done = true;
                Ok(None)
            },
            Some(Ok(t)) => Ok(Some(t)),
            Some(Err(e)) => Err(e),
        }
    }

    /// Reads the next token without consuming it.
    pub fn peek(&self) -> Result<Option<Token<'s>>, LexErr> {
        self.clone().next_token()
    }

    /// Checks whether there are no more tokens on this line.
    ///
    /// A lexing error counts as there being another token.
    pub fn at_end(&self) -> bool {
        matches!(self.peek(), Ok(None))
    }

    /// The span of the last consumed token.
    pub fn span(&self) -> Range<usize> {
        self.inner.span()
    }
}
impl std::fmt::Debug for LineLexer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineLexer")
            .field("remainder", &self.inner.remainder())
            .field("done", &self.done)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(line: &str) -> Result<Vec<Token<'_>>, LexErr> {
        let mut lx = LineLexer::new(line);
        let mut out = vec![];
        while let Some(t) = lx.next_token()? {
            out.push(t);
        }
        Ok(out)
    }

    #[test]
    fn test_words() {
        assert_eq!(
            tokens("loop: lda $10,x").unwrap(),
            [Token::Word("loop"), Token::Punct(':'), Token::Word("lda"), Token::Word("$10"), Token::Punct(','), Token::Word("x")]
        );
        assert_eq!(
            tokens(".byte %0101, main.local, _x").unwrap(),
            [Token::Word(".byte"), Token::Word("%0101"), Token::Punct(','), Token::Word("main.local"), Token::Punct(','), Token::Word("_x")]
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            tokens("1<<2>>3").unwrap(),
            [Token::Word("1"), Token::Shl, Token::Word("2"), Token::Shr, Token::Word("3")]
        );
        assert_eq!(
            tokens("<lbl >lbl").unwrap(),
            [Token::Punct('<'), Token::Word("lbl"), Token::Punct('>'), Token::Word("lbl")]
        );
        assert_eq!(
            tokens("(a+b)*c/d&e|f-g=#").unwrap(),
            [
                Token::Punct('('), Token::Word("a"), Token::Punct('+'), Token::Word("b"), Token::Punct(')'),
                Token::Punct('*'), Token::Word("c"), Token::Punct('/'), Token::Word("d"), Token::Punct('&'),
                Token::Word("e"), Token::Punct('|'), Token::Word("f"), Token::Punct('-'), Token::Word("g"),
                Token::Punct('='), Token::Punct('#'),
            ]
        );
    }

    #[test]
    fn test_comments() {
        assert!(tokens("; just a comment").unwrap().is_empty());
        assert_eq!(tokens("nop ; trailing \"string").unwrap(), [Token::Word("nop")]);
        assert!(tokens("").unwrap().is_empty());
        assert!(tokens("   \t ").unwrap().is_empty());

        // nothing is produced after a comment, even when polled again
        let mut lx = LineLexer::new(";x");
        assert_eq!(lx.next_token(), Ok(None));
        assert_eq!(lx.next_token(), Ok(None));
    }

    #[test]
    fn test_str_literals() {
        assert_eq!(tokens(r#""Hello, World!""#).unwrap(), [Token::Str("Hello, World!")]);
        assert_eq!(tokens(r#""""#).unwrap(), [Token::Str("")]);
        // a semicolon in a string isn't a comment
        assert_eq!(tokens(r#""a;b" ; c"#).unwrap(), [Token::Str("a;b")]);
        // unterminated strings run to the end of line
        assert_eq!(tokens(r#".byte "abc"#).unwrap(), [Token::Word(".byte"), Token::Str("abc")]);
    }

    #[test]
    fn test_char_literals() {
        assert_eq!(tokens("'a'").unwrap(), [Token::Char(b'a')]);
        assert_eq!(tokens("'a").unwrap(), [Token::Char(b'a')]);
        assert_eq!(tokens("' '").unwrap(), [Token::Char(b' ')]);
        assert_eq!(tokens("';'").unwrap(), [Token::Char(b';')]);
        assert_eq!(tokens("'é'"), Err(LexErr::NonAsciiChar));
    }

    #[test]
    fn test_invalid_symbol() {
        assert_eq!(tokens("lda @"), Err(LexErr::InvalidSymbol));
        assert_eq!(tokens("!"), Err(LexErr::InvalidSymbol));
    }

    #[test]
    fn test_peek() {
        let mut lx = LineLexer::new("a b");
        assert_eq!(lx.peek(), Ok(Some(Token::Word("a"))));
        assert_eq!(lx.peek(), Ok(Some(Token::Word("a"))));
        assert_eq!(lx.next_token(), Ok(Some(Token::Word("a"))));
        assert_eq!(lx.span(), 0..1);
        assert!(!lx.at_end());
        assert_eq!(lx.next_token(), Ok(Some(Token::Word("b"))));
        assert!(lx.at_end());
    }

    #[test]
    fn test_numbers() {
        assert_eq!(Word::classify("$1234"), Ok(Word::Number(0x1234)));
        assert_eq!(Word::classify("$ff"), Ok(Word::Number(0xFF)));
        assert_eq!(Word::classify("%11111111"), Ok(Word::Number(255)));
        assert_eq!(Word::classify("0"), Ok(Word::Number(0)));
        assert_eq!(Word::classify("65535"), Ok(Word::Number(65535)));
        assert_eq!(Word::classify("$FFFFFFFF"), Ok(Word::Number(-1)));

        assert_eq!(Word::classify("$"), Err(LexErr::InvalidHex));
        assert_eq!(Word::classify("%102"), Err(LexErr::InvalidBinary));
        assert_eq!(Word::classify("12ab"), Err(LexErr::InvalidDecimal));
        assert_eq!(Word::classify("$100000000"), Err(LexErr::NumberTooLarge));

        assert_eq!(Word::classify("A"), Ok(Word::Symbol("A")));
        assert_eq!(Word::classify(".loop"), Ok(Word::Symbol(".loop")));
    }

    #[test]
    fn test_label_names() {
        assert!(is_label_name("a"));
        assert!(is_label_name("A_1"));
        assert!(!is_label_name("."));
        assert!(!is_label_name(""));
        assert!(!is_label_name(".a.b"));
        assert!(!is_label_name("%10"));
    }
}
