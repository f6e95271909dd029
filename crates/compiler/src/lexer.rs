//! Tokenizer for the C subset
//!
//! The lexer only distinguishes the broad token classes; telling a keyword
//! from a punctuator, or one punctuator from another, is the parser's job
//! against the token text. Both keywords and punctuators come out as
//! [`TokenKind::Reserved`].
//!
//! Punctuators are matched against a table ordered longest-first so that
//! `<<=` wins over `<<` wins over `<`. A keyword match additionally requires
//! that the next byte is not an identifier-continuation character, so `iff`
//! lexes as one identifier rather than `if` + `f`.

use crate::diag::SourceMap;
use std::rc::Rc;

/// String literals may not exceed this many decoded bytes.
const MAX_STRING_LEN: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Punctuator or keyword; the text says which.
    Reserved,
    /// Identifier.
    Ident,
    /// String literal: decoded bytes including the terminating NUL.
    Str(Vec<u8>),
    /// Integer or character literal.
    Num(i64),
    /// End of input.
    Eof,
}

/// A token with its source slice. `loc` is the byte offset of the first
/// character in the source buffer, used for diagnostics.
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub loc: usize,
}

/// Multi- and single-character punctuators, longest first.
const PUNCTUATORS: &[&str] = &[
    "<<=", ">>=", "==", "!=", "<=", ">=", "->", "++", "--", "+=", "-=", "*=", "/=", "<<", ">>",
    "&&", "||", "+", "-", "*", "&", "/", "%", "(", ")", "<", ">", ";", "=", "{", "}", ",", "[",
    "]", ".", "!", "~", "^", "|", "?", ":",
];

const KEYWORDS: &[&str] = &[
    "return", "if", "else", "while", "for", "do", "int", "char", "short", "long", "void", "_Bool",
    "enum", "struct", "typedef", "static", "sizeof", "switch", "case", "default", "break",
    "continue", "goto",
];

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn is_ident_char(c: u8) -> bool {
    is_ident_start(c) || c.is_ascii_digit()
}

/// Decode one escape character. Unknown escapes yield the character itself.
fn escape_char(c: u8) -> u8 {
    match c {
        b'a' => 0x07,
        b'b' => 0x08,
        b't' => b'\t',
        b'n' => b'\n',
        b'v' => 0x0b,
        b'f' => 0x0c,
        b'r' => b'\r',
        b'e' => 0x1b,
        b'0' => 0,
        _ => c,
    }
}

pub struct Lexer {
    src: Rc<SourceMap>,
    pos: usize,
    tokens: Vec<Token>,
}

/// Tokenize the whole source buffer. The returned vector always ends with an
/// [`TokenKind::Eof`] token.
pub fn tokenize(src: &Rc<SourceMap>) -> Result<Vec<Token>, String> {
    let mut lexer = Lexer {
        src: Rc::clone(src),
        pos: 0,
        tokens: Vec::new(),
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

impl Lexer {
    fn bytes(&self) -> &[u8] {
        self.src.src.as_bytes()
    }

    fn rest(&self) -> &str {
        &self.src.src[self.pos..]
    }

    fn push(&mut self, kind: TokenKind, loc: usize, len: usize) {
        self.tokens.push(Token {
            kind,
            text: self.src.src[loc..loc + len].to_string(),
            loc,
        });
    }

    fn error_at(&self, loc: usize, msg: &str) -> String {
        self.src.error_at(loc, msg)
    }

    fn run(&mut self) -> Result<(), String> {
        while self.pos < self.bytes().len() {
            let c = self.bytes()[self.pos];

            if c.is_ascii_whitespace() {
                self.pos += 1;
                continue;
            }

            // Line and block comments are skipped like whitespace.
            if self.rest().starts_with("//") {
                while self.bytes()[self.pos] != b'\n' {
                    self.pos += 1;
                }
                continue;
            }
            if self.rest().starts_with("/*") {
                match self.rest()[2..].find("*/") {
                    Some(idx) => self.pos += 2 + idx + 2,
                    None => return Err(self.error_at(self.pos, "unclosed block comment")),
                }
                continue;
            }

            if let Some(kw) = self.starts_with_keyword() {
                let loc = self.pos;
                self.pos += kw.len();
                self.push(TokenKind::Reserved, loc, kw.len());
                continue;
            }

            if let Some(op) = self.starts_with_punctuator() {
                let loc = self.pos;
                self.pos += op.len();
                self.push(TokenKind::Reserved, loc, op.len());
                continue;
            }

            if is_ident_start(c) {
                let loc = self.pos;
                while self.pos < self.bytes().len() && is_ident_char(self.bytes()[self.pos]) {
                    self.pos += 1;
                }
                self.push(TokenKind::Ident, loc, self.pos - loc);
                continue;
            }

            if c == b'"' {
                self.read_string_literal()?;
                continue;
            }

            if c == b'\'' {
                self.read_char_literal()?;
                continue;
            }

            if c.is_ascii_digit() {
                let loc = self.pos;
                while self.pos < self.bytes().len() && self.bytes()[self.pos].is_ascii_digit() {
                    self.pos += 1;
                }
                let text = &self.src.src[loc..self.pos];
                let val: i64 = text
                    .parse()
                    .map_err(|_| self.error_at(loc, "integer literal too large"))?;
                self.push(TokenKind::Num(val), loc, self.pos - loc);
                continue;
            }

            return Err(self.error_at(self.pos, "invalid token"));
        }

        let end = self.bytes().len();
        self.tokens.push(Token {
            kind: TokenKind::Eof,
            text: String::new(),
            loc: end,
        });
        Ok(())
    }

    /// Keyword at the cursor, if any. A keyword must not run into an
    /// identifier: `iff` is an identifier.
    fn starts_with_keyword(&self) -> Option<&'static str> {
        for &kw in KEYWORDS {
            if self.rest().starts_with(kw) {
                let next = self.bytes().get(self.pos + kw.len()).copied();
                if next.is_none_or(|c| !is_ident_char(c)) {
                    return Some(kw);
                }
            }
        }
        None
    }

    fn starts_with_punctuator(&self) -> Option<&'static str> {
        PUNCTUATORS.iter().find(|op| self.rest().starts_with(**op)).copied()
    }

    fn read_string_literal(&mut self) -> Result<(), String> {
        let start = self.pos;
        let mut p = start + 1;
        let mut buf = Vec::new();

        loop {
            if buf.len() == MAX_STRING_LEN {
                return Err(self.error_at(start, "string literal too large"));
            }
            let Some(&c) = self.bytes().get(p) else {
                return Err(self.error_at(start, "unclosed string literal"));
            };
            match c {
                b'"' => break,
                b'\\' => {
                    let Some(&e) = self.bytes().get(p + 1) else {
                        return Err(self.error_at(start, "unclosed string literal"));
                    };
                    buf.push(escape_char(e));
                    p += 2;
                }
                _ => {
                    buf.push(c);
                    p += 1;
                }
            }
        }
        p += 1; // closing quote
        buf.push(0); // terminating NUL is part of the contents

        let len = p - start;
        self.push(TokenKind::Str(buf), start, len);
        self.pos = p;
        Ok(())
    }

    /// A character literal yields an integer token whose value is the
    /// decoded byte.
    fn read_char_literal(&mut self) -> Result<(), String> {
        let start = self.pos;
        let mut p = start + 1;

        let Some(&c) = self.bytes().get(p) else {
            return Err(self.error_at(start, "unclosed char literal"));
        };
        let val = if c == b'\\' {
            let Some(&e) = self.bytes().get(p + 1) else {
                return Err(self.error_at(start, "unclosed char literal"));
            };
            p += 2;
            escape_char(e)
        } else {
            p += 1;
            c
        };

        if self.bytes().get(p) != Some(&b'\'') {
            return Err(self.error_at(start, "char literal too long"));
        }
        p += 1;

        let len = p - start;
        self.push(TokenKind::Num(val as i64), start, len);
        self.pos = p;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(input: &str) -> Vec<Token> {
        let src = SourceMap::new("test.c", input);
        tokenize(&src).unwrap()
    }

    fn texts(tokens: &[Token]) -> Vec<&str> {
        tokens
            .iter()
            .filter(|t| t.kind != TokenKind::Eof)
            .map(|t| t.text.as_str())
            .collect()
    }

    #[test]
    fn test_longest_match_punctuators() {
        let toks = lex("a <<= b << c < d");
        assert_eq!(texts(&toks), vec!["a", "<<=", "b", "<<", "c", "<", "d"]);
    }

    #[test]
    fn test_keyword_requires_boundary() {
        let toks = lex("if iff");
        assert_eq!(toks[0].kind, TokenKind::Reserved);
        assert_eq!(toks[0].text, "if");
        assert_eq!(toks[1].kind, TokenKind::Ident);
        assert_eq!(toks[1].text, "iff");
    }

    #[test]
    fn test_identifier_with_leading_underscore() {
        let toks = lex("_foo __bar9");
        assert_eq!(toks[0].kind, TokenKind::Ident);
        assert_eq!(toks[0].text, "_foo");
        assert_eq!(toks[1].text, "__bar9");
    }

    #[test]
    fn test_integer_literal() {
        let toks = lex("return 42;");
        assert_eq!(toks[1].kind, TokenKind::Num(42));
    }

    #[test]
    fn test_string_literal_escapes() {
        let toks = lex(r#""a\n\t\0b\q""#);
        match &toks[0].kind {
            TokenKind::Str(contents) => {
                // unknown escape \q decodes to 'q'; trailing NUL included
                assert_eq!(contents, &[b'a', b'\n', b'\t', 0, b'b', b'q', 0]);
            }
            k => panic!("expected string token, got {:?}", k),
        }
    }

    #[test]
    fn test_string_literal_embedded_nul_kept() {
        let toks = lex(r#""x\0y""#);
        match &toks[0].kind {
            TokenKind::Str(contents) => assert_eq!(contents, &[b'x', 0, b'y', 0]),
            k => panic!("expected string token, got {:?}", k),
        }
    }

    #[test]
    fn test_char_literal() {
        let toks = lex(r"'a' '\n' '\\'");
        assert_eq!(toks[0].kind, TokenKind::Num(97));
        assert_eq!(toks[1].kind, TokenKind::Num(10));
        assert_eq!(toks[2].kind, TokenKind::Num(92));
    }

    #[test]
    fn test_comments_skipped() {
        let toks = lex("a // comment\nb /* block\nstill */ c");
        assert_eq!(texts(&toks), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_unclosed_string_is_error() {
        let src = SourceMap::new("test.c", "\"abc\n");
        let err = tokenize(&src).unwrap_err();
        assert!(err.contains("unclosed string literal"));
        assert!(err.starts_with("test.c:1:"));
    }

    #[test]
    fn test_unclosed_block_comment_is_error() {
        let src = SourceMap::new("test.c", "int x; /* no end\n");
        let err = tokenize(&src).unwrap_err();
        assert!(err.contains("unclosed block comment"));
    }

    #[test]
    fn test_invalid_token_is_error() {
        let src = SourceMap::new("test.c", "int x = @;\n");
        let err = tokenize(&src).unwrap_err();
        assert!(err.contains("invalid token"));
    }

    #[test]
    fn test_eof_terminator() {
        let toks = lex("x");
        assert_eq!(toks.last().unwrap().kind, TokenKind::Eof);
    }
}
