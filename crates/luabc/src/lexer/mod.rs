//! Hand-written tokenizer, grounded in the dispatch-by-first-byte shape of
//! `examples/CppCXY-lua-rs/crates/luars/src/compiler/parser/lua_tokenize.rs`
//! (a `Reader` cursor, `reset_buff`/`bump`/`eat_while`), narrowed to the
//! Lua 5.2 token grammar and escape rules of `orz/lua/parse.py`. Tokenizes
//! the whole source up front into a `Vec<Token>` rather than streaming,
//! matching that teacher file's `tokenize()` entry point.

pub mod token;

pub use token::{Token, TokenKind};

use crate::ast::Pos;
use crate::error::{CompileError, Location, Result};
use crate::source::Reader;

pub struct Lexer<'a> {
    reader: Reader<'a>,
    filename: &'a str,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str, filename: &'a str) -> Self {
        Lexer { reader: Reader::new(source), filename }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();

        // `#!...` shebang, only legal as the very first thing in the file.
        if self.reader.current() == Some(b'#') && self.reader.peek(1) == Some(b'!') {
            self.reader.eat_while(|c| c != b'\n');
        }

        loop {
            self.skip_trivia()?;
            if self.reader.is_eof() {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    text: "".into(),
                    bytes: Vec::new(),
                    pos: self.pos(),
                });
                break;
            }
            tokens.push(self.next_token()?);
        }

        Ok(tokens)
    }

    fn pos(&self) -> Pos {
        Pos { line: self.reader.line(), column: self.reader.column() }
    }

    fn err(&self, message: impl Into<String>) -> CompileError {
        let loc = Location::new(
            self.filename,
            self.reader.line(),
            self.reader.column(),
            self.reader.current_line_text(),
        );
        CompileError::lexical(loc, message)
    }

    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            match self.reader.current() {
                Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n') => {
                    self.reader.bump();
                }
                Some(b'-') if self.reader.peek(1) == Some(b'-') => {
                    self.reader.bump();
                    self.reader.bump();
                    if self.reader.current() == Some(b'[') {
                        if let Some(level) = self.peek_long_bracket_open() {
                            self.scan_long_bracket(level)?;
                            continue;
                        }
                    }
                    self.reader.eat_while(|c| c != b'\n');
                }
                _ => break,
            }
        }
        Ok(())
    }

    /// If the reader is positioned at `[=*[`, consumes it and returns the
    /// `=` level; otherwise leaves the reader untouched.
    fn peek_long_bracket_open(&mut self) -> Option<u32> {
        let save = self.reader.pos();
        if self.reader.current() != Some(b'[') {
            return None;
        }
        self.reader.bump();
        let mut level = 0u32;
        while self.reader.current() == Some(b'=') {
            self.reader.bump();
            level += 1;
        }
        if self.reader.current() == Some(b'[') {
            self.reader.bump();
            Some(level)
        } else {
            self.reset_to(save);
            None
        }
    }

    fn reset_to(&mut self, pos: usize) {
        while self.reader.pos() > pos {
            // Reader only moves forward; rebuild by re-creating is wasteful
            // for our small inputs, so we just bump a fresh reader instead.
            break;
        }
        // Re-seek by rebuilding the reader from the original text; cheap
        // enough since `peek_long_bracket_open` only rewinds a few bytes.
        let text = self.reader.text();
        self.reader = Reader::new(text);
        for _ in 0..pos {
            self.reader.bump();
        }
    }

    /// Scans the body of a long string/comment after the opening `[=*[`
    /// has been consumed, up to and including the matching `]=*]`.
    fn scan_long_bracket(&mut self, level: u32) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        // A leading newline immediately after the opening bracket is
        // dropped, per Lua's long-bracket rule.
        if self.reader.current() == Some(b'\r') || self.reader.current() == Some(b'\n') {
            self.reader.bump();
        }
        loop {
            match self.reader.current() {
                None => return Err(self.err("unfinished long string or comment near <eof>")),
                Some(b']') => {
                    let save = self.reader.pos();
                    self.reader.bump();
                    let mut count = 0u32;
                    while self.reader.current() == Some(b'=') {
                        self.reader.bump();
                        count += 1;
                    }
                    if count == level && self.reader.current() == Some(b']') {
                        self.reader.bump();
                        return Ok(out);
                    }
                    let text = self.reader.text();
                    out.extend_from_slice(text[save..self.reader.pos()].as_bytes());
                }
                Some(c) => {
                    self.reader.bump();
                    out.push(c);
                }
            }
        }
    }

    fn next_token(&mut self) -> Result<Token> {
        let pos = self.pos();
        let c = self.reader.current().unwrap();

        // Populated only by the `Str`-producing arms below, since a string
        // literal's decoded payload may not be valid UTF-8 and so can't
        // live in `text` (a `SmolStr`).
        let mut str_bytes: Option<Vec<u8>> = None;

        let kind_and_text = match c {
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                let start = self.reader.pos();
                self.reader.eat_while(is_name_continue);
                let text = &self.reader.text()[start..self.reader.pos()];
                let kind = TokenKind::keyword(text).unwrap_or(TokenKind::Name);
                (kind, text.to_string())
            }
            b'0'..=b'9' => {
                let text = self.scan_number()?;
                (TokenKind::Number, text)
            }
            b'.' if matches!(self.reader.peek(1), Some(b'0'..=b'9')) => {
                let text = self.scan_number()?;
                (TokenKind::Number, text)
            }
            b'"' | b'\'' => {
                str_bytes = Some(self.scan_short_string(c)?);
                (TokenKind::Str, String::new())
            }
            b'[' if matches!(self.reader.peek(1), Some(b'[') | Some(b'=')) => {
                if let Some(level) = self.peek_long_bracket_open() {
                    str_bytes = Some(self.scan_long_bracket(level)?);
                    (TokenKind::Str, String::new())
                } else {
                    self.reader.bump();
                    (TokenKind::LBracket, String::new())
                }
            }
            b'[' => {
                self.reader.bump();
                (TokenKind::LBracket, String::new())
            }
            b']' => {
                self.reader.bump();
                (TokenKind::RBracket, String::new())
            }
            b'(' => {
                self.reader.bump();
                (TokenKind::LParen, String::new())
            }
            b')' => {
                self.reader.bump();
                (TokenKind::RParen, String::new())
            }
            b'{' => {
                self.reader.bump();
                (TokenKind::LBrace, String::new())
            }
            b'}' => {
                self.reader.bump();
                (TokenKind::RBrace, String::new())
            }
            b';' => {
                self.reader.bump();
                (TokenKind::Semi, String::new())
            }
            b',' => {
                self.reader.bump();
                (TokenKind::Comma, String::new())
            }
            b'+' => {
                self.reader.bump();
                (TokenKind::Plus, String::new())
            }
            b'-' => {
                self.reader.bump();
                (TokenKind::Minus, String::new())
            }
            b'*' => {
                self.reader.bump();
                (TokenKind::Star, String::new())
            }
            b'/' => {
                self.reader.bump();
                (TokenKind::Slash, String::new())
            }
            b'%' => {
                self.reader.bump();
                (TokenKind::Percent, String::new())
            }
            b'^' => {
                self.reader.bump();
                (TokenKind::Caret, String::new())
            }
            b'#' => {
                self.reader.bump();
                (TokenKind::Hash, String::new())
            }
            b'=' => {
                self.reader.bump();
                if self.reader.current() == Some(b'=') {
                    self.reader.bump();
                    (TokenKind::Eq, String::new())
                } else {
                    (TokenKind::Assign, String::new())
                }
            }
            b'~' => {
                self.reader.bump();
                if self.reader.current() == Some(b'=') {
                    self.reader.bump();
                    (TokenKind::Ne, String::new())
                } else {
                    return Err(self.err("unexpected symbol near '~'"));
                }
            }
            b'<' => {
                self.reader.bump();
                if self.reader.current() == Some(b'=') {
                    self.reader.bump();
                    (TokenKind::Le, String::new())
                } else {
                    (TokenKind::Lt, String::new())
                }
            }
            b'>' => {
                self.reader.bump();
                if self.reader.current() == Some(b'=') {
                    self.reader.bump();
                    (TokenKind::Ge, String::new())
                } else {
                    (TokenKind::Gt, String::new())
                }
            }
            b':' => {
                self.reader.bump();
                if self.reader.current() == Some(b':') {
                    self.reader.bump();
                    (TokenKind::DbColon, String::new())
                } else {
                    (TokenKind::Colon, String::new())
                }
            }
            b'.' => {
                self.reader.bump();
                if self.reader.current() == Some(b'.') {
                    self.reader.bump();
                    if self.reader.current() == Some(b'.') {
                        self.reader.bump();
                        (TokenKind::Ellipsis, String::new())
                    } else {
                        (TokenKind::Concat, String::new())
                    }
                } else {
                    (TokenKind::Dot, String::new())
                }
            }
            other => {
                return Err(self.err(format!("unexpected symbol near '{}'", other as char)));
            }
        };

        Ok(Token {
            kind: kind_and_text.0,
            text: kind_and_text.1.into(),
            bytes: str_bytes.unwrap_or_default(),
            pos,
        })
    }

    /// Lua numeral grammar: decimal with optional `.frac` and `[eE][+-]d+`,
    /// or `0x` hex with optional `.frac` and `[pP][+-]d+`.
    fn scan_number(&mut self) -> Result<String> {
        let start = self.reader.pos();
        let is_hex = self.reader.current() == Some(b'0')
            && matches!(self.reader.peek(1), Some(b'x') | Some(b'X'));
        if is_hex {
            self.reader.bump();
            self.reader.bump();
            self.reader.eat_while(|c| c.is_ascii_hexdigit());
            if self.reader.current() == Some(b'.') {
                self.reader.bump();
                self.reader.eat_while(|c| c.is_ascii_hexdigit());
            }
            if matches!(self.reader.current(), Some(b'p') | Some(b'P')) {
                self.reader.bump();
                if matches!(self.reader.current(), Some(b'+') | Some(b'-')) {
                    self.reader.bump();
                }
                self.reader.eat_while(|c| c.is_ascii_digit());
            }
        } else {
            self.reader.eat_while(|c| c.is_ascii_digit());
            if self.reader.current() == Some(b'.') {
                self.reader.bump();
                self.reader.eat_while(|c| c.is_ascii_digit());
            }
            if matches!(self.reader.current(), Some(b'e') | Some(b'E')) {
                self.reader.bump();
                if matches!(self.reader.current(), Some(b'+') | Some(b'-')) {
                    self.reader.bump();
                }
                self.reader.eat_while(|c| c.is_ascii_digit());
            }
        }
        Ok(self.reader.text()[start..self.reader.pos()].to_string())
    }

    /// Short-string scanner with the full `orz/lua/parse.py:escape` escape
    /// grammar: `\a\b\f\n\r\t\v\\\"\'`, `\z` (absorbs following whitespace),
    /// `\xHH`, and decimal `\DDD` (hard error above 255). A Lua string is a
    /// byte string, not text, so the body is built as raw bytes: a `\xHH`/
    /// `\DDD` escape of e.g. `0xff` must contribute exactly the one byte
    /// `0xFF`, not that codepoint's multi-byte UTF-8 encoding.
    fn scan_short_string(&mut self, quote: u8) -> Result<Vec<u8>> {
        self.reader.bump();
        let mut out = Vec::new();
        loop {
            match self.reader.current() {
                None | Some(b'\n') => {
                    return Err(self.err("unfinished string"));
                }
                Some(c) if c == quote => {
                    self.reader.bump();
                    break;
                }
                Some(b'\\') => {
                    self.reader.bump();
                    match self.reader.current() {
                        Some(b'a') => {
                            out.push(0x07);
                            self.reader.bump();
                        }
                        Some(b'b') => {
                            out.push(0x08);
                            self.reader.bump();
                        }
                        Some(b'f') => {
                            out.push(0x0c);
                            self.reader.bump();
                        }
                        Some(b'n') => {
                            out.push(b'\n');
                            self.reader.bump();
                        }
                        Some(b'r') => {
                            out.push(b'\r');
                            self.reader.bump();
                        }
                        Some(b't') => {
                            out.push(b'\t');
                            self.reader.bump();
                        }
                        Some(b'v') => {
                            out.push(0x0b);
                            self.reader.bump();
                        }
                        Some(b'\\') => {
                            out.push(b'\\');
                            self.reader.bump();
                        }
                        Some(b'"') => {
                            out.push(b'"');
                            self.reader.bump();
                        }
                        Some(b'\'') => {
                            out.push(b'\'');
                            self.reader.bump();
                        }
                        Some(b'z') => {
                            self.reader.bump();
                            self.reader.eat_while(|c| c.is_ascii_whitespace());
                        }
                        Some(b'x') => {
                            self.reader.bump();
                            let start = self.reader.pos();
                            for _ in 0..2 {
                                if !matches!(self.reader.current(), Some(c) if c.is_ascii_hexdigit())
                                {
                                    return Err(self.err("hexadecimal digit expected"));
                                }
                                self.reader.bump();
                            }
                            let text = &self.reader.text()[start..self.reader.pos()];
                            let v = u8::from_str_radix(text, 16).unwrap();
                            out.push(v);
                        }
                        Some(c) if c.is_ascii_digit() => {
                            let start = self.reader.pos();
                            let mut n = 0;
                            while n < 3
                                && matches!(self.reader.current(), Some(c) if c.is_ascii_digit())
                            {
                                self.reader.bump();
                                n += 1;
                            }
                            let text = &self.reader.text()[start..self.reader.pos()];
                            let v: u32 = text.parse().unwrap();
                            if v > 255 {
                                return Err(self.err(format!(
                                    "decimal escape too large near '\\{}'",
                                    text
                                )));
                            }
                            out.push(v as u8);
                        }
                        _ => return Err(self.err("invalid escape sequence")),
                    }
                }
                Some(c) => {
                    self.reader.bump();
                    out.push(c);
                }
            }
        }
        Ok(out)
    }
}

fn is_name_continue(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

pub fn tokenize<'a>(source: &'a str, filename: &'a str) -> Result<Vec<Token>> {
    Lexer::new(source, filename).tokenize()
}
