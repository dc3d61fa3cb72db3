/// A byte-offset span into the original source text. Mirrors the
/// `SourceRange` type used throughout the teacher's parser (`start_offset`
/// plus an `end_offset()` accessor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceRange {
    pub start_offset: u32,
    pub len: u32,
}

impl SourceRange {
    pub const EMPTY: SourceRange = SourceRange { start_offset: 0, len: 0 };

    pub fn new(start_offset: u32, len: u32) -> Self {
        SourceRange { start_offset, len }
    }

    pub fn end_offset(&self) -> u32 {
        self.start_offset + self.len
    }

    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start_offset as usize..self.end_offset() as usize]
    }
}

/// Forward-only cursor over the source text, tracking line/column as it
/// advances. Lines and columns are 1-based to match the diagnostics in
/// `error.rs`.
pub struct Reader<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: u32,
    column: u32,
}

impl<'a> Reader<'a> {
    pub fn new(text: &'a str) -> Self {
        Reader {
            text,
            bytes: text.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    pub fn text(&self) -> &'a str {
        self.text
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn column(&self) -> u32 {
        self.column
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    pub fn current(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    pub fn peek(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    pub fn bump(&mut self) -> Option<u8> {
        let c = self.current()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    pub fn eat_while(&mut self, mut pred: impl FnMut(u8) -> bool) {
        while let Some(c) = self.current() {
            if !pred(c) {
                break;
            }
            self.bump();
        }
    }

    /// The full source line containing the current position, for diagnostics.
    pub fn current_line_text(&self) -> &'a str {
        let last_nl = self.text[..self.pos].rfind('\n').map(|i| i + 1).unwrap_or(0);
        let next_nl = self.text[self.pos..]
            .find('\n')
            .map(|i| self.pos + i)
            .unwrap_or(self.text.len());
        &self.text[last_nl..next_nl]
    }

    pub fn slice(&self, range: SourceRange) -> &'a str {
        range.text(self.text)
    }
}
