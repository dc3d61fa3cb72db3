use std::fmt;

/// A single diagnostic location: 1-based line, 1-based column, and the
/// source line text the error occurred on (mirrors `orz.parse.SyntaxParser`'s
/// `(filename, lineno, col_offset, source_line)` tuple).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub source_line: String,
}

impl Location {
    pub fn new(file: &str, line: u32, column: u32, source_line: &str) -> Self {
        Location {
            file: file.to_string(),
            line,
            column,
            source_line: source_line.to_string(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// The complete error taxonomy for this crate's compile pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// Lexer rejected a character or malformed literal.
    Lexical { loc: Location, message: String },
    /// Parser found a token sequence that doesn't match the grammar.
    Syntax { loc: Location, message: String },
    /// A `goto`/label pair could not be resolved, or a `goto` jumps into
    /// the scope of a local it should not see.
    Label { loc: Location, message: String },
    /// `...` used outside a vararg function.
    Vararg { loc: Location, message: String },
    /// A compiler-internal invariant was violated (stack imbalance, etc.);
    /// should never be observable from well-formed input.
    Internal { message: String },
}

impl CompileError {
    pub fn lexical(loc: Location, message: impl Into<String>) -> Self {
        CompileError::Lexical { loc, message: message.into() }
    }

    pub fn syntax(loc: Location, message: impl Into<String>) -> Self {
        CompileError::Syntax { loc, message: message.into() }
    }

    pub fn label(loc: Location, message: impl Into<String>) -> Self {
        CompileError::Label { loc, message: message.into() }
    }

    pub fn vararg(loc: Location, message: impl Into<String>) -> Self {
        CompileError::Vararg { loc, message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        CompileError::Internal { message: message.into() }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Lexical { loc, message } => {
                write!(f, "{}: lexical error: {}\n  {}", loc, message, loc.source_line)
            }
            CompileError::Syntax { loc, message } => {
                write!(f, "{}: syntax error: {}\n  {}", loc, message, loc.source_line)
            }
            CompileError::Label { loc, message } => {
                write!(f, "{}: {}\n  {}", loc, message, loc.source_line)
            }
            CompileError::Vararg { loc, message } => {
                write!(f, "{}: {}\n  {}", loc, message, loc.source_line)
            }
            CompileError::Internal { message } => write!(f, "internal compiler error: {}", message),
        }
    }
}

impl std::error::Error for CompileError {}

pub type Result<T> = std::result::Result<T, CompileError>;
