//! Crate-wide error type.
//!
//! Every fallible operation in hayrick returns [`Result`]. Parse errors are
//! position-tagged; the first error stops the parse and nothing is recovered
//! silently.

use thiserror::Error;

/// What went wrong at a particular point of a Zinc/JSON/CSV/Trio source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    UnexpectedToken,
    BadEscape,
    BadNumber,
    MissingTz,
    DuplicateColumn,
    UnterminatedString,
    UnknownScalar,
}

impl std::fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let text = match self {
            ParseErrorKind::UnexpectedToken => "unexpected token",
            ParseErrorKind::BadEscape => "bad escape sequence",
            ParseErrorKind::BadNumber => "malformed number",
            ParseErrorKind::MissingTz => "datetime is missing its timezone suffix",
            ParseErrorKind::DuplicateColumn => "duplicate column name",
            ParseErrorKind::UnterminatedString => "unterminated string",
            ParseErrorKind::UnknownScalar => "unknown scalar form",
        };
        f.write_str(text)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("parse error at {line}:{col}: {kind}")]
    Parse {
        kind: ParseErrorKind,
        line: usize,
        col: usize,
    },
    #[error("filter error at offset {pos}: expected {expected}")]
    Filter { pos: usize, expected: String },
    #[error("schema error: {0}")]
    Schema(String),
    #[error("value not representable in this format: {0}")]
    Unrepresentable(&'static str),
    #[error("operation not implemented by this provider: {0}")]
    Capability(&'static str),
    #[error("data error: {0}")]
    Data(String),
}

impl Error {
    pub fn parse(kind: ParseErrorKind, line: usize, col: usize) -> Self {
        Error::Parse { kind, line, col }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Data(e.to_string())
    }
}
