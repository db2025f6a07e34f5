use thiserror::Error;

/// The parser either doesn't recognize the file at all, or recognizes it
/// but finds a malformed cell inside it. Those are different failure modes
/// for callers: a format mismatch means "this isn't a multi-channel file",
/// a data-row error means "this file is broken".
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("multi-channel header mismatch: {reason}")]
    FormatMismatch { reason: String },

    #[error("row {row}: {message}")]
    DataRow { row: usize, message: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file has no data rows")]
    Empty,
}

pub type Result<T> = std::result::Result<T, ParseError>;
