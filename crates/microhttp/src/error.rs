//! Why a request was rejected.
//!
//! Parse failures never propagate as `Err` out of `add_chunk`; they flip the
//! parser to `MALFORMED` and the reason is kept for diagnostics.

use core::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Start line does not match `METHOD SP URI SP HTTP/D.D`
    InvalidStartLine,

    /// Header line does not match `NAME ":" OWS VALUE OWS`
    InvalidHeaderLine,

    /// Blank line before any header
    MissingHeaders,

    /// Line is not valid UTF-8
    InvalidEncoding,

    /// No CRLF within the configured line limit
    LineTooLong(usize),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::InvalidStartLine => write!(f, "invalid request start line"),
            ParseError::InvalidHeaderLine => write!(f, "invalid header line"),
            ParseError::MissingHeaders => write!(f, "header block ended before any header"),
            ParseError::InvalidEncoding => write!(f, "line is not valid UTF-8"),
            ParseError::LineTooLong(limit) => write!(f, "line exceeds {} bytes", limit),
        }
    }
}

impl std::error::Error for ParseError {}
