//! # microhttp
//!
//! Incremental HTTP/1.x request parsing.
//!
//! The parser consumes byte chunks as they arrive from whoever owns the
//! socket; chunk boundaries need not line up with line or body boundaries.
//! It never touches descriptors and is not itself an event source.
//!
//! ```text
//!  START_LINE ──► HEADER ──► HEADER_OR_CRLF ──┬──► BODY ──► END
//!                              ▲      │       │
//!                              └──────┘       └──────────► END
//!                           (more headers)  (no Content-Length)
//! ```
//!
//! ## Modules
//!
//! - `request` - `Request` and `Version`
//! - `parser` - `RequestParser` state machine and single-line parsers
//! - `error` - reasons a request is malformed

pub mod error;
pub mod parser;
pub mod request;

pub use error::ParseError;
pub use parser::{parse_header_line, parse_start_line, LineType, ParseStatus, RequestParser};
pub use request::{canonicalize_field_name, Request, Version};
