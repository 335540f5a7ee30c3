//! Incremental request parser.
//!
//! `add_chunk()` appends to a carry-over buffer and consumes as much as it
//! can: whole CRLF-terminated lines while in a line state, raw bytes while
//! in `Body`. Whatever does not yet form a complete line stays buffered for
//! the next chunk.
//!
//! Once the status is `Finished` or `Malformed` the parser is inert:
//! further chunks change nothing. There is no resynchronization after a
//! malformed line.

use crate::error::ParseError;
use crate::request::{Request, Version};

use microloop_core::{kdebug, ktrace};

/// Default upper bound for one start or header line, CRLF included.
pub const DEFAULT_MAX_LINE_LEN: usize = 8192;

/// Cap on the up-front body allocation; a large `Content-Length` grows the
/// buffer as bytes actually arrive.
const BODY_RESERVE_LIMIT: usize = 64 * 1024;

/// What the parser expects next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineType {
    StartLine,
    Header,
    /// At least one header accepted; another header or the blank line.
    HeaderOrCrlf,
    Body,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    NoHeaders,
    Ok,
    Finished,
    Malformed,
}

#[derive(Debug)]
pub struct RequestParser {
    expected: LineType,
    status: ParseStatus,
    error: Option<ParseError>,
    request: Request,
    /// Bytes received but not yet consumed.
    carry: Vec<u8>,
    body_remaining: usize,
    max_line_len: usize,
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestParser {
    pub fn new() -> Self {
        Self::with_max_line_len(DEFAULT_MAX_LINE_LEN)
    }

    pub fn with_max_line_len(max_line_len: usize) -> Self {
        Self {
            expected: LineType::StartLine,
            status: ParseStatus::NoHeaders,
            error: None,
            request: Request::new(),
            carry: Vec::new(),
            body_remaining: 0,
            max_line_len: max_line_len.max(2),
        }
    }

    /// Feed the next chunk. Returns the status after consuming it.
    pub fn add_chunk(&mut self, chunk: &[u8]) -> ParseStatus {
        if self.is_done() {
            ktrace!("parser: ignoring {} bytes after {:?}", chunk.len(), self.status);
            return self.status;
        }
        self.carry.extend_from_slice(chunk);

        let carry = std::mem::take(&mut self.carry);
        let consumed = self.consume(&carry);
        self.carry = carry;
        self.carry.drain(..consumed);

        self.status
    }

    /// Process buffered bytes; returns how many were consumed.
    fn consume(&mut self, buf: &[u8]) -> usize {
        let mut pos = 0;

        loop {
            match self.expected {
                LineType::End => break,
                LineType::Body => {
                    let take = self.body_remaining.min(buf.len() - pos);
                    self.request.extend_body(&buf[pos..pos + take]);
                    pos += take;
                    self.body_remaining -= take;
                    if self.body_remaining == 0 {
                        self.finish();
                    }
                    break;
                }
                _ => {
                    let rest = &buf[pos..];
                    let line_len = match find_crlf(rest) {
                        Some(i) => i + 2,
                        None => {
                            if rest.len() > self.max_line_len {
                                self.fail(ParseError::LineTooLong(self.max_line_len));
                            }
                            break;
                        }
                    };
                    if line_len > self.max_line_len {
                        self.fail(ParseError::LineTooLong(self.max_line_len));
                        break;
                    }

                    self.handle_line(&rest[..line_len]);
                    pos += line_len;
                    if self.status == ParseStatus::Malformed {
                        break;
                    }
                }
            }
        }

        pos
    }

    fn handle_line(&mut self, raw: &[u8]) {
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line,
            Err(_) => return self.fail(ParseError::InvalidEncoding),
        };

        match self.expected {
            LineType::StartLine => match parse_start_line(line, &mut self.request) {
                Ok(()) => {
                    self.expected = LineType::Header;
                    self.status = ParseStatus::NoHeaders;
                }
                Err(e) => self.fail(e),
            },
            LineType::Header if line == "\r\n" => self.fail(ParseError::MissingHeaders),
            LineType::HeaderOrCrlf if line == "\r\n" => self.end_headers(),
            LineType::Header | LineType::HeaderOrCrlf => {
                match parse_header_line(line, &mut self.request) {
                    Ok(()) => {
                        self.expected = LineType::HeaderOrCrlf;
                        self.status = ParseStatus::Ok;
                    }
                    Err(e) => self.fail(e),
                }
            }
            LineType::Body | LineType::End => {}
        }
    }

    fn end_headers(&mut self) {
        match self.request.content_length() {
            Some(len) if len > 0 => {
                self.expected = LineType::Body;
                self.body_remaining = len;
                self.request.reserve_body(len.min(BODY_RESERVE_LIMIT));
            }
            _ => self.finish(),
        }
    }

    fn finish(&mut self) {
        self.expected = LineType::End;
        self.status = ParseStatus::Finished;
    }

    fn fail(&mut self, err: ParseError) {
        kdebug!("parser: malformed request while expecting {:?}: {}", self.expected, err);
        self.status = ParseStatus::Malformed;
        self.error = Some(err);
    }

    pub fn expected_line_type(&self) -> LineType {
        self.expected
    }

    pub fn status(&self) -> ParseStatus {
        self.status
    }

    /// Why the request is malformed, if it is.
    pub fn error(&self) -> Option<&ParseError> {
        self.error.as_ref()
    }

    pub fn is_done(&self) -> bool {
        matches!(self.status, ParseStatus::Finished | ParseStatus::Malformed)
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Hand off the request. Meaningful once the status is `Finished`.
    pub fn into_request(self) -> Request {
        self.request
    }

    /// Unconsumed bytes: after `Finished`, the start of whatever followed
    /// this request on the connection.
    pub fn leftover(&self) -> &[u8] {
        &self.carry
    }

    pub fn take_leftover(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.carry)
    }

    /// Start over with an empty request. Buffered bytes are discarded.
    pub fn reset(&mut self) {
        *self = Self::with_max_line_len(self.max_line_len);
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// RFC 9110 `tchar`.
fn is_tchar(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

fn is_token(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(is_tchar)
}

/// `HTTP/D.D`, exactly one digit on each side.
fn parse_version(s: &str) -> Option<Version> {
    let digits = s.strip_prefix("HTTP/")?.as_bytes();
    match digits {
        [major, b'.', minor] if major.is_ascii_digit() && minor.is_ascii_digit() => {
            Some(Version::new(major - b'0', minor - b'0'))
        }
        _ => None,
    }
}

/// Parse `METHOD SP URI SP HTTP/D.D CRLF` into `req`.
///
/// Separators are single spaces; method and URI must be non-empty.
pub fn parse_start_line(line: &str, req: &mut Request) -> Result<(), ParseError> {
    let line = line.strip_suffix("\r\n").ok_or(ParseError::InvalidStartLine)?;

    let mut parts = line.split(' ');
    let (method, uri, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(u), Some(v), None) => (m, u, v),
        _ => return Err(ParseError::InvalidStartLine),
    };

    if !is_token(method) {
        return Err(ParseError::InvalidStartLine);
    }
    if uri.is_empty() || uri.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ParseError::InvalidStartLine);
    }
    let version = parse_version(version).ok_or(ParseError::InvalidStartLine)?;

    req.set_method(method);
    req.set_uri(uri);
    req.set_version(version);
    Ok(())
}

/// Parse `NAME ":" OWS VALUE OWS CRLF` into `req`.
///
/// The name must be a token directly followed by the colon; whitespace
/// (space or tab) around the value is trimmed.
pub fn parse_header_line(line: &str, req: &mut Request) -> Result<(), ParseError> {
    let line = line.strip_suffix("\r\n").ok_or(ParseError::InvalidHeaderLine)?;
    let (name, value) = line.split_once(':').ok_or(ParseError::InvalidHeaderLine)?;

    if !is_token(name) {
        return Err(ParseError::InvalidHeaderLine);
    }
    let value = value.trim_matches(|c| c == ' ' || c == '\t');
    if value.chars().any(|c| c.is_control() && c != '\t') {
        return Err(ParseError::InvalidHeaderLine);
    }

    req.push_header(name, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(parser: &mut RequestParser, chunks: &[&str]) -> ParseStatus {
        let mut status = parser.status();
        for c in chunks {
            status = parser.add_chunk(c.as_bytes());
        }
        status
    }

    #[test]
    fn test_parse_start_line_valid() {
        let cases = [
            ("GET http://localhost/ HTTP/1.1\r\n", "get", "http://localhost/", Version::HTTP_11),
            ("POST http://example.com HTTP/1.0\r\n", "post", "http://example.com", Version::HTTP_10),
            ("OPTIONS * HTTP/2.0\r\n", "options", "*", Version::new(2, 0)),
        ];
        for (line, method, uri, version) in cases {
            let mut req = Request::new();
            assert_eq!(parse_start_line(line, &mut req), Ok(()), "{:?}", line);
            assert_eq!(req.method(), method);
            assert_eq!(req.uri(), uri);
            assert_eq!(req.version(), version);
        }
    }

    #[test]
    fn test_parse_start_line_invalid() {
        let cases = [
            "http://localhost\r\n",
            "http://localhost",
            "GET\r\n",
            "GET HTTP/1.1\r\n",
            "GET HTTP\r\n",
            "GET / HTTP\r\n",
            "GET  / HTTP/1.1\r\n",
            "GET\t/ HTTP/1.1\r\n",
            "GET / HTTP/1.1 \r\n",
            "GET / HTTP/11.1\r\n",
            "GET / http/1.1\r\n",
            " GET / HTTP/1.1\r\n",
        ];
        for line in cases {
            let mut req = Request::new();
            assert_eq!(
                parse_start_line(line, &mut req),
                Err(ParseError::InvalidStartLine),
                "{:?}",
                line
            );
            assert_eq!(req, Request::new());
        }
    }

    #[test]
    fn test_parse_header_line_valid() {
        let cases = [
            ("Content-Type: application/json\r\n", "Content-Type", "application/json"),
            ("Content-Type:text/plain    \r\n", "Content-Type", "text/plain"),
            ("Content-Length:    17   \r\n", "Content-Length", "17"),
            ("x-powered-by:\tmicroloop v0.9.1   \r\n", "X-Powered-By", "microloop v0.9.1"),
            ("X-Empty:\r\n", "X-Empty", ""),
        ];
        for (line, name, value) in cases {
            let mut req = Request::new();
            assert_eq!(parse_header_line(line, &mut req), Ok(()), "{:?}", line);
            assert_eq!(req.header(name), Some(value));
            assert_eq!(req.headers()[0].0, name);
        }
    }

    #[test]
    fn test_parse_header_line_invalid() {
        let cases = [
            "Content-Type : application/json\r\n",
            "Content Type: text/plain\r\n",
            "Content-Length = 17\r\n",
            " X-Powered-By: microloop\r\n",
            "\tX-Powered-By: microloop\r\n",
            ": no-name\r\n",
            "X-Bare: value",
        ];
        for line in cases {
            let mut req = Request::new();
            assert_eq!(
                parse_header_line(line, &mut req),
                Err(ParseError::InvalidHeaderLine),
                "{:?}",
                line
            );
            assert!(req.headers().is_empty());
        }
    }

    #[test]
    fn test_add_chunk_with_body() {
        let mut parser = RequestParser::new();
        assert_eq!(parser.expected_line_type(), LineType::StartLine);

        parser.add_chunk(b"POST http://www.example.com HTTP/1.1\r\n");
        assert_eq!(parser.expected_line_type(), LineType::Header);
        assert_eq!(parser.status(), ParseStatus::NoHeaders);
        assert_eq!(parser.request().method(), "post");
        assert_eq!(parser.request().version(), Version::HTTP_11);
        assert_eq!(parser.request().uri(), "http://www.example.com");

        parser.add_chunk(b"Content-Length: 7\r\n");
        assert_eq!(parser.expected_line_type(), LineType::HeaderOrCrlf);
        assert_eq!(parser.status(), ParseStatus::Ok);
        assert_eq!(parser.request().headers().len(), 1);
        assert_eq!(parser.request().header("Content-Length"), Some("7"));

        parser.add_chunk(b"\r\n");
        assert_eq!(parser.expected_line_type(), LineType::Body);
        assert_eq!(parser.status(), ParseStatus::Ok);

        parser.add_chunk(b"example");
        assert_eq!(parser.request().body_str(), Some("example"));
        assert_eq!(parser.status(), ParseStatus::Finished);
        assert_eq!(parser.expected_line_type(), LineType::End);
        assert!(parser.error().is_none());
    }

    #[test]
    fn test_byte_at_a_time() {
        let raw = "PUT /items/1 HTTP/1.1\r\nHost: example.com\r\nContent-Length: 5\r\n\r\nhello";
        let mut parser = RequestParser::new();
        for b in raw.as_bytes() {
            parser.add_chunk(std::slice::from_ref(b));
        }

        assert_eq!(parser.status(), ParseStatus::Finished);
        let req = parser.into_request();
        assert_eq!(req.method(), "put");
        assert_eq!(req.uri(), "/items/1");
        assert_eq!(req.header("host"), Some("example.com"));
        assert_eq!(req.body(), b"hello");
    }

    #[test]
    fn test_chunks_split_across_crlf_and_body() {
        let mut parser = RequestParser::new();
        let status = feed(
            &mut parser,
            &["GET / HTTP/1.1\r", "\nAccept: */*\r\nContent-Len", "gth: 4\r\n\r\nab", "cd"],
        );
        assert_eq!(status, ParseStatus::Finished);
        assert_eq!(parser.request().body(), b"abcd");
    }

    #[test]
    fn test_single_chunk_request() {
        let mut parser = RequestParser::new();
        let status = parser.add_chunk(b"GET /ping HTTP/1.0\r\nUser-Agent: test\r\n\r\n");
        assert_eq!(status, ParseStatus::Finished);
        assert_eq!(parser.expected_line_type(), LineType::End);
        assert!(parser.request().body().is_empty());
        assert!(parser.leftover().is_empty());
    }

    #[test]
    fn test_no_content_length_or_zero_finishes() {
        for headers in ["Host: a\r\n", "Content-Length: 0\r\n", "Content-Length: -3\r\n"] {
            let mut parser = RequestParser::new();
            let status = feed(&mut parser, &["GET / HTTP/1.1\r\n", headers, "\r\n"]);
            assert_eq!(status, ParseStatus::Finished, "{:?}", headers);
            assert_eq!(parser.expected_line_type(), LineType::End);
        }
    }

    #[test]
    fn test_bytes_beyond_body_are_left_over() {
        let mut parser = RequestParser::new();
        parser.add_chunk(b"POST / HTTP/1.1\r\nContent-Length: 3\r\n\r\nabcGET /next HTTP/1.1\r\n");

        assert_eq!(parser.status(), ParseStatus::Finished);
        assert_eq!(parser.request().body(), b"abc");
        assert_eq!(parser.leftover(), b"GET /next HTTP/1.1\r\n");

        let rest = parser.take_leftover();
        let mut next = RequestParser::new();
        next.add_chunk(&rest);
        assert_eq!(next.request().uri(), "/next");
    }

    #[test]
    fn test_inert_after_finished() {
        let mut parser = RequestParser::new();
        feed(&mut parser, &["GET / HTTP/1.1\r\n", "Host: a\r\n", "\r\n"]);
        let before = parser.request().clone();

        assert_eq!(parser.add_chunk(b"X-Late: 1\r\n"), ParseStatus::Finished);
        assert_eq!(parser.request(), &before);
        assert_eq!(parser.expected_line_type(), LineType::End);
    }

    #[test]
    fn test_inert_after_malformed() {
        let mut parser = RequestParser::new();
        parser.add_chunk(b"GET / HTTP/1.1\r\n");
        assert_eq!(parser.add_chunk(b"Bad Header: x\r\n"), ParseStatus::Malformed);
        assert_eq!(parser.error(), Some(&ParseError::InvalidHeaderLine));
        let state = parser.expected_line_type();

        assert_eq!(parser.add_chunk(b"Host: a\r\n\r\n"), ParseStatus::Malformed);
        assert!(parser.request().headers().is_empty());
        assert_eq!(parser.expected_line_type(), state);
    }

    #[test]
    fn test_malformed_start_line_stops_processing() {
        let mut parser = RequestParser::new();
        let status = parser.add_chunk(b"GET HTTP/1.1\r\nHost: a\r\n\r\n");
        assert_eq!(status, ParseStatus::Malformed);
        assert_eq!(parser.error(), Some(&ParseError::InvalidStartLine));
        assert_eq!(parser.expected_line_type(), LineType::StartLine);
        assert!(parser.request().headers().is_empty());
    }

    #[test]
    fn test_blank_line_before_headers() {
        let mut parser = RequestParser::new();
        let status = feed(&mut parser, &["GET / HTTP/1.1\r\n", "\r\n"]);
        assert_eq!(status, ParseStatus::Malformed);
        assert_eq!(parser.error(), Some(&ParseError::MissingHeaders));
    }

    #[test]
    fn test_invalid_utf8_line() {
        let mut parser = RequestParser::new();
        parser.add_chunk(b"GET / HTTP/1.1\r\n");
        assert_eq!(parser.add_chunk(b"X-Bin: \xff\xfe\r\n"), ParseStatus::Malformed);
        assert_eq!(parser.error(), Some(&ParseError::InvalidEncoding));
    }

    #[test]
    fn test_line_too_long() {
        let mut parser = RequestParser::with_max_line_len(32);
        parser.add_chunk(b"GET / HTTP/1.1\r\n");
        assert_eq!(parser.status(), ParseStatus::NoHeaders);

        assert_eq!(parser.add_chunk(&[b'a'; 40]), ParseStatus::Malformed);
        assert_eq!(parser.error(), Some(&ParseError::LineTooLong(32)));
    }

    #[test]
    fn test_duplicate_headers_retained() {
        let mut parser = RequestParser::new();
        feed(
            &mut parser,
            &["GET / HTTP/1.1\r\n", "Accept: a\r\n", "accept: b\r\n", "\r\n"],
        );
        let req = parser.request();
        assert_eq!(req.header("Accept"), Some("b"));
        assert_eq!(req.header_values("ACCEPT").collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_reset() {
        let mut parser = RequestParser::new();
        parser.add_chunk(b"garbage\r\n");
        assert_eq!(parser.status(), ParseStatus::Malformed);

        parser.reset();
        assert_eq!(parser.status(), ParseStatus::NoHeaders);
        assert_eq!(parser.expected_line_type(), LineType::StartLine);
        assert!(parser.error().is_none());
        assert_eq!(parser.add_chunk(b"GET / HTTP/1.1\r\n"), ParseStatus::NoHeaders);
    }
}
