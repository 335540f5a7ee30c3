//! The request being assembled by the parser.

use core::fmt;

/// HTTP protocol version, one digit each.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    pub const HTTP_10: Version = Version { major: 1, minor: 0 };
    pub const HTTP_11: Version = Version { major: 1, minor: 1 };

    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP/{}.{}", self.major, self.minor)
    }
}

/// Title-Case each hyphen-separated segment: `x-powered-by` → `X-Powered-By`.
pub fn canonicalize_field_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (i, segment) in name.split('-').enumerate() {
        if i > 0 {
            out.push('-');
        }
        let mut chars = segment.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.extend(chars.flat_map(char::to_lowercase));
        }
    }
    out
}

/// An HTTP request under construction.
///
/// Headers keep arrival order and duplicates. Single-value lookup returns
/// the last occurrence; `header_values` returns all of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    method: String,
    uri: String,
    version: Version,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lower-cased method token.
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Case-insensitive lookup; the last occurrence wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `name`, in arrival order.
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All headers as (canonical name, value), in arrival order.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// `Content-Length` as a non-negative integer, if present and valid.
    pub fn content_length(&self) -> Option<usize> {
        let value = self.header("Content-Length")?;
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        value.parse().ok()
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body as text, if it is valid UTF-8.
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    pub(crate) fn set_method(&mut self, method: &str) {
        self.method = method.to_ascii_lowercase();
    }

    pub(crate) fn set_uri(&mut self, uri: &str) {
        self.uri = uri.to_string();
    }

    pub(crate) fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub(crate) fn push_header(&mut self, name: &str, value: &str) {
        self.headers.push((canonicalize_field_name(name), value.to_string()));
    }

    pub(crate) fn extend_body(&mut self, bytes: &[u8]) {
        self.body.extend_from_slice(bytes);
    }

    pub(crate) fn reserve_body(&mut self, additional: usize) {
        self.body.reserve(additional);
    }
}
