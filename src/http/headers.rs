//! Ordered multimap of header name/value pairs.
//!
//! Names are either interned tokens (preferred) or arena strings; values are
//! always arena strings. Lookup is a linear scan resumable from a cursor so
//! repeated headers can be enumerated in insertion order.

use crate::http::token::{self, Token};
use crate::mem::pool::Pool;
use crate::mem::shared::SharedBytes;

#[derive(Clone, Debug)]
pub enum HeaderName {
    Token(&'static Token),
    Custom(SharedBytes),
}

impl HeaderName {
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Token(t) => t.name.as_bytes(),
            Self::Custom(s) => s.as_slice(),
        }
    }

    #[inline]
    pub fn token(&self) -> Option<&'static Token> {
        match self {
            Self::Token(t) => Some(t),
            Self::Custom(_) => None,
        }
    }

    /// ASCII case-insensitive name match.
    #[inline]
    pub fn is(&self, name: &[u8]) -> bool {
        self.as_bytes().eq_ignore_ascii_case(name)
    }
}

#[derive(Clone, Debug)]
pub struct Header {
    pub name: HeaderName,
    pub value: SharedBytes,
}

/// Fields diverted out of the header list during [`Headers::init`]:
/// `Connection`, `Host` and `Upgrade` are copied aside instead of appended,
/// and the position of `Content-Length` is reported so the caller can parse
/// the entity length.
#[derive(Default)]
pub struct HeaderScan {
    pub connection: Option<SharedBytes>,
    pub host: Option<SharedBytes>,
    pub upgrade: Option<SharedBytes>,
    /// Index of the `Content-Length` entry in the resulting list, if seen.
    pub content_length_at: Option<usize>,
}

#[derive(Default)]
pub struct Headers {
    entries: Vec<Header>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a header list from a parsed raw header array, tokenizing names
    /// and copying values into the pool.
    pub fn init(pool: &Pool, src: &[httparse::Header<'_>]) -> (Self, HeaderScan) {
        let mut headers = Self::new();
        let mut scan = HeaderScan::default();

        for raw in src {
            let name = raw.name.as_bytes();
            if let Some(tok) = token::lookup_token(name) {
                if Token::same(tok, &token::CONNECTION) {
                    scan.connection = Some(pool.strdup(raw.value));
                    continue;
                }
                if Token::same(tok, &token::HOST) {
                    scan.host = Some(pool.strdup(raw.value));
                    continue;
                }
                if Token::same(tok, &token::UPGRADE) {
                    scan.upgrade = Some(pool.strdup(raw.value));
                    continue;
                }
                if Token::same(tok, &token::CONTENT_LENGTH) {
                    scan.content_length_at = Some(headers.entries.len());
                }
                headers.add(pool, tok, raw.value);
            } else {
                headers.add_by_str(pool, name, raw.value);
            }
        }

        (headers, scan)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&Header> {
        self.entries.get(index)
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.entries.iter()
    }

    /// Finds the next occurrence of `tok` after `cursor` (`None` starts from
    /// the beginning). Token identity is the fast path; names that were not
    /// tokenized can never match a token.
    pub fn find(&self, tok: &'static Token, cursor: Option<usize>) -> Option<usize> {
        let start = cursor.map_or(0, |c| c + 1);
        self.entries[start..]
            .iter()
            .position(|h| h.name.token().is_some_and(|t| Token::same(t, tok)))
            .map(|i| start + i)
    }

    /// Like [`Headers::find`], with an ASCII case-insensitive name compare.
    pub fn find_by_str(&self, name: &[u8], cursor: Option<usize>) -> Option<usize> {
        let start = cursor.map_or(0, |c| c + 1);
        self.entries[start..]
            .iter()
            .position(|h| h.name.is(name))
            .map(|i| start + i)
    }

    /// Appends a tokenized header; the value is copied into the pool.
    pub fn add(&mut self, pool: &Pool, tok: &'static Token, value: &[u8]) {
        self.entries.push(Header {
            name: HeaderName::Token(tok),
            value: pool.strdup(value),
        });
    }

    /// Appends a header by raw name, tokenizing when possible.
    pub fn add_by_str(&mut self, pool: &Pool, name: &[u8], value: &[u8]) {
        let name = match token::lookup_token(name) {
            Some(tok) => HeaderName::Token(tok),
            None => HeaderName::Custom(pool.strdup(name)),
        };
        self.entries.push(Header {
            name,
            value: pool.strdup(value),
        });
    }

    /// Overwrites the last occurrence of `tok` if present (and
    /// `overwrite_if_exists`), otherwise appends.
    pub fn set(&mut self, pool: &Pool, tok: &'static Token, value: &[u8], overwrite_if_exists: bool) {
        let mut last = None;
        let mut cursor = None;
        while let Some(i) = self.find(tok, cursor) {
            last = Some(i);
            cursor = Some(i);
        }
        match last {
            Some(i) if overwrite_if_exists => self.entries[i].value = pool.strdup(value),
            Some(_) => {}
            None => self.add(pool, tok, value),
        }
    }

    /// `set` by raw name.
    pub fn set_by_str(&mut self, pool: &Pool, name: &[u8], value: &[u8], overwrite_if_exists: bool) {
        let mut last = None;
        let mut cursor = None;
        while let Some(i) = self.find_by_str(name, cursor) {
            last = Some(i);
            cursor = Some(i);
        }
        match last {
            Some(i) if overwrite_if_exists => self.entries[i].value = pool.strdup(value),
            Some(_) => {}
            None => self.add_by_str(pool, name, value),
        }
    }

    /// Removes the entry at `cursor`, shifting the tail left. Returns the
    /// cursor to resume a [`Headers::find`] iteration from (`None` restarts
    /// at the beginning).
    pub fn delete(&mut self, cursor: usize) -> Option<usize> {
        self.entries.remove(cursor);
        cursor.checked_sub(1)
    }

    /// Appends the wire form `Name: value\r\n…` to `out`; tokenized names
    /// use their canonical casing.
    pub fn write_wire(&self, out: &mut Vec<u8>) {
        for h in &self.entries {
            out.extend_from_slice(h.name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(h.value.as_slice());
            out.extend_from_slice(b"\r\n");
        }
    }

    /// Wire form as a pool-held arena string.
    pub fn flatten(&self, pool: &Pool) -> SharedBytes {
        let mut out = Vec::new();
        self.write_wire(&mut out);
        let flat = SharedBytes::from_vec(out);
        pool.link_shared(&flat);
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::token::{CONTENT_LENGTH, CONTENT_TYPE, COOKIE};

    fn raw<'a>(name: &'a str, value: &'a [u8]) -> httparse::Header<'a> {
        httparse::Header { name, value }
    }

    #[test]
    fn init_diverts_connection_host_upgrade() {
        let pool = Pool::new();
        let src = [
            raw("Host", b"example.com"),
            raw("Connection", b"keep-alive"),
            raw("content-length", b"5"),
            raw("Upgrade", b"h2c"),
            raw("X-Custom", b"1"),
        ];
        let (headers, scan) = Headers::init(&pool, &src);

        assert_eq!(scan.host.unwrap().as_slice(), b"example.com");
        assert_eq!(scan.connection.unwrap().as_slice(), b"keep-alive");
        assert_eq!(scan.upgrade.unwrap().as_slice(), b"h2c");
        assert_eq!(scan.content_length_at, Some(0));

        // Only Content-Length and X-Custom were appended.
        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get(0).unwrap().value.as_slice(), b"5");
        assert!(headers.find(&CONTENT_LENGTH, None).is_some());
        assert!(headers.find_by_str(b"x-custom", None).is_some());
    }

    #[test]
    fn cursor_enumerates_repeats_in_order() {
        let pool = Pool::new();
        let mut headers = Headers::new();
        headers.add(&pool, &COOKIE, b"a=1");
        headers.add(&pool, &CONTENT_TYPE, b"text/plain");
        headers.add(&pool, &COOKIE, b"b=2");

        let first = headers.find(&COOKIE, None).unwrap();
        assert_eq!(headers.get(first).unwrap().value.as_slice(), b"a=1");
        let second = headers.find(&COOKIE, Some(first)).unwrap();
        assert_eq!(headers.get(second).unwrap().value.as_slice(), b"b=2");
        assert_eq!(headers.find(&COOKIE, Some(second)), None);
    }

    #[test]
    fn set_overwrites_last_occurrence() {
        let pool = Pool::new();
        let mut headers = Headers::new();
        headers.add(&pool, &CONTENT_TYPE, b"text/plain");
        headers.set(&pool, &CONTENT_TYPE, b"text/html", true);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get(0).unwrap().value.as_slice(), b"text/html");

        headers.set(&pool, &CONTENT_TYPE, b"image/png", false);
        assert_eq!(headers.get(0).unwrap().value.as_slice(), b"text/html");

        headers.set(&pool, &COOKIE, b"a=1", false);
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn delete_resumes_iteration() {
        let pool = Pool::new();
        let mut headers = Headers::new();
        headers.add(&pool, &COOKIE, b"a=1");
        headers.add(&pool, &COOKIE, b"b=2");
        headers.add(&pool, &COOKIE, b"c=3");

        let first = headers.find(&COOKIE, None).unwrap();
        let cursor = headers.delete(first);
        let next = headers.find(&COOKIE, cursor).unwrap();
        assert_eq!(headers.get(next).unwrap().value.as_slice(), b"b=2");
    }

    #[test]
    fn flatten_uses_canonical_casing() {
        let pool = Pool::new();
        let mut headers = Headers::new();
        headers.add_by_str(&pool, b"content-type", b"text/plain");
        headers.add_by_str(&pool, b"x-weird", b"1");

        let flat = headers.flatten(&pool);
        assert_eq!(
            flat.as_slice(),
            b"Content-Type: text/plain\r\nx-weird: 1\r\n".as_slice()
        );
    }

    #[test]
    fn flatten_reparses_to_equal_list() {
        let pool = Pool::new();
        let src = [
            raw("content-type", b"text/plain"),
            raw("cookie", b"a=1"),
            raw("cookie", b"b=2"),
        ];
        let (headers, _) = Headers::init(&pool, &src);
        let flat = headers.flatten(&pool);

        // Reparse the wire form and compare modulo name casing.
        let lines: Vec<&[u8]> = flat
            .as_slice()
            .split(|&b| b == b'\n')
            .filter(|l| !l.is_empty())
            .collect();
        assert_eq!(lines.len(), headers.len());
        for (line, h) in lines.iter().zip(headers.iter()) {
            let colon = line.iter().position(|&b| b == b':').unwrap();
            assert!(h.name.is(&line[..colon]));
            assert_eq!(&line[colon + 2..line.len() - 1], h.value.as_slice());
        }
    }
}
