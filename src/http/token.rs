//! Static interned registry of well-known header names.
//!
//! Tokens are process-wide, init-once, read-only. Pointer identity of a
//! `&'static Token` is a legal equality fast path. The HPACK static-table
//! name index is carried for the HTTP/2 driver collaborator; zero means the
//! name has no static-table slot.

/// An interned header name with canonical display casing.
pub struct Token {
    /// Canonical wire casing, e.g. `Content-Length`.
    pub name: &'static str,
    /// HPACK static table name index (RFC 7541, Appendix A); 0 if none.
    pub http2_static_index: u32,
}

impl Token {
    /// Pointer-identity equality; the table holds one instance per name.
    #[inline]
    pub fn same(a: &'static Token, b: &'static Token) -> bool {
        std::ptr::eq(a, b)
    }

    /// Case-insensitive match against a raw name.
    #[inline]
    pub fn is(&self, name: &[u8]) -> bool {
        self.name.as_bytes().eq_ignore_ascii_case(name)
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Token({})", self.name)
    }
}

macro_rules! tokens {
    ($($ident:ident => $name:literal, $h2:literal;)*) => {
        $(
            pub static $ident: Token = Token {
                name: $name,
                http2_static_index: $h2,
            };
        )*

        static TOKENS: &[&Token] = &[$(&$ident),*];
    };
}

tokens! {
    AUTHORITY => ":authority", 1;
    METHOD => ":method", 2;
    PATH => ":path", 4;
    SCHEME => ":scheme", 6;
    STATUS => ":status", 8;
    ACCEPT_CHARSET => "Accept-Charset", 15;
    ACCEPT_ENCODING => "Accept-Encoding", 16;
    ACCEPT_LANGUAGE => "Accept-Language", 17;
    ACCEPT_RANGES => "Accept-Ranges", 18;
    ACCEPT => "Accept", 19;
    ACCESS_CONTROL_ALLOW_ORIGIN => "Access-Control-Allow-Origin", 20;
    AGE => "Age", 21;
    ALLOW => "Allow", 22;
    AUTHORIZATION => "Authorization", 23;
    CACHE_CONTROL => "Cache-Control", 24;
    CONNECTION => "Connection", 0;
    CONTENT_DISPOSITION => "Content-Disposition", 25;
    CONTENT_ENCODING => "Content-Encoding", 26;
    CONTENT_LANGUAGE => "Content-Language", 27;
    CONTENT_LENGTH => "Content-Length", 28;
    CONTENT_LOCATION => "Content-Location", 29;
    CONTENT_RANGE => "Content-Range", 30;
    CONTENT_TYPE => "Content-Type", 31;
    COOKIE => "Cookie", 32;
    DATE => "Date", 33;
    ETAG => "Etag", 34;
    EXPECT => "Expect", 35;
    EXPIRES => "Expires", 36;
    FROM => "From", 37;
    HOST => "Host", 38;
    IF_MATCH => "If-Match", 39;
    IF_MODIFIED_SINCE => "If-Modified-Since", 40;
    IF_NONE_MATCH => "If-None-Match", 41;
    IF_RANGE => "If-Range", 42;
    IF_UNMODIFIED_SINCE => "If-Unmodified-Since", 43;
    KEEP_ALIVE => "Keep-Alive", 0;
    LAST_MODIFIED => "Last-Modified", 44;
    LINK => "Link", 45;
    LOCATION => "Location", 46;
    MAX_FORWARDS => "Max-Forwards", 47;
    PROXY_AUTHENTICATE => "Proxy-Authenticate", 48;
    PROXY_AUTHORIZATION => "Proxy-Authorization", 49;
    RANGE => "Range", 50;
    REFERER => "Referer", 51;
    REFRESH => "Refresh", 52;
    RETRY_AFTER => "Retry-After", 53;
    SERVER => "Server", 54;
    SET_COOKIE => "Set-Cookie", 55;
    STRICT_TRANSPORT_SECURITY => "Strict-Transport-Security", 56;
    TE => "Te", 0;
    TRANSFER_ENCODING => "Transfer-Encoding", 57;
    UPGRADE => "Upgrade", 0;
    USER_AGENT => "User-Agent", 58;
    VARY => "Vary", 59;
    VIA => "Via", 60;
    WWW_AUTHENTICATE => "Www-Authenticate", 61;
}

/// Looks up the canonical token for a raw header name, case-insensitively.
pub fn lookup_token(name: &[u8]) -> Option<&'static Token> {
    TOKENS
        .iter()
        .copied()
        .find(|t| t.name.len() == name.len() && t.is(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        assert!(Token::same(lookup_token(b"content-length").unwrap(), &CONTENT_LENGTH));
        assert!(Token::same(lookup_token(b"CONTENT-LENGTH").unwrap(), &CONTENT_LENGTH));
        assert!(Token::same(lookup_token(b"CoNNecTion").unwrap(), &CONNECTION));
        assert!(lookup_token(b"x-no-such-header").is_none());
    }

    #[test]
    fn identity_is_equality() {
        let a = lookup_token(b"cookie").unwrap();
        let b = lookup_token(b"Cookie").unwrap();
        assert!(Token::same(a, b));
        assert!(!Token::same(a, &SET_COOKIE));
    }

    #[test]
    fn static_table_indexes() {
        assert_eq!(CONTENT_LENGTH.http2_static_index, 28);
        assert_eq!(SERVER.http2_static_index, 54);
        assert_eq!(CONNECTION.http2_static_index, 0);
    }
}
