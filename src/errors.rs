use std::{error, fmt, io};

/// Protocol-level failures detected by the driver before a request object
/// exists. Each maps to a canned short-circuit response followed by
/// connection close.
#[derive(Debug, PartialEq)]
pub(crate) enum ErrorKind {
    BadRequest,
    HeadTooLarge,
    PayloadTooLarge,
    UnsupportedVersion,
    UnsupportedProtocol,
    ServiceUnavailable,
    Io(IoError),
}

macro_rules! http_errors {
    ($($name:ident: $status_line:expr, $len:literal => $body:literal; )*) => {
        pub(crate) const fn as_http(&self) -> &'static [u8] {
            match self { $(
                Self::$name { .. } => concat!(
                    "HTTP/1.1 ", $status_line, "\r\n",
                    "Connection: close\r\n",
                    "Content-Length: ", $len, "\r\n",
                    "Content-Type: text/plain; charset=utf-8\r\n",
                    "\r\n",
                    $body
                ),
            )* }.as_bytes()
        }
    };
}

impl ErrorKind {
    http_errors! {
        BadRequest: "400 Bad Request", "11" => "bad request";
        HeadTooLarge: "431 Request Header Fields Too Large", "23" => "header fields too large";
        PayloadTooLarge: "413 Payload Too Large", "17" => "payload too large";
        UnsupportedVersion: "505 HTTP Version Not Supported", "19" => "unsupported version";
        UnsupportedProtocol: "505 HTTP Version Not Supported", "20" => "unsupported protocol";
        ServiceUnavailable: "503 Service Unavailable", "19" => "service unavailable";
        Io: "503 Service Unavailable", "19" => "service unavailable";
    }
}

impl error::Error for ErrorKind {}
impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<io::Error> for ErrorKind {
    fn from(err: io::Error) -> Self {
        ErrorKind::Io(IoError(err))
    }
}

#[derive(Debug)]
pub(crate) struct IoError(pub(crate) io::Error);

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}
