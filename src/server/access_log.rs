//! Combined-format access log.
//!
//! An external collaborator shared between loop contexts, so it serializes
//! internally; the core itself stays mutex-free.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

use crate::http::request::ReqState;

pub struct AccessLog {
    out: Mutex<Box<dyn Write + Send>>,
}

impl AccessLog {
    /// Opens (appending) a log file.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::to_writer(Box::new(file)))
    }

    /// Logs into an arbitrary writer; stderr, a pipe, a test buffer.
    pub fn to_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    /// One line per disposed request:
    /// `peer - - [02/Aug/2026:10:00:00 +0000] "GET /path HTTP/1.1" 200 5`
    pub(crate) fn log(&self, req: &ReqState) {
        let peer = req
            .peer
            .map_or_else(|| "-".to_owned(), |addr| addr.ip().to_string());
        let when = req
            .processed_at
            .as_ref()
            .map_or("-", |ts| ts.str.log.as_str());

        let line = format!(
            "{} - - [{}] \"{} {} {}\" {} {}\n",
            peer,
            when,
            String::from_utf8_lossy(&req.method),
            String::from_utf8_lossy(&req.path),
            String::from_utf8_lossy(req.version.as_bytes()),
            req.res.status,
            req.bytes_sent,
        );

        if let Ok(mut out) = self.out.lock() {
            let _ = out.write_all(line.as_bytes());
            let _ = out.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};

    use crate::http::headers::Headers;
    use crate::http::pipeline::{Ostream, SendBuf};
    use crate::http::request::{Req, RequestParts};
    use crate::http::types::Version;
    use crate::mem::pool::Pool;
    use crate::server::context::{Context, ContextSeed, Handler};

    #[derive(Clone)]
    struct SharedSink(Arc<StdMutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct NullTail;
    impl Ostream for NullTail {
        fn do_send(&mut self, _req: &mut ReqState, _bufs: &[SendBuf], _is_final: bool) {}
    }

    struct Nop;
    impl Handler for Nop {
        fn handle(&self, _req: &Req) {}
    }

    #[test]
    fn one_line_per_disposed_request() {
        let sink = SharedSink(Arc::new(StdMutex::new(Vec::new())));
        let ctx = Context::new(ContextSeed {
            handler: Arc::new(Nop),
            server_name: Arc::from("test"),
            conn_limits: Default::default(),
            req_limits: Default::default(),
            filters: Vec::new(),
            mimemap: Arc::new(crate::http::mime::MimeMap::default()),
            access_log: Some(Arc::new(AccessLog::to_writer(Box::new(sink.clone())))),
            tls: None,
        });

        let pool = Pool::new();
        let parts = RequestParts {
            authority: pool.strdup(b"x"),
            method: pool.strdup(b"GET"),
            path: pool.strdup(b"/logged"),
            scheme: "http",
            version: Version::Http11,
            headers: Headers::new(),
            entity: Vec::new(),
            upgrade: None,
            http1_is_persistent: true,
            peer: Some("127.0.0.1:4321".parse().unwrap()),
            pool,
        };
        let req = Req::new(ctx.clone(), parts, Box::new(NullTail));
        req.with_state(|state| {
            state.processed_at = Some(ctx.get_timestamp());
            state.res.status = 200;
            state.bytes_sent = 5;
        });
        req.dispose();

        let line = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
        assert!(line.starts_with("127.0.0.1 - - ["), "{line}");
        assert!(line.contains("] \"GET /logged HTTP/1.1\" 200 5\n"), "{line}");
    }
}

