//! Built-in generators: inline bodies, canned errors, static files.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use crate::http::pipeline::{Generator, SendBuf};
use crate::http::request::Req;
use crate::http::token;
use crate::util::get_filext;

/// A generator that never proceeds: everything was sent up front.
struct InlineGenerator;

impl Generator for InlineGenerator {
    fn proceed(&mut self, _req: &Req) {}
}

impl Req {
    /// Sends a complete response body in one final chunk. The body is
    /// copied into a pool-held shared entry, so the caller's buffer may be
    /// transient while the socket write still owns its hold.
    pub fn send_inline(&self, body: &[u8]) {
        let buf = self.with_state(|state| {
            if state.res.content_length.is_none() {
                state.res.content_length = Some(body.len() as u64);
            }
            state.pool.strdup(body)
        });
        self.start_response(Box::new(InlineGenerator));
        self.send(&[SendBuf::Shared(buf)], true);
    }

    /// Short-circuits with a plain-text error response.
    pub fn send_error(&self, status: u16, reason: &'static str, body: &str) {
        self.set_status(status, reason);
        self.with_state(|state| {
            let state = &mut *state;
            state.res.content_length = Some(body.len() as u64);
            state.res.headers.set(
                &state.pool,
                &token::CONTENT_TYPE,
                b"text/plain; charset=utf-8",
                true,
            );
        });
        self.send_inline(body.as_bytes());
    }

    /// Streams a file as the response body, one chunk per `proceed`. The
    /// content type comes from the context's MIME map unless `mime_type`
    /// overrides it. Returns an error if the file cannot be opened — the
    /// handler decides what failure looks like on the wire.
    pub fn send_file(
        &self,
        status: u16,
        reason: &'static str,
        path: &Path,
        mime_type: Option<&str>,
    ) -> io::Result<()> {
        let file = File::open(path)?;
        let remaining = file.metadata()?.len();

        self.set_status(status, reason);
        self.with_state(|state| {
            let state = &mut *state;
            state.res.content_length = Some(remaining);
            let mimemap = state.ctx.mimemap.clone();
            let ty = match mime_type {
                Some(ty) => ty.to_owned(),
                None => {
                    let ext = path
                        .to_str()
                        .and_then(|p| get_filext(p.as_bytes()))
                        .unwrap_or(b"");
                    mimemap.get(ext).to_owned()
                }
            };
            state
                .res
                .headers
                .set(&state.pool, &token::CONTENT_TYPE, ty.as_bytes(), true);
        });

        self.start_response(Box::new(FileGenerator { file, remaining }));
        self.proceed_response();
        Ok(())
    }
}

const FILE_CHUNK: usize = 64 * 1024;

/// Streams file contents; each `proceed` reads and sends one chunk.
struct FileGenerator {
    file: File,
    remaining: u64,
}

impl Generator for FileGenerator {
    fn proceed(&mut self, req: &Req) {
        if self.remaining == 0 {
            req.send(&[], true);
            return;
        }

        let want = FILE_CHUNK.min(self.remaining as usize);
        let mut staging = crate::mem::shared::SharedBufMut::zeroed(want);
        match self.file.read(staging.as_mut_slice()) {
            Ok(0) => {
                // Truncated under us; close out what we promised we could.
                self.remaining = 0;
                req.send(&[], true);
            }
            Ok(n) => {
                self.remaining -= n as u64;
                let chunk = staging.freeze_prefix(n);
                req.with_state(|state| state.pool.link_shared(&chunk));
                req.send(&[SendBuf::Shared(chunk)], self.remaining == 0);
            }
            Err(err) => {
                tracing::warn!(?err, "file read failed mid-response");
                self.remaining = 0;
                req.send(&[], true);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::headers::Headers;
    use crate::http::pipeline::Ostream;
    use crate::http::request::{ReqState, RequestParts};
    use crate::http::types::Version;
    use crate::mem::pool::Pool;
    use crate::server::context::Context;
    use std::cell::RefCell;
    use std::io::Write;
    use std::rc::Rc;

    struct Sink {
        bytes: Rc<RefCell<Vec<u8>>>,
        finals: Rc<RefCell<usize>>,
    }

    impl Ostream for Sink {
        fn do_send(&mut self, _req: &mut ReqState, bufs: &[SendBuf], is_final: bool) {
            let mut sink = self.bytes.borrow_mut();
            for b in bufs {
                sink.extend_from_slice(b.as_slice());
            }
            if is_final {
                *self.finals.borrow_mut() += 1;
            }
        }
    }

    fn sink_req() -> (Req, Rc<RefCell<Vec<u8>>>, Rc<RefCell<usize>>) {
        let ctx = Context::for_tests();
        let bytes = Rc::new(RefCell::new(Vec::new()));
        let finals = Rc::new(RefCell::new(0));
        let pool = Pool::new();
        let parts = RequestParts {
            authority: pool.strdup(b"x"),
            method: pool.strdup(b"GET"),
            path: pool.strdup(b"/f"),
            scheme: "http",
            version: Version::Http11,
            headers: Headers::new(),
            entity: Vec::new(),
            upgrade: None,
            http1_is_persistent: true,
            peer: None,
            pool,
        };
        let req = Req::new(
            ctx,
            parts,
            Box::new(Sink {
                bytes: bytes.clone(),
                finals: finals.clone(),
            }),
        );
        (req, bytes, finals)
    }

    #[test]
    fn send_inline_sets_length_and_finishes() {
        let (req, bytes, finals) = sink_req();
        req.send_inline(b"Hello");
        assert_eq!(&*bytes.borrow(), b"Hello");
        assert_eq!(*finals.borrow(), 1);
        assert_eq!(req.with_state(|s| s.res.content_length), Some(5));
    }

    #[test]
    fn send_error_shapes_the_response() {
        let (req, bytes, _) = sink_req();
        req.send_error(404, "Not Found", "not found");
        assert_eq!(&*bytes.borrow(), b"not found");
        req.with_state(|state| {
            assert_eq!(state.res.status, 404);
            assert_eq!(state.res.reason, "Not Found");
            assert_eq!(state.res.content_length, Some(9));
            let at = state.res.headers.find(&token::CONTENT_TYPE, None).unwrap();
            assert_eq!(
                state.res.headers.get(at).unwrap().value.as_slice(),
                b"text/plain; charset=utf-8"
            );
        });
    }

    #[test]
    fn send_file_streams_whole_content() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        let payload = vec![0x42_u8; 200_000]; // several chunks
        tmp.write_all(&payload).unwrap();

        let (req, bytes, finals) = sink_req();
        req.send_file(200, "OK", tmp.path(), Some("application/octet-stream"))
            .unwrap();
        // Pull the remaining chunks the way the loop would.
        while *finals.borrow() == 0 {
            req.proceed_response();
        }

        assert_eq!(bytes.borrow().len(), payload.len());
        assert!(bytes.borrow().iter().all(|&b| b == 0x42));
        assert_eq!(req.with_state(|s| s.res.content_length), Some(200_000));
    }

    #[test]
    fn send_file_missing_is_an_error() {
        let (req, _, _) = sink_req();
        assert!(req
            .send_file(200, "OK", Path::new("/nonexistent/definitely"), None)
            .is_err());
    }
}
