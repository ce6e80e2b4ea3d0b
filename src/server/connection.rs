//! HTTP/1 protocol driver: parses requests off the socket, builds request
//! objects, and serializes pipeline output back onto the wire.
//!
//! The driver owns the connection task. The pipeline side is synchronous —
//! the tail emitter queues serialized bytes on the connection outbox — and
//! the task flushes the outbox, pulling the generator after each drain so
//! production stays paced by the socket.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::errors::ErrorKind;
use crate::http::headers::Headers;
use crate::http::pipeline::{Ostream, SendBuf};
use crate::http::request::{Req, ReqState, RequestParts};
use crate::http::types::{slice_to_usize, Version};
use crate::mem::pool::Pool;
use crate::mem::shared::SharedBytes;
use crate::server::context::Context;
use crate::server::socket::Socket;
use crate::util::contains_token;

const HTTP2_PREFACE_HEAD: &[u8] = b"PRI * HTTP/2.0";

/// State shared between the connection task and the tail emitter.
pub(crate) struct ConnShared {
    outbox: RefCell<VecDeque<SendBuf>>,
    final_queued: Cell<bool>,
    aborted: Cell<bool>,
    notify: tokio::sync::Notify,
}

impl ConnShared {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self {
            outbox: RefCell::new(VecDeque::new()),
            final_queued: Cell::new(false),
            aborted: Cell::new(false),
            notify: tokio::sync::Notify::new(),
        })
    }

    pub(crate) fn abort(&self) {
        self.aborted.set(true);
        self.notify.notify_one();
    }

    fn reset(&self) {
        self.outbox.borrow_mut().clear();
        self.final_queued.set(false);
        self.aborted.set(false);
    }

    fn take_outbox(&self) -> Vec<SendBuf> {
        self.outbox.borrow_mut().drain(..).collect()
    }

    fn outbox_is_empty(&self) -> bool {
        self.outbox.borrow().is_empty()
    }
}

/// The pipeline tail: serializes the status line and headers once, then
/// forwards body slices to the connection outbox.
struct Http1Emitter {
    conn: Rc<ConnShared>,
    sent_head: bool,
    is_head_request: bool,
}

impl Ostream for Http1Emitter {
    fn do_send(&mut self, req: &mut ReqState, bufs: &[SendBuf], is_final: bool) {
        if self.conn.aborted.get() {
            return;
        }

        {
            let mut outbox = self.conn.outbox.borrow_mut();
            if !self.sent_head {
                self.sent_head = true;
                outbox.push_back(SendBuf::Shared(build_head(req)));
            }
            if !self.is_head_request {
                for buf in bufs {
                    req.bytes_sent += buf.len() as u64;
                    outbox.push_back(buf.clone());
                }
            }
        }

        if is_final {
            req.unlink_timeout();
            self.conn.final_queued.set(true);
        } else {
            // Still streaming: move the request timeout to the wheel tail so
            // only a generator that goes quiet gets aborted.
            let conn = self.conn.clone();
            req.relink_timeout(Box::new(move || {
                warn!("request timed out mid-stream");
                conn.abort();
            }));
        }
        self.conn.notify.notify_one();
    }
}

/// Serializes the response head. `Date` and `Server` come from the context;
/// `Content-Length` is emitted when known (otherwise the chunked filter has
/// already injected its `Transfer-Encoding` into the header list).
fn build_head(req: &mut ReqState) -> SharedBytes {
    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(req.version.as_bytes());
    out.push(b' ');
    out.extend_from_slice(req.res.status.to_string().as_bytes());
    out.push(b' ');
    out.extend_from_slice(req.res.reason.as_bytes());
    out.extend_from_slice(b"\r\n");

    let ts = match &req.processed_at {
        Some(ts) => ts.str.clone(),
        None => req.ctx.get_timestamp().str,
    };
    out.extend_from_slice(b"Date: ");
    out.extend_from_slice(ts.rfc1123.as_bytes());
    out.extend_from_slice(b"\r\nServer: ");
    out.extend_from_slice(req.ctx.server_name.as_bytes());
    out.extend_from_slice(b"\r\n");

    if let Some(len) = req.res.content_length {
        out.extend_from_slice(b"Content-Length: ");
        out.extend_from_slice(len.to_string().as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    if !req.http1_is_persistent {
        out.extend_from_slice(b"Connection: close\r\n");
    } else if req.version == Version::Http10 {
        out.extend_from_slice(b"Connection: keep-alive\r\n");
    }

    req.res.headers.write_wire(&mut out);
    out.extend_from_slice(b"\r\n");

    let head = SharedBytes::from_vec(out);
    req.pool.link_shared(&head);
    head
}

pub(crate) struct HttpConnection {
    ctx: Rc<Context>,
    sock: Socket,
    conn: Rc<ConnShared>,
}

impl HttpConnection {
    pub(crate) fn new(ctx: Rc<Context>, sock: Socket) -> Self {
        Self {
            ctx,
            sock,
            conn: ConnShared::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            match self.one_request().await {
                Ok(true) => continue,
                Ok(false) => break,
                Err(ErrorKind::Io(err)) => {
                    debug!(err = ?err.0, "connection i/o error");
                    break;
                }
                Err(err) => {
                    debug!(?err, "protocol error");
                    let _ = self
                        .sock
                        .write_bufs(&[SendBuf::Static(err.as_http())])
                        .await;
                    break;
                }
            }
        }
        self.sock.shutdown().await;
    }

    /// Runs one request/response exchange. `Ok(true)` means keep-alive may
    /// continue on this connection.
    async fn one_request(&mut self) -> Result<bool, ErrorKind> {
        let Some(parts) = self.read_request().await? else {
            return Ok(false); // clean EOF between requests
        };

        self.conn.reset();
        let is_head_request = parts.method.as_slice() == b"HEAD".as_slice();
        let req = Req::new(
            self.ctx.clone(),
            parts,
            Box::new(Http1Emitter {
                conn: self.conn.clone(),
                sent_head: false,
                is_head_request,
            }),
        );

        // Arm the request timeout before the handler runs; a handler that
        // never produces a chunk is aborted by the wheel (the emitter
        // re-links the entry on every chunk).
        {
            let conn = self.conn.clone();
            req.with_state(|state| {
                state.relink_timeout(Box::new(move || {
                    warn!("request timed out before first chunk");
                    conn.abort();
                }));
            });
        }

        self.ctx.process_request(&req);
        let completed = self.drive_response(&req).await;
        let persistent = req.with_state(|state| state.http1_is_persistent);
        req.dispose();

        Ok(completed && persistent)
    }

    /// Flushes the outbox until the final chunk is on the wire, pulling the
    /// generator after each drain and sleeping on the notify when the
    /// pipeline has nothing queued.
    async fn drive_response(&mut self, req: &Req) -> bool {
        loop {
            if self.conn.aborted.get() {
                return false;
            }

            let batch = self.conn.take_outbox();
            if !batch.is_empty() {
                if let Err(err) = self.sock.write_bufs(&batch).await {
                    debug!(?err, "response write failed");
                    self.conn.abort();
                    return false;
                }
                // Write acknowledged; the batch drops here, releasing the
                // socket's holds on the shared entries.
                drop(batch);

                if !self.conn.final_queued.get() && self.conn.outbox_is_empty() {
                    req.proceed_response();
                }
                continue;
            }

            if self.conn.final_queued.get() {
                return true;
            }
            self.conn.notify.notified().await;
        }
    }

    /// Reads until a complete request head (plus entity, if declared) is
    /// buffered. `Ok(None)` is a clean EOF before any request bytes.
    async fn read_request(&mut self) -> Result<Option<RequestParts>, ErrorKind> {
        loop {
            let head = self.sock.input.bytes();
            if head.len() >= HTTP2_PREFACE_HEAD.len()
                && &head[..HTTP2_PREFACE_HEAD.len()] == HTTP2_PREFACE_HEAD
            {
                // HTTP/2 framing belongs to an external protocol driver.
                return Err(ErrorKind::UnsupportedProtocol);
            }

            if let Some((head_len, content_length, parts)) = self.try_parse_head()? {
                return self
                    .read_entity(head_len, content_length, parts)
                    .await
                    .map(Some);
            }

            if self.sock.input.len() > self.ctx.req_limits.max_head_size {
                return Err(ErrorKind::HeadTooLarge);
            }
            if self.read_with_timeout().await? == 0 {
                if self.sock.input.is_empty() {
                    return Ok(None);
                }
                return Err(ErrorKind::BadRequest); // truncated head
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn try_parse_head(&self) -> Result<Option<(usize, Option<usize>, RequestParts)>, ErrorKind> {
        let mut header_buf = vec![httparse::EMPTY_HEADER; self.ctx.req_limits.max_headers];
        let mut parsed = httparse::Request::new(&mut header_buf);
        let head_len = match parsed.parse(self.sock.input.bytes()) {
            Ok(httparse::Status::Complete(n)) => n,
            Ok(httparse::Status::Partial) => return Ok(None),
            Err(httparse::Error::TooManyHeaders) => return Err(ErrorKind::HeadTooLarge),
            Err(httparse::Error::Version) => return Err(ErrorKind::UnsupportedVersion),
            Err(err) => {
                debug!(?err, "request head parse failed");
                return Err(ErrorKind::BadRequest);
            }
        };

        let version = Version::from_minor(parsed.version.unwrap_or(1));
        let pool = Pool::new();
        let (headers, scan) = Headers::init(&pool, &*parsed.headers);

        let content_length = match scan.content_length_at {
            Some(at) => {
                let raw = &headers.get(at).expect("scan cursor is in range").value;
                Some(slice_to_usize(raw).ok_or(ErrorKind::BadRequest)?)
            }
            None => None,
        };

        let http1_is_persistent = match (&scan.connection, version) {
            (Some(conn), Version::Http11) => !contains_token(conn.as_slice(), b"close"),
            (None, Version::Http11) => true,
            (Some(conn), Version::Http10) => contains_token(conn.as_slice(), b"keep-alive"),
            (None, Version::Http10) => false,
        };

        let scheme = if self.sock.is_encrypted() { "https" } else { "http" };
        let parts = RequestParts {
            authority: match &scan.host {
                Some(host) => host.clone(),
                None => pool.strdup(b""),
            },
            method: pool.strdup(parsed.method.unwrap_or("").as_bytes()),
            path: pool.strdup(parsed.path.unwrap_or("/").as_bytes()),
            scheme,
            version,
            headers,
            entity: Vec::new(),
            upgrade: scan.upgrade,
            http1_is_persistent,
            peer: self.sock.peer_addr(),
            pool,
        };

        Ok(Some((head_len, content_length, parts)))
    }

    /// Buffers the declared entity, copies it into the request pool, and
    /// consumes the wire bytes so the next pipelined request can parse.
    async fn read_entity(
        &mut self,
        head_len: usize,
        content_length: Option<usize>,
        mut parts: RequestParts,
    ) -> Result<RequestParts, ErrorKind> {
        let Some(len) = content_length else {
            self.sock.input.consume(head_len);
            return Ok(parts);
        };

        if len > self.ctx.req_limits.max_request_entity_size {
            return Err(ErrorKind::PayloadTooLarge);
        }
        while self.sock.input.len() < head_len + len {
            if self.read_with_timeout().await? == 0 {
                return Err(ErrorKind::BadRequest); // truncated entity
            }
        }

        let body = parts
            .pool
            .strdup(&self.sock.input.bytes()[head_len..head_len + len]);
        parts.entity.push(body);
        self.sock.input.consume(head_len + len);
        Ok(parts)
    }

    async fn read_with_timeout(&mut self) -> Result<usize, ErrorKind> {
        tokio::select! {
            biased;

            read = self.sock.read_some() => Ok(read?),
            _ = sleep(self.ctx.conn_limits.socket_read_timeout) => {
                Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "read timeout").into())
            }
        }
    }
}
