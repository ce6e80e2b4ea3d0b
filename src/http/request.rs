//! The per-request object: parsed request, response state, pipeline, arena.
//!
//! A [`Req`] is a cheap handle cloned into timeout and deferred-task
//! callbacks. The inner state is split in two cells — request/response
//! fields on one side, the pipeline on the other — so an ostream can mutate
//! headers or schedule work while the chain is being walked.
//!
//! Lifecycle: the protocol driver builds the request after parsing,
//! [`Context::process_request`](crate::server::context::Context::process_request)
//! runs the handler, and the driver disposes it once the final chunk is
//! acknowledged by the socket. Disposing clears the arena — the single point
//! where all per-request memory is reclaimed.

use std::borrow::Cow;
use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::{Rc, Weak};

use crate::http::headers::Headers;
use crate::http::pipeline::{Chain, Generator, Ostream, Pipe, SendBuf};
use crate::http::timestamp::Timestamp;
use crate::http::token::Token;
use crate::http::types::Version;
use crate::mem::pool::Pool;
use crate::mem::shared::SharedBytes;
use crate::server::context::Context;
use crate::server::timeout::TimeoutEntry;

/// Response status fields; headers are injected by the handler and by
/// filters at `start_response`.
pub struct Res {
    pub status: u16,
    pub reason: Cow<'static, str>,
    /// `None` means unknown — the chunked filter takes over on HTTP/1.1.
    pub content_length: Option<u64>,
    pub headers: Headers,
}

impl Res {
    fn new() -> Self {
        Self {
            status: 200,
            reason: Cow::Borrowed("OK"),
            content_length: None,
            headers: Headers::new(),
        }
    }
}

/// Parsed-request and response state, owning the per-request arena.
pub struct ReqState {
    pub(crate) ctx: Rc<Context>,
    pub(crate) weak: Weak<ReqInner>,
    pub pool: Pool,

    // the request
    pub authority: SharedBytes,
    pub method: SharedBytes,
    pub path: SharedBytes,
    pub scheme: &'static str,
    pub version: Version,
    pub headers: Headers,
    pub entity: Vec<SharedBytes>,
    pub upgrade: Option<SharedBytes>,
    pub processed_at: Option<Timestamp>,
    pub peer: Option<SocketAddr>,

    // the response
    pub res: Res,
    pub bytes_sent: u64,
    pub http1_is_persistent: bool,

    pub(crate) timeout: Option<TimeoutEntry>,
    pub(crate) disposed: bool,
}

impl ReqState {
    /// Arms a zero-timeout entry that invokes the generator's `proceed` on
    /// the next loop tick. Buffering ostreams call this to pull more data;
    /// the deferred hop yields to the loop so socket writes can drain.
    pub fn schedule_proceed(&self) {
        let Some(inner) = self.weak.upgrade() else {
            return;
        };
        self.ctx
            .schedule_deferred(Box::new(move || Req(inner).proceed_response()));
    }

    /// Moves the request-timeout entry to the wheel tail; called for every
    /// chunk the request produces so only stalled requests fire.
    pub(crate) fn relink_timeout(&mut self, cb: Box<dyn FnOnce()>) {
        let mut wheel = self.ctx.req_wheel.borrow_mut();
        if let Some(entry) = self.timeout.take() {
            wheel.unlink(&entry);
        }
        self.timeout = Some(wheel.link(self.ctx.loop_now(), cb));
        drop(wheel);
        self.ctx.timer_notify.notify_one();
    }

    pub(crate) fn unlink_timeout(&mut self) {
        if let Some(entry) = self.timeout.take() {
            self.ctx.req_wheel.borrow_mut().unlink(&entry);
        }
    }
}

pub(crate) struct ReqInner {
    pub(crate) state: RefCell<ReqState>,
    pub(crate) pipe: RefCell<Pipe>,
}

/// What the protocol driver hands over after parsing.
pub(crate) struct RequestParts {
    pub pool: Pool,
    pub authority: SharedBytes,
    pub method: SharedBytes,
    pub path: SharedBytes,
    pub scheme: &'static str,
    pub version: Version,
    pub headers: Headers,
    pub entity: Vec<SharedBytes>,
    pub upgrade: Option<SharedBytes>,
    pub http1_is_persistent: bool,
    pub peer: Option<SocketAddr>,
}

/// Handle to an in-flight request; clones share the same request.
#[derive(Clone)]
pub struct Req(pub(crate) Rc<ReqInner>);

impl Req {
    pub(crate) fn new(ctx: Rc<Context>, parts: RequestParts, tail: Box<dyn Ostream>) -> Self {
        let inner = Rc::new_cyclic(|weak| ReqInner {
            state: RefCell::new(ReqState {
                ctx,
                weak: weak.clone(),
                pool: parts.pool,
                authority: parts.authority,
                method: parts.method,
                path: parts.path,
                scheme: parts.scheme,
                version: parts.version,
                headers: parts.headers,
                entity: parts.entity,
                upgrade: parts.upgrade,
                processed_at: None,
                peer: parts.peer,
                res: Res::new(),
                bytes_sent: 0,
                http1_is_persistent: parts.http1_is_persistent,
                timeout: None,
                disposed: false,
            }),
            pipe: RefCell::new(Pipe::new(tail)),
        });
        Self(inner)
    }

    // Request accessors. Views are cheap refcounted clones.

    pub fn method(&self) -> SharedBytes {
        self.0.state.borrow().method.clone()
    }

    pub fn path(&self) -> SharedBytes {
        self.0.state.borrow().path.clone()
    }

    pub fn authority(&self) -> SharedBytes {
        self.0.state.borrow().authority.clone()
    }

    pub fn version(&self) -> Version {
        self.0.state.borrow().version
    }

    /// First value of a tokenized request header.
    pub fn header(&self, tok: &'static Token) -> Option<SharedBytes> {
        let state = self.0.state.borrow();
        let at = state.headers.find(tok, None)?;
        Some(state.headers.get(at).unwrap().value.clone())
    }

    /// First value of a request header by raw name.
    pub fn header_str(&self, name: &[u8]) -> Option<SharedBytes> {
        let state = self.0.state.borrow();
        let at = state.headers.find_by_str(name, None)?;
        Some(state.headers.get(at).unwrap().value.clone())
    }

    /// Entity body slices, in order.
    pub fn entity(&self) -> Vec<SharedBytes> {
        self.0.state.borrow().entity.clone()
    }

    /// Full access to the request state, for handlers that need more than
    /// the convenience accessors.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut ReqState) -> R) -> R {
        f(&mut self.0.state.borrow_mut())
    }

    // Response construction.

    pub fn set_status(&self, status: u16, reason: &'static str) {
        let mut state = self.0.state.borrow_mut();
        state.res.status = status;
        state.res.reason = Cow::Borrowed(reason);
    }

    pub fn set_content_length(&self, len: u64) {
        self.0.state.borrow_mut().res.content_length = Some(len);
    }

    pub fn add_header(&self, tok: &'static Token, value: &[u8]) {
        let mut state = self.0.state.borrow_mut();
        let state = &mut *state;
        state.res.headers.add(&state.pool, tok, value);
    }

    pub fn add_header_str(&self, name: &[u8], value: &[u8]) {
        let mut state = self.0.state.borrow_mut();
        let state = &mut *state;
        state.res.headers.add_by_str(&state.pool, name, value);
    }

    // The pipeline.

    /// Installs the generator and runs the context filters'
    /// `on_start_response` hooks: Idle → Streaming.
    pub fn start_response(&self, generator: Box<dyn Generator>) {
        let mut pipe = self.0.pipe.borrow_mut();
        debug_assert!(!pipe.started, "start_response may be called once");
        pipe.started = true;
        pipe.generator = Some(generator);

        let mut state = self.0.state.borrow_mut();
        let filters = state.ctx.filters.clone();
        let mut chain = Chain {
            top: &mut pipe.ostr_top,
        };
        for filter in &filters {
            filter.on_start_response(&mut state, &mut chain);
        }
    }

    /// Prepends an output filter; its `do_send` becomes the entry point.
    /// Allowed while idle or streaming, not after the final chunk.
    pub fn prepend_ostream(&self, wrap: impl FnOnce(Box<dyn Ostream>) -> Box<dyn Ostream>) {
        let mut pipe = self.0.pipe.borrow_mut();
        debug_assert!(!pipe.final_sent, "pipeline already unwound");
        Chain {
            top: &mut pipe.ostr_top,
        }
        .prepend(wrap);
    }

    /// Sends body slices down the filter chain. The final chunk unwinds the
    /// chain; any further send is a programming error.
    pub fn send(&self, bufs: &[SendBuf], is_final: bool) {
        let mut pipe = self.0.pipe.borrow_mut();
        debug_assert!(pipe.started, "send before start_response");
        debug_assert!(!pipe.final_sent, "send after the final chunk");
        if pipe.final_sent {
            return;
        }
        if is_final {
            pipe.final_sent = true;
            pipe.generator = None;
        }

        let mut top = pipe.ostr_top.take().expect("pipeline has no tail installed");
        {
            let mut state = self.0.state.borrow_mut();
            top.do_send(&mut state, bufs, is_final);
        }
        if !is_final {
            pipe.ostr_top = Some(top);
        }
    }

    /// Asks the generator for the next chunk, or — when no generator is
    /// installed or it already finished — emits an empty final chunk to
    /// unwind the chain.
    pub(crate) fn proceed_response(&self) {
        // A deferred proceed may outlive its request; disposal wins.
        if self.0.state.borrow().disposed {
            return;
        }
        let taken = {
            let mut pipe = self.0.pipe.borrow_mut();
            if pipe.final_sent {
                return;
            }
            pipe.generator.take()
        };

        match taken {
            Some(mut generator) => {
                generator.proceed(self);
                let mut pipe = self.0.pipe.borrow_mut();
                if !pipe.final_sent && pipe.generator.is_none() {
                    pipe.generator = Some(generator);
                }
            }
            None => {
                let started = self.0.pipe.borrow().started;
                if started {
                    self.send(&[], true);
                }
            }
        }
    }

    pub(crate) fn is_final_sent(&self) -> bool {
        self.0.pipe.borrow().final_sent
    }

    /// Tears the request down: drops the pipeline, unlinks the timeout,
    /// writes the access-log line, and clears the arena.
    pub(crate) fn dispose(&self) {
        let mut state = self.0.state.borrow_mut();
        if state.disposed {
            return;
        }
        state.disposed = true;

        {
            let mut pipe = self.0.pipe.borrow_mut();
            if let Some(mut top) = pipe.ostr_top.take() {
                top.dispose(&mut state);
            }
            pipe.generator = None;
        }

        state.unlink_timeout();
        if let Some(log) = state.ctx.access_log.clone() {
            log.log(&state);
        }
        state.pool.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;

    /// Tail ostream that records what reaches it.
    struct Recorder {
        chunks: Rc<StdRefCell<Vec<(Vec<u8>, bool)>>>,
    }

    impl Ostream for Recorder {
        fn do_send(&mut self, _req: &mut ReqState, bufs: &[SendBuf], is_final: bool) {
            let mut bytes = Vec::new();
            for b in bufs {
                bytes.extend_from_slice(b.as_slice());
            }
            self.chunks.borrow_mut().push((bytes, is_final));
        }
    }

    fn test_req() -> (Req, Rc<StdRefCell<Vec<(Vec<u8>, bool)>>>) {
        let ctx = Context::for_tests();
        let chunks = Rc::new(StdRefCell::new(Vec::new()));
        let pool = Pool::new();
        let parts = RequestParts {
            authority: pool.strdup(b"example.com"),
            method: pool.strdup(b"GET"),
            path: pool.strdup(b"/"),
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
            Box::new(Recorder {
                chunks: chunks.clone(),
            }),
        );
        (req, chunks)
    }

    struct NullGenerator;
    impl Generator for NullGenerator {
        fn proceed(&mut self, _req: &Req) {}
    }

    /// Counts proceed calls and sends one chunk per call, final on the last.
    struct CountingGenerator {
        calls: Rc<StdRefCell<usize>>,
        total: usize,
    }
    impl Generator for CountingGenerator {
        fn proceed(&mut self, req: &Req) {
            let n = {
                let mut calls = self.calls.borrow_mut();
                *calls += 1;
                *calls
            };
            let body = req.with_state(|s| s.pool.format(format_args!("chunk{n}")));
            req.send(&[SendBuf::Shared(body)], n == self.total);
        }
    }

    #[test]
    fn chunks_reach_tail_in_order_final_last() {
        let (req, chunks) = test_req();
        req.start_response(Box::new(NullGenerator));
        req.send(&[SendBuf::Static(b"one")], false);
        req.send(&[SendBuf::Static(b"two"), SendBuf::Static(b"three")], false);
        req.send(&[], true);

        let got = chunks.borrow();
        assert_eq!(
            *got,
            vec![
                (b"one".to_vec(), false),
                (b"twothree".to_vec(), false),
                (Vec::new(), true),
            ]
        );
        let finals = got.iter().filter(|(_, f)| *f).count();
        assert_eq!(finals, 1);
        assert!(got.last().unwrap().1);
    }

    #[test]
    fn prepended_ostream_becomes_entry_point() {
        struct Doubler {
            next: Box<dyn Ostream>,
        }
        impl Ostream for Doubler {
            fn do_send(&mut self, req: &mut ReqState, bufs: &[SendBuf], is_final: bool) {
                let mut out = Vec::new();
                for b in bufs {
                    out.push(b.clone());
                    out.push(b.clone());
                }
                self.next.do_send(req, &out, is_final);
            }
        }

        let (req, chunks) = test_req();
        req.start_response(Box::new(NullGenerator));
        req.prepend_ostream(|next| Box::new(Doubler { next }));
        req.send(&[SendBuf::Static(b"ab")], true);

        assert_eq!(*chunks.borrow(), vec![(b"abab".to_vec(), true)]);
    }

    #[test]
    fn scheduled_proceed_fires_once_on_next_tick() {
        let (req, chunks) = test_req();
        let calls = Rc::new(StdRefCell::new(0));
        req.start_response(Box::new(CountingGenerator {
            calls: calls.clone(),
            total: 2,
        }));

        req.with_state(|s| s.schedule_proceed());
        assert_eq!(*calls.borrow(), 0, "deferred, not synchronous");

        let ctx = req.with_state(|s| s.ctx.clone());
        ctx.run_due_timers();
        assert_eq!(*calls.borrow(), 1);

        // One schedule, one proceed: a second drain fires nothing.
        ctx.run_due_timers();
        assert_eq!(*calls.borrow(), 1);

        req.with_state(|s| s.schedule_proceed());
        ctx.run_due_timers();
        assert_eq!(*calls.borrow(), 2);
        assert!(req.is_final_sent());
        assert_eq!(chunks.borrow().len(), 2);
    }

    #[test]
    fn proceed_without_generator_unwinds_with_empty_final() {
        let (req, chunks) = test_req();
        req.start_response(Box::new(NullGenerator));
        req.send(&[SendBuf::Static(b"data")], false);

        // Generator finished producing (sent non-final, then dropped): a
        // scheduled proceed after the generator is gone emits the empty
        // final chunk.
        req.0.pipe.borrow_mut().generator = None;
        req.proceed_response();

        let got = chunks.borrow();
        assert_eq!(got.len(), 2);
        assert_eq!(got[1], (Vec::new(), true));
    }

    #[test]
    fn dispose_clears_arena_and_is_idempotent() {
        let (req, _chunks) = test_req();
        let body = req.with_state(|s| s.pool.strdup(b"held"));
        let hold = body.addref();
        drop(body);

        req.dispose();
        req.dispose();
        assert_eq!(hold.ref_count(), 1, "pool hold released on dispose");
        assert_eq!(hold.as_slice(), b"held");
    }
}
