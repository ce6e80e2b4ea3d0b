//! The per-loop connection context.
//!
//! One `Context` per event-loop thread: it owns the shared-per-loop
//! configuration (handler, filters, limits, MIME map, access log, TLS), the
//! two timeout wheels, and the timestamp cache. Everything behind the `Rc`
//! is single-threaded by construction — callbacks run to completion on the
//! loop thread and there is no mutex anywhere in here.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::warn;

use crate::http::chunked::ChunkedFilter;
use crate::http::mime::MimeMap;
use crate::http::pipeline::Filter;
use crate::http::request::Req;
use crate::http::timestamp::{Timestamp, TimestampCache};
use crate::limits::{ConnLimits, ReqLimits};
use crate::server::access_log::AccessLog;
use crate::server::connection::HttpConnection;
use crate::server::socket::{Socket, TlsAcceptor};
use crate::server::timeout::{TimeoutEntry, Wheel};

/// The request handler: a single callback on the loop context.
///
/// Runs on the loop thread and must not block: it installs filters and a
/// generator via [`Req::start_response`](crate::Req::start_response) (or
/// uses a helper like [`Req::send_inline`](crate::Req::send_inline)) and
/// returns. Body production is driven by `proceed` calls afterwards.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, req: &Req);
}

/// Adapter turning a closure into a [`Handler`]:
/// `HandlerFn(|req: &Req| { ... })`.
pub struct HandlerFn<F>(pub F);

impl<F: Fn(&Req) + Send + Sync + 'static> Handler for HandlerFn<F> {
    fn handle(&self, req: &Req) {
        (self.0)(req)
    }
}

/// Configuration a context is built from; assembled by the server builder
/// and shared across context threads.
pub(crate) struct ContextSeed {
    pub handler: Arc<dyn Handler>,
    pub server_name: Arc<str>,
    pub conn_limits: ConnLimits,
    pub req_limits: ReqLimits,
    pub filters: Vec<Arc<dyn Filter>>,
    pub mimemap: Arc<MimeMap>,
    pub access_log: Option<Arc<AccessLog>>,
    pub tls: Option<Arc<dyn TlsAcceptor>>,
}

pub struct Context {
    pub(crate) handler: Arc<dyn Handler>,
    pub(crate) server_name: Arc<str>,
    pub(crate) conn_limits: ConnLimits,
    pub(crate) req_limits: ReqLimits,
    /// Ordered filter list consulted at `start_response`; the chunked
    /// encoder is registered by default, user filters follow in
    /// registration order (so the last registered ostream runs first).
    pub(crate) filters: Vec<Arc<dyn Filter>>,
    pub(crate) mimemap: Arc<MimeMap>,
    pub(crate) access_log: Option<Arc<AccessLog>>,
    pub(crate) tls: Option<Arc<dyn TlsAcceptor>>,

    /// Deferred tasks: entries fire on the next loop tick.
    pub(crate) zero_wheel: RefCell<Wheel>,
    /// Aborts requests whose handler goes quiet.
    pub(crate) req_wheel: RefCell<Wheel>,
    pub(crate) timer_notify: Notify,

    timestamp: RefCell<TimestampCache>,
    epoch: Instant,
}

impl Context {
    pub(crate) fn new(seed: ContextSeed) -> Rc<Self> {
        let request_timeout = seed.conn_limits.request_timeout;
        let mut filters: Vec<Arc<dyn Filter>> = vec![Arc::new(ChunkedFilter)];
        filters.extend(seed.filters);
        Rc::new(Self {
            handler: seed.handler,
            server_name: seed.server_name,
            conn_limits: seed.conn_limits,
            req_limits: seed.req_limits,
            filters,
            mimemap: seed.mimemap,
            access_log: seed.access_log,
            tls: seed.tls,
            zero_wheel: RefCell::new(Wheel::new(std::time::Duration::ZERO)),
            req_wheel: RefCell::new(Wheel::new(request_timeout)),
            timer_notify: Notify::new(),
            timestamp: RefCell::new(TimestampCache::default()),
            epoch: Instant::now(),
        })
    }

    /// Loop time, used as the wheels' `now`.
    #[inline]
    pub(crate) fn loop_now(&self) -> Instant {
        Instant::now()
    }

    /// Cached wall-clock timestamp; requests within the same millisecond of
    /// loop time observe identical strings.
    pub fn get_timestamp(&self) -> Timestamp {
        let loop_ms = self.epoch.elapsed().as_millis() as u64;
        self.timestamp.borrow_mut().get(loop_ms)
    }

    /// Schedules a callback for the next loop tick through the zero wheel.
    pub(crate) fn schedule_deferred(&self, cb: Box<dyn FnOnce()>) {
        self.zero_wheel.borrow_mut().link(self.loop_now(), cb);
        self.timer_notify.notify_one();
    }

    pub(crate) fn link_req_timeout(&self, cb: Box<dyn FnOnce()>) -> TimeoutEntry {
        let entry = self.req_wheel.borrow_mut().link(self.loop_now(), cb);
        self.timer_notify.notify_one();
        entry
    }

    /// Fires every due entry, re-reading wheel heads after each callback —
    /// callbacks may re-link themselves onto any wheel.
    pub(crate) fn run_due_timers(&self) {
        let now = self.loop_now();
        loop {
            let cb = self.zero_wheel.borrow_mut().pop_due(now);
            if let Some(cb) = cb {
                cb();
                continue;
            }
            let cb = self.req_wheel.borrow_mut().pop_due(now);
            if let Some(cb) = cb {
                cb();
                continue;
            }
            break;
        }
    }

    /// The timer driver: one local task per context, armed to the earliest
    /// wheel deadline and woken whenever a link changes it.
    pub(crate) fn spawn_timer_driver(self: &Rc<Self>) {
        let ctx = self.clone();
        tokio::task::spawn_local(async move {
            loop {
                let deadline = {
                    let zero = ctx.zero_wheel.borrow().deadline();
                    let req = ctx.req_wheel.borrow().deadline();
                    match (zero, req) {
                        (Some(a), Some(b)) => Some(a.min(b)),
                        (a, b) => a.or(b),
                    }
                };
                match deadline {
                    None => ctx.timer_notify.notified().await,
                    Some(at) => {
                        tokio::select! {
                            _ = tokio::time::sleep_until(at) => {}
                            _ = ctx.timer_notify.notified() => {}
                        }
                    }
                }
                ctx.run_due_timers();
            }
        });
    }

    /// Accepts a connection: TLS handshake if configured, protocol driver
    /// selection by ALPN, then the HTTP/1 driver takes over.
    pub fn accept(self: &Rc<Self>, stream: tokio::net::TcpStream) {
        let ctx = self.clone();
        tokio::task::spawn_local(async move {
            let sock = match ctx.tls.clone() {
                Some(tls) => {
                    let peer = stream.peer_addr().ok();
                    match tls.handshake(stream).await {
                        Ok(session) => Socket::tls(session, peer),
                        Err(err) => {
                            warn!(?err, "tls handshake failed");
                            return;
                        }
                    }
                }
                None => Socket::plain(stream),
            };

            // No HTTP/2 driver ships in-core; such connections are refused.
            if sock.selected_protocol() == Some("h2") {
                warn!("alpn selected h2 but no http/2 driver is registered");
                return;
            }

            HttpConnection::new(ctx, sock).run().await;
        });
    }

    /// Binds the request to this context and invokes the handler.
    pub(crate) fn process_request(self: &Rc<Self>, req: &Req) {
        req.with_state(|state| state.processed_at = Some(self.get_timestamp()));
        self.handler.handle(req);
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Rc<Self> {
        struct Nop;
        impl Handler for Nop {
            fn handle(&self, _req: &Req) {}
        }
        let mut ctx = Self::new(ContextSeed {
            handler: Arc::new(Nop),
            server_name: Arc::from("ember_web-test"),
            conn_limits: ConnLimits::default(),
            req_limits: ReqLimits::default(),
            filters: Vec::new(),
            mimemap: Arc::new(MimeMap::default()),
            access_log: None,
            tls: None,
        });
        // Pipeline unit tests drive the chain directly; the default filter
        // set would wrap their chunks in transfer-encoding framing.
        Rc::get_mut(&mut ctx).unwrap().filters.clear();
        ctx
    }
}
