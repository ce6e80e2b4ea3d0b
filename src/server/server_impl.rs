//! Server front: builder, context threads, accept loop.
//!
//! `build()` spawns the configured number of loop-context threads, each
//! running its own current-thread runtime and sharing nothing with its
//! siblings but the handler and static tables. `launch()` accepts
//! connections and deals them onto the per-context queues; context threads
//! poll their queue with the configured wait strategy.

use std::sync::Arc;

use crossbeam::queue::SegQueue;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tracing::warn;

use crate::errors::ErrorKind;
use crate::http::mime::MimeMap;
use crate::http::pipeline::Filter;
use crate::limits::{ConnLimits, ReqLimits, ServerLimits, WaitStrategy};
use crate::server::access_log::AccessLog;
use crate::server::context::{Context, ContextSeed, Handler};
use crate::server::socket::TlsAcceptor;

type ConnQueue = Arc<SegQueue<std::net::TcpStream>>;

/// An HTTP server: an accept loop feeding a set of single-threaded loop
/// contexts.
///
/// # Examples
///
/// ```no_run
/// use ember_web::{Req, Server};
/// use tokio::net::TcpListener;
///
/// #[tokio::main]
/// async fn main() {
///     Server::builder()
///         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
///         .handler_fn(|req: &Req| {
///             req.set_status(200, "OK");
///             req.send_inline(b"Hello world!");
///         })
///         .build()
///         .launch()
///         .await;
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    queues: Vec<ConnQueue>,
    server_limits: ServerLimits,
}

impl Server {
    /// Creates a builder for configuring a server instance.
    pub fn builder() -> ServerBuilder {
        ServerBuilder {
            listener: None,
            handler: None,
            server_limits: None,
            conn_limits: None,
            req_limits: None,
            server_name: concat!("ember_web/", env!("CARGO_PKG_VERSION")).to_owned(),
            filters: Vec::new(),
            mimemap: None,
            access_log: None,
            tls: None,
        }
    }

    /// Runs the accept loop, dealing connections round-robin onto the
    /// context queues. Never returns.
    pub async fn launch(self) {
        let mut next = 0;
        loop {
            let Ok((stream, _)) = self.listener.accept().await else {
                continue;
            };

            let pending: usize = self.queues.iter().map(|q| q.len()).sum();
            if pending >= self.server_limits.max_pending_connections {
                Self::reject_overloaded(stream);
                continue;
            }

            let Ok(stream) = stream.into_std() else {
                continue;
            };
            self.queues[next].push(stream);
            next = (next + 1) % self.queues.len();
        }
    }

    /// Graceful degradation under load: an immediate 503 instead of a
    /// silently growing queue.
    fn reject_overloaded(mut stream: tokio::net::TcpStream) {
        tokio::spawn(async move {
            let _ = stream
                .write_all(ErrorKind::ServiceUnavailable.as_http())
                .await;
            let _ = stream.shutdown().await;
        });
    }
}

/// Builder for [`Server`] instances.
pub struct ServerBuilder {
    listener: Option<TcpListener>,
    handler: Option<Arc<dyn Handler>>,
    server_limits: Option<ServerLimits>,
    conn_limits: Option<ConnLimits>,
    req_limits: Option<ReqLimits>,
    server_name: String,
    filters: Vec<Arc<dyn Filter>>,
    mimemap: Option<MimeMap>,
    access_log: Option<Arc<AccessLog>>,
    tls: Option<Arc<dyn TlsAcceptor>>,
}

impl ServerBuilder {
    /// Sets the TCP listener the server accepts on. **Required.**
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Sets the request handler. **Required.**
    pub fn handler<H: Handler>(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Sets a closure as the request handler:
    /// `.handler_fn(|req| { ... })`.
    pub fn handler_fn<F>(self, f: F) -> Self
    where
        F: Fn(&crate::Req) + Send + Sync + 'static,
    {
        self.handler(crate::server::context::HandlerFn(f))
    }

    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.conn_limits = Some(limits);
        self
    }

    pub fn request_limits(mut self, limits: ReqLimits) -> Self {
        self.req_limits = Some(limits);
        self
    }

    /// The `Server:` header value.
    pub fn server_name(mut self, name: &str) -> Self {
        self.server_name = name.to_owned();
        self
    }

    /// Registers a response filter on every context, after the built-in
    /// chunked encoder. The ostream a later-registered filter prepends ends
    /// up closer to the chain head.
    pub fn response_filter<F: Filter>(mut self, filter: F) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Replaces the default MIME map.
    pub fn mimemap(mut self, mimemap: MimeMap) -> Self {
        self.mimemap = Some(mimemap);
        self
    }

    pub fn access_log(mut self, log: AccessLog) -> Self {
        self.access_log = Some(Arc::new(log));
        self
    }

    /// Installs the TLS collaborator; connections then handshake before the
    /// protocol driver is selected by ALPN.
    pub fn tls_acceptor<T: TlsAcceptor>(mut self, tls: T) -> Self {
        self.tls = Some(Arc::new(tls));
        self
    }

    /// Spawns the context threads and finalizes the server.
    ///
    /// # Panics
    ///
    /// Panics when `listener` or `handler` was not provided.
    #[track_caller]
    pub fn build(self) -> Server {
        let listener = self
            .listener
            .expect("The `listener` method must be called to create");
        let handler = self
            .handler
            .expect("The `handler` method must be called to create");

        let server_limits = self.server_limits.unwrap_or_default();
        let conn_limits = self.conn_limits.unwrap_or_default();
        let req_limits = self.req_limits.unwrap_or_default();
        let server_name: Arc<str> = Arc::from(self.server_name.as_str());
        let mimemap = Arc::new(self.mimemap.unwrap_or_default());

        let mut queues = Vec::new();
        for _ in 0..server_limits.context_threads.max(1) {
            let queue: ConnQueue = Arc::new(SegQueue::new());
            queues.push(queue.clone());

            let seed = ContextSeed {
                handler: handler.clone(),
                server_name: server_name.clone(),
                conn_limits: conn_limits.clone(),
                req_limits: req_limits.clone(),
                filters: self.filters.clone(),
                mimemap: mimemap.clone(),
                access_log: self.access_log.clone(),
                tls: self.tls.clone(),
            };
            let wait = server_limits.wait_strategy.clone();
            std::thread::spawn(move || context_main(seed, queue, wait));
        }

        Server {
            listener,
            queues,
            server_limits,
        }
    }
}

/// A loop-context thread: one current-thread runtime, one `LocalSet`, one
/// [`Context`]. Accepted streams arrive through the queue and are re-bound
/// to this thread's reactor.
fn context_main(seed: ContextSeed, queue: ConnQueue, wait: WaitStrategy) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("context runtime construction failed");
    let local = tokio::task::LocalSet::new();

    local.block_on(&rt, async move {
        let ctx = Context::new(seed);
        ctx.spawn_timer_driver();

        loop {
            match queue.pop() {
                Some(stream) => {
                    let _ = stream.set_nonblocking(true);
                    match tokio::net::TcpStream::from_std(stream) {
                        Ok(stream) => ctx.accept(stream),
                        Err(err) => warn!(?err, "failed to adopt accepted stream"),
                    }
                }
                None => match &wait {
                    WaitStrategy::Yield => tokio::task::yield_now().await,
                    WaitStrategy::Sleep(time) => tokio::time::sleep(*time).await,
                },
            }
        }
    });
}
