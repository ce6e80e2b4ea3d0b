//! ember_web - embeddable event-driven HTTP server core
//!
//! A library for building HTTP servers around three tightly coupled ideas:
//!
//! - **Per-request arenas**: every request owns a [`Pool`] — a bump
//!   allocator whose contents are freed en masse when the request is
//!   disposed, plus refcounted [`SharedBytes`] entries that may outlive the
//!   arena (a body buffer handed to an in-flight socket write keeps its own
//!   hold).
//! - **A composable response pipeline**: handlers install a [`Generator`]
//!   that produces body chunks, and chunks flow through an ordered chain of
//!   output filters ([`Ostream`]) down to the wire. Production is pulled by
//!   the event loop, never pushed by a busy generator.
//! - **Single-threaded loop contexts**: each context thread runs its own
//!   event loop with timeout wheels and deferred tasks; there is no mutex in
//!   the core. Contexts share nothing but the handler and static tables.
//!
//! # Quick start
//!
//! ```no_run
//! use ember_web::{Req, Server};
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() {
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
//!         .handler_fn(|req: &Req| {
//!             req.set_status(200, "OK");
//!             req.add_header(&ember_web::http::token::CONTENT_TYPE, b"text/plain");
//!             req.send_inline(b"Hello world!");
//!         })
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```
//!
//! Handlers run on the loop thread and must not block: set the response
//! status and headers, then either finish immediately with
//! [`Req::send_inline`] / [`Req::send_error`] / [`Req::send_file`], or
//! install a custom [`Generator`] via [`Req::start_response`] and stream
//! chunks with [`Req::send`] as `proceed` calls arrive.
//!
//! HTTP/1 parsing is delegated to [`httparse`]; HTTP/2 framing and TLS are
//! external collaborators behind the [`TlsAcceptor`] seam and the ALPN
//! selection hook.

pub mod mem {
    pub mod buffer;
    pub mod pool;
    pub mod shared;
    pub mod vector;
}

pub mod http {
    pub(crate) mod chunked;
    pub(crate) mod generators;
    pub mod headers;
    pub mod mime;
    pub mod pipeline;
    pub mod request;
    pub mod timestamp;
    pub mod token;
    pub(crate) mod types;
}

pub mod server {
    pub(crate) mod access_log;
    pub(crate) mod connection;
    pub mod context;
    pub(crate) mod server_impl;
    pub mod socket;
    pub mod timeout;
}

pub(crate) mod errors;
pub mod limits;
pub mod util;

pub use crate::{
    http::{
        headers::{Header, HeaderName, HeaderScan, Headers},
        mime::MimeMap,
        pipeline::{Chain, Filter, Generator, Ostream, SendBuf},
        request::{Req, ReqState, Res},
        timestamp::{Timestamp, TimestampStr},
        token::{lookup_token, Token},
        types::Version,
    },
    limits::{ConnLimits, ReqLimits, ServerLimits, WaitStrategy},
    mem::{
        buffer::InputBuffer,
        pool::Pool,
        shared::{SharedBufMut, SharedBytes},
        vector::PoolVec,
    },
    server::{
        access_log::AccessLog,
        context::{Context, Handler, HandlerFn},
        server_impl::{Server, ServerBuilder},
        socket::{Socket, SocketIo, TlsAcceptor, TlsSession},
        timeout::{TimeoutEntry, Wheel},
    },
};
