//! The response pipeline: a generator feeding an ordered chain of output
//! streams.
//!
//! Each ostream owns its downstream; the tail (installed by the protocol
//! driver) serializes onto the socket. A chunk entered at the head reaches
//! the tail in order, transformed along the way; the final chunk unwinds the
//! chain and the request is disposed once the socket acknowledges it.
//!
//! Ostreams are cooperative tasks: one that wants to yield must buffer and
//! return, then ask for more through
//! [`ReqState::schedule_proceed`](crate::http::request::ReqState::schedule_proceed) —
//! the deferred hop that breaks deep recursion and lets socket writes drain.

use crate::http::request::{Req, ReqState};
use crate::mem::shared::SharedBytes;

/// One buffer slice of a response body chunk.
///
/// Slices are either refcounted shared entries (the usual case: the socket's
/// write queue keeps its hold until the write completes, even past request
/// disposal) or static bytes baked into the binary.
#[derive(Clone, Debug)]
pub enum SendBuf {
    Shared(SharedBytes),
    Static(&'static [u8]),
}

impl SendBuf {
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Self::Shared(b) => b.as_slice(),
            Self::Static(b) => b,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<SharedBytes> for SendBuf {
    fn from(b: SharedBytes) -> Self {
        Self::Shared(b)
    }
}

impl From<&'static [u8]> for SendBuf {
    fn from(b: &'static [u8]) -> Self {
        Self::Static(b)
    }
}

impl From<&'static str> for SendBuf {
    fn from(s: &'static str) -> Self {
        Self::Static(s.as_bytes())
    }
}

/// A stage in the response pipeline.
pub trait Ostream: 'static {
    /// Data-plane entry. Implementations may buffer and return, transform
    /// and forward to their owned downstream, or split into several
    /// forwards; the relative order of chunks must be preserved and
    /// `is_final` forwarded exactly once, last.
    fn do_send(&mut self, req: &mut ReqState, bufs: &[SendBuf], is_final: bool);

    /// Teardown hook, called when the request is disposed before the chain
    /// finished unwinding (abort paths).
    fn dispose(&mut self, _req: &mut ReqState) {}
}

/// The source of response body chunks, driven by `proceed`.
///
/// A generator must not loop producing data: after each
/// [`Req::send`](crate::http::request::Req::send) it returns and waits for
/// the next `proceed`, which the loop issues once in-flight bytes drain.
pub trait Generator: 'static {
    fn proceed(&mut self, req: &Req);
}

/// A context-registered response filter, consulted at `start_response`.
///
/// Filters are configuration, shared across loop contexts; the per-request
/// state they need lives in the ostreams they prepend.
pub trait Filter: Send + Sync + 'static {
    /// Opportunity to inject headers and prepend an ostream onto the chain.
    fn on_start_response(&self, req: &mut ReqState, chain: &mut Chain<'_>);
}

/// Mutable view of the chain head during `start_response`.
pub struct Chain<'a> {
    pub(crate) top: &'a mut Option<Box<dyn Ostream>>,
}

impl Chain<'_> {
    /// Wraps the current head in a new ostream, which becomes the entry
    /// point of the pipeline.
    pub fn prepend(&mut self, wrap: impl FnOnce(Box<dyn Ostream>) -> Box<dyn Ostream>) {
        let next = self.top.take().expect("pipeline has no tail installed");
        *self.top = Some(wrap(next));
    }
}

/// Per-request pipeline state.
pub(crate) struct Pipe {
    pub(crate) ostr_top: Option<Box<dyn Ostream>>,
    pub(crate) generator: Option<Box<dyn Generator>>,
    /// `start_response` has run.
    pub(crate) started: bool,
    /// The final chunk has entered the chain.
    pub(crate) final_sent: bool,
}

impl Pipe {
    pub(crate) fn new(tail: Box<dyn Ostream>) -> Self {
        Self {
            ostr_top: Some(tail),
            generator: None,
            started: false,
            final_sent: false,
        }
    }
}
