//! Chunked transfer-coding output filter, registered on every context.
//!
//! Activates when an HTTP/1.1 response has unknown content length: injects
//! `Transfer-Encoding: chunked` at `start_response` and frames every
//! forwarded chunk, terminating with `0\r\n\r\n` on the final one.

use crate::http::pipeline::{Chain, Filter, Ostream, SendBuf};
use crate::http::request::ReqState;
use crate::http::token;
use crate::http::types::Version;

pub(crate) struct ChunkedFilter;

impl Filter for ChunkedFilter {
    fn on_start_response(&self, req: &mut ReqState, chain: &mut Chain<'_>) {
        if req.version != Version::Http11 {
            return;
        }
        if req.res.content_length.is_some() {
            return;
        }
        // Bodiless statuses must not be framed.
        if req.res.status < 200 || req.res.status == 204 || req.res.status == 304 {
            return;
        }

        req.res
            .headers
            .add(&req.pool, &token::TRANSFER_ENCODING, b"chunked");
        chain.prepend(|next| Box::new(ChunkedOstream { next }));
    }
}

struct ChunkedOstream {
    next: Box<dyn Ostream>,
}

impl Ostream for ChunkedOstream {
    fn do_send(&mut self, req: &mut ReqState, bufs: &[SendBuf], is_final: bool) {
        let total: usize = bufs.iter().map(SendBuf::len).sum();

        let mut out: Vec<SendBuf> = Vec::with_capacity(bufs.len() + 3);
        if total > 0 {
            out.push(SendBuf::Shared(
                req.pool.format(format_args!("{total:x}\r\n")),
            ));
            out.extend(bufs.iter().cloned());
            out.push(SendBuf::Static(b"\r\n"));
        }
        if is_final {
            out.push(SendBuf::Static(b"0\r\n\r\n"));
        }

        self.next.do_send(req, &out, is_final);
    }
}
