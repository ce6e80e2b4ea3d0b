//! Server configuration limits and timeouts.
//!
//! Defaults are conservative: every limit exists to bound what a single
//! connection or request can cost the process — stalled peers are cut by
//! timeouts, oversized heads and entities are rejected before they allocate.

use std::time::Duration;

/// Server-level concurrency and queueing behavior.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Number of loop-context threads accepting work (default: `1`).
    ///
    /// Each context runs its own single-threaded event loop and shares
    /// nothing with its siblings except the handler and static tables.
    pub context_threads: usize,

    /// Maximum number of accepted connections waiting across all context
    /// queues (default: `256`). Beyond this, new connections receive an
    /// immediate 503 and are closed.
    pub max_pending_connections: usize,

    /// How context threads wait when their queue is empty
    /// (default: `Sleep(50µs)`).
    pub wait_strategy: WaitStrategy,
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            context_threads: 1,
            max_pending_connections: 256,
            wait_strategy: WaitStrategy::Sleep(Duration::from_micros(50)),
        }
    }
}

/// Strategy for context threads waiting on an empty accept queue.
#[derive(Debug, Clone)]
pub enum WaitStrategy {
    /// Spin through [`tokio::task::yield_now`]. Lowest latency, a core's
    /// worth of CPU per idle context.
    Yield,
    /// Sleep between polls via [`tokio::time::sleep`].
    Sleep(Duration),
}

/// Connection-level timeouts and protocol options.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Maximum wait for request bytes before the connection is dropped
    /// (default: `10 seconds`). The first line of defense against slowloris
    /// peers.
    pub socket_read_timeout: Duration,

    /// Maximum time a request may go without producing a chunk before it is
    /// aborted (default: `10 seconds`). Backed by the request-timeout wheel;
    /// the entry is re-linked on every chunk sent.
    pub request_timeout: Duration,

    /// Whether an HTTP/1.1 `Upgrade: h2c` offer may be taken by an HTTP/2
    /// protocol driver (default: `false`). Without a registered driver the
    /// offer is ignored.
    pub http1_upgrade_to_http2: bool,

    /// Advertised cap on concurrent streams per HTTP/2 connection, consumed
    /// by the protocol driver (default: `16`).
    pub http2_max_concurrent_requests_per_connection: usize,
}

impl Default for ConnLimits {
    fn default() -> Self {
        Self {
            socket_read_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            http1_upgrade_to_http2: false,
            http2_max_concurrent_requests_per_connection: 16,
        }
    }
}

/// Request parsing limits.
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Maximum size of the request head — request line plus headers
    /// (default: `16 KiB`).
    pub max_head_size: usize,

    /// Maximum number of request headers (default: `100`).
    pub max_headers: usize,

    /// Maximum entity size (default: `1 MiB`). Larger bodies are refused
    /// with 413 before they are buffered.
    pub max_request_entity_size: usize,
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            max_head_size: 16 * 1024,
            max_headers: 100,
            max_request_entity_size: 1024 * 1024,
        }
    }
}
