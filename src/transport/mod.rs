//! # Transport Abstraction
//!
//! Four socket roles (reply, request, publish, subscribe), each backed by
//! a shared [`TransportContext`]. Every method that can block is async and
//! cancellable: suspending inside one of them must return a
//! [`crate::error::TransportError::Cancelled`] as soon as the owning
//! component's context is stopped, rather than hang forever.
//!
//! This module specifies only the abstract contract, treating the
//! underlying transport library as an external collaborator. [`tcp`] backs
//! that contract with real Tokio TCP sockets.

pub mod tcp;

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::error::TransportError;

/// Connection identifier for tracking multiple client/subscriber
/// connections on a single listening socket.
pub type ConnectionId = u64;

/// Configuration shared by every socket role.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Buffer size hint for the underlying socket's send/receive buffers.
    pub buffer_size: usize,
    /// Maximum number of concurrent connections a reply/publish socket
    /// will track before new connections are refused.
    pub max_connections: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            buffer_size: 8192,
            max_connections: 256,
        }
    }
}

/// A reference-counted handle to the messaging context shared by the
/// sockets a single component (server, client, publisher, or subscriber)
/// owns. Construction is idempotent in the sense that cloning a handle
/// shares the same underlying stop signal; it is deliberately *not* a
/// process-wide singleton, so tests can construct and tear down as many
/// independent contexts as they like without interfering with each other.
#[derive(Debug, Clone)]
pub struct TransportContext {
    inner: Arc<ContextInner>,
}

#[derive(Debug)]
struct ContextInner {
    stopped: AtomicBool,
    notify: Notify,
}

impl Default for TransportContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportContext {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ContextInner {
                stopped: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Signal every socket sharing this context to unblock and return
    /// `Cancelled` from any in-progress suspension point.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Race a future against cancellation, returning `Cancelled` if `stop`
    /// is called (or was already called) before the future resolves.
    pub async fn cancellable<F, T>(&self, fut: F) -> Result<T, TransportError>
    where
        F: std::future::Future<Output = T>,
    {
        if self.is_stopped() {
            return Err(TransportError::Cancelled);
        }
        tokio::select! {
            result = fut => Ok(result),
            _ = self.inner.notify.notified() => Err(TransportError::Cancelled),
        }
    }
}

/// Reply socket role: binds and serves one or more requesters, replying to
/// each by connection id.
#[async_trait]
pub trait ReplySocket: Send {
    async fn bind(&mut self, endpoint: &str, config: &TransportConfig) -> Result<(), TransportError>;

    /// Block until a request arrives (or the context is stopped, in which
    /// case `Cancelled` is returned within one poll interval).
    async fn receive_request(&mut self) -> Result<(ConnectionId, Vec<u8>), TransportError>;

    async fn send_reply(&mut self, connection: ConnectionId, bytes: &[u8]) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Request socket role: connects to exactly one reply socket and performs
/// strict lockstep request/reply, at most one request in flight.
#[async_trait]
pub trait RequestSocket: Send {
    async fn connect(&mut self, endpoint: &str, config: &TransportConfig) -> Result<(), TransportError>;

    async fn send_request(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Wait up to `timeout` for a reply. Returns `Timeout` on expiry.
    async fn receive_reply_within(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Close and reopen the underlying connection, re-establishing the
    /// request/reply lockstep after a timeout or error.
    async fn reset(&mut self, endpoint: &str, config: &TransportConfig) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Publish socket role: binds and fans a message out to every subscriber
/// whose prefix table matches the message's topic.
#[async_trait]
pub trait PublishSocket: Send {
    async fn bind(&mut self, endpoint: &str, config: &TransportConfig) -> Result<(), TransportError>;

    async fn send(&mut self, topic: &str, bytes: &[u8]) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Subscribe socket role: connects to a publisher and maintains a prefix
/// filter table that is pushed to the publisher on every change.
#[async_trait]
pub trait SubscribeSocket: Send {
    async fn connect(&mut self, endpoint: &str, config: &TransportConfig) -> Result<(), TransportError>;

    async fn subscribe(&mut self, topic_prefix: &str) -> Result<(), TransportError>;

    async fn unsubscribe(&mut self, topic_prefix: &str) -> Result<(), TransportError>;

    /// Block until a published message arrives, returning `(topic, bytes)`.
    async fn receive(&mut self) -> Result<(String, Vec<u8>), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}
