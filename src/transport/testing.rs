//! In-memory session and engine for unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::protocol::{BoxedIo, ProtocolEngine, Session};

// ============================================================================
// MockSession
// ============================================================================

/// Session whose capacity is toggled by the test.
pub(crate) struct MockSession {
    accepting: AtomicBool,
    closed_tx: watch::Sender<bool>,
}

impl MockSession {
    pub(crate) fn new() -> Arc<Self> {
        let (closed_tx, _) = watch::channel(false);
        Arc::new(Self {
            accepting: AtomicBool::new(true),
            closed_tx,
        })
    }

    pub(crate) fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }
}

#[async_trait]
impl Session for MockSession {
    fn can_take_new_request(&self) -> bool {
        !self.is_closed() && self.accepting.load(Ordering::SeqCst)
    }

    async fn send_request(&self, _request: Request<Bytes>) -> Result<Response<Bytes>> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        Ok(Response::new(Bytes::from_static(b"ok")))
    }

    async fn closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    fn close(&self) {
        self.closed_tx.send_replace(true);
    }
}

// ============================================================================
// MockEngine
// ============================================================================

/// Engine that hands out [`MockSession`]s and records them.
#[derive(Default)]
pub(crate) struct MockEngine {
    sessions: Mutex<Vec<Arc<MockSession>>>,
    failures: AtomicUsize,
}

impl MockEngine {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes the next `count` handshakes fail.
    pub(crate) fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub(crate) fn sessions_created(&self) -> usize {
        self.sessions.lock().len()
    }

    pub(crate) fn session(&self, index: usize) -> Arc<MockSession> {
        Arc::clone(&self.sessions.lock()[index])
    }
}

#[async_trait]
impl ProtocolEngine for MockEngine {
    async fn new_session(&self, _io: BoxedIo) -> Result<Arc<dyn Session>> {
        let fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(Error::session("mock handshake refused"));
        }

        let session = MockSession::new();
        self.sessions.lock().push(Arc::clone(&session));
        Ok(session)
    }
}
