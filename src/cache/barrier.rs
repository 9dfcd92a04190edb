//! Offset barrier: lets callers wait until a log position has been applied.
//!
//! Waiters sit in an ordered map keyed by target offset, so one `advance`
//! releases every waiter at or below the new position. Requested offsets
//! need not match a record (retention gaps, skipped offsets).

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::CacheError;

pub const NOTHING_APPLIED: i64 = -1;

pub struct OffsetBarrier {
    state: Mutex<BarrierState>,
}

struct BarrierState {
    last_applied: i64,
    closed: bool,
    waiters: BTreeMap<i64, Vec<oneshot::Sender<()>>>,
}

impl OffsetBarrier {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BarrierState {
                last_applied: NOTHING_APPLIED,
                closed: false,
                waiters: BTreeMap::new(),
            }),
        }
    }

    pub fn last_applied(&self) -> i64 {
        self.state.lock().last_applied
    }

    pub fn pending_waiters(&self) -> usize {
        self.state.lock().waiters.values().map(Vec::len).sum()
    }

    /// Record `offset` as applied and release every waiter it covers.
    pub fn advance(&self, offset: i64) {
        let due = {
            let mut state = self.state.lock();
            if offset > state.last_applied {
                state.last_applied = offset;
            }
            let first_pending = state.last_applied + 1;
            let still_pending = state.waiters.split_off(&first_pending);
            std::mem::replace(&mut state.waiters, still_pending)
        };

        // Senders fire outside the lock. A dropped receiver is fine.
        for sender in due.into_values().flatten() {
            let _ = sender.send(());
        }
    }

    /// Check-then-register under one lock, so no advance can slip between.
    pub fn register(&self, offset: i64) -> OffsetWait {
        let mut state = self.state.lock();
        if state.last_applied >= offset {
            return OffsetWait::ready();
        }
        let (tx, rx) = oneshot::channel();
        if !state.closed {
            state.waiters.entry(offset).or_default().push(tx);
        }
        OffsetWait { inner: WaitInner::Pending(rx) }
    }

    /// Fail every pending and future wait that is not already satisfied.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.waiters.clear();
    }
}

impl Default for OffsetBarrier {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves once the requested offset has been applied.
///
/// Fails with `InvalidState` if the cache shuts down first.
#[must_use = "an OffsetWait does nothing unless awaited"]
pub struct OffsetWait {
    inner: WaitInner,
}

enum WaitInner {
    Ready,
    Pending(oneshot::Receiver<()>),
}

impl OffsetWait {
    pub(crate) fn ready() -> Self {
        Self { inner: WaitInner::Ready }
    }

    /// True if the offset was already applied when the wait was registered.
    pub fn is_immediate(&self) -> bool {
        matches!(self.inner, WaitInner::Ready)
    }
}

impl Future for OffsetWait {
    type Output = Result<(), CacheError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().inner {
            WaitInner::Ready => Poll::Ready(Ok(())),
            WaitInner::Pending(rx) => Pin::new(rx)
                .poll(cx)
                .map(|res| res.map_err(|_| CacheError::InvalidState("cache closed before offset was applied".into()))),
        }
    }
}
