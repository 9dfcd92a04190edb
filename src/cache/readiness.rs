//! Cache lifecycle: `Bootstrapping -> Ready`, `Bootstrapping -> Failed`, or
//! `Bootstrapping -> Closed` when the owner shuts the cache down first.
//!
//! All end states are terminal. Every edge has one transition function and
//! each refuses to leave a terminal state, so racing observers cannot flip
//! readiness twice.

use tokio::sync::watch;

use crate::error::{BrokerError, CacheError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootstrapStage {
    /// Querying watermarks / timestamp index.
    Resolving,
    /// Stream descriptor known, catching up to the horizon.
    Consuming,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ReadyState {
    Bootstrapping(BootstrapStage),
    Ready,
    Failed(BootstrapError),
    /// Closed locally before bootstrap finished.
    Closed,
}

impl ReadyState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReadyState::Ready | ReadyState::Failed(_) | ReadyState::Closed)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BootstrapError {
    pub topic: String,
    pub source: BrokerError,
}

impl From<BootstrapError> for CacheError {
    fn from(e: BootstrapError) -> Self {
        CacheError::BootstrapFailure { topic: e.topic, source: e.source }
    }
}

pub struct Readiness {
    state: watch::Sender<ReadyState>,
}

impl Readiness {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ReadyState::Bootstrapping(BootstrapStage::Resolving));
        Self { state }
    }

    pub fn state(&self) -> ReadyState {
        self.state.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.state.borrow(), ReadyState::Ready)
    }

    pub fn stream_resolved(&self) {
        self.state.send_if_modified(|state| match state {
            ReadyState::Bootstrapping(BootstrapStage::Resolving) => {
                *state = ReadyState::Bootstrapping(BootstrapStage::Consuming);
                true
            }
            _ => false,
        });
    }

    /// Returns true only for the call that performed the transition.
    pub fn mark_ready(&self) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = ReadyState::Ready;
            true
        })
    }

    pub fn mark_failed(&self, topic: &str, source: BrokerError) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = ReadyState::Failed(BootstrapError { topic: topic.to_string(), source });
            true
        })
    }

    /// No-op once Ready, a ready cache stays ready after shutdown.
    pub fn mark_closed(&self) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = ReadyState::Closed;
            true
        })
    }

    /// Resolves once Ready, immediately if already there.
    pub async fn wait_ready(&self) -> Result<(), CacheError> {
        let mut rx = self.state.subscribe();
        let state = rx
            .wait_for(ReadyState::is_terminal)
            .await
            .map_err(|_| closed())?
            .clone();
        match state {
            ReadyState::Failed(e) => Err(e.into()),
            ReadyState::Closed => Err(closed()),
            _ => Ok(()),
        }
    }

    /// Resolves once the stream descriptor is known. Writers wait on this so
    /// no producer is ever created for a topic that failed to resolve.
    pub async fn wait_stream_resolved(&self) -> Result<(), CacheError> {
        let mut rx = self.state.subscribe();
        let state = rx
            .wait_for(|s| !matches!(s, ReadyState::Bootstrapping(BootstrapStage::Resolving)))
            .await
            .map_err(|_| closed())?
            .clone();
        match state {
            ReadyState::Failed(e) => Err(e.into()),
            ReadyState::Closed => Err(closed()),
            _ => Ok(()),
        }
    }
}

fn closed() -> CacheError {
    CacheError::InvalidState("cache closed".into())
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn ready_flips_exactly_once() {
        let readiness = Readiness::new();
        readiness.stream_resolved();
        assert!(!readiness.is_ready());
        assert!(readiness.mark_ready());
        assert!(!readiness.mark_ready());
        assert!(!readiness.mark_failed("t", BrokerError::Closed));
        assert_eq!(readiness.state(), ReadyState::Ready);
        readiness.wait_ready().await.unwrap();
    }

    #[tokio::test]
    async fn failure_is_terminal_and_surfaces_to_waiters() {
        let readiness = Arc::new(Readiness::new());
        let waiter = {
            let readiness = readiness.clone();
            tokio::spawn(async move { readiness.wait_ready().await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(readiness.mark_failed("t", BrokerError::TopicNotFound("t".into())));
        assert!(!readiness.mark_ready());

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, CacheError::BootstrapFailure { ref topic, .. } if topic == "t"));
        assert!(readiness.wait_stream_resolved().await.is_err());
    }

    #[tokio::test]
    async fn many_waiters_all_observe_ready() {
        let readiness = Arc::new(Readiness::new());
        let waiters: Vec<_> = (0..8)
            .map(|_| {
                let readiness = readiness.clone();
                tokio::spawn(async move { readiness.wait_ready().await })
            })
            .collect();
        readiness.stream_resolved();
        readiness.mark_ready();
        for waiter in waiters {
            waiter.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn stream_resolution_does_not_imply_ready() {
        let readiness = Readiness::new();
        readiness.stream_resolved();
        readiness.wait_stream_resolved().await.unwrap();
        assert_eq!(readiness.state(), ReadyState::Bootstrapping(BootstrapStage::Consuming));
        let pending = tokio::time::timeout(Duration::from_millis(10), readiness.wait_ready()).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn closing_during_bootstrap_is_not_a_broker_failure() {
        let readiness = Readiness::new();
        assert!(readiness.mark_closed());
        assert!(!readiness.mark_ready());
        assert_eq!(readiness.state(), ReadyState::Closed);
        assert_eq!(readiness.wait_ready().await, Err(CacheError::InvalidState("cache closed".into())));
        assert!(matches!(readiness.wait_stream_resolved().await, Err(CacheError::InvalidState(_))));
    }

    #[tokio::test]
    async fn closing_a_ready_cache_keeps_it_ready() {
        let readiness = Readiness::new();
        readiness.mark_ready();
        assert!(!readiness.mark_closed());
        readiness.wait_ready().await.unwrap();
    }
}
