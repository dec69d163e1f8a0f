//! The caller's side of a confirmed request.
//!
//! A [`ResultHandle`] and its [`Resolver`] share one settled slot. The
//! resolver fills it once; later attempts are ignored. Waiters and
//! completion consumers all observe that single value.

use crate::RequestError;
use bacwire_core::services::{ComplexAck, ReadPropertyAck, ReadPropertyMultipleAck};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// Successful completion of a confirmed request.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceAck {
    Simple,
    Complex(ComplexAck),
}

impl ServiceAck {
    pub fn into_read_property(self) -> Option<ReadPropertyAck> {
        match self {
            Self::Complex(ComplexAck::ReadProperty(ack)) => Some(ack),
            _ => None,
        }
    }

    pub fn into_read_property_multiple(self) -> Option<ReadPropertyMultipleAck> {
        match self {
            Self::Complex(ComplexAck::ReadPropertyMultiple(ack)) => Some(ack),
            _ => None,
        }
    }
}

pub type Outcome = Result<ServiceAck, RequestError>;

type Consumer = Box<dyn FnOnce(Outcome) + Send>;

struct Shared {
    // `None` once resolved; consumers registered later run immediately.
    consumers: Mutex<Option<Vec<Consumer>>>,
}

/// Awaitable result of a confirmed request.
pub struct ResultHandle {
    rx: watch::Receiver<Option<Outcome>>,
    shared: Arc<Shared>,
}

/// Settles a [`ResultHandle`]. Dropping it unresolved settles the handle
/// with [`RequestError::Shutdown`].
pub struct Resolver {
    tx: watch::Sender<Option<Outcome>>,
    shared: Arc<Shared>,
}

/// A linked handle and resolver.
pub fn pair() -> (ResultHandle, Resolver) {
    let (tx, rx) = watch::channel(None);
    let shared = Arc::new(Shared {
        consumers: Mutex::new(Some(Vec::new())),
    });
    (
        ResultHandle {
            rx,
            shared: shared.clone(),
        },
        Resolver { tx, shared },
    )
}

impl ResultHandle {
    /// A handle that is already settled.
    pub fn resolved(outcome: Outcome) -> Self {
        let (handle, resolver) = pair();
        resolver.resolve(outcome);
        handle
    }

    /// Waits for the outcome.
    pub async fn wait(&self) -> Outcome {
        let mut rx = self.rx.clone();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or(Err(RequestError::Shutdown))
    }

    /// Waits at most `timeout`; `None` if the request is still in progress.
    ///
    /// This bound is independent of the protocol timeouts and retries.
    pub async fn wait_timeout(&self, timeout: Duration) -> Option<Outcome> {
        tokio::time::timeout(timeout, self.wait()).await.ok()
    }

    pub fn try_outcome(&self) -> Option<Outcome> {
        self.rx.borrow().clone()
    }

    pub fn is_resolved(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Runs `consumer` with the outcome: later if unresolved, now otherwise.
    pub fn on_complete(&self, consumer: impl FnOnce(Outcome) + Send + 'static) {
        {
            let mut consumers = lock(&self.shared);
            if let Some(pending) = consumers.as_mut() {
                pending.push(Box::new(consumer));
                return;
            }
        }
        let outcome = self.try_outcome().unwrap_or(Err(RequestError::Shutdown));
        consumer(outcome);
    }
}

impl std::fmt::Debug for ResultHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultHandle")
            .field("outcome", &*self.rx.borrow())
            .finish()
    }
}

impl Resolver {
    /// Settles the handle. Returns `false` if it was already settled.
    pub fn resolve(&self, outcome: Outcome) -> bool {
        let set = self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome.clone());
            true
        });
        if !set {
            return false;
        }
        let consumers = lock(&self.shared).take().unwrap_or_default();
        for consumer in consumers {
            consumer(outcome.clone());
        }
        true
    }

    pub fn is_resolved(&self) -> bool {
        self.tx.borrow().is_some()
    }
}

impl Drop for Resolver {
    fn drop(&mut self) {
        if !self.is_resolved() {
            self.resolve(Err(RequestError::Shutdown));
        }
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

fn lock(shared: &Shared) -> std::sync::MutexGuard<'_, Option<Vec<Consumer>>> {
    shared
        .consumers
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
