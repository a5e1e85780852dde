use std::{
    cell::{Cell, RefCell},
    collections::BTreeMap,
    rc::{Rc, Weak},
};

use shared::domain::CorrelationId;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::debug;

#[derive(Default)]
struct SignalInner {
    cancelled: Cell<bool>,
    notify: Notify,
    children: RefCell<Vec<Weak<SignalInner>>>,
}

impl SignalInner {
    fn cancel(&self) {
        if self.cancelled.replace(true) {
            return;
        }
        self.notify.notify_waiters();
        let children = std::mem::take(&mut *self.children.borrow_mut());
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
    }
}

/// Cooperative cancellation flag shared by a command and everything it delegates to.
#[derive(Clone, Default)]
pub struct CancelSignal {
    inner: Rc<SignalInner>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// A signal that is cancelled together with `self` but can also be cancelled on its own.
    pub fn child(&self) -> Self {
        let child = Self::new();
        if self.is_cancelled() {
            child.inner.cancelled.set(true);
        } else {
            let mut children = self.inner.children.borrow_mut();
            children.retain(|existing| existing.strong_count() > 0);
            children.push(Rc::downgrade(&child.inner));
        }
        child
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.get()
    }

    /// Resolves once the signal is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for CancelSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelSignal")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("correlation id {0} is already in flight")]
    AlreadyInFlight(CorrelationId),
}

struct InFlight {
    command_type: String,
    signal: CancelSignal,
}

/// Tracks in-flight commands by correlation id.
#[derive(Default)]
pub struct CorrelationRegistry {
    in_flight: RefCell<BTreeMap<CorrelationId, InFlight>>,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self) -> CorrelationId {
        CorrelationId::generate()
    }

    pub fn begin(
        &self,
        correlation_id: CorrelationId,
        command_type: &str,
        signal: CancelSignal,
    ) -> Result<(), RegistryError> {
        let mut in_flight = self.in_flight.borrow_mut();
        if in_flight.contains_key(&correlation_id) {
            return Err(RegistryError::AlreadyInFlight(correlation_id));
        }
        in_flight.insert(
            correlation_id,
            InFlight {
                command_type: command_type.to_string(),
                signal,
            },
        );
        Ok(())
    }

    /// Requests cancellation; returns false when nothing with that id is running.
    pub fn cancel(&self, correlation_id: &CorrelationId) -> bool {
        let signal = self
            .in_flight
            .borrow()
            .get(correlation_id)
            .map(|entry| (entry.signal.clone(), entry.command_type.clone()));
        match signal {
            Some((signal, command_type)) => {
                debug!(correlation_id = %correlation_id, command = %command_type, "cancel requested");
                signal.cancel();
                true
            }
            None => false,
        }
    }

    /// Releases the id; returns false when it was not in flight.
    pub fn finish(&self, correlation_id: &CorrelationId) -> bool {
        self.in_flight.borrow_mut().remove(correlation_id).is_some()
    }

    pub fn is_in_flight(&self, correlation_id: &CorrelationId) -> bool {
        self.in_flight.borrow().contains_key(correlation_id)
    }

    pub fn in_flight(&self) -> Vec<CorrelationId> {
        self.in_flight.borrow().keys().cloned().collect()
    }
}

#[cfg(test)]
#[path = "tests/correlation_tests.rs"]
mod tests;
