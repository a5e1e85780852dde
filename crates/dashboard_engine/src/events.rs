use std::{
    any::Any,
    cell::{Cell, RefCell},
    panic::{catch_unwind, AssertUnwindSafe},
    rc::{Rc, Weak},
};

use shared::protocol::DashboardEvent;
use tokio::sync::broadcast;
use tracing::{error, trace};

type Listener<E> = Rc<dyn Fn(&E)>;

struct ListenerTable<E> {
    next_id: Cell<u64>,
    entries: RefCell<Vec<(u64, Listener<E>)>>,
}

/// Ordered listener registry. Delivery follows registration order; a listener added or
/// removed during delivery takes effect from the next notification. A panicking listener
/// is logged and skipped; the remaining listeners still run.
pub(crate) struct Listeners<E> {
    table: Rc<ListenerTable<E>>,
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self {
            table: Rc::new(ListenerTable {
                next_id: Cell::new(0),
                entries: RefCell::new(Vec::new()),
            }),
        }
    }
}

impl<E: 'static> Listeners<E> {
    pub(crate) fn add(&self, listener: impl Fn(&E) + 'static) -> Subscription {
        let id = self.table.next_id.get();
        self.table.next_id.set(id + 1);
        self.table
            .entries
            .borrow_mut()
            .push((id, Rc::new(listener)));

        let table: Weak<ListenerTable<E>> = Rc::downgrade(&self.table);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(table) = table.upgrade() {
                    table
                        .entries
                        .borrow_mut()
                        .retain(|(entry_id, _)| *entry_id != id);
                }
            })),
        }
    }

    pub(crate) fn notify(&self, value: &E) {
        let snapshot: Vec<Listener<E>> = self
            .table
            .entries
            .borrow()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in snapshot {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(value))) {
                error!(panic = %panic_message(panic.as_ref()), "listener panicked");
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.table.entries.borrow().len()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// Keeps a listener registered until dropped or explicitly unsubscribed.
#[must_use = "dropping a subscription unregisters the listener"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    /// Keeps the listener registered for the lifetime of its registry.
    pub fn detach(mut self) {
        self.cancel = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// Fans events out to registered listeners in emission order, then to broadcast receivers.
pub struct EventBus {
    listeners: Listeners<DashboardEvent>,
    sender: broadcast::Sender<DashboardEvent>,
}

impl EventBus {
    pub fn new(channel_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(channel_capacity);
        Self {
            listeners: Listeners::default(),
            sender,
        }
    }

    pub fn subscribe(&self, listener: impl Fn(&DashboardEvent) + 'static) -> Subscription {
        self.listeners.add(listener)
    }

    /// Receiver for consumers that prefer polling; lagging receivers lose the oldest events.
    pub fn receiver(&self) -> broadcast::Receiver<DashboardEvent> {
        self.sender.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn emit(&self, event: DashboardEvent) {
        trace!(
            event = event.event_type(),
            correlation_id = %event.correlation_id,
            "emitting event"
        );
        self.listeners.notify(&event);
        // No receivers is not an error.
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
#[path = "tests/events_tests.rs"]
mod tests;
