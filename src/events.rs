//! Typed event bus, debouncing and wall-clock helpers

use std::cell::{Cell, RefCell};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use tracing::error;
use web_time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch
pub fn now_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or_default()
}

type Listener<E> = Rc<dyn Fn(&E)>;

struct Listeners<E> {
    next_id: Cell<u64>,
    entries: RefCell<Vec<(u64, Listener<E>)>>,
}

/// Single-threaded publish/subscribe channel for one event type
pub struct EventBus<E> {
    listeners: Rc<Listeners<E>>,
}

impl<E: 'static> EventBus<E> {
    pub fn new() -> Self {
        Self {
            listeners: Rc::new(Listeners {
                next_id: Cell::new(0),
                entries: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Register a listener; it stays registered until the handle is dropped
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe(&self, listener: impl Fn(&E) + 'static) -> Subscription {
        let id = self.listeners.next_id.get();
        self.listeners.next_id.set(id + 1);
        self.listeners.entries.borrow_mut().push((id, Rc::new(listener)));

        let weak: Weak<Listeners<E>> = Rc::downgrade(&self.listeners);
        Subscription {
            unsubscribe: Some(Box::new(move || {
                if let Some(listeners) = weak.upgrade() {
                    listeners.entries.borrow_mut().retain(|(entry, _)| *entry != id);
                }
            })),
        }
    }

    /// Deliver `event` to every listener
    ///
    /// Listeners may subscribe or unsubscribe while being notified. Where panics
    /// unwind, a listener that panics is logged and skipped; on
    /// `wasm32-unknown-unknown` panics abort and the module halts instead.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Listener<E>> = self
            .listeners
            .entries
            .borrow()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                error!(target: "errors", "event listener panicked");
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.entries.borrow().len()
    }
}

impl<E: 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle of a registered listener; dropping it unsubscribes
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    /// Keep the listener registered for the lifetime of its bus
    pub fn detach(mut self) {
        self.unsubscribe = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

/// Trailing-edge debounce driven by explicit timestamps
///
/// `trigger` arms or re-arms the deadline; `poll` fires once the quiet period
/// has passed. After `cancel` nothing fires until the next trigger.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Debounce {
    wait_ms: f64,
    deadline: Option<f64>,
}

impl Debounce {
    pub fn new(wait_ms: f64) -> Self {
        Self {
            wait_ms,
            deadline: None,
        }
    }

    pub fn trigger(&mut self, now_ms: f64) {
        self.deadline = Some(now_ms + self.wait_ms);
    }

    /// `true` exactly once per armed deadline
    pub fn poll(&mut self, now_ms: f64) -> bool {
        match self.deadline {
            Some(deadline) if now_ms >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_and_drop() {
        let bus = EventBus::<u32>::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let sink = seen.clone();
        let sub = bus.subscribe(move |v| sink.borrow_mut().push(*v));
        bus.emit(&1);
        assert_eq!(bus.listener_count(), 1);

        drop(sub);
        bus.emit(&2);
        assert_eq!(*seen.borrow(), vec![1]);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_detached_subscription_survives() {
        let bus = EventBus::<()>::new();
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        bus.subscribe(move |_| c.set(c.get() + 1)).detach();
        bus.emit(&());
        bus.emit(&());
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_others() {
        let bus = EventBus::<u32>::new();
        let count = Rc::new(Cell::new(0));
        let _bad = bus.subscribe(|_| panic!("listener failure"));
        let c = count.clone();
        let _good = bus.subscribe(move |_| c.set(c.get() + 1));
        bus.emit(&7);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_subscription_outlives_bus() {
        let bus = EventBus::<u32>::new();
        let sub = bus.subscribe(|_| {});
        drop(bus);
        drop(sub);
    }

    #[test]
    fn test_debounce() {
        let mut d = Debounce::new(100.0);
        assert!(!d.poll(0.0));
        d.trigger(0.0);
        d.trigger(50.0);
        assert!(!d.poll(120.0));
        assert!(d.poll(150.0));
        assert!(!d.poll(300.0));

        d.trigger(400.0);
        d.cancel();
        assert!(!d.poll(1000.0));
    }
}
