//! Two-phase change notification
//!
//! Every mutation of an element or package is announced to its observers
//! twice, inline with the mutating call: once before the backend write
//! ([`Phase::Pre`]) and once after it ([`Phase::Post`]). Post-phase element
//! changes are forwarded to the owning package as [`Change::Element`].
//!
//! Holding a [`NoNotify`] guard suppresses every event of the package and
//! its elements until the guard is dropped.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// When an observer is called, relative to the backend write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pre,
    Post,
}

/// What changed
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// A named attribute (`url`, `begin`, `content_mimetype`...)
    Attribute(String),
    /// A metadata key
    Meta(String),
    /// Members of a relation or items of a list
    Items,
    Renamed { old: String },
    Deleted,
    /// Package level: a tag association was added
    TagAdded { element: String, tag: String },
    /// Package level: a tag association was removed
    TagRemoved { element: String, tag: String },
    /// Package level: a new own element
    Created(String),
    /// Package level: forwarded change of an own element
    Element { id: String, change: Box<Change> },
    Closed,
}

/// Handle returned by [`EventHub::connect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Callback = Rc<dyn Fn(Phase, &Change)>;

/// Observer list of one element or package
#[derive(Default)]
pub struct EventHub {
    observers: RefCell<Vec<(ObserverId, Callback)>>,
    next_id: Cell<u64>,
}

impl EventHub {
    pub fn connect(&self, callback: impl Fn(Phase, &Change) + 'static) -> ObserverId {
        let id = ObserverId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.observers.borrow_mut().push((id, Rc::new(callback)));
        id
    }

    /// Returns false if `id` was not connected
    pub fn disconnect(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.borrow_mut();
        let before = observers.len();
        observers.retain(|(oid, _)| *oid != id);
        observers.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.observers.borrow().is_empty()
    }

    /// Call every observer; observers may connect or disconnect meanwhile
    pub fn emit(&self, phase: Phase, change: &Change) {
        let callbacks: Vec<Callback> = self
            .observers
            .borrow()
            .iter()
            .map(|(_, cb)| Rc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(phase, change);
        }
    }
}

/// Shared suppression counter of a package
#[derive(Debug, Clone, Default)]
pub(crate) struct Mute(Rc<Cell<usize>>);

impl Mute {
    pub fn is_muted(&self) -> bool {
        self.0.get() > 0
    }

    pub fn guard(&self) -> NoNotify {
        self.0.set(self.0.get() + 1);
        NoNotify {
            counter: Rc::clone(&self.0),
        }
    }
}

/// Scope during which no event is emitted; see [`crate::Package::no_notify`]
#[must_use = "events are only suppressed while the guard is alive"]
pub struct NoNotify {
    counter: Rc<Cell<usize>>,
}

impl Drop for NoNotify {
    fn drop(&mut self) {
        self.counter.set(self.counter.get().saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_in_connection_order() {
        let hub = EventHub::default();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let s = Rc::clone(&seen);
        hub.connect(move |phase, _| s.borrow_mut().push((1, phase)));
        let s = Rc::clone(&seen);
        let second = hub.connect(move |phase, _| s.borrow_mut().push((2, phase)));

        hub.emit(Phase::Pre, &Change::Deleted);
        assert!(hub.disconnect(second));
        assert!(!hub.disconnect(second));
        hub.emit(Phase::Post, &Change::Deleted);

        assert_eq!(
            *seen.borrow(),
            vec![(1, Phase::Pre), (2, Phase::Pre), (1, Phase::Post)]
        );
    }

    #[test]
    fn test_observer_may_disconnect_itself() {
        let hub = Rc::new(EventHub::default());
        let id = Rc::new(Cell::new(None));

        let h = Rc::clone(&hub);
        let i = Rc::clone(&id);
        let oid = hub.connect(move |_, _| {
            if let Some(oid) = i.get() {
                h.disconnect(oid);
            }
        });
        id.set(Some(oid));

        hub.emit(Phase::Post, &Change::Items);
        assert!(hub.is_empty());
    }

    #[test]
    fn test_nested_guards() {
        let mute = Mute::default();
        assert!(!mute.is_muted());
        let outer = mute.guard();
        {
            let _inner = mute.guard();
            assert!(mute.is_muted());
        }
        assert!(mute.is_muted());
        drop(outer);
        assert!(!mute.is_muted());
    }
}
