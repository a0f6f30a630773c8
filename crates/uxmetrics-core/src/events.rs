//! Lifecycle events and the synchronous emitter that dispatches them.
//!
//! Every state change on a metric produces a [`MetricEvent`]. Listeners are
//! invoked on the calling thread, in registration order, before the
//! transition call returns. A panicking listener is contained and logged so
//! that the remaining listeners still run.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use tracing::{error, trace};

/// The closed set of lifecycle events.
///
/// Plain metrics emit `Start`, `Stop` and `Reset`; interaction metrics
/// additionally emit `Success` and `Failure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricEvent {
    Start,
    Stop,
    Reset,
    Success,
    Failure,
}

impl MetricEvent {
    /// Events every metric variant can emit.
    pub const LIFECYCLE: [MetricEvent; 3] = [MetricEvent::Start, MetricEvent::Stop, MetricEvent::Reset];

    /// Outcome events emitted only by interaction metrics.
    pub const OUTCOME: [MetricEvent; 2] = [MetricEvent::Success, MetricEvent::Failure];

    pub const ALL: [MetricEvent; 5] = [
        MetricEvent::Start,
        MetricEvent::Stop,
        MetricEvent::Reset,
        MetricEvent::Success,
        MetricEvent::Failure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricEvent::Start => "start",
            MetricEvent::Stop => "stop",
            MetricEvent::Reset => "reset",
            MetricEvent::Success => "success",
            MetricEvent::Failure => "failure",
        }
    }
}

impl fmt::Display for MetricEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a registered listener so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<T> = Rc<dyn Fn(&T)>;

/// Publish/subscribe core keyed by a closed event type `E`, delivering a
/// borrowed payload `T` to each listener.
pub struct Emitter<E, T> {
    next_id: Cell<u64>,
    listeners: RefCell<Vec<(ListenerId, E, Listener<T>)>>,
}

impl<E, T> Emitter<E, T>
where
    E: Copy + Eq + fmt::Debug,
{
    pub fn new() -> Self {
        Self {
            next_id: Cell::new(0),
            listeners: RefCell::new(Vec::new()),
        }
    }

    /// Subscribe `listener` to `event`.
    pub fn on<F>(&self, event: E, listener: F) -> ListenerId
    where
        F: Fn(&T) + 'static,
    {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.listeners
            .borrow_mut()
            .push((id, event, Rc::new(listener)));
        trace!(?event, listener = id.0, "listener added");
        id
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(listener_id, _, _)| *listener_id != id);
        listeners.len() != before
    }

    pub fn listener_count(&self, event: E) -> usize {
        self.listeners
            .borrow()
            .iter()
            .filter(|(_, e, _)| *e == event)
            .count()
    }

    /// Invoke every listener of `event` with `payload`.
    ///
    /// The listener list is captured before the first call, so listeners may
    /// subscribe, unsubscribe or emit again without invalidating the loop.
    /// Listeners added during an emit are first called on the next emit.
    /// Returns the number of listeners invoked.
    pub fn emit(&self, event: E, payload: &T) -> usize {
        let listeners: Vec<Listener<T>> = self
            .listeners
            .borrow()
            .iter()
            .filter(|(_, e, _)| *e == event)
            .map(|(_, _, listener)| Rc::clone(listener))
            .collect();

        trace!(?event, count = listeners.len(), "emitting event");
        for listener in &listeners {
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| listener(payload))) {
                error!(?event, "event listener panicked: {}", panic_message(panic.as_ref()));
            }
        }
        listeners.len()
    }
}

impl<E, T> Default for Emitter<E, T>
where
    E: Copy + Eq + fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E, T> fmt::Debug for Emitter<E, T>
where
    E: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let events: Vec<String> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, event, _)| format!("{event:?}"))
            .collect();
        f.debug_struct("Emitter").field("listeners", &events).finish()
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listeners_run_in_registration_order() {
        let emitter: Emitter<MetricEvent, u32> = Emitter::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let seen = Rc::clone(&seen);
            emitter.on(MetricEvent::Start, move |payload: &u32| {
                seen.borrow_mut().push(format!("{tag}{payload}"));
            });
        }

        assert_eq!(emitter.emit(MetricEvent::Start, &7), 3);
        assert_eq!(*seen.borrow(), vec!["a7", "b7", "c7"]);
    }

    #[test]
    fn emit_only_reaches_matching_event() {
        let emitter: Emitter<MetricEvent, ()> = Emitter::new();
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        emitter.on(MetricEvent::Stop, move |_| counter.set(counter.get() + 1));

        assert_eq!(emitter.emit(MetricEvent::Start, &()), 0);
        assert_eq!(emitter.emit(MetricEvent::Stop, &()), 1);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn off_removes_listener() {
        let emitter: Emitter<MetricEvent, ()> = Emitter::new();
        let id = emitter.on(MetricEvent::Reset, |_| {});
        assert_eq!(emitter.listener_count(MetricEvent::Reset), 1);
        assert!(emitter.off(id));
        assert!(!emitter.off(id));
        assert_eq!(emitter.listener_count(MetricEvent::Reset), 0);
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let emitter: Emitter<MetricEvent, ()> = Emitter::new();
        let reached = Rc::new(Cell::new(false));
        emitter.on(MetricEvent::Stop, |_| panic!("broken listener"));
        let flag = Rc::clone(&reached);
        emitter.on(MetricEvent::Stop, move |_| flag.set(true));

        emitter.emit(MetricEvent::Stop, &());
        assert!(reached.get());
    }

    #[test]
    fn listener_may_subscribe_during_emit() {
        let emitter: Rc<Emitter<MetricEvent, ()>> = Rc::new(Emitter::new());
        let inner = Rc::clone(&emitter);
        emitter.on(MetricEvent::Start, move |_| {
            inner.on(MetricEvent::Start, |_| {});
        });

        assert_eq!(emitter.emit(MetricEvent::Start, &()), 1);
        assert_eq!(emitter.listener_count(MetricEvent::Start), 2);
    }

    #[test]
    fn event_names_serialize_lowercase() {
        assert_eq!(
            serde_json::to_string(&MetricEvent::Failure).unwrap(),
            "\"failure\""
        );
        assert_eq!(MetricEvent::Success.to_string(), "success");
    }
}
