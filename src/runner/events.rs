//! Execution events and their subscribers

use crate::runner::queue::ItemId;
use std::any::Any;
use std::cell::RefCell;
use std::error::Error as StdError;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Snapshot of a queue item at the time an event was published
#[derive(Debug, Clone, PartialEq)]
pub struct ItemInfo {
    pub id: ItemId,
    pub name: String,
    pub namespace: String,
    pub level: usize,
    pub anonymous: bool,
    pub is_finally: bool,
    /// The item runs a task object's dependencies
    pub is_dep: bool,
    pub error: Option<String>,
}

/// What an item started executing
#[derive(Debug, Clone, PartialEq)]
pub enum ExecuteKind {
    Lookup,
    Shell { cmd: String, anonymous: bool },
    Function,
    SerialArray(Vec<String>),
    ConcurrentArray(Vec<String>),
    Env(String),
    Dep,
}

impl ExecuteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecuteKind::Lookup => "lookup",
            ExecuteKind::Shell { .. } => "shell",
            ExecuteKind::Function => "function",
            ExecuteKind::SerialArray(_) => "serial-arr",
            ExecuteKind::ConcurrentArray(_) => "concurrent-arr",
            ExecuteKind::Env(_) => "env",
            ExecuteKind::Dep => "dep",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A run started
    Run { target: String },
    Execute { item: ItemInfo, kind: ExecuteKind },
    /// An item and everything it queued finished
    DoneItem {
        item: ItemInfo,
        elapsed: Duration,
        error: Option<String>,
    },
    /// An optional task was not registered
    NotFound { name: String },
    /// A name was resolved by walking the namespace search order
    Search { item: ItemInfo, namespace: String },
    SpawnAsync { name: String },
    DoneAsync { name: String },
    /// In-flight work was cancelled after another task failed
    FailCancel { item: ItemInfo },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Run { .. } => "run",
            Event::Execute { .. } => "execute",
            Event::DoneItem { .. } => "done-item",
            Event::NotFound { .. } => "not-found",
            Event::Search { .. } => "search",
            Event::SpawnAsync { .. } => "spawn-async",
            Event::DoneAsync { .. } => "done-async",
            Event::FailCancel { .. } => "fail-cancel",
        }
    }
}

pub type ObserverError = Box<dyn StdError>;

/// Receives every event synchronously as it is published.
///
/// An observer error fails the run but does not stop dispatch.
pub trait Observer {
    fn on_event(&self, event: &Event) -> Result<(), ObserverError>;
}

impl<F> Observer for F
where
    F: Fn(&Event) -> Result<(), ObserverError>,
{
    fn on_event(&self, event: &Event) -> Result<(), ObserverError> {
        self(event)
    }
}

#[derive(Default)]
pub struct EventBus {
    observers: RefCell<Vec<Rc<dyn Observer>>>,
    channels: RefCell<Vec<mpsc::UnboundedSender<Event>>>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus::default()
    }

    pub fn subscribe(&self, observer: impl Observer + 'static) {
        self.observers.borrow_mut().push(Rc::new(observer));
    }

    /// A channel receiving a copy of every event
    pub fn channel(&self) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels.borrow_mut().push(tx);
        rx
    }

    /// Deliver an event, returning the messages of observers that failed
    /// or panicked
    pub fn publish(&self, event: &Event) -> Vec<String> {
        let observers: Vec<Rc<dyn Observer>> = self.observers.borrow().clone();
        let errors = observers
            .iter()
            .filter_map(|o| match panic::catch_unwind(AssertUnwindSafe(|| o.on_event(event))) {
                Ok(result) => result.err().map(|e| e.to_string()),
                Err(payload) => Some(panic_message(payload.as_ref())),
            })
            .collect();
        self.channels
            .borrow_mut()
            .retain(|tx| tx.send(event.clone()).is_ok());
        errors
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let message = payload
        .downcast_ref::<&str>()
        .map(|m| m.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("observer panicked: {}", message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_reaches_observers_and_channels() {
        let bus = EventBus::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(move |event: &Event| -> Result<(), ObserverError> {
            sink.borrow_mut().push(event.name());
            Ok(())
        });
        let mut rx = bus.channel();

        let errors = bus.publish(&Event::NotFound {
            name: "foo".to_string(),
        });
        assert!(errors.is_empty());
        assert_eq!(*seen.borrow(), vec!["not-found"]);
        assert_eq!(
            rx.try_recv().unwrap(),
            Event::NotFound {
                name: "foo".to_string()
            }
        );
    }

    #[test]
    fn test_observer_error_is_reported() {
        let bus = EventBus::new();
        bus.subscribe(|_: &Event| -> Result<(), ObserverError> { Err("boom".into()) });
        let errors = bus.publish(&Event::Run {
            target: "x".to_string(),
        });
        assert_eq!(errors, vec!["boom".to_string()]);
    }

    #[test]
    fn test_observer_panic_is_reported() {
        let bus = EventBus::new();
        bus.subscribe(|_: &Event| -> Result<(), ObserverError> { panic!("listener broke") });
        let mut rx = bus.channel();
        let errors = bus.publish(&Event::Run {
            target: "x".to_string(),
        });
        assert_eq!(errors, vec!["observer panicked: listener broke".to_string()]);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_dropped_channel_is_removed() {
        let bus = EventBus::new();
        drop(bus.channel());
        bus.publish(&Event::Run {
            target: "x".to_string(),
        });
        assert!(bus.channels.borrow().is_empty());
    }
}
