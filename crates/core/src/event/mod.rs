//! Publish/subscribe for the events a visualizer emits.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::{CaptureError, MediaStreamRef};

/// Names subscribers can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    DeviceReady,
    DeviceError,
}

/// Events emitted by [`DeviceVisualizer`](crate::DeviceVisualizer).
#[derive(Clone)]
pub enum VisualizerEvent {
    /// A capture stream was acquired and visualization started.
    DeviceReady(MediaStreamRef),
    /// Acquiring a capture stream failed. State is unchanged.
    DeviceError(CaptureError),
}

impl VisualizerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::DeviceReady(_) => EventKind::DeviceReady,
            Self::DeviceError(_) => EventKind::DeviceError,
        }
    }
}

impl fmt::Debug for VisualizerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceReady(stream) => f.debug_tuple("DeviceReady").field(&stream.id()).finish(),
            Self::DeviceError(err) => f.debug_tuple("DeviceError").field(err).finish(),
        }
    }
}

/// Callback invoked for each matching event.
pub type EventCallback = Arc<dyn Fn(&VisualizerEvent) + Send + Sync>;

/// Wraps a closure into an [`EventCallback`].
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(&VisualizerEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Identifies a subscription so it can be removed with [`Observer::un`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    callback: EventCallback,
    once: bool,
}

/// Ordered subscriber lists keyed by event name. Delivery is synchronous and
/// follows subscription order within one event name.
#[derive(Default)]
pub struct Observer {
    handlers: HashMap<EventKind, Vec<Subscription>>,
    next_id: u64,
}

impl Observer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&mut self, kind: EventKind, callback: EventCallback) -> SubscriptionId {
        self.subscribe(kind, callback, false)
    }

    /// Subscribes for the next matching event only.
    pub fn once(&mut self, kind: EventKind, callback: EventCallback) -> SubscriptionId {
        self.subscribe(kind, callback, true)
    }

    /// Removes a subscription. Returns `false` if it was already gone.
    pub fn un(&mut self, id: SubscriptionId) -> bool {
        for subscribers in self.handlers.values_mut() {
            if let Some(index) = subscribers.iter().position(|sub| sub.id == id) {
                subscribers.remove(index);
                return true;
            }
        }
        false
    }

    pub fn un_all(&mut self) {
        self.handlers.clear();
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }

    /// Delivers `event` to every subscriber registered for its kind at the
    /// time of the call.
    pub fn fire_event(&mut self, event: &VisualizerEvent) {
        let Some(subscribers) = self.handlers.get_mut(&event.kind()) else {
            return;
        };

        let callbacks: Vec<EventCallback> = subscribers
            .iter()
            .map(|sub| sub.callback.clone())
            .collect();
        subscribers.retain(|sub| !sub.once);

        for callback in callbacks {
            callback(event);
        }
    }

    fn subscribe(&mut self, kind: EventKind, callback: EventCallback, once: bool) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.handlers.entry(kind).or_default().push(Subscription {
            id,
            callback,
            once,
        });
        id
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("device_ready", &self.subscriber_count(EventKind::DeviceReady))
            .field("device_error", &self.subscriber_count(EventKind::DeviceError))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> EventCallback {
        let log = log.clone();
        event_callback(move |event| {
            log.lock().unwrap().push(format!("{tag}:{event:?}"));
        })
    }

    fn error_event() -> VisualizerEvent {
        VisualizerEvent::DeviceError(CaptureError::failed("boom"))
    }

    #[test]
    fn delivers_in_subscription_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut observer = Observer::new();
        observer.on(EventKind::DeviceError, recorder(&log, "first"));
        observer.on(EventKind::DeviceError, recorder(&log, "second"));
        observer.on(EventKind::DeviceReady, recorder(&log, "ready"));

        observer.fire_event(&error_event());

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 2);
        assert!(log[0].starts_with("first:"));
        assert!(log[1].starts_with("second:"));
    }

    #[test]
    fn once_subscribers_fire_a_single_time() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut observer = Observer::new();
        observer.once(EventKind::DeviceError, recorder(&log, "once"));

        observer.fire_event(&error_event());
        observer.fire_event(&error_event());

        assert_eq!(log.lock().unwrap().len(), 1);
        assert_eq!(observer.subscriber_count(EventKind::DeviceError), 0);
    }

    #[test]
    fn un_and_un_all_remove_subscribers() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut observer = Observer::new();
        let id = observer.on(EventKind::DeviceError, recorder(&log, "a"));
        observer.on(EventKind::DeviceReady, recorder(&log, "b"));

        assert!(observer.un(id));
        assert!(!observer.un(id));
        observer.fire_event(&error_event());
        assert!(log.lock().unwrap().is_empty());

        observer.un_all();
        assert_eq!(observer.subscriber_count(EventKind::DeviceReady), 0);
    }
}
