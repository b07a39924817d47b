//! Connection lifecycle callbacks
//!
//! The client library reports connection events through a single callback.
//! This module turns those into lifecycle events (telling a reconnect apart
//! from the first connect) and fans them out to observers. Observers only
//! report; retry behaviour stays with the client library.

use async_nats::{ClientError, Event};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn, Span};

/// Lifecycle event as seen by observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// First successful connection
    Connected,
    /// Connection dropped; the client will retry
    Disconnected,
    /// Connected again after a disconnect
    Reconnected,
    /// Client shut down after every handle was dropped or drained
    Closed,
    /// Reconnect attempts ran out; the connection is gone for good
    ReconnectsExhausted,
    /// Server is shutting down and asked clients to move
    LameDuck,
    /// Client started draining
    Draining,
    /// Server, client or slow-consumer error
    Error(String),
}

/// Receives lifecycle events for a connection
pub trait ConnectionObserver: Send + Sync {
    fn on_event(&self, event: &LifecycleEvent);
}

/// Classifies client events and forwards them to every observer
pub struct EventDispatcher {
    observers: Vec<Arc<dyn ConnectionObserver>>,
    /// Set between a disconnect and the next connect
    disconnected: AtomicBool,
}

impl EventDispatcher {
    pub fn new(observers: Vec<Arc<dyn ConnectionObserver>>) -> Self {
        Self {
            observers,
            disconnected: AtomicBool::new(false),
        }
    }

    /// Map a client event to a lifecycle event, updating reconnect tracking
    pub fn classify(&self, event: Event) -> LifecycleEvent {
        match event {
            Event::Connected => {
                if self.disconnected.swap(false, Ordering::SeqCst) {
                    LifecycleEvent::Reconnected
                } else {
                    LifecycleEvent::Connected
                }
            }
            Event::Disconnected => {
                self.disconnected.store(true, Ordering::SeqCst);
                LifecycleEvent::Disconnected
            }
            Event::Closed => LifecycleEvent::Closed,
            Event::LameDuckMode => LifecycleEvent::LameDuck,
            Event::Draining => LifecycleEvent::Draining,
            Event::SlowConsumer(sid) => {
                LifecycleEvent::Error(format!("slow consumer on subscription {sid}"))
            }
            Event::ServerError(err) => LifecycleEvent::Error(format!("server error: {err}")),
            Event::ClientError(ClientError::MaxReconnects) => LifecycleEvent::ReconnectsExhausted,
            Event::ClientError(err) => LifecycleEvent::Error(format!("client error: {err}")),
        }
    }

    /// Classify and deliver an event
    pub fn dispatch(&self, event: Event) {
        let event = self.classify(event);
        for observer in &self.observers {
            observer.on_event(&event);
        }
    }
}

/// Default observer: logs every event under the connection span
pub struct LoggingObserver {
    broker: String,
    reconnect_window: Duration,
    span: Span,
}

impl LoggingObserver {
    pub fn new(broker: impl Into<String>, reconnect_window: Duration, span: Span) -> Self {
        Self {
            broker: broker.into(),
            reconnect_window,
            span,
        }
    }
}

impl ConnectionObserver for LoggingObserver {
    fn on_event(&self, event: &LifecycleEvent) {
        let _enter = self.span.enter();
        match event {
            LifecycleEvent::Connected => {
                debug!(broker = %self.broker, "Connection established");
            }
            LifecycleEvent::Disconnected => {
                let minutes = self.reconnect_window.as_secs_f64() / 60.0;
                warn!(
                    broker = %self.broker,
                    "Disconnected. Will attempt reconnects for {:.0}m",
                    minutes
                );
            }
            LifecycleEvent::Reconnected => {
                warn!(broker = %self.broker, "Successfully reconnected");
            }
            LifecycleEvent::Closed => {
                warn!(broker = %self.broker, "NATS connection closed");
            }
            LifecycleEvent::ReconnectsExhausted => {
                warn!(
                    broker = %self.broker,
                    "NATS connection closed: reconnects exhausted"
                );
            }
            LifecycleEvent::LameDuck => {
                warn!(broker = %self.broker, "Server entered lame duck mode");
            }
            LifecycleEvent::Draining => {
                debug!(broker = %self.broker, "Draining connection");
            }
            LifecycleEvent::Error(err) => {
                error!(broker = %self.broker, err = %err, "Connection error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::capture_logs;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<LifecycleEvent>>,
    }

    impl ConnectionObserver for Recorder {
        fn on_event(&self, event: &LifecycleEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    fn dispatcher_with(recorder: &Arc<Recorder>) -> EventDispatcher {
        let logging = Arc::new(LoggingObserver::new(
            "nats://127.0.0.1:4222",
            Duration::from_secs(600),
            Span::none(),
        ));
        EventDispatcher::new(vec![logging, recorder.clone()])
    }

    #[test]
    fn test_first_connect_is_not_reconnect() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = dispatcher_with(&recorder);

        dispatcher.dispatch(Event::Connected);

        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec![LifecycleEvent::Connected]
        );
    }

    #[test]
    fn test_disconnect_then_connect_is_reconnect() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = dispatcher_with(&recorder);

        dispatcher.dispatch(Event::Connected);
        dispatcher.dispatch(Event::Disconnected);
        dispatcher.dispatch(Event::Connected);
        dispatcher.dispatch(Event::Connected);

        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec![
                LifecycleEvent::Connected,
                LifecycleEvent::Disconnected,
                LifecycleEvent::Reconnected,
                LifecycleEvent::Connected,
            ]
        );
    }

    #[test]
    fn test_slow_consumer_is_error() {
        let dispatcher = EventDispatcher::new(Vec::new());
        match dispatcher.classify(Event::SlowConsumer(7)) {
            LifecycleEvent::Error(msg) => assert!(msg.contains('7')),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_max_reconnects_is_exhaustion() {
        let dispatcher = EventDispatcher::new(Vec::new());
        assert_eq!(
            dispatcher.classify(Event::ClientError(ClientError::MaxReconnects)),
            LifecycleEvent::ReconnectsExhausted
        );
        assert!(matches!(
            dispatcher.classify(Event::ClientError(ClientError::Other("IO error".to_string()))),
            LifecycleEvent::Error(_)
        ));
    }

    #[test]
    fn test_exhaustion_logs_close_line() {
        let observer = LoggingObserver::new(
            "nats://127.0.0.1:4222",
            Duration::from_secs(600),
            Span::none(),
        );

        let logs = capture_logs(|| observer.on_event(&LifecycleEvent::ReconnectsExhausted));
        assert!(logs.contains("NATS connection closed: reconnects exhausted"));

        let logs = capture_logs(|| observer.on_event(&LifecycleEvent::Disconnected));
        assert!(logs.contains("Will attempt reconnects for 10m"));
    }

    #[test]
    fn test_closed_and_lame_duck() {
        let dispatcher = EventDispatcher::new(Vec::new());
        assert_eq!(dispatcher.classify(Event::Closed), LifecycleEvent::Closed);
        assert_eq!(
            dispatcher.classify(Event::LameDuckMode),
            LifecycleEvent::LameDuck
        );
    }
}
