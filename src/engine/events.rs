// Event bus — progress and status fan-out to any number of observers.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::broadcast;

const STREAM_CAPACITY: usize = 256;

/// Something observers can receive.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Overall progress in percent, 0.0..=100.0.
    Progress(f64),
    /// Human-readable status line.
    Status(String),
}

type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;
type StatusFn = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    progress: Vec<(u64, ProgressFn)>,
    status: Vec<(u64, StatusFn)>,
}

/// Cloneable handle to a shared set of listeners.
#[derive(Clone)]
pub struct EventBus {
    listeners: Arc<Mutex<Listeners>>,
    stream: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (stream, _) = broadcast::channel(STREAM_CAPACITY);
        Self {
            listeners: Arc::new(Mutex::new(Listeners::default())),
            stream,
        }
    }

    /// Register a progress callback. It stays registered until the returned
    /// handle is dropped or [`Subscription::unsubscribe`] is called.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn on_progress(&self, f: impl Fn(f64) + Send + Sync + 'static) -> Subscription {
        let mut listeners = self.listeners.lock();
        let id = listeners.next_id;
        listeners.next_id += 1;
        let f: ProgressFn = Arc::new(f);
        listeners.progress.push((id, f));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn on_status(&self, f: impl Fn(&str) + Send + Sync + 'static) -> Subscription {
        let mut listeners = self.listeners.lock();
        let id = listeners.next_id;
        listeners.next_id += 1;
        let f: StatusFn = Arc::new(f);
        listeners.status.push((id, f));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Receive every event as an async stream. Slow receivers may observe
    /// `RecvError::Lagged` and skip ahead.
    pub fn stream(&self) -> broadcast::Receiver<EngineEvent> {
        self.stream.subscribe()
    }

    pub fn emit_progress(&self, percent: f64) {
        let percent = percent.clamp(0.0, 100.0);
        // Snapshot so callbacks can subscribe/unsubscribe without deadlocking.
        let callbacks: Vec<ProgressFn> = {
            let listeners = self.listeners.lock();
            listeners.progress.iter().map(|(_, f)| f.clone()).collect()
        };
        for cb in callbacks {
            cb(percent);
        }
        let _ = self.stream.send(EngineEvent::Progress(percent));
    }

    pub fn emit_status(&self, message: impl Into<String>) {
        let message = message.into();
        let callbacks: Vec<StatusFn> = {
            let listeners = self.listeners.lock();
            listeners.status.iter().map(|(_, f)| f.clone()).collect()
        };
        for cb in callbacks {
            cb(&message);
        }
        let _ = self.stream.send(EngineEvent::Status(message));
    }

    /// Number of registered callbacks (progress + status).
    pub fn listener_count(&self) -> usize {
        let listeners = self.listeners.lock();
        listeners.progress.len() + listeners.status.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Disposer for a registered callback.
pub struct Subscription {
    id: u64,
    listeners: Weak<Mutex<Listeners>>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            let mut listeners = listeners.lock();
            listeners.progress.retain(|(id, _)| *id != self.id);
            listeners.status.retain(|(id, _)| *id != self.id);
        }
    }
}
