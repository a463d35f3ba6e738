//! Contracts for the collaborators a proctored session depends on.
//!
//! The engine never talks to a real camera, display or input stream directly.
//! Everything goes through these traits so sessions can run against the HTTP
//! client bridge in production and against fakes in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::models::{
    CaptureHandle, CaptureSample, DeviceKind, Disposition, EnvironmentSignal, ParticipantSnapshot,
    Report, SupervisorCommand, Violation,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{device} unavailable: {reason}")]
pub struct DeviceFailure {
    pub device: String,
    pub reason: String,
}

impl DeviceFailure {
    pub fn new(device: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("environment signal source unavailable: {0}")]
pub struct SourceUnavailable(pub String);

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("submission rejected: {0}")]
    Rejected(String),
    #[error("submission transport failed: {0}")]
    Transport(#[from] anyhow::Error),
}

/// Keeps a registration alive; the registration is removed on drop.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

pub type Handler<E> = Arc<dyn Fn(&E) -> Disposition + Send + Sync>;

struct HubInner<E> {
    next_id: u64,
    handlers: Vec<(u64, Handler<E>)>,
}

/// Fan-out list of subscribers. Handlers are called outside the lock.
pub struct Hub<E> {
    inner: Arc<Mutex<HubInner<E>>>,
}

impl<E> Clone for Hub<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: 'static> Default for Hub<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: 'static> Hub<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HubInner {
                next_id: 0,
                handlers: Vec::new(),
            })),
        }
    }

    pub fn subscribe(&self, handler: Handler<E>) -> Subscription {
        let id = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.next_id += 1;
            let id = inner.next_id;
            inner.handlers.push((id, handler));
            id
        };

        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                let mut inner = inner.lock().unwrap_or_else(|e| e.into_inner());
                inner.handlers.retain(|(handler_id, _)| *handler_id != id);
            }
        })
    }

    /// Delivers the event to every subscriber; any `Suppress` wins.
    pub fn publish(&self, event: &E) -> Disposition {
        let handlers: Vec<Handler<E>> = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.handlers.iter().map(|(_, h)| Arc::clone(h)).collect()
        };

        handlers
            .iter()
            .fold(Disposition::Allow, |acc, handler| acc.merge(handler(event)))
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .handlers
            .len()
    }
}

/// Camera and microphone access.
#[async_trait]
pub trait CaptureProvider: Send + Sync {
    async fn request_capture(&self, device: DeviceKind) -> Result<CaptureHandle, DeviceFailure>;

    async fn stop(&self, handle: &CaptureHandle);

    /// Takes one still image or audio clip from a running device.
    async fn sample(&self, handle: &CaptureHandle) -> Result<CaptureSample, DeviceFailure>;
}

/// Exclusive display mode (fullscreen).
#[async_trait]
pub trait DisplayProvider: Send + Sync {
    async fn enter(&self) -> Result<(), DeviceFailure>;

    async fn exit(&self);

    fn is_active(&self) -> bool;

    /// Out-of-band "exited unexpectedly" notifications.
    fn watch_exits(&self, handler: Handler<DateTime<Utc>>) -> Subscription;
}

/// Visibility, clipboard, keyboard and context-menu events.
pub trait SignalSource: Send + Sync {
    fn subscribe(
        &self,
        handler: Handler<EnvironmentSignal>,
    ) -> Result<Subscription, SourceUnavailable>;
}

impl SignalSource for Hub<EnvironmentSignal> {
    fn subscribe(
        &self,
        handler: Handler<EnvironmentSignal>,
    ) -> Result<Subscription, SourceUnavailable> {
        Ok(Hub::subscribe(self, handler))
    }
}

#[async_trait]
pub trait SubmissionSink: Send + Sync {
    async fn submit(&self, report: &Report) -> Result<(), SubmissionError>;
}

#[async_trait]
pub trait SampleSink: Send + Sync {
    async fn accept(&self, participant_id: &str, sample: CaptureSample);
}

/// Session-to-supervisor feed.
pub trait MonitorFeed: Send + Sync {
    fn publish_snapshot(&self, test_id: &str, snapshot: ParticipantSnapshot);

    fn publish_violation(&self, test_id: &str, participant_id: &str, violation: &Violation);
}

/// Routes supervisor commands to the participant's running session.
#[async_trait]
pub trait SessionControl: Send + Sync {
    async fn dispatch(&self, test_id: &str, participant_id: &str, command: SupervisorCommand);
}

/// Everything a session needs from the outside world.
#[derive(Clone)]
pub struct Collaborators {
    pub capture: Arc<dyn CaptureProvider>,
    pub display: Arc<dyn DisplayProvider>,
    /// `None` when the environment offers no event stream at all.
    pub signals: Option<Arc<dyn SignalSource>>,
    pub submission: Arc<dyn SubmissionSink>,
    pub samples: Arc<dyn SampleSink>,
    pub monitor: Arc<dyn MonitorFeed>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SignalKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn hub_delivers_until_unsubscribed() {
        let hub: Hub<EnvironmentSignal> = Hub::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let sub = hub.subscribe(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Disposition::Suppress
        }));

        let signal = EnvironmentSignal::new(SignalKind::Copy);
        assert_eq!(hub.publish(&signal), Disposition::Suppress);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        sub.unsubscribe();
        assert_eq!(hub.subscriber_count(), 0);
        assert_eq!(hub.publish(&signal), Disposition::Allow);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_subscription_unregisters() {
        let hub: Hub<u32> = Hub::new();
        {
            let _sub = hub.subscribe(Arc::new(|_| Disposition::Allow));
            assert_eq!(hub.subscriber_count(), 1);
        }
        assert_eq!(hub.subscriber_count(), 0);
    }
}
