use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::metrics::RESOURCE_ACQUISITIONS_TOTAL;
use crate::models::{CaptureHandle, DeviceKind, Disposition, ResourceEvent, ResourceKind};
use crate::services::providers::{
    CaptureProvider, DisplayProvider, SampleSink, Subscription,
};

/// Structured result of one acquisition attempt. Never an error path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Captured(CaptureHandle),
    DisplayLocked,
    Failed { kind: ResourceKind, reason: String },
}

impl AcquireOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, AcquireOutcome::Failed { .. })
    }
}

pub type ResourceEventSink = Arc<dyn Fn(ResourceEvent) + Send + Sync>;

struct HeldDevice {
    handle: CaptureHandle,
    sampler: Option<JoinHandle<()>>,
}

/// Owns every capture device and the exclusive display mode of one session.
pub struct ResourceGuard {
    participant_id: String,
    capture: Arc<dyn CaptureProvider>,
    display: Arc<dyn DisplayProvider>,
    samples: Arc<dyn SampleSink>,
    events: ResourceEventSink,
    sample_interval: Duration,
    held: Vec<HeldDevice>,
    display_locked: bool,
    exit_watch: Option<Subscription>,
    torn_down: bool,
}

impl ResourceGuard {
    pub fn new(
        participant_id: impl Into<String>,
        capture: Arc<dyn CaptureProvider>,
        display: Arc<dyn DisplayProvider>,
        samples: Arc<dyn SampleSink>,
        events: ResourceEventSink,
        sample_interval: Duration,
    ) -> Self {
        Self {
            participant_id: participant_id.into(),
            capture,
            display,
            samples,
            events,
            sample_interval,
            held: Vec::new(),
            display_locked: false,
            exit_watch: None,
            torn_down: false,
        }
    }

    pub async fn acquire(&mut self, kind: ResourceKind) -> AcquireOutcome {
        if self.torn_down {
            return AcquireOutcome::Failed {
                kind,
                reason: "resources already released".to_string(),
            };
        }

        let outcome = match kind.device() {
            Some(device) => self.acquire_device(device).await,
            None => self.acquire_display().await,
        };

        let label = if outcome.is_success() {
            "success"
        } else {
            "failure"
        };
        RESOURCE_ACQUISITIONS_TOTAL
            .with_label_values(&[kind.as_str(), label])
            .inc();

        outcome
    }

    async fn acquire_device(&mut self, device: DeviceKind) -> AcquireOutcome {
        match self.capture.request_capture(device).await {
            Ok(handle) => {
                tracing::info!(
                    "Capture acquired: participant={}, device={}",
                    self.participant_id,
                    device.as_str()
                );
                let sampler = self.spawn_sampler(handle.clone());
                self.held.push(HeldDevice {
                    handle: handle.clone(),
                    sampler: Some(sampler),
                });
                AcquireOutcome::Captured(handle)
            }
            Err(e) => {
                tracing::warn!(
                    "Capture refused: participant={}, device={}, reason={}",
                    self.participant_id,
                    device.as_str(),
                    e.reason
                );
                AcquireOutcome::Failed {
                    kind: device.into(),
                    reason: e.reason,
                }
            }
        }
    }

    async fn acquire_display(&mut self) -> AcquireOutcome {
        if self.display_locked {
            return AcquireOutcome::DisplayLocked;
        }

        match self.display.enter().await {
            Ok(()) => {
                self.display_locked = true;
                let events = Arc::clone(&self.events);
                self.exit_watch = Some(self.display.watch_exits(Arc::new(
                    move |at: &DateTime<Utc>| {
                        events(ResourceEvent::FullscreenLost { at: *at });
                        Disposition::Allow
                    },
                )));
                tracing::info!("Fullscreen entered: participant={}", self.participant_id);
                AcquireOutcome::DisplayLocked
            }
            Err(e) => {
                tracing::warn!(
                    "Fullscreen refused: participant={}, reason={}",
                    self.participant_id,
                    e.reason
                );
                AcquireOutcome::Failed {
                    kind: ResourceKind::Fullscreen,
                    reason: e.reason,
                }
            }
        }
    }

    /// Periodically samples a running device until it fails or is released.
    fn spawn_sampler(&self, handle: CaptureHandle) -> JoinHandle<()> {
        let capture = Arc::clone(&self.capture);
        let samples = Arc::clone(&self.samples);
        let events = Arc::clone(&self.events);
        let participant_id = self.participant_id.clone();
        let period = self.sample_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                interval.tick().await;
                match capture.sample(&handle).await {
                    Ok(sample) => {
                        tracing::debug!(
                            "Capture sample taken: participant={}, device={}, bytes={}",
                            participant_id,
                            sample.device.as_str(),
                            sample.payload.len()
                        );
                        samples.accept(&participant_id, sample).await;
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Capture device lost: participant={}, device={}, reason={}",
                            participant_id,
                            handle.device().as_str(),
                            e.reason
                        );
                        events(ResourceEvent::DeviceLost {
                            device: handle.device(),
                            reason: e.reason,
                            at: Utc::now(),
                        });
                        break;
                    }
                }
            }
        })
    }

    /// Stops one device. Unknown or already released handles are ignored.
    pub async fn release(&mut self, handle: &CaptureHandle) {
        let Some(position) = self.held.iter().position(|held| &held.handle == handle) else {
            tracing::debug!(
                "Release ignored for unknown capture handle: participant={}",
                self.participant_id
            );
            return;
        };

        let mut held = self.held.remove(position);
        if let Some(sampler) = held.sampler.take() {
            sampler.abort();
        }
        self.capture.stop(&held.handle).await;
        tracing::info!(
            "Capture released: participant={}, device={}",
            self.participant_id,
            held.handle.device().as_str()
        );
    }

    /// Tears down everything still held. Only the first call does any work.
    pub async fn release_all(&mut self) -> bool {
        if self.torn_down {
            return false;
        }
        self.torn_down = true;

        let handles: Vec<CaptureHandle> = self.held.iter().map(|h| h.handle.clone()).collect();
        for handle in &handles {
            self.release(handle).await;
        }

        if let Some(watch) = self.exit_watch.take() {
            watch.unsubscribe();
        }
        if self.display_locked {
            self.display_locked = false;
            if self.display.is_active() {
                self.display.exit().await;
                tracing::info!("Fullscreen exited: participant={}", self.participant_id);
            }
        }

        tracing::info!("Resources released: participant={}", self.participant_id);
        true
    }

    pub fn held_devices(&self) -> Vec<DeviceKind> {
        self.held.iter().map(|h| h.handle.device()).collect()
    }

    pub fn is_display_locked(&self) -> bool {
        self.display_locked
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        for held in &mut self.held {
            if let Some(sampler) = held.sampler.take() {
                sampler.abort();
            }
        }
    }
}
