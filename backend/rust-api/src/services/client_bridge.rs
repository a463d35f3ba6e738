//! HTTP-driven environment for a session.
//!
//! The browser is the real owner of the camera, the microphone and the
//! fullscreen state. It declares what the user granted when consenting and
//! then reports signals, capture samples and fullscreen exits over HTTP. The
//! bridge turns those posts into the collaborator contracts the engine runs
//! against.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use crate::models::{CaptureHandle, CaptureSample, DeviceKind, Disposition, EnvironmentSignal};
use crate::services::providers::{
    CaptureProvider, DeviceFailure, DisplayProvider, Handler, Hub, SignalSource, SourceUnavailable,
    Subscription,
};

/// Permissions the browser obtained before consent was sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct ClientGrants {
    #[serde(default)]
    pub webcam: bool,
    #[serde(default)]
    pub microphone: bool,
    #[serde(default)]
    pub fullscreen: bool,
}

impl ClientGrants {
    fn allows(&self, device: DeviceKind) -> bool {
        match device {
            DeviceKind::Webcam => self.webcam,
            DeviceKind::Microphone => self.microphone,
        }
    }
}

#[derive(Default)]
struct BridgeState {
    grants: ClientGrants,
    open: HashSet<Uuid>,
    lost: HashMap<DeviceKind, String>,
    pending: HashMap<DeviceKind, CaptureSample>,
}

pub struct ClientBridge {
    signals: Hub<EnvironmentSignal>,
    exits: Hub<DateTime<Utc>>,
    fullscreen: AtomicBool,
    state: Mutex<BridgeState>,
}

impl Default for ClientBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBridge {
    pub fn new() -> Self {
        Self {
            signals: Hub::new(),
            exits: Hub::new(),
            fullscreen: AtomicBool::new(false),
            state: Mutex::new(BridgeState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, BridgeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_grants(&self, grants: ClientGrants) {
        self.state().grants = grants;
    }

    /// Delivers a client event and returns whether its default action must be blocked.
    pub fn post_signal(&self, signal: &EnvironmentSignal) -> Disposition {
        self.signals.publish(signal)
    }

    /// Holds the newest upload per device until the next periodic sample.
    pub fn post_sample(&self, sample: CaptureSample) {
        self.state().pending.insert(sample.device, sample);
    }

    /// The browser reported that a track ended or permission was revoked.
    pub fn report_device_lost(&self, device: DeviceKind, reason: impl Into<String>) {
        let mut state = self.state();
        state.pending.remove(&device);
        state.lost.insert(device, reason.into());
    }

    /// The browser left fullscreen on its own.
    pub fn report_fullscreen_exit(&self, at: DateTime<Utc>) {
        if self.fullscreen.swap(false, Ordering::SeqCst) {
            self.exits.publish(&at);
        }
    }
}

#[async_trait]
impl CaptureProvider for ClientBridge {
    async fn request_capture(&self, device: DeviceKind) -> Result<CaptureHandle, DeviceFailure> {
        let mut state = self.state();
        if !state.grants.allows(device) {
            return Err(DeviceFailure::new(
                device.as_str(),
                "permission not granted by the client",
            ));
        }
        let handle = CaptureHandle::new(device);
        state.open.insert(handle.id());
        state.lost.remove(&device);
        Ok(handle)
    }

    async fn stop(&self, handle: &CaptureHandle) {
        let mut state = self.state();
        state.open.remove(&handle.id());
        state.pending.remove(&handle.device());
    }

    async fn sample(&self, handle: &CaptureHandle) -> Result<CaptureSample, DeviceFailure> {
        let device = handle.device();
        let mut state = self.state();
        if !state.open.contains(&handle.id()) {
            return Err(DeviceFailure::new(device.as_str(), "capture already stopped"));
        }
        if let Some(reason) = state.lost.get(&device) {
            return Err(DeviceFailure::new(device.as_str(), reason.clone()));
        }
        state
            .pending
            .remove(&device)
            .ok_or_else(|| DeviceFailure::new(device.as_str(), "no capture received from client"))
    }
}

#[async_trait]
impl DisplayProvider for ClientBridge {
    async fn enter(&self) -> Result<(), DeviceFailure> {
        if !self.state().grants.fullscreen {
            return Err(DeviceFailure::new(
                "fullscreen",
                "fullscreen request rejected by the client",
            ));
        }
        self.fullscreen.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn exit(&self) {
        self.fullscreen.store(false, Ordering::SeqCst);
    }

    fn is_active(&self) -> bool {
        self.fullscreen.load(Ordering::SeqCst)
    }

    fn watch_exits(&self, handler: Handler<DateTime<Utc>>) -> Subscription {
        self.exits.subscribe(handler)
    }
}

impl SignalSource for ClientBridge {
    fn subscribe(
        &self,
        handler: Handler<EnvironmentSignal>,
    ) -> Result<Subscription, SourceUnavailable> {
        Ok(self.signals.subscribe(handler))
    }
}
