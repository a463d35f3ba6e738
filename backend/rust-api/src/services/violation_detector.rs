//! Routes environment signals and resource events into violations.
//!
//! The detector keeps no record of its own: it classifies what it sees and
//! hands the result back to the owning session, which appends it to the
//! session's violation log on its serialized path. The only transient state
//! is the current hidden-surface episode used for the extended-absence rule.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::models::{
    DetectedViolation, Disposition, EnvironmentSignal, KeyCombo, ResourceEvent, ResourceKind,
    SignalKind, ViolationKind,
};
use crate::services::providers::{SignalSource, SourceUnavailable, Subscription};

pub const DEFAULT_EXTENDED_ABSENCE_GRACE: Duration = Duration::from_secs(5);

/// Input forwarded from detector-owned watchers to the session queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectorInput {
    Signal(EnvironmentSignal),
    AbsenceElapsed { episode: u64 },
}

pub type DetectorForward = Arc<dyn Fn(DetectorInput) + Send + Sync>;

#[derive(Debug)]
struct AbsenceEpisode {
    id: u64,
    hidden_at: DateTime<Utc>,
    reported: bool,
}

pub struct ViolationDetector {
    grace: Duration,
    active: bool,
    forward: Option<DetectorForward>,
    subscription: Option<Subscription>,
    absence: Option<AbsenceEpisode>,
    absence_timer: Option<JoinHandle<()>>,
    episodes: u64,
}

/// Decides whether a signal's default action must be blocked.
pub fn disposition(kind: &SignalKind) -> Disposition {
    match kind {
        SignalKind::Visibility { .. } => Disposition::Allow,
        SignalKind::Copy | SignalKind::Paste | SignalKind::ContextMenu => Disposition::Suppress,
        SignalKind::KeyDown(combo) => {
            if is_restricted(combo) {
                Disposition::Suppress
            } else {
                Disposition::Allow
            }
        }
    }
}

/// Copy/paste/cut/select-all/find, devtools toggles, window switching and
/// the screenshot key.
pub fn is_restricted(combo: &KeyCombo) -> bool {
    let key = combo.key.to_ascii_lowercase();
    let command = combo.ctrl || combo.meta;

    if command && matches!(key.as_str(), "c" | "v" | "x" | "a" | "f") {
        return true;
    }
    if command && combo.shift && matches!(key.as_str(), "i" | "j" | "c") {
        return true;
    }
    if combo.alt && key == "tab" {
        return true;
    }
    matches!(key.as_str(), "f12" | "printscreen")
}

impl ViolationDetector {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            active: false,
            forward: None,
            subscription: None,
            absence: None,
            absence_timer: None,
            episodes: 0,
        }
    }

    /// Subscribes to the environment. Signals are forwarded to the session
    /// queue; the returned disposition is decided on the caller's thread.
    pub fn attach(
        &mut self,
        source: Option<&dyn SignalSource>,
        forward: DetectorForward,
    ) -> Result<(), SourceUnavailable> {
        let source =
            source.ok_or_else(|| SourceUnavailable("no event source provided".to_string()))?;

        let relay = Arc::clone(&forward);
        let subscription = source.subscribe(Arc::new(move |signal: &EnvironmentSignal| {
            relay(DetectorInput::Signal(signal.clone()));
            disposition(&signal.kind)
        }))?;

        self.subscription = Some(subscription);
        self.forward = Some(forward);
        Ok(())
    }

    pub fn activate(&mut self) {
        self.active = true;
    }

    /// Stops watching. Nothing is classified afterwards.
    pub fn deactivate(&mut self) {
        self.active = false;
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        self.cancel_absence_timer();
        self.absence = None;
        self.forward = None;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_attached(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn on_signal(&mut self, signal: &EnvironmentSignal) -> Vec<DetectedViolation> {
        if !self.active {
            tracing::debug!("Signal ignored while detector inactive: {:?}", signal.kind);
            return Vec::new();
        }

        let at = signal.at;
        match &signal.kind {
            SignalKind::Visibility { hidden: true } => self.on_hidden(at),
            SignalKind::Visibility { hidden: false } => self.on_visible(at).into_iter().collect(),
            SignalKind::Copy => vec![DetectedViolation::new(
                ViolationKind::CopyAttempt,
                at,
                "Attempted to copy content",
            )],
            SignalKind::Paste => vec![DetectedViolation::new(
                ViolationKind::PasteAttempt,
                at,
                "Attempted to paste content",
            )],
            SignalKind::KeyDown(combo) if is_restricted(combo) => vec![DetectedViolation::new(
                ViolationKind::RestrictedShortcut,
                at,
                format!("Attempted to use restricted keyboard shortcut: {}", combo),
            )],
            SignalKind::KeyDown(_) => Vec::new(),
            SignalKind::ContextMenu => vec![DetectedViolation::new(
                ViolationKind::ContextMenuAttempt,
                at,
                "Attempted to open context menu",
            )],
        }
    }

    fn on_hidden(&mut self, at: DateTime<Utc>) -> Vec<DetectedViolation> {
        let tab_switch =
            DetectedViolation::new(ViolationKind::TabSwitch, at, "Tab/window lost focus");

        // A repeated hidden signal continues the open episode.
        if self.absence.is_some() {
            return vec![tab_switch];
        }

        self.episodes += 1;
        let episode = self.episodes;
        self.absence = Some(AbsenceEpisode {
            id: episode,
            hidden_at: at,
            reported: false,
        });
        self.start_absence_timer(episode);

        vec![tab_switch]
    }

    fn on_visible(&mut self, at: DateTime<Utc>) -> Option<DetectedViolation> {
        self.cancel_absence_timer();
        let episode = self.absence.take()?;
        if episode.reported {
            return None;
        }

        // The absence timer may not have been processed yet; capture times decide.
        let away = at.signed_duration_since(episode.hidden_at);
        let exceeded = away.to_std().map(|away| away > self.grace).unwrap_or(false);
        if exceeded {
            Some(self.extended_absence(episode.hidden_at, away.num_seconds()))
        } else {
            None
        }
    }

    /// Grace timer fired for `episode`. Stale episodes are ignored.
    pub fn on_absence_elapsed(&mut self, episode: u64) -> Option<DetectedViolation> {
        if !self.active {
            return None;
        }
        let open = self
            .absence
            .as_mut()
            .filter(|e| e.id == episode && !e.reported)?;
        open.reported = true;
        let hidden_at = open.hidden_at;

        Some(self.extended_absence(hidden_at, self.grace.as_secs() as i64))
    }

    /// Stamped at the moment the grace period ran out.
    fn extended_absence(&self, hidden_at: DateTime<Utc>, away_seconds: i64) -> DetectedViolation {
        let grace = chrono::Duration::from_std(self.grace).unwrap_or_else(|_| chrono::Duration::zero());
        DetectedViolation::new(
            ViolationKind::ExtendedAbsence,
            hidden_at + grace,
            format!(
                "Extended time away from test window ({}s)",
                away_seconds
            ),
        )
    }

    pub fn on_resource_event(&self, event: &ResourceEvent) -> Option<DetectedViolation> {
        if !self.active {
            return None;
        }
        match event {
            ResourceEvent::FullscreenLost { at } => Some(DetectedViolation::new(
                ViolationKind::FullscreenExit,
                *at,
                "Exited full screen mode",
            )),
            ResourceEvent::DeviceLost { device, reason, at } => Some(DetectedViolation::new(
                ViolationKind::DeviceUnavailable,
                *at,
                format!("{} lost during session: {}", device.as_str(), reason),
            )),
        }
    }

    /// Acquisition failures are recorded whether or not monitoring has started.
    pub fn acquisition_failed(
        kind: ResourceKind,
        reason: &str,
        at: DateTime<Utc>,
    ) -> DetectedViolation {
        let details = match kind {
            ResourceKind::Fullscreen => {
                format!("fullscreen: failed to enter full screen mode ({})", reason)
            }
            device => format!("{}: access denied or unavailable ({})", device.as_str(), reason),
        };
        DetectedViolation::new(ViolationKind::DeviceUnavailable, at, details)
    }

    fn start_absence_timer(&mut self, episode: u64) {
        self.cancel_absence_timer();
        let Some(forward) = self.forward.clone() else {
            return;
        };
        let grace = self.grace;
        self.absence_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            forward(DetectorInput::AbsenceElapsed { episode });
        }));
    }

    fn cancel_absence_timer(&mut self) {
        if let Some(timer) = self.absence_timer.take() {
            timer.abort();
        }
    }
}

impl Drop for ViolationDetector {
    fn drop(&mut self) {
        self.cancel_absence_timer();
    }
}
