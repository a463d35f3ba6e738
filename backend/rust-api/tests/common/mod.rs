#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use proctor_api::{
    config::Config,
    create_router,
    models::*,
    services::{
        providers::{
            CaptureProvider, Collaborators, DeviceFailure, DisplayProvider, Handler, Hub,
            MonitorFeed, SampleSink, SignalSource, SubmissionError, SubmissionSink, Subscription,
        },
        session_service::{SessionHandle, SessionSettings},
        AppState,
    },
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn create_test_state() -> Arc<AppState> {
    create_test_state_with(Config::default())
}

pub fn create_test_state_with(config: Config) -> Arc<AppState> {
    init_tracing();
    Arc::new(AppState::with_submission(config, None))
}

pub fn create_test_app() -> (Router, Arc<AppState>) {
    let state = create_test_state();
    (create_router(state.clone()), state)
}

pub fn questions() -> Vec<Question> {
    vec![
        Question {
            id: "q1".to_string(),
            question_type: QuestionType::MultipleChoice,
            text: "Pick the primes".to_string(),
            options: vec!["2".into(), "4".into(), "5".into(), "9".into()],
            points: 2,
        },
        Question {
            id: "q2".to_string(),
            question_type: QuestionType::ShortAnswer,
            text: "Name a sorting algorithm".to_string(),
            options: Vec::new(),
            points: 1,
        },
    ]
}

pub fn spec(duration_seconds: u32, required: RequiredResources) -> SessionSpec {
    spec_for("test-1", "p1", "Pat Doe", duration_seconds, required)
}

pub fn spec_for(
    test_id: &str,
    participant_id: &str,
    name: &str,
    duration_seconds: u32,
    required: RequiredResources,
) -> SessionSpec {
    SessionSpec {
        test_id: test_id.to_string(),
        participant_id: participant_id.to_string(),
        participant_name: name.to_string(),
        participant_email: format!("{}@example.com", participant_id),
        duration_seconds,
        questions: questions(),
        required_resources: required,
    }
}

pub fn all_resources() -> RequiredResources {
    RequiredResources {
        webcam: true,
        microphone: true,
        fullscreen: true,
    }
}

/// Lets every ready task run before the paused clock moves on.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[derive(Default)]
pub struct FakeCapture {
    pub denied: Mutex<HashSet<DeviceKind>>,
    pub delay: Mutex<Option<Duration>>,
    pub broken: AtomicBool,
    pub started: AtomicUsize,
    pub stopped: AtomicUsize,
    pub sampled: AtomicUsize,
}

#[async_trait]
impl CaptureProvider for FakeCapture {
    async fn request_capture(&self, device: DeviceKind) -> Result<CaptureHandle, DeviceFailure> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.denied.lock().unwrap().contains(&device) {
            return Err(DeviceFailure::new(device.as_str(), "permission denied"));
        }
        self.started.fetch_add(1, Ordering::SeqCst);
        Ok(CaptureHandle::new(device))
    }

    async fn stop(&self, _handle: &CaptureHandle) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }

    async fn sample(&self, handle: &CaptureHandle) -> Result<CaptureSample, DeviceFailure> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(DeviceFailure::new(handle.device().as_str(), "track ended"));
        }
        self.sampled.fetch_add(1, Ordering::SeqCst);
        Ok(CaptureSample {
            device: handle.device(),
            captured_at: Utc::now(),
            content_type: "image/jpeg".to_string(),
            payload: vec![0xff, 0xd8, 0xff],
        })
    }
}

#[derive(Default)]
pub struct FakeDisplay {
    pub refuse: AtomicBool,
    pub active: AtomicBool,
    pub entered: AtomicUsize,
    pub exited: AtomicUsize,
    exits: Hub<DateTime<Utc>>,
}

impl FakeDisplay {
    /// The user left fullscreen on their own.
    pub fn user_exit(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.exits.publish(&Utc::now());
    }
}

#[async_trait]
impl DisplayProvider for FakeDisplay {
    async fn enter(&self) -> Result<(), DeviceFailure> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(DeviceFailure::new("fullscreen", "request rejected"));
        }
        self.entered.fetch_add(1, Ordering::SeqCst);
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn exit(&self) {
        self.exited.fetch_add(1, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn watch_exits(&self, handler: Handler<DateTime<Utc>>) -> Subscription {
        self.exits.subscribe(handler)
    }
}

#[derive(Default)]
pub struct RecordingSubmission {
    pub reports: Mutex<Vec<Report>>,
}

#[async_trait]
impl SubmissionSink for RecordingSubmission {
    async fn submit(&self, report: &Report) -> Result<(), SubmissionError> {
        self.reports.lock().unwrap().push(report.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSamples {
    pub samples: Mutex<Vec<(String, CaptureSample)>>,
}

#[async_trait]
impl SampleSink for RecordingSamples {
    async fn accept(&self, participant_id: &str, sample: CaptureSample) {
        self.samples
            .lock()
            .unwrap()
            .push((participant_id.to_string(), sample));
    }
}

#[derive(Default)]
pub struct RecordingMonitor {
    pub snapshots: Mutex<Vec<ParticipantSnapshot>>,
    pub violations: Mutex<Vec<Violation>>,
}

impl RecordingMonitor {
    pub fn last_snapshot(&self) -> Option<ParticipantSnapshot> {
        self.snapshots.lock().unwrap().last().cloned()
    }
}

impl MonitorFeed for RecordingMonitor {
    fn publish_snapshot(&self, _test_id: &str, snapshot: ParticipantSnapshot) {
        self.snapshots.lock().unwrap().push(snapshot);
    }

    fn publish_violation(&self, _test_id: &str, _participant_id: &str, violation: &Violation) {
        self.violations.lock().unwrap().push(violation.clone());
    }
}

/// Fully faked environment around one session.
pub struct Harness {
    pub capture: Arc<FakeCapture>,
    pub display: Arc<FakeDisplay>,
    pub signals: Hub<EnvironmentSignal>,
    pub submission: Arc<RecordingSubmission>,
    pub samples: Arc<RecordingSamples>,
    pub monitor: Arc<RecordingMonitor>,
    pub settings: SessionSettings,
    pub with_signals: bool,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        init_tracing();
        Self {
            capture: Arc::new(FakeCapture::default()),
            display: Arc::new(FakeDisplay::default()),
            signals: Hub::new(),
            submission: Arc::new(RecordingSubmission::default()),
            samples: Arc::new(RecordingSamples::default()),
            monitor: Arc::new(RecordingMonitor::default()),
            settings: SessionSettings {
                tick_interval: Duration::from_secs(1),
                extended_absence_grace: Duration::from_secs(5),
                sample_interval: Duration::from_secs(10),
            },
            with_signals: true,
        }
    }

    pub fn deny(self, device: DeviceKind) -> Self {
        self.capture.denied.lock().unwrap().insert(device);
        self
    }

    pub fn collaborators(&self) -> Collaborators {
        let signals: Option<Arc<dyn SignalSource>> = if self.with_signals {
            Some(Arc::new(self.signals.clone()))
        } else {
            None
        };
        Collaborators {
            capture: self.capture.clone(),
            display: self.display.clone(),
            signals,
            submission: self.submission.clone(),
            samples: self.samples.clone(),
            monitor: self.monitor.clone(),
        }
    }

    pub fn spawn(&self, spec: SessionSpec) -> SessionHandle {
        SessionHandle::spawn(spec, self.collaborators(), self.settings.clone())
    }

    /// Spawns and consents; the session is active when this returns.
    pub async fn start(&self, spec: SessionSpec) -> SessionHandle {
        let handle = self.spawn(spec);
        handle.consent().await.expect("consent should succeed");
        handle
    }

    pub fn emit(&self, kind: SignalKind) -> Disposition {
        self.signals.publish(&EnvironmentSignal::new(kind))
    }

    pub fn reports(&self) -> Vec<Report> {
        self.submission.reports.lock().unwrap().clone()
    }
}

pub fn kinds(violations: &[Violation]) -> Vec<ViolationKind> {
    violations.iter().map(|v| v.kind).collect()
}
