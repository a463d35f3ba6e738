//! Proctored session state machine.
//!
//! Each session runs as a single actor task that owns all of its state. Every
//! trigger (test-taker commands, environment signals, resource events, timer
//! ticks, supervisor commands) arrives as a message on one unbounded queue, so
//! transitions and violation-log appends are applied strictly one at a time.
//! The submit-versus-expiry race therefore resolves to whichever message is
//! dequeued first; the second one finds the session already terminated.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use crate::metrics::{track_submission, SESSIONS_ACTIVE, SESSIONS_TOTAL, VIOLATIONS_TOTAL};
use crate::models::{
    DetectedViolation, ParticipantSnapshot, ParticipantStatus, Progress, QuestionType, Report,
    ResourceEvent, ResponseValue, SessionSpec, SessionStatus, SessionView, SubmitOutcome,
    SupervisorMessage, TerminationReason, TimerEvent, ViolationLog,
};
use crate::services::providers::Collaborators;
use crate::services::resource_guard::{AcquireOutcome, ResourceGuard};
use crate::services::session_timer::SessionTimer;
use crate::services::violation_detector::{
    DetectorInput, ViolationDetector, DEFAULT_EXTENDED_ABSENCE_GRACE,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("`{operation}` is not allowed while the session is {status}")]
    IllegalState {
        operation: &'static str,
        status: SessionStatus,
    },
    #[error("question `{0}` is not part of this test")]
    UnknownQuestion(String),
    #[error("response for `{question_id}` does not fit a {expected} question")]
    ResponseMismatch {
        question_id: String,
        expected: QuestionType,
    },
    #[error("option {option} is out of range for question `{question_id}`")]
    ChoiceOutOfRange { question_id: String, option: usize },
    #[error("question index {index} is out of range (test has {len} questions)")]
    NavigationOutOfRange { index: usize, len: usize },
    #[error("cannot start test: {0}")]
    CannotStart(String),
    #[error("session is no longer running")]
    SessionGone,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub tick_interval: Duration,
    pub extended_absence_grace: Duration,
    pub sample_interval: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            extended_absence_grace: DEFAULT_EXTENDED_ABSENCE_GRACE,
            sample_interval: Duration::from_secs(30),
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

enum SessionCommand {
    Consent {
        reply: Reply<()>,
    },
    RecordResponse {
        question_id: String,
        value: ResponseValue,
        reply: Reply<()>,
    },
    ToggleChoice {
        question_id: String,
        option: usize,
        reply: Reply<()>,
    },
    Navigate {
        index: usize,
        reply: Reply<usize>,
    },
    Submit {
        reason: TerminationReason,
        reply: Option<Reply<SubmitOutcome>>,
    },
    Flag,
    Message(SupervisorMessage),
    Detector(DetectorInput),
    Resource(ResourceEvent),
    Timer(TimerEvent),
}

/// Cloneable front door to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    session_id: String,
    test_id: String,
    participant_id: String,
    commands: mpsc::UnboundedSender<SessionCommand>,
    view: watch::Receiver<SessionView>,
}

impl SessionHandle {
    /// Starts the session actor in the `unconsented` state.
    pub fn spawn(spec: SessionSpec, collaborators: Collaborators, settings: SessionSettings) -> Self {
        let session_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        let weak = tx.downgrade();
        let (view_tx, view) = watch::channel(placeholder_view(&session_id));

        let guard = ResourceGuard::new(
            spec.participant_id.clone(),
            Arc::clone(&collaborators.capture),
            Arc::clone(&collaborators.display),
            Arc::clone(&collaborators.samples),
            forwarder(&weak, SessionCommand::Resource),
            settings.sample_interval,
        );

        let actor = SessionActor {
            session_id: session_id.clone(),
            remaining_seconds: spec.duration_seconds,
            spec,
            status: SessionStatus::Unconsented,
            started_at: None,
            current_question: 0,
            responses: BTreeMap::new(),
            log: ViolationLog::new(),
            flagged: false,
            messages: Vec::new(),
            termination: None,
            guard,
            detector: ViolationDetector::new(settings.extended_absence_grace),
            timer: None,
            collaborators,
            settings,
            weak,
            view_tx,
            pending: VecDeque::new(),
        };
        actor.publish();

        let handle = Self {
            session_id,
            test_id: actor.spec.test_id.clone(),
            participant_id: actor.spec.participant_id.clone(),
            commands: tx,
            view,
        };

        SESSIONS_TOTAL.with_label_values(&["created"]).inc();
        tracing::info!(
            "Session created: session={}, test={}, participant={}",
            handle.session_id,
            handle.test_id,
            handle.participant_id
        );

        tokio::spawn(actor.run(rx));
        handle
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    pub async fn consent(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Consent { reply }).await
    }

    pub async fn record_response(
        &self,
        question_id: impl Into<String>,
        value: ResponseValue,
    ) -> Result<(), SessionError> {
        let question_id = question_id.into();
        self.request(|reply| SessionCommand::RecordResponse {
            question_id,
            value,
            reply,
        })
        .await
    }

    /// Adds or removes one option of a multiple-choice answer.
    pub async fn toggle_choice(
        &self,
        question_id: impl Into<String>,
        option: usize,
    ) -> Result<(), SessionError> {
        let question_id = question_id.into();
        self.request(|reply| SessionCommand::ToggleChoice {
            question_id,
            option,
            reply,
        })
        .await
    }

    pub async fn navigate(&self, index: usize) -> Result<usize, SessionError> {
        self.request(|reply| SessionCommand::Navigate { index, reply })
            .await
    }

    pub async fn submit(&self) -> Result<SubmitOutcome, SessionError> {
        self.end(TerminationReason::Submitted).await
    }

    /// Supervisor-initiated end; behaves exactly like a submit trigger.
    pub async fn force_end(&self) -> Result<SubmitOutcome, SessionError> {
        self.end(TerminationReason::ForcedEnd).await
    }

    /// The test-taker navigated away or closed the page.
    pub async fn abandon(&self) -> Result<SubmitOutcome, SessionError> {
        self.end(TerminationReason::Abandoned).await
    }

    pub fn flag(&self) -> Result<(), SessionError> {
        self.commands
            .send(SessionCommand::Flag)
            .map_err(|_| SessionError::SessionGone)
    }

    pub fn send_message(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.commands
            .send(SessionCommand::Message(SupervisorMessage {
                text: text.into(),
                sent_at: Utc::now(),
            }))
            .map_err(|_| SessionError::SessionGone)
    }

    /// Resolves once the session reaches `terminated`.
    pub async fn terminated(&self) -> SessionView {
        wait_for_termination(self.view.clone()).await
    }

    async fn end(&self, reason: TerminationReason) -> Result<SubmitOutcome, SessionError> {
        self.request(|reply| SessionCommand::Submit {
            reason,
            reply: Some(reply),
        })
        .await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> SessionCommand,
    ) -> Result<T, SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| SessionError::SessionGone)?;
        response.await.map_err(|_| SessionError::SessionGone)?
    }
}

/// Wraps a queue input so watchers never keep the session alive on their own.
fn forwarder<T, F>(
    weak: &mpsc::WeakUnboundedSender<SessionCommand>,
    wrap: F,
) -> Arc<dyn Fn(T) + Send + Sync>
where
    T: 'static,
    F: Fn(T) -> SessionCommand + Send + Sync + 'static,
{
    let weak = weak.clone();
    Arc::new(move |input| {
        if let Some(tx) = weak.upgrade() {
            let _ = tx.send(wrap(input));
        }
    })
}

fn placeholder_view(session_id: &str) -> SessionView {
    SessionView {
        session_id: session_id.to_string(),
        test_id: String::new(),
        participant_id: String::new(),
        status: SessionStatus::Unconsented,
        started_at: None,
        duration_seconds: 0,
        remaining_seconds: 0,
        current_question_index: 0,
        answered: 0,
        total_questions: 0,
        violations: Vec::new(),
        flagged: false,
        messages: Vec::new(),
        termination: None,
    }
}

/// Resolves with the final view once the session is terminated or its actor is gone.
/// Holding only the view receiver keeps the session free to be abandoned.
pub async fn wait_for_termination(mut view: watch::Receiver<SessionView>) -> SessionView {
    loop {
        if view.borrow_and_update().status == SessionStatus::Terminated {
            return view.borrow().clone();
        }
        if view.changed().await.is_err() {
            return view.borrow().clone();
        }
    }
}

struct SessionActor {
    session_id: String,
    spec: SessionSpec,
    status: SessionStatus,
    started_at: Option<DateTime<Utc>>,
    remaining_seconds: u32,
    current_question: usize,
    responses: BTreeMap<String, ResponseValue>,
    log: ViolationLog,
    flagged: bool,
    messages: Vec<SupervisorMessage>,
    termination: Option<TerminationReason>,
    guard: ResourceGuard,
    detector: ViolationDetector,
    timer: Option<SessionTimer>,
    collaborators: Collaborators,
    settings: SessionSettings,
    weak: mpsc::WeakUnboundedSender<SessionCommand>,
    view_tx: watch::Sender<SessionView>,
    pending: VecDeque<SessionCommand>,
}

impl SessionActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SessionCommand>) {
        loop {
            let command = match self.pending.pop_front() {
                Some(command) => command,
                None => match rx.recv().await {
                    Some(command) => command,
                    None => break,
                },
            };
            self.handle(command, &mut rx).await;
        }

        // Every handle is gone: the page was closed or navigated away.
        if self.status != SessionStatus::Terminated {
            tracing::info!(
                "Session abandoned without an explicit exit: session={}",
                self.session_id
            );
            self.terminate(TerminationReason::Abandoned).await;
        }
    }

    async fn handle(
        &mut self,
        command: SessionCommand,
        rx: &mut mpsc::UnboundedReceiver<SessionCommand>,
    ) {
        match command {
            SessionCommand::Consent { reply } => {
                let result = self.consent(rx).await;
                let _ = reply.send(result);
            }
            SessionCommand::RecordResponse {
                question_id,
                value,
                reply,
            } => {
                let _ = reply.send(self.record_response(question_id, value));
            }
            SessionCommand::ToggleChoice {
                question_id,
                option,
                reply,
            } => {
                let _ = reply.send(self.toggle_choice(question_id, option));
            }
            SessionCommand::Navigate { index, reply } => {
                let _ = reply.send(self.navigate(index));
            }
            SessionCommand::Submit { reason, reply } => {
                let outcome = self.end(reason).await;
                if let Some(reply) = reply {
                    let _ = reply.send(outcome);
                }
            }
            SessionCommand::Flag => self.flag(),
            SessionCommand::Message(message) => self.message(message),
            SessionCommand::Detector(input) => self.on_detector_input(input),
            SessionCommand::Resource(event) => {
                if let Some(detected) = self.detector.on_resource_event(&event) {
                    self.append(detected);
                    self.publish();
                }
            }
            SessionCommand::Timer(event) => self.on_timer(event).await,
        }
    }

    async fn consent(
        &mut self,
        rx: &mut mpsc::UnboundedReceiver<SessionCommand>,
    ) -> Result<(), SessionError> {
        self.require(SessionStatus::Unconsented, "consent")?;

        let forward = forwarder(&self.weak, SessionCommand::Detector);
        self.detector
            .attach(self.collaborators.signals.as_deref(), forward)
            .map_err(|e| {
                tracing::warn!(
                    "Cannot start session={}: {}",
                    self.session_id,
                    e
                );
                SessionError::CannotStart(e.to_string())
            })?;

        self.status = SessionStatus::AcquiringResources;
        self.publish();
        tracing::info!(
            "Consent given, acquiring resources: session={}, required={:?}",
            self.session_id,
            self.spec.required_resources
        );

        let required = self.spec.required_resources.kinds();
        let mut end_request: Option<(TerminationReason, Option<Reply<SubmitOutcome>>)> = None;

        // Acquisitions may suspend on permission prompts. Keep draining the
        // queue meanwhile so early exit requests are not lost.
        let outcomes = {
            let guard = &mut self.guard;
            let acquisition = async move {
                let mut outcomes = Vec::with_capacity(required.len());
                for kind in required {
                    outcomes.push(guard.acquire(kind).await);
                }
                outcomes
            };
            tokio::pin!(acquisition);

            loop {
                tokio::select! {
                    outcomes = &mut acquisition => break outcomes,
                    Some(command) = rx.recv() => match command {
                        SessionCommand::Consent { reply } => {
                            let _ = reply.send(Err(acquiring("consent")));
                        }
                        SessionCommand::RecordResponse { reply, .. }
                        | SessionCommand::ToggleChoice { reply, .. } => {
                            let _ = reply.send(Err(acquiring("record_response")));
                        }
                        SessionCommand::Navigate { reply, .. } => {
                            let _ = reply.send(Err(acquiring("navigate")));
                        }
                        SessionCommand::Submit { reason, reply } if end_request.is_none() => {
                            end_request = Some((reason, reply));
                        }
                        other => self.pending.push_back(other),
                    },
                }
            }
        };

        for outcome in &outcomes {
            if let AcquireOutcome::Failed { kind, reason } = outcome {
                self.append(ViolationDetector::acquisition_failed(
                    *kind,
                    reason,
                    Utc::now(),
                ));
            }
        }

        if let Some((reason, reply)) = end_request {
            tracing::info!(
                "Exit requested during resource acquisition: session={}, reason={}",
                self.session_id,
                reason.as_str()
            );
            let outcome = self.terminate(reason).await;
            if let Some(reply) = reply {
                let _ = reply.send(Ok(outcome));
            }
            return Ok(());
        }

        self.activate();
        Ok(())
    }

    fn activate(&mut self) {
        self.status = SessionStatus::Active;
        self.started_at = Some(Utc::now());
        self.detector.activate();

        let emit = forwarder(&self.weak, SessionCommand::Timer);
        self.timer = Some(SessionTimer::start(
            self.spec.duration_seconds,
            self.settings.tick_interval,
            move |event| emit(event),
        ));

        SESSIONS_ACTIVE.inc();
        tracing::info!(
            "Session active: session={}, duration={}s, violations_at_start={}",
            self.session_id,
            self.spec.duration_seconds,
            self.log.len()
        );
        self.publish();
    }

    fn record_response(
        &mut self,
        question_id: String,
        value: ResponseValue,
    ) -> Result<(), SessionError> {
        self.require(SessionStatus::Active, "record_response")?;

        let question = self
            .spec
            .questions
            .iter()
            .find(|q| q.id == question_id)
            .ok_or_else(|| SessionError::UnknownQuestion(question_id.clone()))?;

        if !value.matches(question.question_type) {
            return Err(SessionError::ResponseMismatch {
                question_id,
                expected: question.question_type,
            });
        }
        if let ResponseValue::Choices(choices) = &value {
            if let Some(&option) = choices.iter().find(|&&c| c >= question.options.len()) {
                return Err(SessionError::ChoiceOutOfRange {
                    question_id,
                    option,
                });
            }
        }

        tracing::debug!(
            "Response recorded: session={}, question={}",
            self.session_id,
            question_id
        );
        self.responses.insert(question_id, value);
        self.publish();
        Ok(())
    }

    fn toggle_choice(&mut self, question_id: String, option: usize) -> Result<(), SessionError> {
        self.require(SessionStatus::Active, "record_response")?;

        let question = self
            .spec
            .questions
            .iter()
            .find(|q| q.id == question_id)
            .ok_or_else(|| SessionError::UnknownQuestion(question_id.clone()))?;

        if question.question_type != QuestionType::MultipleChoice {
            return Err(SessionError::ResponseMismatch {
                question_id,
                expected: question.question_type,
            });
        }
        if option >= question.options.len() {
            return Err(SessionError::ChoiceOutOfRange {
                question_id,
                option,
            });
        }

        let entry = self
            .responses
            .entry(question_id)
            .or_insert_with(|| ResponseValue::Choices(Default::default()));
        if let ResponseValue::Choices(choices) = entry {
            if !choices.remove(&option) {
                choices.insert(option);
            }
        }
        self.publish();
        Ok(())
    }

    fn navigate(&mut self, index: usize) -> Result<usize, SessionError> {
        self.require(SessionStatus::Active, "navigate")?;

        let len = self.spec.questions.len();
        if index >= len {
            return Err(SessionError::NavigationOutOfRange { index, len });
        }
        self.current_question = index;
        self.publish();
        Ok(index)
    }

    async fn end(&mut self, reason: TerminationReason) -> Result<SubmitOutcome, SessionError> {
        match self.status {
            SessionStatus::Terminated | SessionStatus::Submitting => {
                tracing::debug!(
                    "Exit trigger after termination ignored: session={}, reason={}",
                    self.session_id,
                    reason.as_str()
                );
                Ok(SubmitOutcome::AlreadyTerminated)
            }
            SessionStatus::Unconsented if reason != TerminationReason::Abandoned => {
                Err(SessionError::IllegalState {
                    operation: "submit",
                    status: self.status,
                })
            }
            _ => Ok(self.terminate(reason).await),
        }
    }

    /// The single teardown path shared by every exit trigger.
    async fn terminate(&mut self, reason: TerminationReason) -> SubmitOutcome {
        if matches!(
            self.status,
            SessionStatus::Submitting | SessionStatus::Terminated
        ) {
            return SubmitOutcome::AlreadyTerminated;
        }

        let was_active = self.status == SessionStatus::Active;
        let attempted = self.status != SessionStatus::Unconsented;

        self.status = SessionStatus::Submitting;
        self.publish();

        if let Some(mut timer) = self.timer.take() {
            timer.cancel();
        }
        self.detector.deactivate();
        self.guard.release_all().await;

        let report = Report {
            session_id: self.session_id.clone(),
            test_id: self.spec.test_id.clone(),
            participant_id: self.spec.participant_id.clone(),
            responses: self.responses.clone(),
            violations: self.log.snapshot(),
            started_at: self.started_at,
            submitted_at: Utc::now(),
            time_taken_seconds: self
                .spec
                .duration_seconds
                .saturating_sub(self.remaining_seconds),
            reason,
            flagged: self.flagged,
        };

        self.status = SessionStatus::Terminated;
        self.termination = Some(reason);
        if was_active {
            SESSIONS_ACTIVE.dec();
        }
        SESSIONS_TOTAL.with_label_values(&[reason.as_str()]).inc();
        self.publish();

        tracing::info!(
            "Session terminated: session={}, reason={}, responses={}, violations={}",
            self.session_id,
            reason.as_str(),
            report.responses.len(),
            report.violations.len()
        );

        // Nothing was attempted before consent; there is no report to file.
        if !attempted {
            return SubmitOutcome::Submitted {
                report,
                acknowledged: false,
            };
        }

        let acknowledged = match track_submission(self.collaborators.submission.submit(&report)).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    "Report submission failed: session={}, error={}",
                    self.session_id,
                    e
                );
                false
            }
        };

        SubmitOutcome::Submitted {
            report,
            acknowledged,
        }
    }

    async fn on_timer(&mut self, event: TimerEvent) {
        if self.status != SessionStatus::Active {
            return;
        }
        match event {
            TimerEvent::TimerTick(tick) => {
                // Never increases, even if a stale tick arrives late.
                self.remaining_seconds = self.remaining_seconds.min(tick.remaining_seconds);
                self.publish();
            }
            TimerEvent::TimeExpired(_) => {
                self.remaining_seconds = 0;
                tracing::info!("Time is up, auto-submitting: session={}", self.session_id);
                self.terminate(TerminationReason::Expired).await;
            }
        }
    }

    fn on_detector_input(&mut self, input: DetectorInput) {
        let detected = match input {
            DetectorInput::Signal(signal) => self.detector.on_signal(&signal),
            DetectorInput::AbsenceElapsed { episode } => self
                .detector
                .on_absence_elapsed(episode)
                .into_iter()
                .collect(),
        };
        if detected.is_empty() {
            return;
        }
        for violation in detected {
            self.append(violation);
        }
        self.publish();
    }

    fn flag(&mut self) {
        if self.status == SessionStatus::Terminated {
            tracing::debug!("Flag ignored after termination: session={}", self.session_id);
            return;
        }
        self.flagged = true;
        tracing::info!("Session flagged for review: session={}", self.session_id);
        self.publish();
    }

    fn message(&mut self, message: SupervisorMessage) {
        if self.status == SessionStatus::Terminated {
            return;
        }
        self.messages.push(message);
        self.publish();
    }

    fn append(&mut self, detected: DetectedViolation) {
        let violation = self.log.append(detected).clone();
        VIOLATIONS_TOTAL
            .with_label_values(&[violation.kind.as_str()])
            .inc();
        tracing::warn!(
            "Violation recorded: session={}, participant={}, kind={}, details={}",
            self.session_id,
            self.spec.participant_id,
            violation.kind.as_str(),
            violation.details
        );
        self.collaborators.monitor.publish_violation(
            &self.spec.test_id,
            &self.spec.participant_id,
            &violation,
        );
    }

    fn require(&self, expected: SessionStatus, operation: &'static str) -> Result<(), SessionError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(SessionError::IllegalState {
                operation,
                status: self.status,
            })
        }
    }

    fn answered(&self) -> usize {
        self.responses.values().filter(|r| r.is_answered()).count()
    }

    fn view(&self) -> SessionView {
        SessionView {
            session_id: self.session_id.clone(),
            test_id: self.spec.test_id.clone(),
            participant_id: self.spec.participant_id.clone(),
            status: self.status,
            started_at: self.started_at,
            duration_seconds: self.spec.duration_seconds,
            remaining_seconds: self.remaining_seconds,
            current_question_index: self.current_question,
            answered: self.answered(),
            total_questions: self.spec.questions.len(),
            violations: self.log.snapshot(),
            flagged: self.flagged,
            messages: self.messages.clone(),
            termination: self.termination,
        }
    }

    fn snapshot(&self) -> ParticipantSnapshot {
        let status = match (self.status, self.termination) {
            (SessionStatus::Terminated, Some(TerminationReason::Abandoned)) => {
                ParticipantStatus::Disconnected
            }
            (SessionStatus::Terminated, _) => ParticipantStatus::Completed,
            _ => ParticipantStatus::Active,
        };
        ParticipantSnapshot {
            participant_id: self.spec.participant_id.clone(),
            name: self.spec.participant_name.clone(),
            email: self.spec.participant_email.clone(),
            status,
            progress: Progress {
                answered: self.answered() as u32,
                total: self.spec.questions.len() as u32,
            },
            remaining_seconds: self.remaining_seconds,
            violation_count: self.log.len() as u32,
            flagged: self.flagged,
            updated_at: Utc::now(),
        }
    }

    /// Pushes the current state to local observers and the supervisor feed.
    fn publish(&self) {
        self.view_tx.send_replace(self.view());
        self.collaborators
            .monitor
            .publish_snapshot(&self.spec.test_id, self.snapshot());
    }
}

fn acquiring(operation: &'static str) -> SessionError {
    SessionError::IllegalState {
        operation,
        status: SessionStatus::AcquiringResources,
    }
}
