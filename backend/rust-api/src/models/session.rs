use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::Validate;

use super::question::{Question, ResponseValue};
use super::resource::RequiredResources;
use super::violation::Violation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Unconsented,
    AcquiringResources,
    Active,
    Submitting,
    Terminated,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Unconsented => "unconsented",
            SessionStatus::AcquiringResources => "acquiring_resources",
            SessionStatus::Active => "active",
            SessionStatus::Submitting => "submitting",
            SessionStatus::Terminated => "terminated",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which exit path ended the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Submitted,
    Expired,
    ForcedEnd,
    Abandoned,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::Submitted => "submitted",
            TerminationReason::Expired => "expired",
            TerminationReason::ForcedEnd => "forced_end",
            TerminationReason::Abandoned => "abandoned",
        }
    }
}

/// Static definition of one attempt, fixed at creation.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SessionSpec {
    #[validate(length(min = 1, message = "Test id must not be empty"))]
    pub test_id: String,
    #[validate(length(min = 1, message = "Participant id must not be empty"))]
    pub participant_id: String,
    #[serde(default)]
    pub participant_name: String,
    #[serde(default)]
    pub participant_email: String,
    #[validate(range(max = 86400, message = "Duration must not exceed 24 hours"))]
    pub duration_seconds: u32,
    #[validate(
        length(min = 1, message = "A test needs at least one question"),
        nested
    )]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub required_resources: RequiredResources,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorMessage {
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

/// Read-only view of a session, published after every serialized transition.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub session_id: String,
    pub test_id: String,
    pub participant_id: String,
    pub status: SessionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_seconds: u32,
    pub remaining_seconds: u32,
    pub current_question_index: usize,
    pub answered: usize,
    pub total_questions: usize,
    pub violations: Vec<Violation>,
    pub flagged: bool,
    pub messages: Vec<SupervisorMessage>,
    pub termination: Option<TerminationReason>,
}

/// Final immutable bundle handed to the submission collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub session_id: String,
    pub test_id: String,
    pub participant_id: String,
    pub responses: BTreeMap<String, ResponseValue>,
    pub violations: Vec<Violation>,
    pub started_at: Option<DateTime<Utc>>,
    pub submitted_at: DateTime<Utc>,
    pub time_taken_seconds: u32,
    pub reason: TerminationReason,
    pub flagged: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// This trigger performed the teardown.
    Submitted { report: Report, acknowledged: bool },
    /// Another trigger already ended the session.
    AlreadyTerminated,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub status: SessionStatus,
    pub duration_seconds: u32,
    pub total_questions: usize,
}
