use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::resource::SampleRecord;
use super::violation::Violation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Active,
    Disconnected,
    Completed,
}

impl ParticipantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantStatus::Active => "active",
            ParticipantStatus::Disconnected => "disconnected",
            ParticipantStatus::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub answered: u32,
    pub total: u32,
}

/// Latest known state of one participant, as produced by their session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ParticipantSnapshot {
    #[validate(length(min = 1, message = "Participant id must not be empty"))]
    pub participant_id: String,
    pub name: String,
    pub email: String,
    pub status: ParticipantStatus,
    pub progress: Progress,
    pub remaining_seconds: u32,
    pub violation_count: u32,
    #[serde(default)]
    pub flagged: bool,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusFilter {
    #[default]
    All,
    Active,
    Disconnected,
    Completed,
}

impl StatusFilter {
    pub fn admits(&self, status: ParticipantStatus) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Active => status == ParticipantStatus::Active,
            StatusFilter::Disconnected => status == ParticipantStatus::Disconnected,
            StatusFilter::Completed => status == ParticipantStatus::Completed,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Name,
    Status,
    Progress,
    Violations,
}

/// Roster query; the query string form is `?status=active&search=doe&sort=violations`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParticipantQuery {
    #[serde(default)]
    pub status: StatusFilter,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub sort: SortKey,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParticipantDetail {
    pub snapshot: ParticipantSnapshot,
    pub violations: Vec<Violation>,
    pub samples: Vec<SampleRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum SupervisorCommand {
    Flag,
    Message { text: String },
    ForceEnd,
}

impl SupervisorCommand {
    pub fn name(&self) -> &'static str {
        match self {
            SupervisorCommand::Flag => "flag",
            SupervisorCommand::Message { .. } => "message",
            SupervisorCommand::ForceEnd => "force_end",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MonitorOverview {
    pub test_id: String,
    pub total_participants: usize,
    pub active_participants: usize,
    pub completed_participants: usize,
    pub disconnected_participants: usize,
    pub total_violations: u64,
    pub flagged_participants: usize,
}

/// One row of the cross-participant violation feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViolationFeedEntry {
    pub participant_id: String,
    pub participant_name: String,
    pub violation: Violation,
}
