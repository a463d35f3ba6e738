use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    TabSwitch,
    ExtendedAbsence,
    CopyAttempt,
    PasteAttempt,
    FullscreenExit,
    RestrictedShortcut,
    ContextMenuAttempt,
    DeviceUnavailable,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::TabSwitch => "tab_switch",
            ViolationKind::ExtendedAbsence => "extended_absence",
            ViolationKind::CopyAttempt => "copy_attempt",
            ViolationKind::PasteAttempt => "paste_attempt",
            ViolationKind::FullscreenExit => "fullscreen_exit",
            ViolationKind::RestrictedShortcut => "restricted_shortcut",
            ViolationKind::ContextMenuAttempt => "context_menu_attempt",
            ViolationKind::DeviceUnavailable => "device_unavailable",
        }
    }
}

/// Immutable record of a detected integrity-rule breach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: ViolationKind,
    pub details: String,
}

/// A violation that has been classified but not yet appended to a log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedViolation {
    pub timestamp: DateTime<Utc>,
    pub kind: ViolationKind,
    pub details: String,
}

impl DetectedViolation {
    pub fn new(kind: ViolationKind, timestamp: DateTime<Utc>, details: impl Into<String>) -> Self {
        Self {
            timestamp,
            kind,
            details: details.into(),
        }
    }
}

/// Append-only violation log. Ids are assigned in arrival order.
#[derive(Debug, Clone, Default)]
pub struct ViolationLog {
    entries: Vec<Violation>,
    next_id: u64,
}

impl ViolationLog {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 1,
        }
    }

    pub fn append(&mut self, detected: DetectedViolation) -> &Violation {
        // Default-constructed logs start at 0; ids stay unique either way.
        let id = self.next_id.max(1);
        self.next_id = id + 1;
        self.entries.push(Violation {
            id,
            timestamp: detected.timestamp,
            kind: detected.kind,
            details: detected.details,
        });
        &self.entries[self.entries.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Violation] {
        &self.entries
    }

    pub fn snapshot(&self) -> Vec<Violation> {
        self.entries.clone()
    }
}
