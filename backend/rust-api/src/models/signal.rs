use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Key combination as reported by the environment's keydown stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyCombo {
    pub key: String,
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub alt: bool,
    #[serde(default)]
    pub shift: bool,
    #[serde(default)]
    pub meta: bool,
}

impl KeyCombo {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    pub fn ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    pub fn alt(mut self) -> Self {
        self.alt = true;
        self
    }

    pub fn shift(mut self) -> Self {
        self.shift = true;
        self
    }

    pub fn meta(mut self) -> Self {
        self.meta = true;
        self
    }
}

impl std::fmt::Display for KeyCombo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.ctrl {
            f.write_str("Ctrl+")?;
        }
        if self.meta {
            f.write_str("Meta+")?;
        }
        if self.alt {
            f.write_str("Alt+")?;
        }
        if self.shift {
            f.write_str("Shift+")?;
        }
        f.write_str(&self.key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalKind {
    Visibility { hidden: bool },
    Copy,
    Paste,
    KeyDown(KeyCombo),
    ContextMenu,
}

/// One event from the environment, stamped with its capture time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSignal {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: SignalKind,
}

impl EnvironmentSignal {
    pub fn new(kind: SignalKind) -> Self {
        Self {
            at: Utc::now(),
            kind,
        }
    }

    pub fn at(kind: SignalKind, at: DateTime<Utc>) -> Self {
        Self { at, kind }
    }
}

/// What the environment should do with the event's default action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Allow,
    Suppress,
}

impl Disposition {
    pub fn merge(self, other: Disposition) -> Disposition {
        if self == Disposition::Suppress || other == Disposition::Suppress {
            Disposition::Suppress
        } else {
            Disposition::Allow
        }
    }
}
