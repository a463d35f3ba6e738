pub mod monitoring;
pub mod question;
pub mod resource;
pub mod session;
pub mod signal;
pub mod timer;
pub mod violation;

pub use monitoring::{
    MonitorOverview, ParticipantDetail, ParticipantQuery, ParticipantSnapshot, ParticipantStatus,
    Progress, SortKey, StatusFilter, SupervisorCommand, ViolationFeedEntry,
};
pub use question::{Question, QuestionType, ResponseValue};
pub use resource::{
    CaptureHandle, CaptureSample, DeviceKind, RequiredResources, ResourceEvent, ResourceKind,
    SampleRecord,
};
pub use session::{
    CreateSessionResponse, Report, SessionSpec, SessionStatus, SessionView, SubmitOutcome,
    SupervisorMessage, TerminationReason,
};
pub use signal::{Disposition, EnvironmentSignal, KeyCombo, SignalKind};
pub use timer::{TimeExpired, TimerEvent, TimerTick};
pub use violation::{DetectedViolation, Violation, ViolationKind, ViolationLog};
