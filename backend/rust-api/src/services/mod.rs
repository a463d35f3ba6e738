use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::models::SessionSpec;
use crate::services::client_bridge::ClientBridge;
use crate::services::monitoring_service::MonitorBoard;
use crate::services::providers::{Collaborators, SignalSource, SubmissionSink};
use crate::services::report_sink::{HttpSubmissionSink, ReportArchive, ReportDispatch};
use crate::services::session_registry::{SessionEntry, SessionRegistry};
use crate::services::session_service::SessionHandle;

pub struct AppState {
    pub config: Config,
    pub sessions: Arc<SessionRegistry>,
    pub board: Arc<MonitorBoard>,
    pub reports: Arc<ReportArchive>,
    submission: Arc<dyn SubmissionSink>,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let forward: Option<Arc<dyn SubmissionSink>> = match &config.submission_url {
            Some(url) => {
                tracing::info!("Reports will be forwarded to {}", url);
                Some(Arc::new(HttpSubmissionSink::new(
                    url.clone(),
                    Duration::from_secs(config.submission_timeout_secs),
                )?))
            }
            None => None,
        };
        Ok(Self::with_submission(config, forward))
    }

    /// State whose reports are archived and, if given, also handed to `forward`.
    pub fn with_submission(config: Config, forward: Option<Arc<dyn SubmissionSink>>) -> Self {
        let sessions = Arc::new(SessionRegistry::new());
        let board = Arc::new(MonitorBoard::new(sessions.clone()));
        let reports = Arc::new(ReportArchive::new());
        let submission = Arc::new(ReportDispatch::new(reports.clone(), forward));

        Self {
            config,
            sessions,
            board,
            reports,
            submission,
        }
    }

    /// Starts an unconsented session whose environment is driven over HTTP.
    pub fn start_session(&self, spec: SessionSpec) -> SessionEntry {
        let bridge = Arc::new(ClientBridge::new());
        let collaborators = Collaborators {
            capture: bridge.clone(),
            display: bridge.clone(),
            signals: Some(bridge.clone() as Arc<dyn SignalSource>),
            submission: self.submission.clone(),
            samples: self.board.sample_sink(&spec.test_id),
            monitor: self.board.clone(),
        };

        let handle = SessionHandle::spawn(spec, collaborators, self.config.session_settings());
        self.sessions.evict_after_termination(&handle, self.config.session_retention());
        let entry = SessionEntry { handle, bridge };
        self.sessions.insert(entry.clone());
        entry
    }
}

pub mod client_bridge;
pub mod monitoring_service;
pub mod providers;
pub mod report_sink;
pub mod resource_guard;
pub mod session_registry;
pub mod session_service;
pub mod session_timer;
pub mod violation_detector;
