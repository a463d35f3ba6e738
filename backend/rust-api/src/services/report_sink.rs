use anyhow::Context;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::models::Report;
use crate::services::providers::{SubmissionError, SubmissionSink};
use crate::utils::retry::{retry_async_with_config, RetryConfig};

/// In-memory copy of every report this process produced, keyed by session id.
#[derive(Default)]
pub struct ReportArchive {
    reports: DashMap<String, Report>,
}

impl ReportArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session_id: &str) -> Option<Report> {
        self.reports.get(session_id).map(|r| r.clone())
    }

    pub fn for_test(&self, test_id: &str) -> Vec<Report> {
        let mut reports: Vec<Report> = self
            .reports
            .iter()
            .filter(|r| r.test_id == test_id)
            .map(|r| r.clone())
            .collect();
        reports.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        reports
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }
}

#[async_trait]
impl SubmissionSink for ReportArchive {
    async fn submit(&self, report: &Report) -> Result<(), SubmissionError> {
        self.reports
            .insert(report.session_id.clone(), report.clone());
        Ok(())
    }
}

/// Posts reports as JSON to an external collector.
pub struct HttpSubmissionSink {
    client: reqwest::Client,
    url: String,
    retry: RetryConfig,
}

impl HttpSubmissionSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build submission HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn post(&self, report: &Report) -> Result<(), SubmissionError> {
        let response = self
            .client
            .post(&self.url)
            .json(report)
            .send()
            .await
            .with_context(|| format!("POST {} failed", self.url))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            Err(SubmissionError::Transport(anyhow::anyhow!(
                "collector returned {}: {}",
                status,
                body
            )))
        } else {
            Err(SubmissionError::Rejected(format!("{}: {}", status, body)))
        }
    }
}

#[async_trait]
impl SubmissionSink for HttpSubmissionSink {
    async fn submit(&self, report: &Report) -> Result<(), SubmissionError> {
        retry_async_with_config(
            self.retry.clone(),
            |e: &SubmissionError| matches!(e, SubmissionError::Transport(_)),
            || self.post(report),
        )
        .await?;
        tracing::info!(
            "Report delivered: session={}, url={}",
            report.session_id,
            self.url
        );
        Ok(())
    }
}

/// Archives every report locally and forwards it when a collector is configured.
/// The forward result decides the acknowledgement.
pub struct ReportDispatch {
    archive: Arc<ReportArchive>,
    forward: Option<Arc<dyn SubmissionSink>>,
}

impl ReportDispatch {
    pub fn new(archive: Arc<ReportArchive>, forward: Option<Arc<dyn SubmissionSink>>) -> Self {
        Self { archive, forward }
    }
}

#[async_trait]
impl SubmissionSink for ReportDispatch {
    async fn submit(&self, report: &Report) -> Result<(), SubmissionError> {
        self.archive.submit(report).await?;
        match &self.forward {
            Some(forward) => forward.submit(report).await,
            None => Ok(()),
        }
    }
}
