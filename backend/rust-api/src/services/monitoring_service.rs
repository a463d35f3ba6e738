use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::metrics::{SNAPSHOTS_INGESTED_TOTAL, SUPERVISOR_COMMANDS_TOTAL};
use crate::models::{
    CaptureSample, MonitorOverview, ParticipantDetail, ParticipantQuery, ParticipantSnapshot,
    ParticipantStatus, SampleRecord, SortKey, SupervisorCommand, Violation, ViolationFeedEntry,
};
use crate::services::providers::{MonitorFeed, SampleSink, SessionControl};

#[derive(Debug)]
struct ParticipantSlot {
    seq: u64,
    snapshot: Option<ParticipantSnapshot>,
    violations: Vec<Violation>,
    samples: Vec<SampleRecord>,
}

/// Supervisor-side roster for one test instance.
///
/// Each participant owns a slot in a concurrent map, so snapshots from
/// different sessions never contend on a shared lock.
pub struct MonitoringAggregator {
    test_id: String,
    participants: DashMap<String, ParticipantSlot>,
    next_seq: AtomicU64,
    control: Arc<dyn SessionControl>,
}

impl MonitoringAggregator {
    pub fn new(test_id: impl Into<String>, control: Arc<dyn SessionControl>) -> Self {
        Self {
            test_id: test_id.into(),
            participants: DashMap::new(),
            next_seq: AtomicU64::new(0),
            control,
        }
    }

    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    fn slot(&self, participant_id: &str) -> dashmap::mapref::one::RefMut<'_, String, ParticipantSlot> {
        self.participants
            .entry(participant_id.to_string())
            .or_insert_with(|| ParticipantSlot {
                seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
                snapshot: None,
                violations: Vec::new(),
                samples: Vec::new(),
            })
    }

    /// Last write wins. The roster position is fixed by the first ingest.
    pub fn ingest(&self, snapshot: ParticipantSnapshot) {
        SNAPSHOTS_INGESTED_TOTAL.inc();
        let mut slot = self.slot(&snapshot.participant_id);
        slot.snapshot = Some(snapshot);
    }

    /// Appends to the drill-down log. A violation id already present is ignored.
    pub fn record_violation(&self, participant_id: &str, violation: Violation) {
        let mut slot = self.slot(participant_id);
        if slot.violations.iter().any(|v| v.id == violation.id) {
            tracing::debug!(
                "Duplicate violation ignored: test={}, participant={}, id={}",
                self.test_id,
                participant_id,
                violation.id
            );
            return;
        }
        slot.violations.push(violation);
    }

    pub fn record_sample(&self, participant_id: &str, record: SampleRecord) {
        self.slot(participant_id).samples.push(record);
    }

    pub fn query(&self, query: &ParticipantQuery) -> Vec<ParticipantSnapshot> {
        let needle = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let mut rows: Vec<(u64, ParticipantSnapshot)> = self
            .participants
            .iter()
            .filter_map(|entry| {
                let snapshot = entry.snapshot.as_ref()?;
                if !query.status.admits(snapshot.status) {
                    return None;
                }
                if let Some(needle) = &needle {
                    let hit = snapshot.name.to_lowercase().contains(needle)
                        || snapshot.email.to_lowercase().contains(needle);
                    if !hit {
                        return None;
                    }
                }
                Some((entry.seq, snapshot.clone()))
            })
            .collect();

        // Stable sort on top of insertion order keeps ties in roster order.
        rows.sort_by_key(|(seq, _)| *seq);
        match query.sort {
            SortKey::Name => rows.sort_by(|(_, a), (_, b)| a.name.cmp(&b.name)),
            SortKey::Status => {
                rows.sort_by(|(_, a), (_, b)| a.status.as_str().cmp(b.status.as_str()))
            }
            SortKey::Progress => {
                rows.sort_by(|(_, a), (_, b)| b.progress.answered.cmp(&a.progress.answered))
            }
            SortKey::Violations => {
                rows.sort_by(|(_, a), (_, b)| b.violation_count.cmp(&a.violation_count))
            }
        }

        rows.into_iter().map(|(_, snapshot)| snapshot).collect()
    }

    pub fn select_detail(&self, participant_id: &str) -> Option<ParticipantDetail> {
        let slot = self.participants.get(participant_id)?;
        let snapshot = slot.snapshot.clone()?;
        Some(ParticipantDetail {
            snapshot,
            violations: slot.violations.clone(),
            samples: slot.samples.clone(),
        })
    }

    /// Fire-and-forget: the command is routed on its own task.
    pub fn dispatch(&self, participant_id: &str, command: SupervisorCommand) {
        SUPERVISOR_COMMANDS_TOTAL
            .with_label_values(&[command.name()])
            .inc();
        tracing::info!(
            "Supervisor command: test={}, participant={}, command={}",
            self.test_id,
            participant_id,
            command.name()
        );

        let control = Arc::clone(&self.control);
        let test_id = self.test_id.clone();
        let participant_id = participant_id.to_string();
        tokio::spawn(async move {
            control.dispatch(&test_id, &participant_id, command).await;
        });
    }

    pub fn overview(&self) -> MonitorOverview {
        let mut overview = MonitorOverview {
            test_id: self.test_id.clone(),
            ..Default::default()
        };
        for entry in self.participants.iter() {
            let Some(snapshot) = entry.snapshot.as_ref() else {
                continue;
            };
            overview.total_participants += 1;
            match snapshot.status {
                ParticipantStatus::Active => overview.active_participants += 1,
                ParticipantStatus::Completed => overview.completed_participants += 1,
                ParticipantStatus::Disconnected => overview.disconnected_participants += 1,
            }
            overview.total_violations += u64::from(snapshot.violation_count);
            if snapshot.flagged {
                overview.flagged_participants += 1;
            }
        }
        overview
    }

    /// Every recorded violation across the roster, oldest first.
    pub fn violation_feed(&self) -> Vec<ViolationFeedEntry> {
        let mut feed: Vec<(u64, ViolationFeedEntry)> = Vec::new();
        for entry in self.participants.iter() {
            let name = entry
                .snapshot
                .as_ref()
                .map(|s| s.name.clone())
                .unwrap_or_default();
            for violation in &entry.violations {
                feed.push((
                    entry.seq,
                    ViolationFeedEntry {
                        participant_id: entry.key().clone(),
                        participant_name: name.clone(),
                        violation: violation.clone(),
                    },
                ));
            }
        }
        feed.sort_by(|(seq_a, a), (seq_b, b)| {
            a.violation
                .timestamp
                .cmp(&b.violation.timestamp)
                .then(seq_a.cmp(seq_b))
                .then(a.violation.id.cmp(&b.violation.id))
        });
        feed.into_iter().map(|(_, entry)| entry).collect()
    }

    pub fn participant_count(&self) -> usize {
        self.participants
            .iter()
            .filter(|entry| entry.snapshot.is_some())
            .count()
    }
}

/// All aggregators of the process, keyed by test id.
pub struct MonitorBoard {
    tests: DashMap<String, Arc<MonitoringAggregator>>,
    control: Arc<dyn SessionControl>,
}

impl MonitorBoard {
    pub fn new(control: Arc<dyn SessionControl>) -> Self {
        Self {
            tests: DashMap::new(),
            control,
        }
    }

    pub fn aggregator(&self, test_id: &str) -> Arc<MonitoringAggregator> {
        self.tests
            .entry(test_id.to_string())
            .or_insert_with(|| {
                tracing::info!("Monitoring started for test={}", test_id);
                Arc::new(MonitoringAggregator::new(test_id, Arc::clone(&self.control)))
            })
            .clone()
    }

    pub fn find(&self, test_id: &str) -> Option<Arc<MonitoringAggregator>> {
        self.tests.get(test_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Sample sink that files capture metadata under `test_id`.
    pub fn sample_sink(&self, test_id: &str) -> Arc<dyn SampleSink> {
        Arc::new(AggregatorSamples {
            aggregator: self.aggregator(test_id),
        })
    }
}

impl MonitorFeed for MonitorBoard {
    fn publish_snapshot(&self, test_id: &str, snapshot: ParticipantSnapshot) {
        self.aggregator(test_id).ingest(snapshot);
    }

    fn publish_violation(&self, test_id: &str, participant_id: &str, violation: &Violation) {
        self.aggregator(test_id)
            .record_violation(participant_id, violation.clone());
    }
}

struct AggregatorSamples {
    aggregator: Arc<MonitoringAggregator>,
}

#[async_trait]
impl SampleSink for AggregatorSamples {
    async fn accept(&self, participant_id: &str, sample: CaptureSample) {
        self.aggregator
            .record_sample(participant_id, SampleRecord::from(&sample));
    }
}
