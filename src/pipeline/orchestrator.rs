//! Run orchestration.
//!
//! A run moves through `Collecting -> Normalizing -> Deduplicating -> Scoring
//! -> Finalized`. CPU-bound normalization and blocking history writes are
//! fanned out over `spawn_blocking` chunks; each stage waits for all of its
//! chunks before the next begins.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::app::ports::CollectorPort;
use crate::config::{Config, RunConfig, SourceConfig};
use crate::domain::{
    ConfidenceScore, DailyLead, DailyLeadSet, Fingerprint, HistoryEntry, LeadTier,
    NormalizedLead, RawRecord,
};
use crate::error::{
    CollectionFailure, CollectionFailureKind, HistoryStoreError, NormalizationError,
    PipelineError, Result,
};
use crate::metrics::{DedupMetrics, NormalizeMetrics, RunMetrics};
use crate::pipeline::fingerprint::{Fingerprinter, LeadIdentity};
use crate::pipeline::history::HistoryStore;
use crate::pipeline::normalize::LeadNormalizer;
use crate::pipeline::score::{scorer_from_config, Assessment, Scorer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Collecting,
    Normalizing,
    Deduplicating,
    Scoring,
    Finalized,
    Failed,
}

impl RunState {
    pub fn is_final(&self) -> bool {
        matches!(self, RunState::Finalized | RunState::Failed)
    }

    fn next(&self) -> Option<RunState> {
        match self {
            RunState::Collecting => Some(RunState::Normalizing),
            RunState::Normalizing => Some(RunState::Deduplicating),
            RunState::Deduplicating => Some(RunState::Scoring),
            RunState::Scoring => Some(RunState::Finalized),
            RunState::Finalized | RunState::Failed => None,
        }
    }
}

/// Forward-only run lifecycle. `Failed` is reachable from any non-final state.
#[derive(Debug, Clone)]
pub struct RunStateMachine {
    state: RunState,
}

impl Default for RunStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStateMachine {
    pub fn new() -> Self {
        Self {
            state: RunState::Collecting,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn transition(&mut self, to: RunState) -> Result<()> {
        let legal = match to {
            RunState::Failed => !self.state.is_final(),
            _ => self.state.next() == Some(to),
        };
        if !legal {
            return Err(PipelineError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        debug!(from = ?self.state, to = ?to, "run state transition");
        self.state = to;
        Ok(())
    }

    /// Move to `Failed` unless the run already ended
    pub fn fail(&mut self) {
        if !self.state.is_final() {
            self.state = RunState::Failed;
        }
    }
}

/// Records returned by one collector
#[derive(Debug, Clone)]
pub struct SourceBatch {
    pub source_id: String,
    pub priority: u32,
    pub records: Vec<RawRecord>,
}

/// Output of the collection stage
#[derive(Debug, Clone, Default)]
pub struct CollectedBatches {
    pub batches: Vec<SourceBatch>,
    pub failures: Vec<CollectionFailure>,
    pub skipped_sources: Vec<String>,
}

impl From<Vec<SourceBatch>> for CollectedBatches {
    fn from(batches: Vec<SourceBatch>) -> Self {
        Self {
            batches,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub workers: usize,
    pub include_previously_seen: bool,
    pub collector_timeout: Option<Duration>,
}

impl From<&RunConfig> for RunOptions {
    fn from(config: &RunConfig) -> Self {
        Self {
            workers: config.workers.max(1),
            include_previously_seen: config.include_previously_seen,
            collector_timeout: config
                .collector_timeout_secs
                .filter(|s| *s > 0)
                .map(Duration::from_secs),
        }
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from(&RunConfig::default())
    }
}

/// A lead that was excluded because it could not be scored
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoringFailure {
    pub fingerprint: Fingerprint,
    pub canonical_address: String,
    pub score: ConfidenceScore,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub run_date: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub state: RunState,
    pub scorer: &'static str,
    pub raw_records_in: usize,
    pub normalized: usize,
    pub normalization_failures: usize,
    pub normalization_errors: Vec<NormalizationError>,
    /// Leads not emitted because they were duplicates, in-run or historical
    pub duplicates_suppressed: usize,
    pub same_run_merges: usize,
    pub previously_seen: usize,
    pub new_leads_emitted: usize,
    pub leads_emitted: usize,
    pub degraded_dates: usize,
    pub history_failures: usize,
    pub collection_failures: Vec<CollectionFailure>,
    pub skipped_sources: Vec<String>,
    pub scoring_failures: Vec<ScoringFailure>,
    /// Emitted leads per tier; every tier is present
    pub tier_counts: BTreeMap<LeadTier, usize>,
    /// Emitted leads per project type
    pub project_type_counts: BTreeMap<String, usize>,
}

impl RunSummary {
    /// Records and leads lost to any error class
    pub fn error_count(&self) -> usize {
        self.normalization_failures
            + self.history_failures
            + self.collection_failures.len()
            + self.scoring_failures.len()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub lead_set: DailyLeadSet,
    pub summary: RunSummary,
}

/// One fingerprint's leads within a run
struct LeadGroup {
    identity: LeadIdentity,
    lead: NormalizedLead,
    units: BTreeSet<String>,
    /// Distinct (source, reference, observed) sightings in arrival order
    contributions: Vec<(String, String, NaiveDate)>,
}

/// Group outcome after history writes
struct RecordedGroup {
    group: LeadGroup,
    entry: HistoryEntry,
    is_new: bool,
}

enum CollectOutcome {
    Records(Vec<RawRecord>),
    Failed(String),
    TimedOut,
}

pub struct Orchestrator {
    options: RunOptions,
    sources: HashMap<String, SourceConfig>,
    normalizer: Arc<LeadNormalizer>,
    fingerprinter: Arc<Fingerprinter>,
    store: Arc<dyn HistoryStore>,
    scorer: Arc<dyn Scorer>,
}

impl Orchestrator {
    pub fn new(
        options: RunOptions,
        sources: &[SourceConfig],
        normalizer: LeadNormalizer,
        fingerprinter: Fingerprinter,
        store: Arc<dyn HistoryStore>,
        scorer: Arc<dyn Scorer>,
    ) -> Self {
        Self {
            options,
            sources: sources.iter().map(|s| (s.id.clone(), s.clone())).collect(),
            normalizer: Arc::new(normalizer),
            fingerprinter: Arc::new(fingerprinter),
            store,
            scorer,
        }
    }

    /// Wire every stage from configuration around the given store
    pub fn from_config(config: &Config, store: Arc<dyn HistoryStore>) -> Result<Self> {
        let normalizer = LeadNormalizer::new(&config.normalize, &config.sources)?;
        let scorer = scorer_from_config(&config.scoring, config.source_reliability());
        Ok(Self::new(
            RunOptions::from(&config.pipeline),
            &config.sources,
            normalizer,
            Fingerprinter::new(config.fingerprint.clone()),
            store,
            scorer,
        ))
    }

    fn priority(&self, source_id: &str) -> u32 {
        self.sources
            .get(source_id)
            .map(|s| s.priority)
            .unwrap_or(u32::MAX)
    }

    /// Run every allowed collector concurrently. A collector that errors,
    /// panics or overruns the timeout yields a `CollectionFailure` and an
    /// empty batch; the other sources are unaffected.
    #[instrument(skip_all, fields(run_date = %run_date, collectors = collectors.len()))]
    pub async fn collect(
        &self,
        collectors: Vec<Arc<dyn CollectorPort>>,
        run_date: NaiveDate,
    ) -> CollectedBatches {
        let started = Instant::now();
        let mut collected = CollectedBatches::default();
        let mut handles = Vec::new();

        for collector in collectors {
            let source_id = collector.source_id().to_string();
            if self.sources.get(&source_id).is_some_and(|s| !s.allowed) {
                info!(source = %source_id, "source disallowed by policy, skipping");
                collected.skipped_sources.push(source_id);
                continue;
            }

            let timeout = self.options.collector_timeout;
            let handle = tokio::spawn(async move {
                let work = collector.collect(run_date);
                let result = match timeout {
                    Some(limit) => match tokio::time::timeout(limit, work).await {
                        Ok(result) => result,
                        Err(_) => return CollectOutcome::TimedOut,
                    },
                    None => work.await,
                };
                match result {
                    Ok(records) => CollectOutcome::Records(records),
                    Err(e) => CollectOutcome::Failed(format!("{:#}", e)),
                }
            });
            handles.push((source_id, handle));
        }

        let (ids, futures): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        for (source_id, joined) in ids.into_iter().zip(join_all(futures).await) {
            let failure = match joined {
                Ok(CollectOutcome::Records(records)) => {
                    info!(source = %source_id, records = records.len(), "collected");
                    collected.batches.push(SourceBatch {
                        priority: self.priority(&source_id),
                        source_id,
                        records,
                    });
                    continue;
                }
                Ok(CollectOutcome::Failed(reason)) => CollectionFailure::error(&source_id, reason),
                Ok(CollectOutcome::TimedOut) => CollectionFailure {
                    source_id: source_id.clone(),
                    kind: CollectionFailureKind::Timeout,
                    reason: format!(
                        "no result within {}s",
                        self.options.collector_timeout.map(|d| d.as_secs()).unwrap_or(0)
                    ),
                },
                Err(join_error) => CollectionFailure {
                    source_id: source_id.clone(),
                    kind: if join_error.is_panic() {
                        CollectionFailureKind::Panicked
                    } else {
                        CollectionFailureKind::Error
                    },
                    reason: join_error.to_string(),
                },
            };
            warn!(source = %failure.source_id, kind = ?failure.kind, reason = %failure.reason, "collection failed");
            RunMetrics::record_collection_failure();
            collected.failures.push(failure);
        }

        let total: usize = collected.batches.iter().map(|b| b.records.len()).sum();
        RunMetrics::record_collection(total, started.elapsed().as_secs_f64());
        collected
    }

    pub async fn run_with_collectors(
        &self,
        collectors: Vec<Arc<dyn CollectorPort>>,
        run_date: NaiveDate,
    ) -> Result<RunReport> {
        let collected = self.collect(collectors, run_date).await;
        self.run(run_date, collected).await
    }

    /// Turn collected batches into the day's lead set.
    ///
    /// Only an unavailable history store (or a crashed worker) fails the run;
    /// record, source, store-write and scoring errors are tallied in the
    /// summary instead.
    #[instrument(skip_all, fields(run_date = %run_date))]
    pub async fn run(
        &self,
        run_date: NaiveDate,
        collected: impl Into<CollectedBatches>,
    ) -> Result<RunReport> {
        let mut machine = RunStateMachine::new();
        let started = Instant::now();
        let result = self
            .execute(&mut machine, run_date, collected.into())
            .await;

        match result {
            Ok(report) => {
                RunMetrics::record_finished(
                    report.summary.leads_emitted,
                    report.summary.new_leads_emitted,
                    started.elapsed().as_secs_f64(),
                );
                Ok(report)
            }
            Err(e) => {
                machine.fail();
                RunMetrics::record_failed();
                error!(error = %e, state = ?machine.state(), "run failed");
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        machine: &mut RunStateMachine,
        run_date: NaiveDate,
        collected: CollectedBatches,
    ) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, batches = collected.batches.len(), "run started");

        // Nothing may be written before the store is known to be reachable
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.check_available())
            .await
            .map_err(|e| {
                PipelineError::HistoryStoreUnavailable(HistoryStoreError::Unavailable(
                    e.to_string(),
                ))
            })?
            .map_err(PipelineError::HistoryStoreUnavailable)?;

        let CollectedBatches {
            batches,
            failures: collection_failures,
            skipped_sources,
        } = collected;

        machine.transition(RunState::Normalizing)?;
        let raw_records_in: usize = batches.iter().map(|b| b.records.len()).sum();
        let (leads, normalization_errors) = self.normalize_stage(batches, run_date).await?;
        let degraded_dates = leads.iter().filter(|l| l.date_degraded).count();

        machine.transition(RunState::Deduplicating)?;
        let dedup_started = Instant::now();
        let normalized = leads.len();
        let groups = self.group(leads);
        let same_run_merges = normalized - groups.len();
        let group_count = groups.len();
        let (recorded, history_failures) = self.record_stage(groups).await?;
        let previously_seen = recorded.iter().filter(|g| !g.is_new).count();
        DedupMetrics::record_stage(
            group_count,
            same_run_merges,
            previously_seen,
            history_failures,
            dedup_started.elapsed().as_secs_f64(),
        );
        let store = Arc::clone(&self.store);
        if let Ok(Ok(size)) = tokio::task::spawn_blocking(move || store.len()).await {
            DedupMetrics::set_history_size(size);
        }

        machine.transition(RunState::Scoring)?;
        let (mut leads, scoring_failures) = self.score_stage(recorded);
        leads.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.lead.date_first_observed.cmp(&b.lead.date_first_observed))
                .then_with(|| a.canonical_address.cmp(&b.canonical_address))
                .then_with(|| a.fingerprint.cmp(&b.fingerprint))
        });

        machine.transition(RunState::Finalized)?;
        let new_leads_emitted = leads.iter().filter(|l| l.is_new).count();
        let duplicates_suppressed = if self.options.include_previously_seen {
            same_run_merges
        } else {
            same_run_merges + previously_seen
        };

        let mut tier_counts: BTreeMap<LeadTier, usize> =
            [LeadTier::A, LeadTier::B, LeadTier::C, LeadTier::D]
                .into_iter()
                .map(|t| (t, 0))
                .collect();
        let mut project_type_counts: BTreeMap<String, usize> = BTreeMap::new();
        for lead in &leads {
            *tier_counts.entry(lead.tier).or_default() += 1;
            *project_type_counts
                .entry(lead.lead.project_type.as_str().to_string())
                .or_default() += 1;
        }

        let summary = RunSummary {
            run_id,
            run_date,
            started_at,
            finished_at: Utc::now(),
            state: machine.state(),
            scorer: self.scorer.name(),
            raw_records_in,
            normalized,
            normalization_failures: normalization_errors.len(),
            normalization_errors,
            duplicates_suppressed,
            same_run_merges,
            previously_seen,
            new_leads_emitted,
            leads_emitted: leads.len(),
            degraded_dates,
            history_failures,
            collection_failures,
            skipped_sources,
            scoring_failures,
            tier_counts,
            project_type_counts,
        };

        info!(
            %run_id,
            raw = summary.raw_records_in,
            emitted = summary.leads_emitted,
            new = summary.new_leads_emitted,
            suppressed = summary.duplicates_suppressed,
            errors = summary.error_count(),
            "run finalized"
        );

        Ok(RunReport {
            lead_set: DailyLeadSet::new(run_id, run_date, leads),
            summary,
        })
    }

    /// Normalize every record, returning leads in canonical arrival order:
    /// source priority, then batch position, then position within the batch.
    async fn normalize_stage(
        &self,
        mut batches: Vec<SourceBatch>,
        run_date: NaiveDate,
    ) -> Result<(Vec<NormalizedLead>, Vec<NormalizationError>)> {
        let started = Instant::now();
        // Stable sort keeps batch order among equal priorities
        batches.sort_by_key(|b| b.priority);
        let ordered: Vec<(usize, RawRecord)> = batches
            .into_iter()
            .flat_map(|b| b.records)
            .enumerate()
            .collect();
        let records_in = ordered.len();

        let mut tasks = Vec::new();
        for chunk in chunked(ordered, self.options.workers) {
            let normalizer = Arc::clone(&self.normalizer);
            tasks.push(tokio::task::spawn_blocking(move || {
                chunk
                    .into_iter()
                    .map(|(seq, record)| (seq, normalizer.normalize(&record, run_date)))
                    .collect::<Vec<_>>()
            }));
        }

        let mut results = Vec::with_capacity(records_in);
        for joined in join_all(tasks).await {
            results.extend(joined.map_err(|e| PipelineError::Worker {
                stage: "normalize",
                reason: e.to_string(),
            })?);
        }
        results.sort_by_key(|(seq, _)| *seq);

        let mut leads = Vec::with_capacity(results.len());
        let mut errors = Vec::new();
        for (_, result) in results {
            match result {
                Ok(lead) => {
                    if lead.date_degraded {
                        NormalizeMetrics::record_degraded_date();
                    }
                    leads.push(lead);
                }
                Err(e) => {
                    warn!(source = %e.source_id, reference = %e.reference, field = %e.field, reason = %e.reason, "record dropped");
                    NormalizeMetrics::record_failure(e.field.as_str());
                    errors.push(e);
                }
            }
        }

        NormalizeMetrics::record_batch(
            records_in,
            leads.len(),
            errors.len(),
            started.elapsed().as_secs_f64(),
        );
        info!(
            records = records_in,
            normalized = leads.len(),
            failed = errors.len(),
            "normalization complete"
        );
        Ok((leads, errors))
    }

    /// Group leads by fingerprint. The first lead in arrival order represents
    /// the group; later ones widen its sources and units.
    fn group(&self, leads: Vec<NormalizedLead>) -> Vec<LeadGroup> {
        let mut groups: Vec<LeadGroup> = Vec::new();
        let mut index: HashMap<Fingerprint, usize> = HashMap::new();
        let mut seen: HashSet<(Fingerprint, String, String)> = HashSet::new();

        for lead in leads {
            let identity = self.fingerprinter.identify(&lead);
            let source = lead.raw_reference.source_id.clone();
            let reference = lead.raw_reference.reference.clone();
            let observed = lead.date_first_observed;
            let first_sighting =
                seen.insert((identity.fingerprint.clone(), source.clone(), reference.clone()));

            match index.get(&identity.fingerprint) {
                Some(&i) => {
                    let group = &mut groups[i];
                    group.lead.widen_sources(&source);
                    if let Some(unit) = identity.unit_key {
                        group.units.insert(unit);
                    }
                    if first_sighting {
                        group.contributions.push((source, reference, observed));
                    }
                    debug!(fingerprint = group.identity.fingerprint.short(), "merged same-run duplicate");
                }
                None => {
                    index.insert(identity.fingerprint.clone(), groups.len());
                    let units = identity.unit_key.iter().cloned().collect();
                    groups.push(LeadGroup {
                        identity,
                        lead,
                        units,
                        contributions: vec![(source, reference, observed)],
                    });
                }
            }
        }
        groups
    }

    /// Record every contribution in the history store. Groups are spread over
    /// blocking workers; each group's occurrences are written in order.
    async fn record_stage(&self, groups: Vec<LeadGroup>) -> Result<(Vec<RecordedGroup>, usize)> {
        let indexed: Vec<(usize, LeadGroup)> = groups.into_iter().enumerate().collect();
        let mut tasks = Vec::new();
        for chunk in chunked(indexed, self.options.workers) {
            let store = Arc::clone(&self.store);
            tasks.push(tokio::task::spawn_blocking(move || {
                chunk
                    .into_iter()
                    .map(|(i, group)| (i, record_group(store.as_ref(), group)))
                    .collect::<Vec<_>>()
            }));
        }

        let mut results = Vec::new();
        for joined in join_all(tasks).await {
            results.extend(joined.map_err(|e| PipelineError::Worker {
                stage: "dedup",
                reason: e.to_string(),
            })?);
        }
        results.sort_by_key(|(i, _)| *i);

        let mut recorded = Vec::with_capacity(results.len());
        let mut failures = 0;
        for (_, result) in results {
            match result {
                Ok(group) => recorded.push(group),
                Err(_) => failures += 1,
            }
        }
        Ok((recorded, failures))
    }

    fn score_stage(&self, recorded: Vec<RecordedGroup>) -> (Vec<DailyLead>, Vec<ScoringFailure>) {
        let mut leads = Vec::new();
        let mut failures = Vec::new();

        for RecordedGroup {
            group,
            entry,
            is_new,
        } in recorded
        {
            if !is_new && !self.options.include_previously_seen {
                continue;
            }
            match self.scorer.assess(&group.lead, Some(&entry)) {
                Ok(Assessment { score, reason }) => leads.push(DailyLead {
                    lead: group.lead,
                    fingerprint: group.identity.fingerprint,
                    canonical_address: group.identity.canonical_address,
                    units: group.units.into_iter().collect(),
                    score,
                    tier: score.tier(),
                    reason,
                    is_new,
                    occurrences: entry.occurrences,
                }),
                Err(e) => {
                    warn!(fingerprint = group.identity.fingerprint.short(), error = %e, "lead excluded, scoring failed");
                    RunMetrics::record_scoring_failure();
                    failures.push(ScoringFailure {
                        fingerprint: group.identity.fingerprint,
                        canonical_address: group.identity.canonical_address,
                        score: ConfidenceScore::MIN,
                        reason: e.to_string(),
                    });
                }
            }
        }
        (leads, failures)
    }
}

/// Write one group's contributions. The group's `is_new` is the answer to its
/// first write; any store error drops the whole group.
fn record_group(
    store: &dyn HistoryStore,
    group: LeadGroup,
) -> std::result::Result<RecordedGroup, HistoryStoreError> {
    let fingerprint = &group.identity.fingerprint;
    let mut outcome: Option<(HistoryEntry, bool)> = None;

    for (source, _, observed) in &group.contributions {
        match store.record_occurrence(fingerprint, source, *observed) {
            Ok((entry, fresh)) => {
                let is_new = outcome.as_ref().map_or(fresh, |(_, first)| *first);
                outcome = Some((entry, is_new));
            }
            Err(e) => {
                error!(fingerprint = fingerprint.short(), error = %e, "history write failed, group dropped");
                return Err(e);
            }
        }
    }

    let (entry, is_new) = outcome.ok_or_else(|| HistoryStoreError::Corrupt {
        fingerprint: fingerprint.to_string(),
        detail: "group without contributions".into(),
    })?;
    Ok(RecordedGroup {
        group,
        entry,
        is_new,
    })
}

/// Split `items` into at most `workers` owned chunks of near-equal size
fn chunked<T>(items: Vec<T>, workers: usize) -> Vec<Vec<T>> {
    if items.is_empty() {
        return Vec::new();
    }
    let size = items.len().div_ceil(workers.max(1));
    let mut chunks = Vec::with_capacity(workers);
    let mut iter = items.into_iter().peekable();
    while iter.peek().is_some() {
        chunks.push(iter.by_ref().take(size).collect());
    }
    chunks
}
