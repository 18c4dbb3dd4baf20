use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use tempfile::TempDir;

use lead_pipeline::app::ports::CollectorPort;
use lead_pipeline::config::{Config, SourceConfig};
use lead_pipeline::domain::{
    ConfidenceScore, Fingerprint, HistoryEntry, NormalizedLead, ProjectType, RawRecord,
};
use lead_pipeline::error::{CollectionFailureKind, HistoryStoreError, PipelineError, ScoringError};
use lead_pipeline::infra::all_exporters;
use lead_pipeline::pipeline::{
    Assessment, Fingerprinter, HistoryStore, InMemoryHistoryStore, LeadNormalizer, Orchestrator,
    RunOptions, RunState, Scorer, SourceBatch, SqliteHistoryStore,
};

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
}

fn config() -> Config {
    let mut permits = SourceConfig::with_defaults("permits");
    permits.reliability = Some(85.0);
    let mut classifieds = SourceConfig::with_defaults("classifieds");
    classifieds.reliability = Some(55.0);
    classifieds.priority = 1;
    let mut zoning = SourceConfig::with_defaults("zoning");
    zoning.priority = 2;

    Config {
        sources: vec![permits, classifieds, zoning],
        ..Config::default()
    }
}

fn record(source: &str, reference: &str, street: &str, kind: &str, date: &str) -> RawRecord {
    RawRecord::from_pairs(
        source,
        Utc.with_ymd_and_hms(2025, 3, 1, 6, 0, 0).unwrap(),
        reference,
        [
            ("street", street),
            ("city", "greenville"),
            ("state", "sc"),
            ("type", kind),
            ("date", date),
        ],
    )
}

fn batch(source: &str, priority: u32, records: Vec<RawRecord>) -> SourceBatch {
    SourceBatch {
        source_id: source.to_string(),
        priority,
        records,
    }
}

fn orchestrator(store: Arc<dyn HistoryStore>) -> Orchestrator {
    Orchestrator::from_config(&config(), store).unwrap()
}

#[tokio::test]
async fn oak_avenue_is_new_on_day_one_and_suppressed_on_day_two() {
    let store = Arc::new(InMemoryHistoryStore::new());
    let pipeline = orchestrator(store.clone());

    let day_one = vec![
        batch(
            "permits",
            0,
            vec![record("permits", "p-1", "45 Oak Ave", "demo permit", "2025-03-01")],
        ),
        batch(
            "classifieds",
            1,
            vec![record("classifieds", "c-9", "45 oak avenue", "demolition job", "03/01/2025")],
        ),
    ];
    let report = pipeline.run(day(1), day_one).await.unwrap();

    assert_eq!(report.summary.state, RunState::Finalized);
    assert_eq!(report.lead_set.len(), 1);
    let lead = &report.lead_set.leads()[0];
    assert_eq!(lead.lead.project_type, ProjectType::Demolition);
    assert_eq!(lead.lead.address.street, "45 Oak Ave");
    assert_eq!(lead.lead.sources, vec!["permits".to_string(), "classifieds".to_string()]);
    assert!(lead.is_new);
    assert_eq!(lead.occurrences, 2);
    assert_eq!(report.summary.same_run_merges, 1);

    let fingerprint = lead.fingerprint.clone();

    let day_two = vec![batch(
        "zoning",
        2,
        vec![record("zoning", "z-3", "45 OAK AVENUE", "Demolition", "2025-03-02")],
    )];
    let report = pipeline.run(day(2), day_two).await.unwrap();

    assert!(report.lead_set.is_empty());
    assert_eq!(report.summary.previously_seen, 1);
    assert_eq!(report.summary.duplicates_suppressed, 1);

    let entry = store.lookup(&fingerprint).unwrap().unwrap();
    assert_eq!(entry.occurrences, 3);
    assert_eq!(entry.sources.len(), 3);
    assert_eq!(entry.first_seen, day(1));
    assert_eq!(entry.last_seen, day(2));
}

#[tokio::test]
async fn previously_seen_leads_can_be_included_and_flagged() {
    let store: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());
    let mut cfg = config();
    cfg.pipeline.include_previously_seen = true;
    let pipeline = Orchestrator::from_config(&cfg, store).unwrap();

    let input = || {
        vec![batch(
            "permits",
            0,
            vec![record("permits", "p-1", "12 Pine St", "RESIDENTIAL ADDITION", "2025-03-01")],
        )]
    };
    pipeline.run(day(1), input()).await.unwrap();
    let report = pipeline.run(day(2), input()).await.unwrap();

    assert_eq!(report.lead_set.len(), 1);
    assert!(!report.lead_set.leads()[0].is_new);
    assert_eq!(report.summary.new_leads_emitted, 0);
    assert_eq!(report.summary.duplicates_suppressed, 0);
}

#[tokio::test]
async fn same_batch_twice_in_one_run_adds_nothing() {
    let records = vec![
        record("permits", "p-1", "45 Oak Ave", "demo permit", "2025-03-01"),
        record("permits", "p-2", "200 Wade Hampton Blvd", "COMMERCIAL UPFIT", "2025-02-27"),
        record("permits", "p-3", "9 Main St", "RE-ROOF", "2025-02-28"),
    ];

    let once_store = Arc::new(InMemoryHistoryStore::new());
    let once = orchestrator(once_store.clone())
        .run(day(1), vec![batch("permits", 0, records.clone())])
        .await
        .unwrap();

    let twice_store = Arc::new(InMemoryHistoryStore::new());
    let twice = orchestrator(twice_store.clone())
        .run(
            day(1),
            vec![batch("permits", 0, records.clone()), batch("permits", 0, records)],
        )
        .await
        .unwrap();

    assert_eq!(once.summary.new_leads_emitted, 3);
    assert_eq!(twice.summary.new_leads_emitted, once.summary.new_leads_emitted);
    let fingerprints = |r: &lead_pipeline::pipeline::RunReport| {
        r.lead_set.iter().map(|l| l.fingerprint.clone()).collect::<Vec<_>>()
    };
    assert_eq!(fingerprints(&once), fingerprints(&twice));
    for lead in twice.lead_set.iter() {
        let a = once_store.lookup(&lead.fingerprint).unwrap().unwrap();
        let b = twice_store.lookup(&lead.fingerprint).unwrap().unwrap();
        assert_eq!(a.occurrences, b.occurrences);
    }
}

#[tokio::test]
async fn output_is_sorted_by_score_then_date() {
    let store: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());
    let report = orchestrator(store)
        .run(
            day(5),
            vec![
                batch(
                    "classifieds",
                    1,
                    vec![
                        record("classifieds", "c-1", "3 Elm St", "garage cleanout", "2025-03-04"),
                        record("classifieds", "c-2", "1 Elm St", "garage cleanout", "2025-03-02"),
                    ],
                ),
                batch(
                    "permits",
                    0,
                    vec![record("permits", "p-1", "7 Birch Rd", "DEMOLITION", "2025-03-03")],
                ),
            ],
        )
        .await
        .unwrap();

    let streets: Vec<_> = report
        .lead_set
        .iter()
        .map(|l| l.lead.address.street.as_str())
        .collect();
    assert_eq!(streets, vec!["7 Birch Rd", "1 Elm St", "3 Elm St"]);
    let scores: Vec<_> = report.lead_set.iter().map(|l| l.score).collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
}

#[tokio::test]
async fn equal_score_and_date_fall_back_to_canonical_address() {
    let store: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());
    let report = orchestrator(store)
        .run(
            day(5),
            vec![batch(
                "permits",
                0,
                vec![
                    record("permits", "p-1", "9 Elm St", "DEMOLITION", "2025-03-03"),
                    record("permits", "p-2", "1 Elm St", "DEMOLITION", "2025-03-03"),
                ],
            )],
        )
        .await
        .unwrap();

    let leads = report.lead_set.leads();
    assert_eq!(leads.len(), 2);
    assert_eq!(leads[0].score, leads[1].score);
    assert_eq!(leads[0].canonical_address, "1 elm st|greenville|sc");
    assert_eq!(leads[1].canonical_address, "9 elm st|greenville|sc");
}

#[tokio::test]
async fn higher_priority_source_represents_merged_lead_regardless_of_arrival() {
    let store: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());
    let report = orchestrator(store)
        .run(
            day(1),
            vec![
                batch(
                    "classifieds",
                    1,
                    vec![record("classifieds", "c-9", "45 oak avenue", "demolition job", "03/01/2025")],
                ),
                batch(
                    "permits",
                    0,
                    vec![record("permits", "p-1", "45 Oak Ave", "demo permit", "2025-03-01")],
                ),
            ],
        )
        .await
        .unwrap();

    assert_eq!(report.lead_set.len(), 1);
    let lead = &report.lead_set.leads()[0];
    assert_eq!(lead.lead.sources, vec!["permits".to_string(), "classifieds".to_string()]);
    assert_eq!(lead.lead.address.street, "45 Oak Ave");
    assert_eq!(lead.lead.raw_reference.reference, "p-1");
    assert_eq!(report.summary.same_run_merges, 1);
}

#[tokio::test]
async fn bad_records_are_counted_not_fatal() {
    let store: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());
    let report = orchestrator(store)
        .run(
            day(3),
            vec![
                batch(
                    "permits",
                    0,
                    vec![
                        record("permits", "p-1", "45 Oak Ave", "demo permit", "sometime soon"),
                        record("permits", "p-2", "", "demo permit", "2025-03-01"),
                    ],
                ),
                batch(
                    "unregistered",
                    9,
                    vec![record("unregistered", "u-1", "1 Main St", "demo", "2025-03-01")],
                ),
            ],
        )
        .await
        .unwrap();

    assert_eq!(report.summary.raw_records_in, 3);
    assert_eq!(report.summary.normalization_failures, 2);
    assert_eq!(report.lead_set.len(), 1);
    let lead = &report.lead_set.leads()[0];
    assert!(lead.lead.date_degraded);
    assert_eq!(lead.lead.date_first_observed, day(3));
}

struct StaticCollector {
    source: &'static str,
    records: Vec<RawRecord>,
}

#[async_trait]
impl CollectorPort for StaticCollector {
    fn source_id(&self) -> &str {
        self.source
    }

    async fn collect(&self, _run_date: NaiveDate) -> anyhow::Result<Vec<RawRecord>> {
        Ok(self.records.clone())
    }
}

struct BrokenCollector;

#[async_trait]
impl CollectorPort for BrokenCollector {
    fn source_id(&self) -> &str {
        "classifieds"
    }

    async fn collect(&self, _run_date: NaiveDate) -> anyhow::Result<Vec<RawRecord>> {
        anyhow::bail!("listing site returned 503")
    }
}

struct PanickingCollector;

#[async_trait]
impl CollectorPort for PanickingCollector {
    fn source_id(&self) -> &str {
        "classifieds"
    }

    async fn collect(&self, _run_date: NaiveDate) -> anyhow::Result<Vec<RawRecord>> {
        panic!("parser bug")
    }
}

struct SlowCollector;

#[async_trait]
impl CollectorPort for SlowCollector {
    fn source_id(&self) -> &str {
        "classifieds"
    }

    async fn collect(&self, _run_date: NaiveDate) -> anyhow::Result<Vec<RawRecord>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Vec::new())
    }
}

fn healthy_collectors() -> (Arc<dyn CollectorPort>, Arc<dyn CollectorPort>) {
    let permits = StaticCollector {
        source: "permits",
        records: vec![record("permits", "p-1", "45 Oak Ave", "demo permit", "2025-03-01")],
    };
    let zoning = StaticCollector {
        source: "zoning",
        records: vec![record("zoning", "z-1", "88 Augusta St", "rezoning for new construction", "2025-03-01")],
    };
    (Arc::new(permits), Arc::new(zoning))
}

#[tokio::test]
async fn one_failed_source_does_not_sink_the_run() {
    let (permits, zoning) = healthy_collectors();
    let store: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());
    let report = orchestrator(store)
        .run_with_collectors(vec![permits, Arc::new(BrokenCollector), zoning], day(1))
        .await
        .unwrap();

    assert_eq!(report.lead_set.len(), 2);
    assert_eq!(report.summary.collection_failures.len(), 1);
    let failure = &report.summary.collection_failures[0];
    assert_eq!(failure.source_id, "classifieds");
    assert_eq!(failure.kind, CollectionFailureKind::Error);
    assert!(failure.reason.contains("503"));
}

#[tokio::test]
async fn panicking_and_slow_collectors_become_failures() {
    let store: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());
    let mut cfg = config();
    cfg.pipeline.collector_timeout_secs = Some(1);
    let pipeline = Orchestrator::from_config(&cfg, store).unwrap();

    let (permits, zoning) = healthy_collectors();
    let report = pipeline
        .run_with_collectors(vec![permits.clone(), Arc::new(PanickingCollector), zoning.clone()], day(1))
        .await
        .unwrap();
    assert_eq!(report.summary.collection_failures.len(), 1);
    assert_eq!(report.summary.collection_failures[0].kind, CollectionFailureKind::Panicked);

    let report = pipeline
        .run_with_collectors(vec![permits, Arc::new(SlowCollector), zoning], day(2))
        .await
        .unwrap();
    assert_eq!(report.summary.collection_failures.len(), 1);
    assert_eq!(report.summary.collection_failures[0].kind, CollectionFailureKind::Timeout);
}

#[tokio::test]
async fn disallowed_sources_are_never_collected() {
    let store: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());
    let mut cfg = config();
    cfg.sources[2].allowed = false;
    let pipeline = Orchestrator::from_config(&cfg, store).unwrap();

    let (permits, zoning) = healthy_collectors();
    let report = pipeline
        .run_with_collectors(vec![permits, zoning], day(1))
        .await
        .unwrap();

    assert_eq!(report.summary.skipped_sources, vec!["zoning".to_string()]);
    assert_eq!(report.lead_set.len(), 1);
    assert!(report.summary.collection_failures.is_empty());
}

/// Store whose availability and per-fingerprint failures are scripted
#[derive(Default)]
struct ScriptedStore {
    inner: InMemoryHistoryStore,
    down: bool,
    fail_fingerprint: std::sync::Mutex<Option<Fingerprint>>,
    writes: AtomicUsize,
}

impl HistoryStore for ScriptedStore {
    fn check_available(&self) -> Result<(), HistoryStoreError> {
        if self.down {
            return Err(HistoryStoreError::Unavailable("disk not mounted".into()));
        }
        self.inner.check_available()
    }

    fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<HistoryEntry>, HistoryStoreError> {
        self.inner.lookup(fingerprint)
    }

    fn record_occurrence(
        &self,
        fingerprint: &Fingerprint,
        source: &str,
        observed: NaiveDate,
    ) -> Result<(HistoryEntry, bool), HistoryStoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_fingerprint.lock().unwrap().as_ref() == Some(fingerprint) {
            return Err(HistoryStoreError::Unavailable("write timed out".into()));
        }
        self.inner.record_occurrence(fingerprint, source, observed)
    }

    fn len(&self) -> Result<u64, HistoryStoreError> {
        self.inner.len()
    }
}

#[tokio::test]
async fn unavailable_store_fails_before_any_write() {
    let store = Arc::new(ScriptedStore {
        down: true,
        ..ScriptedStore::default()
    });
    let err = orchestrator(store.clone())
        .run(
            day(1),
            vec![batch(
                "permits",
                0,
                vec![record("permits", "p-1", "45 Oak Ave", "demo permit", "2025-03-01")],
            )],
        )
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::HistoryStoreUnavailable(_)));
    assert_eq!(store.writes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn store_write_failure_drops_only_that_lead() {
    let cfg = config();
    let normalizer = LeadNormalizer::new(&cfg.normalize, &cfg.sources).unwrap();
    let doomed = normalizer
        .normalize(&record("permits", "p-2", "9 Main St", "RE-ROOF", "2025-02-28"), day(1))
        .unwrap();
    let store = Arc::new(ScriptedStore::default());
    *store.fail_fingerprint.lock().unwrap() = Some(Fingerprinter::default().fingerprint(&doomed));

    let report = orchestrator(store.clone())
        .run(
            day(1),
            vec![batch(
                "permits",
                0,
                vec![
                    record("permits", "p-1", "45 Oak Ave", "demo permit", "2025-03-01"),
                    record("permits", "p-2", "9 Main St", "RE-ROOF", "2025-02-28"),
                ],
            )],
        )
        .await
        .unwrap();

    assert_eq!(report.summary.state, RunState::Finalized);
    assert_eq!(report.summary.history_failures, 1);
    assert_eq!(report.lead_set.len(), 1);
    assert_eq!(report.lead_set.leads()[0].lead.address.street, "45 Oak Ave");
}

struct RejectingScorer;

impl Scorer for RejectingScorer {
    fn name(&self) -> &'static str {
        "rejecting"
    }

    fn assess(
        &self,
        lead: &NormalizedLead,
        _history: Option<&HistoryEntry>,
    ) -> Result<Assessment, ScoringError> {
        if lead.project_type == ProjectType::Unknown {
            Err(ScoringError::NonFinite(f64::NAN))
        } else {
            Ok(Assessment {
                score: ConfidenceScore::clamped(70.0),
                reason: "flat 70".into(),
            })
        }
    }
}

#[tokio::test]
async fn scoring_failure_excludes_lead_and_is_reported() {
    let cfg = config();
    let pipeline = Orchestrator::new(
        RunOptions::default(),
        &cfg.sources,
        LeadNormalizer::new(&cfg.normalize, &cfg.sources).unwrap(),
        Fingerprinter::default(),
        Arc::new(InMemoryHistoryStore::new()),
        Arc::new(RejectingScorer),
    );

    let report = pipeline
        .run(
            day(1),
            vec![batch(
                "permits",
                0,
                vec![
                    record("permits", "p-1", "45 Oak Ave", "demo permit", "2025-03-01"),
                    record("permits", "p-2", "10 Lake Dr", "FEASIBILITY STUDY", "2025-03-01"),
                ],
            )],
        )
        .await
        .unwrap();

    assert_eq!(report.lead_set.len(), 1);
    assert_eq!(report.summary.scoring_failures.len(), 1);
    assert_eq!(report.summary.scoring_failures[0].score, ConfidenceScore::MIN);
    assert_eq!(report.summary.scorer, "rejecting");
}

#[tokio::test]
async fn sqlite_history_suppresses_across_process_restarts() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("history.db");
    let input = || {
        vec![batch(
            "permits",
            0,
            vec![record("permits", "p-1", "45 Oak Ave", "demo permit", "2025-03-01")],
        )]
    };

    {
        let store: Arc<dyn HistoryStore> = Arc::new(SqliteHistoryStore::open(&path, None).unwrap());
        let report = orchestrator(store).run(day(1), input()).await.unwrap();
        assert_eq!(report.summary.new_leads_emitted, 1);
    }

    let store: Arc<dyn HistoryStore> = Arc::new(SqliteHistoryStore::open(&path, None).unwrap());
    let report = orchestrator(store).run(day(2), input()).await.unwrap();
    assert!(report.lead_set.is_empty());
    assert_eq!(report.summary.previously_seen, 1);
}

#[tokio::test]
async fn exporters_write_all_formats() {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());
    let report = orchestrator(store)
        .run(
            day(1),
            vec![batch(
                "permits",
                0,
                vec![record("permits", "p-1", "45 Oak Ave, Suite 2", "demo permit", "2025-03-01")],
            )],
        )
        .await
        .unwrap();

    for exporter in all_exporters() {
        let path = exporter.export(&report, dir.path()).await.unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            format!("leads_2025-03-01.{}", exporter.format())
        );
    }

    let csv = std::fs::read_to_string(dir.path().join("leads_2025-03-01.csv")).unwrap();
    assert_eq!(csv.lines().count(), 2);
    assert!(csv.starts_with("rank,score,tier,reason"));
    assert!(csv.contains("source permits 85"));

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("leads_2025-03-01.json")).unwrap())
            .unwrap();
    assert_eq!(json["summary"]["leads_emitted"], 1);
    assert_eq!(json["lead_set"]["leads"][0]["lead"]["project_type"], "demolition");
    assert_eq!(json["lead_set"]["leads"][0]["reason"], "source permits 85");
    assert_eq!(json["summary"]["tier_counts"]["A"], 1);
    assert_eq!(json["summary"]["tier_counts"]["D"], 0);
    assert_eq!(json["summary"]["project_type_counts"]["demolition"], 1);

    let text = std::fs::read_to_string(dir.path().join("leads_2025-03-01.txt")).unwrap();
    assert!(text.contains("45 Oak Ave"));
    assert!(text.contains("normalization failures: 0"));
    assert!(text.contains("why: source permits 85"));
    assert!(text.contains("Tiers: A=1 B=0 C=0 D=0"));
}
