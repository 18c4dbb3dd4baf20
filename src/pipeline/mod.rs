// Lead pipeline stages: normalize, fingerprint, history, score, orchestrate

pub mod fingerprint;
pub mod history;
pub mod normalize;
pub mod orchestrator;
pub mod score;

pub use fingerprint::{Fingerprinter, LeadIdentity};
pub use history::{HistoryStore, InMemoryHistoryStore, SqliteHistoryStore};
pub use normalize::LeadNormalizer;
pub use orchestrator::{
    CollectedBatches, Orchestrator, RunOptions, RunReport, RunState, RunSummary, SourceBatch,
};
pub use score::{scorer_from_config, Assessment, Scorer};
