use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::domain::RawRecord;
use crate::pipeline::orchestrator::RunReport;

/// A source of raw records. How records are fetched (portal export, feed,
/// crawl) is the adapter's concern; the pipeline only sees the batch.
#[async_trait]
pub trait CollectorPort: Send + Sync {
    fn source_id(&self) -> &str;

    async fn collect(&self, run_date: NaiveDate) -> anyhow::Result<Vec<RawRecord>>;
}

/// Writes a finished run somewhere a human or downstream tool can read it.
#[async_trait]
pub trait LeadExporter: Send + Sync {
    /// Short format name, also used as the file extension
    fn format(&self) -> &'static str;

    /// Write the report into `output_dir`, returning the file written
    async fn export(&self, report: &RunReport, output_dir: &Path) -> anyhow::Result<PathBuf>;
}

/// `leads_<date>.<ext>`
pub fn export_file_name(run_date: NaiveDate, extension: &str) -> String {
    format!("leads_{}.{}", run_date.format("%Y-%m-%d"), extension)
}
