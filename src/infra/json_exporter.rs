use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::write_export;
use crate::app::ports::{export_file_name, LeadExporter};
use crate::pipeline::orchestrator::RunReport;

/// The whole report (lead set plus run summary) as pretty JSON.
pub struct JsonExporter;

#[async_trait]
impl LeadExporter for JsonExporter {
    fn format(&self) -> &'static str {
        "json"
    }

    async fn export(&self, report: &RunReport, output_dir: &Path) -> anyhow::Result<PathBuf> {
        let bytes = serde_json::to_vec_pretty(report)?;
        let name = export_file_name(report.lead_set.run_date(), self.format());
        write_export(output_dir, &name, &bytes).await
    }
}
