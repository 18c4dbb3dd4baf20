// Adapters for the app ports: source readers and lead set writers

pub mod csv_exporter;
pub mod json_exporter;
pub mod json_file_collector;
pub mod text_exporter;

use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::info;

use crate::app::ports::LeadExporter;

pub use csv_exporter::CsvExporter;
pub use json_exporter::JsonExporter;
pub use json_file_collector::JsonFileCollector;
pub use text_exporter::TextExporter;

/// Every exporter, in the order the CLI writes them
pub fn all_exporters() -> Vec<Box<dyn LeadExporter>> {
    vec![
        Box::new(CsvExporter),
        Box::new(JsonExporter),
        Box::new(TextExporter),
    ]
}

pub(crate) async fn write_export(output_dir: &Path, name: &str, bytes: &[u8]) -> anyhow::Result<PathBuf> {
    tokio::fs::create_dir_all(output_dir)
        .await
        .with_context(|| format!("creating {}", output_dir.display()))?;
    let path = output_dir.join(name);
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), bytes = bytes.len(), "export written");
    Ok(path)
}
