use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde_json::Value;
use tracing::{debug, info};

use crate::app::ports::CollectorPort;
use crate::domain::RawRecord;

/// Reads one source's export: a JSON array of flat objects, such as a permit
/// portal search dump saved by an external fetcher.
///
/// Scalars are stringified (`12` -> "12", `true` -> "true"), nulls are
/// dropped, and nested values are kept as compact JSON text.
pub struct JsonFileCollector {
    source_id: String,
    path: PathBuf,
}

impl JsonFileCollector {
    pub fn new(source_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            source_id: source_id.into(),
            path: path.into(),
        }
    }

    fn to_fields(object: &serde_json::Map<String, Value>) -> BTreeMap<String, String> {
        object
            .iter()
            .filter_map(|(key, value)| {
                let text = match value {
                    Value::Null => return None,
                    Value::String(s) => s.clone(),
                    Value::Bool(b) => b.to_string(),
                    Value::Number(n) => n.to_string(),
                    other => other.to_string(),
                };
                Some((key.clone(), text))
            })
            .collect()
    }
}

#[async_trait]
impl CollectorPort for JsonFileCollector {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn collect(&self, _run_date: NaiveDate) -> anyhow::Result<Vec<RawRecord>> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        let value: Value = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing {}", self.path.display()))?;

        let Value::Array(items) = value else {
            bail!("{} must contain a JSON array", self.path.display());
        };

        let retrieved_at = Utc::now();
        let mut records = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let Value::Object(object) = item else {
                debug!(source = %self.source_id, index = i, "skipping non-object entry");
                continue;
            };
            let reference = format!("file://{}#{}", self.path.display(), i);
            records.push(RawRecord::new(
                self.source_id.clone(),
                retrieved_at,
                Self::to_fields(object),
                reference,
            ));
        }

        info!(source = %self.source_id, path = %self.path.display(), records = records.len(), "read source export");
        Ok(records)
    }
}
