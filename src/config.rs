use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::domain::ProjectType;
use crate::error::{PipelineError, Result};

/// Top-level pipeline configuration, loaded from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pipeline: RunConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub fingerprint: FingerprintConfig,
    #[serde(default)]
    pub normalize: NormalizeConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Blocking worker tasks per stage
    pub workers: usize,
    /// Emit leads already seen in earlier runs too (flagged `is_new = false`)
    pub include_previously_seen: bool,
    /// Collector deadline; a source that overruns is treated as failed
    pub collector_timeout_secs: Option<u64>,
    pub output_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            include_previously_seen: false,
            collector_timeout_secs: Some(120),
            output_dir: PathBuf::from(constants::DEFAULT_OUTPUT_DIR),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub path: PathBuf,
    /// Unset means a fingerprint is suppressed forever once seen
    pub resurface_after_days: Option<u32>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(constants::DEFAULT_HISTORY_PATH),
            resurface_after_days: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    /// Fold a coarse time bucket of this many days into the fingerprint
    pub time_bucket_days: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordRule {
    pub keyword: String,
    pub project_type: ProjectType,
}

impl KeywordRule {
    fn new(keyword: &str, project_type: ProjectType) -> Self {
        Self {
            keyword: keyword.to_string(),
            project_type,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    pub postal_code_pattern: String,
    /// Tried after each source's own formats
    pub date_formats: Vec<String>,
    /// Ordered; the first matching keyword decides the project type
    pub project_keywords: Vec<KeywordRule>,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        use ProjectType::*;

        let project_keywords = vec![
            KeywordRule::new("demolition", Demolition),
            KeywordRule::new("demo", Demolition),
            KeywordRule::new("teardown", Demolition),
            KeywordRule::new("tear down", Demolition),
            KeywordRule::new("raze", Demolition),
            KeywordRule::new("cleanout", Cleanout),
            KeywordRule::new("clean out", Cleanout),
            KeywordRule::new("estate sale", Cleanout),
            KeywordRule::new("junk removal", Cleanout),
            KeywordRule::new("hoarder", Cleanout),
            KeywordRule::new("new construction", ConstructionStart),
            KeywordRule::new("new build", ConstructionStart),
            KeywordRule::new("addition", ConstructionStart),
            KeywordRule::new("accessory structure", ConstructionStart),
            KeywordRule::new("swimming pool", ConstructionStart),
            KeywordRule::new("groundbreaking", ConstructionStart),
            KeywordRule::new("upfit", Commercial),
            KeywordRule::new("tenant improvement", Commercial),
            KeywordRule::new("commercial", Commercial),
            KeywordRule::new("renovation", Renovation),
            KeywordRule::new("remodel", Renovation),
            KeywordRule::new("alteration", Renovation),
            KeywordRule::new("alter", Renovation),
            KeywordRule::new("reroof", Renovation),
            KeywordRule::new("re roof", Renovation),
            KeywordRule::new("roofing", Renovation),
            KeywordRule::new("kitchen", Renovation),
            KeywordRule::new("residential", Residential),
            KeywordRule::new("single family", Residential),
            KeywordRule::new("manufactured home", Residential),
        ];

        Self {
            postal_code_pattern: constants::US_POSTAL_CODE_PATTERN.to_string(),
            date_formats: constants::DEFAULT_DATE_FORMATS
                .iter()
                .map(|f| f.to_string())
                .collect(),
            project_keywords,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringPolicy {
    #[default]
    Weighted,
    ProjectType,
}

/// Permit wording that marks a lead as rarely needing a dumpster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LowValueRule {
    pub keyword: String,
    /// Base score used instead of the policy's usual starting point
    pub score: f64,
}

impl LowValueRule {
    fn new(keyword: &str, score: f64) -> Self {
        Self {
            keyword: keyword.to_string(),
            score,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub policy: ScoringPolicy,
    pub default_reliability: f64,
    pub unknown_type_penalty: f64,
    pub degraded_date_penalty: f64,
    pub corroboration_bonus: f64,
    pub max_corroboration_bonus: f64,
    pub corroboration_window_days: i64,
    /// Base score per project type (keyed by `ProjectType::as_str`) for the
    /// `project_type` policy
    pub project_type_base: BTreeMap<String, f64>,
    /// Checked in order against leads of unknown type; the first whole-word
    /// match sets the base score
    pub low_value_keywords: Vec<LowValueRule>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let project_type_base = [
            (ProjectType::Demolition, 98.0),
            (ProjectType::ConstructionStart, 92.0),
            (ProjectType::Commercial, 86.0),
            (ProjectType::Cleanout, 80.0),
            (ProjectType::Renovation, 66.0),
            (ProjectType::Residential, 60.0),
            (ProjectType::Unknown, 40.0),
        ]
        .into_iter()
        .map(|(t, base)| (t.as_str().to_string(), base))
        .collect();

        Self {
            policy: ScoringPolicy::Weighted,
            default_reliability: 60.0,
            unknown_type_penalty: 25.0,
            degraded_date_penalty: 10.0,
            corroboration_bonus: 12.0,
            max_corroboration_bonus: 30.0,
            corroboration_window_days: 14,
            project_type_base,
            low_value_keywords: vec![
                LowValueRule::new("feasibility", 10.0),
                LowValueRule::new("standalone", 25.0),
                LowValueRule::new("standal", 25.0),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressFormat {
    /// Street, city, state and postal code arrive in separate raw fields
    #[default]
    Split,
    /// One line such as "45 Oak Ave, Greenville, SC 29601"
    SingleLine,
}

/// Canonical field -> raw key mapping for one source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldMapping {
    pub street: Option<String>,
    pub unit: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub address_line: Option<String>,
    pub project_type: Option<String>,
    pub description: Option<String>,
    pub observed_date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    /// Lower runs first when resolving same-run duplicates
    #[serde(default)]
    pub priority: u32,
    /// Legal/policy switch; disallowed sources are never collected
    #[serde(default = "default_allowed")]
    pub allowed: bool,
    /// 0-100 weight used by the scorer
    pub reliability: Option<f64>,
    /// File the JSON collector reads for this source
    pub input: Option<PathBuf>,
    #[serde(default)]
    pub address_format: AddressFormat,
    pub default_city: Option<String>,
    pub default_state: Option<String>,
    #[serde(default)]
    pub date_formats: Vec<String>,
    #[serde(default)]
    pub fields: FieldMapping,
}

fn default_allowed() -> bool {
    true
}

impl SourceConfig {
    /// Source with conventional raw key names (`street`, `city`, ...)
    pub fn with_defaults(id: &str) -> Self {
        Self {
            id: id.to_string(),
            priority: 0,
            allowed: true,
            reliability: None,
            input: None,
            address_format: AddressFormat::Split,
            default_city: None,
            default_state: None,
            date_formats: Vec::new(),
            fields: FieldMapping {
                street: Some("street".into()),
                unit: Some("unit".into()),
                city: Some("city".into()),
                state: Some("state".into()),
                postal_code: Some("postal_code".into()),
                address_line: Some("address".into()),
                project_type: Some("type".into()),
                description: Some("description".into()),
                observed_date: Some("date".into()),
            },
        }
    }
}

impl Config {
    /// Resolve the config path: explicit flag, then env var, then the default
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        std::env::var(constants::CONFIG_PATH_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(constants::DEFAULT_CONFIG_PATH))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline.workers == 0 {
            return Err(PipelineError::Config(
                "pipeline.workers must be at least 1".into(),
            ));
        }

        Regex::new(&self.normalize.postal_code_pattern).map_err(|e| {
            PipelineError::Config(format!("normalize.postal_code_pattern: {}", e))
        })?;

        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.id.trim().is_empty() {
                return Err(PipelineError::Config("source id must not be empty".into()));
            }
            if !seen.insert(source.id.as_str()) {
                return Err(PipelineError::Config(format!(
                    "duplicate source id '{}'",
                    source.id
                )));
            }
            if let Some(r) = source.reliability {
                if !(0.0..=100.0).contains(&r) {
                    return Err(PipelineError::Config(format!(
                        "source '{}' reliability {} outside 0-100",
                        source.id, r
                    )));
                }
            }
        }

        let s = &self.scoring;
        for (name, value) in [
            ("default_reliability", s.default_reliability),
            ("unknown_type_penalty", s.unknown_type_penalty),
            ("degraded_date_penalty", s.degraded_date_penalty),
            ("corroboration_bonus", s.corroboration_bonus),
            ("max_corroboration_bonus", s.max_corroboration_bonus),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(PipelineError::Config(format!(
                    "scoring.{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }
        for key in s.project_type_base.keys() {
            if ProjectType::parse(key).is_none() {
                return Err(PipelineError::Config(format!(
                    "scoring.project_type_base: unknown project type '{}'",
                    key
                )));
            }
        }
        for rule in &s.low_value_keywords {
            if rule.keyword.trim().is_empty() || !(0.0..=100.0).contains(&rule.score) {
                return Err(PipelineError::Config(format!(
                    "scoring.low_value_keywords: '{}' needs a keyword and a score in 0-100",
                    rule.keyword
                )));
            }
        }

        Ok(())
    }

    pub fn source(&self, id: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.id == id)
    }

    /// Scorer reliability table built from the source list
    pub fn source_reliability(&self) -> BTreeMap<String, f64> {
        self.sources
            .iter()
            .filter_map(|s| s.reliability.map(|r| (s.id.clone(), r)))
            .collect()
    }
}
