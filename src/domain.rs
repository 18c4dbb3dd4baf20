//! Domain data shapes shared across the pipeline stages.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One raw posting as produced by a collector run.
///
/// Immutable once created; the run that fetched it owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    source_id: String,
    retrieved_at: DateTime<Utc>,
    fields: BTreeMap<String, String>,
    reference: String,
}

impl RawRecord {
    pub fn new(
        source_id: impl Into<String>,
        retrieved_at: DateTime<Utc>,
        fields: BTreeMap<String, String>,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            retrieved_at,
            fields,
            reference: reference.into(),
        }
    }

    /// Convenience constructor used by collectors and tests
    pub fn from_pairs<K, V>(
        source_id: &str,
        retrieved_at: DateTime<Utc>,
        reference: &str,
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let fields = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::new(source_id, retrieved_at, fields, reference)
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn retrieved_at(&self) -> DateTime<Utc> {
        self.retrieved_at
    }

    /// Non-blank raw value for `key`
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .map(|v| v.as_str())
            .filter(|v| !v.trim().is_empty())
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }
}

/// Closed set of project categories a lead can fall into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectType {
    ConstructionStart,
    Renovation,
    Cleanout,
    Demolition,
    Commercial,
    Residential,
    Unknown,
}

impl ProjectType {
    pub const ALL: [ProjectType; 7] = [
        ProjectType::ConstructionStart,
        ProjectType::Renovation,
        ProjectType::Cleanout,
        ProjectType::Demolition,
        ProjectType::Commercial,
        ProjectType::Residential,
        ProjectType::Unknown,
    ];

    /// Stable identifier; part of the fingerprint input, never change it.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectType::ConstructionStart => "construction_start",
            ProjectType::Renovation => "renovation",
            ProjectType::Cleanout => "cleanout",
            ProjectType::Demolition => "demolition",
            ProjectType::Commercial => "commercial",
            ProjectType::Residential => "residential",
            ProjectType::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let wanted = value.trim().to_lowercase().replace(['-', ' '], "_");
        Self::ALL.into_iter().find(|t| t.as_str() == wanted)
    }
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadAddress {
    pub street: String,
    pub unit: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: Option<String>,
}

impl fmt::Display for LeadAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.street)?;
        if let Some(unit) = &self.unit {
            write!(f, " {}", unit)?;
        }
        if !self.city.is_empty() {
            write!(f, ", {}", self.city)?;
        }
        if !self.state.is_empty() {
            write!(f, ", {}", self.state)?;
        }
        if let Some(zip) = &self.postal_code {
            write!(f, " {}", zip)?;
        }
        Ok(())
    }
}

/// Back-link to the raw record a lead came from. Identifiers only; the raw
/// record itself is not kept alive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawReference {
    pub source_id: String,
    pub reference: String,
}

/// A lead in canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedLead {
    pub address: LeadAddress,
    pub project_type: ProjectType,
    /// Free text the project type was resolved from
    pub project_description: String,
    /// Originating source first, then any sources merged in during a run
    pub sources: Vec<String>,
    pub date_first_observed: NaiveDate,
    /// Date could not be parsed and fell back to the run date
    pub date_degraded: bool,
    pub raw_reference: RawReference,
}

impl NormalizedLead {
    /// Append `source` unless already listed
    pub fn widen_sources(&mut self, source: &str) {
        if !self.sources.iter().any(|s| s == source) {
            self.sources.push(source.to_string());
        }
    }
}

/// Stable identity token for a lead.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ledger entry for a fingerprint across runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub fingerprint: Fingerprint,
    pub first_seen: NaiveDate,
    pub last_seen: NaiveDate,
    pub sources: BTreeSet<String>,
    pub occurrences: u64,
}

impl HistoryEntry {
    pub fn first(fingerprint: Fingerprint, source: &str, observed: NaiveDate) -> Self {
        Self {
            fingerprint,
            first_seen: observed,
            last_seen: observed,
            sources: BTreeSet::from([source.to_string()]),
            occurrences: 1,
        }
    }

    /// Apply one more occurrence. Returns true when the entry was restarted
    /// because it had gone stale under `resurface_after_days`.
    pub fn observe(
        &mut self,
        source: &str,
        observed: NaiveDate,
        resurface_after_days: Option<u32>,
    ) -> bool {
        self.occurrences += 1;

        if let Some(days) = resurface_after_days {
            if (observed - self.last_seen).num_days() > i64::from(days) {
                self.first_seen = observed;
                self.last_seen = observed;
                self.sources = BTreeSet::from([source.to_string()]);
                return true;
            }
        }

        self.first_seen = self.first_seen.min(observed);
        self.last_seen = self.last_seen.max(observed);
        self.sources.insert(source.to_string());
        false
    }

    /// Days between first and last sighting
    pub fn span_days(&self) -> i64 {
        (self.last_seen - self.first_seen).num_days()
    }
}

/// Bounded 0-100 lead confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfidenceScore(u8);

impl ConfidenceScore {
    pub const MIN: ConfidenceScore = ConfidenceScore(0);
    pub const MAX: ConfidenceScore = ConfidenceScore(100);

    /// Round and clamp a raw score into range. Caller guarantees finiteness.
    pub fn clamped(raw: f64) -> Self {
        Self(raw.round().clamp(0.0, 100.0) as u8)
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    pub fn tier(&self) -> LeadTier {
        LeadTier::for_score(*self)
    }
}

impl fmt::Display for ConfidenceScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Quick-scan bucket for a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LeadTier {
    A,
    B,
    C,
    D,
}

impl LeadTier {
    pub fn for_score(score: ConfidenceScore) -> Self {
        match score.value() {
            85..=u8::MAX => LeadTier::A,
            70..=84 => LeadTier::B,
            55..=69 => LeadTier::C,
            _ => LeadTier::D,
        }
    }
}

impl fmt::Display for LeadTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LeadTier::A => "A",
            LeadTier::B => "B",
            LeadTier::C => "C",
            LeadTier::D => "D",
        };
        f.write_str(s)
    }
}

/// One row of the daily output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyLead {
    pub lead: NormalizedLead,
    pub fingerprint: Fingerprint,
    pub canonical_address: String,
    /// Unit/suite keys seen for this lead across merged records
    pub units: Vec<String>,
    pub score: ConfidenceScore,
    pub tier: LeadTier,
    /// How the score was arrived at
    pub reason: String,
    pub is_new: bool,
    pub occurrences: u64,
}

/// The ordered lead list for one run. Read-only once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyLeadSet {
    run_id: Uuid,
    run_date: NaiveDate,
    leads: Vec<DailyLead>,
}

impl DailyLeadSet {
    pub(crate) fn new(run_id: Uuid, run_date: NaiveDate, leads: Vec<DailyLead>) -> Self {
        Self {
            run_id,
            run_date,
            leads,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn run_date(&self) -> NaiveDate {
        self.run_date
    }

    pub fn leads(&self) -> &[DailyLead] {
        &self.leads
    }

    pub fn iter(&self) -> impl Iterator<Item = &DailyLead> {
        self.leads.iter()
    }

    pub fn len(&self) -> usize {
        self.leads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leads.is_empty()
    }
}
