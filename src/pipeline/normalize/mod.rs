//! Raw record -> canonical lead.
//!
//! Normalization is a pure function of the raw record, the configuration and
//! the run date handed in by the caller. No clock reads, no I/O; the same raw
//! record always produces the same lead, which is what keeps fingerprints
//! stable from one run to the next.

pub mod address;
pub mod dates;
pub mod project_type;

use std::collections::HashMap;

use chrono::NaiveDate;
use regex::Regex;
use tracing::debug;

use crate::config::{AddressFormat, NormalizeConfig, SourceConfig};
use crate::domain::{LeadAddress, NormalizedLead, ProjectType, RawRecord, RawReference};
use crate::error::{CanonicalField, NormalizationError, NormalizationFailure, PipelineError};

use self::address::{collapse_whitespace, has_street_name, split_single_line, title_case};
use self::dates::parse_observed_date;
use self::project_type::ProjectTypeResolver;

/// Registry of per-source field mappings plus the shared normalization rules
#[derive(Debug, Clone)]
pub struct LeadNormalizer {
    sources: HashMap<String, SourceConfig>,
    resolver: ProjectTypeResolver,
    postal_code: Regex,
    date_formats: Vec<String>,
}

impl LeadNormalizer {
    pub fn new(config: &NormalizeConfig, sources: &[SourceConfig]) -> Result<Self, PipelineError> {
        let postal_code = Regex::new(&config.postal_code_pattern).map_err(|e| {
            PipelineError::Config(format!("normalize.postal_code_pattern: {}", e))
        })?;

        Ok(Self {
            sources: sources
                .iter()
                .map(|s| (s.id.clone(), s.clone()))
                .collect(),
            resolver: ProjectTypeResolver::new(&config.project_keywords),
            postal_code,
            date_formats: config.date_formats.clone(),
        })
    }

    /// Normalize one raw record observed during the run on `run_date`.
    pub fn normalize(
        &self,
        record: &RawRecord,
        run_date: NaiveDate,
    ) -> Result<NormalizedLead, NormalizationError> {
        let source = self
            .sources
            .get(record.source_id())
            .ok_or_else(|| failure(record, CanonicalField::Source, NormalizationFailure::UnknownSource))?;

        let type_text = self.project_text(record, source);
        let project_type = self.resolver.resolve(&type_text);
        let address = self.address(record, source, project_type)?;
        let (date_first_observed, date_degraded) = self.observed_date(record, source, run_date);

        debug!(
            source = record.source_id(),
            reference = record.reference(),
            retrieved_at = %record.retrieved_at(),
            project_type = %project_type,
            date_degraded,
            "normalized record"
        );

        Ok(NormalizedLead {
            address,
            project_type,
            project_description: type_text,
            sources: vec![record.source_id().to_string()],
            date_first_observed,
            date_degraded,
            raw_reference: RawReference {
                source_id: record.source_id().to_string(),
                reference: record.reference().to_string(),
            },
        })
    }

    fn project_text(&self, record: &RawRecord, source: &SourceConfig) -> String {
        [&source.fields.project_type, &source.fields.description]
            .into_iter()
            .flatten()
            .filter_map(|key| record.field(key))
            .map(collapse_whitespace)
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn address(
        &self,
        record: &RawRecord,
        source: &SourceConfig,
        project_type: ProjectType,
    ) -> Result<LeadAddress, NormalizationError> {
        let mapped = |key: &Option<String>| {
            key.as_deref()
                .and_then(|k| record.field(k))
                .map(collapse_whitespace)
        };

        let (street, mut city, mut state, mut postal) = match source.address_format {
            AddressFormat::Split => (
                mapped(&source.fields.street),
                mapped(&source.fields.city),
                mapped(&source.fields.state),
                mapped(&source.fields.postal_code),
            ),
            AddressFormat::SingleLine => {
                let line = mapped(&source.fields.address_line).ok_or_else(|| {
                    failure(record, CanonicalField::AddressLine, NormalizationFailure::Missing)
                })?;
                let parts = split_single_line(&line);
                (
                    Some(parts.street).filter(|s| !s.is_empty()),
                    parts.city,
                    parts.state,
                    parts.postal_code,
                )
            }
        };

        // Explicitly mapped fields beat whatever the line splitter found
        if source.address_format == AddressFormat::SingleLine {
            city = mapped(&source.fields.city).or(city);
            state = mapped(&source.fields.state).or(state);
            postal = mapped(&source.fields.postal_code).or(postal);
        }

        let street = street
            .ok_or_else(|| failure(record, CanonicalField::Street, NormalizationFailure::Missing))?;
        if !has_street_name(&street) {
            return Err(failure(
                record,
                CanonicalField::Street,
                NormalizationFailure::Unparseable(format!("no street name in '{}'", street)),
            ));
        }

        let city = city
            .or_else(|| source.default_city.clone())
            .map(|c| title_case(&c))
            .unwrap_or_default();
        let state = state
            .or_else(|| source.default_state.clone())
            .map(|s| s.trim().to_uppercase())
            .unwrap_or_default();

        if project_type != ProjectType::Unknown {
            if city.is_empty() {
                return Err(failure(record, CanonicalField::City, NormalizationFailure::Missing));
            }
            if state.is_empty() {
                return Err(failure(record, CanonicalField::State, NormalizationFailure::Missing));
            }
        }

        let postal_code = postal
            .map(|p| p.trim().to_string())
            .filter(|p| self.postal_code.is_match(p));

        Ok(LeadAddress {
            street: title_case(&street),
            unit: mapped(&source.fields.unit).map(|u| title_case(&u)),
            city,
            state,
            postal_code,
        })
    }

    /// Parsed posting date, or the run date flagged as degraded. Never later
    /// than the run date.
    fn observed_date(
        &self,
        record: &RawRecord,
        source: &SourceConfig,
        run_date: NaiveDate,
    ) -> (NaiveDate, bool) {
        let parsed = source
            .fields
            .observed_date
            .as_deref()
            .and_then(|k| record.field(k))
            .and_then(|raw| parse_observed_date(raw, &source.date_formats, &self.date_formats));

        match parsed {
            Some(date) if date > run_date => {
                debug!(
                    reference = record.reference(),
                    %date,
                    %run_date,
                    "observed date in the future, clamping to run date"
                );
                (run_date, false)
            }
            Some(date) => (date, false),
            None => (run_date, true),
        }
    }
}

fn failure(
    record: &RawRecord,
    field: CanonicalField,
    reason: NormalizationFailure,
) -> NormalizationError {
    NormalizationError {
        source_id: record.source_id().to_string(),
        reference: record.reference().to_string(),
        field,
        reason,
    }
}
