//! Confidence scoring.
//!
//! Two policies are available: `weighted` starts from source reliability,
//! `project_type` starts from a per-type base taken from permit triage. Both
//! add the same corroboration bonus from the lead's history.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{LowValueRule, ScoringConfig, ScoringPolicy};
use crate::domain::{ConfidenceScore, HistoryEntry, NormalizedLead, ProjectType};
use crate::error::ScoringError;
use crate::pipeline::normalize::project_type::{contains_run, words};

/// A score together with the adjustments that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub score: ConfidenceScore,
    /// e.g. "source permits 85; degraded date -10; 2 corroborating sources +12"
    pub reason: String,
}

pub trait Scorer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Score a lead and explain the result. `history` is the entry after this
    /// run's occurrences were recorded, or `None` when scoring without history.
    fn assess(
        &self,
        lead: &NormalizedLead,
        history: Option<&HistoryEntry>,
    ) -> Result<Assessment, ScoringError>;

    fn score(
        &self,
        lead: &NormalizedLead,
        history: Option<&HistoryEntry>,
    ) -> Result<ConfidenceScore, ScoringError> {
        self.assess(lead, history).map(|a| a.score)
    }
}

pub fn scorer_from_config(
    config: &ScoringConfig,
    source_reliability: BTreeMap<String, f64>,
) -> Arc<dyn Scorer> {
    match config.policy {
        ScoringPolicy::Weighted => Arc::new(WeightedScorer::new(config.clone(), source_reliability)),
        ScoringPolicy::ProjectType => Arc::new(ProjectTypeScorer::new(config.clone())),
    }
}

fn weight(name: &str, value: f64) -> Result<f64, ScoringError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(ScoringError::InvalidWeight {
            name: name.to_string(),
            value,
        })
    }
}

/// Running total plus the reason for each step
struct Breakdown {
    raw: f64,
    parts: Vec<String>,
}

impl Breakdown {
    fn start(raw: f64, why: String) -> Self {
        Self {
            raw,
            parts: vec![format!("{} {}", why, raw)],
        }
    }

    fn adjust(&mut self, delta: f64, why: &str) {
        if delta != 0.0 {
            self.raw += delta;
            self.parts.push(format!("{} {:+}", why, delta));
        }
    }

    fn finish(self) -> Result<Assessment, ScoringError> {
        if !self.raw.is_finite() {
            return Err(ScoringError::NonFinite(self.raw));
        }
        Ok(Assessment {
            score: ConfidenceScore::clamped(self.raw),
            reason: self.parts.join("; "),
        })
    }
}

/// Number of distinct sources that saw the lead within the corroboration
/// window. An entry spread wider than the window counts as a single source.
pub fn corroborating_sources(config: &ScoringConfig, history: Option<&HistoryEntry>) -> usize {
    match history {
        Some(entry) if entry.span_days() <= config.corroboration_window_days => {
            entry.sources.len().max(1)
        }
        _ => 1,
    }
}

/// Degraded-date penalty and corroboration bonus, shared by both policies
fn adjust_common(
    config: &ScoringConfig,
    lead: &NormalizedLead,
    history: Option<&HistoryEntry>,
    breakdown: &mut Breakdown,
) -> Result<(), ScoringError> {
    let penalty = weight("degraded_date_penalty", config.degraded_date_penalty)?;
    if lead.date_degraded {
        breakdown.adjust(-penalty, "degraded date");
    }

    let per_source = weight("corroboration_bonus", config.corroboration_bonus)?;
    let cap = weight("max_corroboration_bonus", config.max_corroboration_bonus)?;
    let n = corroborating_sources(config, history);
    let bonus = (per_source * n.saturating_sub(1) as f64).min(cap);
    breakdown.adjust(bonus, &format!("{} corroborating sources", n));
    Ok(())
}

/// Low-value permit wording, compiled to word runs once
struct LowValueRules {
    rules: Vec<(Vec<String>, LowValueRule)>,
}

impl LowValueRules {
    fn new(rules: &[LowValueRule]) -> Self {
        let rules = rules
            .iter()
            .map(|r| (words(&r.keyword), r.clone()))
            .filter(|(w, _)| !w.is_empty())
            .collect();
        Self { rules }
    }

    /// Only leads the keyword table could not place are considered
    fn matching(&self, lead: &NormalizedLead) -> Option<&LowValueRule> {
        if lead.project_type != ProjectType::Unknown {
            return None;
        }
        let haystack = words(&lead.project_description);
        self.rules
            .iter()
            .find(|(needle, _)| contains_run(&haystack, needle))
            .map(|(_, rule)| rule)
    }
}

pub struct WeightedScorer {
    config: ScoringConfig,
    reliability: BTreeMap<String, f64>,
    low_value: LowValueRules,
}

impl WeightedScorer {
    pub fn new(config: ScoringConfig, reliability: BTreeMap<String, f64>) -> Self {
        let low_value = LowValueRules::new(&config.low_value_keywords);
        Self {
            config,
            reliability,
            low_value,
        }
    }

    /// Highest reliability among the lead's sources, and which source it was
    fn source_weight(&self, lead: &NormalizedLead) -> Result<(f64, String), ScoringError> {
        let default = weight("default_reliability", self.config.default_reliability)?;
        let mut best: Option<(f64, &str)> = None;
        for source in &lead.sources {
            let value = match self.reliability.get(source) {
                Some(r) => weight(source, *r)?,
                None => default,
            };
            if best.map_or(true, |(b, _)| value > b) {
                best = Some((value, source.as_str()));
            }
        }
        Ok(match best {
            Some((value, source)) => (value, format!("source {}", source)),
            None => (default, "default reliability".to_string()),
        })
    }
}

impl Scorer for WeightedScorer {
    fn name(&self) -> &'static str {
        "weighted"
    }

    fn assess(
        &self,
        lead: &NormalizedLead,
        history: Option<&HistoryEntry>,
    ) -> Result<Assessment, ScoringError> {
        let (reliability, why) = self.source_weight(lead)?;
        let mut breakdown = match self.low_value.matching(lead) {
            // A trusted source does not make a low-value permit worth more
            Some(rule) => Breakdown::start(
                reliability.min(weight(&rule.keyword, rule.score)?),
                format!("low-value '{}'", rule.keyword),
            ),
            None => {
                let mut b = Breakdown::start(reliability, why);
                if lead.project_type == ProjectType::Unknown {
                    let penalty = weight("unknown_type_penalty", self.config.unknown_type_penalty)?;
                    b.adjust(-penalty, "unknown project type");
                }
                b
            }
        };
        adjust_common(&self.config, lead, history, &mut breakdown)?;
        breakdown.finish()
    }
}

pub struct ProjectTypeScorer {
    config: ScoringConfig,
    low_value: LowValueRules,
}

impl ProjectTypeScorer {
    pub fn new(config: ScoringConfig) -> Self {
        let low_value = LowValueRules::new(&config.low_value_keywords);
        Self { config, low_value }
    }

    fn base(&self, lead: &NormalizedLead) -> Result<Breakdown, ScoringError> {
        if let Some(rule) = self.low_value.matching(lead) {
            let score = weight(&rule.keyword, rule.score)?;
            return Ok(Breakdown::start(score, format!("low-value '{}'", rule.keyword)));
        }
        let project_type = lead.project_type;
        let base = match self.config.project_type_base.get(project_type.as_str()) {
            Some(value) => weight(project_type.as_str(), *value)?,
            // Types missing from the table fall back to the source default
            None => weight("default_reliability", self.config.default_reliability)?,
        };
        Ok(Breakdown::start(base, project_type.as_str().to_string()))
    }
}

impl Scorer for ProjectTypeScorer {
    fn name(&self) -> &'static str {
        "project_type"
    }

    fn assess(
        &self,
        lead: &NormalizedLead,
        history: Option<&HistoryEntry>,
    ) -> Result<Assessment, ScoringError> {
        let mut breakdown = self.base(lead)?;
        adjust_common(&self.config, lead, history, &mut breakdown)?;
        breakdown.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Fingerprint, LeadAddress, LeadTier, RawReference};
    use chrono::NaiveDate;
    use std::collections::BTreeSet;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    fn lead(project_type: ProjectType, source: &str) -> NormalizedLead {
        NormalizedLead {
            address: LeadAddress {
                street: "45 Oak Ave".into(),
                unit: None,
                city: "Greenville".into(),
                state: "SC".into(),
                postal_code: None,
            },
            project_type,
            project_description: String::new(),
            sources: vec![source.to_string()],
            date_first_observed: day(1),
            date_degraded: false,
            raw_reference: RawReference {
                source_id: source.into(),
                reference: "r1".into(),
            },
        }
    }

    fn entry(sources: &[&str], first: u32, last: u32) -> HistoryEntry {
        HistoryEntry {
            fingerprint: Fingerprint::from_hex("aa"),
            first_seen: day(first),
            last_seen: day(last),
            sources: sources.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            occurrences: sources.len() as u64,
        }
    }

    fn reliability() -> BTreeMap<String, f64> {
        BTreeMap::from([("permits".to_string(), 80.0), ("classifieds".to_string(), 50.0)])
    }

    #[test]
    fn weighted_uses_best_source_reliability() {
        let scorer = WeightedScorer::new(ScoringConfig::default(), reliability());
        let mut l = lead(ProjectType::Demolition, "classifieds");
        assert_eq!(scorer.score(&l, None).unwrap().value(), 50);
        l.widen_sources("permits");
        assert_eq!(scorer.score(&l, None).unwrap().value(), 80);
        // Unlisted source falls back to the default
        let l = lead(ProjectType::Demolition, "zoning");
        assert_eq!(scorer.score(&l, None).unwrap().value(), 60);
    }

    #[test]
    fn unknown_type_and_degraded_date_are_penalized() {
        let scorer = WeightedScorer::new(ScoringConfig::default(), reliability());
        let mut l = lead(ProjectType::Unknown, "permits");
        assert_eq!(scorer.score(&l, None).unwrap().value(), 55);
        l.date_degraded = true;
        assert_eq!(scorer.score(&l, None).unwrap().value(), 45);
    }

    #[test]
    fn corroboration_is_monotonic_and_capped() {
        let scorer = WeightedScorer::new(ScoringConfig::default(), reliability());
        let l = lead(ProjectType::Renovation, "classifieds");

        let mut previous = scorer.score(&l, None).unwrap();
        let all = ["a", "b", "c", "d", "e", "f"];
        for n in 1..=all.len() {
            let current = scorer.score(&l, Some(&entry(&all[..n], 1, 3))).unwrap();
            assert!(current >= previous, "score dropped at {} sources", n);
            previous = current;
        }
        // 50 + min(12 * 5, 30)
        assert_eq!(previous.value(), 80);
    }

    #[test]
    fn sightings_outside_window_do_not_corroborate() {
        let config = ScoringConfig::default();
        assert_eq!(corroborating_sources(&config, Some(&entry(&["a", "b"], 1, 10))), 2);
        assert_eq!(corroborating_sources(&config, Some(&entry(&["a", "b"], 1, 28))), 1);
        assert_eq!(corroborating_sources(&config, None), 1);
    }

    #[test]
    fn project_type_policy_matches_permit_tiers() {
        let scorer = ProjectTypeScorer::new(ScoringConfig::default());
        let demo = scorer.score(&lead(ProjectType::Demolition, "permits"), None).unwrap();
        let reno = scorer.score(&lead(ProjectType::Renovation, "permits"), None).unwrap();
        let unknown = scorer.score(&lead(ProjectType::Unknown, "permits"), None).unwrap();
        assert_eq!(demo.tier(), LeadTier::A);
        assert_eq!(reno.tier(), LeadTier::C);
        assert_eq!(unknown.tier(), LeadTier::D);
    }

    #[test]
    fn low_value_permits_score_below_unknown() {
        let scorer = ProjectTypeScorer::new(ScoringConfig::default());
        let mut l = lead(ProjectType::Unknown, "permits");
        l.project_description = "FEASIBILITY STUDY".into();
        let assessment = scorer.assess(&l, None).unwrap();
        assert_eq!(assessment.score.value(), 10);
        assert_eq!(assessment.reason, "low-value 'feasibility' 10");

        l.project_description = "STANDALONE ELECTRICAL".into();
        assert_eq!(scorer.score(&l, None).unwrap().value(), 25);

        l.project_description = "SIGN".into();
        assert_eq!(scorer.score(&l, None).unwrap().value(), 40);

        // A typed lead is never downgraded by the low-value table
        let mut demo = lead(ProjectType::Demolition, "permits");
        demo.project_description = "STANDALONE DEMOLITION".into();
        assert_eq!(scorer.score(&demo, None).unwrap().value(), 98);
    }

    #[test]
    fn weighted_caps_low_value_at_rule_score() {
        let scorer = WeightedScorer::new(ScoringConfig::default(), reliability());
        let mut l = lead(ProjectType::Unknown, "permits");
        l.project_description = "Feasibility review".into();
        assert_eq!(scorer.score(&l, None).unwrap().value(), 10);
    }

    #[test]
    fn reason_lists_each_adjustment() {
        let scorer = WeightedScorer::new(ScoringConfig::default(), reliability());
        let mut l = lead(ProjectType::Unknown, "classifieds");
        l.widen_sources("permits");
        l.date_degraded = true;
        let assessment = scorer
            .assess(&l, Some(&entry(&["permits", "classifieds"], 1, 3)))
            .unwrap();
        assert_eq!(assessment.score.value(), 57);
        assert_eq!(
            assessment.reason,
            "source permits 80; unknown project type -25; degraded date -10; 2 corroborating sources +12"
        );

        let scorer = ProjectTypeScorer::new(ScoringConfig::default());
        let assessment = scorer.assess(&lead(ProjectType::Demolition, "permits"), None).unwrap();
        assert_eq!(assessment.reason, "demolition 98");
    }

    #[test]
    fn invalid_weights_are_errors() {
        let config = ScoringConfig {
            corroboration_bonus: -1.0,
            ..ScoringConfig::default()
        };
        let scorer = WeightedScorer::new(config, reliability());
        let err = scorer.score(&lead(ProjectType::Demolition, "permits"), None).unwrap_err();
        assert!(matches!(err, ScoringError::InvalidWeight { ref name, .. } if name == "corroboration_bonus"));

        let scorer = WeightedScorer::new(
            ScoringConfig::default(),
            BTreeMap::from([("permits".to_string(), f64::NAN)]),
        );
        assert!(scorer.score(&lead(ProjectType::Demolition, "permits"), None).is_err());
    }

    #[test]
    fn policy_selection_follows_config() {
        let config = ScoringConfig {
            policy: ScoringPolicy::ProjectType,
            ..ScoringConfig::default()
        };
        assert_eq!(scorer_from_config(&config, reliability()).name(), "project_type");
        assert_eq!(
            scorer_from_config(&ScoringConfig::default(), reliability()).name(),
            "weighted"
        );
    }
}
