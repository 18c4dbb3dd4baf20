//! Lead identity.
//!
//! Sources spell the same address many ways ("123 Main St", "123 MAIN
//! STREET", "123 Main St. Suite 4"). The fingerprint is a SHA-256 over a
//! canonical address plus the project type, so spelling differences collapse
//! while a demolition and a later renovation at one address stay distinct.

use chrono::Datelike;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::FingerprintConfig;
use crate::domain::{Fingerprint, NormalizedLead};

/// Tokens that introduce a unit/suite number
const UNIT_DESIGNATORS: &[&str] = &[
    "apt", "apartment", "unit", "ste", "suite", "rm", "room", "fl", "floor", "bldg",
    "building", "lot", "#",
];

/// USPS-style abbreviations for suffixes and directionals
const ABBREVIATIONS: &[(&str, &str)] = &[
    ("street", "st"),
    ("avenue", "ave"),
    ("av", "ave"),
    ("road", "rd"),
    ("drive", "dr"),
    ("boulevard", "blvd"),
    ("lane", "ln"),
    ("court", "ct"),
    ("place", "pl"),
    ("parkway", "pkwy"),
    ("highway", "hwy"),
    ("circle", "cir"),
    ("terrace", "ter"),
    ("trail", "trl"),
    ("square", "sq"),
    ("extension", "ext"),
    ("crossing", "xing"),
    ("north", "n"),
    ("south", "s"),
    ("east", "e"),
    ("west", "w"),
    ("northeast", "ne"),
    ("northwest", "nw"),
    ("southeast", "se"),
    ("southwest", "sw"),
];

/// Everything the pipeline needs to know about a lead's identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeadIdentity {
    pub fingerprint: Fingerprint,
    /// Primary match key: canonical street, city and state
    pub canonical_address: String,
    /// Secondary disambiguation key, e.g. "suite 200"
    pub unit_key: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Fingerprinter {
    config: FingerprintConfig,
}

impl Fingerprinter {
    pub fn new(config: FingerprintConfig) -> Self {
        Self { config }
    }

    pub fn fingerprint(&self, lead: &NormalizedLead) -> Fingerprint {
        self.identify(lead).fingerprint
    }

    pub fn identify(&self, lead: &NormalizedLead) -> LeadIdentity {
        let (street, street_unit) = canonical_street(&lead.address.street);
        let unit_key = lead
            .address
            .unit
            .as_deref()
            .and_then(canonical_unit)
            .or(street_unit);

        let canonical_address = format!(
            "{}|{}|{}",
            street,
            canonical_words(&lead.address.city).join(" "),
            canonical_words(&lead.address.state).join(" ")
        );

        let mut material = format!("{}|{}", canonical_address, lead.project_type.as_str());
        if let Some(days) = self.config.time_bucket_days.filter(|d| *d > 0) {
            let bucket = lead.date_first_observed.num_days_from_ce() / days as i32;
            material.push_str(&format!("|b{}", bucket));
        }

        let mut hasher = Sha256::new();
        hasher.update(material.as_bytes());
        let fingerprint = Fingerprint::from_hex(hex::encode(hasher.finalize()));

        LeadIdentity {
            fingerprint,
            canonical_address,
            unit_key,
        }
    }
}

/// Lowercase, punctuation stripped, '#' kept as its own token
fn canonical_words(value: &str) -> Vec<String> {
    value
        .to_lowercase()
        .replace('#', " # ")
        .split(|c: char| !(c.is_alphanumeric() || c == '#'))
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn abbreviate(word: &str) -> &str {
    ABBREVIATIONS
        .iter()
        .find(|(long, _)| *long == word)
        .map(|(_, short)| *short)
        .unwrap_or(word)
}

fn designator(word: &str) -> Option<&'static str> {
    let word = match word {
        "apartment" => "apt",
        "suite" => "ste",
        "room" => "rm",
        "floor" => "fl",
        "building" => "bldg",
        other => other,
    };
    UNIT_DESIGNATORS.iter().copied().find(|d| *d == word)
}

/// Canonical street with unit designators removed, and the unit key if any
fn canonical_street(street: &str) -> (String, Option<String>) {
    let words = canonical_words(street);
    let mut kept = Vec::with_capacity(words.len());
    let mut units = Vec::new();

    let mut iter = words.iter().peekable();
    while let Some(word) = iter.next() {
        if let Some(d) = designator(word) {
            // "Suite 200" -> "ste 200"; a trailing designator is just noise
            if let Some(id) = iter.next() {
                units.push(format!("{} {}", d, id));
            }
            continue;
        }
        kept.push(abbreviate(word).to_string());
    }

    let unit = (!units.is_empty()).then(|| units.join(" "));
    (kept.join(" "), unit)
}

fn canonical_unit(unit: &str) -> Option<String> {
    let words = canonical_words(unit);
    match words.as_slice() {
        [] => None,
        [only] => Some(format!("# {}", only)),
        [first, rest @ ..] => {
            let head = designator(first).unwrap_or(first.as_str());
            Some(format!("{} {}", head, rest.join(" ")))
        }
    }
}
