use once_cell::sync::Lazy;
use regex::Regex;

/// "SC 29601", "Greenville SC 29601", "SC"
static STATE_ZIP_TAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(?P<city>.*?)\s+)?(?P<state>[A-Za-z]{2})(?:\s+(?P<zip>\d{5}(?:-\d{4})?))?$")
        .expect("state/zip pattern is valid")
});

/// A segment holding nothing but a ZIP, as in "..., SC, 29601"
static BARE_ZIP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{5}(?:-\d{4})?$").expect("zip pattern is valid"));

/// Trailing " SC 29601" on an address with no commas at all
static INLINE_STATE_ZIP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<rest>.*\S)\s+(?P<state>[A-Za-z]{2})\s+(?P<zip>\d{5}(?:-\d{4})?)$")
        .expect("inline state/zip pattern is valid")
});

const COMPASS: &[&str] = &["n", "s", "e", "w", "ne", "nw", "se", "sw"];

/// Components recovered from a one-line address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressParts {
    pub street: String,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
}

/// Trim and collapse internal whitespace runs to a single space
pub fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Display casing for street and city names.
pub fn title_case(value: &str) -> String {
    collapse_whitespace(value)
        .split(' ')
        .map(title_case_word)
        .collect::<Vec<_>>()
        .join(" ")
}

fn title_case_word(word: &str) -> String {
    let lower = word.to_lowercase();
    if COMPASS.contains(&lower.trim_end_matches('.')) {
        return lower.to_uppercase();
    }
    if lower.chars().any(|c| c.is_ascii_digit()) {
        return lower;
    }
    lower
        .split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join("-")
}

/// Split "45 Oak Ave, Greenville, SC 29601" into its parts.
///
/// Anything that cannot be placed stays in the street.
pub fn split_single_line(line: &str) -> AddressParts {
    let parts: Vec<String> = line
        .split(',')
        .map(collapse_whitespace)
        .filter(|p| !p.is_empty())
        .collect();

    let mut out = AddressParts::default();
    match parts.as_slice() {
        [] => {}
        [only] => {
            if let Some(caps) = INLINE_STATE_ZIP.captures(only) {
                out.street = caps["rest"].to_string();
                out.state = Some(caps["state"].to_string());
                out.postal_code = Some(caps["zip"].to_string());
            } else {
                out.street = only.clone();
            }
        }
        [street, rest @ ..] => {
            out.street = street.clone();
            let mut rest: Vec<&String> = rest.iter().collect();

            if rest.last().is_some_and(|tail| BARE_ZIP.is_match(tail)) {
                out.postal_code = rest.pop().cloned();
            }

            let mut tail_city = None;
            if let Some(caps) = rest
                .last()
                .copied()
                .and_then(|tail| STATE_ZIP_TAIL.captures(tail))
            {
                out.state = Some(caps["state"].to_string());
                if let Some(zip) = caps.name("zip") {
                    out.postal_code = Some(zip.as_str().to_string());
                }
                tail_city = caps
                    .name("city")
                    .map(|m| m.as_str().to_string())
                    .filter(|c| !c.is_empty());
                rest.pop();
            }

            // Whatever is left between the street and the state is the city
            let middle_city = (!rest.is_empty()).then(|| {
                rest.iter()
                    .map(|p| p.as_str())
                    .collect::<Vec<_>>()
                    .join(" ")
            });
            out.city = middle_city.or(tail_city);
        }
    }
    out
}

/// At least one word with a letter in it; "123" or "--" is not an address
pub fn has_street_name(street: &str) -> bool {
    street
        .split_whitespace()
        .any(|w| w.chars().any(|c| c.is_alphabetic()))
}
