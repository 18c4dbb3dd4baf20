//! Defaults and well-known names shared across the crate.

pub const CONFIG_PATH_ENV: &str = "LEAD_PIPELINE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/leads.toml";
pub const DEFAULT_HISTORY_PATH: &str = "data/lead_history.db";
pub const DEFAULT_OUTPUT_DIR: &str = "output";
pub const DEFAULT_LOG_DIR: &str = "logs";

/// US ZIP or ZIP+4
pub const US_POSTAL_CODE_PATTERN: &str = r"^\d{5}(-\d{4})?$";

/// Fallback date formats, tried in order after a source's own hints.
/// `MM/DD/YYYY` comes first among the slash formats because county permit
/// portals use it for issue dates.
pub const DEFAULT_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%m-%d-%Y",
    "%m/%d/%y",
    "%Y/%m/%d",
    "%B %d, %Y",
    "%b %d, %Y",
    "%b. %d, %Y",
];

/// Datetime formats tried when no date-only format matches
pub const DEFAULT_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
    "%m/%d/%Y %H:%M",
];
