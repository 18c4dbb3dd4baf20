use crate::config::KeywordRule;
use crate::domain::ProjectType;

/// Resolves free-text project descriptions to the closed project type set.
///
/// Keywords match on whole words, case-insensitively, in table order; the
/// first hit wins. "demo permit" matches `demo`, "demonstration" does not.
#[derive(Debug, Clone)]
pub struct ProjectTypeResolver {
    rules: Vec<(Vec<String>, ProjectType)>,
}

impl ProjectTypeResolver {
    pub fn new(rules: &[KeywordRule]) -> Self {
        let rules = rules
            .iter()
            .map(|r| (words(&r.keyword), r.project_type))
            .filter(|(w, _)| !w.is_empty())
            .collect();
        Self { rules }
    }

    pub fn resolve(&self, text: &str) -> ProjectType {
        let haystack = words(text);
        if haystack.is_empty() {
            return ProjectType::Unknown;
        }
        self.rules
            .iter()
            .find(|(needle, _)| contains_run(&haystack, needle))
            .map(|(_, t)| *t)
            .unwrap_or(ProjectType::Unknown)
    }
}

pub(crate) fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

pub(crate) fn contains_run(haystack: &[String], needle: &[String]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NormalizeConfig;

    fn resolver() -> ProjectTypeResolver {
        ProjectTypeResolver::new(&NormalizeConfig::default().project_keywords)
    }

    #[test]
    fn resolves_demolition_variants() {
        let r = resolver();
        assert_eq!(r.resolve("demo permit"), ProjectType::Demolition);
        assert_eq!(r.resolve("Demolition job"), ProjectType::Demolition);
        assert_eq!(r.resolve("RESIDENTIAL DEMOLITION"), ProjectType::Demolition);
    }

    #[test]
    fn resolves_permit_portal_types() {
        let r = resolver();
        assert_eq!(r.resolve("COMMERCIAL INTERIOR UPFIT"), ProjectType::Commercial);
        assert_eq!(r.resolve("RESIDENTIAL NEW CONSTRUCTION"), ProjectType::ConstructionStart);
        assert_eq!(r.resolve("RE-ROOF"), ProjectType::Renovation);
        assert_eq!(r.resolve("Estate sale + clean out"), ProjectType::Cleanout);
    }

    #[test]
    fn whole_words_only() {
        let r = resolver();
        assert_eq!(r.resolve("demonstration garden"), ProjectType::Unknown);
    }

    #[test]
    fn unmatched_or_empty_is_unknown() {
        let r = resolver();
        assert_eq!(r.resolve("FEASIBILITY STUDY"), ProjectType::Unknown);
        assert_eq!(r.resolve(""), ProjectType::Unknown);
    }
}
