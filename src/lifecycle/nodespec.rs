//! Node specification matching
//!
//! Node-facing operations accept a nodespec: one or more comma-separated
//! glob patterns matched against node names. A pattern without a domain part
//! also matches on the short host name, so `compute-*` selects
//! `compute-01.cluster`.

use crate::error::{Error, Result};
use glob::Pattern;

#[derive(Debug, Clone)]
pub struct NodeSpec {
    patterns: Vec<Pattern>,
}

impl NodeSpec {
    /// Parse a comma-separated list of glob patterns
    pub fn parse(spec: &str) -> Result<Self> {
        let mut patterns = Vec::new();

        for part in spec.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let pattern = Pattern::new(part).map_err(|err| {
                Error::InvalidArgument(format!("Invalid node specification [{part}]: {err}"))
            })?;
            patterns.push(pattern);
        }

        if patterns.is_empty() {
            return Err(Error::InvalidArgument(
                "Node specification must not be empty".to_string(),
            ));
        }

        Ok(Self { patterns })
    }

    pub fn matches(&self, name: &str) -> bool {
        let short = name.split('.').next().unwrap_or(name);

        self.patterns.iter().any(|pattern| {
            if pattern.matches(name) {
                return true;
            }
            // Domainless patterns also match the short host name
            !pattern.as_str().contains('.') && pattern.matches(short)
        })
    }

    /// Names from `candidates` selected by this spec
    pub fn select<'a, I>(&self, candidates: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        candidates
            .into_iter()
            .filter(|name| self.matches(name))
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_exact_name() {
        let spec = NodeSpec::parse("compute-01.cluster").unwrap();
        assert!(spec.matches("compute-01.cluster"));
        assert!(!spec.matches("compute-02.cluster"));
    }

    #[test]
    fn test_wildcard_matches_short_name() {
        let spec = NodeSpec::parse("compute-*").unwrap();
        assert!(spec.matches("compute-01.cluster"));
        assert!(spec.matches("compute-02"));
        assert!(!spec.matches("gpu-01.cluster"));
    }

    #[test]
    fn test_comma_separated_patterns() {
        let spec = NodeSpec::parse("compute-01.cluster, gpu-*").unwrap();
        let names = ["compute-01.cluster", "compute-02.cluster", "gpu-07.cluster"];
        let selected = spec.select(names.iter().copied());
        assert_eq!(selected, vec!["compute-01.cluster", "gpu-07.cluster"]);
    }

    #[test]
    fn test_domain_pattern_does_not_match_short_name() {
        let spec = NodeSpec::parse("compute-*.other").unwrap();
        assert!(!spec.matches("compute-01.cluster"));
    }

    #[test]
    fn test_empty_spec_rejected() {
        assert_matches!(NodeSpec::parse("  , "), Err(Error::InvalidArgument(_)));
        assert_matches!(NodeSpec::parse("["), Err(Error::InvalidArgument(_)));
    }
}
