//! Build-number and version filters.

use flare_core::artifact::{Artifact, HelmChart};
use flare_core::{Error, Result};
use regex::Regex;

/// Matches build numbers against literal or regex filters.
///
/// Literal filters compare for equality. Regex filters match when the
/// pattern is found anywhere in the candidate.
pub struct FilterMatcher;

impl FilterMatcher {
    pub fn new() -> Self {
        Self
    }

    pub fn matches(&self, candidate: &str, filter: &str, regex: bool) -> Result<bool> {
        if !regex {
            return Ok(candidate == filter);
        }
        Ok(compile_filter(filter)?.is_match(candidate))
    }

    /// Non-duplicate artifacts whose build number passes the filter.
    /// No filter passes every artifact.
    pub fn matching_artifacts<'a>(
        &self,
        artifacts: &'a [Artifact],
        filter: Option<&str>,
        regex: bool,
    ) -> Result<Vec<&'a Artifact>> {
        let fresh = artifacts.iter().filter(|a| !a.duplicate);
        let Some(filter) = filter.filter(|f| !f.is_empty()) else {
            return Ok(fresh.collect());
        };
        if regex {
            let pattern = compile_filter(filter)?;
            Ok(fresh.filter(|a| pattern.is_match(&a.build_no)).collect())
        } else {
            Ok(fresh.filter(|a| a.build_no == filter).collect())
        }
    }

    /// Charts whose version matches `version_regex`. No regex passes every chart.
    pub fn matching_charts<'a>(
        &self,
        charts: &'a [HelmChart],
        version_regex: Option<&str>,
    ) -> Result<Vec<&'a HelmChart>> {
        let Some(version_regex) = version_regex.filter(|r| !r.is_empty()) else {
            return Ok(charts.iter().collect());
        };
        let pattern = compile_version_regex(version_regex)?;
        Ok(charts
            .iter()
            .filter(|c| pattern.is_match(&c.version))
            .collect())
    }

    /// Save-time check of an artifact filter.
    ///
    /// Literal filters are checked in their wildcard-expanded form so that
    /// `1.*` style filters written by users still compile.
    pub fn validate(&self, filter: &str, regex: bool) -> Result<()> {
        if regex {
            compile_filter(filter).map(|_| ())
        } else {
            compile_filter(&expand_wildcards(filter)).map(|_| ())
        }
    }

    pub fn validate_version_regex(&self, version_regex: &str) -> Result<()> {
        compile_version_regex(version_regex).map(|_| ())
    }
}

impl Default for FilterMatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn compile_filter(filter: &str) -> Result<Regex> {
    Regex::new(filter).map_err(|_| Error::InvalidArtifactFilter(filter.to_string()))
}

fn compile_version_regex(version_regex: &str) -> Result<Regex> {
    Regex::new(version_regex).map_err(|_| Error::InvalidVersionRegex(version_regex.to_string()))
}

fn expand_wildcards(filter: &str) -> String {
    filter
        .replace('.', "\\.")
        .replace('?', ".?")
        .replace('*', ".*?")
}
