//! The parameters document: thresholds, bands and templates.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::document::read_document;
use crate::error::{ConstitutionError, Result};

/// Immutable tuning parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    /// Ordered cut points mapping precedence to a band name
    #[serde(default)]
    pub precedence_bands: Vec<PrecedenceBand>,
    /// Default precedence per article class
    #[serde(default)]
    pub precedence_classes: BTreeMap<String, f64>,
    /// Precedence of articles with neither explicit value nor known class
    #[serde(default = "default_precedence")]
    pub default_precedence: f64,
    #[serde(default)]
    pub alignment_score_thresholds: AlignmentThresholds,
    /// Per agent level limits
    #[serde(default)]
    pub agent_limit_templates: BTreeMap<String, AgentLimitTemplate>,
    /// Default quorum per governance body
    #[serde(default)]
    pub quorum_defaults: BTreeMap<String, f64>,
    #[serde(default)]
    pub alignment_scoring: AlignmentScoring,
}

fn default_precedence() -> f64 {
    50.0
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            precedence_bands: Vec::new(),
            precedence_classes: BTreeMap::new(),
            default_precedence: default_precedence(),
            alignment_score_thresholds: AlignmentThresholds::default(),
            agent_limit_templates: BTreeMap::new(),
            quorum_defaults: BTreeMap::new(),
            alignment_scoring: AlignmentScoring::default(),
        }
    }
}

/// One precedence cut point: precedences at or above `min` fall in `band`
/// unless a higher cut point also matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrecedenceBand {
    pub band: String,
    pub min: f64,
}

/// Score thresholds; a restriction is active when `score <= threshold`.
///
/// An absent threshold never activates its restriction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlignmentThresholds {
    #[serde(default)]
    pub warning: Option<f64>,
    #[serde(default)]
    pub restricted: Option<f64>,
    #[serde(default)]
    pub quarantine: Option<f64>,
    #[serde(default)]
    pub ban: Option<f64>,
}

/// Limits applied to every agent of one level.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentLimitTemplate {
    #[serde(default)]
    pub daily_limit: Option<f64>,
}

/// Penalty curve for the alignment scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentScoring {
    /// Base penalty of a FAIL at full weight and precedence 100
    #[serde(default = "default_fail_penalty")]
    pub fail_penalty: f64,
    /// Base penalty of a WARN at full weight and precedence 100
    #[serde(default = "default_warn_penalty")]
    pub warn_penalty: f64,
    /// Cap on the total penalty of one decision
    #[serde(default = "default_max_penalty")]
    pub max_penalty: f64,
}

fn default_fail_penalty() -> f64 {
    0.1
}

fn default_warn_penalty() -> f64 {
    0.05
}

fn default_max_penalty() -> f64 {
    0.5
}

impl Default for AlignmentScoring {
    fn default() -> Self {
        Self {
            fail_penalty: default_fail_penalty(),
            warn_penalty: default_warn_penalty(),
            max_penalty: default_max_penalty(),
        }
    }
}

impl Parameters {
    /// Parse a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let params: Self = serde_json::from_str(json).map_err(|e| ConstitutionError::Parse {
            path: "<inline>".into(),
            message: e.to_string(),
        })?;
        params.validate()?;
        Ok(params)
    }

    /// Load from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let params: Self = read_document(path.as_ref())?;
        params.validate()?;
        Ok(params)
    }

    /// Load from a file, falling back to defaults when it does not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Parameters file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Daily spend limit for an agent level, if a template declares one.
    pub fn daily_limit(&self, agent_level: &str) -> Option<f64> {
        self.agent_limit_templates
            .get(agent_level)
            .and_then(|t| t.daily_limit)
            .filter(|l| l.is_finite())
    }

    /// Default quorum for a governance body.
    pub fn quorum_default(&self, body: &str) -> f64 {
        self.quorum_defaults.get(body).copied().unwrap_or(0.0)
    }

    fn validate(&self) -> Result<()> {
        if !self.default_precedence.is_finite() {
            return Err(ConstitutionError::InvalidParameters(
                "default_precedence must be finite".to_string(),
            ));
        }

        for band in &self.precedence_bands {
            if !band.min.is_finite() {
                return Err(ConstitutionError::InvalidParameters(format!(
                    "precedence band '{}' has a non-finite cut point",
                    band.band
                )));
            }
        }

        let scoring = &self.alignment_scoring;
        for (name, value) in [
            ("fail_penalty", scoring.fail_penalty),
            ("warn_penalty", scoring.warn_penalty),
            ("max_penalty", scoring.max_penalty),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConstitutionError::InvalidParameters(format!(
                    "alignment_scoring.{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_document() {
        let params = Parameters::from_json("{}").unwrap();
        assert_eq!(params, Parameters::default());
        assert_eq!(params.default_precedence, 50.0);
        assert!(params.alignment_score_thresholds.warning.is_none());
    }

    #[test]
    fn test_full_document() {
        let params = Parameters::from_json(
            r#"{
                "precedence_bands": [
                    { "band": "constitutional", "min": 90 },
                    { "band": "statutory", "min": 60 }
                ],
                "precedence_classes": { "treasury": 80 },
                "alignment_score_thresholds": {
                    "warning": 0.8, "restricted": 0.6, "quarantine": 0.4, "ban": 0.2
                },
                "agent_limit_templates": { "A2": { "daily_limit": 1000 } },
                "quorum_defaults": { "RMZ": 3, "Tonalli": 5 }
            }"#,
        )
        .unwrap();

        assert_eq!(params.precedence_bands.len(), 2);
        assert_eq!(params.daily_limit("A2"), Some(1000.0));
        assert_eq!(params.daily_limit("A3"), None);
        assert_eq!(params.quorum_default("Tonalli"), 5.0);
        assert_eq!(params.quorum_default("unknown"), 0.0);
        assert_eq!(params.alignment_score_thresholds.ban, Some(0.2));
    }

    #[test]
    fn test_out_of_range_penalty_rejected() {
        let err = Parameters::from_json(r#"{ "alignment_scoring": { "max_penalty": 2 } }"#)
            .unwrap_err();
        assert!(matches!(err, ConstitutionError::InvalidParameters(_)));
    }

    #[test]
    fn test_missing_file_falls_back() {
        let params = Parameters::load_or_default("/nonexistent/parameters.json").unwrap();
        assert_eq!(params, Parameters::default());
    }
}
