//! Enforcement resolution across violated articles.
//!
//! When several articles are violated by one event, their enforcement modes
//! are reduced to one decision-level directive according to the fixed
//! strength scale, with a kill-switch override for critical failures.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::types::{ArticleResult, EnforcementMode, EvaluationResult, Severity};

/// Decision-level enforcement directive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnforcementOutcome {
    pub mode: EnforcementMode,
    pub severity: Severity,
    pub actions: Vec<String>,
}

impl EnforcementOutcome {
    /// Directive for an event with no violations.
    pub fn none() -> Self {
        Self {
            mode: EnforcementMode::Log,
            severity: Severity::Info,
            actions: Vec::new(),
        }
    }
}

/// Resolves the enforcement directive for a set of results.
pub struct EnforcementResolver {
    /// Minimum precedence at which a failing kill-switch article overrides the scan
    supersede_precedence: f64,
}

impl EnforcementResolver {
    /// Create a resolver with the standard supersede threshold (95).
    pub fn new() -> Self {
        Self {
            supersede_precedence: Severity::CRITICAL_AT,
        }
    }

    /// Create a resolver with a custom supersede threshold.
    pub fn with_supersede_precedence(supersede_precedence: f64) -> Self {
        Self {
            supersede_precedence,
        }
    }

    /// Resolve the directive. PASS results are ignored.
    pub fn resolve(&self, results: &[EvaluationResult]) -> EnforcementOutcome {
        let violations: Vec<&EvaluationResult> =
            results.iter().filter(|r| r.is_violation()).collect();

        if violations.is_empty() {
            return EnforcementOutcome::none();
        }

        let mode = if self.kill_switch_supersedes(&violations) {
            EnforcementMode::KillSwitch
        } else {
            strongest_mode(violations.iter().map(|v| v.enforcement_mode))
        };

        let mut actions: Vec<String> = Vec::new();
        for action in violations
            .iter()
            .filter(|v| v.enforcement_mode == mode)
            .flat_map(|v| v.actions.iter())
        {
            if !actions.contains(action) {
                actions.push(action.clone());
            }
        }

        // across all violations, not only the mode-matching ones
        let max_precedence = violations
            .iter()
            .map(|v| v.precedence)
            .fold(f64::NEG_INFINITY, f64::max);

        let outcome = EnforcementOutcome {
            mode,
            severity: Severity::from_precedence(max_precedence),
            actions,
        };

        tracing::debug!(
            violations = violations.len(),
            mode = %outcome.mode,
            severity = ?outcome.severity,
            "Enforcement resolved"
        );

        outcome
    }

    fn kill_switch_supersedes(&self, violations: &[&EvaluationResult]) -> bool {
        violations.iter().any(|v| {
            v.enforcement_mode == EnforcementMode::KillSwitch
                && v.result == ArticleResult::Fail
                && v.precedence >= self.supersede_precedence
        })
    }
}

impl Default for EnforcementResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// First mode of the strength scale present among `modes`; `log` if none.
pub fn strongest_mode(modes: impl IntoIterator<Item = EnforcementMode>) -> EnforcementMode {
    let present: HashSet<EnforcementMode> = modes.into_iter().collect();
    EnforcementMode::STRENGTH_ORDER
        .into_iter()
        .find(|m| present.contains(m))
        .unwrap_or(EnforcementMode::Log)
}
