//! Decisions: the engine's verdict on one canonical event.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use constitution::{AlignmentOutcome, EnforcementOutcome, EvaluationResult};

use crate::state::{Restrictions, SpendDaily, TransitionSummary};

/// Overall verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    /// No applicable article was violated
    Pass,
    /// At least one violation; the enforcement directive applies
    Enforce,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Enforce => "ENFORCE",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Post-transition snapshot of the agent attached to a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionState {
    pub restrictions: Restrictions,
    pub consecutive_fails: u64,
    pub spend_daily: SpendDaily,
    pub prev_audit_hash: Option<String>,
    pub last_audit_hash: Option<String>,
}

impl From<&TransitionSummary> for DecisionState {
    fn from(summary: &TransitionSummary) -> Self {
        Self {
            restrictions: summary.restrictions.clone(),
            consecutive_fails: summary.consecutive_fails,
            spend_daily: summary.spend_daily.clone(),
            prev_audit_hash: summary.prev_audit_hash.clone(),
            last_audit_hash: summary.last_audit_hash.clone(),
        }
    }
}

/// The engine's judgement of one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Fresh identifier per decision
    pub decision_id: String,
    pub event_id: String,
    pub verdict: Verdict,
    /// Ids of the violated articles, in evaluation order
    pub applied_articles: Vec<String>,
    pub results: Vec<EvaluationResult>,
    pub enforcement: EnforcementOutcome,
    pub alignment: AlignmentOutcome,
    /// Content hash of the audit bundle; `None` until the bundle is written
    pub audit_hash: Option<String>,
    /// Agent snapshot; `None` until the transition is applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<DecisionState>,
}

impl Decision {
    /// Build a decision from scored results. Audit hash and state are left pending.
    pub fn new(
        event_id: impl Into<String>,
        results: Vec<EvaluationResult>,
        enforcement: EnforcementOutcome,
        alignment: AlignmentOutcome,
    ) -> Self {
        let applied_articles: Vec<String> = results
            .iter()
            .filter(|r| r.is_violation())
            .map(|r| r.article_id.clone())
            .collect();

        let verdict = if applied_articles.is_empty() {
            Verdict::Pass
        } else {
            Verdict::Enforce
        };

        Self {
            decision_id: uuid::Uuid::new_v4().to_string(),
            event_id: event_id.into(),
            verdict,
            applied_articles,
            results,
            enforcement,
            alignment,
            audit_hash: None,
            state: None,
        }
    }

    /// Check if the decision passed.
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    /// Results that are not PASS.
    pub fn violations(&self) -> impl Iterator<Item = &EvaluationResult> {
        self.results.iter().filter(|r| r.is_violation())
    }

    /// Fold an applied transition into the decision.
    pub fn merge_transition(&mut self, summary: &TransitionSummary) {
        self.alignment = summary.alignment;
        self.state = Some(DecisionState::from(summary));
    }
}

/// Result of [`crate::ConstitutionalAlignmentEngine::evaluate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub decision: Decision,
    /// Where the audit bundle was written
    pub audit_file: PathBuf,
}
