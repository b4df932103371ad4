//! Core types for the constitution rulebook.
//!
//! These types model titles, articles and the enforcement scale used to
//! judge canonical events.
//!
//! With the `typescript` feature enabled, the enum types can be exported to
//! TypeScript using ts-rs for consistency with front-end consumers.

use serde::{Deserialize, Serialize};

#[cfg(feature = "typescript")]
use ts_rs::TS;

use crate::evaluator::Evidence;
use crate::predicate::Predicate;

/// Enforcement mode attached to an article.
///
/// Variants are declared strongest first; [`EnforcementMode::STRENGTH_ORDER`]
/// is the fixed scale the resolver scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum EnforcementMode {
    /// Halt the agent immediately
    KillSwitch,
    /// Slash staked collateral
    Slash,
    /// Isolate the agent from further actions
    Quarantine,
    /// Revert the offending transaction
    RevertTx,
    /// Throttle the agent
    RateLimit,
    /// Demand an attestation before proceeding
    RequireAttestation,
    /// Record only
    Log,
}

impl EnforcementMode {
    /// Strength scale, strongest first.
    pub const STRENGTH_ORDER: [EnforcementMode; 7] = [
        Self::KillSwitch,
        Self::Slash,
        Self::Quarantine,
        Self::RevertTx,
        Self::RateLimit,
        Self::RequireAttestation,
        Self::Log,
    ];

    /// Position on the strength scale (0 = strongest).
    pub fn strength_rank(&self) -> usize {
        Self::STRENGTH_ORDER
            .iter()
            .position(|m| m == self)
            .unwrap_or(Self::STRENGTH_ORDER.len())
    }

    /// Check if this mode is at least as strong as another.
    pub fn at_least(&self, other: &Self) -> bool {
        self.strength_rank() <= other.strength_rank()
    }

    /// Wire name of the mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KillSwitch => "kill_switch",
            Self::Slash => "slash",
            Self::Quarantine => "quarantine",
            Self::RevertTx => "revert_tx",
            Self::RateLimit => "rate_limit",
            Self::RequireAttestation => "require_attestation",
            Self::Log => "log",
        }
    }
}

impl Default for EnforcementMode {
    fn default() -> Self {
        Self::Log
    }
}

impl std::fmt::Display for EnforcementMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of evaluating one article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArticleResult {
    /// The article's predicate holds
    Pass,
    /// Hard violation
    Fail,
    /// Soft violation
    Warn,
}

impl ArticleResult {
    /// Anything other than PASS is a violation.
    pub fn is_violation(&self) -> bool {
        !matches!(self, Self::Pass)
    }
}

/// Code an article reports when its predicate does not hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationCode {
    #[default]
    Fail,
    Warn,
}

impl From<ViolationCode> for ArticleResult {
    fn from(code: ViolationCode) -> Self {
        match code {
            ViolationCode::Fail => ArticleResult::Fail,
            ViolationCode::Warn => ArticleResult::Warn,
        }
    }
}

/// Decision-level severity label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// No violations
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Severity cut points on the maximum violation precedence.
    pub const CRITICAL_AT: f64 = 95.0;
    pub const HIGH_AT: f64 = 75.0;
    pub const MEDIUM_AT: f64 = 50.0;

    /// Map a maximum precedence onto the severity scale.
    pub fn from_precedence(max_precedence: f64) -> Self {
        if max_precedence >= Self::CRITICAL_AT {
            Self::Critical
        } else if max_precedence >= Self::HIGH_AT {
            Self::High
        } else if max_precedence >= Self::MEDIUM_AT {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Event trigger declared by an article.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    /// Event types that make the article applicable
    #[serde(default)]
    pub event_types: Vec<String>,
}

/// Explicit computability flag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Computability {
    /// Whether the article can be machine-evaluated without a trigger
    #[serde(default)]
    pub computable: Option<bool>,
}

/// Enforcement directive of an article.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Enforcement {
    /// Mode on the strength scale
    #[serde(default)]
    pub mode: Option<EnforcementMode>,
    /// Concrete actions to perform when the article is violated
    #[serde(default)]
    pub actions: Vec<String>,
}

/// One rule of the constitution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    /// Unique identifier (e.g. `T07-A076`)
    pub article_id: String,
    /// Human-readable title
    #[serde(default)]
    pub title: String,
    /// Agent levels the article applies to (empty = all)
    #[serde(default)]
    pub scope: Vec<String>,
    #[serde(default)]
    pub trigger: Option<Trigger>,
    #[serde(default)]
    pub computability: Option<Computability>,
    /// Compliance condition; an absent predicate always holds
    #[serde(default, deserialize_with = "crate::predicate::optional_node")]
    pub predicate: Option<Predicate>,
    #[serde(default)]
    pub enforcement: Option<Enforcement>,
    /// Explicit precedence (0-100, higher = more authoritative)
    #[serde(default)]
    pub precedence: Option<f64>,
    /// Precedence class resolved through the parameters document
    #[serde(default)]
    pub precedence_class: Option<String>,
    /// Alignment weight (0.0-1.0)
    #[serde(default)]
    pub weight: Option<f64>,
    /// Code reported when the predicate does not hold
    #[serde(default)]
    pub on_violation: ViolationCode,
}

impl Article {
    /// Create a minimal article, mostly for tests and programmatic rulebooks.
    pub fn new(article_id: impl Into<String>) -> Self {
        Self {
            article_id: article_id.into(),
            title: String::new(),
            scope: Vec::new(),
            trigger: None,
            computability: None,
            predicate: None,
            enforcement: None,
            precedence: None,
            precedence_class: None,
            weight: None,
            on_violation: ViolationCode::Fail,
        }
    }

    /// Builder: set the predicate.
    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Builder: set the enforcement directive.
    pub fn with_enforcement(mut self, mode: EnforcementMode, actions: &[&str]) -> Self {
        self.enforcement = Some(Enforcement {
            mode: Some(mode),
            actions: actions.iter().map(|a| a.to_string()).collect(),
        });
        self
    }

    /// Builder: set the explicit precedence.
    pub fn with_precedence(mut self, precedence: f64) -> Self {
        self.precedence = Some(precedence);
        self
    }

    /// Builder: restrict to agent levels.
    pub fn with_scope(mut self, levels: &[&str]) -> Self {
        self.scope = levels.iter().map(|l| l.to_string()).collect();
        self
    }

    /// Builder: trigger on event types.
    pub fn with_trigger(mut self, event_types: &[&str]) -> Self {
        self.trigger = Some(Trigger {
            event_types: event_types.iter().map(|t| t.to_string()).collect(),
        });
        self
    }

    /// Declared mode, `log` when absent.
    pub fn enforcement_mode(&self) -> EnforcementMode {
        self.enforcement
            .as_ref()
            .and_then(|e| e.mode)
            .unwrap_or_default()
    }

    /// Declared actions, empty when absent.
    pub fn actions(&self) -> &[String] {
        self.enforcement
            .as_ref()
            .map(|e| e.actions.as_slice())
            .unwrap_or(&[])
    }
}

/// A title groups ordered articles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Title {
    #[serde(default)]
    pub title_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub articles: Vec<Article>,
}

/// Scored outcome of one article against one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub article_id: String,
    pub result: ArticleResult,
    pub precedence: f64,
    pub weight: f64,
    /// Band name from the parameters' precedence cut points
    pub severity_band: String,
    pub evidence: Evidence,
    pub enforcement_mode: EnforcementMode,
    pub actions: Vec<String>,
}

impl EvaluationResult {
    /// Check if this result counts as a violation.
    pub fn is_violation(&self) -> bool {
        self.result.is_violation()
    }
}
