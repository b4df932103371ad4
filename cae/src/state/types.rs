//! Persistent agent records, the registry and transition log entries.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use constitution::{clamp, AlignmentOutcome, AlignmentThresholds};

use crate::decision::Verdict;

/// Registry format version.
pub const STATE_VERSION: &str = "1.0.0";

/// Band assigned to agents that have not been classified.
pub const DEFAULT_BAND: &str = "nominal";

/// Restriction flags derived from the alignment score.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restrictions {
    pub warning: bool,
    pub restricted: bool,
    pub quarantine: bool,
    pub ban: bool,
    /// Names of the set flags, always in the order warning, restricted, quarantine, ban
    pub active: Vec<String>,
}

impl Restrictions {
    /// Build from explicit flags.
    pub fn from_flags(warning: bool, restricted: bool, quarantine: bool, ban: bool) -> Self {
        let active = [
            ("warning", warning),
            ("restricted", restricted),
            ("quarantine", quarantine),
            ("ban", ban),
        ]
        .into_iter()
        .filter(|(_, set)| *set)
        .map(|(name, _)| name.to_string())
        .collect();

        Self {
            warning,
            restricted,
            quarantine,
            ban,
            active,
        }
    }

    /// A flag is set iff its threshold is finite and `score <= threshold`.
    pub fn from_thresholds(score: f64, thresholds: &AlignmentThresholds) -> Self {
        let at_or_below = |threshold: Option<f64>| {
            threshold
                .filter(|t| t.is_finite())
                .map(|t| score <= t)
                .unwrap_or(false)
        };

        Self::from_flags(
            at_or_below(thresholds.warning),
            at_or_below(thresholds.restricted),
            at_or_below(thresholds.quarantine),
            at_or_below(thresholds.ban),
        )
    }

    /// Recompute `active` from the flags.
    pub fn normalized(&self) -> Self {
        Self::from_flags(self.warning, self.restricted, self.quarantine, self.ban)
    }
}

/// Per-UTC-day spend accumulator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpendDaily {
    pub day_utc: Option<NaiveDate>,
    pub total: f64,
    pub count: u64,
    pub limit: Option<f64>,
}

impl SpendDaily {
    /// Roll over to `day` if needed, then accumulate `amount`.
    ///
    /// `limit` replaces the stored limit only when one is given.
    pub fn record(&mut self, day: NaiveDate, amount: Option<f64>, limit: Option<f64>) {
        if self.day_utc != Some(day) {
            self.day_utc = Some(day);
            self.total = 0.0;
            self.count = 0;
        }

        if let Some(amount) = amount.filter(|a| a.is_finite()) {
            self.total += amount;
            self.count += 1;
        }

        if let Some(limit) = limit {
            self.limit = Some(limit);
        }
    }

    /// Check if today's total exceeds the limit.
    pub fn over_limit(&self) -> bool {
        self.limit.map(|l| self.total > l).unwrap_or(false)
    }
}

/// Counters kept per agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Counters {
    pub spend_daily: SpendDaily,
}

/// Audit chain pointers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditChain {
    pub prev_audit_hash: Option<String>,
    pub last_audit_hash: Option<String>,
}

/// How an agent may sign transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignMode {
    AllowlistOnly,
    Deny,
    /// Unrecognized modes are treated as `any`
    #[default]
    #[serde(other)]
    Any,
}

impl SignMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::AllowlistOnly => "allowlist_only",
            Self::Deny => "deny",
        }
    }

    /// Whether signing is allowed given the transaction's allowlist status.
    pub fn permits(&self, allowlisted: bool) -> bool {
        match self {
            Self::Any => true,
            Self::AllowlistOnly => allowlisted,
            Self::Deny => false,
        }
    }
}

/// Agent capabilities.
///
/// Keys other than the sign modes are carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sign_mode: Option<SignMode>,
    /// Sign mode scoped to A2/A3 agents, consulted when `sign_mode` is unset
    #[serde(
        rename = "sign_mode_A2A3",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sign_mode_a2a3: Option<SignMode>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Capabilities {
    /// Effective sign mode: `sign_mode`, then `sign_mode_A2A3`, then `any`.
    pub fn sign_mode(&self) -> SignMode {
        self.sign_mode
            .or(self.sign_mode_a2a3)
            .unwrap_or_default()
    }

    /// Overlay another set of capabilities; keys it leaves unset are kept.
    pub fn merge(&mut self, other: Capabilities) {
        if other.sign_mode.is_some() {
            self.sign_mode = other.sign_mode;
        }
        if other.sign_mode_a2a3.is_some() {
            self.sign_mode_a2a3 = other.sign_mode_a2a3;
        }
        self.extra.extend(other.extra);
    }
}

/// Persistent trust record of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub agent_id: String,
    /// Always within [0, 1]
    pub alignment_score: f64,
    pub consecutive_fails: u64,
    pub restrictions: Restrictions,
    pub counters: Counters,
    pub audit: AuditChain,
    /// Level last reported for this agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_level: Option<String>,
    #[serde(default = "default_band")]
    pub band: String,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default)]
    pub last_event_id: Option<String>,
    #[serde(default)]
    pub last_decision_id: Option<String>,
    #[serde(default)]
    pub last_verdict: Option<Verdict>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_band() -> String {
    DEFAULT_BAND.to_string()
}

impl AgentState {
    /// Fresh record: full trust, no restrictions, empty counters.
    pub fn new(agent_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            agent_id: agent_id.into(),
            alignment_score: 1.0,
            consecutive_fails: 0,
            restrictions: Restrictions::default(),
            counters: Counters::default(),
            audit: AuditChain::default(),
            agent_level: None,
            band: default_band(),
            capabilities: Capabilities::default(),
            last_event_id: None,
            last_decision_id: None,
            last_verdict: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Stored score clamped to [0, 1]; non-finite counts as full trust.
    pub fn score(&self) -> f64 {
        if self.alignment_score.is_finite() {
            clamp(self.alignment_score, 0.0, 1.0)
        } else {
            1.0
        }
    }

    /// Apply a patch over this record.
    pub fn apply_patch(&mut self, patch: AgentPatch) {
        if let Some(score) = patch.alignment_score {
            self.alignment_score = if score.is_finite() {
                clamp(score, 0.0, 1.0)
            } else {
                1.0
            };
        }
        if let Some(level) = patch.agent_level {
            self.agent_level = Some(level);
        }
        if let Some(band) = patch.band {
            self.band = band;
        }
        if let Some(capabilities) = patch.capabilities {
            self.capabilities.merge(capabilities);
        }
        if let Some(restrictions) = patch.restrictions {
            self.restrictions = restrictions.normalized();
        }
    }
}

/// Fields an upsert may set; `None` leaves the stored value alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentPatch {
    #[serde(default)]
    pub alignment_score: Option<f64>,
    #[serde(default)]
    pub agent_level: Option<String>,
    #[serde(default)]
    pub band: Option<String>,
    #[serde(default)]
    pub capabilities: Option<Capabilities>,
    #[serde(default)]
    pub restrictions: Option<Restrictions>,
}

impl AgentPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.alignment_score = Some(score);
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.agent_level = Some(level.into());
        self
    }

    pub fn with_band(mut self, band: impl Into<String>) -> Self {
        self.band = Some(band.into());
        self
    }

    pub fn with_sign_mode(mut self, sign_mode: SignMode) -> Self {
        self.capabilities = Some(Capabilities {
            sign_mode: Some(sign_mode),
            ..Capabilities::default()
        });
        self
    }

    pub fn with_restrictions(mut self, restrictions: Restrictions) -> Self {
        self.restrictions = Some(restrictions);
        self
    }
}

/// The durable registry document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryState {
    pub version: String,
    pub updated_at: DateTime<Utc>,
    pub agents: BTreeMap<String, AgentState>,
}

impl Default for RegistryState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            updated_at: Utc::now(),
            agents: BTreeMap::new(),
        }
    }
}

/// One line of the transition log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionLogEntry {
    pub ts: DateTime<Utc>,
    pub event_id: String,
    pub decision_id: String,
    pub agent_id: String,
    pub verdict: Verdict,
    pub score_before: f64,
    pub score_delta: f64,
    pub score_after: f64,
    pub restrictions_active: Vec<String>,
    pub consecutive_fails: u64,
    pub spend_daily: SpendDaily,
    pub prev_audit_hash: Option<String>,
    pub audit_hash: Option<String>,
}

/// What [`super::AgentStateStore::apply_decision`] returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionSummary {
    pub agent_id: String,
    pub alignment: AlignmentOutcome,
    pub restrictions: Restrictions,
    pub consecutive_fails: u64,
    pub spend_daily: SpendDaily,
    pub prev_audit_hash: Option<String>,
    pub last_audit_hash: Option<String>,
}

/// Where an agent's audit chain first breaks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBreak {
    /// Position among the agent's log entries
    pub index: usize,
    pub event_id: String,
    pub expected_prev: Option<String>,
    pub found_prev: Option<String>,
}

/// Result of walking one agent's audit chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReport {
    pub agent_id: String,
    pub entries: usize,
    pub broken_at: Option<ChainBreak>,
}

impl ChainReport {
    pub fn is_intact(&self) -> bool {
        self.broken_at.is_none()
    }
}

/// Walk entries in log order and find the first broken link.
///
/// The first entry may point at any predecessor, since the log can start
/// after the agent's record was seeded. Every later entry must point at its
/// predecessor's `audit_hash`.
pub fn verify_entries<'a>(
    agent_id: &str,
    entries: impl IntoIterator<Item = &'a TransitionLogEntry>,
) -> ChainReport {
    let mut count = 0;
    let mut previous: Option<&TransitionLogEntry> = None;
    let mut broken_at = None;

    for entry in entries.into_iter().filter(|e| e.agent_id == agent_id) {
        if broken_at.is_none() {
            if let Some(prev) = previous {
                if entry.prev_audit_hash != prev.audit_hash {
                    broken_at = Some(ChainBreak {
                        index: count,
                        event_id: entry.event_id.clone(),
                        expected_prev: prev.audit_hash.clone(),
                        found_prev: entry.prev_audit_hash.clone(),
                    });
                }
            }
        }
        previous = Some(entry);
        count += 1;
    }

    ChainReport {
        agent_id: agent_id.to_string(),
        entries: count,
        broken_at,
    }
}
