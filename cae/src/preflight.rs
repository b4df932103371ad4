//! Transaction-sign preflight.
//!
//! Turns a sign request into a canonical event, judges it, and combines the
//! verdict with the agent's signing capability into ALLOW or DENY.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use constitution::EnforcementMode;

use crate::decision::Decision;
use crate::engine::ConstitutionalAlignmentEngine;
use crate::error::{CaeError, Result};
use crate::event::{Actor, CanonicalEvent};
use crate::state::{AgentPatch, AgentState, Capabilities, Restrictions, DEFAULT_BAND};

/// Event type of a sign request.
pub const SIGN_REQUEST_EVENT: &str = "tx.sign_request";

/// Reported when only the capability check denied signing.
pub const CAPABILITY_GATE_ARTICLE: &str = "CAPABILITY_GATING/TX_SIGN";

const DEFAULT_LEVEL: &str = "A0";

/// Incoming sign request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignRequest {
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub context: Value,
    #[serde(default)]
    pub proofs: Value,
}

impl SignRequest {
    pub fn new(agent_id: impl Into<String>, context: Value) -> Self {
        Self {
            agent_id: agent_id.into(),
            event_type: SIGN_REQUEST_EVENT.to_string(),
            context,
            proofs: Value::Object(Map::new()),
        }
    }
}

/// Preflight outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PreflightVerdict {
    Allow,
    Deny,
}

/// User-facing notice attached to a denial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenyNotice {
    pub title: String,
    pub message: String,
    pub enforcement_mode: EnforcementMode,
}

/// Pointer to the head of an agent's audit chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditChainView {
    pub last_audit_hash: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignmentView {
    pub score: f64,
}

/// Public view of an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentView {
    pub agent_id: String,
    pub band: String,
    pub alignment: AlignmentView,
    pub capabilities: Capabilities,
    pub restrictions: Restrictions,
    pub audit_chain: AuditChainView,
}

impl From<&AgentState> for AgentView {
    fn from(agent: &AgentState) -> Self {
        Self {
            agent_id: agent.agent_id.clone(),
            band: agent.band.clone(),
            alignment: AlignmentView {
                score: agent.score(),
            },
            capabilities: agent.capabilities.clone(),
            restrictions: agent.restrictions.clone(),
            audit_chain: AuditChainView {
                last_audit_hash: agent.audit.last_audit_hash.clone(),
            },
        }
    }
}

/// Agent snapshot returned with a preflight response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreflightAgentState {
    pub agent_id: String,
    pub alignment_score: f64,
    pub band: String,
    pub capabilities: Capabilities,
    pub restrictions: Restrictions,
    pub consecutive_fails: u64,
    pub audit_chain: AuditChainView,
}

/// Preflight response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreflightResponse {
    pub verdict: PreflightVerdict,
    pub reason: Option<String>,
    pub ui: Option<DenyNotice>,
    pub audit_hash: Option<String>,
    pub relevant_articles: Vec<String>,
    pub agent_state: PreflightAgentState,
}

impl PreflightResponse {
    pub fn allowed(&self) -> bool {
        self.verdict == PreflightVerdict::Allow
    }
}

/// Sign preflight over a shared engine.
pub struct SignPreflight {
    engine: Arc<ConstitutionalAlignmentEngine>,
}

impl SignPreflight {
    pub fn new(engine: Arc<ConstitutionalAlignmentEngine>) -> Self {
        Self { engine }
    }

    /// Judge a sign request.
    pub async fn check(&self, request: &SignRequest) -> Result<PreflightResponse> {
        let agent_id = request.agent_id.trim();
        if agent_id.is_empty() {
            return Err(CaeError::InvalidRequest("agent_id is required".to_string()));
        }
        if request.event_type != SIGN_REQUEST_EVENT {
            return Err(CaeError::InvalidRequest(format!(
                "event_type must be \"{SIGN_REQUEST_EVENT}\""
            )));
        }

        let current = self.ensure_default_agent(agent_id).await?;
        let event = build_sign_event(agent_id, request, &current);
        let allowlisted = event
            .context
            .pointer("/transaction/allowlisted")
            .map(truthy)
            .unwrap_or(false);

        let decision = self.engine.evaluate(&event).await?.decision;

        let agent = self
            .engine
            .store()
            .get_agent(agent_id)
            .await?
            .unwrap_or(current);

        let policy_passed = decision.passed();
        let capability_allows = agent.capabilities.sign_mode().permits(allowlisted);
        let allowed = policy_passed && capability_allows;

        let reason = if policy_passed {
            format!(
                "Agent capabilities block signing (sign_mode={})",
                agent.capabilities.sign_mode().as_str()
            )
        } else {
            format!(
                "Constitutional policy enforcement ({})",
                decision.enforcement.mode
            )
        };

        tracing::info!(
            agent_id = %agent_id,
            event_id = %event.event_id,
            policy_passed,
            capability_allows,
            "Sign preflight"
        );

        Ok(PreflightResponse {
            verdict: if allowed {
                PreflightVerdict::Allow
            } else {
                PreflightVerdict::Deny
            },
            ui: (!allowed).then(|| DenyNotice {
                title: "Signing blocked by CAE".to_string(),
                message: reason.clone(),
                enforcement_mode: decision.enforcement.mode,
            }),
            reason: (!allowed).then_some(reason),
            audit_hash: decision
                .audit_hash
                .clone()
                .or_else(|| agent.audit.last_audit_hash.clone()),
            relevant_articles: relevant_articles(&decision, capability_allows),
            agent_state: PreflightAgentState {
                agent_id: agent_id.to_string(),
                alignment_score: agent.score(),
                band: agent.band.clone(),
                capabilities: agent.capabilities.clone(),
                restrictions: agent.restrictions.clone(),
                consecutive_fails: agent.consecutive_fails,
                audit_chain: AuditChainView {
                    last_audit_hash: agent
                        .audit
                        .last_audit_hash
                        .clone()
                        .or_else(|| decision.audit_hash.clone()),
                },
            },
        })
    }

    /// Public view of an agent, creating the default record if absent.
    pub async fn agent_view(&self, agent_id: &str) -> Result<AgentView> {
        let agent_id = agent_id.trim();
        if agent_id.is_empty() {
            return Err(CaeError::InvalidRequest("agent_id is required".to_string()));
        }
        let agent = self.ensure_default_agent(agent_id).await?;
        Ok(AgentView::from(&agent))
    }

    async fn ensure_default_agent(&self, agent_id: &str) -> Result<AgentState> {
        let store = self.engine.store();
        if let Some(existing) = store.get_agent(agent_id).await? {
            return Ok(existing);
        }

        let patch = AgentPatch::new()
            .with_score(1.0)
            .with_band(DEFAULT_BAND)
            .with_restrictions(Restrictions::default());
        Ok(store.upsert_agent(agent_id, patch).await?)
    }
}

/// Articles worth showing for a decision.
///
/// Violated articles first; on a policy denial the applied articles too; on
/// a capability-only denial a marker so the list is never empty.
fn relevant_articles(decision: &Decision, capability_allows: bool) -> Vec<String> {
    let mut relevant: Vec<String> = Vec::new();
    let mut push = |id: &String| {
        if !id.is_empty() && !relevant.contains(id) {
            relevant.push(id.clone());
        }
    };

    for result in decision.violations() {
        push(&result.article_id);
    }
    if !decision.passed() {
        for id in &decision.applied_articles {
            push(id);
        }
    }

    if decision.passed() && !capability_allows && relevant.is_empty() {
        relevant.push(CAPABILITY_GATE_ARTICLE.to_string());
    }
    relevant
}

fn build_sign_event(agent_id: &str, request: &SignRequest, agent: &AgentState) -> CanonicalEvent {
    let mut context = object_or_empty(&request.context);
    let tx = object_or_empty(context.get("tx").unwrap_or(&Value::Null));
    let mut ctx_agent = object_or_empty(context.get("agent").unwrap_or(&Value::Null));
    let mut transaction = object_or_empty(context.get("transaction").unwrap_or(&Value::Null));

    let level = ctx_agent
        .get("level")
        .and_then(level_text)
        .or_else(|| agent.agent_level.clone().filter(|l| !l.is_empty()))
        .unwrap_or_else(|| DEFAULT_LEVEL.to_string())
        .to_uppercase();

    // the first present, non-null flag wins, tx before transaction
    let allowlisted = [tx.get("allowlisted"), transaction.get("allowlisted")]
        .into_iter()
        .flatten()
        .find(|v| !v.is_null())
        .map(truthy)
        .unwrap_or(false);

    ctx_agent.insert("level".into(), Value::String(level.clone()));
    transaction.insert("allowlisted".into(), Value::Bool(allowlisted));
    context.insert("tx".into(), Value::Object(tx));
    context.insert("agent".into(), Value::Object(ctx_agent));
    context.insert("transaction".into(), Value::Object(transaction));

    let event_id = uuid::Uuid::new_v4().simple().to_string();

    CanonicalEvent {
        event_id: format!("evt-{}", &event_id[..16]),
        event_type: SIGN_REQUEST_EVENT.to_string(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        actor: Actor {
            agent_id: agent_id.to_string(),
            agent_level: Some(level),
            current_score: Some(agent.score()),
        },
        context: Value::Object(context),
        proofs: Value::Object(object_or_empty(&request.proofs)),
    }
}

fn object_or_empty(value: &Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn level_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Loose truthiness: null, false, zero, NaN and "" are false.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
