//! Durable agent trust state.
//!
//! Every public operation runs under one exclusive cross-process lock, reads
//! the registry fresh, validates it against the schema, and writes it back
//! atomically. The transition log is append-only.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;

use constitution::{clamp, AlignmentOutcome, Parameters};

use super::error::{Result, StateError};
use super::lock::FileLock;
use super::schema::StateSchema;
use super::types::{
    verify_entries, AgentPatch, AgentState, ChainReport, RegistryState, Restrictions,
    TransitionLogEntry, TransitionSummary,
};
use crate::config::StateConfig;
use crate::decision::{Decision, Verdict};
use crate::event::CanonicalEvent;
use crate::persist::{append_line, read_if_present, write_atomic};

/// Where the store reads parameters from on each mutation.
#[derive(Debug, Clone)]
pub enum ParameterSource {
    /// Re-read from disk every time; defaults when the file is missing
    File(PathBuf),
    /// Fixed in memory
    Fixed(Arc<Parameters>),
}

impl ParameterSource {
    fn load(&self) -> Result<Arc<Parameters>> {
        match self {
            Self::File(path) => Ok(Arc::new(Parameters::load_or_default(path)?)),
            Self::Fixed(params) => Ok(Arc::clone(params)),
        }
    }
}

/// File-backed agent state store.
#[derive(Debug, Clone)]
pub struct AgentStateStore {
    state_dir: PathBuf,
    registry_path: PathBuf,
    log_path: PathBuf,
    schema_path: PathBuf,
    lock: FileLock,
    params: ParameterSource,
}

impl AgentStateStore {
    pub fn new(config: &StateConfig, params: ParameterSource) -> Self {
        Self {
            state_dir: config.state_dir.clone(),
            registry_path: config.registry_path(),
            log_path: config.log_path(),
            schema_path: config.schema_path(),
            lock: FileLock::new(config.lock_path(), config.lock_retries, config.lock_wait()),
            params,
        }
    }

    pub fn registry_path(&self) -> &Path {
        &self.registry_path
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Load and validate the registry.
    pub async fn load_state(&self) -> Result<RegistryState> {
        self.locked(self.read_registry()).await
    }

    /// Validate, stamp `updated_at`, and persist a registry.
    ///
    /// On validation failure nothing is written.
    pub async fn save_state(&self, state: RegistryState) -> Result<RegistryState> {
        self.locked(self.replace_registry(state)).await
    }

    /// Owned copy of an agent's record, if present.
    pub async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentState>> {
        if agent_id.is_empty() {
            return Ok(None);
        }
        self.locked(self.read_agent(agent_id)).await
    }

    /// Merge a patch over the existing record (or a fresh one) and persist it.
    pub async fn upsert_agent(&self, agent_id: &str, patch: AgentPatch) -> Result<AgentState> {
        if agent_id.is_empty() {
            return Err(StateError::MissingArgument {
                operation: "upsert_agent",
                argument: "agent_id",
            });
        }

        self.locked(self.merge_agent(agent_id, patch)).await
    }

    async fn merge_agent(&self, agent_id: &str, patch: AgentPatch) -> Result<AgentState> {
        let mut state = self.read_registry().await?;

        let mut agent = state
            .agents
            .get(agent_id)
            .cloned()
            .unwrap_or_else(|| AgentState::new(agent_id));
        agent.apply_patch(patch);
        agent.agent_id = agent_id.to_string();
        agent.updated_at = Utc::now();

        state.agents.insert(agent_id.to_string(), agent.clone());
        self.write_registry(state).await?;

        tracing::debug!(agent_id = %agent_id, "Agent upserted");
        Ok(agent)
    }

    /// Apply a decision to the acting agent's record.
    ///
    /// Clamps the score, rolls and accumulates the daily spend counter,
    /// recomputes restrictions, updates the fail streak, extends the audit
    /// chain, persists the registry and appends one log entry.
    pub async fn apply_decision(
        &self,
        event: &CanonicalEvent,
        decision: &Decision,
    ) -> Result<TransitionSummary> {
        let agent_id = event.actor.agent_id.as_str();
        if agent_id.is_empty() {
            return Err(StateError::MissingArgument {
                operation: "apply_decision",
                argument: "event.actor.agent_id",
            });
        }
        let audit_hash = decision
            .audit_hash
            .clone()
            .ok_or(StateError::MissingArgument {
                operation: "apply_decision",
                argument: "decision.audit_hash",
            })?;
        let day = event
            .day_utc()
            .map_err(|e| StateError::InvalidArgument(e.to_string()))?;

        self.locked(self.transition(event, decision, audit_hash, day))
            .await
    }

    async fn transition(
        &self,
        event: &CanonicalEvent,
        decision: &Decision,
        audit_hash: String,
        day: NaiveDate,
    ) -> Result<TransitionSummary> {
        let agent_id = event.actor.agent_id.as_str();
        let mut state = self.read_registry().await?;
        let params = self.params.load()?;

        let current = state
            .agents
            .get(agent_id)
            .cloned()
            .unwrap_or_else(|| AgentState::new(agent_id));

        let before = current.score();
        let delta = if decision.alignment.delta.is_finite() {
            decision.alignment.delta
        } else {
            0.0
        };
        let after = clamp(before + delta, 0.0, 1.0);

        let level = event.actor.agent_level.as_deref();
        let mut spend_daily = current.counters.spend_daily.clone();
        spend_daily.record(
            day,
            event.tx_amount(),
            level.and_then(|l| params.daily_limit(l)),
        );

        let restrictions = Restrictions::from_thresholds(after, &params.alignment_score_thresholds);
        let consecutive_fails = match decision.verdict {
            Verdict::Enforce => current.consecutive_fails + 1,
            Verdict::Pass => 0,
        };
        let prev_audit_hash = current.audit.last_audit_hash.clone();

        let mut next = current;
        next.agent_id = agent_id.to_string();
        next.alignment_score = after;
        next.consecutive_fails = consecutive_fails;
        next.restrictions = restrictions.clone();
        next.counters.spend_daily = spend_daily.clone();
        next.audit.prev_audit_hash = prev_audit_hash.clone();
        next.audit.last_audit_hash = Some(audit_hash.clone());
        if let Some(level) = level {
            next.agent_level = Some(level.to_string());
        }
        next.last_event_id = Some(event.event_id.clone());
        next.last_decision_id = Some(decision.decision_id.clone());
        next.last_verdict = Some(decision.verdict);
        next.updated_at = Utc::now();

        state.agents.insert(agent_id.to_string(), next);
        self.write_registry(state).await?;

        let entry = TransitionLogEntry {
            ts: Utc::now(),
            event_id: event.event_id.clone(),
            decision_id: decision.decision_id.clone(),
            agent_id: agent_id.to_string(),
            verdict: decision.verdict,
            score_before: before,
            score_delta: delta,
            score_after: after,
            restrictions_active: restrictions.active.clone(),
            consecutive_fails,
            spend_daily: spend_daily.clone(),
            prev_audit_hash: prev_audit_hash.clone(),
            audit_hash: Some(audit_hash.clone()),
        };
        self.write_log_line(&entry).await?;

        tracing::info!(
            agent_id = %agent_id,
            event_id = %event.event_id,
            verdict = %decision.verdict,
            score_before = before,
            score_after = after,
            consecutive_fails,
            restrictions = ?restrictions.active,
            "Transition applied"
        );

        Ok(TransitionSummary {
            agent_id: agent_id.to_string(),
            alignment: AlignmentOutcome {
                before,
                delta,
                after,
            },
            restrictions,
            consecutive_fails,
            spend_daily,
            prev_audit_hash,
            last_audit_hash: Some(audit_hash),
        })
    }

    /// Append an arbitrary entry to the transition log.
    pub async fn append_log<T: Serialize + ?Sized>(&self, entry: &T) -> Result<()> {
        self.locked(async {
            self.read_registry().await?;
            self.write_log_line(entry).await
        })
        .await
    }

    /// Every transition entry in the log, in append order.
    ///
    /// Lines that are valid JSON but not transition entries (appended through
    /// [`Self::append_log`]) are skipped. A line that is not JSON at all is an error.
    pub async fn read_log(&self) -> Result<Vec<TransitionLogEntry>> {
        self.locked(self.read_log_entries()).await
    }

    /// Parse the log. Lock must be held.
    async fn read_log_entries(&self) -> Result<Vec<TransitionLogEntry>> {
        let raw = read_if_present(&self.log_path)
            .await
            .map_err(|e| StateError::io(&self.log_path, e))?
            .unwrap_or_default();

        let mut entries = Vec::new();
        for (index, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(line).map_err(|e| {
                StateError::Serialization(format!(
                    "{} line {}: {}",
                    self.log_path.display(),
                    index + 1,
                    e
                ))
            })?;
            match serde_json::from_value::<TransitionLogEntry>(value) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::debug!(line = index + 1, error = %e, "Skipping non-transition log line")
                }
            }
        }
        Ok(entries)
    }

    /// Walk an agent's log entries and report the first broken chain link.
    pub async fn verify_chain(&self, agent_id: &str) -> Result<ChainReport> {
        if agent_id.is_empty() {
            return Err(StateError::MissingArgument {
                operation: "verify_chain",
                argument: "agent_id",
            });
        }
        let entries = self.read_log().await?;
        Ok(verify_entries(agent_id, &entries))
    }

    /// Run `op` under the state lock.
    ///
    /// The marker is released asynchronously once `op` finishes; the guard's
    /// drop only covers unwinding.
    async fn locked<T>(&self, op: impl Future<Output = Result<T>>) -> Result<T> {
        self.prepare_dir().await?;
        let guard = self.lock.acquire().await?;
        let result = op.await;
        guard.release().await;
        result
    }

    async fn read_agent(&self, agent_id: &str) -> Result<Option<AgentState>> {
        let state = self.read_registry().await?;
        Ok(state.agents.get(agent_id).cloned())
    }

    async fn replace_registry(&self, state: RegistryState) -> Result<RegistryState> {
        self.ensure_files().await?;
        self.write_registry(state).await
    }

    async fn prepare_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.state_dir)
            .await
            .map_err(|e| StateError::io(&self.state_dir, e))
    }

    /// Create the registry and log on first use. Lock must be held.
    async fn ensure_files(&self) -> Result<()> {
        if !path_exists(&self.registry_path).await {
            let body = registry_json(&RegistryState::default())?;
            write_atomic(&self.registry_path, body.as_bytes())
                .await
                .map_err(|e| StateError::io(&self.registry_path, e))?;
        }
        if !path_exists(&self.log_path).await {
            tokio::fs::write(&self.log_path, b"")
                .await
                .map_err(|e| StateError::io(&self.log_path, e))?;
        }
        Ok(())
    }

    /// Read and validate the registry. Lock must be held.
    async fn read_registry(&self) -> Result<RegistryState> {
        self.ensure_files().await?;

        let raw = read_if_present(&self.registry_path)
            .await
            .map_err(|e| StateError::io(&self.registry_path, e))?;
        let Some(raw) = raw else {
            return Ok(RegistryState::default());
        };

        let value: Value = serde_json::from_str(&raw)?;
        self.schema().await?.validate(&value)?;
        // well-typed JSON can still carry out-of-range values
        serde_json::from_value(value).map_err(|e| StateError::invalid("registry", e.to_string()))
    }

    /// Validate, stamp and atomically write the registry. Lock must be held.
    async fn write_registry(&self, mut state: RegistryState) -> Result<RegistryState> {
        self.schema()
            .await?
            .validate(&serde_json::to_value(&state)?)?;

        state.updated_at = Utc::now();
        let body = registry_json(&state)?;
        write_atomic(&self.registry_path, body.as_bytes())
            .await
            .map_err(|e| StateError::io(&self.registry_path, e))?;
        Ok(state)
    }

    async fn write_log_line<T: Serialize + ?Sized>(&self, entry: &T) -> Result<()> {
        let line = serde_json::to_string(entry)?;
        append_line(&self.log_path, &line)
            .await
            .map_err(|e| StateError::io(&self.log_path, e))
    }

    async fn schema(&self) -> Result<StateSchema> {
        StateSchema::load_or_default(&self.schema_path).await
    }
}

fn registry_json(state: &RegistryState) -> Result<String> {
    let mut body = serde_json::to_string_pretty(state)?;
    body.push('\n');
    Ok(body)
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}
