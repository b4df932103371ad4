//! Structural validation of the registry document.
//!
//! The top-level shape comes from an optional schema document (required keys
//! and their primitive types); the per-agent shape is fixed.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{Result, StateError};
use crate::persist::read_if_present;

/// Primitive JSON type a property must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl JsonType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }

    /// Check if a value has this type. A missing value never does.
    pub fn matches(&self, value: Option<&Value>) -> bool {
        match (self, value) {
            (Self::String, Some(Value::String(_))) => true,
            (Self::Number, Some(Value::Number(_))) => true,
            (Self::Boolean, Some(Value::Bool(_))) => true,
            (Self::Object, Some(Value::Object(_))) => true,
            (Self::Array, Some(Value::Array(_))) => true,
            _ => false,
        }
    }
}

/// Constraint on one top-level property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySpec {
    #[serde(rename = "type", default)]
    pub kind: Option<JsonType>,
}

/// Schema for the registry document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSchema {
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySpec>,
}

impl Default for StateSchema {
    fn default() -> Self {
        let prop = |kind| PropertySpec { kind: Some(kind) };
        Self {
            required: vec!["version".into(), "updated_at".into(), "agents".into()],
            properties: BTreeMap::from([
                ("version".to_string(), prop(JsonType::String)),
                ("updated_at".to_string(), prop(JsonType::String)),
                ("agents".to_string(), prop(JsonType::Object)),
            ]),
        }
    }
}

impl StateSchema {
    /// Load a schema document, falling back to the built-in schema when absent.
    pub async fn load_or_default(path: &Path) -> Result<Self> {
        let raw = read_if_present(path)
            .await
            .map_err(|e| StateError::io(path, e))?;

        match raw {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| {
                StateError::Serialization(format!("schema {}: {}", path.display(), e))
            }),
            None => Ok(Self::default()),
        }
    }

    /// Validate a registry document.
    pub fn validate(&self, state: &Value) -> Result<()> {
        let root = state
            .as_object()
            .ok_or_else(|| StateError::invalid("root", "must be an object"))?;

        for key in &self.required {
            if !root.contains_key(key) {
                return Err(StateError::invalid(key.as_str(), "is missing"));
            }
        }

        for (key, spec) in &self.properties {
            if let (Some(value), Some(kind)) = (root.get(key), spec.kind) {
                expect(kind, Some(value), key)?;
            }
        }

        if let Some(Value::Object(agents)) = root.get("agents") {
            for (agent_id, agent) in agents {
                validate_agent(agent_id, agent)?;
            }
        }

        Ok(())
    }
}

fn expect(kind: JsonType, value: Option<&Value>, location: &str) -> Result<()> {
    if kind.matches(value) {
        Ok(())
    } else {
        Err(StateError::invalid(
            location,
            format!("must be {}", kind.as_str()),
        ))
    }
}

fn expect_nullable(kind: JsonType, value: Option<&Value>, location: &str) -> Result<()> {
    match value {
        Some(Value::Null) => Ok(()),
        other => expect(kind, other, location),
    }
}

fn validate_agent(agent_id: &str, agent: &Value) -> Result<()> {
    let at = |field: &str| format!("agents.{agent_id}.{field}");

    expect(JsonType::Object, Some(agent), &format!("agents.{agent_id}"))?;

    for (field, kind) in [
        ("agent_id", JsonType::String),
        ("alignment_score", JsonType::Number),
        ("consecutive_fails", JsonType::Number),
        ("restrictions", JsonType::Object),
        ("counters", JsonType::Object),
        ("audit", JsonType::Object),
        ("created_at", JsonType::String),
        ("updated_at", JsonType::String),
    ] {
        expect(kind, agent.get(field), &at(field))?;
    }

    let restrictions = &agent["restrictions"];
    for flag in ["warning", "restricted", "quarantine", "ban"] {
        expect(
            JsonType::Boolean,
            restrictions.get(flag),
            &at(&format!("restrictions.{flag}")),
        )?;
    }
    expect(
        JsonType::Array,
        restrictions.get("active"),
        &at("restrictions.active"),
    )?;

    let spend = agent["counters"].get("spend_daily");
    expect(JsonType::Object, spend, &at("counters.spend_daily"))?;
    let spend = &agent["counters"]["spend_daily"];
    expect_nullable(JsonType::String, spend.get("day_utc"), &at("counters.spend_daily.day_utc"))?;
    expect(JsonType::Number, spend.get("total"), &at("counters.spend_daily.total"))?;
    expect(JsonType::Number, spend.get("count"), &at("counters.spend_daily.count"))?;
    expect_nullable(JsonType::Number, spend.get("limit"), &at("counters.spend_daily.limit"))?;

    let audit = &agent["audit"];
    for field in ["prev_audit_hash", "last_audit_hash"] {
        expect_nullable(JsonType::String, audit.get(field), &at(&format!("audit.{field}")))?;
    }

    Ok(())
}
