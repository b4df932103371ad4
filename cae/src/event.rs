//! Canonical events: the standardized input the engine judges.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use constitution::predicate::lookup;

use crate::error::{CaeError, Result};

/// The agent performing the action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    #[serde(default)]
    pub agent_id: String,
    /// Agent level (e.g. `A2`), matched against article scope
    #[serde(default)]
    pub agent_level: Option<String>,
    /// Score the caller believes the agent has; informational only
    #[serde(default)]
    pub current_score: Option<f64>,
}

/// Standardized description of an agent action to be judged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub event_type: String,
    /// ISO-8601 timestamp
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub actor: Actor,
    /// Nested data predicates query by dotted path
    #[serde(default = "empty_object")]
    pub context: Value,
    #[serde(default = "empty_object")]
    pub proofs: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl CanonicalEvent {
    /// Create an event with an empty context.
    pub fn new(
        event_id: impl Into<String>,
        event_type: impl Into<String>,
        timestamp: impl Into<String>,
        agent_id: impl Into<String>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            event_type: event_type.into(),
            timestamp: timestamp.into(),
            actor: Actor {
                agent_id: agent_id.into(),
                agent_level: None,
                current_score: None,
            },
            context: empty_object(),
            proofs: empty_object(),
        }
    }

    /// Builder: set the actor's level.
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.actor.agent_level = Some(level.into());
        self
    }

    /// Builder: set the context.
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    /// Parse from an arbitrary JSON value.
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| CaeError::MalformedEvent(e.to_string()))
    }

    /// Fail fast on missing required fields or an unparsable timestamp.
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("event_id", &self.event_id),
            ("event_type", &self.event_type),
            ("timestamp", &self.timestamp),
        ]
        .into_iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(name, _)| name)
        .collect();

        if !missing.is_empty() {
            return Err(CaeError::MalformedEvent(format!(
                "CanonicalEvent missing required fields: {}",
                missing.join(", ")
            )));
        }

        if self.actor.agent_id.trim().is_empty() {
            return Err(CaeError::MalformedEvent(
                "CanonicalEvent missing required field: actor.agent_id".to_string(),
            ));
        }

        self.occurred_at().map(|_| ())
    }

    /// Parsed timestamp.
    pub fn occurred_at(&self) -> Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(self.timestamp.trim())
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| {
                CaeError::MalformedEvent(format!(
                    "timestamp '{}' is not ISO-8601: {}",
                    self.timestamp, e
                ))
            })
    }

    /// UTC calendar day of the event.
    pub fn day_utc(&self) -> Result<NaiveDate> {
        self.occurred_at().map(|t| t.date_naive())
    }

    /// Numeric `tx.amount` from the context, if any.
    pub fn tx_amount(&self) -> Option<f64> {
        let amount = match lookup(&self.context, "tx.amount")? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        amount.filter(|a| a.is_finite())
    }
}
