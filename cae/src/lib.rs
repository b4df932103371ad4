//! Constitutional Alignment Engine (CAE).
//!
//! Judges canonical events emitted by autonomous agents against the
//! constitution, maintains a persistent per-agent trust state, and writes a
//! hash-chained audit trail.
//!
//! # Flow
//!
//! event → article selection → predicate evaluation and scoring →
//! enforcement resolution and alignment scoring → audit bundle →
//! state transition → decision
//!
//! # Key Components
//!
//! - [`ConstitutionalAlignmentEngine`]: `evaluate(event)` entry point
//! - [`AgentStateStore`]: file-backed trust records and transition log
//! - [`AuditWriter`]: content-addressed audit bundles
//! - [`SignPreflight`]: ALLOW/DENY gate for transaction signing
//!
//! # Example
//!
//! ```ignore
//! use cae::{CaeConfig, CanonicalEvent, ConstitutionalAlignmentEngine};
//!
//! let engine = ConstitutionalAlignmentEngine::from_config(&CaeConfig::load("cae.yaml")?)?;
//! let event = CanonicalEvent::new("evt-1", "tx.sign_request", "2024-01-01T00:00:00Z", "agent:1")
//!     .with_level("A2");
//! let evaluation = engine.evaluate(&event).await?;
//! println!("{}", evaluation.decision.verdict);
//! ```

pub mod audit;
pub mod config;
pub mod decision;
pub mod engine;
pub mod error;
pub mod event;
pub mod persist;
pub mod preflight;
pub mod state;

pub use audit::{AuditBundle, AuditError, AuditReceipt, AuditWriter, FileAuditWriter};
pub use config::{CaeConfig, GeneralConfig, StateConfig};
pub use decision::{Decision, DecisionState, Evaluation, Verdict};
pub use engine::ConstitutionalAlignmentEngine;
pub use error::{CaeError, Result};
pub use event::{Actor, CanonicalEvent};
pub use preflight::{
    AgentView, DenyNotice, PreflightResponse, PreflightVerdict, SignPreflight, SignRequest,
    SIGN_REQUEST_EVENT,
};
pub use state::{AgentPatch, AgentState, AgentStateStore, ParameterSource, StateError};
