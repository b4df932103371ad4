//! Agent State Store.
//!
//! File-backed registry of per-agent trust records plus an append-only
//! transition log:
//!
//! - `agent_registry.json`: versioned map of agent id to [`AgentState`]
//! - `state_log.jsonl`: one [`TransitionLogEntry`] per applied decision
//! - `.lock`: exclusive marker serializing all access across processes
//! - `state_schema.json` (optional): overrides the registry's top-level schema

pub mod error;
pub mod lock;
pub mod schema;
pub mod store;
pub mod types;

pub use error::StateError;
pub use lock::{FileLock, LockGuard};
pub use schema::{JsonType, StateSchema};
pub use store::{AgentStateStore, ParameterSource};
pub use types::{
    verify_entries, AgentPatch, AgentState, AuditChain, Capabilities, ChainBreak, ChainReport,
    Counters, RegistryState, Restrictions, SignMode, SpendDaily, TransitionLogEntry,
    TransitionSummary, DEFAULT_BAND, STATE_VERSION,
};
