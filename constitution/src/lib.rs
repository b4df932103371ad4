//! Constitution rulebook for the constitutional alignment engine.
//!
//! This crate holds everything that judges a single event against the
//! rulebook, independent of agent state:
//!
//! - **Rulebook**: ordered titles of articles, each with scope, trigger,
//!   predicate and enforcement directive
//! - **Predicates**: a small boolean language over dotted context paths
//! - **Selection**: which articles apply to an event
//! - **Scoring**: precedence, band, weight and alignment delta
//! - **Enforcement**: one decision-level directive from many violations
//!
//! # Key Components
//!
//! - [`Constitution`]: The loaded rulebook
//! - [`Parameters`]: Thresholds, bands and templates
//! - [`Predicate`]: Compliance condition tree
//! - [`EnforcementResolver`]: Resolves modes across violations
//!
//! # Example
//!
//! ```ignore
//! use constitution::{evaluate_article, select_applicable, score_article, Constitution, Parameters};
//!
//! let constitution = Constitution::load("main.json")?;
//! let params = Parameters::load("parameters.json")?;
//!
//! for article in select_applicable(&constitution, "tx.sign_request", Some("A2")) {
//!     let eval = evaluate_article(article, &event_context);
//!     let score = score_article(article, &params);
//! }
//! ```

pub mod digest;
pub mod document;
pub mod enforcement;
pub mod error;
pub mod evaluator;
pub mod params;
pub mod predicate;
pub mod scoring;
pub mod selector;
pub mod types;

// Re-export main types
pub use digest::{compute_hash, hash_json};
pub use document::Constitution;
pub use enforcement::{EnforcementOutcome, EnforcementResolver};
pub use error::ConstitutionError;
pub use evaluator::{evaluate_article, ArticleEvaluation, Evidence};
pub use params::{AlignmentThresholds, Parameters};
pub use predicate::{Comparison, Predicate, Trace};
pub use scoring::{clamp, score_alignment, score_article, AlignmentOutcome, ArticleScore};
pub use selector::select_applicable;
pub use types::*;
