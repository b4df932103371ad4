//! Per-article evaluation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::predicate::Trace;
use crate::types::{Article, ArticleResult};

/// Evidence attached to a per-article result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Whether the compliance condition held
    pub predicate_holds: bool,
    /// Clause-by-clause trace; absent when the article has no predicate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<Trace>,
}

/// Outcome of evaluating one article's predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleEvaluation {
    pub result: ArticleResult,
    pub evidence: Evidence,
}

/// Evaluate an article against the event context.
///
/// PASS when the predicate holds (or is absent), otherwise the article's
/// declared violation code.
pub fn evaluate_article(article: &Article, context: &Value) -> ArticleEvaluation {
    let (holds, trace) = match &article.predicate {
        Some(predicate) => {
            let trace = predicate.trace(context);
            (trace.outcome, Some(trace))
        }
        None => (true, None),
    };

    let result = if holds {
        ArticleResult::Pass
    } else {
        article.on_violation.into()
    };

    tracing::debug!(
        article_id = %article.article_id,
        result = ?result,
        "Article evaluated"
    );

    ArticleEvaluation {
        result,
        evidence: Evidence {
            predicate_holds: holds,
            trace,
        },
    }
}
