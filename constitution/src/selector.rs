//! Article applicability.
//!
//! An article applies to an event when its scope admits the actor's level
//! and either its trigger names the event type or, for articles without a
//! trigger, it is computable.

use crate::document::Constitution;
use crate::types::{Article, EnforcementMode};

/// Check the scope test: empty scope matches any level.
pub fn scope_matches(article: &Article, agent_level: Option<&str>) -> bool {
    if article.scope.is_empty() {
        return true;
    }
    match agent_level {
        Some(level) => article.scope.iter().any(|s| s == level),
        None => false,
    }
}

/// Whether the article declares a non-empty trigger.
pub fn has_trigger(article: &Article) -> bool {
    article
        .trigger
        .as_ref()
        .is_some_and(|t| !t.event_types.is_empty())
}

/// Fallback computability for articles without a trigger.
///
/// Explicit `computability.computable` wins; otherwise an article is
/// computable when it declares a mode other than `log`.
pub fn is_computable(article: &Article) -> bool {
    if let Some(computable) = article.computability.as_ref().and_then(|c| c.computable) {
        return computable;
    }
    article
        .enforcement
        .as_ref()
        .and_then(|e| e.mode)
        .is_some_and(|mode| mode != EnforcementMode::Log)
}

/// Full applicability test for one article.
pub fn is_applicable(article: &Article, event_type: &str, agent_level: Option<&str>) -> bool {
    if !scope_matches(article, agent_level) {
        return false;
    }
    if has_trigger(article) {
        return article
            .trigger
            .iter()
            .flat_map(|t| t.event_types.iter())
            .any(|t| t == event_type);
    }
    is_computable(article)
}

/// Select the applicable articles, in document order.
pub fn select_applicable<'a>(
    constitution: &'a Constitution,
    event_type: &str,
    agent_level: Option<&str>,
) -> Vec<&'a Article> {
    constitution
        .articles()
        .filter(|article| is_applicable(article, event_type, agent_level))
        .collect()
}
