//! Precedence, band, weight and alignment scoring.
//!
//! Everything here is a pure function of the article (or results) and the
//! parameters, so per-article scores can be computed once and cached.

use serde::{Deserialize, Serialize};

use crate::params::{Parameters, PrecedenceBand};
use crate::types::{Article, ArticleResult, EvaluationResult};

/// Precedence scale bounds.
pub const PRECEDENCE_MIN: f64 = 0.0;
pub const PRECEDENCE_MAX: f64 = 100.0;

/// Band name when no cut point matches.
pub const UNBANDED: &str = "unbanded";

/// Clamp a value into `[lo, hi]`. NaN clamps to `lo`.
pub fn clamp(x: f64, lo: f64, hi: f64) -> f64 {
    if x.is_nan() {
        return lo;
    }
    x.max(lo).min(hi)
}

/// Precedence of an article: explicit value, else class default, else the
/// parameters' default.
pub fn precedence(article: &Article, params: &Parameters) -> f64 {
    let raw = article
        .precedence
        .filter(|p| p.is_finite())
        .or_else(|| {
            article
                .precedence_class
                .as_ref()
                .and_then(|class| params.precedence_classes.get(class).copied())
        })
        .unwrap_or(params.default_precedence);

    clamp(raw, PRECEDENCE_MIN, PRECEDENCE_MAX)
}

/// Band of a precedence: the cut point with the highest `min` not above it.
pub fn band(precedence: f64, bands: &[PrecedenceBand]) -> String {
    bands
        .iter()
        .filter(|b| precedence >= b.min)
        .max_by(|a, b| a.min.total_cmp(&b.min))
        .map(|b| b.band.clone())
        .unwrap_or_else(|| UNBANDED.to_string())
}

/// Alignment weight of an article, within `[0, 1]` (default 1).
pub fn weight(article: &Article) -> f64 {
    match article.weight {
        Some(w) if w.is_finite() => clamp(w, 0.0, 1.0),
        _ => 1.0,
    }
}

/// Cached score of one article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleScore {
    pub precedence: f64,
    pub band: String,
    pub weight: f64,
}

/// Score an article against the parameters.
pub fn score_article(article: &Article, params: &Parameters) -> ArticleScore {
    let precedence = precedence(article, params);
    ArticleScore {
        precedence,
        band: band(precedence, &params.precedence_bands),
        weight: weight(article),
    }
}

/// Alignment movement of one decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignmentOutcome {
    pub before: f64,
    pub delta: f64,
    pub after: f64,
}

impl AlignmentOutcome {
    /// Apply a delta to a prior score. A non-finite prior counts as 1.
    pub fn apply(prior: f64, delta: f64) -> Self {
        let before = if prior.is_finite() {
            clamp(prior, 0.0, 1.0)
        } else {
            1.0
        };
        Self {
            before,
            delta,
            after: clamp(before + delta, 0.0, 1.0),
        }
    }
}

/// Trust-score delta for a set of per-article results.
///
/// Each violation costs its base penalty (FAIL or WARN) scaled by weight and
/// by precedence as a fraction of 100; the sum is capped at `max_penalty`.
/// Zero when nothing was violated.
pub fn alignment_delta(results: &[EvaluationResult], params: &Parameters) -> f64 {
    let scoring = &params.alignment_scoring;

    let penalty: f64 = results
        .iter()
        .filter(|r| r.is_violation())
        .map(|r| {
            let base = match r.result {
                ArticleResult::Fail => scoring.fail_penalty,
                ArticleResult::Warn => scoring.warn_penalty,
                ArticleResult::Pass => 0.0,
            };
            base * r.weight * (r.precedence / PRECEDENCE_MAX)
        })
        .sum();

    if penalty <= 0.0 {
        return 0.0;
    }
    -clamp(penalty, 0.0, scoring.max_penalty.min(1.0))
}

/// Score alignment for a decision against the agent's prior score.
pub fn score_alignment(
    results: &[EvaluationResult],
    prior: f64,
    params: &Parameters,
) -> AlignmentOutcome {
    AlignmentOutcome::apply(prior, alignment_delta(results, params))
}
