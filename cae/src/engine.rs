//! The decision engine.
//!
//! Wires selection, predicate evaluation, scoring, enforcement resolution,
//! alignment scoring, audit writing and the state transition into one
//! `evaluate(event)` call.

use std::collections::HashMap;
use std::sync::Arc;

use constitution::{
    evaluate_article, score_alignment, score_article, select_applicable, ArticleScore,
    Constitution, EnforcementResolver, EvaluationResult, Parameters,
};

use crate::audit::{AuditBundle, AuditWriter, FileAuditWriter};
use crate::config::CaeConfig;
use crate::decision::{Decision, Evaluation};
use crate::error::Result;
use crate::event::CanonicalEvent;
use crate::state::{AgentStateStore, ParameterSource};

/// Judges canonical events against the constitution.
///
/// Holds no mutable state of its own; concurrent `evaluate` calls are
/// serialized only at the state store.
pub struct ConstitutionalAlignmentEngine {
    constitution: Arc<Constitution>,
    params: Arc<Parameters>,
    /// Per-article scores; pure in (article, parameters)
    scores: HashMap<String, ArticleScore>,
    resolver: EnforcementResolver,
    store: Arc<AgentStateStore>,
    audit: Arc<dyn AuditWriter>,
}

impl ConstitutionalAlignmentEngine {
    /// Create an engine from loaded documents and injected collaborators.
    pub fn new(
        constitution: Constitution,
        params: Parameters,
        store: Arc<AgentStateStore>,
        audit: Arc<dyn AuditWriter>,
    ) -> Self {
        let scores = constitution
            .articles()
            .map(|a| (a.article_id.clone(), score_article(a, &params)))
            .collect();

        Self {
            constitution: Arc::new(constitution),
            params: Arc::new(params),
            scores,
            resolver: EnforcementResolver::new(),
            store,
            audit,
        }
    }

    /// Builder: use a custom enforcement resolver.
    pub fn with_resolver(mut self, resolver: EnforcementResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Load documents and build file-backed collaborators from config.
    pub fn from_config(config: &CaeConfig) -> Result<Self> {
        let constitution = Constitution::load(&config.constitution_path)?;
        let params = Parameters::load(&config.parameters_path)?;
        let store = AgentStateStore::new(
            &config.state,
            ParameterSource::File(config.parameters_path.clone()),
        );
        let audit = FileAuditWriter::new(&config.audit_dir);
        let constitution_hash = constitution.content_hash()?;

        tracing::info!(
            articles = constitution.article_count(),
            constitution_hash = %constitution_hash,
            state_dir = %config.state.state_dir.display(),
            "Alignment engine ready"
        );

        Ok(Self::new(constitution, params, Arc::new(store), Arc::new(audit)).with_resolver(
            EnforcementResolver::with_supersede_precedence(config.general.kill_switch_precedence),
        ))
    }

    pub fn constitution(&self) -> &Constitution {
        &self.constitution
    }

    pub fn parameters(&self) -> &Parameters {
        &self.params
    }

    /// Shared handle to the state store.
    pub fn store(&self) -> Arc<AgentStateStore> {
        Arc::clone(&self.store)
    }

    /// Select, evaluate and score the applicable articles. No side effects.
    pub fn evaluate_articles(&self, event: &CanonicalEvent) -> Vec<EvaluationResult> {
        select_applicable(
            &self.constitution,
            &event.event_type,
            event.actor.agent_level.as_deref(),
        )
        .into_iter()
        .map(|article| {
            let evaluation = evaluate_article(article, &event.context);
            let score = self
                .scores
                .get(&article.article_id)
                .cloned()
                .unwrap_or_else(|| score_article(article, &self.params));

            EvaluationResult {
                article_id: article.article_id.clone(),
                result: evaluation.result,
                precedence: score.precedence,
                weight: score.weight,
                severity_band: score.band,
                evidence: evaluation.evidence,
                enforcement_mode: article.enforcement_mode(),
                actions: article.actions().to_vec(),
            }
        })
        .collect()
    }

    /// Judge one event and apply the outcome to the acting agent.
    ///
    /// Validation failures touch nothing. An audit write failure aborts
    /// before any state mutation.
    pub async fn evaluate(&self, event: &CanonicalEvent) -> Result<Evaluation> {
        event.validate()?;

        let results = self.evaluate_articles(event);
        let enforcement = self.resolver.resolve(&results);

        let prior = self
            .store
            .get_agent(&event.actor.agent_id)
            .await?
            .map(|agent| agent.score())
            .unwrap_or(1.0);
        let alignment = score_alignment(&results, prior, &self.params);

        let mut decision = Decision::new(&event.event_id, results, enforcement, alignment);

        let receipt = self
            .audit
            .write(AuditBundle {
                event,
                decision: &decision,
            })
            .await?;
        decision.audit_hash = Some(receipt.audit_hash);

        let summary = self.store.apply_decision(event, &decision).await?;
        decision.merge_transition(&summary);

        tracing::info!(
            event_id = %event.event_id,
            agent_id = %event.actor.agent_id,
            decision_id = %decision.decision_id,
            verdict = %decision.verdict,
            mode = %decision.enforcement.mode,
            applied = decision.applied_articles.len(),
            score_after = decision.alignment.after,
            "Decision made"
        );

        Ok(Evaluation {
            decision,
            audit_file: receipt.audit_file,
        })
    }
}
