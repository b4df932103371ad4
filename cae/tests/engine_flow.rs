//! End-to-end decision flow against a temp state directory.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use cae::state::SignMode;
use cae::{
    AgentPatch, AgentStateStore, AuditBundle, AuditError, AuditReceipt, AuditWriter, CaeConfig,
    CaeError, CanonicalEvent, ConstitutionalAlignmentEngine, FileAuditWriter, ParameterSource,
    SignPreflight, SignRequest, StateConfig, Verdict,
};
use constitution::{Constitution, EnforcementMode, Parameters, Severity};

fn constitution() -> Constitution {
    Constitution::from_json(
        &json!({
            "version": "1.0",
            "titles": [
                {
                    "title": "Custody",
                    "articles": [
                        {
                            "article_id": "CUSTODY/NO_DRAIN",
                            "trigger": { "event_types": ["tx.sign_request"] },
                            "predicate": { "op": "lte", "path": "tx.amount", "value": 1000 },
                            "enforcement": { "mode": "kill_switch", "actions": ["halt_agent", "notify"] },
                            "precedence": 98
                        },
                        {
                            "article_id": "CUSTODY/ALLOWLIST",
                            "trigger": { "event_types": ["tx.sign_request"] },
                            "predicate": { "op": "eq", "path": "transaction.allowlisted", "value": true },
                            "enforcement": { "mode": "revert_tx", "actions": ["revert", "notify"] },
                            "precedence_class": "operational"
                        }
                    ]
                },
                {
                    "title": "Conduct",
                    "articles": [
                        {
                            "article_id": "CONDUCT/MEMO",
                            "scope": ["A2", "A3"],
                            "trigger": { "event_types": ["tx.sign_request"] },
                            "predicate": { "op": "exists", "path": "tx.memo" },
                            "enforcement": { "mode": "require_attestation", "actions": ["attest"] },
                            "precedence": 40,
                            "on_violation": "WARN"
                        },
                        {
                            "article_id": "CONDUCT/UNTRIGGERED_LOG",
                            "predicate": { "op": "exists", "path": "never.there" },
                            "enforcement": { "mode": "log" }
                        }
                    ]
                }
            ]
        })
        .to_string(),
    )
    .unwrap()
}

fn parameters() -> Parameters {
    Parameters::from_json(
        &json!({
            "precedence_bands": [
                { "band": "critical", "min": 90 },
                { "band": "elevated", "min": 60 },
                { "band": "routine", "min": 0 }
            ],
            "precedence_classes": { "operational": 70 },
            "alignment_score_thresholds": {
                "warning": 0.9, "restricted": 0.7, "quarantine": 0.5, "ban": 0.2
            },
            "agent_limit_templates": { "A2": { "daily_limit": 5000 } }
        })
        .to_string(),
    )
    .unwrap()
}

fn store(dir: &Path) -> Arc<AgentStateStore> {
    Arc::new(AgentStateStore::new(
        &StateConfig::in_dir(dir.join("state")),
        ParameterSource::Fixed(Arc::new(parameters())),
    ))
}

fn engine_with(dir: &Path, audit: Arc<dyn AuditWriter>) -> ConstitutionalAlignmentEngine {
    ConstitutionalAlignmentEngine::new(constitution(), parameters(), store(dir), audit)
}

fn engine(dir: &Path) -> ConstitutionalAlignmentEngine {
    engine_with(dir, Arc::new(FileAuditWriter::new(dir.join("audit"))))
}

fn sign_event(id: &str, amount: f64, allowlisted: bool) -> CanonicalEvent {
    CanonicalEvent::new(id, "tx.sign_request", "2024-03-01T12:00:00Z", "agent:alpha")
        .with_level("A2")
        .with_context(json!({
            "tx": { "amount": amount, "memo": "payroll" },
            "transaction": { "allowlisted": allowlisted }
        }))
}

struct RejectingAuditWriter;

#[async_trait]
impl AuditWriter for RejectingAuditWriter {
    async fn write(&self, _bundle: AuditBundle<'_>) -> Result<AuditReceipt, AuditError> {
        Err(AuditError::Rejected("audit sink offline".to_string()))
    }
}

#[tokio::test]
async fn compliant_event_passes_and_is_audited() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());

    let evaluation = engine.evaluate(&sign_event("evt-1", 50.0, true)).await.unwrap();
    let decision = &evaluation.decision;

    assert_eq!(decision.verdict, Verdict::Pass);
    assert_eq!(decision.enforcement.mode, EnforcementMode::Log);
    assert_eq!(decision.enforcement.severity, Severity::Info);
    assert!(decision.enforcement.actions.is_empty());
    // the untriggered log-mode article is not computable
    assert_eq!(decision.results.len(), 3);
    assert_eq!(decision.results[0].severity_band, "critical");
    assert_eq!(decision.results[1].severity_band, "elevated");

    let hash = decision.audit_hash.clone().unwrap();
    assert_eq!(FileAuditWriter::verify(&evaluation.audit_file).await.unwrap(), hash);
}

#[tokio::test]
async fn strongest_mode_wins_without_supersede() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());

    let mut event = sign_event("evt-1", 50.0, false);
    event.context["tx"].as_object_mut().unwrap().remove("memo");
    let decision = engine.evaluate(&event).await.unwrap().decision;

    assert_eq!(decision.verdict, Verdict::Enforce);
    assert_eq!(
        decision.applied_articles,
        vec!["CUSTODY/ALLOWLIST", "CONDUCT/MEMO"]
    );
    // revert_tx is stronger than require_attestation
    assert_eq!(decision.enforcement.mode, EnforcementMode::RevertTx);
    assert_eq!(decision.enforcement.actions, vec!["revert", "notify"]);
    assert_eq!(decision.enforcement.severity, Severity::Medium);
}

#[tokio::test]
async fn critical_kill_switch_failure_supersedes() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());

    let decision = engine
        .evaluate(&sign_event("evt-1", 50_000.0, false))
        .await
        .unwrap()
        .decision;

    assert_eq!(decision.enforcement.mode, EnforcementMode::KillSwitch);
    assert_eq!(decision.enforcement.severity, Severity::Critical);
    assert_eq!(decision.enforcement.actions, vec!["halt_agent", "notify"]);
    assert!(decision.alignment.delta < 0.0);
}

#[tokio::test]
async fn score_stays_bounded_and_restrictions_follow_thresholds() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());

    let mut last = None;
    for i in 0..15 {
        let decision = engine
            .evaluate(&sign_event(&format!("evt-{i}"), 50_000.0, false))
            .await
            .unwrap()
            .decision;
        assert!((0.0..=1.0).contains(&decision.alignment.after));
        assert!(decision.alignment.after <= decision.alignment.before);
        last = Some(decision);
    }

    let last = last.unwrap();
    let state = last.state.unwrap();
    assert_eq!(last.alignment.after, 0.0);
    assert_eq!(state.consecutive_fails, 15);
    assert_eq!(
        state.restrictions.active,
        vec!["warning", "restricted", "quarantine", "ban"]
    );
}

#[tokio::test]
async fn pass_resets_fail_streak() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());

    engine.evaluate(&sign_event("evt-1", 50.0, false)).await.unwrap();
    engine.evaluate(&sign_event("evt-2", 50.0, false)).await.unwrap();
    let decision = engine
        .evaluate(&sign_event("evt-3", 50.0, true))
        .await
        .unwrap()
        .decision;

    assert_eq!(decision.state.unwrap().consecutive_fails, 0);
}

#[tokio::test]
async fn audit_chain_links_consecutive_decisions() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());

    let first = engine.evaluate(&sign_event("evt-1", 50.0, true)).await.unwrap().decision;
    let second = engine.evaluate(&sign_event("evt-2", 60.0, true)).await.unwrap().decision;

    let second_state = second.state.unwrap();
    assert_eq!(second_state.prev_audit_hash, first.audit_hash);
    assert_eq!(second_state.last_audit_hash, second.audit_hash);
    assert_ne!(first.audit_hash, second.audit_hash);
}

#[tokio::test]
async fn audit_failure_leaves_state_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(dir.path(), Arc::new(RejectingAuditWriter));

    let err = engine
        .evaluate(&sign_event("evt-1", 50_000.0, false))
        .await
        .unwrap_err();
    assert!(matches!(err, CaeError::Audit(AuditError::Rejected(_))));
    assert!(!err.is_retryable());

    let store = engine.store();
    assert!(store.get_agent("agent:alpha").await.unwrap().is_none());
    assert!(store.read_log().await.unwrap().is_empty());
}

#[tokio::test]
async fn malformed_event_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());

    let event = CanonicalEvent::from_value(json!({
        "event_type": "tx.sign_request",
        "actor": { "agent_id": "agent:alpha" }
    }))
    .unwrap();

    let err = engine.evaluate(&event).await.unwrap_err();
    assert!(matches!(err, CaeError::MalformedEvent(_)));
    assert!(err.to_string().contains("event_id"));
}

#[tokio::test]
async fn concurrent_evaluations_keep_one_chain() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(engine(dir.path()));

    let evaluations = futures::future::join_all((0..8).map(|i| {
        let engine = Arc::clone(&engine);
        async move {
            engine
                .evaluate(&sign_event(&format!("evt-{i}"), 10.0, true))
                .await
        }
    }))
    .await;
    assert!(evaluations.iter().all(|e| e.is_ok()));

    let store = engine.store();
    let log = store.read_log().await.unwrap();
    assert_eq!(log.len(), 8);

    let report = store.verify_chain("agent:alpha").await.unwrap();
    assert_eq!(report.entries, 8);
    assert!(report.is_intact());

    let agent = store.get_agent("agent:alpha").await.unwrap().unwrap();
    assert_eq!(agent.counters.spend_daily.count, 8);
    assert_eq!(agent.counters.spend_daily.total, 80.0);
    assert_eq!(agent.audit.last_audit_hash, log[7].audit_hash);
}

#[tokio::test]
async fn engine_loads_from_config_files() {
    let dir = tempfile::tempdir().unwrap();
    let config = CaeConfig::rooted_at(dir.path());
    std::fs::write(
        &config.constitution_path,
        serde_json::to_string(&constitution()).unwrap(),
    )
    .unwrap();
    std::fs::write(
        &config.parameters_path,
        serde_json::to_string(&parameters()).unwrap(),
    )
    .unwrap();

    let engine = ConstitutionalAlignmentEngine::from_config(&config).unwrap();
    assert_eq!(engine.constitution().article_count(), 4);

    let evaluation = engine.evaluate(&sign_event("evt-1", 50.0, true)).await.unwrap();
    assert!(evaluation.audit_file.starts_with(&config.audit_dir));
    assert!(config.state.registry_path().exists());
}

#[tokio::test]
async fn preflight_allows_compliant_request() {
    let dir = tempfile::tempdir().unwrap();
    let preflight = SignPreflight::new(Arc::new(engine(dir.path())));

    let response = preflight
        .check(&SignRequest::new(
            "agent:beta",
            json!({ "tx": { "amount": 10, "memo": "ok", "allowlisted": true }, "agent": { "level": "a2" } }),
        ))
        .await
        .unwrap();

    assert!(response.allowed());
    assert!(response.reason.is_none());
    assert!(response.ui.is_none());
    assert!(response.relevant_articles.is_empty());
    assert!(response.audit_hash.is_some());
    assert_eq!(response.agent_state.band, "nominal");
    assert_eq!(
        response.agent_state.audit_chain.last_audit_hash,
        response.audit_hash
    );
}

#[tokio::test]
async fn preflight_denies_on_policy() {
    let dir = tempfile::tempdir().unwrap();
    let preflight = SignPreflight::new(Arc::new(engine(dir.path())));

    let response = preflight
        .check(&SignRequest::new(
            "agent:beta",
            json!({ "tx": { "amount": 10, "memo": "ok" } }),
        ))
        .await
        .unwrap();

    assert!(!response.allowed());
    assert_eq!(
        response.reason.as_deref(),
        Some("Constitutional policy enforcement (revert_tx)")
    );
    assert_eq!(response.relevant_articles, vec!["CUSTODY/ALLOWLIST"]);
    assert_eq!(response.ui.unwrap().enforcement_mode, EnforcementMode::RevertTx);
    assert_eq!(response.agent_state.consecutive_fails, 1);
}

#[tokio::test]
async fn preflight_denies_on_capability() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(engine(dir.path()));
    engine
        .store()
        .upsert_agent("agent:gamma", AgentPatch::new().with_sign_mode(SignMode::Deny))
        .await
        .unwrap();

    let response = SignPreflight::new(engine)
        .check(&SignRequest::new(
            "agent:gamma",
            json!({ "tx": { "amount": 10, "memo": "ok", "allowlisted": true } }),
        ))
        .await
        .unwrap();

    assert!(!response.allowed());
    assert_eq!(
        response.reason.as_deref(),
        Some("Agent capabilities block signing (sign_mode=deny)")
    );
    assert_eq!(response.relevant_articles, vec!["CAPABILITY_GATING/TX_SIGN"]);
}

#[tokio::test]
async fn preflight_honours_a2a3_sign_mode_and_keeps_capabilities() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(engine(dir.path()));
    let patch = AgentPatch {
        capabilities: Some(
            serde_json::from_value(json!({ "sign_mode_A2A3": "deny", "can_stake": true }))
                .unwrap(),
        ),
        ..AgentPatch::new()
    };
    engine.store().upsert_agent("agent:gamma", patch).await.unwrap();

    let response = SignPreflight::new(Arc::clone(&engine))
        .check(&SignRequest::new(
            "agent:gamma",
            json!({ "tx": { "amount": 10, "memo": "ok", "allowlisted": true } }),
        ))
        .await
        .unwrap();

    assert!(!response.allowed());
    assert_eq!(
        response.reason.as_deref(),
        Some("Agent capabilities block signing (sign_mode=deny)")
    );

    let stored = engine.store().get_agent("agent:gamma").await.unwrap().unwrap();
    assert_eq!(
        serde_json::to_value(&stored.capabilities).unwrap(),
        json!({ "sign_mode_A2A3": "deny", "can_stake": true })
    );
}

#[tokio::test]
async fn preflight_rejects_bad_requests_without_state() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(engine(dir.path()));
    let preflight = SignPreflight::new(Arc::clone(&engine));

    let mut request = SignRequest::new("  ", json!({}));
    assert!(matches!(
        preflight.check(&request).await,
        Err(CaeError::InvalidRequest(_))
    ));

    request.agent_id = "agent:delta".into();
    request.event_type = "tx.broadcast".into();
    assert!(matches!(
        preflight.check(&request).await,
        Err(CaeError::InvalidRequest(_))
    ));
    assert!(engine.store().get_agent("agent:delta").await.unwrap().is_none());
}

#[tokio::test]
async fn agent_view_creates_default_record() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(engine(dir.path()));
    let preflight = SignPreflight::new(Arc::clone(&engine));

    let view = preflight.agent_view("agent:new").await.unwrap();
    assert_eq!(view.band, "nominal");
    assert_eq!(view.alignment.score, 1.0);
    assert!(view.restrictions.active.is_empty());
    assert!(view.audit_chain.last_audit_hash.is_none());
    assert!(engine.store().get_agent("agent:new").await.unwrap().is_some());
}
