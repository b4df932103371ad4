//! Agent state store behaviour against real files.

use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::json;

use cae::state::{StateError, TransitionLogEntry};
use cae::{
    AgentPatch, AgentStateStore, CanonicalEvent, Decision, ParameterSource, StateConfig, Verdict,
};
use constitution::{AlignmentOutcome, EnforcementOutcome, Parameters};

fn config(dir: &Path) -> StateConfig {
    StateConfig::in_dir(dir.join("state"))
}

fn store_with_file_params(dir: &Path) -> AgentStateStore {
    AgentStateStore::new(
        &config(dir),
        ParameterSource::File(dir.join("parameters.json")),
    )
}

fn write_params(dir: &Path, params: serde_json::Value) {
    std::fs::write(dir.join("parameters.json"), params.to_string()).unwrap();
}

fn event(id: &str, timestamp: &str, amount: Option<f64>) -> CanonicalEvent {
    let context = match amount {
        Some(a) => json!({ "tx": { "amount": a } }),
        None => json!({}),
    };
    CanonicalEvent::new(id, "tx.sign_request", timestamp, "agent:1")
        .with_level("A1")
        .with_context(context)
}

fn decision(event: &CanonicalEvent, delta: f64, hash: &str) -> Decision {
    let mut decision = Decision::new(
        &event.event_id,
        vec![],
        EnforcementOutcome::none(),
        AlignmentOutcome {
            before: 1.0,
            delta,
            after: 1.0 + delta,
        },
    );
    if delta < 0.0 {
        decision.verdict = Verdict::Enforce;
    }
    decision.audit_hash = Some(hash.to_string());
    decision
}

#[tokio::test]
async fn stale_lock_marker_times_out_without_touching_state() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path()).with_lock_budget(4, 2);
    let store = AgentStateStore::new(&cfg, ParameterSource::Fixed(Arc::new(Parameters::default())));

    store.upsert_agent("agent:1", AgentPatch::new()).await.unwrap();
    let before = std::fs::read_to_string(cfg.registry_path()).unwrap();

    // left behind by a crashed holder
    std::fs::write(cfg.lock_path(), b"").unwrap();

    let e = event("evt-1", "2024-01-01T00:00:00Z", Some(5.0));
    let err = store
        .apply_decision(&e, &decision(&e, -0.2, "h1"))
        .await
        .unwrap_err();
    assert!(matches!(err, StateError::LockTimeout { attempts: 4, .. }));
    assert!(err.is_retryable());

    assert_eq!(std::fs::read_to_string(cfg.registry_path()).unwrap(), before);
    assert!(cfg.lock_path().exists());

    std::fs::remove_file(cfg.lock_path()).unwrap();
    store.apply_decision(&e, &decision(&e, -0.2, "h1")).await.unwrap();
}

#[tokio::test]
async fn spend_counter_rolls_over_at_utc_midnight() {
    let dir = tempfile::tempdir().unwrap();
    write_params(
        dir.path(),
        json!({ "agent_limit_templates": { "A1": { "daily_limit": 250 } } }),
    );
    let store = store_with_file_params(dir.path());

    let e1 = event("evt-1", "2024-01-01T22:00:00Z", Some(100.0));
    let e2 = event("evt-2", "2024-01-01T23:59:59Z", Some(50.0));
    let e3 = event("evt-3", "2024-01-02T00:00:01+00:00", Some(7.0));

    store.apply_decision(&e1, &decision(&e1, 0.0, "h1")).await.unwrap();
    let s2 = store.apply_decision(&e2, &decision(&e2, 0.0, "h2")).await.unwrap();
    assert_eq!(s2.spend_daily.day_utc, NaiveDate::from_ymd_opt(2024, 1, 1));
    assert_eq!((s2.spend_daily.total, s2.spend_daily.count), (150.0, 2));
    assert_eq!(s2.spend_daily.limit, Some(250.0));

    let s3 = store.apply_decision(&e3, &decision(&e3, 0.0, "h3")).await.unwrap();
    assert_eq!(s3.spend_daily.day_utc, NaiveDate::from_ymd_opt(2024, 1, 2));
    assert_eq!((s3.spend_daily.total, s3.spend_daily.count), (7.0, 1));
    assert_eq!(s3.spend_daily.limit, Some(250.0));
}

#[tokio::test]
async fn event_without_amount_rolls_day_but_counts_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with_file_params(dir.path());

    let e1 = event("evt-1", "2024-01-01T10:00:00Z", Some(10.0));
    let e2 = event("evt-2", "2024-01-03T10:00:00Z", None);
    store.apply_decision(&e1, &decision(&e1, 0.0, "h1")).await.unwrap();
    let s2 = store.apply_decision(&e2, &decision(&e2, 0.0, "h2")).await.unwrap();

    assert_eq!(s2.spend_daily.day_utc, NaiveDate::from_ymd_opt(2024, 1, 3));
    assert_eq!((s2.spend_daily.total, s2.spend_daily.count), (0.0, 0));
    assert_eq!(s2.spend_daily.limit, None);
}

#[tokio::test]
async fn parameters_are_reread_on_each_mutation() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with_file_params(dir.path());

    // no parameters file: no thresholds
    let e1 = event("evt-1", "2024-01-01T00:00:00Z", None);
    let s1 = store.apply_decision(&e1, &decision(&e1, -0.5, "h1")).await.unwrap();
    assert!(s1.restrictions.active.is_empty());

    write_params(
        dir.path(),
        json!({ "alignment_score_thresholds": { "warning": 0.8, "restricted": 0.5, "ban": 0.1 } }),
    );
    let e2 = event("evt-2", "2024-01-01T00:01:00Z", None);
    let s2 = store.apply_decision(&e2, &decision(&e2, 0.0, "h2")).await.unwrap();
    assert_eq!(s2.restrictions.active, vec!["warning", "restricted"]);
    assert!(!s2.restrictions.quarantine);
}

#[tokio::test]
async fn schema_override_is_enforced() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let store = store_with_file_params(dir.path());
    store.load_state().await.unwrap();

    std::fs::write(
        cfg.schema_path(),
        json!({
            "required": ["version", "updated_at", "agents", "owner"],
            "properties": { "owner": { "type": "string" } }
        })
        .to_string(),
    )
    .unwrap();

    let err = store.load_state().await.unwrap_err();
    assert!(matches!(err, StateError::InvalidState { ref location, .. } if location == "owner"));

    std::fs::remove_file(cfg.schema_path()).unwrap();
    store.load_state().await.unwrap();
}

#[tokio::test]
async fn rejected_save_keeps_prior_file() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let store = store_with_file_params(dir.path());
    store.upsert_agent("agent:1", AgentPatch::new()).await.unwrap();
    let before = std::fs::read_to_string(cfg.registry_path()).unwrap();

    std::fs::write(
        cfg.schema_path(),
        json!({ "required": ["version", "updated_at", "agents", "owner"] }).to_string(),
    )
    .unwrap();

    let state: cae::state::RegistryState = serde_json::from_str(&before).unwrap();
    assert!(store.save_state(state).await.is_err());
    assert_eq!(std::fs::read_to_string(cfg.registry_path()).unwrap(), before);
}

#[tokio::test]
async fn save_state_stamps_updated_at() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with_file_params(dir.path());
    let state = store.load_state().await.unwrap();
    let stamp = state.updated_at;

    let saved = store.save_state(state).await.unwrap();
    assert!(saved.updated_at >= stamp);
    assert_eq!(store.load_state().await.unwrap(), saved);
}

#[tokio::test]
async fn verify_chain_reports_tampered_log() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with_file_params(dir.path());

    for (i, hash) in ["h1", "h2", "h3"].iter().enumerate() {
        let e = event(&format!("evt-{i}"), "2024-01-01T00:00:00Z", None);
        store.apply_decision(&e, &decision(&e, 0.0, hash)).await.unwrap();
    }
    assert!(store.verify_chain("agent:1").await.unwrap().is_intact());

    let raw = std::fs::read_to_string(store.log_path()).unwrap();
    let mut entries: Vec<TransitionLogEntry> = raw
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    entries[2].prev_audit_hash = Some("forged".into());
    let forged: String = entries
        .iter()
        .map(|e| serde_json::to_string(e).unwrap() + "\n")
        .collect();
    std::fs::write(store.log_path(), forged).unwrap();

    let report = store.verify_chain("agent:1").await.unwrap();
    let broken = report.broken_at.unwrap();
    assert_eq!(broken.index, 2);
    assert_eq!(broken.expected_prev.as_deref(), Some("h2"));
    assert_eq!(broken.found_prev.as_deref(), Some("forged"));
}

#[tokio::test]
async fn corrupt_log_line_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with_file_params(dir.path());
    store.load_state().await.unwrap();
    std::fs::write(store.log_path(), "{not json\n").unwrap();

    assert!(matches!(
        store.read_log().await,
        Err(StateError::Serialization(_))
    ));
}

#[tokio::test]
async fn log_entry_mirrors_transition() {
    let dir = tempfile::tempdir().unwrap();
    write_params(
        dir.path(),
        json!({ "alignment_score_thresholds": { "warning": 0.9 } }),
    );
    let store = store_with_file_params(dir.path());

    let e = event("evt-1", "2024-01-01T00:00:00Z", Some(3.0));
    let d = decision(&e, -0.25, "h1");
    let summary = store.apply_decision(&e, &d).await.unwrap();

    let log = store.read_log().await.unwrap();
    let entry = &log[0];
    assert_eq!(entry.event_id, "evt-1");
    assert_eq!(entry.decision_id, d.decision_id);
    assert_eq!(entry.verdict, Verdict::Enforce);
    assert_eq!(entry.score_before, 1.0);
    assert_eq!(entry.score_delta, -0.25);
    assert_eq!(entry.score_after, 0.75);
    assert_eq!(entry.restrictions_active, vec!["warning"]);
    assert_eq!(entry.consecutive_fails, 1);
    assert_eq!(entry.spend_daily, summary.spend_daily);
    assert_eq!(entry.prev_audit_hash, None);
    assert_eq!(entry.audit_hash.as_deref(), Some("h1"));
}

#[tokio::test]
async fn spend_total_resets_on_the_next_utc_day() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with_file_params(dir.path());

    let e1 = event("evt-1", "2024-01-01T12:00:00Z", Some(500.0));
    let s1 = store.apply_decision(&e1, &decision(&e1, 0.0, "h1")).await.unwrap();
    assert_eq!(s1.spend_daily.day_utc, NaiveDate::from_ymd_opt(2024, 1, 1));
    assert_eq!(s1.spend_daily.total, 500.0);

    let e2 = event("evt-2", "2024-01-02T00:00:01Z", Some(10.0));
    let s2 = store.apply_decision(&e2, &decision(&e2, 0.0, "h2")).await.unwrap();
    assert_eq!(s2.spend_daily.day_utc, NaiveDate::from_ymd_opt(2024, 1, 2));
    assert_eq!((s2.spend_daily.total, s2.spend_daily.count), (10.0, 1));
}

#[tokio::test]
async fn stored_score_matches_reported_score_exactly() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with_file_params(dir.path());

    let e1 = event("evt-1", "2024-01-01T00:00:00Z", None);
    let s1 = store.apply_decision(&e1, &decision(&e1, -0.08, "h1")).await.unwrap();
    assert_eq!(s1.alignment.after, 1.0 - 0.08);

    let agent = store.get_agent("agent:1").await.unwrap().unwrap();
    assert_eq!(agent.alignment_score.to_bits(), s1.alignment.after.to_bits());

    let e2 = event("evt-2", "2024-01-01T00:01:00Z", None);
    let s2 = store.apply_decision(&e2, &decision(&e2, 0.0, "h2")).await.unwrap();
    assert_eq!(s2.alignment.before.to_bits(), s1.alignment.after.to_bits());

    let log = store.read_log().await.unwrap();
    assert_eq!(log[0].score_after.to_bits(), s1.alignment.after.to_bits());
}

#[tokio::test]
async fn ill_typed_agent_field_is_invalid_state() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let store = store_with_file_params(dir.path());
    store.upsert_agent("agent:1", AgentPatch::new()).await.unwrap();

    let mut raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(cfg.registry_path()).unwrap()).unwrap();
    raw["agents"]["agent:1"]["consecutive_fails"] = json!(1.5);
    std::fs::write(cfg.registry_path(), raw.to_string()).unwrap();

    let err = store.load_state().await.unwrap_err();
    assert!(matches!(err, StateError::InvalidState { ref location, .. } if location == "registry"));

    raw["agents"]["agent:1"]["consecutive_fails"] = json!(0);
    raw["agents"]["agent:1"]["created_at"] = json!("yesterday");
    std::fs::write(cfg.registry_path(), raw.to_string()).unwrap();
    assert!(matches!(
        store.load_state().await,
        Err(StateError::InvalidState { .. })
    ));
}
