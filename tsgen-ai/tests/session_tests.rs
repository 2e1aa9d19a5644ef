//! Session Workflow Tests
//! Test File: session_tests.rs
//!
//! Extraction through review to finalize, driven by a scripted model.

mod helpers;

use helpers::{
    claim, manager_from, manager_with, resolve_everything, CountingRenderer, GatedModelClient,
    ScriptedModelClient, StaticSourceBuilder, DEAL_FILE, POLICY_FILE, REFERENCE_FILE,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tsgen_ai::outputs::OutputWriter;
use tsgen_ai::session::{DecisionKind, EngineError, SessionState};
use tsgen_ai::types::{Confidence, FieldValue, ReviewPriority, SourceRef};
use tsgen_common::events::SessionEvent;

fn economics_reply() -> serde_json::Value {
    json!({
        "investment_amount": claim(json!(5_000_000), DEAL_FILE, "B5", 1.0),
        "pre_money_valuation": {
            "value": 20_000_000,
            "source": "Model.csv!B6",
            "confidence": 1.0,
            "reasoning": "Stated in the deal model"
        },
        "target_ownership_pct": claim(json!(20), DEAL_FILE, "B9", 0.0),
    })
}

fn transaction_reply() -> serde_json::Value {
    json!({
        "exclusivity_days": {
            "value": 30,
            "source": {"file": DEAL_FILE, "location": "B20"},
            "confidence": 1.0,
            "conflicts": [
                {"value": 45, "source": {"file": POLICY_FILE, "location": "Section 5.1"}, "confidence": 0.0}
            ]
        },
        "legal_fee_cap": claim(json!(25000), POLICY_FILE, "Section 5.2", 0.0),
        "governing_law": claim(json!("Delaware"), REFERENCE_FILE, "Governing law", 1.0),
    })
}

/// TC-SESSION-001: Explicit single-source value resolves
#[tokio::test]
async fn tc_session_001_explicit_deal_value_resolves() {
    // Given: deal model states the investment amount once
    let client = ScriptedModelClient::new().reply("deal_economics", economics_reply());
    let manager = manager_with(client, StaticSourceBuilder::standard(), Arc::new(CountingRenderer::default()));
    let id = manager.start("term_sheet").await.unwrap();

    // When: extraction runs
    let summary = manager.run(id).await.unwrap();

    // Then: value set, resolved, no conflicts
    assert_eq!(summary.state, SessionState::Reviewing);
    let session = manager.get(id).await.unwrap();
    let field = session.fields().get("deal_economics", "investment_amount").unwrap();
    assert_eq!(field.value, Some(FieldValue::Number(5_000_000.0)));
    assert_eq!(field.confidence, Confidence::Resolved);
    assert!(field.conflicts.is_empty());
    assert!(field.found);
    assert_eq!(field.source, Some(SourceRef::new(DEAL_FILE, "B5")));

    // String citation resolves the same way
    let valuation = session.fields().get("deal_economics", "pre_money_valuation").unwrap();
    assert_eq!(valuation.confidence, Confidence::Resolved);
    assert_eq!(valuation.source, Some(SourceRef::new(DEAL_FILE, "B6")));

    // Claimed 0.0 stays unresolved even from the deal model
    let ownership = session.fields().get("deal_economics", "target_ownership_pct").unwrap();
    assert_eq!(ownership.confidence, Confidence::Unresolved);
    assert_eq!(ownership.review_priority(), ReviewPriority::Decide);
}

/// TC-SESSION-002: Deal value beats policy value; loser kept as conflict
#[tokio::test]
async fn tc_session_002_deal_beats_policy_with_conflict() {
    // Given: deal model says 30 days, firm policy says 45
    let client = ScriptedModelClient::new().reply("transaction_terms", transaction_reply());
    let manager = manager_with(client, StaticSourceBuilder::standard(), Arc::new(CountingRenderer::default()));
    let id = manager.start("term_sheet").await.unwrap();

    // When: extraction runs
    manager.run(id).await.unwrap();

    // Then: deal value accepted, policy value surfaced, field held for review
    let session = manager.get(id).await.unwrap();
    let field = session.fields().get("transaction_terms", "exclusivity_days").unwrap();
    assert_eq!(field.value, Some(FieldValue::Number(30.0)));
    assert_eq!(field.conflicts.len(), 1);
    assert_eq!(field.conflicts[0].value, json!(45));
    assert_eq!(field.conflicts[0].source.file, POLICY_FILE);
    assert_eq!(field.confidence, Confidence::Unresolved);

    // The accepted pair never appears among the conflicts
    assert!(!field
        .conflicts
        .iter()
        .any(|c| c.value == json!(30) && c.source.file == DEAL_FILE));

    // Policy default is flagged and unresolved
    let fee = session.fields().get("transaction_terms", "legal_fee_cap").unwrap();
    assert!(fee.derived_from_policy);
    assert_eq!(fee.confidence, Confidence::Unresolved);

    // Reference-only value is never accepted
    let law = session.fields().get("transaction_terms", "governing_law").unwrap();
    assert!(law.value.is_none());
    assert_eq!(law.conflicts.len(), 1);
    assert_eq!(law.conflicts[0].source.file, REFERENCE_FILE);
    assert_eq!(law.confidence, Confidence::Unresolved);

    // Conflict snapshot recorded for the artifact
    assert!(session
        .extraction_conflicts
        .iter()
        .any(|c| c.field == "exclusivity_days"));
}

/// TC-SESSION-003: Field absent from every source
#[tokio::test]
async fn tc_session_003_absent_field_not_found() {
    // Given: the model reports nothing for parties
    let manager = manager_with(
        ScriptedModelClient::new(),
        StaticSourceBuilder::standard(),
        Arc::new(CountingRenderer::default()),
    );
    let id = manager.start("term_sheet").await.unwrap();

    // When: extraction runs
    let summary = manager.run(id).await.unwrap();

    // Then: not found, null, unresolved, reported missing
    let session = manager.get(id).await.unwrap();
    let field = session.fields().get("parties", "company_name").unwrap();
    assert!(!field.found);
    assert!(field.value.is_none());
    assert_eq!(field.confidence.as_f64(), 0.0);
    assert_eq!(field.review_priority(), ReviewPriority::Missing);
    assert!(summary
        .missing_required
        .contains(&"parties.company_name".to_string()));
}

/// TC-SESSION-004: User edit resolves the field and logs one decision
#[tokio::test]
async fn tc_session_004_user_edit_resolves() {
    // Given: target ownership extracted with confidence 0.0
    let client = ScriptedModelClient::new().reply("deal_economics", economics_reply());
    let manager = manager_with(client, StaticSourceBuilder::standard(), Arc::new(CountingRenderer::default()));
    let id = manager.start("term_sheet").await.unwrap();
    manager.run(id).await.unwrap();

    // When: the user sets "20%"
    let updated = manager
        .update_field(id, "deal_economics", "target_ownership_pct", json!("20%"), Some("term sheet call".into()))
        .await
        .unwrap();

    // Then: resolved with user_input source and one new log entry
    assert_eq!(updated.value, Some(FieldValue::Number(20.0)));
    assert_eq!(updated.confidence, Confidence::Resolved);
    assert_eq!(updated.source, Some(SourceRef::user_input()));
    assert!(updated.conflicts.is_empty());
    assert!(updated.user_edited);

    let session = manager.get(id).await.unwrap();
    assert_eq!(session.decision_log().len(), 1);
    let entry = &session.decision_log()[0];
    assert_eq!(entry.kind, DecisionKind::FieldEdit);
    assert_eq!(entry.old_value, Some(FieldValue::Number(20.0)));
    assert_eq!(entry.new_value, Some(FieldValue::Number(20.0)));
    assert_eq!(entry.reason.as_deref(), Some("term sheet call"));
}

/// TC-SESSION-005: Finalize with every field resolved renders once
#[tokio::test]
async fn tc_session_005_finalize_renders_once() {
    // Given: every field resolved by the reviewer
    let renderer = Arc::new(CountingRenderer::default());
    let client = ScriptedModelClient::new()
        .reply("deal_economics", economics_reply())
        .reply("transaction_terms", transaction_reply());
    let manager = manager_with(client, StaticSourceBuilder::standard(), renderer.clone());
    let id = manager.start("term_sheet").await.unwrap();
    manager.run(id).await.unwrap();
    manager
        .resolve_conflict(id, "transaction_terms", "exclusivity_days", 0, None)
        .await
        .unwrap();
    resolve_everything(&manager, id).await;
    assert!(manager.can_finalize(id).await.unwrap());

    // When: finalize
    let artifacts = manager.finalize(id).await.unwrap();

    // Then: COMPLETE, renderer invoked exactly once in final mode
    assert_eq!(renderer.final_count(), 1);
    let session = manager.get(id).await.unwrap();
    assert_eq!(session.state(), SessionState::Complete);
    assert_eq!(session.document.as_deref(), Some(artifacts.document.as_str()));
    assert!(artifacts.document.contains("Acme Robotics, Inc."));
    assert!(!artifacts.document.contains("NEEDS REVIEW"));

    // Conflict picked by the reviewer is reported as user_selected
    let exclusivity = artifacts
        .conflicts
        .iter()
        .find(|c| c.field == "transaction_terms.exclusivity_days")
        .unwrap();
    assert_eq!(exclusivity.resolution, "user_selected");
    assert_eq!(exclusivity.resolved_value, Some(FieldValue::Number(45.0)));
    assert_eq!(artifacts.decisions[0].kind, DecisionKind::ConflictResolution);

    // Execution log totals every section call
    assert_eq!(artifacts.execution.model_calls, 7);
    assert_eq!(artifacts.execution.input_tokens, 7000);
    assert!(artifacts.execution.estimated_cost_usd > 0.0);

    // Second finalize is rejected
    assert!(matches!(
        manager.finalize(id).await,
        Err(EngineError::InvalidState { .. })
    ));
}

/// TC-SESSION-006: Unresolved field blocks finalize
#[tokio::test]
async fn tc_session_006_not_ready_stays_reviewing() {
    // Given: everything resolved except exclusivity_days
    let renderer = Arc::new(CountingRenderer::default());
    let client = ScriptedModelClient::new().reply("transaction_terms", transaction_reply());
    let manager = manager_with(client, StaticSourceBuilder::standard(), renderer.clone());
    let id = manager.start("term_sheet").await.unwrap();
    manager.run(id).await.unwrap();

    let session = manager.get(id).await.unwrap();
    for (section, field, f) in session.fields().iter() {
        if f.is_resolved() || field == "exclusivity_days" {
            continue;
        }
        let value = match field {
            "company_name" => Some(json!("Acme")),
            "investment_amount" | "pre_money_valuation" => Some(json!(1_000_000)),
            "security_type" => Some(json!("SAFE")),
            "liquidation_preference_multiple" => Some(json!(1)),
            _ => None,
        };
        match value {
            Some(value) => manager.update_field(id, section, field, value, None).await.unwrap(),
            None => manager.confirm_field(id, section, field, None).await.unwrap(),
        };
    }

    // When: finalize
    let err = manager.finalize(id).await.unwrap_err();

    // Then: NotReady lists exactly that field; still REVIEWING; nothing rendered
    match err {
        EngineError::NotReady { fields, .. } => {
            assert_eq!(fields, vec!["transaction_terms.exclusivity_days".to_string()]);
        }
        other => panic!("expected NotReady, got {:?}", other),
    }
    assert_eq!(manager.get(id).await.unwrap().state(), SessionState::Reviewing);
    assert_eq!(renderer.final_count(), 0);
    assert!(!manager.can_finalize(id).await.unwrap());
}

/// TC-SESSION-007: Same update twice gives two log entries
#[tokio::test]
async fn tc_session_007_double_update_logs_twice() {
    let manager = manager_with(
        ScriptedModelClient::new(),
        StaticSourceBuilder::standard(),
        Arc::new(CountingRenderer::default()),
    );
    let id = manager.start("term_sheet").await.unwrap();
    manager.run(id).await.unwrap();

    for _ in 0..2 {
        manager
            .update_field(id, "transaction_terms", "exclusivity_days", json!(45), None)
            .await
            .unwrap();
    }

    let session = manager.get(id).await.unwrap();
    let field = session.fields().get("transaction_terms", "exclusivity_days").unwrap();
    assert!(field.is_resolved());
    assert!(field.user_edited);
    assert!(field.conflicts.is_empty());
    assert_eq!(session.decision_log().len(), 2);
    assert_eq!(session.decision_log()[0].old_value, None);
    assert_eq!(session.decision_log()[1].old_value, Some(FieldValue::Number(45.0)));
}

/// TC-SESSION-008: Failed sections degrade and the run continues
#[tokio::test]
async fn tc_session_008_section_failures_degrade() {
    // Given: one section errors, one times out, one returns garbage
    let client = ScriptedModelClient::new()
        .fail("parties")
        .timeout("governance")
        .raw("founder_terms", "I could not find anything, sorry.")
        .reply("deal_economics", economics_reply());
    let manager = manager_with(client, StaticSourceBuilder::standard(), Arc::new(CountingRenderer::default()));
    let id = manager.start("term_sheet").await.unwrap();
    let mut events = manager.event_bus().subscribe();

    // When: extraction runs
    let summary = manager.run(id).await.unwrap();

    // Then: REVIEWING, three failures, later sections still extracted
    assert_eq!(summary.state, SessionState::Reviewing);
    assert_eq!(summary.sections_failed, 3);

    let session = manager.get(id).await.unwrap();
    assert_eq!(session.progress.sections_attempted, 7);
    assert_eq!(session.model_calls.len(), 7);
    assert_eq!(session.model_calls.iter().filter(|c| !c.success).count(), 3);
    let board = session.fields().get("governance", "board_seats_total").unwrap();
    assert!(!board.found);
    assert!(board.value.is_none());
    assert!(board.reasoning.as_deref().unwrap().contains("timed out"));
    assert!(session
        .fields()
        .get("deal_economics", "investment_amount")
        .unwrap()
        .is_resolved());

    let mut failed = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::SectionFailed { section, .. } = event {
            failed.push(section);
        }
    }
    assert_eq!(failed, vec!["parties", "governance", "founder_terms"]);
}

/// TC-SESSION-009: Source build failure degrades every section
#[tokio::test]
async fn tc_session_009_sources_unavailable() {
    let manager = manager_with(
        ScriptedModelClient::new(),
        StaticSourceBuilder::unavailable(),
        Arc::new(CountingRenderer::default()),
    );
    let id = manager.start("term_sheet").await.unwrap();

    let summary = manager.run(id).await.unwrap();

    assert_eq!(summary.state, SessionState::Reviewing);
    assert_eq!(summary.sections_failed, 7);
    assert_eq!(summary.resolved, 0);
    assert!(manager.get(id).await.unwrap().model_calls.is_empty());
}

/// TC-SESSION-010: State gates
#[tokio::test]
async fn tc_session_010_state_gates() {
    let manager = manager_with(
        ScriptedModelClient::new(),
        StaticSourceBuilder::standard(),
        Arc::new(CountingRenderer::default()),
    );

    // Unknown document type
    assert!(matches!(
        manager.start("nda").await,
        Err(EngineError::UnknownDocumentType(_))
    ));

    let id = manager.start("term_sheet").await.unwrap();

    // Edits and preview before extraction
    assert!(matches!(
        manager.update_field(id, "parties", "company_name", json!("Acme"), None).await,
        Err(EngineError::InvalidState { actual: SessionState::Init, .. })
    ));
    assert!(matches!(manager.preview(id).await, Err(EngineError::InvalidState { .. })));

    manager.run(id).await.unwrap();

    // Re-running is rejected
    assert!(matches!(
        manager.run(id).await,
        Err(EngineError::InvalidState { actual: SessionState::Reviewing, .. })
    ));

    // Unknown field, bad value, blank required, missing conflict
    assert!(matches!(
        manager.update_field(id, "parties", "ceo", json!("x"), None).await,
        Err(EngineError::FieldNotFound { .. })
    ));
    assert!(matches!(
        manager.update_field(id, "deal_economics", "investment_amount", json!("five million"), None).await,
        Err(EngineError::InvalidValue { .. })
    ));
    assert!(matches!(
        manager.update_field(id, "deal_economics", "security_type", json!("Series Z"), None).await,
        Err(EngineError::InvalidValue { .. })
    ));
    assert!(matches!(
        manager.confirm_field(id, "parties", "company_name", None).await,
        Err(EngineError::InvalidValue { .. })
    ));
    assert!(matches!(
        manager.resolve_conflict(id, "parties", "company_name", 0, None).await,
        Err(EngineError::ConflictNotFound { .. })
    ));

    // Optional field may be confirmed blank
    let blank = manager
        .confirm_field(id, "signatures", "effective_date", None)
        .await
        .unwrap();
    assert!(blank.is_resolved());
    assert!(blank.value.is_none());

    // Rejected edits leave no trace in the log
    assert_eq!(manager.get(id).await.unwrap().decision_log().len(), 1);

    // Unknown session
    assert!(matches!(
        manager.get(uuid::Uuid::new_v4()).await,
        Err(EngineError::SessionNotFound(_))
    ));
}

/// TC-SESSION-011: Render failure keeps the session reviewable
#[tokio::test]
async fn tc_session_011_render_failure_stays_reviewing() {
    let renderer = Arc::new(CountingRenderer::failing());
    let manager = manager_with(ScriptedModelClient::new(), StaticSourceBuilder::standard(), renderer.clone());
    let id = manager.start("term_sheet").await.unwrap();
    manager.run(id).await.unwrap();
    resolve_everything(&manager, id).await;

    let err = manager.finalize(id).await.unwrap_err();

    assert!(matches!(err, EngineError::RenderFailed { .. }));
    assert_eq!(renderer.final_count(), 1);
    assert_eq!(manager.get(id).await.unwrap().state(), SessionState::Reviewing);
}

/// TC-SESSION-012: Sessions never share field stores
#[tokio::test]
async fn tc_session_012_sessions_are_independent() {
    let manager = manager_with(
        ScriptedModelClient::new(),
        StaticSourceBuilder::standard(),
        Arc::new(CountingRenderer::default()),
    );
    let a = manager.start("term_sheet").await.unwrap();
    let b = manager.start("term_sheet").await.unwrap();

    let (ra, rb) = tokio::join!(manager.run(a), manager.run(b));
    ra.unwrap();
    rb.unwrap();

    manager
        .update_field(a, "parties", "company_name", json!("Alpha"), None)
        .await
        .unwrap();

    let other = manager.get(b).await.unwrap();
    assert!(other.fields().get("parties", "company_name").unwrap().value.is_none());
    assert!(other.decision_log().is_empty());
    assert_eq!(manager.list().await.len(), 2);

    manager.delete(a).await.unwrap();
    assert!(matches!(manager.get(a).await, Err(EngineError::SessionNotFound(_))));
    assert_eq!(manager.list().await.len(), 1);
}

/// TC-SESSION-013: Finalize writes every artifact
#[tokio::test]
async fn tc_session_013_artifacts_written() {
    let dir = tempfile::tempdir().unwrap();
    let renderer = Arc::new(CountingRenderer::default());
    let client = ScriptedModelClient::new().reply("deal_economics", economics_reply());
    let engine = tsgen_ai::extraction::ExtractionEngine::new(
        Arc::new(client),
        Arc::new(StaticSourceBuilder::standard()),
    );
    let manager = tsgen_ai::session::SessionManager::new(
        Arc::new(tsgen_ai::schema::SchemaRegistry::with_builtin().unwrap()),
        Arc::new(engine),
        renderer,
        tsgen_common::events::EventBus::new(64),
    )
    .with_output(OutputWriter::new(dir.path()));

    let id = manager.start("term_sheet").await.unwrap();
    manager.run(id).await.unwrap();
    resolve_everything(&manager, id).await;
    manager.finalize(id).await.unwrap();

    let session_dir = dir.path().join(id.to_string());
    for name in [
        "extracted_data.json",
        "conflicts.json",
        "user_decisions.json",
        "term_sheet.md",
        "execution_log.json",
    ] {
        assert!(session_dir.join(name).exists(), "{} missing", name);
    }

    let extracted: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(session_dir.join("extracted_data.json")).unwrap()).unwrap();
    assert_eq!(
        extracted["sections"]["deal_economics"]["investment_amount"]["confidence"],
        1.0
    );
    assert_eq!(extracted["sections"]["deal_economics"]["investment_amount"]["value"], 5_000_000.0);
}

/// TC-SESSION-014: Every confidence in every record is 0.0 or 1.0
#[tokio::test]
async fn tc_session_014_confidence_is_binary_in_records() {
    let client = ScriptedModelClient::new()
        .reply("deal_economics", json!({
            "investment_amount": claim(json!(5_000_000), DEAL_FILE, "B5", 0.85),
            "pre_money_valuation": claim(json!(20_000_000), DEAL_FILE, "B6", 1.0),
        }))
        .reply("transaction_terms", transaction_reply());
    let manager = manager_with(client, StaticSourceBuilder::standard(), Arc::new(CountingRenderer::default()));
    let id = manager.start("term_sheet").await.unwrap();
    manager.run(id).await.unwrap();

    let session = manager.get(id).await.unwrap();
    // A 0.85 claim is never rounded up
    assert_eq!(
        session.fields().get("deal_economics", "investment_amount").unwrap().confidence,
        Confidence::Unresolved
    );

    let json = serde_json::to_value(session.fields()).unwrap();
    for section in json.as_object().unwrap().values() {
        for field in section.as_object().unwrap().values() {
            let c = field["confidence"].as_f64().unwrap();
            assert!(c == 0.0 || c == 1.0);
            for conflict in field["conflicts"].as_array().unwrap() {
                let c = conflict["confidence"].as_f64().unwrap();
                assert!(c == 0.0 || c == 1.0);
            }
        }
    }
}

/// TC-SESSION-015: Every state change is announced once, in order
#[tokio::test]
async fn tc_session_015_state_changes_announced() {
    let client = ScriptedModelClient::new().reply("deal_economics", economics_reply());
    let manager = manager_with(client, StaticSourceBuilder::standard(), Arc::new(CountingRenderer::default()));
    let mut events = manager.event_bus().subscribe();
    let id = manager.start("term_sheet").await.unwrap();

    manager.run(id).await.unwrap();
    resolve_everything(&manager, id).await;
    manager.finalize(id).await.unwrap();

    let mut changes = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::StateChanged { session_id, from, to, .. } = event {
            assert_eq!(session_id, id);
            changes.push((from, to));
        }
    }
    let pairs: Vec<(&str, &str)> = changes.iter().map(|(f, t)| (f.as_str(), t.as_str())).collect();
    assert_eq!(
        pairs,
        vec![
            ("INIT", "EXTRACTING"),
            ("EXTRACTING", "REVIEWING"),
            ("REVIEWING", "COMPLETE"),
        ]
    );
}

/// TC-SESSION-016: Concurrent finalize calls render and write once
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tc_session_016_concurrent_finalize_renders_once() {
    // Given: a resolved session and a final render that takes a while
    let dir = tempfile::tempdir().unwrap();
    let renderer = Arc::new(CountingRenderer::slow(Duration::from_millis(150)));
    let manager = manager_from(
        Arc::new(ScriptedModelClient::new().reply("deal_economics", economics_reply())),
        StaticSourceBuilder::standard(),
        renderer.clone(),
        Some(OutputWriter::new(dir.path())),
    );
    let id = manager.start("term_sheet").await.unwrap();
    manager.run(id).await.unwrap();
    resolve_everything(&manager, id).await;

    // When: two finalize calls race on separate worker threads
    let first = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.finalize(id).await })
    };
    let second = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.finalize(id).await })
    };
    let results = vec![first.await.unwrap(), second.await.unwrap()];

    // Then: one winner, one rejection, a single final render
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let rejected = results.into_iter().find_map(|r| r.err()).unwrap();
    assert!(matches!(
        rejected,
        EngineError::FinalizeInProgress(_)
            | EngineError::InvalidState { actual: SessionState::Complete, .. }
    ));
    assert_eq!(renderer.final_count(), 1);
    assert_eq!(manager.get(id).await.unwrap().state(), SessionState::Complete);
    assert!(dir.path().join(id.to_string()).join("term_sheet.md").exists());
}

/// TC-SESSION-017: Edits arriving during finalize are refused, artifacts stay consistent
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tc_session_017_edit_during_finalize_refused() {
    // Given: a resolved session whose final render is in progress
    let dir = tempfile::tempdir().unwrap();
    let renderer = Arc::new(CountingRenderer::slow(Duration::from_millis(150)));
    let manager = manager_from(
        Arc::new(ScriptedModelClient::new().reply("deal_economics", economics_reply())),
        StaticSourceBuilder::standard(),
        renderer.clone(),
        Some(OutputWriter::new(dir.path())),
    );
    let id = manager.start("term_sheet").await.unwrap();
    manager.run(id).await.unwrap();
    resolve_everything(&manager, id).await;

    let finalizing = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.finalize(id).await })
    };
    renderer.wait_for_final().await;

    // When: an edit lands while the render holds the session
    let edit = manager
        .update_field(id, "parties", "company_name", json!("Other Corp"), None)
        .await;

    // Then: the edit is refused and nothing in the artifacts diverges
    assert!(matches!(
        edit,
        Err(EngineError::FinalizeInProgress(_))
            | Err(EngineError::InvalidState { actual: SessionState::Complete, .. })
    ));
    let artifacts = finalizing.await.unwrap().unwrap();
    let session = manager.get(id).await.unwrap();
    assert_eq!(artifacts.decisions.len(), session.decision_log().len());
    assert_eq!(
        artifacts.fields.get("parties", "company_name").unwrap().value,
        session.fields().get("parties", "company_name").unwrap().value
    );
    assert!(!artifacts.document.contains("Other Corp"));
    assert_eq!(session.document.as_deref(), Some(artifacts.document.as_str()));
    assert_eq!(session.finalized_at, Some(artifacts.execution.finalized_at));
    assert!(!session.is_finalizing());
}

/// TC-SESSION-018: EXTRACTING refuses edits, finalize, preview and a second run
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tc_session_018_extracting_gate() {
    // Given: a run parked inside its first model call
    let client = Arc::new(GatedModelClient::new());
    let manager = manager_from(
        client.clone(),
        StaticSourceBuilder::standard(),
        Arc::new(CountingRenderer::default()),
        None,
    );
    let id = manager.start("term_sheet").await.unwrap();
    let running = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.run(id).await })
    };
    client.entered.notified().await;
    assert_eq!(manager.get(id).await.unwrap().state(), SessionState::Extracting);

    // When / Then: every review operation is rejected with the live state
    let extracting = |result: &Result<_, EngineError>| {
        matches!(
            result,
            Err(EngineError::InvalidState { actual: SessionState::Extracting, .. })
        )
    };
    assert!(extracting(
        &manager
            .update_field(id, "parties", "company_name", json!("Acme"), None)
            .await
            .map(|_| ())
    ));
    assert!(extracting(
        &manager.confirm_field(id, "parties", "company_name", None).await.map(|_| ())
    ));
    assert!(extracting(&manager.finalize(id).await.map(|_| ())));
    assert!(extracting(&manager.preview(id).await.map(|_| ())));
    assert!(extracting(&manager.run(id).await.map(|_| ())));
    assert!(manager.get(id).await.unwrap().decision_log().is_empty());

    // Releasing the model lets the run finish normally
    client.release.notify_one();
    let summary = running.await.unwrap().unwrap();
    assert_eq!(summary.state, SessionState::Reviewing);
    assert_eq!(manager.get(id).await.unwrap().progress.sections_attempted, 7);
}

/// TC-SESSION-019: Only the first begin_run claims the session
#[tokio::test]
async fn tc_session_019_begin_run_claims_once() {
    let manager = manager_with(
        ScriptedModelClient::new(),
        StaticSourceBuilder::standard(),
        Arc::new(CountingRenderer::default()),
    );
    let id = manager.start("term_sheet").await.unwrap();

    let run = manager.begin_run(id).await.unwrap();
    assert_eq!(run.session_id(), id);
    assert_eq!(manager.get(id).await.unwrap().state(), SessionState::Extracting);
    assert!(matches!(
        manager.begin_run(id).await,
        Err(EngineError::InvalidState { actual: SessionState::Extracting, .. })
    ));

    let summary = manager.complete_run(run).await.unwrap();
    assert_eq!(summary.state, SessionState::Reviewing);
}
