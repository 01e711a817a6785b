//! End-to-end conversations through the engine with a scripted LLM

mod common;

use common::*;
use parts_common::{ClarificationKind, Fit, PendingSlot, ResponseType};
use partsd::config::Config;
use partsd::llm::FakeLlmBackend;
use std::sync::Arc;

const ICE_MAKER: &str = "My ice maker isn't working";
const CONTINUATION_MODEL: &str = "106.50522500";

fn ice_maker_plan() -> String {
    plan_json(
        "symptom_troubleshoot",
        0.85,
        Some("ice maker not working"),
        Some("refrigerator"),
        None,
        None,
    )
}

#[tokio::test]
async fn test_install_question_routes_to_part_lookup() {
    let engine = engine(FakeLlmBackend::new().on(
        "User: How can I install PS11752778?",
        &plan_json("install_help", 0.9, None, None, Some("PS11752778"), None),
    ));

    let reply = ask(&engine, "s1", "How can I install PS11752778?").await;
    let response = reply.response;

    assert_eq!(response.kind, ResponseType::PartLookup);
    assert_eq!(response.part.as_ref().unwrap().part_id, "PS11752778");
    // Generator unavailable: template steps
    assert!(!response.diagnostic_steps.is_empty());
    assert!(response.explanation.unwrap().contains("PS11752778"));
}

#[tokio::test]
async fn test_install_question_uses_generated_steps() {
    let generated = r#"{"explanation":"This shelf bin clips onto the refrigerator door liner.","installation_steps":["Empty the bin","Lift the old bin up and out","Align the new bin with the door tabs","Press down until it seats"],"tips":["No tools are needed"]}"#;
    let engine = engine(
        FakeLlmBackend::new()
            .on(
                "User: How can I install PS11752778?",
                &plan_json("install_help", 0.9, None, None, Some("PS11752778"), None),
            )
            .on("Task: part_lookup", generated),
    );

    let response = ask(&engine, "s1", "How can I install PS11752778?").await.response;
    assert_eq!(response.kind, ResponseType::PartLookup);
    assert_eq!(response.diagnostic_steps.len(), 4);
    assert_eq!(response.diagnostic_steps[0], "Empty the bin");
    assert_eq!(response.helpful_tips, vec!["No tools are needed"]);
}

#[tokio::test]
async fn test_incompatible_part_lists_alternatives() {
    let question = "Does PS11752778 work with model WDT780SAEM1?";
    let engine = engine(FakeLlmBackend::new().on(
        &format!("User: {}", question),
        &plan_json(
            "compatibility_check",
            0.9,
            None,
            None,
            Some("PS11752778"),
            Some("WDT780SAEM1"),
        ),
    ));

    let response = ask(&engine, "s2", question).await.response;

    assert_eq!(response.kind, ResponseType::Compatibility);
    assert_eq!(response.compatible, Some(false));
    assert_eq!(response.model_id.as_deref(), Some(DISHWASHER_MODEL));
    assert_eq!(response.fit, Some(Fit::Verified));
    assert!(!response.alternative_parts.is_empty());
    for alt in &response.alternative_parts {
        assert!(["PS3406971", "PS11746591"].contains(&alt.part_id.as_str()));
    }
}

#[tokio::test]
async fn test_compatible_part_confirmed() {
    let question = format!("Does PS11752778 fit my {}?", FRIDGE_MODEL);
    let engine = engine(FakeLlmBackend::new().on(
        &format!("User: {}", question),
        &plan_json(
            "compatibility_check",
            0.9,
            None,
            None,
            Some("PS11752778"),
            Some(FRIDGE_MODEL),
        ),
    ));

    let response = ask(&engine, "s2", &question).await.response;
    assert_eq!(response.kind, ResponseType::Compatibility);
    assert_eq!(response.compatible, Some(true));
    assert!(response.alternative_parts.is_empty());
}

#[tokio::test]
async fn test_symptom_without_model_asks_for_model() {
    let engine = engine(FakeLlmBackend::new().on(&format!("User: {}", ICE_MAKER), &ice_maker_plan()));

    let response = ask(&engine, "s3", ICE_MAKER).await.response;

    assert_eq!(response.kind, ResponseType::ModelRequired);
    assert!(response.confidence < 0.55);
    assert!(response.recommended_parts.is_empty());
    assert_eq!(response.clarification_type, Some(ClarificationKind::ModelNumber));

    let snap = engine.session_snapshot("s3").await.unwrap();
    assert_eq!(snap.pending, PendingSlot::AwaitingModel);
    assert_eq!(snap.last_symptom.as_deref(), Some("ice maker not working"));
    assert_eq!(snap.appliance.as_deref(), Some("refrigerator"));
}

#[tokio::test]
async fn test_hyphenated_size_is_not_taken_as_model() {
    let question = "My 24-inch dishwasher isn't draining";
    let engine = engine(FakeLlmBackend::new().on(
        &format!("User: {}", question),
        &plan_json(
            "symptom_troubleshoot",
            0.85,
            Some("not draining"),
            Some("dishwasher"),
            None,
            None,
        ),
    ));

    let response = ask(&engine, "s3b", question).await.response;

    assert_eq!(response.kind, ResponseType::ModelRequired);
    assert!(response.model_id.is_none());
    let snap = engine.session_snapshot("s3b").await.unwrap();
    assert!(snap.last_model.is_none());
    assert_eq!(snap.pending, PendingSlot::AwaitingModel);
}

#[tokio::test]
async fn test_bare_model_reply_continues_open_symptom_unvalidated() {
    let fake = Arc::new(FakeLlmBackend::new().on(&format!("User: {}", ICE_MAKER), &ice_maker_plan()));
    let engine = engine_with(fake.clone(), catalog());

    ask(&engine, "s4", ICE_MAKER).await;
    let response = ask(&engine, "s4", CONTINUATION_MODEL).await.response;

    assert_eq!(response.kind, ResponseType::SymptomTroubleshootUnvalidated);
    assert_eq!(response.symptom.as_deref(), Some("ice maker not working"));
    assert_eq!(response.model_id.as_deref(), Some(CONTINUATION_MODEL));
    assert_eq!(response.fit, Some(Fit::Unverified));
    assert!(!response.recommended_parts.is_empty());
    assert!(!response.requires_clarification);

    // The continuation never went back to the planner
    let planner_calls = fake
        .prompts()
        .iter()
        .filter(|p| p.contains("User: "))
        .count();
    assert_eq!(planner_calls, 1);

    let snap = engine.session_snapshot("s4").await.unwrap();
    assert_eq!(snap.pending, PendingSlot::None);
    assert_eq!(snap.last_model.as_deref(), Some(CONTINUATION_MODEL));
    assert!(!snap.last_model_valid);
}

#[tokio::test]
async fn test_bare_model_reply_continues_open_symptom_validated() {
    let fake = Arc::new(FakeLlmBackend::new().on(&format!("User: {}", ICE_MAKER), &ice_maker_plan()));
    let store = catalog_with(&[(CONTINUATION_MODEL, &["PS11739035", "PS12070506"])]);
    let engine = engine_with(fake, store);

    ask(&engine, "s4", ICE_MAKER).await;
    let response = ask(&engine, "s4", CONTINUATION_MODEL).await.response;

    assert_eq!(response.kind, ResponseType::SymptomTroubleshoot);
    assert_eq!(response.symptom.as_deref(), Some("ice maker not working"));
    assert!(!response.recommended_parts.is_empty());
    for part in &response.recommended_parts {
        assert!(
            ["PS11739035", "PS12070506"].contains(&part.part_id.as_str()),
            "{} is not compatible with {}",
            part.part_id,
            CONTINUATION_MODEL
        );
    }
}

#[tokio::test]
async fn test_out_of_scope_appliance_is_refused() {
    let fake = Arc::new(FakeLlmBackend::new());
    let engine = engine_with(fake.clone(), catalog());

    let response = ask(&engine, "s5", "My oven is not heating").await.response;

    assert_eq!(response.kind, ResponseType::ClarificationNeeded);
    assert_eq!(response.clarification_type, Some(ClarificationKind::OutOfScope));
    let message = response.message.unwrap();
    assert!(message.contains("refrigerator and dishwasher"), "{}", message);
    assert!(message.contains("oven"));
    assert_eq!(fake.call_count(), 0);

    let snap = engine.session_snapshot("s5").await.unwrap();
    assert!(snap.last_symptom.is_none());
    assert!(snap.appliance.is_none());
}

#[tokio::test]
async fn test_appliance_change_drops_carried_state() {
    let engine = engine(
        FakeLlmBackend::new()
            .on(&format!("User: {}", ICE_MAKER), &ice_maker_plan())
            .on(
                "User: my dishwasher is not cleaning",
                &plan_json(
                    "symptom_troubleshoot",
                    0.8,
                    Some("not cleaning dishes properly"),
                    Some("dishwasher"),
                    None,
                    None,
                ),
            ),
    );

    ask(&engine, "s6", ICE_MAKER).await;
    let response = ask(&engine, "s6", "my dishwasher is not cleaning").await.response;

    assert_eq!(response.kind, ResponseType::ModelRequired);
    assert_eq!(response.symptom.as_deref(), Some("not cleaning dishes properly"));
    let snap = engine.session_snapshot("s6").await.unwrap();
    assert_eq!(snap.appliance.as_deref(), Some("dishwasher"));
    assert_eq!(
        snap.last_symptom.as_deref(),
        Some("not cleaning dishes properly")
    );
}

#[tokio::test]
async fn test_planner_failure_degrades_to_clarification() {
    // No scripted plan: the fallback plan has no lookup intent
    let engine = engine(FakeLlmBackend::new());
    let response = ask(&engine, "s7", "PS11752778").await.response;
    assert_eq!(response.kind, ResponseType::ClarificationNeeded);
    assert!(response.requires_clarification);
    assert_eq!(
        response.detected_info.unwrap().part_id.as_deref(),
        Some("PS11752778")
    );
}

#[tokio::test]
async fn test_turn_waiting_past_deadline_gets_retry_prompt() {
    // Zero stage budgets leave a one second turn deadline
    let mut config = Config::default();
    config.llm.planner_timeout_secs = 0;
    config.llm.generation_timeout_secs = 0;
    config.retrieval.timeout_secs = 0;
    let engine = engine_with_config(Arc::new(FakeLlmBackend::new()), catalog(), config);

    let held = engine.sessions().checkout("busy").await;
    let response = ask(&engine, "busy", ICE_MAKER).await.response;
    drop(held);

    assert_eq!(response.kind, ResponseType::ClarificationNeeded);
    assert_eq!(response.confidence, 0.0);
    assert!(response.message.unwrap().contains("longer than expected"));

    let snap = engine.session_snapshot("busy").await.unwrap();
    assert_eq!(snap.turn_count, 0);
}
