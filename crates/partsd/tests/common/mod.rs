//! Shared fixtures for partsd integration tests

#![allow(dead_code)]

use parts_common::{ChatRequest, ChatResponse, PartRecord};
use partsd::config::Config;
use partsd::llm::FakeLlmBackend;
use partsd::similarity::LexicalIndex;
use partsd::truth_store::TruthStore;
use partsd::Engine;
use std::collections::HashMap;
use std::sync::Arc;

pub const FRIDGE_MODEL: &str = "WRS325FDAM04";
pub const DISHWASHER_MODEL: &str = "WDT780SAEM1";

/// Small catalog: fridge parts, dishwasher parts and two models
pub fn catalog() -> TruthStore {
    catalog_with(&[])
}

/// `catalog()` plus extra model compatibility entries
pub fn catalog_with(extra_models: &[(&str, &[&str])]) -> TruthStore {
    let records = vec![
        PartRecord::new("PS11752778", "Refrigerator Door Shelf Bin")
            .with_appliance("refrigerator")
            .with_brand("Whirlpool")
            .with_symptoms(&["Door won't close", "Leaking"])
            .with_rating(4.8)
            .with_price(44.95),
        PartRecord::new("PS11739035", "Refrigerator Ice Maker Assembly")
            .with_appliance("refrigerator")
            .with_brand("Whirlpool")
            .with_symptoms(&["Ice maker not making ice", "Ice maker not working"])
            .with_description("Replacement ice maker for side-by-side refrigerators")
            .with_rating(4.6)
            .with_price(89.99),
        PartRecord::new("PS12070506", "Refrigerator Water Inlet Valve")
            .with_appliance("refrigerator")
            .with_symptoms(&["Ice maker not making ice", "Leaking"])
            .with_rating(4.4)
            .with_price(54.10),
        PartRecord::new("PS10065979", "Dishwasher Upper Rack Adjuster Kit")
            .with_appliance("dishwasher")
            .with_brand("Whirlpool")
            .with_symptoms(&["Door latch failure"])
            .with_rating(4.9)
            .with_price(38.52),
        PartRecord::new("PS3406971", "Dishwasher Lower Spray Arm")
            .with_appliance("dishwasher")
            .with_symptoms(&["Not cleaning dishes properly", "Noisy"])
            .with_rating(4.7)
            .with_price(31.83),
        PartRecord::new("PS11746591", "Dishwasher Upper Spray Arm")
            .with_appliance("dishwasher")
            .with_symptoms(&["Not cleaning dishes properly"])
            .with_rating(4.2)
            .with_price(28.40),
    ];

    let mut models = HashMap::new();
    models.insert(
        FRIDGE_MODEL.to_string(),
        vec![
            "PS11752778".to_string(),
            "PS11739035".to_string(),
            "PS12070506".to_string(),
        ],
    );
    models.insert(
        DISHWASHER_MODEL.to_string(),
        vec!["PS3406971".to_string(), "PS11746591".to_string()],
    );
    for (model, parts) in extra_models {
        models.insert(
            model.to_string(),
            parts.iter().map(|p| p.to_string()).collect(),
        );
    }
    TruthStore::from_records(records, models)
}

pub fn engine_with(fake: Arc<FakeLlmBackend>, store: TruthStore) -> Engine {
    engine_with_config(fake, store, Config::default())
}

pub fn engine_with_config(fake: Arc<FakeLlmBackend>, store: TruthStore, config: Config) -> Engine {
    let store = Arc::new(store);
    let index = Arc::new(LexicalIndex::from_store(&store));
    Engine::new(config, store, fake, index).unwrap()
}

pub fn engine(fake: FakeLlmBackend) -> Engine {
    engine_with(Arc::new(fake), catalog())
}

pub async fn ask(engine: &Engine, conversation: &str, message: &str) -> ChatResponse {
    engine
        .handle_turn(ChatRequest {
            conversation_id: Some(conversation.to_string()),
            message: message.to_string(),
        })
        .await
}

/// Planner JSON for a scripted classification
pub fn plan_json(
    intent: &str,
    confidence: f64,
    symptom: Option<&str>,
    appliance: Option<&str>,
    part_id: Option<&str>,
    model_id: Option<&str>,
) -> String {
    serde_json::json!({
        "intent": intent,
        "confidence": confidence,
        "symptom": symptom,
        "appliance": appliance,
        "brand": null,
        "part_id": part_id,
        "model_id": model_id,
    })
    .to_string()
}
