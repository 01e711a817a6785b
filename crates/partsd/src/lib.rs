//! partsd: query understanding and routing for a refrigerator and
//! dishwasher parts assistant.

pub mod config;
pub mod engine;
pub mod extractor;
pub mod generator;
pub mod guardrails;
pub mod handlers;
pub mod llm;
pub mod logging;
pub mod metrics;
pub mod planner;
pub mod resolver;
pub mod retrieval;
pub mod router;
pub mod routes;
pub mod scoring;
pub mod server;
pub mod session;
pub mod similarity;
pub mod truth_store;
pub mod validator;

pub use engine::Engine;
