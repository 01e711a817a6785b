//! Parts Common - shared types for the parts assistant daemon and CLI.
//!
//! Catalog records, the chat wire protocol and the error type live here so
//! `partsd` and `partsctl` agree on every payload.

pub mod error;
pub mod records;
pub mod rpc;

pub use error::PartsError;
pub use records::{InstallInfo, PartRecord, PartView, RankingFactors, RawPartRecord};
pub use rpc::{
    AssistantResponse, CacheStats, ChatRequest, ChatResponse, ClarificationKind, DetectedInfo,
    Fit, HealthResponse, PendingSlot, ResponseType, SessionSnapshot, TurnView,
};
