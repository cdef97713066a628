//! Intake Conversation Engine - per-call dialogue orchestration
//!
//! This crate is the "brain" of the frontdesk system. For every speech turn
//! that arrives from the telephony webhook it:
//! 1. **Field Extraction** (`frontdesk-core`) - pull structured intake
//!    fields out of the raw transcript, first-write-wins per field
//! 2. **Stage Resolution** (`frontdesk-core`) - derive the next question
//!    from what is still missing
//! 3. **Turn Generation** (`llm`) - hand the structured context and the
//!    full history to the language model for the actual reply wording
//! 4. **Persistence Hand-off** (`orchestrator`) - once the intake is
//!    complete, push the finalized record through the persistence gateway
//!    exactly once per call
//!
//! # Key Types
//!
//! - `TurnOrchestrator` - the per-utterance entry point (see `orchestrator`)
//! - `TurnGenerator` - pluggable LLM boundary; `AnthropicTurnClient` is the
//!   production implementation
//! - `SessionStore` - injected session table with idle eviction
//!
//! # Safety Principle
//!
//! The language model only words the conversation. Which field is asked
//! for next, what was extracted, and when the record persists are all
//! deterministic decisions made here and in `frontdesk-core`.

pub mod llm;
pub mod orchestrator;
pub mod store;

pub use llm::{AnthropicTurnClient, TurnContext, TurnError, TurnGenerator};
pub use orchestrator::{GatewayError, PersistenceGateway, TurnOrchestrator, FALLBACK_REPLY};
pub use store::{InMemorySessionStore, SessionStore, SharedSession};
