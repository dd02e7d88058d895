//! # Delve Core
//!
//! Core library for the Delve deep research workflow.
//! Provides the research engine and its stages, the completion gateway
//! abstraction with an OpenAI-compatible client, configuration, and
//! fundamental types.

pub mod config;
pub mod error;
pub mod gateway;
pub mod research;
pub mod types;

// Re-export commonly used types at the crate root.
pub use config::{DelveConfig, load_config};
pub use error::{DelveError, Result};
pub use gateway::{CompletionGateway, MockGateway, OpenAiCompatibleGateway};
pub use research::{
    ResearchCallback, ResearchEngine, ResearchSession, ResearchState, TurnResult, TurnStatus,
};
pub use types::{CompletionOutcome, CompletionRequest, Message, Role};
