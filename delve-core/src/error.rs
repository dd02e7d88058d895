//! Error types for the Delve core library.
//!
//! Uses `thiserror` for public API error types with structured error variants
//! covering the completion gateway, configuration, and research stages.

/// Top-level error type for the Delve core library.
#[derive(Debug, thiserror::Error)]
pub enum DelveError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Research stage error: {0}")]
    Stage(#[from] StageError),
}

/// Errors from completion gateway interactions.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },
}

/// Errors from the configuration system.
///
/// These are fatal at process start and never raised per request.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Stage-level failures inside the research workflow.
///
/// None of these escape `ResearchEngine::advance`; each is turned into a
/// fallback transition plus a user-visible explanation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Upstream(#[from] LlmError),

    #[error("model requested tool '{tool}' instead of returning content")]
    ProtocolAnomaly { tool: String },

    #[error("expected {expected} in model output")]
    MissingTokens { expected: String },

    #[error("no research plan is available")]
    MissingPlan,
}

/// A type alias for results using the top-level `DelveError`.
pub type Result<T> = std::result::Result<T, DelveError>;
