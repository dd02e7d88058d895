//! Configuration system for Delve.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from `~/.config/delve/config.toml` and/or `.delve/config.toml`
//! in the workspace directory.

use crate::error::ConfigError;
use crate::types::{CompletionRequest, Message};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration for Delve.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DelveConfig {
    pub gateway: GatewayConfig,
    pub models: ModelsConfig,
    pub prompts: PromptConfig,
    pub research: ResearchConfig,
}

/// Completion gateway connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Base URL of an OpenAI-compatible endpoint, including the version segment.
    pub base_url: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Inline API key. Takes precedence over `api_key_env` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "DELVE_API_KEY".to_string(),
            api_key: None,
            timeout_secs: 300,
            retry: RetryConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Resolve the API key, checking the inline value first and then the environment.
    pub fn resolve_api_key(&self) -> Result<String, ConfigError> {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.trim().is_empty()) {
            return Ok(key.clone());
        }
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ConfigError::EnvVarMissing {
                var: self.api_key_env.clone(),
            })
    }
}

/// Retry policy for transient gateway failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Model and sampling parameters for one role in the workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProfile {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: usize,
}

impl ModelProfile {
    pub fn new(model: impl Into<String>, temperature: f32, max_tokens: usize) -> Self {
        Self {
            model: model.into(),
            temperature,
            max_tokens,
        }
    }

    /// Build a gateway request using this profile.
    pub fn request(&self, messages: Vec<Message>, enable_search: bool) -> CompletionRequest {
        CompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            enable_search,
        }
    }
}

/// The three model roles used by the research workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Initial planning and depth judgment.
    pub planner: ModelProfile,
    /// Keyword generation and per-keyword search.
    pub worker: ModelProfile,
    /// Final report generation.
    pub synthesis: ModelProfile,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            planner: ModelProfile::new("gpt-4o", 0.7, 8_192),
            worker: ModelProfile::new("gpt-4o-mini", 0.3, 4_096),
            synthesis: ModelProfile::new("gpt-4o", 0.5, 16_384),
        }
    }
}

/// Prompt templates for each stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// System prompt for initial planning. Must teach the start signal.
    pub deep_research: String,
    /// System prompt for keyword extraction from the plan.
    pub keyword_choice: String,
    /// System prompt for a single keyword search. `[[keyword]]` is substituted.
    pub search: String,
    /// Final user instruction for the depth judge. Must teach the end signal.
    pub judge: String,
    /// System prompt for report synthesis.
    pub report: String,
    /// Current-time preamble. `{{Date::Time}}` is substituted; empty disables it.
    pub time_template: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            deep_research: DEFAULT_DEEP_RESEARCH_PROMPT.to_string(),
            keyword_choice: DEFAULT_KEYWORD_CHOICE_PROMPT.to_string(),
            search: DEFAULT_SEARCH_PROMPT.to_string(),
            judge: DEFAULT_JUDGE_PROMPT.to_string(),
            report: DEFAULT_REPORT_PROMPT.to_string(),
            time_template: "Current date and time: {{Date::Time}}".to_string(),
        }
    }
}

/// Limits for the iterative deepening loop and prompt sizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    /// Maximum depth judgments per research round.
    ///
    /// Counted from the start of the current round, not over the session's
    /// lifetime, so a follow-up round after `Finished` gets a fresh budget.
    /// With a cap of N at most N search batches run in one round.
    pub loop_cap: u32,
    /// Characters kept from each search result in the judge summary.
    pub judge_result_chars: usize,
    /// Characters kept from each log entry in the synthesis prompt.
    pub report_entry_chars: usize,
    /// IANA timezone used to render the time preamble.
    pub timezone: String,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            loop_cap: 5,
            judge_result_chars: 1_000,
            report_entry_chars: 4_000,
            timezone: "UTC".to_string(),
        }
    }
}

impl DelveConfig {
    /// Validate this config and return any warnings.
    ///
    /// Returns an empty Vec if nothing looks off. Warnings never block startup;
    /// use [`DelveConfig::ensure_ready`] for fatal checks.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for (role, profile) in [
            ("planner", &self.models.planner),
            ("worker", &self.models.worker),
            ("synthesis", &self.models.synthesis),
        ] {
            if profile.temperature < 0.0 || profile.temperature > 2.0 {
                warnings.push(format!(
                    "models.{role}.temperature ({}) is outside the typical range 0.0–2.0",
                    profile.temperature
                ));
            }
        }
        if self.research.timezone.parse::<chrono_tz::Tz>().is_err() {
            warnings.push(format!(
                "research.timezone '{}' is not a known IANA zone; falling back to UTC",
                self.research.timezone
            ));
        }
        if !self.prompts.search.contains("[[keyword]]") {
            warnings.push(
                "prompts.search has no [[keyword]] placeholder; searches will not name their keyword in the system prompt"
                    .to_string(),
            );
        }
        warnings
    }

    /// Check everything that must hold before the gateway can be used.
    pub fn ensure_ready(&self) -> Result<(), ConfigError> {
        let base_url = self.gateway.base_url.trim();
        if base_url.is_empty() {
            return Err(ConfigError::MissingField {
                field: "gateway.base_url".to_string(),
            });
        }
        let parsed = url::Url::parse(base_url).map_err(|e| ConfigError::Invalid {
            message: format!("gateway.base_url '{base_url}': {e}"),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid {
                message: format!("gateway.base_url must be http(s), got '{}'", parsed.scheme()),
            });
        }
        if self.research.loop_cap == 0 {
            return Err(ConfigError::Invalid {
                message: "research.loop_cap must be at least 1".to_string(),
            });
        }
        for (field, profile) in [
            ("models.planner.model", &self.models.planner),
            ("models.worker.model", &self.models.worker),
            ("models.synthesis.model", &self.models.synthesis),
        ] {
            if profile.model.trim().is_empty() {
                return Err(ConfigError::MissingField {
                    field: field.to_string(),
                });
            }
        }
        self.gateway.resolve_api_key().map(|_| ())
    }

    /// A copy safe to print: the inline API key is masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.gateway.api_key.is_some() {
            copy.gateway.api_key = Some("********".to_string());
        }
        copy
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `DELVE_`)
/// 3. Workspace-local config (`.delve/config.toml`)
/// 4. User config (`~/.config/delve/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&DelveConfig>,
) -> Result<DelveConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(DelveConfig::default()));

    // User-level config
    if let Some(config_dir) = directories::ProjectDirs::from("dev", "delve", "delve") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    // Workspace-level config
    if let Some(ws) = workspace {
        let ws_config = ws.join(".delve").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // Environment variables (DELVE_MODELS__PLANNER__MODEL, DELVE_RESEARCH__LOOP_CAP, etc.)
    // DELVE_API_KEY is the default key variable, not a config field.
    figment = figment.merge(
        Env::prefixed("DELVE_")
            .ignore(&["API_KEY"])
            .split("__"),
    );

    // Explicit overrides
    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })
}

const DEFAULT_DEEP_RESEARCH_PROMPT: &str = r#"You are a meticulous research planner.
Talk with the user until the research goal is clear. Ask clarifying questions when the topic is vague.
When the goal is clear, write a numbered research plan covering the sub-questions that must be answered,
then finish your reply with the exact marker [[DeepResearchStart]] on its own line.
Never emit the marker before the plan is complete."#;

const DEFAULT_KEYWORD_CHOICE_PROMPT: &str = r#"You turn a research plan into web search keywords.
Produce between 3 and 8 short, specific search queries that together cover the plan.
Wrap every query in double square brackets, for example [[rust async runtime benchmarks]].
Output nothing except the bracketed queries."#;

const DEFAULT_SEARCH_PROMPT: &str = r#"You are a web research assistant with a search tool.
Search for [[keyword]] and summarize what you find: key facts, figures, dates, and the sources they came from.
Be precise and neutral. Say so explicitly when sources disagree or when nothing relevant was found."#;

const DEFAULT_JUDGE_PROMPT: &str = r#"Review the research plan and the search results collected so far.
If the information is sufficient to write a thorough report, reply with a short justification and the exact marker [[DeepResearchEnd]].
Otherwise explain what is missing and list new search queries, each wrapped in double square brackets like [[query]].
Do not repeat queries that were already searched."#;

const DEFAULT_REPORT_PROMPT: &str = r#"You are a research writer. Using only the material provided, write a detailed, accurate and objective report in Markdown.
Structure it with an executive summary, thematic sections, points of disagreement between sources, and open questions.
Cite the search keyword a fact came from when it matters."#;
