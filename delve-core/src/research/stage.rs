//! Shared plumbing for stage handlers.

use super::engine::TurnStatus;
use super::prompts;
use super::session::{ResearchCallback, ResearchSession, ResearchState};
use crate::config::DelveConfig;
use crate::error::StageError;
use crate::gateway::CompletionGateway;
use crate::types::{CompletionOutcome, CompletionRequest};
use tracing::{debug, warn};

/// Borrowed dependencies a stage handler runs against.
pub(crate) struct StageContext<'a> {
    pub gateway: &'a dyn CompletionGateway,
    pub config: &'a DelveConfig,
    pub callback: &'a dyn ResearchCallback,
}

/// What a stage handler hands back to the engine.
#[derive(Debug)]
pub(crate) struct StageReply {
    pub display_text: String,
    pub status: TurnStatus,
}

impl StageReply {
    pub fn new(status: TurnStatus, display_text: impl Into<String>) -> Self {
        Self {
            display_text: display_text.into(),
            status,
        }
    }
}

impl StageContext<'_> {
    /// Rendered time preamble for this invocation.
    pub fn time_prefix(&self) -> String {
        prompts::time_prefix(
            &self.config.prompts.time_template,
            &self.config.research.timezone,
        )
    }

    /// `prompt` with the time preamble in front.
    pub fn system_prompt(&self, prompt: &str) -> String {
        prompts::with_time_prefix(&self.time_prefix(), prompt)
    }

    /// Apply a transition and notify the callback.
    pub fn move_to(&self, session: &mut ResearchSession, next: ResearchState) -> bool {
        let from = session.state();
        if !session.transition(next) {
            return false;
        }
        if from != next {
            self.callback.on_state_change(from, next);
        }
        true
    }

    /// Invoke the gateway and require text content back.
    ///
    /// A tool invocation is a protocol anomaly and blank content counts as
    /// missing output.
    pub async fn complete(&self, request: CompletionRequest) -> Result<String, StageError> {
        let model = request.model.clone();
        debug!(
            gateway = self.gateway.name(),
            model = %model,
            messages = request.messages.len(),
            search = request.enable_search,
            "Invoking completion gateway"
        );
        match self.gateway.invoke(request).await? {
            CompletionOutcome::Content(text) if !text.trim().is_empty() => Ok(text),
            CompletionOutcome::Content(_) => Err(StageError::MissingTokens {
                expected: "non-empty content".to_string(),
            }),
            CompletionOutcome::ToolInvocation { name, arguments } => {
                warn!(model = %model, tool = %name, %arguments, "Model requested an unexpected tool call");
                Err(StageError::ProtocolAnomaly { tool: name })
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::error::LlmError;
    use crate::gateway::MockGateway;
    use crate::types::Message;

    fn request() -> CompletionRequest {
        DelveConfig::default()
            .models
            .worker
            .request(vec![Message::user("hi")], false)
    }

    #[tokio::test]
    async fn test_complete_classifies_outcomes() {
        let gateway = MockGateway::new();
        gateway.queue_content("text");
        gateway.queue_content("   ");
        gateway.queue_reply(Ok(CompletionOutcome::tool_invocation(
            "google_search",
            serde_json::json!({"query": "x"}),
        )));
        gateway.queue_error(LlmError::Timeout { timeout_secs: 3 });

        let config = quiet_config();
        let ctx = context(&gateway, &config);
        assert_eq!(ctx.complete(request()).await.unwrap(), "text");
        assert!(matches!(
            ctx.complete(request()).await,
            Err(StageError::MissingTokens { .. })
        ));
        assert!(matches!(
            ctx.complete(request()).await,
            Err(StageError::ProtocolAnomaly { ref tool }) if tool == "google_search"
        ));
        assert!(matches!(
            ctx.complete(request()).await,
            Err(StageError::Upstream(LlmError::Timeout { .. }))
        ));
    }

    #[test]
    fn test_system_prompt_without_time_template() {
        let gateway = MockGateway::new();
        let config = quiet_config();
        let ctx = context(&gateway, &config);
        assert_eq!(ctx.system_prompt("do research"), "do research");
    }

    #[test]
    fn test_system_prompt_with_time_template() {
        let gateway = MockGateway::new();
        let config = DelveConfig::default();
        let ctx = context(&gateway, &config);
        let prompt = ctx.system_prompt("do research");
        assert!(prompt.starts_with("Current date and time: "));
        assert!(prompt.ends_with("\n\ndo research"));
    }
}
