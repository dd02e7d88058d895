//! Research engine — drives a session through the workflow one stage per turn.

use super::session::{NoOpResearchCallback, ResearchCallback, ResearchSession, ResearchState};
use super::stage::{StageContext, StageReply};
use super::{fanout, judge, keywords, planning, report};
use crate::config::DelveConfig;
use crate::error::Result;
use crate::gateway::{CompletionGateway, OpenAiCompatibleGateway};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// What happened during one `advance` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TurnStatus {
    /// Resting in `Initial` with nothing to do.
    AwaitingInput,
    /// Empty input; nothing changed.
    InputRejected,
    /// The planner replied without starting research.
    Conversing,
    /// The planner emitted the start signal.
    ResearchStarted,
    PlanningFailed,
    KeywordsReady { count: usize },
    KeywordsFailed,
    SearchCompleted { searched: usize, failed: usize },
    JudgeContinue { new_keywords: usize },
    JudgeEnded,
    JudgeLoopLimit,
    JudgeAmbiguous,
    JudgeFailed,
    ReportReady,
    ReportFailed,
    /// Resting in `Finished` with nothing to do.
    Finished,
}

/// Result of a single `advance` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnResult {
    /// Text to show the user.
    pub display_text: String,
    /// The session rests in `Initial` or `Finished`; call again only with new input.
    pub done: bool,
    pub status: TurnStatus,
    /// A report from the current round is available.
    pub report_ready: bool,
}

/// The workflow engine. Holds no per-session state, so one engine can drive
/// any number of caller-owned sessions.
pub struct ResearchEngine {
    gateway: Arc<dyn CompletionGateway>,
    config: DelveConfig,
    callback: Arc<dyn ResearchCallback>,
}

impl ResearchEngine {
    pub fn new(gateway: Arc<dyn CompletionGateway>, config: DelveConfig) -> Self {
        Self {
            gateway,
            config,
            callback: Arc::new(NoOpResearchCallback),
        }
    }

    /// Build an engine backed by the OpenAI-compatible gateway.
    ///
    /// Fails when the configuration is not ready for use, e.g. a missing API
    /// key or an invalid endpoint.
    pub fn from_config(config: DelveConfig) -> Result<Self> {
        config.ensure_ready()?;
        let gateway = OpenAiCompatibleGateway::new(&config.gateway)?;
        info!(
            gateway = gateway.name(),
            base_url = %config.gateway.base_url,
            planner = %config.models.planner.model,
            worker = %config.models.worker.model,
            synthesis = %config.models.synthesis.model,
            "Completion gateway ready"
        );
        Ok(Self::new(Arc::new(gateway), config))
    }

    /// Attach a progress callback.
    pub fn with_callback(mut self, callback: Arc<dyn ResearchCallback>) -> Self {
        self.callback = callback;
        self
    }

    pub fn config(&self) -> &DelveConfig {
        &self.config
    }

    /// Create a fresh session in `Initial`.
    pub fn start_session(&self) -> ResearchSession {
        let session = ResearchSession::new();
        info!(session = %session.id(), "Research session started");
        session
    }

    /// Run exactly one stage for the session's current state.
    ///
    /// `user_text` is only consumed in `Initial` and `Finished`. Never fails:
    /// every error surfaces as a fallback transition plus explanatory text.
    pub async fn advance(
        &self,
        session: &mut ResearchSession,
        user_text: Option<&str>,
    ) -> TurnResult {
        let state = session.state();
        let ctx = self.context();
        debug!(session = %session.id(), state = %state, has_input = user_text.is_some(), "Advancing session");

        if !state.is_resting() && user_text.is_some() {
            debug!(session = %session.id(), state = %state, "Ignoring user input outside a resting state");
        }

        let reply = match state {
            ResearchState::Initial => match user_text.map(str::trim) {
                None => StageReply::new(
                    TurnStatus::AwaitingInput,
                    "Please describe the topic you would like to research.",
                ),
                Some("") => rejected(),
                Some(text) => planning::run(&ctx, session, text).await,
            },
            ResearchState::Finished => match user_text.map(str::trim) {
                None => StageReply::new(
                    TurnStatus::Finished,
                    "Research complete. Send a new message to start another research round.",
                ),
                Some("") => rejected(),
                Some(text) => {
                    if session.start_new_round() {
                        self.callback
                            .on_state_change(ResearchState::Finished, ResearchState::Initial);
                        info!(session = %session.id(), loop_count = session.loop_count(), "Starting a new research round");
                    }
                    planning::run(&ctx, session, text).await
                }
            },
            ResearchState::GeneratingKeywords => keywords::run(&ctx, session).await,
            ResearchState::Searching => fanout::run(&ctx, session).await,
            ResearchState::JudgingDepth => judge::run(&ctx, session).await,
            ResearchState::GeneratingReport => report::run(&ctx, session).await,
        };

        let result = TurnResult {
            display_text: reply.display_text,
            done: session.state().is_resting(),
            status: reply.status,
            report_ready: session.state() == ResearchState::Finished
                && session.latest_report().is_some(),
        };
        debug!(
            session = %session.id(),
            from = %state,
            to = %session.state(),
            status = ?result.status,
            done = result.done,
            "Turn complete"
        );
        result
    }

    /// Call [`advance`](Self::advance) until the session rests.
    ///
    /// `on_turn` sees every interim result; the resting result is returned.
    pub async fn run_to_rest<F>(
        &self,
        session: &mut ResearchSession,
        user_text: Option<&str>,
        mut on_turn: F,
    ) -> TurnResult
    where
        F: FnMut(&TurnResult),
    {
        let mut input = user_text;
        loop {
            let result = self.advance(session, input.take()).await;
            if result.done {
                return result;
            }
            on_turn(&result);
        }
    }

    /// The most recent successfully synthesized report, if any.
    pub fn latest_report<'a>(&self, session: &'a ResearchSession) -> Option<&'a str> {
        session.latest_report()
    }

    /// Discard all session data and return to `Initial`.
    pub fn reset(&self, session: &mut ResearchSession) {
        let from = session.state();
        session.reset();
        info!(session = %session.id(), "Research session reset");
        if from != ResearchState::Initial {
            self.callback.on_state_change(from, ResearchState::Initial);
        }
    }

    fn context(&self) -> StageContext<'_> {
        StageContext {
            gateway: self.gateway.as_ref(),
            config: &self.config,
            callback: self.callback.as_ref(),
        }
    }
}

fn rejected() -> StageReply {
    StageReply::new(
        TurnStatus::InputRejected,
        "Please enter a non-empty message.",
    )
}
