//! Keyword generation: turn the research plan into `[[keyword]]` search terms.

use super::engine::TurnStatus;
use super::prompts::{self, END_SIGNAL, START_SIGNAL};
use super::session::{ResearchSession, ResearchState};
use super::stage::{StageContext, StageReply};
use crate::error::StageError;
use crate::types::{Message, Role};
use regex::Regex;
use std::sync::LazyLock;
use tracing::{info, warn};

static BRACKET_TOKEN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\[\[(.*?)\]\]").ok());

/// Every `[[...]]` span in order, trimmed, with empty spans dropped.
pub fn extract_bracket_tokens(text: &str) -> Vec<String> {
    let Some(re) = BRACKET_TOKEN.as_ref() else {
        return Vec::new();
    };
    re.captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// Search keywords in first-seen order: trimmed, non-empty, deduplicated,
/// with the workflow control signals removed.
pub fn parse_keywords(text: &str) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    for token in extract_bracket_tokens(text) {
        if is_control_token(&token) || keywords.contains(&token) {
            continue;
        }
        keywords.push(token);
    }
    keywords
}

fn is_control_token(token: &str) -> bool {
    [START_SIGNAL, END_SIGNAL]
        .iter()
        .any(|signal| signal.trim_start_matches("[[").trim_end_matches("]]") == token)
}

/// Ask the worker model for keywords and queue them for searching.
///
/// Every failure falls back to `Initial` so the user can refine the plan.
pub(crate) async fn run(ctx: &StageContext<'_>, session: &mut ResearchSession) -> StageReply {
    let Some(plan) = session.research_plan().map(str::to_string) else {
        return fallback(ctx, session, StageError::MissingPlan);
    };

    let messages = vec![
        Message::system(ctx.system_prompt(&ctx.config.prompts.keyword_choice)),
        Message::user(format!(
            "Here is the research plan. Generate search keywords for it:\n{plan}"
        )),
    ];
    let request = ctx.config.models.worker.request(messages, false);

    let output = match ctx.complete(request).await {
        Ok(output) => output,
        Err(e) => return fallback(ctx, session, e),
    };
    session
        .conversation_mut()
        .record_note(Role::System, format!("Keyword generator output:\n{output}"));

    let keywords = parse_keywords(&output);
    if keywords.is_empty() {
        return fallback(
            ctx,
            session,
            StageError::MissingTokens {
                expected: "[[keyword]] search terms".to_string(),
            },
        );
    }

    session.enqueue_keywords(keywords.iter().cloned());
    info!(session = %session.id(), count = keywords.len(), keywords = ?keywords, "Parsed search keywords");
    ctx.move_to(session, ResearchState::Searching);
    StageReply::new(
        TurnStatus::KeywordsReady {
            count: keywords.len(),
        },
        format!(
            "Generated {} search keywords: {}. Searching...",
            keywords.len(),
            prompts::bracketed_list(&keywords)
        ),
    )
}

fn fallback(ctx: &StageContext<'_>, session: &mut ResearchSession, error: StageError) -> StageReply {
    warn!(session = %session.id(), error = %error, "Keyword generation failed, returning to planning");
    session
        .conversation_mut()
        .record_note(Role::System, format!("Keyword generation failed: {error}"));
    ctx.move_to(session, ResearchState::Initial);

    let display = match &error {
        StageError::MissingPlan => {
            "Cannot generate keywords without a research plan. Please describe your research topic again.".to_string()
        }
        StageError::MissingTokens { .. } => {
            "Could not find any search keywords in the generated output. Please refine the research plan and try again.".to_string()
        }
        other => format!("Error while generating keywords: {other}"),
    };
    StageReply::new(TurnStatus::KeywordsFailed, display)
}
