//! Search fan-out: one concurrent search per pending keyword, merged after the join.
//!
//! Workers only read shared context and return a [`KeywordOutcome`]. The
//! session is touched at a single point after every worker has finished,
//! in batch input order.

use super::engine::TurnStatus;
use super::prompts;
use super::session::{ResearchSession, ResearchState};
use super::stage::{StageContext, StageReply};
use crate::error::StageError;
use crate::types::{Message, Role};
use futures::future::join_all;
use tracing::{info, warn};

/// Result of searching a single keyword.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordOutcome {
    pub keyword: String,
    /// Search summary on success, keyword-scoped error text on failure.
    pub text: String,
    pub succeeded: bool,
}

/// Search one keyword with the worker model, search enabled.
///
/// Never fails: every error is folded into the outcome text.
pub(crate) async fn search_keyword(
    ctx: &StageContext<'_>,
    keyword: &str,
    original_request: &str,
) -> KeywordOutcome {
    let tagged = prompts::bracketed(keyword);
    let messages = vec![
        Message::system(ctx.system_prompt(&prompts::search_prompt(
            &ctx.config.prompts.search,
            keyword,
        ))),
        Message::user(format!(
            "The user's original research request: {original_request}\nSearch specifically for information about {tagged}."
        )),
    ];
    let request = ctx.config.models.worker.request(messages, true);

    let outcome = match ctx.complete(request).await {
        Ok(summary) => KeywordOutcome {
            keyword: keyword.to_string(),
            text: summary,
            succeeded: true,
        },
        Err(StageError::ProtocolAnomaly { tool }) => KeywordOutcome {
            keyword: keyword.to_string(),
            text: format!(
                "Search for {tagged} failed: the model requested external tool '{tool}' instead of returning results."
            ),
            succeeded: false,
        },
        Err(e) => KeywordOutcome {
            keyword: keyword.to_string(),
            text: format!("Error while searching {tagged}: {e}"),
            succeeded: false,
        },
    };
    if !outcome.succeeded {
        warn!(keyword, error = %outcome.text, "Keyword search failed");
    }
    ctx.callback.on_keyword_complete(keyword, outcome.succeeded);
    outcome
}

/// Drain the pending keywords and search them concurrently.
///
/// Always ends in `JudgingDepth`, whatever the individual outcomes were.
pub(crate) async fn run(ctx: &StageContext<'_>, session: &mut ResearchSession) -> StageReply {
    let batch = session.take_pending_batch();
    if batch.is_empty() {
        info!(session = %session.id(), "Empty search batch, moving to judgment");
        ctx.move_to(session, ResearchState::JudgingDepth);
        return StageReply::new(
            TurnStatus::SearchCompleted {
                searched: 0,
                failed: 0,
            },
            "All keywords have been searched. Judging research depth...",
        );
    }

    let label = prompts::bracketed_list(&batch);
    info!(session = %session.id(), count = batch.len(), keywords = %label, "Starting search batch");
    session.conversation_mut().record_note(
        Role::System,
        format!("Starting parallel search of {} keywords: {label}", batch.len()),
    );

    let original_request = session
        .round_request()
        .or_else(|| session.conversation().first_user_input())
        .unwrap_or("unknown")
        .to_string();
    let searches = batch
        .iter()
        .map(|keyword| search_keyword(ctx, keyword, &original_request));
    let outcomes = join_all(searches).await;

    let failed = merge_outcomes(session, &outcomes);
    let searched = outcomes.len();
    info!(session = %session.id(), searched, failed, "Search batch complete");

    ctx.move_to(session, ResearchState::JudgingDepth);
    StageReply::new(
        TurnStatus::SearchCompleted { searched, failed },
        format!(
            "Finished searching {label} ({} succeeded, {failed} failed). Judging research depth...",
            searched - failed
        ),
    )
}

/// Fold outcomes into the session in batch order. Returns the failure count.
fn merge_outcomes(session: &mut ResearchSession, outcomes: &[KeywordOutcome]) -> usize {
    let mut failed = 0;
    for outcome in outcomes {
        session.record_search_result(&outcome.keyword, outcome.text.as_str());
        let tagged = prompts::bracketed(&outcome.keyword);
        if outcome.succeeded {
            session.conversation_mut().record_note(
                Role::Assistant,
                format!("Search summary for {tagged}:\n{}", outcome.text),
            );
        } else {
            failed += 1;
            session
                .conversation_mut()
                .record_note(Role::System, outcome.text.as_str());
        }
    }
    failed
}
