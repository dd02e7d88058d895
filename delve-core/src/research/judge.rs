//! Depth judgment: decide whether another search batch is needed.

use super::engine::TurnStatus;
use super::keywords::parse_keywords;
use super::prompts::{self, END_SIGNAL};
use super::session::{ResearchSession, ResearchState};
use super::stage::{StageContext, StageReply};
use crate::types::{Message, Role};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use tracing::{info, warn};

/// Outcome of one depth judgment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "keywords", rename_all = "snake_case")]
pub enum JudgeDecision {
    /// The round has used its judgment budget.
    LoopLimitReached,
    /// The judge emitted the end signal.
    EndSignal,
    /// The judge asked for more searching.
    Continue(Vec<String>),
    /// Neither an end signal nor usable keywords.
    Ambiguous,
}

/// Classify judge output. The loop cap wins over anything the model said,
/// and the end signal wins over keywords.
pub fn decide(round_loops: u32, cap: u32, output: &str) -> JudgeDecision {
    if round_loops >= cap {
        return JudgeDecision::LoopLimitReached;
    }
    if output.contains(END_SIGNAL) {
        return JudgeDecision::EndSignal;
    }
    let keywords = parse_keywords(output);
    if keywords.is_empty() {
        JudgeDecision::Ambiguous
    } else {
        JudgeDecision::Continue(keywords)
    }
}

/// Condensed view of every search result, each capped at `max_chars`.
pub fn summarize_results(results: &BTreeMap<String, Vec<String>>, max_chars: usize) -> String {
    if results.is_empty() {
        return "No search results collected yet.\n".to_string();
    }
    let mut summary = String::from("Search results collected so far:\n");
    for (keyword, entries) in results {
        let _ = writeln!(summary, "--- Keyword: {} ---", prompts::bracketed(keyword));
        for (idx, entry) in entries.iter().enumerate() {
            let _ = write!(
                summary,
                "Result {}:\n{}\n\n",
                idx + 1,
                prompts::truncate_chars(entry, max_chars)
            );
        }
    }
    summary
}

/// Count one judgment, ask the planner, and route to search or report.
pub(crate) async fn run(ctx: &StageContext<'_>, session: &mut ResearchSession) -> StageReply {
    let round = session.begin_judgment();
    let cap = ctx.config.research.loop_cap;
    info!(session = %session.id(), round, cap, "Judging research depth");

    let mut messages = Vec::new();
    let time_prefix = ctx.time_prefix();
    if !time_prefix.trim().is_empty() {
        messages.push(Message::system(time_prefix.trim()));
    }
    messages.extend(session.conversation().dialogue().cloned());
    messages.push(Message::system(format!(
        "--- Current search summary ---\n{}",
        summarize_results(
            session.search_results(),
            ctx.config.research.judge_result_chars
        )
    )));
    messages.push(Message::user(ctx.config.prompts.judge.as_str()));
    let request = ctx.config.models.planner.request(messages, true);

    let output = match ctx.complete(request).await {
        Ok(output) => output,
        Err(e) => {
            warn!(session = %session.id(), round, error = %e, "Depth judgment failed, moving to report");
            ctx.callback.on_judgment_failed(round, cap, &e.to_string());
            session
                .conversation_mut()
                .record_note(Role::System, format!("Depth judgment failed: {e}"));
            ctx.move_to(session, ResearchState::GeneratingReport);
            return StageReply::new(
                TurnStatus::JudgeFailed,
                format!("***\nDepth judgment failed ({e}); attempting to generate the final report..."),
            );
        }
    };

    session.conversation_mut().record_turn(
        Role::Assistant,
        format!("Depth judgment (loop {round}):\n{output}"),
    );

    let decision = decide(round, cap, &output);
    ctx.callback.on_judgment(round, cap, &decision);

    let (status, footer) = match &decision {
        JudgeDecision::LoopLimitReached => {
            info!(session = %session.id(), round, cap, "Loop cap reached, forcing report");
            (
                TurnStatus::JudgeLoopLimit,
                format!("Research depth limit reached ({round}/{cap}); generating the final report..."),
            )
        }
        JudgeDecision::EndSignal => {
            info!(session = %session.id(), round, "Judge ended research");
            (
                TurnStatus::JudgeEnded,
                "Research complete, generating the final report...".to_string(),
            )
        }
        JudgeDecision::Continue(keywords) => {
            let added = session.enqueue_keywords(keywords.iter().cloned());
            info!(session = %session.id(), round, added, keywords = ?keywords, "Judge requested more searching");
            ctx.move_to(session, ResearchState::Searching);
            return StageReply::new(
                TurnStatus::JudgeContinue {
                    new_keywords: added,
                },
                format!(
                    "{output}\n\n***\nContinuing research with new keywords: {}...",
                    prompts::bracketed_list(keywords)
                ),
            );
        }
        JudgeDecision::Ambiguous => {
            warn!(session = %session.id(), round, "Judge gave neither an end signal nor keywords");
            (
                TurnStatus::JudgeAmbiguous,
                "No clear end signal or new keywords detected; generating the report...".to_string(),
            )
        }
    };

    ctx.move_to(session, ResearchState::GeneratingReport);
    StageReply::new(status, format!("{output}\n\n***\n{footer}"))
}
