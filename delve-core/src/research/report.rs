//! Report synthesis from the accumulated research log.

use super::engine::TurnStatus;
use super::prompts;
use super::session::{ResearchSession, ResearchState};
use super::stage::{StageContext, StageReply};
use crate::types::{Message, Role};
use std::fmt::Write as _;
use tracing::{error, info};

/// Linearize the accumulated log into a role-tagged narrative.
pub fn build_report_context(accumulated: &[Message], max_entry_chars: usize) -> String {
    let mut context = String::from(
        "Generate a detailed, accurate and objective report from the user's request and all of the information collected during the research process below:\n\n",
    );
    for message in accumulated {
        let content = prompts::truncate_chars(&message.content, max_entry_chars);
        let _ = match message.role {
            Role::User => writeln!(context, "User input: {content}"),
            Role::Assistant => writeln!(context, "Assistant reply: {content}"),
            Role::System => writeln!(context, "(Process note: {content})"),
        };
    }
    context.push_str("\n--- Write the report based on all of the information above ---");
    context
}

/// Synthesize the final report. Either way the round ends in `Finished`.
pub(crate) async fn run(ctx: &StageContext<'_>, session: &mut ResearchSession) -> StageReply {
    let context = build_report_context(
        session.conversation().accumulated(),
        ctx.config.research.report_entry_chars,
    );
    info!(
        session = %session.id(),
        context_chars = context.chars().count(),
        "Generating final report"
    );

    let messages = vec![
        Message::system(ctx.system_prompt(&ctx.config.prompts.report)),
        Message::user(context),
    ];
    let request = ctx.config.models.synthesis.request(messages, false);
    let from = session.state();

    match ctx.complete(request).await {
        Ok(report) => {
            session
                .conversation_mut()
                .record_turn(Role::Assistant, format!("Final report:\n{report}"));
            if session.finish_with_report(report.as_str()) {
                ctx.callback.on_state_change(from, ResearchState::Finished);
            }
            info!(session = %session.id(), report_chars = report.chars().count(), "Report ready");
            StageReply::new(
                TurnStatus::ReportReady,
                format!("Research complete. Here is the report:\n\n{report}"),
            )
        }
        Err(e) => {
            error!(session = %session.id(), error = %e, "Report generation failed");
            session
                .conversation_mut()
                .record_note(Role::System, format!("Report generation failed: {e}"));
            if session.finish_without_report() {
                ctx.callback.on_state_change(from, ResearchState::Finished);
            }
            StageReply::new(
                TurnStatus::ReportFailed,
                format!("Sorry, generating the final report failed: {e}\n\nThe research round has ended."),
            )
        }
    }
}
