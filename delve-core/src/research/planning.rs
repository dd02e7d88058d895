//! Initial planning: converse with the planner until it commits to a plan.

use super::engine::TurnStatus;
use super::prompts::START_SIGNAL;
use super::session::{ResearchSession, ResearchState};
use super::stage::{StageContext, StageReply};
use crate::error::StageError;
use crate::types::{Message, Role};
use tracing::{info, warn};

/// Record the user's text and ask the planner for the next reply.
///
/// A reply carrying the start signal becomes the research plan and moves
/// the session to keyword generation. Anything else leaves it in `Initial`.
pub(crate) async fn run(
    ctx: &StageContext<'_>,
    session: &mut ResearchSession,
    user_text: &str,
) -> StageReply {
    session.note_round_request(user_text);
    session.conversation_mut().record_turn(Role::User, user_text);

    let mut messages = vec![Message::system(
        ctx.system_prompt(&ctx.config.prompts.deep_research),
    )];
    messages.extend(session.conversation().dialogue().cloned());
    let request = ctx.config.models.planner.request(messages, true);

    let reply = match ctx.complete(request).await {
        Ok(reply) => reply,
        Err(e) => return failure(session, e),
    };

    session
        .conversation_mut()
        .record_turn(Role::Assistant, reply.as_str());

    if !reply.contains(START_SIGNAL) {
        return StageReply::new(TurnStatus::Conversing, reply);
    }

    info!(session = %session.id(), "Planner emitted start signal");
    session.set_research_plan(reply.as_str());
    ctx.move_to(session, ResearchState::GeneratingKeywords);
    StageReply::new(
        TurnStatus::ResearchStarted,
        format!("{reply}\n\n***\nResearch started, generating search keywords..."),
    )
}

fn failure(session: &mut ResearchSession, error: StageError) -> StageReply {
    warn!(session = %session.id(), error = %error, "Planning turn failed");
    let (note, display) = match &error {
        StageError::ProtocolAnomaly { tool } => (
            format!("Planner requested external tool '{tool}' instead of replying."),
            format!(
                "The planner asked for the '{tool}' tool instead of answering. Please try again or rephrase your request."
            ),
        ),
        other => (
            format!("Planning call failed: {other}"),
            format!("Sorry, the planner could not respond: {other}"),
        ),
    };
    session.conversation_mut().record_note(Role::System, note);
    StageReply::new(TurnStatus::PlanningFailed, display)
}
