//! Integration tests for the research workflow.
//!
//! These drive the engine end-to-end against a scripted MockGateway,
//! covering the full Plan → Keywords → Search → Judge → Report cycle.

use delve_core::config::DelveConfig;
use delve_core::error::LlmError;
use delve_core::research::{JudgeDecision, RecordingResearchCallback};
use delve_core::{
    CompletionOutcome, CompletionRequest, MockGateway, ResearchEngine, ResearchState, Role,
    TurnStatus,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

const PLANNER: &str = "planner-model";
const WORKER: &str = "worker-model";
const WRITER: &str = "writer-model";

fn test_config(loop_cap: u32) -> DelveConfig {
    let mut config = DelveConfig::default();
    config.models.planner.model = PLANNER.into();
    config.models.worker.model = WORKER.into();
    config.models.synthesis.model = WRITER.into();
    config.prompts.time_template = String::new();
    config.research.loop_cap = loop_cap;
    config
}

fn create_engine(
    gateway: Arc<MockGateway>,
    loop_cap: u32,
) -> (ResearchEngine, Arc<RecordingResearchCallback>) {
    let callback = Arc::new(RecordingResearchCallback::new());
    let engine = ResearchEngine::new(gateway, test_config(loop_cap)).with_callback(callback.clone());
    (engine, callback)
}

fn is_search_for(req: &CompletionRequest, keyword: &str) -> bool {
    let tagged = format!("[[{keyword}]]");
    req.model == WORKER
        && req.enable_search
        && req.messages.iter().any(|m| m.content.contains(&tagged))
}

fn is_judge(req: &CompletionRequest) -> bool {
    let judge_prompt = DelveConfig::default().prompts.judge;
    req.model == PLANNER
        && req
            .messages
            .last()
            .is_some_and(|m| m.role == Role::User && m.content == judge_prompt)
}

fn content(text: &str) -> Result<CompletionOutcome, LlmError> {
    Ok(CompletionOutcome::content(text))
}

#[tokio::test]
async fn test_full_research_scenario() {
    let gateway = Arc::new(MockGateway::new());
    gateway.respond_when(|r| is_search_for(r, "A"), content("A: adoption is growing"));
    gateway.respond_when(|r| is_search_for(r, "B"), content("B: benchmarks look good"));
    gateway.queue_content("Which angle of X matters most to you?");
    gateway.queue_content("Plan: study A and B.\n[[DeepResearchStart]]");
    gateway.queue_content("Keywords: [[A]] [[B]]");
    gateway.queue_content("Coverage is sufficient. [[DeepResearchEnd]]");
    gateway.queue_content("# Report on X\nA and B both matter.");
    let (engine, callback) = create_engine(gateway.clone(), 5);
    let mut session = engine.start_session();

    let first = engine.advance(&mut session, Some("research topic X")).await;
    assert_eq!(first.status, TurnStatus::Conversing);
    assert!(first.done);
    assert_eq!(session.state(), ResearchState::Initial);

    let mut interim = Vec::new();
    let result = engine
        .run_to_rest(&mut session, Some("focus on A and B"), |turn| {
            interim.push(turn.status.clone())
        })
        .await;

    assert_eq!(
        interim,
        vec![
            TurnStatus::ResearchStarted,
            TurnStatus::KeywordsReady { count: 2 },
            TurnStatus::SearchCompleted {
                searched: 2,
                failed: 0
            },
            TurnStatus::JudgeEnded,
        ]
    );
    assert_eq!(result.status, TurnStatus::ReportReady);
    assert!(result.done);
    assert!(result.report_ready);
    assert!(result.display_text.contains("# Report on X"));
    assert_eq!(session.state(), ResearchState::Finished);
    assert_eq!(
        engine.latest_report(&session),
        Some("# Report on X\nA and B both matter.")
    );
    assert_eq!(session.loop_count(), 1);
    assert_eq!(gateway.pending_replies(), 0);

    // The search summaries reached the synthesis prompt.
    let requests = gateway.requests();
    let report_request = requests.iter().find(|r| r.model == WRITER).unwrap();
    assert!(!report_request.enable_search);
    let report_context = &report_request.messages[1].content;
    assert!(report_context.contains("adoption is growing"));
    assert!(report_context.contains("benchmarks look good"));
    assert!(report_context.contains("User input: research topic X"));

    // Each search names the first user request, not the latest one.
    let search = requests.iter().find(|r| is_search_for(r, "A")).unwrap();
    assert!(search.messages[1].content.contains("research topic X"));

    assert_eq!(
        callback.judgments(),
        vec![(1, 5, JudgeDecision::EndSignal)]
    );
}

#[tokio::test]
async fn test_partial_search_failure_still_reaches_judgment() {
    let gateway = Arc::new(MockGateway::new());
    gateway.respond_when(
        |r| is_search_for(r, "A"),
        Err(LlmError::ApiRequest {
            message: "Server error (502): bad gateway".into(),
        }),
    );
    gateway.respond_when(|r| is_search_for(r, "B"), content("B result"));
    gateway.queue_content("[[DeepResearchStart]]");
    gateway.queue_content("[[A]], [[B]]");
    let (engine, callback) = create_engine(gateway, 5);
    let mut session = engine.start_session();

    engine.advance(&mut session, Some("topic")).await;
    engine.advance(&mut session, None).await;
    let search = engine.advance(&mut session, None).await;

    assert_eq!(
        search.status,
        TurnStatus::SearchCompleted {
            searched: 2,
            failed: 1
        }
    );
    assert!(!search.done);
    assert_eq!(session.state(), ResearchState::JudgingDepth);
    assert!(session.search_results()["A"][0].contains("bad gateway"));
    assert_eq!(session.search_results()["B"], ["B result"]);

    let notes = session.conversation().accumulated();
    assert!(
        notes
            .iter()
            .any(|m| m.role == Role::System && m.content.contains("bad gateway"))
    );
    assert!(
        notes
            .iter()
            .any(|m| m.role == Role::Assistant && m.content.contains("B result"))
    );
    assert_eq!(
        callback.keywords(),
        vec![("A".to_string(), false), ("B".to_string(), true)]
    );
}

#[tokio::test]
async fn test_loop_cap_bounds_search_batches() {
    let gateway = Arc::new(MockGateway::new());
    gateway.respond_when(is_judge, content("Dig deeper into [[more]]."));
    gateway.respond_when(
        |r| r.model == WORKER && r.enable_search,
        content("some result"),
    );
    gateway.queue_content("[[DeepResearchStart]]");
    gateway.queue_content("[[first]]");
    gateway.queue_content("# Capped report");
    let (engine, callback) = create_engine(gateway.clone(), 2);
    let mut session = engine.start_session();

    let mut interim = Vec::new();
    let result = engine
        .run_to_rest(&mut session, Some("topic"), |turn| {
            interim.push(turn.status.clone())
        })
        .await;

    assert_eq!(result.status, TurnStatus::ReportReady);
    assert_eq!(session.loop_count(), 2);
    assert!(interim.contains(&TurnStatus::JudgeContinue { new_keywords: 1 }));
    assert_eq!(interim.last(), Some(&TurnStatus::JudgeLoopLimit));

    let batches = interim
        .iter()
        .filter(|s| matches!(s, TurnStatus::SearchCompleted { .. }))
        .count();
    assert_eq!(batches, 2);

    let judgments = callback.judgments();
    assert_eq!(
        judgments.last(),
        Some(&(2, 2, JudgeDecision::LoopLimitReached))
    );
    // The capped judge reply is still recorded.
    assert!(
        session
            .conversation()
            .history()
            .iter()
            .any(|m| m.content.starts_with("Depth judgment (loop 2):"))
    );
}

#[tokio::test]
async fn test_end_signal_beats_keywords() {
    let gateway = Arc::new(MockGateway::new());
    gateway.queue_content("[[DeepResearchStart]]");
    gateway.queue_content("[[A]]");
    gateway.queue_content("A result");
    gateway.queue_content("Maybe [[C]] too, but [[DeepResearchEnd]]");
    gateway.queue_content("# Report");
    let (engine, _callback) = create_engine(gateway, 5);
    let mut session = engine.start_session();

    let mut interim = Vec::new();
    let result = engine
        .run_to_rest(&mut session, Some("topic"), |turn| {
            interim.push(turn.status.clone())
        })
        .await;

    assert_eq!(interim.last(), Some(&TurnStatus::JudgeEnded));
    assert_eq!(result.status, TurnStatus::ReportReady);
    assert!(session.pending_keywords().is_empty());
    assert!(!session.search_results().contains_key("C"));
}

#[tokio::test]
async fn test_latest_report_absent_after_failure_and_reset() {
    let gateway = Arc::new(MockGateway::new());
    gateway.queue_content("[[DeepResearchStart]]");
    gateway.queue_content("[[A]]");
    gateway.queue_content("A result");
    gateway.queue_content("[[DeepResearchEnd]]");
    gateway.queue_error(LlmError::Timeout { timeout_secs: 300 });
    let (engine, _callback) = create_engine(gateway.clone(), 5);
    let mut session = engine.start_session();

    let failed = engine.run_to_rest(&mut session, Some("topic"), |_| {}).await;
    assert_eq!(failed.status, TurnStatus::ReportFailed);
    assert!(failed.done);
    assert!(!failed.report_ready);
    assert_eq!(session.state(), ResearchState::Finished);
    assert_eq!(engine.latest_report(&session), None);

    // A successful follow-up round produces a report that reset discards.
    gateway.queue_content("[[DeepResearchStart]]");
    gateway.queue_content("[[B]]");
    gateway.queue_content("B result");
    gateway.queue_content("[[DeepResearchEnd]]");
    gateway.queue_content("# Second report");
    let ok = engine
        .run_to_rest(&mut session, Some("try again"), |_| {})
        .await;
    assert_eq!(ok.status, TurnStatus::ReportReady);
    assert_eq!(engine.latest_report(&session), Some("# Second report"));

    engine.reset(&mut session);
    assert_eq!(engine.latest_report(&session), None);
    assert_eq!(session.state(), ResearchState::Initial);
    assert_eq!(session.loop_count(), 0);
    assert!(session.conversation().is_empty());
}

#[tokio::test]
async fn test_finished_then_new_input_starts_new_round() {
    let gateway = Arc::new(MockGateway::new());
    gateway.queue_content("[[DeepResearchStart]]");
    gateway.queue_content("[[A]]");
    gateway.queue_content("A result");
    gateway.queue_content("[[DeepResearchEnd]]");
    gateway.queue_content("# Report");
    gateway.queue_content("Happy to go deeper. Which part of A?");
    let (engine, _callback) = create_engine(gateway.clone(), 5);
    let mut session = engine.start_session();

    engine.run_to_rest(&mut session, Some("topic"), |_| {}).await;
    let resting = engine.advance(&mut session, None).await;
    assert_eq!(resting.status, TurnStatus::Finished);
    assert!(resting.report_ready);

    let follow_up = engine
        .advance(&mut session, Some("Tell me more about A"))
        .await;
    assert_eq!(follow_up.status, TurnStatus::Conversing);
    assert!(follow_up.done);
    assert!(!follow_up.report_ready);
    assert_eq!(session.state(), ResearchState::Initial);
    assert_eq!(session.research_plan(), None);
    assert_eq!(session.latest_report(), None);
    assert_eq!(session.loop_count(), 1);
    assert_eq!(session.round_loops(), 0);
    // Earlier results are kept for the follow-up round.
    assert!(session.search_results().contains_key("A"));

    // The planner sees the whole earlier dialogue.
    let last_request = gateway.requests().pop().unwrap();
    assert!(
        last_request
            .messages
            .iter()
            .any(|m| m.content.contains("Final report:"))
    );
}

#[tokio::test]
async fn test_keyword_failure_returns_to_planning() {
    let gateway = Arc::new(MockGateway::new());
    gateway.queue_content("[[DeepResearchStart]]");
    gateway.queue_content("no brackets here");
    let (engine, _callback) = create_engine(gateway, 5);
    let mut session = engine.start_session();

    let result = engine.run_to_rest(&mut session, Some("topic"), |_| {}).await;
    assert_eq!(result.status, TurnStatus::KeywordsFailed);
    assert!(result.done);
    assert_eq!(session.state(), ResearchState::Initial);
}

#[tokio::test]
async fn test_sessions_share_one_engine() {
    let gateway = Arc::new(MockGateway::new());
    gateway.respond_when(
        |r| r.model == PLANNER && !is_judge(r),
        content("Plan [[DeepResearchStart]]"),
    );
    gateway.respond_when(|r| r.model == WORKER && !r.enable_search, content("[[k]]"));
    gateway.respond_when(|r| r.model == WORKER && r.enable_search, content("k result"));
    gateway.respond_when(is_judge, content("[[DeepResearchEnd]]"));
    gateway.respond_when(|r| r.model == WRITER, content("# Shared report"));
    let (engine, _callback) = create_engine(gateway, 5);
    let mut first = engine.start_session();
    let mut second = engine.start_session();

    let (a, b) = tokio::join!(
        engine.run_to_rest(&mut first, Some("topic one"), |_| {}),
        engine.run_to_rest(&mut second, Some("topic two"), |_| {}),
    );
    assert_eq!(a.status, TurnStatus::ReportReady);
    assert_eq!(b.status, TurnStatus::ReportReady);
    assert_ne!(first.id(), second.id());
    assert_eq!(
        first.conversation().first_user_input(),
        Some("topic one")
    );
    assert_eq!(
        second.conversation().first_user_input(),
        Some("topic two")
    );
}

fn queue_round(gateway: &MockGateway, keyword: &str) {
    gateway.queue_content("Plan ready.\n[[DeepResearchStart]]");
    gateway.queue_content(&format!("[[{keyword}]]"));
    gateway.queue_content(&format!("{keyword} result"));
    gateway.queue_content("[[DeepResearchEnd]]");
    gateway.queue_content("# Report");
}

fn search_requests_for(gateway: &MockGateway, keyword: &str) -> Vec<CompletionRequest> {
    gateway
        .requests()
        .into_iter()
        .filter(|r| is_search_for(r, keyword))
        .collect()
}

#[tokio::test]
async fn test_second_round_searches_against_its_own_request() {
    let gateway = Arc::new(MockGateway::new());
    queue_round(&gateway, "P");
    queue_round(&gateway, "Z");
    let (engine, _callback) = create_engine(gateway.clone(), 5);
    let mut session = engine.start_session();

    let first = engine
        .run_to_rest(&mut session, Some("topic about apples"), |_| {})
        .await;
    assert_eq!(first.status, TurnStatus::ReportReady);
    let second = engine
        .run_to_rest(&mut session, Some("new topic about zebras"), |_| {})
        .await;
    assert_eq!(second.status, TurnStatus::ReportReady);
    assert_eq!(session.round_request(), Some("new topic about zebras"));

    let apples = search_requests_for(&gateway, "P");
    assert_eq!(apples.len(), 1);
    assert!(apples[0].messages[1].content.contains("topic about apples"));

    let zebras = search_requests_for(&gateway, "Z");
    assert_eq!(zebras.len(), 1);
    let user_message = &zebras[0].messages[1].content;
    assert!(user_message.contains("new topic about zebras"));
    assert!(!user_message.contains("apples"));
}

#[tokio::test]
async fn test_loop_cap_applies_per_round() {
    let gateway = Arc::new(MockGateway::new());
    queue_round(&gateway, "P");
    queue_round(&gateway, "Z");
    let (engine, callback) = create_engine(gateway.clone(), 1);
    let mut session = engine.start_session();

    engine
        .run_to_rest(&mut session, Some("topic about apples"), |_| {})
        .await;
    assert_eq!(session.loop_count(), 1);

    // The lifetime count already meets the cap, yet the new round still
    // gets its own search batch and judgment.
    let second = engine
        .run_to_rest(&mut session, Some("new topic about zebras"), |_| {})
        .await;
    assert_eq!(second.status, TurnStatus::ReportReady);
    assert_eq!(search_requests_for(&gateway, "Z").len(), 1);
    assert_eq!(session.loop_count(), 2);
    assert_eq!(session.round_loops(), 1);

    let judgments = callback.judgments();
    assert_eq!(judgments.len(), 2);
    assert_eq!(judgments[0], (1, 1, JudgeDecision::LoopLimitReached));
    assert_eq!(judgments[1], (1, 1, JudgeDecision::LoopLimitReached));
}
