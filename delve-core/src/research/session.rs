//! Research session state machine.
//!
//! A session is owned by the host and passed to the engine by `&mut`. Its
//! fields are private so the invariants hold: the loop counter only grows,
//! pending keywords never repeat, and a report exists only after a
//! successful synthesis.

use super::conversation::ConversationStore;
use super::judge::JudgeDecision;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

/// Current stage of a research session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchState {
    /// Conversing with the planner until it emits the start signal.
    Initial,
    /// Turning the plan into search keywords.
    GeneratingKeywords,
    /// Running a batch of keyword searches.
    Searching,
    /// Deciding whether more searching is needed.
    JudgingDepth,
    /// Synthesizing the final report.
    GeneratingReport,
    /// Round complete.
    Finished,
}

impl ResearchState {
    /// States in which the engine waits for the host to supply input.
    pub fn is_resting(self) -> bool {
        matches!(self, ResearchState::Initial | ResearchState::Finished)
    }

    /// Whether `self -> next` is an edge of the workflow graph.
    pub fn can_transition_to(self, next: ResearchState) -> bool {
        use ResearchState::*;
        matches!(
            (self, next),
            (Initial, Initial)
                | (Initial, GeneratingKeywords)
                | (GeneratingKeywords, Searching)
                | (GeneratingKeywords, Initial)
                | (Searching, JudgingDepth)
                | (JudgingDepth, Searching)
                | (JudgingDepth, GeneratingReport)
                | (GeneratingReport, Finished)
                | (Finished, Initial)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResearchState::Initial => "initial",
            ResearchState::GeneratingKeywords => "generating_keywords",
            ResearchState::Searching => "searching",
            ResearchState::JudgingDepth => "judging_depth",
            ResearchState::GeneratingReport => "generating_report",
            ResearchState::Finished => "finished",
        }
    }
}

impl std::fmt::Display for ResearchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A caller-owned research session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchSession {
    id: Uuid,
    state: ResearchState,
    conversation: ConversationStore,
    #[serde(default)]
    round_request: Option<String>,
    research_plan: Option<String>,
    pending_keywords: Vec<String>,
    search_results: BTreeMap<String, Vec<String>>,
    loop_count: u32,
    round_loop_base: u32,
    latest_report: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Default for ResearchSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ResearchSession {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            state: ResearchState::Initial,
            conversation: ConversationStore::new(),
            round_request: None,
            research_plan: None,
            pending_keywords: Vec::new(),
            search_results: BTreeMap::new(),
            loop_count: 0,
            round_loop_base: 0,
            latest_report: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ResearchState {
        self.state
    }

    pub fn conversation(&self) -> &ConversationStore {
        &self.conversation
    }

    pub fn conversation_mut(&mut self) -> &mut ConversationStore {
        self.touch();
        &mut self.conversation
    }

    /// The user input that opened the current research round.
    pub fn round_request(&self) -> Option<&str> {
        self.round_request.as_deref()
    }

    /// Remember `text` as the round's opening request unless one is already set.
    pub fn note_round_request(&mut self, text: &str) {
        if self.round_request.is_none() && !text.trim().is_empty() {
            self.round_request = Some(text.trim().to_string());
            self.touch();
        }
    }

    pub fn research_plan(&self) -> Option<&str> {
        self.research_plan.as_deref()
    }

    pub fn pending_keywords(&self) -> &[String] {
        &self.pending_keywords
    }

    /// Results per keyword, in append order.
    pub fn search_results(&self) -> &BTreeMap<String, Vec<String>> {
        &self.search_results
    }

    /// Total judgments over the session's lifetime.
    pub fn loop_count(&self) -> u32 {
        self.loop_count
    }

    /// Judgments in the current research round. This, not
    /// [`loop_count`](Self::loop_count), is compared against the loop cap.
    pub fn round_loops(&self) -> u32 {
        self.loop_count - self.round_loop_base
    }

    pub fn latest_report(&self) -> Option<&str> {
        self.latest_report.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Move to `next` if the workflow graph allows it.
    ///
    /// Returns false and leaves the state unchanged otherwise.
    pub fn transition(&mut self, next: ResearchState) -> bool {
        if !self.state.can_transition_to(next) {
            warn!(
                session = %self.id,
                from = %self.state,
                to = %next,
                "Refusing illegal state transition"
            );
            return false;
        }
        self.state = next;
        self.touch();
        true
    }

    pub fn set_research_plan(&mut self, plan: impl Into<String>) {
        self.research_plan = Some(plan.into());
        self.touch();
    }

    /// Append keywords not already pending. Returns how many were added.
    pub fn enqueue_keywords<I, S>(&mut self, keywords: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut added = 0;
        for keyword in keywords {
            let keyword = keyword.into();
            let keyword = keyword.trim();
            if keyword.is_empty() || self.pending_keywords.iter().any(|k| k == keyword) {
                continue;
            }
            self.pending_keywords.push(keyword.to_string());
            added += 1;
        }
        if added > 0 {
            self.touch();
        }
        added
    }

    /// Drain every pending keyword as one search batch.
    pub fn take_pending_batch(&mut self) -> Vec<String> {
        self.touch();
        std::mem::take(&mut self.pending_keywords)
    }

    /// Append a result under `keyword`, skipping exact duplicates.
    ///
    /// Returns false when the same text was already stored for the keyword.
    pub fn record_search_result(&mut self, keyword: &str, result: impl Into<String>) -> bool {
        let result = result.into();
        let entries = self.search_results.entry(keyword.to_string()).or_default();
        if entries.contains(&result) {
            return false;
        }
        entries.push(result);
        self.touch();
        true
    }

    /// Count one judgment pass and return the round's judgment count.
    pub fn begin_judgment(&mut self) -> u32 {
        self.loop_count += 1;
        self.touch();
        self.round_loops()
    }

    /// Store the synthesized report and finish the round.
    pub fn finish_with_report(&mut self, report: impl Into<String>) -> bool {
        if !self.transition(ResearchState::Finished) {
            return false;
        }
        self.latest_report = Some(report.into());
        true
    }

    /// Finish the round without a report.
    pub fn finish_without_report(&mut self) -> bool {
        if !self.transition(ResearchState::Finished) {
            return false;
        }
        self.latest_report = None;
        true
    }

    /// Leave `Finished` for a new round.
    ///
    /// The opening request, plan, pending keywords and report are cleared.
    /// Conversation and search results are kept so follow-up research can
    /// build on them.
    pub fn start_new_round(&mut self) -> bool {
        if self.state != ResearchState::Finished || !self.transition(ResearchState::Initial) {
            return false;
        }
        self.round_request = None;
        self.research_plan = None;
        self.pending_keywords.clear();
        self.latest_report = None;
        self.round_loop_base = self.loop_count;
        true
    }

    /// Discard everything and return to `Initial`. The session id is kept.
    pub fn reset(&mut self) {
        self.state = ResearchState::Initial;
        self.conversation.clear();
        self.round_request = None;
        self.research_plan = None;
        self.pending_keywords.clear();
        self.search_results.clear();
        self.loop_count = 0;
        self.round_loop_base = 0;
        self.latest_report = None;
        self.touch();
    }

    /// A serializable summary for status displays.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            state: self.state,
            loop_count: self.loop_count,
            round_loops: self.round_loops(),
            has_plan: self.research_plan.is_some(),
            pending_keywords: self.pending_keywords.clone(),
            searched_keywords: self.search_results.keys().cloned().collect(),
            result_count: self.search_results.values().map(Vec::len).sum(),
            history_len: self.conversation.history().len(),
            accumulated_len: self.conversation.accumulated().len(),
            report_ready: self.latest_report.is_some(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Point-in-time summary of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub state: ResearchState,
    pub loop_count: u32,
    pub round_loops: u32,
    pub has_plan: bool,
    pub pending_keywords: Vec<String>,
    pub searched_keywords: Vec<String>,
    pub result_count: usize,
    pub history_len: usize,
    pub accumulated_len: usize,
    pub report_ready: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Callback trait for research progress updates.
pub trait ResearchCallback: Send + Sync {
    /// Called after every state change.
    fn on_state_change(&self, from: ResearchState, to: ResearchState);
    /// Called once per keyword after its search completes.
    fn on_keyword_complete(&self, keyword: &str, succeeded: bool);
    /// Called after each depth judgment.
    fn on_judgment(&self, round_loops: u32, cap: u32, decision: &JudgeDecision);
    /// Called when a counted judgment pass got no usable reply from the model.
    fn on_judgment_failed(&self, round_loops: u32, cap: u32, error: &str);
}

/// No-op callback.
pub struct NoOpResearchCallback;

impl ResearchCallback for NoOpResearchCallback {
    fn on_state_change(&self, _from: ResearchState, _to: ResearchState) {}
    fn on_keyword_complete(&self, _keyword: &str, _succeeded: bool) {}
    fn on_judgment(&self, _round_loops: u32, _cap: u32, _decision: &JudgeDecision) {}
    fn on_judgment_failed(&self, _round_loops: u32, _cap: u32, _error: &str) {}
}

/// Callback that records every event, for tests and diagnostics.
#[derive(Default)]
pub struct RecordingResearchCallback {
    transitions: Mutex<Vec<(ResearchState, ResearchState)>>,
    keywords: Mutex<Vec<(String, bool)>>,
    judgments: Mutex<Vec<(u32, u32, JudgeDecision)>>,
    failed_judgments: Mutex<Vec<(u32, u32, String)>>,
}

impl RecordingResearchCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transitions(&self) -> Vec<(ResearchState, ResearchState)> {
        self.transitions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn keywords(&self) -> Vec<(String, bool)> {
        self.keywords
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn judgments(&self) -> Vec<(u32, u32, JudgeDecision)> {
        self.judgments
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn failed_judgments(&self) -> Vec<(u32, u32, String)> {
        self.failed_judgments
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl ResearchCallback for RecordingResearchCallback {
    fn on_state_change(&self, from: ResearchState, to: ResearchState) {
        self.transitions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((from, to));
    }

    fn on_keyword_complete(&self, keyword: &str, succeeded: bool) {
        self.keywords
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((keyword.to_string(), succeeded));
    }

    fn on_judgment(&self, round_loops: u32, cap: u32, decision: &JudgeDecision) {
        self.judgments
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((round_loops, cap, decision.clone()));
    }

    fn on_judgment_failed(&self, round_loops: u32, cap: u32, error: &str) {
        self.failed_judgments
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((round_loops, cap, error.to_string()));
    }
}
