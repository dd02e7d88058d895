//! Deep research workflow — a stateful, multi-turn research pipeline.
//!
//! Sequences five stages over a caller-owned [`ResearchSession`]:
//! 1. **Plan** — converse with the planner model until it emits the start signal
//! 2. **Keywords** — extract `[[keyword]]` search terms from the plan
//! 3. **Search** — fan out one search-enabled completion per keyword, then merge
//! 4. **Judge** — decide whether to search again, bounded by the loop cap
//! 5. **Report** — synthesize the accumulated log into a final report
//!
//! [`ResearchEngine::advance`] runs exactly one stage per call and reports
//! through [`TurnResult::done`] whether the host should call again.

pub mod conversation;
pub mod engine;
pub mod fanout;
pub mod judge;
pub mod keywords;
pub mod planning;
pub mod prompts;
pub mod report;
pub mod session;
mod stage;

pub use conversation::ConversationStore;
pub use engine::{ResearchEngine, TurnResult, TurnStatus};
pub use judge::JudgeDecision;
pub use keywords::{extract_bracket_tokens, parse_keywords};
pub use prompts::{END_SIGNAL, START_SIGNAL};
pub use session::{
    NoOpResearchCallback, RecordingResearchCallback, ResearchCallback, ResearchSession,
    ResearchState, SessionSnapshot,
};
