//! Prompt assembly helpers shared by the research stages.

use chrono::Utc;
use chrono_tz::Tz;
use tracing::warn;

/// Planner marker that starts the automated research pipeline.
pub const START_SIGNAL: &str = "[[DeepResearchStart]]";
/// Judge marker that ends the search loop.
pub const END_SIGNAL: &str = "[[DeepResearchEnd]]";
/// Placeholder in the search prompt replaced by the bracketed keyword.
pub const KEYWORD_PLACEHOLDER: &str = "[[keyword]]";
/// Placeholder in the time template replaced by the current time.
pub const TIME_PLACEHOLDER: &str = "{{Date::Time}}";

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S %Z";

/// Render the time template for the configured timezone.
///
/// An unknown timezone falls back to UTC. An empty template yields an empty
/// string.
pub fn time_prefix(template: &str, timezone: &str) -> String {
    if template.trim().is_empty() {
        return String::new();
    }
    let now = match timezone.parse::<Tz>() {
        Ok(tz) => Utc::now().with_timezone(&tz).format(TIME_FORMAT).to_string(),
        Err(_) => {
            warn!(timezone, "Unknown timezone, rendering time prefix in UTC");
            Utc::now().format(TIME_FORMAT).to_string()
        }
    };
    template.replace(TIME_PLACEHOLDER, &now)
}

/// Prefix a system prompt with the rendered time template.
pub fn with_time_prefix(prefix: &str, prompt: &str) -> String {
    match (prefix.trim().is_empty(), prompt.trim().is_empty()) {
        (true, _) => prompt.to_string(),
        (false, true) => prefix.trim().to_string(),
        (false, false) => format!("{}\n\n{}", prefix.trim(), prompt),
    }
}

/// Substitute the bracketed keyword into a search prompt.
pub fn search_prompt(template: &str, keyword: &str) -> String {
    template.replace(KEYWORD_PLACEHOLDER, &bracketed(keyword))
}

/// `keyword` -> `[[keyword]]`.
pub fn bracketed(keyword: &str) -> String {
    format!("[[{keyword}]]")
}

/// Join keywords as `[[a]], [[b]]`.
pub fn bracketed_list(keywords: &[String]) -> String {
    keywords
        .iter()
        .map(|k| bracketed(k))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Truncate to at most `max_chars` characters, appending `...` when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}
