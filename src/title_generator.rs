//! Conversation title generation
//!
//! Asks the model for a short title based on the first user message. Best
//! effort only: a timeout or model error leaves the conversation on the slug
//! it was created with, and never disturbs the main turn loop.

use crate::model::ModelSession;
use std::time::Duration;
use tokio::time::timeout;

const TITLE_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_TITLE_LENGTH: usize = 60;
const MAX_SEED_LENGTH: usize = 500;

/// Generate a title for a conversation based on the initial message.
///
/// Returns None if title generation fails (timeout, error, empty reply).
pub async fn generate_title<M: ModelSession + ?Sized>(session: &M, seed: &str) -> Option<String> {
    let truncated = truncate_chars(seed, MAX_SEED_LENGTH);

    let result = timeout(TITLE_TIMEOUT, session.generate_title(&truncated)).await;

    match result {
        Ok(Ok(raw)) => {
            let title = sanitize_title(&raw);
            if title.is_empty() {
                None
            } else {
                Some(title)
            }
        }
        Ok(Err(e)) => {
            tracing::warn!("Title generation failed: {}", e.message);
            None
        }
        Err(_) => {
            tracing::warn!("Title generation timed out");
            None
        }
    }
}

/// Clean up a model-produced title: drop wrapping quotes, collapse
/// whitespace, and truncate at a word boundary.
fn sanitize_title(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches(['"', '\'', '`']).trim();
    let collapsed = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= MAX_TITLE_LENGTH {
        return collapsed;
    }

    let truncated = truncate_chars(&collapsed, MAX_TITLE_LENGTH);
    match truncated.rfind(' ') {
        Some(last_space) => truncated.get(..last_space).unwrap_or(&truncated).to_string(),
        None => truncated,
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
