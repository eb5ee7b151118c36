//! Catch-up extraction (§4.G step 3): episodes logged by an outer layer
//! that never ran through §4.F at turn time. Each is stored as a
//! `"USER: … FRIEND: …"` transcript; this reconstructs just the user's
//! side and feeds it through the extractor like any other episode.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;
use vigil_memory::manager::MemoryStore;
use vigil_memory::types::Episode;
use vigil_scheduler::types::derive_is_group;
use vigil_extractor::MemoryExtractor;

use crate::error::Result;

/// Extracts the `USER:` turn from a `"USER: … FRIEND: …"` transcript.
/// `None` when there's no `USER:` marker at all — an unparseable episode.
pub fn parse_user_turn(content: &str) -> Option<String> {
    let after_user = content.split_once("USER:")?.1;
    let user_text = match after_user.split_once("FRIEND:") {
        Some((before, _)) => before,
        None => after_user,
    };
    let trimmed = user_text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Runs the catch-up pass over up to `max_episodes` globally unextracted
/// episodes. Each episode is independently recoverable: a failure on one
/// doesn't block the rest, and every episode is marked extracted by the
/// end of this call (either by the extractor or directly here when
/// unparseable), so a crash mid-run never causes the same episode to be
/// retried forever once it's processed.
pub async fn run_catch_up_extraction(
    memory: &Arc<MemoryStore>,
    extractor: &MemoryExtractor,
    max_episodes: usize,
    cancel: CancellationToken,
) -> Result<usize> {
    let episodes = memory.list_unextracted_episodes_global(max_episodes)?;
    let mut processed = 0;

    for episode in episodes {
        if cancel.is_cancelled() {
            break;
        }

        let Some(user_text) = parse_user_turn(&episode.content) else {
            warn!(episode_id = %episode.episode_id, "unparseable episode content, marking extracted");
            memory.mark_episode_extracted(episode.episode_id)?;
            processed += 1;
            continue;
        };

        let chat_id = episode.chat_id.clone();
        let is_group = derive_is_group(&chat_id);
        let minimal_episode = Episode { content: user_text, ..episode };

        extractor
            .extract_episode(&minimal_episode, &chat_id, is_group, cancel.clone())
            .await?;
        processed += 1;
    }

    Ok(processed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_user_half_of_a_transcript() {
        let content = "USER: I just started a new job at Initech FRIEND: that's exciting!";
        assert_eq!(parse_user_turn(content).as_deref(), Some("I just started a new job at Initech"));
    }

    #[test]
    fn parses_a_user_only_transcript_with_no_friend_half() {
        let content = "USER: just checking in";
        assert_eq!(parse_user_turn(content).as_deref(), Some("just checking in"));
    }

    #[test]
    fn content_without_a_user_marker_is_unparseable() {
        assert_eq!(parse_user_turn("a narrator note with no markers"), None);
    }
}
