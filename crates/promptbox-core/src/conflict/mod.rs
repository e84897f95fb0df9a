//! Checksum and time-window conflict classification.
//!
//! Two copies of the same prompt either carry the same content (only metadata
//! is merged), differ within the conflict window (the later edit wins), or
//! differ by more than the window and need a user decision.

mod resolver;

pub use resolver::{ConflictResolver, ResolutionOutcome};

use crate::checksum::checksums_match;
use crate::models::Prompt;

/// Maximum update-time distance, inclusive, for automatic resolution.
pub const CONFLICT_WINDOW_MS: i64 = 30_000;

/// Which copy of a prompt a decision refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Local,
    Remote,
}

/// Outcome of comparing a local and a remote copy of one prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Same content; metadata merged into the remote copy
    Merged(Prompt),
    /// Content differs within the window; the later edit wins outright
    AutoResolved { winner: Side, prompt: Prompt },
    /// Content differs outside the window; both copies are kept
    Manual { delta_ms: i64 },
}

/// Absolute distance between the two update times in milliseconds.
pub fn update_delta_ms(local: &Prompt, remote: &Prompt) -> i64 {
    (local.updated_at - remote.updated_at)
        .num_milliseconds()
        .abs()
}

pub const fn within_window(delta_ms: i64, window_ms: i64) -> bool {
    delta_ms <= window_ms
}

/// Merge metadata of two copies with identical content.
///
/// The remote copy is the base. Pinned is OR-ed, sort order takes the minimum
/// and the tag set follows the local copy, which is what the server applies
/// when the local copy is uploaded.
pub fn merge_metadata(local: &Prompt, remote: &Prompt) -> Prompt {
    let mut merged = remote.clone();
    merged.pinned = local.pinned || remote.pinned;
    merged.sort_order = local.sort_order.min(remote.sort_order);
    merged.tags.clone_from(&local.tags);
    if merged.archived_at.is_none() {
        merged.archived_at = local.archived_at;
    }
    if merged != *remote {
        tracing::debug!(
            "Merged metadata for {} (pinned {}, order {})",
            merged.id,
            merged.pinned,
            merged.sort_order
        );
    }
    merged
}

/// Classify a local/remote pair of the same prompt.
///
/// An exact tie in update time inside the window resolves to the remote copy.
pub fn classify(local: &Prompt, remote: &Prompt, window_ms: i64) -> Classification {
    if checksums_match(&local.checksum, &remote.checksum) {
        return Classification::Merged(merge_metadata(local, remote));
    }

    let delta_ms = update_delta_ms(local, remote);
    if within_window(delta_ms, window_ms) {
        let (winner, prompt) = if local.updated_at > remote.updated_at {
            (Side::Local, local.clone())
        } else {
            (Side::Remote, remote.clone())
        };
        return Classification::AutoResolved { winner, prompt };
    }

    Classification::Manual { delta_ms }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LOCAL_OWNER;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn pair(local_title: &str, remote_title: &str, delta: Duration) -> (Prompt, Prompt) {
        let local = Prompt::new(LOCAL_OWNER, local_title, "body");
        let mut remote = local.clone();
        remote.set_text(remote_title, "body");
        remote.updated_at = local.updated_at + delta;
        (local, remote)
    }

    #[test]
    fn window_boundary_is_inclusive() {
        let (local, remote) = pair("Draft", "Draft v2", Duration::milliseconds(30_000));
        assert!(matches!(
            classify(&local, &remote, CONFLICT_WINDOW_MS),
            Classification::AutoResolved {
                winner: Side::Remote,
                ..
            }
        ));

        let (local, remote) = pair("Draft", "Draft v2", Duration::milliseconds(30_001));
        assert_eq!(
            classify(&local, &remote, CONFLICT_WINDOW_MS),
            Classification::Manual { delta_ms: 30_001 }
        );
    }

    #[test]
    fn later_remote_edit_wins_inside_window() {
        let (local, remote) = pair("Draft", "Draft v2", Duration::seconds(10));
        let Classification::AutoResolved { winner, prompt } =
            classify(&local, &remote, CONFLICT_WINDOW_MS)
        else {
            panic!("expected auto resolution");
        };
        assert_eq!(winner, Side::Remote);
        assert_eq!(prompt.title, "Draft v2");
    }

    #[test]
    fn later_local_edit_wins_inside_window() {
        let (local, remote) = pair("Draft", "Draft v2", Duration::seconds(-10));
        let Classification::AutoResolved { winner, prompt } =
            classify(&local, &remote, CONFLICT_WINDOW_MS)
        else {
            panic!("expected auto resolution");
        };
        assert_eq!(winner, Side::Local);
        assert_eq!(prompt.title, "Draft");
    }

    #[test]
    fn exact_tie_goes_to_remote() {
        let (local, remote) = pair("Draft", "Draft v2", Duration::zero());
        assert!(matches!(
            classify(&local, &remote, CONFLICT_WINDOW_MS),
            Classification::AutoResolved {
                winner: Side::Remote,
                ..
            }
        ));
    }

    #[test]
    fn five_minutes_apart_is_manual() {
        let (local, remote) = pair("Draft", "Other", Duration::minutes(5));
        assert_eq!(
            classify(&local, &remote, CONFLICT_WINDOW_MS),
            Classification::Manual { delta_ms: 300_000 }
        );
    }

    #[test]
    fn identical_content_merges_metadata() {
        let (mut local, mut remote) = pair("Same", "Same", Duration::hours(2));
        local.pinned = true;
        local.sort_order = 7;
        remote.pinned = false;
        remote.sort_order = 3;

        let Classification::Merged(merged) = classify(&local, &remote, CONFLICT_WINDOW_MS) else {
            panic!("expected metadata merge");
        };
        assert!(merged.pinned);
        assert_eq!(merged.sort_order, 3);
        assert_eq!(merged.updated_at, remote.updated_at);
    }

    #[test]
    fn whitespace_only_difference_is_not_a_conflict() {
        let local = Prompt::new(LOCAL_OWNER, "Title", "line one\nline two");
        let mut remote = local.clone();
        remote.set_text("Title  ", "line one   \r\nline two\n\n");
        remote.updated_at = local.updated_at + Duration::hours(1);

        assert!(matches!(
            classify(&local, &remote, CONFLICT_WINDOW_MS),
            Classification::Merged(_)
        ));
    }
}
