use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A snapshot of a Reddit submission at scrape time.
///
/// `id` is the platform-assigned base36 identifier and the primary key;
/// re-ingesting a known id is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Post {
    pub id: String,
    pub title: String,
    /// Self-text body. None for link posts and empty selftexts.
    pub selftext: Option<String>,
    /// None when the account has been deleted.
    pub author: Option<String>,
    pub created_utc: i64,
    pub score: i64,
    pub num_comments: i64,
    /// External URL for link posts; None for self posts.
    pub url: Option<String>,
    pub permalink: String,
    pub subreddit: String,
    pub upvote_ratio: f64,
    pub is_self: bool,
    pub link_flair_text: Option<String>,
    /// Which collection strategy first surfaced this post.
    pub strategy: String,
}

/// A single comment, flattened out of the tree the API returns.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    /// None for top-level comments (parent is the post itself).
    pub parent_comment_id: Option<String>,
    pub body: String,
    pub author: Option<String>,
    pub created_utc: i64,
    pub score: i64,
    pub permalink: String,
    /// 0 for top-level, parent depth + 1 otherwise.
    pub depth: i64,
    pub is_submitter: bool,
    /// Set when the parent comment was missing at commit time.
    pub orphaned: bool,
}

/// Durable progress marker for one strategy segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointState {
    NotStarted,
    InProgress { cursor: Option<String> },
    Completed,
}

impl CheckpointState {
    pub fn is_completed(&self) -> bool {
        matches!(self, CheckpointState::Completed)
    }

    pub fn cursor(&self) -> Option<&str> {
        match self {
            CheckpointState::InProgress { cursor } => cursor.as_deref(),
            _ => None,
        }
    }
}

/// Terminal accounting for one scraping run. Printed whether the run
/// finished cleanly or gave up on segments along the way.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub subreddit: String,
    pub posts_inserted: u64,
    pub posts_skipped: u64,
    pub comments_inserted: u64,
    pub comments_skipped: u64,
    pub orphaned_comments: u64,
    pub segments_completed: u64,
    pub segments_abandoned: u64,
    pub parse_failures: u64,
    pub requests_issued: u64,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "run {} for r/{}", self.run_id, self.subreddit)?;
        writeln!(
            f,
            "  posts: {} new, {} already known",
            self.posts_inserted, self.posts_skipped
        )?;
        writeln!(
            f,
            "  comments: {} new, {} already known, {} orphaned",
            self.comments_inserted, self.comments_skipped, self.orphaned_comments
        )?;
        writeln!(
            f,
            "  segments: {} completed, {} abandoned",
            self.segments_completed, self.segments_abandoned
        )?;
        write!(
            f,
            "  requests issued: {}, malformed items skipped: {}",
            self.requests_issued, self.parse_failures
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_state_accessors() {
        assert!(CheckpointState::Completed.is_completed());
        assert!(!CheckpointState::NotStarted.is_completed());

        let in_progress = CheckpointState::InProgress {
            cursor: Some("t3_abc".to_string()),
        };
        assert_eq!(in_progress.cursor(), Some("t3_abc"));
        assert_eq!(CheckpointState::NotStarted.cursor(), None);
        assert_eq!(CheckpointState::Completed.cursor(), None);
    }

    #[test]
    fn summary_renders_all_counters() {
        let summary = RunSummary {
            run_id: "r1".to_string(),
            subreddit: "notebooklm".to_string(),
            posts_inserted: 10,
            segments_abandoned: 2,
            ..Default::default()
        };
        let rendered = summary.to_string();
        assert!(rendered.contains("r/notebooklm"));
        assert!(rendered.contains("10 new"));
        assert!(rendered.contains("2 abandoned"));
    }
}
