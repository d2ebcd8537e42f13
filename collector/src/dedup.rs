use database::Database;
use std::collections::HashSet;
use subvault_core::CoreError;
use tracing::info;

/// Process-local index of every item id already in the store.
///
/// Rebuilt from storage on startup and grown monotonically during the
/// run; the primary keys in SQLite back it durably.
#[derive(Debug, Default)]
pub struct DedupIndex {
    posts: HashSet<String>,
    comments: HashSet<String>,
}

impl DedupIndex {
    pub async fn load(db: &Database) -> Result<Self, CoreError> {
        let posts: HashSet<String> = db.post_ids().await?.into_iter().collect();
        let comments: HashSet<String> = db.comment_ids().await?.into_iter().collect();
        info!(
            "Dedup index loaded: {} posts, {} comments already known",
            posts.len(),
            comments.len()
        );
        Ok(Self { posts, comments })
    }

    pub fn seen_post(&self, id: &str) -> bool {
        self.posts.contains(id)
    }

    pub fn mark_post(&mut self, id: &str) {
        self.posts.insert(id.to_string());
    }

    pub fn seen_comment(&self, id: &str) -> bool {
        self.comments.contains(id)
    }

    pub fn mark_comment(&mut self, id: &str) {
        self.comments.insert(id.to_string());
    }

    pub fn known_posts(&self) -> usize {
        self.posts.len()
    }

    pub fn known_comments(&self) -> usize {
        self.comments.len()
    }
}
