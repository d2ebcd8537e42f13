use crate::dedup::DedupIndex;
use reddit_client::{RawComment, RawPost, Thing};
use std::collections::HashSet;
use subvault_core::{Comment, Post};
use tracing::{debug, warn};

/// What happened to one raw item at the ingestion boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Inserted,
    Skipped,
    Buffered,
}

/// Items accumulated for one page, committed as a unit together with
/// the page's checkpoint.
#[derive(Debug, Default)]
pub struct PageBatch {
    pub posts: Vec<Post>,
    pub comments: Vec<Comment>,
    pub posts_deduped: u64,
    pub comments_deduped: u64,
    /// User-history items from other communities.
    pub foreign_posts: u64,
    pub orphaned: u64,
    buffered: Vec<Comment>,
    comment_ids: HashSet<String>,
}

/// Normalizes raw items to the stored schema and consults the dedup
/// index before anything reaches the database.
pub struct Ingestor<'a> {
    dedup: &'a mut DedupIndex,
    subreddit: String,
}

/// `[deleted]` and empty author fields map to None rather than failing.
fn normalize_author(author: &Option<String>) -> Option<String> {
    match author.as_deref() {
        None | Some("") | Some("[deleted]") | Some("[removed]") => None,
        Some(name) => Some(name.to_string()),
    }
}

fn normalize_post(raw: &RawPost, strategy: &str) -> Post {
    Post {
        id: raw.id.clone(),
        title: raw.title.clone(),
        selftext: if raw.selftext.is_empty() {
            None
        } else {
            Some(raw.selftext.clone())
        },
        author: normalize_author(&raw.author),
        created_utc: raw.created_utc as i64,
        score: raw.score,
        num_comments: raw.num_comments,
        url: if raw.is_self || raw.url.is_empty() {
            None
        } else {
            Some(raw.url.clone())
        },
        permalink: raw.permalink.clone(),
        subreddit: raw.subreddit.clone(),
        upvote_ratio: raw.upvote_ratio.unwrap_or(0.0),
        is_self: raw.is_self,
        link_flair_text: raw.link_flair_text.clone(),
        strategy: strategy.to_string(),
    }
}

/// `parent_id` is a fullname: `t3_*` means the post itself (top-level),
/// `t1_*` names the parent comment.
fn normalize_comment(raw: &RawComment, post_id: &str) -> Comment {
    let parent_comment_id = raw
        .parent_id
        .strip_prefix("t1_")
        .map(|id| id.to_string());

    Comment {
        id: raw.id.clone(),
        post_id: post_id.to_string(),
        parent_comment_id,
        body: raw.body.clone(),
        author: normalize_author(&raw.author),
        created_utc: raw.created_utc as i64,
        score: raw.score,
        permalink: raw.permalink.clone(),
        depth: raw.depth,
        is_submitter: raw.is_submitter,
        orphaned: false,
    }
}

impl<'a> Ingestor<'a> {
    pub fn new(dedup: &'a mut DedupIndex, subreddit: &str) -> Self {
        Self {
            dedup,
            subreddit: subreddit.to_string(),
        }
    }

    /// Run a whole page through ingestion. `post_id` is the owning post
    /// for comment-tree pages; listing pages carry it on each item.
    pub fn ingest_page(
        &mut self,
        things: &[Thing],
        post_id: Option<&str>,
        strategy: &str,
    ) -> PageBatch {
        let mut batch = PageBatch::default();
        for thing in things {
            match thing {
                Thing::Post(raw) => {
                    self.ingest_post(raw, strategy, &mut batch);
                }
                Thing::Comment(raw) => match post_id {
                    Some(post_id) => {
                        self.ingest_comment(raw, post_id, &mut batch);
                    }
                    None => {
                        warn!("Comment {} outside a comment-tree page, skipping", raw.id);
                    }
                },
            }
        }
        self.flush_buffered(&mut batch);
        batch
    }

    pub fn ingest_post(
        &mut self,
        raw: &RawPost,
        strategy: &str,
        batch: &mut PageBatch,
    ) -> IngestOutcome {
        if !raw.subreddit.eq_ignore_ascii_case(&self.subreddit) {
            batch.foreign_posts += 1;
            return IngestOutcome::Skipped;
        }
        if self.dedup.seen_post(&raw.id) {
            batch.posts_deduped += 1;
            return IngestOutcome::Skipped;
        }

        batch.posts.push(normalize_post(raw, strategy));
        IngestOutcome::Inserted
    }

    pub fn ingest_comment(
        &mut self,
        raw: &RawComment,
        post_id: &str,
        batch: &mut PageBatch,
    ) -> IngestOutcome {
        if self.dedup.seen_comment(&raw.id) {
            batch.comments_deduped += 1;
            return IngestOutcome::Skipped;
        }

        let comment = normalize_comment(raw, post_id);
        match &comment.parent_comment_id {
            Some(parent)
                if !self.dedup.seen_comment(parent) && !batch.comment_ids.contains(parent) =>
            {
                // Parent not stored and not in this batch yet; hold the
                // comment back until the page has been fully walked.
                batch.buffered.push(comment);
                IngestOutcome::Buffered
            }
            _ => {
                batch.comment_ids.insert(comment.id.clone());
                batch.comments.push(comment);
                IngestOutcome::Inserted
            }
        }
    }

    /// Retry buffered comments now that the batch is complete; whatever
    /// still has no parent is kept with the orphan flag, never dropped.
    pub fn flush_buffered(&mut self, batch: &mut PageBatch) {
        loop {
            let mut progressed = false;
            let mut still_waiting = Vec::new();

            for comment in batch.buffered.drain(..) {
                let parent_known = comment.parent_comment_id.as_deref().is_some_and(|parent| {
                    self.dedup.seen_comment(parent) || batch.comment_ids.contains(parent)
                });
                if parent_known {
                    batch.comment_ids.insert(comment.id.clone());
                    batch.comments.push(comment);
                    progressed = true;
                } else {
                    still_waiting.push(comment);
                }
            }

            batch.buffered = still_waiting;
            if !progressed {
                break;
            }
        }

        for mut comment in batch.buffered.drain(..) {
            debug!(
                "Comment {} has no parent {:?} in store or batch, keeping as orphan",
                comment.id, comment.parent_comment_id
            );
            comment.orphaned = true;
            batch.orphaned += 1;
            batch.comments.push(comment);
        }
    }
}
