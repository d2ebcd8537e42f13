pub mod export;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use subvault_core::{CheckpointState, Comment, CoreError, DatabaseError, Post};
use tracing::{debug, info};

#[cfg(test)]
mod tests;

/// Schema, created on connect. Item tables are keyed by the platform id
/// so re-ingestion is a no-op at the storage layer too.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS posts (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        selftext TEXT,
        author TEXT,
        created_utc INTEGER NOT NULL,
        score INTEGER NOT NULL,
        num_comments INTEGER NOT NULL,
        url TEXT,
        permalink TEXT NOT NULL,
        subreddit TEXT NOT NULL,
        upvote_ratio REAL NOT NULL,
        is_self INTEGER NOT NULL,
        link_flair_text TEXT,
        strategy TEXT NOT NULL,
        scraped_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
    )",
    "CREATE TABLE IF NOT EXISTS comments (
        id TEXT PRIMARY KEY,
        post_id TEXT NOT NULL REFERENCES posts(id),
        parent_comment_id TEXT,
        body TEXT NOT NULL,
        author TEXT,
        created_utc INTEGER NOT NULL,
        score INTEGER NOT NULL,
        permalink TEXT NOT NULL,
        depth INTEGER NOT NULL,
        is_submitter INTEGER NOT NULL,
        orphaned INTEGER NOT NULL DEFAULT 0,
        scraped_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
    )",
    "CREATE TABLE IF NOT EXISTS checkpoints (
        key TEXT PRIMARY KEY,
        strategy TEXT NOT NULL,
        state TEXT NOT NULL,
        cursor TEXT,
        updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
    )",
    "CREATE INDEX IF NOT EXISTS idx_posts_created_utc ON posts(created_utc)",
    "CREATE INDEX IF NOT EXISTS idx_posts_author ON posts(author)",
    "CREATE INDEX IF NOT EXISTS idx_comments_post_id ON comments(post_id)",
];

/// Per-page write accounting, folded into the run summary.
#[derive(Debug, Default, Clone, Copy)]
pub struct PageCounts {
    pub posts_inserted: u64,
    pub posts_skipped: u64,
    pub comments_inserted: u64,
    pub comments_skipped: u64,
}

pub(crate) fn sql_err(e: sqlx::Error) -> CoreError {
    CoreError::Database(DatabaseError::Sql(e))
}

/// Durable store for posts, comments and strategy checkpoints.
///
/// One scraping process per database file; the pool is capped at a
/// single connection, which also keeps SQLite writes serialized.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn connect(database_url: &str) -> Result<Self, CoreError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(sql_err)?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| {
                CoreError::Database(DatabaseError::ConnectionFailed {
                    reason: e.to_string(),
                })
            })?;

        let database = Self { pool };
        database.run_migrations().await?;
        Ok(database)
    }

    async fn run_migrations(&self) -> Result<(), CoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|_| {
                    CoreError::Database(DatabaseError::MigrationFailed {
                        migration: statement.lines().next().unwrap_or("").trim().to_string(),
                    })
                })?;
        }
        debug!("Schema ready");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Commit one page of items together with its checkpoint. This is
    /// the atomic unit of progress: an interrupted run either has the
    /// page and the advanced checkpoint, or neither.
    pub async fn commit_page(
        &self,
        posts: &[Post],
        comments: &[Comment],
        key: &str,
        strategy: &str,
        state: &CheckpointState,
    ) -> Result<PageCounts, CoreError> {
        let mut tx = self.pool.begin().await.map_err(sql_err)?;
        let mut counts = PageCounts::default();

        for post in posts {
            if insert_post(&mut tx, post).await? {
                counts.posts_inserted += 1;
            } else {
                counts.posts_skipped += 1;
            }
        }
        for comment in comments {
            if insert_comment(&mut tx, comment).await? {
                counts.comments_inserted += 1;
            } else {
                counts.comments_skipped += 1;
            }
        }
        upsert_checkpoint(&mut tx, key, strategy, state).await?;

        tx.commit().await.map_err(|e| {
            CoreError::Database(DatabaseError::TransactionFailed {
                reason: e.to_string(),
            })
        })?;

        debug!(
            "Committed page for {}: +{} posts, +{} comments",
            key, counts.posts_inserted, counts.comments_inserted
        );
        Ok(counts)
    }

    pub async fn checkpoint(&self, key: &str) -> Result<CheckpointState, CoreError> {
        let row: Option<(String, Option<String>)> =
            sqlx::query_as("SELECT state, cursor FROM checkpoints WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(sql_err)?;

        match row {
            None => Ok(CheckpointState::NotStarted),
            Some((state, cursor)) => match state.as_str() {
                "in_progress" => Ok(CheckpointState::InProgress { cursor }),
                "completed" => Ok(CheckpointState::Completed),
                other => Err(CoreError::Database(DatabaseError::CorruptCheckpoint {
                    value: other.to_string(),
                })),
            },
        }
    }

    /// All known post ids, for rebuilding the dedup index on startup.
    pub async fn post_ids(&self) -> Result<Vec<String>, CoreError> {
        sqlx::query_scalar("SELECT id FROM posts")
            .fetch_all(&self.pool)
            .await
            .map_err(sql_err)
    }

    pub async fn comment_ids(&self) -> Result<Vec<String>, CoreError> {
        sqlx::query_scalar("SELECT id FROM comments")
            .fetch_all(&self.pool)
            .await
            .map_err(sql_err)
    }

    /// Posts whose comment trees have not been collected yet, by
    /// checkpoint rather than by presence of comment rows so that
    /// fully-deleted trees are not refetched forever.
    pub async fn posts_needing_comments(&self) -> Result<Vec<String>, CoreError> {
        sqlx::query_scalar(
            "SELECT p.id FROM posts p
             WHERE p.num_comments > 0
               AND NOT EXISTS (
                   SELECT 1 FROM checkpoints c
                   WHERE c.key = 'comments/' || p.id AND c.state = 'completed'
               )
             ORDER BY p.created_utc",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(sql_err)
    }

    /// Distinct authors seen so far, most recently active first. Feeds
    /// the user-history strategy.
    pub async fn distinct_authors(&self, limit: usize) -> Result<Vec<String>, CoreError> {
        sqlx::query_scalar(
            "SELECT author FROM posts
             WHERE author IS NOT NULL
             GROUP BY author
             ORDER BY MAX(created_utc) DESC
             LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(sql_err)
    }

    /// Re-link orphaned comments whose parents have arrived since, fixing
    /// the depth chain. Runs to a fixed point so reply chains resolve in
    /// one call.
    pub async fn resolve_orphans(&self, post_id: &str) -> Result<u64, CoreError> {
        let mut resolved = 0u64;
        loop {
            let result = sqlx::query(
                "UPDATE comments
                 SET orphaned = 0,
                     depth = (SELECT p.depth + 1 FROM comments p
                              WHERE p.id = comments.parent_comment_id)
                 WHERE post_id = ?
                   AND orphaned = 1
                   AND parent_comment_id IN
                       (SELECT id FROM comments WHERE orphaned = 0)",
            )
            .bind(post_id)
            .execute(&self.pool)
            .await
            .map_err(sql_err)?;

            if result.rows_affected() == 0 {
                break;
            }
            resolved += result.rows_affected();
        }
        if resolved > 0 {
            info!("Re-linked {} orphaned comments under {}", resolved, post_id);
        }
        Ok(resolved)
    }

    pub async fn get_post(&self, id: &str) -> Result<Option<Post>, CoreError> {
        sqlx::query_as::<_, Post>(
            "SELECT id, title, selftext, author, created_utc, score, num_comments,
                    url, permalink, subreddit, upvote_ratio, is_self, link_flair_text, strategy
             FROM posts WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(sql_err)
    }

    pub async fn get_comment(&self, id: &str) -> Result<Option<Comment>, CoreError> {
        sqlx::query_as::<_, Comment>(
            "SELECT id, post_id, parent_comment_id, body, author, created_utc,
                    score, permalink, depth, is_submitter, orphaned
             FROM comments WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(sql_err)
    }

    pub async fn comments_for_post(&self, post_id: &str) -> Result<Vec<Comment>, CoreError> {
        sqlx::query_as::<_, Comment>(
            "SELECT id, post_id, parent_comment_id, body, author, created_utc,
                    score, permalink, depth, is_submitter, orphaned
             FROM comments WHERE post_id = ? ORDER BY created_utc",
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await
        .map_err(sql_err)
    }
}

async fn insert_post(tx: &mut Transaction<'_, Sqlite>, post: &Post) -> Result<bool, CoreError> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO posts
         (id, title, selftext, author, created_utc, score, num_comments,
          url, permalink, subreddit, upvote_ratio, is_self, link_flair_text, strategy)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&post.id)
    .bind(&post.title)
    .bind(&post.selftext)
    .bind(&post.author)
    .bind(post.created_utc)
    .bind(post.score)
    .bind(post.num_comments)
    .bind(&post.url)
    .bind(&post.permalink)
    .bind(&post.subreddit)
    .bind(post.upvote_ratio)
    .bind(post.is_self)
    .bind(&post.link_flair_text)
    .bind(&post.strategy)
    .execute(&mut **tx)
    .await
    .map_err(sql_err)?;

    Ok(result.rows_affected() > 0)
}

async fn insert_comment(
    tx: &mut Transaction<'_, Sqlite>,
    comment: &Comment,
) -> Result<bool, CoreError> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO comments
         (id, post_id, parent_comment_id, body, author, created_utc,
          score, permalink, depth, is_submitter, orphaned)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&comment.id)
    .bind(&comment.post_id)
    .bind(&comment.parent_comment_id)
    .bind(&comment.body)
    .bind(&comment.author)
    .bind(comment.created_utc)
    .bind(comment.score)
    .bind(&comment.permalink)
    .bind(comment.depth)
    .bind(comment.is_submitter)
    .bind(comment.orphaned)
    .execute(&mut **tx)
    .await
    .map_err(sql_err)?;

    Ok(result.rows_affected() > 0)
}

async fn upsert_checkpoint(
    tx: &mut Transaction<'_, Sqlite>,
    key: &str,
    strategy: &str,
    state: &CheckpointState,
) -> Result<(), CoreError> {
    let (state_text, cursor) = match state {
        CheckpointState::NotStarted => ("in_progress", None),
        CheckpointState::InProgress { cursor } => ("in_progress", cursor.as_deref()),
        CheckpointState::Completed => ("completed", None),
    };

    sqlx::query(
        "INSERT INTO checkpoints (key, strategy, state, cursor, updated_at)
         VALUES (?, ?, ?, ?, strftime('%s', 'now'))
         ON CONFLICT(key) DO UPDATE SET
             state = excluded.state,
             cursor = excluded.cursor,
             updated_at = excluded.updated_at",
    )
    .bind(key)
    .bind(strategy)
    .bind(state_text)
    .bind(cursor)
    .execute(&mut **tx)
    .await
    .map_err(sql_err)?;

    Ok(())
}
