use crate::{sql_err, Database};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use subvault_core::{Comment, CoreError, Post};

/// Overview of what the store holds. Read-only consumer of the schema.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total_posts: i64,
    pub total_comments: i64,
    pub unique_authors: i64,
    pub posts_with_comments: i64,
    pub coverage_percentage: f64,
    pub orphaned_comments: i64,
    pub earliest_post_utc: Option<i64>,
    pub latest_post_utc: Option<i64>,
    pub average_score: f64,
}

impl std::fmt::Display for StoreStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "posts: {}", self.total_posts)?;
        writeln!(
            f,
            "comments: {} ({} orphaned)",
            self.total_comments, self.orphaned_comments
        )?;
        writeln!(f, "unique authors: {}", self.unique_authors)?;
        writeln!(
            f,
            "posts with comments: {} ({:.1}% coverage)",
            self.posts_with_comments, self.coverage_percentage
        )?;
        writeln!(f, "average score: {:.2}", self.average_score)?;
        write!(
            f,
            "time range: {:?} .. {:?}",
            self.earliest_post_utc, self.latest_post_utc
        )
    }
}

#[derive(Debug, Serialize)]
pub struct ExportedComment {
    pub id: String,
    pub parent_comment_id: Option<String>,
    pub body: String,
    pub author: Option<String>,
    pub created_utc: i64,
    pub score: i64,
    pub depth: i64,
    pub orphaned: bool,
    pub replies: Vec<ExportedComment>,
}

#[derive(Debug, Serialize)]
pub struct ExportedPost {
    #[serde(flatten)]
    pub post: Post,
    pub comment_tree: Vec<ExportedComment>,
}

#[derive(Debug, Serialize)]
pub struct ExportMetadata {
    pub exported_at: String,
    pub total_posts: usize,
}

#[derive(Debug, Serialize)]
pub struct Export {
    pub metadata: ExportMetadata,
    pub posts: Vec<ExportedPost>,
}

impl Database {
    pub async fn stats(&self) -> Result<StoreStats, CoreError> {
        let total_posts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM posts")
            .fetch_one(self.pool())
            .await
            .map_err(sql_err)?;
        let total_comments: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM comments")
            .fetch_one(self.pool())
            .await
            .map_err(sql_err)?;
        let unique_authors: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT author) FROM posts WHERE author IS NOT NULL",
        )
        .fetch_one(self.pool())
        .await
        .map_err(sql_err)?;
        let posts_with_comments: i64 =
            sqlx::query_scalar("SELECT COUNT(DISTINCT post_id) FROM comments")
                .fetch_one(self.pool())
                .await
                .map_err(sql_err)?;
        let orphaned_comments: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM comments WHERE orphaned = 1")
                .fetch_one(self.pool())
                .await
                .map_err(sql_err)?;
        let time_range: (Option<i64>, Option<i64>) =
            sqlx::query_as("SELECT MIN(created_utc), MAX(created_utc) FROM posts")
                .fetch_one(self.pool())
                .await
                .map_err(sql_err)?;
        let average_score: Option<f64> = sqlx::query_scalar("SELECT AVG(score) FROM posts")
            .fetch_one(self.pool())
            .await
            .map_err(sql_err)?;

        let coverage_percentage = if total_posts > 0 {
            posts_with_comments as f64 / total_posts as f64 * 100.0
        } else {
            0.0
        };

        Ok(StoreStats {
            total_posts,
            total_comments,
            unique_authors,
            posts_with_comments,
            coverage_percentage,
            orphaned_comments,
            earliest_post_utc: time_range.0,
            latest_post_utc: time_range.1,
            average_score: average_score.unwrap_or(0.0),
        })
    }

    /// Everything in the store as one document: posts newest-first, each
    /// with its comments re-nested into a tree.
    pub async fn export(&self) -> Result<Export, CoreError> {
        let posts: Vec<Post> = sqlx::query_as(
            "SELECT id, title, selftext, author, created_utc, score, num_comments,
                    url, permalink, subreddit, upvote_ratio, is_self, link_flair_text, strategy
             FROM posts ORDER BY created_utc DESC",
        )
        .fetch_all(self.pool())
        .await
        .map_err(sql_err)?;

        let mut exported = Vec::with_capacity(posts.len());
        for post in posts {
            let comments = self.comments_for_post(&post.id).await?;
            let comment_tree = build_comment_tree(comments);
            exported.push(ExportedPost { post, comment_tree });
        }

        Ok(Export {
            metadata: ExportMetadata {
                exported_at: chrono::Utc::now().to_rfc3339(),
                total_posts: exported.len(),
            },
            posts: exported,
        })
    }
}

/// Re-nest a flat comment list. Comments whose parent is missing from
/// the store (orphans) surface at the top level rather than being lost.
fn build_comment_tree(comments: Vec<Comment>) -> Vec<ExportedComment> {
    let mut nodes: HashMap<String, ExportedComment> = HashMap::new();
    let mut children_of: HashMap<String, Vec<String>> = HashMap::new();
    let mut roots: Vec<String> = Vec::new();

    let known: HashSet<String> = comments.iter().map(|c| c.id.clone()).collect();
    for comment in comments {
        let id = comment.id.clone();
        match &comment.parent_comment_id {
            Some(parent) if known.contains(parent) => {
                children_of.entry(parent.clone()).or_default().push(id.clone());
            }
            _ => roots.push(id.clone()),
        }
        nodes.insert(
            id,
            ExportedComment {
                id: comment.id,
                parent_comment_id: comment.parent_comment_id,
                body: comment.body,
                author: comment.author,
                created_utc: comment.created_utc,
                score: comment.score,
                depth: comment.depth,
                orphaned: comment.orphaned,
                replies: Vec::new(),
            },
        );
    }

    let mut tree = Vec::with_capacity(roots.len());
    for root in roots {
        if let Some(node) = take_subtree(&root, &mut nodes, &children_of) {
            tree.push(node);
        }
    }
    tree
}

fn take_subtree(
    id: &str,
    nodes: &mut HashMap<String, ExportedComment>,
    children_of: &HashMap<String, Vec<String>>,
) -> Option<ExportedComment> {
    let mut node = nodes.remove(id)?;
    if let Some(children) = children_of.get(id) {
        for child in children {
            if let Some(subtree) = take_subtree(child, nodes, children_of) {
                node.replies.push(subtree);
            }
        }
    }
    Some(node)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(id: &str, parent: Option<&str>, depth: i64) -> Comment {
        Comment {
            id: id.to_string(),
            post_id: "p1".to_string(),
            parent_comment_id: parent.map(|p| p.to_string()),
            body: format!("body {}", id),
            author: Some("author".to_string()),
            created_utc: 100,
            score: 1,
            permalink: format!("/{}", id),
            depth,
            is_submitter: false,
            orphaned: false,
        }
    }

    #[test]
    fn flat_comments_nest_into_tree() {
        let comments = vec![
            comment("c1", None, 0),
            comment("c2", Some("c1"), 1),
            comment("c3", Some("c2"), 2),
            comment("c4", None, 0),
        ];

        let tree = build_comment_tree(comments);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].id, "c1");
        assert_eq!(tree[0].replies.len(), 1);
        assert_eq!(tree[0].replies[0].id, "c2");
        assert_eq!(tree[0].replies[0].replies[0].id, "c3");
        assert!(tree[1].replies.is_empty());
    }

    #[test]
    fn orphan_with_missing_parent_surfaces_at_top_level() {
        let mut orphan = comment("c9", Some("gone"), 0);
        orphan.orphaned = true;

        let tree = build_comment_tree(vec![orphan]);
        assert_eq!(tree.len(), 1);
        assert!(tree[0].orphaned);
    }
}
