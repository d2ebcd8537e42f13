use crate::Database;
use subvault_core::{CheckpointState, Comment, Post};

async fn setup_test_db() -> Database {
    Database::connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory test database")
}

fn post(id: &str) -> Post {
    Post {
        id: id.to_string(),
        title: format!("Post {}", id),
        selftext: Some("body".to_string()),
        author: Some(format!("author_{}", id)),
        created_utc: 1_600_000_000,
        score: 10,
        num_comments: 2,
        url: None,
        permalink: format!("/r/notebooklm/comments/{}", id),
        subreddit: "notebooklm".to_string(),
        upvote_ratio: 0.9,
        is_self: true,
        link_flair_text: None,
        strategy: "sort".to_string(),
    }
}

fn comment(id: &str, post_id: &str, parent: Option<&str>, depth: i64, orphaned: bool) -> Comment {
    Comment {
        id: id.to_string(),
        post_id: post_id.to_string(),
        parent_comment_id: parent.map(|p| p.to_string()),
        body: format!("comment {}", id),
        author: Some("someone".to_string()),
        created_utc: 1_600_000_100,
        score: 1,
        permalink: format!("/{}", id),
        depth,
        is_submitter: false,
        orphaned,
    }
}

#[tokio::test]
async fn test_connect_runs_migrations() {
    let db = setup_test_db().await;
    assert!(db.post_ids().await.unwrap().is_empty());
    assert!(db.comment_ids().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reingestion_is_a_noop() {
    let db = setup_test_db().await;
    let posts = vec![post("a"), post("b")];

    let first = db
        .commit_page(&posts, &[], "sort/hot", "sort", &CheckpointState::Completed)
        .await
        .unwrap();
    assert_eq!(first.posts_inserted, 2);
    assert_eq!(first.posts_skipped, 0);

    // The same page again, as a resumed run would replay it.
    let second = db
        .commit_page(&posts, &[], "sort/hot", "sort", &CheckpointState::Completed)
        .await
        .unwrap();
    assert_eq!(second.posts_inserted, 0);
    assert_eq!(second.posts_skipped, 2);
    assert_eq!(db.post_ids().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_checkpoint_lifecycle() {
    let db = setup_test_db().await;

    assert_eq!(
        db.checkpoint("sort/top/all").await.unwrap(),
        CheckpointState::NotStarted
    );

    db.commit_page(
        &[post("a")],
        &[],
        "sort/top/all",
        "sort",
        &CheckpointState::InProgress {
            cursor: Some("t3_a".to_string()),
        },
    )
    .await
    .unwrap();

    let state = db.checkpoint("sort/top/all").await.unwrap();
    assert_eq!(state.cursor(), Some("t3_a"));

    db.commit_page(&[], &[], "sort/top/all", "sort", &CheckpointState::Completed)
        .await
        .unwrap();
    assert!(db.checkpoint("sort/top/all").await.unwrap().is_completed());
}

#[tokio::test]
async fn test_page_and_checkpoint_commit_together() {
    let db = setup_test_db().await;

    db.commit_page(
        &[post("a")],
        &[comment("c1", "a", None, 0, false)],
        "sort/new",
        "sort",
        &CheckpointState::InProgress {
            cursor: Some("t3_a".to_string()),
        },
    )
    .await
    .unwrap();

    // Both the items and the cursor are visible, or neither would be.
    assert_eq!(db.post_ids().await.unwrap(), vec!["a".to_string()]);
    assert_eq!(db.comment_ids().await.unwrap(), vec!["c1".to_string()]);
    assert_eq!(
        db.checkpoint("sort/new").await.unwrap().cursor(),
        Some("t3_a")
    );
}

#[tokio::test]
async fn test_posts_needing_comments_honors_checkpoints() {
    let db = setup_test_db().await;
    db.commit_page(
        &[post("a"), post("b")],
        &[],
        "sort/hot",
        "sort",
        &CheckpointState::Completed,
    )
    .await
    .unwrap();

    let pending = db.posts_needing_comments().await.unwrap();
    assert_eq!(pending.len(), 2);

    // Completing one post's comment pass removes it even though the
    // tree produced zero stored comments.
    db.commit_page(&[], &[], "comments/a", "comments", &CheckpointState::Completed)
        .await
        .unwrap();
    assert_eq!(db.posts_needing_comments().await.unwrap(), vec!["b"]);
}

#[tokio::test]
async fn test_orphan_resolution_fixes_depth_chain() {
    let db = setup_test_db().await;
    db.commit_page(
        &[post("a")],
        &[
            // Replies arrived before their parents.
            comment("c2", "a", Some("c1"), 0, true),
            comment("c3", "a", Some("c2"), 0, true),
        ],
        "comments/a",
        "comments",
        &CheckpointState::InProgress { cursor: None },
    )
    .await
    .unwrap();

    db.commit_page(
        &[],
        &[comment("c1", "a", None, 0, false)],
        "comments/a",
        "comments",
        &CheckpointState::Completed,
    )
    .await
    .unwrap();

    let resolved = db.resolve_orphans("a").await.unwrap();
    assert_eq!(resolved, 2);

    // depth(child) = depth(parent) + 1 all the way down.
    let c2 = db.get_comment("c2").await.unwrap().unwrap();
    let c3 = db.get_comment("c3").await.unwrap().unwrap();
    assert!(!c2.orphaned);
    assert_eq!(c2.depth, 1);
    assert!(!c3.orphaned);
    assert_eq!(c3.depth, 2);
}

#[tokio::test]
async fn test_unresolvable_orphan_stays_flagged() {
    let db = setup_test_db().await;
    db.commit_page(
        &[post("a")],
        &[comment("c9", "a", Some("never_fetched"), 0, true)],
        "comments/a",
        "comments",
        &CheckpointState::Completed,
    )
    .await
    .unwrap();

    assert_eq!(db.resolve_orphans("a").await.unwrap(), 0);
    assert!(db.get_comment("c9").await.unwrap().unwrap().orphaned);
}

#[tokio::test]
async fn test_distinct_authors_deduplicates() {
    let db = setup_test_db().await;
    let mut posts = vec![post("a"), post("b"), post("c")];
    posts[1].author = posts[0].author.clone();
    posts[2].author = None; // Deleted account must not appear.

    db.commit_page(&posts, &[], "sort/hot", "sort", &CheckpointState::Completed)
        .await
        .unwrap();

    let authors = db.distinct_authors(50).await.unwrap();
    assert_eq!(authors, vec!["author_a".to_string()]);
}

#[tokio::test]
async fn test_stats_overview() {
    let db = setup_test_db().await;
    db.commit_page(
        &[post("a"), post("b")],
        &[comment("c1", "a", None, 0, false)],
        "sort/hot",
        "sort",
        &CheckpointState::Completed,
    )
    .await
    .unwrap();

    let stats = db.stats().await.unwrap();
    assert_eq!(stats.total_posts, 2);
    assert_eq!(stats.total_comments, 1);
    assert_eq!(stats.unique_authors, 2);
    assert_eq!(stats.posts_with_comments, 1);
    assert!((stats.coverage_percentage - 50.0).abs() < f64::EPSILON);
    assert_eq!(stats.average_score, 10.0);
}

#[tokio::test]
async fn test_export_nests_comment_trees() {
    let db = setup_test_db().await;
    db.commit_page(
        &[post("a")],
        &[
            comment("c1", "a", None, 0, false),
            comment("c2", "a", Some("c1"), 1, false),
        ],
        "sort/hot",
        "sort",
        &CheckpointState::Completed,
    )
    .await
    .unwrap();

    let export = db.export().await.unwrap();
    assert_eq!(export.metadata.total_posts, 1);
    assert_eq!(export.posts[0].comment_tree.len(), 1);
    assert_eq!(export.posts[0].comment_tree[0].replies[0].id, "c2");
}
