use crate::dedup::DedupIndex;
use crate::ingest::{Ingestor, PageBatch};
use crate::strategies::{
    SearchStrategy, Segment, SortStrategy, Strategy, TimeSegmentStrategy, UserStrategy,
};
use chrono::Utc;
use database::{Database, PageCounts};
use reddit_client::{
    Descriptor, Fetcher, LiveTransport, RateLimitConfig, RateLimiter, RedditApiClient,
};
use std::sync::Arc;
use std::time::Duration;
use subvault_core::{CheckpointState, CoreError, RunSummary, ScraperConfig, StrategyKind};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Wire the live API client, shared rate limiter and retry policy into
/// one fetcher. Separate from `Scraper::new` so tests can substitute a
/// canned transport.
pub fn build_fetcher(config: &ScraperConfig) -> Result<Arc<Fetcher>, CoreError> {
    config.require_credentials()?;

    let limiter = Arc::new(RateLimiter::new(RateLimitConfig::new(
        config.max_requests_per_minute,
        Duration::from_secs(config.backoff_base_secs),
        Duration::from_secs(config.backoff_cap_secs),
    )));
    let client = RedditApiClient::new(config)?;
    let transport = Arc::new(LiveTransport::new(
        client,
        config.subreddit.clone(),
        config.page_size,
    ));

    Ok(Arc::new(Fetcher::new(
        transport,
        limiter,
        config.max_retry_attempts,
    )))
}

/// Runs every configured strategy to exhaustion, then collects comment
/// trees for the posts they surfaced. Strategies execute sequentially:
/// the per-minute quota is the bottleneck, so one descriptor is in
/// flight at a time.
pub struct Scraper {
    config: ScraperConfig,
    db: Database,
    fetcher: Arc<Fetcher>,
    dedup: DedupIndex,
    summary: RunSummary,
}

impl Scraper {
    pub async fn new(
        config: ScraperConfig,
        db: Database,
        fetcher: Arc<Fetcher>,
    ) -> Result<Self, CoreError> {
        let dedup = DedupIndex::load(&db).await?;
        let summary = RunSummary {
            run_id: Uuid::new_v4().to_string(),
            subreddit: config.subreddit.clone(),
            ..Default::default()
        };

        Ok(Self {
            config,
            db,
            fetcher,
            dedup,
            summary,
        })
    }

    fn build_strategies(&self) -> Vec<Box<dyn Strategy>> {
        self.config
            .strategy_order
            .iter()
            .map(|kind| -> Box<dyn Strategy> {
                match kind {
                    StrategyKind::Sort => Box::new(SortStrategy),
                    StrategyKind::Time => Box::new(TimeSegmentStrategy::new(
                        self.config.start_date,
                        Utc::now(),
                    )),
                    StrategyKind::Search => {
                        Box::new(SearchStrategy::new(self.config.search_terms.clone()))
                    }
                    StrategyKind::User => Box::new(UserStrategy::new(
                        self.config.user_strategy_cap,
                        Arc::clone(&self.fetcher),
                    )),
                }
            })
            .collect()
    }

    /// The whole run. Always terminates with a summary; only storage
    /// failures abort early, preserving the last committed checkpoint.
    pub async fn run(mut self) -> Result<RunSummary, CoreError> {
        info!(
            "Starting run {} for r/{} ({} posts, {} comments already stored)",
            self.summary.run_id,
            self.config.subreddit,
            self.dedup.known_posts(),
            self.dedup.known_comments()
        );

        for strategy in self.build_strategies() {
            let segments = match strategy.segments(&self.db).await {
                Ok(segments) => segments,
                Err(CoreError::Database(e)) => return Err(e.into()),
                Err(e) => {
                    error!("Strategy {} failed to plan, skipping: {}", strategy.name(), e);
                    continue;
                }
            };

            info!("Strategy {}: {} segments", strategy.name(), segments.len());
            for segment in segments {
                self.run_segment(&segment).await?;
            }
        }

        self.collect_comments().await?;

        self.summary.requests_issued = self.fetcher.requests_issued();
        info!("Run finished\n{}", self.summary);
        Ok(self.summary)
    }

    /// Paginate one segment from its checkpoint to exhaustion. Each page
    /// commits atomically with the advanced checkpoint; fetch failures
    /// abandon the segment and the run moves on.
    async fn run_segment(&mut self, segment: &Segment) -> Result<(), CoreError> {
        let state = self.db.checkpoint(&segment.key).await?;
        if state.is_completed() {
            return Ok(());
        }
        let mut cursor = state.cursor().map(String::from);
        if cursor.is_some() {
            info!("Resuming {} from cursor {:?}", segment.key, cursor);
        }

        loop {
            let descriptor = segment.descriptor.with_cursor(cursor.clone());
            let page = match self.fetcher.fetch(&descriptor).await {
                Ok(page) => page,
                Err(CoreError::Database(e)) => return Err(e.into()),
                Err(e) => {
                    warn!("Abandoning segment {}: {}", segment.key, e);
                    self.summary.segments_abandoned += 1;
                    return Ok(());
                }
            };

            self.summary.parse_failures += page.parse_failures;
            let mut ingestor = Ingestor::new(&mut self.dedup, &self.config.subreddit);
            let batch = ingestor.ingest_page(&page.things, None, segment.strategy);

            let next_state = match &page.after {
                Some(after) => CheckpointState::InProgress {
                    cursor: Some(after.clone()),
                },
                None => CheckpointState::Completed,
            };
            let counts = self
                .db
                .commit_page(
                    &batch.posts,
                    &batch.comments,
                    &segment.key,
                    segment.strategy,
                    &next_state,
                )
                .await?;
            self.absorb(&batch, &counts);

            match page.after {
                Some(after) => cursor = Some(after),
                None => {
                    self.summary.segments_completed += 1;
                    return Ok(());
                }
            }
        }
    }

    /// Fetch comment trees for every stored post that still needs one.
    /// One checkpoint per post, committed with its comments.
    async fn collect_comments(&mut self) -> Result<(), CoreError> {
        let pending = self.db.posts_needing_comments().await?;
        info!("Collecting comment trees for {} posts", pending.len());

        for post_id in pending {
            let key = format!("comments/{}", post_id);
            let descriptor = Descriptor::CommentTree {
                post_id: post_id.clone(),
            };

            let page = match self.fetcher.fetch(&descriptor).await {
                Ok(page) => page,
                Err(CoreError::Database(e)) => return Err(e.into()),
                Err(e) => {
                    warn!("Abandoning comments of {}: {}", post_id, e);
                    self.summary.segments_abandoned += 1;
                    continue;
                }
            };

            self.summary.parse_failures += page.parse_failures;
            let mut ingestor = Ingestor::new(&mut self.dedup, &self.config.subreddit);
            let batch = ingestor.ingest_page(&page.things, Some(&post_id), "comments");

            let counts = self
                .db
                .commit_page(
                    &batch.posts,
                    &batch.comments,
                    &key,
                    "comments",
                    &CheckpointState::Completed,
                )
                .await?;
            self.absorb(&batch, &counts);
            self.summary.segments_completed += 1;

            // Earlier pages may have stored replies whose parents only
            // arrived now.
            self.db.resolve_orphans(&post_id).await?;
        }
        Ok(())
    }

    fn absorb(&mut self, batch: &PageBatch, counts: &PageCounts) {
        for post in &batch.posts {
            self.dedup.mark_post(&post.id);
        }
        for comment in &batch.comments {
            self.dedup.mark_comment(&comment.id);
        }

        self.summary.posts_inserted += counts.posts_inserted;
        self.summary.posts_skipped += counts.posts_skipped + batch.posts_deduped;
        self.summary.comments_inserted += counts.comments_inserted;
        self.summary.comments_skipped += counts.comments_skipped + batch.comments_deduped;
        self.summary.orphaned_comments += batch.orphaned;
    }
}
