use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use database::Database;
use reddit_client::{Descriptor, Fetcher, Sort, Thing, TimeFilter};
use std::collections::HashSet;
use std::sync::Arc;
use subvault_core::CoreError;
use tracing::{info, warn};

/// One checkpointable unit of coverage: a stable key and the descriptor
/// that opens its first page.
#[derive(Debug, Clone)]
pub struct Segment {
    pub key: String,
    pub strategy: &'static str,
    pub descriptor: Descriptor,
}

/// A coverage approach that turns the configured community into a list
/// of segments. Two strategies emitting the same underlying query is
/// fine; deduplication happens at ingestion.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn segments(&self, db: &Database) -> Result<Vec<Segment>, CoreError>;
}

/// Enumerates the platform's sort views: hot, new and top under every
/// time filter. Each caps out around 1000 items server-side; the other
/// strategies exist to reach past that.
pub struct SortStrategy;

#[async_trait]
impl Strategy for SortStrategy {
    fn name(&self) -> &'static str {
        "sort"
    }

    async fn segments(&self, _db: &Database) -> Result<Vec<Segment>, CoreError> {
        let mut segments = vec![
            Segment {
                key: "sort/hot".to_string(),
                strategy: self.name(),
                descriptor: Descriptor::Listing {
                    sort: Sort::Hot,
                    after: None,
                },
            },
            Segment {
                key: "sort/new".to_string(),
                strategy: self.name(),
                descriptor: Descriptor::Listing {
                    sort: Sort::New,
                    after: None,
                },
            },
        ];
        for filter in TimeFilter::ALL_FILTERS {
            segments.push(Segment {
                key: format!("sort/top/{}", filter.as_str()),
                strategy: self.name(),
                descriptor: Descriptor::Listing {
                    sort: Sort::Top(filter),
                    after: None,
                },
            });
        }
        Ok(segments)
    }
}

/// Partitions [start date, now) into monthly buckets, each searched with
/// timestamp bounds. Reaches posts the sort listings age out of.
pub struct TimeSegmentStrategy {
    start: NaiveDate,
    now: DateTime<Utc>,
}

impl TimeSegmentStrategy {
    pub fn new(start: NaiveDate, now: DateTime<Utc>) -> Self {
        Self { start, now }
    }

    fn month_start(year: i32, month: u32) -> Option<i64> {
        let date = NaiveDate::from_ymd_opt(year, month, 1)?;
        Some(date.and_time(NaiveTime::MIN).and_utc().timestamp())
    }
}

#[async_trait]
impl Strategy for TimeSegmentStrategy {
    fn name(&self) -> &'static str {
        "time"
    }

    async fn segments(&self, _db: &Database) -> Result<Vec<Segment>, CoreError> {
        let now_ts = self.now.timestamp();
        let mut year = self.start.year();
        let mut month = self.start.month();
        let mut segments = Vec::new();

        loop {
            let bucket_start = match Self::month_start(year, month) {
                Some(ts) => ts,
                None => break,
            };
            if bucket_start >= now_ts {
                break;
            }

            let (next_year, next_month) = if month == 12 {
                (year + 1, 1)
            } else {
                (year, month + 1)
            };
            let bucket_end = match Self::month_start(next_year, next_month) {
                Some(ts) => ts.min(now_ts),
                None => break,
            };

            segments.push(Segment {
                key: format!("time/{:04}-{:02}", year, month),
                strategy: self.name(),
                descriptor: Descriptor::TimeRange {
                    start: bucket_start,
                    end: bucket_end,
                    after: None,
                },
            });

            year = next_year;
            month = next_month;
        }

        Ok(segments)
    }
}

/// One paginated search per configured keyword.
pub struct SearchStrategy {
    terms: Vec<String>,
}

impl SearchStrategy {
    pub fn new(terms: Vec<String>) -> Self {
        Self { terms }
    }
}

#[async_trait]
impl Strategy for SearchStrategy {
    fn name(&self) -> &'static str {
        "search"
    }

    async fn segments(&self, _db: &Database) -> Result<Vec<Segment>, CoreError> {
        Ok(self
            .terms
            .iter()
            .map(|term| Segment {
                key: format!("search/{}", term),
                strategy: self.name(),
                descriptor: Descriptor::Search {
                    query: term.clone(),
                    after: None,
                },
            })
            .collect())
    }
}

/// Walks the submission history of authors already observed, picking up
/// posts every listing and search missed. Runs after the seeding
/// strategies; with an empty store it does one discovery fetch of the
/// new listing first.
pub struct UserStrategy {
    cap: usize,
    fetcher: Arc<Fetcher>,
}

impl UserStrategy {
    pub fn new(cap: usize, fetcher: Arc<Fetcher>) -> Self {
        Self { cap, fetcher }
    }

    async fn discover_authors(&self) -> Result<Vec<String>, CoreError> {
        info!("No stored authors yet, running a discovery fetch");
        let page = self
            .fetcher
            .fetch(&Descriptor::Listing {
                sort: Sort::New,
                after: None,
            })
            .await?;

        let mut seen = HashSet::new();
        let mut authors = Vec::new();
        for thing in &page.things {
            if let Thing::Post(post) = thing {
                if let Some(author) = &post.author {
                    if author != "[deleted]" && seen.insert(author.clone()) {
                        authors.push(author.clone());
                    }
                }
            }
        }
        Ok(authors)
    }
}

#[async_trait]
impl Strategy for UserStrategy {
    fn name(&self) -> &'static str {
        "user"
    }

    async fn segments(&self, db: &Database) -> Result<Vec<Segment>, CoreError> {
        let mut authors = db.distinct_authors(self.cap).await?;
        if authors.is_empty() {
            authors = self.discover_authors().await?;
            authors.truncate(self.cap);
        }
        if authors.is_empty() {
            warn!("User strategy has no authors to visit");
        }

        Ok(authors
            .into_iter()
            .map(|username| Segment {
                key: format!("user/{}", username),
                strategy: self.name(),
                descriptor: Descriptor::UserPosts {
                    username,
                    after: None,
                },
            })
            .collect())
    }
}
