use crate::api::{Envelope, Listing, RedditApiClient, Thing};
use crate::rate_limiter::RateLimiter;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use subvault_core::{CoreError, RedditApiError};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeFilter {
    Hour,
    Day,
    Week,
    Month,
    Year,
    All,
}

impl TimeFilter {
    pub const ALL_FILTERS: [TimeFilter; 6] = [
        TimeFilter::Hour,
        TimeFilter::Day,
        TimeFilter::Week,
        TimeFilter::Month,
        TimeFilter::Year,
        TimeFilter::All,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeFilter::Hour => "hour",
            TimeFilter::Day => "day",
            TimeFilter::Week => "week",
            TimeFilter::Month => "month",
            TimeFilter::Year => "year",
            TimeFilter::All => "all",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sort {
    Hot,
    New,
    Top(TimeFilter),
}

impl Sort {
    fn path(&self) -> &'static str {
        match self {
            Sort::Hot => "hot",
            Sort::New => "new",
            Sort::Top(_) => "top",
        }
    }
}

impl std::fmt::Display for Sort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sort::Top(filter) => write!(f, "top/{}", filter.as_str()),
            other => write!(f, "{}", other.path()),
        }
    }
}

/// A fully-specified query the fetcher can execute: endpoint, filters
/// and pagination cursor in one value.
#[derive(Debug, Clone, PartialEq)]
pub enum Descriptor {
    Listing {
        sort: Sort,
        after: Option<String>,
    },
    /// Cloudsearch-bounded search over one time bucket.
    TimeRange {
        start: i64,
        end: i64,
        after: Option<String>,
    },
    Search {
        query: String,
        after: Option<String>,
    },
    UserPosts {
        username: String,
        after: Option<String>,
    },
    CommentTree {
        post_id: String,
    },
}

impl Descriptor {
    /// Same query, repositioned at `cursor`. Comment trees are a single
    /// fetch and ignore cursors.
    pub fn with_cursor(&self, cursor: Option<String>) -> Descriptor {
        match self {
            Descriptor::Listing { sort, .. } => Descriptor::Listing {
                sort: *sort,
                after: cursor,
            },
            Descriptor::TimeRange { start, end, .. } => Descriptor::TimeRange {
                start: *start,
                end: *end,
                after: cursor,
            },
            Descriptor::Search { query, .. } => Descriptor::Search {
                query: query.clone(),
                after: cursor,
            },
            Descriptor::UserPosts { username, .. } => Descriptor::UserPosts {
                username: username.clone(),
                after: cursor,
            },
            Descriptor::CommentTree { post_id } => Descriptor::CommentTree {
                post_id: post_id.clone(),
            },
        }
    }

    pub fn endpoint(&self, subreddit: &str) -> String {
        match self {
            Descriptor::Listing { sort, .. } => format!("/r/{}/{}", subreddit, sort.path()),
            Descriptor::TimeRange { .. } | Descriptor::Search { .. } => {
                format!("/r/{}/search", subreddit)
            }
            Descriptor::UserPosts { username, .. } => format!("/user/{}/submitted", username),
            Descriptor::CommentTree { post_id } => format!("/comments/{}", post_id),
        }
    }

    pub fn params(&self, page_size: u32) -> Vec<(String, String)> {
        let mut params = vec![("raw_json".to_string(), "1".to_string())];

        let after = match self {
            Descriptor::Listing { sort, after } => {
                params.push(("limit".to_string(), page_size.to_string()));
                if let Sort::Top(filter) = sort {
                    params.push(("t".to_string(), filter.as_str().to_string()));
                }
                after
            }
            Descriptor::TimeRange { start, end, after } => {
                params.push((
                    "q".to_string(),
                    format!("timestamp:{}..{}", start, end),
                ));
                params.push(("syntax".to_string(), "cloudsearch".to_string()));
                params.push(("restrict_sr".to_string(), "on".to_string()));
                params.push(("sort".to_string(), "new".to_string()));
                params.push(("limit".to_string(), page_size.to_string()));
                after
            }
            Descriptor::Search { query, after } => {
                params.push(("q".to_string(), query.clone()));
                params.push(("restrict_sr".to_string(), "on".to_string()));
                params.push(("sort".to_string(), "new".to_string()));
                params.push(("t".to_string(), "all".to_string()));
                params.push(("limit".to_string(), page_size.to_string()));
                after
            }
            Descriptor::UserPosts { after, .. } => {
                params.push(("sort".to_string(), "new".to_string()));
                params.push(("limit".to_string(), page_size.to_string()));
                after
            }
            Descriptor::CommentTree { .. } => {
                params.push(("limit".to_string(), "500".to_string()));
                return params;
            }
        };

        if let Some(after) = after {
            params.push(("after".to_string(), after.clone()));
        }
        params
    }
}

impl std::fmt::Display for Descriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Descriptor::Listing { sort, .. } => write!(f, "listing {}", sort),
            Descriptor::TimeRange { start, end, .. } => {
                write!(f, "time range {}..{}", start, end)
            }
            Descriptor::Search { query, .. } => write!(f, "search \"{}\"", query),
            Descriptor::UserPosts { username, .. } => write!(f, "user {}", username),
            Descriptor::CommentTree { post_id } => write!(f, "comments of {}", post_id),
        }
    }
}

/// One page of validated items plus the cursor to the next page.
#[derive(Debug, Default)]
pub struct Page {
    pub things: Vec<Thing>,
    pub after: Option<String>,
    /// Items dropped at the parse boundary.
    pub parse_failures: u64,
}

/// The capability the fetcher consumes. Production uses the live API
/// client; tests substitute canned transports.
#[async_trait]
pub trait ApiTransport: Send + Sync {
    async fn execute(&self, descriptor: &Descriptor) -> Result<Page, CoreError>;
}

/// Live transport: renders the descriptor, executes it and validates
/// the children one by one, failing closed per item.
pub struct LiveTransport {
    client: RedditApiClient,
    subreddit: String,
    page_size: u32,
}

impl LiveTransport {
    pub fn new(client: RedditApiClient, subreddit: String, page_size: u32) -> Self {
        Self {
            client,
            subreddit,
            page_size,
        }
    }

    fn collect_listing(listing: Listing, page: &mut Page) {
        page.after = listing.data.after;
        for envelope in &listing.data.children {
            match Thing::from_envelope(envelope) {
                Ok(Some(thing)) => page.things.push(thing),
                Ok(None) => {}
                Err(e) => {
                    warn!("Skipping malformed item: {}", e);
                    page.parse_failures += 1;
                }
            }
        }
    }

    /// Walk a comment listing recursively, assigning depths as we go.
    fn flatten_comments(listing: &Value, depth: i64, page: &mut Page) {
        let children = match listing.pointer("/data/children").and_then(Value::as_array) {
            Some(children) => children,
            None => return,
        };

        for child in children {
            let envelope: Envelope = match serde_json::from_value(child.clone()) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!("Skipping undecodable comment envelope: {}", e);
                    page.parse_failures += 1;
                    continue;
                }
            };

            match Thing::from_envelope(&envelope) {
                Ok(Some(Thing::Comment(mut comment))) => {
                    comment.depth = depth;
                    let replies = std::mem::take(&mut comment.replies);
                    page.things.push(Thing::Comment(comment));
                    if replies.is_object() {
                        Self::flatten_comments(&replies, depth + 1, page);
                    }
                }
                Ok(Some(Thing::Post(_))) | Ok(None) => {}
                Err(e) => {
                    warn!("Skipping malformed comment: {}", e);
                    page.parse_failures += 1;
                }
            }
        }
    }
}

#[async_trait]
impl ApiTransport for LiveTransport {
    async fn execute(&self, descriptor: &Descriptor) -> Result<Page, CoreError> {
        let endpoint = descriptor.endpoint(&self.subreddit);
        let params = descriptor.params(self.page_size);
        let body = self.client.get_json(&endpoint, &params).await?;

        let mut page = Page::default();
        match descriptor {
            Descriptor::CommentTree { .. } => {
                // The comments endpoint returns [post listing, comment
                // listing]; only the second half is ours.
                let comments = body.get(1).ok_or_else(|| RedditApiError::InvalidResponse {
                    details: "comment response missing second listing".to_string(),
                })?;
                Self::flatten_comments(comments, 0, &mut page);
            }
            _ => {
                let listing: Listing = serde_json::from_value(body).map_err(|e| {
                    RedditApiError::InvalidResponse {
                        details: format!("malformed listing envelope: {}", e),
                    }
                })?;
                Self::collect_listing(listing, &mut page);
            }
        }

        debug!(
            "{}: {} items, cursor {:?}",
            descriptor,
            page.things.len(),
            page.after
        );
        Ok(page)
    }
}

/// Rate-limited, retrying wrapper around a transport. One instance is
/// shared by every strategy runner so the quota stays global.
pub struct Fetcher {
    transport: Arc<dyn ApiTransport>,
    limiter: Arc<RateLimiter>,
    max_attempts: u32,
    requests_issued: AtomicU64,
}

impl Fetcher {
    pub fn new(transport: Arc<dyn ApiTransport>, limiter: Arc<RateLimiter>, max_attempts: u32) -> Self {
        Self {
            transport,
            limiter,
            max_attempts: max_attempts.max(1),
            requests_issued: AtomicU64::new(0),
        }
    }

    pub fn requests_issued(&self) -> u64 {
        self.requests_issued.load(Ordering::Relaxed)
    }

    /// Execute a descriptor under the shared quota, replaying it on
    /// transient failure. Exhaustion surfaces as `RetryExhausted`; the
    /// owning strategy runner skips and logs rather than aborting.
    pub async fn fetch(&self, descriptor: &Descriptor) -> Result<Page, CoreError> {
        let mut attempts = 0u32;
        loop {
            self.limiter.acquire().await;
            self.requests_issued.fetch_add(1, Ordering::Relaxed);
            attempts += 1;

            let error = match self.transport.execute(descriptor).await {
                Ok(page) => {
                    self.limiter.record_success().await;
                    return Ok(page);
                }
                Err(error) => error,
            };

            let (transient, retry_after) = match &error {
                CoreError::RedditApi(api_error) => {
                    (api_error.is_transient(), api_error.retry_after())
                }
                CoreError::Network(_) => (true, None),
                _ => (false, None),
            };

            if !transient {
                return Err(error);
            }
            if attempts >= self.max_attempts {
                warn!("Giving up on {} after {} attempts", descriptor, attempts);
                return Err(RedditApiError::RetryExhausted {
                    descriptor: descriptor.to_string(),
                    attempts,
                }
                .into());
            }

            warn!(
                "Transient failure on {} (attempt {}): {}",
                descriptor, attempts, error
            );
            self.limiter.backoff(retry_after).await;
        }
    }
}
