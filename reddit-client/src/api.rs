use crate::auth::Authenticator;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use subvault_core::{CoreError, RedditApiError, ScraperConfig};
use tracing::{debug, error, warn};

const REDDIT_API_BASE: &str = "https://oauth.reddit.com";

/// The standard Reddit listing envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub kind: String,
    pub data: ListingData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingData {
    pub children: Vec<Envelope>,
    pub after: Option<String>,
    pub before: Option<String>,
    pub dist: Option<u32>,
}

/// One `{"kind": ..., "data": ...}` child. The payload stays untyped
/// until the kind tag tells us what schema to hold it against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub kind: String,
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPost {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    #[serde(default)]
    pub author: Option<String>,
    pub subreddit: String,
    #[serde(default)]
    pub url: String,
    pub permalink: String,
    pub created_utc: f64,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub num_comments: i64,
    #[serde(default)]
    pub upvote_ratio: Option<f64>,
    #[serde(default)]
    pub is_self: bool,
    #[serde(default)]
    pub link_flair_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawComment {
    pub id: String,
    /// Fullname of the parent: `t3_*` for the post, `t1_*` for a comment.
    pub parent_id: String,
    pub body: String,
    #[serde(default)]
    pub author: Option<String>,
    pub created_utc: f64,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub is_submitter: bool,
    /// Either `""` or a nested listing on the wire.
    #[serde(default)]
    pub replies: Value,
    /// Computed while flattening the tree, not a wire field.
    #[serde(skip)]
    pub depth: i64,
}

/// A platform item validated against its schema at the parse boundary.
#[derive(Debug, Clone)]
pub enum Thing {
    Post(RawPost),
    Comment(RawComment),
}

impl Thing {
    /// Validate an envelope into a typed item. `Ok(None)` for "more"
    /// stubs (unexpanded comment continuations); unknown kinds and
    /// schema mismatches fail closed.
    pub fn from_envelope(envelope: &Envelope) -> Result<Option<Thing>, RedditApiError> {
        match envelope.kind.as_str() {
            "t3" => serde_json::from_value::<RawPost>(envelope.data.clone())
                .map(|post| Some(Thing::Post(post)))
                .map_err(|e| RedditApiError::InvalidResponse {
                    details: format!("malformed t3 item: {}", e),
                }),
            "t1" => serde_json::from_value::<RawComment>(envelope.data.clone())
                .map(|comment| Some(Thing::Comment(comment)))
                .map_err(|e| RedditApiError::InvalidResponse {
                    details: format!("malformed t1 item: {}", e),
                }),
            "more" => {
                debug!("Skipping unexpanded comment stub");
                Ok(None)
            }
            other => Err(RedditApiError::InvalidResponse {
                details: format!("unknown item kind: {}", other),
            }),
        }
    }
}

#[derive(Debug)]
pub struct RedditApiClient {
    http: reqwest::Client,
    auth: Authenticator,
    user_agent: String,
}

impl RedditApiClient {
    pub fn new(config: &ScraperConfig) -> Result<Self, CoreError> {
        let http = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            auth: Authenticator::new(config)?,
            user_agent: config.user_agent.clone(),
        })
    }

    /// Execute one GET against the OAuth API, mapping status codes to
    /// the error taxonomy. Rate limiting is the caller's job.
    pub async fn get_json(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<Value, CoreError> {
        let token = self.auth.access_token().await?;
        let url = format!("{}{}", REDDIT_API_BASE, endpoint);

        debug!("GET {}", endpoint);
        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .header("User-Agent", &self.user_agent)
            .query(params)
            .send()
            .await
            .map_err(|e| -> CoreError {
                error!("Network error for {}: {}", endpoint, e);
                if e.is_timeout() {
                    RedditApiError::RequestTimeout.into()
                } else {
                    CoreError::Network(e)
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            warn!("Rate limited on {}, retry after {}s", endpoint, retry_after);
            return Err(RedditApiError::RateLimitExceeded { retry_after }.into());
        } else if status.as_u16() == 401 {
            return Err(RedditApiError::InvalidToken.into());
        } else if status.as_u16() == 403 {
            return Err(RedditApiError::Forbidden {
                resource: endpoint.to_string(),
            }
            .into());
        } else if status.as_u16() == 404 {
            return Err(RedditApiError::NotFound {
                resource: endpoint.to_string(),
            }
            .into());
        } else if status.is_server_error() {
            error!("Server error {} on {}", status, endpoint);
            return Err(RedditApiError::ServerError {
                status_code: status.as_u16(),
            }
            .into());
        } else if !status.is_success() {
            return Err(RedditApiError::InvalidResponse {
                details: format!("unexpected status {} on {}", status, endpoint),
            }
            .into());
        }

        response.json::<Value>().await.map_err(|e| {
            RedditApiError::InvalidResponse {
                details: format!("undecodable body from {}: {}", endpoint, e),
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn post_envelope_parses() {
        let envelope = Envelope {
            kind: "t3".to_string(),
            data: json!({
                "id": "abc123",
                "title": "Test Post",
                "selftext": "body text",
                "author": "test_user",
                "subreddit": "notebooklm",
                "url": "https://example.com",
                "permalink": "/r/notebooklm/comments/abc123",
                "created_utc": 1640995200.0,
                "score": 42,
                "num_comments": 5,
                "upvote_ratio": 0.93,
                "is_self": true
            }),
        };

        let thing = Thing::from_envelope(&envelope).unwrap().unwrap();
        match thing {
            Thing::Post(post) => {
                assert_eq!(post.id, "abc123");
                assert_eq!(post.author.as_deref(), Some("test_user"));
                assert_eq!(post.score, 42);
            }
            _ => panic!("expected a post"),
        }
    }

    #[test]
    fn comment_envelope_parses_with_string_replies() {
        let envelope = Envelope {
            kind: "t1".to_string(),
            data: json!({
                "id": "c1",
                "parent_id": "t3_abc123",
                "body": "a comment",
                "author": "someone",
                "created_utc": 1640995300.0,
                "score": 3,
                "permalink": "/r/notebooklm/comments/abc123/c1",
                "is_submitter": false,
                "replies": ""
            }),
        };

        let thing = Thing::from_envelope(&envelope).unwrap().unwrap();
        match thing {
            Thing::Comment(comment) => {
                assert_eq!(comment.parent_id, "t3_abc123");
                assert_eq!(comment.depth, 0);
            }
            _ => panic!("expected a comment"),
        }
    }

    #[test]
    fn more_stub_is_skipped() {
        let envelope = Envelope {
            kind: "more".to_string(),
            data: json!({"count": 12, "children": ["x", "y"]}),
        };
        assert!(Thing::from_envelope(&envelope).unwrap().is_none());
    }

    #[test]
    fn unknown_kind_fails_closed() {
        let envelope = Envelope {
            kind: "t5".to_string(),
            data: json!({}),
        };
        assert!(matches!(
            Thing::from_envelope(&envelope),
            Err(RedditApiError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn missing_required_field_fails_closed() {
        let envelope = Envelope {
            kind: "t3".to_string(),
            data: json!({"id": "abc", "title": "no permalink"}),
        };
        assert!(matches!(
            Thing::from_envelope(&envelope),
            Err(RedditApiError::InvalidResponse { .. })
        ));
    }
}
