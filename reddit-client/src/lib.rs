pub mod api;
pub mod auth;
pub mod fetcher;
pub mod rate_limiter;

pub use api::{Envelope, Listing, ListingData, RawComment, RawPost, RedditApiClient, Thing};
pub use auth::Authenticator;
pub use fetcher::{ApiTransport, Descriptor, Fetcher, LiveTransport, Page, Sort, TimeFilter};
pub use rate_limiter::{backoff_delay, RateLimitConfig, RateLimiter};
