pub mod dedup;
pub mod ingest;
pub mod scraper;
pub mod strategies;

pub use dedup::DedupIndex;
pub use ingest::{IngestOutcome, Ingestor, PageBatch};
pub use scraper::{build_fetcher, Scraper};
pub use strategies::{
    SearchStrategy, Segment, SortStrategy, Strategy, TimeSegmentStrategy, UserStrategy,
};
