pub mod backoff;
pub mod bypass;
pub mod canonical;
pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod error;
pub mod llms;
pub mod models;
pub mod pagination;
pub mod retrieve;
pub mod rotation;
pub mod search;
pub mod stream;
pub mod throttle;
pub mod traits;
pub mod traverse;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use bypass::{BypassConfig, BypassFetcher};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState};
pub use config::RivalConfig;
pub use error::{
    AppError, CursorError, EngineError, FetchError, SearchError, StreamError, TransportError,
    TraversalError,
};
pub use models::{
    ExtractedContent, FetchOptions, FetchResult, SearchOptions, SearchQuery, SearchResult,
    Technique, TraversalMode, TraversalReport, TraversalRequest, compute_hash,
};
pub use llms::LlmsDocument;
pub use pagination::{Page, PaginationManager};
pub use retrieve::{RetrievalInput, RetrievalOptions, RetrievalOutput, Retriever};
pub use rotation::RotationRegistry;
pub use search::{SearchConfig, SearchOrchestrator};
pub use stream::{StreamCapture, StreamConfig, StreamRetriever};
pub use traits::{Cleaner, Extractor, Fetcher, SearchEngine, StreamConnection, StreamConnector, Transport};
pub use traverse::{TraversalConfig, Traverser};
