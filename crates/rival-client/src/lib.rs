pub mod cleaner;
pub mod engines;
pub mod extract;
pub mod stream;
pub mod transport;

pub use cleaner::HtmdCleaner;
pub use engines::{BingEngine, DuckDuckGoEngine, HtmlSearchEngine, YahooEngine};
pub use extract::{ExtractionPipeline, ExtractionStrategy};
pub use stream::WsConnector;
pub use transport::ReqwestTransport;
