//! Infrastructure layer: configuration, logging, HTTP scraping and SQLite persistence

pub mod area_scraper;
pub mod config;
pub mod database_connection;
pub mod extraction;
pub mod logging;
pub mod proxy_pool;
pub mod scrape_error;
pub mod sqlite_gateway;

// Re-export commonly used items
pub use area_scraper::{AreaFetcher, MarketplaceScraper};
pub use config::AppConfig;
pub use database_connection::DatabaseConnection;
pub use proxy_pool::{EgressProbe, ProxyPool};
pub use scrape_error::{ExtractionError, FailureKind, ScrapeError};
pub use sqlite_gateway::SqliteGateway;
