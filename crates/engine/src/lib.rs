//! Price-watch engine: provider clients, deal detection and monitoring
//!
//! Provides:
//! - Token-bucket rate limiting shared by async and blocking callers
//! - Catalog (PA-API 5) and history (Keepa) clients that degrade to empty results
//! - Rule-based deal detection with a resale fee model
//! - The per-item monitoring pipeline and its fixed-interval scheduler

pub mod alerts;
pub mod api;
pub mod config;
pub mod detector;
pub mod monitor;
pub mod rate_limiter;
pub mod scheduler;
pub mod types;

// Re-exports for convenience
pub use alerts::AlertDeduplicator;
pub use api::{CatalogClient, CatalogProvider, HistoryClient, HistoryProvider};
pub use config::AppConfig;
pub use detector::DealDetector;
pub use monitor::{
    normalize_identifier, ExportDocument, HealthReport, ItemDetail, MonitorError, MonitorResult,
    PriceHistory, PriceMonitor,
};
pub use rate_limiter::RateLimiter;
pub use scheduler::{PeriodicJob, Scheduler};
pub use types::*;
