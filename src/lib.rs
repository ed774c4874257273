pub mod aggregate;
pub mod api;
pub mod app;
pub mod cache;
pub mod client;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod http;
pub mod metrics;
pub mod sources;

// Re-export the types callers touch most.
pub use aggregate::{ChartLocale, DateRange, Granularity, SeriesPoint, TimestampedRecord, aggregate};
pub use cache::RequestCache;
pub use client::{FailoverClient, FetchOutcome, RequestOptions};
pub use endpoints::{EndpointSet, PageContext, resolve};
pub use error::DataAccessError;
pub use sources::SensorSource;
