//! Appointment analytics: KPI aggregation and a weekly volume forecast.
//!
//! Records are validated once by [`ingest::validate`], then handed to
//! [`aggregate::aggregate`] and [`forecast::forecast`] independently. A
//! failing forecast never prevents the KPIs from being produced.

pub mod aggregate;
pub mod config;
pub mod db;
pub mod error;
pub mod forecast;
pub mod ingest;
pub mod model_cache;
pub mod models;
pub mod report;
pub mod smoothing;

pub use aggregate::aggregate;
pub use config::{CacheMode, Config, RegionMap};
pub use error::{CacheError, ForecastError, IngestError, ReportError};
pub use forecast::{forecast, ForecastOptions};
pub use model_cache::{FileModelCache, MemoryModelCache, ModelCache};
pub use models::{AggregationResult, Appointment, ForecastResult, RawAppointment};
