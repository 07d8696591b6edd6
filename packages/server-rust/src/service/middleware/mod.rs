//! Tower middleware for the handler pipeline.
//!
//! - [`load_shed`]: error mapping for tower's load-shed and concurrency limit
//! - [`timeout`]: per-invocation timeout
//! - [`metrics`]: duration and outcome via `tracing` spans
//! - [`pipeline`]: composes the layers around the router

pub mod load_shed;
pub mod metrics;
pub mod pipeline;
pub mod timeout;

pub use metrics::MetricsLayer;
pub use pipeline::{build_handler_pipeline, HandlerPipeline};
pub use timeout::TimeoutLayer;
