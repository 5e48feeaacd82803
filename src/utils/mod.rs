//! # Utility Modules
//!
//! Supporting utilities for logging, metrics, and timing.
//!
//! ## Components
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Thread-safe observability counters, injected per component
//! - **Time**: Timestamp utilities for timeout and expiry checks

pub mod logging;
pub mod metrics;
pub mod time;

pub use metrics::{Metrics, MetricsSnapshot};
