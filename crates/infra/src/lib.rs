//! Infrastructure layer: job queue, worker pool, external adapters, config.

pub mod checkout;
pub mod config;
pub mod external;
pub mod jobs;
pub mod order_store;
pub mod pipeline;
pub mod workers;


pub use checkout::{CheckoutError, CheckoutService};
pub use config::{ConfigError, PipelineConfig};
pub use pipeline::{CheckoutPipeline, PipelineBuilder};
