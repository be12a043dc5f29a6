pub mod config;
pub mod error;

pub use config::{EnvelopeConfig, LogConfig, SealformConfig};
pub use error::{SealformError, SealformResult};
