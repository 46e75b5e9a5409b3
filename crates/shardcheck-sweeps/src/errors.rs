use shardcheck_core::comparison::ComparisonError;
use shardcheck_core::sharding::ShardSpecError;
use shardcheck_core::tensors::TensorError;
use thiserror::Error;

use crate::device::DeviceError;

/// Error type for sweep configuration, generation, and execution.
#[derive(Error, Debug)]
pub enum SweepError {
    /// Error returned when a sweep configuration fails validation.
    #[error("invalid sweep configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to parse sweep configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("invalid shard spec: {0}")]
    ShardSpec(#[from] ShardSpecError),

    #[error(transparent)]
    Comparison(#[from] ComparisonError),

    #[error(transparent)]
    Tensor(#[from] TensorError),

    #[error("device error: {0}")]
    Device(#[from] DeviceError),
}

pub type Result<T> = std::result::Result<T, SweepError>;
