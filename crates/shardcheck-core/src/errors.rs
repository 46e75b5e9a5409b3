use thiserror::Error;

use crate::comparison::ComparisonError;
use crate::sharding::ShardSpecError;
use crate::tensors::TensorError;

#[derive(Error, Clone, Debug, PartialEq)]
pub enum Error {
    #[error("invalid shard spec: {0}")]
    InvalidShardSpec(#[from] ShardSpecError),

    #[error(transparent)]
    Comparison(#[from] ComparisonError),

    #[error(transparent)]
    Tensor(#[from] TensorError),
}
