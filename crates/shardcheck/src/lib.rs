pub use shardcheck_core as core;
pub use shardcheck_sweeps as sweeps;

pub use shardcheck_core::comparison::EqualityVerdict;
pub use shardcheck_core::comparison::Tolerance;
pub use shardcheck_core::comparison::check_allclose_and_pcc;
pub use shardcheck_core::comparison::check_with_pcc;
pub use shardcheck_core::errors::Error;
pub use shardcheck_core::layouts::Layout;
pub use shardcheck_core::sharding::CoreGrid;
pub use shardcheck_core::sharding::MemoryConfig;
pub use shardcheck_core::sharding::ShardOrientation;
pub use shardcheck_core::sharding::ShardSpec;
pub use shardcheck_core::sharding::ShardStrategy;
pub use shardcheck_sweeps::device::Device;
pub use shardcheck_sweeps::runner::run;
pub use shardcheck_sweeps::runner::run_suite;
