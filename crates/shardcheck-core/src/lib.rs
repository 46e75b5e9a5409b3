//! Shard-spec resolution and approximate-equality checking for tensors that are partitioned across a grid of
//! accelerator cores.
//!
//! The two halves of this crate are independent and purely functional:
//!
//!   - [`sharding`] turns an abstract sharding strategy (strategy kind, core grid, orientation, and whether the
//!     tensor's height and width should be used directly as the shard shape) plus a tensor shape into a concrete
//!     [`ShardSpec`](sharding::ShardSpec), which is in turn consumed to build the
//!     [`MemoryConfig`](sharding::MemoryConfig) that an accelerator runtime expects.
//!   - [`comparison`] compares a reference tensor against a device-computed tensor using elementwise tolerances
//!     together with a Pearson correlation coefficient threshold.
//!
//! The remaining modules provide the host-side plumbing that both halves need: [`tensors`] for dense host tensors,
//! [`types`] for the data types the runtime can store (and the precision loss each of them incurs), [`layouts`] for
//! tile/row-major arrangement rules, and [`random`] for seeded test-data generation.

pub mod comparison;
pub mod errors;
pub mod layouts;
pub mod random;
pub mod sharding;
pub mod tensors;
pub mod types;
