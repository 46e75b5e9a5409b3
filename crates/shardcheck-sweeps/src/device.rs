//! Boundary between the sweep harness and the accelerator runtime.
//!
//! The runtime is reached only through the [`Device`] trait: tensors are transferred to the device under a
//! [`MemoryConfig`], operations run there, and results are read back. [`HostDevice`] is a reference implementation
//! that executes everything on the host while enforcing the same placement rules as the hardware.

use shardcheck_core::layouts::Layout;
use shardcheck_core::sharding::MemoryConfig;
use shardcheck_core::tensors::{HostTensor, volume};
use shardcheck_core::types::DataType;
use thiserror::Error;

use crate::config::DeviceConfig;
use crate::ops::UnaryOp;

/// Per-core L1 capacity of [`HostDevice`] unless configured otherwise.
pub const DEFAULT_L1_BYTES_PER_CORE: usize = 1024 * 1024;

/// Error type for device-side failures.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum DeviceError {
    /// Error returned when a data type cannot be stored in the requested layout.
    #[error("data type {data_type} is not supported in {layout:?} layout")]
    UnsupportedDataType { data_type: DataType, layout: Layout },

    /// Error returned when the shards of a memory configuration do not cover the tensor.
    #[error("{partitions:?} shard(s) of shape {shard_shape:?} do not cover a tensor with shape {tensor_shape:?}")]
    ShardCoverageMismatch { tensor_shape: Vec<usize>, shard_shape: [usize; 2], partitions: (usize, usize) },

    /// Error returned when one shard does not fit in the L1 memory of a core.
    #[error("shard requires {required} bytes of L1 memory, but only {available} bytes are available per core")]
    ShardExceedsL1 { required: usize, available: usize },

    /// Error returned for any other runtime failure.
    #[error("{0}")]
    Runtime(String),
}

/// Accelerator runtime that sharded tensors can be placed on and operated upon.
pub trait Device {
    /// Handle to a tensor that lives on this device.
    type Tensor;

    /// Human-readable name of this device, used in reports.
    fn name(&self) -> &str;

    /// Transfers `tensor` to the device, converting it to `data_type` and `layout` and sharding it according to
    /// `memory_config`.
    fn from_host(
        &self,
        tensor: &HostTensor,
        data_type: DataType,
        layout: Layout,
        memory_config: &MemoryConfig,
    ) -> Result<Self::Tensor, DeviceError>;

    /// Runs `op` on `input`, placing the output according to `memory_config`.
    fn unary(
        &self,
        op: UnaryOp,
        input: &Self::Tensor,
        memory_config: &MemoryConfig,
    ) -> Result<Self::Tensor, DeviceError>;

    /// Reads `tensor` back to the host.
    fn to_host(&self, tensor: &Self::Tensor) -> Result<HostTensor, DeviceError>;
}

/// Tensor stored on a [`HostDevice`].
#[derive(Clone, Debug, PartialEq)]
pub struct HostDeviceTensor {
    data: HostTensor,
    data_type: DataType,
    layout: Layout,
    memory_config: MemoryConfig,
}

impl HostDeviceTensor {
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn memory_config(&self) -> &MemoryConfig {
        &self.memory_config
    }
}

/// Reference [`Device`] that runs on the host.
///
/// Values are rounded to the target data type on every transfer and every operation output, and memory
/// configurations are checked for shard coverage and per-core L1 capacity before any data is placed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostDevice {
    l1_bytes_per_core: usize,
}

impl HostDevice {
    pub fn new() -> Self {
        Self { l1_bytes_per_core: DEFAULT_L1_BYTES_PER_CORE }
    }

    pub fn with_l1_bytes_per_core(l1_bytes_per_core: usize) -> Self {
        Self { l1_bytes_per_core }
    }

    /// Creates a device with the capacities of the `[device]` configuration section.
    pub fn from_config(config: &DeviceConfig) -> Self {
        Self::with_l1_bytes_per_core(config.l1_bytes_per_core)
    }

    pub fn l1_bytes_per_core(&self) -> usize {
        self.l1_bytes_per_core
    }

    fn check_placement(
        &self,
        tensor_shape: &[usize],
        data_type: DataType,
        memory_config: &MemoryConfig,
    ) -> Result<(), DeviceError> {
        let shard_shape = memory_config.shard.shape;
        let partitions = memory_config
            .partition_counts()
            .ok_or_else(|| DeviceError::Runtime(format!("core count of grid {} overflows", memory_config.shard.grid)))?;
        let (height, width) = match tensor_shape.split_last() {
            Some((width, leading)) => {
                let height = volume(leading)
                    .ok_or_else(|| DeviceError::Runtime(format!("volume of shape {tensor_shape:?} overflows")))?;
                (height, *width)
            }
            None => (1, 1),
        };
        let covers = |shard_size: usize, partition_count: usize, size: usize| {
            shard_size.checked_mul(partition_count).is_some_and(|covered| covered >= size)
        };
        if !covers(shard_shape[0], partitions.0, height) || !covers(shard_shape[1], partitions.1, width) {
            return Err(DeviceError::ShardCoverageMismatch {
                tensor_shape: tensor_shape.to_vec(),
                shard_shape,
                partitions,
            });
        }

        let required = shard_shape[0]
            .checked_mul(shard_shape[1])
            .and_then(|count| data_type.storage_bytes(count))
            .ok_or_else(|| DeviceError::Runtime(format!("size of shard {shard_shape:?} overflows")))?;
        if required > self.l1_bytes_per_core {
            return Err(DeviceError::ShardExceedsL1 { required, available: self.l1_bytes_per_core });
        }
        Ok(())
    }
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for HostDevice {
    type Tensor = HostDeviceTensor;

    fn name(&self) -> &str {
        "host"
    }

    fn from_host(
        &self,
        tensor: &HostTensor,
        data_type: DataType,
        layout: Layout,
        memory_config: &MemoryConfig,
    ) -> Result<Self::Tensor, DeviceError> {
        if !data_type.is_supported_on(layout) {
            return Err(DeviceError::UnsupportedDataType { data_type, layout });
        }
        self.check_placement(tensor.shape(), data_type, memory_config)?;
        Ok(HostDeviceTensor { data: data_type.quantize(tensor), data_type, layout, memory_config: *memory_config })
    }

    fn unary(
        &self,
        op: UnaryOp,
        input: &Self::Tensor,
        memory_config: &MemoryConfig,
    ) -> Result<Self::Tensor, DeviceError> {
        self.check_placement(input.data.shape(), input.data_type, memory_config)?;
        let output = input.data_type.quantize(&op.golden(&input.data));
        tracing::trace!(op = %op, shape = ?output.shape(), "executed unary op on host device");
        Ok(HostDeviceTensor {
            data: output,
            data_type: input.data_type,
            layout: input.layout,
            memory_config: *memory_config,
        })
    }

    fn to_host(&self, tensor: &Self::Tensor) -> Result<HostTensor, DeviceError> {
        Ok(tensor.data.clone())
    }
}
