//! This module turns an abstract description of how a tensor should be _sharded_ (or _partitioned_) across a 2D
//! grid of accelerator cores into the concrete shard shape and memory configuration that the runtime consumes.
//!
//! # Pre-shard view
//!
//! Sharding always operates on a 2D view of the tensor: all dimensions except the last one are collapsed into the
//! _pre-shard height_ (`product(shape[..rank - 1])`) and the last dimension is the _pre-shard width_. For example,
//! a `[2, 3, 64, 128]` tensor is sharded as a `384 x 128` matrix.
//!
//! # Strategies
//!
//! | [`ShardStrategy`] | Split dimension(s) | Shard shape |
//! |---|---|---|
//! | [`Height`][ShardStrategy::Height] | height across all `rows * cols` cores | `[height / cores, width]` |
//! | [`Width`][ShardStrategy::Width] | width across all `rows * cols` cores | `[height, width / cores]` |
//! | [`Block`][ShardStrategy::Block] | height across rows, width across columns | `[height / rows, width / cols]` |
//!
//! For [`Block`][ShardStrategy::Block] sharding with [`ColMajor`][ShardOrientation::ColMajor] orientation the grid
//! is transposed: height is split across grid columns and width across grid rows. For the other strategies the
//! orientation only controls the order in which cores receive consecutive shards.
//!
//! When the `use_height_and_width_as_shard_shape` flag is set, the last two tensor dimensions are used directly as
//! the shard shape, without dividing by the grid.
//!
//! # Practical usage
//!
//! ```ignore
//! let spec = ShardSpec::resolve(
//!     vec![2, 64, 128],
//!     CoreGrid::new(2, 2),
//!     ShardStrategy::Height,
//!     ShardOrientation::RowMajor,
//!     false,
//!     Layout::Tiled,
//! )?;
//! assert_eq!(spec.shard_shape(), [32, 128]);
//!
//! // Hand the memory configuration over to the runtime when allocating the device tensor.
//! let memory_config = spec.into_memory_config();
//! ```

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::layouts::Layout;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error type for shard-spec resolution. Every variant means that the requested sharding is invalid and the tensor
/// cannot be placed with it; callers should treat the corresponding test vector as invalid rather than coerce it.
#[derive(Error, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ShardSpecError {
    /// Error returned when the tensor shape has no dimensions.
    #[error("tensor shape must have at least one dimension")]
    EmptyTensorShape,

    /// Error returned when a tensor dimension has size `0`.
    #[error("tensor dimension #{dimension} has size 0")]
    ZeroSizedDimension { dimension: usize },

    /// Error returned when the core grid has no rows or no columns.
    #[error("core grid {rows}x{cols} must have at least one row and one column")]
    EmptyCoreGrid { rows: usize, cols: usize },

    /// Error returned when the pre-shard height cannot be evenly split into the requested number of partitions.
    #[error("pre-shard height {height} is not divisible into {partition_count} partition(s)")]
    IndivisibleHeight { height: usize, partition_count: usize },

    /// Error returned when the pre-shard width cannot be evenly split into the requested number of partitions.
    #[error("pre-shard width {width} is not divisible into {partition_count} partition(s)")]
    IndivisibleWidth { width: usize, partition_count: usize },

    /// Error returned when block sharding uses the tensor's height and width as the shard shape, but the resulting
    /// blocks do not exactly cover the tensor on the core grid.
    #[error(
        "block shard shape {shard_shape:?} does not tile a {height}x{width} tensor on a {grid_rows}x{grid_cols} grid"
    )]
    BlockGridMismatch { shard_shape: [usize; 2], height: usize, width: usize, grid_rows: usize, grid_cols: usize },

    /// Error returned when an invalid slice range is constructed.
    #[error("invalid shard slice range [{start}, {end})")]
    InvalidShardSlice { start: usize, end: usize },

    /// Error returned when the shards of a spec, laid out over its partitions, do not reach the end of the pre-shard
    /// view. This can only happen when the tensor's height and width are used as the shard shape.
    #[error(
        "shards of shape {shard_shape:?} on {partitions:?} partition(s) miss pre-shard shape {pre_shard_shape:?}"
    )]
    IncompleteCoverage { pre_shard_shape: [usize; 2], shard_shape: [usize; 2], partitions: (usize, usize) },

    /// Error returned when arithmetic overflows while resolving a shard spec.
    #[error("overflow while {context}")]
    Overflow { context: String },
}

// ---------------------------------------------------------------------------
// Core grid
// ---------------------------------------------------------------------------

/// Two-dimensional extent of the compute-core grid that a tensor is partitioned over.
///
/// Sweep vectors describe grids using `Y` for the number of rows and `X` for the number of columns.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CoreGrid {
    pub rows: usize,
    pub cols: usize,
}

impl CoreGrid {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    /// Returns the total number of cores, or [`None`] on overflow.
    pub fn core_count(&self) -> Option<usize> {
        self.rows.checked_mul(self.cols)
    }

    /// Returns the grid with rows and columns swapped.
    pub fn transposed(&self) -> Self {
        Self { rows: self.cols, cols: self.rows }
    }

    /// Returns `true` if the grid has no rows or no columns.
    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }
}

impl Display for CoreGrid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.rows, self.cols)
    }
}

/// Coordinate of one core in a [`CoreGrid`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CoreCoord {
    pub row: usize,
    pub col: usize,
}

// ---------------------------------------------------------------------------
// Strategy and orientation
// ---------------------------------------------------------------------------

/// Which dimension(s) of the pre-shard view are split across the core grid.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShardStrategy {
    /// The pre-shard height is split across all cores.
    #[serde(rename = "HEIGHT")]
    Height,

    /// The pre-shard width is split across all cores.
    #[serde(rename = "WIDTH")]
    Width,

    /// The pre-shard height is split across grid rows and the width across grid columns.
    #[serde(rename = "BLOCK")]
    Block,
}

/// Order in which cores of the grid are visited when assigning consecutive shards.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShardOrientation {
    /// Cores are visited row by row.
    #[default]
    #[serde(rename = "ROW_MAJOR")]
    RowMajor,

    /// Cores are visited column by column.
    #[serde(rename = "COL_MAJOR")]
    ColMajor,
}

// ---------------------------------------------------------------------------
// Memory configuration
// ---------------------------------------------------------------------------

/// Sharded memory layout understood by the runtime.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TensorMemoryLayout {
    HeightSharded,
    WidthSharded,
    BlockSharded,
}

impl From<ShardStrategy> for TensorMemoryLayout {
    fn from(strategy: ShardStrategy) -> Self {
        match strategy {
            ShardStrategy::Height => Self::HeightSharded,
            ShardStrategy::Width => Self::WidthSharded,
            ShardStrategy::Block => Self::BlockSharded,
        }
    }
}

/// Device memory that shards are placed in. Sharded tensors always live in per-core L1 memory.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum BufferType {
    Dram,
    #[default]
    L1,
}

/// Per-shard placement parameters of a [`MemoryConfig`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShardParameters {
    pub grid: CoreGrid,
    pub shape: [usize; 2],
    pub orientation: ShardOrientation,
}

/// Memory configuration object that the runtime uses to allocate a sharded device tensor.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct MemoryConfig {
    pub memory_layout: TensorMemoryLayout,
    pub buffer_type: BufferType,
    pub shard: ShardParameters,
}

impl MemoryConfig {
    /// Returns the strategy that produced this configuration.
    pub fn strategy(&self) -> ShardStrategy {
        match self.memory_layout {
            TensorMemoryLayout::HeightSharded => ShardStrategy::Height,
            TensorMemoryLayout::WidthSharded => ShardStrategy::Width,
            TensorMemoryLayout::BlockSharded => ShardStrategy::Block,
        }
    }

    /// Returns the number of `(height, width)` partitions that the grid of this configuration provides.
    pub fn partition_counts(&self) -> Option<(usize, usize)> {
        let grid = self.shard.grid;
        match self.memory_layout {
            TensorMemoryLayout::HeightSharded => Some((grid.core_count()?, 1)),
            TensorMemoryLayout::WidthSharded => Some((1, grid.core_count()?)),
            TensorMemoryLayout::BlockSharded => {
                let grid = effective_grid(grid, ShardStrategy::Block, self.shard.orientation);
                Some((grid.rows, grid.cols))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Shard metadata
// ---------------------------------------------------------------------------

/// Half-open slice `[start, end)` along one dimension of the pre-shard view.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShardSlice {
    start: usize,
    end: usize,
}

impl ShardSlice {
    /// Creates a new shard slice.
    pub fn new(start: usize, end: usize) -> Result<Self, ShardSpecError> {
        if start > end {
            return Err(ShardSpecError::InvalidShardSlice { start, end });
        }
        Ok(Self { start, end })
    }

    /// Inclusive start index.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Exclusive end index.
    pub fn end(&self) -> usize {
        self.end
    }

    /// Length of this slice.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Returns `true` iff this slice is empty.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Placement of one shard on one core.
///
/// Slices refer to the unpadded pre-shard view. Cores that receive no data (which can happen when the tensor's own
/// height and width are used as the shard shape) get empty slices.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShardDescriptor {
    shard_index: usize,
    core: CoreCoord,
    rows: ShardSlice,
    cols: ShardSlice,
}

impl ShardDescriptor {
    /// Index of this shard in the order that the grid orientation visits cores.
    pub fn shard_index(&self) -> usize {
        self.shard_index
    }

    /// Core that owns this shard.
    pub fn core(&self) -> CoreCoord {
        self.core
    }

    /// Rows of the pre-shard view held by this shard.
    pub fn rows(&self) -> ShardSlice {
        self.rows
    }

    /// Columns of the pre-shard view held by this shard.
    pub fn cols(&self) -> ShardSlice {
        self.cols
    }

    /// Unpadded `[height, width]` of the data held by this shard.
    pub fn shape(&self) -> [usize; 2] {
        [self.rows.len(), self.cols.len()]
    }
}

// ---------------------------------------------------------------------------
// Shard spec
// ---------------------------------------------------------------------------

/// Fully resolved description of how a tensor is partitioned across a core grid.
///
/// A `ShardSpec` is an immutable value built by [`ShardSpec::resolve`] and consumed by
/// [`ShardSpec::into_memory_config`] to produce the [`MemoryConfig`] that the runtime allocates the tensor with.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShardSpec {
    tensor_shape: Vec<usize>,
    core_grid: CoreGrid,
    strategy: ShardStrategy,
    orientation: ShardOrientation,
    use_height_and_width_as_shard_shape: bool,
    layout: Layout,
    pre_shard_shape: [usize; 2],
    logical_shard_shape: [usize; 2],
    shard_shape: [usize; 2],
}

impl ShardSpec {
    /// Resolves the shard shape of a tensor with shape `tensor_shape` sharded over `core_grid`.
    ///
    /// Fails if the shape is empty or has zero-sized dimensions, if the grid is empty, if the pre-shard view does
    /// not divide evenly according to `strategy` and `orientation`, or if `use_height_and_width_as_shard_shape` is
    /// combined with block sharding on a grid whose blocks would not cover the tensor exactly.
    ///
    /// Computed shard shapes are padded up to the alignment of `layout`. When the tensor's own height and width are
    /// used as the shard shape they are taken as-is.
    pub fn resolve(
        tensor_shape: Vec<usize>,
        core_grid: CoreGrid,
        strategy: ShardStrategy,
        orientation: ShardOrientation,
        use_height_and_width_as_shard_shape: bool,
        layout: Layout,
    ) -> Result<Self, ShardSpecError> {
        if tensor_shape.is_empty() {
            return Err(ShardSpecError::EmptyTensorShape);
        }
        if let Some(dimension) = tensor_shape.iter().position(|&size| size == 0) {
            return Err(ShardSpecError::ZeroSizedDimension { dimension });
        }
        if core_grid.is_empty() {
            return Err(ShardSpecError::EmptyCoreGrid { rows: core_grid.rows, cols: core_grid.cols });
        }

        let [height, width] = pre_shard_shape(tensor_shape.as_slice())?;
        let core_count = core_grid
            .core_count()
            .ok_or_else(|| ShardSpecError::Overflow { context: format!("counting the cores of a {core_grid} grid") })?;
        let grid = effective_grid(core_grid, strategy, orientation);

        let logical_shard_shape = if use_height_and_width_as_shard_shape {
            let shard_shape = trailing_height_and_width(tensor_shape.as_slice());
            if strategy == ShardStrategy::Block {
                let covers_tensor = height % shard_shape[0] == 0 && height / shard_shape[0] == grid.rows;
                if !covers_tensor || grid.cols != 1 {
                    return Err(ShardSpecError::BlockGridMismatch {
                        shard_shape,
                        height,
                        width,
                        grid_rows: grid.rows,
                        grid_cols: grid.cols,
                    });
                }
            }
            shard_shape
        } else {
            match strategy {
                ShardStrategy::Height => [split_height(height, core_count)?, width],
                ShardStrategy::Width => [height, split_width(width, core_count)?],
                ShardStrategy::Block => [split_height(height, grid.rows)?, split_width(width, grid.cols)?],
            }
        };

        let shard_shape = if use_height_and_width_as_shard_shape {
            logical_shard_shape
        } else {
            layout.pad_shard_shape(logical_shard_shape).ok_or_else(|| ShardSpecError::Overflow {
                context: format!("padding shard shape {logical_shard_shape:?} to the {layout:?} layout"),
            })?
        };

        tracing::debug!(
            tensor_shape = ?tensor_shape,
            core_grid = %core_grid,
            strategy = ?strategy,
            orientation = ?orientation,
            layout = ?layout,
            shard_shape = ?shard_shape,
            "resolved shard spec"
        );

        Ok(Self {
            tensor_shape,
            core_grid,
            strategy,
            orientation,
            use_height_and_width_as_shard_shape,
            layout,
            pre_shard_shape: [height, width],
            logical_shard_shape,
            shard_shape,
        })
    }

    pub fn tensor_shape(&self) -> &[usize] {
        self.tensor_shape.as_slice()
    }

    pub fn core_grid(&self) -> CoreGrid {
        self.core_grid
    }

    pub fn strategy(&self) -> ShardStrategy {
        self.strategy
    }

    pub fn orientation(&self) -> ShardOrientation {
        self.orientation
    }

    pub fn uses_height_and_width_as_shard_shape(&self) -> bool {
        self.use_height_and_width_as_shard_shape
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// `[height, width]` of the 2D view that is partitioned.
    pub fn pre_shard_shape(&self) -> [usize; 2] {
        self.pre_shard_shape
    }

    /// `[height, width]` of each shard before padding to the layout alignment.
    pub fn logical_shard_shape(&self) -> [usize; 2] {
        self.logical_shard_shape
    }

    /// `[height, width]` of each shard as allocated on a core.
    pub fn shard_shape(&self) -> [usize; 2] {
        self.shard_shape
    }

    /// Number of cores in the grid.
    pub fn core_count(&self) -> usize {
        // Validated in `resolve`.
        self.core_grid.rows * self.core_grid.cols
    }

    /// Number of elements allocated per shard, or [`None`] on overflow.
    pub fn shard_volume(&self) -> Option<usize> {
        self.shard_shape[0].checked_mul(self.shard_shape[1])
    }

    /// Number of `(height, width)` partitions that the pre-shard view is split into.
    pub fn partition_counts(&self) -> (usize, usize) {
        match self.strategy {
            ShardStrategy::Height => (self.core_count(), 1),
            ShardStrategy::Width => (1, self.core_count()),
            ShardStrategy::Block => {
                let grid = effective_grid(self.core_grid, self.strategy, self.orientation);
                (grid.rows, grid.cols)
            }
        }
    }

    /// Checks that the logical shards, laid out over [`Self::partition_counts`], reach the end of the pre-shard view
    /// along both dimensions.
    ///
    /// Specs that split the pre-shard view always pass. Specs that use the tensor's height and width as the shard shape
    /// may not, for instance a `[4, 64, 32]` tensor height sharded on a single core.
    pub fn check_coverage(&self) -> Result<(), ShardSpecError> {
        let partitions = self.partition_counts();
        let covers = |shard_size: usize, partition_count: usize, size: usize| {
            shard_size.checked_mul(partition_count).is_some_and(|covered| covered >= size)
        };
        let [height, width] = self.pre_shard_shape;
        let [shard_height, shard_width] = self.logical_shard_shape;
        if !covers(shard_height, partitions.0, height) || !covers(shard_width, partitions.1, width) {
            return Err(ShardSpecError::IncompleteCoverage {
                pre_shard_shape: self.pre_shard_shape,
                shard_shape: self.logical_shard_shape,
                partitions,
            });
        }
        Ok(())
    }

    /// Returns `true` if no padding was needed to fit the layout alignment.
    pub fn is_tile_aligned(&self) -> bool {
        self.layout.is_aligned(self.logical_shard_shape)
    }

    /// Returns the placement of every shard, in the order the grid orientation visits cores.
    ///
    /// Fails with [`ShardSpecError::IncompleteCoverage`] if the shards do not cover the whole pre-shard view.
    pub fn shards(&self) -> Result<Vec<ShardDescriptor>, ShardSpecError> {
        self.check_coverage()?;
        let [height, width] = self.pre_shard_shape;
        let [shard_height, shard_width] = self.logical_shard_shape;
        let grid = self.core_grid;
        let mut shards = Vec::with_capacity(self.core_count());
        match self.strategy {
            ShardStrategy::Height | ShardStrategy::Width => {
                for shard_index in 0..self.core_count() {
                    let core = match self.orientation {
                        ShardOrientation::RowMajor => {
                            CoreCoord { row: shard_index / grid.cols, col: shard_index % grid.cols }
                        }
                        ShardOrientation::ColMajor => {
                            CoreCoord { row: shard_index % grid.rows, col: shard_index / grid.rows }
                        }
                    };
                    let (rows, cols) = if self.strategy == ShardStrategy::Height {
                        (clipped_slice(shard_index, shard_height, height)?, ShardSlice::new(0, width)?)
                    } else {
                        (ShardSlice::new(0, height)?, clipped_slice(shard_index, shard_width, width)?)
                    };
                    shards.push(ShardDescriptor { shard_index, core, rows, cols });
                }
            }
            ShardStrategy::Block => {
                let effective = effective_grid(grid, self.strategy, self.orientation);
                for row_partition in 0..effective.rows {
                    for col_partition in 0..effective.cols {
                        let core = match self.orientation {
                            ShardOrientation::RowMajor => CoreCoord { row: row_partition, col: col_partition },
                            ShardOrientation::ColMajor => CoreCoord { row: col_partition, col: row_partition },
                        };
                        shards.push(ShardDescriptor {
                            shard_index: row_partition * effective.cols + col_partition,
                            core,
                            rows: clipped_slice(row_partition, shard_height, height)?,
                            cols: clipped_slice(col_partition, shard_width, width)?,
                        });
                    }
                }
            }
        }
        Ok(shards)
    }

    /// Consumes this spec and builds the runtime memory configuration for it.
    pub fn into_memory_config(self) -> MemoryConfig {
        MemoryConfig {
            memory_layout: self.strategy.into(),
            buffer_type: BufferType::L1,
            shard: ShardParameters { grid: self.core_grid, shape: self.shard_shape, orientation: self.orientation },
        }
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn pre_shard_shape(tensor_shape: &[usize]) -> Result<[usize; 2], ShardSpecError> {
    let (width, leading) = tensor_shape.split_last().ok_or(ShardSpecError::EmptyTensorShape)?;
    let height = leading.iter().try_fold(1usize, |height, &size| height.checked_mul(size)).ok_or_else(|| {
        ShardSpecError::Overflow { context: format!("computing the pre-shard height of shape {tensor_shape:?}") }
    })?;
    Ok([height, *width])
}

fn trailing_height_and_width(tensor_shape: &[usize]) -> [usize; 2] {
    match tensor_shape {
        [.., height, width] => [*height, *width],
        [width] => [1, *width],
        [] => [1, 1],
    }
}

/// Grid whose rows split the pre-shard height and whose columns split the pre-shard width.
fn effective_grid(grid: CoreGrid, strategy: ShardStrategy, orientation: ShardOrientation) -> CoreGrid {
    match (strategy, orientation) {
        (ShardStrategy::Block, ShardOrientation::ColMajor) => grid.transposed(),
        _ => grid,
    }
}

fn split_height(height: usize, partition_count: usize) -> Result<usize, ShardSpecError> {
    if height % partition_count != 0 {
        return Err(ShardSpecError::IndivisibleHeight { height, partition_count });
    }
    Ok(height / partition_count)
}

fn split_width(width: usize, partition_count: usize) -> Result<usize, ShardSpecError> {
    if width % partition_count != 0 {
        return Err(ShardSpecError::IndivisibleWidth { width, partition_count });
    }
    Ok(width / partition_count)
}

fn clipped_slice(
    partition_index: usize,
    partition_size: usize,
    dimension_size: usize,
) -> Result<ShardSlice, ShardSpecError> {
    let start = partition_index
        .checked_mul(partition_size)
        .ok_or_else(|| ShardSpecError::Overflow { context: "computing shard-slice start index".to_string() })?
        .min(dimension_size);
    let end = start
        .checked_add(partition_size)
        .ok_or_else(|| ShardSpecError::Overflow { context: "computing shard-slice end index".to_string() })?
        .min(dimension_size);
    ShardSlice::new(start, end)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
