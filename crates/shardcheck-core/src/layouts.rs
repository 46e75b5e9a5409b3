//! In-shard element arrangement rules.
//!
//! Accelerator memory is either _tiled_, where elements are grouped into fixed [`TILE_HEIGHT`] x [`TILE_WIDTH`]
//! tiles that the compute engines operate on atomically, or _row-major_, where each row is stored contiguously.
//! Shard shapes must respect the granularity of the layout they are stored in, which is what
//! [`Layout::pad_shard_shape`] enforces.

use serde::{Deserialize, Serialize};

/// Number of rows in one tile of a [`Layout::Tiled`] tensor.
pub const TILE_HEIGHT: usize = 32;

/// Number of columns in one tile of a [`Layout::Tiled`] tensor.
pub const TILE_WIDTH: usize = 32;

/// Minimum number of rows that a [`Layout::RowMajor`] shard is padded to a multiple of.
pub const ROW_MAJOR_ROW_GRANULARITY: usize = 2;

/// Element arrangement within a shard.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Layout {
    /// Elements are grouped into [`TILE_HEIGHT`] x [`TILE_WIDTH`] tiles.
    #[serde(rename = "TILE_LAYOUT")]
    Tiled,

    /// Rows are stored contiguously.
    #[serde(rename = "ROW_MAJOR_LAYOUT")]
    RowMajor,
}

impl Layout {
    /// Returns the `[height, width]` granularity that shard shapes in this layout are padded to.
    pub fn alignment(&self) -> [usize; 2] {
        match self {
            Self::Tiled => [TILE_HEIGHT, TILE_WIDTH],
            Self::RowMajor => [ROW_MAJOR_ROW_GRANULARITY, 1],
        }
    }

    /// Pads a `[height, width]` shard shape up to this layout's [alignment](Layout::alignment). Dimensions are only
    /// ever padded up and never truncated. Returns [`None`] if padding overflows.
    pub fn pad_shard_shape(&self, shard_shape: [usize; 2]) -> Option<[usize; 2]> {
        let [height_alignment, width_alignment] = self.alignment();
        Some([round_up(shard_shape[0], height_alignment)?, round_up(shard_shape[1], width_alignment)?])
    }

    /// Returns `true` if `shard_shape` is already a multiple of this layout's [alignment](Layout::alignment).
    pub fn is_aligned(&self, shard_shape: [usize; 2]) -> bool {
        let [height_alignment, width_alignment] = self.alignment();
        shard_shape[0] % height_alignment == 0 && shard_shape[1] % width_alignment == 0
    }
}

/// Rounds `value` up to the nearest multiple of `multiple`, returning [`None`] on overflow.
pub fn round_up(value: usize, multiple: usize) -> Option<usize> {
    if multiple <= 1 {
        return Some(value);
    }
    value.checked_next_multiple_of(multiple)
}

/// Makes a tensor shape storable in a row-major layout by padding its last dimension up to an even size, since
/// row-major rows of 16-bit elements must occupy a whole number of 32-bit words.
pub fn sanitize_row_major_shape(shape: &[usize]) -> Vec<usize> {
    let mut shape = shape.to_vec();
    if let Some(width) = shape.last_mut() {
        if *width % 2 != 0 {
            *width += 1;
        }
    }
    shape
}
