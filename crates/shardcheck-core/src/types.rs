//! Device data types and the precision loss they incur.

use std::fmt::Display;

use half::bf16;
use serde::{Deserialize, Serialize};

use crate::layouts::Layout;
use crate::tensors::HostTensor;

/// Number of consecutive values that share one exponent in [`DataType::BFloat8B`].
pub const BLOCK_FLOAT_GROUP_SIZE: usize = 16;

/// Number of magnitude bits stored per value in [`DataType::BFloat8B`].
const BLOCK_FLOAT_MAGNITUDE_BITS: i32 = 7;

/// Element data types that tensors can be stored in on the device.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// IEEE 754 single-precision floating point.
    #[serde(rename = "FLOAT32")]
    Float32,

    /// [Brain floating point](https://en.wikipedia.org/wiki/Bfloat16_floating-point_format): the upper 16 bits of an
    /// IEEE 754 single-precision value (8 exponent bits and 7 mantissa bits).
    #[serde(rename = "BFLOAT16")]
    BFloat16,

    /// Block floating point where every group of [`BLOCK_FLOAT_GROUP_SIZE`] consecutive values shares the largest
    /// exponent in the group and each value keeps a sign bit and a 7-bit magnitude. Small values that sit next to
    /// large ones lose most of their precision. Only representable in [`Layout::Tiled`] tensors.
    #[serde(rename = "BFLOAT8_B")]
    BFloat8B,
}

impl DataType {
    /// Returns `true` if tensors of this data type can be stored using `layout`.
    pub fn is_supported_on(&self, layout: Layout) -> bool {
        !matches!((self, layout), (Self::BFloat8B, Layout::RowMajor))
    }

    /// Number of bytes needed to store `count` elements of this data type, including shared exponents.
    pub fn storage_bytes(&self, count: usize) -> Option<usize> {
        match self {
            Self::Float32 => count.checked_mul(4),
            Self::BFloat16 => count.checked_mul(2),
            Self::BFloat8B => count.checked_add(count.div_ceil(BLOCK_FLOAT_GROUP_SIZE)),
        }
    }

    /// Rounds every element of `tensor` to the nearest value representable in this data type. Non-finite values are
    /// preserved as-is.
    pub fn quantize(&self, tensor: &HostTensor) -> HostTensor {
        match self {
            Self::Float32 => tensor.clone(),
            Self::BFloat16 => tensor.map(|value| bf16::from_f32(value).to_f32()),
            Self::BFloat8B => tensor.map_chunks(BLOCK_FLOAT_GROUP_SIZE, quantize_block_float_group),
        }
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float32 => write!(f, "float32"),
            Self::BFloat16 => write!(f, "bfloat16"),
            Self::BFloat8B => write!(f, "bfloat8_b"),
        }
    }
}

fn quantize_block_float_group(group: &mut [f32]) {
    let shared_exponent = group
        .iter()
        .filter(|value| value.is_finite() && **value != 0.0)
        .map(|value| unbiased_exponent(*value))
        .max();
    let Some(shared_exponent) = shared_exponent else {
        return;
    };

    // The largest value in the group occupies all magnitude bits, so one step is worth 2^(e - (bits - 1)).
    let step = 2f32.powi(shared_exponent - (BLOCK_FLOAT_MAGNITUDE_BITS - 1));
    let max_magnitude = ((1 << BLOCK_FLOAT_MAGNITUDE_BITS) - 1) as f32;
    for value in group.iter_mut().filter(|value| value.is_finite()) {
        let magnitude = (value.abs() / step).round().min(max_magnitude);
        *value = (magnitude * step).copysign(*value);
    }
}

fn unbiased_exponent(value: f32) -> i32 {
    let biased = ((value.to_bits() >> 23) & 0xff) as i32;
    biased.max(1) - 127
}
