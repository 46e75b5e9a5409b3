//! Dense host-resident tensors.

use thiserror::Error;

/// Error type for host tensor construction and reshaping.
#[derive(Error, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TensorError {
    /// Error returned when the number of provided elements does not match the shape.
    #[error("shape {shape:?} holds {expected_count} element(s), but got {actual_count}")]
    ElementCountMismatch { shape: Vec<usize>, expected_count: usize, actual_count: usize },

    /// Error returned when a reshape would change the number of elements.
    #[error("cannot reshape a tensor with shape {from:?} into shape {to:?}")]
    IncompatibleReshape { from: Vec<usize>, to: Vec<usize> },

    /// Error returned when the element count of a shape overflows.
    #[error("element count of shape {shape:?} overflows")]
    Overflow { shape: Vec<usize> },
}

/// Dense tensor of `f32` values stored in row-major order on the host.
///
/// All data types are carried as `f32` on the host. Precision loss of narrower device data types is modeled by
/// [`DataType::quantize`](crate::types::DataType::quantize) rather than by the storage type.
#[derive(Clone, Debug, PartialEq)]
pub struct HostTensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl HostTensor {
    /// Creates a tensor, checking that `data` holds exactly one element per position of `shape`.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, TensorError> {
        let expected_count = volume(shape.as_slice()).ok_or_else(|| TensorError::Overflow { shape: shape.clone() })?;
        if data.len() != expected_count {
            return Err(TensorError::ElementCountMismatch { shape, expected_count, actual_count: data.len() });
        }
        Ok(Self { shape, data })
    }

    /// Creates a tensor by calling `f` once per element in row-major order.
    pub fn from_fn<F: FnMut() -> f32>(shape: Vec<usize>, mut f: F) -> Result<Self, TensorError> {
        let count = volume(shape.as_slice()).ok_or_else(|| TensorError::Overflow { shape: shape.clone() })?;
        let data = (0..count).map(|_| f()).collect();
        Ok(Self { shape, data })
    }

    /// Creates a tensor filled with zeros.
    pub fn zeros(shape: Vec<usize>) -> Result<Self, TensorError> {
        Self::from_fn(shape, || 0.0)
    }

    pub fn shape(&self) -> &[usize] {
        self.shape.as_slice()
    }

    pub fn data(&self) -> &[f32] {
        self.data.as_slice()
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns a tensor with the same elements and a new shape.
    pub fn reshape(self, shape: Vec<usize>) -> Result<Self, TensorError> {
        match volume(shape.as_slice()) {
            Some(count) if count == self.data.len() => Ok(Self { shape, data: self.data }),
            _ => Err(TensorError::IncompatibleReshape { from: self.shape, to: shape }),
        }
    }

    /// Returns a tensor with `f` applied to every element.
    pub fn map<F: Fn(f32) -> f32>(&self, f: F) -> Self {
        Self { shape: self.shape.clone(), data: self.data.iter().copied().map(f).collect() }
    }

    /// Returns a tensor where `f` has rewritten every consecutive run of `chunk_size` elements in place (the last
    /// run may be shorter). `chunk_size` must be non-zero.
    pub fn map_chunks<F: FnMut(&mut [f32])>(&self, chunk_size: usize, f: F) -> Self {
        let mut data = self.data.clone();
        data.chunks_mut(chunk_size).for_each(f);
        Self { shape: self.shape.clone(), data }
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }
}

/// Returns the number of elements in a tensor with the given shape, or [`None`] on overflow.
pub fn volume(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |count, &dimension| count.checked_mul(dimension))
}
