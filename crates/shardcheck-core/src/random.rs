//! Seeded random tensor generators.
//!
//! Every generator takes the random number generator explicitly so that runs are reproducible from a single seed
//! and no process-global state is involved.

use rand::Rng;

use crate::tensors::{HostTensor, TensorError};

/// Samples a tensor with elements drawn uniformly from `[low, high)`.
pub fn uniform<R: Rng + ?Sized>(
    shape: Vec<usize>,
    low: f32,
    high: f32,
    rng: &mut R,
) -> Result<HostTensor, TensorError> {
    HostTensor::from_fn(shape, || sample_uniform(low, high, rng))
}

/// Samples a tensor where each element is, with equal probability, negative infinity, positive infinity, NaN, or a
/// value drawn uniformly from `[low, high)`.
pub fn uniform_with_non_finite<R: Rng + ?Sized>(
    shape: Vec<usize>,
    low: f32,
    high: f32,
    rng: &mut R,
) -> Result<HostTensor, TensorError> {
    HostTensor::from_fn(shape, || {
        let selector = rng.gen::<f32>();
        if selector <= 0.25 {
            f32::NEG_INFINITY
        } else if selector <= 0.5 {
            f32::INFINITY
        } else if selector <= 0.75 {
            f32::NAN
        } else {
            sample_uniform(low, high, rng)
        }
    })
}

fn sample_uniform<R: Rng + ?Sized>(low: f32, high: f32, rng: &mut R) -> f32 {
    low + (high - low) * rng.gen::<f32>()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn test_uniform() {
        let mut rng = StdRng::seed_from_u64(0);
        let tensor = uniform(vec![8, 32], -100.0, 100.0, &mut rng).unwrap();
        assert_eq!(tensor.shape(), &[8, 32]);
        assert!(tensor.data().iter().all(|value| (-100.0..100.0).contains(value)));
    }

    #[test]
    fn test_uniform_is_reproducible() {
        let first = uniform(vec![64], 0.0, 1.0, &mut StdRng::seed_from_u64(7)).unwrap();
        let second = uniform(vec![64], 0.0, 1.0, &mut StdRng::seed_from_u64(7)).unwrap();
        let third = uniform(vec![64], 0.0, 1.0, &mut StdRng::seed_from_u64(8)).unwrap();
        assert_eq!(first, second);
        assert_ne!(first, third);
    }

    #[test]
    fn test_uniform_with_non_finite() {
        let mut rng = StdRng::seed_from_u64(0);
        let tensor = uniform_with_non_finite(vec![32, 32], -10.0, 10.0, &mut rng).unwrap();
        let data = tensor.data();
        let negative_infinities = data.iter().filter(|value| **value == f32::NEG_INFINITY).count();
        let positive_infinities = data.iter().filter(|value| **value == f32::INFINITY).count();
        let nans = data.iter().filter(|value| value.is_nan()).count();
        let finite = data.iter().filter(|value| value.is_finite()).count();
        assert_eq!(negative_infinities + positive_infinities + nans + finite, 1024);
        for count in [negative_infinities, positive_infinities, nans, finite] {
            assert!((150..350).contains(&count), "unexpected category count {count}");
        }
        assert!(data.iter().filter(|value| value.is_finite()).all(|value| (-10.0..10.0).contains(value)));
    }

    #[test]
    fn test_uniform_rejects_overflowing_shapes() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(uniform(vec![usize::MAX, 2], 0.0, 1.0, &mut rng), Err(TensorError::Overflow { .. })));
    }
}
