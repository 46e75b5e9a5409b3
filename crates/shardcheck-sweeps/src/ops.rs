//! Elementwise unary operations that can be swept over sharded inputs.

use std::fmt::Display;

use rand::Rng;
use serde::{Deserialize, Serialize};
use shardcheck_core::random::{uniform, uniform_with_non_finite};
use shardcheck_core::tensors::{HostTensor, TensorError};

/// Lower bound of generated input values.
pub const INPUT_LOW: f32 = -100.0;

/// Upper bound (exclusive) of generated input values.
pub const INPUT_HIGH: f32 = 100.0;

/// Elementwise unary operation. Predicates produce `1.0` for true and `0.0` for false.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnaryOp {
    IsInf,
    IsNan,
    IsFinite,
    Abs,
    Neg,
    Relu,
    Square,
}

impl UnaryOp {
    /// Applies this operation to a single value.
    pub fn apply(&self, value: f32) -> f32 {
        match self {
            Self::IsInf => predicate(value.is_infinite()),
            Self::IsNan => predicate(value.is_nan()),
            Self::IsFinite => predicate(value.is_finite()),
            Self::Abs => value.abs(),
            Self::Neg => -value,
            Self::Relu => value.max(0.0),
            Self::Square => value * value,
        }
    }

    /// Computes the reference output of this operation on the host.
    pub fn golden(&self, input: &HostTensor) -> HostTensor {
        input.map(|value| self.apply(value))
    }

    /// Returns `true` if the interesting inputs of this operation include non-finite values.
    pub fn classifies_non_finite_values(&self) -> bool {
        matches!(self, Self::IsInf | Self::IsNan | Self::IsFinite)
    }

    /// Samples an input tensor for this operation in `[INPUT_LOW, INPUT_HIGH)`, mixed with infinities and NaNs for
    /// the classification predicates.
    pub fn generate_input<R: Rng + ?Sized>(&self, shape: Vec<usize>, rng: &mut R) -> Result<HostTensor, TensorError> {
        if self.classifies_non_finite_values() {
            uniform_with_non_finite(shape, INPUT_LOW, INPUT_HIGH, rng)
        } else {
            uniform(shape, INPUT_LOW, INPUT_HIGH, rng)
        }
    }
}

impl Display for UnaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::IsInf => "isinf",
            Self::IsNan => "isnan",
            Self::IsFinite => "isfinite",
            Self::Abs => "abs",
            Self::Neg => "neg",
            Self::Relu => "relu",
            Self::Square => "square",
        };
        write!(f, "{name}")
    }
}

fn predicate(value: bool) -> f32 {
    if value { 1.0 } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn test_unary_op_golden() {
        let input = HostTensor::new(vec![5], vec![-2.0, 0.5, f32::INFINITY, f32::NEG_INFINITY, f32::NAN]).unwrap();
        assert_eq!(UnaryOp::IsInf.golden(&input).data(), &[0.0, 0.0, 1.0, 1.0, 0.0]);
        assert_eq!(UnaryOp::IsNan.golden(&input).data(), &[0.0, 0.0, 0.0, 0.0, 1.0]);
        assert_eq!(UnaryOp::IsFinite.golden(&input).data(), &[1.0, 1.0, 0.0, 0.0, 0.0]);

        let input = HostTensor::new(vec![2, 2], vec![-2.0, 0.5, 3.0, -0.0]).unwrap();
        assert_eq!(UnaryOp::Abs.golden(&input).data(), &[2.0, 0.5, 3.0, 0.0]);
        assert_eq!(UnaryOp::Neg.golden(&input).data(), &[2.0, -0.5, -3.0, 0.0]);
        assert_eq!(UnaryOp::Relu.golden(&input).data(), &[0.0, 0.5, 3.0, 0.0]);
        assert_eq!(UnaryOp::Square.golden(&input).data(), &[4.0, 0.25, 9.0, 0.0]);
        assert_eq!(UnaryOp::Square.golden(&input).shape(), &[2, 2]);
    }

    #[test]
    fn test_unary_op_input_generation() {
        let mut rng = StdRng::seed_from_u64(3);
        let input = UnaryOp::IsInf.generate_input(vec![64, 64], &mut rng).unwrap();
        assert!(input.data().iter().any(|value| value.is_infinite()));
        assert!(input.data().iter().any(|value| value.is_nan()));

        let input = UnaryOp::Abs.generate_input(vec![64, 64], &mut rng).unwrap();
        assert!(input.data().iter().all(|value| (INPUT_LOW..INPUT_HIGH).contains(value)));
    }

    #[test]
    fn test_unary_op_names() {
        assert_eq!(UnaryOp::IsInf.to_string(), "isinf");
        assert_eq!(serde_json::to_string(&UnaryOp::IsFinite).unwrap(), "\"isfinite\"");
        assert_eq!(serde_json::from_str::<UnaryOp>("\"relu\"").unwrap(), UnaryOp::Relu);
    }
}
