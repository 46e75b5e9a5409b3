//! Sweep vectors over sharded inputs.
//!
//! A sweep vector pairs a [`ShardedInputSpec`] (tensor shape, core grid, and sharding parameters) with the data type
//! of the input tensor. Vectors are generated in bulk by [`generate_sharded_specs`] and screened by
//! [`invalidate_vector`] before they are run; invalid vectors are recorded along with the reason they were skipped.

use rand::Rng;
use serde::{Deserialize, Serialize};
use shardcheck_core::layouts::{Layout, TILE_HEIGHT, TILE_WIDTH, sanitize_row_major_shape};
use shardcheck_core::sharding::{CoreGrid, ShardOrientation, ShardSpec, ShardSpecError, ShardStrategy};
use shardcheck_core::types::DataType;

/// Default budget, in elements, for the shard that each core holds.
pub const DEFAULT_MAX_TENSOR_SIZE_PER_CORE: usize = 62 * 1024;

/// Minimum `[height, width]` granularity of generated shards in row-major layouts.
pub const ROW_MAJOR_SHARD_UNIT: [usize; 2] = [1, 16];

// ---------------------------------------------------------------------------
// Input specs
// ---------------------------------------------------------------------------

/// Serialized description of a sharded input tensor, as stored in sweep vectors.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardedInputSpec {
    pub input_shape: Vec<usize>,

    /// Number of core grid columns.
    #[serde(rename = "X")]
    pub x: usize,

    /// Number of core grid rows.
    #[serde(rename = "Y")]
    pub y: usize,

    pub sharding_strategy: ShardStrategy,
    pub shard_orientation: ShardOrientation,
    pub tensor_hw_as_shard_shape: bool,
    pub input_layout: Layout,
}

impl ShardedInputSpec {
    /// Converts this serialized spec into the arguments of [`ShardSpec::resolve`].
    pub fn parse(&self) -> ParsedShardingSpec {
        ParsedShardingSpec {
            input_shape: self.input_shape.clone(),
            core_grid: CoreGrid::new(self.y, self.x),
            strategy: self.sharding_strategy,
            orientation: self.shard_orientation,
            tensor_hw_as_shard_shape: self.tensor_hw_as_shard_shape,
            layout: self.input_layout,
        }
    }
}

/// Shard-spec resolver inputs extracted from a [`ShardedInputSpec`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ParsedShardingSpec {
    pub input_shape: Vec<usize>,
    pub core_grid: CoreGrid,
    pub strategy: ShardStrategy,
    pub orientation: ShardOrientation,
    pub tensor_hw_as_shard_shape: bool,
    pub layout: Layout,
}

impl ParsedShardingSpec {
    /// Pads the input shape so that it can be stored in the input layout.
    pub fn sanitize(mut self) -> Self {
        if self.layout == Layout::RowMajor {
            self.input_shape = sanitize_row_major_shape(self.input_shape.as_slice());
        }
        self
    }

    pub fn resolve(&self) -> Result<ShardSpec, ShardSpecError> {
        ShardSpec::resolve(
            self.input_shape.clone(),
            self.core_grid,
            self.strategy,
            self.orientation,
            self.tensor_hw_as_shard_shape,
            self.layout,
        )
    }
}

/// One point of a sweep.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SweepVector {
    pub input_spec: ShardedInputSpec,
    pub input_a_dtype: DataType,
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// Sharding scenario that [`generate_sharded_specs`] builds shapes for.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
enum Scenario {
    Strategy(ShardStrategy),

    /// Height sharding where each core holds one `[height, width]` slab of the tensor, so that the tensor's own
    /// trailing dimensions are the shard shape.
    TensorHw,
}

const SCENARIOS: [Scenario; 4] = [
    Scenario::Strategy(ShardStrategy::Height),
    Scenario::Strategy(ShardStrategy::Width),
    Scenario::Strategy(ShardStrategy::Block),
    Scenario::TensorHw,
];

const ORIENTATIONS: [ShardOrientation; 2] = [ShardOrientation::ColMajor, ShardOrientation::RowMajor];

/// Parameters of [`generate_sharded_specs`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerationOptions {
    /// Largest grid that generated specs may use. Each spec samples its own grid within it.
    pub max_grid: CoreGrid,

    /// Upper bound on the number of elements in one shard.
    pub max_tensor_size_per_core: usize,

    pub layouts: Vec<Layout>,

    /// Tensor ranks to generate. Ranks below `2` are ignored.
    pub ranks: Vec<usize>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_grid: CoreGrid::new(8, 8),
            max_tensor_size_per_core: DEFAULT_MAX_TENSOR_SIZE_PER_CORE,
            layouts: vec![Layout::RowMajor, Layout::Tiled],
            ranks: vec![4, 3, 2],
        }
    }
}

/// Generates `num_shapes` input specs for every combination of sharding scenario, orientation, rank, and layout.
///
/// Shapes are built backwards from a per-core shard whose volume stays within the per-core budget, so every
/// generated spec divides evenly over its grid. Tiled shards are whole tiles.
pub fn generate_sharded_specs<R: Rng + ?Sized>(
    num_shapes: usize,
    options: &GenerationOptions,
    rng: &mut R,
) -> Vec<ShardedInputSpec> {
    let mut specs = Vec::new();
    for scenario in SCENARIOS {
        for orientation in ORIENTATIONS {
            for &rank in options.ranks.iter().filter(|&&rank| rank >= 2) {
                for &layout in &options.layouts {
                    for _ in 0..num_shapes {
                        specs.push(generate_spec(scenario, orientation, rank, layout, options, rng));
                    }
                }
            }
        }
    }
    tracing::debug!(count = specs.len(), num_shapes, "generated sharded input specs");
    specs
}

fn generate_spec<R: Rng + ?Sized>(
    scenario: Scenario,
    orientation: ShardOrientation,
    rank: usize,
    layout: Layout,
    options: &GenerationOptions,
    rng: &mut R,
) -> ShardedInputSpec {
    let [unit_height, unit_width] = match layout {
        Layout::Tiled => [TILE_HEIGHT, TILE_WIDTH],
        Layout::RowMajor => ROW_MAJOR_SHARD_UNIT,
    };
    let max_units = (options.max_tensor_size_per_core / (unit_height * unit_width)).max(1);
    let height_units = rng.gen_range(1..=max_units);
    let width_units = rng.gen_range(1..=max_units / height_units);
    let shard_height = height_units * unit_height;
    let shard_width = width_units * unit_width;

    let (y, x) = match (scenario, rank) {
        (Scenario::TensorHw, 2) => (1, 1),
        _ => (rng.gen_range(1..=options.max_grid.rows.max(1)), rng.gen_range(1..=options.max_grid.cols.max(1))),
    };
    let core_count = x * y;

    let (sharding_strategy, tensor_hw_as_shard_shape, input_shape) = match scenario {
        Scenario::TensorHw => {
            let mut input_shape = split_volume(core_count, rank - 2, rng);
            input_shape.extend([shard_height, shard_width]);
            (ShardStrategy::Height, true, input_shape)
        }
        Scenario::Strategy(strategy) => {
            let (height_partitions, width_partitions) = match (strategy, orientation) {
                (ShardStrategy::Height, _) => (core_count, 1),
                (ShardStrategy::Width, _) => (1, core_count),
                (ShardStrategy::Block, ShardOrientation::RowMajor) => (y, x),
                (ShardStrategy::Block, ShardOrientation::ColMajor) => (x, y),
            };
            let height_in_units = height_units * height_partitions;
            let mut input_shape = split_volume(height_in_units, rank - 1, rng);
            if let Some(last) = input_shape.last_mut() {
                *last *= unit_height;
            }
            input_shape.push(shard_width * width_partitions);
            (strategy, false, input_shape)
        }
    };

    ShardedInputSpec {
        input_shape,
        x,
        y,
        sharding_strategy,
        shard_orientation: orientation,
        tensor_hw_as_shard_shape,
        input_layout: layout,
    }
}

/// Splits `volume` into `parts` random factors whose product is `volume`.
fn split_volume<R: Rng + ?Sized>(volume: usize, parts: usize, rng: &mut R) -> Vec<usize> {
    let mut factors = Vec::with_capacity(parts);
    let mut remaining = volume;
    for _ in 1..parts {
        let divisors = divisors(remaining);
        let factor = divisors[rng.gen_range(0..divisors.len())];
        factors.push(factor);
        remaining /= factor;
    }
    if parts > 0 {
        factors.push(remaining);
    }
    factors
}

fn divisors(value: usize) -> Vec<usize> {
    let mut divisors = Vec::new();
    let mut candidate = 1;
    while candidate * candidate <= value {
        if value % candidate == 0 {
            divisors.push(candidate);
            if candidate != value / candidate {
                divisors.push(value / candidate);
            }
        }
        candidate += 1;
    }
    if divisors.is_empty() {
        divisors.push(1);
    }
    divisors
}

// ---------------------------------------------------------------------------
// Invalidation
// ---------------------------------------------------------------------------

/// Returns the reason why `vector` cannot be run, or [`None`] if it is valid.
pub fn invalidate_vector(vector: &SweepVector) -> Option<String> {
    let reason = invalidation_reason(vector);
    if let Some(reason) = &reason {
        tracing::debug!(
            input_spec = ?vector.input_spec,
            dtype = %vector.input_a_dtype,
            reason = %reason,
            "invalidated vector"
        );
    }
    reason
}

fn invalidation_reason(vector: &SweepVector) -> Option<String> {
    let layout = vector.input_spec.input_layout;
    if !vector.input_a_dtype.is_supported_on(layout) {
        return Some(format!("{} is only supported on tiled layout", vector.input_a_dtype));
    }

    let spec = match vector.input_spec.parse().sanitize().resolve() {
        Ok(spec) => spec,
        Err(error) => return Some(format!("invalid shard spec: {error}")),
    };
    if let Err(error) = spec.check_coverage() {
        return Some(format!("invalid shard spec: {error}"));
    }
    if layout == Layout::Tiled && !spec.is_tile_aligned() {
        return Some(format!("shard shape {:?} is not tile aligned", spec.logical_shard_shape()));
    }
    None
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn spec(
        input_shape: &[usize],
        y: usize,
        x: usize,
        strategy: ShardStrategy,
        tensor_hw_as_shard_shape: bool,
        layout: Layout,
    ) -> ShardedInputSpec {
        ShardedInputSpec {
            input_shape: input_shape.to_vec(),
            x,
            y,
            sharding_strategy: strategy,
            shard_orientation: ShardOrientation::RowMajor,
            tensor_hw_as_shard_shape,
            input_layout: layout,
        }
    }

    #[test]
    fn test_sharded_input_spec_serialization() {
        let json = indoc! {r#"
            {
              "input_shape": [2, 64, 128],
              "X": 4,
              "Y": 2,
              "sharding_strategy": "BLOCK",
              "shard_orientation": "COL_MAJOR",
              "tensor_hw_as_shard_shape": false,
              "input_layout": "TILE_LAYOUT"
            }"#};
        let spec: ShardedInputSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.input_shape, vec![2, 64, 128]);
        assert_eq!(spec.sharding_strategy, ShardStrategy::Block);
        assert_eq!(spec.shard_orientation, ShardOrientation::ColMajor);

        let parsed = spec.parse();
        assert_eq!(parsed.core_grid, CoreGrid::new(2, 4));
        assert_eq!(parsed.layout, Layout::Tiled);
        let serialized = serde_json::to_string(&spec).unwrap();
        assert!(serialized.contains(r#""X":4,"Y":2"#));
        assert_eq!(serde_json::from_str::<ShardedInputSpec>(&serialized).unwrap(), spec);
    }

    #[test]
    fn test_parsed_spec_sanitizes_row_major_shapes() {
        let parsed = spec(&[3, 7], 1, 1, ShardStrategy::Height, false, Layout::RowMajor).parse().sanitize();
        assert_eq!(parsed.input_shape, vec![3, 8]);
        let parsed = spec(&[3, 7], 1, 1, ShardStrategy::Height, false, Layout::Tiled).parse().sanitize();
        assert_eq!(parsed.input_shape, vec![3, 7]);
    }

    #[test]
    fn test_generate_sharded_specs_are_valid() {
        let mut rng = StdRng::seed_from_u64(0);
        let options = GenerationOptions::default();
        let specs = generate_sharded_specs(3, &options, &mut rng);
        assert_eq!(specs.len(), 4 * 2 * 3 * 2 * 3);

        for spec in &specs {
            assert!(spec.x >= 1 && spec.x <= 8 && spec.y >= 1 && spec.y <= 8);
            let resolved = spec.parse().sanitize().resolve().unwrap();
            let [shard_height, shard_width] = resolved.logical_shard_shape();
            assert!(shard_height * shard_width <= options.max_tensor_size_per_core, "{spec:?}");
            if spec.input_layout == Layout::Tiled {
                assert!(resolved.is_tile_aligned(), "{spec:?}");
            }
            if spec.tensor_hw_as_shard_shape {
                let rank = spec.input_shape.len();
                assert_eq!(resolved.shard_shape(), [spec.input_shape[rank - 2], spec.input_shape[rank - 1]]);
                let leading: usize = spec.input_shape[..rank - 2].iter().product();
                assert_eq!(leading, spec.x * spec.y);
            }
        }
    }

    #[test]
    fn test_generate_sharded_specs_covers_every_scenario() {
        let mut rng = StdRng::seed_from_u64(1);
        let options =
            GenerationOptions { layouts: vec![Layout::Tiled], ranks: vec![2], ..GenerationOptions::default() };
        let specs = generate_sharded_specs(1, &options, &mut rng);
        assert_eq!(specs.len(), 8);
        for strategy in [ShardStrategy::Height, ShardStrategy::Width, ShardStrategy::Block] {
            assert!(specs.iter().any(|spec| spec.sharding_strategy == strategy && !spec.tensor_hw_as_shard_shape));
        }
        let tensor_hw = specs.iter().filter(|spec| spec.tensor_hw_as_shard_shape).collect::<Vec<_>>();
        assert_eq!(tensor_hw.len(), 2);
        assert!(tensor_hw.iter().all(|spec| spec.x == 1 && spec.y == 1 && spec.input_shape.len() == 2));
    }

    #[test]
    fn test_generate_sharded_specs_is_reproducible() {
        let options = GenerationOptions::default();
        let first = generate_sharded_specs(2, &options, &mut StdRng::seed_from_u64(42));
        let second = generate_sharded_specs(2, &options, &mut StdRng::seed_from_u64(42));
        assert_eq!(first, second);
    }

    #[test]
    fn test_split_volume() {
        let mut rng = StdRng::seed_from_u64(5);
        for volume in [1, 7, 12, 64, 360] {
            for parts in 1..4 {
                let factors = split_volume(volume, parts, &mut rng);
                assert_eq!(factors.len(), parts);
                assert_eq!(factors.iter().product::<usize>(), volume);
            }
        }
        assert_eq!(split_volume(12, 0, &mut rng), Vec::<usize>::new());
    }

    #[test]
    fn test_invalidate_vector() {
        let vector = SweepVector {
            input_spec: spec(&[64, 32], 1, 2, ShardStrategy::Height, false, Layout::Tiled),
            input_a_dtype: DataType::BFloat16,
        };
        assert_eq!(invalidate_vector(&vector), None);

        let vector = SweepVector {
            input_spec: spec(&[64, 32], 1, 2, ShardStrategy::Height, false, Layout::RowMajor),
            input_a_dtype: DataType::BFloat8B,
        };
        assert_eq!(invalidate_vector(&vector), Some("bfloat8_b is only supported on tiled layout".to_string()));

        let vector = SweepVector {
            input_spec: spec(&[1, 32, 32], 3, 1, ShardStrategy::Height, false, Layout::Tiled),
            input_a_dtype: DataType::BFloat16,
        };
        assert_eq!(
            invalidate_vector(&vector),
            Some("invalid shard spec: pre-shard height 32 is not divisible into 3 partition(s)".to_string()),
        );

        let vector = SweepVector {
            input_spec: spec(&[96, 48], 3, 1, ShardStrategy::Height, false, Layout::Tiled),
            input_a_dtype: DataType::BFloat16,
        };
        assert_eq!(invalidate_vector(&vector), Some("shard shape [32, 48] is not tile aligned".to_string()));
    }

    #[test]
    fn test_invalidate_vector_with_uncovered_height_and_width_shards() {
        let vector = SweepVector {
            input_spec: spec(&[4, 64, 32], 1, 1, ShardStrategy::Height, true, Layout::Tiled),
            input_a_dtype: DataType::BFloat16,
        };
        assert!(vector.input_spec.parse().sanitize().resolve().is_ok());
        assert_eq!(
            invalidate_vector(&vector),
            Some(
                "invalid shard spec: shards of shape [64, 32] on (1, 1) partition(s) miss pre-shard shape [256, 32]"
                    .to_string()
            ),
        );

        // One core per leading slice covers the tensor.
        let vector = SweepVector {
            input_spec: spec(&[4, 64, 32], 2, 2, ShardStrategy::Height, true, Layout::Tiled),
            input_a_dtype: DataType::BFloat16,
        };
        assert_eq!(invalidate_vector(&vector), None);
    }
}
