use std::path::Path;

use serde::{Deserialize, Serialize};
use shardcheck_core::comparison::Tolerance;
use shardcheck_core::layouts::{Layout, TILE_HEIGHT, TILE_WIDTH};
use shardcheck_core::sharding::CoreGrid;
use shardcheck_core::types::DataType;

use crate::device::DEFAULT_L1_BYTES_PER_CORE;
use crate::errors::{Result, SweepError};
use crate::logging::is_valid_level;
use crate::ops::UnaryOp;
use crate::runner::CheckMode;
use crate::vectors::{DEFAULT_MAX_TENSOR_SIZE_PER_CORE, GenerationOptions, ROW_MAJOR_SHARD_UNIT};

/// Configuration of a sweep suite run.
///
/// Every section and field is optional in TOML; missing values fall back to the nightly suite defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub suite: SuiteConfig,
    pub grid: CoreGrid,
    pub tolerance: Tolerance,
    pub device: DeviceConfig,
    pub logging: LoggingConfig,
}

/// Which vectors a suite generates and how they are checked.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteConfig {
    pub name: String,
    pub op: UnaryOp,
    pub seed: u64,
    pub num_shapes: usize,
    pub layouts: Vec<Layout>,
    pub dtypes: Vec<DataType>,
    pub ranks: Vec<usize>,
    pub max_tensor_size_per_core: usize,
    pub check: CheckMode,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            name: "nightly".to_string(),
            op: UnaryOp::IsInf,
            seed: 0,
            num_shapes: 16,
            layouts: vec![Layout::Tiled],
            dtypes: vec![DataType::BFloat16, DataType::BFloat8B],
            ranks: vec![4, 3, 2],
            max_tensor_size_per_core: DEFAULT_MAX_TENSOR_SIZE_PER_CORE,
            check: CheckMode::Pcc,
        }
    }
}

/// Parameters of the reference host device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub l1_bytes_per_core: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self { l1_bytes_per_core: DEFAULT_L1_BYTES_PER_CORE }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            suite: SuiteConfig::default(),
            grid: CoreGrid::new(8, 8),
            tolerance: Tolerance::default(),
            device: DeviceConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SweepConfig {
    /// Loads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "loading sweep configuration");
        let content = std::fs::read_to_string(path).map_err(|error| {
            tracing::error!(path = %path.display(), error = %error, "failed to read sweep configuration");
            error
        })?;
        Self::from_toml_str(content.as_str())
    }

    /// Parses and validates a configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: SweepConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let suite = &self.suite;
        if suite.num_shapes == 0 {
            return Err(SweepError::Config("suite.num_shapes must be at least 1".into()));
        }
        if suite.layouts.is_empty() {
            return Err(SweepError::Config("suite.layouts must not be empty".into()));
        }
        if suite.dtypes.is_empty() {
            return Err(SweepError::Config("suite.dtypes must not be empty".into()));
        }
        if suite.ranks.is_empty() || suite.ranks.iter().any(|&rank| !(2..=8).contains(&rank)) {
            return Err(SweepError::Config("suite.ranks must be a non-empty list of ranks between 2 and 8".into()));
        }
        if suite.max_tensor_size_per_core == 0 {
            return Err(SweepError::Config("suite.max_tensor_size_per_core must be at least 1".into()));
        }
        if suite.layouts.contains(&Layout::Tiled) && suite.max_tensor_size_per_core < TILE_HEIGHT * TILE_WIDTH {
            return Err(SweepError::Config(format!(
                "suite.max_tensor_size_per_core must hold at least one {TILE_HEIGHT}x{TILE_WIDTH} tile",
            )));
        }
        let [unit_height, unit_width] = ROW_MAJOR_SHARD_UNIT;
        if suite.layouts.contains(&Layout::RowMajor) && suite.max_tensor_size_per_core < unit_height * unit_width {
            return Err(SweepError::Config(format!(
                "suite.max_tensor_size_per_core must hold at least one {unit_height}x{unit_width} row-major shard",
            )));
        }

        if self.grid.is_empty() {
            return Err(SweepError::Config(format!("grid {} must have at least one row and one column", self.grid)));
        }

        let tolerance = &self.tolerance;
        if !(-1.0..=1.0).contains(&tolerance.pcc) {
            return Err(SweepError::Config("tolerance.pcc must be between -1 and 1".into()));
        }
        let is_valid_bound = |bound: f64| bound.is_finite() && bound >= 0.0;
        if !is_valid_bound(tolerance.rtol) || !is_valid_bound(tolerance.atol) {
            return Err(SweepError::Config("tolerance.rtol and tolerance.atol must be finite and non-negative".into()));
        }

        if self.device.l1_bytes_per_core == 0 {
            return Err(SweepError::Config("device.l1_bytes_per_core must be at least 1".into()));
        }

        if !is_valid_level(self.logging.level.as_str()) {
            return Err(SweepError::Config("logging.level must be one of: trace, debug, info, warn, error".into()));
        }
        Ok(())
    }

    /// Options for [`generate_sharded_specs`](crate::vectors::generate_sharded_specs) derived from this configuration.
    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            max_grid: self.grid,
            max_tensor_size_per_core: self.suite.max_tensor_size_per_core,
            layouts: self.suite.layouts.clone(),
            ranks: self.suite.ranks.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_default_config_matches_nightly_suite() {
        let config = SweepConfig::default();
        assert_eq!(config.suite.name, "nightly");
        assert_eq!(config.suite.num_shapes, 16);
        assert_eq!(config.suite.max_tensor_size_per_core, 62 * 1024);
        assert_eq!(config.suite.dtypes, vec![DataType::BFloat16, DataType::BFloat8B]);
        assert_eq!(config.grid, CoreGrid::new(8, 8));
        assert_eq!(config.tolerance, Tolerance::new(0.999, 0.01, 0.01));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml() {
        let config = SweepConfig::from_toml_str(indoc! {r#"
            [suite]
            name = "smoke"
            op = "abs"
            num_shapes = 2
            layouts = ["ROW_MAJOR_LAYOUT", "TILE_LAYOUT"]
            dtypes = ["FLOAT32"]
            check = "allclose_and_pcc"

            [grid]
            rows = 2
            cols = 4

            [tolerance]
            pcc = 0.99
        "#})
        .unwrap();
        assert_eq!(config.suite.name, "smoke");
        assert_eq!(config.suite.op, UnaryOp::Abs);
        assert_eq!(config.suite.layouts, vec![Layout::RowMajor, Layout::Tiled]);
        assert_eq!(config.suite.dtypes, vec![DataType::Float32]);
        assert_eq!(config.suite.ranks, vec![4, 3, 2]);
        assert_eq!(config.suite.check, CheckMode::AllcloseAndPcc);
        assert_eq!(config.grid, CoreGrid::new(2, 4));
        assert_eq!(config.tolerance, Tolerance::new(0.99, 0.01, 0.01));
        assert_eq!(config.logging.level, "info");

        let options = config.generation_options();
        assert_eq!(options.max_grid, CoreGrid::new(2, 4));
        assert_eq!(options.layouts, config.suite.layouts);
    }

    #[test]
    fn test_config_validation() {
        let invalid = [
            "[suite]\nnum_shapes = 0",
            "[suite]\nlayouts = []",
            "[suite]\nranks = [1]",
            "[suite]\nmax_tensor_size_per_core = 512",
            "[suite]\nlayouts = [\"ROW_MAJOR_LAYOUT\"]\nmax_tensor_size_per_core = 8",
            "[grid]\nrows = 0\ncols = 8",
            "[tolerance]\npcc = 1.5",
            "[tolerance]\natol = -0.1",
            "[device]\nl1_bytes_per_core = 0",
            "[logging]\nlevel = \"verbose\"",
        ];
        for content in invalid {
            assert!(matches!(SweepConfig::from_toml_str(content), Err(SweepError::Config(_))), "{content}");
        }
        assert!(matches!(SweepConfig::from_toml_str("[suite]\nop = \"unknown\""), Err(SweepError::Toml(_))));

        let config = SweepConfig::from_toml_str(indoc! {r#"
            [suite]
            layouts = ["ROW_MAJOR_LAYOUT"]
            max_tensor_size_per_core = 16
        "#})
        .unwrap();
        assert_eq!(config.generation_options().max_tensor_size_per_core, 16);
    }
}
