use std::io::Write;

use indoc::indoc;
use pretty_assertions::assert_eq;
use shardcheck_core::layouts::Layout;
use shardcheck_core::sharding::{CoreGrid, MemoryConfig};
use shardcheck_core::tensors::HostTensor;
use shardcheck_core::types::DataType;
use shardcheck_sweeps::config::SweepConfig;
use shardcheck_sweeps::device::{Device, DeviceError, HostDevice};
use shardcheck_sweeps::errors::SweepError;
use shardcheck_sweeps::ops::UnaryOp;
use shardcheck_sweeps::runner::{CheckMode, SuiteReport, VectorStatus, run_suite};

/// Small configuration that exercises every sharding scenario, orientation, and rank.
fn small_config() -> SweepConfig {
    let mut config = SweepConfig::default();
    config.suite.num_shapes = 1;
    config.suite.max_tensor_size_per_core = 4096;
    config.grid = CoreGrid::new(2, 2);
    config
}

/// Device that computes the complement of every predicate output.
struct InvertingDevice;

impl Device for InvertingDevice {
    type Tensor = HostTensor;

    fn name(&self) -> &str {
        "inverting"
    }

    fn from_host(
        &self,
        tensor: &HostTensor,
        _data_type: DataType,
        _layout: Layout,
        _memory_config: &MemoryConfig,
    ) -> Result<HostTensor, DeviceError> {
        Ok(tensor.clone())
    }

    fn unary(
        &self,
        op: UnaryOp,
        input: &HostTensor,
        _memory_config: &MemoryConfig,
    ) -> Result<HostTensor, DeviceError> {
        Ok(op.golden(input).map(|value| 1.0 - value))
    }

    fn to_host(&self, tensor: &HostTensor) -> Result<HostTensor, DeviceError> {
        Ok(tensor.clone())
    }
}

/// Device whose operations never complete.
struct HangingDevice;

impl Device for HangingDevice {
    type Tensor = ();

    fn name(&self) -> &str {
        "hanging"
    }

    fn from_host(
        &self,
        _tensor: &HostTensor,
        _data_type: DataType,
        _layout: Layout,
        _memory_config: &MemoryConfig,
    ) -> Result<(), DeviceError> {
        Ok(())
    }

    fn unary(&self, _op: UnaryOp, _input: &(), _memory_config: &MemoryConfig) -> Result<(), DeviceError> {
        Err(DeviceError::Runtime("timed out waiting for the operation to complete".to_string()))
    }

    fn to_host(&self, _tensor: &()) -> Result<HostTensor, DeviceError> {
        Err(DeviceError::Runtime("no tensor to read".to_string()))
    }
}

#[test]
fn test_isinf_suite_passes_on_host_device() {
    let config = small_config();
    let report = run_suite(&config, &HostDevice::new()).unwrap();

    // 4 scenarios x 2 orientations x 3 ranks x 1 layout x 1 shape x 2 data types.
    assert_eq!(report.results.len(), 48);
    assert_eq!(report.count(VectorStatus::Passed), 48);
    assert!(report.is_success());
    assert_eq!(report.device, "host");
    assert_eq!(report.op, UnaryOp::IsInf);
    assert!(report.results.iter().all(|result| result.e2e_perf_ns.is_some()));
    assert!(report.results.iter().enumerate().all(|(index, result)| result.index == index));
}

#[test]
fn test_elementwise_suite_with_allclose_check() {
    let mut config = small_config();
    config.suite.op = UnaryOp::Relu;
    config.suite.dtypes = vec![DataType::Float32];
    config.suite.layouts = vec![Layout::Tiled, Layout::RowMajor];
    config.suite.check = CheckMode::AllcloseAndPcc;
    let report = run_suite(&config, &HostDevice::new()).unwrap();
    assert_eq!(report.results.len(), 48);
    assert!(report.is_success(), "{report:#?}");
    assert!(report.results.iter().all(|result| result.message.starts_with("Max ATOL Delta: 0,")));
}

#[test]
fn test_suite_skips_invalid_vectors() {
    let mut config = small_config();
    config.suite.layouts = vec![Layout::RowMajor];
    config.suite.dtypes = vec![DataType::BFloat8B];
    let report = run_suite(&config, &HostDevice::new()).unwrap();
    assert_eq!(report.count(VectorStatus::Skipped), report.results.len());
    assert!(report.is_success());
    for result in &report.results {
        assert_eq!(result.message, "bfloat8_b is only supported on tiled layout");
        assert_eq!(result.e2e_perf_ns, None);
    }
}

#[test]
fn test_suite_records_failures_and_errors() {
    let config = small_config();

    let report = run_suite(&config, &InvertingDevice).unwrap();
    assert_eq!(report.count(VectorStatus::Failed), report.results.len());
    assert!(!report.is_success());

    let report = run_suite(&config, &HangingDevice).unwrap();
    assert_eq!(report.count(VectorStatus::Errored), report.results.len());
    assert_eq!(report.results[0].message, "device error: timed out waiting for the operation to complete");
}

#[test]
fn test_suite_uses_configured_device_capacity() {
    let config = SweepConfig::from_toml_str(indoc! {r#"
        [suite]
        num_shapes = 1
        max_tensor_size_per_core = 4096
        dtypes = ["FLOAT32"]

        [grid]
        rows = 2
        cols = 2

        [device]
        l1_bytes_per_core = 1024
    "#})
    .unwrap();
    let device = HostDevice::from_config(&config.device);
    assert_eq!(device.l1_bytes_per_core(), 1024);

    let report = run_suite(&config, &device).unwrap();
    assert_eq!(report.results.len(), 24);
    assert_eq!(report.count(VectorStatus::Errored), report.results.len());
    for result in &report.results {
        assert!(result.message.starts_with("device error: shard requires"), "{}", result.message);
        assert!(result.message.ends_with("only 1024 bytes are available per core"), "{}", result.message);
    }

    let report = run_suite(&config, &HostDevice::from_config(&Default::default())).unwrap();
    assert_eq!(report.count(VectorStatus::Passed), 24);
}

#[test]
fn test_suite_rejects_invalid_configuration() {
    let mut config = small_config();
    config.suite.dtypes.clear();
    assert!(matches!(run_suite(&config, &HostDevice::new()), Err(SweepError::Config(_))));
}

#[test]
fn test_suite_report_json_export() {
    let mut config = small_config();
    config.suite.ranks = vec![2];
    let report = run_suite(&config, &HostDevice::new()).unwrap();

    let directory = tempfile::tempdir().unwrap();
    let path = directory.path().join("report.json");
    report.write_json(&path).unwrap();
    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.contains(r#""status": "passed""#));
    assert!(contents.contains(r#""sharding_strategy": "HEIGHT""#));
    assert!(contents.contains(r#""input_a_dtype": "BFLOAT8_B""#));
    assert_eq!(serde_json::from_str::<SuiteReport>(&contents).unwrap(), report);
}

#[test]
fn test_config_file_loading() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(
        indoc! {r#"
            [suite]
            name = "isnan-smoke"
            op = "isnan"
            seed = 7
            num_shapes = 1
            max_tensor_size_per_core = 2048

            [grid]
            rows = 1
            cols = 2

            [logging]
            level = "debug"
        "#}
        .as_bytes(),
    )
    .unwrap();

    let config = SweepConfig::load(file.path()).unwrap();
    assert_eq!(config.suite.name, "isnan-smoke");
    assert_eq!(config.suite.op, UnaryOp::IsNan);
    assert_eq!(config.suite.seed, 7);
    assert_eq!(config.grid, CoreGrid::new(1, 2));
    assert_eq!(config.logging.level, "debug");

    let report = run_suite(&config, &HostDevice::new()).unwrap();
    assert_eq!(report.suite, "isnan-smoke");
    assert!(report.is_success());

    let missing = file.path().with_extension("missing");
    assert!(matches!(SweepConfig::load(&missing), Err(SweepError::Io(_))));
}
