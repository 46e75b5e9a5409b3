//! Sweep harness for sharded unary operations.
//!
//! A sweep generates many [`SweepVector`](vectors::SweepVector)s (tensor shapes, core grids, sharding strategies,
//! layouts, and data types), discards the invalid ones, and runs the rest on a [`Device`](device::Device), comparing
//! every device output against a host-computed reference. Results are collected into a
//! [`SuiteReport`](runner::SuiteReport) that can be exported as JSON.

pub mod config;
pub mod device;
pub mod errors;
pub mod logging;
pub mod ops;
pub mod runner;
pub mod vectors;
