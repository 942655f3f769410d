//! osinstall fleet runner library.
//!
//! Drives the install engine across many devices: tracing setup,
//! optional Prometheus endpoint, one isolated worker per device and an
//! aggregated run report. Device transports are supplied by the caller
//! through [`osinstall_engine::DeviceConnector`].
//!
//! # Usage
//!
//! ```ignore
//! let config = OsInstallConfig::load("osinstall.toml").await?;
//! init_tracing(&config.general)?;
//! let mut runner =
//!     FleetRunner::from_config(&config, FileContent::new(&config.install.image_path)).await?;
//! for device in connectors {
//!     runner.add_device(device);
//! }
//! let report = runner.run_until(shutdown_signal()).await;
//! println!("{}", report.to_json()?);
//! ```

pub mod logging;
pub mod metrics_server;
pub mod orchestrator;
pub mod report;

pub use logging::{LogFormat, init_tracing};
pub use metrics_server::install_metrics_recorder;
pub use orchestrator::FleetRunner;
pub use report::{DeviceResult, DeviceStatus, FleetReport, FleetStatus, aggregate_status};
