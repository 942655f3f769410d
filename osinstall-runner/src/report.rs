//! Fleet run reporting.
//!
//! Collects one [`DeviceResult`] per device and derives the overall
//! [`FleetStatus`] as the worst status among all devices.
//!
//! # Aggregation Rule
//!
//! - All Succeeded -> Succeeded
//! - Any Cancelled, none Failed/Panicked -> Incomplete(reason)
//! - Any Failed or Panicked -> Failed(reason)

use serde::Serialize;

use osinstall_engine::WorkerReport;

/// Final state of one device in a fleet run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum DeviceStatus {
    /// Every planned step completed or was skipped.
    Succeeded,
    /// A step failed; later steps did not run.
    Failed(String),
    /// The worker task panicked.
    Panicked(String),
    /// The run was shut down before this device finished.
    Cancelled,
}

impl DeviceStatus {
    fn rank(&self) -> u8 {
        match self {
            Self::Succeeded => 0,
            Self::Cancelled => 1,
            Self::Failed(_) | Self::Panicked(_) => 2,
        }
    }
}

/// Outcome for a single device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceResult {
    /// Device identifier.
    pub device_id: String,
    /// Final state.
    pub status: DeviceStatus,
    /// Worker report, absent when the worker never returned one.
    pub report: Option<WorkerReport>,
}

impl DeviceResult {
    /// Result derived from a finished worker.
    pub fn from_report(report: WorkerReport) -> Self {
        let status = match &report.error {
            None => DeviceStatus::Succeeded,
            Some(error) => DeviceStatus::Failed(error.clone()),
        };
        Self {
            device_id: report.device_id.clone(),
            status,
            report: Some(report),
        }
    }

    /// Result for a worker that produced no report.
    pub fn without_report(device_id: impl Into<String>, status: DeviceStatus) -> Self {
        Self {
            device_id: device_id.into(),
            status,
            report: None,
        }
    }
}

/// Overall fleet status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum FleetStatus {
    /// All devices succeeded.
    Succeeded,
    /// Some devices were cancelled; none failed.
    Incomplete(String),
    /// At least one device failed or panicked.
    Failed(String),
}

impl FleetStatus {
    /// Returns `true` only for [`FleetStatus::Succeeded`].
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Report for a complete fleet run.
#[derive(Debug, Clone, Serialize)]
pub struct FleetReport {
    /// Fleet run identifier.
    pub run_id: String,
    /// Worst status among all devices.
    pub status: FleetStatus,
    /// Wall-clock duration of the run in milliseconds.
    pub elapsed_ms: u64,
    /// Per-device results, ordered by device id.
    pub devices: Vec<DeviceResult>,
}

impl FleetReport {
    /// Build a report from unordered device results.
    pub fn new(run_id: impl Into<String>, elapsed_ms: u64, mut devices: Vec<DeviceResult>) -> Self {
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        Self {
            run_id: run_id.into(),
            status: aggregate_status(&devices),
            elapsed_ms,
            devices,
        }
    }

    /// Whether every device succeeded.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Device results that did not succeed.
    pub fn unsuccessful(&self) -> impl Iterator<Item = &DeviceResult> {
        self.devices
            .iter()
            .filter(|d| d.status != DeviceStatus::Succeeded)
    }

    /// Serialize the report as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Aggregate device statuses into a single fleet status.
///
/// Returns the worst status found: Failed > Incomplete > Succeeded.
pub fn aggregate_status(devices: &[DeviceResult]) -> FleetStatus {
    let worst = devices.iter().map(|d| d.status.rank()).max().unwrap_or(0);

    let reasons: Vec<String> = devices
        .iter()
        .filter(|d| d.status.rank() == worst)
        .filter_map(|d| match &d.status {
            DeviceStatus::Succeeded => None,
            DeviceStatus::Failed(reason) => Some(format!("{}: {}", d.device_id, reason)),
            DeviceStatus::Panicked(reason) => {
                Some(format!("{}: worker panicked: {}", d.device_id, reason))
            }
            DeviceStatus::Cancelled => Some(format!("{}: cancelled", d.device_id)),
        })
        .collect();

    match worst {
        0 => FleetStatus::Succeeded,
        1 => FleetStatus::Incomplete(reasons.join("; ")),
        _ => FleetStatus::Failed(reasons.join("; ")),
    }
}
