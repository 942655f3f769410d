//! Fleet orchestration: one isolated install worker per device.
//!
//! The [`FleetRunner`] owns the validated engine policy, the image source
//! and the device connectors. [`FleetRunner::run`] spawns a
//! [`DeviceWorker`] per device on a `JoinSet`, bounded by
//! `fleet.max_concurrent_devices`, and gathers a [`FleetReport`].
//!
//! # Isolation
//!
//! - Workers share no mutable state; each owns its connector and clients.
//! - A failed or panicked worker affects only its own device result.
//! - On shutdown every unfinished worker is aborted and reported as cancelled.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use uuid::Uuid;

use osinstall_core::config::OsInstallConfig;
use osinstall_core::metrics as m;
use osinstall_engine::{
    ContentSource, DeviceConnector, DeviceWorker, DeviceWorkerContext, EnginePolicy,
};

use crate::report::{DeviceResult, DeviceStatus, FleetReport};

/// Runs the standard install plan on many devices in parallel.
pub struct FleetRunner<D: DeviceConnector, C: ContentSource + Clone> {
    /// Validated engine policy shared by all workers.
    policy: EnginePolicy,
    /// Image source; each worker gets its own clone.
    content: C,
    /// Maximum number of workers running at once.
    max_concurrent: usize,
    /// Devices to install, in submission order.
    devices: Vec<D>,
}

impl<D: DeviceConnector, C: ContentSource + Clone> FleetRunner<D, C> {
    /// Build a runner from a loaded configuration.
    ///
    /// The target version comes from `install.target_version`, or from the
    /// image build info file when no version is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the build info cannot be read or the derived
    /// engine policy is invalid.
    pub async fn from_config(config: &OsInstallConfig, content: C) -> Result<Self> {
        let policy = EnginePolicy::resolve(config)
            .await
            .map_err(|e| anyhow::anyhow!("engine policy resolution failed: {}", e))?;
        Self::new(policy, content, config.fleet.max_concurrent_devices)
    }

    /// Build a runner from an explicit policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the policy is invalid or `max_concurrent` is 0.
    pub fn new(policy: EnginePolicy, content: C, max_concurrent: usize) -> Result<Self> {
        policy
            .validate()
            .map_err(|e| anyhow::anyhow!("engine policy validation failed: {}", e))?;
        if max_concurrent == 0 {
            return Err(anyhow::anyhow!("max_concurrent must be greater than 0"));
        }
        Ok(Self {
            policy,
            content,
            max_concurrent,
            devices: Vec::new(),
        })
    }

    /// Add a device to the fleet.
    pub fn add_device(&mut self, device: D) {
        self.devices.push(device);
    }

    /// Add a device to the fleet (builder form).
    pub fn with_device(mut self, device: D) -> Self {
        self.add_device(device);
        self
    }

    /// Number of devices registered.
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Run every device to completion.
    pub async fn run(self) -> FleetReport {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Run every device until all finish or `shutdown` resolves.
    ///
    /// Workers still running when `shutdown` resolves are aborted and
    /// reported as [`DeviceStatus::Cancelled`].
    pub async fn run_until<F>(self, shutdown: F) -> FleetReport
    where
        F: Future<Output = ()>,
    {
        let run_id = Uuid::new_v4();
        let start = Instant::now();
        let Self {
            policy,
            content,
            max_concurrent,
            devices,
        } = self;

        tracing::info!(
            run_id = %run_id,
            devices = devices.len(),
            max_concurrent,
            target_version = %policy.target_version,
            "fleet run started"
        );

        let permits = Arc::new(Semaphore::new(max_concurrent));
        let mut workers = JoinSet::new();
        let mut names = HashMap::new();

        for device in devices {
            let device_id = device.device_id().to_owned();
            let ctx = DeviceWorkerContext::new(device_id.clone(), policy.clone());
            let content = content.clone();
            let permits = Arc::clone(&permits);

            let handle = workers.spawn(async move {
                // Semaphore는 닫지 않으므로 acquire는 실패하지 않음
                let _permit = permits.acquire_owned().await.ok();
                let _active = ActiveWorker::enter();
                let mut worker = DeviceWorker::new(device, content, ctx);
                worker.run_standard().await
            });
            names.insert(handle.id(), device_id);
        }

        let mut results = Vec::with_capacity(names.len());
        tokio::pin!(shutdown);
        let mut shutting_down = false;

        loop {
            tokio::select! {
                joined = workers.join_next_with_id() => {
                    let Some(joined) = joined else { break };
                    results.push(collect(joined, &names));
                }
                () = &mut shutdown, if !shutting_down => {
                    tracing::warn!(
                        remaining = workers.len(),
                        "shutdown requested, aborting unfinished device workers"
                    );
                    shutting_down = true;
                    workers.abort_all();
                }
            }
        }

        let elapsed = start.elapsed();
        let report = FleetReport::new(
            run_id.to_string(),
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            results,
        );
        tracing::info!(
            run_id = %run_id,
            elapsed_secs = elapsed.as_secs(),
            succeeded = report.devices.len() - report.unsuccessful().count(),
            unsuccessful = report.unsuccessful().count(),
            "fleet run finished"
        );
        report
    }
}

/// Keeps `FLEET_WORKERS_ACTIVE` raised while a worker runs.
///
/// Dropped on completion, abort or panic alike.
struct ActiveWorker;

impl ActiveWorker {
    fn enter() -> Self {
        metrics::gauge!(m::FLEET_WORKERS_ACTIVE).increment(1.0);
        Self
    }
}

impl Drop for ActiveWorker {
    fn drop(&mut self) {
        metrics::gauge!(m::FLEET_WORKERS_ACTIVE).decrement(1.0);
    }
}

fn collect(
    joined: Result<(tokio::task::Id, osinstall_engine::WorkerReport), JoinError>,
    names: &HashMap<tokio::task::Id, String>,
) -> DeviceResult {
    match joined {
        Ok((_, report)) => {
            if let Some(error) = &report.error {
                tracing::error!(device = %report.device_id, error = %error, "device install failed");
            } else {
                tracing::info!(device = %report.device_id, "device install succeeded");
            }
            DeviceResult::from_report(report)
        }
        Err(e) => {
            let device_id = names
                .get(&e.id())
                .cloned()
                .unwrap_or_else(|| format!("task-{}", e.id()));
            if e.is_cancelled() {
                tracing::warn!(device = %device_id, "device worker cancelled");
                DeviceResult::without_report(device_id, DeviceStatus::Cancelled)
            } else {
                let reason = panic_message(e);
                tracing::error!(device = %device_id, reason = %reason, "device worker panicked");
                DeviceResult::without_report(device_id, DeviceStatus::Panicked(reason))
            }
        }
    }
}

fn panic_message(e: JoinError) -> String {
    match e.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_owned()),
        Err(e) => e.to_string(),
    }
}
