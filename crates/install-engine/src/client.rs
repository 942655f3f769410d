//! Device RPC abstraction for testability.
//!
//! The engine never talks to a transport directly. Every RPC goes through
//! one of the traits below, supplied by an external binding layer:
//!
//! ```text
//!            ┌─────────────────┐
//!            │ DeviceConnector │ (fresh clients per acquisition)
//!            └────────┬────────┘
//!        ┌────────────┼─────────────┐
//!        ▼            ▼             ▼
//!   ┌─────────┐ ┌────────────┐ ┌─────────────┐
//!   │OsClient │ │SystemClient│ │ StateClient │
//!   └────┬────┘ └────────────┘ └─────────────┘
//!        │ install()
//!        ▼
//!   InstallSink (driver writes) + InstallSource (watcher reads)
//! ```
//!
//! # Client lifetime across reboots
//!
//! A client acquired before a reboot or switchover is bound to a connection
//! that no longer exists. [`DeviceClients::reacquire`] drops the cached
//! clients and builds new ones through the connector, polling until each
//! answers.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info};

use osinstall_core::types::{
    ActivateRequest, ActivationOutcome, ControlProcessor, InstallRequest, RebootRequest,
    RpcStatus, StatusEvent, SwitchoverReason, SwitchoverResponse, VerifyResult,
};

use crate::error::EngineError;
use crate::poller::{RetryPolicy, wait_ready};

/// Write half of an Install stream.
///
/// Owned exclusively by the session driver.
pub trait InstallSink: Send + 'static {
    /// Sends one request on the stream.
    fn send(
        &mut self,
        request: InstallRequest,
    ) -> impl Future<Output = Result<(), RpcStatus>> + Send;

    /// Half-closes the stream from the client side.
    fn close_send(&mut self) -> impl Future<Output = Result<(), RpcStatus>> + Send;
}

/// Read half of an Install stream.
///
/// Read by the session driver for the first response, then handed to the
/// status watcher which becomes its only reader.
pub trait InstallSource: Send + 'static {
    /// Receives the next status event.
    ///
    /// `Ok(None)` means the server closed the stream.
    fn recv(&mut self) -> impl Future<Output = Result<Option<StatusEvent>, RpcStatus>> + Send;
}

/// OS service client (Install, Activate, Verify).
pub trait OsClient: Send + Sync + 'static {
    /// Write half type of the Install stream.
    type Sink: InstallSink;
    /// Read half type of the Install stream.
    type Source: InstallSource;

    /// Opens a bidirectional Install stream.
    ///
    /// # Errors
    ///
    /// Returns the RPC status if the stream cannot be established.
    fn install(
        &self,
    ) -> impl Future<Output = Result<(Self::Sink, Self::Source), RpcStatus>> + Send;

    /// Activates a previously transferred image.
    fn activate(
        &self,
        request: ActivateRequest,
    ) -> impl Future<Output = Result<ActivationOutcome, RpcStatus>> + Send;

    /// Reads the running version and activation state.
    fn verify(&self) -> impl Future<Output = Result<VerifyResult, RpcStatus>> + Send;
}

/// System service client (Reboot, SwitchControlProcessor, Time).
pub trait SystemClient: Send + Sync + 'static {
    /// Requests a reboot. Devices commonly drop the connection before
    /// answering, which surfaces as `Unavailable`.
    fn reboot(
        &self,
        request: RebootRequest,
    ) -> impl Future<Output = Result<(), RpcStatus>> + Send;

    /// Makes `target` the active control processor.
    fn switch_control_processor(
        &self,
        target: &str,
    ) -> impl Future<Output = Result<SwitchoverResponse, RpcStatus>> + Send;

    /// Reads the device clock (nanoseconds since epoch). Used as a liveness probe.
    fn time(&self) -> impl Future<Output = Result<u64, RpcStatus>> + Send;
}

/// Management-plane state reads.
pub trait StateClient: Send + Sync + 'static {
    /// `system/state/software-version`, `None` if not reported yet.
    fn software_version(
        &self,
    ) -> impl Future<Output = Result<Option<String>, RpcStatus>> + Send;

    /// All controller-card components with their redundant role.
    fn control_processors(
        &self,
    ) -> impl Future<Output = Result<Vec<ControlProcessor>, RpcStatus>> + Send;

    /// Whether `component` reports switchover-ready.
    fn switchover_ready(
        &self,
        component: &str,
    ) -> impl Future<Output = Result<bool, RpcStatus>> + Send;

    /// Names of interfaces whose oper-status is UP.
    fn oper_up_interfaces(&self) -> impl Future<Output = Result<Vec<String>, RpcStatus>> + Send;

    /// Last switchover time of `component`, `None` if not present.
    fn last_switchover_time(
        &self,
        component: &str,
    ) -> impl Future<Output = Result<Option<u64>, RpcStatus>> + Send;

    /// Last switchover reason of `component`, `None` if not present.
    fn last_switchover_reason(
        &self,
        component: &str,
    ) -> impl Future<Output = Result<Option<SwitchoverReason>, RpcStatus>> + Send;

    /// Modification time (unix seconds) of the stored image for `version`,
    /// `None` if the file does not exist.
    fn image_modified_time(
        &self,
        version: &str,
    ) -> impl Future<Output = Result<Option<i64>, RpcStatus>> + Send;
}

/// Builds device-scoped clients.
///
/// Each call must return a client on a fresh connection; the engine relies on
/// this after reboots.
pub trait DeviceConnector: Send + Sync + 'static {
    /// OS service client type.
    type Os: OsClient;
    /// System service client type.
    type System: SystemClient;
    /// Management-plane client type.
    type State: StateClient;

    /// Device identifier used in logs and reports.
    fn device_id(&self) -> &str;

    /// Connects an OS service client.
    fn connect_os(&self) -> impl Future<Output = Result<Self::Os, RpcStatus>> + Send;

    /// Connects a System service client.
    fn connect_system(&self) -> impl Future<Output = Result<Self::System, RpcStatus>> + Send;

    /// Connects a management-plane client.
    fn connect_state(&self) -> impl Future<Output = Result<Self::State, RpcStatus>> + Send;
}

/// Cached clients for one device.
pub struct DeviceClients<D: DeviceConnector> {
    /// OS service client
    pub os: Arc<D::Os>,
    /// System service client
    pub system: Arc<D::System>,
    /// Management-plane client
    pub state: Arc<D::State>,
}

impl<D: DeviceConnector> Clone for DeviceClients<D> {
    fn clone(&self) -> Self {
        Self {
            os: Arc::clone(&self.os),
            system: Arc::clone(&self.system),
            state: Arc::clone(&self.state),
        }
    }
}

impl<D: DeviceConnector> DeviceClients<D> {
    /// Connects all clients once, without retrying.
    pub async fn connect(connector: &D) -> Result<Self, EngineError> {
        let os = connector.connect_os().await?;
        let system = connector.connect_system().await?;
        let state = connector.connect_state().await?;
        debug!(device = connector.device_id(), "device clients connected");
        Ok(Self {
            os: Arc::new(os),
            system: Arc::new(system),
            state: Arc::new(state),
        })
    }

    /// Discards the cached clients and acquires new ones after a reboot.
    ///
    /// The System client is ready once `time()` answers and the OS client
    /// once `verify()` answers; both are polled under `policy`.
    pub async fn reacquire(self, connector: &D, policy: &RetryPolicy) -> Result<Self, EngineError> {
        drop(self);
        let device = connector.device_id();

        let system = wait_ready("system client ready", policy, move || async move {
            let client = connector.connect_system().await?;
            client.time().await?;
            Ok::<_, RpcStatus>(client)
        })
        .await?;
        info!(device, "system client re-established");

        let os = wait_ready("os client ready", policy, move || async move {
            let client = connector.connect_os().await?;
            client.verify().await?;
            Ok::<_, RpcStatus>(client)
        })
        .await?;
        info!(device, "os client re-established");

        let state =
            wait_ready("state client ready", policy, move || connector.connect_state()).await?;

        Ok(Self {
            os: Arc::new(os),
            system: Arc::new(system),
            state: Arc::new(state),
        })
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use osinstall_core::types::StatusCode;

    use super::mock::MockDevice;
    use super::*;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(30), Duration::from_secs(300))
    }

    #[tokio::test]
    async fn connect_builds_all_three_clients() {
        let device = MockDevice::new();
        let clients = DeviceClients::connect(&device).await.unwrap();
        assert_eq!(device.script().connects, 3);
        assert!(clients.system.time().await.is_ok());
    }

    #[tokio::test]
    async fn connect_propagates_transport_failure() {
        let device = MockDevice::new();
        device
            .script()
            .connect_errors
            .push_back(RpcStatus::new(StatusCode::Unauthenticated, "bad creds"));
        let result = DeviceClients::connect(&device).await;
        assert!(matches!(result, Err(EngineError::Transport(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn reacquire_retries_until_device_answers() {
        let device = MockDevice::new();
        let clients = DeviceClients::connect(&device).await.unwrap();
        {
            let mut script = device.script();
            script.connect_errors.push_back(RpcStatus::unavailable("booting"));
            script.connect_errors.push_back(RpcStatus::unavailable("booting"));
            script.time_results.push_back(Err(RpcStatus::unavailable("booting")));
        }

        let before = device.script().connects;
        let clients = clients.reacquire(&device, &fast_policy()).await.unwrap();
        // 실패 2회 + time 실패 1회 후 성공, 이어서 os/state 연결
        assert!(device.script().connects >= before + 5);
        assert!(clients.os.verify().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn reacquire_times_out_when_device_never_returns() {
        let device = MockDevice::new();
        let clients = DeviceClients::connect(&device).await.unwrap();
        {
            let mut script = device.script();
            for _ in 0..100 {
                script.connect_errors.push_back(RpcStatus::unavailable("down"));
            }
        }
        let result = clients.reacquire(&device, &fast_policy()).await;
        assert!(matches!(result, Err(EngineError::Timeout { .. })));
    }
}
