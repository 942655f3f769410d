//! 슈퍼바이저 스위치오버 컨트롤러
//!
//! 이중화된 컨트롤 프로세서 사이에서 액티브 역할을 넘기고
//! 역할이 정확히 맞바뀌었는지 확인합니다.
//!
//! # 단계
//!
//! ```text
//! Idle -> PreconditionCheck -> SwitchRequested -> AwaitingNewActive
//!      -> PostconditionCheck -> Done
//! (any) -> Failed
//! ```
//!
//! 사전 조건 단계의 실패는 변경 요청 전에 중단되므로 다시 시도해도 안전합니다.
//! 요청 이후의 실패는 해당 시도 전체를 실패로 처리합니다.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info};

use osinstall_core::metrics as m;
use osinstall_core::types::{
    ControlProcessor, RedundantRole, RpcStatus, SwitchoverRecord, SwitchoverResponse,
};

use crate::client::{DeviceClients, DeviceConnector, StateClient, SystemClient};
use crate::error::EngineError;
use crate::poller::{Attempt, RetryPolicy, retry_until, wait_ready};

/// 스위치오버 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchoverPhase {
    /// 시작 전
    Idle,
    /// 사전 조건 확인
    PreconditionCheck,
    /// 스위치오버 요청
    SwitchRequested,
    /// 새 액티브 부팅 대기
    AwaitingNewActive,
    /// 사후 조건 확인
    PostconditionCheck,
    /// 완료
    Done,
    /// 실패
    Failed,
}

impl fmt::Display for SwitchoverPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::PreconditionCheck => write!(f, "precondition_check"),
            Self::SwitchRequested => write!(f, "switch_requested"),
            Self::AwaitingNewActive => write!(f, "awaiting_new_active"),
            Self::PostconditionCheck => write!(f, "postcondition_check"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// 단계별 대기 정책
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchoverPolicy {
    /// 액티브의 switchover-ready 대기
    pub ready: RetryPolicy,
    /// 새 액티브 응답 대기
    pub new_active: RetryPolicy,
    /// 인터페이스 복구 대기
    pub interface_recovery: RetryPolicy,
    /// last-switchover-time 보고 대기
    pub last_switchover_time: RetryPolicy,
}

impl SwitchoverPolicy {
    /// 폴링 간격과 단계별 제한 시간으로 정책을 생성합니다.
    ///
    /// 새 액티브 대기는 첫 프로브 전에 한 간격을 쉽니다.
    pub fn new(
        poll_interval: Duration,
        ready_timeout: Duration,
        max_switchover: Duration,
        interface_recovery: Duration,
        last_switchover_time: Duration,
    ) -> Self {
        Self {
            ready: RetryPolicy::new(poll_interval, ready_timeout),
            new_active: RetryPolicy::new(poll_interval, max_switchover)
                .with_initial_delay(poll_interval),
            interface_recovery: RetryPolicy::new(poll_interval, interface_recovery),
            last_switchover_time: RetryPolicy::new(poll_interval, last_switchover_time),
        }
    }
}

impl Default for SwitchoverPolicy {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(30),
            Duration::from_secs(30 * 60),
            Duration::from_secs(900),
            Duration::from_secs(300),
            Duration::from_secs(60),
        )
    }
}

/// 스위치오버 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchoverResult {
    /// 역할 교대 완료
    Completed(SwitchoverRecord),
    /// 컨트롤 프로세서가 부족해 건너뜀
    Skipped {
        /// 사유
        reason: String,
        /// 발견된 컨트롤 프로세서 수
        units: usize,
    },
}

/// 스위치오버 컨트롤러
pub struct SwitchoverController<'a, D: DeviceConnector> {
    connector: &'a D,
    policy: SwitchoverPolicy,
    phase: SwitchoverPhase,
}

impl<'a, D: DeviceConnector> SwitchoverController<'a, D> {
    /// 새 컨트롤러를 생성합니다.
    pub fn new(connector: &'a D, policy: SwitchoverPolicy) -> Self {
        Self {
            connector,
            policy,
            phase: SwitchoverPhase::Idle,
        }
    }

    /// 현재 단계
    pub fn phase(&self) -> SwitchoverPhase {
        self.phase
    }

    /// 스위치오버를 수행합니다.
    ///
    /// 새 액티브가 응답하면 `clients`를 새 연결로 교체합니다.
    ///
    /// # Errors
    ///
    /// 실패한 단계를 담은 [`EngineError::Switchover`]를 반환합니다.
    pub async fn run(
        &mut self,
        clients: &mut DeviceClients<D>,
    ) -> Result<SwitchoverResult, EngineError> {
        let connector = self.connector;
        let device = connector.device_id();
        let result = self.run_phases(clients).await;

        let label = match &result {
            Ok(SwitchoverResult::Completed(record)) => {
                metrics::histogram!(m::SWITCHOVER_DURATION_SECONDS)
                    .record(record.elapsed.as_secs_f64());
                "success"
            }
            Ok(SwitchoverResult::Skipped { .. }) => "skipped",
            Err(_) => "failure",
        };
        metrics::counter!(m::SWITCHOVERS_TOTAL, m::LABEL_RESULT => label).increment(1);

        result.map_err(|source| {
            let phase = self.phase;
            self.phase = SwitchoverPhase::Failed;
            error!(device, phase = %phase, error = %source, "supervisor switchover failed");
            EngineError::Switchover {
                phase,
                source: Box::new(source),
            }
        })
    }

    async fn run_phases(
        &mut self,
        clients: &mut DeviceClients<D>,
    ) -> Result<SwitchoverResult, EngineError> {
        // --- PreconditionCheck ---
        self.phase = SwitchoverPhase::PreconditionCheck;
        let processors = clients.state.control_processors().await?;
        if processors.len() < 2 {
            let reason = format!(
                "not enough controller cards: got {}, want at least 2",
                processors.len()
            );
            info!(units = processors.len(), "switchover skipped");
            self.phase = SwitchoverPhase::Idle;
            return Ok(SwitchoverResult::Skipped {
                reason,
                units: processors.len(),
            });
        }
        let (standby_before, active_before) = find_roles(&processors)?;
        info!(
            standby = %standby_before,
            active = %active_before,
            "detected control processors"
        );

        let state = &clients.state;
        let active = active_before.as_str();
        retry_until("switchover ready", &self.policy.ready, move || async move {
            match state.switchover_ready(active).await {
                Ok(true) => Attempt::Ready(()),
                Ok(false) => Attempt::Retry(format!("{active} not switchover-ready")),
                Err(status) => Attempt::Retry(status.to_string()),
            }
        })
        .await?;

        let interfaces_before: BTreeSet<String> =
            clients.state.oper_up_interfaces().await?.into_iter().collect();
        if interfaces_before.is_empty() {
            return Err(EngineError::protocol(
                "no interfaces with oper-status UP before switchover",
            ));
        }
        debug!(count = interfaces_before.len(), "recorded UP interfaces");

        // --- SwitchRequested ---
        self.phase = SwitchoverPhase::SwitchRequested;
        let started = Instant::now();
        let response = clients
            .system
            .switch_control_processor(&standby_before)
            .await?;
        validate_response(&response, &standby_before)?;
        info!(
            control_processor = %response.control_processor,
            version = %response.version,
            uptime_ns = response.uptime_ns,
            "switch control processor accepted"
        );

        // --- AwaitingNewActive ---
        self.phase = SwitchoverPhase::AwaitingNewActive;
        let connector = self.connector;
        wait_ready("switchover", &self.policy.new_active, move || async move {
            let system = connector.connect_system().await?;
            system.time().await?;
            Ok::<_, RpcStatus>(())
        })
        .await?;
        let elapsed = started.elapsed();
        info!(elapsed_secs = elapsed.as_secs(), "new active supervisor is up");
        *clients = clients
            .clone()
            .reacquire(self.connector, &self.policy.new_active.for_reconnect())
            .await?;

        // --- PostconditionCheck ---
        self.phase = SwitchoverPhase::PostconditionCheck;
        let processors = clients.state.control_processors().await?;
        let (standby_after, active_after) = find_roles(&processors)?;
        if active_after != standby_before || standby_after != active_before {
            return Err(EngineError::protocol(format!(
                "roles did not swap: active {active_before} -> {active_after}, \
                 standby {standby_before} -> {standby_after}"
            )));
        }

        let state = &clients.state;
        let expected = &interfaces_before;
        retry_until(
            "interface recovery",
            &self.policy.interface_recovery,
            move || async move {
                let up: BTreeSet<String> = match state.oper_up_interfaces().await {
                    Ok(up) => up.into_iter().collect(),
                    Err(status) => return Attempt::Retry(status.to_string()),
                };
                let missing: Vec<&str> = expected.difference(&up).map(String::as_str).collect();
                if missing.is_empty() {
                    Attempt::Ready(())
                } else {
                    Attempt::Retry(format!("interfaces not UP: {}", missing.join(", ")))
                }
            },
        )
        .await?;

        let new_active = active_after.as_str();
        let last_switchover_time = retry_until(
            "last switchover time",
            &self.policy.last_switchover_time,
            move || async move {
                match state.last_switchover_time(new_active).await {
                    Ok(Some(time)) => Attempt::Ready(time),
                    Ok(None) => Attempt::Retry("last-switchover-time not present".to_owned()),
                    Err(status) => Attempt::Retry(status.to_string()),
                }
            },
        )
        .await?;

        let reason = state
            .last_switchover_reason(new_active)
            .await?
            .ok_or_else(|| EngineError::protocol("last-switchover-reason not present"))?;
        debug!(trigger = %reason.trigger, details = %reason.details, "last switchover reason");

        let record = SwitchoverRecord {
            standby_before,
            active_before,
            standby_after,
            active_after,
            response_version: response.version,
            response_uptime_ns: response.uptime_ns,
            elapsed,
            last_switchover_time: Some(last_switchover_time),
            last_switchover_reason: Some(reason),
        };
        self.phase = SwitchoverPhase::Done;
        info!(
            active = %record.active_after,
            elapsed_secs = record.elapsed.as_secs(),
            "supervisor switchover complete"
        );
        Ok(SwitchoverResult::Completed(record))
    }
}

/// 컨트롤 프로세서 목록에서 (스탠바이, 액티브) 이름을 찾습니다.
fn find_roles(processors: &[ControlProcessor]) -> Result<(String, String), EngineError> {
    let by_role = |role: RedundantRole| {
        processors
            .iter()
            .find(|cp| cp.role == Some(role))
            .map(|cp| cp.name.clone())
    };
    match (by_role(RedundantRole::Secondary), by_role(RedundantRole::Primary)) {
        (Some(standby), Some(active)) => Ok((standby, active)),
        _ => Err(EngineError::protocol(
            "cannot determine active and standby control processors",
        )),
    }
}

fn validate_response(response: &SwitchoverResponse, target: &str) -> Result<(), EngineError> {
    if response.control_processor != target {
        return Err(EngineError::protocol(format!(
            "switchover response names {}, want {target}",
            response.control_processor
        )));
    }
    if response.version.is_empty() {
        return Err(EngineError::protocol(
            "switchover response has an empty version",
        ));
    }
    if response.uptime_ns == 0 {
        return Err(EngineError::protocol("switchover response has zero uptime"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use osinstall_core::types::{StatusCode, SwitchoverReason};

    use super::*;
    use crate::client::mock::MockDevice;

    fn cp(name: &str, role: RedundantRole) -> ControlProcessor {
        ControlProcessor {
            name: name.to_owned(),
            role: Some(role),
        }
    }

    fn dual_device() -> MockDevice {
        let device = MockDevice::new();
        {
            let mut s = device.script();
            s.control_processors.push_back(vec![
                cp("RP0", RedundantRole::Primary),
                cp("RP1", RedundantRole::Secondary),
            ]);
            s.control_processors.push_back(vec![
                cp("RP0", RedundantRole::Secondary),
                cp("RP1", RedundantRole::Primary),
            ]);
            s.up_interfaces
                .push_back(vec!["Eth0".to_owned(), "Eth1".to_owned()]);
            s.switch_results.push_back(Ok(SwitchoverResponse {
                control_processor: "RP1".to_owned(),
                version: "25.1.1".to_owned(),
                uptime_ns: 1_000,
            }));
            s.last_switchover_times.push_back(Some(1_700_000_000));
            s.last_switchover_reason = Some(SwitchoverReason {
                trigger: "USER_INITIATED".to_owned(),
                details: "gnoi".to_owned(),
            });
        }
        device
    }

    async fn run(
        device: &MockDevice,
    ) -> (
        SwitchoverController<'_, MockDevice>,
        Result<SwitchoverResult, EngineError>,
    ) {
        let mut clients = DeviceClients::connect(device).await.unwrap();
        let mut controller = SwitchoverController::new(device, SwitchoverPolicy::default());
        let result = controller.run(&mut clients).await;
        (controller, result)
    }

    #[tokio::test(start_paused = true)]
    async fn successful_switchover_swaps_roles() {
        let device = dual_device();
        let (controller, result) = run(&device).await;
        match result.unwrap() {
            SwitchoverResult::Completed(record) => {
                assert!(record.is_exact_swap());
                assert_eq!(record.active_after, "RP1");
                assert_eq!(record.standby_after, "RP0");
                assert_eq!(record.last_switchover_time, Some(1_700_000_000));
                assert!(record.elapsed >= Duration::from_secs(30));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(controller.phase(), SwitchoverPhase::Done);
        assert_eq!(device.script().switch_targets, vec!["RP1".to_owned()]);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_after_switchover_skips_initial_delay() {
        let device = dual_device();
        let start = tokio::time::Instant::now();
        let (_, result) = run(&device).await;
        assert!(matches!(result.unwrap(), SwitchoverResult::Completed(_)));
        // 새 액티브 대기의 초기 지연 한 번만
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(30));
        assert!(elapsed < Duration::from_secs(60), "took {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn single_control_processor_is_skipped() {
        let device = MockDevice::new();
        device
            .script()
            .control_processors
            .push_back(vec![cp("RP0", RedundantRole::Primary)]);
        let (controller, result) = run(&device).await;
        assert!(matches!(
            result.unwrap(),
            SwitchoverResult::Skipped { units: 1, .. }
        ));
        assert_eq!(controller.phase(), SwitchoverPhase::Idle);
        assert!(device.script().switch_targets.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn no_up_interfaces_fails_before_request() {
        let device = dual_device();
        device.script().up_interfaces = vec![Vec::new()].into();
        let (controller, result) = run(&device).await;
        let err = result.unwrap_err();
        assert!(err.is_retry_safe());
        assert_eq!(controller.phase(), SwitchoverPhase::Failed);
        assert!(device.script().switch_targets.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn not_ready_active_times_out_in_precondition() {
        let device = dual_device();
        device.script().switchover_ready.push_back(false);
        let (_, result) = run(&device).await;
        let err = result.unwrap_err();
        assert!(err.is_retry_safe());
        assert!(matches!(err.root(), EngineError::Timeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn response_naming_wrong_unit_fails_after_request() {
        let device = dual_device();
        device.script().switch_results = vec![Ok(SwitchoverResponse {
            control_processor: "RP0".to_owned(),
            version: "25.1.1".to_owned(),
            uptime_ns: 1,
        })]
        .into();
        let (_, result) = run(&device).await;
        match result.unwrap_err() {
            EngineError::Switchover { phase, source } => {
                assert_eq!(phase, SwitchoverPhase::SwitchRequested);
                assert!(matches!(*source, EngineError::Protocol(_)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn new_active_never_answers_times_out() {
        let device = dual_device();
        {
            let mut s = device.script();
            for _ in 0..200 {
                s.connect_errors
                    .push_back(RpcStatus::new(StatusCode::Unavailable, "rebooting"));
            }
        }
        // connect()가 먼저 실패하지 않도록 클라이언트를 미리 만듭니다.
        let mut clients = DeviceClients {
            os: std::sync::Arc::new(device.clone()),
            system: std::sync::Arc::new(device.clone()),
            state: std::sync::Arc::new(device.clone()),
        };
        let mut controller = SwitchoverController::new(&device, SwitchoverPolicy::default());
        let err = controller.run(&mut clients).await.unwrap_err();
        assert!(!err.is_retry_safe());
        match err {
            EngineError::Switchover { phase, source } => {
                assert_eq!(phase, SwitchoverPhase::AwaitingNewActive);
                assert!(matches!(*source, EngineError::Timeout { .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn roles_not_swapped_fails_postcondition() {
        let device = dual_device();
        device.script().control_processors = vec![vec![
            cp("RP0", RedundantRole::Primary),
            cp("RP1", RedundantRole::Secondary),
        ]]
        .into();
        let (_, result) = run(&device).await;
        match result.unwrap_err() {
            EngineError::Switchover { phase, .. } => {
                assert_eq!(phase, SwitchoverPhase::PostconditionCheck);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn missing_reason_fails_postcondition() {
        let device = dual_device();
        device.script().last_switchover_reason = None;
        let (_, result) = run(&device).await;
        let err = result.unwrap_err();
        assert!(err.to_string().contains("postcondition_check"));
        assert!(err.root().to_string().contains("last-switchover-reason"));
    }
}
