//! 장비별 설치 워커
//!
//! [`DeviceWorker`]는 장비 하나의 컨텍스트와 클라이언트를 독점 소유하고
//! [`InstallPlan`]의 단계를 순서대로 실행합니다. 치명적인 에러는 해당 장비의
//! 남은 단계만 중단하며, 결과는 [`WorkerReport`]로 정리됩니다.
//!
//! # 클라이언트 캐시
//!
//! 클라이언트는 처음 필요할 때 연결되고 재사용됩니다. 재부팅이나
//! 스위치오버 뒤에는 캐시를 버리고 새로 연결합니다.
//!
//! # 사용 예시
//! ```ignore
//! let mut worker = DeviceWorker::new(connector, FileContent::new(path), ctx);
//! let report = worker.run_standard().await;
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use osinstall_core::metrics as m;
use osinstall_core::types::{RebootMethod, RebootRequest, RpcStatus, Topology};

use crate::activation::{ActivateParams, ActivationResult, ExpectedFailure, activate};
use crate::client::{DeviceClients, DeviceConnector, StateClient, SystemClient};
use crate::config::EnginePolicy;
use crate::content::ContentSource;
use crate::error::EngineError;
use crate::image::{ImageRefresh, supports_force_download};
use crate::poller::wait_ready;
use crate::session::{TransferOptions, TransferOutcome, transfer};
use crate::switchover::{SwitchoverController, SwitchoverResult};
use crate::verify::{VerifyParams, VerifyReport, detect_topology, verify_install};

/// 재부팅 요청에 기록되는 사유
const REBOOT_MESSAGE: &str = "Apply OS software install";

/// 워커가 독점 소유하는 장비 컨텍스트
#[derive(Debug, Clone)]
pub struct DeviceWorkerContext {
    /// 장비 식별자
    pub device_id: String,
    /// 이중화 슈퍼바이저 여부 (토폴로지 감지 후 갱신)
    pub dual_supervisor: bool,
    /// 엔진 정책 (목표 버전, 제한 시간 포함)
    pub policy: EnginePolicy,
}

impl DeviceWorkerContext {
    /// 새 컨텍스트를 생성합니다.
    pub fn new(device_id: impl Into<String>, policy: EnginePolicy) -> Self {
        Self {
            device_id: device_id.into(),
            dual_supervisor: false,
            policy,
        }
    }

    /// 목표 버전
    pub fn target_version(&self) -> &str {
        &self.policy.target_version
    }
}

/// 전송 단계 파라미터
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferStep {
    /// 스탠바이 대상
    pub standby: bool,
    /// 강제 전송 (요청 버전을 비움)
    pub force: bool,
    /// 요청에 보낼 버전 (None이면 목표 버전)
    pub request_version: Option<String>,
    /// 기대 실패 부분 문자열
    pub expected_error: Option<String>,
}

impl TransferStep {
    /// 액티브 대상 전송
    pub fn active() -> Self {
        Self::default()
    }

    /// 스탠바이 대상 전송
    pub fn standby() -> Self {
        Self {
            standby: true,
            ..Self::default()
        }
    }

    /// 강제 전송으로 바꿉니다.
    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }

    /// 요청 버전을 지정합니다.
    pub fn request_version(mut self, version: impl Into<String>) -> Self {
        self.request_version = Some(version.into());
        self
    }

    /// 기대 실패를 지정합니다.
    pub fn expect_error(mut self, substring: impl Into<String>) -> Self {
        self.expected_error = Some(substring.into());
        self
    }
}

/// 활성화 단계 파라미터
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivateStep {
    /// 스탠바이 대상
    pub standby: bool,
    /// 활성화할 버전 (None이면 목표 버전)
    pub version: Option<String>,
    /// 기대 실패
    pub expected_failure: Option<ExpectedFailure>,
}

impl ActivateStep {
    /// 액티브 대상 활성화
    pub fn active() -> Self {
        Self::default()
    }

    /// 스탠바이 대상 활성화
    pub fn standby() -> Self {
        Self {
            standby: true,
            ..Self::default()
        }
    }

    /// 활성화할 버전을 지정합니다.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// 기대 실패를 지정합니다.
    pub fn expect_failure(mut self, expected: ExpectedFailure) -> Self {
        self.expected_failure = Some(expected);
        self
    }
}

/// 설치 계획의 한 단계
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallStep {
    /// 이미지 전송
    Transfer(TransferStep),
    /// 활성화
    Activate(ActivateStep),
    /// 재부팅 요청
    Reboot,
    /// 부팅 대기 및 클라이언트 재연결
    AwaitBoot,
    /// 설치 검증
    Verify,
    /// 스위치오버
    Switchover,
}

impl fmt::Display for InstallStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = |standby: bool| if standby { "standby" } else { "active" };
        match self {
            Self::Transfer(step) if step.force => write!(f, "transfer({}, forced)", unit(step.standby)),
            Self::Transfer(step) => write!(f, "transfer({})", unit(step.standby)),
            Self::Activate(step) => write!(f, "activate({})", unit(step.standby)),
            Self::Reboot => write!(f, "reboot"),
            Self::AwaitBoot => write!(f, "await_boot"),
            Self::Verify => write!(f, "verify"),
            Self::Switchover => write!(f, "switchover"),
        }
    }
}

/// 순서가 있는 설치 단계 목록
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallPlan {
    steps: Vec<InstallStep>,
}

impl InstallPlan {
    /// 빈 계획을 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 단계를 추가합니다.
    pub fn then(mut self, step: InstallStep) -> Self {
        self.steps.push(step);
        self
    }

    /// 단계 목록
    pub fn steps(&self) -> &[InstallStep] {
        &self.steps
    }

    /// 표준 설치 순서를 생성합니다.
    ///
    /// 전송 → (이중화 시 스탠바이 전송/활성화) → 활성화 → (no_reboot면 재부팅)
    /// → 부팅 대기 → 검증 → (설정 시 스위치오버)
    pub fn standard(ctx: &DeviceWorkerContext) -> Self {
        let policy = &ctx.policy;
        let mut plan = Self::new().then(InstallStep::Transfer(TransferStep::active()));
        if ctx.dual_supervisor && policy.install_standby {
            plan = plan
                .then(InstallStep::Transfer(TransferStep::standby()))
                .then(InstallStep::Activate(ActivateStep::standby()));
        }
        plan = plan.then(InstallStep::Activate(ActivateStep::active()));
        if policy.no_reboot {
            plan = plan.then(InstallStep::Reboot);
        }
        plan = plan.then(InstallStep::AwaitBoot).then(InstallStep::Verify);
        if policy.switchover_enabled && ctx.dual_supervisor {
            plan = plan.then(InstallStep::Switchover);
        }
        plan
    }
}

/// 단계 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum StepOutcome {
    /// 완료
    Completed(String),
    /// 기대한 실패가 관찰됨
    ExpectedFailure(String),
    /// 건너뜀
    Skipped(String),
    /// 실패 (이후 단계 중단)
    Failed(String),
}

/// 단계 하나의 보고
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    /// 단계 이름
    pub step: String,
    /// 결과
    pub outcome: StepOutcome,
    /// 소요 시간 (밀리초)
    pub elapsed_ms: u64,
}

/// 워커 실행 보고
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    /// 장비 식별자
    pub device_id: String,
    /// 실행 식별자
    pub run_id: String,
    /// 감지된 토폴로지
    pub topology: Option<Topology>,
    /// 실행된 단계
    pub steps: Vec<StepReport>,
    /// 전체 소요 시간 (밀리초)
    pub elapsed_ms: u64,
    /// 워커를 중단시킨 에러
    pub error: Option<String>,
}

impl WorkerReport {
    /// 모든 단계가 실패 없이 끝났는지 여부
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// 장비별 설치 워커
pub struct DeviceWorker<D: DeviceConnector, C: ContentSource> {
    connector: D,
    content: C,
    ctx: DeviceWorkerContext,
    clients: Option<DeviceClients<D>>,
    topology: Option<Topology>,
    run_id: Uuid,
}

impl<D: DeviceConnector, C: ContentSource> DeviceWorker<D, C> {
    /// 새 워커를 생성합니다.
    pub fn new(connector: D, content: C, ctx: DeviceWorkerContext) -> Self {
        Self {
            connector,
            content,
            ctx,
            clients: None,
            topology: None,
            run_id: Uuid::new_v4(),
        }
    }

    /// 실행 식별자
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// 장비 컨텍스트
    pub fn context(&self) -> &DeviceWorkerContext {
        &self.ctx
    }

    async fn clients(&mut self) -> Result<DeviceClients<D>, EngineError> {
        if let Some(clients) = &self.clients {
            return Ok(clients.clone());
        }
        let clients = DeviceClients::connect(&self.connector).await?;
        self.clients = Some(clients.clone());
        Ok(clients)
    }

    /// 토폴로지를 감지하고 컨텍스트에 반영합니다.
    pub async fn detect_topology(&mut self) -> Result<Topology, EngineError> {
        let clients = self.clients().await?;
        let topology = detect_topology(clients.os.as_ref()).await?;
        self.ctx.dual_supervisor = topology.is_dual();
        self.topology = Some(topology);
        Ok(topology)
    }

    /// 이미지를 전송합니다.
    ///
    /// 강제 전송이고 이미지 갱신 확인이 켜져 있으면 전송 뒤 이미지 파일이
    /// 있어야 하며, 전송 전에도 있었다면 타임스탬프가 늘어나야 합니다.
    pub async fn transfer(&mut self, step: &TransferStep) -> Result<TransferOutcome, EngineError> {
        let clients = self.clients().await?;
        let target = self.ctx.policy.target_version.clone();

        let mut options = TransferOptions::new(target.clone())
            .standby(step.standby)
            .dual_supervisor(self.ctx.dual_supervisor)
            .chunk_size(self.ctx.policy.chunk_size);
        if let Some(version) = &step.request_version {
            options = options.request_version(version.clone());
        }
        if step.force {
            options = options.force();
        }
        if let Some(expected) = &step.expected_error {
            options = options.expect_error(expected.clone());
        }

        let check_refresh = options.is_forced() && self.ctx.policy.check_image_refresh;
        let before = if check_refresh {
            clients.state.image_modified_time(&target).await?
        } else {
            None
        };

        let reader = self.content.open().await?;
        let outcome = transfer(clients.os.as_ref(), options, reader).await?;

        if check_refresh && matches!(outcome, TransferOutcome::Transferred { .. }) {
            let after = clients
                .state
                .image_modified_time(&target)
                .await?
                .ok_or_else(|| EngineError::protocol("image missing after forced transfer"))?;
            match before {
                Some(before) if !(ImageRefresh { before, after }).is_refreshed() => {
                    return Err(EngineError::protocol(format!(
                        "image not force updated: modified time {before} -> {after}"
                    )));
                }
                Some(before) => debug!(before, after, "image refreshed by forced transfer"),
                None => debug!(after, "image created by forced transfer"),
            }
        }
        Ok(outcome)
    }

    /// 이미지를 활성화합니다.
    pub async fn activate(&mut self, step: &ActivateStep) -> Result<ActivationResult, EngineError> {
        let clients = self.clients().await?;
        let version = step
            .version
            .clone()
            .unwrap_or_else(|| self.ctx.policy.target_version.clone());
        let mut params = ActivateParams::new(version)
            .standby(step.standby)
            .no_reboot(self.ctx.policy.no_reboot);
        if let Some(expected) = &step.expected_failure {
            params = params.expect_failure(expected.clone());
        }
        activate(clients.os.as_ref(), &params).await
    }

    /// 콜드 재부팅을 요청합니다.
    ///
    /// 장비가 응답 전에 연결을 끊어 `Unavailable`이 오는 것은 정상입니다.
    pub async fn reboot(&mut self) -> Result<(), EngineError> {
        let clients = self.clients().await?;
        let request = RebootRequest {
            method: RebootMethod::Cold,
            force: true,
            message: REBOOT_MESSAGE.to_owned(),
        };
        match clients.system.reboot(request).await {
            Ok(()) => {}
            Err(status) if status.is_unavailable() => {
                debug!(error = %status, "connection dropped by reboot");
            }
            Err(status) => {
                error!(error = %status, "System.Reboot request failed");
                return Err(EngineError::Transport(status));
            }
        }
        info!("reboot requested");
        Ok(())
    }

    /// 장비가 다시 응답할 때까지 기다리고 클라이언트를 새로 연결합니다.
    ///
    /// 재부팅이 시작된 시점부터 잰 대기 시간을 반환합니다.
    pub async fn await_boot(&mut self) -> Result<Duration, EngineError> {
        let start = Instant::now();
        let policy = self.ctx.policy.boot;
        let connector = &self.connector;

        wait_ready("boot", &policy, move || async move {
            let system = connector.connect_system().await?;
            system.time().await?;
            Ok::<_, RpcStatus>(())
        })
        .await?;
        info!(elapsed_secs = start.elapsed().as_secs(), "device is reachable again");

        let reconnect = policy.for_reconnect();
        let clients = match self.clients.take() {
            Some(stale) => stale.reacquire(&self.connector, &reconnect).await?,
            None => DeviceClients::connect(&self.connector).await?,
        };
        self.clients = Some(clients);

        let elapsed = start.elapsed();
        info!(elapsed_secs = elapsed.as_secs(), "device clients ready after boot");
        Ok(elapsed)
    }

    /// 설치를 검증합니다.
    pub async fn verify(&mut self) -> Result<VerifyReport, EngineError> {
        let clients = self.clients().await?;
        let policy = &self.ctx.policy;
        let params = VerifyParams::new(policy.target_version.clone())
            .dual_supervisor(self.ctx.dual_supervisor)
            .check_software_version(policy.check_software_version);
        verify_install(
            clients.os.as_ref(),
            Some(clients.state.as_ref()),
            &params,
            &policy.verify,
        )
        .await
    }

    /// 스위치오버를 수행하고 새 연결을 캐시에 반영합니다.
    pub async fn switchover(&mut self) -> Result<SwitchoverResult, EngineError> {
        let mut clients = self.clients().await?;
        let mut controller = SwitchoverController::new(&self.connector, self.ctx.policy.switchover);
        let result = controller.run(&mut clients).await;
        self.clients = Some(clients);
        result
    }

    async fn run_step(&mut self, step: &InstallStep) -> Result<StepOutcome, EngineError> {
        let outcome = match step {
            InstallStep::Transfer(t) => {
                if t.force {
                    if let Some(skip) = self.force_unsupported().await? {
                        return Ok(StepOutcome::Skipped(skip));
                    }
                }
                match self.transfer(t).await? {
                    TransferOutcome::AlreadyInstalled { version } => {
                        StepOutcome::Completed(format!("image {version} already present"))
                    }
                    TransferOutcome::Transferred {
                        version,
                        bytes_sent,
                        progress_events,
                    } => StepOutcome::Completed(format!(
                        "validated {version} ({bytes_sent} bytes, {progress_events} progress events)"
                    )),
                    TransferOutcome::ExpectedFailure { observed } => {
                        StepOutcome::ExpectedFailure(observed)
                    }
                }
            }
            InstallStep::Activate(a) => match self.activate(a).await? {
                ActivationResult::Activated => StepOutcome::Completed("activated".to_owned()),
                ActivationResult::ExpectedFailure { outcome } => {
                    StepOutcome::ExpectedFailure(outcome.to_string())
                }
            },
            InstallStep::Reboot => {
                self.reboot().await?;
                StepOutcome::Completed("reboot requested".to_owned())
            }
            InstallStep::AwaitBoot => {
                let elapsed = self.await_boot().await?;
                StepOutcome::Completed(format!("reachable after {:.1}s", elapsed.as_secs_f64()))
            }
            InstallStep::Verify => {
                let report = self.verify().await?;
                StepOutcome::Completed(format!(
                    "running {} after {} polls",
                    report.version, report.attempts
                ))
            }
            InstallStep::Switchover => match self.switchover().await? {
                SwitchoverResult::Completed(record) => StepOutcome::Completed(format!(
                    "active {} -> {} in {:.1}s",
                    record.active_before,
                    record.active_after,
                    record.elapsed.as_secs_f64()
                )),
                SwitchoverResult::Skipped { reason, .. } => StepOutcome::Skipped(reason),
            },
        };
        Ok(outcome)
    }

    /// 강제 전송을 지원하지 않는 릴리스면 건너뛸 사유를 반환합니다.
    async fn force_unsupported(&mut self) -> Result<Option<String>, EngineError> {
        let clients = self.clients().await?;
        match clients.state.software_version().await? {
            Some(running) if !supports_force_download(&running) => Ok(Some(format!(
                "forced transfer not supported on release {running}"
            ))),
            _ => Ok(None),
        }
    }

    /// 계획의 단계를 순서대로 실행합니다.
    ///
    /// 치명적 에러가 나면 남은 단계는 실행하지 않습니다.
    pub async fn run(&mut self, plan: &InstallPlan) -> WorkerReport {
        let span = info_span!(
            "device_worker",
            device = %self.ctx.device_id,
            run_id = %self.run_id
        );
        self.run_plan(plan, Instant::now()).instrument(span).await
    }

    /// 토폴로지를 감지한 뒤 표준 계획을 실행합니다.
    pub async fn run_standard(&mut self) -> WorkerReport {
        let span = info_span!(
            "device_worker",
            device = %self.ctx.device_id,
            run_id = %self.run_id
        );
        async {
            let start = Instant::now();
            if let Err(e) = self.detect_topology().await {
                error!(error = %e, "topology detection failed");
                return self.finish(start, Vec::new(), Some(e));
            }
            let plan = InstallPlan::standard(&self.ctx);
            self.run_plan(&plan, start).await
        }
        .instrument(span)
        .await
    }

    async fn run_plan(&mut self, plan: &InstallPlan, start: Instant) -> WorkerReport {
        info!(
            target_version = %self.ctx.policy.target_version,
            steps = plan.steps().len(),
            dual_supervisor = self.ctx.dual_supervisor,
            "install plan started"
        );

        let mut steps = Vec::with_capacity(plan.steps().len());
        let mut failure = None;
        for step in plan.steps() {
            let step_start = Instant::now();
            let name = step.to_string();
            let outcome = match self.run_step(step).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(step = %name, error = %e, "install step failed");
                    let outcome = StepOutcome::Failed(e.to_string());
                    failure = Some(e);
                    outcome
                }
            };
            if let StepOutcome::Skipped(reason) = &outcome {
                warn!(step = %name, reason = %reason, "install step skipped");
            }
            steps.push(StepReport {
                step: name,
                outcome,
                elapsed_ms: millis(step_start.elapsed()),
            });
            if failure.is_some() {
                break;
            }
        }
        self.finish(start, steps, failure)
    }

    /// 실행 결과를 기록하고 보고서를 만듭니다.
    fn finish(
        &self,
        start: Instant,
        steps: Vec<StepReport>,
        failure: Option<EngineError>,
    ) -> WorkerReport {
        let elapsed = start.elapsed();
        let result = match &failure {
            None => {
                info!(elapsed_secs = elapsed.as_secs(), "install plan complete");
                "success"
            }
            Some(e) => {
                error!(elapsed_secs = elapsed.as_secs(), error = %e, "install plan aborted");
                "failure"
            }
        };
        metrics::counter!(m::DEVICE_RUNS_TOTAL, m::LABEL_RESULT => result).increment(1);
        metrics::histogram!(m::DEVICE_RUN_DURATION_SECONDS).record(elapsed.as_secs_f64());

        WorkerReport {
            device_id: self.ctx.device_id.clone(),
            run_id: self.run_id.to_string(),
            topology: self.topology,
            steps,
            elapsed_ms: millis(elapsed),
            error: failure.map(|e| e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use osinstall_core::types::{
        ActivationErrorKind, ActivationOutcome, StandbyState, StandbyVerify, StatusEvent,
        VerifyResult, VerifyStandby,
    };

    use super::*;
    use crate::client::mock::MockDevice;
    use crate::config::EnginePolicyBuilder;
    use crate::content::MemoryContent;

    fn policy() -> EnginePolicy {
        EnginePolicyBuilder::new()
            .target_version("2.0")
            .check_software_version(false)
            .build()
            .unwrap()
    }

    fn worker(device: &MockDevice, policy: EnginePolicy) -> DeviceWorker<MockDevice, MemoryContent> {
        DeviceWorker::new(
            device.clone(),
            MemoryContent(Bytes::from_static(&[7u8; 1000])),
            DeviceWorkerContext::new("dut", policy),
        )
    }

    fn install_events() -> Vec<StatusEvent> {
        vec![
            StatusEvent::TransferReady,
            StatusEvent::TransferProgress {
                bytes_received: 1000,
            },
            StatusEvent::Validated {
                version: "2.0".to_owned(),
            },
        ]
    }

    #[test]
    fn standard_plan_single_supervisor() {
        let ctx = DeviceWorkerContext::new("dut", policy());
        let names: Vec<String> = InstallPlan::standard(&ctx)
            .steps()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            names,
            vec!["transfer(active)", "activate(active)", "await_boot", "verify"]
        );
    }

    #[test]
    fn standard_plan_dual_supervisor_with_reboot_and_switchover() {
        let policy = EnginePolicyBuilder::new()
            .target_version("2.0")
            .no_reboot(true)
            .switchover_enabled(true)
            .build()
            .unwrap();
        let mut ctx = DeviceWorkerContext::new("dut", policy);
        ctx.dual_supervisor = true;
        let names: Vec<String> = InstallPlan::standard(&ctx)
            .steps()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            names,
            vec![
                "transfer(active)",
                "transfer(standby)",
                "activate(standby)",
                "activate(active)",
                "reboot",
                "await_boot",
                "verify",
                "switchover",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_standard_single_supervisor_succeeds() {
        let device = MockDevice::new()
            .with_install_events(install_events())
            .with_verify(vec![
                Ok(VerifyResult::default()),
                Err(RpcStatus::unavailable("rebooting")),
                Ok(VerifyResult {
                    version: "2.0".to_owned(),
                    ..Default::default()
                }),
            ]);
        let mut w = worker(&device, policy());
        let report = w.run_standard().await;

        assert!(report.is_success(), "{report:?}");
        assert_eq!(report.topology, Some(Topology::SingleSupervisor));
        assert_eq!(report.steps.len(), 4);
        assert_eq!(device.content_bytes_sent(), 1000);
        assert_eq!(report.run_id, w.run_id().to_string());
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_step_aborts_remaining_steps() {
        let device = MockDevice::new()
            .with_install_events(install_events())
            .with_activate(vec![Ok(ActivationOutcome::Error {
                kind: ActivationErrorKind::Unspecified,
                detail: "boom".to_owned(),
            })]);
        let mut w = worker(&device, policy());
        let plan = InstallPlan::new()
            .then(InstallStep::Transfer(TransferStep::active()))
            .then(InstallStep::Activate(ActivateStep::active()))
            .then(InstallStep::Verify);
        let report = w.run(&plan).await;

        assert!(!report.is_success());
        assert_eq!(report.steps.len(), 2);
        assert!(matches!(report.steps[1].outcome, StepOutcome::Failed(_)));
        assert_eq!(device.script().verify_calls, 0);
    }

    #[tokio::test]
    async fn reboot_tolerates_unavailable() {
        let device = MockDevice::new();
        device.script().reboot_error = Some(RpcStatus::unavailable("going down"));
        let mut w = worker(&device, policy());
        w.reboot().await.unwrap();

        let script = device.script();
        assert_eq!(script.reboots.len(), 1);
        assert_eq!(script.reboots[0].method, RebootMethod::Cold);
        assert!(script.reboots[0].force);
    }

    #[tokio::test]
    async fn reboot_other_error_is_fatal() {
        let device = MockDevice::new();
        device.script().reboot_error = Some(RpcStatus::new(
            osinstall_core::types::StatusCode::PermissionDenied,
            "denied",
        ));
        let mut w = worker(&device, policy());
        assert!(matches!(
            w.reboot().await,
            Err(EngineError::Transport(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn await_boot_reacquires_clients() {
        let device = MockDevice::new();
        let mut w = worker(&device, policy());
        w.clients().await.unwrap();
        let connects = device.script().connects;
        {
            let mut s = device.script();
            s.connect_errors.push_back(RpcStatus::unavailable("booting"));
        }

        let elapsed = w.await_boot().await.unwrap();
        // 초기 대기 30초 + 연결 실패 1회 30초
        assert_eq!(elapsed, Duration::from_secs(60));
        assert!(device.script().connects > connects + 3);
    }

    #[tokio::test(start_paused = true)]
    async fn forced_transfer_requires_refreshed_image() {
        let device = MockDevice::new().with_install_events(install_events());
        {
            let mut s = device.script();
            s.image_times.push_back(Some(100));
            s.image_times.push_back(Some(100));
        }
        let policy = EnginePolicyBuilder::new()
            .target_version("2.0")
            .check_image_refresh(true)
            .build()
            .unwrap();
        let mut w = worker(&device, policy);
        let err = w
            .transfer(&TransferStep::active().force())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("image not force updated"));
    }

    #[tokio::test(start_paused = true)]
    async fn forced_transfer_skipped_on_old_release() {
        let device = MockDevice::new().with_install_events(install_events());
        device
            .script()
            .software_versions
            .push_back(Ok(Some("24.4.1".to_owned())));
        let mut w = worker(&device, policy());
        let plan = InstallPlan::new().then(InstallStep::Transfer(TransferStep::active().force()));
        let report = w.run(&plan).await;
        assert!(report.is_success());
        assert!(matches!(report.steps[0].outcome, StepOutcome::Skipped(_)));
        assert_eq!(device.content_bytes_sent(), 0);
    }

    #[tokio::test]
    async fn detect_topology_updates_context() {
        let device = MockDevice::new().with_verify(vec![Ok(VerifyResult {
            version: "1.0".to_owned(),
            activation_fail_message: String::new(),
            standby: Some(VerifyStandby::Response(StandbyVerify {
                id: "RP1".to_owned(),
                version: "1.0".to_owned(),
                activation_fail_message: String::new(),
            })),
        })]);
        let mut w = worker(&device, policy());
        assert_eq!(
            w.detect_topology().await.unwrap(),
            Topology::DualSupervisor
        );
        assert!(w.context().dual_supervisor);
    }

    #[tokio::test(start_paused = true)]
    async fn topology_failure_reports_elapsed_time() {
        let device = MockDevice::new().with_verify(vec![Ok(VerifyResult {
            version: "1.0".to_owned(),
            activation_fail_message: String::new(),
            standby: Some(VerifyStandby::State(StandbyState::Unavailable)),
        })]);
        device.script().verify_delay = Duration::from_secs(5);
        let mut w = worker(&device, policy());

        let report = w.run_standard().await;

        assert!(!report.is_success());
        assert!(report.steps.is_empty());
        assert!(report.topology.is_none());
        assert!(report.error.as_deref().unwrap().contains("UNAVAILABLE"));
        assert!(report.elapsed_ms >= 5_000, "elapsed_ms = {}", report.elapsed_ms);
    }
}
