//! 설치 엔진 설정
//!
//! [`EnginePolicy`]는 core의 [`OsInstallConfig`]에서 파생되며,
//! 워커가 쓰는 재시도 정책을 `Duration` 단위로 미리 계산해 둡니다.
//! 하나의 불변 값으로 각 워커에 전달됩니다.
//!
//! # 사용 예시
//! ```ignore
//! use osinstall_core::config::OsInstallConfig;
//! use osinstall_engine::config::EnginePolicy;
//!
//! let core_config = OsInstallConfig::default();
//! let policy = EnginePolicy::from_core(&core_config);
//! ```

use std::time::Duration;

use osinstall_core::config::{DEFAULT_CHUNK_SIZE, OsInstallConfig};

use crate::error::EngineError;
use crate::image::read_build_info;
use crate::poller::RetryPolicy;
use crate::switchover::SwitchoverPolicy;

/// 업로드 조각 크기 상한 (4 MiB)
const MAX_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// 설치 엔진 정책
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnginePolicy {
    /// 설치할 이미지 버전
    pub target_version: String,
    /// 업로드 조각 크기 (바이트)
    pub chunk_size: usize,
    /// 활성화 후 재부팅 생략 (워커가 직접 재부팅)
    pub no_reboot: bool,
    /// 이중화 장비에서 스탠바이에도 설치
    pub install_standby: bool,
    /// 관리 평면 software-version 교차 확인
    pub check_software_version: bool,
    /// 강제 전송 후 이미지 파일 갱신 확인
    pub check_image_refresh: bool,
    /// 설치 후 스위치오버 수행
    pub switchover_enabled: bool,
    /// 설치 검증 대기
    pub verify: RetryPolicy,
    /// 재부팅 후 부팅 대기
    pub boot: RetryPolicy,
    /// 스위치오버 단계별 대기
    pub switchover: SwitchoverPolicy,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self::from_core(&OsInstallConfig::default())
    }
}

impl EnginePolicy {
    /// core 설정에서 엔진 정책을 생성합니다.
    pub fn from_core(core: &OsInstallConfig) -> Self {
        let install = &core.install;
        let boot = &core.boot;
        let sw = &core.switchover;
        let boot_interval = Duration::from_secs(boot.poll_interval_secs);

        Self {
            target_version: install.target_version.clone(),
            chunk_size: install.chunk_size,
            no_reboot: install.no_reboot,
            install_standby: install.install_standby,
            check_software_version: install.check_software_version,
            check_image_refresh: install.check_image_refresh,
            switchover_enabled: sw.enabled,
            verify: RetryPolicy::new(
                Duration::from_secs(install.verify_poll_interval_secs),
                Duration::from_secs(install.timeout_secs),
            ),
            boot: RetryPolicy::new(boot_interval, Duration::from_secs(boot.max_boot_secs))
                .with_initial_delay(boot_interval),
            switchover: SwitchoverPolicy::new(
                Duration::from_secs(sw.poll_interval_secs),
                Duration::from_secs(sw.ready_timeout_secs),
                Duration::from_secs(sw.max_switchover_secs),
                Duration::from_secs(sw.interface_recovery_secs),
                Duration::from_secs(sw.last_switchover_time_secs),
            ),
        }
    }

    /// core 설정에서 정책을 만들고 목표 버전을 확정한 뒤 검증합니다.
    ///
    /// `install.target_version`이 비어 있고 `install.build_info_path`가
    /// 지정되어 있으면 빌드 정보 파일에서 버전을 읽습니다.
    pub async fn resolve(core: &OsInstallConfig) -> Result<Self, EngineError> {
        let mut policy = Self::from_core(core);
        let build_info = &core.install.build_info_path;
        if policy.target_version.is_empty() && !build_info.is_empty() {
            policy.target_version = read_build_info(build_info).await?;
        }
        policy.validate()?;
        Ok(policy)
    }

    /// 정책 값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.target_version.is_empty() {
            return Err(config_error("target_version", "must not be empty"));
        }

        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(config_error(
                "chunk_size",
                format!("must be 1-{MAX_CHUNK_SIZE}"),
            ));
        }

        check_retry("verify", &self.verify)?;
        check_retry("boot", &self.boot)?;
        if self.switchover_enabled {
            check_retry("switchover.ready", &self.switchover.ready)?;
            check_retry("switchover.new_active", &self.switchover.new_active)?;
            check_retry(
                "switchover.interface_recovery",
                &self.switchover.interface_recovery,
            )?;
            check_retry(
                "switchover.last_switchover_time",
                &self.switchover.last_switchover_time,
            )?;
        }
        Ok(())
    }
}

fn config_error(field: &str, reason: impl Into<String>) -> EngineError {
    EngineError::Config {
        field: field.to_owned(),
        reason: reason.into(),
    }
}

fn check_retry(field: &str, policy: &RetryPolicy) -> Result<(), EngineError> {
    if policy.interval.is_zero() {
        return Err(config_error(field, "poll interval must be greater than 0"));
    }
    if policy.max_duration < policy.interval {
        return Err(config_error(
            field,
            "max duration must not be shorter than the poll interval",
        ));
    }
    Ok(())
}

/// 엔진 정책 빌더
#[derive(Default)]
pub struct EnginePolicyBuilder {
    policy: EnginePolicy,
}

impl EnginePolicyBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 설치할 이미지 버전을 설정합니다.
    pub fn target_version(mut self, version: impl Into<String>) -> Self {
        self.policy.target_version = version.into();
        self
    }

    /// 업로드 조각 크기를 설정합니다.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.policy.chunk_size = size;
        self
    }

    /// 재부팅 생략 여부를 설정합니다.
    pub fn no_reboot(mut self, no_reboot: bool) -> Self {
        self.policy.no_reboot = no_reboot;
        self
    }

    /// 스탠바이 설치 여부를 설정합니다.
    pub fn install_standby(mut self, install: bool) -> Self {
        self.policy.install_standby = install;
        self
    }

    /// software-version 교차 확인 여부를 설정합니다.
    pub fn check_software_version(mut self, check: bool) -> Self {
        self.policy.check_software_version = check;
        self
    }

    /// 이미지 갱신 확인 여부를 설정합니다.
    pub fn check_image_refresh(mut self, check: bool) -> Self {
        self.policy.check_image_refresh = check;
        self
    }

    /// 스위치오버 수행 여부를 설정합니다.
    pub fn switchover_enabled(mut self, enabled: bool) -> Self {
        self.policy.switchover_enabled = enabled;
        self
    }

    /// 설치 검증 대기 정책을 설정합니다.
    pub fn verify(mut self, policy: RetryPolicy) -> Self {
        self.policy.verify = policy;
        self
    }

    /// 부팅 대기 정책을 설정합니다.
    pub fn boot(mut self, policy: RetryPolicy) -> Self {
        self.policy.boot = policy;
        self
    }

    /// 스위치오버 정책을 설정합니다.
    pub fn switchover(mut self, policy: SwitchoverPolicy) -> Self {
        self.policy.switchover = policy;
        self
    }

    /// 정책을 검증하고 반환합니다.
    pub fn build(self) -> Result<EnginePolicy, EngineError> {
        self.policy.validate()?;
        Ok(self.policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_core_converts_seconds() {
        let mut core = OsInstallConfig::default();
        core.install.target_version = "25.1.1".to_owned();
        core.install.timeout_secs = 900;
        core.install.verify_poll_interval_secs = 30;
        core.boot.poll_interval_secs = 20;

        let policy = EnginePolicy::from_core(&core);
        assert_eq!(policy.target_version, "25.1.1");
        assert_eq!(policy.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(policy.verify.interval, Duration::from_secs(30));
        assert_eq!(policy.verify.max_duration, Duration::from_secs(900));
        assert_eq!(policy.boot.initial_delay, Duration::from_secs(20));
        assert!(policy.validate().is_ok());
    }

    #[tokio::test]
    async fn resolve_reads_version_from_build_info() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            b"Version: 25.1.1.22I\nGISO Build Command: ./gisobuild.py --label LAB\n",
        )
        .unwrap();

        let mut core = OsInstallConfig::default();
        core.install.build_info_path = file.path().display().to_string();
        let policy = EnginePolicy::resolve(&core).await.unwrap();
        assert_eq!(policy.target_version, "25.1.1.22I-LAB");

        // 명시한 버전이 우선
        core.install.target_version = "25.1.1".to_owned();
        let policy = EnginePolicy::resolve(&core).await.unwrap();
        assert_eq!(policy.target_version, "25.1.1");
    }

    #[tokio::test]
    async fn resolve_reports_unreadable_build_info() {
        let mut core = OsInstallConfig::default();
        core.install.build_info_path = "/nonexistent/build-info.txt".to_owned();
        let err = EnginePolicy::resolve(&core).await.unwrap_err();
        assert!(matches!(err, EngineError::Content(ref msg) if msg.contains("/nonexistent/build-info.txt")));

        core.install.build_info_path.clear();
        let err = EnginePolicy::resolve(&core).await.unwrap_err();
        assert!(matches!(err, EngineError::Config { ref field, .. } if field == "target_version"));
    }

    #[test]
    fn default_policy_requires_target_version() {
        let err = EnginePolicy::default().validate().unwrap_err();
        assert!(matches!(err, EngineError::Config { ref field, .. } if field == "target_version"));
    }

    #[test]
    fn builder_validates() {
        let policy = EnginePolicyBuilder::new()
            .target_version("1.0")
            .no_reboot(true)
            .build()
            .unwrap();
        assert!(policy.no_reboot);

        let err = EnginePolicyBuilder::new()
            .target_version("1.0")
            .chunk_size(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, EngineError::Config { ref field, .. } if field == "chunk_size"));
    }

    #[test]
    fn zero_interval_rejected() {
        let err = EnginePolicyBuilder::new()
            .target_version("1.0")
            .verify(RetryPolicy::new(Duration::ZERO, Duration::from_secs(10)))
            .build()
            .unwrap_err();
        assert!(matches!(err, EngineError::Config { ref field, .. } if field == "verify"));
    }

    #[test]
    fn switchover_policy_checked_only_when_enabled() {
        let broken = SwitchoverPolicy::new(
            Duration::ZERO,
            Duration::from_secs(1),
            Duration::from_secs(1),
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        assert!(
            EnginePolicyBuilder::new()
                .target_version("1.0")
                .switchover(broken)
                .build()
                .is_ok()
        );
        assert!(
            EnginePolicyBuilder::new()
                .target_version("1.0")
                .switchover(broken)
                .switchover_enabled(true)
                .build()
                .is_err()
        );
    }
}
