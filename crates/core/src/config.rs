//! 설정 관리: osinstall.toml 파싱 및 런타임 설정
//!
//! [`OsInstallConfig`]는 설치 엔진과 러너가 사용하는 모든 설정을 담는
//! 최상위 구조체입니다. 한 번 로드된 뒤에는 불변 값으로 각 장비 워커에
//! 전달되며, 프로세스 전역 가변 상태는 두지 않습니다.
//!
//! # 설정 로딩 우선순위
//! 1. 환경변수 (`OSINSTALL_INSTALL_TIMEOUT_SECS=3600` 형식)
//! 2. 설정 파일 (`osinstall.toml`)
//! 3. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), osinstall_core::error::OsInstallError> {
//! use osinstall_core::config::OsInstallConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = OsInstallConfig::load("osinstall.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = OsInstallConfig::parse("[install]\ntarget_version = \"25.1.1.21I\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, OsInstallError};

/// gNOI SetPackage와 같은 최대 청크 크기 (64 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// 설정 상한값 상수
const MAX_CHUNK_SIZE: usize = 4 * 1024 * 1024;
const MAX_TIMEOUT_SECS: u64 = 24 * 3600;
const MAX_POLL_INTERVAL_SECS: u64 = 3600;
const MAX_CONCURRENT_DEVICES: usize = 1024;

/// OS install 통합 설정
///
/// `osinstall.toml` 파일의 최상위 구조를 나타냅니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OsInstallConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 설치 설정
    #[serde(default)]
    pub install: InstallConfig,
    /// 재부팅 대기 설정
    #[serde(default)]
    pub boot: BootConfig,
    /// 스위치오버 설정
    #[serde(default)]
    pub switchover: SwitchoverConfig,
    /// 다중 장비 실행 설정
    #[serde(default)]
    pub fleet: FleetConfig,
    /// Prometheus 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl OsInstallConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, OsInstallError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, OsInstallError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                OsInstallError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                OsInstallError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, OsInstallError> {
        toml::from_str(toml_str).map_err(|e| {
            OsInstallError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `OSINSTALL_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "OSINSTALL_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "OSINSTALL_GENERAL_LOG_FORMAT");

        // Install
        override_string(&mut self.install.image_path, "OSINSTALL_INSTALL_IMAGE_PATH");
        override_string(
            &mut self.install.target_version,
            "OSINSTALL_INSTALL_TARGET_VERSION",
        );
        override_string(
            &mut self.install.build_info_path,
            "OSINSTALL_INSTALL_BUILD_INFO_PATH",
        );
        override_usize(&mut self.install.chunk_size, "OSINSTALL_INSTALL_CHUNK_SIZE");
        override_u64(&mut self.install.timeout_secs, "OSINSTALL_INSTALL_TIMEOUT_SECS");
        override_u64(
            &mut self.install.verify_poll_interval_secs,
            "OSINSTALL_INSTALL_VERIFY_POLL_INTERVAL_SECS",
        );
        override_bool(&mut self.install.no_reboot, "OSINSTALL_INSTALL_NO_REBOOT");
        override_bool(
            &mut self.install.install_standby,
            "OSINSTALL_INSTALL_INSTALL_STANDBY",
        );
        override_bool(
            &mut self.install.check_software_version,
            "OSINSTALL_INSTALL_CHECK_SOFTWARE_VERSION",
        );
        override_bool(
            &mut self.install.check_image_refresh,
            "OSINSTALL_INSTALL_CHECK_IMAGE_REFRESH",
        );

        // Boot
        override_u64(&mut self.boot.max_boot_secs, "OSINSTALL_BOOT_MAX_BOOT_SECS");
        override_u64(
            &mut self.boot.poll_interval_secs,
            "OSINSTALL_BOOT_POLL_INTERVAL_SECS",
        );

        // Switchover
        override_bool(&mut self.switchover.enabled, "OSINSTALL_SWITCHOVER_ENABLED");
        override_u64(
            &mut self.switchover.ready_timeout_secs,
            "OSINSTALL_SWITCHOVER_READY_TIMEOUT_SECS",
        );
        override_u64(
            &mut self.switchover.max_switchover_secs,
            "OSINSTALL_SWITCHOVER_MAX_SWITCHOVER_SECS",
        );
        override_u64(
            &mut self.switchover.poll_interval_secs,
            "OSINSTALL_SWITCHOVER_POLL_INTERVAL_SECS",
        );
        override_u64(
            &mut self.switchover.interface_recovery_secs,
            "OSINSTALL_SWITCHOVER_INTERFACE_RECOVERY_SECS",
        );
        override_u64(
            &mut self.switchover.last_switchover_time_secs,
            "OSINSTALL_SWITCHOVER_LAST_SWITCHOVER_TIME_SECS",
        );

        // Fleet
        override_usize(
            &mut self.fleet.max_concurrent_devices,
            "OSINSTALL_FLEET_MAX_CONCURRENT_DEVICES",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "OSINSTALL_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "OSINSTALL_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "OSINSTALL_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), OsInstallError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.install.chunk_size == 0 || self.install.chunk_size > MAX_CHUNK_SIZE {
            return Err(invalid(
                "install.chunk_size",
                format!("must be 1-{MAX_CHUNK_SIZE}"),
            ));
        }

        check_range("install.timeout_secs", self.install.timeout_secs, MAX_TIMEOUT_SECS)?;
        check_range(
            "install.verify_poll_interval_secs",
            self.install.verify_poll_interval_secs,
            MAX_POLL_INTERVAL_SECS,
        )?;
        check_range("boot.max_boot_secs", self.boot.max_boot_secs, MAX_TIMEOUT_SECS)?;
        check_range(
            "boot.poll_interval_secs",
            self.boot.poll_interval_secs,
            MAX_POLL_INTERVAL_SECS,
        )?;

        if self.switchover.enabled {
            check_range(
                "switchover.ready_timeout_secs",
                self.switchover.ready_timeout_secs,
                MAX_TIMEOUT_SECS,
            )?;
            check_range(
                "switchover.max_switchover_secs",
                self.switchover.max_switchover_secs,
                MAX_TIMEOUT_SECS,
            )?;
            check_range(
                "switchover.poll_interval_secs",
                self.switchover.poll_interval_secs,
                MAX_POLL_INTERVAL_SECS,
            )?;
            check_range(
                "switchover.interface_recovery_secs",
                self.switchover.interface_recovery_secs,
                MAX_TIMEOUT_SECS,
            )?;
            check_range(
                "switchover.last_switchover_time_secs",
                self.switchover.last_switchover_time_secs,
                MAX_TIMEOUT_SECS,
            )?;
        }

        if self.fleet.max_concurrent_devices == 0
            || self.fleet.max_concurrent_devices > MAX_CONCURRENT_DEVICES
        {
            return Err(invalid(
                "fleet.max_concurrent_devices",
                format!("must be 1-{MAX_CONCURRENT_DEVICES}"),
            ));
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(invalid("metrics.port", "must not be 0".to_owned()));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: String) -> OsInstallError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
    .into()
}

fn check_range(field: &str, value: u64, max: u64) -> Result<(), OsInstallError> {
    if value == 0 || value > max {
        return Err(invalid(field, format!("must be 1-{max}")));
    }
    Ok(())
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
        }
    }
}

/// 설치 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    /// 설치 이미지 경로
    pub image_path: String,
    /// 이미지의 버전 (설치 후 장비가 보고해야 하는 버전)
    pub target_version: String,
    /// 이미지 빌드 정보 파일 (target_version이 비어 있으면 여기서 버전을 읽음)
    pub build_info_path: String,
    /// 업로드 청크 크기 (바이트)
    pub chunk_size: usize,
    /// 설치 후 검증까지의 전체 제한 시간 (초)
    pub timeout_secs: u64,
    /// Verify 폴링 간격 (초)
    pub verify_poll_interval_secs: u64,
    /// 활성화 시 재부팅하지 않고 별도로 재부팅 요청
    pub no_reboot: bool,
    /// 이중화 장비에서 스탠바이에도 설치/활성화
    pub install_standby: bool,
    /// 관리 플레인의 software-version으로 교차 검증
    pub check_software_version: bool,
    /// 강제 전송 후 이미지 파일 타임스탬프 갱신 확인
    pub check_image_refresh: bool,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            image_path: String::new(),
            target_version: String::new(),
            build_info_path: String::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            timeout_secs: 30 * 60,
            verify_poll_interval_secs: 60,
            no_reboot: false,
            install_standby: true,
            check_software_version: true,
            check_image_refresh: false,
        }
    }
}

/// 재부팅 대기 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootConfig {
    /// 장비가 다시 응답할 때까지 최대 대기 시간 (초)
    pub max_boot_secs: u64,
    /// 생존 확인 간격 (초)
    pub poll_interval_secs: u64,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            max_boot_secs: 5 * 60,
            poll_interval_secs: 30,
        }
    }
}

/// 스위치오버 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchoverConfig {
    /// 스위치오버 실행 여부
    pub enabled: bool,
    /// 액티브가 switchover-ready를 보고할 때까지 대기 (초)
    pub ready_timeout_secs: u64,
    /// 새 액티브가 응답할 때까지 최대 대기 (초)
    pub max_switchover_secs: u64,
    /// 생존 확인 간격 (초)
    pub poll_interval_secs: u64,
    /// 인터페이스 복구 대기 (초)
    pub interface_recovery_secs: u64,
    /// last-switchover-time 출현 대기 (초)
    pub last_switchover_time_secs: u64,
}

impl Default for SwitchoverConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ready_timeout_secs: 30 * 60,
            max_switchover_secs: 900,
            poll_interval_secs: 30,
            interface_recovery_secs: 5 * 60,
            last_switchover_time_secs: 60,
        }
    }
}

/// 다중 장비 실행 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// 동시에 실행할 장비 워커 수 상한
    pub max_concurrent_devices: usize,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            max_concurrent_devices: 16,
        }
    }
}

/// Prometheus 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 메트릭 엔드포인트 활성화 여부
    pub enabled: bool,
    /// 바인딩 주소
    pub listen_addr: String,
    /// 포트
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9100,
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

fn override_u16(target: &mut u16, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u16>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u16 from env var, ignoring"
            ),
        }
    }
}
