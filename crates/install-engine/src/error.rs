//! 설치 엔진 에러 타입
//!
//! [`EngineError`]는 설치 엔진 내부에서 발생하는 모든 실패를 분류합니다.
//! `From<EngineError> for OsInstallError` 변환이 구현되어 있어
//! 러너 레이어에서 `?` 연산자로 전파할 수 있습니다.

use std::time::Duration;

use osinstall_core::error::{DeviceError, OsInstallError};
use osinstall_core::types::{ActivationErrorKind, InstallErrorKind, RpcStatus};

use crate::switchover::SwitchoverPhase;

/// 설치 엔진 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// RPC/연결 실패
    #[error("transport error: {0}")]
    Transport(#[from] RpcStatus),

    /// 응답이 기대한 순서/타입/토폴로지와 맞지 않음
    #[error("protocol error: {0}")]
    Protocol(String),

    /// 요청한 버전과 장비 보고 버전이 다름
    #[error("version mismatch: expected '{expected}', got '{actual}'")]
    VersionMismatch {
        /// 기대 버전
        expected: String,
        /// 장비가 보고한 버전
        actual: String,
    },

    /// 폴링 루프 제한 시간 초과
    #[error("{operation} timed out after {:.1}s", .elapsed.as_secs_f64())]
    Timeout {
        /// 폴링 작업 이름
        operation: String,
        /// 경과 시간
        elapsed: Duration,
    },

    /// 장비가 보고한 설치 에러
    #[error("installation error {kind}: {detail}")]
    Install {
        /// 에러 유형
        kind: InstallErrorKind,
        /// 상세 메시지
        detail: String,
    },

    /// 장비가 보고한 활성화 에러
    #[error("activation error {kind}: {detail}")]
    Activation {
        /// 에러 유형
        kind: ActivationErrorKind,
        /// 상세 메시지
        detail: String,
    },

    /// Verify가 활성화 실패 메시지를 보고함
    #[error("{unit} activation failed: {message}")]
    ActivationFailed {
        /// 대상 슈퍼바이저 (active, standby)
        unit: &'static str,
        /// 장비 메시지
        message: String,
    },

    /// 설치 이미지 읽기 실패
    #[error("content source error: {0}")]
    Content(String),

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 스위치오버 단계별 실패
    #[error("switchover failed during {phase}: {source}")]
    Switchover {
        /// 실패한 단계
        phase: SwitchoverPhase,
        /// 원인
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// 이 실패 이후 같은 작업을 다시 시도해도 안전한지 여부
    ///
    /// 스위치오버 사전 조건 단계의 실패만 변경 요청 전에 중단된 것입니다.
    pub fn is_retry_safe(&self) -> bool {
        match self {
            Self::Switchover { phase, .. } => *phase == SwitchoverPhase::PreconditionCheck,
            _ => false,
        }
    }

    /// 에러가 감싸고 있는 실제 원인
    pub fn root(&self) -> &EngineError {
        match self {
            Self::Switchover { source, .. } => source.root(),
            other => other,
        }
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }
}

impl From<EngineError> for OsInstallError {
    fn from(err: EngineError) -> Self {
        let device = match err {
            EngineError::Transport(status) => DeviceError::Transport(status.to_string()),
            EngineError::Protocol(msg) => DeviceError::Protocol(msg),
            EngineError::VersionMismatch { expected, actual } => {
                DeviceError::VersionMismatch { expected, actual }
            }
            EngineError::Timeout { operation, elapsed } => DeviceError::Timeout {
                operation,
                elapsed_secs: elapsed.as_secs(),
            },
            EngineError::Install { .. }
            | EngineError::Activation { .. }
            | EngineError::ActivationFailed { .. } => DeviceError::Reported(err.to_string()),
            EngineError::Content(msg) => {
                return OsInstallError::Io(std::io::Error::other(msg));
            }
            EngineError::Config { field, reason } => {
                return OsInstallError::Config(osinstall_core::ConfigError::InvalidValue {
                    field,
                    reason,
                });
            }
            EngineError::Switchover { .. } => DeviceError::Protocol(err.to_string()),
        };
        OsInstallError::Device(device)
    }
}
