//! 도메인 타입: 장비와 주고받는 프로토콜 데이터 모델
//!
//! 설치 스트림, 활성화, 검증, 재부팅, 스위치오버 RPC의 요청/응답을
//! 전송 방식과 무관한 형태로 정의합니다. 각 응답 유니온은 닫힌 합 타입이므로
//! 호출 측은 모든 변형을 빠짐없이 매칭해야 합니다.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// RPC 상태 코드
///
/// 재부팅 구간을 판별하는 데 필요한 코드만 구분합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    /// 취소됨
    Cancelled,
    /// 알 수 없는 에러
    Unknown,
    /// 잘못된 인자
    InvalidArgument,
    /// 기한 초과
    DeadlineExceeded,
    /// 대상 없음
    NotFound,
    /// 사전 조건 불충족
    FailedPrecondition,
    /// 중단됨
    Aborted,
    /// 자원 고갈
    ResourceExhausted,
    /// 미구현
    Unimplemented,
    /// 내부 에러
    Internal,
    /// 서비스 사용 불가 (재부팅 중)
    Unavailable,
    /// 권한 없음
    PermissionDenied,
    /// 인증 실패
    Unauthenticated,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Cancelled => "Cancelled",
            Self::Unknown => "Unknown",
            Self::InvalidArgument => "InvalidArgument",
            Self::DeadlineExceeded => "DeadlineExceeded",
            Self::NotFound => "NotFound",
            Self::FailedPrecondition => "FailedPrecondition",
            Self::Aborted => "Aborted",
            Self::ResourceExhausted => "ResourceExhausted",
            Self::Unimplemented => "Unimplemented",
            Self::Internal => "Internal",
            Self::Unavailable => "Unavailable",
            Self::PermissionDenied => "PermissionDenied",
            Self::Unauthenticated => "Unauthenticated",
        };
        f.write_str(name)
    }
}

/// RPC 실패 상태
///
/// 바인딩 레이어가 돌려주는 전송 수준 에러입니다.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("rpc error: code = {code} desc = {message}")]
pub struct RpcStatus {
    /// 상태 코드
    pub code: StatusCode,
    /// 상세 메시지
    pub message: String,
}

impl RpcStatus {
    /// 새 상태를 생성합니다.
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// `Unavailable` 상태를 생성합니다.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unavailable, message)
    }

    /// 장비가 재부팅 중이라 서비스가 응답하지 않는 상태인지 여부
    pub fn is_unavailable(&self) -> bool {
        self.code == StatusCode::Unavailable
    }
}

// --- Install 스트림 ---

/// 클라이언트가 Install 스트림으로 보내는 메시지
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallRequest {
    /// 전송 시작 요청 (스트림의 첫 메시지)
    TransferRequest {
        /// 요청 버전 (빈 문자열이면 강제 설치)
        version: String,
        /// 스탠바이 슈퍼바이저 대상 여부
        standby_supervisor: bool,
    },
    /// 이미지 조각
    TransferContent(Bytes),
    /// 전송 종료
    TransferEnd,
}

/// 장비가 보고한 설치 에러 유형
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstallErrorKind {
    /// 미지정
    Unspecified,
    /// 호환되지 않는 이미지
    Incompatible,
    /// 이미지가 너무 큼 (디스크 부족)
    TooLarge,
    /// 이미지 파싱 실패
    ParseFail,
    /// 무결성 검증 실패
    IntegrityFail,
    /// 설치 패키지 실행 실패
    InstallRunPackage,
    /// 다른 설치가 진행 중
    InstallInProgress,
    /// 설치 중 예기치 않은 스위치오버
    UnexpectedSwitchover,
    /// 스탠바이 동기화 실패
    SyncFail,
    /// 백업 슈퍼바이저에서 지원되지 않음
    NotSupportedOnBackup,
    /// 저장된 이미지가 너무 많음
    TooManyImages,
}

impl InstallErrorKind {
    /// 장비 프로토콜에서 쓰이는 유형 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unspecified => "UNSPECIFIED",
            Self::Incompatible => "INCOMPATIBLE",
            Self::TooLarge => "TOO_LARGE",
            Self::ParseFail => "PARSE_FAIL",
            Self::IntegrityFail => "INTEGRITY_FAIL",
            Self::InstallRunPackage => "INSTALL_RUN_PACKAGE",
            Self::InstallInProgress => "INSTALL_IN_PROGRESS",
            Self::UnexpectedSwitchover => "UNEXPECTED_SWITCHOVER",
            Self::SyncFail => "SYNC_FAIL",
            Self::NotSupportedOnBackup => "NOT_SUPPORTED_ON_BACKUP",
            Self::TooManyImages => "TOO_MANY_IMAGES",
        }
    }
}

impl fmt::Display for InstallErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 장비가 Install 스트림으로 보내는 상태 이벤트
///
/// 첫 응답 이후의 진행 이벤트는 반드시 `Validated`보다 먼저 와야 합니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusEvent {
    /// 이미지 수신 준비 완료
    TransferReady,
    /// 이미지 검증 완료
    Validated {
        /// 장비가 인식한 버전
        version: String,
    },
    /// 액티브에서 스탠바이로의 동기화 진행률
    SyncProgress {
        /// 동기화 비율 (0-100)
        percentage_transferred: u32,
    },
    /// 장비가 수신한 바이트 수
    TransferProgress {
        /// 누적 수신 바이트
        bytes_received: u64,
    },
    /// 설치 에러
    InstallError {
        /// 에러 유형
        kind: InstallErrorKind,
        /// 상세 메시지
        detail: String,
    },
}

impl StatusEvent {
    /// 로그/메트릭 태그용 고정된 이벤트명
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::TransferReady => "transfer_ready",
            Self::Validated { .. } => "validated",
            Self::SyncProgress { .. } => "sync_progress",
            Self::TransferProgress { .. } => "transfer_progress",
            Self::InstallError { .. } => "install_error",
        }
    }
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransferReady => write!(f, "transfer_ready"),
            Self::Validated { version } => write!(f, "validated(version={version})"),
            Self::SyncProgress {
                percentage_transferred,
            } => write!(f, "sync_progress({percentage_transferred}%)"),
            Self::TransferProgress { bytes_received } => {
                write!(f, "transfer_progress({bytes_received} bytes)")
            }
            Self::InstallError { kind, detail } => write!(f, "install_error({kind}: {detail})"),
        }
    }
}

// --- Activate ---

/// 활성화 요청
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivateRequest {
    /// 스탠바이 슈퍼바이저 대상 여부
    pub standby_supervisor: bool,
    /// 활성화할 버전
    pub version: String,
    /// 활성화 후 재부팅하지 않음
    pub no_reboot: bool,
}

/// 장비가 보고한 활성화 에러 유형
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivationErrorKind {
    /// 미지정
    Unspecified,
    /// 존재하지 않는 버전
    NonExistentVersion,
    /// 백업 슈퍼바이저에서 지원되지 않음
    NotSupportedOnBackup,
}

impl ActivationErrorKind {
    /// 장비 프로토콜에서 쓰이는 유형 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unspecified => "UNSPECIFIED",
            Self::NonExistentVersion => "NON_EXISTENT_VERSION",
            Self::NotSupportedOnBackup => "NOT_SUPPORTED_ON_BACKUP",
        }
    }
}

impl fmt::Display for ActivationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 활성화 응답
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationOutcome {
    /// 활성화 성공
    Ok,
    /// 유형이 있는 활성화 에러
    Error {
        /// 에러 유형
        kind: ActivationErrorKind,
        /// 상세 메시지
        detail: String,
    },
    /// 알 수 없는 응답 (원문 보존)
    Unknown {
        /// 원문
        raw: String,
    },
}

impl fmt::Display for ActivationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "activate_ok"),
            Self::Error { kind, detail } => write!(f, "activate_error({kind}: {detail})"),
            Self::Unknown { raw } => write!(f, "unknown({raw})"),
        }
    }
}

// --- Verify ---

/// 활성화 진행 중임을 나타내는 일시적 실패 메시지
///
/// 재부팅이 아직 시작되지 않았을 때 장비가 보고합니다.
pub const ACTIVATION_IN_PROGRESS: &str = "in-progress";

/// 스탠바이 슈퍼바이저가 응답을 줄 수 없는 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StandbyState {
    /// 장비가 이중화 슈퍼바이저를 지원하지 않음
    Unsupported,
    /// 스탠바이 슈퍼바이저가 없음
    NonExistent,
    /// 스탠바이가 있지만 사용할 수 없음
    Unavailable,
}

/// 스탠바이 슈퍼바이저의 검증 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandbyVerify {
    /// 스탠바이 식별자
    pub id: String,
    /// 실행 중인 버전
    pub version: String,
    /// 활성화 실패 메시지 (빈 문자열이면 정상)
    pub activation_fail_message: String,
}

/// Verify 응답의 스탠바이 부분
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerifyStandby {
    /// 스탠바이 상태만 보고됨
    State(StandbyState),
    /// 스탠바이 검증 결과
    Response(StandbyVerify),
}

/// Verify 응답
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResult {
    /// 실행 중인 버전
    pub version: String,
    /// 활성화 실패 메시지 (빈 문자열이면 정상)
    pub activation_fail_message: String,
    /// 스탠바이 부분 결과
    pub standby: Option<VerifyStandby>,
}

impl VerifyResult {
    /// 스탠바이 검증 결과가 있으면 반환합니다.
    pub fn standby_response(&self) -> Option<&StandbyVerify> {
        match &self.standby {
            Some(VerifyStandby::Response(r)) => Some(r),
            _ => None,
        }
    }
}

/// 슈퍼바이저 구성
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Topology {
    /// 단일 슈퍼바이저
    SingleSupervisor,
    /// 액티브 + 스탠바이 슈퍼바이저
    DualSupervisor,
}

impl Topology {
    /// 이중화 구성 여부
    pub fn is_dual(&self) -> bool {
        matches!(self, Self::DualSupervisor)
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SingleSupervisor => write!(f, "single-supervisor"),
            Self::DualSupervisor => write!(f, "dual-supervisor"),
        }
    }
}

// --- System ---

/// 재부팅 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RebootMethod {
    /// 전원 재시작 수준의 재부팅
    Cold,
    /// 소프트웨어 재시작
    Warm,
    /// 정지
    Halt,
}

/// 재부팅 요청
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebootRequest {
    /// 재부팅 방식
    pub method: RebootMethod,
    /// 진행 중인 작업을 무시하고 강제 실행
    pub force: bool,
    /// 장비에 기록될 사유
    pub message: String,
}

/// 스위치오버 응답
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchoverResponse {
    /// 새 액티브가 된 컨트롤 프로세서
    pub control_processor: String,
    /// 새 액티브의 소프트웨어 버전
    pub version: String,
    /// 새 액티브의 가동 시간 (나노초)
    pub uptime_ns: u64,
}

/// 컨트롤 카드의 이중화 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedundantRole {
    /// 액티브
    Primary,
    /// 스탠바이
    Secondary,
}

/// 컨트롤 프로세서 컴포넌트
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlProcessor {
    /// 컴포넌트 이름
    pub name: String,
    /// 이중화 역할 (보고되지 않으면 None)
    pub role: Option<RedundantRole>,
}

/// 마지막 스위치오버 사유
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchoverReason {
    /// 트리거 (예: USER_INITIATED)
    pub trigger: String,
    /// 상세 설명
    pub details: String,
}

/// 스위치오버 1회의 전후 기록
///
/// 성공한 스위치오버는 `active_after == standby_before`,
/// `standby_after == active_before`를 만족합니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchoverRecord {
    /// 스위치오버 전 스탠바이
    pub standby_before: String,
    /// 스위치오버 전 액티브
    pub active_before: String,
    /// 스위치오버 후 스탠바이
    pub standby_after: String,
    /// 스위치오버 후 액티브
    pub active_after: String,
    /// 응답에 담긴 버전
    pub response_version: String,
    /// 응답에 담긴 가동 시간 (나노초)
    pub response_uptime_ns: u64,
    /// 요청부터 새 액티브 응답까지 걸린 시간
    pub elapsed: Duration,
    /// 텔레메트리의 마지막 스위치오버 시각
    pub last_switchover_time: Option<u64>,
    /// 텔레메트리의 마지막 스위치오버 사유
    pub last_switchover_reason: Option<SwitchoverReason>,
}

impl SwitchoverRecord {
    /// 역할이 정확히 맞바뀌었는지 확인합니다.
    pub fn is_exact_swap(&self) -> bool {
        self.active_after == self.standby_before && self.standby_after == self.active_before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_status_unavailable_detection() {
        assert!(RpcStatus::unavailable("rebooting").is_unavailable());
        assert!(!RpcStatus::new(StatusCode::Internal, "boom").is_unavailable());
    }

    #[test]
    fn rpc_status_display_includes_code_and_message() {
        let status = RpcStatus::new(StatusCode::NotFound, "no such file");
        let msg = status.to_string();
        assert!(msg.contains("NotFound"));
        assert!(msg.contains("no such file"));
    }

    #[test]
    fn install_error_display_contains_kind_and_detail() {
        let event = StatusEvent::InstallError {
            kind: InstallErrorKind::TooLarge,
            detail: "Too large, no disk space".to_owned(),
        };
        let text = event.to_string();
        assert!(text.contains("TOO_LARGE"));
        assert!(text.contains("no disk space"));
    }

    #[test]
    fn status_event_kind_name_is_fixed() {
        assert_eq!(
            StatusEvent::TransferProgress { bytes_received: 1 }.kind_name(),
            "transfer_progress"
        );
        assert_eq!(
            StatusEvent::Validated {
                version: "x".to_owned()
            }
            .kind_name(),
            "validated"
        );
    }

    #[test]
    fn activation_outcome_display() {
        let outcome = ActivationOutcome::Error {
            kind: ActivationErrorKind::NonExistentVersion,
            detail: "version WRONG_VERSION doesn't exist".to_owned(),
        };
        assert!(outcome.to_string().contains("NON_EXISTENT_VERSION"));
        assert!(outcome.to_string().contains("doesn't exist"));
    }

    #[test]
    fn verify_result_standby_response() {
        let mut result = VerifyResult {
            version: "1.0".to_owned(),
            ..Default::default()
        };
        assert!(result.standby_response().is_none());

        result.standby = Some(VerifyStandby::State(StandbyState::NonExistent));
        assert!(result.standby_response().is_none());

        result.standby = Some(VerifyStandby::Response(StandbyVerify {
            id: "RP1".to_owned(),
            version: "1.0".to_owned(),
            activation_fail_message: String::new(),
        }));
        assert_eq!(result.standby_response().map(|s| s.id.as_str()), Some("RP1"));
    }

    #[test]
    fn switchover_record_swap_check() {
        let mut record = SwitchoverRecord {
            standby_before: "RP1".to_owned(),
            active_before: "RP0".to_owned(),
            standby_after: "RP0".to_owned(),
            active_after: "RP1".to_owned(),
            response_version: "25.1.1".to_owned(),
            response_uptime_ns: 1,
            elapsed: Duration::from_secs(30),
            last_switchover_time: None,
            last_switchover_reason: None,
        };
        assert!(record.is_exact_swap());

        record.standby_after = "RP1".to_owned();
        assert!(!record.is_exact_swap());
    }
}
