//! OS install 오케스트레이션 공통 크레이트
//!
//! 설치 엔진(`osinstall-engine`)과 러너(`osinstall-runner`)가 공유하는
//! 에러 분류, 설정, 프로토콜 데이터 타입, 메트릭 이름을 정의합니다.

pub mod config;
pub mod error;
pub mod metrics;
pub mod types;

// --- 주요 타입 re-export ---

// 에러
pub use error::{ConfigError, DeviceError, OsInstallError};

// 설정
pub use config::OsInstallConfig;

// 도메인 타입
pub use types::{
    ActivateRequest, ActivationErrorKind, ActivationOutcome, ControlProcessor, InstallErrorKind,
    InstallRequest, RebootMethod, RebootRequest, RedundantRole, RpcStatus, StandbyState,
    StandbyVerify, StatusCode, StatusEvent, SwitchoverReason, SwitchoverRecord,
    SwitchoverResponse, Topology, VerifyResult, VerifyStandby,
};
