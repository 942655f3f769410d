//! 에러 타입: 도메인별 에러 정의

/// OS install 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum OsInstallError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 장비 동작 에러 (전송, 프로토콜, 타임아웃 등)
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 장비 동작 에러
///
/// 엔진 크레이트의 세부 에러가 워커 경계를 넘을 때 이 분류로 축약됩니다.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// RPC/연결 실패
    #[error("transport error: {0}")]
    Transport(String),

    /// 응답 순서나 타입이 토폴로지 기대와 다름
    #[error("protocol error: {0}")]
    Protocol(String),

    /// 요청한 버전과 장비가 보고한 버전이 다름
    #[error("version mismatch: expected '{expected}', got '{actual}'")]
    VersionMismatch { expected: String, actual: String },

    /// 제한 시간 초과
    #[error("{operation} timed out after {elapsed_secs}s")]
    Timeout { operation: String, elapsed_secs: u64 },

    /// 장비가 보고한 설치/활성화 에러
    #[error("device reported: {0}")]
    Reported(String),
}
