//! 활성화 컨트롤러
//!
//! Activate 요청을 보내고 응답을 호출자의 기대와 비교해 분류합니다.
//! 기대한 실패는 음성 테스트의 정상 결과로 취급하며, 그 밖의 에러 응답은
//! 워커를 중단시킵니다. 전송 실패는 기대와 무관하게 항상 치명적입니다.

use std::fmt;

use tracing::{error, info, warn};

use osinstall_core::metrics as m;
use osinstall_core::types::{ActivateRequest, ActivationErrorKind, ActivationOutcome};

use crate::client::OsClient;
use crate::error::EngineError;

/// 호출자가 기대하는 활성화 실패
///
/// 유형과 상세 메시지 부분 문자열을 따로 비교합니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedFailure {
    /// 기대 에러 유형 (None이면 유형 무관)
    pub kind: Option<ActivationErrorKind>,
    /// 상세 메시지에 포함되어야 하는 문자열
    pub detail_contains: String,
}

impl ExpectedFailure {
    /// 상세 메시지만 비교하는 기대 실패를 생성합니다.
    pub fn containing(detail: impl Into<String>) -> Self {
        Self {
            kind: None,
            detail_contains: detail.into(),
        }
    }

    /// 기대 에러 유형을 지정합니다.
    pub fn with_kind(mut self, kind: ActivationErrorKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// 유형이 있는 에러 응답과 비교합니다.
    pub fn matches_error(&self, kind: ActivationErrorKind, detail: &str) -> bool {
        self.kind.is_none_or(|want| want == kind) && detail.contains(&self.detail_contains)
    }

    /// 알 수 없는 응답의 원문과 비교합니다.
    ///
    /// 원문에는 유형 정보가 없으므로 부분 문자열만 봅니다.
    pub fn matches_raw(&self, raw: &str) -> bool {
        raw.contains(&self.detail_contains)
    }
}

impl fmt::Display for ExpectedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            Some(kind) => write!(f, "{kind} containing '{}'", self.detail_contains),
            None => write!(f, "error containing '{}'", self.detail_contains),
        }
    }
}

/// 활성화 결과 분류
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationResult {
    /// 활성화 성공
    Activated,
    /// 기대한 실패가 관찰됨
    ExpectedFailure {
        /// 장비 응답
        outcome: ActivationOutcome,
    },
}

/// 활성화 요청 파라미터
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivateParams {
    /// 활성화할 버전
    pub version: String,
    /// 스탠바이 슈퍼바이저 대상
    pub standby: bool,
    /// 활성화 후 재부팅하지 않음
    pub no_reboot: bool,
    /// 기대 실패
    pub expected_failure: Option<ExpectedFailure>,
}

impl ActivateParams {
    /// 액티브 슈퍼바이저에 대한 활성화 파라미터를 생성합니다.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            standby: false,
            no_reboot: false,
            expected_failure: None,
        }
    }

    /// 스탠바이 대상 여부를 설정합니다.
    pub fn standby(mut self, standby: bool) -> Self {
        self.standby = standby;
        self
    }

    /// 재부팅 생략 여부를 설정합니다.
    pub fn no_reboot(mut self, no_reboot: bool) -> Self {
        self.no_reboot = no_reboot;
        self
    }

    /// 기대 실패를 설정합니다.
    pub fn expect_failure(mut self, expected: ExpectedFailure) -> Self {
        self.expected_failure = Some(expected);
        self
    }

    fn unit(&self) -> &'static str {
        if self.standby { "standby" } else { "active" }
    }
}

/// 활성화를 요청하고 결과를 분류합니다.
///
/// # Errors
///
/// - 전송 실패: `Transport`
/// - 기대와 다른 에러 응답: `Activation`
/// - 기대와 다른 알 수 없는 응답: `Protocol`
pub async fn activate<O: OsClient>(
    os: &O,
    params: &ActivateParams,
) -> Result<ActivationResult, EngineError> {
    let unit = params.unit();
    info!(version = %params.version, unit, no_reboot = params.no_reboot, "OS.Activate started");

    let request = ActivateRequest {
        standby_supervisor: params.standby,
        version: params.version.clone(),
        no_reboot: params.no_reboot,
    };
    let outcome = match os.activate(request).await {
        Ok(outcome) => outcome,
        Err(status) => {
            error!(unit, error = %status, "OS.Activate request failed");
            record(unit, "failure");
            return Err(EngineError::Transport(status));
        }
    };

    let result = classify(outcome, params.expected_failure.as_ref());
    match &result {
        Ok(ActivationResult::Activated) => {
            info!(unit, "OS.Activate complete");
            record(unit, "success");
        }
        Ok(ActivationResult::ExpectedFailure { outcome }) => {
            info!(unit, outcome = %outcome, "OS.Activate failed as expected");
            record(unit, "expected_failure");
        }
        Err(e) => {
            error!(unit, error = %e, "OS.Activate returned an unexpected error");
            record(unit, "failure");
        }
    }
    result
}

fn classify(
    outcome: ActivationOutcome,
    expected: Option<&ExpectedFailure>,
) -> Result<ActivationResult, EngineError> {
    match outcome {
        ActivationOutcome::Ok => {
            if let Some(expected) = expected {
                warn!(expected = %expected, "activation succeeded where a failure was expected");
            }
            Ok(ActivationResult::Activated)
        }
        ActivationOutcome::Error { kind, detail } => match expected {
            Some(want) if want.matches_error(kind, &detail) => Ok(ActivationResult::ExpectedFailure {
                outcome: ActivationOutcome::Error { kind, detail },
            }),
            _ => Err(EngineError::Activation { kind, detail }),
        },
        ActivationOutcome::Unknown { raw } => match expected {
            Some(want) if want.matches_raw(&raw) => Ok(ActivationResult::ExpectedFailure {
                outcome: ActivationOutcome::Unknown { raw },
            }),
            _ => Err(EngineError::protocol(format!(
                "unexpected activate response: {raw}"
            ))),
        },
    }
}

fn record(unit: &'static str, result: &'static str) {
    metrics::counter!(m::ACTIVATIONS_TOTAL, m::LABEL_RESULT => result, m::LABEL_UNIT => unit)
        .increment(1);
}
