//! 설치 스트림 상태 감시
//!
//! [`StatusWatcher`]는 첫 응답 이후의 상태 이벤트를 순서대로 분류하는
//! 순수 상태 머신이고, [`watch_status`]는 스트림 수신부를 소유하고
//! 종료 이벤트가 나올 때까지 이벤트를 공급합니다.
//!
//! # 상태 전이
//!
//! ```text
//! AwaitingFirstProgress --progress--> InProgress --progress--> InProgress
//!                                          |
//!                                     Validated{v} --> Validated
//! (any) --InstallError--> Errored
//! ```

use std::fmt;

use tracing::{debug, info};

use osinstall_core::metrics as m;
use osinstall_core::types::StatusEvent;

use crate::client::InstallSource;
use crate::error::EngineError;

/// 감시자 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    /// 첫 진행 이벤트 대기
    AwaitingFirstProgress,
    /// 진행 이벤트 수신 중
    InProgress,
    /// 검증 완료 (종료)
    Validated,
    /// 에러 (종료)
    Errored,
}

impl WatcherState {
    /// 종료 상태 여부
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Validated | Self::Errored)
    }
}

impl fmt::Display for WatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AwaitingFirstProgress => write!(f, "awaiting_first_progress"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Validated => write!(f, "validated"),
            Self::Errored => write!(f, "errored"),
        }
    }
}

/// 정상 종료 시 감시 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchOutcome {
    /// 장비가 검증한 버전
    pub version: String,
    /// 받은 진행 이벤트 수
    pub progress_events: u64,
    /// 마지막으로 보고된 수신 바이트 수
    pub bytes_received: u64,
}

/// 상태 이벤트 분류기
#[derive(Debug)]
pub struct StatusWatcher {
    expected_version: String,
    standby: bool,
    state: WatcherState,
    progress_events: u64,
    bytes_received: u64,
}

impl StatusWatcher {
    /// 새 감시자를 생성합니다.
    ///
    /// `expected_version`은 장비가 검증해야 할 이미지 버전입니다.
    pub fn new(expected_version: impl Into<String>, standby: bool) -> Self {
        Self {
            expected_version: expected_version.into(),
            standby,
            state: WatcherState::AwaitingFirstProgress,
            progress_events: 0,
            bytes_received: 0,
        }
    }

    /// 첫 응답이 이미 동기화 진행 이벤트였던 경우의 감시자를 생성합니다.
    pub fn after_sync_progress(expected_version: impl Into<String>) -> Self {
        let mut watcher = Self::new(expected_version, true);
        watcher.state = WatcherState::InProgress;
        watcher.progress_events = 1;
        watcher
    }

    /// 현재 상태
    pub fn state(&self) -> WatcherState {
        self.state
    }

    /// 지금까지 받은 진행 이벤트 수
    pub fn progress_events(&self) -> u64 {
        self.progress_events
    }

    /// 이벤트 하나를 처리합니다.
    ///
    /// 종료 이벤트면 `Some`, 계속 받아야 하면 `None`을 반환합니다.
    ///
    /// # Errors
    ///
    /// 순서/타입 위반은 `Protocol`, 장비 설치 에러는 `Install`로 반환되며
    /// 상태는 `Errored`가 됩니다.
    pub fn on_event(&mut self, event: StatusEvent) -> Result<Option<WatchOutcome>, EngineError> {
        let result = self.classify(event);
        if result.is_err() {
            self.state = WatcherState::Errored;
        }
        result
    }

    fn classify(&mut self, event: StatusEvent) -> Result<Option<WatchOutcome>, EngineError> {
        if self.state.is_terminal() {
            return Err(EngineError::protocol(format!(
                "install response after terminal state {}: {event}",
                self.state
            )));
        }

        match event {
            StatusEvent::InstallError { kind, detail } => Err(EngineError::Install { kind, detail }),
            StatusEvent::TransferProgress { bytes_received } => {
                if self.standby {
                    return Err(EngineError::protocol(format!(
                        "unexpected TransferProgress: got {bytes_received} bytes, want SyncProgress"
                    )));
                }
                debug!(bytes_received, "transfer progress");
                self.bytes_received = bytes_received;
                self.record_progress();
                Ok(None)
            }
            StatusEvent::SyncProgress {
                percentage_transferred,
            } => {
                if !self.standby {
                    return Err(EngineError::protocol(format!(
                        "unexpected SyncProgress: got {percentage_transferred}%, want TransferProgress"
                    )));
                }
                debug!(percentage_transferred, "synced from supervisor");
                self.record_progress();
                Ok(None)
            }
            StatusEvent::Validated { version } => {
                if self.state == WatcherState::AwaitingFirstProgress {
                    return Err(EngineError::protocol(
                        "transfer completed without progress status",
                    ));
                }
                if version != self.expected_version {
                    return Err(EngineError::protocol(format!(
                        "mismatched validation software versions: got {version}, want {}",
                        self.expected_version
                    )));
                }
                self.state = WatcherState::Validated;
                info!(
                    version = %version,
                    progress_events = self.progress_events,
                    "image validated"
                );
                Ok(Some(WatchOutcome {
                    version,
                    progress_events: self.progress_events,
                    bytes_received: self.bytes_received,
                }))
            }
            StatusEvent::TransferReady => Err(EngineError::protocol(
                "unexpected client install response: transfer_ready",
            )),
        }
    }

    fn record_progress(&mut self) {
        self.state = WatcherState::InProgress;
        self.progress_events += 1;
        metrics::counter!(m::INSTALL_PROGRESS_EVENTS_TOTAL).increment(1);
    }
}

/// 종료 이벤트가 나올 때까지 스트림을 읽습니다.
///
/// 첫 응답 이후 수신부의 유일한 소유자입니다.
///
/// # Errors
///
/// - 수신 실패: `Transport`
/// - 종료 이벤트 전에 스트림이 닫힘: `Protocol`
/// - [`StatusWatcher::on_event`]의 에러
pub async fn watch_status<S: InstallSource>(
    mut source: S,
    mut watcher: StatusWatcher,
) -> Result<WatchOutcome, EngineError> {
    loop {
        match source.recv().await {
            Ok(Some(event)) => {
                if let Some(outcome) = watcher.on_event(event)? {
                    return Ok(outcome);
                }
            }
            Ok(None) => {
                return Err(EngineError::protocol(format!(
                    "install stream closed in state {}",
                    watcher.state()
                )));
            }
            Err(status) => return Err(EngineError::Transport(status)),
        }
    }
}

#[cfg(test)]
mod tests {
    use osinstall_core::types::{InstallErrorKind, RpcStatus, StatusCode};

    use super::*;
    use crate::client::OsClient;
    use crate::client::mock::MockDevice;

    fn progress(bytes: u64) -> StatusEvent {
        StatusEvent::TransferProgress {
            bytes_received: bytes,
        }
    }

    fn validated(v: &str) -> StatusEvent {
        StatusEvent::Validated {
            version: v.to_owned(),
        }
    }

    #[test]
    fn progress_then_validated_completes() {
        let mut w = StatusWatcher::new("1.0", false);
        assert_eq!(w.state(), WatcherState::AwaitingFirstProgress);
        assert!(w.on_event(progress(10)).unwrap().is_none());
        assert!(w.on_event(progress(20)).unwrap().is_none());
        assert_eq!(w.state(), WatcherState::InProgress);

        let outcome = w.on_event(validated("1.0")).unwrap().unwrap();
        assert_eq!(outcome.progress_events, 2);
        assert_eq!(outcome.bytes_received, 20);
        assert_eq!(w.state(), WatcherState::Validated);
    }

    #[test]
    fn validated_without_progress_is_protocol_error() {
        let mut w = StatusWatcher::new("1.0", false);
        let err = w.on_event(validated("1.0")).unwrap_err();
        assert!(err.to_string().contains("without progress status"));
        assert_eq!(w.state(), WatcherState::Errored);
    }

    #[test]
    fn validated_with_wrong_version_is_protocol_error() {
        let mut w = StatusWatcher::new("1.0", false);
        w.on_event(progress(1)).unwrap();
        let err = w.on_event(validated("2.0")).unwrap_err();
        assert!(matches!(err, EngineError::Protocol(_)));
    }

    #[test]
    fn progress_kind_must_match_target() {
        let mut w = StatusWatcher::new("1.0", true);
        let err = w.on_event(progress(1)).unwrap_err();
        assert!(err.to_string().contains("want SyncProgress"));

        let mut w = StatusWatcher::new("1.0", false);
        let err = w
            .on_event(StatusEvent::SyncProgress {
                percentage_transferred: 5,
            })
            .unwrap_err();
        assert!(err.to_string().contains("want TransferProgress"));
    }

    #[test]
    fn install_error_propagates_typed() {
        let mut w = StatusWatcher::new("1.0", false);
        w.on_event(progress(1)).unwrap();
        let err = w
            .on_event(StatusEvent::InstallError {
                kind: InstallErrorKind::TooLarge,
                detail: "Too large, no disk space".to_owned(),
            })
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Install {
                kind: InstallErrorKind::TooLarge,
                ..
            }
        ));
        assert_eq!(w.state(), WatcherState::Errored);
    }

    #[test]
    fn events_after_terminal_state_are_rejected() {
        let mut w = StatusWatcher::new("1.0", false);
        w.on_event(progress(1)).unwrap();
        w.on_event(validated("1.0")).unwrap();
        assert!(w.on_event(progress(2)).is_err());
    }

    #[test]
    fn seeded_sync_progress_allows_immediate_validation() {
        let mut w = StatusWatcher::after_sync_progress("1.0");
        let outcome = w.on_event(validated("1.0")).unwrap().unwrap();
        assert_eq!(outcome.progress_events, 1);
    }

    #[tokio::test]
    async fn watch_status_reads_until_validated() {
        let device = MockDevice::new().with_install_events(vec![
            progress(100),
            progress(200),
            validated("1.0"),
        ]);
        let (_sink, source) = device.install().await.unwrap();
        let outcome = watch_status(source, StatusWatcher::new("1.0", false))
            .await
            .unwrap();
        assert_eq!(outcome.version, "1.0");
        assert_eq!(outcome.progress_events, 2);
    }

    #[tokio::test]
    async fn watch_status_early_close_is_protocol_error() {
        let device = MockDevice::new().with_install_events(vec![progress(100)]);
        let (_sink, source) = device.install().await.unwrap();
        let err = watch_status(source, StatusWatcher::new("1.0", false))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("stream closed"));
    }

    #[tokio::test]
    async fn watch_status_recv_failure_is_transport_error() {
        let device = MockDevice::new();
        device
            .script()
            .install_events
            .push_back(Err(RpcStatus::new(StatusCode::Internal, "reset")));
        let (_sink, source) = device.install().await.unwrap();
        let err = watch_status(source, StatusWatcher::new("1.0", false))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Transport(_)));
    }
}
