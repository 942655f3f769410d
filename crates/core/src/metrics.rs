//! 메트릭 상수
//!
//! 설치 엔진이 기록하는 메트릭의 이름을 중앙에서 정의합니다.
//! 엔진은 이 상수로 `metrics::counter!()`, `metrics::histogram!()`
//! 매크로를 호출합니다. recorder 설치는 실행 환경의 몫입니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `osinstall_`
//! - 접미어: `_total` (counter), `_seconds` (histogram)

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 결과 레이블 키 (success, expected_failure, failure, skipped)
pub const LABEL_RESULT: &str = "result";

/// 대상 슈퍼바이저 레이블 키 (active, standby)
pub const LABEL_UNIT: &str = "unit";

/// 폴링 작업 레이블 키 (verify, boot, switchover 등)
pub const LABEL_OPERATION: &str = "operation";

// ─── Install ───────────────────────────────────────────────────────

/// 업로드한 이미지 바이트 수 (counter)
pub const INSTALL_BYTES_SENT_TOTAL: &str = "osinstall_install_bytes_sent_total";

/// 완료된 전송 세션 수 (counter, label: result, unit)
pub const INSTALL_TRANSFERS_TOTAL: &str = "osinstall_install_transfers_total";

/// 수신한 진행 이벤트 수 (counter)
pub const INSTALL_PROGRESS_EVENTS_TOTAL: &str = "osinstall_install_progress_events_total";

// ─── Activate / Verify ─────────────────────────────────────────────

/// 활성화 요청 수 (counter, label: result, unit)
pub const ACTIVATIONS_TOTAL: &str = "osinstall_activations_total";

/// Verify 재시도 수 (counter)
pub const VERIFY_RETRIES_TOTAL: &str = "osinstall_verify_retries_total";

// ─── Switchover ────────────────────────────────────────────────────

/// 스위치오버 시도 수 (counter, label: result)
pub const SWITCHOVERS_TOTAL: &str = "osinstall_switchovers_total";

/// 스위치오버 소요 시간 (histogram, 초)
pub const SWITCHOVER_DURATION_SECONDS: &str = "osinstall_switchover_duration_seconds";

// ─── Poller ────────────────────────────────────────────────────────

/// 제한 시간 초과로 끝난 폴링 루프 수 (counter, label: operation)
pub const POLL_TIMEOUTS_TOTAL: &str = "osinstall_poll_timeouts_total";

// ─── Worker ────────────────────────────────────────────────────────

/// 장비별 설치 계획 실행 수 (counter, label: result)
pub const DEVICE_RUNS_TOTAL: &str = "osinstall_device_runs_total";

/// 설치 계획 전체 소요 시간 (histogram, 초)
pub const DEVICE_RUN_DURATION_SECONDS: &str = "osinstall_device_run_duration_seconds";

// ─── Fleet ─────────────────────────────────────────────────────────

/// 현재 실행 중인 장비 워커 수 (gauge)
pub const FLEET_WORKERS_ACTIVE: &str = "osinstall_fleet_workers_active";

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    describe_counter!(
        INSTALL_BYTES_SENT_TOTAL,
        "Total image bytes streamed to devices"
    );
    describe_counter!(
        INSTALL_TRANSFERS_TOTAL,
        "Install stream sessions by result and target supervisor"
    );
    describe_counter!(
        INSTALL_PROGRESS_EVENTS_TOTAL,
        "Progress events received on install streams"
    );
    describe_counter!(
        ACTIVATIONS_TOTAL,
        "Activation requests by result and target supervisor"
    );
    describe_counter!(VERIFY_RETRIES_TOTAL, "OS.Verify polls that had to be retried");
    describe_counter!(SWITCHOVERS_TOTAL, "Supervisor switchovers by result");
    describe_histogram!(
        SWITCHOVER_DURATION_SECONDS,
        "Time from switch request until the new active supervisor answers"
    );
    describe_counter!(POLL_TIMEOUTS_TOTAL, "Polling loops that hit their deadline");
    describe_counter!(DEVICE_RUNS_TOTAL, "Per-device install plan runs by result");
    describe_histogram!(
        DEVICE_RUN_DURATION_SECONDS,
        "Wall-clock duration of a per-device install plan"
    );
    describe_gauge!(FLEET_WORKERS_ACTIVE, "Device workers currently running");
}
