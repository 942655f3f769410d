//! 제한 시간이 있는 재시도 조합자
//!
//! 검증, 스위치오버, 재부팅 후 클라이언트 재연결이 모두 같은 루프를 씁니다.
//! 마감 시각은 루프 진입 시 한 번만 계산하며, 대기 간격은 고정입니다.
//! 마감 이후에는 프로브가 에러를 내는 한 절대 성공을 보고하지 않습니다.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use osinstall_core::metrics as m;

use crate::error::EngineError;

/// 재시도 정책
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 프로브 사이 대기 간격
    pub interval: Duration,
    /// 최대 대기 시간
    pub max_duration: Duration,
    /// 첫 프로브 전 대기 시간
    pub initial_delay: Duration,
}

impl RetryPolicy {
    /// 초기 대기 없는 정책을 생성합니다.
    pub fn new(interval: Duration, max_duration: Duration) -> Self {
        Self {
            interval,
            max_duration,
            initial_delay: Duration::ZERO,
        }
    }

    /// 첫 프로브 전 대기 시간을 설정합니다.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// 장비가 이미 응답하는 상태에서 클라이언트를 다시 연결할 때 쓰는 정책
    ///
    /// 간격과 상한은 그대로 두고 초기 대기만 없앱니다.
    pub fn for_reconnect(&self) -> Self {
        Self::new(self.interval, self.max_duration)
    }
}

/// 프로브 한 번의 결과
#[derive(Debug)]
pub enum Attempt<T> {
    /// 조건 충족
    Ready(T),
    /// 아직 준비되지 않음 (사유)
    Retry(String),
    /// 재시도해도 소용없는 실패
    Fatal(EngineError),
}

/// 프로브가 `Ready`를 돌려줄 때까지 고정 간격으로 재시도합니다.
///
/// # Errors
///
/// - 프로브가 `Fatal`을 돌려주면 그 에러를 그대로 반환합니다.
/// - `max_duration`이 지나면 경과 시간을 담은 [`EngineError::Timeout`]을 반환합니다.
pub async fn retry_until<T, F, Fut>(
    operation: &str,
    policy: &RetryPolicy,
    mut probe: F,
) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let start = Instant::now();
    let deadline = start + policy.max_duration;

    if !policy.initial_delay.is_zero() {
        tokio::time::sleep_until((start + policy.initial_delay).min(deadline)).await;
    }

    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let outcome = match tokio::time::timeout_at(deadline, probe()).await {
            Ok(outcome) => outcome,
            Err(_elapsed) => Attempt::Retry("probe did not answer before deadline".to_owned()),
        };

        match outcome {
            Attempt::Ready(value) => {
                debug!(
                    operation,
                    attempt,
                    elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "condition reached"
                );
                return Ok(value);
            }
            Attempt::Fatal(err) => return Err(err),
            Attempt::Retry(reason) => {
                let now = Instant::now();
                if now >= deadline {
                    let elapsed = now - start;
                    warn!(
                        operation,
                        attempt,
                        elapsed_secs = elapsed.as_secs(),
                        last_reason = %reason,
                        "polling deadline exceeded"
                    );
                    metrics::counter!(
                        m::POLL_TIMEOUTS_TOTAL,
                        m::LABEL_OPERATION => operation.to_owned()
                    )
                    .increment(1);
                    return Err(EngineError::Timeout {
                        operation: operation.to_owned(),
                        elapsed,
                    });
                }

                debug!(operation, attempt, reason = %reason, "not ready, retrying");
                tokio::time::sleep(policy.interval.min(deadline - now)).await;
            }
        }
    }
}

/// 프로브가 에러 없이 끝날 때까지 재시도합니다.
///
/// 에러 내용은 보지 않습니다. 재부팅 중인 장비는 어떤 에러든 낼 수 있습니다.
pub async fn wait_ready<T, E, F, Fut>(
    operation: &str,
    policy: &RetryPolicy,
    mut probe: F,
) -> Result<T, EngineError>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_until(operation, policy, || {
        let fut = probe();
        async move {
            match fut.await {
                Ok(value) => Attempt::Ready(value),
                Err(e) => Attempt::Retry(e.to_string()),
            }
        }
    })
    .await
}
