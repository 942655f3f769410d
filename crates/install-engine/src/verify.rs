//! Post-install verification and topology detection.
//!
//! [`verify_install`] polls `OS.Verify` after a reboot until the device runs
//! the expected version with a clean activation state, or the deadline
//! passes. Each poll is classified into retry or fatal:
//!
//! | observation                                   | action |
//! |-----------------------------------------------|--------|
//! | `Unavailable`                                 | retry  |
//! | other transport failure                       | fatal  |
//! | activation fail message `in-progress`         | retry  |
//! | any other activation fail message             | fatal  |
//! | running version differs                       | retry  |
//! | management-plane version missing or differs   | retry  |
//! | standby fail message (dual supervisor)        | fatal  |
//! | standby version differs or not reported       | retry  |

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info};

use osinstall_core::metrics as m;
use osinstall_core::types::{
    ACTIVATION_IN_PROGRESS, StandbyState, Topology, VerifyResult, VerifyStandby,
};

use crate::client::{OsClient, StateClient};
use crate::error::EngineError;
use crate::image::software_version_matches;
use crate::poller::{Attempt, RetryPolicy, retry_until};

/// Detects the supervisor topology from `OS.Verify`.
///
/// # Errors
///
/// - `Transport` if Verify fails
/// - `Protocol` if the standby supervisor exists but is unavailable
pub async fn detect_topology<O: OsClient>(os: &O) -> Result<Topology, EngineError> {
    let response = os.verify().await?;
    let topology = match response.standby {
        Some(VerifyStandby::Response(_)) => Topology::DualSupervisor,
        Some(VerifyStandby::State(StandbyState::Unavailable)) => {
            return Err(EngineError::protocol(
                "OS.Verify reports standby supervisor in UNAVAILABLE state",
            ));
        }
        Some(VerifyStandby::State(_)) | None => Topology::SingleSupervisor,
    };
    info!(topology = %topology, "supervisor topology detected");
    Ok(topology)
}

/// What the verifier must observe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyParams {
    /// Version the device must run
    pub expected_version: String,
    /// Also check the standby supervisor
    pub dual_supervisor: bool,
    /// Cross-check the management-plane software version
    pub check_software_version: bool,
}

impl VerifyParams {
    /// Verification of `version` on a single supervisor.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            expected_version: version.into(),
            dual_supervisor: false,
            check_software_version: false,
        }
    }

    /// Sets the topology.
    pub fn dual_supervisor(mut self, dual: bool) -> Self {
        self.dual_supervisor = dual;
        self
    }

    /// Enables the management-plane cross-check.
    pub fn check_software_version(mut self, check: bool) -> Self {
        self.check_software_version = check;
        self
    }
}

/// Successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    /// Running version on the active supervisor
    pub version: String,
    /// Running version on the standby supervisor, when checked
    pub standby_version: Option<String>,
    /// Polls made, including the successful one
    pub attempts: u32,
    /// Time spent polling
    pub elapsed: Duration,
}

/// Polls until the device runs `params.expected_version` cleanly.
///
/// `state` is used for the management-plane cross-check when
/// `params.check_software_version` is set.
///
/// # Errors
///
/// `Transport` and `ActivationFailed` are fatal immediately; otherwise
/// `Timeout` once `policy.max_duration` passes.
pub async fn verify_install<O, S>(
    os: &O,
    state: Option<&S>,
    params: &VerifyParams,
    policy: &RetryPolicy,
) -> Result<VerifyReport, EngineError>
where
    O: OsClient,
    S: StateClient,
{
    let start = Instant::now();
    let attempts = AtomicU32::new(0);
    let attempts_ref = &attempts;

    let result = retry_until("verify install", policy, move || async move {
        attempts_ref.fetch_add(1, Ordering::Relaxed);
        let attempt = check_once(os, state, params).await;
        if let Attempt::Retry(reason) = &attempt {
            debug!(reason = %reason, "install not verified yet");
            metrics::counter!(m::VERIFY_RETRIES_TOTAL).increment(1);
        }
        attempt
    })
    .await;

    match result {
        Ok((version, standby_version)) => {
            let report = VerifyReport {
                version,
                standby_version,
                attempts: attempts.load(Ordering::Relaxed),
                elapsed: start.elapsed(),
            };
            info!(
                version = %report.version,
                attempts = report.attempts,
                elapsed_secs = report.elapsed.as_secs(),
                "OS.Verify complete"
            );
            Ok(report)
        }
        Err(e) => {
            error!(expected = %params.expected_version, error = %e, "install verification failed");
            Err(e)
        }
    }
}

async fn check_once<O, S>(
    os: &O,
    state: Option<&S>,
    params: &VerifyParams,
) -> Attempt<(String, Option<String>)>
where
    O: OsClient,
    S: StateClient,
{
    let response = match os.verify().await {
        Ok(response) => response,
        Err(status) if status.is_unavailable() => {
            return Attempt::Retry("reboot in progress".to_owned());
        }
        Err(status) => return Attempt::Fatal(EngineError::Transport(status)),
    };

    if let Some(attempt) = check_activation("active", &response.activation_fail_message) {
        return attempt;
    }
    let expected = params.expected_version.as_str();
    if response.version != expected {
        return Attempt::Retry(format!(
            "reboot has not finished with the right version: got {}, want {expected}",
            response.version
        ));
    }

    if params.check_software_version {
        if let Some(state) = state {
            match state.software_version().await {
                Ok(Some(reported)) if software_version_matches(&reported, expected) => {}
                Ok(Some(reported)) => {
                    return Attempt::Retry(format!(
                        "software-version got {reported}, want {expected}"
                    ));
                }
                Ok(None) => {
                    return Attempt::Retry("couldn't get system/state/software-version".to_owned());
                }
                Err(status) => {
                    return Attempt::Retry(format!("software-version lookup failed: {status}"));
                }
            }
        }
    }

    let standby_version = if params.dual_supervisor {
        match check_standby(&response, expected) {
            Ok(version) => Some(version),
            Err(attempt) => return attempt,
        }
    } else {
        None
    };

    Attempt::Ready((response.version, standby_version))
}

fn check_activation<T>(unit: &'static str, message: &str) -> Option<Attempt<T>> {
    if message.is_empty() {
        None
    } else if message == ACTIVATION_IN_PROGRESS {
        Some(Attempt::Retry(format!("waiting for {unit} reboot to initiate")))
    } else {
        Some(Attempt::Fatal(EngineError::ActivationFailed {
            unit,
            message: message.to_owned(),
        }))
    }
}

fn check_standby<T>(response: &VerifyResult, expected: &str) -> Result<String, Attempt<T>> {
    let Some(standby) = response.standby_response() else {
        return Err(Attempt::Retry("standby not ready".to_owned()));
    };
    if let Some(attempt) = check_activation("standby", &standby.activation_fail_message) {
        return Err(attempt);
    }
    if standby.version != expected {
        return Err(Attempt::Retry(format!(
            "standby not ready: got {}, want {expected}",
            standby.version
        )));
    }
    Ok(standby.version.clone())
}
