//! Install session driver.
//!
//! Opens the Install stream, sends the transfer request, classifies the first
//! response and drives the chunked upload. After the first response the read
//! half is handed to a spawned status watcher; the watcher publishes its
//! terminal result through a oneshot channel which the driver awaits before
//! closing the session.
//!
//! ```text
//!   driver ──TransferRequest──▶ device
//!   driver ◀──first response─── device
//!      │ spawn(watch_status(source))  ──oneshot──┐
//!      │ TransferContent* / TransferEnd          │
//!      └──────────────── await ◀─────────────────┘
//! ```

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use osinstall_core::config::DEFAULT_CHUNK_SIZE;
use osinstall_core::metrics as m;
use osinstall_core::types::{InstallRequest, StatusEvent};

use crate::client::{InstallSink, InstallSource, OsClient};
use crate::error::EngineError;
use crate::watcher::{StatusWatcher, WatchOutcome, watch_status};

/// How long the driver waits for the watcher's verdict after a failed upload.
const WATCHER_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Aborts the status watcher once the driver stops waiting for it.
///
/// The watcher owns the stream source, so an early return or a dropped
/// `transfer` future must not leave it running.
struct WatcherGuard(AbortHandle);

impl Drop for WatcherGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Session lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Stream open, nothing sent
    Opened,
    /// Transfer request sent, waiting for the first response
    RequestSent,
    /// Uploading image content
    Uploading,
    /// Upload finished, waiting for the watcher
    AwaitingValidation,
    /// Stream closed after a result
    Closed,
    /// Stream abandoned after an error
    Failed,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Opened => write!(f, "opened"),
            Self::RequestSent => write!(f, "request_sent"),
            Self::Uploading => write!(f, "uploading"),
            Self::AwaitingValidation => write!(f, "awaiting_validation"),
            Self::Closed => write!(f, "closed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Parameters of one transfer attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOptions {
    /// Version sent in the transfer request. Empty requests a forced transfer.
    pub request_version: String,
    /// Version the device must validate.
    pub expected_version: String,
    /// Target the standby supervisor.
    pub standby: bool,
    /// Whether the device has a standby supervisor.
    pub dual_supervisor: bool,
    /// Substring of a failure the caller expects instead of success.
    pub expected_error: Option<String>,
    /// Upload chunk size in bytes.
    pub chunk_size: usize,
}

impl TransferOptions {
    /// Transfer of `version`, requested by version.
    pub fn new(version: impl Into<String>) -> Self {
        let version = version.into();
        Self {
            request_version: version.clone(),
            expected_version: version,
            standby: false,
            dual_supervisor: false,
            expected_error: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Requests a forced transfer (empty version in the request).
    pub fn force(mut self) -> Self {
        self.request_version.clear();
        self
    }

    /// Overrides the version sent in the request.
    pub fn request_version(mut self, version: impl Into<String>) -> Self {
        self.request_version = version.into();
        self
    }

    /// Targets the standby supervisor.
    pub fn standby(mut self, standby: bool) -> Self {
        self.standby = standby;
        self
    }

    /// Sets the device topology.
    pub fn dual_supervisor(mut self, dual: bool) -> Self {
        self.dual_supervisor = dual;
        self
    }

    /// Expects a failure whose text contains `substring`.
    pub fn expect_error(mut self, substring: impl Into<String>) -> Self {
        self.expected_error = Some(substring.into());
        self
    }

    /// Sets the upload chunk size.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Whether this is a forced transfer.
    pub fn is_forced(&self) -> bool {
        self.request_version.is_empty()
    }

    fn unit(&self) -> &'static str {
        if self.standby { "standby" } else { "active" }
    }

    fn expects(&self, observed: &str) -> bool {
        self.expected_error
            .as_deref()
            .is_some_and(|want| observed.contains(want))
    }
}

/// Result of a transfer attempt that did not abort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The device already holds the image; nothing was uploaded.
    AlreadyInstalled {
        /// Version the device validated
        version: String,
    },
    /// The image was transferred and validated.
    Transferred {
        /// Version the device validated
        version: String,
        /// Image bytes uploaded (zero for a standby sync)
        bytes_sent: u64,
        /// Progress events observed
        progress_events: u64,
    },
    /// The transfer failed the way the caller expected.
    ExpectedFailure {
        /// Text of the observed failure
        observed: String,
    },
}

impl TransferOutcome {
    fn result_label(&self) -> &'static str {
        match self {
            Self::AlreadyInstalled { .. } => "already_installed",
            Self::Transferred { .. } => "success",
            Self::ExpectedFailure { .. } => "expected_failure",
        }
    }
}

/// One Install stream.
pub struct InstallSession<O: OsClient> {
    sink: O::Sink,
    source: Option<O::Source>,
    options: TransferOptions,
    phase: SessionPhase,
}

impl<O: OsClient> InstallSession<O> {
    /// Opens the Install stream.
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the stream cannot be established.
    pub async fn open(os: &O, options: TransferOptions) -> Result<Self, EngineError> {
        let (sink, source) = os.install().await.map_err(|status| {
            error!(error = %status, "OS.Install client request failed");
            EngineError::Transport(status)
        })?;
        Ok(Self {
            sink,
            source: Some(source),
            options,
            phase: SessionPhase::Opened,
        })
    }

    /// Current phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Transfer options of this session.
    pub fn options(&self) -> &TransferOptions {
        &self.options
    }

    /// Sends the transfer request.
    ///
    /// # Errors
    ///
    /// Returns `Protocol` if the device rejects the request before streaming begins.
    pub async fn send_transfer_request(&mut self) -> Result<(), EngineError> {
        let request = InstallRequest::TransferRequest {
            version: self.options.request_version.clone(),
            standby_supervisor: self.options.standby,
        };
        if let Err(status) = self.sink.send(request).await {
            self.phase = SessionPhase::Failed;
            return Err(EngineError::protocol(format!(
                "transfer request rejected: {status}"
            )));
        }
        self.phase = SessionPhase::RequestSent;
        debug!(
            version = %self.options.request_version,
            standby = self.options.standby,
            "transfer request sent"
        );
        Ok(())
    }

    /// Classifies the first response and completes the transfer.
    ///
    /// `content` is read only when the active supervisor is targeted after a
    /// `TransferReady`; a standby transfer is synchronised by the device.
    pub async fn run<R>(mut self, content: R) -> Result<TransferOutcome, EngineError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let result = self.drive(content).await;
        self.phase = if result.is_ok() {
            SessionPhase::Closed
        } else {
            SessionPhase::Failed
        };
        if let Err(status) = self.sink.close_send().await {
            debug!(error = %status, "install stream close failed");
        }
        result
    }

    async fn drive<R>(&mut self, content: R) -> Result<TransferOutcome, EngineError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut source = self
            .source
            .take()
            .ok_or_else(|| EngineError::protocol("install stream already consumed"))?;

        let first = match source.recv().await {
            Ok(Some(event)) => event,
            Ok(None) => {
                return Err(EngineError::protocol(
                    "install stream closed before the first response",
                ));
            }
            Err(status) => return Err(EngineError::Transport(status)),
        };

        let options = &self.options;
        let watcher = match first {
            StatusEvent::TransferReady => {
                StatusWatcher::new(options.expected_version.clone(), options.standby)
            }
            StatusEvent::Validated { version } => {
                if version != options.expected_version {
                    return Err(EngineError::VersionMismatch {
                        expected: options.expected_version.clone(),
                        actual: version,
                    });
                }
                info!(
                    version = %version,
                    unit = options.unit(),
                    "supervisor has valid preexisting image, skipping transfer"
                );
                return Ok(TransferOutcome::AlreadyInstalled { version });
            }
            StatusEvent::SyncProgress {
                percentage_transferred,
            } => {
                if !(options.standby && options.dual_supervisor) {
                    return Err(EngineError::protocol(format!(
                        "unexpected SyncProgress on {} supervisor",
                        if options.dual_supervisor { "active" } else { "single" }
                    )));
                }
                info!(percentage_transferred, "synced from supervisor");
                StatusWatcher::after_sync_progress(options.expected_version.clone())
            }
            other => {
                let observed =
                    format!("expected TransferReady following TransferRequest: got {other}");
                if options.expects(&observed) {
                    info!(observed = %observed, "transfer failed as expected");
                    return Ok(TransferOutcome::ExpectedFailure { observed });
                }
                return Err(match other {
                    StatusEvent::InstallError { kind, detail } => {
                        EngineError::Install { kind, detail }
                    }
                    _ => EngineError::Protocol(observed),
                });
            }
        };

        let (tx, mut rx) = oneshot::channel();
        let watcher_task = tokio::spawn(async move {
            let result = watch_status(source, watcher).await;
            let _ = tx.send(result);
        });
        let _watcher_guard = WatcherGuard(watcher_task.abort_handle());

        let mut bytes_sent = 0;
        if !self.options.standby {
            self.phase = SessionPhase::Uploading;
            match upload_content(&mut self.sink, content, self.options.chunk_size).await {
                Ok(sent) => bytes_sent = sent,
                Err(upload_err) => {
                    // The device usually explains a broken upload on the stream.
                    return match tokio::time::timeout(WATCHER_DRAIN_TIMEOUT, &mut rx).await {
                        Ok(Ok(Err(device_err @ EngineError::Install { .. }))) => {
                            self.finish(Err(device_err), 0)
                        }
                        _ => Err(upload_err),
                    };
                }
            }
        }

        self.phase = SessionPhase::AwaitingValidation;
        let watched = rx
            .await
            .map_err(|_| EngineError::protocol("status watcher ended without a result"))?;
        self.finish(watched, bytes_sent)
    }

    fn finish(
        &self,
        watched: Result<WatchOutcome, EngineError>,
        bytes_sent: u64,
    ) -> Result<TransferOutcome, EngineError> {
        match watched {
            Ok(outcome) => {
                if let Some(want) = &self.options.expected_error {
                    return Err(EngineError::protocol(format!(
                        "transfer succeeded but a failure containing '{want}' was expected"
                    )));
                }
                Ok(TransferOutcome::Transferred {
                    version: outcome.version,
                    bytes_sent,
                    progress_events: outcome.progress_events,
                })
            }
            Err(err) => {
                let observed = err.to_string();
                if self.options.expects(&observed) {
                    info!(observed = %observed, "transfer failed as expected");
                    Ok(TransferOutcome::ExpectedFailure { observed })
                } else {
                    Err(err)
                }
            }
        }
    }
}

/// Streams `content` in `chunk_size` pieces followed by `TransferEnd`.
///
/// Returns the number of image bytes sent.
async fn upload_content<S, R>(
    sink: &mut S,
    mut content: R,
    chunk_size: usize,
) -> Result<u64, EngineError>
where
    S: InstallSink,
    R: AsyncRead + Unpin + Send,
{
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut sent: u64 = 0;
    loop {
        let n = content
            .read(&mut buf)
            .await
            .map_err(|e| EngineError::Content(e.to_string()))?;
        if n == 0 {
            break;
        }
        sink.send(InstallRequest::TransferContent(Bytes::copy_from_slice(
            &buf[..n],
        )))
        .await?;
        sent += n as u64;
    }
    sink.send(InstallRequest::TransferEnd).await?;
    metrics::counter!(m::INSTALL_BYTES_SENT_TOTAL).increment(sent);
    debug!(bytes_sent = sent, "image content uploaded");
    Ok(sent)
}

/// Runs one complete transfer attempt against `os`.
///
/// # Errors
///
/// Any fatal [`EngineError`] from opening, requesting, uploading or watching.
/// A failure matching [`TransferOptions::expected_error`] is returned as
/// [`TransferOutcome::ExpectedFailure`] instead.
pub async fn transfer<O, R>(
    os: &O,
    options: TransferOptions,
    content: R,
) -> Result<TransferOutcome, EngineError>
where
    O: OsClient,
    R: AsyncRead + Unpin + Send,
{
    let unit = options.unit();
    info!(
        version = %options.expected_version,
        forced = options.is_forced(),
        unit,
        "starting image transfer"
    );

    let result = async {
        let mut session = InstallSession::open(os, options).await?;
        session.send_transfer_request().await?;
        session.run(content).await
    }
    .await;

    let label = match &result {
        Ok(outcome) => {
            info!(unit, outcome = outcome.result_label(), "image transfer complete");
            outcome.result_label()
        }
        Err(e) => {
            warn!(unit, error = %e, "image transfer failed");
            "failure"
        }
    };
    metrics::counter!(
        m::INSTALL_TRANSFERS_TOTAL,
        m::LABEL_RESULT => label,
        m::LABEL_UNIT => unit
    )
    .increment(1);
    result
}
