//! Install image metadata helpers.
//!
//! Small pure functions that turn image build output and device-reported
//! version strings into the decisions the worker needs.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{info, warn};

use crate::error::EngineError;

/// First major release that accepts a forced transfer over an existing image.
pub const FORCE_DOWNLOAD_MIN_MAJOR: u32 = 25;

static VERSION_RE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"Version:\s+([0-9]+\.[0-9]+\.[0-9]+\.[0-9]+[A-Z]?)"));
static LABEL_RE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"--label\s+(\S+)"));

/// Extracts the installable version string from image build info text.
///
/// The version is the `Version:` field; a build label given with `--label`
/// is appended as `<version>-<label>`.
///
/// # Errors
///
/// Returns [`EngineError::Content`] if the text has no `Version:` field.
pub fn parse_build_info(text: &str) -> Result<String, EngineError> {
    let version_re = VERSION_RE
        .as_ref()
        .map_err(|e| EngineError::Content(format!("invalid version pattern: {e}")))?;
    let label_re = LABEL_RE
        .as_ref()
        .map_err(|e| EngineError::Content(format!("invalid label pattern: {e}")))?;

    let version = version_re
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| EngineError::Content("build info has no Version field".to_owned()))?;

    match label_re.captures(text).and_then(|c| c.get(1)) {
        Some(label) => Ok(format!("{version}-{}", label.as_str())),
        None => Ok(version.to_owned()),
    }
}

/// Reads an image build info file and extracts its version.
///
/// # Errors
///
/// Returns [`EngineError::Content`] if the file cannot be read or has no
/// `Version:` field.
pub async fn read_build_info(path: impl AsRef<Path>) -> Result<String, EngineError> {
    let path = path.as_ref();
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| EngineError::Content(format!("{}: {e}", path.display())))?;
    let version = parse_build_info(&text)?;
    info!(path = %path.display(), version = %version, "image version read from build info");
    Ok(version)
}

/// Leading numeric component of a dotted version.
pub fn major_version(version: &str) -> Option<u32> {
    version.split('.').next()?.trim().parse().ok()
}

/// Whether the running software accepts a forced transfer.
///
/// An unparseable version is treated as a current release.
pub fn supports_force_download(running_version: &str) -> bool {
    let major = major_version(running_version).unwrap_or_else(|| {
        warn!(
            version = running_version,
            "major version is not a number, assuming current release"
        );
        FORCE_DOWNLOAD_MIN_MAJOR
    });
    major >= FORCE_DOWNLOAD_MIN_MAJOR
}

/// Whether the management-plane software version agrees with `expected`.
///
/// Devices append build suffixes to the reported string, so only the prefix
/// is compared.
pub fn software_version_matches(reported: &str, expected: &str) -> bool {
    reported.starts_with(expected)
}

/// Image file timestamps around a forced transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageRefresh {
    /// Modification time before the transfer (unix seconds)
    pub before: i64,
    /// Modification time after the transfer (unix seconds)
    pub after: i64,
}

impl ImageRefresh {
    /// Whether the transfer rewrote the image.
    ///
    /// Equal timestamps mean the file was not touched.
    pub fn is_refreshed(&self) -> bool {
        self.after > self.before
    }
}
