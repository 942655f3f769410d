//! osinstall.toml 통합 설정 테스트
//!
//! - osinstall.toml.example 파싱 테스트
//! - 부분 설정 (일부 섹션만) 로딩 테스트
//! - 환경변수 우선순위 테스트
//! - 파일 로딩 / 잘못된 형식 에러 테스트

use std::io::Write;

use osinstall_core::config::{DEFAULT_CHUNK_SIZE, OsInstallConfig};
use osinstall_core::error::{ConfigError, OsInstallError};
use serial_test::serial;

const EXAMPLE: &str = include_str!("../../../osinstall.toml.example");

// =============================================================================
// osinstall.toml.example 파싱 테스트
// =============================================================================

#[test]
fn example_config_parses_and_validates() {
    let config = OsInstallConfig::parse(EXAMPLE).expect("example config should parse");
    config
        .validate()
        .expect("example config should pass validation");

    assert_eq!(config.general.log_level, "info");
    assert_eq!(config.install.target_version, "25.1.1.21I");
    assert!(config.install.image_path.ends_with(".iso"));
}

#[test]
fn example_config_matches_code_defaults() {
    let example = OsInstallConfig::parse(EXAMPLE).expect("should parse");
    let defaults = OsInstallConfig::default();

    assert_eq!(example.install.chunk_size, defaults.install.chunk_size);
    assert_eq!(example.install.timeout_secs, defaults.install.timeout_secs);
    assert_eq!(
        example.install.verify_poll_interval_secs,
        defaults.install.verify_poll_interval_secs
    );
    assert_eq!(example.install.no_reboot, defaults.install.no_reboot);
    assert_eq!(example.install.install_standby, defaults.install.install_standby);
    assert_eq!(example.boot.max_boot_secs, defaults.boot.max_boot_secs);
    assert_eq!(example.boot.poll_interval_secs, defaults.boot.poll_interval_secs);
    assert_eq!(example.switchover.enabled, defaults.switchover.enabled);
    assert_eq!(
        example.switchover.max_switchover_secs,
        defaults.switchover.max_switchover_secs
    );
    assert_eq!(
        example.fleet.max_concurrent_devices,
        defaults.fleet.max_concurrent_devices
    );
    assert_eq!(example.metrics.port, defaults.metrics.port);
    assert_eq!(
        example.install.build_info_path,
        defaults.install.build_info_path
    );
}

// =============================================================================
// 부분 설정 테스트
// =============================================================================

#[test]
fn partial_config_install_only() {
    let config = OsInstallConfig::parse(
        r#"
[install]
target_version = "24.4.1.39I"
no_reboot = true
"#,
    )
    .unwrap();

    assert_eq!(config.install.target_version, "24.4.1.39I");
    assert!(config.install.no_reboot);
    assert_eq!(config.install.chunk_size, DEFAULT_CHUNK_SIZE);
    assert_eq!(config.boot.max_boot_secs, 300);
    assert_eq!(config.general.log_format, "json");
}

#[test]
fn partial_config_switchover_enabled_validates_bounds() {
    let config = OsInstallConfig::parse(
        r#"
[switchover]
enabled = true
poll_interval_secs = 0
"#,
    )
    .unwrap();

    let err = config.validate().unwrap_err();
    assert!(matches!(
        err,
        OsInstallError::Config(ConfigError::InvalidValue { ref field, .. })
            if field == "switchover.poll_interval_secs"
    ));
}

#[test]
fn unknown_log_format_rejected() {
    let config = OsInstallConfig::parse("[general]\nlog_format = \"xml\"").unwrap();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("general.log_format"));
}

// =============================================================================
// 환경변수 우선순위 테스트
// =============================================================================

#[test]
#[serial]
fn env_override_takes_precedence_over_toml() {
    let mut config = OsInstallConfig::parse("[boot]\nmax_boot_secs = 600").unwrap();

    // SAFETY: serial 테스트로 실행되므로 환경변수 조작이 안전합니다.
    unsafe { std::env::set_var("OSINSTALL_BOOT_MAX_BOOT_SECS", "900") };
    config.apply_env_overrides();
    unsafe { std::env::remove_var("OSINSTALL_BOOT_MAX_BOOT_SECS") };

    assert_eq!(config.boot.max_boot_secs, 900);
}

#[test]
#[serial]
fn env_override_invalid_number_keeps_toml_value() {
    let mut config = OsInstallConfig::parse("[fleet]\nmax_concurrent_devices = 4").unwrap();

    // SAFETY: serial 테스트로 실행되므로 환경변수 조작이 안전합니다.
    unsafe { std::env::set_var("OSINSTALL_FLEET_MAX_CONCURRENT_DEVICES", "many") };
    config.apply_env_overrides();
    unsafe { std::env::remove_var("OSINSTALL_FLEET_MAX_CONCURRENT_DEVICES") };

    assert_eq!(config.fleet.max_concurrent_devices, 4);
}

#[test]
#[serial]
fn env_override_sets_build_info_path() {
    let mut config = OsInstallConfig::default();

    // SAFETY: serial 테스트로 실행되므로 환경변수 조작이 안전합니다.
    unsafe { std::env::set_var("OSINSTALL_INSTALL_BUILD_INFO_PATH", "/images/.BUILD_INFO") };
    config.apply_env_overrides();
    unsafe { std::env::remove_var("OSINSTALL_INSTALL_BUILD_INFO_PATH") };

    assert_eq!(config.install.build_info_path, "/images/.BUILD_INFO");
}

// =============================================================================
// 파일 로딩 테스트
// =============================================================================

#[tokio::test]
#[serial]
async fn load_reads_file_and_applies_env() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[install]\ntarget_version = \"25.1.1.21I\"").unwrap();

    // SAFETY: serial 테스트로 실행되므로 환경변수 조작이 안전합니다.
    unsafe { std::env::set_var("OSINSTALL_INSTALL_CHECK_IMAGE_REFRESH", "true") };
    let result = OsInstallConfig::load(file.path()).await;
    unsafe { std::env::remove_var("OSINSTALL_INSTALL_CHECK_IMAGE_REFRESH") };

    let config = result.unwrap();
    assert_eq!(config.install.target_version, "25.1.1.21I");
    assert!(config.install.check_image_refresh);
}

#[tokio::test]
async fn load_rejects_malformed_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[install\ntarget_version = ").unwrap();

    let err = OsInstallConfig::load(file.path()).await.unwrap_err();
    assert!(matches!(
        err,
        OsInstallError::Config(ConfigError::ParseFailed { .. })
    ));
}

#[tokio::test]
async fn load_missing_file_reports_path() {
    let err = OsInstallConfig::load("/nonexistent/osinstall.toml")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("/nonexistent/osinstall.toml"));
}
