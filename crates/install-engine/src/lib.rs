//! 장비 소프트웨어 설치 오케스트레이션 엔진
//!
//! 네트워크 장비에 새 OS 이미지를 전송하고, 활성화하고, 재부팅 후 검증하며,
//! 이중화 장비에서는 슈퍼바이저 스위치오버까지 수행합니다.
//!
//! # 모듈 구성
//!
//! - [`error`]: 엔진 에러 타입 (`EngineError`)
//! - [`config`]: 엔진 정책 (`EnginePolicy`, 빌더)
//! - [`client`]: 장비 RPC 추상화 (`OsClient`, `SystemClient`, `StateClient`, `DeviceConnector`)
//! - [`content`]: 이미지 소스 (`ContentSource`, `FileContent`, `MemoryContent`)
//! - [`poller`]: 제한 시간 안의 고정 간격 재시도 (`retry_until`, `wait_ready`)
//! - [`watcher`]: 설치 상태 스트림 감시 (`StatusWatcher`)
//! - [`session`]: 설치 스트림 드라이버 (`InstallSession`, `transfer`)
//! - [`activation`]: 이미지 활성화 (`activate`)
//! - [`verify`]: 설치 검증과 토폴로지 감지 (`verify_install`, `detect_topology`)
//! - [`switchover`]: 슈퍼바이저 스위치오버 (`SwitchoverController`)
//! - [`image`]: 이미지 버전 도우미
//! - [`worker`]: 장비별 워커 (`DeviceWorker`, `InstallPlan`)
//!
//! # 아키텍처
//!
//! ```text
//! DeviceWorker ── InstallPlan
//!      |
//!      ├── transfer() ──> InstallSession ──stream──> device
//!      |                       └── StatusWatcher <──stream── device
//!      ├── activate()
//!      ├── reboot() / await_boot() ──> poller
//!      ├── verify_install() ──> poller
//!      └── SwitchoverController ──> poller
//!      |
//!      v
//! WorkerReport
//! ```

pub mod activation;
pub mod client;
pub mod config;
pub mod content;
pub mod error;
pub mod image;
pub mod poller;
pub mod session;
pub mod switchover;
pub mod verify;
pub mod watcher;
pub mod worker;

// --- 공개 API re-export ---

// 워커
pub use worker::{
    ActivateStep, DeviceWorker, DeviceWorkerContext, InstallPlan, InstallStep, StepOutcome,
    StepReport, TransferStep, WorkerReport,
};

// 설정
pub use config::{EnginePolicy, EnginePolicyBuilder};

// 에러
pub use error::EngineError;

// 장비 클라이언트
pub use client::{
    DeviceClients, DeviceConnector, InstallSink, InstallSource, OsClient, StateClient,
    SystemClient,
};

// 이미지 소스
pub use content::{ContentSource, FileContent, MemoryContent};

// 폴링
pub use poller::{Attempt, RetryPolicy, retry_until, wait_ready};

// 설치 스트림
pub use session::{InstallSession, SessionPhase, TransferOptions, TransferOutcome, transfer};
pub use watcher::{StatusWatcher, WatchOutcome, WatcherState};

// 활성화, 검증
pub use activation::{ActivateParams, ActivationResult, ExpectedFailure, activate};
pub use verify::{VerifyParams, VerifyReport, detect_topology, verify_install};

// 스위치오버
pub use switchover::{SwitchoverController, SwitchoverPhase, SwitchoverPolicy, SwitchoverResult};
