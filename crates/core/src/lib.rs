#![doc = include_str!("../README.md")]

pub mod config;
pub mod error;
pub mod metrics;
pub mod naming;
pub mod recovery;
pub mod suite;
pub mod trace;
pub mod types;

// --- 주요 타입 re-export ---
// 각 모듈의 핵심 타입을 크레이트 루트에서 바로 사용할 수 있도록 합니다.

// 에러
pub use error::{ConfigError, ValidatorError};

// 설정
pub use config::ValidatorConfig;

// 결과 수집
pub use suite::{
    CollectorHandle, ModuleOutcome, ModuleRecord, Recorder, ResultObserver, TestResult, TestSuite,
};

// 진단 추적
pub use trace::{TraceLevel, Tracer};

// 실패 격리 및 재시도
pub use recovery::{
    RetryPolicy, SafeExecError, safe_exec, with_error_recovery, with_error_recovery_if,
};

// 도메인 타입
pub use types::{Category, ReportFormat, TestStatus};
