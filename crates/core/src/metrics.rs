//! 메트릭 상수
//!
//! 모든 메트릭 이름과 레이블 키를 중앙에서 정의합니다.
//! 레코더가 설치되지 않으면 `metrics` 매크로는 아무 동작도 하지 않습니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `k3s_validator_`
//! - 접미어: `_total` (counter), `_seconds` (histogram)

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 테스트 결과 상태 레이블 키 (pass, fail, warn, skip)
pub const LABEL_STATUS: &str = "status";

/// 모듈 종료 상태 레이블 키 (completed, failed, missing, disabled, cancelled)
pub const LABEL_OUTCOME: &str = "outcome";

/// 카테고리 레이블 키
pub const LABEL_CATEGORY: &str = "category";

/// 클러스터 작업 레이블 키
pub const LABEL_OPERATION: &str = "operation";

// ─── 메트릭 이름 ────────────────────────────────────────────────────

/// 기록된 테스트 결과 수 (counter, label: status)
pub const RESULTS_TOTAL: &str = "k3s_validator_results_total";

/// 실행(또는 건너뛴) 모듈 수 (counter, label: outcome)
pub const MODULES_TOTAL: &str = "k3s_validator_modules_total";

/// 모듈 실행 시간 (histogram, 초, label: category)
pub const MODULE_DURATION_SECONDS: &str = "k3s_validator_module_duration_seconds";

/// 재시도된 작업 수 (counter, label: operation)
pub const RETRIES_TOTAL: &str = "k3s_validator_retries_total";
