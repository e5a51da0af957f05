//! 설정 관리 — k3s-validator.toml 파싱 및 런타임 설정
//!
//! [`ValidatorConfig`]는 모든 섹션의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`K3S_VALIDATOR_TIMEOUTS_PVC_BOUND_SECS=90` 형식)
//! 3. 설정 파일 (`k3s-validator.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), k3s_validator_core::error::ValidatorError> {
//! use k3s_validator_core::config::ValidatorConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = ValidatorConfig::load("k3s-validator.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = ValidatorConfig::parse("[timeouts]\npvc_bound_secs = 90")?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, ValidatorError};
use crate::naming::{MAX_DNS_LABEL_LEN, validate_dns_label};
use crate::types::Category;

/// 네임스페이스 이름에 붙는 `-YYYYMMDD-HHMMSS` 접미사 길이
const NAMESPACE_TIMESTAMP_SUFFIX_LEN: usize = 16;

/// k3s-validator 통합 설정
///
/// `k3s-validator.toml` 파일의 최상위 구조를 나타냅니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 테스트 픽스처 설정
    #[serde(default)]
    pub fixture: FixtureConfig,
    /// 폴링 및 대기 타임아웃
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// 재시도 정책
    #[serde(default)]
    pub retry: RetryConfig,
    /// 모듈 활성화 및 외부 모듈 경로
    #[serde(default)]
    pub modules: ModulesConfig,
    /// 개별 검사 임계값
    #[serde(default)]
    pub checks: ChecksConfig,
    /// 리포트 출력 설정
    #[serde(default)]
    pub report: ReportConfig,
}

impl ValidatorConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ValidatorError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ValidatorError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ValidatorError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                ValidatorError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, ValidatorError> {
        toml::from_str(toml_str).map_err(|e| {
            ValidatorError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `K3S_VALIDATOR_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "K3S_VALIDATOR_GENERAL_LOG_LEVEL");
        override_string(
            &mut self.general.log_format,
            "K3S_VALIDATOR_GENERAL_LOG_FORMAT",
        );

        // Fixture
        override_string(
            &mut self.fixture.namespace_prefix,
            "K3S_VALIDATOR_FIXTURE_NAMESPACE_PREFIX",
        );
        override_string(&mut self.fixture.test_image, "K3S_VALIDATOR_FIXTURE_TEST_IMAGE");
        override_string(&mut self.fixture.web_image, "K3S_VALIDATOR_FIXTURE_WEB_IMAGE");

        // Timeouts
        override_u64(
            &mut self.timeouts.poll_interval_secs,
            "K3S_VALIDATOR_TIMEOUTS_POLL_INTERVAL_SECS",
        );
        override_u64(
            &mut self.timeouts.pod_ready_secs,
            "K3S_VALIDATOR_TIMEOUTS_POD_READY_SECS",
        );
        override_u64(
            &mut self.timeouts.pod_completion_secs,
            "K3S_VALIDATOR_TIMEOUTS_POD_COMPLETION_SECS",
        );
        override_u64(
            &mut self.timeouts.pvc_bound_secs,
            "K3S_VALIDATOR_TIMEOUTS_PVC_BOUND_SECS",
        );
        override_u64(
            &mut self.timeouts.deployment_ready_secs,
            "K3S_VALIDATOR_TIMEOUTS_DEPLOYMENT_READY_SECS",
        );
        override_u64(
            &mut self.timeouts.load_balancer_secs,
            "K3S_VALIDATOR_TIMEOUTS_LOAD_BALANCER_SECS",
        );

        // Retry
        override_u32(
            &mut self.retry.max_attempts,
            "K3S_VALIDATOR_RETRY_MAX_ATTEMPTS",
        );
        override_u64(&mut self.retry.backoff_ms, "K3S_VALIDATOR_RETRY_BACKOFF_MS");

        // Modules
        override_string(
            &mut self.modules.external_dir,
            "K3S_VALIDATOR_MODULES_EXTERNAL_DIR",
        );
        override_csv_disabled(
            &mut self.modules.enabled,
            "K3S_VALIDATOR_MODULES_DISABLED",
        );

        // Checks
        override_string(
            &mut self.checks.external_dns_name,
            "K3S_VALIDATOR_CHECKS_EXTERNAL_DNS_NAME",
        );
        override_u64(
            &mut self.checks.api_latency_warn_ms,
            "K3S_VALIDATOR_CHECKS_API_LATENCY_WARN_MS",
        );

        // Report
        override_string(&mut self.report.output, "K3S_VALIDATOR_REPORT_OUTPUT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), ValidatorError> {
        // log_level 검증
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        // log_format 검증
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        // 네임스페이스 접두어는 타임스탬프를 붙여도 DNS label이어야 함
        if let Err(reason) = validate_dns_label(&self.fixture.namespace_prefix) {
            return Err(invalid("fixture.namespace_prefix", reason));
        }
        let max_prefix = MAX_DNS_LABEL_LEN - NAMESPACE_TIMESTAMP_SUFFIX_LEN;
        if self.fixture.namespace_prefix.len() > max_prefix {
            return Err(invalid(
                "fixture.namespace_prefix",
                format!("must be at most {max_prefix} characters"),
            ));
        }

        if self.fixture.test_image.is_empty() || self.fixture.web_image.is_empty() {
            return Err(invalid(
                "fixture.test_image",
                "container images must not be empty".to_owned(),
            ));
        }

        // 타임아웃 검증
        let timeouts = [
            ("timeouts.poll_interval_secs", self.timeouts.poll_interval_secs),
            ("timeouts.pod_ready_secs", self.timeouts.pod_ready_secs),
            ("timeouts.pod_completion_secs", self.timeouts.pod_completion_secs),
            ("timeouts.pvc_bound_secs", self.timeouts.pvc_bound_secs),
            (
                "timeouts.deployment_ready_secs",
                self.timeouts.deployment_ready_secs,
            ),
            ("timeouts.load_balancer_secs", self.timeouts.load_balancer_secs),
        ];
        for (field, value) in timeouts {
            if value == 0 {
                return Err(invalid(field, "must be greater than 0".to_owned()));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(invalid(
                "retry.max_attempts",
                "must be greater than 0".to_owned(),
            ));
        }

        // 모듈 키 검증: "<category>/<module>"
        for key in self.modules.enabled.keys() {
            let Some((category, module)) = key.split_once('/') else {
                return Err(invalid(
                    "modules.enabled",
                    format!("key '{key}' must have the form '<category>/<module>'"),
                ));
            };
            if let Err(reason) = category.parse::<Category>() {
                return Err(invalid("modules.enabled", reason));
            }
            if module.is_empty() {
                return Err(invalid(
                    "modules.enabled",
                    format!("key '{key}' has an empty module name"),
                ));
            }
        }

        if self.checks.api_throughput_requests == 0 || self.checks.pod_startup_samples == 0 {
            return Err(invalid(
                "checks",
                "sample counts must be greater than 0".to_owned(),
            ));
        }

        Ok(())
    }

    /// 모듈 활성화 여부 (설정에 없으면 활성)
    pub fn module_enabled(&self, category: Category, module: &str) -> bool {
        self.modules
            .enabled
            .get(&format!("{category}/{module}"))
            .copied()
            .unwrap_or(true)
    }
}

fn invalid(field: &str, reason: String) -> ValidatorError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "pretty".to_owned(),
        }
    }
}

/// 테스트 픽스처 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureConfig {
    /// 픽스처 네임스페이스 접두어 (`<prefix>-<YYYYMMDD>-<HHMMSS>`)
    pub namespace_prefix: String,
    /// 일회성 검사 파드 이미지 (nslookup, wget 포함)
    pub test_image: String,
    /// HTTP 응답용 이미지
    pub web_image: String,
}

impl Default for FixtureConfig {
    fn default() -> Self {
        Self {
            namespace_prefix: "k3s-test".to_owned(),
            test_image: "busybox:1.36".to_owned(),
            web_image: "nginx:1.25-alpine".to_owned(),
        }
    }
}

/// 폴링 및 대기 타임아웃 (초)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// 조건 폴링 간격
    pub poll_interval_secs: u64,
    /// 파드 Ready 대기
    pub pod_ready_secs: u64,
    /// 일회성 파드 완료 대기
    pub pod_completion_secs: u64,
    /// PVC Bound 대기
    pub pvc_bound_secs: u64,
    /// 디플로이먼트 가용 대기
    pub deployment_ready_secs: u64,
    /// LoadBalancer IP 할당 대기
    pub load_balancer_secs: u64,
}

impl TimeoutConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn pod_ready(&self) -> Duration {
        Duration::from_secs(self.pod_ready_secs)
    }

    pub fn pod_completion(&self) -> Duration {
        Duration::from_secs(self.pod_completion_secs)
    }

    pub fn pvc_bound(&self) -> Duration {
        Duration::from_secs(self.pvc_bound_secs)
    }

    pub fn deployment_ready(&self) -> Duration {
        Duration::from_secs(self.deployment_ready_secs)
    }

    pub fn load_balancer(&self) -> Duration {
        Duration::from_secs(self.load_balancer_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 2,
            pod_ready_secs: 120,
            pod_completion_secs: 90,
            pvc_bound_secs: 60,
            deployment_ready_secs: 120,
            load_balancer_secs: 60,
        }
    }
}

/// 재시도 정책
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// 최대 시도 횟수 (첫 시도 포함)
    pub max_attempts: u32,
    /// 백오프 기본 간격 (밀리초, 시도 횟수에 비례해 증가)
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 1000,
        }
    }
}

/// 모듈 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModulesConfig {
    /// 외부 실행 모듈 디렉토리 (`<dir>/<category>/<module>`), 비어 있으면 사용 안 함
    pub external_dir: String,
    /// `"<category>/<module>" = bool` 형식의 활성화 플래그
    pub enabled: BTreeMap<String, bool>,
}

/// 개별 검사 임계값
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChecksConfig {
    /// 외부 DNS 해석 검사 대상
    pub external_dns_name: String,
    /// API 서버 응답 지연 경고 기준 (밀리초)
    pub api_latency_warn_ms: u64,
    /// 파드 기동 시간 경고 기준 (초)
    pub pod_startup_warn_secs: u64,
    /// 파드 기동 시간 측정 샘플 수
    pub pod_startup_samples: u32,
    /// API 처리량 측정 요청 수
    pub api_throughput_requests: u32,
    /// API 처리량 경고 기준 (초당 요청)
    pub api_throughput_min_rps: f64,
    /// HA로 간주할 최소 컨트롤 플레인 노드 수
    pub min_ha_control_planes: usize,
}

impl Default for ChecksConfig {
    fn default() -> Self {
        Self {
            external_dns_name: "google.com".to_owned(),
            api_latency_warn_ms: 500,
            pod_startup_warn_secs: 30,
            pod_startup_samples: 3,
            api_throughput_requests: 20,
            api_throughput_min_rps: 10.0,
            min_ha_control_planes: 3,
        }
    }
}

/// 리포트 출력 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// 최종 리포트 파일 경로, 비어 있으면 표준 출력
    pub output: String,
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_u32(target: &mut u32, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u32>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u32 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

/// 쉼표로 구분된 `<category>/<module>` 목록을 비활성화 플래그로 병합합니다.
fn override_csv_disabled(target: &mut BTreeMap<String, bool>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        for key in val.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            target.insert(key.to_owned(), false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let config = ValidatorConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.general.log_format, "pretty");
        assert_eq!(config.fixture.namespace_prefix, "k3s-test");
        assert_eq!(config.timeouts.pvc_bound_secs, 60);
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.modules.external_dir.is_empty());
    }

    #[test]
    fn default_config_passes_validation() {
        ValidatorConfig::default().validate().unwrap();
    }

    #[test]
    fn from_str_empty_toml_uses_defaults() {
        let config = ValidatorConfig::parse("").unwrap();
        assert_eq!(config.timeouts.poll_interval_secs, 2);
        assert_eq!(config.fixture.test_image, "busybox:1.36");
    }

    #[test]
    fn from_str_partial_toml_merges_with_defaults() {
        let toml = r#"
[timeouts]
pvc_bound_secs = 90

[modules.enabled]
"k3s-specific/ingress-controller" = false
"#;
        let config = ValidatorConfig::parse(toml).unwrap();
        assert_eq!(config.timeouts.pvc_bound_secs, 90);
        assert_eq!(config.timeouts.pod_ready_secs, 120);
        assert!(!config.module_enabled(Category::K3sSpecific, "ingress-controller"));
        assert!(config.module_enabled(Category::K3sSpecific, "service-lb"));
    }

    #[test]
    fn from_str_invalid_toml_returns_error() {
        let err = ValidatorConfig::parse("invalid = [[[toml").unwrap_err();
        assert!(matches!(
            err,
            ValidatorError::Config(ConfigError::ParseFailed { .. })
        ));
    }

    #[test]
    fn validate_rejects_invalid_log_level() {
        let mut config = ValidatorConfig::default();
        config.general.log_level = "verbose".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("log_level"));
    }

    #[test]
    fn validate_rejects_underscore_in_namespace_prefix() {
        let mut config = ValidatorConfig::default();
        config.fixture.namespace_prefix = "k3s_test".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("namespace_prefix"));
    }

    #[test]
    fn validate_rejects_prefix_too_long_for_timestamp() {
        let mut config = ValidatorConfig::default();
        config.fixture.namespace_prefix = "a".repeat(48);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("at most 47"));
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let mut config = ValidatorConfig::default();
        config.timeouts.pvc_bound_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("pvc_bound_secs"));
    }

    #[test]
    fn validate_rejects_zero_retry_attempts() {
        let mut config = ValidatorConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_malformed_module_key() {
        let mut config = ValidatorConfig::default();
        config.modules.enabled.insert("ingress".to_owned(), false);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("<category>/<module>"));

        let mut config = ValidatorConfig::default();
        config.modules.enabled.insert("chaos/pod-kill".to_owned(), false);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("unknown category"));
    }

    #[test]
    fn timeout_durations_convert_seconds() {
        let timeouts = TimeoutConfig::default();
        assert_eq!(timeouts.pvc_bound(), Duration::from_secs(60));
        assert_eq!(timeouts.poll_interval(), Duration::from_secs(2));
    }

    #[test]
    fn env_override_missing_var_keeps_original() {
        let mut val = "original".to_owned();
        override_string(&mut val, "TEST_K3S_VALIDATOR_NONEXISTENT_12345");
        assert_eq!(val, "original");
    }

    #[test]
    fn config_serialize_roundtrip() {
        let mut config = ValidatorConfig::default();
        config
            .modules
            .enabled
            .insert("core/dns".to_owned(), false);
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed = ValidatorConfig::parse(&toml_str).unwrap();
        assert_eq!(parsed.fixture.namespace_prefix, config.fixture.namespace_prefix);
        assert!(!parsed.module_enabled(Category::Core, "dns"));
    }

    #[tokio::test]
    async fn from_file_not_found() {
        let err = ValidatorConfig::from_file("/nonexistent/path/k3s-validator.toml")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ValidatorError::Config(ConfigError::FileNotFound { .. })
        ));
    }
}
