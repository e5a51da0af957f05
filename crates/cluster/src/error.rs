//! 클러스터 어댑터 에러 타입
//!
//! [`ClusterError`]는 클러스터 호출에서 발생하는 모든 에러를 표현합니다.
//! 실행 전체를 중단시키는 것은 [`ClusterError::Connection`]뿐이며,
//! 나머지는 개별 테스트의 실패나 경고로 기록됩니다.

use std::time::Duration;

use crate::resources::ResourceKind;

/// 클러스터 어댑터 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// API 서버에 연결할 수 없음 (실행 중단)
    #[error("cluster unreachable: {0}")]
    Connection(String),

    /// API 호출 실패
    #[error("{operation} failed: {message}")]
    Api {
        /// 실패한 작업 이름
        operation: String,
        /// HTTP 상태 코드 (있는 경우)
        code: Option<u16>,
        /// API 서버가 돌려준 메시지
        message: String,
    },

    /// 리소스를 찾을 수 없음
    #[error("{kind} '{name}' not found")]
    NotFound { kind: ResourceKind, name: String },

    /// 이미 존재하는 리소스
    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: ResourceKind, name: String },

    /// 리소스 이름이 DNS label 규칙을 위반함
    #[error("invalid {kind} name '{name}': {reason}")]
    InvalidName {
        kind: ResourceKind,
        name: String,
        reason: String,
    },

    /// 조건 대기 타임아웃
    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    /// 리소스가 더 이상 기대 조건에 도달할 수 없는 상태가 됨
    #[error("{resource} can no longer reach {condition} (observed: {observed})")]
    Unsatisfiable {
        resource: String,
        condition: String,
        observed: String,
    },
}

impl ClusterError {
    /// 실행 전체를 중단해야 하는 에러인지 여부
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// API 서버가 요청을 거부했는지 여부 (admission, RBAC, validation)
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Api {
                code: Some(400 | 403 | 422),
                ..
            }
        )
    }
}

/// 조건 대기 타임아웃
///
/// 메시지에는 경과 시간과 마지막으로 관측된 상태가 포함됩니다.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "timed out after {secs:.1}s waiting for {resource} to reach {condition} (last observed: {last_observed})",
    secs = .elapsed.as_secs_f64()
)]
pub struct TimeoutError {
    /// 대상 리소스 (`pvc/data-1a2b3c4d` 형식)
    pub resource: String,
    /// 기다린 조건
    pub condition: String,
    /// 실제 경과 시간
    pub elapsed: Duration,
    /// 마지막 폴링에서 관측된 상태
    pub last_observed: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_elapsed_time_and_last_state() {
        let err = ClusterError::from(TimeoutError {
            resource: "pvc/data-1a2b3c4d".to_owned(),
            condition: "Bound".to_owned(),
            elapsed: Duration::from_secs(60),
            last_observed: "Pending".to_owned(),
        });
        assert_eq!(
            err.to_string(),
            "timed out after 60.0s waiting for pvc/data-1a2b3c4d to reach Bound (last observed: Pending)"
        );
        assert!(err.is_timeout());
        assert!(!err.is_fatal());
    }

    #[test]
    fn only_connection_errors_are_fatal() {
        assert!(ClusterError::Connection("refused".to_owned()).is_fatal());
        let not_found = ClusterError::NotFound {
            kind: ResourceKind::Pod,
            name: "web".to_owned(),
        };
        assert!(!not_found.is_fatal());
        assert!(not_found.is_not_found());
        assert_eq!(not_found.to_string(), "pod 'web' not found");
    }

    #[test]
    fn admission_denial_is_a_rejection() {
        let err = ClusterError::Api {
            operation: "create_pod".to_owned(),
            code: Some(403),
            message: "violates PodSecurity".to_owned(),
        };
        assert!(err.is_rejection());
        let server = ClusterError::Api {
            operation: "create_pod".to_owned(),
            code: Some(500),
            message: "etcdserver: request timed out".to_owned(),
        };
        assert!(!server.is_rejection());
    }
}
