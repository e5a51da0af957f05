//! 도메인 타입 — 카테고리, 테스트 상태, 리포트 형식

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 테스트 모듈 카테고리
///
/// 카테고리 순서는 실행 계획과 리포트 출력 순서를 결정합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    /// API 서버, 노드, 시스템 파드, 네트워킹, DNS, 스토리지
    Core,
    /// K3s 고유 구성요소 (ingress, servicelb, local-path, datastore, topology)
    K3sSpecific,
    /// 파드 기동 시간 및 API 처리량
    Performance,
    /// 파드 보안 및 API TLS
    Security,
    /// 장애 복구 시나리오
    Failure,
    /// 운영 환경 준비 상태 (HA, 기본 스토리지 클래스)
    Production,
}

impl Category {
    /// 모든 카테고리 (실행 순서)
    pub const ALL: [Category; 6] = [
        Category::Core,
        Category::K3sSpecific,
        Category::Performance,
        Category::Security,
        Category::Failure,
        Category::Production,
    ];

    /// CLI/설정 파일에서 사용하는 카테고리 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::K3sSpecific => "k3s-specific",
            Self::Performance => "performance",
            Self::Security => "security",
            Self::Failure => "failure",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| {
                let names: Vec<&str> = Category::ALL.iter().map(Category::as_str).collect();
                format!("unknown category '{s}', expected one of: {}", names.join(", "))
            })
    }
}

/// 개별 테스트 결과 상태
///
/// `Warn`과 `Skip`은 종료 코드에 영향을 주지 않습니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    /// 관측된 상태가 기대와 일치
    Pass,
    /// 관측된 상태가 기대와 명확히 불일치
    Fail,
    /// 모호하거나 차단하지 않는 우려 사항
    Warn,
    /// 전제 조건 미충족 (단일 노드, 미설치 기능 등)
    Skip,
}

impl TestStatus {
    /// 메트릭 레이블 및 출력용 고정 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Warn => "warn",
            Self::Skip => "skip",
        }
    }

    /// 텍스트 리포트용 대문자 라벨
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Warn => "WARN",
            Self::Skip => "SKIP",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pass" => Ok(Self::Pass),
            "fail" => Ok(Self::Fail),
            "warn" => Ok(Self::Warn),
            "skip" => Ok(Self::Skip),
            other => Err(format!("unknown test status '{other}'")),
        }
    }
}

/// 최종 리포트 형식
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// 실행 중 스트리밍되는 사람용 텍스트
    #[default]
    Text,
    /// 실행 종료 후 한 번 생성되는 JSON
    Json,
    /// 실행 종료 후 한 번 생성되는 독립 HTML 문서
    Html,
}

impl ReportFormat {
    /// 형식 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
            Self::Html => "html",
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
