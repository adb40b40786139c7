//! 에러 타입: 도메인별 에러 정의
//!
//! 각 에러는 [`kind()`](IronbotError::kind)로 안정적인 분류 문자열을 제공합니다.
//! CLI와 HTTP 프론트엔드는 이 문자열을 그대로 출력합니다.

use serde::Serialize;

/// Ironbot 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum IronbotError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 토폴로지 해석 에러 (항상 전체 목록)
    #[error("pipeline resolution failed with {} error(s)", .0.len())]
    Resolution(Vec<ResolutionError>),

    /// 워커 실행 에러
    #[error("launch error: {0}")]
    Launch(#[from] LaunchError),

    /// 시그널 전달 에러
    #[error("signal error: {0}")]
    Signal(#[from] SignalError),

    /// 상태 저장소 에러
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// 현재 상태에서 허용되지 않는 작업
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// 존재하지 않는 유닛 또는 그룹
    #[error("unknown target: {target}")]
    NotFound { target: String },

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl IronbotError {
    /// 에러 분류 문자열
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Resolution(_) => "resolution",
            Self::Launch(_) => "launch",
            Self::Signal(_) => "signal",
            Self::Store(_) => "store",
            Self::State(_) => "state",
            Self::NotFound { .. } => "not_found",
            Self::Io(_) => "io",
        }
    }
}

impl From<Vec<ResolutionError>> for IronbotError {
    fn from(errors: Vec<ResolutionError>) -> Self {
        Self::Resolution(errors)
    }
}

/// 설정 관련 에러
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    /// strict 모드에서 선언되지 않은 그룹 참조
    #[error("unit '{unit}' references unknown group '{group}'")]
    UnknownGroup { unit: String, group: String },

    /// 설정 파일 쓰기 실패
    #[error("failed to write config {path}: {reason}")]
    WriteFailed { path: String, reason: String },
}

/// 토폴로지 해석 에러
///
/// 해석기는 첫 번째 에러에서 멈추지 않고 모든 위반을 수집합니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolutionError {
    /// 기본값 병합 실패
    #[error("unit '{unit}': {reason}")]
    Config { unit: String, reason: String },

    /// 허용되지 않는 문자가 포함된 유닛 ID
    #[error("invalid unit id '{unit}': only [A-Za-z0-9._-] allowed")]
    InvalidUnitId { unit: String },

    /// 실행 모듈이 비어 있음
    #[error("unit '{unit}' has an empty module")]
    EmptyModule { unit: String },

    /// 비어 있는 라우팅 키
    #[error("unit '{unit}' has a destination with an empty routing key")]
    EmptyRoutingKey { unit: String },

    /// 존재하지 않는 유닛을 목적지로 지정
    #[error("unit '{unit}' routes '{routing_key}' to unknown unit '{target}'")]
    DanglingDestination {
        unit: String,
        routing_key: String,
        target: String,
    },

    /// 자기 자신을 목적지로 지정
    #[error("unit '{unit}' routes to itself")]
    SelfLoop { unit: String },

    /// 순환 경로
    #[error("cycle detected: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },

    /// 어떤 Collector에서도 도달할 수 없는 유닛
    #[error("unit '{unit}' is not reachable from any Collector")]
    Unreachable { unit: String },
}

impl ResolutionError {
    /// 에러가 가리키는 대표 유닛 ID
    pub fn unit(&self) -> &str {
        match self {
            Self::Config { unit, .. }
            | Self::InvalidUnitId { unit }
            | Self::EmptyModule { unit }
            | Self::EmptyRoutingKey { unit }
            | Self::DanglingDestination { unit, .. }
            | Self::SelfLoop { unit }
            | Self::Unreachable { unit } => unit,
            Self::Cycle { path } => path.first().map(String::as_str).unwrap_or_default(),
        }
    }
}

/// 워커 실행 에러
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    /// 실행 파일을 찾을 수 없음
    #[error("unit '{unit}': executable '{module}' not found")]
    ExecutableNotFound { unit: String, module: String },

    /// 실행 권한 없음
    #[error("unit '{unit}': '{module}' is not executable")]
    NotExecutable { unit: String, module: String },

    /// 프로세스 생성 실패
    #[error("unit '{unit}': spawn failed: {reason}")]
    Spawn { unit: String, reason: String },

    /// 시작 직후 종료됨
    #[error("unit '{unit}': worker exited during startup (code: {code:?})")]
    ExitedImmediately { unit: String, code: Option<i32> },
}

/// 시그널 전달 에러
///
/// 대상 프로세스가 이미 없는 경우는 에러가 아니라 성공으로 처리됩니다.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// 권한 부족
    #[error("unit '{unit}': permission denied sending {signal} to pid {pid}")]
    PermissionDenied {
        unit: String,
        pid: u32,
        signal: String,
    },

    /// 기타 실패
    #[error("unit '{unit}': failed to send {signal} to pid {pid}: {reason}")]
    Failed {
        unit: String,
        pid: u32,
        signal: String,
        reason: String,
    },
}

/// 상태 저장소 에러
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// 저장소 디렉토리를 사용할 수 없음
    #[error("state directory {path} unavailable: {reason}")]
    Unavailable { path: String, reason: String },

    /// 레코드 읽기 실패
    #[error("failed to read record for '{unit}': {reason}")]
    Read { unit: String, reason: String },

    /// 레코드 쓰기 실패
    #[error("failed to write record for '{unit}': {reason}")]
    Write { unit: String, reason: String },

    /// 레코드 내용이 손상됨
    #[error("corrupt record for '{unit}': {reason}")]
    Corrupt { unit: String, reason: String },

    /// 유닛 잠금 획득 실패
    #[error("failed to lock record for '{unit}': {reason}")]
    Lock { unit: String, reason: String },
}

/// 상태 전이 에러
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// 비활성화된 유닛에는 허용되지 않는 작업
    #[error("unit '{unit}' is disabled; '{operation}' not permitted")]
    Disabled { unit: String, operation: String },
}
