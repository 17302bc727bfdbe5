//! 설정 관리: watchdata.toml 파싱 및 런타임 설정
//!
//! [`WatchdataConfig`]는 모든 구성 요소의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`WATCHDATA_STORAGE_URL=http://ch:8123` 형식)
//! 3. 설정 파일 (`watchdata.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), watchdata_core::error::WatchdataError> {
//! use watchdata_core::config::WatchdataConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = WatchdataConfig::load("watchdata.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = WatchdataConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, WatchdataError};

/// watchdata 통합 설정
///
/// `watchdata.toml` 파일의 최상위 구조를 나타냅니다.
/// 각 구성 요소는 자기 섹션만 읽어 사용합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchdataConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 컬럼 저장소 설정
    #[serde(default)]
    pub storage: StorageConfig,
    /// 변경 감지 및 팬아웃 설정
    #[serde(default)]
    pub stream: StreamSection,
    /// HTTP/WebSocket 서버 설정
    #[serde(default)]
    pub server: ServerConfig,
    /// Prometheus 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl WatchdataConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, WatchdataError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, WatchdataError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                WatchdataError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                WatchdataError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, WatchdataError> {
        toml::from_str(toml_str).map_err(|e| {
            WatchdataError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `WATCHDATA_{SECTION}_{FIELD}`
    /// 예: `WATCHDATA_STREAM_POLL_INTERVAL_MS=500`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "WATCHDATA_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "WATCHDATA_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.pid_file, "WATCHDATA_GENERAL_PID_FILE");

        // Storage
        override_string(&mut self.storage.backend, "WATCHDATA_STORAGE_BACKEND");
        override_string(&mut self.storage.url, "WATCHDATA_STORAGE_URL");
        override_string(&mut self.storage.database, "WATCHDATA_STORAGE_DATABASE");
        override_string(&mut self.storage.username, "WATCHDATA_STORAGE_USERNAME");
        override_string(&mut self.storage.password, "WATCHDATA_STORAGE_PASSWORD");
        override_string(&mut self.storage.table, "WATCHDATA_STORAGE_TABLE");
        override_u64(
            &mut self.storage.dial_timeout_secs,
            "WATCHDATA_STORAGE_DIAL_TIMEOUT_SECS",
        );
        override_u64(
            &mut self.storage.query_timeout_secs,
            "WATCHDATA_STORAGE_QUERY_TIMEOUT_SECS",
        );
        override_usize(
            &mut self.storage.max_open_conns,
            "WATCHDATA_STORAGE_MAX_OPEN_CONNS",
        );
        override_usize(
            &mut self.storage.max_idle_conns,
            "WATCHDATA_STORAGE_MAX_IDLE_CONNS",
        );
        override_u32(
            &mut self.storage.retention_days,
            "WATCHDATA_STORAGE_RETENTION_DAYS",
        );

        // Stream
        override_u64(
            &mut self.stream.poll_interval_ms,
            "WATCHDATA_STREAM_POLL_INTERVAL_MS",
        );
        override_u64(
            &mut self.stream.poll_lookback_secs,
            "WATCHDATA_STREAM_POLL_LOOKBACK_SECS",
        );
        override_usize(
            &mut self.stream.fanout_queue_capacity,
            "WATCHDATA_STREAM_FANOUT_QUEUE_CAPACITY",
        );
        override_usize(
            &mut self.stream.subscriber_buffer,
            "WATCHDATA_STREAM_SUBSCRIBER_BUFFER",
        );
        override_string(
            &mut self.stream.delivery_mode,
            "WATCHDATA_STREAM_DELIVERY_MODE",
        );

        // Server
        override_string(&mut self.server.listen_addr, "WATCHDATA_SERVER_LISTEN_ADDR");
        override_u16(&mut self.server.port, "WATCHDATA_SERVER_PORT");

        // Metrics
        override_bool(&mut self.metrics.enabled, "WATCHDATA_METRICS_ENABLED");
        override_string(
            &mut self.metrics.listen_addr,
            "WATCHDATA_METRICS_LISTEN_ADDR",
        );
        override_u16(&mut self.metrics.port, "WATCHDATA_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), WatchdataError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        self.storage.validate()?;
        self.stream.validate()?;

        if self.metrics.enabled && !self.metrics.endpoint.starts_with('/') {
            return Err(invalid("metrics.endpoint", "must start with '/'".to_owned()));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: String) -> WatchdataError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
    .into()
}

/// SQL 식별자로 안전한지 검사합니다 (영문자, 숫자, `_`만 허용).
fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && !s.starts_with(|c: char| c.is_ascii_digit())
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// PID 파일 경로 (빈 문자열이면 생성하지 않음)
    pub pid_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            pid_file: String::new(),
        }
    }
}

/// 컬럼 저장소 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// 저장소 백엔드 (clickhouse, memory)
    pub backend: String,
    /// ClickHouse HTTP 인터페이스 URL
    pub url: String,
    /// 데이터베이스 이름
    pub database: String,
    /// 사용자 이름
    pub username: String,
    /// 비밀번호
    pub password: String,
    /// 로그 테이블 이름
    pub table: String,
    /// 연결 수립 타임아웃 (초)
    pub dial_timeout_secs: u64,
    /// 저장소 호출 기한 (초)
    pub query_timeout_secs: u64,
    /// 동시 요청 최대 수
    pub max_open_conns: usize,
    /// 유휴 연결 최대 수
    pub max_idle_conns: usize,
    /// 행 보존 기간 (일, ClickHouse 테이블 TTL, 인메모리 저장소는 삽입 시 정리)
    pub retention_days: u32,
    /// 쿼리 실행 제한
    #[serde(default)]
    pub settings: QuerySettings,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "clickhouse".to_owned(),
            url: "http://clickhouse:8123".to_owned(),
            database: "default".to_owned(),
            username: "default".to_owned(),
            password: String::new(),
            table: "logs".to_owned(),
            dial_timeout_secs: 5,
            query_timeout_secs: 10,
            max_open_conns: 100,
            max_idle_conns: 50,
            retention_days: 30,
            settings: QuerySettings::default(),
        }
    }
}

impl StorageConfig {
    fn validate(&self) -> Result<(), WatchdataError> {
        let valid_backends = ["clickhouse", "memory"];
        if !valid_backends.contains(&self.backend.as_str()) {
            return Err(invalid(
                "storage.backend",
                format!("must be one of: {}", valid_backends.join(", ")),
            ));
        }

        if self.backend == "clickhouse" {
            if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
                return Err(invalid(
                    "storage.url",
                    "must be an http:// or https:// URL".to_owned(),
                ));
            }
            if !is_identifier(&self.database) {
                return Err(invalid(
                    "storage.database",
                    "must contain only ASCII letters, digits and '_'".to_owned(),
                ));
            }
        }

        if !is_identifier(&self.table) {
            return Err(invalid(
                "storage.table",
                "must contain only ASCII letters, digits and '_'".to_owned(),
            ));
        }

        if self.dial_timeout_secs == 0 {
            return Err(invalid(
                "storage.dial_timeout_secs",
                "must be greater than 0".to_owned(),
            ));
        }

        if self.query_timeout_secs == 0 {
            return Err(invalid(
                "storage.query_timeout_secs",
                "must be greater than 0".to_owned(),
            ));
        }

        if self.max_open_conns == 0 {
            return Err(invalid(
                "storage.max_open_conns",
                "must be greater than 0".to_owned(),
            ));
        }

        if self.retention_days == 0 {
            return Err(invalid(
                "storage.retention_days",
                "must be greater than 0".to_owned(),
            ));
        }

        Ok(())
    }
}

/// ClickHouse 쿼리 실행 제한 (0은 서버 기본값 사용)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySettings {
    /// 쿼리 최대 실행 시간 (초)
    pub max_execution_time: u64,
    /// 분산 쿼리 leaf 노드 최대 실행 시간 (초)
    pub max_execution_time_leaf: u64,
    /// 실행 속도 검사 전 대기 시간 (초)
    pub timeout_before_checking_execution_speed: u64,
    /// 쿼리당 최대 읽기 바이트
    pub max_bytes_to_read: u64,
}

impl QuerySettings {
    /// 0이 아닌 설정만 `(이름, 값)` 쌍으로 반환합니다.
    pub fn non_default(&self) -> Vec<(&'static str, String)> {
        [
            ("max_execution_time", self.max_execution_time),
            ("max_execution_time_leaf", self.max_execution_time_leaf),
            (
                "timeout_before_checking_execution_speed",
                self.timeout_before_checking_execution_speed,
            ),
            ("max_bytes_to_read", self.max_bytes_to_read),
        ]
        .into_iter()
        .filter(|(_, v)| *v > 0)
        .map(|(k, v)| (k, v.to_string()))
        .collect()
    }
}

/// 변경 감지 및 팬아웃 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSection {
    /// 변경 감지 주기 (밀리초)
    pub poll_interval_ms: u64,
    /// 시작 시 워터마크 되감기 (초)
    pub poll_lookback_secs: u64,
    /// 팬아웃 큐 용량
    pub fanout_queue_capacity: usize,
    /// 구독자별 전송 버퍼 크기
    pub subscriber_buffer: usize,
    /// 전달 방식 (poll, immediate)
    pub delivery_mode: String,
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            poll_lookback_secs: 5,
            fanout_queue_capacity: 1000,
            subscriber_buffer: 256,
            delivery_mode: "poll".to_owned(),
        }
    }
}

impl StreamSection {
    fn validate(&self) -> Result<(), WatchdataError> {
        if self.poll_interval_ms == 0 {
            return Err(invalid(
                "stream.poll_interval_ms",
                "must be greater than 0".to_owned(),
            ));
        }

        if self.fanout_queue_capacity == 0 {
            return Err(invalid(
                "stream.fanout_queue_capacity",
                "must be greater than 0".to_owned(),
            ));
        }

        if self.subscriber_buffer == 0 {
            return Err(invalid(
                "stream.subscriber_buffer",
                "must be greater than 0".to_owned(),
            ));
        }

        let valid_modes = ["poll", "immediate"];
        if !valid_modes.contains(&self.delivery_mode.as_str()) {
            return Err(invalid(
                "stream.delivery_mode",
                format!("must be one of: {}", valid_modes.join(", ")),
            ));
        }

        Ok(())
    }
}

/// HTTP/WebSocket 서버 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 수신 주소
    pub listen_addr: String,
    /// 수신 포트
    pub port: u16,
    /// 수집 요청 본문 최대 크기 (바이트)
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_owned(),
            port: 8080,
            max_body_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Prometheus 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 수신 주소
    pub listen_addr: String,
    /// 수신 포트
    pub port: u16,
    /// 스크레이프 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9100,
            endpoint: "/metrics".to_owned(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    override_parsed(target, env_key, "bool");
}

fn override_u16(target: &mut u16, env_key: &str) {
    override_parsed(target, env_key, "u16");
}

fn override_u32(target: &mut u32, env_key: &str) {
    override_parsed(target, env_key, "u32");
}

fn override_u64(target: &mut u64, env_key: &str) {
    override_parsed(target, env_key, "u64");
}

fn override_usize(target: &mut usize, env_key: &str) {
    override_parsed(target, env_key, "usize");
}

fn override_parsed<T: std::str::FromStr>(target: &mut T, env_key: &str, type_name: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                expected = type_name,
                "failed to parse env var, ignoring"
            ),
        }
    }
}
