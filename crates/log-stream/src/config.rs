//! 로그 스트림 설정
//!
//! [`StreamConfig`]는 core의 `[stream]`, `[storage]` 섹션을 기반으로
//! 스트림 전용 설정을 제공합니다.
//!
//! # 사용 예시
//! ```ignore
//! use watchdata_core::config::WatchdataConfig;
//! use watchdata_log_stream::config::StreamConfig;
//!
//! let core_config = WatchdataConfig::default();
//! let config = StreamConfig::from_core(&core_config);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LogStreamError;

/// 새 레코드를 구독자에게 전달하는 방식
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// 변경 감지기가 저장소를 폴링해 전달 (기본값)
    #[default]
    Poll,
    /// 수집 경로가 저장 직후 팬아웃 큐에 바로 넣음 (변경 감지기 비활성)
    Immediate,
}

impl DeliveryMode {
    fn from_name(name: &str) -> Self {
        match name {
            "immediate" => Self::Immediate,
            _ => Self::Poll,
        }
    }
}

/// 로그 스트림 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// 변경 감지 주기 (밀리초)
    pub poll_interval_ms: u64,
    /// 시작 시 워터마크 되감기 (초)
    pub poll_lookback_secs: u64,
    /// 팬아웃 큐 용량
    pub fanout_queue_capacity: usize,
    /// 구독자별 전송 버퍼 크기
    pub subscriber_buffer: usize,
    /// 전달 방식
    pub delivery_mode: DeliveryMode,

    // --- 확장 설정 (core `[stream]`에 없는 필드) ---
    /// 저장소 호출 기한 (밀리초, core `storage.query_timeout_secs`에서 파생)
    pub store_timeout_ms: u64,
    /// 이 사용률을 넘으면 health_check가 Degraded를 보고
    pub degraded_queue_ratio: f64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            poll_lookback_secs: 5,
            fanout_queue_capacity: 1000,
            subscriber_buffer: 256,
            delivery_mode: DeliveryMode::Poll,
            store_timeout_ms: 10_000,
            degraded_queue_ratio: 0.9,
        }
    }
}

impl StreamConfig {
    /// core 설정에서 스트림 설정을 생성합니다.
    ///
    /// core 설정에 없는 확장 필드는 기본값이 적용됩니다.
    pub fn from_core(core: &watchdata_core::config::WatchdataConfig) -> Self {
        Self {
            poll_interval_ms: core.stream.poll_interval_ms,
            poll_lookback_secs: core.stream.poll_lookback_secs,
            fanout_queue_capacity: core.stream.fanout_queue_capacity,
            subscriber_buffer: core.stream.subscriber_buffer,
            delivery_mode: DeliveryMode::from_name(&core.stream.delivery_mode),
            store_timeout_ms: core.storage.query_timeout_secs.saturating_mul(1000),
            ..Self::default()
        }
    }

    /// 변경 감지 주기
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// 시작 워터마크 되감기
    pub fn poll_lookback(&self) -> Duration {
        Duration::from_secs(self.poll_lookback_secs)
    }

    /// 저장소 호출 기한
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), LogStreamError> {
        const MAX_QUEUE_CAPACITY: usize = 1_000_000;
        const MAX_POLL_INTERVAL_MS: u64 = 3_600_000; // 1 hour
        const MAX_LOOKBACK_SECS: u64 = 86_400; // 1 day

        if self.poll_interval_ms == 0 || self.poll_interval_ms > MAX_POLL_INTERVAL_MS {
            return Err(LogStreamError::Config {
                field: "poll_interval_ms".to_owned(),
                reason: format!("must be 1-{}", MAX_POLL_INTERVAL_MS),
            });
        }

        if self.poll_lookback_secs > MAX_LOOKBACK_SECS {
            return Err(LogStreamError::Config {
                field: "poll_lookback_secs".to_owned(),
                reason: format!("must be at most {}", MAX_LOOKBACK_SECS),
            });
        }

        if self.fanout_queue_capacity == 0 || self.fanout_queue_capacity > MAX_QUEUE_CAPACITY {
            return Err(LogStreamError::Config {
                field: "fanout_queue_capacity".to_owned(),
                reason: format!("must be 1-{}", MAX_QUEUE_CAPACITY),
            });
        }

        if self.subscriber_buffer == 0 {
            return Err(LogStreamError::Config {
                field: "subscriber_buffer".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        if self.store_timeout_ms == 0 {
            return Err(LogStreamError::Config {
                field: "store_timeout_ms".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        if !(self.degraded_queue_ratio > 0.0 && self.degraded_queue_ratio <= 1.0) {
            return Err(LogStreamError::Config {
                field: "degraded_queue_ratio".to_owned(),
                reason: "must be in (0, 1]".to_owned(),
            });
        }

        Ok(())
    }
}

/// 스트림 설정 빌더
#[derive(Default)]
pub struct StreamConfigBuilder {
    config: StreamConfig,
}

impl StreamConfigBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 변경 감지 주기를 설정합니다.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// 시작 워터마크 되감기(초)를 설정합니다.
    pub fn poll_lookback_secs(mut self, secs: u64) -> Self {
        self.config.poll_lookback_secs = secs;
        self
    }

    /// 팬아웃 큐 용량을 설정합니다.
    pub fn fanout_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.fanout_queue_capacity = capacity;
        self
    }

    /// 구독자별 전송 버퍼 크기를 설정합니다.
    pub fn subscriber_buffer(mut self, size: usize) -> Self {
        self.config.subscriber_buffer = size;
        self
    }

    /// 전달 방식을 설정합니다.
    pub fn delivery_mode(mut self, mode: DeliveryMode) -> Self {
        self.config.delivery_mode = mode;
        self
    }

    /// 저장소 호출 기한을 설정합니다.
    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.config.store_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// 설정을 검증하고 `StreamConfig`를 생성합니다.
    pub fn build(self) -> Result<StreamConfig, LogStreamError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
