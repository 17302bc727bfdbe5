//! 저장소 쓰기/조회 경로
//!
//! [`StoreWriter`]는 모든 저장소 호출에 기한을 적용하고 지연 시간과 실패를 메트릭으로
//! 남깁니다. 재시도는 하지 않으며 실패는 호출자에게 그대로 전달됩니다.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::warn;

use watchdata_core::error::StorageError;
use watchdata_core::metrics as m;
use watchdata_core::types::LogRecord;

use crate::store::{LogStore, MAX_RANGE_ROWS};

/// 기한이 적용된 저장소 핸들
pub struct StoreWriter<S: LogStore> {
    store: Arc<S>,
    timeout: Duration,
}

impl<S: LogStore> Clone for StoreWriter<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            timeout: self.timeout,
        }
    }
}

impl<S: LogStore> StoreWriter<S> {
    /// 저장소와 호출 기한으로 생성합니다.
    pub fn new(store: Arc<S>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// 내부 저장소 참조
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// 호출 기한
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 배치를 기록합니다. 빈 배치는 저장소를 호출하지 않습니다.
    ///
    /// # Errors
    ///
    /// 저장소가 거부하거나 기한을 넘기면 배치 전체가 실패합니다.
    pub async fn insert(&self, records: &[LogRecord]) -> Result<(), StorageError> {
        if records.is_empty() {
            return Ok(());
        }
        self.timed("insert", self.store.insert_batch(records)).await
    }

    /// `since`보다 늦은 레코드를 오름차순으로 조회합니다.
    pub async fn query_after(&self, since: DateTime<Utc>) -> Result<Vec<LogRecord>, StorageError> {
        self.timed("query_after", self.store.query_after(since))
            .await
    }

    /// `[start, end]` 범위를 내림차순으로 최대 [`MAX_RANGE_ROWS`]개 조회합니다.
    ///
    /// `start > end`이면 저장소를 호출하지 않고 빈 결과를 반환합니다.
    pub async fn query_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<LogRecord>, StorageError> {
        if start > end {
            return Ok(Vec::new());
        }
        self.timed(
            "query_range",
            self.store.query_range(start, end, MAX_RANGE_ROWS),
        )
        .await
    }

    /// 로그 테이블을 준비합니다.
    pub async fn ensure_schema(&self) -> Result<(), StorageError> {
        self.timed("ensure_schema", self.store.ensure_schema())
            .await
    }

    /// 저장소 연결을 확인합니다.
    pub async fn ping(&self) -> Result<(), StorageError> {
        self.timed("ping", self.store.ping()).await
    }

    async fn timed<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, StorageError>>,
    ) -> Result<T, StorageError> {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout {
                operation: operation.to_owned(),
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        };

        metrics::histogram!(m::STORE_OPERATION_DURATION_SECONDS, m::LABEL_OPERATION => operation)
            .record(started.elapsed().as_secs_f64());

        if let Err(e) = &result {
            metrics::counter!(
                m::STORE_ERRORS_TOTAL,
                m::LABEL_OPERATION => operation,
                m::LABEL_ERROR_KIND => e.kind()
            )
            .increment(1);
            warn!(operation, kind = e.kind(), error = %e, "store call failed");
        }
        result
    }
}
