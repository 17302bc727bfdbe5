//! 인메모리 저장소
//!
//! ClickHouse 없이 데몬을 실행하거나 테스트할 때 사용합니다.
//! 레코드는 ClickHouse와 같은 [`StoredRow`] 형태로 보관되므로
//! 속성 인코딩과 디코딩 규칙이 동일하게 적용됩니다.
//!
//! 조회는 매번 전체 행을 훑습니다. 크기를 묶는 것은 보존 기간뿐이므로
//! 데몬은 `storage.retention_days`로 만든 저장소를 사용합니다.

use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use tracing::debug;
use watchdata_core::error::StorageError;
use watchdata_core::types::LogRecord;

use super::LogStore;
use super::codec::StoredRow;

/// 프로세스 메모리에 행을 보관하는 저장소
///
/// [`MemoryStore::new`]로 만든 저장소는 행을 지우지 않습니다.
/// [`MemoryStore::with_retention`]을 쓰면 삽입할 때마다 타임스탬프가
/// 보존 기간보다 오래된 행을 제거합니다 (ClickHouse 테이블 TTL과 같은 기준).
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: RwLock<Vec<StoredRow>>,
    retention: Option<Duration>,
}

impl MemoryStore {
    /// 보존 기간 없이 빈 저장소를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 보존 기간을 적용하는 빈 저장소를 생성합니다.
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            rows: RwLock::default(),
            retention: Some(retention),
        }
    }

    /// 일 단위 보존 기간으로 저장소를 생성합니다.
    pub fn with_retention_days(days: u32) -> Self {
        Self::with_retention(Duration::days(i64::from(days)))
    }

    /// 설정된 보존 기간
    pub fn retention(&self) -> Option<Duration> {
        self.retention
    }

    /// `now` 기준으로 보존 기간이 지난 행을 제거하고 제거한 행 수를 반환합니다.
    pub fn prune_expired(&self, now: DateTime<Utc>) -> usize {
        let Some(retention) = self.retention else {
            return 0;
        };
        let cutoff = now.checked_sub_signed(retention).map_or(i64::MIN, bound);

        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        let before = rows.len();
        rows.retain(|row| row.ts_ns >= cutoff);
        let removed = before - rows.len();
        drop(rows);

        if removed > 0 {
            debug!(removed, "pruned expired rows from memory store");
        }
        removed
    }

    /// 저장된 행 수
    pub fn len(&self) -> usize {
        self.rows.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// 저장된 행이 없는지 여부
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 원시 행을 직접 추가합니다. 손상된 속성 인코딩을 재현할 때 사용합니다.
    pub fn push_raw(&self, row: StoredRow) {
        self.rows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(row);
    }

    fn select(&self, keep: impl Fn(i64) -> bool) -> Vec<StoredRow> {
        self.rows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|row| keep(row.ts_ns))
            .cloned()
            .collect()
    }
}

fn bound(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_nanos_opt().unwrap_or(if ts < DateTime::UNIX_EPOCH {
        i64::MIN
    } else {
        i64::MAX
    })
}

impl LogStore for MemoryStore {
    async fn ensure_schema(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn insert_batch(&self, records: &[LogRecord]) -> Result<(), StorageError> {
        // 전체를 먼저 인코딩해서 하나라도 실패하면 아무것도 보이지 않게 함
        let encoded = records
            .iter()
            .map(StoredRow::encode)
            .collect::<Result<Vec<_>, _>>()?;

        self.rows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(encoded);
        self.prune_expired(Utc::now());
        Ok(())
    }

    async fn query_after(&self, since: DateTime<Utc>) -> Result<Vec<LogRecord>, StorageError> {
        let since = bound(since);
        let mut rows = self.select(|ts| ts > since);
        rows.sort_by_key(|row| row.ts_ns);
        Ok(rows.into_iter().map(StoredRow::decode).collect())
    }

    async fn query_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<LogRecord>, StorageError> {
        let (start, end) = (bound(start), bound(end));
        let mut rows = self.select(|ts| ts >= start && ts <= end);
        rows.sort_by(|a, b| b.ts_ns.cmp(&a.ts_ns));
        rows.truncate(limit);
        Ok(rows.into_iter().map(StoredRow::decode).collect())
    }
}
