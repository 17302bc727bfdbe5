//! 컬럼 저장소 추상화
//!
//! [`LogStore`] trait은 로그 레코드를 영속화하고 시간 범위로 조회하는
//! 저장소 능력을 추상화합니다. 프로덕션에서는 [`ClickHouseStore`]를,
//! 테스트와 단독 실행에서는 [`MemoryStore`]를 사용합니다.
//!
//! ```text
//!   StoreWriter ──▶ LogStore (trait)
//!                     │         │
//!                     ▼         ▼
//!             ClickHouseStore  MemoryStore
//! ```
//!
//! 모든 구현은 다음을 보장해야 합니다.
//! - `insert_batch`는 배치 전체가 보이거나 전혀 보이지 않습니다.
//! - `query_after`는 `timestamp`가 기준 시각보다 **엄격히** 큰 레코드만 오름차순으로 반환합니다.
//! - `query_range`는 양 끝을 포함하며 내림차순, 최대 `limit`개를 반환합니다.

pub mod clickhouse;
pub mod codec;
pub mod memory;

use std::future::Future;

use chrono::{DateTime, Utc};
use watchdata_core::error::StorageError;
use watchdata_core::types::LogRecord;

pub use clickhouse::ClickHouseStore;
pub use memory::MemoryStore;

/// 범위 조회 한 번에 반환하는 최대 레코드 수
pub const MAX_RANGE_ROWS: usize = 1000;

/// 로그 레코드 저장소 능력
///
/// 모든 메서드는 `Send` future를 반환하므로 tokio 태스크 사이에서
/// `Arc<S>`로 공유할 수 있습니다. 기한(timeout)은 호출자인
/// [`StoreWriter`](crate::writer::StoreWriter)가 적용합니다.
pub trait LogStore: Send + Sync + 'static {
    /// 로그 테이블이 없으면 생성합니다. 여러 번 호출해도 안전해야 합니다.
    fn ensure_schema(&self) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// 저장소 연결 상태를 확인합니다.
    fn ping(&self) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// 레코드 배치를 원자적으로 기록합니다.
    ///
    /// # Errors
    ///
    /// 배치 일부라도 기록할 수 없으면 `StorageError::Insert`를 반환하며
    /// 어떤 레코드도 보이지 않아야 합니다.
    fn insert_batch(
        &self,
        records: &[LogRecord],
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// `since`보다 늦은 레코드를 발생 시각 오름차순으로 반환합니다.
    fn query_after(
        &self,
        since: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<LogRecord>, StorageError>> + Send;

    /// `[start, end]` 범위의 레코드를 발생 시각 내림차순으로 최대 `limit`개 반환합니다.
    fn query_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<LogRecord>, StorageError>> + Send;
}
