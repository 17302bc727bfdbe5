//! 수집 경로
//!
//! [`IngestIntake`]는 생산자 배치를 받아 저장소에 기록합니다. 호출자는 저장소 쓰기만
//! 기다리며, 팬아웃은 변경 감지기가 비동기로 처리합니다. 즉시 전달 모드에서는 저장 직후
//! 팬아웃 큐에 넣지만 큐가 가득 차도 호출자를 막지 않습니다.

use std::sync::Arc;

use tracing::{debug, warn};

use watchdata_core::error::StorageError;
use watchdata_core::metrics as m;
use watchdata_core::types::LogRecord;

use crate::hub::FanOutSender;
use crate::store::LogStore;
use crate::writer::StoreWriter;

/// 수집 결과
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct IngestReceipt {
    /// 저장된 레코드 수
    pub accepted: usize,
    /// 즉시 전달 모드에서 팬아웃 큐에 넣은 수
    #[serde(skip_serializing_if = "is_zero")]
    pub enqueued: usize,
    /// 즉시 전달 모드에서 큐가 가득 차 버린 수
    #[serde(skip_serializing_if = "is_zero")]
    pub dropped: usize,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

/// 생산자 배치 수집기
pub struct IngestIntake<S: LogStore> {
    writer: StoreWriter<S>,
    immediate: Option<FanOutSender>,
}

impl<S: LogStore> Clone for IngestIntake<S> {
    fn clone(&self) -> Self {
        Self {
            writer: self.writer.clone(),
            immediate: self.immediate.clone(),
        }
    }
}

impl<S: LogStore> IngestIntake<S> {
    /// 변경 감지기 전달 모드의 수집기를 생성합니다.
    pub fn new(writer: StoreWriter<S>) -> Self {
        Self {
            writer,
            immediate: None,
        }
    }

    /// 저장 직후 팬아웃 큐에 넣는 즉시 전달 모드로 전환합니다.
    pub fn with_immediate_delivery(mut self, sender: FanOutSender) -> Self {
        self.immediate = Some(sender);
        self
    }

    /// 배치를 저장합니다.
    ///
    /// 빈 배치는 저장소를 호출하지 않고 `accepted == 0`을 반환합니다.
    ///
    /// # Errors
    ///
    /// 저장에 실패하면 배치 전체가 거부되며 어떤 레코드도 구독자에게 전달되지 않습니다.
    pub async fn ingest(&self, records: Vec<LogRecord>) -> Result<IngestReceipt, StorageError> {
        if records.is_empty() {
            return Ok(IngestReceipt::default());
        }

        let count = records.len();
        if let Err(e) = self.writer.insert(&records).await {
            metrics::counter!(m::INGEST_BATCHES_REJECTED_TOTAL).increment(1);
            warn!(count, error = %e, "ingest batch rejected");
            return Err(e);
        }
        metrics::counter!(m::INGEST_RECORDS_TOTAL).increment(count as u64);

        let mut receipt = IngestReceipt {
            accepted: count,
            ..IngestReceipt::default()
        };

        if let Some(sender) = &self.immediate {
            for record in records {
                match sender.try_enqueue(Arc::new(record)) {
                    Ok(()) => receipt.enqueued += 1,
                    Err(_) => receipt.dropped += 1,
                }
            }
        }

        debug!(
            accepted = receipt.accepted,
            enqueued = receipt.enqueued,
            dropped = receipt.dropped,
            "ingest batch stored"
        );
        Ok(receipt)
    }
}
