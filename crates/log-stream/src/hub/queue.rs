//! 유한 팬아웃 큐
//!
//! 변경 감지기(또는 즉시 전달 모드의 수집 경로)와 드레인 워커 사이의 큐입니다.
//! 가득 차면 **새 레코드를 버리며** 생산자를 막지 않습니다. 버려진 레코드도
//! 저장소에는 그대로 남아 있습니다.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use watchdata_core::metrics as m;
use watchdata_core::types::LogRecord;

use super::FanOutHub;

/// 팬아웃 큐에 넣지 못한 이유
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryDrop {
    /// 큐가 가득 참
    #[error("fan-out queue full")]
    Full,
    /// 드레인 워커가 종료됨
    #[error("fan-out queue closed")]
    Closed,
}

/// 팬아웃 큐 송신 측 (복제 가능)
#[derive(Clone)]
pub struct FanOutSender {
    tx: mpsc::Sender<Arc<LogRecord>>,
    dropped: Arc<AtomicU64>,
    capacity: usize,
}

/// 팬아웃 큐 수신 측
pub struct FanOutReceiver {
    rx: mpsc::Receiver<Arc<LogRecord>>,
}

/// 용량 `capacity`의 팬아웃 큐를 생성합니다.
pub fn fanout_queue(capacity: usize) -> (FanOutSender, FanOutReceiver) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    (
        FanOutSender {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
            capacity,
        },
        FanOutReceiver { rx },
    )
}

impl FanOutSender {
    /// 레코드를 큐에 넣습니다. 블로킹하지 않습니다.
    ///
    /// # Errors
    ///
    /// 큐가 가득 찼거나 닫혔으면 레코드를 버리고 [`DeliveryDrop`]을 반환합니다.
    pub fn try_enqueue(&self, record: Arc<LogRecord>) -> Result<(), DeliveryDrop> {
        match self.tx.try_send(record) {
            Ok(()) => {
                metrics::gauge!(m::FANOUT_QUEUE_DEPTH).set(self.depth() as f64);
                Ok(())
            }
            Err(e) => {
                let reason = match e {
                    mpsc::error::TrySendError::Full(_) => DeliveryDrop::Full,
                    mpsc::error::TrySendError::Closed(_) => DeliveryDrop::Closed,
                };
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                metrics::counter!(m::FANOUT_DROPPED_TOTAL).increment(1);
                warn!(reason = %reason, dropped_total = total, "record dropped from fan-out");
                Err(reason)
            }
        }
    }

    /// 지금까지 버려진 레코드 수
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// 큐 용량
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 현재 대기 중인 레코드 수
    pub fn depth(&self) -> usize {
        self.capacity.saturating_sub(self.tx.capacity())
    }

    /// 큐 사용률 (0.0 ~ 1.0)
    pub fn utilization(&self) -> f64 {
        self.depth() as f64 / self.capacity as f64
    }
}

impl FanOutReceiver {
    /// 큐를 FIFO 순서로 비우며 각 레코드를 허브로 전달합니다.
    ///
    /// 취소되거나 모든 송신 측이 사라지면 종료합니다.
    pub async fn drain_into(mut self, hub: Arc<FanOutHub>, cancel: CancellationToken) {
        info!("fan-out drain worker started");
        loop {
            let record = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                next = self.rx.recv() => match next {
                    Some(record) => record,
                    None => {
                        debug!("fan-out queue closed");
                        break;
                    }
                },
            };
            metrics::gauge!(m::FANOUT_QUEUE_DEPTH).set(self.rx.len() as f64);
            hub.deliver(&record);
        }
        info!("fan-out drain worker stopped");
    }
}
