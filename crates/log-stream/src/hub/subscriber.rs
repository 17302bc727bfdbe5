//! 구독자 식별자와 전송 싱크

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use watchdata_core::types::LogRecord;

/// 구독자 고유 식별자
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    /// 새 임의 식별자를 생성합니다.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 구독자 쓰기 실패 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubscriberFault {
    /// 전송 버퍼가 가득 참 (느린 구독자)
    #[error("subscriber buffer full")]
    Full,
    /// 연결이 끊김
    #[error("subscriber disconnected")]
    Disconnected,
}

/// 레코드 한 건을 구독자에게 쓰는 싱크
///
/// `write`는 블로킹하지 않아야 합니다. 실패를 반환한 싱크는 허브에서 즉시 제거됩니다.
pub trait SubscriberSink: Send + 'static {
    /// 레코드를 씁니다.
    fn write(&mut self, record: &Arc<LogRecord>) -> Result<(), SubscriberFault>;
}

/// 유한 mpsc 채널에 레코드를 넣는 싱크
///
/// 수신 측(예: WebSocket 쓰기 태스크)이 실제 전송을 담당합니다.
pub struct ChannelSink {
    tx: mpsc::Sender<Arc<LogRecord>>,
}

impl SubscriberSink for ChannelSink {
    fn write(&mut self, record: &Arc<LogRecord>) -> Result<(), SubscriberFault> {
        self.tx
            .try_send(Arc::clone(record))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SubscriberFault::Full,
                mpsc::error::TrySendError::Closed(_) => SubscriberFault::Disconnected,
            })
    }
}

/// 버퍼 크기 `buffer`의 채널 싱크와 수신기를 생성합니다.
pub fn channel_subscriber(buffer: usize) -> (ChannelSink, mpsc::Receiver<Arc<LogRecord>>) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (ChannelSink { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn subscriber_ids_are_unique() {
        assert_ne!(SubscriberId::new(), SubscriberId::new());
    }

    #[test]
    fn channel_sink_reports_full_then_disconnected() {
        let (mut sink, rx) = channel_subscriber(1);
        let record = Arc::new(LogRecord::new(Utc::now(), "x"));

        assert!(sink.write(&record).is_ok());
        assert_eq!(sink.write(&record), Err(SubscriberFault::Full));

        drop(rx);
        assert_eq!(sink.write(&record), Err(SubscriberFault::Disconnected));
    }
}
