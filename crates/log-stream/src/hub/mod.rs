//! 팬아웃 허브
//!
//! [`FanOutHub`]는 현재 연결된 구독자 레지스트리입니다. 드레인 워커가 레코드마다
//! [`FanOutHub::deliver`]를 호출하면 모든 구독자에게 한 번씩 쓰고, 실패한 구독자는
//! 순회가 끝난 뒤 한꺼번에 제거합니다.
//!
//! ```text
//! FanOutSender ──▶ [bounded queue] ──▶ drain worker ──▶ FanOutHub
//!                                                         │  │  │
//!                                                         ▼  ▼  ▼
//!                                                      subscriber sinks
//! ```

mod queue;
mod subscriber;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use watchdata_core::metrics as m;
use watchdata_core::types::LogRecord;

pub use queue::{DeliveryDrop, FanOutReceiver, FanOutSender, fanout_queue};
pub use subscriber::{ChannelSink, SubscriberFault, SubscriberId, SubscriberSink, channel_subscriber};

/// 레코드 한 건의 전달 결과
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// 쓰기에 성공한 구독자 수
    pub delivered: usize,
    /// 실패로 제거된 구독자 수
    pub evicted: usize,
}

/// 구독자 레지스트리
///
/// 등록, 해제, 전달은 서로 다른 태스크에서 동시에 호출될 수 있습니다.
/// 내부 잠금은 싱크 쓰기 동안만 유지되며 싱크 쓰기는 블로킹하지 않습니다.
pub struct FanOutHub {
    subscribers: Mutex<HashMap<SubscriberId, Box<dyn SubscriberSink>>>,
    delivered: AtomicU64,
    evicted: AtomicU64,
}

impl Default for FanOutHub {
    fn default() -> Self {
        Self::new()
    }
}

impl FanOutHub {
    /// 빈 허브를 생성합니다.
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            delivered: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriberId, Box<dyn SubscriberSink>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// 구독자를 등록합니다. 같은 식별자가 있으면 교체합니다.
    pub fn register(&self, id: SubscriberId, sink: impl SubscriberSink) {
        let count = {
            let mut subscribers = self.lock();
            subscribers.insert(id, Box::new(sink));
            subscribers.len()
        };
        metrics::gauge!(m::FANOUT_SUBSCRIBERS).set(count as f64);
        info!(subscriber = %id, subscribers = count, "subscriber registered");
    }

    /// 구독자를 해제합니다. 이미 없으면 `false`를 반환합니다.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let (removed, count) = {
            let mut subscribers = self.lock();
            let removed = subscribers.remove(&id).is_some();
            (removed, subscribers.len())
        };
        if removed {
            metrics::gauge!(m::FANOUT_SUBSCRIBERS).set(count as f64);
            info!(subscriber = %id, subscribers = count, "subscriber unregistered");
        }
        removed
    }

    /// 레코드를 모든 구독자에게 한 번씩 씁니다.
    ///
    /// 구독자가 없으면 아무것도 하지 않습니다. 쓰기에 실패한 구독자는 순회 후 제거되며
    /// 같은 순회의 다른 구독자는 영향을 받지 않습니다.
    pub fn deliver(&self, record: &Arc<LogRecord>) -> DeliveryReport {
        let mut subscribers = self.lock();
        if subscribers.is_empty() {
            return DeliveryReport::default();
        }

        let mut failed: Vec<(SubscriberId, SubscriberFault)> = Vec::new();
        let mut delivered = 0usize;
        for (id, sink) in subscribers.iter_mut() {
            match sink.write(record) {
                Ok(()) => delivered += 1,
                Err(fault) => failed.push((*id, fault)),
            }
        }

        for (id, fault) in &failed {
            subscribers.remove(id);
            debug!(subscriber = %id, fault = %fault, "subscriber evicted after failed write");
        }
        let remaining = subscribers.len();
        drop(subscribers);

        let evicted = failed.len();
        self.delivered.fetch_add(delivered as u64, Ordering::Relaxed);
        metrics::counter!(m::FANOUT_DELIVERIES_TOTAL).increment(delivered as u64);
        if evicted > 0 {
            self.evicted.fetch_add(evicted as u64, Ordering::Relaxed);
            metrics::counter!(m::FANOUT_EVICTIONS_TOTAL).increment(evicted as u64);
            metrics::gauge!(m::FANOUT_SUBSCRIBERS).set(remaining as f64);
            info!(evicted, subscribers = remaining, "evicted failing subscribers");
        }

        DeliveryReport { delivered, evicted }
    }

    /// 현재 등록된 구독자 수
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// 누적 전달 횟수
    pub fn delivered_total(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// 누적 제거 구독자 수
    pub fn evicted_total(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use chrono::Utc;

    /// 항상 실패하는 싱크
    struct BrokenSink;

    impl SubscriberSink for BrokenSink {
        fn write(&mut self, _record: &Arc<LogRecord>) -> Result<(), SubscriberFault> {
            Err(SubscriberFault::Disconnected)
        }
    }

    fn record() -> Arc<LogRecord> {
        Arc::new(LogRecord::new(Utc::now(), "hello"))
    }

    #[test]
    fn deliver_without_subscribers_is_noop() {
        let hub = FanOutHub::new();
        assert_eq!(hub.deliver(&record()), DeliveryReport::default());
    }

    #[test]
    fn every_subscriber_receives_once() {
        let hub = FanOutHub::new();
        let (a, mut rx_a) = channel_subscriber(4);
        let (b, mut rx_b) = channel_subscriber(4);
        hub.register(SubscriberId::new(), a);
        hub.register(SubscriberId::new(), b);

        let report = hub.deliver(&record());
        assert_eq!(report.delivered, 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn failing_subscriber_is_evicted_without_affecting_others() {
        let hub = FanOutHub::new();
        let (healthy, mut rx) = channel_subscriber(4);
        hub.register(SubscriberId::new(), healthy);
        hub.register(SubscriberId::new(), BrokenSink);

        let report = hub.deliver(&record());
        assert_eq!(report, DeliveryReport { delivered: 1, evicted: 1 });
        assert_eq!(hub.subscriber_count(), 1);
        assert!(rx.try_recv().is_ok());

        // 다음 레코드는 남은 구독자에게만 전달
        let report = hub.deliver(&record());
        assert_eq!(report, DeliveryReport { delivered: 1, evicted: 0 });
        assert_eq!(hub.evicted_total(), 1);
        assert_eq!(hub.delivered_total(), 2);
    }

    /// 쓰기 시도 횟수를 세고, 첫 쓰기 이후로는 실패하는 싱크
    struct CountingSink {
        attempts: Arc<AtomicUsize>,
    }

    impl SubscriberSink for CountingSink {
        fn write(&mut self, _record: &Arc<LogRecord>) -> Result<(), SubscriberFault> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(())
            } else {
                Err(SubscriberFault::Disconnected)
            }
        }
    }

    #[test]
    fn evicted_subscriber_is_never_written_again() {
        let hub = FanOutHub::new();
        let attempts = Arc::new(AtomicUsize::new(0));
        hub.register(
            SubscriberId::new(),
            CountingSink {
                attempts: Arc::clone(&attempts),
            },
        );

        assert_eq!(hub.deliver(&record()), DeliveryReport { delivered: 1, evicted: 0 });
        assert_eq!(hub.deliver(&record()), DeliveryReport { delivered: 0, evicted: 1 });
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        for _ in 0..5 {
            assert_eq!(hub.deliver(&record()), DeliveryReport::default());
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(hub.evicted_total(), 1);
    }

    #[test]
    fn slow_subscriber_is_evicted_when_buffer_full() {
        let hub = FanOutHub::new();
        let (slow, _rx) = channel_subscriber(1);
        hub.register(SubscriberId::new(), slow);

        assert_eq!(hub.deliver(&record()).delivered, 1);
        assert_eq!(hub.deliver(&record()).evicted, 1);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn unregister_is_idempotent() {
        let hub = FanOutHub::new();
        let id = SubscriberId::new();
        let (sink, _rx) = channel_subscriber(1);
        hub.register(id, sink);

        assert!(hub.unregister(id));
        assert!(!hub.unregister(id));
        assert_eq!(hub.subscriber_count(), 0);
    }
}
