//! 변경 감지기
//!
//! [`ChangePoller`]는 주기적으로 워터마크 이후에 저장된 레코드를 조회해
//! 팬아웃 큐로 보냅니다. 워터마크는 시작 시 `now - lookback`이며
//! 전달한 레코드 중 가장 늦은 발생 시각으로만 전진합니다.
//!
//! 여기서 "전달"은 레코드를 큐에 넣기를 시도한 것을 뜻합니다. 큐가 가득 차서
//! 버려진 레코드도 전달된 것으로 보며(구독자 쓰기 실패와 같은 실시간 경로의 손실),
//! 따라서 워터마크는 항상 지금까지 전달한 레코드의 최대 발생 시각과 같습니다.
//!
//! 같은 나노초에 저장된 레코드가 두 폴링 주기에 걸쳐 나뉘면 뒤쪽이 누락될 수 있고,
//! 지연 도착한(워터마크보다 이른 발생 시각의) 레코드는 실시간 경로로 전달되지 않습니다.
//! 두 경우 모두 저장소에는 남아 있습니다.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use watchdata_core::error::StorageError;
use watchdata_core::metrics as m;

use crate::hub::FanOutSender;
use crate::store::LogStore;
use crate::writer::StoreWriter;

/// 변경 감지기 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    /// 다음 주기 대기 중
    Idle,
    /// 저장소 조회 중
    Polling,
}

/// 변경 감지기 누적 통계 (스트림 health_check와 공유)
#[derive(Debug, Default)]
pub struct PollerStats {
    cycles: AtomicU64,
    errors: AtomicU64,
    forwarded: AtomicU64,
    last_failed: AtomicBool,
}

impl PollerStats {
    /// 완료된 주기 수
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// 실패한 주기 수
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// 큐에 넣은 레코드 수
    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    /// 마지막 주기의 실패 여부
    pub fn last_failed(&self) -> bool {
        self.last_failed.load(Ordering::Relaxed)
    }
}

/// 한 주기의 결과
///
/// `found` 개의 레코드가 모두 전달되었고 그중 `forwarded`는 큐에 들어갔으며
/// `dropped`는 큐가 가득 차 버려졌습니다 (`found == forwarded + dropped`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollOutcome {
    /// 워터마크 이후 레코드 수 (이번 주기에 전달한 레코드 수)
    pub found: usize,
    /// 큐에 들어간 레코드 수
    pub forwarded: usize,
    /// 큐가 가득 차 버려진 레코드 수
    pub dropped: usize,
}

/// 저장소 변경 감지기
pub struct ChangePoller<S: LogStore> {
    writer: StoreWriter<S>,
    sender: FanOutSender,
    interval: Duration,
    watermark: DateTime<Utc>,
    state: PollerState,
    stats: Arc<PollerStats>,
}

impl<S: LogStore> ChangePoller<S> {
    /// 새 변경 감지기를 생성합니다. 워터마크는 `now - lookback`으로 시작합니다.
    pub fn new(
        writer: StoreWriter<S>,
        sender: FanOutSender,
        interval: Duration,
        lookback: Duration,
        stats: Arc<PollerStats>,
    ) -> Self {
        let lookback = chrono::Duration::from_std(lookback).unwrap_or(chrono::Duration::zero());
        Self {
            writer,
            sender,
            interval,
            watermark: Utc::now() - lookback,
            state: PollerState::Idle,
            stats,
        }
    }

    /// 워터마크를 지정합니다.
    pub fn with_watermark(mut self, watermark: DateTime<Utc>) -> Self {
        self.watermark = watermark;
        self
    }

    /// 현재 워터마크
    pub fn watermark(&self) -> DateTime<Utc> {
        self.watermark
    }

    /// 현재 상태
    pub fn state(&self) -> PollerState {
        self.state
    }

    /// 한 주기를 실행합니다.
    ///
    /// 워터마크보다 엄격히 늦은 레코드를 발생 시각 순으로 전달하고, 전달 과정이 끝나면
    /// 마지막 레코드의 시각으로 워터마크를 옮깁니다. 큐가 가득 차 버려진 레코드도
    /// 전달된 것이므로 다음 주기에 다시 보내지 않습니다.
    ///
    /// # Errors
    ///
    /// 저장소 조회가 실패하면 워터마크를 그대로 두고 에러를 반환합니다.
    pub async fn poll_once(&mut self) -> Result<PollOutcome, StorageError> {
        self.state = PollerState::Polling;
        let result = self.writer.query_after(self.watermark).await;
        self.state = PollerState::Idle;
        self.stats.cycles.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::POLLER_CYCLES_TOTAL).increment(1);

        let mut records = match result {
            Ok(records) => {
                self.stats.last_failed.store(false, Ordering::Relaxed);
                records
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                self.stats.last_failed.store(true, Ordering::Relaxed);
                metrics::counter!(m::POLLER_ERRORS_TOTAL).increment(1);
                return Err(e);
            }
        };

        // 저장소 계약을 믿되 경계 조건은 다시 확인
        let watermark = self.watermark;
        records.retain(|r| r.timestamp > watermark);
        records.sort_by_key(|r| r.timestamp);

        let mut outcome = PollOutcome {
            found: records.len(),
            ..PollOutcome::default()
        };
        let Some(latest) = records.last().map(|r| r.timestamp) else {
            return Ok(outcome);
        };

        for record in records {
            match self.sender.try_enqueue(Arc::new(record)) {
                Ok(()) => outcome.forwarded += 1,
                Err(_) => outcome.dropped += 1,
            }
        }

        self.watermark = self.watermark.max(latest);
        self.stats
            .forwarded
            .fetch_add(outcome.forwarded as u64, Ordering::Relaxed);
        metrics::counter!(m::POLLER_RECORDS_FORWARDED_TOTAL).increment(outcome.forwarded as u64);
        metrics::gauge!(m::POLLER_WATERMARK_SECONDS).set(self.watermark.timestamp() as f64);
        debug!(
            found = outcome.found,
            forwarded = outcome.forwarded,
            dropped = outcome.dropped,
            watermark = %self.watermark,
            "poll cycle completed"
        );
        Ok(outcome)
    }

    /// 취소될 때까지 주기적으로 [`poll_once`](Self::poll_once)를 실행합니다.
    ///
    /// 실패한 주기는 로그만 남기고 다음 주기에 같은 워터마크로 다시 시도합니다.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            interval_ms = self.interval.as_millis() as u64,
            watermark = %self.watermark,
            "change poller started"
        );

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                result = self.poll_once() => result,
            };
            if let Err(e) = result {
                warn!(error = %e, watermark = %self.watermark, "poll cycle failed, retrying next tick");
            }
        }

        info!(watermark = %self.watermark, "change poller stopped");
    }
}
