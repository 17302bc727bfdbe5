//! 스트림 오케스트레이션 -- 수집/저장/변경 감지/팬아웃의 전체 흐름을 관리합니다.
//!
//! [`LogStream`]은 core의 [`Pipeline`](watchdata_core::pipeline::Pipeline) trait을 구현하여
//! `watchdata-daemon`에서 시작/정지/상태 확인 생명주기로 관리됩니다.
//!
//! # 내부 아키텍처
//! ```text
//! IngestIntake -> StoreWriter -> store <- ChangePoller -> FanOutSender
//!                                                              |
//!                                  FanOutHub <- drain worker <-+
//! ```

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use watchdata_core::error::{PipelineError, WatchdataError};
use watchdata_core::pipeline::{HealthStatus, Pipeline};

use crate::config::{DeliveryMode, StreamConfig};
use crate::error::LogStreamError;
use crate::hub::{FanOutHub, FanOutReceiver, FanOutSender, fanout_queue};
use crate::intake::IngestIntake;
use crate::poller::{ChangePoller, PollerStats};
use crate::store::LogStore;
use crate::writer::StoreWriter;

/// 스트림 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    /// 초기화됨, 아직 시작하지 않음
    Initialized,
    /// 실행 중
    Running,
    /// 정지됨
    Stopped,
}

/// 로그 스트림 -- 저장소 기록과 실시간 재배포를 묶은 단위입니다.
///
/// # 사용 예시
/// ```ignore
/// use std::sync::Arc;
/// use watchdata_log_stream::{LogStreamBuilder, MemoryStore};
///
/// let mut stream = LogStreamBuilder::new()
///     .store(Arc::new(MemoryStore::new()))
///     .build()?;
/// stream.start().await?;
/// ```
pub struct LogStream<S: LogStore> {
    /// 스트림 설정
    config: StreamConfig,
    /// 현재 상태
    state: StreamState,
    /// 저장소 쓰기/조회 경로
    writer: StoreWriter<S>,
    /// 수집기
    intake: IngestIntake<S>,
    /// 구독자 레지스트리
    hub: Arc<FanOutHub>,
    /// 팬아웃 큐 송신 측
    sender: FanOutSender,
    /// 팬아웃 큐 수신 측 (start에서 드레인 워커로 이동)
    receiver: Option<FanOutReceiver>,
    /// 변경 감지기 통계
    poller_stats: Arc<PollerStats>,
    /// 백그라운드 태스크 취소 토큰
    cancel: CancellationToken,
    /// 백그라운드 태스크 핸들
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl<S: LogStore> LogStream<S> {
    /// 현재 상태를 반환합니다.
    pub fn state_name(&self) -> &str {
        match self.state {
            StreamState::Initialized => "initialized",
            StreamState::Running => "running",
            StreamState::Stopped => "stopped",
        }
    }

    /// 스트림 설정
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// 전달 방식
    pub fn delivery_mode(&self) -> DeliveryMode {
        self.config.delivery_mode
    }

    /// 수집기 핸들 (복제해서 여러 태스크에서 사용)
    pub fn intake(&self) -> IngestIntake<S> {
        self.intake.clone()
    }

    /// 저장소 쓰기/조회 핸들
    pub fn writer(&self) -> StoreWriter<S> {
        self.writer.clone()
    }

    /// 구독자 레지스트리
    pub fn hub(&self) -> Arc<FanOutHub> {
        Arc::clone(&self.hub)
    }

    /// 팬아웃 큐 송신 측
    pub fn fanout_sender(&self) -> FanOutSender {
        self.sender.clone()
    }

    /// 팬아웃 큐에서 버려진 레코드 수
    pub fn dropped_count(&self) -> u64 {
        self.sender.dropped_count()
    }

    /// 현재 구독자 수
    pub fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count()
    }

    /// 변경 감지기 통계
    pub fn poller_stats(&self) -> &PollerStats {
        &self.poller_stats
    }
}

impl<S: LogStore> Pipeline for LogStream<S> {
    async fn start(&mut self) -> Result<(), WatchdataError> {
        if self.state == StreamState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }
        let Some(receiver) = self.receiver.take() else {
            return Err(LogStreamError::Lifecycle("stream cannot be restarted".to_owned()).into());
        };

        info!(mode = ?self.config.delivery_mode, "starting log stream");

        // 1. 테이블 준비
        if let Err(e) = self.writer.ensure_schema().await {
            self.receiver = Some(receiver);
            return Err(LogStreamError::from(e).into());
        }

        // 2. 드레인 워커
        let hub = Arc::clone(&self.hub);
        let cancel = self.cancel.clone();
        self.tasks
            .push(tokio::spawn(receiver.drain_into(hub, cancel)));

        // 3. 변경 감지기 (즉시 전달 모드에서는 수집 경로가 직접 큐에 넣음)
        if self.config.delivery_mode == DeliveryMode::Poll {
            let poller = ChangePoller::new(
                self.writer.clone(),
                self.sender.clone(),
                self.config.poll_interval(),
                self.config.poll_lookback(),
                Arc::clone(&self.poller_stats),
            );
            self.tasks.push(tokio::spawn(poller.run(self.cancel.clone())));
        }

        self.state = StreamState::Running;
        info!("log stream started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), WatchdataError> {
        if self.state != StreamState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        info!("stopping log stream");
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "stream task ended abnormally");
            }
        }

        self.state = StreamState::Stopped;
        info!(dropped = self.sender.dropped_count(), "log stream stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            StreamState::Running => {
                let utilization = self.sender.utilization();
                if utilization > self.config.degraded_queue_ratio {
                    HealthStatus::Degraded(format!(
                        "fan-out queue utilization high: {:.1}%",
                        utilization * 100.0
                    ))
                } else if self.poller_stats.last_failed() {
                    HealthStatus::Degraded("last poll cycle failed".to_owned())
                } else {
                    HealthStatus::Healthy
                }
            }
            StreamState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            StreamState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// 로그 스트림 빌더
///
/// 저장소는 필수이며, 허브를 지정하지 않으면 새로 생성합니다.
pub struct LogStreamBuilder<S: LogStore> {
    config: StreamConfig,
    store: Option<Arc<S>>,
    hub: Option<Arc<FanOutHub>>,
}

impl<S: LogStore> LogStreamBuilder<S> {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: StreamConfig::default(),
            store: None,
            hub: None,
        }
    }

    /// 스트림 설정을 지정합니다.
    pub fn config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    /// 저장소를 지정합니다.
    pub fn store(mut self, store: Arc<S>) -> Self {
        self.store = Some(store);
        self
    }

    /// 외부에서 만든 구독자 레지스트리를 사용합니다.
    pub fn hub(mut self, hub: Arc<FanOutHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    /// 스트림을 빌드합니다.
    ///
    /// # Errors
    ///
    /// 설정이 유효하지 않거나 저장소가 지정되지 않았으면 `LogStreamError::Config`를 반환합니다.
    pub fn build(self) -> Result<LogStream<S>, LogStreamError> {
        self.config.validate()?;

        let store = self.store.ok_or_else(|| LogStreamError::Config {
            field: "store".to_owned(),
            reason: "a log store is required".to_owned(),
        })?;

        let writer = StoreWriter::new(store, self.config.store_timeout());
        let (sender, receiver) = fanout_queue(self.config.fanout_queue_capacity);

        let intake = match self.config.delivery_mode {
            DeliveryMode::Poll => IngestIntake::new(writer.clone()),
            DeliveryMode::Immediate => {
                IngestIntake::new(writer.clone()).with_immediate_delivery(sender.clone())
            }
        };

        Ok(LogStream {
            config: self.config,
            state: StreamState::Initialized,
            writer,
            intake,
            hub: self.hub.unwrap_or_default(),
            sender,
            receiver: Some(receiver),
            poller_stats: Arc::new(PollerStats::default()),
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        })
    }
}

impl<S: LogStore> Default for LogStreamBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn build() -> LogStream<MemoryStore> {
        LogStreamBuilder::new()
            .store(Arc::new(MemoryStore::new()))
            .build()
            .unwrap()
    }

    #[test]
    fn builder_creates_stream() {
        let stream = build();
        assert_eq!(stream.state_name(), "initialized");
        assert_eq!(stream.delivery_mode(), DeliveryMode::Poll);
        assert_eq!(stream.subscriber_count(), 0);
    }

    #[test]
    fn builder_without_store_fails() {
        let result = LogStreamBuilder::<MemoryStore>::new().build();
        assert!(matches!(result, Err(LogStreamError::Config { .. })));
    }

    #[test]
    fn builder_with_invalid_config_fails() {
        let config = StreamConfig {
            fanout_queue_capacity: 0,
            ..Default::default()
        };
        let result = LogStreamBuilder::new()
            .config(config)
            .store(Arc::new(MemoryStore::new()))
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn lifecycle_start_stop() {
        let mut stream = build();
        assert!(stream.health_check().await.is_unhealthy());
        assert!(stream.stop().await.is_err());

        stream.start().await.unwrap();
        assert_eq!(stream.state_name(), "running");
        assert!(stream.health_check().await.is_healthy());
        assert!(stream.start().await.is_err());

        stream.stop().await.unwrap();
        assert_eq!(stream.state_name(), "stopped");
        assert!(stream.health_check().await.is_unhealthy());

        // 정지 후 재시작은 지원하지 않음
        assert!(stream.start().await.is_err());
    }
}
