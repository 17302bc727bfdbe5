#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`store`]: 컬럼 저장소 capability trait과 ClickHouse/인메모리 구현, 속성 코덱
//! - [`writer`]: 기한이 적용된 배치 쓰기/조회 경로 (유일한 기록 작성자)
//! - [`intake`]: 생산자 배치를 받아 저장소에 기록
//! - [`poller`]: 워터마크 이후의 새 레코드를 주기적으로 찾아 팬아웃 큐로 전달
//! - [`hub`]: 구독자 레지스트리, 유한 팬아웃 큐, 드레인 워커
//! - [`stream`]: 전체 조립 (Pipeline trait 구현)
//! - [`config`]: 스트림 설정 (core 설정 확장)
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! producer -> IngestIntake -> StoreWriter -> (store) <- ChangePoller
//!                                                          |
//!                                  FanOutQueue (drop-on-full)
//!                                                          |
//!                                  drain worker -> FanOutHub -> subscribers
//! ```

pub mod config;
pub mod error;
pub mod hub;
pub mod intake;
pub mod poller;
pub mod store;
pub mod stream;
pub mod writer;

// --- 주요 타입 re-export ---

// 스트림
pub use stream::{LogStream, LogStreamBuilder};

// 설정
pub use config::{DeliveryMode, StreamConfig, StreamConfigBuilder};

// 에러
pub use error::LogStreamError;

// 저장소
pub use store::{ClickHouseStore, LogStore, MAX_RANGE_ROWS, MemoryStore};
pub use writer::StoreWriter;

// 수집 / 변경 감지
pub use intake::{IngestIntake, IngestReceipt};
pub use poller::{ChangePoller, PollOutcome, PollerState, PollerStats};

// 팬아웃
pub use hub::{
    ChannelSink, DeliveryDrop, DeliveryReport, FanOutHub, FanOutReceiver, FanOutSender,
    SubscriberFault, SubscriberId, SubscriberSink, channel_subscriber, fanout_queue,
};
