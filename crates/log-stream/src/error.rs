//! 로그 스트림 에러 타입
//!
//! [`LogStreamError`]는 스트림 조립과 생명주기에서 발생하는 에러를 표현합니다.
//! `From<LogStreamError> for WatchdataError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.
//!
//! 저장소 실패는 [`StorageError`]로 그대로 전파되며, 팬아웃 드롭과 구독자 실패는
//! [`hub`](crate::hub) 모듈의 자체 타입으로 국소 처리됩니다.

use watchdata_core::error::{ConfigError, PipelineError, StorageError, WatchdataError};

/// 로그 스트림 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum LogStreamError {
    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 저장소 에러
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// 생명주기 상태 에러 (재시작 불가 등)
    #[error("lifecycle error: {0}")]
    Lifecycle(String),
}

impl From<LogStreamError> for WatchdataError {
    fn from(err: LogStreamError) -> Self {
        match err {
            LogStreamError::Config { field, reason } => {
                WatchdataError::Config(ConfigError::InvalidValue { field, reason })
            }
            LogStreamError::Storage(e) => WatchdataError::Storage(e),
            LogStreamError::Lifecycle(reason) => {
                WatchdataError::Pipeline(PipelineError::InitFailed(reason))
            }
        }
    }
}
