//! 저장 행 코덱
//!
//! 로그 레코드를 저장소 행([`StoredRow`])으로 변환하고 되돌립니다.
//! 속성과 리소스 속성은 정규 JSON 객체 문자열로 저장됩니다.
//!
//! - 인코딩: 중복 키는 마지막 값이 이기고 위치는 처음 등장한 순서를 따릅니다.
//! - 디코딩: 손상된 문자열은 빈 속성으로 대체되며 이상 카운터가 증가합니다.
//!   행 자체는 버려지지 않습니다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use watchdata_core::error::StorageError;
use watchdata_core::metrics as m;
use watchdata_core::types::{
    KeyValue, KvObject, LogRecord, OwnedKvObject, Resource, SpanId, TraceId,
};

/// 속성 필드 이름 (이상 카운터 레이블)
pub const FIELD_ATTRIBUTES: &str = "attributes";
/// 리소스 속성 필드 이름 (이상 카운터 레이블)
pub const FIELD_RESOURCE: &str = "resource";

/// 속성 목록을 정규 JSON 객체 문자열로 인코딩합니다.
pub fn encode_attributes(kvs: &[KeyValue]) -> String {
    match serde_json::to_string(&KvObject(kvs)) {
        Ok(encoded) => encoded,
        Err(e) => {
            // AnyValue는 문자열 키만 가지므로 실패하지 않아야 함
            warn!(error = %e, "failed to encode attributes, storing empty set");
            "{}".to_owned()
        }
    }
}

/// 정규 JSON 객체 문자열을 속성 목록으로 디코딩합니다.
///
/// # Errors
///
/// 문자열이 유효한 정규 객체가 아니면 `serde_json::Error`를 반환합니다.
pub fn decode_attributes(encoded: &str) -> Result<Vec<KeyValue>, serde_json::Error> {
    serde_json::from_str::<OwnedKvObject>(encoded).map(OwnedKvObject::into_inner)
}

/// 속성 문자열을 디코딩하고, 실패하면 빈 목록을 반환합니다.
///
/// 빈 문자열은 속성 없음으로 간주하며 이상으로 세지 않습니다.
pub fn decode_or_empty(encoded: &str, field: &'static str) -> Vec<KeyValue> {
    if encoded.is_empty() {
        return Vec::new();
    }
    match decode_attributes(encoded) {
        Ok(kvs) => kvs,
        Err(e) => {
            metrics::counter!(m::STORE_DECODE_ANOMALIES_TOTAL, m::LABEL_FIELD => field)
                .increment(1);
            debug!(field, error = %e, "malformed stored attributes replaced by empty set");
            Vec::new()
        }
    }
}

/// 저장소 한 행
///
/// 필드 이름은 조회 SQL의 컬럼 별칭과 일치합니다.
/// 시각은 Unix epoch 나노초, 식별자는 소문자 hex(없으면 빈 문자열)입니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRow {
    pub ts_ns: i64,
    pub observed_ns: i64,
    pub severity_number: i8,
    pub severity_text: String,
    pub body: String,
    pub attributes: String,
    pub resource: String,
    pub trace_id: String,
    pub span_id: String,
    pub trace_flags: u8,
    pub flags: u32,
    pub dropped_attributes_count: u32,
}

impl StoredRow {
    /// 레코드를 저장 행으로 변환합니다.
    ///
    /// # Errors
    ///
    /// 시각이 나노초 i64 범위(1677~2262년)를 벗어나면 `StorageError::Insert`를 반환합니다.
    pub fn encode(record: &LogRecord) -> Result<Self, StorageError> {
        Ok(Self {
            ts_ns: to_nanos(record.timestamp, "timestamp")?,
            observed_ns: to_nanos(record.observed_time, "observed_time")?,
            severity_number: record.severity_number,
            severity_text: record.severity_text.clone(),
            body: record.body.clone(),
            attributes: encode_attributes(&record.attributes),
            resource: encode_attributes(&record.resource.attributes),
            trace_id: record.trace_id.map(|id| id.to_hex()).unwrap_or_default(),
            span_id: record.span_id.map(|id| id.to_hex()).unwrap_or_default(),
            trace_flags: record.trace_flags,
            flags: record.flags,
            dropped_attributes_count: record.dropped_attributes_count,
        })
    }

    /// 저장 행을 레코드로 복원합니다.
    ///
    /// 손상된 속성이나 식별자는 비어 있는 값으로 대체됩니다.
    pub fn decode(self) -> LogRecord {
        let trace_id = TraceId::parse_optional(&self.trace_id).unwrap_or_else(|e| {
            debug!(error = %e, "malformed stored trace_id dropped");
            None
        });
        let span_id = SpanId::parse_optional(&self.span_id).unwrap_or_else(|e| {
            debug!(error = %e, "malformed stored span_id dropped");
            None
        });

        LogRecord {
            timestamp: DateTime::from_timestamp_nanos(self.ts_ns),
            observed_time: DateTime::from_timestamp_nanos(self.observed_ns),
            severity_number: self.severity_number,
            severity_text: self.severity_text,
            body: self.body,
            attributes: decode_or_empty(&self.attributes, FIELD_ATTRIBUTES),
            resource: Resource {
                attributes: decode_or_empty(&self.resource, FIELD_RESOURCE),
            },
            trace_id,
            span_id,
            trace_flags: self.trace_flags,
            flags: self.flags,
            dropped_attributes_count: self.dropped_attributes_count,
        }
    }
}

fn to_nanos(ts: DateTime<Utc>, field: &str) -> Result<i64, StorageError> {
    ts.timestamp_nanos_opt().ok_or_else(|| {
        StorageError::Insert(format!("{field} {ts} is outside the storable range"))
    })
}
