//! ClickHouse HTTP 인터페이스 기반 저장소
//!
//! SQL 본문을 HTTP POST로 전송하고 `FORMAT JSONEachRow` 응답을 행 단위로 파싱합니다.
//! 동시 요청 수는 `max_open_conns` 세마포어로, 유휴 연결 수는 reqwest 풀 설정으로 제한합니다.
//!
//! 삽입 행은 SQL 리터럴이 아니라 `JSONEachRow` 데이터로 전송되므로 값 이스케이프가 필요 없습니다.
//! 조회 조건은 정수 나노초뿐이며, 테이블 이름은 설정 검증 단계에서 식별자 문자만 허용됩니다.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tracing::{debug, info};

use watchdata_core::config::StorageConfig;
use watchdata_core::error::StorageError;
use watchdata_core::types::LogRecord;

use super::LogStore;
use super::codec::StoredRow;

/// 조회 결과 컬럼 목록 (별칭은 [`StoredRow`] 필드와 일치)
const SELECT_COLUMNS: &str = "toUnixTimestamp64Nano(timestamp) AS ts_ns, \
     toUnixTimestamp64Nano(observed_time) AS observed_ns, \
     severity_number, severity_text, body, attributes, resource, \
     trace_id, span_id, trace_flags, flags, dropped_attributes_count";

const INSERT_COLUMNS: &str = "timestamp, observed_time, severity_number, severity_text, body, \
     attributes, resource, trace_id, span_id, trace_flags, flags, dropped_attributes_count";

/// 조회 경계 시각을 나노초로 변환합니다. 범위를 벗어나면 가장 가까운 끝값으로 고정합니다.
fn bound_nanos(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_nanos_opt().unwrap_or(if ts < DateTime::UNIX_EPOCH {
        i64::MIN
    } else {
        i64::MAX
    })
}

/// ClickHouse 로그 저장소
pub struct ClickHouseStore {
    http: reqwest::Client,
    base_url: reqwest::Url,
    username: String,
    password: String,
    database: String,
    table: String,
    retention_days: u32,
    settings: Vec<(&'static str, String)>,
    connect_timeout_ms: u64,
    permits: Arc<Semaphore>,
}

impl ClickHouseStore {
    /// 저장소 설정으로 클라이언트를 생성합니다. 네트워크 연결은 첫 호출 시 수립됩니다.
    ///
    /// # Errors
    ///
    /// URL이 유효하지 않거나 HTTP 클라이언트를 만들 수 없으면 `StorageError::Connection`을 반환합니다.
    pub fn new(config: &StorageConfig) -> Result<Self, StorageError> {
        let base_url = reqwest::Url::parse(&config.url)
            .map_err(|e| StorageError::Connection(format!("invalid url '{}': {e}", config.url)))?;

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.dial_timeout_secs))
            .pool_max_idle_per_host(config.max_idle_conns)
            .build()
            .map_err(|e| StorageError::Connection(format!("http client: {e}")))?;

        Ok(Self {
            http,
            base_url,
            username: config.username.clone(),
            password: config.password.clone(),
            database: config.database.clone(),
            table: config.table.clone(),
            retention_days: config.retention_days,
            settings: config.settings.non_default(),
            connect_timeout_ms: config.dial_timeout_secs.saturating_mul(1000),
            permits: Arc::new(Semaphore::new(config.max_open_conns.max(1))),
        })
    }

    /// 대상 테이블 이름
    pub fn table(&self) -> &str {
        &self.table
    }

    /// SQL을 실행하고 응답 본문을 반환합니다.
    ///
    /// 서버가 거부하면 `rejected`로 에러를 분류합니다.
    async fn exec(
        &self,
        sql: String,
        rejected: fn(String) -> StorageError,
    ) -> Result<String, StorageError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| StorageError::Connection("connection pool closed".to_owned()))?;

        let mut params: Vec<(&str, &str)> = vec![
            ("database", self.database.as_str()),
            ("output_format_json_quote_64bit_integers", "0"),
        ];
        params.extend(self.settings.iter().map(|(k, v)| (*k, v.as_str())));

        let resp = self
            .http
            .post(self.base_url.clone())
            .header("X-ClickHouse-User", &self.username)
            .header("X-ClickHouse-Key", &self.password)
            .query(&params)
            .body(sql)
            .send()
            .await
            .map_err(|e| classify_transport(e, self.connect_timeout_ms))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| classify_transport(e, self.connect_timeout_ms))?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(rejected(format!("HTTP {}: {}", status.as_u16(), body.trim())))
        }
    }

    async fn select(&self, sql: String) -> Result<Vec<LogRecord>, StorageError> {
        let body = self.exec(sql, StorageError::Query).await?;
        parse_rows(&body)
    }
}

fn classify_transport(err: reqwest::Error, connect_timeout_ms: u64) -> StorageError {
    if err.is_timeout() {
        StorageError::Timeout {
            operation: "connect".to_owned(),
            timeout_ms: connect_timeout_ms,
        }
    } else if err.is_connect() || err.is_builder() {
        StorageError::Connection(err.to_string())
    } else {
        StorageError::Query(err.to_string())
    }
}

/// JSONEachRow 응답을 레코드 목록으로 변환합니다.
fn parse_rows(body: &str) -> Result<Vec<LogRecord>, StorageError> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str::<StoredRow>(line)
                .map(StoredRow::decode)
                .map_err(|e| StorageError::Query(format!("malformed row: {e}")))
        })
        .collect()
}

fn create_table_sql(table: &str, retention_days: u32) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\
         timestamp DateTime64(9, 'UTC') CODEC(Delta(8), ZSTD(1)), \
         observed_time DateTime64(9, 'UTC') CODEC(Delta(8), ZSTD(1)), \
         severity_number Int8 CODEC(ZSTD(1)), \
         severity_text LowCardinality(String) CODEC(ZSTD(1)), \
         body String CODEC(ZSTD(1)), \
         attributes String CODEC(ZSTD(1)), \
         resource String CODEC(ZSTD(1)), \
         trace_id String CODEC(ZSTD(1)), \
         span_id String CODEC(ZSTD(1)), \
         trace_flags UInt8 CODEC(ZSTD(1)), \
         flags UInt32 CODEC(ZSTD(1)), \
         dropped_attributes_count UInt32 CODEC(ZSTD(1))\
         ) ENGINE = MergeTree() \
         PARTITION BY toYYYYMM(timestamp) \
         ORDER BY (timestamp, severity_number) \
         TTL toDateTime(timestamp) + INTERVAL {retention_days} DAY \
         SETTINGS index_granularity = 8192"
    )
}

/// `input()` 테이블 함수의 행 구조 ([`StoredRow`] 직렬화 형태와 일치)
const INPUT_STRUCTURE: &str = "ts_ns Int64, observed_ns Int64, severity_number Int8, \
     severity_text String, body String, attributes String, resource String, \
     trace_id String, span_id String, trace_flags UInt8, flags UInt32, \
     dropped_attributes_count UInt32";

/// 배치 삽입 문장을 만듭니다.
///
/// 행은 `FORMAT JSONEachRow` 데이터로 SQL 뒤에 이어 붙이고, 나노초 시각 변환은
/// `input()` 위의 SELECT 한 번으로 처리합니다.
fn insert_sql(table: &str, rows: &[StoredRow]) -> Result<String, StorageError> {
    let mut sql = format!(
        "INSERT INTO {table} ({INSERT_COLUMNS}) \
         SELECT fromUnixTimestamp64Nano(ts_ns, 'UTC'), fromUnixTimestamp64Nano(observed_ns, 'UTC'), \
         severity_number, severity_text, body, attributes, resource, \
         trace_id, span_id, trace_flags, flags, dropped_attributes_count \
         FROM input('{INPUT_STRUCTURE}') \
         FORMAT JSONEachRow\n"
    );
    for row in rows {
        let line = serde_json::to_string(row)
            .map_err(|e| StorageError::Insert(format!("row encoding failed: {e}")))?;
        sql.push_str(&line);
        sql.push('\n');
    }
    Ok(sql)
}

fn query_after_sql(table: &str, since: DateTime<Utc>) -> String {
    format!(
        "SELECT {SELECT_COLUMNS} FROM {table} \
         WHERE timestamp > fromUnixTimestamp64Nano(toInt64({}), 'UTC') \
         ORDER BY timestamp ASC \
         FORMAT JSONEachRow",
        bound_nanos(since)
    )
}

fn query_range_sql(table: &str, start: DateTime<Utc>, end: DateTime<Utc>, limit: usize) -> String {
    format!(
        "SELECT {SELECT_COLUMNS} FROM {table} \
         WHERE timestamp >= fromUnixTimestamp64Nano(toInt64({}), 'UTC') \
         AND timestamp <= fromUnixTimestamp64Nano(toInt64({}), 'UTC') \
         ORDER BY timestamp DESC \
         LIMIT {limit} \
         FORMAT JSONEachRow",
        bound_nanos(start),
        bound_nanos(end)
    )
}

impl LogStore for ClickHouseStore {
    async fn ensure_schema(&self) -> Result<(), StorageError> {
        self.exec(
            create_table_sql(&self.table, self.retention_days),
            StorageError::Query,
        )
        .await?;
        info!(table = %self.table, retention_days = self.retention_days, "log table ready");
        Ok(())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.exec("SELECT 1".to_owned(), StorageError::Connection)
            .await
            .map(|_| ())
    }

    async fn insert_batch(&self, records: &[LogRecord]) -> Result<(), StorageError> {
        if records.is_empty() {
            return Ok(());
        }
        let rows = records
            .iter()
            .map(StoredRow::encode)
            .collect::<Result<Vec<_>, _>>()?;

        self.exec(insert_sql(&self.table, &rows)?, StorageError::Insert)
            .await?;
        debug!(table = %self.table, count = rows.len(), "batch inserted");
        Ok(())
    }

    async fn query_after(&self, since: DateTime<Utc>) -> Result<Vec<LogRecord>, StorageError> {
        self.select(query_after_sql(&self.table, since)).await
    }

    async fn query_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<LogRecord>, StorageError> {
        self.select(query_range_sql(&self.table, start, end, limit))
            .await
    }
}
