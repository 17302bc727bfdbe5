//! 도메인 타입: 시스템 전역에서 사용되는 로그 레코드 타입
//!
//! OpenTelemetry 로그 데이터 모델을 따르는 [`LogRecord`]와
//! 타입이 지정된 속성 값 [`AnyValue`]를 정의합니다.
//!
//! # 속성 값의 정규 JSON 형식
//!
//! [`AnyValue`]는 단일 키 객체로 직렬화됩니다.
//!
//! ```text
//! {"string_value": "GET"}       {"bool_value": true}
//! {"int_value": 42}             {"double_value": 1.5}
//! {"bytes_value": "AAEC"}       {"array_value": [ ... ]}
//! {"kv_list_value": {"k": { ... }}}
//! ```
//!
//! 키-값 목록을 객체로 직렬화할 때 중복 키는 마지막 값이 우선하며,
//! 키의 위치는 처음 등장한 순서를 따릅니다 ([`KvObject`]).

use std::collections::HashMap;
use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ─── 식별자 ──────────────────────────────────────────────────────────

/// 고정 길이 바이트 식별자
///
/// JSON과 저장소에서는 소문자 16진수 문자열로 표현됩니다.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FixedId<const N: usize>([u8; N]);

/// 16바이트 trace 식별자
pub type TraceId = FixedId<16>;

/// 8바이트 span 식별자
pub type SpanId = FixedId<8>;

impl<const N: usize> FixedId<N> {
    /// 원시 바이트로 식별자를 생성합니다.
    pub const fn from_bytes(bytes: [u8; N]) -> Self {
        Self(bytes)
    }

    /// 16진수 문자열을 파싱합니다. 길이는 정확히 `2 * N` 자여야 합니다.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut buf = [0u8; N];
        hex::decode_to_slice(s, &mut buf)?;
        Ok(Self(buf))
    }

    /// 빈 문자열이나 모두 0인 식별자는 `None`으로 취급합니다.
    pub fn parse_optional(s: &str) -> Result<Option<Self>, hex::FromHexError> {
        if s.is_empty() {
            return Ok(None);
        }
        let id = Self::from_hex(s)?;
        Ok((!id.is_zero()).then_some(id))
    }

    /// 모든 바이트가 0인지 여부
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// 원시 바이트
    pub fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }

    /// 소문자 16진수 문자열
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl<const N: usize> fmt::Display for FixedId<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl<const N: usize> fmt::Debug for FixedId<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FixedId({})", self.to_hex())
    }
}

impl<const N: usize> Serialize for FixedId<N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de, const N: usize> Deserialize<'de> for FixedId<N> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(de::Error::custom)
    }
}

/// 선택적 식별자 필드용 역직렬화: 빈 문자열과 모두 0인 값은 `None`입니다.
fn deserialize_optional_id<'de, D, const N: usize>(
    deserializer: D,
) -> Result<Option<FixedId<N>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(s) => FixedId::parse_optional(&s).map_err(de::Error::custom),
    }
}

// ─── AnyValue ────────────────────────────────────────────────────────

/// 타입이 지정된 속성 값
///
/// 문자열, 불리언, 정수, 실수, 바이트, 배열, 중첩 키-값 목록 중 하나입니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AnyValue {
    /// 문자열
    #[serde(rename = "string_value")]
    String(String),
    /// 불리언
    #[serde(rename = "bool_value")]
    Bool(bool),
    /// 64비트 정수
    #[serde(rename = "int_value")]
    Int(i64),
    /// 64비트 실수 (NaN/무한대는 `"NaN"`, `"Infinity"`, `"-Infinity"` 문자열)
    #[serde(rename = "double_value", with = "double_value")]
    Double(f64),
    /// 원시 바이트 (base64 문자열로 직렬화)
    #[serde(rename = "bytes_value", with = "base64_bytes")]
    Bytes(Bytes),
    /// 값 배열
    #[serde(rename = "array_value")]
    Array(Vec<AnyValue>),
    /// 중첩 키-값 목록 (객체로 직렬화, 중복 키는 마지막 값 우선)
    #[serde(rename = "kv_list_value", with = "kv_object")]
    KvList(Vec<KeyValue>),
}

impl AnyValue {
    /// 문자열 값이면 참조를 반환합니다.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for AnyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Double(d) => write!(f, "{d}"),
            Self::Bytes(b) => f.write_str(&BASE64.encode(b)),
            Self::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::KvList(kvs) => {
                f.write_str("{")?;
                for (i, kv) in kvs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}={}", kv.key, kv.value)?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<&str> for AnyValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<String> for AnyValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<bool> for AnyValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for AnyValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for AnyValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<Bytes> for AnyValue {
    fn from(v: Bytes) -> Self {
        Self::Bytes(v)
    }
}

mod base64_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let s = String::deserialize(deserializer)?;
        BASE64
            .decode(s.as_bytes())
            .map(Bytes::from)
            .map_err(de::Error::custom)
    }
}

/// JSON 숫자로 표현할 수 없는 실수는 문자열로 기록합니다.
mod double_value {
    use super::*;

    const NAN: &str = "NaN";
    const POS_INF: &str = "Infinity";
    const NEG_INF: &str = "-Infinity";

    pub fn serialize<S: Serializer>(v: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if v.is_nan() {
            serializer.serialize_str(NAN)
        } else if v.is_infinite() {
            serializer.serialize_str(if *v > 0.0 { POS_INF } else { NEG_INF })
        } else {
            serializer.serialize_f64(*v)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        struct DoubleVisitor;

        impl Visitor<'_> for DoubleVisitor {
            type Value = f64;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a number or one of \"NaN\", \"Infinity\", \"-Infinity\"")
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<f64, E> {
                Ok(v)
            }

            #[allow(clippy::cast_precision_loss)]
            fn visit_i64<E: de::Error>(self, v: i64) -> Result<f64, E> {
                Ok(v as f64)
            }

            #[allow(clippy::cast_precision_loss)]
            fn visit_u64<E: de::Error>(self, v: u64) -> Result<f64, E> {
                Ok(v as f64)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<f64, E> {
                match v {
                    NAN => Ok(f64::NAN),
                    POS_INF => Ok(f64::INFINITY),
                    NEG_INF => Ok(f64::NEG_INFINITY),
                    other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
                }
            }
        }

        deserializer.deserialize_any(DoubleVisitor)
    }
}

mod kv_object {
    use super::*;

    pub fn serialize<S: Serializer>(kvs: &[KeyValue], serializer: S) -> Result<S::Ok, S::Error> {
        KvObject(kvs).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<KeyValue>, D::Error> {
        OwnedKvObject::deserialize(deserializer).map(OwnedKvObject::into_inner)
    }
}

// ─── KeyValue / Resource ─────────────────────────────────────────────

/// 속성 키-값 쌍
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    /// 속성 키
    pub key: String,
    /// 속성 값
    pub value: AnyValue,
}

impl KeyValue {
    /// 새 키-값 쌍을 생성합니다.
    pub fn new(key: impl Into<String>, value: impl Into<AnyValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// 레코드 출처를 설명하는 리소스 속성
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// 리소스 속성 목록
    #[serde(default)]
    pub attributes: Vec<KeyValue>,
}

/// 중복 키를 마지막 값 우선으로 병합합니다. 키 위치는 처음 등장한 순서를 유지합니다.
pub fn last_write_wins(kvs: &[KeyValue]) -> Vec<(&str, &AnyValue)> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(kvs.len());
    let mut merged: Vec<(&str, &AnyValue)> = Vec::with_capacity(kvs.len());
    for kv in kvs {
        match index.get(kv.key.as_str()) {
            Some(&pos) => merged[pos].1 = &kv.value,
            None => {
                index.insert(kv.key.as_str(), merged.len());
                merged.push((kv.key.as_str(), &kv.value));
            }
        }
    }
    merged
}

/// 키-값 목록의 정규 객체 직렬화 뷰
///
/// `[{"key":"a","value":..},{"key":"a","value":..}]` 대신
/// `{"a": ..}` 형태로 직렬화합니다.
pub struct KvObject<'a>(pub &'a [KeyValue]);

impl Serialize for KvObject<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let merged = last_write_wins(self.0);
        let mut map = serializer.serialize_map(Some(merged.len()))?;
        for (key, value) in merged {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// 정규 객체 형식을 문서 순서대로 읽어 들인 키-값 목록
///
/// 같은 키가 여러 번 나타나면 마지막 값이 처음 위치를 대체합니다.
#[derive(Debug, Default)]
pub struct OwnedKvObject(Vec<KeyValue>);

impl OwnedKvObject {
    /// 내부 키-값 목록을 반환합니다.
    pub fn into_inner(self) -> Vec<KeyValue> {
        self.0
    }
}

impl<'de> Deserialize<'de> for OwnedKvObject {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct KvVisitor;

        impl<'de> Visitor<'de> for KvVisitor {
            type Value = OwnedKvObject;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object of attribute values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let capacity = access.size_hint().unwrap_or(0);
                let mut index: HashMap<String, usize> = HashMap::with_capacity(capacity);
                let mut kvs: Vec<KeyValue> = Vec::with_capacity(capacity);
                while let Some((key, value)) = access.next_entry::<String, AnyValue>()? {
                    match index.get(&key) {
                        Some(&pos) => kvs[pos].value = value,
                        None => {
                            index.insert(key.clone(), kvs.len());
                            kvs.push(KeyValue { key, value });
                        }
                    }
                }
                Ok(OwnedKvObject(kvs))
            }
        }

        deserializer.deserialize_map(KvVisitor)
    }
}

// ─── LogRecord ───────────────────────────────────────────────────────

/// 로그 레코드: 전송과 저장의 단위
///
/// 저장소에 기록된 이후에는 변경되지 않습니다. 삭제는 저장소 TTL로만 일어납니다.
/// `observed_time >= timestamp`가 기대되지만 강제하지는 않습니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// 이벤트 발생 시각 (생산자 지정)
    pub timestamp: DateTime<Utc>,
    /// 수신 시각
    pub observed_time: DateTime<Utc>,
    /// 심각도 서수
    #[serde(default)]
    pub severity_number: i8,
    /// 심각도 레이블 (INFO, WARN 등)
    #[serde(default)]
    pub severity_text: String,
    /// 본문
    #[serde(default)]
    pub body: String,
    /// 속성 목록 (순서 유지, 중복 키 허용)
    #[serde(default)]
    pub attributes: Vec<KeyValue>,
    /// 리소스
    #[serde(default)]
    pub resource: Resource,
    /// trace 식별자
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_id"
    )]
    pub trace_id: Option<TraceId>,
    /// span 식별자
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_id"
    )]
    pub span_id: Option<SpanId>,
    /// W3C trace flags
    #[serde(default, skip_serializing_if = "is_zero_u8")]
    pub trace_flags: u8,
    /// 레코드 플래그
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub flags: u32,
    /// 생산자 측에서 버려진 속성 수
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub dropped_attributes_count: u32,
}

fn is_zero_u8(v: &u8) -> bool {
    *v == 0
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

impl LogRecord {
    /// 발생 시각과 본문으로 레코드를 생성합니다. 수신 시각은 발생 시각과 같게 설정됩니다.
    pub fn new(timestamp: DateTime<Utc>, body: impl Into<String>) -> Self {
        Self {
            timestamp,
            observed_time: timestamp,
            severity_number: 0,
            severity_text: String::new(),
            body: body.into(),
            attributes: Vec::new(),
            resource: Resource::default(),
            trace_id: None,
            span_id: None,
            trace_flags: 0,
            flags: 0,
            dropped_attributes_count: 0,
        }
    }

    /// 심각도를 설정합니다.
    pub fn with_severity(mut self, number: i8, text: impl Into<String>) -> Self {
        self.severity_number = number;
        self.severity_text = text.into();
        self
    }

    /// 속성을 추가합니다.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AnyValue>) -> Self {
        self.attributes.push(KeyValue::new(key, value));
        self
    }

    /// 리소스 속성을 추가합니다.
    pub fn with_resource_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<AnyValue>,
    ) -> Self {
        self.resource.attributes.push(KeyValue::new(key, value));
        self
    }

    /// trace 컨텍스트를 설정합니다.
    pub fn with_trace(mut self, trace_id: TraceId, span_id: SpanId) -> Self {
        self.trace_id = (!trace_id.is_zero()).then_some(trace_id);
        self.span_id = (!span_id.is_zero()).then_some(span_id);
        self
    }

    /// 키로 속성 값을 조회합니다. 중복 키는 마지막 값을 반환합니다.
    pub fn attribute(&self, key: &str) -> Option<&AnyValue> {
        self.attributes
            .iter()
            .rev()
            .find(|kv| kv.key == key)
            .map(|kv| &kv.value)
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}",
            self.severity_text,
            self.timestamp.to_rfc3339(),
            self.body,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn any_value_canonical_forms() {
        let cases = [
            (AnyValue::from("GET"), r#"{"string_value":"GET"}"#),
            (AnyValue::from(true), r#"{"bool_value":true}"#),
            (AnyValue::from(42_i64), r#"{"int_value":42}"#),
            (AnyValue::from(1.5_f64), r#"{"double_value":1.5}"#),
            (
                AnyValue::Bytes(Bytes::from_static(&[0, 1, 2])),
                r#"{"bytes_value":"AAEC"}"#,
            ),
        ];
        for (value, expected) in cases {
            assert_eq!(serde_json::to_string(&value).unwrap(), expected);
            let back: AnyValue = serde_json::from_str(expected).unwrap();
            assert_eq!(back, value);
        }
    }

    #[test]
    fn non_finite_doubles_use_string_forms() {
        let cases = [
            (f64::NAN, r#"{"double_value":"NaN"}"#),
            (f64::INFINITY, r#"{"double_value":"Infinity"}"#),
            (f64::NEG_INFINITY, r#"{"double_value":"-Infinity"}"#),
        ];
        for (v, expected) in cases {
            assert_eq!(serde_json::to_string(&AnyValue::Double(v)).unwrap(), expected);
            let AnyValue::Double(back) = serde_json::from_str(expected).unwrap() else {
                panic!("expected Double for {expected}");
            };
            assert_eq!(back.is_nan(), v.is_nan());
            if !v.is_nan() {
                assert_eq!(back, v);
            }
        }
    }

    #[test]
    fn double_accepts_integer_literal_and_rejects_other_strings() {
        let back: AnyValue = serde_json::from_str(r#"{"double_value":3}"#).unwrap();
        assert_eq!(back, AnyValue::Double(3.0));
        assert!(serde_json::from_str::<AnyValue>(r#"{"double_value":"1.5"}"#).is_err());
    }

    #[test]
    fn kv_list_serializes_as_object_with_last_write_wins() {
        let value = AnyValue::KvList(vec![
            KeyValue::new("a", 1_i64),
            KeyValue::new("b", "x"),
            KeyValue::new("a", 2_i64),
        ]);
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(
            json,
            r#"{"kv_list_value":{"a":{"int_value":2},"b":{"string_value":"x"}}}"#
        );
    }

    #[test]
    fn owned_kv_object_preserves_document_order() {
        let json = r#"{"zeta":{"int_value":1},"alpha":{"bool_value":false},"zeta":{"int_value":3}}"#;
        let kvs = serde_json::from_str::<OwnedKvObject>(json)
            .unwrap()
            .into_inner();
        assert_eq!(kvs.len(), 2);
        assert_eq!(kvs[0].key, "zeta");
        assert_eq!(kvs[0].value, AnyValue::Int(3));
        assert_eq!(kvs[1].key, "alpha");
    }

    #[test]
    fn owned_kv_object_merges_many_duplicates() {
        let mut json = String::from("{");
        for i in 0..500 {
            if i > 0 {
                json.push(',');
            }
            json.push_str(&format!(r#""k{}":{{"int_value":{}}}"#, i % 50, i));
        }
        json.push('}');

        let kvs = serde_json::from_str::<OwnedKvObject>(&json)
            .unwrap()
            .into_inner();
        assert_eq!(kvs.len(), 50);
        assert_eq!(kvs[0].key, "k0");
        assert_eq!(kvs[0].value, AnyValue::Int(450));
        assert_eq!(kvs[49].key, "k49");
        assert_eq!(kvs[49].value, AnyValue::Int(499));
    }

    #[test]
    fn fixed_id_hex_roundtrip() {
        let id = TraceId::from_hex("0102030405060708090a0b0c0d0e0f10").unwrap();
        assert_eq!(id.as_bytes()[0], 1);
        assert_eq!(id.to_string(), "0102030405060708090a0b0c0d0e0f10");
        assert!(SpanId::from_hex("0102").is_err());
    }

    #[test]
    fn zero_and_empty_ids_are_absent() {
        assert_eq!(TraceId::parse_optional("").unwrap(), None);
        assert_eq!(
            SpanId::parse_optional("0000000000000000").unwrap(),
            None
        );
        assert!(SpanId::parse_optional("00000000000000ff").unwrap().is_some());
    }

    #[test]
    fn log_record_json_omits_absent_fields() {
        let record = LogRecord::new(sample_time(), "hello").with_severity(9, "INFO");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["body"], "hello");
        assert_eq!(json["severity_number"], 9);
        assert!(json.get("trace_id").is_none());
        assert!(json.get("dropped_attributes_count").is_none());
    }

    #[test]
    fn log_record_deserializes_minimal_payload() {
        let json = r#"{
            "timestamp": "2024-01-15T12:00:00.000000001Z",
            "observed_time": "2024-01-15T12:00:00.5Z",
            "body": "started",
            "trace_id": "00000000000000000000000000000000",
            "span_id": "0102030405060708"
        }"#;
        let record: LogRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.timestamp.timestamp_subsec_nanos(), 1);
        assert!(record.trace_id.is_none());
        assert_eq!(record.span_id.unwrap().to_hex(), "0102030405060708");
        assert!(record.attributes.is_empty());
        assert_eq!(record.severity_number, 0);
    }

    #[test]
    fn attribute_lookup_returns_last_duplicate() {
        let record = LogRecord::new(sample_time(), "x")
            .with_attribute("k", "first")
            .with_attribute("k", "second");
        assert_eq!(record.attribute("k").and_then(AnyValue::as_str), Some("second"));
        assert!(record.attribute("missing").is_none());
    }

    #[test]
    fn with_trace_drops_zero_ids() {
        let record = LogRecord::new(sample_time(), "x")
            .with_trace(TraceId::from_bytes([0; 16]), SpanId::from_bytes([7; 8]));
        assert!(record.trace_id.is_none());
        assert!(record.span_id.is_some());
    }
}
