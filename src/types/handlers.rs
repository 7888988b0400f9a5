use std::any::type_name;
use std::fmt::Display;
use std::io::{self, Cursor, Read};
use std::marker::PhantomData;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::{SqlType, SqlValue, TypeHandler, TypeHandlerRegistry};
use crate::error::SqlMapperError;

const TIMESTAMP_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

fn mismatch(value: &SqlValue, target: &str) -> SqlMapperError {
    SqlMapperError::MappingError(format!(
        "cannot convert {} value into {target}",
        value.kind()
    ))
}

fn unparsable(text: &str, target: &str, err: impl Display) -> SqlMapperError {
    SqlMapperError::MappingError(format!("cannot read `{text}` as {target}: {err}"))
}

fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::default()))
        })
}

fn timestamp_from_epoch(secs: i64) -> Result<NaiveDateTime, SqlMapperError> {
    DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| SqlMapperError::MappingError(format!("epoch seconds {secs} out of range")))
}

fn parse_bool_text(text: &str) -> Option<bool> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("true") {
        Some(true)
    } else if text.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        text.parse::<i64>().ok().map(|i| i != 0)
    }
}

/// Lenient boolean handler: accepts booleans, numbers (zero is false) and "true"/"false"/"1"/"0".
#[derive(Debug, Default, Clone, Copy)]
pub struct BoolTypeHandler;

impl TypeHandler<bool> for BoolTypeHandler {
    fn to_sql(&self, value: &bool) -> Result<SqlValue, SqlMapperError> {
        Ok(SqlValue::Bool(*value))
    }

    fn from_sql(&self, value: &SqlValue) -> Result<Option<bool>, SqlMapperError> {
        match value {
            SqlValue::Null => Ok(None),
            SqlValue::Bool(b) => Ok(Some(*b)),
            SqlValue::Int(i) => Ok(Some(*i != 0)),
            SqlValue::Float(f) => Ok(Some(*f != 0.0)),
            SqlValue::Text(s) => parse_bool_text(s)
                .map(Some)
                .ok_or_else(|| unparsable(s, "bool", "expected true/false or a number")),
            other => Err(mismatch(other, "bool")),
        }
    }
}

/// Range-checked handler for the fixed-width integer types.
pub struct IntegerTypeHandler<T>(PhantomData<fn() -> T>);

impl<T> IntegerTypeHandler<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for IntegerTypeHandler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TypeHandler<T> for IntegerTypeHandler<T>
where
    T: Copy + TryFrom<i64> + TryInto<i64> + FromStr + Send + Sync + 'static,
    <T as TryFrom<i64>>::Error: Display,
    <T as TryInto<i64>>::Error: Display,
    <T as FromStr>::Err: Display,
{
    fn to_sql(&self, value: &T) -> Result<SqlValue, SqlMapperError> {
        let wide = <T as TryInto<i64>>::try_into(*value).map_err(|err| {
            SqlMapperError::ParameterError(format!(
                "{} value does not fit in a 64-bit integer: {err}",
                type_name::<T>()
            ))
        })?;
        Ok(SqlValue::Int(wide))
    }

    fn from_sql(&self, value: &SqlValue) -> Result<Option<T>, SqlMapperError> {
        let wide = match value {
            SqlValue::Null => return Ok(None),
            SqlValue::Int(i) => *i,
            SqlValue::Bool(b) => i64::from(*b),
            #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
            SqlValue::Float(f) => {
                if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                    *f as i64
                } else {
                    return Err(SqlMapperError::MappingError(format!(
                        "float {f} is not an integral {}",
                        type_name::<T>()
                    )));
                }
            }
            SqlValue::Text(s) => {
                return s
                    .trim()
                    .parse::<T>()
                    .map(Some)
                    .map_err(|err| unparsable(s, type_name::<T>(), err));
            }
            other => return Err(mismatch(other, type_name::<T>())),
        };
        <T as TryFrom<i64>>::try_from(wide).map(Some).map_err(|err| {
            SqlMapperError::MappingError(format!(
                "{wide} is out of range for {}: {err}",
                type_name::<T>()
            ))
        })
    }
}

/// Handler for `f32` and `f64`.
pub struct FloatTypeHandler<T>(PhantomData<fn() -> T>);

impl<T> FloatTypeHandler<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for FloatTypeHandler<T> {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! float_handler {
    ($ty:ty) => {
        impl TypeHandler<$ty> for FloatTypeHandler<$ty> {
            fn to_sql(&self, value: &$ty) -> Result<SqlValue, SqlMapperError> {
                Ok(SqlValue::Float(f64::from(*value)))
            }

            #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
            fn from_sql(&self, value: &SqlValue) -> Result<Option<$ty>, SqlMapperError> {
                match value {
                    SqlValue::Null => Ok(None),
                    SqlValue::Float(f) => Ok(Some(*f as $ty)),
                    SqlValue::Int(i) => Ok(Some(*i as $ty)),
                    SqlValue::Bool(b) => Ok(Some(if *b { 1.0 } else { 0.0 })),
                    SqlValue::Text(s) => s
                        .trim()
                        .parse::<$ty>()
                        .map(Some)
                        .map_err(|err| unparsable(s, stringify!($ty), err)),
                    other => Err(mismatch(other, stringify!($ty))),
                }
            }
        }
    };
}

float_handler!(f32);
float_handler!(f64);

#[derive(Debug, Default, Clone, Copy)]
pub struct StringTypeHandler;

impl TypeHandler<String> for StringTypeHandler {
    fn to_sql(&self, value: &String) -> Result<SqlValue, SqlMapperError> {
        Ok(SqlValue::Text(value.clone()))
    }

    fn from_sql(&self, value: &SqlValue) -> Result<Option<String>, SqlMapperError> {
        let text = match value {
            SqlValue::Null => return Ok(None),
            SqlValue::Text(s) => s.clone(),
            SqlValue::Int(i) => i.to_string(),
            SqlValue::Float(f) => f.to_string(),
            SqlValue::Bool(b) => b.to_string(),
            SqlValue::Blob(bytes) => String::from_utf8(bytes.clone())
                .map_err(|err| SqlMapperError::MappingError(format!("blob is not UTF-8: {err}")))?,
            SqlValue::Timestamp(ts) => ts.format("%F %T%.f").to_string(),
            SqlValue::Date(d) => d.format("%F").to_string(),
            SqlValue::Time(t) => t.format("%T%.f").to_string(),
            SqlValue::Json(JsonValue::String(s)) => s.clone(),
            SqlValue::Json(json) => json.to_string(),
        };
        Ok(Some(text))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CharTypeHandler;

impl TypeHandler<char> for CharTypeHandler {
    fn to_sql(&self, value: &char) -> Result<SqlValue, SqlMapperError> {
        Ok(SqlValue::Text(value.to_string()))
    }

    fn from_sql(&self, value: &SqlValue) -> Result<Option<char>, SqlMapperError> {
        match value {
            SqlValue::Null => Ok(None),
            SqlValue::Text(s) => s
                .chars()
                .next()
                .map(Some)
                .ok_or_else(|| SqlMapperError::MappingError("empty text cannot become a char".into())),
            other => Err(mismatch(other, "char")),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ByteArrayTypeHandler;

impl TypeHandler<Vec<u8>> for ByteArrayTypeHandler {
    fn to_sql(&self, value: &Vec<u8>) -> Result<SqlValue, SqlMapperError> {
        Ok(SqlValue::Blob(value.clone()))
    }

    fn from_sql(&self, value: &SqlValue) -> Result<Option<Vec<u8>>, SqlMapperError> {
        match value {
            SqlValue::Null => Ok(None),
            SqlValue::Blob(bytes) => Ok(Some(bytes.clone())),
            SqlValue::Text(s) => Ok(Some(s.as_bytes().to_vec())),
            other => Err(mismatch(other, "byte array")),
        }
    }
}

/// Readable view over a binary column.
///
/// Map a binary column to `Vec<u8>` to get the bytes, or to `BlobStream` to consume them through
/// [`std::io::Read`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobStream {
    inner: Cursor<Vec<u8>>,
}

impl BlobStream {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            inner: Cursor::new(bytes),
        }
    }

    /// Total length in bytes, regardless of how much has been read.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.get_ref().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.get_ref().is_empty()
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.inner.get_ref()
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.inner.into_inner()
    }
}

impl Read for BlobStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BlobStreamTypeHandler;

impl TypeHandler<BlobStream> for BlobStreamTypeHandler {
    fn to_sql(&self, value: &BlobStream) -> Result<SqlValue, SqlMapperError> {
        Ok(SqlValue::Blob(value.as_bytes().to_vec()))
    }

    fn from_sql(&self, value: &SqlValue) -> Result<Option<BlobStream>, SqlMapperError> {
        match value {
            SqlValue::Null => Ok(None),
            SqlValue::Blob(bytes) => Ok(Some(BlobStream::new(bytes.clone()))),
            SqlValue::Text(s) => Ok(Some(BlobStream::new(s.as_bytes().to_vec()))),
            other => Err(mismatch(other, "blob stream")),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TimestampTypeHandler;

impl TypeHandler<NaiveDateTime> for TimestampTypeHandler {
    fn to_sql(&self, value: &NaiveDateTime) -> Result<SqlValue, SqlMapperError> {
        Ok(SqlValue::Timestamp(*value))
    }

    fn from_sql(&self, value: &SqlValue) -> Result<Option<NaiveDateTime>, SqlMapperError> {
        match value {
            SqlValue::Null => Ok(None),
            SqlValue::Timestamp(ts) => Ok(Some(*ts)),
            SqlValue::Date(d) => Ok(Some(d.and_time(NaiveTime::default()))),
            SqlValue::Int(secs) => timestamp_from_epoch(*secs).map(Some),
            SqlValue::Text(s) => parse_timestamp(s)
                .map(Some)
                .ok_or_else(|| unparsable(s, "timestamp", "unrecognized format")),
            other => Err(mismatch(other, "timestamp")),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DateTypeHandler;

impl TypeHandler<NaiveDate> for DateTypeHandler {
    fn to_sql(&self, value: &NaiveDate) -> Result<SqlValue, SqlMapperError> {
        Ok(SqlValue::Date(*value))
    }

    fn from_sql(&self, value: &SqlValue) -> Result<Option<NaiveDate>, SqlMapperError> {
        match value {
            SqlValue::Null => Ok(None),
            SqlValue::Date(d) => Ok(Some(*d)),
            SqlValue::Timestamp(ts) => Ok(Some(ts.date())),
            SqlValue::Text(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .ok()
                .or_else(|| parse_timestamp(s).map(|ts| ts.date()))
                .map(Some)
                .ok_or_else(|| unparsable(s, "date", "expected YYYY-MM-DD")),
            other => Err(mismatch(other, "date")),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TimeTypeHandler;

impl TypeHandler<NaiveTime> for TimeTypeHandler {
    fn to_sql(&self, value: &NaiveTime) -> Result<SqlValue, SqlMapperError> {
        Ok(SqlValue::Time(*value))
    }

    fn from_sql(&self, value: &SqlValue) -> Result<Option<NaiveTime>, SqlMapperError> {
        match value {
            SqlValue::Null => Ok(None),
            SqlValue::Time(t) => Ok(Some(*t)),
            SqlValue::Timestamp(ts) => Ok(Some(ts.time())),
            SqlValue::Text(s) => NaiveTime::parse_from_str(s.trim(), "%H:%M:%S%.f")
                .or_else(|_| NaiveTime::parse_from_str(s.trim(), "%H:%M"))
                .map(Some)
                .map_err(|err| unparsable(s, "time", err)),
            other => Err(mismatch(other, "time")),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DateTimeUtcTypeHandler;

impl TypeHandler<DateTime<Utc>> for DateTimeUtcTypeHandler {
    fn to_sql(&self, value: &DateTime<Utc>) -> Result<SqlValue, SqlMapperError> {
        Ok(SqlValue::Timestamp(value.naive_utc()))
    }

    fn from_sql(&self, value: &SqlValue) -> Result<Option<DateTime<Utc>>, SqlMapperError> {
        match value {
            SqlValue::Null => Ok(None),
            SqlValue::Timestamp(ts) => Ok(Some(ts.and_utc())),
            SqlValue::Int(secs) => timestamp_from_epoch(*secs).map(|ts| Some(ts.and_utc())),
            SqlValue::Text(s) => DateTime::parse_from_rfc3339(s.trim())
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| parse_timestamp(s).map(|ts| ts.and_utc()))
                .map(Some)
                .ok_or_else(|| unparsable(s, "UTC timestamp", "unrecognized format")),
            other => Err(mismatch(other, "UTC timestamp")),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FixedOffsetTypeHandler;

impl TypeHandler<DateTime<FixedOffset>> for FixedOffsetTypeHandler {
    fn to_sql(&self, value: &DateTime<FixedOffset>) -> Result<SqlValue, SqlMapperError> {
        Ok(SqlValue::Text(value.to_rfc3339()))
    }

    fn from_sql(&self, value: &SqlValue) -> Result<Option<DateTime<FixedOffset>>, SqlMapperError> {
        match value {
            SqlValue::Null => Ok(None),
            SqlValue::Timestamp(ts) => Ok(Some(ts.and_utc().fixed_offset())),
            SqlValue::Text(s) => DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .or_else(|| parse_timestamp(s).map(|ts| ts.and_utc().fixed_offset()))
                .map(Some)
                .ok_or_else(|| unparsable(s, "offset timestamp", "unrecognized format")),
            other => Err(mismatch(other, "offset timestamp")),
        }
    }
}

/// Reads UUIDs from hyphenated text or 16-byte blobs; writes hyphenated text.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidTypeHandler;

impl TypeHandler<Uuid> for UuidTypeHandler {
    fn to_sql(&self, value: &Uuid) -> Result<SqlValue, SqlMapperError> {
        Ok(SqlValue::Text(value.hyphenated().to_string()))
    }

    fn from_sql(&self, value: &SqlValue) -> Result<Option<Uuid>, SqlMapperError> {
        match value {
            SqlValue::Null => Ok(None),
            SqlValue::Text(s) => Uuid::parse_str(s.trim())
                .map(Some)
                .map_err(|err| unparsable(s, "uuid", err)),
            SqlValue::Blob(bytes) => Uuid::from_slice(bytes)
                .map(Some)
                .map_err(|err| SqlMapperError::MappingError(format!("invalid uuid bytes: {err}"))),
            other => Err(mismatch(other, "uuid")),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonTypeHandler;

impl TypeHandler<JsonValue> for JsonTypeHandler {
    fn to_sql(&self, value: &JsonValue) -> Result<SqlValue, SqlMapperError> {
        Ok(SqlValue::Json(value.clone()))
    }

    fn from_sql(&self, value: &SqlValue) -> Result<Option<JsonValue>, SqlMapperError> {
        match value {
            SqlValue::Null => Ok(None),
            SqlValue::Json(json) => Ok(Some(json.clone())),
            SqlValue::Text(s) => serde_json::from_str(s)
                .map(Some)
                .map_err(|err| unparsable(s, "json", err)),
            SqlValue::Int(i) => Ok(Some(JsonValue::from(*i))),
            SqlValue::Float(f) => Ok(Some(JsonValue::from(*f))),
            SqlValue::Bool(b) => Ok(Some(JsonValue::from(*b))),
            other => Err(mismatch(other, "json")),
        }
    }
}

/// Identity handler for dynamically typed values (array elements, untyped scalars).
#[derive(Debug, Default, Clone, Copy)]
pub struct UnknownTypeHandler;

impl TypeHandler<SqlValue> for UnknownTypeHandler {
    fn to_sql(&self, value: &SqlValue) -> Result<SqlValue, SqlMapperError> {
        Ok(value.clone())
    }

    fn from_sql(&self, value: &SqlValue) -> Result<Option<SqlValue>, SqlMapperError> {
        if value.is_null() {
            Ok(None)
        } else {
            Ok(Some(value.clone()))
        }
    }
}

macro_rules! builtin_sql_types {
    ($($ty:ty),+ $(,)?) => {
        $(impl SqlType for $ty {})+
    };
}

builtin_sql_types!(
    bool,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    u64,
    f32,
    f64,
    String,
    char,
    Vec<u8>,
    BlobStream,
    NaiveDateTime,
    NaiveDate,
    NaiveTime,
    DateTime<Utc>,
    DateTime<FixedOffset>,
    Uuid,
    JsonValue,
    SqlValue,
);

pub(super) fn register_defaults(registry: &TypeHandlerRegistry) {
    registry.register::<bool, _>(BoolTypeHandler);
    registry.register::<i8, _>(IntegerTypeHandler::<i8>::new());
    registry.register::<i16, _>(IntegerTypeHandler::<i16>::new());
    registry.register::<i32, _>(IntegerTypeHandler::<i32>::new());
    registry.register::<i64, _>(IntegerTypeHandler::<i64>::new());
    registry.register::<u8, _>(IntegerTypeHandler::<u8>::new());
    registry.register::<u16, _>(IntegerTypeHandler::<u16>::new());
    registry.register::<u32, _>(IntegerTypeHandler::<u32>::new());
    registry.register::<u64, _>(IntegerTypeHandler::<u64>::new());
    registry.register::<f32, _>(FloatTypeHandler::<f32>::new());
    registry.register::<f64, _>(FloatTypeHandler::<f64>::new());
    registry.register::<String, _>(StringTypeHandler);
    registry.register::<char, _>(CharTypeHandler);
    registry.register::<Vec<u8>, _>(ByteArrayTypeHandler);
    registry.register::<BlobStream, _>(BlobStreamTypeHandler);
    registry.register::<NaiveDateTime, _>(TimestampTypeHandler);
    registry.register::<NaiveDate, _>(DateTypeHandler);
    registry.register::<NaiveTime, _>(TimeTypeHandler);
    registry.register::<DateTime<Utc>, _>(DateTimeUtcTypeHandler);
    registry.register::<DateTime<FixedOffset>, _>(FixedOffsetTypeHandler);
    registry.register::<Uuid, _>(UuidTypeHandler);
    registry.register::<JsonValue, _>(JsonTypeHandler);
    registry.register::<SqlValue, _>(UnknownTypeHandler);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_accepts_numbers_and_text() {
        let h = BoolTypeHandler;
        assert_eq!(h.from_sql(&SqlValue::Int(0)).unwrap(), Some(false));
        assert_eq!(h.from_sql(&SqlValue::Int(7)).unwrap(), Some(true));
        assert_eq!(h.from_sql(&SqlValue::Text("TRUE".into())).unwrap(), Some(true));
        assert_eq!(h.from_sql(&SqlValue::Text("0".into())).unwrap(), Some(false));
        assert!(h.from_sql(&SqlValue::Text("maybe".into())).is_err());
    }

    #[test]
    fn integers_are_range_checked() {
        let h = IntegerTypeHandler::<u8>::new();
        assert_eq!(h.from_sql(&SqlValue::Int(255)).unwrap(), Some(255));
        assert!(h.from_sql(&SqlValue::Int(256)).is_err());
        assert!(h.from_sql(&SqlValue::Int(-1)).is_err());
        assert_eq!(h.from_sql(&SqlValue::Text(" 12 ".into())).unwrap(), Some(12));

        let wide = IntegerTypeHandler::<u64>::new();
        assert!(matches!(
            wide.to_sql(&u64::MAX),
            Err(SqlMapperError::ParameterError(_))
        ));
    }

    #[test]
    fn integral_floats_convert_to_integers() {
        let h = IntegerTypeHandler::<i32>::new();
        assert_eq!(h.from_sql(&SqlValue::Float(42.0)).unwrap(), Some(42));
        assert!(h.from_sql(&SqlValue::Float(42.5)).is_err());
    }

    #[test]
    fn null_reads_as_none_for_every_handler() {
        assert_eq!(StringTypeHandler.from_sql(&SqlValue::Null).unwrap(), None);
        assert_eq!(TimestampTypeHandler.from_sql(&SqlValue::Null).unwrap(), None);
        assert_eq!(UuidTypeHandler.from_sql(&SqlValue::Null).unwrap(), None);
        assert_eq!(UnknownTypeHandler.from_sql(&SqlValue::Null).unwrap(), None);
        assert_eq!(
            FloatTypeHandler::<f64>::new().from_sql(&SqlValue::Null).unwrap(),
            None
        );
    }

    #[test]
    fn timestamps_read_back_from_driver_text() {
        let ts = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_milli_opt(13, 45, 0, 125)
            .unwrap();
        let stored = SqlValue::Text(ts.format("%F %T%.f").to_string());
        assert_eq!(TimestampTypeHandler.from_sql(&stored).unwrap(), Some(ts));

        let date_only = SqlValue::Text("2024-02-29".into());
        assert_eq!(
            DateTypeHandler.from_sql(&date_only).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 29)
        );
    }

    #[test]
    fn uuid_reads_text_and_bytes() {
        let id = Uuid::from_u128(0x0123_4567_89ab_cdef_0123_4567_89ab_cdef);
        let text = UuidTypeHandler.to_sql(&id).unwrap();
        assert_eq!(UuidTypeHandler.from_sql(&text).unwrap(), Some(id));
        let bytes = SqlValue::Blob(id.as_bytes().to_vec());
        assert_eq!(UuidTypeHandler.from_sql(&bytes).unwrap(), Some(id));
    }

    #[test]
    fn blob_stream_reads_bytes() {
        let mut stream = BlobStreamTypeHandler
            .from_sql(&SqlValue::Blob(vec![1, 2, 3]))
            .unwrap()
            .unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, vec![1, 2, 3]);
        assert_eq!(stream.len(), 3);
    }

    #[test]
    fn json_parses_stored_text() {
        let parsed = JsonTypeHandler
            .from_sql(&SqlValue::Text(r#"{"a":[1,2]}"#.into()))
            .unwrap();
        assert_eq!(parsed, Some(serde_json::json!({"a": [1, 2]})));
    }
}
