#![cfg(feature = "sqlite")]

use std::io::Cursor;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use sql_mapper::prelude::*;
use sql_mapper::sql_enum;
use tempfile::tempdir;
use uuid::Uuid;

fn unique_db_path(prefix: &str) -> String {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join(format!("{prefix}.db"));
    // Leak the tempdir so the file persists for the duration of the test binary.
    std::mem::forget(dir);
    path.to_string_lossy().into_owned()
}

sql_enum! {
    pub enum Status { Active, Suspended, Closed }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Celsius(f64);

impl SqlType for Celsius {}

/// Stores temperatures as text such as `21.5C`.
struct CelsiusHandler;

impl TypeHandler<Celsius> for CelsiusHandler {
    fn to_sql(&self, value: &Celsius) -> Result<SqlValue, SqlMapperError> {
        Ok(SqlValue::Text(format!("{}C", value.0)))
    }

    fn from_sql(&self, value: &SqlValue) -> Result<Option<Celsius>, SqlMapperError> {
        match value {
            SqlValue::Null => Ok(None),
            SqlValue::Text(text) => text
                .strip_suffix('C')
                .and_then(|n| n.parse::<f64>().ok())
                .map(|n| Some(Celsius(n)))
                .ok_or_else(|| SqlMapperError::MappingError(format!("bad temperature {text}"))),
            other => Err(SqlMapperError::MappingError(format!(
                "unexpected {other:?} for temperature"
            ))),
        }
    }
}

fn session(prefix: &str) -> Session {
    Session::new(SqliteOptionsBuilder::new(unique_db_path(prefix)).build())
}

/// Writes `value` and then NULL into an untyped column and reads each back as `T`.
fn assert_round_trip<T>(
    scope: &mut ConnectionScope,
    value: T,
) -> Result<(), Box<dyn std::error::Error>>
where
    T: SqlType + Clone + PartialEq + std::fmt::Debug,
{
    for stored in [Some(value), None] {
        scope.create_query("DELETE FROM vals")?.execute_update()?;
        scope
            .create_query("INSERT INTO vals (v) VALUES (:v)")?
            .add_optional_parameter("v", stored.clone())?
            .execute_update()?;
        let read = scope
            .create_query("SELECT v FROM vals")?
            .execute_scalar_as::<T>()?;
        assert_eq!(read, stored, "{}", std::any::type_name::<T>());
    }
    Ok(())
}

#[test]
fn custom_handler_must_be_registered() -> Result<(), Box<dyn std::error::Error>> {
    let session = session("custom");
    let mut scope = session.open()?;
    scope
        .create_query("CREATE TABLE readings (id INTEGER PRIMARY KEY, temp TEXT)")?
        .execute_update()?;

    {
        let mut insert = scope.create_query("INSERT INTO readings (temp) VALUES (:temp)")?;
        assert!(matches!(
            insert.add_parameter("temp", Celsius(21.5)),
            Err(SqlMapperError::MappingError(_))
        ));
    }

    session.registry().register::<Celsius, _>(CelsiusHandler);
    scope
        .create_query("INSERT INTO readings (temp) VALUES (:temp)")?
        .add_parameter("temp", Celsius(21.5))?
        .execute_update()?;

    let stored = scope
        .create_query("SELECT temp FROM readings")?
        .execute_scalar()?;
    assert_eq!(stored, Some(SqlValue::Text("21.5C".into())));
    let read = scope
        .create_query("SELECT temp FROM readings")?
        .execute_scalar_as::<Celsius>()?;
    assert_eq!(read, Some(Celsius(21.5)));
    Ok(())
}

#[test]
fn enums_round_trip_by_name_and_ordinal() -> Result<(), Box<dyn std::error::Error>> {
    let session = session("enums");
    let mut scope = session.open()?;
    scope
        .create_query("CREATE TABLE accounts (id INTEGER PRIMARY KEY, status TEXT)")?
        .execute_update()?;
    scope
        .create_query("INSERT INTO accounts (status) VALUES (:status)")?
        .add_parameter("status", Status::Suspended)?
        .execute_update()?;

    let by_name = scope
        .create_query("SELECT status FROM accounts")?
        .fetch::<Status>()?;
    assert_eq!(by_name, vec![Status::Suspended]);

    let by_ordinal = scope
        .create_query("SELECT 2")?
        .execute_scalar_as::<Status>()?;
    assert_eq!(by_ordinal, Some(Status::Closed));

    let lowercase = scope
        .create_query("SELECT 'active'")?
        .execute_scalar_as::<Status>()?;
    assert_eq!(lowercase, Some(Status::Active));
    Ok(())
}

#[test]
fn dates_json_uuid_and_booleans() -> Result<(), Box<dyn std::error::Error>> {
    let session = session("builtins");
    let mut scope = session.open()?;
    scope
        .create_query(
            "CREATE TABLE events (id INTEGER PRIMARY KEY, at TEXT, day TEXT, payload TEXT, \
             ref TEXT, done INTEGER)",
        )?
        .execute_update()?;

    let at = NaiveDate::from_ymd_opt(2024, 2, 29)
        .expect("date")
        .and_hms_milli_opt(13, 45, 0, 125)
        .expect("time");
    let reference = Uuid::parse_str("67e55044-10b1-426f-9247-bb680e5fe0c8")?;
    scope
        .create_query(
            "INSERT INTO events (at, day, payload, ref, done) \
             VALUES (:at, :day, :payload, :ref, :done)",
        )?
        .add_parameter("at", at)?
        .add_parameter("day", at.date())?
        .add_parameter("payload", serde_json::json!({"kind": "deploy", "ok": true}))?
        .add_parameter("ref", reference)?
        .add_parameter("done", true)?
        .execute_update()?;

    let table = scope
        .create_query("SELECT at, day, payload, ref, done FROM events")?
        .fetch_table()?;
    let row = &table.rows()[0];
    assert_eq!(row.get::<chrono::NaiveDateTime>("at")?, Some(at));
    assert_eq!(row.get::<NaiveDate>("day")?, Some(at.date()));
    assert_eq!(
        row.get::<serde_json::Value>("payload")?,
        Some(serde_json::json!({"kind": "deploy", "ok": true}))
    );
    assert_eq!(row.get::<Uuid>("REF")?, Some(reference));
    assert_eq!(row.get::<bool>("done")?, Some(true));
    assert_eq!(row.get_value("done"), Some(&SqlValue::Int(1)));
    Ok(())
}

#[test]
fn stream_parameters_are_read_into_blobs() -> Result<(), Box<dyn std::error::Error>> {
    let session = session("streams");
    let mut scope = session.open()?;
    scope
        .create_query("CREATE TABLE files (id INTEGER PRIMARY KEY, body BLOB)")?
        .execute_update()?;
    scope
        .create_query("INSERT INTO files (body) VALUES (:body)")?
        .add_stream_parameter("body", Cursor::new(vec![0_u8, 159, 146, 150]))?
        .execute_update()?;

    let body = scope
        .create_query("SELECT body FROM files")?
        .execute_scalar_as::<Vec<u8>>()?;
    assert_eq!(body, Some(vec![0_u8, 159, 146, 150]));

    let streamed = scope
        .create_query("SELECT body FROM files")?
        .execute_scalar_as::<BlobStream>()?
        .expect("blob");
    assert_eq!(streamed.len(), 4);
    Ok(())
}

#[test]
fn every_builtin_handler_round_trips_values_and_null() -> Result<(), Box<dyn std::error::Error>> {
    let session = session("round_trip");
    let mut scope = session.open()?;
    scope.create_query("CREATE TABLE vals (v)")?.execute_update()?;

    let at = NaiveDate::from_ymd_opt(2024, 2, 29)
        .expect("date")
        .and_hms_milli_opt(13, 45, 0, 125)
        .expect("time");
    let offset = FixedOffset::east_opt(5 * 3600 + 1800).expect("offset");

    assert_round_trip(&mut scope, true)?;
    assert_round_trip(&mut scope, false)?;
    assert_round_trip(&mut scope, -7_i8)?;
    assert_round_trip(&mut scope, -300_i16)?;
    assert_round_trip(&mut scope, 70_000_i32)?;
    assert_round_trip(&mut scope, i64::MIN)?;
    assert_round_trip(&mut scope, 200_u8)?;
    assert_round_trip(&mut scope, 60_000_u16)?;
    assert_round_trip(&mut scope, 4_000_000_000_u32)?;
    assert_round_trip(&mut scope, 42_u64)?;
    assert_round_trip(&mut scope, 1.5_f32)?;
    assert_round_trip(&mut scope, -2.25_f64)?;
    assert_round_trip(&mut scope, "plain text".to_string())?;
    assert_round_trip(&mut scope, String::new())?;
    assert_round_trip(&mut scope, 'é')?;
    assert_round_trip(&mut scope, vec![0_u8, 255, 7])?;
    assert_round_trip(&mut scope, Vec::<u8>::new())?;
    assert_round_trip(&mut scope, BlobStream::new(vec![1, 2, 3]))?;
    assert_round_trip(&mut scope, at)?;
    assert_round_trip(&mut scope, at.date())?;
    assert_round_trip(&mut scope, NaiveTime::from_hms_milli_opt(8, 30, 15, 250).expect("time"))?;
    assert_round_trip(&mut scope, at.and_utc())?;
    assert_round_trip::<DateTime<FixedOffset>>(
        &mut scope,
        at.and_local_timezone(offset).single().expect("offset time"),
    )?;
    assert_round_trip(&mut scope, Uuid::parse_str("67e55044-10b1-426f-9247-bb680e5fe0c8")?)?;
    assert_round_trip(&mut scope, serde_json::json!({"tags": ["a", "b"], "n": 3}))?;
    assert_round_trip(&mut scope, SqlValue::Text("raw".into()))?;
    assert_round_trip(&mut scope, Status::Suspended)?;

    Ok(())
}
