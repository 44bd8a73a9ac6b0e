//! Row conversion.
//!
//! Turns a `tokio_postgres::Row` into an ordered JSON object, one entry per
//! column. Timestamps become RFC 3339 text and hstore columns become flat
//! objects, matching what the notification path produces for the same row.

use std::collections::HashMap;
use std::net::IpAddr;

use anyhow::Result;
use base64::Engine;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{Map, Number, Value};
use tokio_postgres::types::Type;
use tracing::warn;

use crate::Row;

/// Convert every column of `row`.
pub(crate) fn row_to_attributes(row: &tokio_postgres::Row) -> Result<Row> {
    let mut attributes = Map::with_capacity(row.len());
    for (i, column) in row.columns().iter().enumerate() {
        attributes.insert(column.name().to_string(), convert_postgres_value(row, i)?);
    }
    Ok(attributes)
}

fn opt<T>(value: Option<T>, f: impl FnOnce(T) -> Value) -> Value {
    value.map(f).unwrap_or(Value::Null)
}

fn float(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

fn timestamp_text(dt: DateTime<Utc>) -> Value {
    Value::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

fn decimal_value(decimal: Decimal) -> Value {
    if decimal.scale() == 0 {
        if let Some(i) = decimal.to_i64() {
            return Value::from(i);
        }
    }
    match decimal.to_f64().and_then(Number::from_f64) {
        Some(n) => Value::Number(n),
        None => Value::String(decimal.to_string()),
    }
}

/// Convert a PostgreSQL value to a JSON value
fn convert_postgres_value(row: &tokio_postgres::Row, index: usize) -> Result<Value> {
    let column = &row.columns()[index];
    let pg_type = column.type_();

    let value = match *pg_type {
        Type::BOOL => opt(row.try_get::<_, Option<bool>>(index)?, Value::Bool),
        Type::INT2 => opt(row.try_get::<_, Option<i16>>(index)?, Value::from),
        Type::INT4 => opt(row.try_get::<_, Option<i32>>(index)?, Value::from),
        Type::INT8 => opt(row.try_get::<_, Option<i64>>(index)?, Value::from),
        Type::OID => opt(row.try_get::<_, Option<u32>>(index)?, Value::from),
        Type::FLOAT4 => opt(row.try_get::<_, Option<f32>>(index)?, |f| float(f as f64)),
        Type::FLOAT8 => opt(row.try_get::<_, Option<f64>>(index)?, float),
        Type::NUMERIC => opt(row.try_get::<_, Option<Decimal>>(index)?, decimal_value),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
            opt(row.try_get::<_, Option<String>>(index)?, Value::String)
        }
        Type::TIMESTAMP => opt(row.try_get::<_, Option<NaiveDateTime>>(index)?, |ts| {
            timestamp_text(ts.and_utc())
        }),
        Type::TIMESTAMPTZ => opt(
            row.try_get::<_, Option<DateTime<Utc>>>(index)?,
            timestamp_text,
        ),
        Type::DATE => opt(row.try_get::<_, Option<NaiveDate>>(index)?, |d| {
            Value::String(d.format("%Y-%m-%d").to_string())
        }),
        Type::TIME => opt(row.try_get::<_, Option<NaiveTime>>(index)?, |t| {
            Value::String(t.to_string())
        }),
        Type::JSON | Type::JSONB => opt(row.try_get::<_, Option<Value>>(index)?, |v| v),
        Type::UUID => opt(row.try_get::<_, Option<uuid::Uuid>>(index)?, |u| {
            Value::String(u.to_string())
        }),
        Type::INET => opt(row.try_get::<_, Option<IpAddr>>(index)?, |ip| {
            Value::String(ip.to_string())
        }),
        Type::BYTEA => opt(row.try_get::<_, Option<Vec<u8>>>(index)?, |bytes| {
            Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
        }),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => {
            opt(row.try_get::<_, Option<Vec<Option<String>>>>(index)?, |a| {
                Value::Array(a.into_iter().map(|s| opt(s, Value::String)).collect())
            })
        }
        Type::INT4_ARRAY => opt(row.try_get::<_, Option<Vec<Option<i32>>>>(index)?, |a| {
            Value::Array(a.into_iter().map(|i| opt(i, Value::from)).collect())
        }),
        Type::INT8_ARRAY => opt(row.try_get::<_, Option<Vec<Option<i64>>>>(index)?, |a| {
            Value::Array(a.into_iter().map(|i| opt(i, Value::from)).collect())
        }),
        Type::BOOL_ARRAY => opt(row.try_get::<_, Option<Vec<Option<bool>>>>(index)?, |a| {
            Value::Array(a.into_iter().map(|b| opt(b, Value::Bool)).collect())
        }),
        _ if pg_type.name() == "hstore" => opt(
            row.try_get::<_, Option<HashMap<String, Option<String>>>>(index)?,
            hstore_object,
        ),
        _ => {
            // For unknown types, try to get as string
            match row.try_get::<_, Option<String>>(index) {
                Ok(value) => opt(value, Value::String),
                Err(_) => {
                    warn!(
                        column = column.name(),
                        "Unsupported PostgreSQL type {pg_type}, writing null"
                    );
                    Value::Null
                }
            }
        }
    };
    Ok(value)
}

/// Decoded hstore as an object, keys sorted for a stable document layout.
pub(crate) fn hstore_object(map: HashMap<String, Option<String>>) -> Value {
    let mut entries: Vec<(String, Option<String>)> = map.into_iter().collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Value::Object(
        entries
            .into_iter()
            .map(|(k, v)| (k, opt(v, Value::String)))
            .collect(),
    )
}
