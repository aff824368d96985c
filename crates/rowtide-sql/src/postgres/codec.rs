//! Conversion between record values and Postgres wire values.

use std::error::Error;

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use postgres_protocol::types as wire;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::Row;

use rowtide_core::{parse_timestamp, TimezoneSpec, Value};

use crate::error::{DbError, DbResult};

type BoxError = Box<dyn Error + Sync + Send>;

/// A record value bound as a statement parameter. The encoding follows the
/// parameter type the server inferred for the placeholder.
#[derive(Debug)]
pub struct PgParam<'a> {
    value: &'a Value,
    timezone: Option<TimezoneSpec>,
}

impl<'a> PgParam<'a> {
    pub fn new(value: &'a Value, timezone: Option<TimezoneSpec>) -> Self {
        Self { value, timezone }
    }

    fn int(&self) -> Result<i64, BoxError> {
        match self.value {
            Value::Int(i) => Ok(*i),
            Value::Float(f) if f.fract() == 0.0 => Ok(*f as i64),
            Value::Decimal(d) if d.fract().is_zero() => {
                d.to_i64().ok_or_else(|| format!("{} is out of integer range", d).into())
            }
            Value::Bool(b) => Ok(*b as i64),
            Value::String(s) => Ok(s.trim().parse()?),
            other => Err(format!("cannot bind {} as an integer", other.type_name()).into()),
        }
    }

    fn float(&self) -> Result<f64, BoxError> {
        match self.value {
            Value::Float(f) => Ok(*f),
            Value::Int(i) => Ok(*i as f64),
            Value::Decimal(d) => d
                .to_f64()
                .ok_or_else(|| format!("{} is out of float range", d).into()),
            Value::String(s) => Ok(s.trim().parse()?),
            other => Err(format!("cannot bind {} as a number", other.type_name()).into()),
        }
    }

    fn decimal(&self) -> Result<Decimal, BoxError> {
        match self.value {
            Value::String(s) => Ok(s.trim().parse()?),
            other => other
                .as_decimal()
                .ok_or_else(|| format!("cannot bind {} as a decimal", other.type_name()).into()),
        }
    }

    fn instant(&self) -> Result<DateTime<Utc>, BoxError> {
        match self.value {
            Value::Timestamp(ts) => Ok(*ts),
            Value::String(s) => parse_timestamp(s)
                .ok_or_else(|| format!("cannot parse '{}' as a timestamp", s).into()),
            other => Err(format!("cannot bind {} as a timestamp", other.type_name()).into()),
        }
    }

    fn local(&self) -> Result<NaiveDateTime, BoxError> {
        let instant = self.instant()?;
        Ok(match self.timezone {
            Some(tz) => tz.to_local(instant),
            None => instant.naive_utc(),
        })
    }
}

fn pg_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2000, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

fn micros_since_pg_epoch(local: NaiveDateTime) -> Result<i64, BoxError> {
    (local - pg_epoch())
        .num_microseconds()
        .ok_or_else(|| "timestamp out of range".into())
}

impl ToSql for PgParam<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        if self.value.is_null() {
            return Ok(IsNull::Yes);
        }

        match *ty {
            Type::BOOL => match self.value {
                Value::Bool(b) => wire::bool_to_sql(*b, out),
                _ => wire::bool_to_sql(self.int()? != 0, out),
            },
            Type::INT2 => wire::int2_to_sql(i16::try_from(self.int()?)?, out),
            Type::INT4 => wire::int4_to_sql(i32::try_from(self.int()?)?, out),
            Type::INT8 => wire::int8_to_sql(self.int()?, out),
            Type::FLOAT4 => wire::float4_to_sql(self.float()? as f32, out),
            Type::FLOAT8 => wire::float8_to_sql(self.float()?, out),
            Type::NUMERIC => return self.decimal()?.to_sql(ty, out),
            Type::UUID => {
                let text = self.value.to_display_string();
                let uuid = uuid::Uuid::parse_str(text.trim())?;
                wire::uuid_to_sql(*uuid.as_bytes(), out);
            }
            Type::TIMESTAMPTZ => {
                wire::timestamp_to_sql(micros_since_pg_epoch(self.instant()?.naive_utc())?, out)
            }
            Type::TIMESTAMP => wire::timestamp_to_sql(micros_since_pg_epoch(self.local()?)?, out),
            Type::DATE => {
                let days = (self.local()?.date() - pg_epoch().date()).num_days();
                wire::date_to_sql(i32::try_from(days)?, out);
            }
            Type::JSON | Type::JSONB => {
                if *ty == Type::JSONB {
                    out.put_u8(1);
                }
                let json: serde_json::Value = self.value.clone().into();
                serde_json::to_writer(out.writer(), &json)?;
            }
            _ => wire::text_to_sql(&self.value.to_display_string(), out),
        }

        Ok(IsNull::No)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Convert a row column to a Value.
pub fn row_to_value(row: &Row, index: usize, timezone: Option<TimezoneSpec>) -> DbResult<Value> {
    let column = &row.columns()[index];
    let conversion = |e: tokio_postgres::Error| {
        DbError::Conversion(format!("column '{}': {}", column.name(), e))
    };
    let to_instant = |local: NaiveDateTime| -> DbResult<Value> {
        match timezone {
            Some(tz) => Ok(Value::Timestamp(tz.to_utc(local)?)),
            None => Ok(Value::Timestamp(local.and_utc())),
        }
    };

    match *column.type_() {
        Type::BOOL => Ok(opt(row.try_get::<_, Option<bool>>(index).map_err(conversion)?)),
        Type::INT2 => Ok(row
            .try_get::<_, Option<i16>>(index)
            .map_err(conversion)?
            .map(|i| Value::Int(i as i64))
            .unwrap_or(Value::Null)),
        Type::INT4 => Ok(row
            .try_get::<_, Option<i32>>(index)
            .map_err(conversion)?
            .map(|i| Value::Int(i as i64))
            .unwrap_or(Value::Null)),
        Type::INT8 => Ok(opt(row.try_get::<_, Option<i64>>(index).map_err(conversion)?)),
        Type::FLOAT4 => Ok(row
            .try_get::<_, Option<f32>>(index)
            .map_err(conversion)?
            .map(|f| Value::Float(f as f64))
            .unwrap_or(Value::Null)),
        Type::FLOAT8 => Ok(opt(row.try_get::<_, Option<f64>>(index).map_err(conversion)?)),
        Type::NUMERIC => Ok(numeric_value(
            row.try_get::<_, Option<Decimal>>(index)
                .map_err(conversion)?,
        )),
        Type::UUID => Ok(row
            .try_get::<_, Option<uuid::Uuid>>(index)
            .map_err(conversion)?
            .map(|u| Value::String(u.to_string()))
            .unwrap_or(Value::Null)),
        Type::TIMESTAMPTZ => Ok(opt(row
            .try_get::<_, Option<DateTime<Utc>>>(index)
            .map_err(conversion)?)),
        Type::TIMESTAMP => match row
            .try_get::<_, Option<NaiveDateTime>>(index)
            .map_err(conversion)?
        {
            Some(local) => to_instant(local),
            None => Ok(Value::Null),
        },
        Type::DATE => match row
            .try_get::<_, Option<NaiveDate>>(index)
            .map_err(conversion)?
        {
            Some(date) => to_instant(date.and_time(chrono::NaiveTime::MIN)),
            None => Ok(Value::Null),
        },
        Type::JSON | Type::JSONB => Ok(row
            .try_get::<_, Option<serde_json::Value>>(index)
            .map_err(conversion)?
            .map(Value::from)
            .unwrap_or(Value::Null)),
        _ => {
            // Fallback: try to get as string
            let v: Option<String> = row.try_get(index).ok().flatten();
            Ok(v.map(Value::String).unwrap_or(Value::Null))
        }
    }
}

fn opt<T: Into<Value>>(v: Option<T>) -> Value {
    v.map(Into::into).unwrap_or(Value::Null)
}

/// Integral numerics come back as integers so they track like counters.
fn numeric_value(v: Option<Decimal>) -> Value {
    match v {
        Some(d) if d.fract().is_zero() => {
            d.to_i64().map(Value::Int).unwrap_or(Value::Decimal(d))
        }
        Some(d) => Value::Decimal(d),
        None => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn encode(value: &Value, ty: &Type, timezone: Option<TimezoneSpec>) -> Vec<u8> {
        let mut out = BytesMut::new();
        let param = PgParam::new(value, timezone);
        assert!(matches!(param.to_sql(ty, &mut out).unwrap(), IsNull::No));
        out.to_vec()
    }

    #[test]
    fn test_null_is_null() {
        let mut out = BytesMut::new();
        let param = PgParam::new(&Value::Null, None);
        assert!(matches!(param.to_sql(&Type::INT8, &mut out).unwrap(), IsNull::Yes));
    }

    #[test]
    fn test_integer_widths() {
        assert_eq!(encode(&Value::Int(20), &Type::INT8, None), 20i64.to_be_bytes());
        assert_eq!(encode(&Value::Int(20), &Type::INT4, None), 20i32.to_be_bytes());
        assert_eq!(encode(&Value::from("7"), &Type::INT2, None), 7i16.to_be_bytes());

        let mut out = BytesMut::new();
        let too_big = Value::Int(i64::MAX);
        assert!(PgParam::new(&too_big, None).to_sql(&Type::INT4, &mut out).is_err());
    }

    #[test]
    fn test_timestamp_uses_timezone() {
        let instant = Utc.with_ymd_and_hms(2000, 1, 1, 6, 0, 0).unwrap();
        let value = Value::Timestamp(instant);
        let tz: TimezoneSpec = "America/Chicago".parse().unwrap();

        // timestamptz is always UTC-based: six hours after the epoch.
        let six_hours = 6 * 3600 * 1_000_000i64;
        assert_eq!(encode(&value, &Type::TIMESTAMPTZ, Some(tz)), six_hours.to_be_bytes());
        // timestamp is wall clock in the configured zone: midnight local.
        assert_eq!(encode(&value, &Type::TIMESTAMP, Some(tz)), 0i64.to_be_bytes());
    }

    #[test]
    fn test_text_fallback() {
        assert_eq!(encode(&Value::Int(5), &Type::TEXT, None), b"5");
        assert_eq!(encode(&Value::from("abc"), &Type::VARCHAR, None), b"abc");
    }

    #[test]
    fn test_jsonb_has_version_byte() {
        let value = Value::Array(vec![Value::Int(1)]);
        assert_eq!(encode(&value, &Type::JSONB, None), b"\x01[1]");
    }

    #[test]
    fn test_numeric_value_shape() {
        assert_eq!(numeric_value(Some(Decimal::new(5000, 2))), Value::Int(50));
        assert_eq!(
            numeric_value(Some(Decimal::new(25, 1))),
            Value::Decimal(Decimal::new(25, 1))
        );
        assert_eq!(numeric_value(None), Value::Null);

        let wide: Decimal = "123456789012345678901234.5".parse().unwrap();
        assert_eq!(numeric_value(Some(wide)), Value::Decimal(wide));
    }

    #[test]
    fn test_numeric_param_keeps_precision() {
        let exact: Decimal = "12345678901234567.25".parse().unwrap();
        let mut expected = BytesMut::new();
        exact.to_sql(&Type::NUMERIC, &mut expected).unwrap();

        let from_text = Value::from("12345678901234567.25");
        assert_eq!(encode(&Value::Decimal(exact), &Type::NUMERIC, None), expected.to_vec());
        assert_eq!(encode(&from_text, &Type::NUMERIC, None), expected.to_vec());

        let mut big = BytesMut::new();
        Decimal::from(12345678901234567i64)
            .to_sql(&Type::NUMERIC, &mut big)
            .unwrap();
        assert_eq!(encode(&Value::Int(12345678901234567), &Type::NUMERIC, None), big.to_vec());
    }
}
