//! Column value byte codec and the comparison rules built on it
//!
//! Every stored slot starts with a one-byte validity tag followed by the
//! type-specific payload. The tag participates in ordering, so NULL sorts
//! below every normal value and INVALID (deleted) above.

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, NaiveTime};
use rust_decimal::Decimal;

use crate::ast::{CmpOp, DataType, Value};
use crate::error::{DbError, DbResult};

/// Validity tag: the value is SQL NULL
pub const DATA_NULL: u8 = 0x00;
/// Validity tag: a normal value follows
pub const DATA_NORMAL: u8 = 0x01;
/// Validity tag: the slot belongs to a deleted row
pub const DATA_INVALID: u8 = 0xFF;

pub const MAX_CHAR_LEN: usize = 256;
pub const MAX_VARCHAR_LEN: usize = 65535;

/// Fixed on-disk slot size for a column of this type: tag byte + payload
///
/// VARCHAR slots hold an 8-byte heap offset; the text itself lives in the
/// column's side heap.
pub fn key_size(ty: &DataType) -> usize {
    match ty {
        DataType::Int => 1 + 8,
        DataType::Char(n) => 1 + n,
        DataType::Varchar(_) => 1 + 8,
        DataType::Date => 1 + 8,
        DataType::Numeric(_, _) => 1 + 16,
    }
}

pub fn type_string(ty: &DataType) -> String {
    match ty {
        DataType::Int => "int".to_string(),
        DataType::Char(n) => format!("char({})", n),
        DataType::Varchar(n) => format!("varchar({})", n),
        DataType::Date => "date".to_string(),
        DataType::Numeric(p, s) => format!("numeric({},{})", p, s),
    }
}

fn parse_date(s: &str) -> DbResult<i64> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| DbError::TypeMismatch(format!("`{}` is not a date", s)))?;
    Ok(date.and_time(NaiveTime::MIN).and_utc().timestamp())
}

fn format_date(secs: i64) -> String {
    match DateTime::from_timestamp(secs, 0) {
        Some(dt) => dt.format("%Y-%m-%d").to_string(),
        None => String::new(),
    }
}

fn decimal_from_value(value: &Value) -> Option<Decimal> {
    use rust_decimal::prelude::FromPrimitive;
    match value {
        Value::Int(i) => Some(Decimal::from(*i)),
        Value::Float(f) => Decimal::from_f64(*f),
        _ => None,
    }
}

/// Build the NUMERIC(p,s) stored form of a literal, checking range
pub fn encode_decimal(value: &Value, p: u32, s: u32) -> DbResult<Decimal> {
    let mut d = decimal_from_value(value)
        .ok_or_else(|| DbError::TypeMismatch("incompatible type for numeric column".to_string()))?;
    d.rescale(s);
    if d.mantissa().unsigned_abs() >= 10u128.pow(p) {
        return Err(DbError::ConstraintViolation(format!(
            "numeric({},{}) out of range",
            p, s
        )));
    }
    Ok(d)
}

/// Encode a literal into the full stored form: tag byte + payload
///
/// For VARCHAR the result is variable-length (tag + text); every other type
/// produces exactly `key_size` bytes.
pub fn encode(value: &Value, ty: &DataType) -> DbResult<Vec<u8>> {
    if value.is_null() {
        return Ok(match ty {
            DataType::Varchar(_) => vec![DATA_NULL],
            _ => vec![DATA_NULL; key_size(ty)],
        });
    }

    let mut out = vec![DATA_NORMAL];
    match (ty, value) {
        (DataType::Int, Value::Int(i)) => out.extend_from_slice(&i.to_le_bytes()),
        (DataType::Char(n), Value::Str(s)) => {
            if s.len() > *n {
                return Err(DbError::ConstraintViolation(format!(
                    "char({}) limit exceeded",
                    n
                )));
            }
            out.extend_from_slice(s.as_bytes());
            out.resize(1 + n, 0);
        }
        (DataType::Varchar(n), Value::Str(s)) => {
            if s.len() > *n {
                return Err(DbError::ConstraintViolation(format!(
                    "varchar({}) limit exceeded",
                    n
                )));
            }
            out.extend_from_slice(s.as_bytes());
        }
        (DataType::Date, Value::Str(s)) => out.extend_from_slice(&parse_date(s)?.to_le_bytes()),
        (DataType::Numeric(p, s), v @ (Value::Int(_) | Value::Float(_))) => {
            out.extend_from_slice(&encode_decimal(v, *p, *s)?.serialize());
        }
        (ty, value) => {
            return Err(DbError::TypeMismatch(format!(
                "cannot store {:?} into {} column",
                value,
                type_string(ty)
            )));
        }
    }
    Ok(out)
}

/// Decode a full stored form back into a literal
pub fn decode(full: &[u8], ty: &DataType) -> Value {
    if full.is_empty() || full[0] != DATA_NORMAL {
        return Value::Null;
    }
    let payload = &full[1..];
    match ty {
        DataType::Int => Value::Int(i64_at(payload)),
        DataType::Char(_) | DataType::Varchar(_) => {
            let end = payload
                .iter()
                .rposition(|&b| b != 0)
                .map(|i| i + 1)
                .unwrap_or(0);
            Value::Str(String::from_utf8_lossy(&payload[..end]).into_owned())
        }
        DataType::Date => Value::Str(format_date(i64_at(payload))),
        DataType::Numeric(_, _) => {
            use rust_decimal::prelude::ToPrimitive;
            let d = decimal_at(payload);
            Value::Float(d.to_f64().unwrap_or_default())
        }
    }
}

fn i64_at(payload: &[u8]) -> i64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&payload[..8]);
    i64::from_le_bytes(buf)
}

fn decimal_at(payload: &[u8]) -> Decimal {
    let mut buf = [0u8; 16];
    buf.copy_from_slice(&payload[..16]);
    Decimal::deserialize(buf)
}

fn op_matches(op: CmpOp, ord: Ordering) -> bool {
    match op {
        CmpOp::Eq => ord == Ordering::Equal,
        CmpOp::Neq => ord != Ordering::Equal,
        CmpOp::Lt => ord == Ordering::Less,
        CmpOp::Le => ord != Ordering::Greater,
        CmpOp::Gt => ord == Ordering::Greater,
        CmpOp::Ge => ord != Ordering::Less,
    }
}

/// Total order on two full keys of the same type
///
/// The tag byte compares first, so NULL < NORMAL < INVALID; payloads of
/// normal values compare per type.
pub fn cmp_keys(a: &[u8], b: &[u8], ty: &DataType) -> Ordering {
    let ta = a.first().copied().unwrap_or(DATA_NULL);
    let tb = b.first().copied().unwrap_or(DATA_NULL);
    if ta != tb {
        return ta.cmp(&tb);
    }
    if ta != DATA_NORMAL {
        return Ordering::Equal;
    }
    let (pa, pb) = (&a[1..], &b[1..]);
    match ty {
        DataType::Int | DataType::Date => i64_at(pa).cmp(&i64_at(pb)),
        DataType::Char(_) | DataType::Varchar(_) => pa.cmp(pb),
        DataType::Numeric(_, _) => decimal_at(pa).cmp(&decimal_at(pb)),
    }
}

/// Evaluate `stored op literal` with three-valued semantics
///
/// A NULL on either side never matches. Cross-type rules: INT compares with
/// int and float literals numerically, NUMERIC likewise, CHAR/VARCHAR with
/// string literals, DATE with a `YYYY-MM-DD` string literal. Anything else
/// is an uncomparable-types error.
pub fn cmp_with_value(stored: &[u8], ty: &DataType, op: CmpOp, literal: &Value) -> DbResult<bool> {
    if literal.is_null() {
        return Ok(false);
    }
    if stored.first().copied() != Some(DATA_NORMAL) {
        return Ok(false);
    }
    let payload = &stored[1..];

    let ord = match (ty, literal) {
        (DataType::Int, Value::Int(i)) => i64_at(payload).cmp(i),
        (DataType::Int, Value::Float(f)) => {
            (i64_at(payload) as f64).partial_cmp(f).unwrap_or(Ordering::Equal)
        }
        (DataType::Char(_) | DataType::Varchar(_), Value::Str(s)) => {
            let end = payload
                .iter()
                .rposition(|&b| b != 0)
                .map(|i| i + 1)
                .unwrap_or(0);
            payload[..end].cmp(s.as_bytes())
        }
        (DataType::Date, Value::Str(s)) => i64_at(payload).cmp(&parse_date(s)?),
        (DataType::Numeric(_, _), v @ (Value::Int(_) | Value::Float(_))) => {
            let rhs = decimal_from_value(v)
                .ok_or_else(|| DbError::TypeMismatch("uncomparable types".to_string()))?;
            decimal_at(payload).cmp(&rhs)
        }
        _ => return Err(DbError::TypeMismatch("uncomparable types".to_string())),
    };
    Ok(op_matches(op, ord))
}

/// Evaluate `a op b` where both sides are stored column values
///
/// INT and NUMERIC mix numerically; CHAR and VARCHAR compare by ordinal
/// bytes (CHAR keeps its zero padding); DATE compares with DATE. Any other
/// pairing is an uncomparable-types error.
pub fn cmp_cross(a: &[u8], ta: &DataType, op: CmpOp, b: &[u8], tb: &DataType) -> DbResult<bool> {
    if a.first().copied() != Some(DATA_NORMAL) || b.first().copied() != Some(DATA_NORMAL) {
        return Ok(false);
    }
    let (pa, pb) = (&a[1..], &b[1..]);

    let ord = match (ta, tb) {
        (DataType::Int, DataType::Int) => i64_at(pa).cmp(&i64_at(pb)),
        (DataType::Int, DataType::Numeric(_, _)) => Decimal::from(i64_at(pa)).cmp(&decimal_at(pb)),
        (DataType::Numeric(_, _), DataType::Int) => decimal_at(pa).cmp(&Decimal::from(i64_at(pb))),
        (DataType::Numeric(_, _), DataType::Numeric(_, _)) => decimal_at(pa).cmp(&decimal_at(pb)),
        (
            DataType::Char(_) | DataType::Varchar(_),
            DataType::Char(_) | DataType::Varchar(_),
        ) => pa.cmp(pb),
        (DataType::Date, DataType::Date) => i64_at(pa).cmp(&i64_at(pb)),
        (ta, tb) => {
            return Err(DbError::TypeMismatch(format!(
                "uncomparable types: {} and {}",
                type_string(ta),
                type_string(tb)
            )));
        }
    };
    Ok(op_matches(op, ord))
}
