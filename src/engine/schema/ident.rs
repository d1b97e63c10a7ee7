//! Opaque identifier codec: node IDs over heterogeneous primary keys and
//! version-2 pagination cursors. Both wire formats are standard base64 over
//! canonical JSON, so encode followed by decode is byte-exact.

use crate::engine::reflect::model::{Column, FieldType};
use crate::engine::schema::scalars;
use crate::engine::value::Value;
use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;

/// Integers above 2^53 lose precision in JSON number position, so they are
/// carried as strings.
const MAX_SAFE_JSON_INT: i64 = 9_007_199_254_740_992;

/// Encodes a node ID: `base64( json([typeName, pk1, pk2, …]) )`.
pub fn encode_node_id(type_name: &str, pk_values: &[Value]) -> Result<String, Error> {
    let mut parts: Vec<serde_json::Value> =
        vec![serde_json::Value::String(type_name.to_string())];
    for v in pk_values {
        parts.push(pk_to_json(v)?);
    }
    let json = serde_json::to_vec(&parts).map_err(|e| Error::TypeConversionFailed {
        src: format!("node id serialization: {}", e),
        dst: "node id".to_string(),
    })?;
    Ok(base64::encode(json))
}

fn pk_to_json(v: &Value) -> Result<serde_json::Value, Error> {
    Ok(match v {
        Value::Int64(i) => {
            if i.abs() > MAX_SAFE_JSON_INT {
                serde_json::Value::String(i.to_string())
            } else {
                serde_json::Value::Number((*i).into())
            }
        }
        Value::UInt64(u) => {
            if *u > MAX_SAFE_JSON_INT as u64 {
                serde_json::Value::String(u.to_string())
            } else {
                serde_json::Value::Number((*u).into())
            }
        }
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Bool(b) => serde_json::Value::Bool(*b),
        // binary PKs (UUID storage) travel as canonical text when possible
        Value::Bytes(b) => match scalars::Uuid::from_bytes(b) {
            Some(u) => serde_json::Value::String(u.to_wire()),
            None => serde_json::Value::String(base64::encode(b)),
        },
        other => {
            return Err(Error::TypeConversionFailed {
                src: format!("{:?}", other),
                dst: "node id component".to_string(),
            })
        }
    })
}

/// Decodes a node ID into its type name and raw JSON components. Decoding is
/// pure; raw values keep their full numeric range for the typed conversion
/// step.
pub fn decode_node_id(encoded: &str) -> Result<(String, Vec<serde_json::Value>), Error> {
    let bytes = base64::decode(encoded).map_err(|_| Error::NodeIdNotParsed {
        reason: "not valid base64".to_string(),
    })?;
    let parts: Vec<serde_json::Value> =
        serde_json::from_slice(&bytes).map_err(|_| Error::NodeIdNotParsed {
            reason: "not a JSON array".to_string(),
        })?;
    let mut iter = parts.into_iter();
    let type_name = match iter.next() {
        Some(serde_json::Value::String(s)) => s,
        _ => {
            return Err(Error::NodeIdNotParsed {
                reason: "missing type name".to_string(),
            })
        }
    };
    let values: Vec<serde_json::Value> = iter.collect();
    if values.is_empty() {
        return Err(Error::NodeIdNotParsed {
            reason: "missing primary key values".to_string(),
        });
    }
    Ok((type_name, values))
}

/// Converts one raw node-ID component to the runtime value bound into SQL,
/// using the column's effective GraphQL type. Integer parsing preserves the
/// full 64-bit range; UUID columns honor binary versus text storage.
pub fn parse_pk_value(raw: &serde_json::Value, column: &Column) -> Result<Value, Error> {
    let invalid = |detail: &str| Error::NodeIdNotParsed {
        reason: format!(
            "component for column {} is not a valid {}: {}",
            column.name(),
            column.effective_type().scalar_name(),
            detail
        ),
    };

    match column.effective_type() {
        FieldType::BigInt | FieldType::Int => match raw {
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Int64(i))
                } else if let Some(u) = n.as_u64() {
                    Ok(Value::UInt64(u))
                } else {
                    Err(invalid("non-integral number"))
                }
            }
            serde_json::Value::String(s) => {
                if let Ok(i) = s.parse::<i64>() {
                    Ok(Value::Int64(i))
                } else if let Ok(u) = s.parse::<u64>() {
                    Ok(Value::UInt64(u))
                } else {
                    Err(invalid("unparsable integer string"))
                }
            }
            _ => Err(invalid("expected number or string")),
        },
        FieldType::Uuid => match raw {
            serde_json::Value::String(s) => {
                let parsed = scalars::Uuid::parse_str(s).ok_or_else(|| invalid("bad UUID"))?;
                if column.binary_storage() {
                    Ok(Value::Bytes(parsed.as_bytes().to_vec()))
                } else {
                    Ok(Value::String(parsed.to_wire()))
                }
            }
            _ => Err(invalid("expected UUID text")),
        },
        FieldType::Boolean => match raw {
            serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
            _ => Err(invalid("expected boolean")),
        },
        FieldType::DateTime => match raw {
            serde_json::Value::String(s) => Ok(Value::String(sql_datetime(s)?)),
            _ => Err(invalid("expected timestamp text")),
        },
        FieldType::Bytes => match raw {
            serde_json::Value::String(s) => base64::decode(s)
                .map(Value::Bytes)
                .map_err(|_| invalid("bad base64")),
            _ => Err(invalid("expected base64 text")),
        },
        _ => match raw {
            serde_json::Value::String(s) => Ok(Value::String(s.clone())),
            serde_json::Value::Number(n) => Ok(Value::String(n.to_string())),
            _ => Err(invalid("expected text")),
        },
    }
}

/// Rewrites an RFC3339 timestamp into the comparison-friendly form bound into
/// SQL predicates.
pub(crate) fn sql_datetime(s: &str) -> Result<String, Error> {
    let parsed = chrono::DateTime::parse_from_rfc3339(s).map_err(|_| Error::ScalarNotParsed {
        type_name: "DateTime".to_string(),
        value: s.to_string(),
    })?;
    Ok(parsed
        .naive_utc()
        .format("%Y-%m-%d %H:%M:%S%.6f")
        .to_string())
}

/// Sort direction inside a cursor or an orderBy key.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }

    pub fn parse(s: &str) -> Option<Direction> {
        match s {
            "ASC" => Some(Direction::Asc),
            "DESC" => Some(Direction::Desc),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct CursorPayload {
    v: u8,
    t: String,
    k: String,
    d: Vec<String>,
    vals: Vec<String>,
}

/// A decoded version-2 pagination cursor.
#[derive(Clone, Debug, PartialEq)]
pub struct Cursor {
    type_name: String,
    order_key: String,
    directions: Vec<Direction>,
    values: Vec<String>,
}

impl Cursor {
    pub fn new(
        type_name: String,
        order_key: String,
        directions: Vec<Direction>,
        values: Vec<String>,
    ) -> Cursor {
        Cursor {
            type_name,
            order_key,
            directions,
            values,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn order_key(&self) -> &str {
        &self.order_key
    }

    pub fn directions(&self) -> &[Direction] {
        &self.directions
    }

    /// Cursor values are string-coerced to avoid float64 round-trips. The
    /// list may be one longer than the sort column set when the first value
    /// is a computed distance.
    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Checks the cursor against the query it was submitted to.
    pub fn validate(
        &self,
        expected_type: &str,
        expected_key: &str,
        expected_directions: &[Direction],
    ) -> Result<(), Error> {
        if self.type_name != expected_type
            || self.order_key != expected_key
            || self.directions != expected_directions
        {
            return Err(Error::CursorMismatched {
                expected_type: expected_type.to_string(),
                found_type: self.type_name.clone(),
                expected_key: render_key(expected_key, expected_directions),
                found_key: render_key(&self.order_key, &self.directions),
            });
        }
        Ok(())
    }
}

fn render_key(key: &str, directions: &[Direction]) -> String {
    let dirs: Vec<&str> = directions.iter().map(|d| d.as_str()).collect();
    format!("{} ({})", key, dirs.join(","))
}

/// Encodes a cursor: `base64( json({v:2, t, k, d, vals}) )`.
pub fn encode_cursor(cursor: &Cursor) -> Result<String, Error> {
    let payload = CursorPayload {
        v: 2,
        t: cursor.type_name.clone(),
        k: cursor.order_key.clone(),
        d: cursor.directions.iter().map(|d| d.as_str().to_string()).collect(),
        vals: cursor.values.clone(),
    };
    let json = serde_json::to_vec(&payload).map_err(|e| Error::TypeConversionFailed {
        src: format!("cursor serialization: {}", e),
        dst: "cursor".to_string(),
    })?;
    Ok(base64::encode(json))
}

/// Decodes a cursor, rejecting any version other than 2, direction values
/// outside ASC/DESC, and direction/value length mismatches.
pub fn decode_cursor(encoded: &str) -> Result<Cursor, Error> {
    let bytes = base64::decode(encoded).map_err(|_| Error::CursorNotParsed {
        reason: "not valid base64".to_string(),
    })?;
    let payload: CursorPayload =
        serde_json::from_slice(&bytes).map_err(|_| Error::CursorNotParsed {
            reason: "not a v2 cursor object".to_string(),
        })?;
    if payload.v != 2 {
        return Err(Error::CursorNotParsed {
            reason: format!("expected v2, got v{}", payload.v),
        });
    }
    // the distance-led variant carries exactly one extra value
    if payload.vals.len() != payload.d.len() && payload.vals.len() != payload.d.len() + 1 {
        return Err(Error::CursorNotParsed {
            reason: format!(
                "{} directions but {} values",
                payload.d.len(),
                payload.vals.len()
            ),
        });
    }
    let directions = payload
        .d
        .iter()
        .map(|d| {
            Direction::parse(d).ok_or_else(|| Error::CursorNotParsed {
                reason: format!("direction {} is not ASC or DESC", d),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Cursor::new(payload.t, payload.k, directions, payload.vals))
}

/// Converts a row value into its string-coerced cursor component.
pub(crate) fn cursor_component(v: &Value) -> Result<String, Error> {
    v.to_cursor_string()
}

impl TryFrom<&str> for Cursor {
    type Error = Error;

    fn try_from(s: &str) -> Result<Cursor, Error> {
        decode_cursor(s)
    }
}
