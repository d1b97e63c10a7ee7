//! Intermediate data structure for serialized values, allowing for translation
//! between the values returned by the MySQL driver, the serde_json format used
//! on the GraphQL wire, and the typed arguments bound into planned SQL.

use crate::Error;
use juniper::{DefaultScalarValue, FromInputValue, InputValue};
use std::collections::HashMap;
use std::convert::TryFrom;

/// Internal value representation for one SQL cell, GraphQL argument, or
/// composite input object.
///
/// # Examples
///
/// ```rust
/// # use tigql::engine::value::Value;
///
/// let v = Value::Bool(true);
/// ```
#[derive(Clone, Debug)]
pub enum Value {
    Array(Vec<Value>),
    Bool(bool),
    Bytes(Vec<u8>),
    Float64(f64),
    Int64(i64),
    Map(HashMap<String, Value>),
    Null,
    String(String),
    UInt64(u64),
}

impl Value {
    /// Coerces the value to the string form used inside cursors, where every
    /// component is carried as text to avoid float64 round-trips.
    pub(crate) fn to_cursor_string(&self) -> Result<String, Error> {
        match self {
            Value::Bool(b) => Ok(b.to_string()),
            Value::Bytes(b) => Ok(base64::encode(b)),
            Value::Float64(f) => Ok(f.to_string()),
            Value::Int64(i) => Ok(i.to_string()),
            Value::Null => Ok(String::new()),
            Value::String(s) => Ok(s.clone()),
            Value::UInt64(u) => Ok(u.to_string()),
            Value::Array(_) | Value::Map(_) => Err(Error::TypeConversionFailed {
                src: format!("{:?}", self),
                dst: "cursor value".to_string(),
            }),
        }
    }
}

impl From<HashMap<String, Value>> for Value {
    fn from(map: HashMap<String, Value>) -> Self {
        Value::Map(map)
    }
}

impl FromInputValue for Value {
    fn from_input_value(v: &InputValue) -> Option<Self> {
        match v {
            InputValue::Null => Some(Value::Null),
            InputValue::Scalar(scalar) => Some(match scalar {
                DefaultScalarValue::Int(i) => Value::Int64(*i as i64),
                DefaultScalarValue::Float(f) => Value::Float64(*f),
                DefaultScalarValue::String(s) => Value::String(s.to_string()),
                DefaultScalarValue::Boolean(b) => Value::Bool(*b),
            }),
            InputValue::List(l) => Some(Value::Array(
                l.iter()
                    .map(|s| Value::from_input_value(&s.item))
                    .collect::<Option<Vec<_>>>()?,
            )),
            InputValue::Object(o) => Some(Value::Map(
                o.iter()
                    .map(|(k, s)| {
                        Value::from_input_value(&s.item).map(|val| (k.item.to_string(), val))
                    })
                    .collect::<Option<HashMap<_, _>>>()?,
            )),
            InputValue::Enum(e) => Some(Value::String(e.to_string())),
            InputValue::Variable(_) => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Array(a), Value::Array(oa)) => a == oa,
            (Value::Bool(b), Value::Bool(ob)) => b == ob,
            (Value::Bytes(b), Value::Bytes(ob)) => b == ob,
            (Value::Float64(f), Value::Float64(of)) => f == of,
            (Value::Int64(i), Value::Int64(oi)) => i == oi,
            (Value::Map(m), Value::Map(om)) => m == om,
            (Value::Null, Value::Null) => true,
            (Value::String(s), Value::String(os)) => s == os,
            (Value::UInt64(i), Value::UInt64(oi)) => i == oi,
            (_, _) => false,
        }
    }
}

impl TryFrom<serde_json::Value> for Value {
    type Error = Error;

    fn try_from(value: serde_json::Value) -> Result<Value, Error> {
        match value {
            serde_json::Value::Array(a) => Ok(Value::Array(
                a.into_iter()
                    .map(Value::try_from)
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            serde_json::Value::Bool(b) => Ok(Value::Bool(b)),
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Int64(i))
                } else if let Some(i) = n.as_u64() {
                    Ok(Value::UInt64(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Value::Float64(f))
                } else {
                    Err(Error::TypeConversionFailed {
                        src: "serde_json::Value::Number".to_string(),
                        dst: "Value".to_string(),
                    })
                }
            }
            serde_json::Value::String(s) => Ok(Value::String(s)),
            serde_json::Value::Object(m) => Ok(Value::Map(
                m.into_iter()
                    .map(|(k, v)| {
                        let val = Value::try_from(v)?;
                        Ok((k, val))
                    })
                    .collect::<Result<HashMap<String, Value>, Error>>()?,
            )),
        }
    }
}

impl TryFrom<Value> for serde_json::Value {
    type Error = Error;

    fn try_from(value: Value) -> Result<serde_json::Value, Error> {
        match value {
            Value::Array(a) => Ok(serde_json::Value::Array(
                a.into_iter()
                    .map(serde_json::Value::try_from)
                    .collect::<Result<Vec<_>, Error>>()?,
            )),
            Value::Bool(b) => Ok(serde_json::Value::Bool(b)),
            Value::Bytes(b) => Ok(serde_json::Value::String(base64::encode(b))),
            Value::Float64(f) => Ok(serde_json::Value::Number(
                serde_json::Number::from_f64(f).ok_or_else(|| Error::TypeConversionFailed {
                    src: "Value::Float64".to_string(),
                    dst: "serde_json::Number".to_string(),
                })?,
            )),
            Value::Int64(i) => Ok(serde_json::Value::Number(i.into())),
            Value::Map(hm) => Ok(serde_json::Value::Object(
                hm.into_iter()
                    .map(|(k, v)| {
                        let val = serde_json::Value::try_from(v)?;
                        Ok((k, val))
                    })
                    .collect::<Result<serde_json::Map<String, serde_json::Value>, Error>>()?,
            )),
            Value::Null => Ok(serde_json::Value::Null),
            Value::String(s) => Ok(serde_json::Value::String(s)),
            Value::UInt64(i) => Ok(serde_json::Value::Number(i.into())),
        }
    }
}

impl TryFrom<Value> for bool {
    type Error = Error;

    fn try_from(value: Value) -> Result<bool, Self::Error> {
        match value {
            Value::Bool(b) => Ok(b),
            // tinyint(1) columns arrive as integers from the driver
            Value::Int64(i) => Ok(i != 0),
            Value::UInt64(i) => Ok(i != 0),
            _ => Err(Error::TypeConversionFailed {
                src: format!("{:#?}", value),
                dst: "bool".to_string(),
            }),
        }
    }
}

impl TryFrom<Value> for f64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<f64, Self::Error> {
        if let Value::Int64(i) = value {
            Ok(i as f64)
        } else if let Value::UInt64(i) = value {
            Ok(i as f64)
        } else if let Value::Float64(f) = value {
            Ok(f)
        } else {
            Err(Error::TypeConversionFailed {
                src: format!("{:#?}", value),
                dst: "f64".to_string(),
            })
        }
    }
}

impl TryFrom<Value> for i64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<i64, Self::Error> {
        match value {
            Value::Int64(i) => Ok(i),
            Value::UInt64(i) => {
                if i <= i64::MAX as u64 {
                    Ok(i as i64)
                } else {
                    Err(Error::TypeConversionFailed {
                        src: format!("{:#?}", value),
                        dst: "i64".to_string(),
                    })
                }
            }
            _ => Err(Error::TypeConversionFailed {
                src: format!("{:#?}", value),
                dst: "i64".to_string(),
            }),
        }
    }
}

impl TryFrom<Value> for i32 {
    type Error = Error;

    fn try_from(value: Value) -> Result<i32, Self::Error> {
        match value {
            Value::Int64(i) => {
                if i >= (i32::MIN as i64) && i <= (i32::MAX as i64) {
                    Ok(i as i32)
                } else {
                    Err(Error::TypeConversionFailed {
                        src: format!("{:#?}", value),
                        dst: "i32".to_string(),
                    })
                }
            }
            Value::UInt64(i) => {
                if i <= (i32::MAX as u64) {
                    Ok(i as i32)
                } else {
                    Err(Error::TypeConversionFailed {
                        src: format!("{:#?}", value),
                        dst: "i32".to_string(),
                    })
                }
            }
            _ => Err(Error::TypeConversionFailed {
                src: format!("{:#?}", value),
                dst: "i32".to_string(),
            }),
        }
    }
}

impl TryFrom<Value> for String {
    type Error = Error;

    fn try_from(value: Value) -> Result<String, Self::Error> {
        if let Value::String(s) = value {
            Ok(s)
        } else {
            Err(Error::TypeConversionFailed {
                src: format!("{:#?}", value),
                dst: "String".to_string(),
            })
        }
    }
}

impl TryFrom<Value> for Vec<u8> {
    type Error = Error;

    fn try_from(value: Value) -> Result<Vec<u8>, Self::Error> {
        if let Value::Bytes(b) = value {
            Ok(b)
        } else {
            Err(Error::TypeConversionFailed {
                src: format!("{:#?}", value),
                dst: "Vec<u8>".to_string(),
            })
        }
    }
}
