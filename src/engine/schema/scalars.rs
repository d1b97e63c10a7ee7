//! Domain scalar codecs: total, round-trip conversions between GraphQL wire
//! values and internal representations. Invalid input always yields a null
//! parse result, never an error thrown up the resolver stack.

use chrono::{DateTime, NaiveDate};
use juniper::parser::ScalarToken;
use juniper::{DefaultScalarValue, InputValue, ParseScalarResult, ParseScalarValue, Value};
use lazy_static::lazy_static;
use regex::Regex;
use std::convert::TryFrom;
use std::fmt::{Display, Formatter};

lazy_static! {
    static ref DECIMAL_RE: Regex =
        Regex::new(r"^[+-]?(\d+(\.\d+)?|\.\d+)([eE][+-]?\d+)?$").unwrap();
}

/// 64-bit integer carried as a decimal string on the wire. Parsing accepts
/// strings and integers within the signed 64-bit range; unsigned values above
/// 2^63-1 are rejected on input but still serialize on output.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BigInt(String);

impl BigInt {
    pub fn from_i64(v: i64) -> BigInt {
        BigInt(v.to_string())
    }

    pub fn from_u64(v: u64) -> BigInt {
        BigInt(v.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.0.parse().ok()
    }

    /// Parses user input with the range checks the wire format promises.
    pub fn parse_str(s: &str) -> Option<BigInt> {
        let trimmed = s.trim();
        trimmed.parse::<i64>().ok().map(BigInt::from_i64)
    }
}

impl Display for BigInt {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[juniper::graphql_scalar(
    name = "BigInt",
    description = "64-bit integer serialized as a decimal string"
)]
impl GraphQLScalar for BigInt {
    fn resolve(&self) -> Value {
        Value::scalar(self.0.clone())
    }

    fn from_input_value(v: &InputValue) -> Option<BigInt> {
        match v {
            InputValue::Scalar(DefaultScalarValue::String(s)) => BigInt::parse_str(s),
            InputValue::Scalar(DefaultScalarValue::Int(i)) => Some(BigInt::from_i64(*i as i64)),
            InputValue::Scalar(DefaultScalarValue::Float(f)) => {
                // reject non-integral and out-of-range floats
                if f.fract() == 0.0 && *f >= -(2f64.powi(63)) && *f < 2f64.powi(63) {
                    Some(BigInt::from_i64(*f as i64))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn from_str<'a>(value: ScalarToken<'a>) -> ParseScalarResult<'a, DefaultScalarValue> {
        <String as ParseScalarValue>::from_str(value)
    }
}

/// Fixed-point decimal carried as a string. Syntax is validated against the
/// decimal grammar; NaN and infinities are rejected.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Decimal(String);

impl Decimal {
    pub fn parse_str(s: &str) -> Option<Decimal> {
        let trimmed = s.trim();
        if DECIMAL_RE.is_match(trimmed) {
            Some(Decimal(trimmed.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[juniper::graphql_scalar(name = "Decimal", description = "Fixed-point decimal string")]
impl GraphQLScalar for Decimal {
    fn resolve(&self) -> Value {
        Value::scalar(self.0.clone())
    }

    fn from_input_value(v: &InputValue) -> Option<Decimal> {
        match v {
            InputValue::Scalar(DefaultScalarValue::String(s)) => Decimal::parse_str(s),
            InputValue::Scalar(DefaultScalarValue::Int(i)) => Some(Decimal(i.to_string())),
            InputValue::Scalar(DefaultScalarValue::Float(f)) => {
                if f.is_finite() {
                    Some(Decimal(f.to_string()))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn from_str<'a>(value: ScalarToken<'a>) -> ParseScalarResult<'a, DefaultScalarValue> {
        <String as ParseScalarValue>::from_str(value)
    }
}

/// Calendar date in `YYYY-MM-DD`. RFC3339 timestamps are accepted and
/// truncated to their UTC date.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Date(NaiveDate);

impl Date {
    pub fn new(date: NaiveDate) -> Date {
        Date(date)
    }

    pub fn parse_str(s: &str) -> Option<Date> {
        let trimmed = s.trim();
        if let Ok(d) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
            return Some(Date(d));
        }
        DateTime::parse_from_rfc3339(trimmed)
            .ok()
            .map(|dt| Date(dt.naive_utc().date()))
    }

    pub fn to_wire(&self) -> String {
        self.0.format("%Y-%m-%d").to_string()
    }
}

#[juniper::graphql_scalar(name = "Date", description = "Calendar date as YYYY-MM-DD")]
impl GraphQLScalar for Date {
    fn resolve(&self) -> Value {
        Value::scalar(self.to_wire())
    }

    fn from_input_value(v: &InputValue) -> Option<Date> {
        match v {
            InputValue::Scalar(DefaultScalarValue::String(s)) => Date::parse_str(s),
            _ => None,
        }
    }

    fn from_str<'a>(value: ScalarToken<'a>) -> ParseScalarResult<'a, DefaultScalarValue> {
        <String as ParseScalarValue>::from_str(value)
    }
}

/// TiDB TIME value: a signed duration within
/// `-838:59:59.000000 … 838:59:59.000000`, normalized to
/// `HH:MM:SS[.fraction]`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Time {
    negative: bool,
    hours: u32,
    minutes: u8,
    seconds: u8,
    micros: u32,
}

impl Time {
    pub fn parse_str(s: &str) -> Option<Time> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return None;
        }
        let (negative, body) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let (clock, frac) = match body.split_once('.') {
            Some((c, f)) => (c, Some(f)),
            None => (body, None),
        };
        let micros = match frac {
            None => 0,
            Some(f) => {
                if f.is_empty() || f.len() > 6 || !f.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                let padded = format!("{:0<6}", f);
                padded.parse::<u32>().ok()?
            }
        };

        let (hours, minutes, seconds) = if clock.contains(':') {
            let parts: Vec<&str> = clock.split(':').collect();
            match parts.as_slice() {
                [h, m, s] => (
                    h.parse::<u32>().ok()?,
                    m.parse::<u8>().ok()?,
                    s.parse::<u8>().ok()?,
                ),
                [h, m] => (h.parse::<u32>().ok()?, m.parse::<u8>().ok()?, 0),
                _ => return None,
            }
        } else {
            // no-colon form: digits interpreted as [H]HMMSS, right aligned
            if clock.is_empty() || clock.len() > 7 || !clock.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let n: u64 = clock.parse().ok()?;
            (
                (n / 10_000) as u32,
                ((n / 100) % 100) as u8,
                (n % 100) as u8,
            )
        };

        if minutes > 59 || seconds > 59 {
            return None;
        }
        if hours > 838 {
            return None;
        }
        if hours == 838 && minutes == 59 && seconds == 59 && micros > 0 {
            return None;
        }

        Some(Time {
            negative: negative && !(hours == 0 && minutes == 0 && seconds == 0 && micros == 0),
            hours,
            minutes,
            seconds,
            micros,
        })
    }

    pub fn to_wire(&self) -> String {
        let sign = if self.negative { "-" } else { "" };
        if self.micros == 0 {
            format!(
                "{}{:02}:{:02}:{:02}",
                sign, self.hours, self.minutes, self.seconds
            )
        } else {
            format!(
                "{}{:02}:{:02}:{:02}.{:06}",
                sign, self.hours, self.minutes, self.seconds, self.micros
            )
        }
    }
}

#[juniper::graphql_scalar(
    name = "Time",
    description = "TIME value normalized to HH:MM:SS[.fraction]"
)]
impl GraphQLScalar for Time {
    fn resolve(&self) -> Value {
        Value::scalar(self.to_wire())
    }

    fn from_input_value(v: &InputValue) -> Option<Time> {
        match v {
            InputValue::Scalar(DefaultScalarValue::String(s)) => Time::parse_str(s),
            InputValue::Scalar(DefaultScalarValue::Int(i)) => Time::parse_str(&i.to_string()),
            _ => None,
        }
    }

    fn from_str<'a>(value: ScalarToken<'a>) -> ParseScalarResult<'a, DefaultScalarValue> {
        <String as ParseScalarValue>::from_str(value)
    }
}

/// YEAR column value, `0000` through `2155`, zero-padded on the wire.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Year(u16);

impl Year {
    pub fn parse_str(s: &str) -> Option<Year> {
        let trimmed = s.trim();
        if trimmed.starts_with('-') || trimmed.starts_with('+') {
            return None;
        }
        let n: u16 = trimmed.parse().ok()?;
        Year::from_int(n as i64)
    }

    pub fn from_int(n: i64) -> Option<Year> {
        if (0..=2155).contains(&n) {
            Some(Year(n as u16))
        } else {
            None
        }
    }

    pub fn to_wire(&self) -> String {
        format!("{:04}", self.0)
    }
}

#[juniper::graphql_scalar(name = "Year", description = "YEAR value, 0000-2155")]
impl GraphQLScalar for Year {
    fn resolve(&self) -> Value {
        Value::scalar(self.to_wire())
    }

    fn from_input_value(v: &InputValue) -> Option<Year> {
        match v {
            InputValue::Scalar(DefaultScalarValue::String(s)) => Year::parse_str(s),
            InputValue::Scalar(DefaultScalarValue::Int(i)) => Year::from_int(*i as i64),
            _ => None,
        }
    }

    fn from_str<'a>(value: ScalarToken<'a>) -> ParseScalarResult<'a, DefaultScalarValue> {
        <String as ParseScalarValue>::from_str(value)
    }
}

/// Binary column value carried as standard base64 with padding (RFC 4648).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Bytes(Vec<u8>);

impl Bytes {
    pub fn new(data: Vec<u8>) -> Bytes {
        Bytes(data)
    }

    pub fn parse_str(s: &str) -> Option<Bytes> {
        base64::decode(s).ok().map(Bytes)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn to_wire(&self) -> String {
        base64::encode(&self.0)
    }
}

#[juniper::graphql_scalar(name = "Bytes", description = "Binary data as standard base64")]
impl GraphQLScalar for Bytes {
    fn resolve(&self) -> Value {
        Value::scalar(self.to_wire())
    }

    fn from_input_value(v: &InputValue) -> Option<Bytes> {
        match v {
            InputValue::Scalar(DefaultScalarValue::String(s)) => Bytes::parse_str(s),
            _ => None,
        }
    }

    fn from_str<'a>(value: ScalarToken<'a>) -> ParseScalarResult<'a, DefaultScalarValue> {
        <String as ParseScalarValue>::from_str(value)
    }
}

/// Canonical lower-case UUID. Accepts 36-character text or 16 raw bytes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Uuid(uuid::Uuid);

impl Uuid {
    pub fn parse_str(s: &str) -> Option<Uuid> {
        let trimmed = s.trim();
        if trimmed.len() != 36 {
            return None;
        }
        uuid::Uuid::parse_str(trimmed).ok().map(Uuid)
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Uuid> {
        <[u8; 16]>::try_from(bytes).ok().map(|b| Uuid(uuid::Uuid::from_bytes(b)))
    }

    pub fn to_wire(&self) -> String {
        self.0.hyphenated().to_string()
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

#[juniper::graphql_scalar(name = "UUID", description = "Canonical lower-case UUID")]
impl GraphQLScalar for Uuid {
    fn resolve(&self) -> Value {
        Value::scalar(self.to_wire())
    }

    fn from_input_value(v: &InputValue) -> Option<Uuid> {
        match v {
            InputValue::Scalar(DefaultScalarValue::String(s)) => Uuid::parse_str(s),
            _ => None,
        }
    }

    fn from_str<'a>(value: ScalarToken<'a>) -> ParseScalarResult<'a, DefaultScalarValue> {
        <String as ParseScalarValue>::from_str(value)
    }
}

/// Vector column value: a JSON array of finite 64-bit floats.
#[derive(Clone, Debug, PartialEq)]
pub struct Vector(Vec<f64>);

impl Vector {
    pub fn new(values: Vec<f64>) -> Option<Vector> {
        if values.iter().all(|f| f.is_finite()) {
            Some(Vector(values))
        } else {
            None
        }
    }

    pub fn parse_str(s: &str) -> Option<Vector> {
        let values: Vec<f64> = serde_json::from_str(s.trim()).ok()?;
        Vector::new(values)
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }
}

#[juniper::graphql_scalar(name = "Vector", description = "Array of finite 64-bit floats")]
impl GraphQLScalar for Vector {
    fn resolve(&self) -> Value {
        Value::list(self.0.iter().map(|f| Value::scalar(*f)).collect())
    }

    fn from_input_value(v: &InputValue) -> Option<Vector> {
        match v {
            InputValue::List(items) => {
                let floats = items
                    .iter()
                    .map(|s| match &s.item {
                        InputValue::Scalar(DefaultScalarValue::Float(f)) => Some(*f),
                        InputValue::Scalar(DefaultScalarValue::Int(i)) => Some(*i as f64),
                        _ => None,
                    })
                    .collect::<Option<Vec<f64>>>()?;
                Vector::new(floats)
            }
            InputValue::Scalar(DefaultScalarValue::String(s)) => Vector::parse_str(s),
            _ => None,
        }
    }

    fn from_str<'a>(value: ScalarToken<'a>) -> ParseScalarResult<'a, DefaultScalarValue> {
        <String as ParseScalarValue>::from_str(value)
    }
}

/// Opaque JSON document.
#[derive(Clone, Debug, PartialEq)]
pub struct Json(serde_json::Value);

impl Json {
    pub fn new(value: serde_json::Value) -> Json {
        Json(value)
    }

    pub fn parse_str(s: &str) -> Option<Json> {
        serde_json::from_str(s).ok().map(Json)
    }

    pub fn inner(&self) -> &serde_json::Value {
        &self.0
    }
}

fn json_to_gql(v: &serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::null(),
        serde_json::Value::Bool(b) => Value::scalar(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                if i >= i32::MIN as i64 && i <= i32::MAX as i64 {
                    Value::scalar(i as i32)
                } else {
                    Value::scalar(i.to_string())
                }
            } else if let Some(f) = n.as_f64() {
                Value::scalar(f)
            } else {
                Value::scalar(n.to_string())
            }
        }
        serde_json::Value::String(s) => Value::scalar(s.clone()),
        serde_json::Value::Array(a) => Value::list(a.iter().map(json_to_gql).collect()),
        serde_json::Value::Object(o) => {
            let mut obj = juniper::Object::with_capacity(o.len());
            for (k, val) in o {
                obj.add_field(k.clone(), json_to_gql(val));
            }
            Value::Object(obj)
        }
    }
}

fn gql_input_to_json(v: &InputValue) -> Option<serde_json::Value> {
    match v {
        InputValue::Null => Some(serde_json::Value::Null),
        InputValue::Scalar(DefaultScalarValue::Int(i)) => Some(serde_json::json!(i)),
        InputValue::Scalar(DefaultScalarValue::Float(f)) => Some(serde_json::json!(f)),
        InputValue::Scalar(DefaultScalarValue::String(s)) => Some(serde_json::json!(s)),
        InputValue::Scalar(DefaultScalarValue::Boolean(b)) => Some(serde_json::json!(b)),
        InputValue::Enum(e) => Some(serde_json::json!(e)),
        InputValue::List(items) => Some(serde_json::Value::Array(
            items
                .iter()
                .map(|s| gql_input_to_json(&s.item))
                .collect::<Option<Vec<_>>>()?,
        )),
        InputValue::Object(fields) => {
            let mut map = serde_json::Map::new();
            for (k, val) in fields {
                map.insert(k.item.clone(), gql_input_to_json(&val.item)?);
            }
            Some(serde_json::Value::Object(map))
        }
        InputValue::Variable(_) => None,
    }
}

#[juniper::graphql_scalar(name = "JSON", description = "Opaque JSON value")]
impl GraphQLScalar for Json {
    fn resolve(&self) -> Value {
        json_to_gql(&self.0)
    }

    fn from_input_value(v: &InputValue) -> Option<Json> {
        gql_input_to_json(v).map(Json)
    }

    fn from_str<'a>(value: ScalarToken<'a>) -> ParseScalarResult<'a, DefaultScalarValue> {
        <String as ParseScalarValue>::from_str(value)
    }
}

/// 32-bit integer constrained to be zero or greater.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NonNegativeInt(i32);

impl NonNegativeInt {
    pub fn new(v: i32) -> Option<NonNegativeInt> {
        if v >= 0 {
            Some(NonNegativeInt(v))
        } else {
            None
        }
    }

    pub fn get(&self) -> i32 {
        self.0
    }
}

#[juniper::graphql_scalar(name = "NonNegativeInt", description = "Integer >= 0")]
impl GraphQLScalar for NonNegativeInt {
    fn resolve(&self) -> Value {
        Value::scalar(self.0)
    }

    fn from_input_value(v: &InputValue) -> Option<NonNegativeInt> {
        match v {
            InputValue::Scalar(DefaultScalarValue::Int(i)) => NonNegativeInt::new(*i),
            _ => None,
        }
    }

    fn from_str<'a>(value: ScalarToken<'a>) -> ParseScalarResult<'a, DefaultScalarValue> {
        <i32 as ParseScalarValue>::from_str(value)
    }
}

#[cfg(test)]
mod tests {
    use super::{BigInt, Bytes, Date, Decimal, Json, Time, Uuid, Vector, Year};

    /// Passes if BigInt accepts the int64 boundary and rejects beyond it
    #[test]
    fn bigint_bounds() {
        assert_eq!(
            "9223372036854775807",
            BigInt::parse_str("9223372036854775807").unwrap().as_str()
        );
        assert!(BigInt::parse_str("9223372036854775808").is_none());
        assert_eq!(
            "-9223372036854775808",
            BigInt::parse_str("-9223372036854775808").unwrap().as_str()
        );
        assert!(BigInt::parse_str("12.5").is_none());
    }

    /// Passes if unsigned outputs above int64 still serialize
    #[test]
    fn bigint_unsigned_output() {
        assert_eq!("18446744073709551615", BigInt::from_u64(u64::MAX).as_str());
    }

    /// Passes if decimal syntax is enforced
    #[test]
    fn decimal_syntax() {
        assert!(Decimal::parse_str("123.45").is_some());
        assert!(Decimal::parse_str("-0.5").is_some());
        assert!(Decimal::parse_str(".5").is_some());
        assert!(Decimal::parse_str("1e10").is_some());
        assert!(Decimal::parse_str("NaN").is_none());
        assert!(Decimal::parse_str("Infinity").is_none());
        assert!(Decimal::parse_str("1.2.3").is_none());
    }

    /// Passes if dates parse plainly and truncate RFC3339 to the UTC date
    #[test]
    fn date_forms() {
        assert_eq!(
            "2024-01-15",
            Date::parse_str("2024-01-15").unwrap().to_wire()
        );
        assert_eq!(
            "2024-01-16",
            Date::parse_str("2024-01-15T23:30:00-05:00").unwrap().to_wire()
        );
        assert!(Date::parse_str("01/15/2024").is_none());
    }

    /// Passes if the TIME boundaries hold: both extremes accepted, one second
    /// past rejected
    #[test]
    fn time_bounds() {
        assert_eq!("00:00:00", Time::parse_str("00:00:00").unwrap().to_wire());
        assert_eq!(
            "838:59:59",
            Time::parse_str("838:59:59.000000").unwrap().to_wire()
        );
        assert_eq!(
            "-838:59:59",
            Time::parse_str("-838:59:59.000000").unwrap().to_wire()
        );
        assert!(Time::parse_str("839:00:00").is_none());
        assert!(Time::parse_str("838:59:59.000001").is_none());
        assert!(Time::parse_str("00:60:00").is_none());
    }

    /// Passes if no-colon TIME forms normalize
    #[test]
    fn time_no_colon() {
        assert_eq!("00:12:34", Time::parse_str("1234").unwrap().to_wire());
        assert_eq!("01:02:03", Time::parse_str("10203").unwrap().to_wire());
        assert_eq!(
            "11:22:33.500000",
            Time::parse_str("112233.5").unwrap().to_wire()
        );
    }

    /// Passes if time parsing round-trips through its normalized form
    #[test]
    fn time_round_trip() {
        for s in ["00:00:00", "838:59:59", "-01:02:03", "12:34:56.789000"] {
            let t = Time::parse_str(s).unwrap();
            assert_eq!(t, Time::parse_str(&t.to_wire()).unwrap());
        }
    }

    /// Passes if years hold their boundaries
    #[test]
    fn year_bounds() {
        assert_eq!("0000", Year::parse_str("0000").unwrap().to_wire());
        assert_eq!("2155", Year::parse_str("2155").unwrap().to_wire());
        assert!(Year::parse_str("-1").is_none());
        assert!(Year::parse_str("2156").is_none());
        assert!(Year::from_int(-1).is_none());
    }

    /// Passes if bytes round-trip through standard base64
    #[test]
    fn bytes_round_trip() {
        let b = Bytes::new(vec![0, 1, 2, 254, 255]);
        assert_eq!(b, Bytes::parse_str(&b.to_wire()).unwrap());
        assert!(Bytes::parse_str("not base64!!").is_none());
    }

    /// Passes if UUIDs parse from text and raw bytes to the same canonical
    /// form
    #[test]
    fn uuid_forms() {
        let u = Uuid::parse_str("67E55044-10B1-426F-9247-BB680E5FE0C8").unwrap();
        assert_eq!("67e55044-10b1-426f-9247-bb680e5fe0c8", u.to_wire());

        let from_bytes = Uuid::from_bytes(u.as_bytes()).unwrap();
        assert_eq!(u, from_bytes);

        assert!(Uuid::parse_str("67e55044").is_none());
        assert!(Uuid::from_bytes(&[1, 2, 3]).is_none());
    }

    /// Passes if vectors reject NaN and infinities
    #[test]
    fn vector_finite_only() {
        assert!(Vector::new(vec![1.0, -2.5]).is_some());
        assert!(Vector::new(vec![f64::NAN]).is_none());
        assert!(Vector::new(vec![f64::INFINITY]).is_none());
        assert_eq!(
            vec![1.0, 2.0],
            Vector::parse_str("[1, 2]").unwrap().values().to_vec()
        );
    }

    /// Passes if JSON text parses opaquely
    #[test]
    fn json_opaque() {
        let j = Json::parse_str(r#"{"a": [1, 2, {"b": null}]}"#).unwrap();
        assert!(j.inner().is_object());
        assert!(Json::parse_str("{invalid").is_none());
    }
}
