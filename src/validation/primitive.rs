//! FHIR primitive datatypes and their JSON lexical checks.

use chrono::{DateTime, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// The FHIR primitive datatypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveKind {
    Boolean,
    Integer,
    Integer64,
    String,
    Decimal,
    Uri,
    Url,
    Canonical,
    Base64Binary,
    Instant,
    Date,
    DateTime,
    Time,
    Code,
    Oid,
    Id,
    Markdown,
    UnsignedInt,
    PositiveInt,
    Uuid,
    Xhtml,
}

static DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9]{4}(-(0[1-9]|1[0-2])(-(0[1-9]|[12][0-9]|3[01]))?)?$")
        .expect("valid date regex")
});

static DATE_TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[0-9]{4}(-(0[1-9]|1[0-2])(-(0[1-9]|[12][0-9]|3[01])(T([01][0-9]|2[0-3]):[0-5][0-9]:([0-5][0-9]|60)(\.[0-9]{1,9})?(Z|[+-]((0[0-9]|1[0-3]):[0-5][0-9]|14:00)))?)?)?$",
    )
    .expect("valid dateTime regex")
});

static TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([01][0-9]|2[0-3]):[0-5][0-9]:([0-5][0-9]|60)(\.[0-9]{1,9})?$")
        .expect("valid time regex")
});

static CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s]+( [^\s]+)*$").expect("valid code regex"));

static ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9\-\.]{1,64}$").expect("valid id regex"));

static OID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^urn:oid:[0-2](\.(0|[1-9][0-9]*))+$").expect("valid oid regex")
});

static UUID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^urn:uuid:[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$")
        .expect("valid uuid regex")
});

static BASE64: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\s*([0-9a-zA-Z+/=]){4}\s*)+$").expect("valid base64 regex")
});

impl PrimitiveKind {
    pub const ALL: [PrimitiveKind; 21] = [
        PrimitiveKind::Boolean,
        PrimitiveKind::Integer,
        PrimitiveKind::Integer64,
        PrimitiveKind::String,
        PrimitiveKind::Decimal,
        PrimitiveKind::Uri,
        PrimitiveKind::Url,
        PrimitiveKind::Canonical,
        PrimitiveKind::Base64Binary,
        PrimitiveKind::Instant,
        PrimitiveKind::Date,
        PrimitiveKind::DateTime,
        PrimitiveKind::Time,
        PrimitiveKind::Code,
        PrimitiveKind::Oid,
        PrimitiveKind::Id,
        PrimitiveKind::Markdown,
        PrimitiveKind::UnsignedInt,
        PrimitiveKind::PositiveInt,
        PrimitiveKind::Uuid,
        PrimitiveKind::Xhtml,
    ];

    pub fn parse(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == code)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PrimitiveKind::Boolean => "boolean",
            PrimitiveKind::Integer => "integer",
            PrimitiveKind::Integer64 => "integer64",
            PrimitiveKind::String => "string",
            PrimitiveKind::Decimal => "decimal",
            PrimitiveKind::Uri => "uri",
            PrimitiveKind::Url => "url",
            PrimitiveKind::Canonical => "canonical",
            PrimitiveKind::Base64Binary => "base64Binary",
            PrimitiveKind::Instant => "instant",
            PrimitiveKind::Date => "date",
            PrimitiveKind::DateTime => "dateTime",
            PrimitiveKind::Time => "time",
            PrimitiveKind::Code => "code",
            PrimitiveKind::Oid => "oid",
            PrimitiveKind::Id => "id",
            PrimitiveKind::Markdown => "markdown",
            PrimitiveKind::UnsignedInt => "unsignedInt",
            PrimitiveKind::PositiveInt => "positiveInt",
            PrimitiveKind::Uuid => "uuid",
            PrimitiveKind::Xhtml => "xhtml",
        }
    }

    /// Check a JSON value against the lexical rules of this primitive.
    ///
    /// Returns a human readable reason on failure.
    pub fn check(self, value: &JsonValue) -> Result<(), String> {
        match self {
            PrimitiveKind::Boolean => ensure(value.is_boolean(), || "expected a boolean".into()),
            PrimitiveKind::Integer => {
                let ok = value
                    .as_i64()
                    .is_some_and(|i| i32::try_from(i).is_ok());
                ensure(ok, || "expected a 32-bit integer".into())
            }
            PrimitiveKind::UnsignedInt => {
                let ok = value
                    .as_i64()
                    .is_some_and(|i| (0..=i64::from(i32::MAX)).contains(&i));
                ensure(ok, || "expected an unsigned integer".into())
            }
            PrimitiveKind::PositiveInt => {
                let ok = value
                    .as_i64()
                    .is_some_and(|i| (1..=i64::from(i32::MAX)).contains(&i));
                ensure(ok, || "expected a positive integer".into())
            }
            PrimitiveKind::Integer64 => {
                let s = string(value, self)?;
                ensure(s.parse::<i64>().is_ok(), || {
                    format!("'{s}' is not a valid integer64")
                })
            }
            PrimitiveKind::Decimal => ensure(value.is_number(), || "expected a number".into()),
            PrimitiveKind::String | PrimitiveKind::Markdown => {
                let s = string(value, self)?;
                ensure(!s.trim().is_empty(), || "string values must not be blank".into())
            }
            PrimitiveKind::Uri | PrimitiveKind::Canonical => {
                let s = string(value, self)?;
                ensure(!s.is_empty() && !s.chars().any(char::is_whitespace), || {
                    format!("'{s}' is not a valid {}", self.as_str())
                })
            }
            PrimitiveKind::Url => {
                let s = string(value, self)?;
                ensure(url::Url::parse(s).is_ok(), || format!("'{s}' is not a valid url"))
            }
            PrimitiveKind::Base64Binary => matches(value, self, &BASE64),
            PrimitiveKind::Code => matches(value, self, &CODE),
            PrimitiveKind::Id => matches(value, self, &ID),
            PrimitiveKind::Oid => matches(value, self, &OID),
            PrimitiveKind::Uuid => matches(value, self, &UUID),
            PrimitiveKind::Time => matches(value, self, &TIME),
            PrimitiveKind::Date => {
                matches(value, self, &DATE)?;
                check_calendar_date(string(value, self)?)
            }
            PrimitiveKind::DateTime => {
                matches(value, self, &DATE_TIME)?;
                let s = string(value, self)?;
                if s.contains('T') {
                    ensure(DateTime::parse_from_rfc3339(s).is_ok(), || {
                        format!("'{s}' is not a valid dateTime")
                    })
                } else {
                    check_calendar_date(s)
                }
            }
            PrimitiveKind::Instant => {
                let s = string(value, self)?;
                ensure(DateTime::parse_from_rfc3339(s).is_ok(), || {
                    format!("'{s}' is not a valid instant")
                })
            }
            PrimitiveKind::Xhtml => {
                let s = string(value, self)?;
                ensure(s.trim_start().starts_with("<div"), || {
                    "xhtml content must be a <div> element".into()
                })
            }
        }
    }
}

impl std::fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a type code names a FHIR primitive
pub fn is_primitive_type(code: &str) -> bool {
    PrimitiveKind::parse(code).is_some()
}

/// JSON kind name used in messages
pub fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

fn ensure(ok: bool, reason: impl FnOnce() -> String) -> Result<(), String> {
    if ok { Ok(()) } else { Err(reason()) }
}

fn string(value: &JsonValue, kind: PrimitiveKind) -> Result<&str, String> {
    value
        .as_str()
        .ok_or_else(|| format!("expected a string for {kind}, got {}", json_type_name(value)))
}

fn matches(value: &JsonValue, kind: PrimitiveKind, pattern: &Regex) -> Result<(), String> {
    let s = string(value, kind)?;
    ensure(pattern.is_match(s), || format!("'{s}' is not a valid {kind}"))
}

/// Full dates must exist in the calendar (`2023-02-30` is rejected).
fn check_calendar_date(s: &str) -> Result<(), String> {
    let date = s.split('T').next().unwrap_or(s);
    if date.len() != 10 {
        return Ok(());
    }
    ensure(NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok(), || {
        format!("'{date}' is not a calendar date")
    })
}
