//! Request payload validation.
//!
//! A [`Ruleset`] is checked against a [`Payload`] in two passes: every
//! missing required field is reported first, then each present field runs
//! its rules in order, stopping at its first failure.

use std::sync::LazyLock;

use axum::Json;
use axum::extract::{FromRequest, Request};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use validator::{ValidationError, ValidationErrors};

use crate::error::ServerError;

static DIGITS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{10,15}$").expect("valid phone pattern"));
static GROUPED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{2}\s\d{3}\s\d{4}$").expect("valid phone pattern")
});
static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\S+@\S+\.\S+$").expect("valid email pattern"));

/// Accepted phone number shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhoneFormat {
    /// 10 to 15 digits, nothing else.
    Digits,
    /// `DD DDD DDDD`.
    Grouped,
}

impl PhoneFormat {
    pub fn matches(self, value: &str) -> bool {
        match self {
            PhoneFormat::Digits => DIGITS.is_match(value),
            PhoneFormat::Grouped => GROUPED.is_match(value),
        }
    }

    fn message(self, field: &str) -> String {
        match self {
            PhoneFormat::Digits => format!("{field} must be 10-15 digits"),
            PhoneFormat::Grouped => {
                format!("{field} must match the format 00 000 0000")
            },
        }
    }
}

/// Closed set of values accepted for a field.
///
/// Parsing ignores ASCII case and accepts legacy spellings listed as
/// aliases.
pub trait Vocabulary: Sized + Copy + 'static {
    const VARIANTS: &'static [Self];

    /// Canonical spelling.
    fn label(self) -> &'static str;

    /// Other spellings mapped onto this value.
    fn aliases(self) -> &'static [&'static str];

    fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::VARIANTS.iter().copied().find(|variant| {
            variant.label().eq_ignore_ascii_case(value)
                || variant
                    .aliases()
                    .iter()
                    .any(|alias| alias.eq_ignore_ascii_case(value))
        })
    }

    fn labels() -> Vec<&'static str> {
        Self::VARIANTS.iter().map(|variant| variant.label()).collect()
    }
}

/// Declare a [`Vocabulary`] enum serialized with its canonical labels.
macro_rules! vocabulary {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident => $label:literal $([$($alias:literal),* $(,)?])?
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($(#[$variant_meta])* $variant),+
        }

        impl $crate::validation::Vocabulary for $name {
            const VARIANTS: &'static [Self] = &[$(Self::$variant),+];

            fn label(self) -> &'static str {
                match self {
                    $(Self::$variant => $label),+
                }
            }

            fn aliases(self) -> &'static [&'static str] {
                match self {
                    $(Self::$variant => &[$($($alias),*)?]),+
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str($crate::validation::Vocabulary::label(*self))
            }
        }

        impl ::serde::Serialize for $name {
            fn serialize<S: ::serde::Serializer>(
                &self,
                serializer: S,
            ) -> ::std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str($crate::validation::Vocabulary::label(*self))
            }
        }

        impl<'de> ::serde::Deserialize<'de> for $name {
            fn deserialize<D: ::serde::Deserializer<'de>>(
                deserializer: D,
            ) -> ::std::result::Result<Self, D::Error> {
                let value = <String as ::serde::Deserialize>::deserialize(deserializer)?;
                <Self as $crate::validation::Vocabulary>::parse(&value).ok_or_else(|| {
                    ::serde::de::Error::custom(format!("unknown variant `{value}`"))
                })
            }
        }
    };
}

pub(crate) use vocabulary;

/// Loosely typed request body.
///
/// JSON bodies and multipart text fields both end up here. Text values
/// are trimmed; numbers and booleans are read through their textual form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload(Map<String, Value>);

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field, turning repeated keys into a list.
    pub fn append(&mut self, key: &str, value: String) {
        match self.0.get_mut(key) {
            Some(Value::Array(items)) => items.push(Value::String(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value)]);
            },
            None => {
                self.0.insert(key.to_owned(), Value::String(value));
            },
        }
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_owned(), value.into());
    }

    /// Whether `key` was sent at all, even empty.
    pub fn contains(&self, key: &str) -> bool {
        self.0.get(key).is_some_and(|value| !value.is_null())
    }

    /// Trimmed, non-empty textual value of `key`.
    pub fn text(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(value) => {
                let value = value.trim();
                (!value.is_empty()).then(|| value.to_owned())
            },
            Value::Number(number) => Some(number.to_string()),
            Value::Bool(flag) => Some(flag.to_string()),
            _ => None,
        }
    }

    /// Textual value of a field the ruleset already required.
    pub fn require(&self, key: &'static str) -> Result<String, ServerError> {
        self.text(key)
            .ok_or_else(|| ServerError::field(key, "required", format!("{key} is required")))
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.text(key)?
            .parse::<f64>()
            .ok()
            .filter(|number| number.is_finite())
    }

    /// Whole part of a numeric field, `None` when it does not fit in an
    /// `i32`.
    pub fn integer(&self, key: &str) -> Option<i32> {
        let number = self.number(key)?.trunc();
        (f64::from(i32::MIN)..=f64::from(i32::MAX))
            .contains(&number)
            .then_some(number as i32)
    }

    /// List of strings, given either as a JSON array or as a text field
    /// holding one. `None` when the value is malformed.
    pub fn list(&self, key: &str) -> Option<Vec<String>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Some(Vec::new()),
            Some(Value::Array(items)) => strings(items),
            Some(Value::String(text)) => {
                let text = text.trim();
                if text.is_empty() {
                    Some(Vec::new())
                } else if text.starts_with('[') {
                    let items: Vec<Value> = serde_json::from_str(text).ok()?;
                    strings(&items)
                } else {
                    Some(vec![text.to_owned()])
                }
            },
            Some(_) => None,
        }
    }

    /// Whether `key` holds a usable value.
    pub fn is_present(&self, key: &str) -> bool {
        match self.0.get(key) {
            Some(Value::Array(items)) => !items.is_empty(),
            Some(Value::String(text)) if text.trim_start().starts_with('[') => {
                self.list(key).is_some_and(|items| !items.is_empty())
            },
            Some(_) => self.text(key).is_some(),
            None => false,
        }
    }

    /// Parse a field holding a [`Vocabulary`] value.
    pub fn vocabulary<T: Vocabulary>(&self, key: &str) -> Option<T> {
        T::parse(&self.text(key)?)
    }
}

fn strings(items: &[Value]) -> Option<Vec<String>> {
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(text) if text.trim().is_empty() => None,
            Value::String(text) => Some(Some(text.trim().to_owned())),
            Value::Number(number) => Some(Some(number.to_string())),
            _ => Some(None),
        })
        .collect()
}

impl From<Map<String, Value>> for Payload {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl<S> FromRequest<S> for Payload
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(map) = Json::<Map<String, Value>>::from_request(req, state).await?;
        Ok(Self(map))
    }
}

/// A single check applied to a field.
pub enum Rule {
    /// Present and non-empty after trimming.
    Required,
    /// Number greater than or equal to the bound.
    Min(f64),
    /// Number whose whole part fits in an `i32`.
    Integer,
    /// At least this many characters.
    MinLength(usize),
    Email,
    Phone(PhoneFormat),
    /// 24 hexadecimal characters.
    ObjectId,
    /// Member of a closed set.
    OneOf {
        accepts: fn(&str) -> bool,
        allowed: fn() -> Vec<&'static str>,
    },
    /// List of strings.
    List,
    /// `YYYY-MM-DD` or RFC 3339 date.
    Date,
    /// `HH:MM` or `HH:MM:SS`.
    Time,
    /// Date combined with the time held by `time_field`, in UTC, no
    /// earlier than `not_before`.
    Schedule {
        time_field: &'static str,
        not_before: DateTime<Utc>,
    },
}

fn accepts<T: Vocabulary>(value: &str) -> bool {
    T::parse(value).is_some()
}

impl Rule {
    pub fn one_of<T: Vocabulary>() -> Self {
        Rule::OneOf {
            accepts: accepts::<T>,
            allowed: <T as Vocabulary>::labels,
        }
    }

    fn check(&self, field: &str, payload: &Payload) -> Result<(), ValidationError> {
        let text = payload.text(field).unwrap_or_default();

        match self {
            Rule::Required => Ok(()),
            Rule::Min(min) => match payload.number(field) {
                Some(number) if number >= *min => Ok(()),
                _ => Err(issue(
                    "range",
                    format!("{field} must be a number greater than or equal to {min}"),
                )),
            },
            Rule::Integer if payload.integer(field).is_none() => Err(issue(
                "range",
                format!("{field} must be a whole number no greater than {}", i32::MAX),
            )),
            Rule::MinLength(min) if text.chars().count() < *min => Err(issue(
                "length",
                format!("{field} must contain at least {min} characters"),
            )),
            Rule::Email if !EMAIL.is_match(&text) => Err(issue(
                "email",
                format!("{field} must be a valid email address"),
            )),
            Rule::Phone(format) if !format.matches(&text) => {
                Err(issue("phone", format.message(field)))
            },
            Rule::ObjectId if !crate::id::is_object_id(&text) => Err(issue(
                "object_id",
                format!("{field} must be a valid identifier"),
            )),
            Rule::OneOf { accepts, allowed } if !accepts(&text) => Err(issue(
                "enum",
                format!(
                    "'{text}' is not a valid {field}; expected one of: {}",
                    allowed().join(", ")
                ),
            )),
            Rule::List if payload.list(field).is_none() => Err(issue(
                "list",
                format!("{field} must be a list of strings"),
            )),
            Rule::Date if parse_date(&text).is_none() => {
                Err(issue("date", "Invalid date format".to_owned()))
            },
            Rule::Time if parse_time(&text).is_none() => {
                Err(issue("time", "Invalid time format".to_owned()))
            },
            Rule::Schedule {
                time_field,
                not_before,
            } => {
                let time = payload.text(time_field).unwrap_or_default();
                match combine_schedule(&text, &time) {
                    None => Err(issue(
                        "schedule",
                        "Invalid date or time format".to_owned(),
                    )),
                    Some(instant) if instant < *not_before => Err(issue(
                        "schedule",
                        "Event date and time cannot be in the past".to_owned(),
                    )),
                    Some(_) => Ok(()),
                }
            },
            _ => Ok(()),
        }
    }
}

fn issue(code: &'static str, message: String) -> ValidationError {
    ValidationError::new(code).with_message(message.into())
}

/// Ordered rules per field.
#[derive(Default)]
pub struct Ruleset {
    fields: Vec<(&'static str, Vec<Rule>)>,
}

impl Ruleset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add rules for `name`.
    pub fn field(mut self, name: &'static str, rules: impl IntoIterator<Item = Rule>) -> Self {
        self.fields.push((name, rules.into_iter().collect()));
        self
    }

    /// Add a field only checked for presence.
    pub fn required(self, name: &'static str) -> Self {
        self.field(name, [Rule::Required])
    }

    fn is_required(rules: &[Rule]) -> bool {
        rules.iter().any(|rule| matches!(rule, Rule::Required))
    }
}

/// Check `payload` against `ruleset`.
///
/// Returns every missing required field at once if any is missing, and
/// otherwise the first failing rule of each field.
pub fn validate(payload: &Payload, ruleset: &Ruleset) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();

    for (field, rules) in &ruleset.fields {
        if Ruleset::is_required(rules) && !payload.is_present(field) {
            errors.add(*field, issue("required", format!("{field} is required")));
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    for (field, rules) in &ruleset.fields {
        if !payload.is_present(field) {
            continue;
        }

        if let Some(err) = rules.iter().find_map(|rule| rule.check(field, payload).err()) {
            errors.add(*field, err);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Parse a calendar date, either bare or as the date part of an RFC 3339
/// timestamp taken in UTC.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok().or_else(|| {
        DateTime::parse_from_rfc3339(value)
            .ok()
            .map(|instant| instant.with_timezone(&Utc).date_naive())
    })
}

/// Parse a wall-clock time.
pub fn parse_time(value: &str) -> Option<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .ok()
}

/// Combine a date and a wall-clock time into one UTC instant.
pub fn combine_schedule(date: &str, time: &str) -> Option<DateTime<Utc>> {
    Some(parse_date(date)?.and_time(parse_time(time)?).and_utc())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    vocabulary! {
        pub enum Colour {
            Red => "Red" ["crimson"],
            Light => "Light Blue",
        }
    }

    fn payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => Payload::from(map),
            _ => unreachable!(),
        }
    }

    fn messages(errors: &ValidationErrors) -> Vec<(String, String)> {
        let mut list: Vec<(String, String)> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, issues)| {
                issues
                    .iter()
                    .map(move |issue| (field.to_string(), issue.to_string()))
            })
            .collect();
        list.sort();
        list
    }

    #[test]
    fn test_missing_fields_are_reported_together() {
        let rules = Ruleset::new()
            .field("name", [Rule::Required])
            .field("age", [Rule::Required, Rule::Min(13.0)])
            .field("phone", [Rule::Phone(PhoneFormat::Digits)]);
        let errors =
            validate(&payload(json!({ "name": "  ", "phone": "12" })), &rules).unwrap_err();

        // formats are not checked while a required field is missing.
        assert_eq!(
            messages(&errors),
            vec![
                ("age".into(), "age is required".into()),
                ("name".into(), "name is required".into()),
            ]
        );
    }

    #[test]
    fn test_every_failing_field_is_reported() {
        let rules = Ruleset::new()
            .field("age", [Rule::Required, Rule::Min(13.0)])
            .field("userId", [Rule::Required, Rule::ObjectId])
            .field("colour", [Rule::Required, Rule::one_of::<Colour>()])
            .field("mail", [Rule::Email]);
        let errors = validate(
            &payload(json!({
                "age": "twelve",
                "userId": "abc",
                "colour": "green",
                "mail": "jo@x.com"
            })),
            &rules,
        )
        .unwrap_err();

        let list = messages(&errors);
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].0, "age");
        assert_eq!(
            list[1].1,
            "'green' is not a valid colour; expected one of: Red, Light Blue"
        );
        assert_eq!(list[2].1, "userId must be a valid identifier");
    }

    #[test]
    fn test_vocabulary_parsing() {
        assert_eq!(Colour::parse("crimson"), Some(Colour::Red));
        assert_eq!(Colour::parse(" light blue "), Some(Colour::Light));
        assert_eq!(Colour::parse("blue"), None);
        assert_eq!(serde_json::to_value(Colour::Light).unwrap(), json!("Light Blue"));
        assert_eq!(
            serde_json::from_value::<Colour>(json!("RED")).unwrap(),
            Colour::Red
        );
    }

    #[test]
    fn test_phone_formats() {
        assert!(PhoneFormat::Digits.matches("0612345678"));
        assert!(!PhoneFormat::Digits.matches("06 123 4567"));
        assert!(PhoneFormat::Grouped.matches("06 123 4567"));
        assert!(!PhoneFormat::Grouped.matches("0612345678"));
    }

    #[test]
    fn test_numbers_and_lists() {
        let body = payload(json!({
            "fee": 0,
            "limit": "4.8",
            "rules": "[\"no fouls\", \" \", \"fair play\"]",
            "features": ["live score"],
            "broken": "[1, {}]",
            "single": "bring water"
        }));

        assert_eq!(body.number("fee"), Some(0.0));
        assert_eq!(body.integer("limit"), Some(4));
        assert_eq!(body.list("rules").unwrap(), vec!["no fouls", "fair play"]);
        assert_eq!(body.list("features").unwrap(), vec!["live score"]);
        assert_eq!(body.list("single").unwrap(), vec!["bring water"]);
        assert_eq!(body.list("missing").unwrap(), Vec::<String>::new());
        assert!(body.list("broken").is_none());
        assert!(!payload(json!({ "sports": "[]" })).is_present("sports"));
    }

    #[test]
    fn test_integers_must_fit() {
        let body = payload(json!({ "small": -7.9, "huge": 1e12, "edge": 2147483647 }));

        assert_eq!(body.integer("small"), Some(-7));
        assert_eq!(body.integer("edge"), Some(i32::MAX));
        assert_eq!(body.integer("huge"), None);

        let rules = Ruleset::new().field("huge", [Rule::Min(1.0), Rule::Integer]);
        let errors = validate(&body, &rules).unwrap_err();
        assert_eq!(
            messages(&errors),
            vec![(
                "huge".into(),
                "huge must be a whole number no greater than 2147483647".into()
            )]
        );
    }

    #[test]
    fn test_schedule() {
        let now = "2030-06-01T12:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let rules = Ruleset::new().field(
            "date",
            [
                Rule::Required,
                Rule::Schedule {
                    time_field: "time",
                    not_before: now,
                },
            ],
        );

        let past = payload(json!({ "date": "2030-06-01", "time": "11:59" }));
        let errors = validate(&past, &rules).unwrap_err();
        assert_eq!(
            messages(&errors),
            vec![(
                "date".into(),
                "Event date and time cannot be in the past".into()
            )]
        );

        let later = payload(json!({ "date": "2030-06-01", "time": "12:00:01" }));
        assert!(validate(&later, &rules).is_ok());

        let invalid = payload(json!({ "date": "2030-13-01", "time": "10:00" }));
        assert!(validate(&invalid, &rules).is_err());
    }

    #[test]
    fn test_combine_schedule_is_utc() {
        let instant = combine_schedule("2030-06-01", "18:30").unwrap();
        assert_eq!(instant.to_rfc3339(), "2030-06-01T18:30:00+00:00");
        assert_eq!(
            combine_schedule("2030-06-01T00:00:00+02:00", "08:00")
                .unwrap()
                .to_rfc3339(),
            "2030-05-31T08:00:00+00:00"
        );
        assert!(combine_schedule("2030-06-01", "25:00").is_none());
    }
}
