// --------------------------------------------------
// Declarative request validation.
//
// Every resource body is described by a Schema table and
// checked by the single `validate` function below, which
// collects all field errors, fills defaults, normalises
// timestamps/integers and rejects unknown fields.
// --------------------------------------------------

use std::sync::LazyLock;

use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Query, Request},
    http::request::Parts,
    Json,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use serde::de::{DeserializeOwned, Deserializer, IntoDeserializer};
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{ApiError, FieldError};
use crate::logic::iso;

static HEX_COLOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^#([A-Fa-f0-9]{6}|[A-Fa-f0-9]{3})$").expect("hex colour pattern is valid")
});

const PRIORITIES: &[&str] = &["low", "medium", "high", "urgent"];
const STATUSES: &[&str] = &["pending", "in_progress", "completed", "archived"];
const RECURRENCE: &[&str] = &["daily", "weekly", "monthly", "custom"];
const THEMES: &[&str] = &["light", "dark", "auto"];

#[derive(Debug, Clone, Copy)]
pub enum Rule {
    Text { min: usize, max: usize },
    Uuid,
    Timestamp,
    Boolean,
    Integer { min: i64, max: Option<i64> },
    OneOf(&'static [&'static str]),
    HexColor,
    Uri,
    Tags { max_len: usize },
    Attachments,
    UuidList { min_items: usize },
}

#[derive(Debug, Clone, Copy)]
pub enum Fallback {
    Text(&'static str),
    Bool(bool),
    Int(i64),
    EmptyList,
}

impl Fallback {
    fn value(self) -> Value {
        match self {
            Fallback::Text(s) => Value::String(s.to_string()),
            Fallback::Bool(b) => Value::Bool(b),
            Fallback::Int(i) => Value::from(i),
            Fallback::EmptyList => Value::Array(Vec::new()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Presence {
    Required,
    Optional,
    Default(Fallback),
}

#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub rule: Rule,
    pub presence: Presence,
    pub nullable: bool,
    pub allow_empty: bool,
}

impl Field {
    const fn new(name: &'static str, rule: Rule) -> Self {
        Self { name, rule, presence: Presence::Optional, nullable: false, allow_empty: false }
    }

    const fn required(mut self) -> Self {
        self.presence = Presence::Required;
        self
    }

    const fn or(mut self, fallback: Fallback) -> Self {
        self.presence = Presence::Default(fallback);
        self
    }

    const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    const fn allow_empty(mut self) -> Self {
        self.allow_empty = true;
        self
    }
}

#[derive(Debug)]
pub struct Schema {
    pub fields: &'static [Field],
    /// Minimum number of provided fields (partial updates).
    pub min_fields: usize,
}

// -----------------------------
// Schemas
// -----------------------------

const TITLE: Rule = Rule::Text { min: 1, max: 255 };
const DESCRIPTION: Rule = Rule::Text { min: 1, max: 5000 };
const ICON: Rule = Rule::Text { min: 1, max: 10 };

pub static TASK_CREATE: Schema = Schema {
    fields: &[
        Field::new("title", TITLE).required(),
        Field::new("description", DESCRIPTION).nullable().allow_empty(),
        Field::new("category_id", Rule::Uuid).nullable(),
        Field::new("priority", Rule::OneOf(PRIORITIES)).or(Fallback::Text("medium")),
        Field::new("start_date", Rule::Timestamp).nullable(),
        Field::new("reminder_date", Rule::Timestamp).nullable(),
        Field::new("is_recurring", Rule::Boolean).or(Fallback::Bool(false)),
        Field::new("recurrence_pattern", Rule::OneOf(RECURRENCE)).nullable(),
        Field::new("recurrence_interval", Rule::Integer { min: 1, max: None }).nullable(),
        Field::new("estimated_time", Rule::Integer { min: 0, max: None }).nullable(),
        Field::new("tags", Rule::Tags { max_len: 50 }).or(Fallback::EmptyList),
        Field::new("attachments", Rule::Attachments).or(Fallback::EmptyList),
    ],
    min_fields: 0,
};

pub static TASK_UPDATE: Schema = Schema {
    fields: &[
        Field::new("title", TITLE),
        Field::new("description", DESCRIPTION).nullable().allow_empty(),
        Field::new("category_id", Rule::Uuid).nullable(),
        Field::new("priority", Rule::OneOf(PRIORITIES)),
        Field::new("status", Rule::OneOf(STATUSES)),
        Field::new("start_date", Rule::Timestamp).nullable(),
        Field::new("reminder_date", Rule::Timestamp).nullable(),
        Field::new("is_recurring", Rule::Boolean),
        Field::new("recurrence_pattern", Rule::OneOf(RECURRENCE)).nullable(),
        Field::new("recurrence_interval", Rule::Integer { min: 1, max: None }).nullable(),
        Field::new("estimated_time", Rule::Integer { min: 0, max: None }).nullable(),
        Field::new("tempo_real", Rule::Integer { min: 0, max: None }).nullable(),
        Field::new("tags", Rule::Tags { max_len: 50 }),
        Field::new("attachments", Rule::Attachments),
        Field::new("position", Rule::Integer { min: 0, max: None }),
    ],
    min_fields: 1,
};

pub static TASK_REORDER: Schema = Schema {
    fields: &[Field::new("taskIds", Rule::UuidList { min_items: 1 }).required()],
    min_fields: 0,
};

pub static CATEGORY_CREATE: Schema = Schema {
    fields: &[
        Field::new("name", Rule::Text { min: 1, max: 100 }).required(),
        Field::new("color", Rule::HexColor).or(Fallback::Text("#3B82F6")),
        Field::new("icon", ICON).or(Fallback::Text("📁")),
    ],
    min_fields: 0,
};

pub static CATEGORY_UPDATE: Schema = Schema {
    fields: &[
        Field::new("name", Rule::Text { min: 1, max: 100 }),
        Field::new("color", Rule::HexColor),
        Field::new("icon", ICON),
    ],
    min_fields: 1,
};

pub static SUBTASK_CREATE: Schema = Schema {
    fields: &[
        Field::new("title", TITLE).required(),
        Field::new("position", Rule::Integer { min: 0, max: None }).or(Fallback::Int(0)),
    ],
    min_fields: 0,
};

pub static SUBTASK_UPDATE: Schema = Schema {
    fields: &[
        Field::new("title", TITLE),
        Field::new("completed", Rule::Boolean),
        Field::new("position", Rule::Integer { min: 0, max: None }),
    ],
    min_fields: 1,
};

pub static POMODORO_CREATE: Schema = Schema {
    fields: &[
        Field::new("task_id", Rule::Uuid).nullable(),
        Field::new("duration", Rule::Integer { min: 1, max: Some(120) }).required(),
    ],
    min_fields: 0,
};

pub static PROFILE_UPDATE: Schema = Schema {
    fields: &[
        Field::new("full_name", Rule::Text { min: 1, max: 255 }).nullable().allow_empty(),
        Field::new("avatar_url", Rule::Uri).nullable().allow_empty(),
        Field::new("theme_preference", Rule::OneOf(THEMES)),
        Field::new("custom_color", Rule::HexColor),
        Field::new("notifications_enabled", Rule::Boolean),
    ],
    min_fields: 1,
};

// -----------------------------
// Evaluation
// -----------------------------

pub fn validate(schema: &Schema, body: Value) -> Result<Map<String, Value>, Vec<FieldError>> {
    let Value::Object(mut input) = body else {
        return Err(vec![FieldError::new("body", "must be a JSON object")]);
    };

    let mut errors: Vec<FieldError> = input
        .keys()
        .filter(|key| !schema.fields.iter().any(|f| f.name == key.as_str()))
        .map(|key| FieldError::new(key.as_str(), "is not allowed"))
        .collect();

    let provided = schema
        .fields
        .iter()
        .filter(|f| input.contains_key(f.name))
        .count();

    let mut output = Map::new();
    for field in schema.fields {
        match input.remove(field.name) {
            None => match field.presence {
                Presence::Required => errors.push(FieldError::new(field.name, "is required")),
                Presence::Default(fallback) => {
                    output.insert(field.name.to_string(), fallback.value());
                }
                Presence::Optional => {}
            },
            Some(Value::Null) if field.nullable => {
                output.insert(field.name.to_string(), Value::Null);
            }
            Some(Value::Null) => errors.push(FieldError::new(field.name, "must not be null")),
            Some(value) => match check(field, field.name, value) {
                Ok(value) => {
                    output.insert(field.name.to_string(), value);
                }
                Err(error) => errors.push(error),
            },
        }
    }

    if provided < schema.min_fields {
        errors.push(FieldError::new(
            "body",
            format!("must contain at least {} field(s)", schema.min_fields),
        ));
    }

    if errors.is_empty() { Ok(output) } else { Err(errors) }
}

fn check(field: &Field, path: &str, value: Value) -> Result<Value, FieldError> {
    let fail = |message: String| FieldError::new(path, message);

    match field.rule {
        Rule::Text { min, max } => {
            let text = value.as_str().ok_or_else(|| fail("must be a string".into()))?;
            if text.is_empty() && field.allow_empty {
                return Ok(value);
            }
            let len = text.chars().count();
            if len == 0 {
                return Err(fail("must not be empty".into()));
            }
            if len < min {
                return Err(fail(format!("must be at least {min} characters long")));
            }
            if len > max {
                return Err(fail(format!("must be at most {max} characters long")));
            }
            Ok(value)
        }
        Rule::Uuid => uuid_value(&value).map_err(fail),
        Rule::Timestamp => {
            let raw = value.as_str().ok_or_else(|| fail("must be an ISO 8601 date".into()))?;
            parse_timestamp(raw)
                .map(|at| Value::String(iso(at)))
                .ok_or_else(|| fail("must be an ISO 8601 date".into()))
        }
        Rule::Boolean => match value {
            Value::Bool(_) => Ok(value),
            _ => Err(fail("must be a boolean".into())),
        },
        Rule::Integer { min, max } => {
            let n = integer(&value).ok_or_else(|| fail("must be an integer".into()))?;
            if n < min {
                return Err(fail(format!("must be greater than or equal to {min}")));
            }
            if let Some(max) = max.filter(|max| n > *max) {
                return Err(fail(format!("must be less than or equal to {max}")));
            }
            Ok(Value::from(n))
        }
        Rule::OneOf(allowed) => {
            if value.as_str().is_some_and(|s| allowed.contains(&s)) {
                Ok(value)
            } else {
                Err(fail(format!("must be one of [{}]", allowed.join(", "))))
            }
        }
        Rule::HexColor => {
            if value.as_str().is_some_and(|s| HEX_COLOR.is_match(s)) {
                Ok(value)
            } else {
                Err(fail("must be a valid hex color (e.g. #3B82F6)".into()))
            }
        }
        Rule::Uri => {
            let ok = value
                .as_str()
                .is_some_and(|s| (s.is_empty() && field.allow_empty) || is_uri(s));
            if ok { Ok(value) } else { Err(fail("must be a valid URI".into())) }
        }
        Rule::Tags { max_len } => {
            let items = value.as_array().ok_or_else(|| fail("must be an array".into()))?;
            for (i, item) in items.iter().enumerate() {
                match item.as_str() {
                    Some(tag) if tag.chars().count() <= max_len => {}
                    Some(_) => {
                        return Err(FieldError::new(
                            format!("{path}.{i}"),
                            format!("must be at most {max_len} characters long"),
                        ));
                    }
                    None => return Err(FieldError::new(format!("{path}.{i}"), "must be a string")),
                }
            }
            Ok(value)
        }
        Rule::Attachments => {
            let Value::Array(items) = value else {
                return Err(fail("must be an array".into()));
            };
            items
                .into_iter()
                .enumerate()
                .map(|(i, item)| check_attachment(&format!("{path}.{i}"), item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }
        Rule::UuidList { min_items } => {
            let Value::Array(items) = value else {
                return Err(fail("must be an array".into()));
            };
            if items.len() < min_items {
                return Err(fail(format!("must contain at least {min_items} item(s)")));
            }
            items
                .iter()
                .enumerate()
                .map(|(i, item)| uuid_value(item).map_err(|m| FieldError::new(format!("{path}.{i}"), m)))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }
    }
}

static ATTACHMENT: Schema = Schema {
    fields: &[
        Field::new("name", Rule::Text { min: 1, max: usize::MAX }).required(),
        Field::new("url", Rule::Uri).required(),
        Field::new("type", Rule::Text { min: 1, max: usize::MAX }).required(),
        Field::new("size", Rule::Integer { min: i64::MIN, max: None }),
    ],
    min_fields: 0,
};

fn check_attachment(path: &str, item: Value) -> Result<Value, FieldError> {
    validate(&ATTACHMENT, item).map(Value::Object).map_err(|errors| {
        errors
            .into_iter()
            .next()
            .map(|e| {
                let field = if e.field == "body" { path.to_string() } else { format!("{path}.{}", e.field) };
                FieldError::new(field, e.message)
            })
            .unwrap_or_else(|| FieldError::new(path, "is invalid"))
    })
}

fn uuid_value(value: &Value) -> Result<Value, String> {
    value
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .map(|id| Value::String(id.to_string()))
        .ok_or_else(|| "must be a valid UUID".to_string())
}

fn integer(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| f as i64)
    })
}

fn is_uri(raw: &str) -> bool {
    url::Url::parse(raw).is_ok_and(|u| !u.scheme().is_empty() && (u.has_host() || !u.cannot_be_a_base()))
}

/// RFC 3339, a bare date (midnight UTC) or a naive date-time taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    if let Ok(at) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(at.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|at| at.and_utc())
}

pub fn parse_id(raw: &str, field: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::invalid(field, "must be a valid UUID"))
}

/// Query-string field where `key=` means the same as leaving the key out.
pub fn empty_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) if !raw.trim().is_empty() => {
            T::deserialize(IntoDeserializer::<D::Error>::into_deserializer(raw.trim().to_string())).map(Some)
        }
        _ => Ok(None),
    }
}

pub fn empty_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    empty_as_none(deserializer).map(Option::unwrap_or_default)
}

// -----------------------------
// Extractors
// -----------------------------

/// Request body type described by a schema.
pub trait Validate: DeserializeOwned {
    fn schema() -> &'static Schema;
}

/// JSON body that passed its schema, decoded into `T`.
pub struct Validated<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for Validated<T>
where
    S: Send + Sync,
    T: Validate,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(body) = Json::<Value>::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::invalid("body", rejection.body_text()))?;

        let fields = validate(T::schema(), body).map_err(ApiError::Validation)?;
        let input = serde_json::from_value(Value::Object(fields))
            .map_err(|e| ApiError::invalid("body", e.to_string()))?;
        Ok(Validated(input))
    }
}

/// Query string decoded into `T`, with failures in the error envelope.
pub struct QueryParams<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for QueryParams<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(params) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| ApiError::invalid("query", rejection.body_text()))?;
        Ok(QueryParams(params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn fields(errors: &[FieldError]) -> Vec<&str> {
        errors.iter().map(|e| e.field.as_str()).collect()
    }

    #[test]
    fn task_create_fills_defaults() {
        let out = validate(&TASK_CREATE, json!({ "title": "Plan sprint" })).unwrap();
        assert_eq!(out["priority"], "medium");
        assert_eq!(out["is_recurring"], false);
        assert_eq!(out["tags"], json!([]));
        assert_eq!(out["attachments"], json!([]));
        assert!(!out.contains_key("description"));
    }

    #[test]
    fn collects_every_error() {
        let errors = validate(
            &TASK_CREATE,
            json!({ "priority": "critical", "estimated_time": -5, "colour": "red" }),
        )
        .unwrap_err();
        let mut names = fields(&errors);
        names.sort();
        assert_eq!(names, ["colour", "estimated_time", "priority", "title"]);
    }

    #[test]
    fn normalises_timestamps_and_integers() {
        let out = validate(
            &TASK_UPDATE,
            json!({ "start_date": "2025-03-01T09:30:00-03:00", "reminder_date": "2025-03-02", "position": 4.0 }),
        )
        .unwrap();
        assert_eq!(out["start_date"], "2025-03-01T12:30:00.000Z");
        assert_eq!(out["reminder_date"], "2025-03-02T00:00:00.000Z");
        assert_eq!(out["position"], 4);
    }

    #[test]
    fn partial_updates_need_a_field() {
        let errors = validate(&TASK_UPDATE, json!({})).unwrap_err();
        assert_eq!(fields(&errors), ["body"]);
        let errors = validate(&PROFILE_UPDATE, json!({})).unwrap_err();
        assert_eq!(fields(&errors), ["body"]);
    }

    #[test]
    fn nullable_and_empty_strings() {
        let out = validate(&TASK_UPDATE, json!({ "description": "", "category_id": null })).unwrap();
        assert_eq!(out["description"], "");
        assert_eq!(out["category_id"], Value::Null);

        let errors = validate(&TASK_UPDATE, json!({ "title": "" })).unwrap_err();
        assert_eq!(errors[0].message, "must not be empty");

        let errors = validate(&TASK_UPDATE, json!({ "status": null })).unwrap_err();
        assert_eq!(errors[0].message, "must not be null");
    }

    #[rstest]
    #[case("#3B82F6", true)]
    #[case("#abc", true)]
    #[case("3B82F6", false)]
    #[case("#12345", false)]
    #[case("#GGGGGG", false)]
    fn hex_colours(#[case] color: &str, #[case] ok: bool) {
        let result = validate(&CATEGORY_UPDATE, json!({ "color": color }));
        assert_eq!(result.is_ok(), ok);
    }

    #[test]
    fn category_defaults() {
        let out = validate(&CATEGORY_CREATE, json!({ "name": "Work" })).unwrap();
        assert_eq!(out["color"], "#3B82F6");
        assert_eq!(out["icon"], "📁");
    }

    #[rstest]
    #[case(json!(0), false)]
    #[case(json!(1), true)]
    #[case(json!(120), true)]
    #[case(json!(121), false)]
    #[case(json!("25"), false)]
    fn pomodoro_duration_bounds(#[case] duration: Value, #[case] ok: bool) {
        let result = validate(&POMODORO_CREATE, json!({ "duration": duration }));
        assert_eq!(result.is_ok(), ok);
    }

    #[test]
    fn attachments_are_checked_item_by_item() {
        let errors = validate(
            &TASK_CREATE,
            json!({
                "title": "t",
                "attachments": [
                    { "name": "a", "url": "https://files.example.com/a.png", "type": "image/png", "size": 10 },
                    { "name": "b", "url": "not a uri", "type": "image/png" }
                ]
            }),
        )
        .unwrap_err();
        assert_eq!(fields(&errors), ["attachments.1.url"]);
    }

    #[test]
    fn tag_length_is_limited() {
        let long = "x".repeat(51);
        let errors = validate(&TASK_CREATE, json!({ "title": "t", "tags": ["ok", long] })).unwrap_err();
        assert_eq!(fields(&errors), ["tags.1"]);
    }

    #[test]
    fn reorder_requires_uuid_list() {
        let errors = validate(&TASK_REORDER, json!({ "taskIds": [] })).unwrap_err();
        assert_eq!(fields(&errors), ["taskIds"]);

        let errors = validate(&TASK_REORDER, json!({ "taskIds": ["nope"] })).unwrap_err();
        assert_eq!(fields(&errors), ["taskIds.0"]);

        let id = Uuid::new_v4();
        let out = validate(&TASK_REORDER, json!({ "taskIds": [id.to_string().to_uppercase()] })).unwrap();
        assert_eq!(out["taskIds"], json!([id.to_string()]));
    }

    #[test]
    fn profile_avatar_accepts_empty_or_uri() {
        assert!(validate(&PROFILE_UPDATE, json!({ "avatar_url": "" })).is_ok());
        assert!(validate(&PROFILE_UPDATE, json!({ "avatar_url": "https://cdn.example.com/me.png" })).is_ok());
        assert!(validate(&PROFILE_UPDATE, json!({ "avatar_url": "me.png" })).is_err());
        assert!(validate(&PROFILE_UPDATE, json!({ "theme_preference": "neon" })).is_err());
    }

    #[derive(Debug, Default, Deserialize)]
    struct Filters {
        #[serde(default, deserialize_with = "empty_as_none")]
        status: Option<crate::models::TaskStatus>,
        #[serde(default, deserialize_with = "empty_as_none")]
        owner: Option<Uuid>,
        #[serde(default, deserialize_with = "empty_as_default")]
        period: crate::analytics::Period,
    }

    #[rstest]
    #[case("status=&owner=&period=", None, crate::analytics::Period::Week)]
    #[case("status=%20&period=day", None, crate::analytics::Period::Day)]
    #[case("status=completed", Some(crate::models::TaskStatus::Completed), crate::analytics::Period::Week)]
    fn empty_query_values_count_as_absent(
        #[case] raw: &str,
        #[case] status: Option<crate::models::TaskStatus>,
        #[case] period: crate::analytics::Period,
    ) {
        let uri: axum::http::Uri = format!("/x?{raw}").parse().unwrap();
        let Query(filters) = Query::<Filters>::try_from_uri(&uri).unwrap();
        assert_eq!(filters.status, status);
        assert!(filters.owner.is_none());
        assert_eq!(filters.period, period);
    }

    #[test]
    fn non_empty_query_values_are_still_checked() {
        let uri: axum::http::Uri = "/x?status=someday".parse().unwrap();
        assert!(Query::<Filters>::try_from_uri(&uri).is_err());
    }

    #[test]
    fn rejects_non_objects() {
        let errors = validate(&SUBTASK_CREATE, json!(["title"])).unwrap_err();
        assert_eq!(fields(&errors), ["body"]);
    }
}
