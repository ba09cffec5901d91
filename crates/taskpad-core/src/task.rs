use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

use crate::datetime::parse_iso_date;

pub const MIN_TITLE_LEN: usize = 3;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(into = "u8", try_from = "u8")]
pub enum Priority {
    High = 1,
    #[default]
    Medium = 2,
    Low = 3,
}

impl Priority {
    pub fn rank(self) -> u8 {
        self as u8
    }

    pub fn from_rank(rank: i64) -> Option<Self> {
        match rank {
            1 => Some(Self::High),
            2 => Some(Self::Medium),
            3 => Some(Self::Low),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        }
    }
}

impl From<Priority> for u8 {
    fn from(value: Priority) -> Self {
        value.rank()
    }
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_rank(i64::from(value)).ok_or_else(|| format!("invalid priority: {value}"))
    }
}

impl FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "h" | "high" => Ok(Self::High),
            "2" | "m" | "medium" | "med" => Ok(Self::Medium),
            "3" | "l" | "low" => Ok(Self::Low),
            other => Err(anyhow!("invalid priority: {other} (expected 1-3 or high/medium/low)")),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Input rejected before it reaches the collection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("task title is required")]
    TitleRequired,
    #[error("task title must be at least {MIN_TITLE_LEN} characters")]
    TitleTooShort,
    #[error("due date {0} cannot be in the past")]
    DueDateInPast(NaiveDate),
    #[error("not a usable tag: {0:?} (letters, digits, '_' and '-' only)")]
    InvalidTag(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,

    pub text: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub completed: bool,

    /// Epoch milliseconds.
    pub created: i64,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default)]
    pub due_date: Option<NaiveDate>,
}

impl Task {
    pub fn new(
        text: String,
        tags: Vec<String>,
        priority: Priority,
        due_date: Option<NaiveDate>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text,
            description: String::new(),
            tags,
            completed: false,
            created: now.timestamp_millis(),
            priority,
            due_date,
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Incomplete and due strictly before `today`.
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        !self.completed && self.due_date.map(|due| due < today).unwrap_or(false)
    }

    /// Build a task from an arbitrary JSON value, filling every missing or
    /// malformed field with its default. Never fails.
    pub fn normalize(value: &Value, now: DateTime<Utc>) -> Self {
        let empty = Map::new();
        let obj = value.as_object().unwrap_or(&empty);

        let raw_created = obj.get("created").and_then(as_millis);
        let created = raw_created.unwrap_or_else(|| now.timestamp_millis());

        let id = match obj.get("id") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) if n.as_f64().map(|v| v != 0.0).unwrap_or(false) => {
                n.to_string()
            }
            _ => match raw_created {
                Some(millis) => millis.to_string(),
                None => Uuid::new_v4().to_string(),
            },
        };

        let text = obj
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let description = obj
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let tags = match obj.get("tags") {
            Some(Value::Array(items)) => {
                let raw: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
                let cleaned = dedupe_tags(raw.iter().map(|t| sanitize_tag(t)));
                if cleaned.len() != items.len() {
                    warn!(id = %id, before = items.len(), after = cleaned.len(), "repaired task tags");
                }
                cleaned
            }
            _ => Vec::new(),
        };

        let completed = obj.get("completed").map(is_truthy).unwrap_or(false);

        let priority = match obj.get("priority") {
            Some(Value::Number(n)) => {
                let rank = n.as_f64().unwrap_or(2.0);
                let parsed = if rank.fract() == 0.0 {
                    Priority::from_rank(rank as i64)
                } else {
                    None
                };
                parsed.unwrap_or_else(|| {
                    warn!(id = %id, priority = %n, "priority out of range; using medium");
                    Priority::Medium
                })
            }
            _ => Priority::Medium,
        };

        let due_date = match obj.get("dueDate") {
            Some(Value::String(s)) if !s.is_empty() => {
                let parsed = parse_iso_date(s);
                if parsed.is_none() {
                    warn!(id = %id, due = %s, "dropping unparseable due date");
                }
                parsed
            }
            _ => None,
        };

        Self {
            id,
            text,
            description,
            tags,
            completed,
            created,
            priority,
            due_date,
        }
    }
}

fn as_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .filter(|millis| *millis != 0),
        _ => None,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Strip everything outside `[a-zA-Z0-9_-]` and lowercase.
pub fn sanitize_tag(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect::<String>()
        .to_ascii_lowercase()
}

pub fn is_valid_tag(tag: &str) -> bool {
    !tag.is_empty()
        && tag
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

/// Split a raw tag field on whitespace and commas into a clean, duplicate-free
/// token sequence.
/// A single tag typed by hand. Accepts `#work` as well as `work`.
pub fn tag_name(raw: &str) -> Result<String, ValidationError> {
    let tag = raw.trim().trim_start_matches('#').to_ascii_lowercase();
    if !is_valid_tag(&tag) {
        return Err(ValidationError::InvalidTag(raw.trim().to_string()));
    }
    Ok(tag)
}

pub fn parse_tags(raw: &str) -> Vec<String> {
    dedupe_tags(
        raw.split(|c: char| c.is_whitespace() || c == ',')
            .map(sanitize_tag),
    )
}

/// The token currently being typed (last one), lowercased.
pub fn current_tag_prefix(raw: &str) -> String {
    raw.split(|c: char| c.is_whitespace() || c == ',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .last()
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

fn dedupe_tags<I>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

/// Returns the trimmed title.
pub fn validate_title(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::TitleRequired);
    }
    if trimmed.chars().count() < MIN_TITLE_LEN {
        return Err(ValidationError::TitleTooShort);
    }
    Ok(trimmed.to_string())
}

pub fn validate_due_date(due: Option<NaiveDate>, today: NaiveDate) -> Result<(), ValidationError> {
    match due {
        Some(date) if date < today => Err(ValidationError::DueDateInPast(date)),
        _ => Ok(()),
    }
}
