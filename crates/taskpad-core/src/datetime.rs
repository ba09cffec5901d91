use std::sync::OnceLock;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  Local,
  NaiveDate,
  TimeZone,
  Utc,
  Weekday
};
use chrono_tz::Tz;

const TIMEZONE_ENV_VAR: &str =
  "TASKPAD_TIMEZONE";

/// Zone used to decide what "today"
/// means for due dates and overdue
/// checks.
#[derive(Debug, Clone, Copy)]
pub enum Zone {
  Local,
  Named(Tz)
}

pub fn project_zone() -> &'static Zone {
  static PROJECT_ZONE: OnceLock<Zone> =
    OnceLock::new();
  PROJECT_ZONE
    .get_or_init(resolve_project_zone)
}

fn resolve_project_zone() -> Zone {
  let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
  else {
    return Zone::Local;
  };

  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return Zone::Local;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::debug!(timezone = %tz, "using configured timezone");
      Zone::Named(tz)
    }
    | Err(error) => {
      tracing::warn!(
        value = %trimmed,
        %error,
        "invalid TASKPAD_TIMEZONE; \
         using local time"
      );
      Zone::Local
    }
  }
}

#[must_use]
pub fn to_project_date(
  dt: DateTime<Utc>
) -> NaiveDate {
  match project_zone() {
    | Zone::Local => {
      dt.with_timezone(&Local)
        .date_naive()
    }
    | Zone::Named(tz) => {
      dt.with_timezone(tz).date_naive()
    }
  }
}

/// Creation timestamps are epoch
/// milliseconds.
#[must_use]
pub fn from_millis(
  millis: i64
) -> Option<DateTime<Utc>> {
  Utc.timestamp_millis_opt(millis)
    .single()
}

#[must_use]
pub fn format_created(
  millis: i64
) -> String {
  let Some(dt) = from_millis(millis)
  else {
    return "-".to_string();
  };

  match project_zone() {
    | Zone::Local => {
      dt.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M")
        .to_string()
    }
    | Zone::Named(tz) => {
      dt.with_timezone(tz)
        .format("%Y-%m-%d %H:%M")
        .to_string()
    }
  }
}

/// Parse a due date expression:
/// `YYYY-MM-DD`, `today`, `tomorrow`,
/// `yesterday`, `+Nd` / `+Nw`, or a
/// weekday name (next occurrence).
pub fn parse_due_date(
  input: &str,
  now: DateTime<Utc>
) -> anyhow::Result<NaiveDate> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();
  let today = to_project_date(now);

  match lower.as_str() {
    | "today" => return Ok(today),
    | "tomorrow" => {
      return Ok(
        today + Duration::days(1)
      );
    }
    | "yesterday" => {
      return Ok(
        today - Duration::days(1)
      );
    }
    | _ => {}
  }

  if let Some(rest) =
    lower.strip_prefix('+')
  {
    return parse_offset(rest, today);
  }

  if let Some(weekday) =
    parse_weekday_name(&lower)
  {
    return Ok(next_weekday_date(
      today, weekday
    ));
  }

  parse_iso_date(token).ok_or_else(
    || {
      anyhow!(
        "unrecognized date: {token}"
      )
    }
  )
}

/// Accepts `YYYY-MM-DD`, optionally
/// followed by a time component as in
/// full ISO timestamps.
#[must_use]
pub fn parse_iso_date(
  raw: &str
) -> Option<NaiveDate> {
  let trimmed = raw.trim();
  let date_part =
    trimmed.get(..10).unwrap_or(trimmed);
  NaiveDate::parse_from_str(
    date_part, "%Y-%m-%d"
  )
  .ok()
}

fn parse_offset(
  rest: &str,
  today: NaiveDate
) -> anyhow::Result<NaiveDate> {
  let (digits, unit) = rest.split_at(
    rest
      .find(|c: char| {
        !c.is_ascii_digit()
      })
      .unwrap_or(rest.len())
  );
  let amount: i64 =
    digits.parse().with_context(
      || {
        format!(
          "invalid date offset: +{rest}"
        )
      }
    )?;
  let days = match unit {
    | "" | "d" | "day" | "days" => {
      amount
    }
    | "w" | "week" | "weeks" => {
      amount * 7
    }
    | other => {
      return Err(anyhow!(
        "invalid date offset unit: \
         {other}"
      ));
    }
  };
  Ok(today + Duration::days(days))
}

fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  match token {
    | "monday" | "mon" => {
      Some(Weekday::Mon)
    }
    | "tuesday" | "tue" | "tues" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" | "thur"
    | "thurs" => Some(Weekday::Thu),
    | "friday" | "fri" => {
      Some(Weekday::Fri)
    }
    | "saturday" | "sat" => {
      Some(Weekday::Sat)
    }
    | "sunday" | "sun" => {
      Some(Weekday::Sun)
    }
    | _ => None
  }
}

fn next_weekday_date(
  today: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let current = today
    .weekday()
    .num_days_from_monday()
    as i64;
  let wanted = target
    .num_days_from_monday()
    as i64;
  let mut delta =
    (wanted - current).rem_euclid(7);
  if delta == 0 {
    delta = 7;
  }
  today + Duration::days(delta)
}
