//! Named pipeline filters beyond the minijinja builtins.

use chrono::DateTime;
use minijinja::value::Value;
use minijinja::{Error, ErrorKind};

/// `{{ 1234.5 | currency }}` -> `$1,234.50`
pub fn currency(value: Value) -> Result<String, Error> {
  let amount = f64::try_from(value.clone()).map_err(|_| {
    Error::new(
      ErrorKind::InvalidOperation,
      format!("currency expects a number, got {value}"),
    )
  })?;
  let negative = amount < 0.0;
  let cents = (amount.abs() * 100.0).round() as u64;
  let whole = cents / 100;
  let fraction = cents % 100;
  let mut grouped = String::new();
  for (idx, digit) in whole.to_string().chars().rev().enumerate() {
    if idx > 0 && idx % 3 == 0 {
      grouped.push(',');
    }
    grouped.push(digit);
  }
  let whole: String = grouped.chars().rev().collect();
  let sign = if negative { "-" } else { "" };
  Ok(format!("{sign}${whole}.{fraction:02}"))
}

/// `{{ 1700000000000 | date }}` -> `2023-11-14` (epoch millis to ISO date).
pub fn date(value: Value) -> Result<String, Error> {
  let millis = i64::try_from(value.clone()).map_err(|_| {
    Error::new(
      ErrorKind::InvalidOperation,
      format!("date expects epoch milliseconds, got {value}"),
    )
  })?;
  let datetime = DateTime::from_timestamp_millis(millis).ok_or_else(|| {
    Error::new(
      ErrorKind::InvalidOperation,
      format!("timestamp out of range: {millis}"),
    )
  })?;
  Ok(datetime.format("%Y-%m-%d").to_string())
}
