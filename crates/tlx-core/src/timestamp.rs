use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

/// Layouts tried, in order, for a combined execution date and clock time.
pub const DATE_TIME_LAYOUTS: [&str; 2] = ["%Y-%m-%d %I:%M:%S %p", "%m/%d/%Y %I:%M:%S %p"];

/// Layouts tried, in order, for a bare execution date.
pub const DATE_LAYOUTS: [&str; 2] = ["%Y-%m-%d", "%m/%d/%Y"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("`{value}` matched none of the layouts {layouts:?}")]
pub struct TimestampError {
    pub value: String,
    pub layouts: Vec<&'static str>,
}

/// Outcome of trying an ordered list of layouts against one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutAttempt<T> {
    Parsed { value: T, layout: &'static str },
    Exhausted { input: String, tried: Vec<&'static str> },
}

impl<T> LayoutAttempt<T> {
    pub fn into_result(self) -> Result<T, TimestampError> {
        match self {
            LayoutAttempt::Parsed { value, .. } => Ok(value),
            LayoutAttempt::Exhausted { input, tried } => Err(TimestampError {
                value: input,
                layouts: tried,
            }),
        }
    }
}

fn try_layouts<T>(
    input: &str,
    layouts: &[&'static str],
    parse: impl Fn(&str, &str) -> Option<T>,
) -> LayoutAttempt<T> {
    for layout in layouts {
        if let Some(value) = parse(input, layout) {
            return LayoutAttempt::Parsed { value, layout };
        }
    }
    LayoutAttempt::Exhausted {
        input: input.to_string(),
        tried: layouts.to_vec(),
    }
}

/// Combines the ledger's separate date and time columns into one timestamp.
///
/// Only the first space-separated token of `date` is used, so a date column
/// that already carries a midnight time still combines cleanly.
pub fn parse_execution_timestamp(date: &str, time: &str) -> LayoutAttempt<NaiveDateTime> {
    let day = date.split(' ').next().unwrap_or_default();
    let combined = format!("{day} {}", time.trim());
    try_layouts(&combined, &DATE_TIME_LAYOUTS, |input, layout| {
        NaiveDateTime::parse_from_str(input, layout).ok()
    })
}

/// Parses a date-only execution column, yielding midnight of that day.
pub fn parse_execution_date(date: &str) -> LayoutAttempt<NaiveDateTime> {
    try_layouts(date.trim(), &DATE_LAYOUTS, |input, layout| {
        NaiveDate::parse_from_str(input, layout)
            .ok()
            .and_then(|day| day.and_hms_opt(0, 0, 0))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .and_then(|day| day.and_hms_opt(h, min, s))
            .expect("valid timestamp")
    }

    #[test]
    fn iso_date_with_twelve_hour_clock() {
        let attempt = parse_execution_timestamp("2022-05-05", "08:18:55 AM");
        assert_eq!(
            attempt,
            LayoutAttempt::Parsed {
                value: at(2022, 5, 5, 8, 18, 55),
                layout: DATE_TIME_LAYOUTS[0],
            }
        );
    }

    #[test]
    fn slash_date_falls_back_to_second_layout() {
        let attempt = parse_execution_timestamp("05/23/2022", "12:00:00 AM");
        assert_eq!(
            attempt,
            LayoutAttempt::Parsed {
                value: at(2022, 5, 23, 0, 0, 0),
                layout: DATE_TIME_LAYOUTS[1],
            }
        );
    }

    #[test]
    fn date_column_with_trailing_time_uses_first_token() {
        let parsed = parse_execution_timestamp("2022-05-05 00:00:00", "01:30:00 PM")
            .into_result()
            .expect("parsed");
        assert_eq!(parsed, at(2022, 5, 5, 13, 30, 0));
    }

    #[test]
    fn unparseable_input_reports_every_layout() {
        let err = parse_execution_timestamp("yesterday", "noon")
            .into_result()
            .expect_err("should fail");
        assert_eq!(err.value, "yesterday noon");
        assert_eq!(err.layouts, DATE_TIME_LAYOUTS.to_vec());
    }

    #[test]
    fn date_only_layouts() {
        assert_eq!(
            parse_execution_date("2022-05-05").into_result(),
            Ok(at(2022, 5, 5, 0, 0, 0))
        );
        assert_eq!(
            parse_execution_date("01/01/1900").into_result(),
            Ok(at(1900, 1, 1, 0, 0, 0))
        );
        assert!(parse_execution_date("").into_result().is_err());
    }
}
