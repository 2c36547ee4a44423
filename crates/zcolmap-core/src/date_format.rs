/*!
Date handling for DATE-tagged descriptors.

Date formats are configured with the pattern letters provisioning
configuration has always used (`MM-dd-yyyy-hhmmssa`, `yyyy-MM-dd HH:mm:ss`).
[`DateFormat`] compiles such a pattern once into a `chrono` format string.

The current-server-time sentinel is recognised here so that the plan builder
and the binder agree on exactly the same spelling.
*/

use crate::error::{ColmapError, Result};
use chrono::format::{parse, Parsed, StrftimeItems};
use chrono::{FixedOffset, NaiveDateTime, TimeZone};
use std::fmt;
use tracing::trace;

pub const SYSDATE: &str = "SYSDATE";
pub const SYSTIMESTAMP: &str = "SYSTIMESTAMP";

/// Date pattern used by staging tables when none is configured
pub const STAGING_DATE_FORMAT: &str = "MM-dd-yyyy-hhmmssa";

/// Which flavour of the current-time sentinel a value spells
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSentinel {
    Date,
    Timestamp,
}

impl TimeSentinel {
    /// Case-insensitive match against `SYSDATE` / `SYSTIMESTAMP`
    pub fn recognise(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case(SYSDATE) {
            Some(TimeSentinel::Date)
        } else if value.eq_ignore_ascii_case(SYSTIMESTAMP) {
            Some(TimeSentinel::Timestamp)
        } else {
            None
        }
    }
}

pub fn is_time_sentinel(value: &str) -> bool {
    TimeSentinel::recognise(value).is_some()
}

/// A compiled date pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateFormat {
    pattern: String,
    compiled: String,
}

impl DateFormat {
    pub fn new(pattern: &str) -> Result<Self> {
        let compiled = compile(pattern)?;
        trace!("Compiled date pattern [{}] to [{}]", pattern, compiled);
        Ok(Self {
            pattern: pattern.to_string(),
            compiled,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn chrono_format(&self) -> &str {
        &self.compiled
    }

    /// Parse a value. Fields the pattern leaves out take their lowest value
    /// (year 1970, January, day 1, midnight); `hh` without `a` reads as AM.
    pub fn parse(&self, value: &str) -> Result<NaiveDateTime> {
        let value = value.trim();
        let invalid = |e: chrono::format::ParseError| ColmapError::date_parse(value, &self.pattern, e);

        let mut parsed = Parsed::new();
        parse(&mut parsed, value, StrftimeItems::new(&self.compiled)).map_err(invalid)?;

        if parsed.year.is_none() && parsed.year_mod_100.is_none() {
            parsed.set_year(1970).map_err(invalid)?;
        }
        if parsed.month.is_none() {
            parsed.set_month(1).map_err(invalid)?;
        }
        if parsed.day.is_none() {
            parsed.set_day(1).map_err(invalid)?;
        }
        if parsed.hour_mod_12.is_none() {
            parsed.set_hour(0).map_err(invalid)?;
        }
        if parsed.hour_div_12.is_none() {
            parsed.set_ampm(false).map_err(invalid)?;
        }
        if parsed.minute.is_none() {
            parsed.set_minute(0).map_err(invalid)?;
        }

        let date = parsed.to_naive_date().map_err(invalid)?;
        let time = parsed.to_naive_time().map_err(invalid)?;
        Ok(date.and_time(time))
    }

    pub fn format(&self, value: &NaiveDateTime) -> String {
        value.format(&self.compiled).to_string()
    }
}

impl fmt::Display for DateFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

/// Translate pattern letters into `chrono` specifiers
fn compile(pattern: &str) -> Result<String> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '\'' {
            // '' is an escaped quote, otherwise a quoted literal run
            if chars.get(i + 1) == Some(&'\'') {
                out.push('\'');
                i += 2;
                continue;
            }
            let close = chars[i + 1..]
                .iter()
                .position(|&ch| ch == '\'')
                .ok_or_else(|| {
                    ColmapError::configuration(format!(
                        "unterminated quote in date format [{}]",
                        pattern
                    ))
                })?;
            for &ch in &chars[i + 1..i + 1 + close] {
                push_literal(&mut out, ch);
            }
            i += close + 2;
            continue;
        }

        if !c.is_ascii_alphabetic() {
            push_literal(&mut out, c);
            i += 1;
            continue;
        }

        let run = chars[i..].iter().take_while(|&&ch| ch == c).count();
        let spec = match (c, run) {
            ('y', 2) => "%y",
            ('y', _) => "%Y",
            ('M', 1 | 2) => "%m",
            ('M', 3) => "%b",
            ('M', _) => "%B",
            ('d', _) => "%d",
            ('E', 1..=3) => "%a",
            ('E', _) => "%A",
            ('H' | 'k', _) => "%H",
            ('h' | 'K', _) => "%I",
            ('m', _) => "%M",
            ('s', _) => "%S",
            ('S', _) => "%3f",
            ('a', _) => "%p",
            ('Z' | 'X', _) => "%z",
            _ => {
                return Err(ColmapError::configuration(format!(
                    "unsupported pattern letter '{}' in date format [{}]",
                    c, pattern
                )))
            }
        };
        out.push_str(spec);
        i += run;
    }

    Ok(out)
}

fn push_literal(out: &mut String, ch: char) {
    if ch == '%' {
        out.push_str("%%");
    } else {
        out.push(ch);
    }
}

/// Parse a time zone given as `UTC`, `GMT`, `Z`, `+HH:MM`, `-HHMM` or `GMT+HH:MM`
pub fn parse_offset(zone: &str) -> Result<FixedOffset> {
    let invalid = || ColmapError::configuration(format!("unrecognised time zone [{}]", zone));

    let trimmed = zone.trim();
    let upper = trimmed.to_ascii_uppercase();
    let rest = upper
        .strip_prefix("GMT")
        .or_else(|| upper.strip_prefix("UTC"))
        .unwrap_or(&upper);

    if rest.is_empty() || rest == "Z" {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }

    let (sign, digits) = match rest.as_bytes().first() {
        Some(b'+') => (1, &rest[1..]),
        Some(b'-') => (-1, &rest[1..]),
        _ => return Err(invalid()),
    };

    let (hours, minutes) = match digits.split_once(':') {
        Some((h, m)) => (h, m),
        None if digits.len() > 2 => digits.split_at(digits.len() - 2),
        None => (digits, "0"),
    };
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if hours > 23 || minutes > 59 {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

/// Input and output zones configured for one DATE descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneShift {
    pub input: FixedOffset,
    pub output: FixedOffset,
}

impl ZoneShift {
    pub fn new(input: &str, output: &str) -> Result<Self> {
        Ok(Self {
            input: parse_offset(input)?,
            output: parse_offset(output)?,
        })
    }

    /// Reinterpret a wall-clock time read in `input` as wall-clock time in `output`
    pub fn apply(&self, local: NaiveDateTime) -> Result<NaiveDateTime> {
        let instant = self
            .input
            .from_local_datetime(&local)
            .single()
            .ok_or_else(|| ColmapError::date_parse(local.to_string(), "", "ambiguous local time"))?;
        Ok(instant.with_timezone(&self.output).naive_local())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_sentinel_is_case_insensitive() {
        assert_eq!(TimeSentinel::recognise("sysdate"), Some(TimeSentinel::Date));
        assert_eq!(TimeSentinel::recognise(" SysTimestamp "), Some(TimeSentinel::Timestamp));
        assert!(!is_time_sentinel("SYSDATE()"));
    }

    #[test]
    fn test_staging_pattern() -> Result<()> {
        let fmt = DateFormat::new(STAGING_DATE_FORMAT)?;
        assert_eq!(fmt.chrono_format(), "%m-%d-%Y-%I%M%S%p");

        let ts = fmt.parse("10-19-2026-031500PM")?;
        assert_eq!((ts.year(), ts.month(), ts.day()), (2026, 10, 19));
        assert_eq!((ts.hour(), ts.minute(), ts.second()), (15, 15, 0));
        Ok(())
    }

    #[test]
    fn test_iso_like_pattern_with_millis() -> Result<()> {
        let fmt = DateFormat::new("yyyy-MM-dd'T'HH:mm:ss.SSS")?;
        let ts = fmt.parse("2026-01-02T03:04:05.678")?;
        assert_eq!(ts.nanosecond(), 678_000_000);
        assert_eq!(fmt.format(&ts), "2026-01-02T03:04:05.678");
        Ok(())
    }

    #[test]
    fn test_date_only_pattern_yields_midnight() -> Result<()> {
        let ts = DateFormat::new("MM/dd/yyyy")?.parse("02/28/2025")?;
        assert_eq!((ts.hour(), ts.minute()), (0, 0));
        Ok(())
    }

    #[test]
    fn test_missing_fields_take_lowest_value() -> Result<()> {
        let year = DateFormat::new("yyyy")?.parse("2024")?;
        assert_eq!((year.year(), year.month(), year.day(), year.hour()), (2024, 1, 1, 0));

        let clock = DateFormat::new("HH:mm")?.parse("09:15")?;
        assert_eq!((clock.year(), clock.month(), clock.day()), (1970, 1, 1));
        assert_eq!((clock.hour(), clock.minute()), (9, 15));
        Ok(())
    }

    #[test]
    fn test_twelve_hour_without_marker_reads_as_am() -> Result<()> {
        let fmt = DateFormat::new("MM-dd-yyyy hh:mm")?;
        assert_eq!(fmt.parse("03-01-2024 09:30")?.hour(), 9);
        assert_eq!(fmt.parse("03-01-2024 12:30")?.hour(), 0);
        Ok(())
    }

    #[test]
    fn test_parse_failure_is_date_error() -> Result<()> {
        let err = DateFormat::new("yyyy-MM-dd")?.parse("not-a-date").unwrap_err();
        assert!(matches!(err, ColmapError::DateParse { .. }));
        Ok(())
    }

    #[test]
    fn test_bad_patterns_are_configuration_errors() {
        assert!(DateFormat::new("yyyy-'MM").unwrap_err().is_configuration());
        assert!(DateFormat::new("yyyy-QQ").unwrap_err().is_configuration());
    }

    #[test]
    fn test_offsets() -> Result<()> {
        assert_eq!(parse_offset("UTC")?.local_minus_utc(), 0);
        assert_eq!(parse_offset("gmt")?.local_minus_utc(), 0);
        assert_eq!(parse_offset("-05:00")?.local_minus_utc(), -5 * 3600);
        assert_eq!(parse_offset("+0530")?.local_minus_utc(), 5 * 3600 + 30 * 60);
        assert_eq!(parse_offset("GMT+1")?.local_minus_utc(), 3600);
        assert!(parse_offset("America/Chicago").is_err());
        Ok(())
    }

    #[test]
    fn test_zone_shift() -> Result<()> {
        let shift = ZoneShift::new("-05:00", "UTC")?;
        let local = DateFormat::new("yyyy-MM-dd HH:mm:ss")?.parse("2026-03-01 22:30:00")?;
        let shifted = shift.apply(local)?;
        assert_eq!((shifted.day(), shifted.hour(), shifted.minute()), (2, 3, 30));
        Ok(())
    }
}
