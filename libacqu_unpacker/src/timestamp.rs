use serde::{Deserialize, Serialize};
use time::macros::{format_description, time};
use time::{Date, Duration, Month, PrimitiveDateTime};

use super::error::TimestampError;

/// Daylight saving rules understood by the resolver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DstRule {
    None,
    /// Summer time from the last Sunday of March to the last Sunday of October, switching
    /// at 01:00 UTC
    EuropeanUnion,
}

/// The zone the DAQ clock was running in when a header was written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeZoneRule {
    pub standard_offset_hours: i8,
    pub dst: DstRule,
}

impl Default for TimeZoneRule {
    /// Central European Time
    fn default() -> Self {
        Self {
            standard_offset_hours: 1,
            dst: DstRule::EuropeanUnion,
        }
    }
}

/// Settles a local time which occurs twice at the end of summer time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DstException {
    /// Header time string, e.g. "Sun Oct 25 02:30:00 2015"
    pub time: String,
    /// Whether the DAQ clock was still on summer time
    pub dst: bool,
}

/// Parse the ctime-like string of an Acqu header, e.g. "Mon Jun  1 12:00:00 2015"
pub fn parse_header_time(time_str: &str) -> Result<PrimitiveDateTime, TimestampError> {
    let format = format_description!(
        "[weekday repr:short] [month repr:short] [day padding:space] [hour]:[minute]:[second] [year]"
    );
    PrimitiveDateTime::parse(time_str.trim(), format)
        .map_err(|e| TimestampError::InvalidTime(time_str.to_string(), e))
}

fn last_sunday(year: i32, month: Month) -> Result<Date, TimestampError> {
    // March and October both have 31 days
    let last = Date::from_calendar_date(year, month, 31)?;
    Ok(last - Duration::days(last.weekday().number_days_from_sunday() as i64))
}

impl TimeZoneRule {
    fn is_dst(&self, utc: PrimitiveDateTime) -> Result<bool, TimestampError> {
        match self.dst {
            DstRule::None => Ok(false),
            DstRule::EuropeanUnion => {
                let year = utc.year();
                let start = PrimitiveDateTime::new(last_sunday(year, Month::March)?, time!(1:00));
                let end = PrimitiveDateTime::new(last_sunday(year, Month::October)?, time!(1:00));
                Ok(utc >= start && utc < end)
            }
        }
    }

    /// Convert a local wall-clock time to a unix timestamp.
    ///
    /// A local time which exists in both standard and summer time is looked up in
    /// `exceptions`; if it is not listed this fails with `UnknownDst`. A local time which
    /// was skipped by the spring switch is taken as standard time.
    pub fn resolve(
        &self,
        local: PrimitiveDateTime,
        exceptions: &[DstException],
    ) -> Result<i64, TimestampError> {
        let standard = local - Duration::hours(self.standard_offset_hours as i64);
        let summer = standard - Duration::HOUR;
        let standard_valid = !self.is_dst(standard)?;
        let summer_valid = self.dst != DstRule::None && self.is_dst(summer)?;

        let utc = match (standard_valid, summer_valid) {
            (true, false) => standard,
            (false, true) => summer,
            (true, true) => {
                let mut listed = None;
                for exception in exceptions {
                    if parse_header_time(&exception.time)? == local {
                        listed = Some(exception.dst);
                        break;
                    }
                }
                match listed {
                    Some(true) => summer,
                    Some(false) => standard,
                    None => return Err(TimestampError::UnknownDst(local.to_string())),
                }
            }
            (false, false) => {
                spdlog::warn!("Local time {local} does not exist, taking it as standard time");
                standard
            }
        };
        Ok(utc.assume_utc().unix_timestamp())
    }
}

/// Parse and resolve a header time string in one go
pub fn header_timestamp(
    time_str: &str,
    rule: &TimeZoneRule,
    exceptions: &[DstException],
) -> Result<i64, TimestampError> {
    rule.resolve(parse_header_time(time_str)?, exceptions)
}
