/*
Copyright 2025 Jakub Lewandowski

This file is part of Shybox.

Shybox is a free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation; either version 3 of the License, or
(at your option) any later version.

Shybox is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with Shybox. If not, see https://www.gnu.org/licenses/.
*/

//! Module handling timestamps requested by callers and
//! the regular time grids expected from datasets.
//!
//! A caller can request data for a single instant or for a half-open
//! interval `[start, end)`. Each dataset then projects that request onto the
//! single instant encoded in its file names, according to its [`TimeSignature`].

mod grid;
mod signature;

pub use grid::{date_range, ExpectedTimeGrid, TimeDirection, TimeFrequency, TimeStepKind};
pub use signature::TimeSignature;

use crate::errors::TimeError;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::fmt;

/// Accepted textual representations of datetimes in configuration
/// files and on the command line.
const DATETIME_FORMATS: [&str; 5] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y%m%d%H%M",
];

/// Time requested from a dataset.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TimeRequest {
    /// A single instant.
    Instant(NaiveDateTime),

    /// Half-open interval `[start, end)`, e.g. a day or a month of data.
    Interval {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
}

impl TimeRequest {
    /// Interval covering the whole day of `date`.
    pub fn day(date: NaiveDate) -> Self {
        let start = floor_to_midnight(date_to_datetime(date));
        TimeRequest::Interval {
            start,
            end: start + Duration::days(1),
        }
    }

    /// First instant covered by the request.
    pub fn start(&self) -> NaiveDateTime {
        match *self {
            TimeRequest::Instant(time) => time,
            TimeRequest::Interval { start, .. } => start,
        }
    }

    /// Length of an interval request counted in (started) days.
    pub fn length_days(&self) -> Option<i64> {
        match *self {
            TimeRequest::Instant(_) => None,
            TimeRequest::Interval { start, end } => {
                let seconds = (end - start).num_seconds();
                Some((seconds + 86_399) / 86_400)
            }
        }
    }
}

impl From<NaiveDateTime> for TimeRequest {
    fn from(time: NaiveDateTime) -> Self {
        TimeRequest::Instant(time)
    }
}

impl fmt::Display for TimeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeRequest::Instant(time) => write!(f, "{}", time),
            TimeRequest::Interval { start, end } => write!(f, "[{}, {})", start, end),
        }
    }
}

/// Parses datetime written in any of the accepted formats.
/// A bare date is interpreted as its midnight.
pub fn parse_datetime(text: &str) -> Result<NaiveDateTime, TimeError> {
    let text = text.trim();

    for format in DATETIME_FORMATS {
        if let Ok(time) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(time);
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Ok(date_to_datetime(date));
    }

    Err(TimeError::InvalidDatetime(text.to_string()))
}

/// Truncates the time of day.
pub fn floor_to_midnight(time: NaiveDateTime) -> NaiveDateTime {
    time.date().and_hms_opt(0, 0, 0).unwrap_or(time)
}

#[allow(deprecated)]
fn date_to_datetime(date: NaiveDate) -> NaiveDateTime {
    date.and_hms(0, 0, 0)
}

/// Serde helpers deserializing datetimes with [`parse_datetime`].
pub mod serde_datetime {
    use super::parse_datetime;
    use chrono::NaiveDateTime;
    use serde::{de::Error, Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        parse_datetime(&text).map_err(D::Error::custom)
    }

    pub mod option {
        use super::parse_datetime;
        use chrono::NaiveDateTime;
        use serde::{de::Error, Deserialize, Deserializer};

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let text: Option<String> = Option::deserialize(deserializer)?;

            match text {
                Some(text) => parse_datetime(&text).map(Some).map_err(D::Error::custom),
                None => Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_datetime, TimeRequest};
    use chrono::NaiveDate;

    #[test]
    fn parse_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 10, 17)
            .and_then(|d| d.and_hms_opt(6, 0, 0))
            .unwrap();

        assert_eq!(parse_datetime("2024-10-17 06:00").unwrap(), expected);
        assert_eq!(parse_datetime("2024-10-17T06:00:00").unwrap(), expected);
        assert_eq!(parse_datetime("202410170600").unwrap(), expected);
        assert_eq!(
            parse_datetime("2024-10-17").unwrap(),
            NaiveDate::from_ymd_opt(2024, 10, 17)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap()
        );
        assert!(parse_datetime("17/10/2024").is_err());
    }

    #[test]
    fn interval_length() {
        let day = TimeRequest::day(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert_eq!(day.length_days(), Some(1));

        let month = TimeRequest::Interval {
            start: NaiveDate::from_ymd_opt(2024, 2, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 3, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap(),
        };
        assert_eq!(month.length_days(), Some(29));

        let instant = TimeRequest::from(
            NaiveDate::from_ymd_opt(2024, 2, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap(),
        );
        assert_eq!(instant.length_days(), None);
    }
}
