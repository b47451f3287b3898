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

//! Time signature policies of datasets.

use super::TimeRequest;
use crate::errors::TimeError;
use chrono::{Duration, NaiveDateTime};
use serde::Deserialize;
use std::{convert::TryFrom, fmt, str::FromStr};

/// Policy selecting which instant of a requested time
/// is encoded in a dataset key.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Deserialize)]
#[serde(try_from = "String")]
pub enum TimeSignature {
    Start,
    End,
    EndPlusOne,
    Current,
    Step,
    Period,
    Constant,
    Unique,
    Single,
}

impl TimeSignature {
    /// Projects the requested time onto the single instant
    /// used to resolve a key.
    ///
    /// Instants are returned unchanged. For intervals `start` gives the first
    /// instant, `end` the last second inside the interval and `end+1` the start
    /// of the following interval. Other signatures behave like `start`.
    pub fn project(&self, request: &TimeRequest) -> NaiveDateTime {
        match *request {
            TimeRequest::Instant(time) => time,
            TimeRequest::Interval { start, end } => match self {
                TimeSignature::End => end - Duration::seconds(1),
                TimeSignature::EndPlusOne => end,
                _ => start,
            },
        }
    }

    /// Whether the dataset is bound to a fixed reference time.
    pub fn is_single(&self) -> bool {
        matches!(self, TimeSignature::Single | TimeSignature::Unique)
    }
}

impl FromStr for TimeSignature {
    type Err = TimeError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text.trim().to_lowercase().as_str() {
            "start" => Ok(TimeSignature::Start),
            "end" => Ok(TimeSignature::End),
            "end+1" => Ok(TimeSignature::EndPlusOne),
            "current" => Ok(TimeSignature::Current),
            "step" => Ok(TimeSignature::Step),
            "period" => Ok(TimeSignature::Period),
            "constant" => Ok(TimeSignature::Constant),
            "unique" => Ok(TimeSignature::Unique),
            "single" => Ok(TimeSignature::Single),
            _ => Err(TimeError::InvalidSignature(text.to_string())),
        }
    }
}

impl TryFrom<String> for TimeSignature {
    type Error = TimeError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        text.parse()
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimeSignature::Start => "start",
            TimeSignature::End => "end",
            TimeSignature::EndPlusOne => "end+1",
            TimeSignature::Current => "current",
            TimeSignature::Step => "step",
            TimeSignature::Period => "period",
            TimeSignature::Constant => "constant",
            TimeSignature::Unique => "unique",
            TimeSignature::Single => "single",
        };

        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::TimeSignature;
    use crate::time::TimeRequest;
    use chrono::NaiveDate;

    #[test]
    fn parse_signatures() {
        assert_eq!("end+1".parse::<TimeSignature>().unwrap(), TimeSignature::EndPlusOne);
        assert_eq!("Step".parse::<TimeSignature>().unwrap(), TimeSignature::Step);
        assert!("middle".parse::<TimeSignature>().is_err());
    }

    #[test]
    fn project_interval() {
        let request = TimeRequest::day(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap());

        assert_eq!(
            TimeSignature::Start.project(&request),
            NaiveDate::from_ymd_opt(2024, 1, 31)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap()
        );
        assert_eq!(
            TimeSignature::End.project(&request),
            NaiveDate::from_ymd_opt(2024, 1, 31)
                .and_then(|d| d.and_hms_opt(23, 59, 59))
                .unwrap()
        );
        assert_eq!(
            TimeSignature::EndPlusOne.project(&request),
            NaiveDate::from_ymd_opt(2024, 2, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap()
        );
    }

    #[test]
    fn project_instant() {
        let time = NaiveDate::from_ymd_opt(2024, 1, 31)
            .and_then(|d| d.and_hms_opt(6, 0, 0))
            .unwrap();
        assert_eq!(TimeSignature::End.project(&TimeRequest::from(time)), time);
    }
}
