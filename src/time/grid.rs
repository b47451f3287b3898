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

//! Regular time grids: frequencies, date ranges and
//! the expected time grid of a dataset.

use super::floor_to_midnight;
use crate::errors::TimeError;
use chrono::{Duration, NaiveDateTime};
use serde::Deserialize;
use std::{convert::TryFrom, fmt, str::FromStr};

/// Fixed-length time frequency, e.g. `1h`, `3h`, `15min`, `1D`.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Deserialize)]
#[serde(try_from = "String")]
pub struct TimeFrequency {
    seconds: i64,
}

impl TimeFrequency {
    pub fn hourly() -> Self {
        TimeFrequency { seconds: 3600 }
    }

    pub fn daily() -> Self {
        TimeFrequency { seconds: 86_400 }
    }

    pub fn from_duration(duration: Duration) -> Result<Self, TimeError> {
        let seconds = duration.num_seconds();

        if seconds <= 0 {
            return Err(TimeError::InvalidFrequency(format!("{} s", seconds)));
        }

        Ok(TimeFrequency { seconds })
    }

    pub fn duration(&self) -> Duration {
        Duration::seconds(self.seconds)
    }
}

impl FromStr for TimeFrequency {
    type Err = TimeError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        let split = text
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or_else(|| text.len());
        let (count, unit) = text.split_at(split);

        let count: i64 = if count.is_empty() {
            1
        } else {
            count
                .parse()
                .map_err(|_| TimeError::InvalidFrequency(text.to_string()))?
        };

        let unit_seconds = match unit {
            "s" | "S" => 1,
            "min" | "T" => 60,
            "h" | "H" => 3600,
            "d" | "D" => 86_400,
            "w" | "W" => 604_800,
            _ => return Err(TimeError::InvalidFrequency(text.to_string())),
        };

        TimeFrequency::from_duration(Duration::seconds(count * unit_seconds))
    }
}

impl TryFrom<String> for TimeFrequency {
    type Error = TimeError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        text.parse()
    }
}

impl fmt::Display for TimeFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.seconds % 86_400 == 0 {
            write!(f, "{}D", self.seconds / 86_400)
        } else if self.seconds % 3600 == 0 {
            write!(f, "{}h", self.seconds / 3600)
        } else if self.seconds % 60 == 0 {
            write!(f, "{}min", self.seconds / 60)
        } else {
            write!(f, "{}s", self.seconds)
        }
    }
}

/// Direction in which the expected grid extends from its reference.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeDirection {
    Forward,
    Backward,
    Single,
}

impl Default for TimeDirection {
    fn default() -> Self {
        TimeDirection::Forward
    }
}

impl FromStr for TimeDirection {
    type Err = TimeError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text.trim().to_lowercase().as_str() {
            "forward" => Ok(TimeDirection::Forward),
            "backward" => Ok(TimeDirection::Backward),
            "single" => Ok(TimeDirection::Single),
            _ => Err(TimeError::InvalidDirection(text.to_string())),
        }
    }
}

/// Inclusive range of regularly spaced datetimes.
pub fn date_range(
    start: NaiveDateTime,
    end: NaiveDateTime,
    freq: TimeFrequency,
) -> Vec<NaiveDateTime> {
    let mut steps = vec![];
    let mut current = start;

    while current <= end {
        steps.push(current);
        current += freq.duration();
    }

    steps
}

/// Which step of the expected grid is requested.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum TimeStepKind {
    Start,
    End,
    Current(NaiveDateTime),
}

/// Ordered sequence of timestamps a dataset is expected to provide.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ExpectedTimeGrid {
    steps: Vec<NaiveDateTime>,
}

impl ExpectedTimeGrid {
    /// Builds the grid of `period` steps spaced by `freq`, starting at
    /// (`forward`) or ending at (`backward`) the reference time.
    ///
    /// With `normalize` the reference is first truncated to midnight.
    pub fn new(
        reference: NaiveDateTime,
        period: usize,
        freq: TimeFrequency,
        direction: TimeDirection,
        normalize: bool,
    ) -> Self {
        let reference = if normalize {
            floor_to_midnight(reference)
        } else {
            reference
        };

        let period = period.max(1) as i32;

        let steps = match direction {
            TimeDirection::Forward => (0..period)
                .map(|step| reference + freq.duration() * step)
                .collect(),
            TimeDirection::Backward => (0..period)
                .rev()
                .map(|step| reference - freq.duration() * step)
                .collect(),
            TimeDirection::Single => vec![reference],
        };

        ExpectedTimeGrid { steps }
    }

    pub fn steps(&self) -> &[NaiveDateTime] {
        &self.steps
    }

    /// Returns the index of `time` in the grid
    /// and whether it is a member at all.
    pub fn check_time_step(&self, time: NaiveDateTime) -> (Option<usize>, bool) {
        match self.steps.binary_search(&time) {
            Ok(index) => (Some(index), true),
            Err(_) => (None, false),
        }
    }

    /// Returns the requested step together with its index.
    pub fn get_time_step(&self, kind: TimeStepKind) -> Option<(NaiveDateTime, usize)> {
        match kind {
            TimeStepKind::Start => self.steps.first().map(|time| (*time, 0)),
            TimeStepKind::End => self
                .steps
                .last()
                .map(|time| (*time, self.steps.len() - 1)),
            TimeStepKind::Current(time) => match self.check_time_step(time) {
                (Some(index), true) => Some((time, index)),
                _ => None,
            },
        }
    }
}
