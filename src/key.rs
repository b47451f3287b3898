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

//! Module resolving location patterns into concrete keys (file paths)
//! and parsing keys back into the timestamp and tags that produced them.
//!
//! A location pattern mixes literal text, `{tag}` placeholders and
//! strftime date directives, e.g. `{domain}/%Y/%m/%d/hmc.forcing.%Y%m%d%H%M.nc`.
//! Directory separators are plain `/`.

use crate::{
    constants::DEFAULT_YEAR,
    errors::KeyError,
    time::{TimeRequest, TimeSignature},
};
use chrono::{
    format::{Item, StrftimeItems},
    Datelike, NaiveDate, NaiveDateTime, Timelike,
};
use lazy_static::lazy_static;
use regex::Regex;
use std::{collections::BTreeMap, fmt, fmt::Write, path::Path};

/// Mapping from placeholder name to its value.
pub type Tags = BTreeMap<String, String>;

lazy_static! {
    static ref TAG_RE: Regex = Regex::new(r"\{([^{}]+)\}").unwrap();
}

/// Date components that can be parsed back from a key.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
enum DateComponent {
    Year,
    Month,
    Day,
    DayOfYear,
    Hour,
    Minute,
    Second,
}

/// Time-templated location of a family of datasets.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct LocationPattern {
    raw: String,
}

impl LocationPattern {
    pub fn new<S: Into<String>>(raw: S) -> Self {
        LocationPattern { raw: raw.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Pattern text with all `{tag}` placeholders removed.
    fn without_tags(&self) -> String {
        TAG_RE.replace_all(&self.raw, "").into_owned()
    }

    /// A pattern is static when it has neither placeholders nor date directives.
    pub fn is_static(&self) -> bool {
        !self.raw.contains('{') && !self.has_time()
    }

    /// A pattern has time when it contains at least one date directive.
    pub fn has_time(&self) -> bool {
        self.without_tags().contains('%')
    }

    /// Names of the placeholders in order of appearance.
    pub fn tags(&self) -> Vec<String> {
        TAG_RE
            .captures_iter(&self.raw)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
            .collect()
    }

    /// Substitutes tag values into the placeholders. In strict mode a
    /// placeholder without value is an error, otherwise it is left untouched.
    pub fn substitute_tags(&self, tags: &Tags, strict: bool) -> Result<String, KeyError> {
        let mut missing = None;

        let substituted = TAG_RE.replace_all(&self.raw, |caps: &regex::Captures| {
            let name = &caps[1];
            match tags.get(name) {
                Some(value) => value.clone(),
                None => {
                    if missing.is_none() {
                        missing = Some(name.to_string());
                    }
                    caps[0].to_string()
                }
            }
        });

        match missing {
            Some(name) if strict => Err(KeyError::UnresolvedTag(name)),
            _ => Ok(substituted.into_owned()),
        }
    }

    /// New pattern with the given tags substituted.
    pub fn with_tags(&self, tags: &Tags) -> Result<LocationPattern, KeyError> {
        Ok(LocationPattern::new(self.substitute_tags(tags, false)?))
    }

    /// Adjusts the projected time to the directives present in the pattern.
    ///
    /// On yearless patterns the 29th of February is clamped to the 28th when
    /// the requested length exceeds one day. Date components without
    /// directive are then zeroed progressively from seconds up to months.
    pub fn normalize_time(&self, time: NaiveDateTime, length_days: Option<i64>) -> NaiveDateTime {
        let bare = self.without_tags();
        let mut time = time;

        if !bare.contains("%Y")
            && time.month() == 2
            && time.day() == 29
            && length_days.map_or(false, |length| length > 1)
        {
            time = time.with_day(28).unwrap_or(time);
        }

        if !bare.contains("%S") {
            time = time.with_second(0).unwrap_or(time);
            if !bare.contains("%M") {
                time = time.with_minute(0).unwrap_or(time);
                if !bare.contains("%H") {
                    time = time.with_hour(0).unwrap_or(time);
                    if !bare.contains("%d") && !bare.contains("%j") {
                        time = time.with_day(1).unwrap_or(time);
                        if !bare.contains("%m") && !bare.contains("%j") {
                            time = time.with_month(1).unwrap_or(time);
                        }
                    }
                }
            }
        }

        time.with_nanosecond(0).unwrap_or(time)
    }

    /// Resolves the pattern with an already projected time.
    pub fn resolve(&self, time: Option<NaiveDateTime>, tags: &Tags) -> Result<String, KeyError> {
        let key = self.substitute_tags(tags, false)?;

        match time {
            Some(time) => format_time(&key, time),
            None => Ok(key),
        }
    }

    /// Parses a concrete key back into its timestamp and tag values.
    ///
    /// Date components missing from the pattern default to 1900-01-01 00:00:00.
    pub fn extract(&self, path: &str) -> Result<(NaiveDateTime, Tags), KeyError> {
        let (expression, tag_groups, date_groups) = self.build_expression()?;

        let captures = expression
            .captures(path)
            .ok_or_else(|| KeyError::PatternMismatch {
                path: path.to_string(),
                pattern: self.raw.clone(),
            })?;

        let mut tags = Tags::new();
        for (group, name) in &tag_groups {
            if let Some(value) = captures.name(group) {
                tags.insert(name.clone(), value.as_str().to_string());
            }
        }

        let mut year = DEFAULT_YEAR;
        let (mut month, mut day, mut ordinal) = (1, 1, None);
        let (mut hour, mut minute, mut second) = (0, 0, 0);

        for (group, component) in &date_groups {
            let value = match captures.name(group) {
                Some(value) => value.as_str(),
                None => continue,
            };
            let number: u32 = value
                .parse()
                .map_err(|_| KeyError::InvalidDate(value.to_string()))?;

            match component {
                DateComponent::Year => year = number as i32,
                DateComponent::Month => month = number,
                DateComponent::Day => day = number,
                DateComponent::DayOfYear => ordinal = Some(number),
                DateComponent::Hour => hour = number,
                DateComponent::Minute => minute = number,
                DateComponent::Second => second = number,
            }
        }

        let date = match ordinal {
            Some(ordinal) => NaiveDate::from_yo_opt(year, ordinal),
            None => NaiveDate::from_ymd_opt(year, month, day),
        }
        .ok_or_else(|| KeyError::InvalidDate(path.to_string()))?;

        let time = date
            .and_hms_opt(hour, minute, second)
            .ok_or_else(|| KeyError::InvalidDate(path.to_string()))?;

        Ok((time, tags))
    }

    /// Builds the regular expression inverting the pattern together with
    /// the capture group names of tags and date components.
    #[allow(clippy::type_complexity)]
    fn build_expression(
        &self,
    ) -> Result<(Regex, Vec<(String, String)>, Vec<(String, DateComponent)>), KeyError> {
        let mut expression = String::from("^");
        let mut tag_groups: Vec<(String, String)> = vec![];
        let mut date_groups: Vec<(String, DateComponent)> = vec![];

        let mut chars = self.raw.chars();

        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    let mut name = String::new();
                    for next in chars.by_ref() {
                        if next == '}' {
                            break;
                        }
                        name.push(next);
                    }

                    if tag_groups.iter().any(|(_, seen)| *seen == name) {
                        expression.push_str("[^/]+");
                    } else {
                        let group = format!("tag{}", tag_groups.len());
                        write!(expression, "(?P<{}>[^/]+)", group)?;
                        tag_groups.push((group, name));
                    }
                }
                '%' => {
                    let directive = chars
                        .next()
                        .ok_or_else(|| KeyError::InvalidDirective("%".to_string()))?;

                    let (component, width) = match directive {
                        'Y' => (DateComponent::Year, 4),
                        'm' => (DateComponent::Month, 2),
                        'd' => (DateComponent::Day, 2),
                        'j' => (DateComponent::DayOfYear, 3),
                        'H' => (DateComponent::Hour, 2),
                        'M' => (DateComponent::Minute, 2),
                        'S' => (DateComponent::Second, 2),
                        '%' => {
                            expression.push('%');
                            continue;
                        }
                        other => return Err(KeyError::InvalidDirective(format!("%{}", other))),
                    };

                    if date_groups.iter().any(|(_, seen)| *seen == component) {
                        write!(expression, r"\d{{{}}}", width)?;
                    } else {
                        let group = format!("date{}", date_groups.len());
                        write!(expression, r"(?P<{}>\d{{{}}})", group, width)?;
                        date_groups.push((group, component));
                    }
                }
                other => expression.push_str(&regex::escape(&other.to_string())),
            }
        }

        expression.push('$');

        Ok((Regex::new(&expression)?, tag_groups, date_groups))
    }

    /// Longest literal directory prefix of the pattern.
    ///
    /// With a time range, the year is substituted when both bounds share it,
    /// then the month when they also share it, then the day.
    pub fn prefix(
        &self,
        range: Option<(NaiveDateTime, NaiveDateTime)>,
        tags: &Tags,
    ) -> Result<String, KeyError> {
        let mut key = self.raw.clone();

        if let Some((start, end)) = range {
            if start.year() == end.year() {
                key = key.replace("%Y", &format!("{:04}", start.year()));
                if start.month() == end.month() {
                    key = key.replace("%m", &format!("{:02}", start.month()));
                    if start.day() == end.day() {
                        key = key.replace("%d", &format!("{:02}", start.day()));
                    }
                }
            }
        }

        let key = LocationPattern::new(key).substitute_tags(tags, false)?;

        // the file name itself is never part of the prefix
        let mut prefix = parent_dir(&key);
        while prefix.contains('%') || prefix.contains('{') {
            prefix = parent_dir(&prefix);
        }

        Ok(prefix)
    }
}

impl fmt::Display for LocationPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

fn parent_dir(key: &str) -> String {
    Path::new(key)
        .parent()
        .map(|parent| parent.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Formats strftime directives of `template` with `time`.
pub fn format_time(template: &str, time: NaiveDateTime) -> Result<String, KeyError> {
    let items = StrftimeItems::new(template);

    if items.clone().any(|item| item == Item::Error) {
        return Err(KeyError::InvalidDirective(template.to_string()));
    }

    let mut key = String::with_capacity(template.len());
    write!(key, "{}", time.format_with_items(items))?;

    Ok(key)
}

/// Resolves a key for the requested time: the time is projected with the
/// signature, normalized against the pattern directives, and formatted after
/// tag substitution. Without a time the tag-substituted pattern is returned.
pub fn resolve_key(
    pattern: &LocationPattern,
    request: Option<&TimeRequest>,
    signature: Option<TimeSignature>,
    tags: &Tags,
) -> Result<String, KeyError> {
    let time = request.map(|request| {
        let projected = signature.unwrap_or(TimeSignature::Start).project(request);
        pattern.normalize_time(projected, request.length_days())
    });

    pattern.resolve(time, tags)
}

#[cfg(test)]
mod tests {
    use super::{resolve_key, LocationPattern, Tags};
    use crate::time::{TimeRequest, TimeSignature};
    use chrono::NaiveDate;

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn static_and_time_patterns() {
        assert!(LocationPattern::new("/data/marche.dem.txt").is_static());
        assert!(!LocationPattern::new("/data/{domain}.dem.txt").is_static());
        assert!(!LocationPattern::new("/data/{domain}.dem.txt").has_time());
        assert!(LocationPattern::new("/data/%Y/rain_%Y%m%d.tif").has_time());
    }

    #[test]
    fn resolve_round_trip() {
        let pattern = LocationPattern::new("/data/{domain}/%Y/%m/hmc.forcing.%Y%m%d%H%M.nc");
        let time = NaiveDate::from_ymd_opt(2024, 10, 17)
            .and_then(|d| d.and_hms_opt(6, 45, 12))
            .unwrap();
        let request = TimeRequest::from(time);
        let tags = tags(&[("domain", "marche")]);

        let key = resolve_key(&pattern, Some(&request), Some(TimeSignature::Step), &tags).unwrap();
        assert_eq!(key, "/data/marche/2024/10/hmc.forcing.202410170645.nc");

        let (extracted_time, extracted_tags) = pattern.extract(&key).unwrap();
        assert_eq!(
            extracted_time,
            NaiveDate::from_ymd_opt(2024, 10, 17)
                .and_then(|d| d.and_hms_opt(6, 45, 0))
                .unwrap()
        );
        assert_eq!(extracted_tags, tags);
    }

    #[test]
    fn extract_defaults_and_mismatch() {
        let pattern = LocationPattern::new("/data/{var}_%m.tif");

        let (time, tags) = pattern.extract("/data/rain_03.tif").unwrap();
        assert_eq!(
            time,
            NaiveDate::from_ymd_opt(1900, 3, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap()
        );
        assert_eq!(tags.get("var").map(String::as_str), Some("rain"));

        assert!(pattern.extract("/data/rain_3.tif").is_err());
        assert!(pattern.extract("/other/rain_03.tif").is_err());
    }

    #[test]
    fn strict_substitution() {
        let pattern = LocationPattern::new("/data/{domain}/{var}.txt");
        let partial = tags(&[("domain", "marche")]);

        assert_eq!(
            pattern.substitute_tags(&partial, false).unwrap(),
            "/data/marche/{var}.txt"
        );
        assert!(pattern.substitute_tags(&partial, true).is_err());
    }

    #[test]
    fn leap_day_clamping() {
        let yearless = LocationPattern::new("/clim/tmean_%m%d.tif");
        let dated = LocationPattern::new("/data/tmean_%Y%m%d.tif");

        let leap = TimeRequest::Interval {
            start: NaiveDate::from_ymd_opt(2024, 2, 29)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 3, 2)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap(),
        };
        let day_before = TimeRequest::Interval {
            start: NaiveDate::from_ymd_opt(2024, 2, 28)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 3, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap(),
        };

        let empty = Tags::new();
        let signature = Some(TimeSignature::Start);

        assert_eq!(
            resolve_key(&yearless, Some(&leap), signature, &empty).unwrap(),
            resolve_key(&yearless, Some(&day_before), signature, &empty).unwrap()
        );
        assert_eq!(
            resolve_key(&dated, Some(&leap), signature, &empty).unwrap(),
            "/data/tmean_20240229.tif"
        );

        let single_day = TimeRequest::day(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert_eq!(
            resolve_key(&yearless, Some(&single_day), signature, &empty).unwrap(),
            "/clim/tmean_0229.tif"
        );
    }

    #[test]
    fn progressive_zeroing() {
        let pattern = LocationPattern::new("/data/rain_%Y.tif");
        let time = NaiveDate::from_ymd_opt(2024, 7, 15)
            .and_then(|d| d.and_hms_opt(13, 30, 10))
            .unwrap();

        assert_eq!(
            pattern.normalize_time(time, None),
            NaiveDate::from_ymd_opt(2024, 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap()
        );

        let hourly = LocationPattern::new("/data/rain_%Y%m%d%H.tif");
        assert_eq!(
            hourly.normalize_time(time, None),
            NaiveDate::from_ymd_opt(2024, 7, 15)
                .and_then(|d| d.and_hms_opt(13, 0, 0))
                .unwrap()
        );
    }

    #[test]
    fn directory_prefix() {
        let pattern = LocationPattern::new("/data/{domain}/%Y/%m/%d/rain_%Y%m%d%H.tif");
        let tags = tags(&[("domain", "marche")]);

        assert_eq!(pattern.prefix(None, &tags).unwrap(), "/data/marche");

        let same_month = (
            NaiveDate::from_ymd_opt(2024, 10, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap(),
            NaiveDate::from_ymd_opt(2024, 10, 17)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap(),
        );
        assert_eq!(
            pattern.prefix(Some(same_month), &tags).unwrap(),
            "/data/marche/2024/10"
        );

        let same_day = (
            NaiveDate::from_ymd_opt(2024, 10, 17)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap(),
            NaiveDate::from_ymd_opt(2024, 10, 17)
                .and_then(|d| d.and_hms_opt(23, 0, 0))
                .unwrap(),
        );
        assert_eq!(
            pattern.prefix(Some(same_day), &tags).unwrap(),
            "/data/marche/2024/10/17"
        );

        let unresolved = LocationPattern::new("/data/{domain}/rain.tif");
        assert_eq!(unresolved.prefix(None, &Tags::new()).unwrap(), "/data");
    }

    #[test]
    fn static_key_prefix_is_its_directory() {
        let pattern = LocationPattern::new("/data/static/dem.asc");
        assert_eq!(pattern.prefix(None, &Tags::new()).unwrap(), "/data/static");

        let bare = LocationPattern::new("dem.asc");
        assert_eq!(bare.prefix(None, &Tags::new()).unwrap(), "");
    }
}
