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


//! Processes of tabular time series.

use super::ProcessInput;
use crate::{
    errors::ProcessError,
    grid::{Payload, Table},
    time::parse_datetime,
    Float,
};
use chrono::NaiveDateTime;

const TIME_COLUMN: &str = "time";
const TAG_COLUMN: &str = "tag";

/// Unique values of the `tag` column of a registry, in order of appearance.
fn registry_tags(table: &Table, name: &str) -> Vec<String> {
    let column = match table.column(TAG_COLUMN) {
        Some(column) => column,
        None => {
            log::error!("Column {} not found in registry {}", TAG_COLUMN, name);
            return vec![];
        }
    };

    let mut tags: Vec<String> = vec![];
    for tag in column {
        if !tag.is_empty() && !tags.iter().any(|known| known == tag) {
            tags.push(tag.to_string());
        }
    }
    tags
}

fn optional_table(input: &ProcessInput, name: &str) -> Result<Option<Table>, ProcessError> {
    match input.args.get(name) {
        None => Ok(None),
        Some(Payload::Table(table)) => Ok(Some(table.clone())),
        Some(other) => Err(ProcessError::InvalidParameter(format!(
            "{} must be a table, found {}",
            name,
            other.kind()
        ))),
    }
}

/// Joins a table of time series with the section registries.
///
/// The rows of the series are sorted by `time`; unreadable times are
/// dropped and for repeated times the last row wins. When the series has
/// one column per section of the model registry (`sections_hmc`) the
/// columns take the section tags. Columns missing from the database
/// registry (`sections_db`) are dropped. Cells which are not numbers, or
/// equal `no_data_value`, are written as `fill_value`.
pub fn join_time_series_by_registry(input: &ProcessInput) -> Result<Payload, ProcessError> {
    let params = input.params;
    let fill_value = params.get_f64("fill_value", -9999.0)?;
    let no_data_value = params.get_f64("no_data_value", -9999.0)?;

    let data = match input.first()? {
        Payload::Table(table) if !table.rows.is_empty() => table,
        Payload::Table(_) => {
            return Err(ProcessError::InvalidParameter(
                "time series table is empty".to_string(),
            ))
        }
        other => {
            return Err(ProcessError::InvalidParameter(format!(
                "time series must be a table, found {}",
                other.kind()
            )))
        }
    };

    let sections_hmc = optional_table(input, "sections_hmc")?;
    let sections_db = optional_table(input, "sections_db")?;

    let names_domain = match &sections_hmc {
        Some(table) if !table.rows.is_empty() => registry_tags(table, "sections_hmc"),
        _ => {
            log::warn!("Model sections are empty, series columns keep their names");
            vec![]
        }
    };
    let names_db = match &sections_db {
        Some(table) => registry_tags(table, "sections_db"),
        None => vec![],
    };
    if names_db.is_empty() {
        return Err(ProcessError::InvalidParameter(
            "database registry has no section tags".to_string(),
        ));
    }

    let missing: Vec<&String> = names_domain
        .iter()
        .filter(|tag| !names_db.contains(tag))
        .collect();
    if !missing.is_empty() {
        log::warn!("Sections missing from the database registry: {:?}", missing);
    }

    let time_index = data
        .headers
        .iter()
        .position(|header| header == TIME_COLUMN)
        .ok_or_else(|| ProcessError::MissingArgument(TIME_COLUMN.to_string()))?;

    let mut columns: Vec<(usize, String)> = data
        .headers
        .iter()
        .enumerate()
        .filter(|(index, _)| *index != time_index)
        .map(|(index, header)| (index, header.clone()))
        .collect();

    if columns.len() == names_domain.len() {
        for ((_, header), tag) in columns.iter_mut().zip(&names_domain) {
            *header = tag.clone();
        }
    } else if !names_domain.is_empty() {
        log::warn!(
            "Series has {} columns and the model registry {} sections",
            columns.len(),
            names_domain.len()
        );
    }

    let dropped: Vec<String> = columns
        .iter()
        .filter(|(_, header)| !names_db.contains(header))
        .map(|(_, header)| header.clone())
        .collect();
    if !dropped.is_empty() {
        log::warn!("Removed columns not found in registry: {:?}", dropped);
    }
    columns.retain(|(_, header)| names_db.contains(header));

    let mut rows: Vec<(NaiveDateTime, &Vec<String>)> = data
        .rows
        .iter()
        .filter_map(|row| {
            let text = row.get(time_index)?;
            match parse_datetime(text) {
                Ok(time) => Some((time, row)),
                Err(_) => {
                    log::debug!("Dropping row with unreadable time {}", text);
                    None
                }
            }
        })
        .collect();

    // stable sort, so the last of repeated times is the last read
    rows.sort_by_key(|(time, _)| *time);
    let mut unique: Vec<(NaiveDateTime, &Vec<String>)> = Vec::with_capacity(rows.len());
    for (time, row) in rows {
        match unique.last_mut() {
            Some(last) if last.0 == time => *last = (time, row),
            _ => unique.push((time, row)),
        }
    }

    let cell = |text: Option<&String>| -> String {
        let value = text
            .and_then(|text| text.trim().parse::<Float>().ok())
            .filter(|value| value.is_finite() && *value != no_data_value)
            .unwrap_or(fill_value);
        value.to_string()
    };

    let mut headers = vec![TIME_COLUMN.to_string()];
    headers.extend(columns.iter().map(|(_, header)| header.clone()));

    let rows = unique
        .into_iter()
        .map(|(time, row)| {
            let mut out = vec![time.format("%Y-%m-%d %H:%M").to_string()];
            out.extend(columns.iter().map(|(index, _)| cell(row.get(*index))));
            out
        })
        .collect();

    log::debug!("Joined {} time series over {} sections", headers.len() - 1, names_db.len());
    Ok(Payload::Table(Table { headers, rows }))
}
