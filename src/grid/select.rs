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

//! Selection of time steps and variables out of read payloads.

use super::{find_left_closest, GridSet, Payload};
use crate::{errors::GridError, grid::Grid};
use chrono::{Duration, NaiveDateTime};
use ndarray::Axis;
use std::str::FromStr;

/// Attribute holding the time of a selected step.
pub const TIME_ATTR: &str = "time";

/// Index of the time step matching `time`: the closest step not after it
/// within `tolerance`, or else the closest step after it within `tolerance`.
fn match_time(times: &[NaiveDateTime], time: NaiveDateTime, tolerance: Duration) -> Option<usize> {
    let previous = find_left_closest(times, &time)
        .ok()
        .filter(|index| times[*index] <= time && time - times[*index] <= tolerance);

    if previous.is_some() {
        return previous;
    }

    times
        .iter()
        .enumerate()
        .map(|(index, step)| (index, (*step - time).num_seconds().abs()))
        .filter(|(_, distance)| *distance <= tolerance.num_seconds())
        .min_by_key(|(_, distance)| *distance)
        .map(|(index, _)| index)
}

fn select_grid(mut grid: Grid, time: NaiveDateTime, tolerance: Duration) -> Option<Grid> {
    let time_dim = match grid.time_dim() {
        Some(dim) => dim,
        None => return Some(grid),
    };
    let axis = grid.dim_index(&time_dim)?;

    let times = match grid.times() {
        Some(times) => times.to_vec(),
        None => {
            log::warn!(
                "Time axis of {} holds no dates, time selection is skipped",
                grid.name
            );
            return Some(grid);
        }
    };

    let index = match match_time(&times, time, tolerance) {
        Some(index) => index,
        None => {
            log::debug!("Time {} is not available in {}", time, grid.name);
            return None;
        }
    };

    grid.values = grid.values.index_axis_move(Axis(axis), index);
    grid.dims.remove(axis);
    grid.coords.shift_remove(&time_dim);
    grid.set_attr(TIME_ATTR, times[index].format("%Y-%m-%d %H:%M:%S"));

    Some(grid)
}

/// Selects the step matching `time` in every grid of the payload and drops
/// the time dimension. Grids without time dimension are returned as they are.
///
/// Returns `None` when no grid holds the requested time.
pub fn select_by_time(
    payload: Payload,
    time: Option<NaiveDateTime>,
    tolerance: Duration,
) -> Option<Payload> {
    let time = match time {
        Some(time) => time,
        None => return Some(payload),
    };

    match payload {
        Payload::Grid(grid) => select_grid(grid, time, tolerance).map(Payload::Grid),
        Payload::Set(set) => {
            let mut selected = GridSet {
                vars: Default::default(),
                attrs: set.attrs,
            };
            for (_, grid) in set.vars {
                if let Some(grid) = select_grid(grid, time, tolerance) {
                    selected.insert(grid);
                }
            }
            if selected.is_empty() {
                None
            } else {
                Some(Payload::Set(selected))
            }
        }
        other => Some(other),
    }
}

/// Variable selection written as `new_name:variable`.
///
/// An empty variable picks the first variable of a set; an empty new name
/// keeps the variable name.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct VariableSelection {
    pub new_name: Option<String>,
    pub variable: Option<String>,
}

impl FromStr for VariableSelection {
    type Err = GridError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut parts = text.splitn(2, ':');
        let non_empty = |part: Option<&str>| {
            part.map(str::trim)
                .filter(|part| !part.is_empty())
                .map(String::from)
        };

        let new_name = non_empty(parts.next());
        let variable = non_empty(parts.next());

        if new_name.is_none() && variable.is_none() {
            return Err(GridError::MissingVariable(text.to_string()));
        }

        Ok(VariableSelection { new_name, variable })
    }
}

/// Extracts a single variable from the payload and renames it.
pub fn select_variables(payload: Payload, selection: &VariableSelection) -> Result<Payload, GridError> {
    let grid = match payload {
        Payload::Set(mut set) => match &selection.variable {
            Some(variable) => set
                .vars
                .shift_remove(variable)
                .ok_or_else(|| GridError::MissingVariable(variable.clone()))?,
            None => set
                .vars
                .shift_remove_index(0)
                .map(|(_, grid)| grid)
                .ok_or_else(|| GridError::EmptySelection("empty variable set".to_string()))?,
        },
        Payload::Grid(grid) => {
            if let Some(variable) = &selection.variable {
                if *variable != grid.name {
                    return Err(GridError::MissingVariable(variable.clone()));
                }
            }
            grid
        }
        other => return Ok(other),
    };

    Ok(Payload::Grid(match &selection.new_name {
        Some(name) => grid.with_name(name),
        None => grid,
    }))
}

#[cfg(test)]
mod tests {
    use super::{select_by_time, select_variables, VariableSelection};
    use crate::grid::{tests::sample_grid, Grid, GridSet, Payload};
    use chrono::{Duration, NaiveDate, NaiveDateTime};
    use ndarray::{Array1, ArrayD, IxDyn};

    fn hourly_grid(start: NaiveDateTime, steps: usize) -> Grid {
        let times = (0..steps as i64)
            .map(|step| start + Duration::hours(step))
            .collect();
        let values = ArrayD::from_shape_fn(IxDyn(&[steps, 2, 2]), |index| index[0] as f64);
        Grid::new_3d(
            "air_t",
            times,
            Array1::linspace(44.0, 43.9, 2),
            Array1::linspace(12.0, 12.1, 2),
            values,
        )
        .unwrap()
    }

    #[test]
    fn nearest_previous_step() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap();
        let grid = hourly_grid(start, 6);

        let selected = select_by_time(
            Payload::Grid(grid.clone()),
            Some(start + Duration::minutes(150)),
            Duration::hours(1),
        )
        .unwrap()
        .into_grid()
        .unwrap();

        assert_eq!(selected.dims, vec!["latitude", "longitude"]);
        assert!(selected.values.iter().all(|v| *v == 2.0));
        assert_eq!(selected.attrs["time"], "2024-01-01 02:00:00");

        let before = select_by_time(
            Payload::Grid(grid.clone()),
            Some(start - Duration::minutes(30)),
            Duration::hours(1),
        );
        assert!(before.is_some());

        let outside = select_by_time(
            Payload::Grid(grid),
            Some(start + Duration::hours(12)),
            Duration::hours(1),
        );
        assert!(outside.is_none());
    }

    #[test]
    fn static_grid_is_kept() {
        let grid = sample_grid("dem", 2, 2, 1.0);
        let time = NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap();
        let selected = select_by_time(Payload::Grid(grid.clone()), Some(time), Duration::hours(1));
        assert_eq!(selected, Some(Payload::Grid(grid)));
    }

    #[test]
    fn select_and_rename() {
        let set: GridSet = vec![sample_grid("2t", 2, 2, 1.0), sample_grid("tp", 2, 2, 2.0)]
            .into_iter()
            .collect();

        let selection: VariableSelection = "rain:tp".parse().unwrap();
        let grid = select_variables(Payload::Set(set.clone()), &selection)
            .unwrap()
            .into_grid()
            .unwrap();
        assert_eq!(grid.name, "rain");
        assert!(grid.values.iter().all(|v| *v == 2.0));

        let first: VariableSelection = "air_t:".parse().unwrap();
        let grid = select_variables(Payload::Set(set.clone()), &first)
            .unwrap()
            .into_grid()
            .unwrap();
        assert_eq!(grid.name, "air_t");

        let missing: VariableSelection = "x:wind".parse().unwrap();
        assert!(select_variables(Payload::Set(set), &missing).is_err());
        assert!(":".parse::<VariableSelection>().is_err());
    }
}
