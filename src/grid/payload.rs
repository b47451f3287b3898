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

//! Containers exchanged between datasets, codecs and processes.

use super::Grid;
use crate::errors::GridError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// Several variables sharing the same coordinates.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GridSet {
    pub vars: IndexMap<String, Grid>,
    pub attrs: BTreeMap<String, String>,
}

impl GridSet {
    pub fn new() -> Self {
        GridSet::default()
    }

    /// Adds a variable, replacing any variable with the same name.
    pub fn insert(&mut self, grid: Grid) {
        self.vars.insert(grid.name.clone(), grid);
    }

    pub fn get(&self, name: &str) -> Option<&Grid> {
        self.vars.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.vars.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// First variable of the set, used as the geometric reference.
    pub fn first(&self) -> Option<&Grid> {
        self.vars.values().next()
    }
}

impl FromIterator<Grid> for GridSet {
    fn from_iter<I: IntoIterator<Item = Grid>>(iter: I) -> Self {
        let mut set = GridSet::new();
        for grid in iter {
            set.insert(grid);
        }
        set
    }
}

/// Plain table of string cells with a header row.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn column(&self, name: &str) -> Option<Vec<&str>> {
        let index = self.headers.iter().position(|header| header == name)?;
        Some(
            self.rows
                .iter()
                .map(|row| row.get(index).map(String::as_str).unwrap_or(""))
                .collect(),
        )
    }
}

/// Any data read from or written to a dataset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Grid(Grid),
    Set(GridSet),
    Table(Table),
    Text(String),
    Json(serde_json::Value),
}

/// Container type of a payload, used to check format compatibility.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum PayloadKind {
    Grid,
    Set,
    Table,
    Text,
    Json,
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PayloadKind::Grid => "grid",
            PayloadKind::Set => "grid set",
            PayloadKind::Table => "table",
            PayloadKind::Text => "text",
            PayloadKind::Json => "json",
        };
        write!(f, "{}", name)
    }
}

impl Payload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Grid(_) => PayloadKind::Grid,
            Payload::Set(_) => PayloadKind::Set,
            Payload::Table(_) => PayloadKind::Table,
            Payload::Text(_) => PayloadKind::Text,
            Payload::Json(_) => PayloadKind::Json,
        }
    }

    pub fn is_gridded(&self) -> bool {
        matches!(self, Payload::Grid(_) | Payload::Set(_))
    }

    /// Whether there is nothing to process in the payload.
    pub fn is_empty(&self) -> bool {
        match self {
            Payload::Grid(grid) => grid.values.is_empty(),
            Payload::Set(set) => set.is_empty(),
            Payload::Table(table) => table.rows.is_empty(),
            Payload::Text(text) => text.is_empty(),
            Payload::Json(value) => value.is_null(),
        }
    }

    /// Reduces a single-variable set to its grid.
    pub fn squeeze(self) -> Payload {
        match self {
            Payload::Set(mut set) if set.len() == 1 => match set.vars.pop() {
                Some((_, mut grid)) => {
                    for (key, value) in set.attrs {
                        grid.attrs.entry(key).or_insert(value);
                    }
                    Payload::Grid(grid)
                }
                None => Payload::Set(set),
            },
            other => other,
        }
    }

    /// All grids of the payload.
    pub fn grids(&self) -> Vec<&Grid> {
        match self {
            Payload::Grid(grid) => vec![grid],
            Payload::Set(set) => set.vars.values().collect(),
            _ => vec![],
        }
    }

    /// First grid of the payload, the one describing its geometry.
    pub fn first_grid(&self) -> Option<&Grid> {
        match self {
            Payload::Grid(grid) => Some(grid),
            Payload::Set(set) => set.first(),
            _ => None,
        }
    }

    pub fn into_grid(self) -> Result<Grid, GridError> {
        match self.squeeze() {
            Payload::Grid(grid) => Ok(grid),
            Payload::Set(set) => Err(GridError::Mismatch(format!(
                "expected a single variable, found {:?}",
                set.names()
            ))),
            other => Err(GridError::Mismatch(format!(
                "expected a grid, found {}",
                other.kind()
            ))),
        }
    }

    /// Sets an attribute on the payload (on every variable of a set).
    pub fn set_attr(&mut self, key: &str, value: &str) {
        match self {
            Payload::Grid(grid) => grid.set_attr(key, value),
            Payload::Set(set) => {
                set.attrs.insert(key.to_string(), value.to_string());
                for grid in set.vars.values_mut() {
                    grid.set_attr(key, value);
                }
            }
            _ => {}
        }
    }
}

/// Applies a per-grid transformation to every member of a payload,
/// keeping the container shape. Non gridded payloads are returned unchanged.
pub fn map_over_container<F>(payload: Payload, mut function: F) -> Result<Payload, GridError>
where
    F: FnMut(Grid) -> Result<Grid, GridError>,
{
    match payload {
        Payload::Grid(grid) => Ok(Payload::Grid(function(grid)?)),
        Payload::Set(set) => {
            let mut mapped = GridSet {
                vars: IndexMap::with_capacity(set.vars.len()),
                attrs: set.attrs,
            };
            for (_, grid) in set.vars {
                mapped.insert(function(grid)?);
            }
            Ok(Payload::Set(mapped))
        }
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::{map_over_container, GridSet, Payload};
    use crate::grid::tests::sample_grid;

    #[test]
    fn map_keeps_shape() {
        let set: GridSet = vec![sample_grid("a", 2, 2, 1.0), sample_grid("b", 2, 2, 2.0)]
            .into_iter()
            .collect();

        let mapped = map_over_container(Payload::Set(set), |mut grid| {
            grid.values.mapv_inplace(|v| v * 10.0);
            Ok(grid)
        })
        .unwrap();

        match mapped {
            Payload::Set(set) => {
                assert_eq!(set.names(), vec!["a", "b"]);
                assert!(set.get("b").unwrap().values.iter().all(|v| *v == 20.0));
            }
            other => panic!("unexpected payload {:?}", other.kind()),
        }
    }

    #[test]
    fn squeeze_single_variable() {
        let set: GridSet = vec![sample_grid("a", 2, 2, 1.0)].into_iter().collect();
        assert!(matches!(Payload::Set(set).squeeze(), Payload::Grid(_)));
    }
}
