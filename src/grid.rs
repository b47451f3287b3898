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

//! Module with the in-memory representation of gridded data.
//!
//! A [`Grid`] is a labelled n-dimensional array: named dimensions, one
//! coordinate per dimension, values and string attributes. Several grids
//! sharing coordinates form a [`GridSet`], and any data moved between
//! datasets and processes travels as a [`Payload`].

mod bisection;
mod payload;
mod select;
mod straighten;
mod template;

pub use bisection::{find_left_closest, find_nearest, find_right_closest};
pub use payload::{map_over_container, GridSet, Payload, PayloadKind, Table};
pub use select::{select_by_time, select_variables, VariableSelection, TIME_ATTR};
pub use straighten::{
    map_coords, map_dims, map_vars, set_type, straighten_data, straighten_dims, straighten_time,
    DataType,
};
pub use template::{Template, CRS_ATTR};

use crate::{
    constants::{LAT_NAMES, LON_NAMES, TIME_NAMES},
    errors::GridError,
    Float,
};
use chrono::NaiveDateTime;
use indexmap::IndexMap;
use ndarray::{Array1, Array2, ArrayD, Axis, Ix2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Attribute holding the no-data value of a grid.
pub const FILL_VALUE_ATTR: &str = "_FillValue";

/// Coordinate values attached to a dimension.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Coord {
    /// Regular one-dimensional axis.
    Axis(Array1<Float>),

    /// Two-dimensional coordinate (e.g. longitudes of a curvilinear grid)
    /// indexed by (latitude, longitude).
    Mesh(Array2<Float>),

    /// Time axis with real dates.
    Time(Vec<NaiveDateTime>),
}

impl Coord {
    pub fn len(&self) -> usize {
        match self {
            Coord::Axis(values) => values.len(),
            Coord::Mesh(values) => values.len(),
            Coord::Time(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Labelled array, the equivalent of a single raster variable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    pub name: String,
    pub dims: Vec<String>,
    pub coords: IndexMap<String, Coord>,
    pub values: ArrayD<Float>,
    pub attrs: BTreeMap<String, String>,
}

impl Grid {
    /// Creates a (latitude, longitude) grid.
    pub fn new_2d(
        name: &str,
        lats: Array1<Float>,
        lons: Array1<Float>,
        values: Array2<Float>,
    ) -> Result<Self, GridError> {
        if values.dim() != (lats.len(), lons.len()) {
            return Err(GridError::Mismatch(format!(
                "values of shape {:?} do not fit {} latitudes and {} longitudes",
                values.dim(),
                lats.len(),
                lons.len()
            )));
        }

        let mut coords = IndexMap::new();
        coords.insert("latitude".to_string(), Coord::Axis(lats));
        coords.insert("longitude".to_string(), Coord::Axis(lons));

        Ok(Grid {
            name: name.to_string(),
            dims: vec!["latitude".to_string(), "longitude".to_string()],
            coords,
            values: values.into_dyn(),
            attrs: BTreeMap::new(),
        })
    }

    /// Creates a (time, latitude, longitude) grid.
    pub fn new_3d(
        name: &str,
        times: Vec<NaiveDateTime>,
        lats: Array1<Float>,
        lons: Array1<Float>,
        values: ArrayD<Float>,
    ) -> Result<Self, GridError> {
        let expected = [times.len(), lats.len(), lons.len()];
        if values.shape() != expected {
            return Err(GridError::Mismatch(format!(
                "values of shape {:?} do not fit {:?}",
                values.shape(),
                expected
            )));
        }

        let mut coords = IndexMap::new();
        coords.insert("time".to_string(), Coord::Time(times));
        coords.insert("latitude".to_string(), Coord::Axis(lats));
        coords.insert("longitude".to_string(), Coord::Axis(lons));

        Ok(Grid {
            name: name.to_string(),
            dims: vec![
                "time".to_string(),
                "latitude".to_string(),
                "longitude".to_string(),
            ],
            coords,
            values,
            attrs: BTreeMap::new(),
        })
    }

    /// Grid of the same geometry filled with `value`.
    pub fn full_like(&self, value: Float) -> Self {
        let mut grid = self.clone();
        grid.values.fill(value);
        grid
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn dim_index(&self, name: &str) -> Option<usize> {
        self.dims.iter().position(|dim| dim == name)
    }

    fn find_dim(&self, candidates: &[&str]) -> Option<String> {
        self.dims
            .iter()
            .find(|dim| candidates.contains(&dim.as_str()))
            .cloned()
    }

    /// Name of the longitude (x) dimension.
    pub fn lon_dim(&self) -> Option<String> {
        self.find_dim(&LON_NAMES)
    }

    /// Name of the latitude (y) dimension.
    pub fn lat_dim(&self) -> Option<String> {
        self.find_dim(&LAT_NAMES)
    }

    /// Name of the time dimension, if any.
    pub fn time_dim(&self) -> Option<String> {
        self.dims
            .iter()
            .find(|dim| {
                TIME_NAMES.contains(&dim.as_str())
                    || matches!(self.coords.get(dim.as_str()), Some(Coord::Time(_)))
            })
            .cloned()
    }

    /// One-dimensional coordinate values of a dimension.
    pub fn axis(&self, name: &str) -> Result<&Array1<Float>, GridError> {
        match self.coords.get(name) {
            Some(Coord::Axis(values)) => Ok(values),
            _ => Err(GridError::MissingCoordinate(name.to_string())),
        }
    }

    pub fn lons(&self) -> Result<&Array1<Float>, GridError> {
        let dim = self
            .lon_dim()
            .ok_or_else(|| GridError::MissingDimension("longitude".to_string()))?;
        self.axis(&dim)
    }

    pub fn lats(&self) -> Result<&Array1<Float>, GridError> {
        let dim = self
            .lat_dim()
            .ok_or_else(|| GridError::MissingDimension("latitude".to_string()))?;
        self.axis(&dim)
    }

    /// Dates of the time axis, if the grid has one.
    pub fn times(&self) -> Option<&[NaiveDateTime]> {
        let dim = self.time_dim()?;
        match self.coords.get(&dim) {
            Some(Coord::Time(times)) => Some(times),
            _ => None,
        }
    }

    pub fn fill_value(&self) -> Option<Float> {
        self.attrs
            .get(FILL_VALUE_ATTR)
            .and_then(|value| value.parse().ok())
    }

    pub fn set_attr<V: ToString>(&mut self, key: &str, value: V) {
        self.attrs.insert(key.to_string(), value.to_string());
    }

    /// Renames a dimension together with its coordinate.
    pub fn rename_dim(&mut self, old: &str, new: &str) {
        if old == new {
            return;
        }

        for dim in self.dims.iter_mut() {
            if dim == old {
                *dim = new.to_string();
            }
        }

        if let Some(index) = self.coords.get_index_of(old) {
            if let Some((_, coord)) = self.coords.shift_remove_index(index) {
                self.coords.insert(new.to_string(), coord);
                let last = self.coords.len() - 1;
                self.coords.move_index(last, index);
            }
        }
    }

    /// Values as a (latitude, longitude) array. Grids with a time
    /// axis of length one are reduced to their only step.
    pub fn spatial_values(&self) -> Result<Array2<Float>, GridError> {
        let mut values = self.values.clone();

        if let Some(time_dim) = self.time_dim() {
            let axis = self
                .dim_index(&time_dim)
                .ok_or_else(|| GridError::MissingDimension(time_dim.clone()))?;

            if values.shape()[axis] != 1 {
                return Err(GridError::Mismatch(format!(
                    "grid {} has {} time steps, expected one",
                    self.name,
                    values.shape()[axis]
                )));
            }
            values = values.index_axis_move(Axis(axis), 0);
        }

        Ok(values.into_dimensionality::<Ix2>()?)
    }

    /// Bounding box as (min lon, max lon, min lat, max lat).
    pub fn bbox(&self) -> Result<(Float, Float, Float, Float), GridError> {
        let lons = self.lons()?;
        let lats = self.lats()?;

        let min = |values: &Array1<Float>| values.iter().cloned().fold(Float::NAN, Float::min);
        let max = |values: &Array1<Float>| values.iter().cloned().fold(Float::NAN, Float::max);

        Ok((min(lons), max(lons), min(lats), max(lats)))
    }

    /// Median absolute spacing of the longitude and latitude axes.
    pub fn resolution(&self) -> Result<(Float, Float), GridError> {
        Ok((median_spacing(self.lons()?), median_spacing(self.lats()?)))
    }
}

fn median_spacing(values: &Array1<Float>) -> Float {
    let mut steps: Vec<Float> = values
        .windows(2)
        .into_iter()
        .map(|pair| (pair[1] - pair[0]).abs())
        .filter(|step| step.is_finite())
        .collect();

    if steps.is_empty() {
        return 0.0;
    }

    steps.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    steps[steps.len() / 2]
}

/// Replaces the latitude/longitude coordinates of `grid` with those of the
/// reference (relabelling only, no interpolation).
///
/// Shapes must match. Bounding boxes must agree within half a reference cell;
/// otherwise the mismatch is logged and either raised (`strict`) or the grid
/// is returned unchanged.
pub fn match_coords_to_reference(
    grid: Grid,
    reference: &Grid,
    strict: bool,
) -> Result<Grid, GridError> {
    let (lons, lats) = (grid.lons()?, grid.lats()?);
    let (ref_lons, ref_lats) = (reference.lons()?, reference.lats()?);

    if lons.len() != ref_lons.len() || lats.len() != ref_lats.len() {
        return Err(GridError::Mismatch(format!(
            "grid {} has shape ({}, {}) and reference ({}, {})",
            grid.name,
            lats.len(),
            lons.len(),
            ref_lats.len(),
            ref_lons.len()
        )));
    }

    if lons == ref_lons && lats == ref_lats {
        return Ok(grid);
    }

    let bbox = grid.bbox()?;
    let ref_bbox = reference.bbox()?;
    let (res_lon, res_lat) = reference.resolution()?;
    let (tol_lon, tol_lat) = (res_lon / 2.0, res_lat / 2.0);

    let within = (bbox.0 - ref_bbox.0).abs() <= tol_lon
        && (bbox.1 - ref_bbox.1).abs() <= tol_lon
        && (bbox.2 - ref_bbox.2).abs() <= tol_lat
        && (bbox.3 - ref_bbox.3).abs() <= tol_lat;

    if !within {
        let message = format!(
            "bounding box {:?} of {} differs from reference {:?}",
            bbox, grid.name, ref_bbox
        );
        if strict {
            return Err(GridError::Mismatch(message));
        }
        log::warn!("Coordinates not aligned: {}", message);
        return Ok(grid);
    }

    log::debug!("Snapping coordinates of {} to the reference grid", grid.name);

    let mut grid = grid;
    let lon_dim = grid
        .lon_dim()
        .ok_or_else(|| GridError::MissingDimension("longitude".to_string()))?;
    let lat_dim = grid
        .lat_dim()
        .ok_or_else(|| GridError::MissingDimension("latitude".to_string()))?;

    grid.coords.insert(lon_dim, Coord::Axis(ref_lons.clone()));
    grid.coords.insert(lat_dim, Coord::Axis(ref_lats.clone()));

    Ok(grid)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{match_coords_to_reference, Coord, Grid};
    use crate::Float;
    use ndarray::{Array1, Array2};

    /// Regular grid with descending latitudes used across the tests.
    pub(crate) fn sample_grid(name: &str, rows: usize, cols: usize, value: Float) -> Grid {
        let lats = Array1::linspace(43.9, 43.9 - 0.1 * (rows - 1) as Float, rows);
        let lons = Array1::linspace(12.0, 12.0 + 0.1 * (cols - 1) as Float, cols);
        Grid::new_2d(name, lats, lons, Array2::from_elem((rows, cols), value)).unwrap()
    }

    #[test]
    fn rename_keeps_order() {
        let mut grid = sample_grid("air_t", 2, 3, 1.0);
        grid.rename_dim("latitude", "south_north");

        assert_eq!(grid.dims, vec!["south_north", "longitude"]);
        assert_eq!(grid.coords.keys().next().map(String::as_str), Some("south_north"));
        assert_eq!(grid.lat_dim().as_deref(), Some("south_north"));
    }

    #[test]
    fn snap_within_tolerance() {
        let reference = sample_grid("ref", 3, 3, 0.0);
        let mut shifted = reference.clone();
        if let Some(Coord::Axis(lons)) = shifted.coords.get_mut("longitude") {
            lons.mapv_inplace(|lon| lon + 0.01);
        }

        let snapped = match_coords_to_reference(shifted, &reference, true).unwrap();
        assert_eq!(snapped.lons().unwrap(), reference.lons().unwrap());
    }

    #[test]
    fn mismatch_is_raised_when_strict() {
        let reference = sample_grid("ref", 3, 3, 0.0);
        let mut shifted = reference.clone();
        if let Some(Coord::Axis(lons)) = shifted.coords.get_mut("longitude") {
            lons.mapv_inplace(|lon| lon + 1.0);
        }

        assert!(match_coords_to_reference(shifted.clone(), &reference, true).is_err());

        let untouched = match_coords_to_reference(shifted.clone(), &reference, false).unwrap();
        assert_eq!(untouched, shifted);

        let smaller = sample_grid("small", 2, 3, 0.0);
        assert!(match_coords_to_reference(smaller, &reference, false).is_err());
    }

    #[test]
    fn spatial_values_of_single_step() {
        let grid = sample_grid("air_t", 2, 2, 4.0);
        let values = grid.spatial_values().unwrap();
        assert_eq!(values.dim(), (2, 2));
    }
}
