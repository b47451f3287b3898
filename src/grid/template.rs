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

//! Cached geometry of a dataset.

use super::{Coord, Grid, GridSet, Payload, FILL_VALUE_ATTR};
use crate::{constants::DEFAULT_CRS_WKT, errors::GridError, Float};
use indexmap::IndexMap;
use ndarray::{Array1, ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

/// Attribute holding the coordinate reference system.
pub const CRS_ATTR: &str = "crs";

/// Minimal metadata needed to rebuild the spatial grid of a dataset
/// without reading any file.
///
/// Only the spatial dimensions are stored. Coordinates are assumed
/// evenly spaced between their start and end values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub crs: String,
    pub fill_value: Option<Float>,
    pub dims_names: Vec<String>,
    pub dims_starts: IndexMap<String, Float>,
    pub dims_ends: IndexMap<String, Float>,
    pub dims_lengths: IndexMap<String, usize>,
    pub variables: Vec<String>,
}

impl Template {
    /// Builds the template from the first grid of a payload.
    pub fn from_payload(payload: &Payload) -> Result<Self, GridError> {
        let grid = payload
            .first_grid()
            .ok_or_else(|| GridError::Mismatch(format!("{} has no geometry", payload.kind())))?;

        let mut template = Template::from_grid(grid)?;
        template.variables = payload.grids().iter().map(|g| g.name.clone()).collect();

        Ok(template)
    }

    pub fn from_grid(grid: &Grid) -> Result<Self, GridError> {
        let lat_dim = grid
            .lat_dim()
            .ok_or_else(|| GridError::MissingDimension("latitude".to_string()))?;
        let lon_dim = grid
            .lon_dim()
            .ok_or_else(|| GridError::MissingDimension("longitude".to_string()))?;

        let mut template = Template {
            crs: grid
                .attrs
                .get(CRS_ATTR)
                .cloned()
                .unwrap_or_else(|| DEFAULT_CRS_WKT.to_string()),
            fill_value: grid.fill_value(),
            dims_names: vec![lat_dim.clone(), lon_dim.clone()],
            dims_starts: IndexMap::new(),
            dims_ends: IndexMap::new(),
            dims_lengths: IndexMap::new(),
            variables: vec![grid.name.clone()],
        };

        for dim in [lat_dim, lon_dim] {
            let axis = grid.axis(&dim)?;
            let (first, last) = match (axis.first(), axis.last()) {
                (Some(first), Some(last)) => (*first, *last),
                _ => return Err(GridError::EmptySelection(format!("empty axis {}", dim))),
            };
            template.dims_starts.insert(dim.clone(), first);
            template.dims_ends.insert(dim.clone(), last);
            template.dims_lengths.insert(dim, axis.len());
        }

        Ok(template)
    }

    /// Evenly spaced coordinate values of a template dimension.
    pub fn coordinate(&self, dim: &str) -> Result<Array1<Float>, GridError> {
        match (
            self.dims_starts.get(dim),
            self.dims_ends.get(dim),
            self.dims_lengths.get(dim),
        ) {
            (Some(start), Some(end), Some(length)) => Ok(Array1::linspace(*start, *end, *length)),
            _ => Err(GridError::MissingCoordinate(dim.to_string())),
        }
    }

    pub fn shape(&self) -> Vec<usize> {
        self.dims_names
            .iter()
            .map(|dim| self.dims_lengths.get(dim).copied().unwrap_or(0))
            .collect()
    }

    /// Materializes a grid of the template geometry filled with `value`
    /// (the fill value when none is given).
    pub fn build_array(&self, name: &str, value: Option<Float>) -> Result<Grid, GridError> {
        let value = value.or(self.fill_value).unwrap_or(Float::NAN);

        let mut coords = IndexMap::new();
        for dim in &self.dims_names {
            coords.insert(dim.clone(), Coord::Axis(self.coordinate(dim)?));
        }

        let mut grid = Grid {
            name: name.to_string(),
            dims: self.dims_names.clone(),
            coords,
            values: ArrayD::from_elem(IxDyn(&self.shape()), value),
            attrs: Default::default(),
        };
        self.stamp(&mut grid);

        Ok(grid)
    }

    /// Materializes every template variable as a set.
    pub fn build_set(&self, value: Option<Float>) -> Result<GridSet, GridError> {
        self.variables
            .iter()
            .map(|name| self.build_array(name, value))
            .collect()
    }

    /// Snaps the spatial coordinates of `grid` onto the template,
    /// so that every read of the dataset shares bit-identical coordinates.
    /// Non spatial coordinates (time) are kept from the data.
    pub fn apply(&self, mut grid: Grid) -> Result<Grid, GridError> {
        let found = [grid.lat_dim(), grid.lon_dim()];

        for (dim, current) in self.dims_names.iter().zip(found) {
            let current = current.ok_or_else(|| GridError::MissingDimension(dim.clone()))?;
            grid.rename_dim(&current, dim);

            let axis = self.coordinate(dim)?;
            let length = grid.axis(dim)?.len();

            if length != axis.len() {
                return Err(GridError::Mismatch(format!(
                    "dimension {} of {} has length {}, template expects {}",
                    dim,
                    grid.name,
                    length,
                    axis.len()
                )));
            }

            grid.coords.insert(dim.clone(), Coord::Axis(axis));
        }

        self.stamp(&mut grid);
        Ok(grid)
    }

    fn stamp(&self, grid: &mut Grid) {
        grid.set_attr(CRS_ATTR, &self.crs);
        if let Some(fill_value) = self.fill_value {
            grid.set_attr(FILL_VALUE_ATTR, fill_value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Template;
    use crate::grid::{tests::sample_grid, Coord, Payload};

    #[test]
    fn build_array_restores_geometry() {
        let grid = sample_grid("air_t", 10, 10, 1.0);
        let template = Template::from_payload(&Payload::Grid(grid.clone())).unwrap();

        let rebuilt = template.build_array("air_t", Some(0.0)).unwrap();

        assert_eq!(rebuilt.values.shape(), &[10, 10]);
        assert_eq!(rebuilt.lats().unwrap()[0], grid.lats().unwrap()[0]);
        assert_eq!(rebuilt.lons().unwrap()[9], grid.lons().unwrap()[9]);
        assert_eq!(Template::from_grid(&rebuilt).unwrap().dims_ends, template.dims_ends);
    }

    #[test]
    fn apply_removes_coordinate_drift() {
        let grid = sample_grid("air_t", 4, 5, 1.0);
        let template = Template::from_grid(&grid).unwrap();

        let mut drifted = grid.clone();
        if let Some(Coord::Axis(lats)) = drifted.coords.get_mut("latitude") {
            lats.mapv_inplace(|lat| lat + 1e-9);
        }

        let first = template.apply(drifted).unwrap();
        let second = template.apply(grid).unwrap();
        assert_eq!(first.coords, second.coords);
    }

    #[test]
    fn apply_rejects_other_shapes() {
        let template = Template::from_grid(&sample_grid("a", 4, 5, 1.0)).unwrap();
        assert!(template.apply(sample_grid("a", 5, 5, 1.0)).is_err());
    }
}
