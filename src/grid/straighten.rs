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

//! Normalization steps applied to every gridded read, so that all data
//! reach the processes with the same orientation and naming.

use super::{Coord, Grid, FILL_VALUE_ATTR};
use crate::{
    errors::GridError,
    time::{TimeDirection, TimeFrequency},
    Float,
};
use chrono::NaiveDateTime;
use float_cmp::approx_eq;
use indexmap::IndexMap;
use ndarray::{Array1, Axis};
use std::fmt;

/// Attribute holding the storage type of a grid.
pub const DTYPE_ATTR: &str = "dtype";

/// Drops grids without any value and squeezes dimensions of length one
/// that are neither spatial nor time.
pub fn straighten_dims(grid: Grid) -> Option<Grid> {
    if grid.dims.is_empty() || grid.values.is_empty() {
        return None;
    }

    let mut grid = grid;
    let spatial = [grid.lat_dim(), grid.lon_dim(), grid.time_dim()];

    let squeezed: Vec<usize> = grid
        .dims
        .iter()
        .enumerate()
        .filter(|(index, dim)| {
            grid.values.shape()[*index] == 1 && !spatial.iter().flatten().any(|s| s == *dim)
        })
        .map(|(index, _)| index)
        .collect();

    for index in squeezed.into_iter().rev() {
        let dim = grid.dims.remove(index);
        grid.coords.shift_remove(&dim);
        grid.values = grid.values.index_axis_move(Axis(index), 0);
    }

    Some(grid)
}

/// Renames dimensions through the `dims_geo` table.
pub fn map_dims(mut grid: Grid, dims_geo: &IndexMap<String, String>) -> Grid {
    for (dim_in, dim_out) in dims_geo {
        if grid.dim_index(dim_in).is_some() {
            grid.rename_dim(dim_in, dim_out);
        }
    }
    grid
}

/// Renames coordinates through the `coords_geo` table.
///
/// Two-dimensional coordinates are collapsed to the axis along which they
/// vary; the dimension they vary along takes the new name.
pub fn map_coords(
    mut grid: Grid,
    coords_geo: &IndexMap<String, String>,
) -> Result<Grid, GridError> {
    for (coord_in, coord_out) in coords_geo {
        let coord = match grid.coords.get(coord_in) {
            Some(coord) => coord.clone(),
            None => continue,
        };

        match coord {
            Coord::Mesh(mesh) => {
                grid.coords.shift_remove(coord_in);

                let (axis, varying) = collapse_mesh(&mesh).ok_or_else(|| {
                    GridError::Mismatch(format!(
                        "cannot map coordinates {} to {}",
                        coord_in, coord_out
                    ))
                })?;

                let ndim = grid.dims.len();
                if ndim < 2 {
                    return Err(GridError::MissingDimension(coord_out.clone()));
                }
                let dim = grid.dims[ndim - 2 + varying].clone();

                grid.rename_dim(&dim, coord_out);
                grid.coords.insert(coord_out.clone(), Coord::Axis(axis));
            }
            _ => {
                if grid.dim_index(coord_in).is_some() {
                    grid.rename_dim(coord_in, coord_out);
                } else if let Some(coord) = grid.coords.shift_remove(coord_in) {
                    grid.coords.insert(coord_out.clone(), coord);
                }
            }
        }
    }

    Ok(grid)
}

/// Axis of a (rows, cols) coordinate mesh, together with the index (0 rows,
/// 1 columns) of the dimension along which it varies.
fn collapse_mesh(mesh: &ndarray::Array2<Float>) -> Option<(Array1<Float>, usize)> {
    let first_row = mesh.row(0).to_owned();
    let first_col = mesh.column(0).to_owned();

    let constant = |values: &Array1<Float>| match values.first() {
        Some(first) => values.iter().all(|v| approx_eq!(Float, *v, *first, ulps = 4)),
        None => true,
    };

    match (constant(&first_row), constant(&first_col)) {
        (false, true) => Some((first_row, 1)),
        (true, false) => Some((first_col, 0)),
        _ => None,
    }
}

/// Renames the variable through the `vars_data` table. The table works in
/// both directions; a grid whose name is in neither side is discarded.
pub fn map_vars(mut grid: Grid, vars_data: &IndexMap<String, String>) -> Option<Grid> {
    if vars_data.is_empty() {
        return Some(grid);
    }

    for (var_in, var_out) in vars_data {
        if *var_in == grid.name {
            grid.name = var_out.clone();
            return Some(grid);
        } else if *var_out == grid.name {
            grid.name = var_in.clone();
            return Some(grid);
        }
    }

    None
}

/// Brings the grid to (time,) latitude, longitude order with
/// descending latitudes and longitudes in the -180..180 range.
pub fn straighten_data(mut grid: Grid) -> Result<Grid, GridError> {
    let lat_dim = grid
        .lat_dim()
        .ok_or_else(|| GridError::MissingDimension("latitude".to_string()))?;
    let lon_dim = grid
        .lon_dim()
        .ok_or_else(|| GridError::MissingDimension("longitude".to_string()))?;

    for dim in [&lat_dim, &lon_dim] {
        if let Some(Coord::Mesh(mesh)) = grid.coords.get(dim.as_str()) {
            let axis = if dim == &lon_dim {
                mesh.row(0).to_owned()
            } else {
                mesh.column(0).to_owned()
            };
            grid.coords.insert(dim.clone(), Coord::Axis(axis));
        }
    }

    let mut order: Vec<usize> = (0..grid.dims.len())
        .filter(|index| grid.dims[*index] != lat_dim && grid.dims[*index] != lon_dim)
        .collect();
    let lat_index = grid
        .dim_index(&lat_dim)
        .ok_or_else(|| GridError::MissingDimension(lat_dim.clone()))?;
    let lon_index = grid
        .dim_index(&lon_dim)
        .ok_or_else(|| GridError::MissingDimension(lon_dim.clone()))?;
    order.push(lat_index);
    order.push(lon_index);

    if order.iter().enumerate().any(|(position, index)| position != *index) {
        let values = std::mem::take(&mut grid.values);
        grid.values = values.permuted_axes(order.clone()).as_standard_layout().to_owned();
        grid.dims = order.iter().map(|index| grid.dims[*index].clone()).collect();
    }

    let lats = grid.axis(&lat_dim)?.clone();
    if let (Some(first), Some(last)) = (lats.first(), lats.last()) {
        if first < last {
            let axis = Axis(grid.dims.len() - 2);
            grid.values.invert_axis(axis);
            grid.values = grid.values.as_standard_layout().to_owned();
            let reversed: Array1<Float> = lats.iter().rev().cloned().collect();
            grid.coords.insert(lat_dim.clone(), Coord::Axis(reversed));
        }
    }

    let lons = grid.axis(&lon_dim)?.clone();
    let lon_max = lons.iter().cloned().fold(Float::NAN, Float::max);
    if lon_max > 180.0 {
        let wrapped: Array1<Float> = lons.mapv(|lon| (lon + 180.0).rem_euclid(360.0) - 180.0);
        let mut indices: Vec<usize> = (0..wrapped.len()).collect();
        indices.sort_by(|a, b| {
            wrapped[*a]
                .partial_cmp(&wrapped[*b])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        grid.values = grid.values.select(Axis(grid.dims.len() - 1), &indices);
        let sorted: Array1<Float> = indices.iter().map(|index| wrapped[*index]).collect();
        grid.coords.insert(lon_dim.clone(), Coord::Axis(sorted));
    }

    grid.rename_dim(&lat_dim, "latitude");
    grid.rename_dim(&lon_dim, "longitude");

    Ok(grid)
}

/// Replaces a numeric time axis with dates synthesized from the reference
/// time of the file, spaced by `freq`, starting at (`forward`) or ending at
/// (`backward`) the reference.
pub fn straighten_time(
    mut grid: Grid,
    reference: Option<NaiveDateTime>,
    direction: TimeDirection,
    freq: TimeFrequency,
) -> Result<Grid, GridError> {
    let time_dim = match grid.time_dim() {
        Some(dim) => dim,
        None => return Ok(grid),
    };

    let length = match grid.coords.get(&time_dim) {
        Some(Coord::Time(_)) => return Ok(grid),
        Some(coord) => coord.len(),
        None => grid
            .dim_index(&time_dim)
            .map(|index| grid.values.shape()[index])
            .unwrap_or(0),
    };

    let reference = match reference {
        Some(reference) => reference,
        None => {
            log::warn!(
                "Time values of {} are not dates and no time reference is defined",
                grid.name
            );
            return Ok(grid);
        }
    };

    let steps: Vec<NaiveDateTime> = match direction {
        TimeDirection::Backward => (0..length as i32)
            .rev()
            .map(|step| reference - freq.duration() * step)
            .collect(),
        _ => (0..length as i32)
            .map(|step| reference + freq.duration() * step)
            .collect(),
    };

    grid.coords.insert(time_dim, Coord::Time(steps));
    Ok(grid)
}

/// Smallest storage type able to hold the values of a grid.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum DataType {
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
}

impl DataType {
    /// Infers the type from the finite values of a grid (no-data excluded).
    pub fn infer(values: impl Iterator<Item = Float> + Clone) -> Self {
        let finite = values.filter(|v| v.is_finite());

        let integer = finite.clone().all(|v| v.fract() == 0.0);
        let min = finite.clone().fold(Float::INFINITY, Float::min);
        let max = finite.fold(Float::NEG_INFINITY, Float::max);

        const LIMIT: Float = 2_147_483_648.0;

        if !integer || min > max {
            if max < LIMIT && min > -LIMIT {
                return DataType::Float32;
            }
            return DataType::Float64;
        }

        if min >= 0.0 {
            match max {
                m if m <= 255.0 => DataType::UInt8,
                m if m <= 65_535.0 => DataType::UInt16,
                m if m < LIMIT => DataType::UInt32,
                _ => DataType::UInt64,
            }
        } else if max <= 127.0 && min >= -128.0 {
            DataType::Int8
        } else if max <= 32_767.0 && min >= -32_768.0 {
            DataType::Int16
        } else if max < LIMIT && min > -LIMIT {
            DataType::Int32
        } else {
            DataType::Int64
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }

    /// No-data value used when none is configured.
    pub fn default_fill(&self) -> Float {
        match self {
            DataType::UInt8 => u8::MAX as Float,
            DataType::UInt16 => u16::MAX as Float,
            DataType::UInt32 => u32::MAX as Float,
            DataType::UInt64 => u64::MAX as Float,
            DataType::Int8 => i8::MAX as Float,
            DataType::Int16 => i16::MAX as Float,
            DataType::Int32 => i32::MAX as Float,
            DataType::Int64 => i64::MAX as Float,
            DataType::Float32 | DataType::Float64 => Float::NAN,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::UInt8 => "uint8",
            DataType::UInt16 => "uint16",
            DataType::UInt32 => "uint32",
            DataType::UInt64 => "uint64",
            DataType::Int8 => "int8",
            DataType::Int16 => "int16",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
        };
        write!(f, "{}", name)
    }
}

fn same_value(a: Float, b: Float) -> bool {
    (a.is_nan() && b.is_nan()) || approx_eq!(Float, a, b, epsilon = 1e-8)
}

/// Records the smallest storage type of the grid and normalizes its
/// no-data value: values equal to the current fill value are replaced with
/// `nan_value`, or with NaN (floats) or the type maximum (integers).
pub fn set_type(mut grid: Grid, nan_value: Option<Float>) -> Grid {
    let fill_value = grid.fill_value();

    let data = grid
        .values
        .iter()
        .cloned()
        .filter(move |v| fill_value.map_or(true, |fill| !same_value(*v, fill)));
    let dtype = DataType::infer(data);

    if dtype == DataType::Float32 {
        grid.values.mapv_inplace(|v| v as f32 as Float);
    }

    let new_fill = nan_value.unwrap_or_else(|| dtype.default_fill());

    if let Some(fill) = fill_value {
        if !same_value(fill, new_fill) {
            grid.values.mapv_inplace(|v| if same_value(v, fill) { new_fill } else { v });
        }
    }

    grid.set_attr(FILL_VALUE_ATTR, new_fill);
    grid.set_attr(DTYPE_ATTR, dtype);
    grid
}

#[cfg(test)]
mod tests {
    use super::{
        map_coords, map_dims, map_vars, set_type, straighten_data, straighten_dims,
        straighten_time, DataType,
    };
    use crate::{
        grid::{tests::sample_grid, Coord, Grid, FILL_VALUE_ATTR},
        time::{TimeDirection, TimeFrequency},
        Float,
    };
    use chrono::NaiveDate;
    use indexmap::IndexMap;
    use ndarray::{arr1, Array2, ArrayD, IxDyn};

    fn table(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn squeeze_band_dimension() {
        let mut grid = sample_grid("dem", 3, 2, 1.0);
        grid.dims.insert(0, "band".to_string());
        grid.values = grid.values.insert_axis(ndarray::Axis(0));

        let grid = straighten_dims(grid).unwrap();
        assert_eq!(grid.dims, vec!["latitude", "longitude"]);
        assert_eq!(grid.values.shape(), &[3, 2]);
    }

    #[test]
    fn rename_dims_and_vars() {
        let mut grid = sample_grid("2t", 2, 2, 1.0);
        grid.rename_dim("latitude", "south_north");

        let grid = map_dims(grid, &table(&[("south_north", "latitude")]));
        assert_eq!(grid.dims[0], "latitude");

        let grid = map_vars(grid, &table(&[("2t", "air_t")])).unwrap();
        assert_eq!(grid.name, "air_t");
        assert!(map_vars(grid, &table(&[("tp", "rain")])).is_none());
    }

    #[test]
    fn collapse_mesh_coordinates() {
        let lons = Array2::from_shape_fn((2, 3), |(_, col)| 10.0 + col as Float);
        let lats = Array2::from_shape_fn((2, 3), |(row, _)| 45.0 - row as Float);

        let mut coords = IndexMap::new();
        coords.insert("XLONG".to_string(), Coord::Mesh(lons));
        coords.insert("XLAT".to_string(), Coord::Mesh(lats));
        let grid = Grid {
            name: "t2".to_string(),
            dims: vec!["south_north".to_string(), "west_east".to_string()],
            coords,
            values: ArrayD::zeros(IxDyn(&[2, 3])),
            attrs: Default::default(),
        };

        let grid = map_coords(
            grid,
            &table(&[("XLONG", "longitude"), ("XLAT", "latitude")]),
        )
        .unwrap();

        assert_eq!(grid.dims, vec!["latitude", "longitude"]);
        assert_eq!(grid.lons().unwrap(), &arr1(&[10.0, 11.0, 12.0]));
        assert_eq!(grid.lats().unwrap(), &arr1(&[45.0, 44.0]));
    }

    #[test]
    fn flip_latitudes_and_wrap_longitudes() {
        let lats = arr1(&[40.0, 41.0]);
        let lons = arr1(&[170.0, 190.0]);
        let values = Array2::from_shape_vec((2, 2), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let grid = Grid::new_2d("v", lats, lons, values).unwrap();

        let grid = straighten_data(grid).unwrap();

        assert_eq!(grid.lats().unwrap(), &arr1(&[41.0, 40.0]));
        assert_eq!(grid.lons().unwrap(), &arr1(&[-170.0, 170.0]));
        assert_eq!(
            grid.values.iter().cloned().collect::<Vec<_>>(),
            vec![4.0, 3.0, 2.0, 1.0]
        );
    }

    #[test]
    fn transpose_to_latitude_longitude() {
        let grid = sample_grid("v", 2, 3, 0.0);
        let mut transposed = grid.clone();
        transposed.values = grid.values.clone().reversed_axes();
        transposed.dims = vec!["longitude".to_string(), "latitude".to_string()];

        let straight = straighten_data(transposed).unwrap();
        assert_eq!(straight.dims, vec!["latitude", "longitude"]);
        assert_eq!(straight.values.shape(), &[2, 3]);
    }

    #[test]
    fn synthesize_time_axis() {
        let mut grid = sample_grid("v", 2, 2, 0.0);
        grid.dims.insert(0, "time".to_string());
        grid.coords
            .insert("time".to_string(), Coord::Axis(arr1(&[0.0, 1.0, 2.0])));
        grid.values = ArrayD::zeros(IxDyn(&[3, 2, 2]));

        let reference = NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(6, 0, 0))
            .unwrap();
        let grid = straighten_time(
            grid,
            Some(reference),
            TimeDirection::Backward,
            TimeFrequency::hourly(),
        )
        .unwrap();

        let times = grid.times().unwrap();
        assert_eq!(times.len(), 3);
        assert_eq!(
            times[0],
            NaiveDate::from_ymd_opt(2024, 1, 1)
                .and_then(|d| d.and_hms_opt(4, 0, 0))
                .unwrap()
        );
        assert_eq!(times[2], reference);
    }

    #[test]
    fn smallest_type_and_fill_value() {
        let mut grid = sample_grid("mask", 2, 2, 1.0);
        grid.values[IxDyn(&[0, 0])] = -9999.0;
        grid.set_attr(FILL_VALUE_ATTR, -9999.0);

        let typed = set_type(grid.clone(), None);
        assert_eq!(typed.attrs["dtype"], DataType::UInt8.to_string());
        assert_eq!(typed.values[IxDyn(&[0, 0])], 255.0);

        let mut float_grid = grid;
        float_grid.values[IxDyn(&[1, 1])] = 0.5;
        let typed = set_type(float_grid, None);
        assert_eq!(typed.attrs["dtype"], "float32");
        assert!(typed.values[IxDyn(&[0, 0])].is_nan());
        assert_eq!(typed.fill_value().map(|v| v.is_nan()), Some(true));
    }
}
