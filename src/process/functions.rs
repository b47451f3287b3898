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

//! Spatial processes: resampling, masking and merging of grids
//! against the reference grid of a workflow.

use super::{Params, ProcessInput};
use crate::{
    constants::DEFAULT_NO_DATA,
    errors::{GridError, ProcessError},
    grid::{map_over_container, Grid, GridSet, Payload},
    resample::{GridResampler, ResampleParams, Resampler},
    Float,
};
use ndarray::{Array2, Zip};

fn resample_params(params: &Params) -> Result<ResampleParams, ProcessError> {
    let defaults = ResampleParams::default();

    let method = match params.get_str("method")? {
        Some(method) => method.parse()?,
        None => defaults.method,
    };

    Ok(ResampleParams {
        method,
        max_distance: params.get_f64("max_distance", defaults.max_distance)?,
        neighbours: params.get_usize("neighbours", defaults.neighbours)?,
        sigma: params.get_f64("sigma", defaults.sigma)?,
        fill_value: params.get_f64("fill_value", defaults.fill_value)?,
    })
}

/// Cast requested through `mask_format`: `float` (default) keeps the
/// values, `integer` truncates them and refuses a NaN no-data value.
fn apply_mask_format(
    mut grid: Grid,
    format: Option<&str>,
    no_data: Float,
) -> Result<Grid, ProcessError> {
    match format {
        None | Some("float") => Ok(grid),
        Some("integer") => {
            if no_data.is_nan() {
                return Err(ProcessError::InvalidParameter(
                    "integer masks need a finite mask_no_data".to_string(),
                ));
            }
            grid.values.mapv_inplace(|v| if v.is_finite() { v.trunc() } else { no_data });
            Ok(grid)
        }
        Some(other) => Err(ProcessError::InvalidParameter(format!(
            "mask format {} is not available",
            other
        ))),
    }
}

/// Per-grid transformation of a payload that may fail with a process error.
pub(super) fn map_grids<F>(payload: Payload, mut function: F) -> Result<Payload, ProcessError>
where
    F: FnMut(Grid) -> Result<Grid, ProcessError>,
{
    match payload {
        Payload::Grid(grid) => Ok(Payload::Grid(function(grid)?)),
        Payload::Set(set) => {
            let mut mapped = GridSet::new();
            mapped.attrs = set.attrs;
            for (_, grid) in set.vars {
                mapped.insert(function(grid)?);
            }
            Ok(Payload::Set(mapped))
        }
        other => Ok(other),
    }
}

/// Grid built on the reference coordinates, keeping the name and
/// attributes of `source`.
fn on_reference(source: &Grid, reference: &Grid, values: Array2<Float>) -> Result<Grid, ProcessError> {
    let mut grid = Grid::new_2d(
        &source.name,
        reference.lats()?.clone(),
        reference.lons()?.clone(),
        values,
    )?;
    grid.attrs = source.attrs.clone();
    Ok(grid)
}

/// Resamples every grid of the first input onto the reference grid.
///
/// Parameters: `method` (nn, idw, gauss), `max_distance` (m),
/// `neighbours`, `sigma` (m), `fill_value`.
pub fn interpolate_data(input: &ProcessInput) -> Result<Payload, ProcessError> {
    let reference = input.reference()?;
    let params = resample_params(input.params)?;

    let data = input.first()?.clone();
    let resampled = map_over_container(data, |grid| {
        let values = GridResampler.resample(&grid, reference, &params)?;
        let mut out = Grid::new_2d(
            &grid.name,
            reference.lats()?.clone(),
            reference.lons()?.clone(),
            values,
        )?;
        out.attrs = grid.attrs;
        Ok(out)
    })?;

    Ok(resampled)
}

/// Sets to `mask_no_data` the cells where the reference grid (or the
/// `ref` argument) equals `ref_value`.
pub fn mask_data_by_ref(input: &ProcessInput) -> Result<Payload, ProcessError> {
    let params = input.params;
    let reference = match input.args.get("ref") {
        Some(payload) => payload.clone().into_grid()?,
        None => input.reference()?.clone(),
    };

    let ref_value = params.get_f64("ref_value", DEFAULT_NO_DATA)?;
    let no_data = params.get_f64("mask_no_data", DEFAULT_NO_DATA)?;
    let format = params.get_str("mask_format")?;

    let mask = reference.spatial_values()?;
    let is_masked = |value: Float| {
        if ref_value.is_nan() {
            value.is_nan()
        } else {
            value == ref_value
        }
    };

    let mut masked = GridSet::new();
    for grid in input.first()?.grids() {
        let mut values = grid.spatial_values()?;
        if values.dim() != mask.dim() {
            return Err(GridError::Mismatch(format!(
                "{} has shape {:?} and the mask {:?}",
                grid.name,
                values.dim(),
                mask.dim()
            ))
            .into());
        }

        Zip::from(&mut values).and(&mask).for_each(|value, reference| {
            if is_masked(*reference) {
                *value = no_data;
            }
        });

        let out = on_reference(grid, &reference, values)?;
        masked.insert(apply_mask_format(out, format.as_deref(), no_data)?);
    }

    Ok(Payload::Set(masked).squeeze())
}

/// Sets to `mask_no_data` the values below `mask_min` or above `mask_max`.
pub fn mask_data_by_limits(input: &ProcessInput) -> Result<Payload, ProcessError> {
    let params = input.params;
    let min = params.get_opt_f64("mask_min")?;
    let max = params.get_opt_f64("mask_max")?;
    let no_data = params.get_f64("mask_no_data", DEFAULT_NO_DATA)?;
    let format = params.get_str("mask_format")?;

    let data = input.first()?.clone();
    let masked = map_grids(data, |mut grid| {
        grid.values.mapv_inplace(|value| {
            let below = min.map_or(false, |min| value < min);
            let above = max.map_or(false, |max| value > max);
            if below || above {
                no_data
            } else {
                value
            }
        });
        apply_mask_format(grid, format.as_deref(), no_data)
    })?;

    Ok(masked)
}

/// Merges the tiles of all fetched inputs onto the reference grid.
///
/// Every tile is resampled onto the reference; finite values of later
/// tiles overwrite earlier ones. Cells where the reference holds
/// `ref_no_data` and tile cells holding `var_no_data` are NaN.
pub fn merge_data_by_ref(input: &ProcessInput) -> Result<Payload, ProcessError> {
    let reference = input.reference()?;
    let params = input.params;
    let resample = resample_params(params)?;
    let ref_no_data = params.get_f64("ref_no_data", DEFAULT_NO_DATA)?;
    let var_no_data = params.get_f64("var_no_data", DEFAULT_NO_DATA)?;

    let ref_values = reference.spatial_values()?;
    let outside = ref_values.mapv(|v| v.is_nan() || v == ref_no_data);

    let tiles: Vec<&Payload> = input.data.iter().map(|(_, payload)| payload).collect();
    let names: Vec<String> = match tiles.first() {
        Some(first) => first.grids().iter().map(|grid| grid.name.clone()).collect(),
        None => return Err(ProcessError::MissingArgument("data".to_string())),
    };

    let mut merged = GridSet::new();
    for name in names {
        let mut values = Array2::from_elem(ref_values.dim(), resample.fill_value);
        let mut attrs = None;

        for tile in &tiles {
            let grid = match tile.grids().into_iter().find(|grid| grid.name == name) {
                Some(grid) => grid,
                None => {
                    log::warn!("Variable {} is not available in every tile", name);
                    continue;
                }
            };
            if attrs.is_none() {
                attrs = Some(grid.attrs.clone());
            }

            let mut source = grid.clone();
            source
                .values
                .mapv_inplace(|v| if v == var_no_data { Float::NAN } else { v });

            let tile_values = GridResampler.resample(&source, reference, &resample)?;
            Zip::from(&mut values)
                .and(&tile_values)
                .for_each(|merged, tile| {
                    if tile.is_finite() {
                        *merged = *tile;
                    }
                });
        }

        Zip::from(&mut values).and(&outside).for_each(|value, outside| {
            if *outside {
                *value = Float::NAN;
            }
        });

        let mut grid = Grid::new_2d(
            &name,
            reference.lats()?.clone(),
            reference.lons()?.clone(),
            values,
        )?;
        grid.attrs = attrs.unwrap_or_default();
        merged.insert(grid);
    }

    Ok(Payload::Set(merged).squeeze())
}
