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

//! Module with the resampling capability used to move source
//! grids onto the reference grid of a workflow.
//!
//! Distances between grid points are measured on the WGS84 ellipsoid with
//! the local degree lengths along meridian and parallel, which is accurate
//! enough for the search radii used in forcing preparation (tens of km).

use crate::{
    constants::{NS_C_EARTH, WE_C_EARTH},
    errors::GridError,
    grid::{find_nearest, Grid},
    Float,
};
use ndarray::{Array1, Array2};
use serde::Deserialize;
use std::{fmt, str::FromStr};

/// Interpolation kernel.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResampleMethod {
    /// Nearest neighbour.
    Nn,
    /// Inverse distance weighting (`1/r^2`).
    Idw,
    /// Gaussian weighting (`exp(-r^2/sigma^2)`).
    Gauss,
}

impl FromStr for ResampleMethod {
    type Err = GridError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text.trim().to_lowercase().as_str() {
            "nn" | "nearest" => Ok(ResampleMethod::Nn),
            "idw" => Ok(ResampleMethod::Idw),
            "gauss" | "gaussian" => Ok(ResampleMethod::Gauss),
            _ => Err(GridError::Mismatch(format!(
                "resampling method {} is not available",
                text
            ))),
        }
    }
}

impl fmt::Display for ResampleMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResampleMethod::Nn => "nn",
            ResampleMethod::Idw => "idw",
            ResampleMethod::Gauss => "gauss",
        };
        write!(f, "{}", name)
    }
}

/// Parameters of a resampling.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct ResampleParams {
    pub method: ResampleMethod,

    /// Radius of influence in meters.
    pub max_distance: Float,

    /// Maximum number of source points per target point (idw and gauss).
    pub neighbours: usize,

    /// Width of the gaussian kernel in meters.
    pub sigma: Float,

    /// Value of target points without any source point in range.
    pub fill_value: Float,
}

impl Default for ResampleParams {
    fn default() -> Self {
        ResampleParams {
            method: ResampleMethod::Nn,
            max_distance: 18_000.0,
            neighbours: 8,
            sigma: 250_000.0,
            fill_value: Float::NAN,
        }
    }
}

/// Capability of resampling values of a source grid onto a target grid.
pub trait Resampler {
    fn resample(
        &self,
        source: &Grid,
        target: &Grid,
        params: &ResampleParams,
    ) -> Result<Array2<Float>, GridError>;
}

/// Resampler of regular latitude/longitude grids.
#[derive(Copy, Clone, Debug, Default)]
pub struct GridResampler;

/// Distance in meters between two points close to each other.
fn local_distance(lat_0: Float, lon_0: Float, lat_1: Float, lon_1: Float) -> Float {
    let mean_lat = ((lat_0 + lat_1) / 2.0).to_radians();
    let dy = (lat_1 - lat_0) * NS_C_EARTH / 360.0;
    let dx = (lon_1 - lon_0) * mean_lat.cos() * WE_C_EARTH / 360.0;

    (dx * dx + dy * dy).sqrt()
}

/// Range of axis indices within `radius` degrees of `index`.
fn window(axis: &Array1<Float>, index: usize, radius: Float) -> (usize, usize) {
    let step = axis
        .windows(2)
        .into_iter()
        .map(|pair| (pair[1] - pair[0]).abs())
        .find(|step| *step > 0.0)
        .unwrap_or(1.0);
    let cells = (radius / step).ceil() as usize + 1;

    (
        index.saturating_sub(cells),
        (index + cells).min(axis.len().saturating_sub(1)),
    )
}

impl GridResampler {
    fn resample_point(
        &self,
        source_lats: &Array1<Float>,
        source_lons: &Array1<Float>,
        values: &Array2<Float>,
        lat: Float,
        lon: Float,
        params: &ResampleParams,
    ) -> Float {
        let lat_radius = params.max_distance / (NS_C_EARTH / 360.0);
        let lon_radius =
            params.max_distance / (lat.to_radians().cos().max(1e-6) * WE_C_EARTH / 360.0);

        let nearest = |axis: &Array1<Float>, x: Float| {
            axis.as_slice()
                .and_then(|axis| find_nearest(axis, x).ok())
                .or_else(|| {
                    // target outside of source extent, start from the closest edge
                    let last = axis.len().checked_sub(1)?;
                    if (axis[0] - x).abs() <= (axis[last] - x).abs() {
                        Some(0)
                    } else {
                        Some(last)
                    }
                })
        };

        let (i_lat, i_lon) = match (nearest(source_lats, lat), nearest(source_lons, lon)) {
            (Some(i_lat), Some(i_lon)) => (i_lat, i_lon),
            _ => return params.fill_value,
        };

        let (lat_start, lat_end) = window(source_lats, i_lat, lat_radius);
        let (lon_start, lon_end) = window(source_lons, i_lon, lon_radius);

        let mut candidates: Vec<(Float, Float)> = vec![];
        for i in lat_start..=lat_end {
            for j in lon_start..=lon_end {
                let value = values[[i, j]];
                if !value.is_finite() {
                    continue;
                }
                let distance = local_distance(lat, lon, source_lats[i], source_lons[j]);
                if distance <= params.max_distance {
                    candidates.push((distance, value));
                }
            }
        }

        if candidates.is_empty() {
            return params.fill_value;
        }

        candidates.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        match params.method {
            ResampleMethod::Nn => candidates[0].1,
            ResampleMethod::Idw | ResampleMethod::Gauss => {
                candidates.truncate(params.neighbours.max(1));

                if candidates[0].0 == 0.0 {
                    return candidates[0].1;
                }

                let weight = |distance: Float| match params.method {
                    ResampleMethod::Gauss => (-(distance * distance) / (params.sigma * params.sigma)).exp(),
                    _ => 1.0 / (distance * distance),
                };

                let (sum, norm) = candidates
                    .iter()
                    .fold((0.0, 0.0), |(sum, norm), (distance, value)| {
                        let w = weight(*distance);
                        (sum + w * value, norm + w)
                    });

                if norm > 0.0 {
                    sum / norm
                } else {
                    params.fill_value
                }
            }
        }
    }
}

impl Resampler for GridResampler {
    fn resample(
        &self,
        source: &Grid,
        target: &Grid,
        params: &ResampleParams,
    ) -> Result<Array2<Float>, GridError> {
        let values = source.spatial_values()?;
        let source_lats = source.lats()?;
        let source_lons = source.lons()?;
        let target_lats = target.lats()?;
        let target_lons = target.lons()?;

        log::debug!(
            "Resampling {} ({}x{}) onto ({}x{}) with {}",
            source.name,
            source_lats.len(),
            source_lons.len(),
            target_lats.len(),
            target_lons.len(),
            params.method
        );

        Ok(Array2::from_shape_fn(
            (target_lats.len(), target_lons.len()),
            |(i, j)| {
                self.resample_point(
                    source_lats,
                    source_lons,
                    &values,
                    target_lats[i],
                    target_lons[j],
                    params,
                )
            },
        ))
    }
}
