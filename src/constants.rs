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

//! Module containing constants used by the toolkit.

use crate::Float;
use std::f64::consts::PI;

///WGS84 ellipsoid semi-major axis
pub const WGS84_A: Float = 6_378_137.0;

///WGS84 ellipsoid semi-minor axis
#[allow(clippy::excessive_precision)]
pub const WGS84_B: Float = 6_356_752.314_245;

///WGS84 ellipsoid Ramanujan's $h$ parameter
pub const WGS84_H: Float =
    ((WGS84_A - WGS84_B) * (WGS84_A - WGS84_B)) / ((WGS84_A + WGS84_B) * (WGS84_A - WGS84_B));

///WGS84 ellipsoid circumference along meridian
///
///Computed with first 6 terms of infinite series:
///`C = \pi(a+b)\sum_{n=0}^{+\infty}\binom{0.5}{n}h^n`
pub const NS_C_EARTH: Float = PI
    * (WGS84_A + WGS84_B)
    * (1.0
        + (1.0 / 4.0) * (WGS84_H)
        + (1.0 / 64.0) * (WGS84_H * WGS84_H)
        + (1.0 / 256.0) * (WGS84_H * WGS84_H * WGS84_H)
        + (25.0 / 16384.0) * (WGS84_H * WGS84_H * WGS84_H * WGS84_H)
        + (49.0 / 65536.0) * (WGS84_H * WGS84_H * WGS84_H * WGS84_H * WGS84_H));

///WGS84 ellipsoid circumference along equator
pub const WE_C_EARTH: Float = 2.0 * PI * WGS84_A;

/// Well-known-text of the geographic CRS assumed when a source
/// does not declare one.
pub const DEFAULT_CRS_WKT: &str = "GEOGCS[\"WGS 84\",DATUM[\"WGS_1984\",SPHEROID[\"WGS 84\",6378137,298.257223563]],PRIMEM[\"Greenwich\",0],UNIT[\"degree\",0.0174532925199433]]";

/// No-data value used by HMC and S3M static and dynamic grids.
pub const DEFAULT_NO_DATA: Float = -9999.0;

/// Date components missing from a location pattern default to
/// this year when a key is parsed back into a timestamp.
pub const DEFAULT_YEAR: i32 = 1900;

/// Tolerance (in seconds) of the nearest-previous time selection.
pub const DEFAULT_TIME_TOLERANCE: i64 = 3600;

/// Conversion offset between Kelvin and Celsius degrees.
pub const KELVIN_OFFSET: Float = 273.15;

/// Names of dimensions recognized as spatial x and y axes.
pub const LON_NAMES: [&str; 4] = ["longitude", "lon", "x", "west_east"];
pub const LAT_NAMES: [&str; 4] = ["latitude", "lat", "y", "south_north"];

/// Names of dimensions recognized as the time axis.
pub const TIME_NAMES: [&str; 4] = ["time", "step", "valid_time", "times"];
