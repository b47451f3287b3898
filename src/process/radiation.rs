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


//! Incoming radiation from accumulated reanalysis fluxes and its
//! astronomic estimate when only rain is available.

use super::{compute::check_shapes, ProcessInput};
use crate::{
    errors::{GridError, ProcessError},
    grid::{Coord, Grid, GridSet, Payload},
    time::TimeFrequency,
    Float,
};
use chrono::{Datelike, Duration, NaiveDateTime, Timelike};
use ndarray::{Array2, Zip};
use serde_yaml::Value;
use std::f64::consts::PI;

/// Cloud attenuation by rain class in mm: lower bound, upper bound, factor.
const CLOUD_FACTOR_TABLE: [(Float, Float, Float); 5] = [
    (0.0, 1.0, 0.95),
    (1.0, 3.0, 0.75),
    (3.0, 5.0, 0.65),
    (5.0, 10.0, 0.50),
    (10.0, Float::INFINITY, 0.15),
];

/// Solar constant in MJ m-2 min-1.
const SOLAR_CONSTANT: Float = 118.08 / (60.0 * 24.0);

/// Angstrom coefficients of the clear-sky transmissivity.
const ANGSTROM_A: Float = 0.65;
const ANGSTROM_B: Float = 2e-4;

/// Cloud factor of a rain amount. Missing rain stays missing and
/// amounts outside the table (negative) give no radiation.
pub fn cloud_factor(rain: Float) -> Float {
    if rain.is_nan() {
        return Float::NAN;
    }

    CLOUD_FACTOR_TABLE
        .iter()
        .find(|(low, high, _)| rain >= *low && rain < *high)
        .map(|(_, _, factor)| *factor)
        .unwrap_or(0.0)
}

/// `max` that keeps NaN cells missing.
fn clip_min(value: Float, min: Float) -> Float {
    if value.is_nan() {
        value
    } else {
        value.max(min)
    }
}

fn time_delta(input: &ProcessInput) -> Result<Duration, ProcessError> {
    let text = input
        .params
        .get_str("time_delta")?
        .unwrap_or_else(|| "1h".to_string());

    text.parse::<TimeFrequency>()
        .map(|freq| freq.duration())
        .map_err(|e| ProcessError::InvalidParameter(format!("time_delta {}: {}", text, e)))
}

fn var_name(input: &ProcessInput, param: &str, default: &str) -> Result<String, ProcessError> {
    Ok(input
        .params
        .get_str(param)?
        .unwrap_or_else(|| default.to_string()))
}

/// Moves the time axis, if any, to the middle of the accumulation interval.
fn shift_to_midpoint(grid: &mut Grid, delta: Duration) {
    if let Some(dim) = grid.time_dim() {
        if let Some(Coord::Time(times)) = grid.coords.get_mut(&dim) {
            for time in times.iter_mut() {
                *time = *time - delta / 2;
            }
        }
    }
}

/// Mean incoming radiation fluxes (W m-2) from the surface solar (`ssrd`)
/// and thermal (`strd`) radiation accumulated over `time_delta` (J m-2).
///
/// `kind` selects the output: `k` shortwave (default), `l` longwave,
/// `r` or `w` their sum, `all` the three of them as a set. The shortwave
/// flux is clipped at `clip_sw_min` (default 0). With `midpoint` (default
/// true) a time axis is moved back by half the interval.
pub fn compute_data_incoming_radiation(input: &ProcessInput) -> Result<Payload, ProcessError> {
    let params = input.params;
    let kind = params
        .get_str("kind")?
        .unwrap_or_else(|| "k".to_string())
        .to_lowercase();

    let needs_k = matches!(kind.as_str(), "k" | "r" | "w" | "all");
    let needs_l = matches!(kind.as_str(), "l" | "r" | "w" | "all");
    if !needs_k && !needs_l {
        return Err(ProcessError::InvalidParameter(format!(
            "radiation kind {} is not available",
            kind
        )));
    }

    let delta = time_delta(input)?;
    let seconds = delta.num_seconds() as Float;
    let clip_sw_min = params.get_f64("clip_sw_min", 0.0)?;
    let midpoint = params.get_bool("midpoint", true)?;

    let flux = |source: Grid, name: &str, units: &str| {
        let mut grid = source.with_name(name);
        grid.values.mapv_inplace(|v| v / seconds);
        grid.set_attr("units", units);
        if midpoint {
            shift_to_midpoint(&mut grid, delta);
        }
        grid
    };

    let shortwave = if needs_k {
        let mut k = flux(
            input.arg_grid("ssrd")?,
            &var_name(input, "var_name_k", "incoming_radiation")?,
            "W m-2",
        );
        k.values.mapv_inplace(|v| clip_min(v, clip_sw_min));
        Some(k)
    } else {
        None
    };

    let longwave = if needs_l {
        Some(flux(
            input.arg_grid("strd")?,
            &var_name(input, "var_name_l", "incoming_longwave_radiation")?,
            "W m-2",
        ))
    } else {
        None
    };

    match (kind.as_str(), shortwave, longwave) {
        ("k", Some(k), _) => Ok(Payload::Grid(k)),
        ("l", _, Some(l)) => Ok(Payload::Grid(l)),
        (kind, Some(k), Some(l)) => {
            check_shapes(&k, &l)?;
            let mut total = k.clone().with_name(&var_name(
                input,
                "var_name_r",
                "incoming_total_radiation",
            )?);
            Zip::from(&mut total.values)
                .and(&l.values)
                .for_each(|total, &l| *total += l);

            if kind == "all" {
                Ok(Payload::Set(vec![k, l, total].into_iter().collect::<GridSet>()))
            } else {
                Ok(Payload::Grid(total))
            }
        }
        _ => Err(ProcessError::MissingArgument(kind.clone())),
    }
}

/// Position of the sun over one time interval, shared by every cell.
struct SunInterval {
    hour: Float,
    earth_sun: Float,
    correction: Float,
    declination: Float,
    hours: Float,
    seconds: Float,
}

impl SunInterval {
    /// Interval of length `delta` ending at `time`.
    fn ending_at(time: NaiveDateTime, delta: Duration) -> Self {
        let mid = time - delta / 2;
        let doy = mid.ordinal() as Float;
        let b = 2.0 * PI * (doy - 81.0) / 364.0;
        let seconds = delta.num_seconds() as Float;

        SunInterval {
            hour: mid.hour() as Float + mid.minute() as Float / 60.0 + mid.second() as Float / 3600.0,
            earth_sun: 1.0 + 0.033 * (2.0 * PI / 365.0 * doy).cos(),
            correction: 0.1645 * (2.0 * b).sin() - 0.1255 * b.cos() - 0.025 * b.sin(),
            declination: 0.4093 * (2.0 * PI / 365.0 * doy - 1.405).sin(),
            hours: seconds / 3600.0,
            seconds,
        }
    }

    /// Mean extraterrestrial radiation (W m-2) at a cell, never negative.
    fn extraterrestrial(&self, lon: Float, lat: Float) -> Float {
        let zone = (lon / 15.0).round() * 15.0;
        let west = 360.0 - lon;
        let phi = lat.to_radians();

        let omega = PI / 12.0 * (self.hour + 0.06667 * (zone - west) + self.correction - 12.0);
        let start = omega - PI * self.hours / 24.0;
        let end = omega + PI * self.hours / 24.0;
        let minutes = self.seconds / 60.0;

        let radiation = 12.0 * minutes / PI
            * SOLAR_CONSTANT
            * self.earth_sun
            * ((end - start) * phi.sin() * self.declination.sin()
                + phi.cos() * self.declination.cos() * (end.sin() - start.sin()));

        // MJ m-2 over the interval to W m-2
        (radiation * 1e6 / self.seconds).max(0.0)
    }
}

fn return_vars(input: &ProcessInput) -> Result<Vec<String>, ProcessError> {
    let invalid = || ProcessError::InvalidParameter("return_vars must name k, ar or cf".to_string());

    let names: Vec<String> = match input.params.get("return_vars") {
        None | Some(Value::Null) => vec!["k".to_string()],
        Some(Value::String(name)) => vec![name.to_lowercase()],
        Some(Value::Sequence(names)) => names
            .iter()
            .map(|name| name.as_str().map(str::to_lowercase).ok_or_else(invalid))
            .collect::<Result<_, _>>()?,
        Some(_) => return Err(invalid()),
    };

    if names.is_empty() || names.iter().any(|name| !matches!(name.as_str(), "k" | "ar" | "cf")) {
        return Err(invalid());
    }
    Ok(names)
}

/// Shortwave radiation (W m-2) estimated from the sun position and the
/// cloud cover suggested by `rain` over the interval ending at the step.
///
/// The extraterrestrial radiation `ar` follows the FAO hourly formula.
/// The clear-sky share uses the terrain height `geo_z` when bound. The
/// cloud factor `cf` comes from the rain classes. `return_vars` picks one
/// or more of `k` (default), `ar` and `cf`; several come back as a set.
pub fn compute_data_astronomic_radiation(input: &ProcessInput) -> Result<Payload, ProcessError> {
    let time = input
        .time
        .ok_or_else(|| ProcessError::MissingArgument("time".to_string()))?;
    let delta = time_delta(input)?;
    let outputs = return_vars(input)?;
    let clip = input.params.get_bool("clip", true)?;

    let rain = input.arg_grid("rain")?;
    let lons = rain.lons()?.clone();
    let lats = rain.lats()?.clone();
    let rain_values = rain.spatial_values()?;

    let geo_z = match input.args.get("geo_z") {
        Some(payload) => {
            let terrain = payload.clone().into_grid()?.spatial_values()?;
            if terrain.dim() != rain_values.dim() {
                return Err(GridError::Mismatch(format!(
                    "terrain of shape {:?} does not fit rain of shape {:?}",
                    terrain.dim(),
                    rain_values.dim()
                ))
                .into());
            }
            Some(terrain)
        }
        None => None,
    };

    let cf = rain_values.mapv(cloud_factor);
    let sun = SunInterval::ending_at(time, delta);

    let mut ar = Array2::<Float>::zeros(cf.dim());
    Zip::indexed(&mut ar)
        .and(&cf)
        .for_each(|(row, col), ar, &cf| {
            *ar = if cf.is_nan() {
                Float::NAN
            } else {
                sun.extraterrestrial(lons[col], lats[row])
            };
        });

    let mut k = Array2::<Float>::zeros(cf.dim());
    Zip::indexed(&mut k)
        .and(&cf)
        .and(&ar)
        .for_each(|(row, col), k, &cf, &ar| {
            let transmissivity = match &geo_z {
                Some(terrain) => ANGSTROM_A + ANGSTROM_B * terrain[[row, col]],
                None => ANGSTROM_A,
            };
            *k = cf * transmissivity * ar;
            if clip {
                *k = clip_min(*k, 0.0);
            }
        });

    let wrap = |name: String, values: Array2<Float>, units: &str| -> Result<Grid, ProcessError> {
        let mut grid = Grid::new_2d(&name, lats.clone(), lons.clone(), values)?;
        grid.attrs = rain.attrs.clone();
        grid.set_attr("units", units);
        Ok(grid)
    };

    let mut grids = Vec::with_capacity(outputs.len());
    for output in &outputs {
        let grid = match output.as_str() {
            "k" => wrap(
                var_name(input, "var_name_k", "shortwave_radiation_clear_sky")?,
                k.clone(),
                "W m-2",
            )?,
            "ar" => wrap(
                var_name(input, "var_name_ar", "astronomic_radiation")?,
                ar.clone(),
                "W m-2",
            )?,
            _ => wrap("cloud_factor".to_string(), cf.clone(), "-")?,
        };
        grids.push(grid);
    }

    if grids.len() == 1 {
        Ok(Payload::Grid(grids.remove(0)))
    } else {
        Ok(Payload::Set(grids.into_iter().collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::{cloud_factor, compute_data_astronomic_radiation, compute_data_incoming_radiation};
    use crate::{
        grid::{tests::sample_grid, Payload},
        process::{Params, ProcessInput},
        Float,
    };
    use chrono::{NaiveDate, NaiveDateTime};
    use float_cmp::approx_eq;
    use indexmap::IndexMap;

    fn params(text: &str) -> Params {
        Params::new(serde_yaml::from_str(text).unwrap())
    }

    fn with_args<'a>(
        args: Vec<(&str, Payload)>,
        time: Option<NaiveDateTime>,
        params: &'a Params,
    ) -> ProcessInput<'a> {
        ProcessInput {
            data: vec![],
            args: args
                .into_iter()
                .map(|(name, payload)| (name.to_string(), payload))
                .collect::<IndexMap<_, _>>(),
            time,
            reference: None,
            params,
        }
    }

    fn at(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .and_then(|d| d.and_hms_opt(hour, 0, 0))
            .unwrap()
    }

    #[test]
    fn cloud_factor_classes() {
        assert_eq!(cloud_factor(0.0), 0.95);
        assert_eq!(cloud_factor(2.0), 0.75);
        assert_eq!(cloud_factor(3.0), 0.65);
        assert_eq!(cloud_factor(9.99), 0.50);
        assert_eq!(cloud_factor(25.0), 0.15);
        assert_eq!(cloud_factor(-1.0), 0.0);
        assert!(cloud_factor(Float::NAN).is_nan());
    }

    #[test]
    fn accumulated_fluxes_to_mean_flux() {
        let params = params("{kind: all, time_delta: 1h}");
        let mut ssrd = sample_grid("ssrd", 2, 2, 3.6e6);
        ssrd.values[[0, 1]] = -360.0;
        ssrd.values[[1, 1]] = Float::NAN;
        let strd = sample_grid("strd", 2, 2, 1.08e6);

        let set = match compute_data_incoming_radiation(&with_args(
            vec![("ssrd", Payload::Grid(ssrd)), ("strd", Payload::Grid(strd))],
            None,
            &params,
        ))
        .unwrap()
        {
            Payload::Set(set) => set,
            other => panic!("expected a set, got {:?}", other.kind()),
        };

        assert_eq!(
            set.names(),
            vec![
                "incoming_radiation",
                "incoming_longwave_radiation",
                "incoming_total_radiation"
            ]
        );

        let k = set.get("incoming_radiation").unwrap();
        assert!(approx_eq!(Float, k.values[[0, 0]], 1000.0, epsilon = 1e-9));
        // negative accumulations are clipped
        assert_eq!(k.values[[0, 1]], 0.0);
        assert!(k.values[[1, 1]].is_nan());
        assert_eq!(k.attrs["units"], "W m-2");

        let r = set.get("incoming_total_radiation").unwrap();
        assert!(approx_eq!(Float, r.values[[0, 0]], 1300.0, epsilon = 1e-9));
    }

    #[test]
    fn incoming_radiation_needs_its_flux() {
        let params = params("{kind: r}");
        let ssrd = sample_grid("ssrd", 1, 1, 1.0);
        assert!(compute_data_incoming_radiation(&with_args(
            vec![("ssrd", Payload::Grid(ssrd.clone()))],
            None,
            &params
        ))
        .is_err());

        let unknown_kind = Params::new(serde_yaml::from_str("{kind: x}").unwrap());
        assert!(compute_data_incoming_radiation(&with_args(
            vec![("ssrd", Payload::Grid(ssrd))],
            None,
            &unknown_kind
        ))
        .is_err());
    }

    #[test]
    fn astronomic_radiation_follows_the_sun() {
        let params = params("{return_vars: [k, ar, cf]}");
        let mut rain = sample_grid("rain", 2, 2, 2.0);
        rain.values[[1, 1]] = Float::NAN;

        let run = |time| match compute_data_astronomic_radiation(&with_args(
            vec![("rain", Payload::Grid(rain.clone()))],
            Some(time),
            &params,
        ))
        .unwrap()
        {
            Payload::Set(set) => set,
            other => panic!("expected a set, got {:?}", other.kind()),
        };

        let noon = run(at(12));
        let ar = noon.get("astronomic_radiation").unwrap();
        let k = noon.get("shortwave_radiation_clear_sky").unwrap();
        let cf = noon.get("cloud_factor").unwrap();

        // early March at 44 N, close to solar noon
        assert!(ar.values[[0, 0]] > 600.0 && ar.values[[0, 0]] < 1000.0);
        assert_eq!(cf.values[[0, 0]], 0.75);
        assert!(approx_eq!(
            Float,
            k.values[[0, 0]],
            0.75 * 0.65 * ar.values[[0, 0]],
            epsilon = 1e-9
        ));
        assert!(ar.values[[1, 1]].is_nan());
        assert_eq!(ar.attrs["units"], "W m-2");

        let midnight = run(at(0));
        let ar = midnight.get("astronomic_radiation").unwrap();
        assert_eq!(ar.values[[0, 0]], 0.0);
    }

    #[test]
    fn terrain_raises_clear_sky_radiation() {
        let params = Params::default();
        let rain = sample_grid("rain", 1, 1, 0.0);
        let terrain = sample_grid("terrain", 1, 1, 1000.0);

        let flat = compute_data_astronomic_radiation(&with_args(
            vec![("rain", Payload::Grid(rain.clone()))],
            Some(at(12)),
            &params,
        ))
        .unwrap()
        .into_grid()
        .unwrap();
        let high = compute_data_astronomic_radiation(&with_args(
            vec![("rain", Payload::Grid(rain)), ("geo_z", Payload::Grid(terrain))],
            Some(at(12)),
            &params,
        ))
        .unwrap()
        .into_grid()
        .unwrap();

        assert!(approx_eq!(
            Float,
            high.values[[0, 0]] / flat.values[[0, 0]],
            (0.65 + 0.2) / 0.65,
            epsilon = 1e-9
        ));
    }

    #[test]
    fn astronomic_radiation_needs_a_time() {
        let params = Params::default();
        let rain = sample_grid("rain", 1, 1, 0.0);
        assert!(compute_data_astronomic_radiation(&with_args(
            vec![("rain", Payload::Grid(rain))],
            None,
            &params
        ))
        .is_err());
    }
}
