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

//! Derived meteorological quantities.

use super::{functions::map_grids, ProcessInput};
use crate::{
    constants::{DEFAULT_NO_DATA, KELVIN_OFFSET},
    errors::{GridError, ProcessError},
    grid::{Grid, Payload},
    Float,
};
use floccus::vapour_pressure;
use ndarray::Zip;

/// Saturation vapour pressure (Pa) at `temperature` (K) and `pressure` (Pa).
fn saturation_vapour_pressure(temperature: Float, pressure: Float) -> Result<Float, ProcessError> {
    let result = if temperature > 273.15 {
        // usual buck formula over water
        vapour_pressure::buck1(temperature, pressure)
    } else if temperature > 193.0 {
        vapour_pressure::buck2(temperature, pressure)
    } else {
        vapour_pressure::wexler2(temperature)
    };

    result.map_err(|e| ProcessError::Physics(format!("{} at {} K", e, temperature)))
}

fn to_kelvin(grid: &Grid) -> Grid {
    let units = grid
        .attrs
        .get("units")
        .map(|units| units.to_lowercase())
        .unwrap_or_default();

    let mut grid = grid.clone();
    if matches!(units.as_str(), "c" | "degc" | "celsius" | "degree_celsius") {
        grid.values.mapv_inplace(|v| v + KELVIN_OFFSET);
    }
    grid
}

pub(super) fn check_shapes(a: &Grid, b: &Grid) -> Result<(), ProcessError> {
    if a.values.shape() != b.values.shape() {
        return Err(GridError::Mismatch(format!(
            "{} has shape {:?} and {} {:?}",
            a.name,
            a.values.shape(),
            b.name,
            b.values.shape()
        ))
        .into());
    }
    Ok(())
}

/// Relative humidity (%) from air temperature `t` and dew point `td`.
///
/// `RH = 100 e(td) / e(t)` with the saturation vapour pressure over water
/// (over ice below freezing). Temperatures are in Kelvin unless the
/// `units` attribute says Celsius. Cells where either input is missing
/// get `mask_no_data`. Parameters: `p` (default 1013.25), `p_units`
/// (`hPa` or `Pa`), `clip` (default true), `mask_no_data`.
pub fn compute_data_rh(input: &ProcessInput) -> Result<Payload, ProcessError> {
    let params = input.params;
    let t = to_kelvin(&input.arg_grid("t")?);
    let td = to_kelvin(&input.arg_grid("td")?);
    check_shapes(&t, &td)?;

    if input.args.contains_key("q") {
        log::debug!("Specific humidity is not used to compute relative humidity");
    }

    let pressure = params.get_f64("p", 1013.25)?;
    let pressure = match params.get_str("p_units")?.as_deref() {
        None | Some("hPa") | Some("hpa") => pressure * 100.0,
        Some("Pa") | Some("pa") => pressure,
        Some(other) => {
            return Err(ProcessError::InvalidParameter(format!(
                "pressure units {} are not available",
                other
            )))
        }
    };
    let clip = params.get_bool("clip", true)?;
    let no_data = params.get_f64("mask_no_data", DEFAULT_NO_DATA)?;

    let mut rh = t.full_like(no_data);
    let mut failure = None;

    Zip::from(&mut rh.values)
        .and(&t.values)
        .and(&td.values)
        .for_each(|rh, &t, &td| {
            if !t.is_finite() || !td.is_finite() || failure.is_some() {
                return;
            }
            let value = saturation_vapour_pressure(td, pressure).and_then(|e| {
                saturation_vapour_pressure(t, pressure).map(|es| 100.0 * e / es)
            });
            match value {
                Ok(value) if clip => *rh = value.max(0.0).min(100.0),
                Ok(value) => *rh = value,
                Err(e) => failure = Some(e),
            }
        });

    if let Some(e) = failure {
        return Err(e);
    }

    let mut rh = rh.with_name("rh");
    rh.attrs = t.attrs.clone();
    rh.set_attr("units", "%");
    Ok(Payload::Grid(rh))
}

/// Wind speed (m s-1) from the `u` and `v` components, never negative.
pub fn compute_data_wind_speed(input: &ProcessInput) -> Result<Payload, ProcessError> {
    let u = input.arg_grid("u")?;
    let v = input.arg_grid("v")?;
    check_shapes(&u, &v)?;

    let name = input
        .params
        .get_str("name")?
        .unwrap_or_else(|| "wind_speed".to_string());

    let mut speed = u.full_like(Float::NAN);
    Zip::from(&mut speed.values)
        .and(&u.values)
        .and(&v.values)
        .for_each(|speed, &u, &v| *speed = (u * u + v * v).sqrt().max(0.0));

    let mut speed = speed.with_name(&name);
    speed.attrs = u.attrs;
    speed.set_attr("units", "m s-1");
    Ok(Payload::Grid(speed))
}

/// Converts temperatures between Kelvin and Celsius.
///
/// With `to_celsius` (default) grids in K, or without units, are shifted
/// to C; otherwise grids in C, or without units, are shifted to K. The
/// units attribute (`units_attr`, default `units`) is updated.
pub fn convert_temperature_units(input: &ProcessInput) -> Result<Payload, ProcessError> {
    let to_celsius = input.params.get_bool("to_celsius", true)?;
    let units_attr = input
        .params
        .get_str("units_attr")?
        .unwrap_or_else(|| "units".to_string());

    map_grids(input.first()?.clone(), |mut grid| {
        let units = grid
            .attrs
            .get(&units_attr)
            .map(|units| units.to_lowercase())
            .unwrap_or_default();

        if to_celsius && matches!(units.as_str(), "k" | "kelvin" | "") {
            grid.values.mapv_inplace(|v| v - KELVIN_OFFSET);
            grid.set_attr(&units_attr, "C");
        } else if !to_celsius && matches!(units.as_str(), "c" | "degc" | "celsius" | "") {
            grid.values.mapv_inplace(|v| v + KELVIN_OFFSET);
            grid.set_attr(&units_attr, "K");
        }

        Ok(grid)
    })
}

#[cfg(test)]
mod tests {
    use super::{compute_data_rh, compute_data_wind_speed, convert_temperature_units};
    use crate::{
        grid::{tests::sample_grid, Payload},
        process::{Params, ProcessInput},
        Float,
    };
    use float_cmp::approx_eq;
    use indexmap::IndexMap;

    fn with_args<'a>(args: Vec<(&str, Payload)>, params: &'a Params) -> ProcessInput<'a> {
        ProcessInput {
            data: vec![],
            args: args
                .into_iter()
                .map(|(name, payload)| (name.to_string(), payload))
                .collect::<IndexMap<_, _>>(),
            time: None,
            reference: None,
            params,
        }
    }

    #[test]
    fn saturated_air_has_full_humidity() {
        let params = Params::default();
        let mut t = sample_grid("air_t", 2, 2, 293.15);
        let mut td = sample_grid("td", 2, 2, 293.15);
        td.values[[0, 1]] = 283.15;
        td.values[[1, 0]] = 300.0;
        t.values[[1, 1]] = Float::NAN;

        let rh = compute_data_rh(&with_args(
            vec![("t", Payload::Grid(t)), ("td", Payload::Grid(td))],
            &params,
        ))
        .unwrap()
        .into_grid()
        .unwrap();

        assert!(approx_eq!(Float, rh.values[[0, 0]], 100.0, epsilon = 1e-9));
        // 10 degrees of dew point depression is roughly 52 %
        assert!(rh.values[[0, 1]] > 50.0 && rh.values[[0, 1]] < 55.0);
        assert_eq!(rh.values[[1, 0]], 100.0);
        assert_eq!(rh.values[[1, 1]], -9999.0);
        assert_eq!(rh.attrs["units"], "%");
    }

    #[test]
    fn humidity_needs_both_temperatures() {
        let params = Params::default();
        let t = sample_grid("air_t", 2, 2, 293.15);
        assert!(compute_data_rh(&with_args(vec![("t", Payload::Grid(t))], &params)).is_err());
    }

    #[test]
    fn wind_speed_from_components() {
        let params = Params::default();
        let u = sample_grid("u", 1, 2, 3.0);
        let v = sample_grid("v", 1, 2, -4.0);

        let speed = compute_data_wind_speed(&with_args(
            vec![("u", Payload::Grid(u)), ("v", Payload::Grid(v))],
            &params,
        ))
        .unwrap()
        .into_grid()
        .unwrap();

        assert_eq!(speed.name, "wind_speed");
        assert!(speed.values.iter().all(|v| approx_eq!(Float, *v, 5.0)));
        assert_eq!(speed.attrs["units"], "m s-1");
    }

    #[test]
    fn temperature_units_follow_attribute() {
        let params = Params::default();
        let mut kelvin = sample_grid("air_t", 1, 1, 273.15);
        kelvin.set_attr("units", "K");
        let mut celsius = sample_grid("air_t", 1, 1, 20.0);
        celsius.set_attr("units", "C");

        let input = |grid| ProcessInput {
            data: vec![("air_t".to_string(), Payload::Grid(grid))],
            args: IndexMap::new(),
            time: None,
            reference: None,
            params: &params,
        };

        let converted = convert_temperature_units(&input(kelvin)).unwrap().into_grid().unwrap();
        assert!(approx_eq!(Float, converted.values[[0, 0]], 0.0));
        assert_eq!(converted.attrs["units"], "C");

        // already in Celsius
        let untouched = convert_temperature_units(&input(celsius)).unwrap().into_grid().unwrap();
        assert_eq!(untouched.values[[0, 0]], 20.0);
    }
}
