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

//! GRIB reader built on ecCodes.
//!
//! Messages are grouped by `shortName`. Variables with more than one
//! message are stacked along a time axis built from the validity date
//! and time of each message.

use super::{FileIo, WriteOptions};
use crate::{
    errors::{CodecError, GridError},
    grid::{Grid, GridSet, Payload},
    Float,
};
use chrono::{NaiveDate, NaiveDateTime};
use eccodes::{
    CodesHandle, FallibleIterator,
    KeyType::{Float as FloatKey, FloatArray, Int, Str},
    KeyedMessage,
    ProductKind::GRIB,
};
use indexmap::IndexMap;
use ndarray::{Array1, Array2, ArrayD, Axis};
use std::path::Path;

#[derive(Copy, Clone, Debug, Default)]
pub struct GribReader;

fn read_str(msg: &KeyedMessage, key: &'static str) -> Result<String, CodecError> {
    match msg.read_key(key)?.value {
        Str(value) => Ok(value),
        _ => Err(CodecError::Malformed(format!("key {} is not a string", key))),
    }
}

fn read_int(msg: &KeyedMessage, key: &'static str) -> Result<i64, CodecError> {
    match msg.read_key(key)?.value {
        Int(value) => Ok(value),
        _ => Err(CodecError::Malformed(format!("key {} is not an integer", key))),
    }
}

fn read_float(msg: &KeyedMessage, key: &'static str) -> Result<Float, CodecError> {
    match msg.read_key(key)?.value {
        FloatKey(value) => Ok(value as Float),
        Int(value) => Ok(value as Float),
        _ => Err(CodecError::Malformed(format!("key {} is not a number", key))),
    }
}

fn validity(msg: &KeyedMessage) -> Result<NaiveDateTime, CodecError> {
    let date = read_int(msg, "validityDate")?;
    let time = read_int(msg, "validityTime")?;

    NaiveDate::from_ymd_opt(
        (date / 10_000) as i32,
        ((date / 100) % 100) as u32,
        (date % 100) as u32,
    )
    .and_then(|day| day.and_hms_opt((time / 100) as u32, (time % 100) as u32, 0))
    .ok_or_else(|| CodecError::Malformed(format!("invalid validity {} {}", date, time)))
}

/// Values of a message as a (latitude, longitude) array with its axes.
fn read_field(msg: &KeyedMessage) -> Result<(Array1<Float>, Array1<Float>, Array2<Float>), CodecError> {
    let ni = read_int(msg, "Ni")? as usize;
    let nj = read_int(msg, "Nj")? as usize;

    let lat_first = read_float(msg, "latitudeOfFirstGridPointInDegrees")?;
    let lat_last = read_float(msg, "latitudeOfLastGridPointInDegrees")?;
    let lon_first = read_float(msg, "longitudeOfFirstGridPointInDegrees")?;
    let lon_last = read_float(msg, "longitudeOfLastGridPointInDegrees")?;

    let values = match msg.read_key("values")?.value {
        FloatArray(values) => values.into_iter().map(|v| v as Float).collect(),
        _ => return Err(CodecError::Malformed("key values is not an array".to_string())),
    };

    // values are stored row by row with longitude varying fastest
    let values = Array2::from_shape_vec((nj, ni), values).map_err(GridError::from)?;

    Ok((
        Array1::linspace(lat_first, lat_last, nj),
        Array1::linspace(lon_first, lon_last, ni),
        values,
    ))
}

impl FileIo for GribReader {
    fn read(
        &self,
        path: &Path,
        _file_type: &str,
        variables: &[String],
    ) -> Result<Payload, CodecError> {
        let handle = CodesHandle::new_from_file(path, GRIB)?;
        let messages: Vec<KeyedMessage> = handle.collect()?;

        let mut grouped: IndexMap<String, Vec<&KeyedMessage>> = IndexMap::new();
        for msg in &messages {
            let name = read_str(msg, "shortName")?;
            if variables.is_empty() || variables.contains(&name) {
                grouped.entry(name).or_default().push(msg);
            }
        }

        let mut set = GridSet::new();

        for (name, msgs) in grouped {
            let mut times = Vec::with_capacity(msgs.len());
            let mut fields = Vec::with_capacity(msgs.len());
            let mut axes = None;

            for msg in msgs {
                let (lats, lons, values) = read_field(msg)?;
                times.push(validity(msg)?);
                fields.push(values.insert_axis(Axis(0)));
                axes.get_or_insert((lats, lons));
            }

            let (lats, lons) = match axes {
                Some(axes) => axes,
                None => continue,
            };

            let views: Vec<_> = fields.iter().map(|field| field.view()).collect();
            let values: ArrayD<Float> = ndarray::concatenate(Axis(0), &views)
                .map_err(GridError::from)?
                .into_dyn();

            set.insert(Grid::new_3d(&name, times, lats, lons, values)?);
        }

        if set.is_empty() {
            return Err(CodecError::Malformed(format!(
                "no message of {:?} in {}",
                variables,
                path.display()
            )));
        }

        Ok(Payload::Set(set).squeeze())
    }

    fn write(
        &self,
        _payload: &Payload,
        path: &Path,
        _file_type: &str,
        _options: &WriteOptions,
    ) -> Result<(), CodecError> {
        Err(CodecError::UnsupportedFormat(format!(
            "writing grib {}",
            path.display()
        )))
    }
}
