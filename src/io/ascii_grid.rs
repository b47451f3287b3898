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

//! ESRI ASCII grid codec (`.asc`), the format of HMC and S3M static layers.

use super::{FileIo, WriteOptions};
use crate::{
    constants::DEFAULT_NO_DATA,
    errors::{CodecError, GridError},
    grid::{Grid, Payload, FILL_VALUE_ATTR},
    Float,
};
use ndarray::{Array1, Array2};
use std::{
    fs,
    io::{BufWriter, Write},
    path::Path,
};

/// Reads and writes single-variable ESRI ASCII grids.
#[derive(Copy, Clone, Debug, Default)]
pub struct AsciiGrid;

#[derive(Debug, Default)]
struct Header {
    ncols: Option<usize>,
    nrows: Option<usize>,
    xll: Option<Float>,
    yll: Option<Float>,
    center: bool,
    cellsize: Option<Float>,
    nodata: Option<Float>,
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, CodecError> {
    value
        .parse()
        .map_err(|_| CodecError::Malformed(format!("invalid value {} of {}", value, key)))
}

fn parse(text: &str, name: &str) -> Result<Grid, CodecError> {
    let mut header = Header::default();
    let mut lines = text.lines().peekable();

    loop {
        let line = match lines.peek() {
            Some(line) => *line,
            None => break,
        };
        let mut parts = line.split_whitespace();
        let key = match parts.next() {
            Some(key) if key.chars().next().map_or(false, char::is_alphabetic) => {
                key.to_lowercase()
            }
            Some(_) => break,
            None => {
                lines.next();
                continue;
            }
        };
        let value = parts
            .next()
            .ok_or_else(|| CodecError::Malformed(format!("missing value of {}", key)))?;

        match key.as_str() {
            "ncols" => header.ncols = Some(parse_number(&key, value)?),
            "nrows" => header.nrows = Some(parse_number(&key, value)?),
            "xllcorner" => header.xll = Some(parse_number(&key, value)?),
            "yllcorner" => header.yll = Some(parse_number(&key, value)?),
            "xllcenter" => {
                header.xll = Some(parse_number(&key, value)?);
                header.center = true;
            }
            "yllcenter" => {
                header.yll = Some(parse_number(&key, value)?);
                header.center = true;
            }
            "cellsize" => header.cellsize = Some(parse_number(&key, value)?),
            "nodata_value" => header.nodata = Some(parse_number(&key, value)?),
            _ => return Err(CodecError::Malformed(format!("unknown header key {}", key))),
        }
        lines.next();
    }

    let missing = |key: &str| CodecError::Malformed(format!("missing header key {}", key));
    let ncols = header.ncols.ok_or_else(|| missing("ncols"))?;
    let nrows = header.nrows.ok_or_else(|| missing("nrows"))?;
    let xll = header.xll.ok_or_else(|| missing("xllcorner"))?;
    let yll = header.yll.ok_or_else(|| missing("yllcorner"))?;
    let cellsize = header.cellsize.ok_or_else(|| missing("cellsize"))?;

    let values: Vec<Float> = lines
        .flat_map(str::split_whitespace)
        .map(|value| parse_number("value", value))
        .collect::<Result<_, _>>()?;

    if values.len() != ncols * nrows {
        return Err(CodecError::Malformed(format!(
            "expected {} values, found {}",
            ncols * nrows,
            values.len()
        )));
    }

    // coordinates are stored at cell centers
    let offset = if header.center { 0.0 } else { cellsize / 2.0 };
    let west = xll + offset;
    let north = yll + offset + cellsize * (nrows - 1) as Float;

    let lons = Array1::linspace(west, west + cellsize * (ncols - 1) as Float, ncols);
    let lats = Array1::linspace(north, north - cellsize * (nrows - 1) as Float, nrows);
    let values = Array2::from_shape_vec((nrows, ncols), values).map_err(GridError::from)?;

    let mut grid = Grid::new_2d(name, lats, lons, values)?;
    grid.set_attr(FILL_VALUE_ATTR, header.nodata.unwrap_or(DEFAULT_NO_DATA));

    Ok(grid)
}

impl FileIo for AsciiGrid {
    fn read(
        &self,
        path: &Path,
        _file_type: &str,
        variables: &[String],
    ) -> Result<Payload, CodecError> {
        let name = match variables.first() {
            Some(name) => name.clone(),
            None => path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };

        let text = fs::read_to_string(path)?;
        Ok(Payload::Grid(parse(&text, &name)?))
    }

    fn write(
        &self,
        payload: &Payload,
        path: &Path,
        _file_type: &str,
        _options: &WriteOptions,
    ) -> Result<(), CodecError> {
        let grid = match payload {
            Payload::Grid(grid) => grid,
            other => {
                return Err(CodecError::UnsupportedFormat(format!(
                    "ascii grid of {}",
                    other.kind()
                )))
            }
        };

        let values = grid.spatial_values()?;
        let (res_lon, res_lat) = grid.resolution()?;
        let (west, _, south, _) = grid.bbox()?;
        let (nrows, ncols) = values.dim();

        if (res_lon - res_lat).abs() > res_lon.abs() * 1e-6 {
            log::warn!(
                "Grid {} has different x and y resolution, writing cellsize of x",
                grid.name
            );
        }

        let nodata = match grid.fill_value() {
            Some(fill) if fill.is_finite() => fill,
            _ => DEFAULT_NO_DATA,
        };

        let mut file = BufWriter::new(fs::File::create(path)?);
        writeln!(file, "ncols        {}", ncols)?;
        writeln!(file, "nrows        {}", nrows)?;
        writeln!(file, "xllcorner    {}", west - res_lon / 2.0)?;
        writeln!(file, "yllcorner    {}", south - res_lat / 2.0)?;
        writeln!(file, "cellsize     {}", res_lon)?;
        writeln!(file, "NODATA_value {}", nodata)?;

        for row in values.rows() {
            let line: Vec<String> = row
                .iter()
                .map(|v| if v.is_finite() { v.to_string() } else { nodata.to_string() })
                .collect();
            writeln!(file, "{}", line.join(" "))?;
        }

        file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{parse, AsciiGrid};
    use crate::{
        grid::{tests::sample_grid, Payload},
        io::{FileIo, WriteOptions},
    };
    use float_cmp::approx_eq;

    const DEM: &str = "ncols 3\nnrows 2\nxllcorner 12.0\nyllcorner 43.0\ncellsize 0.5\nNODATA_value -9999\n1 2 3\n4 -9999 6\n";

    #[test]
    fn parse_header_and_values() {
        let grid = parse(DEM, "dem").unwrap();

        assert_eq!(grid.values.shape(), &[2, 3]);
        assert!(approx_eq!(f64, grid.lats().unwrap()[0], 43.75, ulps = 2));
        assert!(approx_eq!(f64, grid.lons().unwrap()[2], 13.25, ulps = 2));
        assert_eq!(grid.fill_value(), Some(-9999.0));
        assert!(parse("ncols 3\nnrows 2\n1 2 3", "dem").is_err());
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mask.asc");
        let grid = sample_grid("mask", 3, 4, 1.0);

        AsciiGrid
            .write(&Payload::Grid(grid.clone()), &path, "grid_2d", &WriteOptions::default())
            .unwrap();
        let read = AsciiGrid
            .read(&path, "grid_2d", &["mask".to_string()])
            .unwrap()
            .into_grid()
            .unwrap();

        assert_eq!(read.values.shape(), &[3, 4]);
        for (a, b) in read.lats().unwrap().iter().zip(grid.lats().unwrap()) {
            assert!(approx_eq!(f64, *a, *b, epsilon = 1e-9));
        }
    }
}
