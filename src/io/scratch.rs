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

//! Scratch format of intermediate outputs.
//!
//! Payloads are serialized as YAML, which keeps NaN values and the
//! full coordinate metadata of grids.

use super::{FileIo, WriteOptions};
use crate::{errors::CodecError, grid::Payload};
use std::{fs, io::BufWriter, path::Path};

#[derive(Copy, Clone, Debug, Default)]
pub struct Scratch;

impl FileIo for Scratch {
    fn read(
        &self,
        path: &Path,
        _file_type: &str,
        _variables: &[String],
    ) -> Result<Payload, CodecError> {
        let file = fs::File::open(path)?;
        serde_yaml::from_reader(file).map_err(|e| CodecError::Malformed(e.to_string()))
    }

    fn write(
        &self,
        payload: &Payload,
        path: &Path,
        _file_type: &str,
        _options: &WriteOptions,
    ) -> Result<(), CodecError> {
        let file = BufWriter::new(fs::File::create(path)?);
        serde_yaml::to_writer(file, payload).map_err(|e| CodecError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::Scratch;
    use crate::{
        grid::{tests::sample_grid, Payload},
        io::{FileIo, WriteOptions},
    };

    #[test]
    fn nan_survives() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("air_t_interpolate_data_20240101000000.tmp");

        let mut grid = sample_grid("air_t", 2, 3, 1.5);
        grid.values.iter_mut().take(2).for_each(|v| *v = f64::NAN);

        Scratch
            .write(&Payload::Grid(grid.clone()), &path, "", &WriteOptions::default())
            .unwrap();
        let read = Scratch.read(&path, "", &[]).unwrap().into_grid().unwrap();

        assert_eq!(read.coords, grid.coords);
        assert_eq!(read.values.iter().filter(|v| v.is_nan()).count(), 2);
        assert_eq!(read.values.iter().filter(|v| **v == 1.5).count(), 4);
    }
}
