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

//! Module with file formats and the codecs reading and writing them.
//!
//! Every format is handled by an implementation of [`FileIo`] registered in
//! [`Codecs`]. The crate ships codecs for ESRI ASCII grids, csv, json, plain
//! text and the scratch format used for intermediate outputs, plus GRIB with
//! the `grib` feature. NetCDF, GeoTIFF and shapefile codecs are not bundled;
//! they can be registered by the caller.

mod ascii_grid;
#[cfg(feature = "grib")]
mod grib;
mod scratch;
mod table;

pub use ascii_grid::AsciiGrid;
#[cfg(feature = "grib")]
pub use grib::GribReader;
pub use scratch::Scratch;
pub use table::{CsvTable, JsonDocument, PlainText};

use crate::{
    errors::CodecError,
    grid::{Payload, PayloadKind},
};
use chrono::NaiveDateTime;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::{fmt, path::Path, str::FromStr};

/// Format of the files of a dataset.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Deserialize)]
#[serde(try_from = "String")]
pub enum FileFormat {
    NetCdf,
    GeoTiff,
    Grib,
    Ascii,
    Csv,
    Json,
    Txt,
    Shp,
    File,
    Tmp,
}

impl FileFormat {
    /// Guesses the format from the extension of a path.
    pub fn from_path(path: &str) -> Option<Self> {
        let extension = Path::new(path).extension()?.to_str()?;
        extension.parse().ok()
    }

    /// Formats read and written without the gridded pipeline.
    pub fn is_tabular(&self) -> bool {
        matches!(
            self,
            FileFormat::Csv | FileFormat::Json | FileFormat::Txt | FileFormat::Shp
        )
    }

    pub fn is_gridded(&self) -> bool {
        matches!(
            self,
            FileFormat::NetCdf | FileFormat::GeoTiff | FileFormat::Grib | FileFormat::Ascii
        )
    }

    /// Whether data of the given container type can be written in the format.
    pub fn accepts(&self, kind: PayloadKind) -> bool {
        match self {
            FileFormat::NetCdf | FileFormat::Grib => {
                matches!(kind, PayloadKind::Grid | PayloadKind::Set)
            }
            FileFormat::GeoTiff | FileFormat::Ascii => kind == PayloadKind::Grid,
            FileFormat::Txt | FileFormat::File => kind == PayloadKind::Text,
            FileFormat::Json => matches!(kind, PayloadKind::Json | PayloadKind::Table),
            FileFormat::Csv | FileFormat::Shp => kind == PayloadKind::Table,
            FileFormat::Tmp => true,
        }
    }

    /// Conventional extension of the format.
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::NetCdf => "nc",
            FileFormat::GeoTiff => "tif",
            FileFormat::Grib => "grib",
            FileFormat::Ascii => "asc",
            FileFormat::Csv => "csv",
            FileFormat::Json => "json",
            FileFormat::Txt => "txt",
            FileFormat::Shp => "shp",
            FileFormat::File => "bin",
            FileFormat::Tmp => "tmp",
        }
    }
}

impl FromStr for FileFormat {
    type Err = CodecError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text.trim().to_lowercase().as_str() {
            "netcdf" | "nc" | "nc4" => Ok(FileFormat::NetCdf),
            "geotiff" | "tiff" | "tif" => Ok(FileFormat::GeoTiff),
            "grib" | "grib2" | "grb" | "grb2" => Ok(FileFormat::Grib),
            "ascii" | "asc" => Ok(FileFormat::Ascii),
            "csv" => Ok(FileFormat::Csv),
            "json" => Ok(FileFormat::Json),
            "txt" | "text" => Ok(FileFormat::Txt),
            "shp" | "shapefile" => Ok(FileFormat::Shp),
            "file" | "bin" => Ok(FileFormat::File),
            "tmp" => Ok(FileFormat::Tmp),
            _ => Err(CodecError::UnsupportedFormat(text.to_string())),
        }
    }
}

impl std::convert::TryFrom<String> for FileFormat {
    type Error = CodecError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        text.parse()
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileFormat::NetCdf => "netcdf",
            FileFormat::GeoTiff => "geotiff",
            FileFormat::Grib => "grib",
            FileFormat::Ascii => "ascii",
            FileFormat::Csv => "csv",
            FileFormat::Json => "json",
            FileFormat::Txt => "txt",
            FileFormat::Shp => "shp",
            FileFormat::File => "file",
            FileFormat::Tmp => "tmp",
        };
        write!(f, "{}", name)
    }
}

/// Options of a single write.
#[derive(Clone, Debug, Default)]
pub struct WriteOptions {
    /// Append to an existing file (tabular and text formats only).
    pub append: bool,

    /// Time of the written data.
    pub time: Option<NaiveDateTime>,
}

/// Capability of reading and writing one file format.
pub trait FileIo {
    /// Reads a file. `variables` restricts the variables read from
    /// multi-variable files, an empty slice reads all of them.
    fn read(&self, path: &Path, file_type: &str, variables: &[String])
        -> Result<Payload, CodecError>;

    fn write(
        &self,
        payload: &Payload,
        path: &Path,
        file_type: &str,
        options: &WriteOptions,
    ) -> Result<(), CodecError>;
}

/// Registry of codecs by file format.
pub struct Codecs {
    codecs: FxHashMap<FileFormat, Box<dyn FileIo>>,
}

impl Codecs {
    /// Registry without any codec.
    pub fn empty() -> Self {
        Codecs {
            codecs: FxHashMap::default(),
        }
    }

    /// Registers (or replaces) the codec of a format.
    pub fn register(&mut self, format: FileFormat, codec: Box<dyn FileIo>) {
        self.codecs.insert(format, codec);
    }

    pub fn supports(&self, format: FileFormat) -> bool {
        self.codecs.contains_key(&format)
    }

    fn codec(&self, format: FileFormat) -> Result<&dyn FileIo, CodecError> {
        self.codecs
            .get(&format)
            .map(|codec| codec.as_ref())
            .ok_or_else(|| CodecError::UnsupportedFormat(format.to_string()))
    }

    pub fn read(
        &self,
        path: &Path,
        format: FileFormat,
        file_type: &str,
        variables: &[String],
    ) -> Result<Payload, CodecError> {
        log::debug!("Reading {} file {}", format, path.display());
        self.codec(format)?.read(path, file_type, variables)
    }

    pub fn write(
        &self,
        payload: &Payload,
        path: &Path,
        format: FileFormat,
        file_type: &str,
        options: &WriteOptions,
    ) -> Result<(), CodecError> {
        log::debug!("Writing {} file {}", format, path.display());

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        self.codec(format)?.write(payload, path, file_type, options)
    }
}

impl Default for Codecs {
    fn default() -> Self {
        let mut codecs = Codecs::empty();

        codecs.register(FileFormat::Ascii, Box::new(AsciiGrid));
        codecs.register(FileFormat::Csv, Box::new(CsvTable::default()));
        codecs.register(FileFormat::Json, Box::new(JsonDocument));
        codecs.register(FileFormat::Txt, Box::new(PlainText));
        codecs.register(FileFormat::File, Box::new(PlainText));
        codecs.register(FileFormat::Tmp, Box::new(Scratch));

        #[cfg(feature = "grib")]
        codecs.register(FileFormat::Grib, Box::new(GribReader));

        codecs
    }
}
