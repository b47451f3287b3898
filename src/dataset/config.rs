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

//! Configuration of a single dataset.
//!
//! The structures in this module directly correspond to the entries of the
//! `datasets` section of the run configuration file. Unknown fields are
//! rejected, so a typo in a dataset definition fails before any data is read.

use crate::{
    errors::ConfigError,
    io::FileFormat,
    key::Tags,
    time::{serde_datetime, TimeDirection, TimeFrequency, TimeSignature},
    Float,
};
use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};
use std::{convert::TryFrom, fmt};

/// Where the data of a dataset come from.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetMode {
    /// Files on the local filesystem.
    Local,

    /// Synthetic data built from the `info` descriptor.
    #[serde(alias = "on-demand", alias = "ondemand")]
    OnDemand,

    /// In-process key/value store.
    Memory,
}

impl Default for DatasetMode {
    fn default() -> Self {
        DatasetMode::Local
    }
}

/// Role of a dataset in a workflow. It decides which side of the
/// `vars_data` table names the workflow variables.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileRole {
    Input,
    Output,
    Tmp,
    Derived,
}

impl Default for FileRole {
    fn default() -> Self {
        FileRole::Input
    }
}

/// Shape of the data produced by an on-demand dataset.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum DataLayout {
    Geo,
    Grid,
    Points,
    TimeSeries,
}

impl Default for DataLayout {
    fn default() -> Self {
        DataLayout::Geo
    }
}

impl TryFrom<String> for DataLayout {
    type Error = ConfigError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        match text.trim().to_lowercase().as_str() {
            "geo" => Ok(DataLayout::Geo),
            "grid" => Ok(DataLayout::Grid),
            "points" | "point" => Ok(DataLayout::Points),
            "time_series" | "ts" | "timeseries" | "time-series" => Ok(DataLayout::TimeSeries),
            _ => Err(ConfigError::InvalidOption(format!(
                "unsupported data layout {}",
                text
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for DataLayout {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        DataLayout::try_from(text).map_err(serde::de::Error::custom)
    }
}

impl DataLayout {
    /// Default dimension names of the layout.
    pub fn default_dims(&self) -> IndexMap<String, String> {
        let names: &[&str] = match self {
            DataLayout::Geo | DataLayout::Grid => &["longitude", "latitude"],
            DataLayout::Points => &["point"],
            DataLayout::TimeSeries => &["time"],
        };

        names
            .iter()
            .map(|name| (name.to_string(), name.to_string()))
            .collect()
    }

    /// Default coordinate names of the layout.
    pub fn default_coords(&self) -> IndexMap<String, String> {
        let names: &[&str] = match self {
            DataLayout::TimeSeries => &["time"],
            _ => &["longitude", "latitude"],
        };

        names
            .iter()
            .map(|name| (name.to_string(), name.to_string()))
            .collect()
    }
}

impl fmt::Display for DataLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataLayout::Geo => "geo",
            DataLayout::Grid => "grid",
            DataLayout::Points => "points",
            DataLayout::TimeSeries => "time_series",
        };
        write!(f, "{}", name)
    }
}

/// Descriptor of synthetic data.
///
/// Raster corners are the lower-left corner of the lower-left cell,
/// coordinates of the built grid are cell centers.
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(untagged)]
pub enum OnDemandInfo {
    Raster {
        x_ll: Float,
        y_ll: Float,
        rows: usize,
        cols: usize,
        res: Float,
        #[serde(default)]
        value: Float,
    },
    Bbox {
        xmin: Float,
        ymin: Float,
        xmax: Float,
        ymax: Float,
        res: Float,
        #[serde(default)]
        value: Float,
    },
    Points {
        lon: Vec<Float>,
        lat: Vec<Float>,
        #[serde(default)]
        value: Float,
    },
}

impl OnDemandInfo {
    pub fn check_bounds(&self) -> Result<(), ConfigError> {
        match self {
            OnDemandInfo::Raster {
                x_ll,
                y_ll,
                rows,
                cols,
                res,
                ..
            } => {
                check_corner(*x_ll, *y_ll)?;
                if *rows < 1 || *cols < 1 {
                    return Err(ConfigError::OutOfBounds(
                        "On-demand raster must have at least one row and one column",
                    ));
                }
                check_resolution(*res)
            }
            OnDemandInfo::Bbox {
                xmin,
                ymin,
                xmax,
                ymax,
                res,
                ..
            } => {
                check_corner(*xmin, *ymin)?;
                check_corner(*xmax, *ymax)?;
                if xmax <= xmin || ymax <= ymin {
                    return Err(ConfigError::OutOfBounds(
                        "On-demand bounding box maximum must exceed its minimum",
                    ));
                }
                check_resolution(*res)
            }
            OnDemandInfo::Points { lon, lat, .. } => {
                if lon.len() != lat.len() || lon.is_empty() {
                    return Err(ConfigError::OutOfBounds(
                        "On-demand points need the same, non-zero, count of lon and lat",
                    ));
                }
                Ok(())
            }
        }
    }
}

fn check_corner(lon: Float, lat: Float) -> Result<(), ConfigError> {
    if !(-90.0..=90.0).contains(&lat) {
        return Err(ConfigError::OutOfBounds(
            "Latitude of on-demand data is too low or too high",
        ));
    }

    if !(-180.0..=360.0).contains(&lon) {
        return Err(ConfigError::OutOfBounds(
            "Longitude of on-demand data is too low or too high",
        ));
    }

    Ok(())
}

fn check_resolution(res: Float) -> Result<(), ConfigError> {
    if res <= 0.0 {
        return Err(ConfigError::OutOfBounds(
            "Resolution of on-demand data must be positive",
        ));
    }
    Ok(())
}

/// Naming tables of a dataset: file dimension, coordinate and
/// variable names mapped to the names used by the workflow.
#[derive(Clone, PartialEq, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariableTemplate {
    #[serde(default)]
    pub dims_geo: IndexMap<String, String>,

    #[serde(default)]
    pub coords_geo: IndexMap<String, String>,

    /// File variable name to workflow variable name.
    #[serde(default)]
    pub vars_data: IndexMap<String, String>,

    /// Workflow names of datasets used as temporary storage.
    #[serde(default)]
    pub vars_wf: Vec<String>,
}

/// Definition of a dataset.
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetConfig {
    #[serde(default)]
    pub file_mode: DatasetMode,

    /// Location pattern of the files.
    #[serde(default, alias = "loc_pattern")]
    pub file_name: Option<String>,

    /// _(Optional)_ File format. Inferred from the extension
    /// of the location pattern when missing.
    #[serde(default)]
    pub file_format: Option<FileFormat>,

    /// Model specific layout of the file content.
    #[serde(default = "DatasetConfig::default_file_type")]
    pub file_type: String,

    #[serde(default)]
    pub file_io: FileRole,

    /// Variable tags of the dataset. A single tag or a list.
    #[serde(default, deserialize_with = "one_or_many")]
    pub file_variable: Vec<String>,

    /// Names of other datasets read together with this one.
    #[serde(default)]
    pub file_deps: Vec<String>,

    /// Append to existing tabular and text files instead of replacing them.
    #[serde(default)]
    pub file_append: bool,

    #[serde(default)]
    pub time_signature: Option<TimeSignature>,

    #[serde(default, with = "serde_datetime::option")]
    pub time_reference: Option<NaiveDateTime>,

    #[serde(default)]
    pub time_freq: Option<TimeFrequency>,

    #[serde(default)]
    pub time_period: Option<usize>,

    #[serde(default)]
    pub time_direction: TimeDirection,

    /// Format of the `time` attribute written with the data.
    #[serde(default = "DatasetConfig::default_time_format")]
    pub time_format: String,

    #[serde(default)]
    pub time_normalize: bool,

    /// No-data value of written and normalized data.
    #[serde(default)]
    pub nan_value: Option<Float>,

    #[serde(default, alias = "file_template")]
    pub variable_template: Option<VariableTemplate>,

    #[serde(default = "DatasetConfig::default_memory_active")]
    pub memory_active: bool,

    /// Extra renaming of variables applied after the `vars_data` table.
    #[serde(default)]
    pub map_in: IndexMap<String, String>,

    /// Default values of the location pattern tags.
    #[serde(default)]
    pub tags: Tags,

    /// Descriptor of on-demand data.
    #[serde(default)]
    pub info: Option<OnDemandInfo>,

    #[serde(default)]
    pub data_layout: DataLayout,

    /// Names of the datasets this one is derived from.
    #[serde(default)]
    pub parents: Vec<String>,
}

impl DatasetConfig {
    fn default_file_type() -> String {
        "grid_2d".to_string()
    }

    fn default_time_format() -> String {
        "%Y-%m-%d %H:%M".to_string()
    }

    fn default_memory_active() -> bool {
        true
    }

    /// Minimal configuration of a local dataset.
    pub fn local(file_name: &str) -> Self {
        DatasetConfig {
            file_name: Some(file_name.to_string()),
            ..DatasetConfig::default()
        }
    }

    /// Minimal configuration of an on-demand dataset.
    pub fn on_demand(info: OnDemandInfo) -> Self {
        DatasetConfig {
            file_mode: DatasetMode::OnDemand,
            info: Some(info),
            ..DatasetConfig::default()
        }
    }

    /// File format, explicit or inferred from the location pattern.
    pub fn format(&self) -> Result<FileFormat, ConfigError> {
        if let Some(format) = self.file_format {
            return Ok(format);
        }

        match (&self.file_mode, &self.file_name) {
            (DatasetMode::OnDemand, None) => Ok(FileFormat::Tmp),
            (_, Some(name)) => FileFormat::from_path(name).ok_or_else(|| {
                ConfigError::InvalidOption(format!("cannot infer the file format of {}", name))
            }),
            (_, None) => Ok(FileFormat::Tmp),
        }
    }

    /// Checks that the options are consistent with each other.
    pub fn check_bounds(&self) -> Result<(), ConfigError> {
        match self.file_mode {
            DatasetMode::Local => {
                if self.file_name.as_deref().map_or(true, str::is_empty) {
                    return Err(ConfigError::OutOfBounds(
                        "Local dataset must define a file name",
                    ));
                }
            }
            DatasetMode::OnDemand => match &self.info {
                Some(info) => info.check_bounds()?,
                None => {
                    return Err(ConfigError::OutOfBounds(
                        "On-demand dataset must define its info",
                    ))
                }
            },
            DatasetMode::Memory => {}
        }

        if let Some(period) = self.time_period {
            if period < 1 {
                return Err(ConfigError::OutOfBounds(
                    "Time period cannot be less than 1",
                ));
            }
            if self.time_reference.is_none() {
                return Err(ConfigError::OutOfBounds(
                    "Time period requires a time reference",
                ));
            }
        }

        if self.time_signature.map_or(false, |s| s.is_single()) && self.time_reference.is_none() {
            return Err(ConfigError::OutOfBounds(
                "Single time signature requires a time reference",
            ));
        }

        self.format()?;

        Ok(())
    }
}

impl Default for DatasetConfig {
    fn default() -> Self {
        DatasetConfig {
            file_mode: DatasetMode::default(),
            file_name: None,
            file_format: None,
            file_type: DatasetConfig::default_file_type(),
            file_io: FileRole::default(),
            file_variable: vec![],
            file_deps: vec![],
            file_append: false,
            time_signature: None,
            time_reference: None,
            time_freq: None,
            time_period: None,
            time_direction: TimeDirection::default(),
            time_format: DatasetConfig::default_time_format(),
            time_normalize: false,
            nan_value: None,
            variable_template: None,
            memory_active: DatasetConfig::default_memory_active(),
            map_in: IndexMap::new(),
            tags: Tags::new(),
            info: None,
            data_layout: DataLayout::default(),
            parents: vec![],
        }
    }
}

pub(crate) fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(one)) => vec![one],
        Some(OneOrMany::Many(many)) => many,
        None => vec![],
    })
}

#[cfg(test)]
mod tests {
    use super::{DataLayout, DatasetConfig, DatasetMode, OnDemandInfo};
    use crate::{io::FileFormat, time::TimeSignature};

    #[test]
    fn local_dataset() {
        let config: DatasetConfig = serde_yaml::from_str(
            "file_name: /data/%Y/%m/%d/{domain}_%Y%m%d%H%M.nc\n\
             file_variable: air_t\n\
             time_signature: end+1\n\
             time_reference: 2024-01-01 00:00\n\
             time_period: 24\n\
             time_freq: 1h\n\
             variable_template:\n  vars_data:\n    2t: AIR_T\n",
        )
        .unwrap();

        config.check_bounds().unwrap();
        assert_eq!(config.file_mode, DatasetMode::Local);
        assert_eq!(config.format().unwrap(), FileFormat::NetCdf);
        assert_eq!(config.file_variable, vec!["air_t"]);
        assert_eq!(config.time_signature, Some(TimeSignature::EndPlusOne));
        assert!(config.memory_active);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let result: Result<DatasetConfig, _> =
            serde_yaml::from_str("file_name: a.csv\nfile_formt: csv\n");
        assert!(result.is_err());
    }

    #[test]
    fn on_demand_raster() {
        let config: DatasetConfig = serde_yaml::from_str(
            "file_mode: on_demand\n\
             data_layout: ts\n\
             file_variable: [terrain]\n\
             info: {x_ll: 12.0, y_ll: 43.0, rows: 10, cols: 10, res: 0.1, value: 1}\n",
        )
        .unwrap();

        config.check_bounds().unwrap();
        assert_eq!(config.data_layout, DataLayout::TimeSeries);
        assert!(matches!(config.info, Some(OnDemandInfo::Raster { rows: 10, .. })));

        let mut broken = config;
        broken.info = Some(OnDemandInfo::Raster {
            x_ll: 12.0,
            y_ll: 43.0,
            rows: 0,
            cols: 10,
            res: 0.1,
            value: 0.0,
        });
        assert!(broken.check_bounds().is_err());
    }

    #[test]
    fn period_requires_reference() {
        let mut config = DatasetConfig::local("a_%Y%m%d.csv");
        config.time_period = Some(3);
        assert!(config.check_bounds().is_err());
    }
}
