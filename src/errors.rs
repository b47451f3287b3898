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

use thiserror::Error;

/// Top-level error returned by the toolkit driver.
#[derive(Error, Debug)]
pub enum ShyboxError {
    #[error("Error while reading configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Error while handling dataset: {0}")]
    Dataset(#[from] DatasetError),

    #[error("Error while running orchestrator: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("Cannot set the memory limit of the allocator")]
    MemoryLimit,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot open configuration file: {0}")]
    CantOpenFile(#[from] std::io::Error),

    #[error("Cannot deserialize configuration file: {0}")]
    CantDeserialize(#[from] serde_yaml::Error),

    #[error("Configuration component is out of bounds {0}")]
    OutOfBounds(&'static str),

    #[error("Configuration option is invalid: {0}")]
    InvalidOption(String),

    #[error("Time setting is invalid: {0}")]
    Time(#[from] TimeError),
}

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Path {path} does not match location pattern {pattern}")]
    PatternMismatch { path: String, pattern: String },

    #[error("Location pattern contains an unsupported date directive: {0}")]
    InvalidDirective(String),

    #[error("Tag {0} is not resolved in location pattern")]
    UnresolvedTag(String),

    #[error("Cannot build the pattern expression: {0}")]
    InvalidExpression(#[from] regex::Error),

    #[error("Extracted date is not valid: {0}")]
    InvalidDate(String),

    #[error("Cannot format key: {0}")]
    Format(#[from] std::fmt::Error),
}

#[derive(Error, Debug)]
pub enum TimeError {
    #[error("Time signature {0} is not recognized")]
    InvalidSignature(String),

    #[error("Time frequency {0} is not recognized")]
    InvalidFrequency(String),

    #[error("Time direction {0} is not recognized")]
    InvalidDirection(String),

    #[error("Cannot parse datetime {0}")]
    InvalidDatetime(String),

    #[error("Time reference is required to build {0}")]
    MissingReference(&'static str),
}

#[derive(Error, Debug)]
pub enum GridError {
    #[error("Array shape is inconsistent: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("Dimension {0} is not available")]
    MissingDimension(String),

    #[error("Coordinate {0} is not available")]
    MissingCoordinate(String),

    #[error("Grid does not match the reference: {0}")]
    Mismatch(String),

    #[error("Variable {0} is not available")]
    MissingVariable(String),

    #[error("Selection returned no data: {0}")]
    EmptySelection(String),
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Cannot access file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot handle csv file: {0}")]
    Csv(#[from] csv::Error),

    #[error("Cannot handle json file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("File format {0} has no registered codec")]
    UnsupportedFormat(String),

    #[error("File content is malformed: {0}")]
    Malformed(String),

    #[error("Cannot build grid from file: {0}")]
    Grid(#[from] GridError),

    #[cfg(feature = "grib")]
    #[error("Cannot handle GRIB file: {0}")]
    Grib(#[from] eccodes::errors::CodesError),
}

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Key resolution failed: {0}")]
    Key(#[from] KeyError),

    #[error("Time handling failed: {0}")]
    Time(#[from] TimeError),

    #[error("Grid handling failed: {0}")]
    Grid(#[from] GridError),

    #[error("Codec failed: {0}")]
    Codec(#[from] CodecError),

    #[error("Data are not available at {0}")]
    DataNotAvailable(String),

    #[error("Data of type {data} cannot be written in format {format}")]
    IncompatibleFormat { data: String, format: String },

    #[error("Dataset {0} has no parents to derive data from")]
    NoParents(String),

    #[error("Template is required to write a bare array to {0}")]
    MissingTemplate(String),

    #[error("Dataset configuration is invalid: {0}")]
    Configuration(String),

    #[error("Cannot remove data: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Argument {0} is required by the process")]
    MissingArgument(String),

    #[error("Dependency variable {0} is not provided by any input")]
    UnmatchedDependency(String),

    #[error("Parameter is invalid: {0}")]
    InvalidParameter(String),

    #[error("Physical quantity out of reasonable bounds: {0}")]
    Physics(String),

    #[error("Process {0} is not registered")]
    UnknownProcess(String),

    #[error("Dependency list contains an entry which is not a dataset: {0}")]
    InvalidDependency(String),

    #[error("Process output has an unknown type")]
    UnknownOutputType,

    #[error("Grid handling failed: {0}")]
    Grid(#[from] GridError),

    #[error("Dataset handling failed: {0}")]
    Dataset(#[from] DatasetError),
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Process failed: {0}")]
    Process(#[from] ProcessError),

    #[error("Dataset handling failed: {0}")]
    Dataset(#[from] DatasetError),

    #[error("Time handling failed: {0}")]
    Time(#[from] TimeError),

    #[error("Cannot handle scratch directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Workflow configuration is invalid: {0}")]
    Workflow(String),

    #[error("Dataset {0} is not defined")]
    MissingDataset(String),
}
