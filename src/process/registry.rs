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

//! Table of the processes a workflow can chain.

use super::{compute, functions, radiation, series, Params};
use crate::{
    errors::ProcessError,
    grid::{Grid, Payload},
};
use chrono::NaiveDateTime;
use indexmap::IndexMap;
use std::fmt;

/// Everything a process function receives for one time step.
pub struct ProcessInput<'a> {
    /// Fetched payloads tagged with the variable of their source.
    pub data: Vec<(String, Payload)>,

    /// Payloads bound to named arguments (dependencies, static datasets).
    pub args: IndexMap<String, Payload>,

    pub time: Option<NaiveDateTime>,
    pub reference: Option<&'a Grid>,
    pub params: &'a Params,
}

impl<'a> ProcessInput<'a> {
    /// First fetched payload.
    pub fn first(&self) -> Result<&Payload, ProcessError> {
        self.data
            .first()
            .map(|(_, payload)| payload)
            .ok_or_else(|| ProcessError::MissingArgument("data".to_string()))
    }

    pub fn arg(&self, name: &str) -> Result<&Payload, ProcessError> {
        self.args
            .get(name)
            .ok_or_else(|| ProcessError::MissingArgument(name.to_string()))
    }

    /// Grid bound to `name`, squeezed from a single-variable set if needed.
    pub fn arg_grid(&self, name: &str) -> Result<Grid, ProcessError> {
        Ok(self.arg(name)?.clone().into_grid()?)
    }

    pub fn reference(&self) -> Result<&'a Grid, ProcessError> {
        self.reference
            .ok_or_else(|| ProcessError::MissingArgument("reference".to_string()))
    }
}

pub type ProcessFn = fn(&ProcessInput) -> Result<Payload, ProcessError>;

/// Registered process: its function and the file extension of its output.
#[derive(Clone, Copy)]
pub struct ProcessEntry {
    pub name: &'static str,
    pub function: ProcessFn,
    pub output_ext: &'static str,
}

impl fmt::Debug for ProcessEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProcessEntry({} -> {})", self.name, self.output_ext)
    }
}

/// Process table looked up by name when a workflow is built.
#[derive(Clone, Debug)]
pub struct ProcessRegistry {
    entries: IndexMap<&'static str, ProcessEntry>,
}

impl ProcessRegistry {
    pub fn empty() -> Self {
        ProcessRegistry {
            entries: IndexMap::new(),
        }
    }

    pub fn register(&mut self, name: &'static str, function: ProcessFn, output_ext: &'static str) {
        self.entries.insert(
            name,
            ProcessEntry {
                name,
                function,
                output_ext,
            },
        );
    }

    pub fn get(&self, name: &str) -> Result<ProcessEntry, ProcessError> {
        self.entries
            .get(name)
            .copied()
            .ok_or_else(|| ProcessError::UnknownProcess(name.to_string()))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.keys().copied().collect()
    }
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        let mut registry = ProcessRegistry::empty();

        registry.register("interpolate_data", functions::interpolate_data, "tmp");
        registry.register("mask_data_by_ref", functions::mask_data_by_ref, "tmp");
        registry.register("mask_data_by_limits", functions::mask_data_by_limits, "tmp");
        registry.register("merge_data_by_ref", functions::merge_data_by_ref, "tmp");
        registry.register("compute_data_rh", compute::compute_data_rh, "tmp");
        registry.register(
            "compute_data_incoming_radiation",
            radiation::compute_data_incoming_radiation,
            "tmp",
        );
        registry.register(
            "compute_data_astronomic_radiation",
            radiation::compute_data_astronomic_radiation,
            "tmp",
        );
        registry.register("compute_data_wind_speed", compute::compute_data_wind_speed, "tmp");
        registry.register(
            "convert_temperature_units",
            compute::convert_temperature_units,
            "tmp",
        );
        registry.register(
            "join_time_series_by_registry",
            series::join_time_series_by_registry,
            "csv",
        );

        registry
    }
}
