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

//! Read and write pipelines of a dataset.

use super::{set_data_to_template, Backend, Dataset, DatasetBackend};
use crate::{
    constants::DEFAULT_TIME_TOLERANCE,
    errors::DatasetError,
    grid::{
        map_coords, map_dims, map_over_container, map_vars, select_by_time, select_variables,
        set_type, straighten_data, straighten_dims, straighten_time, Grid, GridSet, Payload,
        VariableSelection,
    },
    io::{FileFormat, WriteOptions},
    key::Tags,
    time::{TimeFrequency, TimeRequest},
};
use chrono::{Duration, NaiveDateTime};
use indexmap::IndexMap;
use std::collections::BTreeMap;

/// Attribute holding the key the data were read from or written to.
pub const SOURCE_ATTR: &str = "source_location";

/// Options of a single read.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DataRequest {
    pub tags: Tags,

    /// Return the data as stored, skipping every normalization.
    pub as_is: bool,

    /// Variable to extract from multi-variable data.
    pub variable: Option<VariableSelection>,
}

impl DataRequest {
    pub fn tags(tags: &Tags) -> Self {
        DataRequest {
            tags: tags.clone(),
            ..DataRequest::default()
        }
    }
}

/// Checks that data of this container type can be stored in `format`.
pub fn check_data_format(data: &Payload, format: FileFormat) -> Result<(), DatasetError> {
    if format.accepts(data.kind()) {
        Ok(())
    } else {
        Err(DatasetError::IncompatibleFormat {
            data: data.kind().to_string(),
            format: format.to_string(),
        })
    }
}

impl Dataset {
    /// Reads the data at `time`.
    ///
    /// Tabular, text and scratch data are returned as stored and a missing
    /// key yields `None`. Gridded data go through the normalization pipeline;
    /// for them a missing key is an error.
    pub fn get_data(
        &mut self,
        time: Option<&TimeRequest>,
        request: &DataRequest,
    ) -> Result<Option<Payload>, DatasetError> {
        let key = self.get_key(time, &request.tags)?;
        let when = if self.has_time() || self.signature.is_some() {
            self.time_signature(time)
        } else {
            time.map(TimeRequest::start)
        };

        if self.memory_active && !request.as_is {
            if let Some((cached_key, cached)) = &self.memory_data {
                if *cached_key == key {
                    log::debug!("Reusing data of {} cached from {}", self.name, key);
                    let data = cached.clone();
                    return self.finish(data, &key, when, request);
                }
            }
        }

        if !self.format.is_gridded() {
            if !self.backend.exists(&key) {
                log::debug!("No {} data of {} at {}", self.format, self.name, key);
                return Ok(None);
            }

            let data = self.backend.read(&key, &self.read_variables())?;
            if request.as_is || !data.is_gridded() {
                return Ok(Some(data));
            }
            return self.select(data, &key, when, request);
        }

        if !self.backend.exists(&key) {
            return Err(DatasetError::DataNotAvailable(key));
        }

        let raw = self.backend.read(&key, &self.read_variables())?;
        if request.as_is {
            return Ok(Some(raw));
        }

        let data = match self.normalize(raw, when)? {
            Some(data) => data,
            None => {
                log::warn!("No variable of {} left after normalizing {}", self.name, key);
                return Ok(None);
            }
        };

        if let Some(when) = when {
            if let (_, false) = self.check_time_step(when) {
                log::warn!(
                    "Time {} is not a step of the expected time grid of {}",
                    when,
                    self.name
                );
            }
        }

        if self.memory_active {
            self.memory_data = Some((key.clone(), data.clone()));
        }

        self.finish(data, &key, when, request)
    }

    /// Names of the variables to read from the storage.
    fn read_variables(&self) -> Vec<String> {
        match self.backend {
            Backend::OnDemand(_) => self.variables.clone(),
            _ if self.naming.vars_data.is_empty() => self.variables.clone(),
            _ => self.naming.vars_data.keys().cloned().collect(),
        }
    }

    fn normalize(
        &self,
        raw: Payload,
        when: Option<NaiveDateTime>,
    ) -> Result<Option<Payload>, DatasetError> {
        let (grids, attrs): (Vec<Grid>, _) = match raw {
            Payload::Grid(grid) => (vec![grid], BTreeMap::new()),
            Payload::Set(set) => (set.vars.into_iter().map(|(_, grid)| grid).collect(), set.attrs),
            other => return Ok(Some(other)),
        };

        let mut set = GridSet {
            vars: IndexMap::new(),
            attrs,
        };

        for grid in grids {
            if let Some(grid) = self.normalize_grid(grid, when)? {
                set.insert(grid);
            }
        }

        if set.is_empty() {
            return Ok(None);
        }

        Ok(Some(Payload::Set(set).squeeze()))
    }

    fn normalize_grid(
        &self,
        grid: Grid,
        when: Option<NaiveDateTime>,
    ) -> Result<Option<Grid>, DatasetError> {
        let grid = match straighten_dims(grid) {
            Some(grid) => grid,
            None => return Ok(None),
        };

        let grid = map_dims(grid, &self.naming.dims_geo);
        let grid = map_coords(grid, &self.naming.coords_geo)?;

        let mut grid = match map_vars(grid, &self.naming.vars_data) {
            Some(grid) => grid,
            None => return Ok(None),
        };

        if let Some(name) = self.map_in.get(&grid.name) {
            grid.name = name.clone();
        }

        let grid = straighten_data(grid)?;
        let grid = straighten_time(
            grid,
            self.time_reference.or(when),
            self.time_direction,
            self.time_freq.unwrap_or_else(TimeFrequency::hourly),
        )?;

        Ok(Some(set_type(grid, self.nan_value)))
    }

    /// Snaps normalized data onto the template, then selects time and variable.
    fn finish(
        &mut self,
        data: Payload,
        key: &str,
        when: Option<NaiveDateTime>,
        request: &DataRequest,
    ) -> Result<Option<Payload>, DatasetError> {
        if self.template_for(&request.tags).is_none() && data.is_gridded() {
            self.set_template(&data, &request.tags)?;
        }

        let data = match self.template_for(&request.tags) {
            Some(template) => map_over_container(data, |grid| template.apply(grid))?,
            None => data,
        };

        self.select(data, key, when, request)
    }

    fn select(
        &self,
        mut data: Payload,
        key: &str,
        when: Option<NaiveDateTime>,
        request: &DataRequest,
    ) -> Result<Option<Payload>, DatasetError> {
        data.set_attr(SOURCE_ATTR, key);

        let data = select_by_time(data, when, Duration::seconds(DEFAULT_TIME_TOLERANCE))
            .ok_or_else(|| {
                DatasetError::DataNotAvailable(format!(
                    "{} at {}",
                    key,
                    when.map(|t| t.to_string()).unwrap_or_default()
                ))
            })?;

        Ok(Some(match &request.variable {
            Some(selection) => select_variables(data, selection)?,
            None => data.squeeze(),
        }))
    }

    pub(crate) fn write_options(&self, time: Option<&TimeRequest>) -> WriteOptions {
        WriteOptions {
            append: self.append,
            time: self.time_signature(time),
        }
    }

    /// Writes `data` at `time`.
    ///
    /// Gridded data are snapped onto the template (built from the data when
    /// missing), brought back to the file naming and stamped with
    /// `metadata` and production times before being stored.
    pub fn write_data(
        &mut self,
        data: Payload,
        time: Option<&TimeRequest>,
        metadata: &BTreeMap<String, String>,
        tags: &Tags,
    ) -> Result<(), DatasetError> {
        let key = self.get_key(time, tags)?;
        let data = data.squeeze();
        check_data_format(&data, self.format)?;

        if matches!(&self.memory_data, Some((cached, _)) if *cached == key) {
            self.memory_data = None;
        }

        let options = self.write_options(time);

        if self.format.is_tabular() || !data.is_gridded() {
            log::debug!("Writing {} data of {} to {}", data.kind(), self.name, key);
            return self.backend.write(&data, &key, &options);
        }

        let bare = data
            .first_grid()
            .map_or(false, |grid| grid.coords.is_empty());

        let data = if bare {
            let template = self
                .template_for(tags)
                .cloned()
                .ok_or_else(|| DatasetError::MissingTemplate(key.clone()))?;
            set_data_to_template(data, &template)?
        } else {
            let data = map_over_container(data, straighten_data)?;
            if self.template_for(tags).is_none() {
                self.set_template(&data, tags)?;
            }
            data
        };

        let dims_out: IndexMap<String, String> = self
            .naming
            .dims_geo
            .iter()
            .map(|(file, workflow)| (workflow.clone(), file.clone()))
            .collect();

        let template = self.template_for(tags).cloned();
        let mut data = map_over_container(data, |grid| {
            let grid = match &template {
                Some(template) => template.apply(grid)?,
                None => grid,
            };
            let grid = set_type(grid, self.nan_value);
            let grid = self.rename_for_output(grid);
            Ok(map_dims(grid, &dims_out))
        })?;

        self.set_metadata(&mut data, time, metadata)?;
        data.set_attr(SOURCE_ATTR, &key);

        log::debug!("Writing {} data of {} to {}", data.kind(), self.name, key);
        self.backend.write(&data, &key, &options)
    }

    /// Workflow variable names back to file names.
    fn rename_for_output(&self, mut grid: Grid) -> Grid {
        if let Some((file, _)) = self
            .naming
            .vars_data
            .iter()
            .find(|(_, workflow)| **workflow == grid.name)
        {
            grid.name = file.clone();
        }
        grid
    }
}
