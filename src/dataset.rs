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

//! Module with the dataset entity.
//!
//! A [`Dataset`] is one logical, time-indexed (or static) resource: a location
//! pattern, a time signature, naming tables and a storage backend. Reads go
//! through a normalization pipeline and are snapped onto a geometry template
//! built on the first read, so that every grid of the dataset shares the
//! same coordinates.

mod backend;
pub mod config;
mod namespace;
mod pipeline;

pub use backend::{Backend, DatasetBackend, LocalFiles, MemoryStore, OnDemand};
pub use config::{
    DataLayout, DatasetConfig, DatasetMode, FileRole, OnDemandInfo, VariableTemplate,
};
pub use namespace::{DatasetNamespace, NamespaceEntry};
pub use pipeline::{check_data_format, DataRequest};

use crate::{
    errors::DatasetError,
    grid::{Grid, GridSet, Payload, Template},
    io::{Codecs, FileFormat},
    key::{LocationPattern, Tags},
    time::{ExpectedTimeGrid, TimeDirection, TimeFrequency, TimeRequest, TimeSignature, TimeStepKind},
    Float,
};
use chrono::{NaiveDate, NaiveDateTime};
use indexmap::IndexMap;
use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, BTreeSet},
    rc::Rc,
};

/// Dataset shared between the processes of a workflow.
pub type SharedDataset = Rc<RefCell<Dataset>>;

/// Function deriving the data of a dataset from the data of its parents.
pub type Combiner = fn(Vec<Payload>) -> Result<Payload, DatasetError>;

/// Template key of datasets without tiles.
pub const DEFAULT_TILE: &str = "__tile__";

/// Tag of the tiles of a dataset.
pub const TILE_TAG: &str = "tile";

/// Outcome of a readability check.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Readability {
    /// The key still has unresolved tags or date directives.
    Template,
    /// Nothing (or an empty file) is stored at the key.
    Missing,
    /// The key points to scratch data of the current run.
    Temporary,
    Ready,
}

/// Timestamps and tag values found among the stored keys of a dataset.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AvailableTags {
    pub times: Vec<NaiveDateTime>,
    pub tags: BTreeMap<String, Vec<String>>,
}

#[derive(Clone, Debug)]
pub struct Dataset {
    pub name: String,
    pub pattern: LocationPattern,
    pub format: FileFormat,
    pub file_type: String,
    pub mode: DatasetMode,
    pub role: FileRole,

    /// Variable tags of the dataset.
    pub variables: Vec<String>,
    pub namespace: DatasetNamespace,
    pub naming: VariableTemplate,
    pub map_in: IndexMap<String, String>,

    /// Names of datasets read together with this one.
    pub deps: Vec<String>,

    pub signature: Option<TimeSignature>,
    pub time_reference: Option<NaiveDateTime>,
    pub time_freq: Option<TimeFrequency>,
    pub time_direction: TimeDirection,
    pub time_format: String,
    expected: Option<ExpectedTimeGrid>,

    pub nan_value: Option<Float>,
    pub append: bool,
    pub memory_active: bool,

    /// Default tag values.
    pub tags: Tags,
    tile_names: Option<Vec<String>>,

    memory_data: Option<(String, Payload)>,
    templates: BTreeMap<String, Template>,
    previous_time: Cell<Option<(NaiveDateTime, Option<i64>)>>,

    backend: Backend,
    parents: Vec<SharedDataset>,
    combiner: Option<Combiner>,
}

impl Dataset {
    /// Builds the dataset described by `config`.
    pub fn from_config(
        name: &str,
        config: &DatasetConfig,
        codecs: Rc<Codecs>,
    ) -> Result<Self, DatasetError> {
        config
            .check_bounds()
            .map_err(|e| DatasetError::Configuration(format!("{}: {}", name, e)))?;

        let format = config
            .format()
            .map_err(|e| DatasetError::Configuration(e.to_string()))?;

        let files = LocalFiles::new(format, &config.file_type, codecs);

        let (backend, pattern) = match config.file_mode {
            DatasetMode::Local => (
                Backend::Local(files),
                config.file_name.clone().unwrap_or_default(),
            ),
            DatasetMode::OnDemand => {
                let info = config.info.clone().ok_or_else(|| {
                    DatasetError::Configuration(format!("{} has no on-demand info", name))
                })?;
                let variable = config
                    .file_variable
                    .first()
                    .map(String::as_str)
                    .unwrap_or(name);
                (
                    Backend::OnDemand(OnDemand::new(info, config.data_layout, variable, files)),
                    config.file_name.clone().unwrap_or_default(),
                )
            }
            DatasetMode::Memory => (
                Backend::Memory(MemoryStore::new()),
                config
                    .file_name
                    .clone()
                    .unwrap_or_else(|| format!("{}_%Y%m%d%H%M%S.{}", name, format.extension())),
            ),
        };

        let mut naming = config.variable_template.clone().unwrap_or_default();
        if naming.dims_geo.is_empty() {
            naming.dims_geo = config.data_layout.default_dims();
        }
        if naming.coords_geo.is_empty() {
            naming.coords_geo = config.data_layout.default_coords();
        }

        let workflows = DatasetNamespace::workflows(config.file_io, &naming);
        let namespace = DatasetNamespace::new(&config.file_variable, &workflows);

        let freq = config.time_freq;
        let expected = match (config.time_reference, config.time_period) {
            (Some(reference), Some(period)) => Some(ExpectedTimeGrid::new(
                reference,
                period,
                freq.unwrap_or_else(TimeFrequency::hourly),
                config.time_direction,
                config.time_normalize,
            )),
            (Some(reference), None) if config.time_signature.map_or(false, |s| s.is_single()) => {
                Some(ExpectedTimeGrid::new(
                    reference,
                    1,
                    freq.unwrap_or_else(TimeFrequency::hourly),
                    TimeDirection::Single,
                    config.time_normalize,
                ))
            }
            _ => None,
        };

        log::debug!(
            "Dataset {} ({:?} {} {})",
            name,
            config.file_mode,
            format,
            pattern
        );

        Ok(Dataset {
            name: name.to_string(),
            pattern: LocationPattern::new(pattern),
            format,
            file_type: config.file_type.clone(),
            mode: config.file_mode,
            role: config.file_io,
            variables: config.file_variable.clone(),
            namespace,
            naming,
            map_in: config.map_in.clone(),
            deps: config.file_deps.clone(),
            signature: config.time_signature,
            time_reference: config.time_reference,
            time_freq: freq,
            time_direction: config.time_direction,
            time_format: config.time_format.clone(),
            expected,
            nan_value: config.nan_value,
            append: config.file_append,
            memory_active: config.memory_active,
            tags: config.tags.clone(),
            tile_names: None,
            memory_data: None,
            templates: BTreeMap::new(),
            previous_time: Cell::new(None),
            backend,
            parents: vec![],
            combiner: None,
        })
    }

    pub fn into_shared(self) -> SharedDataset {
        Rc::new(RefCell::new(self))
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn has_time(&self) -> bool {
        self.pattern.has_time()
    }

    pub fn has_tiles(&self) -> bool {
        self.pattern.tags().iter().any(|tag| tag == TILE_TAG)
    }

    /// Workflow name of the first variable, or the dataset name.
    pub fn workflow(&self) -> String {
        self.namespace
            .iter()
            .next()
            .map(|entry| entry.workflow.clone())
            .unwrap_or_else(|| self.name.clone())
    }

    /// Default tags overridden by `tags`.
    fn merged_tags(&self, tags: &Tags) -> Tags {
        let mut merged = self.tags.clone();
        merged.extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    /// Single instant encoded in the key for the requested time.
    pub fn time_signature(&self, time: Option<&TimeRequest>) -> Option<NaiveDateTime> {
        if self.signature.map_or(false, |s| s.is_single()) {
            return self.time_reference;
        }

        let request = time?;
        let projected = self.signature.unwrap_or(TimeSignature::Start).project(request);

        let length = match *request {
            // repeated requests of the same instant keep its length
            TimeRequest::Instant(current) => match self.previous_time.get() {
                Some((previous, length)) if previous == current => length,
                previous => {
                    let length = previous.map(|(previous, _)| (current - previous).num_days().abs());
                    self.previous_time.set(Some((current, length)));
                    length
                }
            },
            TimeRequest::Interval { .. } => request.length_days(),
        };

        Some(self.pattern.normalize_time(projected, length))
    }

    /// Resolves the key of the data at `time`.
    pub fn get_key(&self, time: Option<&TimeRequest>, tags: &Tags) -> Result<String, DatasetError> {
        let time = if self.has_time() {
            self.time_signature(time)
        } else {
            None
        };

        Ok(self.pattern.resolve(time, &self.merged_tags(tags))?)
    }

    /// Directory below which every key within `range` is stored.
    pub fn get_prefix(
        &self,
        range: Option<(NaiveDateTime, NaiveDateTime)>,
        tags: &Tags,
    ) -> Result<String, DatasetError> {
        Ok(self.pattern.prefix(range, &self.merged_tags(tags))?)
    }

    /// Index of `time` in the expected time grid and whether it belongs to it.
    /// Datasets without an expected grid accept every time.
    pub fn check_time_step(&self, time: NaiveDateTime) -> (Option<usize>, bool) {
        match &self.expected {
            Some(expected) => expected.check_time_step(time),
            None => (None, true),
        }
    }

    pub fn get_time_step(&self, kind: TimeStepKind) -> Option<(NaiveDateTime, usize)> {
        self.expected.as_ref()?.get_time_step(kind)
    }

    pub fn expected_steps(&self) -> Option<&[NaiveDateTime]> {
        self.expected.as_ref().map(ExpectedTimeGrid::steps)
    }

    /// Stored keys of the pattern family, within `range` when given.
    pub fn available_keys(
        &self,
        range: Option<(NaiveDateTime, NaiveDateTime)>,
        tags: &Tags,
    ) -> Result<Vec<String>, DatasetError> {
        let tags = self.merged_tags(tags);
        let prefix = self.pattern.prefix(range, &tags)?;
        let pattern = self.pattern.with_tags(&tags)?;
        let has_time = pattern.has_time();

        Ok(self
            .backend
            .walk(&prefix)
            .into_iter()
            .filter(|key| match pattern.extract(key) {
                Ok((time, _)) => match range {
                    Some((start, end)) if has_time => time >= start && time <= end,
                    _ => true,
                },
                Err(_) => false,
            })
            .collect())
    }

    /// Times and tag values of the stored keys.
    pub fn available_tags(
        &self,
        range: Option<(NaiveDateTime, NaiveDateTime)>,
        tags: &Tags,
    ) -> Result<AvailableTags, DatasetError> {
        let tags = self.merged_tags(tags);
        let pattern = self.pattern.with_tags(&tags)?;

        let mut times = BTreeSet::new();
        let mut values: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for key in self.available_keys(range, &tags)? {
            let (time, found) = pattern.extract(&key)?;
            if pattern.has_time() {
                times.insert(time);
            }
            for (tag, value) in found {
                values.entry(tag).or_default().insert(value);
            }
        }

        Ok(AvailableTags {
            times: times.into_iter().collect(),
            tags: values
                .into_iter()
                .map(|(tag, values)| (tag, values.into_iter().collect()))
                .collect(),
        })
    }

    /// Earliest stored time.
    pub fn get_first_date(&self, tags: &Tags) -> Result<Option<NaiveDateTime>, DatasetError> {
        Ok(self.available_tags(None, tags)?.times.first().copied())
    }

    pub fn get_last_date(&self, tags: &Tags) -> Result<Option<NaiveDateTime>, DatasetError> {
        Ok(self.available_tags(None, tags)?.times.last().copied())
    }

    /// Times available within `range`: the stored ones and those all the
    /// parents can provide.
    pub fn get_times(
        &self,
        range: (NaiveDateTime, NaiveDateTime),
        tags: &Tags,
    ) -> Result<Vec<NaiveDateTime>, DatasetError> {
        let mut times: BTreeSet<NaiveDateTime> =
            self.available_tags(Some(range), tags)?.times.into_iter().collect();

        let mut shared: Option<BTreeSet<NaiveDateTime>> = None;
        for parent in &self.parents {
            let parent_times: BTreeSet<NaiveDateTime> =
                parent.borrow().get_times(range, tags)?.into_iter().collect();
            shared = Some(match shared {
                Some(shared) => shared.intersection(&parent_times).copied().collect(),
                None => parent_times,
            });
        }

        times.extend(shared.unwrap_or_default());

        Ok(times
            .into_iter()
            .filter(|time| *time >= range.0 && *time <= range.1)
            .collect())
    }

    /// Subset of `times` with (or, with `rev`, without) stored data.
    pub fn find_times(
        &self,
        times: &[TimeRequest],
        rev: bool,
        tags: &Tags,
    ) -> Result<Vec<TimeRequest>, DatasetError> {
        let projected: Vec<Option<NaiveDateTime>> = times
            .iter()
            .map(|time| self.time_signature(Some(time)))
            .collect();

        let range = match (
            projected.iter().flatten().min(),
            projected.iter().flatten().max(),
        ) {
            (Some(start), Some(end)) => Some((*start, *end)),
            _ => None,
        };
        let stored: BTreeSet<NaiveDateTime> =
            self.available_tags(range, tags)?.times.into_iter().collect();

        Ok(times
            .iter()
            .zip(projected)
            .filter(|(_, time)| time.map_or(false, |t| stored.contains(&t)) != rev)
            .map(|(request, _)| *request)
            .collect())
    }

    /// Tiles of the dataset: explicit names, or those found among the stored keys.
    pub fn tile_names(&mut self) -> Result<Vec<String>, DatasetError> {
        if !self.has_tiles() {
            return Ok(vec![DEFAULT_TILE.to_string()]);
        }

        if self.tile_names.is_none() {
            let found = self
                .available_tags(None, &Tags::new())?
                .tags
                .remove(TILE_TAG)
                .unwrap_or_default();
            self.tile_names = Some(found);
        }

        Ok(self.tile_names.clone().unwrap_or_default())
    }

    pub fn set_tile_names(&mut self, names: Vec<String>) {
        self.tile_names = Some(names);
    }

    /// Tiles with (or, with `rev`, without) data at `time`.
    pub fn find_tiles(
        &mut self,
        time: Option<&TimeRequest>,
        rev: bool,
        tags: &Tags,
    ) -> Result<Vec<String>, DatasetError> {
        let mut found = vec![];
        for tile in self.tile_names()? {
            let mut tile_tags = tags.clone();
            tile_tags.insert(TILE_TAG.to_string(), tile.clone());
            if self.check_data(time, &tile_tags)? != rev {
                found.push(tile);
            }
        }
        Ok(found)
    }

    /// Whether data exist at `time`. Tiled datasets without a `tile` tag
    /// require every tile.
    pub fn check_data(&self, time: Option<&TimeRequest>, tags: &Tags) -> Result<bool, DatasetError> {
        if self.has_tiles() && !self.merged_tags(tags).contains_key(TILE_TAG) {
            let tiles = match &self.tile_names {
                Some(tiles) => tiles.clone(),
                None => self
                    .available_tags(None, tags)?
                    .tags
                    .remove(TILE_TAG)
                    .unwrap_or_default(),
            };
            for tile in tiles {
                let mut tile_tags = tags.clone();
                tile_tags.insert(TILE_TAG.to_string(), tile);
                if !self.check_data(time, &tile_tags)? {
                    return Ok(false);
                }
            }
            return Ok(true);
        }

        let key = self.get_key(time, tags)?;
        Ok(self.backend.exists(&key))
    }

    pub fn is_readable(
        &self,
        time: Option<&TimeRequest>,
        tags: &Tags,
    ) -> Result<Readability, DatasetError> {
        if self.has_time() && time.is_none() && !self.signature.map_or(false, |s| s.is_single()) {
            return Ok(Readability::Template);
        }

        let key = self.get_key(time, tags)?;
        if key.contains('{') {
            return Ok(Readability::Template);
        }

        if let Backend::OnDemand(_) = self.backend {
            return Ok(Readability::Ready);
        }

        if !self.backend.exists(&key) || self.backend.size(&key) == Some(0) {
            return Ok(Readability::Missing);
        }

        if self.role == FileRole::Tmp {
            return Ok(Readability::Temporary);
        }

        Ok(Readability::Ready)
    }

    /// Copies the data at `time` to the key of `new_pattern`.
    pub fn copy_data(
        &mut self,
        new_pattern: &str,
        time: Option<&TimeRequest>,
        tags: &Tags,
    ) -> Result<(), DatasetError> {
        let data = self
            .get_data(time, &DataRequest::tags(tags))?
            .ok_or_else(|| DatasetError::DataNotAvailable(self.name.clone()))?;

        let new_pattern = LocationPattern::new(new_pattern);
        let new_key = new_pattern.resolve(self.time_signature(time), &self.merged_tags(tags))?;

        log::debug!("Copying {} data to {}", self.name, new_key);
        self.backend.write(&data, &new_key, &self.write_options(time))
    }

    pub fn rm_data(&mut self, time: Option<&TimeRequest>, tags: &Tags) -> Result<(), DatasetError> {
        let key = self.get_key(time, tags)?;
        if matches!(&self.memory_data, Some((cached, _)) if *cached == key) {
            self.memory_data = None;
        }
        self.backend.remove(&key)
    }

    pub fn move_data(
        &mut self,
        new_pattern: &str,
        time: Option<&TimeRequest>,
        tags: &Tags,
    ) -> Result<(), DatasetError> {
        self.copy_data(new_pattern, time, tags)?;
        self.rm_data(time, tags)
    }

    /// Removes every stored key of the dataset.
    pub fn purge(&mut self) -> Result<usize, DatasetError> {
        let keys = self.available_keys(None, &Tags::new())?;
        for key in &keys {
            self.backend.remove(key)?;
        }
        self.memory_data = None;
        Ok(keys.len())
    }

    pub fn set_parents(&mut self, parents: Vec<SharedDataset>, combiner: Combiner) {
        self.parents = parents;
        self.combiner = Some(combiner);
    }

    pub fn parents(&self) -> &[SharedDataset] {
        &self.parents
    }

    /// Derives the data at `time` from the parents, writes and returns them.
    pub fn make_data(
        &mut self,
        time: Option<&TimeRequest>,
        tags: &Tags,
    ) -> Result<Payload, DatasetError> {
        let combiner = match (self.parents.is_empty(), self.combiner) {
            (false, Some(combiner)) => combiner,
            _ => return Err(DatasetError::NoParents(self.name.clone())),
        };

        let request = DataRequest::tags(tags);
        let mut inputs = Vec::with_capacity(self.parents.len());
        for parent in &self.parents {
            let mut parent = parent.borrow_mut();
            let data = parent
                .get_data(time, &request)?
                .ok_or_else(|| DatasetError::DataNotAvailable(parent.name.clone()))?;
            inputs.push(data);
        }

        let data = combiner(inputs)?;
        self.write_data(data.clone(), time, &BTreeMap::new(), tags)?;

        Ok(data)
    }

    /// Whether the keys of this dataset are members of the family of `other`.
    pub fn is_subdataset(&self, other: &Dataset) -> bool {
        let sample = NaiveDate::from_ymd_opt(1900, 1, 1).and_then(|day| day.and_hms_opt(0, 0, 0));
        let key = match self.pattern.resolve(sample, &self.tags) {
            Ok(key) => key,
            Err(_) => return false,
        };
        other.pattern.extract(&key).is_ok()
    }

    /// Copy of the dataset with `tags` substituted in its pattern.
    /// Templates and tile names are kept.
    pub fn update(&self, tags: &Tags) -> Result<Dataset, DatasetError> {
        let mut dataset = self.clone();
        dataset.pattern = self.pattern.with_tags(tags)?;
        dataset.tags = self.merged_tags(tags);
        dataset.memory_data = None;
        dataset.previous_time = Cell::new(None);
        Ok(dataset)
    }

    /// Geometry template of a tile. With `make_it`, a missing template is
    /// built by reading the first stored data.
    pub fn get_template(
        &mut self,
        make_it: bool,
        tags: &Tags,
    ) -> Result<Option<Template>, DatasetError> {
        let tile = self.tile_of(tags);
        if let Some(template) = self.templates.get(&tile) {
            return Ok(Some(template.clone()));
        }

        if !make_it {
            return Ok(None);
        }

        let time = if self.has_time() {
            match self.get_first_date(tags)? {
                Some(first) => Some(TimeRequest::Instant(first)),
                None => return Ok(None),
            }
        } else {
            None
        };

        if let Some(data) = self.get_data(time.as_ref(), &DataRequest::tags(tags))? {
            if data.is_gridded() && self.template_for(tags).is_none() {
                self.set_template(&data, tags)?;
            }
        }

        Ok(self.templates.get(&tile).cloned())
    }

    pub fn set_template(&mut self, data: &Payload, tags: &Tags) -> Result<(), DatasetError> {
        let tile = self.tile_of(tags);
        log::debug!("Setting template of {} ({})", self.name, tile);
        self.templates.insert(tile, Template::from_payload(data)?);
        Ok(())
    }

    /// Array (or set) of the template geometry filled with `value`.
    pub fn build_template_array(
        &mut self,
        value: Option<Float>,
        tags: &Tags,
    ) -> Result<Payload, DatasetError> {
        let template = self
            .get_template(true, tags)?
            .ok_or_else(|| DatasetError::MissingTemplate(self.name.clone()))?;

        Ok(match template.variables.len() {
            0 | 1 => {
                let name = template
                    .variables
                    .first()
                    .cloned()
                    .unwrap_or_else(|| self.workflow());
                Payload::Grid(template.build_array(&name, value)?)
            }
            _ => Payload::Set(template.build_set(value)?),
        })
    }

    fn tile_of(&self, tags: &Tags) -> String {
        if self.has_tiles() {
            if let Some(tile) = self.merged_tags(tags).get(TILE_TAG) {
                return tile.clone();
            }
        }
        DEFAULT_TILE.to_string()
    }

    pub(crate) fn template_for(&self, tags: &Tags) -> Option<&Template> {
        self.templates.get(&self.tile_of(tags))
    }

    /// Stamps production metadata on `data`.
    pub fn set_metadata(
        &self,
        data: &mut Payload,
        time: Option<&TimeRequest>,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), DatasetError> {
        for (key, value) in metadata {
            if key != "long_name" {
                data.set_attr(key, value);
            }
        }

        let produced = chrono::Local::now()
            .naive_local()
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
        data.set_attr("time_produced", &produced);

        if let Some(time) = self.time_signature(time) {
            let stamp = crate::key::format_time(&self.time_format, time)?;
            data.set_attr("time", &stamp);
        }

        Ok(())
    }
}

/// Places the values of `data` on the template geometry.
pub fn set_data_to_template(data: Payload, template: &Template) -> Result<Payload, DatasetError> {
    let place = |grid: &Grid| -> Result<Grid, DatasetError> {
        let mut placed = template.build_array(&grid.name, None)?;
        let shape = placed.values.shape().to_vec();
        placed.values = grid
            .values
            .clone()
            .into_shape(shape)
            .map_err(crate::errors::GridError::from)?;
        placed.attrs.extend(grid.attrs.clone());
        Ok(placed)
    };

    Ok(match data {
        Payload::Grid(grid) => Payload::Grid(place(&grid)?),
        Payload::Set(set) => {
            let mut placed = GridSet {
                vars: Default::default(),
                attrs: set.attrs.clone(),
            };
            for grid in set.vars.values() {
                placed.insert(place(grid)?);
            }
            Payload::Set(placed)
        }
        other => other,
    })
}

/// Default combiner of derived datasets: every parent grid in one set.
pub fn combine_into_set(inputs: Vec<Payload>) -> Result<Payload, DatasetError> {
    let mut set = GridSet::new();
    for input in inputs {
        match input {
            Payload::Grid(grid) => set.insert(grid),
            Payload::Set(other) => other.vars.into_iter().for_each(|(_, g)| set.insert(g)),
            other => {
                return Err(DatasetError::IncompatibleFormat {
                    data: other.kind().to_string(),
                    format: "grid set".to_string(),
                })
            }
        }
    }
    Ok(Payload::Set(set).squeeze())
}

#[cfg(test)]
mod tests {
    use super::{
        combine_into_set, Dataset, DatasetBackend, DatasetConfig, DatasetMode, OnDemandInfo,
        Readability,
    };
    use crate::{
        grid::{tests::sample_grid, Payload},
        io::{Codecs, FileFormat},
        key::Tags,
        time::{TimeRequest, TimeSignature},
    };
    use chrono::{NaiveDate, NaiveDateTime};
    use std::rc::Rc;

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .and_then(|d| d.and_hms_opt(hour, 0, 0))
            .unwrap()
    }

    fn memory(name: &str, pattern: &str) -> Dataset {
        let config = DatasetConfig {
            file_mode: DatasetMode::Memory,
            file_name: Some(pattern.to_string()),
            file_format: Some(FileFormat::Tmp),
            ..DatasetConfig::default()
        };
        Dataset::from_config(name, &config, Rc::new(Codecs::default())).unwrap()
    }

    #[test]
    fn key_follows_signature() {
        let mut config = DatasetConfig::local("/data/%Y/%m/%d/rain_%Y%m%d%H%M.asc");
        config.time_signature = Some(TimeSignature::EndPlusOne);
        let dataset = Dataset::from_config("rain", &config, Rc::new(Codecs::default())).unwrap();

        let day = TimeRequest::day(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        let key = dataset.get_key(Some(&day), &Tags::new()).unwrap();
        assert_eq!(key, "/data/2024/01/02/rain_202401020000.asc");
    }

    #[test]
    fn leap_day_is_clamped_on_yearless_patterns() {
        let mut config = DatasetConfig::local("/clim/tmean_%m%d.asc");
        config.time_signature = Some(TimeSignature::Start);
        let dataset = Dataset::from_config("clim", &config, Rc::new(Codecs::default())).unwrap();

        let start = NaiveDate::from_ymd_opt(2024, 2, 29)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap();
        let request = TimeRequest::Interval {
            start,
            end: start + chrono::Duration::days(2),
        };
        assert_eq!(
            dataset.get_key(Some(&request), &Tags::new()).unwrap(),
            "/clim/tmean_0228.asc"
        );
    }

    #[test]
    fn repeated_instant_resolves_same_key() {
        let dataset = Dataset::from_config(
            "clim",
            &DatasetConfig::local("/clim/clim_%m%d.asc"),
            Rc::new(Codecs::default()),
        )
        .unwrap();
        let day = |day| {
            TimeRequest::Instant(
                NaiveDate::from_ymd_opt(2024, 2, day)
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .unwrap(),
            )
        };

        assert_eq!(dataset.get_key(Some(&day(26)), &Tags::new()).unwrap(), "/clim/clim_0226.asc");
        let first = dataset.get_key(Some(&day(29)), &Tags::new()).unwrap();
        let second = dataset.get_key(Some(&day(29)), &Tags::new()).unwrap();
        assert_eq!(first, "/clim/clim_0228.asc");
        assert_eq!(first, second);
    }

    #[test]
    fn enumerates_stored_times() {
        let mut dataset = memory("air_t", "air_t_%Y%m%d%H%M.tmp");
        let grid = Payload::Grid(sample_grid("air_t", 2, 2, 1.0));

        for hour in 0..4 {
            let time = TimeRequest::Instant(at(1, hour));
            dataset
                .write_data(grid.clone(), Some(&time), &Default::default(), &Tags::new())
                .unwrap();
        }

        let times = dataset.get_times((at(1, 1), at(1, 2)), &Tags::new()).unwrap();
        assert_eq!(times, vec![at(1, 1), at(1, 2)]);
        assert!(dataset
            .check_data(Some(&TimeRequest::Instant(at(1, 3))), &Tags::new())
            .unwrap());
        assert_eq!(
            dataset
                .is_readable(Some(&TimeRequest::Instant(at(1, 5))), &Tags::new())
                .unwrap(),
            Readability::Missing
        );

        let requests: Vec<TimeRequest> = (2..6).map(|h| TimeRequest::Instant(at(1, h))).collect();
        let missing = dataset.find_times(&requests, true, &Tags::new()).unwrap();
        assert_eq!(missing.len(), 2);

        assert_eq!(dataset.purge().unwrap(), 4);
    }

    #[test]
    fn move_rewrites_key() {
        let mut dataset = memory("wind", "wind_%Y%m%d%H.tmp");
        let time = TimeRequest::Instant(at(2, 6));
        dataset
            .write_data(
                Payload::Grid(sample_grid("wind", 2, 2, 3.0)),
                Some(&time),
                &Default::default(),
                &Tags::new(),
            )
            .unwrap();

        dataset
            .move_data("archive/wind_%Y%m%d%H.tmp", Some(&time), &Tags::new())
            .unwrap();

        assert!(!dataset.check_data(Some(&time), &Tags::new()).unwrap());
        assert!(dataset.backend().exists("archive/wind_2024010206.tmp"));
    }

    #[test]
    fn subdataset_and_update() {
        let codecs = Rc::new(Codecs::default());
        let family = Dataset::from_config(
            "family",
            &DatasetConfig::local("/data/{domain}/rain_%Y%m%d.asc"),
            codecs.clone(),
        )
        .unwrap();

        let mut tags = Tags::new();
        tags.insert("domain".to_string(), "marche".to_string());
        let member = family.update(&tags).unwrap();

        assert_eq!(member.pattern.as_str(), "/data/marche/rain_%Y%m%d.asc");
        assert!(member.is_subdataset(&family));
        assert!(!family.is_subdataset(&member));
    }

    #[test]
    fn derived_data_need_parents() {
        let codecs = Rc::new(Codecs::default());
        let info = OnDemandInfo::Raster {
            x_ll: 12.0,
            y_ll: 43.0,
            rows: 3,
            cols: 3,
            res: 0.1,
            value: 2.0,
        };
        let mut first = DatasetConfig::on_demand(info.clone());
        first.file_variable = vec!["a".to_string()];
        let mut second = DatasetConfig::on_demand(info);
        second.file_variable = vec!["b".to_string()];

        let mut derived = memory("ab", "ab_%Y%m%d.tmp");
        assert!(derived.make_data(None, &Tags::new()).is_err());

        derived.set_parents(
            vec![
                Dataset::from_config("a", &first, codecs.clone()).unwrap().into_shared(),
                Dataset::from_config("b", &second, codecs).unwrap().into_shared(),
            ],
            combine_into_set,
        );

        let time = TimeRequest::Instant(at(3, 0));
        let data = derived.make_data(Some(&time), &Tags::new()).unwrap();
        assert_eq!(data.grids().len(), 2);
        assert!(derived.check_data(Some(&time), &Tags::new()).unwrap());
    }
}
