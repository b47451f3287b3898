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

//! Execution of one process of a workflow at one timestamp.

use super::{Params, ProcessEntry, ProcessInput};
use crate::{
    dataset::{DataRequest, Dataset, Readability, SharedDataset, TILE_TAG},
    errors::ProcessError,
    grid::{map_over_container, match_coords_to_reference, Grid, GridSet, Payload},
    key::Tags,
    time::TimeRequest,
};
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use std::{collections::BTreeMap, rc::Rc};

/// Variable tag of containers configured without one.
pub const GENERIC_VARIABLE: &str = "generic";

/// Parameters consumed by the container and not passed to the function.
const CONTAINER_PARAMS: [&str; 3] = ["function", "variable", "deps_vars"];

/// Where the result of a container goes.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum DumpMode {
    /// Written through the output dataset as soon as it is computed.
    Immediate,

    /// Collected with the results of the other variables and written
    /// together when the run context is flushed.
    Buffered,
}

/// Result of a container run.
#[derive(Clone, Debug, PartialEq)]
pub enum StepOutcome {
    Done(Payload),

    /// Nothing to process at this timestamp.
    Skipped,
}

/// Shared state of the containers run at one timestamp: the last result
/// of every variable and the buffered collections.
#[derive(Debug, Default)]
pub struct RunContext {
    pub tags: Tags,
    results: FxHashMap<String, Payload>,
    buffers: Vec<(SharedDataset, IndexMap<String, Payload>)>,
}

impl RunContext {
    pub fn new(tags: Tags) -> Self {
        RunContext {
            tags,
            ..RunContext::default()
        }
    }

    /// Last result computed for a variable tag.
    pub fn result(&self, variable: &str) -> Option<&Payload> {
        self.results.get(variable)
    }

    /// Number of buffered `tag:workflow` entries.
    pub fn buffered(&self) -> usize {
        self.buffers.iter().map(|(_, collection)| collection.len()).sum()
    }

    fn buffer(&mut self, output: &SharedDataset, key: String, data: Payload) {
        match self
            .buffers
            .iter_mut()
            .find(|(dataset, _)| Rc::ptr_eq(dataset, output))
        {
            Some((_, collection)) => {
                collection.insert(key, data);
            }
            None => {
                let mut collection = IndexMap::new();
                collection.insert(key, data);
                self.buffers.push((Rc::clone(output), collection));
            }
        }
    }

    /// Writes every buffered collection as one multi-variable payload
    /// through its output dataset. Returns the number of writes.
    pub fn flush(&mut self, time: &TimeRequest) -> Result<usize, ProcessError> {
        let mut written = 0;

        for (output, collection) in self.buffers.drain(..) {
            let mut set = GridSet::new();
            for (key, payload) in &collection {
                log::debug!("Collecting {} for {}", key, output.borrow().name);
                for grid in payload.grids() {
                    set.insert(grid.clone());
                }
            }

            if set.is_empty() {
                continue;
            }

            output
                .borrow_mut()
                .write_data(Payload::Set(set), Some(time), &BTreeMap::new(), &self.tags)?;
            written += 1;
        }

        Ok(written)
    }
}

enum Fetched {
    Data(Vec<(String, Payload)>),

    /// A tile is missing and missing tiles break the step.
    Broken(String),
}

/// Variable tag of the data read from a dataset.
fn source_tag(dataset: &Dataset) -> String {
    dataset
        .variables
        .first()
        .cloned()
        .unwrap_or_else(|| dataset.name.clone())
}

/// One process of a workflow: its function, its datasets and where
/// its result goes.
#[derive(Debug)]
pub struct ProcessorContainer {
    entry: ProcessEntry,
    pub variable: String,
    pub workflow: String,
    pub params: Params,
    deps_vars: IndexMap<String, String>,

    inputs: Vec<SharedDataset>,
    deps: Vec<SharedDataset>,
    static_args: IndexMap<String, Payload>,
    dynamic_args: IndexMap<String, SharedDataset>,
    reference: Option<SharedDataset>,

    pub output: SharedDataset,
    pub dump_mode: DumpMode,

    /// First container of a chain of processes of the same variable.
    pub chain_start: bool,
    pub strict_alignment: bool,
    pub break_on_missing_tiles: bool,
}

impl ProcessorContainer {
    /// Container of `entry` reading from `inputs` and writing to `output`.
    ///
    /// The `variable` and `deps_vars` entries of `params` configure the
    /// container; every other entry is passed to the function.
    pub fn new(
        entry: ProcessEntry,
        params: Params,
        inputs: Vec<SharedDataset>,
        output: SharedDataset,
    ) -> Result<Self, ProcessError> {
        let variable = params
            .get_str("variable")?
            .unwrap_or_else(|| GENERIC_VARIABLE.to_string());
        let deps_vars = params.get_map("deps_vars")?;

        Ok(ProcessorContainer {
            entry,
            workflow: variable.clone(),
            variable,
            params: params.without(&CONTAINER_PARAMS),
            deps_vars,
            inputs,
            deps: vec![],
            static_args: IndexMap::new(),
            dynamic_args: IndexMap::new(),
            reference: None,
            output,
            dump_mode: DumpMode::Immediate,
            chain_start: true,
            strict_alignment: false,
            break_on_missing_tiles: false,
        })
    }

    pub fn name(&self) -> &'static str {
        self.entry.name
    }

    pub fn output_ext(&self) -> &'static str {
        self.entry.output_ext
    }

    pub fn with_workflow(mut self, workflow: &str) -> Self {
        self.workflow = workflow.to_string();
        self
    }

    pub fn with_reference(mut self, reference: Option<SharedDataset>) -> Self {
        self.reference = reference;
        self
    }

    /// Datasets read together with the inputs, matched to `deps_vars`.
    pub fn with_deps(mut self, deps: Vec<SharedDataset>) -> Self {
        self.deps = deps;
        self
    }

    pub fn deps_vars(&self) -> &IndexMap<String, String> {
        &self.deps_vars
    }

    pub fn inputs(&self) -> &[SharedDataset] {
        &self.inputs
    }

    /// Binds a dataset to a named argument. Datasets without time are read
    /// once here; the others are read at every timestamp.
    pub fn with_dataset_arg(
        mut self,
        name: &str,
        dataset: SharedDataset,
    ) -> Result<Self, ProcessError> {
        let is_static = !dataset.borrow().has_time();

        if is_static {
            let data = dataset
                .borrow_mut()
                .get_data(None, &DataRequest::default())?
                .ok_or_else(|| ProcessError::MissingArgument(name.to_string()))?;
            self.static_args.insert(name.to_string(), data);
        } else {
            self.dynamic_args.insert(name.to_string(), dataset);
        }

        Ok(self)
    }

    pub fn set_output(&mut self, output: SharedDataset, dump_mode: DumpMode) {
        self.output = output;
        self.dump_mode = dump_mode;
    }

    /// Reads a dataset at `time`, tile by tile for tiled datasets.
    fn fetch(
        &self,
        dataset: &SharedDataset,
        time: &TimeRequest,
        tags: &Tags,
    ) -> Result<Fetched, ProcessError> {
        let mut dataset = dataset.borrow_mut();
        let tag = source_tag(&dataset);

        if dataset.signature.map_or(false, |s| s.is_single())
            && dataset.time_reference != Some(time.start())
        {
            log::debug!("{} is only available at its reference time", dataset.name);
            return Ok(Fetched::Data(vec![]));
        }

        let tiled = dataset.has_tiles() && !tags.contains_key(TILE_TAG);
        let tiles: Vec<Option<String>> = if tiled {
            dataset.tile_names()?.into_iter().map(Some).collect()
        } else {
            vec![None]
        };

        let mut fetched = vec![];
        for tile in tiles {
            let mut tags = tags.clone();
            if let Some(tile) = &tile {
                tags.insert(TILE_TAG.to_string(), tile.clone());
            }

            match dataset.is_readable(Some(time), &tags)? {
                Readability::Ready | Readability::Temporary => {}
                readability => {
                    let key = dataset.get_key(Some(time), &tags)?;
                    if tiled && self.break_on_missing_tiles {
                        return Ok(Fetched::Broken(key));
                    }
                    log::debug!("Skipping {} of {} ({:?})", key, dataset.name, readability);
                    continue;
                }
            }

            match dataset.get_data(Some(time), &DataRequest::tags(&tags))? {
                Some(data) if !data.is_empty() => fetched.push((tag.clone(), data)),
                _ => log::debug!("No data of {} at {}", dataset.name, time),
            }
        }

        Ok(Fetched::Data(fetched))
    }

    fn read_reference(&self, time: &TimeRequest, tags: &Tags) -> Result<Option<Grid>, ProcessError> {
        let reference = match &self.reference {
            Some(reference) => reference,
            None => return Ok(None),
        };

        let mut reference = reference.borrow_mut();
        let time = if reference.has_time() { Some(time) } else { None };
        let data = reference.get_data(time, &DataRequest::tags(tags))?;

        Ok(data.and_then(|data| data.first_grid().cloned()))
    }

    /// Runs the process at `time`.
    ///
    /// Inputs, dependencies and time-varying arguments are read (a dependency
    /// whose tag already has a result in `ctx` takes that result), the
    /// dependencies are bound to the arguments named in `deps_vars`, the
    /// function is called and its result dispatched according to the dump
    /// mode. Nothing is called nor written when no data are available.
    pub fn run(&self, time: &TimeRequest, ctx: &mut RunContext) -> Result<StepOutcome, ProcessError> {
        let mut fetched: Vec<(String, Payload)> = vec![];

        let reused = if self.chain_start {
            ctx.result(&self.variable).cloned()
        } else {
            None
        };

        let sources: Vec<&SharedDataset> = match reused {
            Some(data) => {
                log::debug!("Reusing the last result of {}", self.variable);
                fetched.push((self.variable.clone(), data));
                self.deps.iter().collect()
            }
            None => self.inputs.iter().chain(self.deps.iter()).collect(),
        };

        for source in sources {
            // dependencies on chains already run use their results
            let tag = source_tag(&source.borrow());
            if tag != self.variable && self.deps.iter().any(|dep| Rc::ptr_eq(dep, source)) {
                if let Some(result) = ctx.result(&tag) {
                    fetched.push((tag, result.clone()));
                    continue;
                }
            }

            match self.fetch(source, time, &ctx.tags)? {
                Fetched::Data(data) => fetched.extend(data),
                Fetched::Broken(key) => {
                    log::warn!("Tile {} is missing, skipping {} at {}", key, self.name(), time);
                    return Ok(StepOutcome::Skipped);
                }
            }
        }

        if fetched.is_empty() {
            log::debug!("No data for {} of {} at {}", self.name(), self.variable, time);
            return Ok(StepOutcome::Skipped);
        }

        let mut args = self.static_args.clone();
        for (name, dataset) in &self.dynamic_args {
            let data = dataset
                .borrow_mut()
                .get_data(Some(time), &DataRequest::tags(&ctx.tags))?;
            match data {
                Some(data) => {
                    args.insert(name.clone(), data);
                }
                None => {
                    log::debug!("Argument {} of {} is missing at {}", name, self.name(), time);
                    return Ok(StepOutcome::Skipped);
                }
            }
        }

        // bind dependencies by tag, the fetch order does not matter
        for (arg, tag) in &self.deps_vars {
            let position = fetched
                .iter()
                .position(|(source, _)| source == tag)
                .ok_or_else(|| ProcessError::UnmatchedDependency(tag.clone()))?;
            let (_, data) = fetched.remove(position);
            args.insert(arg.clone(), data);
        }

        let reference = self.read_reference(time, &ctx.tags)?;

        log::debug!("Running {} for {} at {}", self.name(), self.variable, time);
        let input = ProcessInput {
            data: fetched,
            args,
            time: Some(time.start()),
            reference: reference.as_ref(),
            params: &self.params,
        };
        let mut result = (self.entry.function)(&input)?.squeeze();

        if let Payload::Grid(grid) = &mut result {
            grid.name = self.workflow.clone();
        }
        result.set_attr("workflow", &self.workflow);
        result.set_attr("tag", &self.variable);

        match self.dump_mode {
            DumpMode::Immediate => {
                self.output.borrow_mut().write_data(
                    result.clone(),
                    Some(time),
                    &BTreeMap::new(),
                    &ctx.tags,
                )?;
            }
            DumpMode::Buffered => {
                if let Some(reference) = &reference {
                    let strict = self.strict_alignment;
                    result = map_over_container(result, |grid| {
                        match_coords_to_reference(grid, reference, strict)
                    })?;
                }
                let key = format!("{}:{}", self.variable, self.workflow);
                ctx.buffer(&self.output, key, result.clone());
            }
        }

        ctx.results.insert(self.variable.clone(), result.clone());
        Ok(StepOutcome::Done(result))
    }
}

#[cfg(test)]
mod tests {
    use super::{DumpMode, ProcessorContainer, RunContext, StepOutcome};
    use crate::{
        dataset::{
            Backend, Dataset, DatasetConfig, DatasetMode, OnDemandInfo, SharedDataset,
        },
        errors::ProcessError,
        grid::Payload,
        io::Codecs,
        process::{Params, ProcessEntry, ProcessInput},
        time::TimeRequest,
    };
    use chrono::NaiveDate;
    use std::rc::Rc;

    fn difference(input: &ProcessInput) -> Result<Payload, ProcessError> {
        let minuend = input.arg_grid("a")?;
        let subtrahend = input.arg_grid("b")?;
        let mut out = minuend.clone();
        out.values = &minuend.values - &subtrahend.values;
        Ok(Payload::Grid(out))
    }

    fn unreachable_process(_: &ProcessInput) -> Result<Payload, ProcessError> {
        panic!("process must not run without data")
    }

    fn entry(function: fn(&ProcessInput) -> Result<Payload, ProcessError>) -> ProcessEntry {
        ProcessEntry {
            name: "test",
            function,
            output_ext: "tmp",
        }
    }

    fn on_demand(variable: &str, value: f64) -> SharedDataset {
        let mut config = DatasetConfig::on_demand(OnDemandInfo::Raster {
            x_ll: 12.0,
            y_ll: 43.0,
            rows: 3,
            cols: 3,
            res: 0.1,
            value,
        });
        config.file_variable = vec![variable.to_string()];
        Dataset::from_config(variable, &config, Rc::new(Codecs::default()))
            .unwrap()
            .into_shared()
    }

    fn memory(name: &str) -> SharedDataset {
        let config = DatasetConfig {
            file_mode: DatasetMode::Memory,
            file_name: Some(format!("{}_%Y%m%d%H%M.tmp", name)),
            file_variable: vec![name.to_string()],
            ..DatasetConfig::default()
        };
        Dataset::from_config(name, &config, Rc::new(Codecs::default()))
            .unwrap()
            .into_shared()
    }

    fn stored(dataset: &SharedDataset) -> usize {
        match dataset.borrow().backend() {
            Backend::Memory(store) => store.len(),
            _ => 0,
        }
    }

    fn params(text: &str) -> Params {
        Params::new(serde_yaml::from_str(text).unwrap())
    }

    fn time() -> TimeRequest {
        TimeRequest::from(
            NaiveDate::from_ymd_opt(2024, 3, 1)
                .and_then(|day| day.and_hms_opt(6, 0, 0))
                .unwrap(),
        )
    }

    #[test]
    fn dependencies_bound_by_tag() {
        let params = params("variable: diff\ndeps_vars: {a: air_t, b: td}");

        for order in [["air_t", "td"], ["td", "air_t"]] {
            let deps = order
                .iter()
                .map(|name| on_demand(name, if *name == "air_t" { 290.0 } else { 280.0 }))
                .collect();
            let output = memory("diff");
            let container =
                ProcessorContainer::new(entry(difference), params.clone(), vec![], Rc::clone(&output))
                    .unwrap()
                    .with_deps(deps);

            let mut ctx = RunContext::default();
            let result = match container.run(&time(), &mut ctx).unwrap() {
                StepOutcome::Done(result) => result.into_grid().unwrap(),
                StepOutcome::Skipped => panic!("step skipped"),
            };

            assert!(result.values.iter().all(|v| *v == 10.0));
            assert_eq!(result.name, "diff");
            assert_eq!(stored(&output), 1);
            assert!(ctx.result("diff").is_some());
        }
    }

    #[test]
    fn unmatched_dependency_fails() {
        let params = params("variable: diff\ndeps_vars: {a: air_t, b: qv}");
        let container = ProcessorContainer::new(
            entry(difference),
            params,
            vec![on_demand("air_t", 290.0)],
            memory("diff"),
        )
        .unwrap();

        let mut ctx = RunContext::default();
        assert!(matches!(
            container.run(&time(), &mut ctx),
            Err(ProcessError::UnmatchedDependency(tag)) if tag == "qv"
        ));
    }

    #[test]
    fn skipped_without_data() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = dir.path().join("air_t_%Y%m%d%H%M.asc");
        let config = DatasetConfig::local(pattern.to_str().unwrap());
        let input = Dataset::from_config("air_t", &config, Rc::new(Codecs::default()))
            .unwrap()
            .into_shared();

        let output = memory("air_t");
        let container = ProcessorContainer::new(
            entry(unreachable_process),
            params("variable: air_t"),
            vec![input],
            Rc::clone(&output),
        )
        .unwrap();

        let mut ctx = RunContext::default();
        assert_eq!(container.run(&time(), &mut ctx).unwrap(), StepOutcome::Skipped);
        assert_eq!(stored(&output), 0);
        assert!(ctx.result("air_t").is_none());
    }

    #[test]
    fn buffered_results_are_written_together() {
        fn identity(input: &ProcessInput) -> Result<Payload, ProcessError> {
            Ok(input.first()?.clone())
        }

        let output = memory("forcing");
        let mut ctx = RunContext::default();

        for (variable, value) in [("air_t", 280.0), ("rh", 60.0)] {
            let mut container = ProcessorContainer::new(
                entry(identity),
                params(&format!("variable: {}", variable)),
                vec![on_demand(variable, value)],
                Rc::clone(&output),
            )
            .unwrap()
            .with_reference(Some(on_demand("dem", 100.0)));
            container.set_output(Rc::clone(&output), DumpMode::Buffered);

            container.run(&time(), &mut ctx).unwrap();
        }

        assert_eq!(ctx.buffered(), 2);
        assert_eq!(stored(&output), 0);

        assert_eq!(ctx.flush(&time()).unwrap(), 1);
        assert_eq!(ctx.buffered(), 0);
        assert_eq!(stored(&output), 1);

        let data = output
            .borrow_mut()
            .get_data(Some(&time()), &Default::default())
            .unwrap()
            .unwrap();
        match data {
            Payload::Set(set) => assert_eq!(set.names(), vec!["air_t", "rh"]),
            other => panic!("expected a set, found {:?}", other.kind()),
        }
    }
}
