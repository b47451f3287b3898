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

//! Orchestration of a workflow across timestamps.
//!
//! The [`Orchestrator`] owns one chain of [`ProcessorContainer`]s per
//! variable tag. A chain starts reading from the input datasets of its tag,
//! every following process reads the intermediate output of the previous
//! one, and the last process of each chain writes to the output dataset.
//! When all chains share a single output dataset their results are
//! collected and written together once per timestamp.

mod mapper;

pub use mapper::{Mapper, MapperRow};

use crate::{
    dataset::{
        config::one_or_many, Dataset, DatasetConfig, DatasetMode, FileRole, SharedDataset,
    },
    errors::{OrchestratorError, ProcessError},
    io::Codecs,
    key::Tags,
    process::{
        DumpMode, Params, ProcessEntry, ProcessRegistry, ProcessorContainer, RunContext,
        StepOutcome, GENERIC_VARIABLE,
    },
    time::{date_range, TimeFrequency, TimeRequest},
};
use chrono::NaiveDateTime;
use indexmap::IndexMap;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::{
    convert::TryFrom,
    fs,
    path::{Path, PathBuf},
    rc::Rc,
};

/// Storage of the results passed between the processes of a chain.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Deserialize)]
pub enum IntermediateOutput {
    #[serde(alias = "mem", alias = "memory")]
    Mem,
    #[serde(alias = "tmp")]
    Tmp,
}

impl Default for IntermediateOutput {
    fn default() -> Self {
        IntermediateOutput::Mem
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrchestratorOptions {
    #[serde(default)]
    pub intermediate_output: IntermediateOutput,

    /// Parent of the scratch directory of `Tmp` intermediate outputs.
    /// The system temporary directory when missing.
    #[serde(default)]
    pub tmp_dir: Option<PathBuf>,

    /// Skip a timestamp when a tile of a tiled input is missing.
    #[serde(default)]
    pub break_on_missing_tiles: bool,

    /// Fail instead of warning when buffered results are not aligned
    /// with the reference grid.
    #[serde(default)]
    pub strict_alignment: bool,

    #[serde(default)]
    pub progress: bool,
}

/// How input datasets are grouped into chains.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowMode {
    /// One input dataset per variable tag.
    MultiVariable,
    /// Any number of (tiled) input datasets per variable tag.
    MultiTile,
    /// Like `MultiTile`, for inputs split in several datasets along time.
    MultiTime,
    /// Tabular time series, every result written as soon as it is ready.
    TimeSeries,
}

impl Default for WorkflowMode {
    fn default() -> Self {
        WorkflowMode::MultiVariable
    }
}

/// One entry of a process list: the function name and its parameters.
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(try_from = "Mapping")]
pub struct StepConfig {
    pub function: String,
    pub params: Params,
}

impl TryFrom<Mapping> for StepConfig {
    type Error = String;

    fn try_from(mut values: Mapping) -> Result<Self, Self::Error> {
        let function = match values.remove(&Value::String("function".to_string())) {
            Some(Value::String(function)) => function,
            Some(_) => return Err("process function must be a name".to_string()),
            None => return Err("process step must name its function".to_string()),
        };

        Ok(StepConfig {
            function,
            params: Params::new(values),
        })
    }
}

/// `workflow` section of the run configuration.
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowConfig {
    #[serde(default)]
    pub mode: WorkflowMode,

    #[serde(default)]
    pub options: OrchestratorOptions,

    /// Processes of every variable tag, in order.
    pub process_list: IndexMap<String, Vec<StepConfig>>,

    /// Names of the input datasets. Every non-output dataset when empty.
    #[serde(default)]
    pub inputs: Vec<String>,

    #[serde(default, deserialize_with = "one_or_many")]
    pub output: Vec<String>,

    #[serde(default)]
    pub reference: Option<String>,

    /// Tags whose chains run first.
    #[serde(default)]
    pub priority: Vec<String>,
}

/// Datasets taking part in a workflow.
#[derive(Clone, Debug, Default)]
pub struct DataPackage {
    pub inputs: Vec<SharedDataset>,
    pub outputs: Vec<SharedDataset>,
    pub reference: Option<SharedDataset>,

    /// Every dataset by name, to resolve `file_deps`.
    pub catalog: IndexMap<String, SharedDataset>,
}

/// Counts of a run.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct RunReport {
    pub steps: usize,
    pub done: usize,
    pub skipped: usize,
    /// Collections written from the buffered results.
    pub flushed: usize,
}

impl RunReport {
    fn add(&mut self, other: RunReport) {
        self.steps += other.steps;
        self.done += other.done;
        self.skipped += other.skipped;
        self.flushed += other.flushed;
    }
}

fn source_tag(dataset: &SharedDataset) -> String {
    let dataset = dataset.borrow();
    dataset
        .variables
        .first()
        .cloned()
        .unwrap_or_else(|| dataset.name.clone())
}

pub struct Orchestrator {
    options: OrchestratorOptions,
    registry: ProcessRegistry,
    codecs: Rc<Codecs>,
    mapper: Mapper,

    inputs: IndexMap<String, Vec<SharedDataset>>,
    outputs: IndexMap<String, SharedDataset>,
    reference: Option<SharedDataset>,
    catalog: IndexMap<String, SharedDataset>,

    processes: Vec<ProcessorContainer>,
    break_points: Vec<usize>,
    intermediates: Vec<SharedDataset>,
    tmp_dir: Option<PathBuf>,
    outputs_bound: bool,

    /// Write every result on its own instead of collecting grids.
    immediate_dump: bool,
}

impl Orchestrator {
    /// Orchestrator without processes. Inputs are grouped by the tag of
    /// their first variable.
    pub fn new(
        package: DataPackage,
        options: OrchestratorOptions,
        codecs: Rc<Codecs>,
    ) -> Result<Self, OrchestratorError> {
        let mapper = Mapper::new(&package.inputs, &package.outputs);

        let mut inputs: IndexMap<String, Vec<SharedDataset>> = IndexMap::new();
        for input in &package.inputs {
            inputs.entry(source_tag(input)).or_default().push(Rc::clone(input));
        }

        let mut outputs = IndexMap::new();
        for tag in inputs.keys() {
            let output = package
                .outputs
                .iter()
                .find(|output| output.borrow().variables.contains(tag))
                .or_else(|| {
                    if package.outputs.len() == 1 {
                        package.outputs.first()
                    } else {
                        None
                    }
                });
            if let Some(output) = output {
                outputs.insert(tag.clone(), Rc::clone(output));
            }
        }

        let tmp_dir = match options.intermediate_output {
            IntermediateOutput::Mem => None,
            IntermediateOutput::Tmp => {
                let mut builder = tempfile::Builder::new();
                builder.prefix("shybox_");
                let dir = match &options.tmp_dir {
                    Some(parent) => {
                        fs::create_dir_all(parent)?;
                        builder.tempdir_in(parent)?
                    }
                    None => builder.tempdir()?,
                };
                let path = dir.into_path();
                log::debug!("Intermediate outputs stored in {}", path.display());
                Some(path)
            }
        };

        Ok(Orchestrator {
            options,
            registry: ProcessRegistry::default(),
            codecs,
            mapper,
            inputs,
            outputs,
            reference: package.reference,
            catalog: package.catalog,
            processes: vec![],
            break_points: vec![],
            intermediates: vec![],
            tmp_dir,
            outputs_bound: false,
            immediate_dump: false,
        })
    }

    /// Orchestrator of the configured process lists, one input dataset per tag.
    pub fn multi_variable(
        package: DataPackage,
        config: &WorkflowConfig,
        codecs: Rc<Codecs>,
    ) -> Result<Self, OrchestratorError> {
        let mut orchestrator = Orchestrator::new(package, config.options.clone(), codecs)?;

        for (tag, inputs) in &orchestrator.inputs {
            if inputs.len() > 1 {
                return Err(OrchestratorError::Workflow(format!(
                    "tag {} is defined by {} input datasets",
                    tag,
                    inputs.len()
                )));
            }
        }

        orchestrator.add_process_lists(config)?;
        Ok(orchestrator)
    }

    /// Orchestrator of the configured process lists over tiled inputs.
    /// Every tag needs its own output dataset.
    pub fn multi_tile(
        package: DataPackage,
        config: &WorkflowConfig,
        codecs: Rc<Codecs>,
    ) -> Result<Self, OrchestratorError> {
        let mut orchestrator = Orchestrator::new(package, config.options.clone(), codecs)?;

        for (tag, inputs) in &orchestrator.inputs {
            if !inputs.iter().any(|input| input.borrow().has_tiles()) && inputs.len() == 1 {
                log::warn!("Input of {} is neither tiled nor split in several datasets", tag);
            }
        }

        orchestrator.check_outputs()?;
        orchestrator.add_process_lists(config)?;
        Ok(orchestrator)
    }

    /// Orchestrator of the configured process lists over inputs split in
    /// several datasets along time. Every tag needs its own output dataset.
    pub fn multi_time(
        package: DataPackage,
        config: &WorkflowConfig,
        codecs: Rc<Codecs>,
    ) -> Result<Self, OrchestratorError> {
        log::debug!("Organizing a multi time workflow");
        let mut orchestrator = Orchestrator::new(package, config.options.clone(), codecs)?;

        orchestrator.check_outputs()?;
        orchestrator.add_process_lists(config)?;
        Ok(orchestrator)
    }

    /// Orchestrator of tabular time series, e.g. the discharge of the
    /// river sections. Results are written as soon as they are computed.
    pub fn time_series(
        package: DataPackage,
        config: &WorkflowConfig,
        codecs: Rc<Codecs>,
    ) -> Result<Self, OrchestratorError> {
        if config.process_list.is_empty() {
            return Err(OrchestratorError::Workflow(
                "time series workflow has no process list".to_string(),
            ));
        }

        let mut orchestrator = Orchestrator::new(package, config.options.clone(), codecs)?;
        orchestrator.immediate_dump = true;

        for (tag, inputs) in &orchestrator.inputs {
            if inputs.iter().any(|input| input.borrow().format.is_gridded()) {
                log::warn!("Time series input of {} is a gridded dataset", tag);
            }
        }

        orchestrator.add_process_lists(config)?;
        Ok(orchestrator)
    }

    fn check_outputs(&self) -> Result<(), OrchestratorError> {
        match self.inputs.keys().find(|tag| !self.outputs.contains_key(*tag)) {
            Some(tag) => Err(OrchestratorError::Workflow(format!("tag {} has no output", tag))),
            None => Ok(()),
        }
    }

    pub fn from_config(
        package: DataPackage,
        config: &WorkflowConfig,
        codecs: Rc<Codecs>,
    ) -> Result<Self, OrchestratorError> {
        match config.mode {
            WorkflowMode::MultiVariable => Orchestrator::multi_variable(package, config, codecs),
            WorkflowMode::MultiTile => Orchestrator::multi_tile(package, config, codecs),
            WorkflowMode::MultiTime => Orchestrator::multi_time(package, config, codecs),
            WorkflowMode::TimeSeries => Orchestrator::time_series(package, config, codecs),
        }
    }

    fn add_process_lists(&mut self, config: &WorkflowConfig) -> Result<(), OrchestratorError> {
        for tag in config.process_list.keys() {
            if !self.inputs.contains_key(tag) {
                return Err(OrchestratorError::Workflow(format!(
                    "process list {} has no input dataset",
                    tag
                )));
            }
        }

        for tag in self.inputs.keys() {
            if !config.process_list.contains_key(tag) {
                log::warn!("Input {} has no process list and is not processed", tag);
            }
        }

        let order: Vec<String> = self
            .mapper
            .get_rows_by_priority(&config.priority)
            .into_iter()
            .map(|row| row.tag.clone())
            .filter(|tag| config.process_list.contains_key(tag))
            .fold(vec![], |mut order, tag| {
                if !order.contains(&tag) {
                    order.push(tag);
                }
                order
            });

        for tag in order {
            for step in &config.process_list[&tag] {
                let mut params = step.params.clone();
                params.insert("variable", tag.as_str());
                self.add_process(&step.function, params)?;
            }
        }

        self.check_dependencies();
        Ok(())
    }

    pub fn processes(&self) -> &[ProcessorContainer] {
        &self.processes
    }

    pub fn mapper(&self) -> &Mapper {
        &self.mapper
    }

    pub fn tmp_dir(&self) -> Option<&Path> {
        self.tmp_dir.as_deref()
    }

    /// Intermediate dataset storing the result of `entry` for `variable`.
    fn make_output(
        &mut self,
        variable: &str,
        entry: &ProcessEntry,
    ) -> Result<SharedDataset, OrchestratorError> {
        let name = format!("{}_{}", variable, entry.name);
        let file_name = format!("{}_%Y%m%d%H%M%S.{}", name, entry.output_ext);

        let (file_mode, file_name) = match &self.tmp_dir {
            Some(dir) => (
                DatasetMode::Local,
                dir.join(file_name).to_string_lossy().into_owned(),
            ),
            None => (DatasetMode::Memory, file_name),
        };

        let config = DatasetConfig {
            file_mode,
            file_name: Some(file_name),
            file_io: FileRole::Tmp,
            file_variable: vec![variable.to_string()],
            ..DatasetConfig::default()
        };

        let dataset = Dataset::from_config(&name, &config, Rc::clone(&self.codecs))?.into_shared();
        self.intermediates.push(Rc::clone(&dataset));
        Ok(dataset)
    }

    /// Datasets bound to the dependencies of a container: `file_deps` of
    /// its inputs and the datasets of the tags named in `deps_vars`.
    fn resolve_deps(
        &self,
        variable: &str,
        inputs: &[SharedDataset],
        deps_vars: &IndexMap<String, String>,
    ) -> Result<Vec<SharedDataset>, OrchestratorError> {
        let mut deps: Vec<SharedDataset> = vec![];

        for input in inputs {
            for name in &input.borrow().deps {
                let dataset = self
                    .catalog
                    .get(name)
                    .ok_or_else(|| OrchestratorError::MissingDataset(name.clone()))?;
                deps.push(Rc::clone(dataset));
            }
        }

        for tag in deps_vars.values() {
            if tag == variable || deps.iter().any(|dep| source_tag(dep) == *tag) {
                continue;
            }

            let found = self.inputs.get(tag).cloned().or_else(|| {
                self.catalog
                    .values()
                    .find(|dataset| source_tag(dataset) == *tag)
                    .map(|dataset| vec![Rc::clone(dataset)])
            });

            match found {
                Some(found) => deps.extend(found),
                None => log::warn!("No dataset provides {} required by {}", tag, variable),
            }
        }

        Ok(deps)
    }

    /// Appends a process. It starts a new chain when its variable differs
    /// from the one of the previous process, otherwise it reads the
    /// output of the previous process.
    pub fn add_process(&mut self, function: &str, params: Params) -> Result<(), OrchestratorError> {
        let entry = self.registry.get(function)?;
        let variable = params
            .get_str("variable")?
            .unwrap_or_else(|| GENERIC_VARIABLE.to_string());

        let chain_start = self
            .processes
            .last()
            .map_or(true, |previous| previous.variable != variable);

        let inputs = if chain_start {
            self.inputs
                .get(&variable)
                .cloned()
                .ok_or_else(|| OrchestratorError::MissingDataset(variable.clone()))?
        } else {
            self.processes
                .last()
                .map(|previous| vec![Rc::clone(&previous.output)])
                .unwrap_or_default()
        };

        let tiled = inputs.iter().any(|input| input.borrow().has_tiles());
        let output = self.make_output(&variable, &entry)?;

        let workflow = self
            .mapper
            .row(&variable)
            .map(|row| row.workflow.clone())
            .unwrap_or_else(|| variable.clone());

        let mut container = ProcessorContainer::new(entry, params, inputs, output)?
            .with_workflow(&workflow)
            .with_reference(self.reference.clone());

        let deps = self.resolve_deps(&variable, container.inputs(), container.deps_vars())?;
        container = container.with_deps(deps);

        container.chain_start = chain_start;
        container.strict_alignment = self.options.strict_alignment;
        container.break_on_missing_tiles = self.options.break_on_missing_tiles;

        if chain_start && tiled {
            self.break_points.push(self.processes.len());
        }

        log::debug!(
            "Process {} of {} added{}",
            function,
            variable,
            if chain_start { " (chain start)" } else { "" }
        );
        self.processes.push(container);
        self.outputs_bound = false;

        Ok(())
    }

    /// Warns about chains depending on tags whose chain comes later.
    pub fn check_dependencies(&self) -> Vec<String> {
        let mut warnings = vec![];

        for (index, process) in self.processes.iter().enumerate() {
            for tag in process.deps_vars().values() {
                let later = self.processes[index..]
                    .iter()
                    .any(|other| other.variable == *tag && other.variable != process.variable)
                    && !self.processes[..index].iter().any(|other| other.variable == *tag);
                if later {
                    let warning = format!(
                        "{} of {} depends on {} which is processed later",
                        process.name(),
                        process.variable,
                        tag
                    );
                    log::warn!("{}", warning);
                    warnings.push(warning);
                }
            }
        }

        warnings
    }

    /// Binds the last process of every chain to the output dataset of its
    /// tag. A single output dataset collects all the variables.
    fn bind_outputs(&mut self) {
        if self.outputs_bound {
            return;
        }

        let mut distinct: Vec<&SharedDataset> = vec![];
        for output in self.outputs.values() {
            if !distinct.iter().any(|known| Rc::ptr_eq(known, output)) {
                distinct.push(output);
            }
        }
        let dump_mode = if distinct.len() == 1 && !self.immediate_dump {
            DumpMode::Buffered
        } else {
            DumpMode::Immediate
        };

        let mut lasts: IndexMap<String, usize> = IndexMap::new();
        for (index, process) in self.processes.iter().enumerate() {
            lasts.insert(process.variable.clone(), index);
        }

        for (tag, index) in lasts {
            match self.outputs.get(&tag) {
                Some(output) => self.processes[index].set_output(Rc::clone(output), dump_mode),
                None => log::warn!("No output for {}, results stay in intermediate storage", tag),
            }
        }

        self.outputs_bound = true;
    }

    /// Timestamps between `start` and `end`: the expected steps of the first
    /// input, or its frequency, hourly by default.
    pub fn time_steps(&self, start: NaiveDateTime, end: NaiveDateTime) -> Vec<NaiveDateTime> {
        let first = self.inputs.values().flatten().next();

        if let Some(first) = first {
            let first = first.borrow();
            if let Some(steps) = first.expected_steps() {
                let steps: Vec<NaiveDateTime> = steps
                    .iter()
                    .copied()
                    .filter(|step| *step >= start && *step <= end)
                    .collect();
                if !steps.is_empty() {
                    return steps;
                }
            }
            if let Some(freq) = first.time_freq {
                return date_range(start, end, freq);
            }
        }

        date_range(start, end, TimeFrequency::hourly())
    }

    pub fn run_range(
        &mut self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<RunReport, OrchestratorError> {
        let steps = self.time_steps(start, end);
        self.run(&steps)
    }

    /// Runs every process at every timestamp.
    pub fn run(&mut self, times: &[NaiveDateTime]) -> Result<RunReport, OrchestratorError> {
        self.bind_outputs();

        let bar = if self.options.progress {
            let bar = ProgressBar::new(times.len() as u64);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{prefix} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}")
                    .progress_chars("#>-"),
            );
            bar.set_prefix("Processed timestamps");
            Some(bar)
        } else {
            None
        };

        let mut report = RunReport::default();
        for time in times {
            log::info!("Processing {}", time);
            report.add(self.run_single_ts(*time)?);
            if let Some(bar) = &bar {
                bar.inc(1);
            }
        }

        if let Some(bar) = bar {
            bar.finish_with_message("All timestamps processed");
        }

        Ok(report)
    }

    /// Runs every process at `time`. Processes before a break point are
    /// run and flushed before the break point runs.
    pub fn run_single_ts(&mut self, time: NaiveDateTime) -> Result<RunReport, OrchestratorError> {
        self.bind_outputs();

        let request = TimeRequest::Instant(time);
        let mut ctx = RunContext::new(Tags::new());
        let mut report = RunReport {
            steps: 1,
            ..RunReport::default()
        };

        let outcome = self.run_processes(&request, &mut ctx, &mut report);
        self.clean_up();
        outcome?;

        Ok(report)
    }

    fn run_processes(
        &self,
        time: &TimeRequest,
        ctx: &mut RunContext,
        report: &mut RunReport,
    ) -> Result<(), ProcessError> {
        for (index, process) in self.processes.iter().enumerate() {
            if self.break_points.contains(&index) && index > 0 {
                log::debug!("Break point before {} of {}", process.name(), process.variable);
                report.flushed += ctx.flush(time)?;
            }

            match process.run(time, ctx)? {
                StepOutcome::Done(_) => report.done += 1,
                StepOutcome::Skipped => report.skipped += 1,
            }
        }

        report.flushed += ctx.flush(time)?;
        Ok(())
    }

    /// Drops the intermediate outputs of the last timestamp. Failures are
    /// logged, not raised.
    pub fn clean_up(&mut self) {
        if let Some(dir) = &self.tmp_dir {
            if dir.exists() {
                if let Err(e) = fs::remove_dir_all(dir) {
                    log::warn!("Cannot remove scratch directory {}: {}", dir.display(), e);
                }
            }
            return;
        }

        for dataset in &self.intermediates {
            if let Err(e) = dataset.borrow_mut().purge() {
                log::warn!("Cannot purge {}: {}", dataset.borrow().name, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        DataPackage, IntermediateOutput, Orchestrator, OrchestratorOptions, WorkflowConfig,
        WorkflowMode,
    };
    use crate::{
        dataset::{DataRequest, Dataset, DatasetConfig, FileRole, OnDemandInfo, SharedDataset},
        errors::{OrchestratorError, ProcessError},
        grid::Payload,
        io::{Codecs, FileFormat},
        time::TimeRequest,
        Float,
    };
    use chrono::{Duration, NaiveDate, NaiveDateTime};
    use float_cmp::approx_eq;
    use indexmap::IndexMap;
    use std::rc::Rc;

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .and_then(|day| day.and_hms_opt(0, 0, 0))
            .unwrap()
    }

    fn raster(name: &str, rows: usize, res: Float, value: Float) -> SharedDataset {
        let mut config = DatasetConfig::on_demand(OnDemandInfo::Raster {
            x_ll: 12.0,
            y_ll: 43.0,
            rows,
            cols: rows,
            res,
            value,
        });
        config.file_variable = vec![name.to_string()];
        Dataset::from_config(name, &config, Rc::new(Codecs::default()))
            .unwrap()
            .into_shared()
    }

    fn package(output_pattern: &str) -> DataPackage {
        let mut config = DatasetConfig::local(output_pattern);
        config.file_io = FileRole::Output;
        config.file_variable = vec!["air_t".to_string(), "rh".to_string()];
        let output = Dataset::from_config("forcing", &config, Rc::new(Codecs::default()))
            .unwrap()
            .into_shared();

        let inputs = vec![raster("air_t", 5, 0.2, 280.0), raster("rh", 10, 0.1, 60.0)];
        let reference = raster("terrain", 10, 0.1, 100.0);

        let mut catalog = IndexMap::new();
        for dataset in inputs.iter().chain([&output, &reference]) {
            catalog.insert(dataset.borrow().name.clone(), Rc::clone(dataset));
        }

        DataPackage {
            inputs,
            outputs: vec![output],
            reference: Some(reference),
            catalog,
        }
    }

    fn workflow(options: &str) -> WorkflowConfig {
        serde_yaml::from_str(&format!(
            r#"
options: {}
process_list:
  air_t:
    - function: interpolate_data
      method: nn
      max_distance: 25000
    - function: convert_temperature_units
  rh:
    - function: interpolate_data
      method: nn
      max_distance: 25000
    - function: mask_data_by_limits
      mask_min: 0
      mask_max: 100
output: forcing
reference: terrain
"#,
            options
        ))
        .unwrap()
    }

    #[test]
    fn forcing_for_every_hour() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = dir.path().join("forcing_%Y%m%d%H%M.tmp");
        let package = package(pattern.to_str().unwrap());
        let output = Rc::clone(&package.outputs[0]);

        let config = workflow("{}");
        let mut orchestrator =
            Orchestrator::multi_variable(package, &config, Rc::new(Codecs::default())).unwrap();
        assert_eq!(orchestrator.processes().len(), 4);

        let report = orchestrator
            .run_range(start(), start() + Duration::hours(5))
            .unwrap();
        assert_eq!(report.steps, 6);
        assert_eq!(report.done, 24);
        assert_eq!(report.flushed, 6);

        let keys = output.borrow().available_keys(None, &Default::default()).unwrap();
        assert_eq!(keys.len(), 6);

        let time = TimeRequest::from(start() + Duration::hours(3));
        let data = output
            .borrow_mut()
            .get_data(Some(&time), &DataRequest::default())
            .unwrap()
            .unwrap();

        let set = match data {
            Payload::Set(set) => set,
            other => panic!("expected a set, found {}", other.kind()),
        };
        assert_eq!(set.names(), vec!["air_t", "rh"]);
        for grid in set.vars.values() {
            assert_eq!(grid.values.shape(), &[10, 10]);
            assert!(grid.values.iter().all(|v| v.is_finite()));
        }
        assert!(set
            .vars["air_t"]
            .values
            .iter()
            .all(|v| approx_eq!(Float, *v, 280.0 - 273.15, epsilon = 1e-4)));
        assert!(set.vars["rh"].values.iter().all(|v| *v == 60.0));
    }

    #[test]
    fn scratch_directory_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = dir.path().join("out").join("forcing_%Y%m%d%H%M.tmp");
        let scratch = dir.path().join("scratch");

        let options = format!("{{intermediate_output: Tmp, tmp_dir: {}}}", scratch.display());
        let config = workflow(&options);
        assert_eq!(config.options.intermediate_output, IntermediateOutput::Tmp);

        let mut orchestrator =
            Orchestrator::multi_variable(package(pattern.to_str().unwrap()), &config, Rc::new(Codecs::default()))
                .unwrap();
        let tmp_dir = orchestrator.tmp_dir().unwrap().to_path_buf();
        assert!(tmp_dir.starts_with(&scratch));

        let report = orchestrator.run(&[start()]).unwrap();
        assert_eq!(report.done, 4);
        assert!(!tmp_dir.exists());
    }

    #[test]
    fn scratch_directory_is_renewed_every_step() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = dir.path().join("out").join("forcing_%Y%m%d%H%M.tmp");
        let package = package(pattern.to_str().unwrap());
        let output = Rc::clone(&package.outputs[0]);

        let config = workflow(&format!(
            "{{intermediate_output: Tmp, tmp_dir: {}}}",
            dir.path().join("scratch").display()
        ));
        let mut orchestrator =
            Orchestrator::multi_variable(package, &config, Rc::new(Codecs::default())).unwrap();
        let tmp_dir = orchestrator.tmp_dir().unwrap().to_path_buf();

        let report = orchestrator
            .run_range(start(), start() + Duration::hours(2))
            .unwrap();
        assert_eq!(report.steps, 3);
        assert_eq!(report.done, 12);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.flushed, 3);
        assert!(!tmp_dir.exists());

        let keys = output.borrow().available_keys(None, &Default::default()).unwrap();
        assert_eq!(keys.len(), 3);
    }

    #[test]
    fn time_series_joined_with_registries() {
        let dir = tempfile::tempdir().unwrap();
        let codecs = Rc::new(Codecs::default());

        let write = |name: &str, text: &str| std::fs::write(dir.path().join(name), text).unwrap();
        write("sections_hmc.csv", "tag;area\narno;10\ntevere;20\npo;30\n");
        write("sections_db.csv", "tag;area\narno;10\ntevere;20\n");
        write(
            "discharge_202403010000.csv",
            "time;c0;c1;c2\n2024-03-01 00:00;3.5;7;1\n2024-02-29 23:00;3;6;1\n",
        );
        write(
            "discharge_202403010100.csv",
            "time;c0;c1;c2\n2024-03-01 01:00;4;nan;1\n",
        );

        let dataset = |name: &str, file: &str, role: FileRole| {
            let mut config = DatasetConfig::local(dir.path().join(file).to_str().unwrap());
            config.file_io = role;
            config.file_variable = vec![name.to_string()];
            Dataset::from_config(name, &config, Rc::clone(&codecs))
                .unwrap()
                .into_shared()
        };

        let input = dataset("discharge", "discharge_%Y%m%d%H%M.csv", FileRole::Input);
        let output = dataset("discharge", "out/hmc_%Y%m%d%H%M.csv", FileRole::Output);
        let mut catalog = IndexMap::new();
        catalog.insert("discharge".to_string(), Rc::clone(&input));
        for name in ["sections_hmc", "sections_db"] {
            let registry = dataset(name, &format!("{}.csv", name), FileRole::Input);
            catalog.insert(name.to_string(), registry);
        }
        let package = DataPackage {
            inputs: vec![input],
            outputs: vec![Rc::clone(&output)],
            reference: None,
            catalog,
        };

        let config: WorkflowConfig = serde_yaml::from_str(
            r#"
mode: time_series
process_list:
  discharge:
    - function: join_time_series_by_registry
      deps_vars: {sections_hmc: sections_hmc, sections_db: sections_db}
output: discharge
"#,
        )
        .unwrap();
        assert_eq!(config.mode, WorkflowMode::TimeSeries);

        let mut orchestrator = Orchestrator::from_config(package, &config, codecs).unwrap();
        assert_eq!(orchestrator.processes()[0].output_ext(), "csv");
        assert_eq!(orchestrator.processes()[0].output.borrow().format, FileFormat::Csv);

        let report = orchestrator
            .run_range(start(), start() + Duration::hours(1))
            .unwrap();
        assert_eq!(report.steps, 2);
        assert_eq!(report.done, 2);
        assert_eq!(report.flushed, 0);

        let data = output
            .borrow_mut()
            .get_data(Some(&TimeRequest::from(start())), &DataRequest::default())
            .unwrap()
            .unwrap();
        let table = match data {
            Payload::Table(table) => table,
            other => panic!("expected a table, found {}", other.kind()),
        };
        assert_eq!(table.headers, vec!["time", "arno", "tevere"]);
        assert_eq!(
            table.column("time"),
            Some(vec!["2024-02-29 23:00", "2024-03-01 00:00"])
        );
        assert_eq!(table.column("arno"), Some(vec!["3", "3.5"]));

        let last = output
            .borrow_mut()
            .get_data(
                Some(&TimeRequest::from(start() + Duration::hours(1))),
                &DataRequest::default(),
            )
            .unwrap()
            .unwrap();
        match last {
            Payload::Table(table) => assert_eq!(table.column("tevere"), Some(vec!["-9999"])),
            other => panic!("expected a table, found {}", other.kind()),
        }
    }

    #[test]
    fn multi_time_needs_an_output_per_tag() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = dir.path().join("forcing_%Y%m%d%H%M.tmp");
        let config = workflow("{}");

        let mut orchestrator = Orchestrator::multi_time(
            package(pattern.to_str().unwrap()),
            &config,
            Rc::new(Codecs::default()),
        )
        .unwrap();
        assert_eq!(orchestrator.processes().len(), 4);
        let report = orchestrator.run(&[start()]).unwrap();
        assert_eq!(report.done, 4);
        assert_eq!(report.flushed, 1);

        let mut package = package(pattern.to_str().unwrap());
        package.outputs.clear();
        assert!(matches!(
            Orchestrator::multi_time(package, &config, Rc::new(Codecs::default())),
            Err(OrchestratorError::Workflow(_))
        ));
    }

    #[test]
    fn unknown_tags_and_functions_fail() {
        let mut config = workflow("{}");
        config.process_list.insert("wind".to_string(), vec![]);
        assert!(matches!(
            Orchestrator::multi_variable(package("/tmp/f.tmp"), &config, Rc::new(Codecs::default())),
            Err(OrchestratorError::Workflow(_))
        ));

        let config: WorkflowConfig = serde_yaml::from_str(
            "process_list:\n  air_t:\n    - function: compute_snow_density\n",
        )
        .unwrap();
        assert!(matches!(
            Orchestrator::multi_variable(package("/tmp/f.tmp"), &config, Rc::new(Codecs::default())),
            Err(OrchestratorError::Process(ProcessError::UnknownProcess(_)))
        ));
    }

    #[test]
    fn late_dependency_is_reported() {
        let config: WorkflowConfig = serde_yaml::from_str(
            r#"
process_list:
  air_t:
    - function: compute_data_rh
      deps_vars: {t: air_t, td: rh}
  rh:
    - function: interpolate_data
priority: [air_t]
"#,
        )
        .unwrap();

        let orchestrator =
            Orchestrator::multi_variable(package("/tmp/f.tmp"), &config, Rc::new(Codecs::default()))
                .unwrap();
        let warnings = orchestrator.check_dependencies();

        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("depends on rh"));
    }

    #[test]
    fn options_reject_unknown_keys() {
        assert!(serde_yaml::from_str::<OrchestratorOptions>("intermediate: Mem").is_err());
        let options: OrchestratorOptions = serde_yaml::from_str("intermediate_output: mem").unwrap();
        assert_eq!(options.intermediate_output, IntermediateOutput::Mem);
    }
}
