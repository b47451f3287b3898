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

//! Module responsible for parsing and checking the run configuration file.
//!
//! The configuration file uses [YAML](https://en.wikipedia.org/wiki/YAML)
//! and `serde` to enforce strong typing, so that a malformed file is
//! reported before any dataset is touched.
//!
//! The structures and their fields in this module directly correspond to
//! the fields inside the configuration file, so check this documentation
//! for details on how to write one.

use crate::{
    dataset::DatasetConfig,
    errors::ConfigError,
    orchestrator::{WorkflowConfig, WorkflowMode},
    time::{date_range, serde_datetime, TimeFrequency},
};
use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::Deserialize;
use std::{fs, path::Path};

/// _(Optional)_ Fields with information about
/// resources available for the run.
#[derive(Clone, PartialEq, PartialOrd, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Resources {
    /// _(Optional)_ Heap memory limit in MB.
    ///
    /// Cannot be less than `128`. Defaults to the whole addressable space.
    ///
    /// Large domains allocate grids in many small chunks, so the system
    /// usually slows down and kills the process without a message before
    /// the allocator fails. With a capped allocator the process aborts
    /// with an out-of-memory error instead. Set the limit below the
    /// available system memory, leaving space for other processes.
    #[serde(default = "Resources::default_memory")]
    pub memory: usize,
}

impl Resources {
    fn default_memory() -> usize {
        usize::MAX / (1024 * 1024)
    }

    /// Memory limit in bytes.
    pub fn memory_bytes(&self) -> usize {
        self.memory.saturating_mul(1024 * 1024)
    }

    pub fn check_bounds(&self) -> Result<(), ConfigError> {
        if self.memory < 128 {
            return Err(ConfigError::OutOfBounds(
                "Available memory cannot be less than 128 MB",
            ));
        }

        Ok(())
    }
}

impl Default for Resources {
    fn default() -> Self {
        Resources {
            memory: Resources::default_memory(),
        }
    }
}

/// Timestamps of the run.
///
/// Either a range (`start`, `end` and optional `freq`) or a single
/// `time_run`. A time given on the command line overrides both.
#[derive(Clone, PartialEq, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeConfig {
    #[serde(default, with = "serde_datetime::option")]
    pub start: Option<NaiveDateTime>,

    #[serde(default, with = "serde_datetime::option")]
    pub end: Option<NaiveDateTime>,

    /// _(Optional)_ Step of the range. When missing, the steps are
    /// taken from the input datasets.
    #[serde(default)]
    pub freq: Option<TimeFrequency>,

    #[serde(default, with = "serde_datetime::option")]
    pub time_run: Option<NaiveDateTime>,
}

/// Timestamps resolved from [`TimeConfig`].
#[derive(Clone, PartialEq, Debug)]
pub enum RunTimes {
    /// Explicit list of timestamps.
    Steps(Vec<NaiveDateTime>),

    /// Range whose steps are resolved by the orchestrator.
    Range {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
}

impl TimeConfig {
    pub fn check_bounds(&self) -> Result<(), ConfigError> {
        match (self.start, self.end) {
            (Some(start), Some(end)) if end < start => {
                return Err(ConfigError::OutOfBounds(
                    "Run end cannot be earlier than run start",
                ))
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(ConfigError::OutOfBounds(
                    "Run start and end must be given together",
                ))
            }
            (None, None) if self.time_run.is_none() => {
                return Err(ConfigError::OutOfBounds(
                    "Either a time range or a single run time is required",
                ))
            }
            _ => (),
        }

        Ok(())
    }

    /// Timestamps to run, with `time_override` taking precedence
    /// over the configuration.
    pub fn resolve(&self, time_override: Option<NaiveDateTime>) -> RunTimes {
        if let Some(time) = time_override.or(self.time_run) {
            if time_override.is_some() || self.start.is_none() {
                return RunTimes::Steps(vec![time]);
            }
        }

        match (self.start, self.end, self.freq) {
            (Some(start), Some(end), Some(freq)) => RunTimes::Steps(date_range(start, end, freq)),
            (Some(start), Some(end), None) => RunTimes::Range { start, end },
            _ => RunTimes::Steps(self.time_run.into_iter().collect()),
        }
    }
}

/// Main config structure representing the fields in
/// the configuration file.
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    #[serde(default)]
    pub resources: Resources,

    #[serde(default)]
    pub time: TimeConfig,

    /// Every dataset of the run by name.
    pub datasets: IndexMap<String, DatasetConfig>,

    pub workflow: WorkflowConfig,
}

impl RunConfig {
    /// Config structure constructor, responsible for
    /// deserializing configuration and checking it.
    pub fn new_from_file(file_path: &Path) -> Result<RunConfig, ConfigError> {
        let data = fs::read(file_path)?;
        RunConfig::new_from_slice(data.as_slice())
    }

    pub fn new_from_slice(data: &[u8]) -> Result<RunConfig, ConfigError> {
        let config: RunConfig = serde_yaml::from_slice(data)?;
        config.check_bounds()?;
        Ok(config)
    }

    /// Checks every section and the dataset names the workflow refers to.
    pub fn check_bounds(&self) -> Result<(), ConfigError> {
        self.resources.check_bounds()?;
        self.time.check_bounds()?;

        if self.datasets.is_empty() {
            return Err(ConfigError::OutOfBounds("At least one dataset is required"));
        }

        for config in self.datasets.values() {
            config.check_bounds()?;
        }

        if self.workflow.output.is_empty() {
            return Err(ConfigError::OutOfBounds("Workflow needs at least one output"));
        }

        let referenced = self
            .workflow
            .inputs
            .iter()
            .chain(self.workflow.output.iter())
            .chain(self.workflow.reference.iter())
            .chain(self.datasets.values().flat_map(|config| config.file_deps.iter()))
            .chain(self.datasets.values().flat_map(|config| config.parents.iter()));

        for name in referenced {
            if !self.datasets.contains_key(name) {
                return Err(ConfigError::InvalidOption(format!(
                    "dataset {} is not defined",
                    name
                )));
            }
        }

        let needs_processes = matches!(
            self.workflow.mode,
            WorkflowMode::MultiVariable | WorkflowMode::TimeSeries
        );
        if needs_processes && self.workflow.process_list.is_empty() {
            return Err(ConfigError::OutOfBounds("Workflow has no process list"));
        }

        Ok(())
    }

    /// Names of the input datasets: the configured ones or every dataset
    /// which is neither an output, the reference nor a dependency.
    pub fn input_names(&self) -> Vec<String> {
        if !self.workflow.inputs.is_empty() {
            return self.workflow.inputs.clone();
        }

        let deps: Vec<&String> = self
            .datasets
            .values()
            .flat_map(|config| config.file_deps.iter())
            .collect();

        self.datasets
            .keys()
            .filter(|name| !self.workflow.output.contains(name))
            .filter(|name| self.workflow.reference.as_ref() != Some(*name))
            .filter(|name| !deps.contains(name))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{RunConfig, RunTimes};
    use crate::{orchestrator::WorkflowMode, time::TimeFrequency};
    use chrono::{NaiveDate, NaiveDateTime};

    const CONFIG: &str = "
resources:
  memory: 2048
time:
  start: 2024-01-01 00:00
  end: 2024-01-01 05:00
datasets:
  terrain:
    file_mode: on_demand
    file_variable: terrain
    info: {x_ll: 8.0, y_ll: 44.0, rows: 10, cols: 10, res: 0.1, value: 0}
  air_t:
    file_name: /data/air_t_%Y%m%d%H%M.txt
    file_format: ascii
    file_variable: air_t
  dew_point:
    file_name: /data/td_%Y%m%d%H%M.txt
    file_format: ascii
    file_variable: td
  forcing:
    file_name: /out/forcing_%Y%m%d%H%M.tmp
    file_io: output
    file_variable: [air_t]
workflow:
  reference: terrain
  output: forcing
  process_list:
    air_t:
      - function: interpolate_data
        method: nn
      - function: mask_data_by_ref
        ref_value: -9999
";

    fn at(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(hour, 0, 0))
            .unwrap()
    }

    #[test]
    fn full_configuration() {
        let config = RunConfig::new_from_slice(CONFIG.as_bytes()).unwrap();

        assert_eq!(config.resources.memory, 2048);
        assert_eq!(config.datasets.len(), 4);
        assert_eq!(config.workflow.mode, WorkflowMode::MultiVariable);
        assert_eq!(config.workflow.output, vec!["forcing".to_string()]);
        assert_eq!(config.workflow.process_list["air_t"].len(), 2);
        assert_eq!(config.workflow.process_list["air_t"][0].function, "interpolate_data");
        assert_eq!(config.input_names(), vec!["air_t".to_string(), "dew_point".to_string()]);

        assert_eq!(
            config.time.resolve(None),
            RunTimes::Range {
                start: at(0),
                end: at(5)
            }
        );
        assert_eq!(config.time.resolve(Some(at(3))), RunTimes::Steps(vec![at(3)]));
    }

    #[test]
    fn range_with_frequency() {
        let mut config = RunConfig::new_from_slice(CONFIG.as_bytes()).unwrap();
        config.time.freq = Some("2h".parse::<TimeFrequency>().unwrap());

        assert_eq!(
            config.time.resolve(None),
            RunTimes::Steps(vec![at(0), at(2), at(4)])
        );
    }

    #[test]
    fn out_of_bounds_options() {
        let low_memory = CONFIG.replace("memory: 2048", "memory: 64");
        assert!(RunConfig::new_from_slice(low_memory.as_bytes()).is_err());

        let reversed = CONFIG.replace("end: 2024-01-01 05:00", "end: 2023-12-31 05:00");
        assert!(RunConfig::new_from_slice(reversed.as_bytes()).is_err());

        let missing_reference = CONFIG.replace("reference: terrain", "reference: dem");
        assert!(RunConfig::new_from_slice(missing_reference.as_bytes()).is_err());

        let unknown_key = CONFIG.replace("resources:", "resource:");
        assert!(RunConfig::new_from_slice(unknown_key.as_bytes()).is_err());
    }
}
