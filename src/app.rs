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

//! Driver of the `shybox` binary: configuration, datasets,
//! orchestrator and run.
//!
//! The binary is called as `shybox [config.yaml] [time]`. Without arguments
//! the configuration is read from `config.yaml` in the working directory.
//! The optional time overrides the timestamps of the configuration.

use crate::{
    configuration::{RunConfig, RunTimes},
    dataset::{combine_into_set, Dataset, SharedDataset},
    errors::{ConfigError, OrchestratorError, ShyboxError},
    io::Codecs,
    orchestrator::{DataPackage, Orchestrator, RunReport},
    time::parse_datetime,
    ALLOCATOR,
};
use chrono::NaiveDateTime;
use indexmap::IndexMap;
use log::{debug, info};
use std::{env, path::PathBuf, rc::Rc};

const DEFAULT_CONFIG: &str = "config.yaml";

/// Main toolkit function: reads the arguments and the configuration,
/// caps the memory and runs the workflow.
pub fn main() -> Result<(), ShyboxError> {
    let mut args = env::args().skip(1);
    let config_path = PathBuf::from(args.next().unwrap_or_else(|| DEFAULT_CONFIG.to_string()));
    let time_override = args
        .next()
        .map(|text| parse_datetime(&text))
        .transpose()
        .map_err(ConfigError::from)?;

    debug!("Reading configuration from {}", config_path.display());
    let config = RunConfig::new_from_file(&config_path)?;

    debug!("Setting memory limit");
    ALLOCATOR
        .set_limit(config.resources.memory_bytes())
        .map_err(|_| ShyboxError::MemoryLimit)?;

    let report = run(&config, time_override)?;
    info!(
        "Processed {} timestamps: {} processes done, {} skipped, {} collections written",
        report.steps, report.done, report.skipped, report.flushed
    );

    Ok(())
}

/// Builds the datasets and the orchestrator of `config` and runs it.
pub fn run(
    config: &RunConfig,
    time_override: Option<NaiveDateTime>,
) -> Result<RunReport, ShyboxError> {
    let codecs = Rc::new(Codecs::default());
    let package = build_package(config, &codecs)?;

    info!("Preparing the workflow");
    let mut orchestrator = Orchestrator::from_config(package, &config.workflow, codecs)?;

    let report = match config.time.resolve(time_override) {
        RunTimes::Steps(steps) => orchestrator.run(&steps)?,
        RunTimes::Range { start, end } => orchestrator.run_range(start, end)?,
    };

    Ok(report)
}

/// Datasets of the configuration, split into the workflow roles.
pub fn build_package(config: &RunConfig, codecs: &Rc<Codecs>) -> Result<DataPackage, ShyboxError> {
    let mut catalog: IndexMap<String, SharedDataset> = IndexMap::new();

    for (name, dataset_config) in &config.datasets {
        debug!("Building dataset {}", name);
        let dataset = Dataset::from_config(name, dataset_config, Rc::clone(codecs))?;
        catalog.insert(name.clone(), dataset.into_shared());
    }

    for (name, dataset_config) in &config.datasets {
        if dataset_config.parents.is_empty() {
            continue;
        }
        let parents = dataset_config
            .parents
            .iter()
            .map(|parent| lookup(&catalog, parent))
            .collect::<Result<Vec<_>, _>>()?;
        lookup(&catalog, name)?
            .borrow_mut()
            .set_parents(parents, combine_into_set);
    }

    let inputs = config
        .input_names()
        .iter()
        .map(|name| lookup(&catalog, name))
        .collect::<Result<Vec<_>, _>>()?;

    let outputs = config
        .workflow
        .output
        .iter()
        .map(|name| lookup(&catalog, name))
        .collect::<Result<Vec<_>, _>>()?;

    let reference = config
        .workflow
        .reference
        .as_ref()
        .map(|name| lookup(&catalog, name))
        .transpose()?;

    Ok(DataPackage {
        inputs,
        outputs,
        reference,
        catalog,
    })
}

fn lookup(
    catalog: &IndexMap<String, SharedDataset>,
    name: &str,
) -> Result<SharedDataset, OrchestratorError> {
    catalog
        .get(name)
        .map(Rc::clone)
        .ok_or_else(|| OrchestratorError::MissingDataset(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::{build_package, run};
    use crate::{configuration::RunConfig, io::Codecs, time::parse_datetime};
    use std::rc::Rc;

    fn run_config(dir: &str) -> RunConfig {
        let yaml = format!(
            r#"
time:
  start: 2024-03-01 00:00
  end: 2024-03-01 02:00
  freq: 1h
datasets:
  terrain:
    file_mode: on_demand
    file_variable: terrain
    info: {{x_ll: 12.0, y_ll: 43.0, rows: 10, cols: 10, res: 0.1, value: 100}}
  air_t:
    file_mode: on_demand
    file_variable: air_t
    info: {{x_ll: 12.0, y_ll: 43.0, rows: 5, cols: 5, res: 0.2, value: 290}}
  forcing:
    file_name: {}/forcing_%Y%m%d%H%M.tmp
    file_io: output
    file_variable: air_t
workflow:
  reference: terrain
  output: forcing
  process_list:
    air_t:
      - function: interpolate_data
        method: nn
        max_distance: 25000
      - function: convert_temperature_units
"#,
            dir
        );
        RunConfig::new_from_slice(yaml.as_bytes()).unwrap()
    }

    #[test]
    fn datasets_split_into_roles() {
        let config = run_config("/tmp/shybox");
        let package = build_package(&config, &Rc::new(Codecs::default())).unwrap();

        assert_eq!(package.inputs.len(), 1);
        assert_eq!(package.inputs[0].borrow().name, "air_t");
        assert_eq!(package.outputs[0].borrow().name, "forcing");
        assert_eq!(
            package.reference.as_ref().map(|r| r.borrow().name.clone()).as_deref(),
            Some("terrain")
        );
        assert_eq!(package.catalog.len(), 3);
    }

    #[test]
    fn configured_run_writes_every_step() {
        let dir = tempfile::tempdir().unwrap();
        let config = run_config(dir.path().to_str().unwrap());

        let report = run(&config, None).unwrap();
        assert_eq!(report.steps, 3);
        assert_eq!(report.done, 6);
        assert_eq!(report.flushed, 3);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 3);

        let single = tempfile::tempdir().unwrap();
        let config = run_config(single.path().to_str().unwrap());
        let time = parse_datetime("2024-03-01 01:00").unwrap();
        let report = run(&config, Some(time)).unwrap();
        assert_eq!(report.steps, 1);
        assert_eq!(std::fs::read_dir(single.path()).unwrap().count(), 1);
    }
}
