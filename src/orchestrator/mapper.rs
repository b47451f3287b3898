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

//! Table pairing every variable tag of a workflow with its input dataset,
//! its workflow name and its output dataset.

use crate::dataset::SharedDataset;

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MapperRow {
    pub id: usize,
    pub tag: String,
    pub workflow: String,
    /// Name of the input dataset.
    pub input: String,
    /// Name of the output dataset, if any.
    pub output: Option<String>,
}

impl MapperRow {
    /// `tag:workflow`, the key of buffered results.
    pub fn reference(&self) -> String {
        format!("{}:{}", self.tag, self.workflow)
    }
}

/// Rows sorted by tag.
#[derive(Clone, Debug, Default)]
pub struct Mapper {
    rows: Vec<MapperRow>,
}

impl Mapper {
    pub fn new(inputs: &[SharedDataset], outputs: &[SharedDataset]) -> Self {
        let mut rows = vec![];

        for input in inputs {
            let input = input.borrow();

            let mut pairs: Vec<(String, String)> = input
                .namespace
                .iter()
                .map(|entry| (entry.variable.clone(), entry.workflow.clone()))
                .collect();

            // variables without a vars_data entry keep their tag as workflow name
            for variable in input.variables.iter().skip(pairs.len()) {
                pairs.push((variable.clone(), variable.clone()));
            }
            if pairs.is_empty() {
                pairs.push((input.name.clone(), input.workflow()));
            }

            for (tag, workflow) in pairs {
                let output = outputs
                    .iter()
                    .find(|output| output.borrow().variables.contains(&tag))
                    .or_else(|| if outputs.len() == 1 { outputs.first() } else { None })
                    .map(|output| output.borrow().name.clone());

                rows.push(MapperRow {
                    id: 0,
                    tag,
                    workflow,
                    input: input.name.clone(),
                    output,
                });
            }
        }

        rows.sort_by(|a, b| a.tag.cmp(&b.tag));
        for (id, row) in rows.iter_mut().enumerate() {
            row.id = id;
        }

        Mapper { rows }
    }

    pub fn rows(&self) -> &[MapperRow] {
        &self.rows
    }

    pub fn row(&self, tag: &str) -> Option<&MapperRow> {
        self.rows.iter().find(|row| row.tag == tag)
    }

    /// Rows of the `priority` tags first, in the given order, then the
    /// others by tag.
    pub fn get_rows_by_priority(&self, priority: &[String]) -> Vec<&MapperRow> {
        let mut ordered: Vec<&MapperRow> = priority.iter().filter_map(|tag| self.row(tag)).collect();

        for row in &self.rows {
            if !priority.contains(&row.tag) {
                ordered.push(row);
            }
        }

        ordered
    }
}

#[cfg(test)]
mod tests {
    use super::Mapper;
    use crate::{
        dataset::{Dataset, DatasetConfig, SharedDataset},
        io::Codecs,
    };
    use std::rc::Rc;

    fn dataset(name: &str, variables: &[&str]) -> SharedDataset {
        let mut config = DatasetConfig::local(&format!("/data/{}_%Y%m%d%H%M.asc", name));
        config.file_variable = variables.iter().map(|v| v.to_string()).collect();
        Dataset::from_config(name, &config, Rc::new(Codecs::default()))
            .unwrap()
            .into_shared()
    }

    #[test]
    fn priority_comes_first() {
        let inputs = vec![
            dataset("wind", &["wind"]),
            dataset("air_t", &["air_t"]),
            dataset("rh", &["rh"]),
        ];
        let outputs = vec![dataset("forcing", &["air_t", "rh", "wind"])];

        let mapper = Mapper::new(&inputs, &outputs);
        let tags: Vec<&str> = mapper.rows().iter().map(|row| row.tag.as_str()).collect();
        assert_eq!(tags, vec!["air_t", "rh", "wind"]);
        assert_eq!(mapper.row("rh").and_then(|row| row.output.as_deref()), Some("forcing"));
        assert_eq!(mapper.row("wind").map(|row| row.reference()).as_deref(), Some("wind:wind"));

        let ordered: Vec<&str> = mapper
            .get_rows_by_priority(&["wind".to_string()])
            .iter()
            .map(|row| row.tag.as_str())
            .collect();
        assert_eq!(ordered, vec!["wind", "air_t", "rh"]);
    }
}
