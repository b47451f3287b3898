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

//! Pairing of dataset variable tags with workflow names.

use super::config::{FileRole, VariableTemplate};

/// One variable of a dataset: the tag it is configured with and the
/// name it carries inside a workflow.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct NamespaceEntry {
    pub variable: String,
    pub workflow: String,
}

/// Bidirectional map between variable tags and workflow names.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct DatasetNamespace {
    entries: Vec<NamespaceEntry>,
}

impl DatasetNamespace {
    /// Pairs variable tags with workflow names, stopping at the shorter list.
    pub fn new(variables: &[String], workflows: &[String]) -> Self {
        DatasetNamespace {
            entries: variables
                .iter()
                .zip(workflows)
                .map(|(variable, workflow)| NamespaceEntry {
                    variable: variable.clone(),
                    workflow: workflow.clone(),
                })
                .collect(),
        }
    }

    /// Workflow names of a dataset: file variables of outputs are the
    /// `vars_data` keys, of every other role the values.
    pub fn workflows(role: FileRole, template: &VariableTemplate) -> Vec<String> {
        match role {
            FileRole::Input | FileRole::Derived => template.vars_data.values().cloned().collect(),
            FileRole::Output => template.vars_data.keys().cloned().collect(),
            FileRole::Tmp => {
                if template.vars_wf.is_empty() {
                    vec!["variable".to_string()]
                } else {
                    template.vars_wf.clone()
                }
            }
        }
    }

    pub fn workflow_of(&self, variable: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.variable == variable)
            .map(|entry| entry.workflow.as_str())
    }

    pub fn variable_of(&self, workflow: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.workflow == workflow)
            .map(|entry| entry.variable.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &NamespaceEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
