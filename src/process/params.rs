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

//! Static arguments of a process, as written in the `process_list`
//! entries of the workflow configuration.

use crate::{errors::ProcessError, Float};
use indexmap::IndexMap;
use serde_yaml::{Mapping, Value};

/// Keyword arguments of a process step.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct Params {
    values: Mapping,
}

fn key(name: &str) -> Value {
    Value::String(name.to_string())
}

impl Params {
    pub fn new(values: Mapping) -> Self {
        Params { values }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(&key(name))
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(&key(name))
    }

    pub fn insert<V: Into<Value>>(&mut self, name: &str, value: V) {
        self.values.insert(key(name), value.into());
    }

    /// Copy without the named entries.
    pub fn without(&self, names: &[&str]) -> Params {
        let mut values = self.values.clone();
        for name in names {
            values.remove(&key(name));
        }
        Params { values }
    }

    /// Number parameter. `null` and the string `nan` read as NaN.
    pub fn get_opt_f64(&self, name: &str) -> Result<Option<Float>, ProcessError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::Null) => Ok(Some(Float::NAN)),
            Some(Value::Number(number)) => number.as_f64().map(Some).ok_or_else(|| {
                ProcessError::InvalidParameter(format!("{} is not a number", name))
            }),
            Some(Value::String(text)) => match text.trim().to_lowercase().as_str() {
                "nan" | "none" | "null" => Ok(Some(Float::NAN)),
                other => other.parse::<Float>().map(Some).map_err(|_| {
                    ProcessError::InvalidParameter(format!("{} is not a number: {}", name, text))
                }),
            },
            Some(_) => Err(ProcessError::InvalidParameter(format!(
                "{} is not a number",
                name
            ))),
        }
    }

    pub fn get_f64(&self, name: &str, default: Float) -> Result<Float, ProcessError> {
        Ok(self.get_opt_f64(name)?.unwrap_or(default))
    }

    pub fn get_usize(&self, name: &str, default: usize) -> Result<usize, ProcessError> {
        match self.get(name) {
            None => Ok(default),
            Some(Value::Number(number)) => number
                .as_u64()
                .map(|n| n as usize)
                .ok_or_else(|| {
                    ProcessError::InvalidParameter(format!("{} is not a positive integer", name))
                }),
            Some(_) => Err(ProcessError::InvalidParameter(format!(
                "{} is not a positive integer",
                name
            ))),
        }
    }

    pub fn get_bool(&self, name: &str, default: bool) -> Result<bool, ProcessError> {
        match self.get(name) {
            None => Ok(default),
            Some(Value::Bool(flag)) => Ok(*flag),
            Some(_) => Err(ProcessError::InvalidParameter(format!(
                "{} is not a boolean",
                name
            ))),
        }
    }

    pub fn get_str(&self, name: &str) -> Result<Option<String>, ProcessError> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(text)) => Ok(Some(text.clone())),
            Some(Value::Number(number)) => Ok(Some(number.to_string())),
            Some(_) => Err(ProcessError::InvalidParameter(format!(
                "{} is not a string",
                name
            ))),
        }
    }

    /// String-to-string table, e.g. `deps_vars`.
    pub fn get_map(&self, name: &str) -> Result<IndexMap<String, String>, ProcessError> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(IndexMap::new()),
            Some(Value::Mapping(map)) => map
                .iter()
                .map(|(k, v)| match (k.as_str(), v.as_str()) {
                    (Some(k), Some(v)) => Ok((k.to_string(), v.to_string())),
                    _ => Err(ProcessError::InvalidParameter(format!(
                        "{} must map names to names",
                        name
                    ))),
                })
                .collect(),
            Some(_) => Err(ProcessError::InvalidParameter(format!(
                "{} is not a mapping",
                name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Params;

    fn params(text: &str) -> Params {
        Params::new(serde_yaml::from_str(text).unwrap())
    }

    #[test]
    fn typed_getters() {
        let params = params(
            "method: idw\nmax_distance: 25000\nneighbours: 4\nfill_value: nan\nclip: false\ndeps_vars: {t: air_t, td: dew_point}",
        );

        assert_eq!(params.get_str("method").unwrap().as_deref(), Some("idw"));
        assert_eq!(params.get_f64("max_distance", 0.0).unwrap(), 25000.0);
        assert_eq!(params.get_usize("neighbours", 8).unwrap(), 4);
        assert!(params.get_f64("fill_value", 0.0).unwrap().is_nan());
        assert!(!params.get_bool("clip", true).unwrap());
        assert_eq!(params.get_f64("sigma", 1.5).unwrap(), 1.5);
        assert_eq!(params.get_map("deps_vars").unwrap()["td"], "dew_point");

        assert!(params.get_usize("method", 1).is_err());
        assert!(!params.without(&["method"]).contains("method"));
    }
}
