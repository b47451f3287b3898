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

//! Storage primitives behind a dataset.
//!
//! Every dataset variant only has to read, write, check, enumerate and
//! remove keys; caching, templating and key resolution are built on top of
//! these primitives by [`Dataset`](super::Dataset).

use super::config::{DataLayout, OnDemandInfo};
use crate::{
    constants::DEFAULT_CRS_WKT,
    errors::{CodecError, DatasetError},
    grid::{Grid, Payload, Table, CRS_ATTR},
    io::{Codecs, FileFormat, WriteOptions},
    Float,
};
use ndarray::{Array1, Array2};
use rustc_hash::FxHashMap;
use std::{cell::RefCell, fmt, fs, path::Path, rc::Rc};
use walkdir::WalkDir;

/// Primitive operations a dataset variant must provide.
pub trait DatasetBackend {
    /// Reads the data stored at `key`. `variables` restricts the
    /// variables read from multi-variable files.
    fn read(&self, key: &str, variables: &[String]) -> Result<Payload, DatasetError>;

    fn write(&self, payload: &Payload, key: &str, options: &WriteOptions)
        -> Result<(), DatasetError>;

    fn exists(&self, key: &str) -> bool;

    /// Size in bytes of the data at `key`, if known.
    fn size(&self, key: &str) -> Option<u64>;

    /// All keys found below `prefix`, sorted.
    fn walk(&self, prefix: &str) -> Vec<String>;

    fn remove(&self, key: &str) -> Result<(), DatasetError>;
}

/// Files on the local filesystem read and written through the codecs.
#[derive(Clone)]
pub struct LocalFiles {
    pub format: FileFormat,
    pub file_type: String,
    codecs: Rc<Codecs>,
}

impl LocalFiles {
    pub fn new(format: FileFormat, file_type: &str, codecs: Rc<Codecs>) -> Self {
        LocalFiles {
            format,
            file_type: file_type.to_string(),
            codecs,
        }
    }
}

impl DatasetBackend for LocalFiles {
    fn read(&self, key: &str, variables: &[String]) -> Result<Payload, DatasetError> {
        let path = Path::new(key);
        if !path.exists() {
            return Err(DatasetError::DataNotAvailable(key.to_string()));
        }

        Ok(self
            .codecs
            .read(path, self.format, &self.file_type, variables)?)
    }

    fn write(
        &self,
        payload: &Payload,
        key: &str,
        options: &WriteOptions,
    ) -> Result<(), DatasetError> {
        Ok(self
            .codecs
            .write(payload, Path::new(key), self.format, &self.file_type, options)?)
    }

    fn exists(&self, key: &str) -> bool {
        Path::new(key).exists()
    }

    fn size(&self, key: &str) -> Option<u64> {
        fs::metadata(key).ok().map(|meta| meta.len())
    }

    fn walk(&self, prefix: &str) -> Vec<String> {
        let (root, relative) = if prefix.is_empty() {
            (".", true)
        } else {
            (prefix, false)
        };

        let mut keys: Vec<String> = WalkDir::new(root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| {
                let path = entry.path();
                let path = if relative {
                    path.strip_prefix(".").unwrap_or(path)
                } else {
                    path
                };
                path.to_string_lossy().into_owned()
            })
            .collect();

        keys.sort();
        keys
    }

    fn remove(&self, key: &str) -> Result<(), DatasetError> {
        let path = Path::new(key);
        if path.exists() {
            log::debug!("Removing {}", key);
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// Synthetic data built from a descriptor. Written data go to files.
#[derive(Clone)]
pub struct OnDemand {
    pub info: OnDemandInfo,
    pub layout: DataLayout,
    pub variable: String,
    files: LocalFiles,
}

impl OnDemand {
    pub fn new(info: OnDemandInfo, layout: DataLayout, variable: &str, files: LocalFiles) -> Self {
        OnDemand {
            info,
            layout,
            variable: variable.to_string(),
            files,
        }
    }

    /// Builds the described object.
    pub fn create(&self, name: &str) -> Result<Payload, DatasetError> {
        match self.info {
            OnDemandInfo::Raster {
                x_ll,
                y_ll,
                rows,
                cols,
                res,
                value,
            } => raster(name, x_ll, y_ll, rows, cols, res, value),
            OnDemandInfo::Bbox {
                xmin,
                ymin,
                xmax,
                ymax,
                res,
                value,
            } => {
                let cols = ((xmax - xmin) / res).round().max(1.0) as usize;
                let rows = ((ymax - ymin) / res).round().max(1.0) as usize;
                raster(name, xmin, ymin, rows, cols, res, value)
            }
            OnDemandInfo::Points {
                ref lon,
                ref lat,
                value,
            } => Ok(Payload::Table(Table {
                headers: vec![
                    "longitude".to_string(),
                    "latitude".to_string(),
                    name.to_string(),
                ],
                rows: lon
                    .iter()
                    .zip(lat)
                    .map(|(lon, lat)| vec![lon.to_string(), lat.to_string(), value.to_string()])
                    .collect(),
            })),
        }
    }
}

/// Regular grid with cell-center coordinates and descending latitudes.
fn raster(
    name: &str,
    x_ll: Float,
    y_ll: Float,
    rows: usize,
    cols: usize,
    res: Float,
    value: Float,
) -> Result<Payload, DatasetError> {
    let west = x_ll + res / 2.0;
    let south = y_ll + res / 2.0;

    let lats = Array1::linspace(south + res * (rows - 1) as Float, south, rows);
    let lons = Array1::linspace(west, west + res * (cols - 1) as Float, cols);

    let mut grid = Grid::new_2d(name, lats, lons, Array2::from_elem((rows, cols), value))?;
    grid.set_attr(CRS_ATTR, DEFAULT_CRS_WKT);

    Ok(Payload::Grid(grid))
}

impl DatasetBackend for OnDemand {
    fn read(&self, _key: &str, variables: &[String]) -> Result<Payload, DatasetError> {
        let name = variables.first().unwrap_or(&self.variable);
        log::debug!("Creating {} data {} on demand", self.layout, name);
        self.create(name)
    }

    fn write(
        &self,
        payload: &Payload,
        key: &str,
        options: &WriteOptions,
    ) -> Result<(), DatasetError> {
        if key.is_empty() {
            return Err(DatasetError::Codec(CodecError::UnsupportedFormat(
                "on-demand dataset without file name".to_string(),
            )));
        }
        self.files.write(payload, key, options)
    }

    fn exists(&self, _key: &str) -> bool {
        true
    }

    fn size(&self, _key: &str) -> Option<u64> {
        None
    }

    fn walk(&self, _prefix: &str) -> Vec<String> {
        vec![]
    }

    fn remove(&self, key: &str) -> Result<(), DatasetError> {
        self.files.remove(key)
    }
}

/// In-process store shared by all clones of a dataset.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Rc<RefCell<FxHashMap<String, Payload>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl DatasetBackend for MemoryStore {
    fn read(&self, key: &str, _variables: &[String]) -> Result<Payload, DatasetError> {
        self.entries
            .borrow()
            .get(key)
            .cloned()
            .ok_or_else(|| DatasetError::DataNotAvailable(key.to_string()))
    }

    fn write(
        &self,
        payload: &Payload,
        key: &str,
        options: &WriteOptions,
    ) -> Result<(), DatasetError> {
        let mut entries = self.entries.borrow_mut();

        match (entries.get_mut(key), payload) {
            (Some(Payload::Table(stored)), Payload::Table(table)) if options.append => {
                stored.rows.extend(table.rows.iter().cloned());
            }
            (Some(Payload::Text(stored)), Payload::Text(text)) if options.append => {
                stored.push_str(text);
            }
            _ => {
                entries.insert(key.to_string(), payload.clone());
            }
        }

        Ok(())
    }

    fn exists(&self, key: &str) -> bool {
        self.entries.borrow().contains_key(key)
    }

    fn size(&self, key: &str) -> Option<u64> {
        self.entries
            .borrow()
            .get(key)
            .map(|payload| if payload.is_empty() { 0 } else { 1 })
    }

    fn walk(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .borrow()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    fn remove(&self, key: &str) -> Result<(), DatasetError> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }
}

/// Closed set of dataset variants.
#[derive(Clone)]
pub enum Backend {
    Local(LocalFiles),
    OnDemand(OnDemand),
    Memory(MemoryStore),
}

impl Backend {
    fn inner(&self) -> &dyn DatasetBackend {
        match self {
            Backend::Local(backend) => backend,
            Backend::OnDemand(backend) => backend,
            Backend::Memory(backend) => backend,
        }
    }
}

impl DatasetBackend for Backend {
    fn read(&self, key: &str, variables: &[String]) -> Result<Payload, DatasetError> {
        self.inner().read(key, variables)
    }

    fn write(
        &self,
        payload: &Payload,
        key: &str,
        options: &WriteOptions,
    ) -> Result<(), DatasetError> {
        self.inner().write(payload, key, options)
    }

    fn exists(&self, key: &str) -> bool {
        self.inner().exists(key)
    }

    fn size(&self, key: &str) -> Option<u64> {
        self.inner().size(key)
    }

    fn walk(&self, prefix: &str) -> Vec<String> {
        self.inner().walk(prefix)
    }

    fn remove(&self, key: &str) -> Result<(), DatasetError> {
        self.inner().remove(key)
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Local(files) => write!(f, "Local({})", files.format),
            Backend::OnDemand(on_demand) => write!(f, "OnDemand({})", on_demand.layout),
            Backend::Memory(store) => write!(f, "Memory({} entries)", store.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DatasetBackend, LocalFiles, MemoryStore, OnDemand};
    use crate::{
        dataset::config::{DataLayout, OnDemandInfo},
        grid::{tests::sample_grid, Payload},
        io::{Codecs, FileFormat, WriteOptions},
    };
    use float_cmp::approx_eq;
    use std::rc::Rc;

    #[test]
    fn on_demand_raster_geometry() {
        let files = LocalFiles::new(FileFormat::Tmp, "grid_2d", Rc::new(Codecs::default()));
        let info = OnDemandInfo::Raster {
            x_ll: 12.0,
            y_ll: 43.0,
            rows: 10,
            cols: 10,
            res: 0.1,
            value: 1.0,
        };
        let backend = OnDemand::new(info, DataLayout::Geo, "terrain", files);

        let grid = backend.read("", &[]).unwrap().into_grid().unwrap();
        let (west, east, south, north) = grid.bbox().unwrap();

        assert_eq!(grid.name, "terrain");
        assert_eq!(grid.values.shape(), &[10, 10]);
        assert!(approx_eq!(f64, west, 12.05, epsilon = 1e-9));
        assert!(approx_eq!(f64, east, 12.95, epsilon = 1e-9));
        assert!(approx_eq!(f64, south, 43.05, epsilon = 1e-9));
        assert!(approx_eq!(f64, north, 43.95, epsilon = 1e-9));
        assert!(grid.lats().unwrap()[0] > grid.lats().unwrap()[9]);
    }

    #[test]
    fn memory_store_is_shared_by_clones() {
        let store = MemoryStore::new();
        let clone = store.clone();

        clone
            .write(
                &Payload::Grid(sample_grid("a", 2, 2, 1.0)),
                "a_20240101.tmp",
                &WriteOptions::default(),
            )
            .unwrap();

        assert!(store.exists("a_20240101.tmp"));
        assert_eq!(store.walk("a_"), vec!["a_20240101.tmp"]);
        store.remove("a_20240101.tmp").unwrap();
        assert!(clone.is_empty());
    }

    #[test]
    fn local_walk_lists_files() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("2024").join("01");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("a.txt"), "x").unwrap();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();

        let files = LocalFiles::new(FileFormat::Txt, "", Rc::new(Codecs::default()));
        let prefix = dir.path().to_string_lossy().into_owned();
        let keys = files.walk(&prefix);

        assert_eq!(keys.len(), 2);
        assert!(keys[1].ends_with("b.txt"));
        assert_eq!(files.size(&keys[1]), Some(0));
        assert!(files.read(&format!("{}/missing.txt", prefix), &[]).is_err());
    }
}
