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

//! Shybox is a dataset-processing toolkit for hydrological modelling
//! pipelines (HMC and S3M models developed at CIMA Research Foundation).
//!
//! The crate resolves time-parameterized file-naming templates into concrete
//! datasets, loads and normalizes raster and tabular data, resamples and merges
//! source grids onto a common reference grid, and writes the derived forcing
//! products through chained per-variable processes driven across timestamps.
//!
//! The two central subsystems are the [`dataset`] abstraction (with the key
//! resolver in [`key`]) and the [`orchestrator`] with its processor containers
//! in [`process`].

pub mod app;
pub mod configuration;
pub mod constants;
pub mod dataset;
pub mod errors;
pub mod grid;
pub mod io;
pub mod key;
pub mod orchestrator;
pub mod process;
pub mod resample;
pub mod time;

use cap::Cap;
use std::alloc;

/// Floating point type used for all gridded values and coordinates.
pub type Float = f64;

/// Global allocator of the toolkit.
///
/// Use of static global allocator allows for capping the memory to the limit set by user
/// in configuration file and in effect provide better [OOM error](https://en.wikipedia.org/wiki/Out_of_memory) handling.
#[global_allocator]
pub static ALLOCATOR: Cap<alloc::System> = Cap::new(alloc::System, usize::MAX);
