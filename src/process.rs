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

//! Process library and the containers running processes inside a workflow.
//!
//! Every process is a plain function of a [`ProcessInput`] registered by name
//! in the [`ProcessRegistry`]. A [`ProcessorContainer`] binds one process to
//! its input, dependency and output datasets and runs it at one timestamp.

mod compute;
mod container;
mod functions;
mod params;
mod radiation;
mod registry;
mod series;

pub use compute::{compute_data_rh, compute_data_wind_speed, convert_temperature_units};
pub use container::{
    DumpMode, ProcessorContainer, RunContext, StepOutcome, GENERIC_VARIABLE,
};
pub use functions::{interpolate_data, mask_data_by_limits, mask_data_by_ref, merge_data_by_ref};
pub use params::Params;
pub use radiation::{
    cloud_factor, compute_data_astronomic_radiation, compute_data_incoming_radiation,
};
pub use registry::{ProcessEntry, ProcessFn, ProcessInput, ProcessRegistry};
pub use series::join_time_series_by_registry;
