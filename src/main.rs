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

//! Shybox prepares the forcing datasets of hydrological models: it reads
//! the configured source datasets, resamples, masks, merges and derives
//! variables on a common reference grid and writes them timestamp by
//! timestamp.

use env_logger::Env;
use log::{error, info};

/// The main program function.
/// Prepares the runtime environment and calls the [`shybox::app::main`].
///
/// To provide meaningful and high-quality error messages the `env_logger`
/// needs to be initiated before any log messages are possible to occur.
fn main() {
    #[cfg(not(feature = "debug"))]
    let logger_env = Env::new().filter_or("SHYBOX_LOG_LEVEL", "info");

    #[cfg(feature = "debug")]
    let logger_env = Env::new().filter_or("SHYBOX_LOG_LEVEL", "debug");

    env_logger::Builder::from_env(logger_env)
        .format_timestamp_millis()
        .init();

    match shybox::app::main() {
        Ok(_) => info!("Workflow finished. Check the output datasets and log."),
        Err(err) => {
            error!("Workflow failed with error: {}", err);
            std::process::exit(1);
        }
    }
}
