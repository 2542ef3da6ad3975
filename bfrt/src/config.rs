// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Tunable limits for the table-operation runtime.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::operations::OperationKind;
use aal::AsicError;
use aal::AsicResult;
use common::logging::LogFormat;

/// The ceilings applied to one kind of table operation, per table
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OperationLimits {
    /// Seconds an outstanding request may go without completing before its
    /// state may be reclaimed
    pub grace_period_secs: u64,
    /// Maximum number of requests that may be outstanding at once
    pub max_states: usize,
    /// Number of threads used to run client callbacks.  With 0, callbacks run
    /// on the driver's completion thread.
    pub max_threads: usize,
}

impl OperationLimits {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

impl Default for OperationLimits {
    fn default() -> Self {
        OperationLimits {
            grace_period_secs: 30,
            max_states: 32,
            max_threads: 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OperationsConfig {
    pub register_sync: OperationLimits,
    pub counter_sync: OperationLimits,
    pub hit_state_update: OperationLimits,
}

impl Default for OperationsConfig {
    fn default() -> Self {
        OperationsConfig {
            register_sync: OperationLimits::default(),
            counter_sync: OperationLimits::default(),
            // Hit-state updates are issued for every match table on each
            // aging pass, so they get more callback threads.
            hit_state_update: OperationLimits {
                max_threads: 4,
                ..OperationLimits::default()
            },
        }
    }
}

impl OperationsConfig {
    pub fn limits(&self, kind: OperationKind) -> OperationLimits {
        match kind {
            OperationKind::RegisterSync => self.register_sync,
            OperationKind::CounterSync => self.counter_sync,
            OperationKind::HitStateUpdate => self.hit_state_update,
        }
    }
}

/// The Config structure captures all of the run-time settings of the table
/// runtime.  Anything missing from the file keeps its default.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// If set, where the log should be written.  If not set, the log goes to
    /// stdout.
    pub log_file: Option<String>,

    /// Output log info in unstructured text or json?
    pub log_format: LogFormat,

    pub operations: OperationsConfig,
}

impl Config {
    pub fn from_toml(txt: &str) -> AsicResult<Self> {
        toml::from_str(txt).map_err(|e| {
            AsicError::InvalidArg(format!("failed to parse TOML: {e}"))
        })
    }

    pub fn from_file<P>(path: P) -> AsicResult<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let txt = std::fs::read_to_string(path).map_err(|e| {
            AsicError::InvalidArg(format!(
                "failed to read {}: {e}",
                path.display()
            ))
        })?;
        Self::from_toml(&txt)
    }

    /// Build the root logger described by `log_file` and `log_format`
    pub fn logger(&self, name: &str) -> AsicResult<slog::Logger> {
        common::logging::init(name, &self.log_file, self.log_format).map_err(
            |e| AsicError::InvalidArg(format!("failed to set up logging: {e:#}")),
        )
    }
}
