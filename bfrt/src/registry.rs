// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Per-device, per-program runtime state.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use slog::{debug, info, o};

use crate::clock::Clock;
use crate::clock::SystemClock;
use crate::operations::OperationKind;
use crate::pool::OperationStatePool;
use aal::DevId;
use aal::TableId;

/// The state the runtime keeps for one P4 program loaded on one device
pub struct DeviceState {
    log: slog::Logger,
    dev_id: DevId,
    program: String,
    clock: Arc<dyn Clock>,
    pools: Mutex<HashMap<(TableId, OperationKind), Arc<OperationStatePool>>>,
}

impl DeviceState {
    fn new(
        log: &slog::Logger,
        dev_id: DevId,
        program: &str,
        clock: Arc<dyn Clock>,
    ) -> Self {
        DeviceState {
            log: log.new(o!("dev_id" => dev_id, "program" => program.to_string())),
            dev_id,
            program: program.to_string(),
            clock,
            pools: Mutex::new(HashMap::new()),
        }
    }

    pub fn dev_id(&self) -> DevId {
        self.dev_id
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// The pool for this table and operation kind, created on first use
    pub fn operation_pool(
        &self,
        table_id: TableId,
        kind: OperationKind,
    ) -> Arc<OperationStatePool> {
        let mut pools = self.pools.lock().unwrap();
        pools
            .entry((table_id, kind))
            .or_insert_with(|| {
                debug!(self.log, "creating operation pool";
                    "table_id" => table_id,
                    "op" => kind.to_string());
                OperationStatePool::new(
                    &self.log,
                    table_id,
                    kind,
                    self.clock.clone(),
                )
            })
            .clone()
    }

    /// The pool for this table and operation kind, if one has been created
    pub fn pool(
        &self,
        table_id: TableId,
        kind: OperationKind,
    ) -> Option<Arc<OperationStatePool>> {
        self.pools.lock().unwrap().get(&(table_id, kind)).cloned()
    }

    /// Drop every pool belonging to a table that is going away
    pub fn remove_table(&self, table_id: TableId) {
        let mut pools = self.pools.lock().unwrap();
        pools.retain(|(id, _), _| *id != table_id);
    }
}

/// All of the device state known to the runtime, keyed by device and program
pub struct DeviceStateRegistry {
    log: slog::Logger,
    clock: Arc<dyn Clock>,
    devices: Mutex<BTreeMap<(DevId, String), Arc<DeviceState>>>,
}

impl DeviceStateRegistry {
    pub fn new(log: &slog::Logger) -> Self {
        Self::with_clock(log, Arc::new(SystemClock))
    }

    pub fn with_clock(log: &slog::Logger, clock: Arc<dyn Clock>) -> Self {
        DeviceStateRegistry {
            log: log.new(o!("unit" => "device_state")),
            clock,
            devices: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn add_device(&self, dev_id: DevId, program: &str) -> Arc<DeviceState> {
        let mut devices = self.devices.lock().unwrap();
        devices
            .entry((dev_id, program.to_string()))
            .or_insert_with(|| {
                info!(self.log, "adding device state";
                    "dev_id" => dev_id,
                    "program" => program.to_string());
                Arc::new(DeviceState::new(
                    &self.log,
                    dev_id,
                    program,
                    self.clock.clone(),
                ))
            })
            .clone()
    }

    pub fn remove_device(&self, dev_id: DevId, program: &str) -> bool {
        let mut devices = self.devices.lock().unwrap();
        let removed = devices.remove(&(dev_id, program.to_string())).is_some();
        if removed {
            info!(self.log, "removed device state";
                "dev_id" => dev_id,
                "program" => program.to_string());
        }
        removed
    }

    pub fn get_device_state(
        &self,
        dev_id: DevId,
        program: &str,
    ) -> Option<Arc<DeviceState>> {
        let devices = self.devices.lock().unwrap();
        devices.get(&(dev_id, program.to_string())).cloned()
    }
}
