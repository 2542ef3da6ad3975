// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::fmt;

use crate::bf_status_t;
use crate::DevId;
use crate::DevTarget;
use crate::TableId;

/// Identifies the client session a request is issued under
pub type SessionHdl = u32;

/// The hardware-facing request types behind the table operations.  "Direct"
/// resources are attached to the entries of a match table, while "indirect"
/// resources live in their own table and are indexed by the match result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SyncPath {
    /// Pull direct counters of a match table into the software shadow
    DirectCounter,
    /// Pull every entry of a counter table into the software shadow
    IndirectCounter,
    /// Pull direct stateful (register) values of a match table
    DirectRegister,
    /// Pull every entry of a register table
    IndirectRegister,
    /// Refresh the idle-time hit state of a match table
    IdleTimeHitState,
}

impl fmt::Display for SyncPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncPath::DirectCounter => "direct_stat_database_sync",
            SyncPath::IndirectCounter => "stat_database_sync",
            SyncPath::DirectRegister => "stful_direct_database_sync",
            SyncPath::IndirectRegister => "stful_database_sync",
            SyncPath::IdleTimeHitState => "idle_time_update_hit_state",
        };
        write!(f, "{s}")
    }
}

/// A single request handed to the low-level driver
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncRequest {
    pub session: SessionHdl,
    pub target: DevTarget,
    pub table_id: TableId,
    pub path: SyncPath,
}

/// The token a driver hands back when an asynchronous request finishes.  It
/// plays the role of the C completion function plus its cookie.
pub trait Completion: Send {
    /// Called exactly once, from a driver-owned thread, with the id of the
    /// device the request was issued against.
    fn complete(self: Box<Self>, dev_id: DevId);
}

/// The operations the table runtime needs from the low-level driver.
pub trait SyncDriver: Send + Sync {
    /// Start a database sync or hit-state update.  When `completion` is
    /// present and the driver accepts the request (returns `BF_SUCCESS`), the
    /// driver owns the token and must complete it exactly once.  When it is
    /// absent, the request runs synchronously and is finished on return.
    fn database_sync(
        &self,
        request: &SyncRequest,
        completion: Option<Box<dyn Completion>>,
    ) -> bf_status_t;
}
