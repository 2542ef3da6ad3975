// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Asynchronous table operations for the BF-RT runtime.
//!
//! A table operation (register sync, counter sync, hit-state update) is handed
//! to the low-level driver, which completes it later from one of its own
//! threads.  Each outstanding request is tracked by a slot in a per-table,
//! per-operation pool.  The slot is the only path by which the driver's
//! completion reaches the client's callback, and it guarantees the callback
//! fires at most once per request.

pub mod callback;
pub mod clock;
pub mod config;
pub mod operations;
pub mod pool;
pub mod registry;
pub mod state;
mod workers;

pub use callback::ClientCookie;
pub use callback::OperationCallback;
pub use operations::OperationKind;
pub use operations::TableInfo;
pub use operations::TableOperation;
pub use operations::TableOperations;
pub use pool::OperationCookie;
pub use pool::OperationStatePool;
pub use registry::DeviceStateRegistry;
