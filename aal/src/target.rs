// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::fmt;

/// Identifies a single ASIC managed by the driver
pub type DevId = u32;

/// Identifies a table within a P4 program, as assigned by the compiler
pub type TableId = u32;

/// Addresses every pipe on a device
pub const DEV_PIPE_ALL: u32 = 0xffff;

/// Addresses both gresses
pub const DIRECTION_ALL: u32 = 0xff;

/// Addresses every parser in a pipe
pub const PRSR_ID_ALL: u8 = 0xff;

/// Identifies the portion of a device an operation applies to.  The layout
/// matches `bf_rt_target_t`, as it is handed as-is to C callbacks.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DevTarget {
    pub dev_id: DevId,
    pub pipe_id: u32,
    pub direction: u32,
    pub prsr_id: u8,
}

impl DevTarget {
    /// A target covering every pipe of the given device
    pub fn all_pipes(dev_id: DevId) -> Self {
        DevTarget {
            dev_id,
            pipe_id: DEV_PIPE_ALL,
            direction: DIRECTION_ALL,
            prsr_id: PRSR_ID_ALL,
        }
    }

    pub fn pipe(dev_id: DevId, pipe_id: u32) -> Self {
        DevTarget {
            pipe_id,
            ..DevTarget::all_pipes(dev_id)
        }
    }
}

impl Default for DevTarget {
    fn default() -> Self {
        DevTarget::all_pipes(0)
    }
}

impl fmt::Display for DevTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.pipe_id == DEV_PIPE_ALL {
            write!(f, "dev {}/all pipes", self.dev_id)
        } else {
            write!(f, "dev {}/pipe {}", self.dev_id, self.pipe_id)
        }
    }
}
