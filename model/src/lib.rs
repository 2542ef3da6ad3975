// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Software model of the ternary match units of a Tofino MAU stage.

use thiserror::Error;

pub mod array;
pub mod logical_tcam;
pub mod phv;
pub mod sram;
pub mod tcam;
pub mod topology;

pub use array::MauTcamArray;
pub use logical_tcam::MatchResult;
pub use logical_tcam::MauLogicalTcam;
pub use logical_tcam::TcamHit;
pub use phv::Phv;
pub use tcam::Gress;
pub use tcam::MauTcam;
pub use tcam::TcamBank;
pub use topology::TcamRowTopology;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ModelError {
    #[error("no TCAM at row {row} col {col}")]
    NoSuchTcam { row: usize, col: usize },
    #[error("no logical TCAM {}", .0)]
    NoSuchLogicalTcam(usize),
    #[error("TCAM entry {} out of range", .0)]
    EntryOutOfRange(usize),
    #[error("invalid configuration: {}", .0)]
    InvalidConfig(String),
}
