// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The abstraction layer between the BF-RT table runtime and the low-level
//! driver that actually moves data between the ASIC and host memory.

use thiserror::Error;

mod driver;
pub use driver::*;

mod status;
pub use status::*;

mod target;
pub use target::*;

/// A specialized Result type for ASIC operations
pub type AsicResult<T> = Result<T, AsicError>;

/// Error type conveying additional information about ASIC errors
#[derive(Error, Debug)]
pub enum AsicError {
    /// Error reported by the low-level driver.  This will report both the
    /// location in the runtime that detected the error, as well as the
    /// detailed error message from the SDE.
    #[error("SDE error at {ctx}: {err}")]
    SdeError { ctx: String, err: String },
    /// An argument passed to the ASIC layer is invalid or inappropriate.  This
    /// indicates misbehavior from the caller.
    #[error("Invalid argument: {}", .0)]
    InvalidArg(String),
    /// This operation is unsupported for the object it was issued against
    #[error("Operation unsupported by the table")]
    OperationUnsupported,
    /// The runtime detected some internal inconsistency
    #[error("Internal error: {}",.0)]
    Internal(String),
    /// The resources needed to track the request are all busy.  The caller
    /// should reduce its rate of outstanding requests and try again.
    #[error("Resource temporarily unavailable: {}", .0)]
    Again(String),
    /// A general indication that a caller is trying to create something that
    /// already exists.
    #[error("Already exists")]
    Exists,
    /// A general indication that a caller is trying to use something that
    /// is not present.
    #[error("Missing: {}", .0)]
    Missing(String),
}

impl AsicError {
    /// Back-pressure errors are the only ones a caller is expected to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AsicError::Again(_))
    }

    /// The SDE status code a C client would have seen for this error.
    pub fn status(&self) -> bf_status_t {
        match self {
            AsicError::SdeError { .. } => BF_INTERNAL_ERROR,
            AsicError::InvalidArg(_) => BF_INVALID_ARG,
            AsicError::OperationUnsupported => BF_NOT_SUPPORTED,
            AsicError::Internal(_) => BF_INTERNAL_ERROR,
            AsicError::Again(_) => BF_EAGAIN,
            AsicError::Exists => BF_ALREADY_EXISTS,
            AsicError::Missing(_) => BF_OBJECT_NOT_FOUND,
        }
    }
}
