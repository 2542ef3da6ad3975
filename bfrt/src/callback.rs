// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use core::ffi::c_void;
use std::fmt;
use std::sync::Arc;

use aal::DevTarget;

/// A callback registered by a Rust client
pub type NativeCallback = Arc<dyn Fn(DevTarget, ClientCookie) + Send + Sync>;

/// A callback registered through the C API
pub type ExternCallback =
    extern "C" fn(target: *const DevTarget, cookie: *mut c_void);

/// The client's opaque cookie.  We never dereference it, and we never take
/// ownership of whatever it points at.  Keeping it alive until the callback
/// fires is the client's problem.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientCookie(*mut c_void);

// The cookie is only ever carried between threads and handed back to the
// client that created it.
unsafe impl Send for ClientCookie {}
unsafe impl Sync for ClientCookie {}

impl ClientCookie {
    pub fn null() -> Self {
        ClientCookie(std::ptr::null_mut())
    }

    pub fn from_ptr(ptr: *mut c_void) -> Self {
        ClientCookie(ptr)
    }

    /// Wrap an integer token, for clients that just want to tell their
    /// requests apart.
    pub fn from_token(token: usize) -> Self {
        ClientCookie(token as *mut c_void)
    }

    pub fn as_ptr(&self) -> *mut c_void {
        self.0
    }

    pub fn token(&self) -> usize {
        self.0 as usize
    }

    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }
}

impl Default for ClientCookie {
    fn default() -> Self {
        ClientCookie::null()
    }
}

/// The completion callback attached to a table operation.  `None` means the
/// caller is waiting synchronously and nothing should be invoked.
#[derive(Clone, Default)]
pub enum OperationCallback {
    Native(NativeCallback),
    Extern(ExternCallback),
    #[default]
    None,
}

impl OperationCallback {
    pub fn native<F>(f: F) -> Self
    where
        F: Fn(DevTarget, ClientCookie) + Send + Sync + 'static,
    {
        OperationCallback::Native(Arc::new(f))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, OperationCallback::None)
    }

    pub fn is_some(&self) -> bool {
        !self.is_none()
    }

    /// Hand the completion to the client
    pub fn invoke(&self, target: DevTarget, cookie: ClientCookie) {
        match self {
            OperationCallback::Native(cb) => cb(target, cookie),
            OperationCallback::Extern(cb) => {
                cb(&target as *const DevTarget, cookie.as_ptr())
            }
            OperationCallback::None => {}
        }
    }
}

impl fmt::Debug for OperationCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationCallback::Native(_) => write!(f, "Native"),
            OperationCallback::Extern(cb) => {
                write!(f, "Extern({:p})", *cb as *const ())
            }
            OperationCallback::None => write!(f, "None"),
        }
    }
}
