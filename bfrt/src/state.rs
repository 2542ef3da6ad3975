// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! A single reusable slot tracking one outstanding table operation.

use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use slog::{debug, trace, warn};

use crate::callback::ClientCookie;
use crate::callback::OperationCallback;
use aal::DevTarget;

/// Everything needed to hand a finished operation back to its client
#[derive(Debug)]
pub struct Release {
    pub callback: OperationCallback,
    pub cookie: ClientCookie,
    pub target: DevTarget,
    pub sequence: u32,
}

#[derive(Debug, Default)]
struct SlotInner {
    callback: OperationCallback,
    cookie: ClientCookie,
    target: DevTarget,
    created_at: Option<Instant>,
    sequence: u32,
    in_use: bool,
    // Bumped every time the slot is claimed.  A completion carrying an older
    // generation belongs to a request whose slot has since been reused.
    generation: u64,
}

impl SlotInner {
    fn clear(&mut self) {
        self.callback = OperationCallback::None;
        self.cookie = ClientCookie::null();
        self.target = DevTarget::default();
        self.created_at = None;
        self.in_use = false;
    }
}

// Sequence numbers wrap to 1, so that 0 can mean "pick one yourself"
fn next_sequence(seq: u32) -> u32 {
    match seq.wrapping_add(1) {
        0 => 1,
        x => x,
    }
}

/// One slot of an [`OperationStatePool`](crate::pool::OperationStatePool).
/// Slots are created by the pool, reused for its whole life, and dropped
/// with it.
pub struct OperationState {
    log: slog::Logger,
    inner: Mutex<SlotInner>,
}

impl OperationState {
    pub fn new(log: &slog::Logger, index: usize) -> Self {
        OperationState {
            log: log.new(slog::o!("slot" => index)),
            inner: Mutex::new(SlotInner::default()),
        }
    }

    /// Try to claim the slot for a new request.  A free slot is always
    /// claimed.  A slot held by a synchronous caller is never claimed.  A slot
    /// held by an asynchronous request is claimed only once it has been
    /// outstanding for longer than `grace`, at which point its completion is
    /// presumed lost.
    ///
    /// On success, returns the generation the driver's completion must carry.
    pub fn retain(
        &self,
        callback: OperationCallback,
        cookie: ClientCookie,
        target: DevTarget,
        grace: Duration,
        sequence_hint: u32,
        now: Instant,
    ) -> Option<u64> {
        let mut inner = self.inner.lock().unwrap();

        if inner.in_use {
            if inner.callback.is_none() {
                debug!(self.log, "synchronous operation still active";
                    "seq" => inner.sequence);
                return None;
            }
            let created_at = inner.created_at.unwrap_or(now);
            if created_at > now {
                warn!(self.log, "operation state created in the future";
                    "seq" => inner.sequence);
                return None;
            }
            let age = now - created_at;
            if age <= grace {
                trace!(self.log, "operation state within grace period";
                    "seq" => inner.sequence,
                    "age_ms" => age.as_millis() as u64);
                return None;
            }
            warn!(self.log, "overriding stale operation state";
                "seq" => inner.sequence,
                "target" => %inner.target,
                "age_secs" => age.as_secs());
        }

        inner.callback = callback;
        inner.cookie = cookie;
        inner.target = target;
        inner.created_at = Some(now);
        inner.in_use = true;
        inner.sequence = match sequence_hint {
            0 => next_sequence(inner.sequence),
            x => x,
        };
        inner.generation = inner.generation.wrapping_add(1);
        Some(inner.generation)
    }

    /// Return the slot to the pool without firing anything.  Used when the
    /// request never made it to the driver, or when nobody is waiting on a
    /// callback.  Only the claim named by `generation` is dropped: if the
    /// slot has since been evicted and claimed again, it is left alone.
    pub fn reset(&self, generation: u64) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if !inner.in_use || inner.generation != generation {
            debug!(self.log, "reset of a reclaimed operation state";
                "generation" => generation,
                "current" => inner.generation);
            return false;
        }
        trace!(self.log, "reset"; "seq" => inner.sequence);
        inner.clear();
        true
    }

    /// Take the callback, cookie and target out of the slot and free it.
    /// This is the only hand-off point between a driver completion and the
    /// client, so it succeeds at most once per claim.  Completions for free,
    /// synchronous, or since-reused slots get `None`.
    pub fn release(&self, generation: u64) -> Option<Release> {
        let mut inner = self.inner.lock().unwrap();

        if !inner.in_use {
            warn!(self.log, "completion for an idle operation state";
                "generation" => generation);
            return None;
        }
        if inner.generation != generation {
            warn!(self.log, "completion for a reused operation state";
                "generation" => generation,
                "current" => inner.generation);
            return None;
        }
        if inner.callback.is_none() {
            warn!(self.log, "completion for a synchronous operation state";
                "seq" => inner.sequence);
            return None;
        }

        let release = Release {
            callback: std::mem::take(&mut inner.callback),
            cookie: inner.cookie,
            target: inner.target,
            sequence: inner.sequence,
        };
        inner.clear();
        Some(release)
    }

    pub fn in_use(&self) -> bool {
        self.inner.lock().unwrap().in_use
    }

    pub fn sequence(&self) -> u32 {
        self.inner.lock().unwrap().sequence
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock().unwrap().generation
    }

    pub fn target(&self) -> Option<DevTarget> {
        let inner = self.inner.lock().unwrap();
        inner.in_use.then_some(inner.target)
    }
}
