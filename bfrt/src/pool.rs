// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use once_cell::sync::OnceCell;
use slog::{debug, error, o, trace, warn};

use crate::callback::ClientCookie;
use crate::callback::OperationCallback;
use crate::clock::Clock;
use crate::operations::OperationKind;
use crate::state::OperationState;
use crate::state::Release;
use crate::workers::CallbackWorkers;
use aal::DevId;
use aal::DevTarget;
use aal::TableId;

/// The arguments to [`OperationStatePool::retain`]
#[derive(Clone, Debug)]
pub struct RetainRequest {
    pub callback: OperationCallback,
    pub cookie: ClientCookie,
    pub target: DevTarget,
    /// How long an outstanding request may go without completing before
    /// its slot can be taken by somebody else
    pub grace: Duration,
    /// Ceiling on slots in the pool, and on callbacks waiting to run
    pub max_items: usize,
    /// Number of callback threads to start, if the pool doesn't have them
    /// already
    pub max_threads: usize,
}

/// The token handed to the driver with an asynchronous request.  It names
/// the slot by index and by the generation it had when it was claimed, so a
/// completion that shows up after the slot has been reused is rejected rather
/// than delivered to the wrong client.
#[derive(Clone, Debug)]
pub struct OperationCookie {
    pool: Weak<OperationStatePool>,
    index: usize,
    generation: u64,
}

impl OperationCookie {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn pool(&self) -> Option<Arc<OperationStatePool>> {
        self.pool.upgrade()
    }

    /// The driver completion path: free the slot and, if it still belongs to
    /// this request, pass the completion on to the client.
    pub fn finish(self, dev_id: DevId) {
        let Some(pool) = self.pool.upgrade() else {
            // The table went away while the request was in flight.
            return;
        };
        if let Some(release) = pool.release(&self) {
            if release.target.dev_id != dev_id {
                warn!(pool.log, "completion from unexpected device";
                    "expected" => release.target.dev_id,
                    "dev_id" => dev_id);
            }
            pool.dispatch_callback(
                release.target,
                release.callback,
                release.cookie,
            );
        }
    }
}

impl aal::Completion for OperationCookie {
    fn complete(self: Box<Self>, dev_id: DevId) {
        self.finish(dev_id)
    }
}

struct PoolInner {
    items: Vec<Arc<OperationState>>,
    // Where the next scan for a free slot starts
    next_scan: usize,
}

/// The operation-state slots for one (table, operation kind) pair
pub struct OperationStatePool {
    log: slog::Logger,
    table_id: TableId,
    kind: OperationKind,
    inner: Mutex<PoolInner>,
    sequence: AtomicU32,
    // Started by the first request that needs it and kept until the pool is
    // dropped, so submission never races with teardown.
    workers: OnceCell<CallbackWorkers>,
    clock: Arc<dyn Clock>,
}

impl OperationStatePool {
    pub fn new(
        log: &slog::Logger,
        table_id: TableId,
        kind: OperationKind,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let log = log.new(o!(
            "unit" => "op_state_pool",
            "table_id" => table_id,
            "op" => kind.to_string(),
        ));
        Arc::new(OperationStatePool {
            log,
            table_id,
            kind,
            inner: Mutex::new(PoolInner {
                items: Vec::new(),
                next_scan: 0,
            }),
            sequence: AtomicU32::new(0),
            workers: OnceCell::new(),
            clock,
        })
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    fn next_sequence(&self) -> u32 {
        loop {
            let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
            let seq = seq.wrapping_add(1);
            if seq != 0 {
                return seq;
            }
        }
    }

    /// Claim a slot for a new request.  Free slots are preferred, starting
    /// from the one after the last slot handed out.  If every slot is busy, a
    /// new one is added, up to `max_items`.  Past that, the request is refused
    /// and the caller is expected to back off.
    pub fn retain(
        self: &Arc<Self>,
        request: RetainRequest,
    ) -> Option<OperationCookie> {
        let pending = self.pending_callbacks();
        if pending > request.max_items {
            trace!(self.log, "callback queue full"; "pending" => pending);
            return None;
        }

        let now = self.clock.now();
        let mut inner = self.inner.lock().unwrap();
        let count = inner.items.len();

        let mut claimed = None;
        for offset in 0..count {
            let index = (inner.next_scan + offset) % count;
            if let Some(generation) = inner.items[index].retain(
                request.callback.clone(),
                request.cookie,
                request.target,
                request.grace,
                self.next_sequence(),
                now,
            ) {
                claimed = Some((index, generation));
                break;
            }
        }

        let (index, generation) = match claimed {
            Some(c) => c,
            None if count < request.max_items => {
                let state = Arc::new(OperationState::new(&self.log, count));
                let Some(generation) = state.retain(
                    request.callback.clone(),
                    request.cookie,
                    request.target,
                    request.grace,
                    self.next_sequence(),
                    now,
                ) else {
                    error!(self.log, "unable to claim a new operation state");
                    return None;
                };
                inner.items.push(state);
                debug!(self.log, "grew pool"; "size" => inner.items.len());
                (count, generation)
            }
            None => {
                trace!(self.log, "no operation state available";
                    "size" => count);
                return None;
            }
        };
        inner.next_scan = (index + 1) % inner.items.len();
        drop(inner);

        if request.callback.is_some() && request.max_threads > 0 {
            self.start_workers(request.max_threads);
        }

        Some(OperationCookie {
            pool: Arc::downgrade(self),
            index,
            generation,
        })
    }

    fn start_workers(&self, threads: usize) {
        let name = format!("{}-{}", self.kind, self.table_id);
        let r = self.workers.get_or_try_init(|| {
            CallbackWorkers::new(&self.log, &name, threads)
        });
        if let Err(e) = r {
            // Callbacks will run on the driver's thread until a later request
            // manages to start the workers.
            error!(self.log, "failed to start callback workers: {e:?}");
        }
    }

    /// Free a slot that was claimed but will never be completed by the
    /// driver.  The next scan starts at the freed slot.  A slot that was
    /// evicted and claimed by another request since `cookie` was issued is
    /// left alone.
    pub fn reset(&self, cookie: &OperationCookie) {
        if !std::ptr::eq(cookie.pool.as_ptr(), self) {
            error!(self.log, "operation cookie belongs to another pool";
                "index" => cookie.index);
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        match inner.items.get(cookie.index) {
            Some(state) => {
                if state.reset(cookie.generation) {
                    inner.next_scan = cookie.index;
                }
            }
            None => {
                error!(self.log, "reset of invalid operation state";
                    "index" => cookie.index,
                    "size" => inner.items.len());
            }
        }
    }

    pub fn get_item(&self, index: usize) -> Option<Arc<OperationState>> {
        let inner = self.inner.lock().unwrap();
        let item = inner.items.get(index).cloned();
        if item.is_none() {
            error!(self.log, "no such operation state";
                "index" => index,
                "size" => inner.items.len());
        }
        item
    }

    /// Free the slot named by the cookie and return what its client needs to
    /// be told.  `None` if the cookie is not for this pool, or the slot no
    /// longer belongs to the cookie's request.
    pub fn release(&self, cookie: &OperationCookie) -> Option<Release> {
        if !std::ptr::eq(cookie.pool.as_ptr(), self) {
            error!(self.log, "operation cookie belongs to another pool";
                "index" => cookie.index);
            return None;
        }
        self.get_item(cookie.index)?.release(cookie.generation)
    }

    /// Deliver a completion to the client.  With callback workers running,
    /// the callback is queued and this returns at once.  Without them, the
    /// callback runs here, on the caller's thread.
    pub fn dispatch_callback(
        &self,
        target: DevTarget,
        callback: OperationCallback,
        cookie: ClientCookie,
    ) {
        let job = move || callback.invoke(target, cookie);
        match self.workers.get() {
            Some(workers) => {
                if let Err(job) = workers.submit(Box::new(job)) {
                    warn!(self.log, "callback queue closed, running inline");
                    job();
                }
            }
            None => job(),
        }
    }

    /// Number of slots, busy or not
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_use_count(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.items.iter().filter(|s| s.in_use()).count()
    }

    /// Callbacks queued or running on the worker threads
    pub fn pending_callbacks(&self) -> usize {
        self.workers.get().map(|w| w.pending()).unwrap_or(0)
    }

    pub fn has_workers(&self) -> bool {
        self.workers.get().is_some()
    }

    pub fn worker_threads(&self) -> usize {
        self.workers.get().map(|w| w.threads()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::clock::SystemClock;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    const LONG_GRACE: Duration = Duration::from_secs(3600);

    fn new_pool(clock: Arc<dyn Clock>) -> Arc<OperationStatePool> {
        OperationStatePool::new(
            &common::logging::discard(),
            7,
            OperationKind::CounterSync,
            clock,
        )
    }

    fn request(
        callback: OperationCallback,
        max_items: usize,
        max_threads: usize,
    ) -> RetainRequest {
        RetainRequest {
            callback,
            cookie: ClientCookie::null(),
            target: DevTarget::all_pipes(0),
            grace: LONG_GRACE,
            max_items,
            max_threads,
        }
    }

    fn counting_callback(count: &Arc<AtomicUsize>) -> OperationCallback {
        let count = count.clone();
        OperationCallback::native(move |_, _| {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_bounded_growth() {
        let pool = new_pool(Arc::new(SystemClock));
        let count = Arc::new(AtomicUsize::new(0));
        for i in 0..4 {
            let cookie = pool
                .retain(request(counting_callback(&count), 4, 0))
                .expect("pool filled prematurely");
            assert_eq!(cookie.index(), i);
        }
        assert!(pool.retain(request(counting_callback(&count), 4, 0)).is_none());
        assert_eq!(pool.len(), 4);
        assert_eq!(pool.in_use_count(), 4);
    }

    #[test]
    fn test_circular_reuse() {
        let pool = new_pool(Arc::new(SystemClock));
        let count = Arc::new(AtomicUsize::new(0));
        let cookies: Vec<OperationCookie> = (0..4)
            .map(|_| pool.retain(request(counting_callback(&count), 8, 0)))
            .collect::<Option<_>>()
            .unwrap();

        cookies[1].clone().finish(0);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Slot 1 is free again, and must be picked up before the pool grows
        let again = pool.retain(request(counting_callback(&count), 8, 0)).unwrap();
        assert_eq!(again.index(), 1);
        assert_eq!(pool.len(), 4);

        // Now everything is busy, so the pool grows
        let grown = pool.retain(request(counting_callback(&count), 8, 0)).unwrap();
        assert_eq!(grown.index(), 4);
    }

    #[test]
    fn test_reset_rewinds_cursor() {
        let pool = new_pool(Arc::new(SystemClock));
        let cookies: Vec<OperationCookie> = (0..3)
            .map(|_| pool.retain(request(OperationCallback::None, 3, 0)))
            .collect::<Option<_>>()
            .unwrap();
        pool.reset(&cookies[0]);
        let next = pool.retain(request(OperationCallback::None, 3, 0)).unwrap();
        assert_eq!(next.index(), 0);

        // Cookies from another pool are ignored
        let other = new_pool(Arc::new(SystemClock));
        let foreign =
            other.retain(request(OperationCallback::None, 3, 0)).unwrap();
        pool.reset(&foreign);
        assert!(other.get_item(0).unwrap().in_use());
    }

    #[test]
    fn test_stale_eviction() {
        let clock = Arc::new(ManualClock::new());
        let pool = new_pool(clock.clone());
        let count = Arc::new(AtomicUsize::new(0));
        let mut req = request(counting_callback(&count), 1, 0);
        req.grace = Duration::from_secs(5);

        let lost = pool.retain(req.clone()).unwrap();
        assert!(pool.retain(req.clone()).is_none());

        clock.advance(Duration::from_secs(6));
        let fresh = pool.retain(req.clone()).unwrap();
        assert_eq!(fresh.index(), lost.index());

        // The lost completion finally shows up, and is ignored
        lost.finish(0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        fresh.finish(0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reset_after_eviction() {
        let clock = Arc::new(ManualClock::new());
        let pool = new_pool(clock.clone());
        let count = Arc::new(AtomicUsize::new(0));
        let mut req = request(counting_callback(&count), 1, 0);
        req.grace = Duration::from_secs(5);

        let slow = pool.retain(req.clone()).unwrap();
        clock.advance(Duration::from_secs(6));
        let fresh = pool.retain(req.clone()).unwrap();
        assert_eq!(fresh.index(), slow.index());

        // The slow request's driver call fails long after its slot was
        // taken.  Cleaning up after it must not free the new claim.
        pool.reset(&slow);
        assert_eq!(pool.in_use_count(), 1);
        assert!(pool.retain(req.clone()).is_none());

        fresh.finish(0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sequence_numbers_shared() {
        let pool = new_pool(Arc::new(SystemClock));
        let a = pool.retain(request(OperationCallback::None, 4, 0)).unwrap();
        let b = pool.retain(request(OperationCallback::None, 4, 0)).unwrap();
        let seq_a = pool.get_item(a.index()).unwrap().sequence();
        let seq_b = pool.get_item(b.index()).unwrap().sequence();
        assert!(seq_b > seq_a);
    }

    #[test]
    fn test_threaded_dispatch() -> anyhow::Result<()> {
        let pool = new_pool(Arc::new(SystemClock));
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let cb = OperationCallback::native(move |target, cookie| {
            let id = std::thread::current().id();
            tx.lock().unwrap().send((target, cookie.token(), id)).unwrap();
        });
        let mut req = request(cb, 4, 2);
        req.cookie = ClientCookie::from_token(11);
        req.target = DevTarget::pipe(0, 1);

        let cookie = pool.retain(req).unwrap();
        assert!(pool.has_workers());
        assert_eq!(pool.worker_threads(), 2);

        cookie.finish(0);
        let (target, token, id) = rx.recv_timeout(Duration::from_secs(5))?;
        assert_eq!(target, DevTarget::pipe(0, 1));
        assert_eq!(token, 11);
        assert_ne!(id, std::thread::current().id());
        Ok(())
    }

    #[test]
    fn test_workers_never_shrink() {
        let pool = new_pool(Arc::new(SystemClock));
        let count = Arc::new(AtomicUsize::new(0));
        pool.retain(request(counting_callback(&count), 4, 2)).unwrap();
        assert_eq!(pool.worker_threads(), 2);

        // A later request asking for no threads keeps the ones we have
        pool.retain(request(counting_callback(&count), 4, 0)).unwrap();
        assert_eq!(pool.worker_threads(), 2);
    }

    #[test]
    fn test_synchronous_skips_workers() {
        let pool = new_pool(Arc::new(SystemClock));
        pool.retain(request(OperationCallback::None, 4, 2)).unwrap();
        assert!(!pool.has_workers());
    }

    #[test]
    fn test_foreign_cookie_rejected() {
        let a = new_pool(Arc::new(SystemClock));
        let b = new_pool(Arc::new(SystemClock));
        let count = Arc::new(AtomicUsize::new(0));
        let cookie = a.retain(request(counting_callback(&count), 4, 0)).unwrap();
        b.retain(request(counting_callback(&count), 4, 0)).unwrap();
        assert!(b.release(&cookie).is_none());
        assert!(a.release(&cookie).is_some());
    }

    #[test]
    fn test_finish_after_pool_dropped() {
        let pool = new_pool(Arc::new(SystemClock));
        let count = Arc::new(AtomicUsize::new(0));
        let cookie = pool.retain(request(counting_callback(&count), 4, 0)).unwrap();
        drop(pool);
        assert!(cookie.pool().is_none());
        cookie.finish(0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
