// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use slog::{debug, error, o};

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed set of threads that run client callbacks, so the driver thread
/// that delivered a completion can go straight back to servicing the
/// hardware.
///
/// The set is never resized.  It lives exactly as long as its owner: dropping
/// it closes the queue and joins the threads once they drain it.  Callbacks
/// are not isolated from one another.  A panicking callback takes the
/// process down, as does any other panic under the workspace's
/// `panic = "abort"` profiles.
pub(crate) struct CallbackWorkers {
    log: slog::Logger,
    tx: Option<Sender<Job>>,
    // Jobs queued or running
    pending: Arc<AtomicUsize>,
    threads: Vec<thread::JoinHandle<()>>,
}

fn worker_loop(log: slog::Logger, rx: Receiver<Job>, pending: Arc<AtomicUsize>) {
    while let Ok(job) = rx.recv() {
        job();
        pending.fetch_sub(1, Ordering::SeqCst);
    }
    debug!(log, "callback queue closed");
}

impl CallbackWorkers {
    pub fn new(
        log: &slog::Logger,
        name: &str,
        threads: usize,
    ) -> std::io::Result<Self> {
        let log = log.new(o!("unit" => "callback_workers"));
        let (tx, rx) = crossbeam_channel::unbounded::<Job>();
        let pending = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::with_capacity(threads);
        for i in 0..threads {
            let rx = rx.clone();
            let pending = pending.clone();
            let log = log.new(o!("worker" => i));
            let hdl = thread::Builder::new()
                .name(format!("{name}-cb{i}"))
                .spawn(move || worker_loop(log, rx, pending))?;
            handles.push(hdl);
        }
        debug!(log, "started callback workers"; "threads" => threads);

        Ok(CallbackWorkers {
            log,
            tx: Some(tx),
            pending,
            threads: handles,
        })
    }

    /// Queue a job.  The job is handed back if the queue has been closed.
    pub fn submit(&self, job: Job) -> Result<(), Job> {
        let Some(tx) = &self.tx else {
            return Err(job);
        };
        self.pending.fetch_add(1, Ordering::SeqCst);
        tx.send(job).map_err(|e| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            e.into_inner()
        })
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn threads(&self) -> usize {
        self.threads.len()
    }
}

impl Drop for CallbackWorkers {
    fn drop(&mut self) {
        self.tx.take();
        let me = thread::current().id();
        for hdl in self.threads.drain(..) {
            // A callback may drop the last reference to our owner, in which
            // case we are running on one of the workers and can't wait for it.
            if hdl.thread().id() == me {
                continue;
            }
            if hdl.join().is_err() {
                error!(self.log, "callback worker exited abnormally");
            }
        }
    }
}
