// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Deferred work
//!
//! Interrupt handlers may not block, so anything that needs to sleep or talk
//! to user space is packaged as a [`WorkItem`] and scheduled here. Scheduling
//! is lock-free and can be done from any context.
//!
//! ```text
//!   irq handler ──schedule()──► SegQueue ──► inteld-wq-N thread ──► item.run()
//! ```
//!
//! An item scheduled while it is already pending is not queued twice; an
//! item scheduled while it is running is queued again, so every schedule is
//! followed by at least one complete run.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};

pub struct WorkItem {
    name: &'static str,
    pending: AtomicBool,
    func: Box<dyn Fn() + Send + Sync>,
}

impl WorkItem {
    pub fn new(name: &'static str, func: impl Fn() + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            name,
            pending: AtomicBool::new(false),
            func: Box::new(func),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }
}

struct Shared {
    queue: SegQueue<Arc<WorkItem>>,
    // queued + running
    outstanding: AtomicUsize,
    lock: Mutex<()>,
    wake: Condvar,
    idle: Condvar,
    shutdown: AtomicBool,
}

pub struct WorkQueue {
    name: String,
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkQueue {
    pub fn new(name: &str, threads: usize) -> Self {
        let shared = Arc::new(Shared {
            queue: SegQueue::new(),
            outstanding: AtomicUsize::new(0),
            lock: Mutex::new(()),
            wake: Condvar::new(),
            idle: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let mut workers = Vec::new();
        for id in 0..threads.max(1) {
            let shared_clone = Arc::clone(&shared);
            match thread::Builder::new()
                .name(format!("{}-{}", name, id))
                .spawn(move || worker(shared_clone))
            {
                Ok(handle) => workers.push(handle),
                Err(e) => log::error!("inteld: failed to spawn {} worker: {}", name, e),
            }
        }

        Self {
            name: name.to_string(),
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Queue `item`. Returns false if it was already pending.
    pub fn schedule(&self, item: &Arc<WorkItem>) -> bool {
        if item.pending.swap(true, Ordering::AcqRel) {
            return false;
        }

        self.shared.outstanding.fetch_add(1, Ordering::AcqRel);
        self.shared.queue.push(Arc::clone(item));
        self.shared.wake.notify_one();
        true
    }

    /// Queue a one-shot closure.
    pub fn spawn(&self, name: &'static str, func: impl Fn() + Send + Sync + 'static) {
        self.schedule(&WorkItem::new(name, func));
    }

    /// Wait until everything scheduled so far has run.
    pub fn flush(&self) {
        if self.workers.lock().is_empty() {
            // No worker could be started; run inline.
            while let Some(item) = self.shared.queue.pop() {
                run_item(&self.shared, item);
            }
            return;
        }

        let mut guard = self.shared.lock.lock();
        while self.shared.outstanding.load(Ordering::Acquire) != 0 {
            self.shared
                .idle
                .wait_for(&mut guard, Duration::from_millis(10));
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        self.flush();
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.wake.notify_all();
        for handle in self.workers.lock().drain(..) {
            if handle.join().is_err() {
                log::error!("inteld: {} worker panicked", self.name);
            }
        }
    }
}

fn run_item(shared: &Shared, item: Arc<WorkItem>) {
    // Clear before running so a schedule from inside the item is not lost.
    item.pending.store(false, Ordering::Release);
    // a panicking item must not take the worker or the outstanding count with it
    if panic::catch_unwind(AssertUnwindSafe(|| (item.func)())).is_err() {
        log::error!("inteld: work item {} panicked", item.name);
    }

    if shared.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
        let _guard = shared.lock.lock();
        shared.idle.notify_all();
    }
}

fn worker(shared: Arc<Shared>) {
    loop {
        if let Some(item) = shared.queue.pop() {
            run_item(&shared, item);
            continue;
        }

        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }

        let mut guard = shared.lock.lock();
        if shared.queue.is_empty() && !shared.shutdown.load(Ordering::Acquire) {
            shared.wake.wait_for(&mut guard, Duration::from_millis(50));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_schedule_runs() {
        let wq = WorkQueue::new("test-wq", 1);
        let hits = Arc::new(AtomicU32::new(0));
        let hits_clone = Arc::clone(&hits);
        let item = WorkItem::new("count", move || {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(wq.schedule(&item));
        wq.flush();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!item.is_pending());
    }

    #[test]
    fn test_pending_item_not_queued_twice() {
        let wq = WorkQueue::new("test-wq", 1);
        let gate = Arc::new(Mutex::new(()));
        let hits = Arc::new(AtomicU32::new(0));

        // Block the worker so the second item stays pending
        let held = gate.lock();
        let gate_clone = Arc::clone(&gate);
        wq.spawn("block", move || {
            let _g = gate_clone.lock();
        });

        let hits_clone = Arc::clone(&hits);
        let item = WorkItem::new("count", move || {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert!(wq.schedule(&item));
        assert!(!wq.schedule(&item));
        drop(held);

        wq.flush();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(wq.schedule(&item));
        wq.flush();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panicking_item_does_not_stall_flush() {
        let wq = WorkQueue::new("test-wq", 1);
        let hits = Arc::new(AtomicU32::new(0));

        wq.spawn("boom", || panic!("work item failure"));
        let hits_clone = Arc::clone(&hits);
        wq.spawn("count", move || {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        wq.flush();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // the worker is still there
        let hits_clone = Arc::clone(&hits);
        wq.spawn("count", move || {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });
        wq.flush();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_drop_drains_queue() {
        let hits = Arc::new(AtomicU32::new(0));
        {
            let wq = WorkQueue::new("test-wq", 2);
            for _ in 0..16 {
                let hits_clone = Arc::clone(&hits);
                wq.spawn("count", move || {
                    hits_clone.fetch_add(1, Ordering::SeqCst);
                });
            }
        }
        assert_eq!(hits.load(Ordering::SeqCst), 16);
    }
}
