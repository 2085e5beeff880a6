// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Activity tracking
//!
//! Counts outstanding users of a resource. The first acquire runs an
//! activation callback and the last release runs a retire callback; both
//! transitions are serialised by an internal mutex while every other
//! acquire/release is a single atomic operation.

use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::error::Result;

#[derive(Default)]
pub struct ActiveTracker {
    count: AtomicU32,
    transition: Mutex<()>,
}

impl ActiveTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_idle(&self) -> bool {
        self.count.load(Ordering::Acquire) == 0
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    /// Take a reference, running `activate` on the idle→active edge. If it
    /// fails, the tracker stays idle.
    pub fn acquire(&self, activate: impl FnOnce() -> Result<()>) -> Result<()> {
        if self.acquire_if_busy() {
            return Ok(());
        }

        let _guard = self.transition.lock();
        if self.count.load(Ordering::Acquire) == 0 {
            activate()?;
        }
        self.count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Take a reference only if already active.
    pub fn acquire_if_busy(&self) -> bool {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                (c > 0).then_some(c + 1)
            })
            .is_ok()
    }

    /// Drop a reference, running `retire` on the active→idle edge. Whatever
    /// `retire` returns is handed back so the caller can drop it after the
    /// tracker is unlocked.
    pub fn release<R>(&self, retire: impl FnOnce() -> R) -> Option<R> {
        let fast = self.count.fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
            (c > 1).then_some(c - 1)
        });
        if fast.is_ok() {
            return None;
        }

        let _guard = self.transition.lock();
        let prev = self.count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unbalanced active release");
        if prev == 1 {
            Some(retire())
        } else {
            None
        }
    }
}
