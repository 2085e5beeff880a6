// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Requests
//!
//! A request keeps its context active (not pinned) from creation until it
//! is retired, so the context's ring, timeline and image stay bound while
//! the hardware may still reference them.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::context::{ContextFlags, IntelContext};
use crate::workqueue::WorkQueue;

const PENDING: u8 = 0;
const ACTIVE: u8 = 1;
const COMPLETED: u8 = 2;
const RETIRED: u8 = 3;

pub struct Request {
    seqno: u32,
    context: Arc<IntelContext>,
    state: AtomicU8,
    preemptible: bool,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("ctx", &self.context.id())
            .field("seqno", &self.seqno)
            .field("state", &self.state.load(Ordering::Relaxed))
            .field("preemptible", &self.preemptible)
            .finish()
    }
}

impl Request {
    pub(crate) fn new(context: Arc<IntelContext>, seqno: u32) -> Arc<Self> {
        let preemptible = !context.flags().contains(ContextFlags::NOPREEMPT);
        Arc::new(Self {
            seqno,
            context,
            state: AtomicU8::new(PENDING),
            preemptible,
        })
    }

    pub fn seqno(&self) -> u32 {
        self.seqno
    }

    pub fn context(&self) -> &Arc<IntelContext> {
        &self.context
    }

    /// Fixed at creation from the context's NOPREEMPT flag.
    pub fn is_preemptible(&self) -> bool {
        self.preemptible
    }

    /// Handed to the hardware.
    pub fn submit(&self) -> bool {
        self.state
            .compare_exchange(PENDING, ACTIVE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Breadcrumb seen; safe to call from interrupt context.
    pub fn signal(&self) {
        let _ = self.state.fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
            (s < COMPLETED).then_some(COMPLETED)
        });
    }

    pub fn is_active(&self) -> bool {
        self.state.load(Ordering::Acquire) == ACTIVE
    }

    pub fn is_completed(&self) -> bool {
        self.state.load(Ordering::Acquire) >= COMPLETED
    }

    pub fn is_retired(&self) -> bool {
        self.state.load(Ordering::Acquire) == RETIRED
    }

    /// Drop the request's hold on its context. Only completed requests are
    /// retired; returns whether this call retired it.
    pub(crate) fn retire(&self) -> bool {
        if self
            .state
            .compare_exchange(COMPLETED, RETIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        self.context.exit();
        self.context.active_release();
        true
    }

    /// Retire this request's timeline from a worker thread.
    pub fn retire_async(self: &Arc<Self>, wq: &WorkQueue) {
        let context = Arc::clone(&self.context);
        wq.spawn("request-retire", move || {
            context.retire_requests();
        });
    }
}
