// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Timelines
//!
//! A timeline orders the requests of one context and owns the hardware
//! status page (HWSP) slot the GPU writes completed seqnos into. Every
//! timeline has its own HWSP object so contexts never share a lock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::gem::{GemFlags, GemManager, GemObject, PAGE_SIZE};
use crate::gtt::{Ggtt, Vma};
use crate::request::Request;
use crate::ww::WwAcquireCtx;

pub struct Timeline {
    hwsp: Arc<Vma>,
    pin_count: AtomicU32,
    active_count: AtomicU32,
    seqno: AtomicU32,
    requests: Mutex<VecDeque<Arc<Request>>>,
}

impl Timeline {
    pub fn new(gem: &GemManager, ggtt: &Arc<Ggtt>) -> Result<Self> {
        let obj = gem.create_internal(PAGE_SIZE, GemFlags::GPU_ACCESS | GemFlags::CPU_ACCESS)?;

        Ok(Self {
            hwsp: Vma::new(obj, Arc::clone(ggtt)),
            pin_count: AtomicU32::new(0),
            active_count: AtomicU32::new(0),
            seqno: AtomicU32::new(0),
            requests: Mutex::new(VecDeque::new()),
        })
    }

    pub fn hwsp_object(&self) -> &Arc<GemObject> {
        self.hwsp.object()
    }

    pub fn hwsp(&self) -> &Arc<Vma> {
        &self.hwsp
    }

    pub fn is_pinned(&self) -> bool {
        self.pin_count.load(Ordering::Acquire) > 0
    }

    /// The HWSP object must be locked by `ww`.
    pub fn pin(&self, ww: &WwAcquireCtx) -> Result<()> {
        if self.pin_count.fetch_add(1, Ordering::AcqRel) > 0 {
            return Ok(());
        }

        if let Err(e) = self.hwsp.pin(ww) {
            self.pin_count.fetch_sub(1, Ordering::AcqRel);
            return Err(e);
        }
        Ok(())
    }

    pub fn pin_fast(&self) {
        let prev = self.pin_count.fetch_add(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "pin_fast on unpinned timeline");
    }

    pub fn unpin(&self) {
        let prev = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unbalanced timeline unpin");
        if prev == 1 {
            self.hwsp.unpin();
        }
    }

    /// Mark the timeline as having requests in flight on the hardware.
    pub fn enter(&self) {
        self.active_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn exit(&self) {
        let prev = self.active_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unbalanced timeline exit");
    }

    pub fn is_active(&self) -> bool {
        self.active_count.load(Ordering::Acquire) > 0
    }

    pub fn next_seqno(&self) -> u32 {
        self.seqno.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }

    pub fn last_seqno(&self) -> u32 {
        self.seqno.load(Ordering::Acquire)
    }

    pub(crate) fn add_request(&self, rq: Arc<Request>) {
        self.requests.lock().push_back(rq);
    }

    /// Oldest submitted request that has not completed yet.
    pub fn find_active_request(&self) -> Option<Arc<Request>> {
        let requests = self.requests.lock();
        let mut active = None;
        for rq in requests.iter().rev() {
            if rq.is_completed() {
                break;
            }
            if rq.is_active() {
                active = Some(Arc::clone(rq));
            }
        }
        active
    }

    /// Retire completed requests in order, stopping at the first one still
    /// outstanding. Returns the number retired.
    pub fn retire_requests(&self) -> usize {
        let mut retired = Vec::new();
        {
            let mut requests = self.requests.lock();
            while requests.front().is_some_and(|rq| rq.is_completed()) {
                if let Some(rq) = requests.pop_front() {
                    retired.push(rq);
                }
            }
        }

        // outside the list lock: retiring may release the context
        let count = retired.len();
        for rq in retired {
            rq.retire();
        }
        count
    }

    pub fn outstanding_requests(&self) -> usize {
        self.requests.lock().len()
    }
}
