// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Global GTT and VMAs
//!
//! A [`Vma`] is an object's binding into the GGTT. Pinning a VMA the first
//! time pins the object's pages and allocates a GGTT range; dropping the last
//! pin unbinds it again. The 0→1 and 1→0 transitions are serialised by the
//! VMA's node lock, every other pin is a single atomic operation.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::gem::GemObject;
use crate::ww::WwAcquireCtx;

const GTT_ALIGN: u64 = 4096;
const TRACE_DEPTH: usize = 256;

/// First-fit range allocator over the GGTT.
struct GttAllocator {
    base: u64,
    size: u64,
    // offset -> length
    free: BTreeMap<u64, u64>,
}

impl GttAllocator {
    fn new(base: u64, size: u64) -> Self {
        let mut free = BTreeMap::new();
        if size > 0 {
            free.insert(base, size);
        }
        Self { base, size, free }
    }

    fn alloc(&mut self, size: usize) -> Result<u64> {
        let aligned = (size as u64 + GTT_ALIGN - 1) & !(GTT_ALIGN - 1);
        if aligned == 0 || aligned > self.size {
            return Err(Error::NoSpace);
        }

        let (offset, len) = self
            .free
            .iter()
            .find(|(_, len)| **len >= aligned)
            .map(|(o, l)| (*o, *l))
            .ok_or(Error::NoSpace)?;

        self.free.remove(&offset);
        if len > aligned {
            self.free.insert(offset + aligned, len - aligned);
        }
        Ok(offset)
    }

    fn free(&mut self, offset: u64, size: usize) {
        let mut offset = offset;
        let mut len = (size as u64 + GTT_ALIGN - 1) & !(GTT_ALIGN - 1);
        debug_assert!(offset >= self.base && offset + len <= self.base + self.size);

        // merge with the following hole
        if let Some(next_len) = self.free.remove(&(offset + len)) {
            len += next_len;
        }
        // and the preceding one
        if let Some((&prev, &prev_len)) = self.free.range(..offset).next_back() {
            if prev + prev_len == offset {
                self.free.remove(&prev);
                offset = prev;
                len += prev_len;
            }
        }
        self.free.insert(offset, len);
    }

    fn available(&self) -> u64 {
        self.free.values().sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GttEvent {
    Bind { handle: u32, offset: u64 },
    Unbind { handle: u32, offset: u64 },
}

pub struct Ggtt {
    allocator: Mutex<GttAllocator>,
    trace: Mutex<VecDeque<GttEvent>>,
    binds: AtomicU64,
    unbinds: AtomicU64,
}

impl Ggtt {
    pub fn new(size: u64) -> Self {
        Self {
            allocator: Mutex::new(GttAllocator::new(0, size)),
            trace: Mutex::new(VecDeque::with_capacity(TRACE_DEPTH)),
            binds: AtomicU64::new(0),
            unbinds: AtomicU64::new(0),
        }
    }

    fn bind(&self, obj: &GemObject) -> Result<u64> {
        let offset = self.allocator.lock().alloc(obj.size)?;
        self.binds.fetch_add(1, Ordering::Relaxed);
        self.record(GttEvent::Bind {
            handle: obj.handle,
            offset,
        });
        Ok(offset)
    }

    fn unbind(&self, obj: &GemObject, offset: u64) {
        self.allocator.lock().free(offset, obj.size);
        self.unbinds.fetch_add(1, Ordering::Relaxed);
        self.record(GttEvent::Unbind {
            handle: obj.handle,
            offset,
        });
    }

    fn record(&self, event: GttEvent) {
        let mut trace = self.trace.lock();
        if trace.len() == TRACE_DEPTH {
            trace.pop_front();
        }
        trace.push_back(event);
    }

    /// Most recent bind/unbind events, oldest first.
    pub fn trace(&self) -> Vec<GttEvent> {
        self.trace.lock().iter().copied().collect()
    }

    pub fn bind_count(&self) -> u64 {
        self.binds.load(Ordering::Relaxed)
    }

    pub fn unbind_count(&self) -> u64 {
        self.unbinds.load(Ordering::Relaxed)
    }

    pub fn available(&self) -> u64 {
        self.allocator.lock().available()
    }
}

pub struct Vma {
    obj: Arc<GemObject>,
    ggtt: Arc<Ggtt>,
    node: Mutex<Option<u64>>,
    pin_count: AtomicU32,
    unshrinkable: AtomicU32,
}

impl Vma {
    pub fn new(obj: Arc<GemObject>, ggtt: Arc<Ggtt>) -> Arc<Self> {
        Arc::new(Self {
            obj,
            ggtt,
            node: Mutex::new(None),
            pin_count: AtomicU32::new(0),
            unshrinkable: AtomicU32::new(0),
        })
    }

    pub fn object(&self) -> &Arc<GemObject> {
        &self.obj
    }

    pub fn offset(&self) -> Option<u64> {
        *self.node.lock()
    }

    pub fn is_bound(&self) -> bool {
        self.node.lock().is_some()
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    fn pin_if_pinned(&self) -> bool {
        self.pin_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                (c > 0).then_some(c + 1)
            })
            .is_ok()
    }

    /// Pin and bind. The object must be locked by `ww`.
    pub fn pin(&self, ww: &WwAcquireCtx) -> Result<()> {
        if !ww.is_locked(self.obj.as_ref()) {
            return Err(Error::InvalidArgument("vma pinned without object lock"));
        }

        if self.pin_if_pinned() {
            return Ok(());
        }

        let mut node = self.node.lock();
        if node.is_none() {
            self.obj.get_pages()?;
            match self.ggtt.bind(&self.obj) {
                Ok(offset) => *node = Some(offset),
                Err(e) => {
                    self.obj.put_pages();
                    return Err(e);
                }
            }
        }
        self.pin_count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Take another pin on an already pinned VMA.
    pub fn pin_fast(&self) {
        let prev = self.pin_count.fetch_add(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "pin_fast on unpinned vma");
    }

    pub fn unpin(&self) {
        let prev = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unbalanced vma unpin");
        if prev != 1 {
            return;
        }

        let mut node = self.node.lock();
        if self.pin_count.load(Ordering::Acquire) != 0 {
            // repinned while we waited for the node
            return;
        }
        if let Some(offset) = node.take() {
            self.ggtt.unbind(&self.obj, offset);
            self.obj.put_pages();
        }
    }

    /// Keep the object off the shrinker's lists while globally pinned.
    pub fn make_unshrinkable(&self) {
        self.unshrinkable.fetch_add(1, Ordering::AcqRel);
    }

    pub fn make_shrinkable(&self) {
        let prev = self.unshrinkable.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0);
    }

    pub fn is_shrinkable(&self) -> bool {
        self.unshrinkable.load(Ordering::Acquire) == 0
    }
}

/// Per-device maximum number of GTs (tiles).
pub const MAX_GT: usize = 4;

/// A GPU address space shared by contexts.
pub struct AddressSpace {
    id: u32,
    active_contexts: [AtomicU32; MAX_GT],
}

impl AddressSpace {
    pub fn new(id: u32) -> Arc<Self> {
        Arc::new(Self {
            id,
            active_contexts: Default::default(),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn active_contexts(&self, gt: usize) -> u32 {
        self.active_contexts[gt].load(Ordering::Acquire)
    }

    pub(crate) fn context_activated(&self, gt: usize) {
        self.active_contexts[gt].fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn context_retired(&self, gt: usize) {
        let prev = self.active_contexts[gt].fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gem::{GemFlags, GemManager};

    #[test]
    fn test_allocator_reuses_freed_ranges() {
        let mut alloc = GttAllocator::new(0, 4 * GTT_ALIGN);
        let a = alloc.alloc(4096).unwrap();
        let b = alloc.alloc(8192).unwrap();
        let c = alloc.alloc(100).unwrap();
        assert_eq!((a, b, c), (0, 4096, 12288));
        assert_eq!(alloc.alloc(1), Err(Error::NoSpace));

        alloc.free(b, 8192);
        alloc.free(a, 4096);
        assert_eq!(alloc.available(), 3 * GTT_ALIGN);
        // coalesced into one hole
        assert_eq!(alloc.alloc(3 * 4096).unwrap(), 0);
    }

    #[test]
    fn test_vma_bind_once() {
        let gem = GemManager::new();
        let ggtt = Arc::new(Ggtt::new(1 << 20));
        let obj = gem.create(4096, GemFlags::GPU_ACCESS).unwrap();
        let vma = Vma::new(Arc::clone(&obj), Arc::clone(&ggtt));

        let mut ww = WwAcquireCtx::new(None);
        assert!(vma.pin(&ww).is_err());
        ww.lock(&obj).unwrap();
        vma.pin(&ww).unwrap();
        vma.pin(&ww).unwrap();
        vma.pin_fast();
        ww.fini();

        assert_eq!(ggtt.bind_count(), 1);
        assert!(obj.pages_pinned());

        vma.unpin();
        vma.unpin();
        assert!(vma.is_bound());
        vma.unpin();
        assert!(!vma.is_bound());
        assert!(!obj.pages_pinned());
        assert_eq!(ggtt.unbind_count(), 1);
        assert_eq!(ggtt.available(), 1 << 20);
    }

    #[test]
    fn test_bind_failure_releases_pages() {
        let gem = GemManager::new();
        let ggtt = Arc::new(Ggtt::new(4096));
        let obj = gem.create(8192, GemFlags::empty()).unwrap();
        let vma = Vma::new(Arc::clone(&obj), ggtt);

        let mut ww = WwAcquireCtx::new(None);
        ww.lock(&obj).unwrap();
        assert_eq!(vma.pin(&ww), Err(Error::NoSpace));
        assert!(!obj.pages_pinned());
        assert_eq!(vma.pin_count(), 0);
    }
}
