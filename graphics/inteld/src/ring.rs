// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Ring buffers

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::gem::{GemFlags, GemManager, GemObject};
use crate::gtt::{Ggtt, Vma};
use crate::ww::WwAcquireCtx;

pub struct Ring {
    vma: Arc<Vma>,
    size: u32,
    head: AtomicU32,
    tail: AtomicU32,
    emit: AtomicU32,
    pin_count: AtomicU32,
}

impl Ring {
    pub fn new(gem: &GemManager, ggtt: &Arc<Ggtt>, size: u32) -> Result<Self> {
        if !size.is_power_of_two() {
            return Err(Error::InvalidArgument("ring size must be a power of two"));
        }
        let obj = gem.create_internal(size as usize, GemFlags::GPU_ACCESS)?;

        Ok(Self {
            vma: Vma::new(obj, Arc::clone(ggtt)),
            size,
            head: AtomicU32::new(0),
            tail: AtomicU32::new(0),
            emit: AtomicU32::new(0),
            pin_count: AtomicU32::new(0),
        })
    }

    pub fn object(&self) -> &Arc<GemObject> {
        self.vma.object()
    }

    pub fn vma(&self) -> &Arc<Vma> {
        &self.vma
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn is_pinned(&self) -> bool {
        self.pin_count.load(Ordering::Acquire) > 0
    }

    /// Pin the ring into the GGTT. The ring object must be locked by `ww`.
    pub fn pin(&self, ww: &WwAcquireCtx) -> Result<()> {
        if self.pin_count.fetch_add(1, Ordering::AcqRel) > 0 {
            return Ok(());
        }

        if let Err(e) = self.vma.pin(ww) {
            self.pin_count.fetch_sub(1, Ordering::AcqRel);
            return Err(e);
        }
        self.reset(self.tail.load(Ordering::Acquire));
        Ok(())
    }

    /// Extra pin on an already pinned ring.
    pub fn pin_fast(&self) {
        let prev = self.pin_count.fetch_add(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "pin_fast on unpinned ring");
    }

    pub fn unpin(&self) {
        let prev = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unbalanced ring unpin");
        if prev == 1 {
            self.vma.unpin();
        }
    }

    pub fn reset(&self, tail: u32) {
        let tail = tail & (self.size - 1);
        self.head.store(tail, Ordering::Release);
        self.tail.store(tail, Ordering::Release);
        self.emit.store(tail, Ordering::Release);
    }

    pub fn head(&self) -> u32 {
        self.head.load(Ordering::Acquire)
    }

    pub fn tail(&self) -> u32 {
        self.tail.load(Ordering::Acquire)
    }

    pub fn space(&self) -> u32 {
        let head = self.head.load(Ordering::Acquire);
        let emit = self.emit.load(Ordering::Acquire);
        // keep one cacheline free so head == tail always means empty
        (head.wrapping_sub(emit).wrapping_sub(64)) & (self.size - 1)
    }

    /// Reserve `bytes` for emission and return the offset to write at.
    pub fn begin(&self, bytes: u32) -> Result<u32> {
        if bytes % 8 != 0 || bytes > self.space() {
            return Err(Error::NoSpace);
        }
        let offset = self.emit.load(Ordering::Acquire);
        self.emit
            .store((offset + bytes) & (self.size - 1), Ordering::Release);
        Ok(offset)
    }

    /// Publish everything emitted so far.
    pub fn advance(&self) -> u32 {
        let emit = self.emit.load(Ordering::Acquire);
        self.tail.store(emit, Ordering::Release);
        emit
    }

    /// Hardware consumed up to `head`.
    pub fn retire(&self, head: u32) {
        self.head.store(head & (self.size - 1), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_space_accounting() {
        let gem = GemManager::new();
        let ggtt = Arc::new(Ggtt::new(1 << 20));
        let ring = Ring::new(&gem, &ggtt, 4096).unwrap();
        assert_eq!(ring.space(), 4096 - 64);

        let off = ring.begin(256).unwrap();
        assert_eq!(off, 0);
        assert_eq!(ring.advance(), 256);
        assert_eq!(ring.space(), 4096 - 64 - 256);

        ring.retire(256);
        assert_eq!(ring.space(), 4096 - 64);
        assert_eq!(ring.begin(4096), Err(Error::NoSpace));
    }

    #[test]
    fn test_pin_binds_vma() {
        let gem = GemManager::new();
        let ggtt = Arc::new(Ggtt::new(1 << 20));
        let ring = Ring::new(&gem, &ggtt, 4096).unwrap();

        let mut ww = WwAcquireCtx::new(None);
        ww.lock(ring.object()).unwrap();
        ring.pin(&ww).unwrap();
        ring.pin(&ww).unwrap();
        ww.fini();
        assert!(ring.vma().is_bound());

        ring.unpin();
        assert!(ring.vma().is_bound());
        ring.unpin();
        assert!(!ring.vma().is_bound());
        assert!(!ring.is_pinned());
    }
}
