// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! GEM (Graphics Execution Manager) objects
//!
//! Only what context pinning needs: a reservation lock taking part in
//! wound-wait transactions, lazily allocated backing pages with a pin count,
//! and invalidation of unpinned backing store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bitflags::bitflags;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::ww::{WwLockable, WwMutex};

pub const PAGE_SIZE: usize = 4096;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GemFlags: u32 {
        const STOLEN = 1 << 0;
        const CPU_ACCESS = 1 << 1;
        const GPU_ACCESS = 1 << 2;
        const SHAREABLE = 1 << 3;
        const PURGEABLE = 1 << 4;
        /// Read-only to the GPU (ring and hwsp objects are not)
        const READ_ONLY = 1 << 5;
    }
}

struct Pages {
    backing: Option<Vec<u8>>,
    pin_count: u32,
}

/// GEM object
pub struct GemObject {
    pub handle: u32,
    pub size: usize,
    pub flags: GemFlags,
    resv: WwMutex,
    pages: Mutex<Pages>,
}

impl WwLockable for GemObject {
    fn ww_mutex(&self) -> &WwMutex {
        &self.resv
    }
}

impl GemObject {
    fn new(handle: u32, size: usize, flags: GemFlags) -> Self {
        Self {
            handle,
            size,
            flags,
            resv: WwMutex::new(),
            pages: Mutex::new(Pages {
                backing: None,
                pin_count: 0,
            }),
        }
    }

    /// Pin the backing pages, allocating them on first use.
    pub fn get_pages(&self) -> Result<()> {
        let mut pages = self.pages.lock();
        if pages.backing.is_none() {
            let mut backing = Vec::new();
            backing
                .try_reserve_exact(self.size)
                .map_err(|_| Error::OutOfMemory)?;
            backing.resize(self.size, 0);
            pages.backing = Some(backing);
        }
        pages.pin_count += 1;
        Ok(())
    }

    pub fn put_pages(&self) {
        let mut pages = self.pages.lock();
        if pages.pin_count == 0 {
            log::error!("inteld: unbalanced put_pages on object {}", self.handle);
            return;
        }
        pages.pin_count -= 1;
    }

    pub fn has_pages(&self) -> bool {
        self.pages.lock().backing.is_some()
    }

    pub fn pages_pinned(&self) -> bool {
        self.pages.lock().pin_count > 0
    }

    /// Release the backing store, as on an MMU notifier invalidation.
    /// Fails with `Busy` while the object is locked or its pages pinned.
    pub fn invalidate(&self) -> Result<()> {
        let _resv = self.resv.try_lock()?;
        let mut pages = self.pages.lock();
        if pages.pin_count > 0 {
            return Err(Error::Busy);
        }
        pages.backing = None;
        Ok(())
    }

    /// Run `f` over the CPU view of the backing store.
    pub fn with_pages<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
        let mut pages = self.pages.lock();
        pages.backing.as_deref_mut().map(f)
    }
}

pub struct GemManager {
    objects: Mutex<HashMap<u32, Arc<GemObject>>>,
    next_handle: AtomicU32,
}

impl Default for GemManager {
    fn default() -> Self {
        Self::new()
    }
}

impl GemManager {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            next_handle: AtomicU32::new(1),
        }
    }

    /// Create an object, rounded up to whole pages.
    pub fn create(&self, size: usize, flags: GemFlags) -> Result<Arc<GemObject>> {
        let obj = self.create_internal(size, flags)?;
        self.objects.lock().insert(obj.handle, Arc::clone(&obj));
        Ok(obj)
    }

    /// Create a driver-owned object that never gets a userspace handle
    /// entry, so it is freed with its last reference.
    pub fn create_internal(&self, size: usize, flags: GemFlags) -> Result<Arc<GemObject>> {
        if size == 0 {
            return Err(Error::InvalidArgument("zero sized object"));
        }
        let size = size
            .checked_add(PAGE_SIZE - 1)
            .ok_or(Error::InvalidArgument("object too large"))?
            & !(PAGE_SIZE - 1);

        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(GemObject::new(handle, size, flags)))
    }

    pub fn alloc(&self, size: usize, flags: GemFlags) -> Result<u32> {
        self.create(size, flags).map(|obj| obj.handle)
    }

    /// Drop the handle; the object lives on while referenced.
    pub fn free(&self, handle: u32) -> Result<()> {
        self.objects
            .lock()
            .remove(&handle)
            .map(|_| ())
            .ok_or(Error::InvalidArgument("invalid handle"))
    }

    pub fn get(&self, handle: u32) -> Option<Arc<GemObject>> {
        self.objects.lock().get(&handle).cloned()
    }

    pub fn count(&self) -> usize {
        self.objects.lock().len()
    }
}
