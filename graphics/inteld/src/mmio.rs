// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Register access
//!
//! [`RegisterIo`] is the only way the driver touches hardware registers.
//! [`Mmio`] is the real implementation over a mapped BAR; [`SimMmio`] is a
//! software register file with the same clear-on-write semantics as the
//! interrupt and error registers, used for bring-up without hardware and by
//! the test suite.

use std::collections::HashMap;
use std::ptr::NonNull;

use crate::regs::Reg;

pub trait RegisterIo: Send + Sync {
    fn read32(&self, reg: Reg) -> u32;

    fn write32(&self, reg: Reg, val: u32);

    /// Flush posted writes.
    fn posting_read(&self, reg: Reg) {
        let _ = self.read32(reg);
    }

    fn rmw32(&self, reg: Reg, clear: u32, set: u32) -> u32 {
        let old = self.read32(reg);
        let val = (old & !clear) | set;
        if val != old {
            self.write32(reg, val);
        }
        old
    }
}

/// Memory mapped register window.
pub struct Mmio {
    base: NonNull<u8>,
    len: usize,
}

// Registers are accessed with volatile 32-bit operations only.
unsafe impl Send for Mmio {}
unsafe impl Sync for Mmio {}

impl Mmio {
    /// # Safety
    ///
    /// `base` must point to a mapping of at least `len` bytes of device
    /// memory that stays mapped for the lifetime of the returned value.
    pub unsafe fn new(base: NonNull<u8>, len: usize) -> Self {
        Self { base, len }
    }

    fn ptr(&self, reg: Reg) -> Option<*mut u32> {
        let offset = reg.offset() as usize;
        if offset % 4 != 0 || offset + 4 > self.len {
            log::error!("inteld: register {:#x} outside BAR of {:#x} bytes", offset, self.len);
            return None;
        }
        // SAFETY: aligned and inside the mapping
        Some(unsafe { self.base.as_ptr().add(offset) as *mut u32 })
    }
}

impl RegisterIo for Mmio {
    /// A register outside the window reads as all ones, like a device that
    /// stopped answering.
    fn read32(&self, reg: Reg) -> u32 {
        match self.ptr(reg) {
            Some(ptr) => unsafe { ptr.read_volatile() },
            None => u32::MAX,
        }
    }

    fn write32(&self, reg: Reg, val: u32) {
        if let Some(ptr) = self.ptr(reg) {
            unsafe { ptr.write_volatile(val) }
        }
    }
}

/// Register behaviour in [`SimMmio`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimRegKind {
    /// Plain read/write storage.
    Plain,
    /// Status register: writing 1 clears the bit.
    WriteOneToClear,
    /// Master control: `enable` bits are stored, every other bit is a
    /// latched status bit cleared by writing 1.
    Master { enable: u32 },
}

#[derive(Default)]
struct SimState {
    values: HashMap<Reg, u32>,
    kinds: HashMap<Reg, SimRegKind>,
    after_read: HashMap<Reg, Vec<u32>>,
    writes: Vec<(Reg, u32)>,
    reads: Vec<Reg>,
    unplugged: bool,
}

/// Software register file.
#[derive(Default)]
pub struct SimMmio {
    state: spin::Mutex<SimState>,
}

impl SimMmio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_kind(&self, reg: Reg, kind: SimRegKind) {
        self.state.lock().kinds.insert(reg, kind);
    }

    /// Overwrite the raw register contents, bypassing write semantics.
    pub fn set(&self, reg: Reg, val: u32) {
        self.state.lock().values.insert(reg, val);
    }

    /// Raw register contents, without recording a read.
    pub fn get(&self, reg: Reg) -> u32 {
        self.state.lock().values.get(&reg).copied().unwrap_or(0)
    }

    /// Latch status bits, as the hardware does when an event occurs.
    pub fn raise(&self, reg: Reg, bits: u32) {
        let mut state = self.state.lock();
        *state.values.entry(reg).or_insert(0) |= bits;
    }

    /// Latch `bits` right after the next read of `reg` returns, modelling
    /// an event that arrives while the handler is running.
    pub fn raise_after_read(&self, reg: Reg, bits: u32) {
        self.state
            .lock()
            .after_read
            .entry(reg)
            .or_default()
            .push(bits);
    }

    /// Every read returns all-ones from now on.
    pub fn unplug(&self) {
        self.state.lock().unplugged = true;
    }

    pub fn writes(&self) -> Vec<(Reg, u32)> {
        self.state.lock().writes.clone()
    }

    pub fn writes_to(&self, reg: Reg) -> Vec<u32> {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|(r, _)| *r == reg)
            .map(|(_, v)| *v)
            .collect()
    }

    pub fn reads_of(&self, reg: Reg) -> usize {
        self.state.lock().reads.iter().filter(|r| **r == reg).count()
    }

    pub fn clear_log(&self) {
        let mut state = self.state.lock();
        state.writes.clear();
        state.reads.clear();
    }
}

impl RegisterIo for SimMmio {
    fn read32(&self, reg: Reg) -> u32 {
        let mut state = self.state.lock();
        state.reads.push(reg);
        if state.unplugged {
            return u32::MAX;
        }

        let val = state.values.get(&reg).copied().unwrap_or(0);
        if let Some(pending) = state.after_read.remove(&reg) {
            let latched = pending.into_iter().fold(0, |acc, bits| acc | bits);
            *state.values.entry(reg).or_insert(0) |= latched;
        }
        val
    }

    fn write32(&self, reg: Reg, val: u32) {
        let mut state = self.state.lock();
        state.writes.push((reg, val));
        if state.unplugged {
            return;
        }

        let kind = state.kinds.get(&reg).copied().unwrap_or(SimRegKind::Plain);
        let cur = state.values.entry(reg).or_insert(0);
        *cur = match kind {
            SimRegKind::Plain => val,
            SimRegKind::WriteOneToClear => *cur & !val,
            SimRegKind::Master { enable } => {
                let status = *cur & !enable & !(val & !enable);
                status | (val & enable)
            }
        };
    }
}
