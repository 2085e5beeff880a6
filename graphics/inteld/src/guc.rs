// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! GuC firmware upload
//!
//! The image is copied into a GGTT-bound object and DMA'd into WOPCM; the
//! boot ROM verifies the RSA signature from the scratch registers and
//! starts the micro-kernel, which reports through `GUC_STATUS`.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::gem::{GemFlags, GemManager};
use crate::gt::Gt;
use crate::gtt::Vma;
use crate::mmio::RegisterIo;
use crate::regs::*;
use crate::ww::ww_transaction;

/// Firmware image: the code uploaded to WOPCM plus its RSA signature.
pub struct GucFirmware {
    pub image: Vec<u8>,
    pub rsa: Vec<u8>,
}

const WOPCM_OFFSET: u32 = 0x2000;
const DMA_TIMEOUT: Duration = Duration::from_millis(100);
const POLL_INTERVAL: Duration = Duration::from_micros(500);

const fn masked_bit_enable(bits: u32) -> u32 {
    (bits << 16) | bits
}

/// Decoded `GUC_STATUS`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct GucStatus(pub u32);

impl GucStatus {
    pub fn bootrom(self) -> u32 {
        field_get(GS_BOOTROM_MASK, self.0)
    }

    pub fn ukernel(self) -> u32 {
        field_get(GS_UKERNEL_MASK, self.0)
    }

    pub fn auth(self) -> u32 {
        field_get(GS_AUTH_STATUS_MASK, self.0)
    }

    fn is_ready(self) -> bool {
        self.ukernel() == GUC_LOAD_STATUS_READY
    }

    fn failure(self) -> Option<Error> {
        if self.0 & GS_BOOTROM_MASK == GS_BOOTROM_RSA_FAILED {
            return Some(Error::Firmware("RSA signature verification failed"));
        }
        if self.ukernel() == GUC_LOAD_STATUS_EXCEPTION {
            return Some(Error::Firmware("micro-kernel exception"));
        }
        None
    }
}

impl fmt::Debug for GucStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:#010x} (BootROM = {:#04x}, UKernel = {:#04x}, Auth = {:#x})",
            self.0,
            self.bootrom(),
            self.ukernel(),
            self.auth()
        )
    }
}

fn prepare_xfer(gt: &Gt) {
    let mut shim_flags = GUC_ENABLE_READ_CACHE_LOGIC
        | GUC_ENABLE_READ_CACHE_FOR_SRAM_DATA
        | GUC_ENABLE_READ_CACHE_FOR_WOPCM_DATA;

    // must be set before 12.50, must not be set after
    if gt.info().graphics_ver_full() < 0x0c32 {
        shim_flags |= GUC_DISABLE_SRAM_INIT_TO_ZEROES | GUC_ENABLE_MIA_CACHING;
    }

    gt.regs().write32(GUC_SHIM_CONTROL, shim_flags);
}

fn xfer_rsa(regs: &dyn RegisterIo, rsa: &[u8]) -> Result<()> {
    if rsa.len() > (UOS_RSA_SCRATCH_COUNT * 4) as usize {
        return Err(Error::InvalidArgument("RSA signature too large"));
    }

    for (i, chunk) in rsa.chunks(4).enumerate() {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        regs.write32(uos_rsa_scratch(i as u32), u32::from_le_bytes(word));
    }
    Ok(())
}

fn wait_for(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    loop {
        if done() {
            return true;
        }
        if start.elapsed() >= timeout {
            return false;
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn dma_xfer(regs: &dyn RegisterIo, src: u64, size: u32) -> Result<()> {
    regs.write32(DMA_COPY_SIZE, size);

    regs.write32(DMA_ADDR_0_LOW, src as u32);
    regs.write32(DMA_ADDR_0_HIGH, (src >> 32) as u32 & 0xffff);

    regs.write32(DMA_ADDR_1_LOW, WOPCM_OFFSET);
    regs.write32(DMA_ADDR_1_HIGH, 0);

    regs.write32(DMA_CTRL, masked_bit_enable(UOS_MOVE | START_DMA));

    if !wait_for(DMA_TIMEOUT, || regs.read32(DMA_CTRL) & START_DMA == 0) {
        log::error!(
            "inteld: GuC DMA transfer timed out, DMA_CTRL={:#010x}",
            regs.read32(DMA_CTRL)
        );
        return Err(Error::Timeout);
    }
    Ok(())
}

fn wait_for_ready(gt: &Gt, timeout: Duration) -> Result<()> {
    let regs = gt.regs().as_ref();
    let mut status = GucStatus(0);

    let finished = wait_for(timeout, || {
        status = GucStatus(regs.read32(GUC_STATUS));
        status.is_ready() || status.failure().is_some()
    });

    if let Some(e) = status.failure() {
        log::error!("inteld: GT{} GuC load failed: status = {:?}", gt.id(), status);
        return Err(e);
    }
    if !finished {
        log::error!(
            "inteld: GT{} GuC load timed out after {:?}: status = {:?}",
            gt.id(),
            timeout,
            status
        );
        return Err(Error::Timeout);
    }

    log::debug!(
        "inteld: GT{} GuC ready, DMA_GUC_WOPCM_OFFSET={:#x}",
        gt.id(),
        regs.read32(DMA_GUC_WOPCM_OFFSET)
    );
    Ok(())
}

/// Upload `fw` to the GuC of `gt` and wait until it reports ready.
pub fn upload(gt: &Gt, gem: &GemManager, fw: &GucFirmware, timeout: Duration) -> Result<()> {
    if fw.image.is_empty() {
        return Err(Error::InvalidArgument("empty firmware image"));
    }
    let size = u32::try_from(fw.image.len())
        .map_err(|_| Error::InvalidArgument("firmware image too large"))?;

    let obj = gem.create_internal(fw.image.len(), GemFlags::GPU_ACCESS | GemFlags::READ_ONLY)?;
    let vma = Vma::new(Arc::clone(&obj), Arc::clone(gt.ggtt()));

    ww_transaction(None, |ww| {
        ww.lock(&obj)?;
        vma.pin(ww)
    })?;

    let result = (|| -> Result<()> {
        obj.with_pages(|pages| pages[..fw.image.len()].copy_from_slice(&fw.image))
            .ok_or(Error::OutOfMemory)?;

        let offset = vma.offset().ok_or(Error::NoSpace)?;
        let regs = gt.regs().as_ref();

        prepare_xfer(gt);
        xfer_rsa(regs, &fw.rsa)?;
        dma_xfer(regs, offset, size)?;
        wait_for_ready(gt, timeout)
    })();

    vma.unpin();

    match &result {
        Ok(()) => log::info!("inteld: GT{} GuC firmware loaded ({} bytes)", gt.id(), size),
        Err(e) => log::error!("inteld: GT{} GuC firmware load failed: {}", gt.id(), e),
    }
    result
}
