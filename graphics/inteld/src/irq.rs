// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Top-level interrupt handling
//!
//! Every handler follows the same protocol: disable the master interrupt,
//! snapshot the master status, acknowledge and dispatch each cause, then
//! re-enable the master. Everything latched between the snapshot and the
//! re-enable raises a new interrupt, so no event is lost.
//!
//! Two layouts exist. Single-tile parts have one master control register.
//! Multi-tile parts put a tile master register in front of each tile's own
//! master control register:
//!
//! ```text
//!   DG1_MSTR_TILE_INTR ──► tile n GFX_MSTR_IRQ ─┬─ GT engines     (client)
//!                                              ├─ IAF            (client)
//!                                              ├─ ERROR_IRQ(sev) (hw_error)
//!                                              ├─ display        (client, tile 0)
//!                                              └─ GU_MISC        (client)
//! ```
//!
//! The handler never sleeps. Register writes of a tile happen under that
//! tile's IRQ spin lock, shared with reset, postinstall and error dispatch.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::gt::{hw_err, Gt};
use crate::hw_error::HardwareError;
use crate::mmio::RegisterIo;
use crate::platform::{IrqFlavor, PlatformInfo};
use crate::regs::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    /// Nothing was pending; the interrupt was not ours.
    None,
    Handled,
}

/// Consumers of the non-error interrupt sources. All methods run in
/// interrupt context with the tile's IRQ lock held and must not block.
pub trait IrqClients: Send + Sync {
    /// Engine interrupts of one tile, with the tile's master control value.
    fn gt_irq(&self, _gt: &Gt, _master_ctl: u32) {}

    fn gt_irq_reset(&self, _gt: &Gt) {}

    fn gt_irq_postinstall(&self, _gt: &Gt) {}

    fn display_irq(&self, _disp_ctl: u32) {}

    fn gu_misc_irq(&self, _iir: u32) {}

    /// Fabric interconnect interrupt of one tile.
    fn iaf_irq(&self, _gt: &Gt) {}
}

/// Clients that ignore everything.
pub struct NoIrqClients;

impl IrqClients for NoIrqClients {}

pub struct IrqController {
    info: &'static PlatformInfo,
    gts: Vec<Arc<Gt>>,
    clients: Arc<dyn IrqClients>,
    enabled: AtomicBool,
    installed: AtomicBool,
    in_flight: AtomicUsize,
    count: AtomicU64,
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

fn gen11_master_intr_disable(regs: &dyn RegisterIo) -> u32 {
    regs.write32(GEN11_GFX_MSTR_IRQ, 0);
    // now all interrupts are held off, snapshot what is pending
    regs.read32(GEN11_GFX_MSTR_IRQ)
}

fn gen11_master_intr_enable(regs: &dyn RegisterIo) {
    regs.write32(GEN11_GFX_MSTR_IRQ, GEN11_MASTER_IRQ);
}

fn dg1_master_intr_disable(regs: &dyn RegisterIo) -> u32 {
    regs.write32(DG1_MSTR_TILE_INTR, 0);
    let val = regs.read32(DG1_MSTR_TILE_INTR);
    if val != 0 {
        regs.write32(DG1_MSTR_TILE_INTR, val);
    }
    val
}

fn dg1_master_intr_enable(regs: &dyn RegisterIo) {
    regs.write32(DG1_MSTR_TILE_INTR, DG1_MSTR_IRQ);
}

fn gen11_gu_misc_irq_ack(regs: &dyn RegisterIo, master_ctl: u32) -> u32 {
    if master_ctl & GEN11_GU_MISC_IRQ == 0 {
        return 0;
    }
    let iir = regs.read32(GEN11_GU_MISC_IIR);
    if iir != 0 && iir != u32::MAX {
        regs.write32(GEN11_GU_MISC_IIR, iir);
    }
    iir
}

fn gu_misc_reset(regs: &dyn RegisterIo) {
    regs.write32(GEN11_GU_MISC_IMR, u32::MAX);
    regs.posting_read(GEN11_GU_MISC_IMR);
    regs.write32(GEN11_GU_MISC_IER, 0);
    // IIR can queue up two events
    regs.write32(GEN11_GU_MISC_IIR, u32::MAX);
    regs.posting_read(GEN11_GU_MISC_IIR);
    regs.write32(GEN11_GU_MISC_IIR, u32::MAX);
    regs.posting_read(GEN11_GU_MISC_IIR);
}

fn gu_misc_init(regs: &dyn RegisterIo) {
    let iir = regs.read32(GEN11_GU_MISC_IIR);
    if iir != 0 {
        log::warn!("inteld: GU_MISC_IIR not clear at init: {:#010x}", iir);
        regs.write32(GEN11_GU_MISC_IIR, u32::MAX);
        regs.write32(GEN11_GU_MISC_IIR, u32::MAX);
    }
    regs.write32(GEN11_GU_MISC_IER, GEN11_GU_MISC_GSE);
    regs.write32(GEN11_GU_MISC_IMR, !GEN11_GU_MISC_GSE);
    regs.posting_read(GEN11_GU_MISC_IMR);
}

impl IrqController {
    pub(crate) fn new(
        info: &'static PlatformInfo,
        gts: Vec<Arc<Gt>>,
        clients: Arc<dyn IrqClients>,
    ) -> Self {
        Self {
            info,
            gts,
            clients,
            enabled: AtomicBool::new(false),
            installed: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn irqs_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn is_installed(&self) -> bool {
        self.installed.load(Ordering::Acquire)
    }

    /// Interrupts serviced with every tile's dispatch completed.
    pub fn irq_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn root(&self) -> &Arc<Gt> {
        // the device is never built without tile 0
        &self.gts[0]
    }

    /// Service one interrupt.
    pub fn handle(&self) -> IrqReturn {
        if !self.irqs_enabled() {
            return IrqReturn::None;
        }

        let _in_flight = InFlight::enter(&self.in_flight);
        match self.info.irq_flavor {
            IrqFlavor::SingleTile => self.gen11_irq_handler(),
            IrqFlavor::MultiTile => self.dg1_irq_handler(),
        }
    }

    fn display_irq_handler(&self, regs: &dyn RegisterIo) {
        let disp_ctl = regs.read32(GEN11_DISPLAY_INT_CTL);
        regs.write32(GEN11_DISPLAY_INT_CTL, 0);
        self.clients.display_irq(disp_ctl);
        regs.write32(GEN11_DISPLAY_INT_CTL, GEN11_DISPLAY_IRQ_ENABLE);
    }

    fn gu_misc_irq_handler(&self, iir: u32) {
        if iir != 0 && iir != u32::MAX {
            self.clients.gu_misc_irq(iir);
        }
    }

    fn gen11_irq_handler(&self) -> IrqReturn {
        let gt = self.root();
        let regs = gt.regs().as_ref();
        let locked = gt.irq_lock.lock();

        let master_ctl = gen11_master_intr_disable(regs);
        if master_ctl == 0 {
            gen11_master_intr_enable(regs);
            return IrqReturn::None;
        }
        if master_ctl == u32::MAX {
            log::debug!("inteld: master control reads all ones, device gone");
            gen11_master_intr_enable(regs);
            return IrqReturn::Handled;
        }

        regs.write32(GEN11_GFX_MSTR_IRQ, master_ctl);
        self.clients.gt_irq(gt, master_ctl);

        if master_ctl & GEN11_DISPLAY_IRQ != 0 {
            self.display_irq_handler(regs);
        }

        let gu_misc_iir = gen11_gu_misc_irq_ack(regs, master_ctl);

        gen11_master_intr_enable(regs);
        drop(locked);

        self.gu_misc_irq_handler(gu_misc_iir);

        self.count.fetch_add(1, Ordering::Relaxed);
        IrqReturn::Handled
    }

    fn dg1_irq_handler(&self) -> IrqReturn {
        let root = self.root();
        let root_regs = root.regs().as_ref();

        let master_tile_ctl = {
            let _locked = root.irq_lock.lock();
            let val = dg1_master_intr_disable(root_regs);
            if val == 0 {
                dg1_master_intr_enable(root_regs);
            }
            val
        };
        if master_tile_ctl == 0 {
            return IrqReturn::None;
        }

        let mut gu_misc_iir = 0;
        let mut aborted = false;

        for gt in &self.gts {
            if master_tile_ctl & dg1_mstr_tile(gt.id() as u32) == 0 {
                continue;
            }
            let regs = gt.regs().as_ref();
            let mut locked = gt.irq_lock.lock();

            let master_ctl = regs.read32(GEN11_GFX_MSTR_IRQ);
            // the tile is gone or in PCIe containment; leave the master off
            if master_ctl == u32::MAX {
                log::debug!("inteld: GT{} master control reads all ones", gt.id());
                return IrqReturn::Handled;
            }
            regs.write32(GEN11_GFX_MSTR_IRQ, master_ctl);

            self.clients.gt_irq(gt, master_ctl);

            if master_ctl & GEN12_IAF_IRQ != 0 {
                self.clients.iaf_irq(gt);
            }

            if self.info.has_error_irqs
                && gt.hw_error_irq_handler(&mut locked, master_ctl).is_err()
            {
                aborted = true;
                continue;
            }

            if gt.id() == 0 && master_ctl & GEN11_DISPLAY_IRQ != 0 {
                self.display_irq_handler(regs);
            }

            gu_misc_iir |= gen11_gu_misc_irq_ack(regs, master_ctl);
        }

        {
            let _locked = root.irq_lock.lock();
            dg1_master_intr_enable(root_regs);
        }

        self.gu_misc_irq_handler(gu_misc_iir);

        if !aborted {
            self.count.fetch_add(1, Ordering::Relaxed);
        }
        IrqReturn::Handled
    }

    /// Mask and clear every interrupt source.
    pub fn reset(&self) {
        let root = self.root();
        let root_regs = root.regs().as_ref();
        match self.info.irq_flavor {
            IrqFlavor::SingleTile => {
                let _locked = root.irq_lock.lock();
                gen11_master_intr_disable(root_regs);
                self.clients.gt_irq_reset(root);
                gu_misc_reset(root_regs);
            }
            IrqFlavor::MultiTile => {
                {
                    let _locked = root.irq_lock.lock();
                    dg1_master_intr_disable(root_regs);
                }
                for gt in &self.gts {
                    let _locked = gt.irq_lock.lock();
                    self.clients.gt_irq_reset(gt);
                    gu_misc_reset(gt.regs().as_ref());
                }
            }
        }
    }

    /// Unmask interrupt sources and enable the master.
    pub fn postinstall(&self) {
        let root = self.root();
        let root_regs = root.regs().as_ref();
        match self.info.irq_flavor {
            IrqFlavor::SingleTile => {
                let _locked = root.irq_lock.lock();
                self.clients.gt_irq_postinstall(root);
                gu_misc_init(root_regs);
                gen11_master_intr_enable(root_regs);
                root_regs.posting_read(GEN11_GFX_MSTR_IRQ);
            }
            IrqFlavor::MultiTile => {
                for gt in &self.gts {
                    let regs = gt.regs().as_ref();
                    let _locked = gt.irq_lock.lock();
                    self.clients.gt_irq_postinstall(gt);
                    if self.info.has_soc_errors {
                        gt.clear_all_soc_errors();
                    }
                    gu_misc_init(regs);
                    regs.write32(GEN11_GFX_MSTR_IRQ, genmask(30, 0));
                }

                let _locked = root.irq_lock.lock();
                if self.info.has_display {
                    root_regs.write32(GEN11_DISPLAY_INT_CTL, GEN11_DISPLAY_IRQ_ENABLE);
                }

                root_regs.write32(DG1_MSTR_TILE_INTR, genmask(3, 0));
                dg1_master_intr_enable(root_regs);
                root_regs.posting_read(DG1_MSTR_TILE_INTR);
            }
        }
    }

    /// Service hardware errors latched before the driver was loaded.
    pub fn process_hw_errors(&self) {
        if !self.info.has_error_irqs {
            return;
        }

        let root_regs = self.root().regs().as_ref();
        let pcieerr = root_regs.read32(DEV_PCIEERR_STATUS);
        if pcieerr == u32::MAX {
            log::warn!("inteld: DEV_PCIEERR_STATUS reads all ones, skipping error scan");
            return;
        }

        for gt in &self.gts {
            let mut locked = gt.irq_lock.lock();

            if pcieerr & dev_pcieerr_is_fatal(gt.id() as u32) != 0 {
                hw_err!(gt, "DEV_PCIEERR_STATUS fatal error:{:#010x}", pcieerr);
                if let Err(e) = gt.hw_error_source_handler(&mut locked, HardwareError::Fatal) {
                    log::warn!("inteld: GT{} fatal error scan aborted: {}", gt.id(), e);
                    continue;
                }
            }

            let regs = gt.regs().as_ref();
            let master_ctl = regs.read32(GEN11_GFX_MSTR_IRQ);
            if master_ctl == u32::MAX {
                continue;
            }
            regs.write32(GEN11_GFX_MSTR_IRQ, master_ctl);
            if let Err(e) = gt.hw_error_irq_handler(&mut locked, master_ctl) {
                log::warn!("inteld: GT{} error scan aborted: {}", gt.id(), e);
            }
        }

        if pcieerr != 0 {
            root_regs.write32(DEV_PCIEERR_STATUS, pcieerr);
        }
    }

    pub fn install(&self) {
        if self.info.is_dgfx {
            self.process_hw_errors();
        }

        self.enabled.store(true, Ordering::Release);
        self.installed.store(true, Ordering::Release);

        self.reset();
        self.postinstall();
        log::info!("inteld: interrupts installed ({:?})", self.info.irq_flavor);
    }

    pub fn uninstall(&self) {
        if !self.installed.swap(false, Ordering::AcqRel) {
            return;
        }

        self.reset();
        self.enabled.store(false, Ordering::Release);
        self.synchronize_irq();
    }

    pub fn runtime_pm_disable_interrupts(&self) {
        self.reset();
        self.enabled.store(false, Ordering::Release);
        self.synchronize_irq();
    }

    pub fn runtime_pm_enable_interrupts(&self) {
        self.enabled.store(true, Ordering::Release);
        self.reset();
        self.postinstall();
    }

    /// Wait for handlers already running on other threads to return.
    pub fn synchronize_irq(&self) {
        while self.in_flight.load(Ordering::Acquire) != 0 {
            std::thread::yield_now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriverConfig;
    use crate::gem::GemManager;
    use crate::gt::GtDesc;
    use crate::mmio::{SimMmio, SimRegKind};
    use crate::platform::Platform;
    use crate::uevent::LogUeventSink;
    use crate::workqueue::WorkQueue;
    use std::sync::atomic::AtomicU32;

    #[derive(Default)]
    struct Recorder {
        gt: AtomicU32,
        display: AtomicU32,
        gu_misc: AtomicU32,
    }

    impl IrqClients for Recorder {
        fn gt_irq(&self, _gt: &Gt, _master_ctl: u32) {
            self.gt.fetch_add(1, Ordering::Relaxed);
        }

        fn display_irq(&self, _disp_ctl: u32) {
            self.display.fetch_add(1, Ordering::Relaxed);
        }

        fn gu_misc_irq(&self, iir: u32) {
            self.gu_misc.store(iir, Ordering::Relaxed);
        }
    }

    fn single_tile(clients: Arc<Recorder>) -> (IrqController, Arc<SimMmio>) {
        let sim = Arc::new(SimMmio::new());
        sim.set_kind(GEN11_GFX_MSTR_IRQ, SimRegKind::Master { enable: GEN11_MASTER_IRQ });
        sim.set_kind(GEN11_GU_MISC_IIR, SimRegKind::WriteOneToClear);

        let info = Platform::TigerLake.info();
        let gt = Gt::new(
            GtDesc {
                id: 0,
                info,
                regs: Arc::clone(&sim) as Arc<dyn RegisterIo>,
                gem: Arc::new(GemManager::new()),
                wq: Arc::new(WorkQueue::new("test", 1)),
                uevent: Arc::new(LogUeventSink),
            },
            &DriverConfig::default(),
        );
        (IrqController::new(info, vec![gt], clients), sim)
    }

    #[test]
    fn test_disabled_is_not_ours() {
        let (irq, sim) = single_tile(Arc::new(Recorder::default()));
        sim.raise(GEN11_GFX_MSTR_IRQ, gen11_gt_dw_irq(0));
        assert_eq!(irq.handle(), IrqReturn::None);
        assert!(sim.writes().is_empty());
    }

    #[test]
    fn test_single_tile_dispatch() {
        let clients = Arc::new(Recorder::default());
        let (irq, sim) = single_tile(Arc::clone(&clients));
        irq.install();
        assert_eq!(sim.get(GEN11_GU_MISC_IER), GEN11_GU_MISC_GSE);

        assert_eq!(irq.handle(), IrqReturn::None);

        sim.raise(
            GEN11_GFX_MSTR_IRQ,
            gen11_gt_dw_irq(0) | GEN11_DISPLAY_IRQ | GEN11_GU_MISC_IRQ,
        );
        sim.raise(GEN11_GU_MISC_IIR, GEN11_GU_MISC_GSE);

        assert_eq!(irq.handle(), IrqReturn::Handled);
        assert_eq!(clients.gt.load(Ordering::Relaxed), 1);
        assert_eq!(clients.display.load(Ordering::Relaxed), 1);
        assert_eq!(clients.gu_misc.load(Ordering::Relaxed), GEN11_GU_MISC_GSE);
        assert_eq!(sim.get(GEN11_GU_MISC_IIR), 0);
        assert_eq!(sim.get(GEN11_GFX_MSTR_IRQ), GEN11_MASTER_IRQ);
        assert_eq!(irq.irq_count(), 1);
    }

    #[test]
    fn test_uninstall_masks() {
        let (irq, sim) = single_tile(Arc::new(Recorder::default()));
        irq.install();
        irq.uninstall();
        assert!(!irq.irqs_enabled());
        assert_eq!(sim.get(GEN11_GU_MISC_IMR), u32::MAX);
        assert_eq!(sim.get(GEN11_GFX_MSTR_IRQ), 0);

        // second uninstall is a no-op
        sim.clear_log();
        irq.uninstall();
        assert!(sim.writes().is_empty());
    }
}
