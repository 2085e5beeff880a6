// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Platform capability table
//!
//! Everything that differs between GPU generations is looked up here once,
//! when the device is built. Interrupt and error dispatch never branch on a
//! device id; they branch on the flags below.

use crate::error::{Error, Result};
use crate::regs::{PVC_COR_ERR_MASK, PVC_FAT_ERR_MASK};

/// Top-level interrupt handler layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqFlavor {
    /// Single master control register (gen11/gen12 integrated).
    SingleTile,
    /// Tile master register in front of a per-tile master register.
    MultiTile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    TigerLake,
    Dg1,
    XeHpSdv,
    PonteVecchio,
}

#[derive(Debug)]
pub struct PlatformInfo {
    pub platform: Platform,
    pub name: &'static str,
    pub graphics_ver: u8,
    pub graphics_rel: u8,
    pub irq_flavor: IrqFlavor,
    pub max_tiles: usize,
    pub is_dgfx: bool,
    pub has_display: bool,
    /// Hardware error interrupts (DEV_ERR_STAT) are routed to the driver.
    pub has_error_irqs: bool,
    /// GT errors are reported through ERR_STAT_GT vector registers.
    pub has_gt_error_vectors: bool,
    /// SOC/IEH error registers exist.
    pub has_soc_errors: bool,
    /// HBM memory sparing events are reported through the GSC.
    pub has_mem_sparing: bool,
    /// SLM errors are reported per bit; otherwise the counter register is read.
    pub has_slm_error_bit: bool,
    /// GT hardware errors are logged (not only counted).
    pub logs_gt_errors: bool,
    /// ERR_STAT_GT bits defined as correctable/fatal errors; others are
    /// reported as driver errors.
    pub gt_cor_err_mask: u32,
    pub gt_fat_err_mask: u32,
    pub has_iaf: bool,
}

impl PlatformInfo {
    pub fn graphics_ver_full(&self) -> u16 {
        (self.graphics_ver as u16) << 8 | self.graphics_rel as u16
    }
}

static TIGERLAKE: PlatformInfo = PlatformInfo {
    platform: Platform::TigerLake,
    name: "tigerlake",
    graphics_ver: 12,
    graphics_rel: 0,
    irq_flavor: IrqFlavor::SingleTile,
    max_tiles: 1,
    is_dgfx: false,
    has_display: true,
    has_error_irqs: false,
    has_gt_error_vectors: false,
    has_soc_errors: false,
    has_mem_sparing: false,
    has_slm_error_bit: false,
    logs_gt_errors: false,
    gt_cor_err_mask: u32::MAX,
    gt_fat_err_mask: u32::MAX,
    has_iaf: false,
};

static DG1: PlatformInfo = PlatformInfo {
    platform: Platform::Dg1,
    name: "dg1",
    graphics_ver: 12,
    graphics_rel: 10,
    irq_flavor: IrqFlavor::MultiTile,
    max_tiles: 1,
    is_dgfx: true,
    has_display: true,
    has_error_irqs: true,
    has_gt_error_vectors: false,
    has_soc_errors: false,
    has_mem_sparing: false,
    has_slm_error_bit: false,
    logs_gt_errors: false,
    gt_cor_err_mask: u32::MAX,
    gt_fat_err_mask: u32::MAX,
    has_iaf: false,
};

static XEHPSDV: PlatformInfo = PlatformInfo {
    platform: Platform::XeHpSdv,
    name: "xehpsdv",
    graphics_ver: 12,
    graphics_rel: 50,
    irq_flavor: IrqFlavor::MultiTile,
    max_tiles: 4,
    is_dgfx: true,
    has_display: false,
    has_error_irqs: true,
    has_gt_error_vectors: true,
    has_soc_errors: false,
    has_mem_sparing: false,
    has_slm_error_bit: false,
    logs_gt_errors: false,
    gt_cor_err_mask: u32::MAX,
    gt_fat_err_mask: u32::MAX,
    has_iaf: false,
};

static PONTEVECCHIO: PlatformInfo = PlatformInfo {
    platform: Platform::PonteVecchio,
    name: "pontevecchio",
    graphics_ver: 12,
    graphics_rel: 60,
    irq_flavor: IrqFlavor::MultiTile,
    max_tiles: 2,
    is_dgfx: true,
    has_display: false,
    has_error_irqs: true,
    has_gt_error_vectors: true,
    has_soc_errors: true,
    has_mem_sparing: true,
    has_slm_error_bit: true,
    logs_gt_errors: true,
    gt_cor_err_mask: PVC_COR_ERR_MASK,
    gt_fat_err_mask: PVC_FAT_ERR_MASK,
    has_iaf: true,
};

// (first, last) PCI device id ranges
static DEVICE_IDS: &[(u16, u16, &PlatformInfo)] = &[
    (0x9a40, 0x9a7f, &TIGERLAKE),
    (0x4905, 0x4909, &DG1),
    (0x0201, 0x0210, &XEHPSDV),
    (0x0bd0, 0x0bdb, &PONTEVECCHIO),
];

impl Platform {
    pub fn info(self) -> &'static PlatformInfo {
        match self {
            Platform::TigerLake => &TIGERLAKE,
            Platform::Dg1 => &DG1,
            Platform::XeHpSdv => &XEHPSDV,
            Platform::PonteVecchio => &PONTEVECCHIO,
        }
    }

    /// Resolve a PCI device id to its platform description.
    pub fn lookup(device_id: u16) -> Result<&'static PlatformInfo> {
        DEVICE_IDS
            .iter()
            .find(|(first, last, _)| (*first..=*last).contains(&device_id))
            .map(|(_, _, info)| *info)
            .ok_or(Error::NoDevice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(Platform::lookup(0x9a49).unwrap().platform, Platform::TigerLake);
        assert_eq!(Platform::lookup(0x4905).unwrap().platform, Platform::Dg1);
        assert_eq!(Platform::lookup(0x0bd5).unwrap().platform, Platform::PonteVecchio);
        assert_eq!(Platform::lookup(0x1234).unwrap_err(), Error::NoDevice);
    }

    #[test]
    fn test_capabilities() {
        let pvc = Platform::PonteVecchio.info();
        assert_eq!(pvc.irq_flavor, IrqFlavor::MultiTile);
        assert!(pvc.has_soc_errors && pvc.has_mem_sparing && pvc.has_gt_error_vectors);
        assert_eq!(pvc.graphics_ver_full(), 0x0c3c);

        let tgl = Platform::TigerLake.info();
        assert_eq!(tgl.irq_flavor, IrqFlavor::SingleTile);
        assert!(!tgl.has_error_irqs);
    }
}
