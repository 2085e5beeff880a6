// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! MMIO register map
//!
//! Offsets are relative to the tile's register BAR. Registers whose name
//! takes a severity are indexed by [`HardwareError`].

use crate::hw_error::HardwareError;

/// A 32-bit MMIO register offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Reg(pub u32);

impl Reg {
    pub const fn offset(self) -> u32 {
        self.0
    }
}

pub const fn bit(n: u32) -> u32 {
    1 << n
}

pub const fn genmask(high: u32, low: u32) -> u32 {
    (u32::MAX >> (31 - high)) & (u32::MAX << low)
}

/// Extract a field described by a contiguous mask.
pub const fn field_get(mask: u32, val: u32) -> u32 {
    (val & mask) >> mask.trailing_zeros()
}

// Master interrupt control

pub const GEN11_GFX_MSTR_IRQ: Reg = Reg(0x190010);
pub const GEN11_MASTER_IRQ: u32 = bit(31);
pub const GEN11_PCU_IRQ: u32 = bit(30);
pub const GEN11_GU_MISC_IRQ: u32 = bit(29);
pub const GEN11_DISPLAY_IRQ: u32 = bit(16);
pub const GEN12_IAF_IRQ: u32 = bit(27);

pub const fn gen11_gt_dw_irq(dw: u32) -> u32 {
    bit(dw)
}

pub const GEN11_GT_DW_IRQS: u32 = gen11_gt_dw_irq(0) | gen11_gt_dw_irq(1);

pub const fn gen12_error_irq(hw_err: HardwareError) -> u32 {
    bit(24 + hw_err as u32)
}

pub const DG1_MSTR_TILE_INTR: Reg = Reg(0x190008);
pub const DG1_MSTR_IRQ: u32 = bit(31);

pub const fn dg1_mstr_tile(tile: u32) -> u32 {
    bit(tile)
}

pub const GEN11_DISPLAY_INT_CTL: Reg = Reg(0x44200);
pub const GEN11_DISPLAY_IRQ_ENABLE: u32 = bit(31);

pub const GEN11_GU_MISC_IMR: Reg = Reg(0x444f4);
pub const GEN11_GU_MISC_IIR: Reg = Reg(0x444f8);
pub const GEN11_GU_MISC_IER: Reg = Reg(0x444fc);
pub const GEN11_GU_MISC_GSE: u32 = bit(27);

// Device error reporting

pub const DEV_PCIEERR_STATUS: Reg = Reg(0x100190);

pub const fn dev_pcieerr_is_fatal(tile: u32) -> u32 {
    bit(tile * 4 + 2)
}

pub const fn dev_err_stat_reg(hw_err: HardwareError) -> Reg {
    Reg(0x100174 + 4 * hw_err as u32)
}

pub const DEV_ERR_STAT_MAX_BITS: u32 = 32;
pub const DEV_ERR_STAT_GT_ERROR: u32 = 0;
pub const DEV_ERR_STAT_SGGI_ERROR: u32 = 1;
pub const DEV_ERR_STAT_GSC_ERROR: u32 = 8;
pub const DEV_ERR_STAT_SGUNIT_ERROR: u32 = 12;
pub const DEV_ERR_STAT_SGCI_ERROR: u32 = 13;
pub const DEV_ERR_STAT_SOC_ERROR: u32 = 16;
pub const DEV_ERR_STAT_MERT_ERROR: u32 = 20;

// GT errors

pub const fn err_stat_gt_reg(hw_err: HardwareError) -> Reg {
    Reg(0x100160 + 4 * hw_err as u32)
}

pub const ERR_STAT_GT_COR_VCTR_LEN: u32 = 4;
pub const ERR_STAT_GT_FATAL_VCTR_LEN: u32 = 8;

pub const fn err_stat_gt_cor_vctr_reg(i: u32) -> Reg {
    Reg(0x1002a0 + 4 * i)
}

pub const fn err_stat_gt_fatal_vctr_reg(i: u32) -> Reg {
    Reg(0x100260 + 4 * i)
}

pub const ERR_STAT_GT_VCTR0: u32 = 0;
pub const ERR_STAT_GT_VCTR1: u32 = 1;
pub const ERR_STAT_GT_VCTR2: u32 = 2;
pub const ERR_STAT_GT_VCTR3: u32 = 3;
pub const ERR_STAT_GT_VCTR6: u32 = 6;
pub const ERR_STAT_GT_VCTR7: u32 = 7;

pub const GT_HW_ERROR_MAX_ERR_BITS: u32 = 16;

pub const L3_SNG_COR_ERR: u32 = 0;
pub const GUC_COR_ERR: u32 = 1;
pub const SAMPLER_COR_ERR: u32 = 8;
pub const SLM_COR_ERR: u32 = 9;
pub const EU_IC_COR_ERR: u32 = 12;
pub const EU_GRF_COR_ERR: u32 = 15;

pub const ARRAY_BIST_FAT_ERR: u32 = 1;
pub const FPU_UNCORR_FAT_ERR: u32 = 3;
pub const L3_DOUBLE_FAT_ERR: u32 = 4;
pub const L3_ECC_CHK_FAT_ERR: u32 = 5;
pub const GUC_FAT_ERR: u32 = 6;
pub const IDI_PAR_FAT_ERR: u32 = 7;
pub const SQIDI_FAT_ERR: u32 = 8;
pub const SAMPLER_FAT_ERR: u32 = 9;
pub const SLM_FAT_ERR: u32 = 10;
pub const EU_IC_FAT_ERR: u32 = 12;
pub const EU_GRF_FAT_ERR: u32 = 15;

pub const PVC_COR_ERR_MASK: u32 =
    bit(GUC_COR_ERR) | bit(SLM_COR_ERR) | bit(EU_IC_COR_ERR) | bit(EU_GRF_COR_ERR);

pub const PVC_FAT_ERR_MASK: u32 = bit(FPU_UNCORR_FAT_ERR)
    | bit(GUC_FAT_ERR)
    | bit(SLM_FAT_ERR)
    | bit(EU_IC_FAT_ERR)
    | bit(EU_GRF_FAT_ERR);

pub const fn slm_ecc_error_cntr(hw_err: HardwareError) -> Reg {
    Reg(0xe7f4 + 4 * hw_err as u32)
}

// GSC (graphics security controller) errors

pub const PVC_GSC_HECI1_BASE: u32 = 0x284000;

pub const fn gsc_hec_corr_uncorr_err_status(base: u32, hw_err: HardwareError) -> Reg {
    match hw_err {
        HardwareError::Correctable => Reg(base + 0x118),
        _ => Reg(base + 0x128),
    }
}

pub const fn gsc_hec_corr_fw_err_dw0(base: u32) -> Reg {
    Reg(base + 0x1c8)
}

pub const GSC_HW_ERROR_MAX_ERR_BITS: u32 = 32;

pub const GSC_COR_SRAM_ECC_SINGLE_BIT_ERR: u32 = 0;
pub const GSC_COR_FW_REPORTED_ERR: u32 = 1;

pub const GSC_UNCOR_MIA_SHUTDOWN_ERR: u32 = 0;
pub const GSC_UNCOR_MIA_INT_ERR: u32 = 1;
pub const GSC_UNCOR_SRAM_ECC_ERR: u32 = 2;
pub const GSC_UNCOR_WDG_TIMEOUT_ERR: u32 = 3;
pub const GSC_UNCOR_ROM_PARITY_ERR: u32 = 4;
pub const GSC_UNCOR_UCODE_PARITY_ERR: u32 = 5;
pub const GSC_UNCOR_FW_REPORTED_ERR: u32 = 6;
pub const GSC_UNCOR_GLITCH_DET_ERR: u32 = 7;
pub const GSC_UNCOR_FUSE_PULL_ERR: u32 = 8;
pub const GSC_UNCOR_FUSE_CRC_CHECK_ERR: u32 = 9;
pub const GSC_UNCOR_SELFMBIST_ERR: u32 = 10;
pub const GSC_UNCOR_AON_PARITY_ERR: u32 = 11;

/// Scratch registers written by the firmware with HBM error details.
pub const SWF_0: Reg = Reg(0x4f000);
pub const SWF_1: Reg = Reg(0x4f004);

pub const HBM_EVENT_MASK: u32 = genmask(4, 0);
pub const HBM_TILE_MASK: u32 = bit(5);
pub const HBM_CHANNEL_MASK: u32 = genmask(10, 6);
pub const HBM_PSEUDOCHANNEL_MASK: u32 = bit(11);
pub const HBM_ROW_MASK: u32 = genmask(29, 12);
pub const HBM_COLUMN_MASK: u32 = genmask(9, 0);
pub const HBM_BANK_MASK: u32 = genmask(15, 10);
pub const HBM_OLDSTATE_MASK: u32 = genmask(19, 16);
pub const HBM_NEWSTATE_MASK: u32 = genmask(23, 20);

pub const HBM_UC_DEMAND_ACCESS: u32 = 1;
pub const HBM_PATROL_SCRUB_ERROR: u32 = 2;
pub const HBM_PCLS_EXCEEDED: u32 = 3;
pub const HBM_PCLS_SAME_CACHELINE: u32 = 4;

/// Firmware-reported memory sparing causes (GSC_HEC_CORR_FW_ERR_DW0).
pub const BANK_CORRECTABLE_ERROR: u32 = bit(0);
pub const BANK_SPARNG_ERR_MITIGATION_DOWNGRADED: u32 = bit(1);
pub const BANK_SPARNG_DIS_PCLS_EXCEEDED: u32 = bit(2);
pub const BANK_SPARNG_ENA_PCLS_UNCORRECTABLE: u32 = bit(3);

// SOC integrated error handlers (IEH)

pub const SOC_PVC_BASE: u32 = 0x282000;
pub const SOC_PVC_SLAVE_BASE: u32 = 0x283000;
pub const SOC_NUM_IEH: u32 = 2;
pub const SOC_HW_ERR_MAX_BITS: u32 = 32;

pub const fn soc_global_err_stat_master_reg(base: u32, hw_err: HardwareError) -> Reg {
    Reg(base + 0x200 + 0x10 * hw_err as u32)
}

pub const fn soc_global_err_stat_slave_reg(slave_base: u32, hw_err: HardwareError) -> Reg {
    Reg(slave_base + 0x200 + 0x10 * hw_err as u32)
}

pub const fn soc_local_err_stat_master_reg(base: u32, hw_err: HardwareError) -> Reg {
    Reg(base + 0x280 + 4 * hw_err as u32)
}

pub const fn soc_local_err_stat_slave_reg(slave_base: u32, hw_err: HardwareError) -> Reg {
    Reg(slave_base + 0x280 + 4 * hw_err as u32)
}

pub const fn soc_gsysevtctl_reg(base: u32, slave_base: u32, ieh: u32) -> Reg {
    if ieh == 0 {
        Reg(base + 0x264)
    } else {
        Reg(slave_base + 0x264)
    }
}

/// Value restoring event reporting for every severity.
pub const SOC_GSYSEVTCTL_ENABLE_ALL: u32 = (3 << 1) + 1;

pub const LOCAL_FIRST_IEH_HEADER_LOG_REG: Reg = Reg(0x2822b0);

pub const fn mdfi_severity(hw_err: HardwareError) -> u32 {
    match hw_err {
        HardwareError::Fatal => 0x0040_0000,
        HardwareError::NonFatal => 0x0020_0000,
        HardwareError::Correctable => 0,
    }
}

// IEH0 global
pub const SOC_IEH0_LOCAL_ERR_STATUS: u32 = 0;
pub const SOC_SLAVE_IEH: u32 = 1;
pub const SOC_PUNIT: u32 = 2;
pub const SOC_HBM_SS0_0: u32 = 8;
pub const PVC_SOC_HBM_SS1_0: u32 = 16;

// IEH0 local
pub const SOC_PSF_CSC_0: u32 = 0;
pub const SOC_PSF_CSC_1: u32 = 1;
pub const SOC_PSF_CSC_2: u32 = 2;
pub const PVC_SOC_PCIAER: u32 = 3;
pub const PVC_SOC_MDFI_EAST: u32 = 4;
pub const PVC_SOC_PCIERR: u32 = 5;
pub const PVC_SOC_MDFI_SOUTH: u32 = 6;
pub const PVC_SOC_UR: u32 = 7;
pub const PVC_SOC_PSF_0: u32 = 8;
pub const PVC_SOC_PSF_1: u32 = 9;
pub const PVC_SOC_PSF_2: u32 = 10;
pub const PVC_SOC_SERR_SRCS: u32 = 11;

// IEH1 global
pub const SOC_IEH1_LOCAL_ERR_STATUS: u32 = 0;
pub const PVC_SOC_HBM_SS2_0: u32 = 4;
pub const PVC_SOC_HBM_SS3_0: u32 = 12;
pub const PVC_SOC_CD0_MDFI: u32 = 20;

// GuC firmware loading

pub const GUC_STATUS: Reg = Reg(0xc000);
pub const GS_BOOTROM_MASK: u32 = genmask(7, 1);
pub const GS_BOOTROM_RSA_FAILED: u32 = 0x50 << 1;
pub const GS_UKERNEL_MASK: u32 = genmask(15, 8);
pub const GS_AUTH_STATUS_MASK: u32 = genmask(31, 30);

pub const GUC_LOAD_STATUS_READY: u32 = 0xf0;
pub const GUC_LOAD_STATUS_EXCEPTION: u32 = 0x30;

pub const fn soft_scratch(n: u32) -> Reg {
    Reg(0xc180 + 4 * n)
}

pub const GUC_SHIM_CONTROL: Reg = Reg(0xc064);
pub const GUC_DISABLE_SRAM_INIT_TO_ZEROES: u32 = bit(0);
pub const GUC_ENABLE_READ_CACHE_LOGIC: u32 = bit(1);
pub const GUC_ENABLE_MIA_CACHING: u32 = bit(2);
pub const GUC_ENABLE_READ_CACHE_FOR_SRAM_DATA: u32 = bit(9);
pub const GUC_ENABLE_READ_CACHE_FOR_WOPCM_DATA: u32 = bit(10);

pub const UOS_RSA_SCRATCH_COUNT: u32 = 64;

pub const fn uos_rsa_scratch(i: u32) -> Reg {
    Reg(0xc200 + 4 * i)
}

pub const DMA_ADDR_0_LOW: Reg = Reg(0xc300);
pub const DMA_ADDR_0_HIGH: Reg = Reg(0xc304);
pub const DMA_ADDR_1_LOW: Reg = Reg(0xc308);
pub const DMA_ADDR_1_HIGH: Reg = Reg(0xc30c);
pub const DMA_COPY_SIZE: Reg = Reg(0xc310);
pub const DMA_CTRL: Reg = Reg(0xc314);
pub const UOS_MOVE: u32 = bit(4);
pub const START_DMA: u32 = bit(0);
pub const DMA_GUC_WOPCM_OFFSET: Reg = Reg(0xc340);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genmask() {
        assert_eq!(genmask(31, 0), u32::MAX);
        assert_eq!(genmask(30, 0), 0x7fff_ffff);
        assert_eq!(genmask(15, 8), 0xff00);
        assert_eq!(field_get(GS_UKERNEL_MASK, 0xf000), 0xf0);
    }

    #[test]
    fn test_severity_indexed_registers() {
        assert_eq!(dev_err_stat_reg(HardwareError::Correctable), Reg(0x100174));
        assert_eq!(dev_err_stat_reg(HardwareError::Fatal), Reg(0x10017c));
        assert_eq!(err_stat_gt_reg(HardwareError::NonFatal), Reg(0x100164));
        assert_eq!(gen12_error_irq(HardwareError::Fatal), bit(26));
    }
}
