// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

use std::sync::Arc;

use inteld::mmio::{SimMmio, SimRegKind};
use inteld::regs::*;
use inteld::HardwareError;

/// Register file of one tile with the interrupt and error status registers
/// behaving like hardware.
pub fn tile_mmio() -> Arc<SimMmio> {
    let sim = Arc::new(SimMmio::new());
    sim.set_kind(DG1_MSTR_TILE_INTR, SimRegKind::Master { enable: DG1_MSTR_IRQ });
    sim.set_kind(GEN11_GFX_MSTR_IRQ, SimRegKind::WriteOneToClear);
    sim.set_kind(GEN11_GU_MISC_IIR, SimRegKind::WriteOneToClear);
    sim.set_kind(DEV_PCIEERR_STATUS, SimRegKind::WriteOneToClear);

    for hw_err in HardwareError::ALL {
        sim.set_kind(dev_err_stat_reg(hw_err), SimRegKind::WriteOneToClear);
        sim.set_kind(err_stat_gt_reg(hw_err), SimRegKind::WriteOneToClear);
        sim.set_kind(
            gsc_hec_corr_uncorr_err_status(PVC_GSC_HECI1_BASE, hw_err),
            SimRegKind::WriteOneToClear,
        );
        for reg in [
            soc_global_err_stat_master_reg(SOC_PVC_BASE, hw_err),
            soc_local_err_stat_master_reg(SOC_PVC_BASE, hw_err),
            soc_global_err_stat_slave_reg(SOC_PVC_SLAVE_BASE, hw_err),
            soc_local_err_stat_slave_reg(SOC_PVC_SLAVE_BASE, hw_err),
        ] {
            sim.set_kind(reg, SimRegKind::WriteOneToClear);
        }
    }
    for i in 0..ERR_STAT_GT_COR_VCTR_LEN {
        sim.set_kind(err_stat_gt_cor_vctr_reg(i), SimRegKind::WriteOneToClear);
    }
    for i in 0..ERR_STAT_GT_FATAL_VCTR_LEN {
        sim.set_kind(err_stat_gt_fatal_vctr_reg(i), SimRegKind::WriteOneToClear);
    }
    sim
}
