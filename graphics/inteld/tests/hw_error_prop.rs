// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

use std::sync::Arc;

use proptest::prelude::*;

use inteld::hw_error::{DispatchPhase, SocLocality};
use inteld::mmio::{RegisterIo, SimMmio};
use inteld::regs::*;
use inteld::{DriverConfig, HardwareError, IntelDevice, IrqReturn, SocErrIndex};

mod common;
use common::tile_mmio;

/// Status register that reads all ones for one injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unreadable {
    DevErrStat,
    GtStatus,
    Vector,
    SocMaster,
    SocLocal,
    GscStatus,
}

#[derive(Debug, Clone)]
struct Injection {
    hw_err: HardwareError,
    sources: u32,
    gt_status: u32,
    vector: (u32, u32),
    soc_master: u32,
    soc_local: u32,
    gsc_status: u32,
    unreadable: Option<Unreadable>,
}

fn severity() -> impl Strategy<Value = HardwareError> {
    prop_oneof![
        Just(HardwareError::Correctable),
        Just(HardwareError::NonFatal),
        Just(HardwareError::Fatal),
    ]
}

fn sources() -> impl Strategy<Value = u32> {
    let known = bit(DEV_ERR_STAT_GT_ERROR)
        | bit(DEV_ERR_STAT_SGGI_ERROR)
        | bit(DEV_ERR_STAT_GSC_ERROR)
        | bit(DEV_ERR_STAT_SGUNIT_ERROR)
        | bit(DEV_ERR_STAT_SGCI_ERROR)
        | bit(DEV_ERR_STAT_SOC_ERROR)
        | bit(DEV_ERR_STAT_MERT_ERROR);

    prop_oneof![
        8 => any::<u32>().prop_map(move |s| s & known),
        2 => readable(),
        1 => Just(0),
    ]
}

/// Any value a live device can return.
fn readable() -> impl Strategy<Value = u32> {
    any::<u32>().prop_map(|v| if v == u32::MAX { 0 } else { v })
}

fn unreadable() -> impl Strategy<Value = Option<Unreadable>> {
    prop_oneof![
        6 => Just(None),
        1 => prop_oneof![
            Just(Unreadable::DevErrStat),
            Just(Unreadable::GtStatus),
            Just(Unreadable::Vector),
            Just(Unreadable::SocMaster),
            Just(Unreadable::SocLocal),
            Just(Unreadable::GscStatus),
        ]
        .prop_map(Some),
    ]
}

fn injection() -> impl Strategy<Value = Injection> {
    (
        (severity(), sources(), any::<u16>()),
        (0..ERR_STAT_GT_FATAL_VCTR_LEN, readable()),
        (readable(), readable(), 0u32..0x1000),
        unreadable(),
    )
        .prop_map(|(head, vector, soc_gsc, unreadable)| {
            let (hw_err, sources, gt_status) = head;
            let (soc_master, soc_local, gsc_status) = soc_gsc;
            Injection {
                hw_err,
                sources,
                gt_status: gt_status as u32,
                vector,
                soc_master,
                soc_local,
                gsc_status,
                unreadable,
            }
        })
}

fn device() -> (IntelDevice, Arc<SimMmio>) {
    let sim = tile_mmio();
    let dev = IntelDevice::builder(0x0bd5)
        .config(DriverConfig::default())
        .tile(Arc::clone(&sim) as Arc<dyn RegisterIo>)
        .build()
        .unwrap();
    dev.irq().install();
    (dev, sim)
}

fn vector_reg(hw_err: HardwareError, idx: u32) -> Reg {
    match hw_err {
        HardwareError::Fatal => err_stat_gt_fatal_vctr_reg(idx),
        _ => err_stat_gt_cor_vctr_reg(idx % ERR_STAT_GT_COR_VCTR_LEN),
    }
}

fn register(ev: &Injection, which: Unreadable) -> Reg {
    let hw_err = ev.hw_err;
    match which {
        Unreadable::DevErrStat => dev_err_stat_reg(hw_err),
        Unreadable::GtStatus => err_stat_gt_reg(hw_err),
        Unreadable::Vector => vector_reg(hw_err, ev.vector.0),
        Unreadable::SocMaster => soc_global_err_stat_master_reg(SOC_PVC_BASE, hw_err),
        Unreadable::SocLocal => soc_local_err_stat_master_reg(SOC_PVC_BASE, hw_err),
        Unreadable::GscStatus => gsc_hec_corr_uncorr_err_status(PVC_GSC_HECI1_BASE, hw_err),
    }
}

const ALL_UNREADABLE: [Unreadable; 6] = [
    Unreadable::DevErrStat,
    Unreadable::GtStatus,
    Unreadable::Vector,
    Unreadable::SocMaster,
    Unreadable::SocLocal,
    Unreadable::GscStatus,
];

fn inject(sim: &SimMmio, ev: &Injection) {
    let hw_err = ev.hw_err;
    sim.raise(err_stat_gt_reg(hw_err), ev.gt_status);
    let (idx, val) = ev.vector;
    sim.raise(vector_reg(hw_err, idx), val);
    sim.raise(soc_global_err_stat_master_reg(SOC_PVC_BASE, hw_err), ev.soc_master);
    sim.raise(soc_local_err_stat_master_reg(SOC_PVC_BASE, hw_err), ev.soc_local);
    sim.raise(
        gsc_hec_corr_uncorr_err_status(PVC_GSC_HECI1_BASE, hw_err),
        ev.gsc_status,
    );
    sim.raise(dev_err_stat_reg(hw_err), ev.sources);

    if let Some(which) = ev.unreadable {
        sim.set(register(ev, which), u32::MAX);
    }

    sim.raise(GEN11_GFX_MSTR_IRQ, gen12_error_irq(hw_err));
    sim.raise(DG1_MSTR_TILE_INTR, dg1_mstr_tile(0));
}

/// Start the next injection from quiet registers.
fn quiesce(sim: &SimMmio, ev: &Injection) {
    for which in ALL_UNREADABLE {
        sim.set(register(ev, which), 0);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_counters_never_decrease(events in prop::collection::vec(injection(), 1..12)) {
        let (dev, sim) = device();
        let gt = dev.gt(0).unwrap();
        let mut prev = gt.errors().snapshot();

        for ev in &events {
            let count = dev.irq().irq_count();
            inject(&sim, ev);
            prop_assert_eq!(dev.irq().handle(), IrqReturn::Handled);

            let now = gt.errors().snapshot();
            prop_assert!(now.dominates(&prev));

            // one record per reported source, unless an unreadable register
            // stopped the dispatch before the last one
            let recorded = now.by_source.iter().sum::<u64>() - prev.by_source.iter().sum::<u64>();
            let reported = match ev.unreadable {
                Some(Unreadable::DevErrStat) => u32::MAX.count_ones(),
                _ => ev.sources.count_ones(),
            } as u64;
            if dev.irq().irq_count() == count + 1 {
                prop_assert_eq!(recorded, reported);
            } else {
                prop_assert!(ev.unreadable.is_some());
                prop_assert_eq!(dev.irq().irq_count(), count);
                prop_assert!(recorded < reported);
                prop_assert_ne!(sim.get(dev_err_stat_reg(ev.hw_err)), 0);
            }

            for hw_err in HardwareError::ALL {
                prop_assert_eq!(gt.dispatch_phase(hw_err), DispatchPhase::Idle);
            }

            quiesce(&sim, ev);
            prev = now;
        }

        gt.errors().clear();
        prop_assert!(gt.errors().snapshot().by_source.iter().all(|&c| c == 0));
    }

    #[test]
    fn prop_soc_names_are_total(
        ieh in 0u8..2,
        local in any::<bool>(),
        hw_err in severity(),
        bit in 0u8..32,
    ) {
        let locality = if local { SocLocality::Local } else { SocLocality::Global };
        let index = SocErrIndex::new(ieh, locality, hw_err, bit);
        let name = index.name();
        prop_assert!(!name.to_string().is_empty());
        if hw_err == HardwareError::Correctable {
            prop_assert!(!name.is_valid());
        }
    }
}
