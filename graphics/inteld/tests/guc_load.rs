// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

use std::sync::Arc;
use std::time::Duration;

use inteld::guc::GucFirmware;
use inteld::mmio::{RegisterIo, SimMmio, SimRegKind};
use inteld::regs::*;
use inteld::{DriverConfig, Error, IntelDevice};

fn device(device_id: u16, status: u32) -> (IntelDevice, Arc<SimMmio>) {
    let sim = Arc::new(SimMmio::new());
    // START_DMA self-clears once the copy is done
    sim.set_kind(DMA_CTRL, SimRegKind::WriteOneToClear);
    sim.set(GUC_STATUS, status);

    let config = DriverConfig {
        guc_load_timeout: Duration::from_millis(50),
        ..DriverConfig::default()
    };
    let dev = IntelDevice::builder(device_id)
        .config(config)
        .tile(Arc::clone(&sim) as Arc<dyn RegisterIo>)
        .build()
        .unwrap();
    (dev, sim)
}

fn firmware() -> GucFirmware {
    GucFirmware {
        image: vec![0xa5; 10000],
        rsa: vec![0x01, 0x02, 0x03, 0x04, 0x05],
    }
}

#[test]
fn test_upload_reaches_ready() {
    let (dev, sim) = device(0x4905, GUC_LOAD_STATUS_READY << 8);
    let ggtt = Arc::clone(dev.gt(0).unwrap().ggtt());

    dev.load_firmware(&firmware()).unwrap();

    assert_eq!(sim.get(DMA_COPY_SIZE), 10000);
    assert_eq!(sim.get(DMA_ADDR_1_LOW), 0x2000);
    assert_eq!(sim.get(uos_rsa_scratch(0)), 0x0403_0201);
    assert_eq!(sim.get(uos_rsa_scratch(1)), 0x05);

    let shim = sim.get(GUC_SHIM_CONTROL);
    assert_ne!(shim & GUC_ENABLE_READ_CACHE_LOGIC, 0);
    assert_ne!(shim & GUC_DISABLE_SRAM_INIT_TO_ZEROES, 0);

    // the staging object is released once the GuC has it
    assert_eq!(ggtt.bind_count(), 1);
    assert_eq!(ggtt.unbind_count(), 1);
}

#[test]
fn test_newer_parts_skip_sram_init_bits() {
    let (dev, sim) = device(0x0bd5, GUC_LOAD_STATUS_READY << 8);
    dev.load_firmware(&firmware()).unwrap();

    let shim = sim.get(GUC_SHIM_CONTROL);
    assert_eq!(shim & (GUC_DISABLE_SRAM_INIT_TO_ZEROES | GUC_ENABLE_MIA_CACHING), 0);
}

#[test]
fn test_signature_rejected() {
    let (dev, _sim) = device(0x4905, GS_BOOTROM_RSA_FAILED);
    assert_eq!(
        dev.load_firmware(&firmware()),
        Err(Error::Firmware("RSA signature verification failed"))
    );
}

#[test]
fn test_never_ready_times_out() {
    let (dev, _sim) = device(0x4905, 0);
    assert_eq!(dev.load_firmware(&firmware()), Err(Error::Timeout));
}

#[test]
fn test_stuck_dma_times_out() {
    let (dev, sim) = device(0x4905, GUC_LOAD_STATUS_READY << 8);
    sim.set_kind(DMA_CTRL, SimRegKind::Plain);

    assert_eq!(dev.load_firmware(&firmware()), Err(Error::Timeout));
    assert!(!sim.writes_to(DMA_CTRL).is_empty());
}

#[test]
fn test_integrated_parts_need_no_upload() {
    let (dev, sim) = device(0x9a49, 0);
    dev.load_firmware(&firmware()).unwrap();
    assert!(sim.writes_to(DMA_CTRL).is_empty());
}

#[test]
fn test_oversized_signature() {
    let (dev, _sim) = device(0x4905, GUC_LOAD_STATUS_READY << 8);
    let fw = GucFirmware {
        image: vec![0; 4096],
        rsa: vec![0; 4 * 64 + 1],
    };
    assert!(matches!(
        dev.load_firmware(&fw),
        Err(Error::InvalidArgument(_))
    ));
}
