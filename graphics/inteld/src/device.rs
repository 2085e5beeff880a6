// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Intel GPU device

use std::sync::Arc;

use crate::config::DriverConfig;
use crate::context::IntelContext;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::gem::GemManager;
use crate::gt::{Gt, GtDesc};
use crate::guc::{self, GucFirmware};
use crate::irq::{IrqClients, IrqController, NoIrqClients};
use crate::mmio::RegisterIo;
use crate::platform::{Platform, PlatformInfo};
use crate::uevent::{LogUeventSink, UeventSink};
use crate::workqueue::WorkQueue;

pub const INTEL_VENDOR_ID: u16 = 0x8086;

pub struct IntelDevice {
    device_id: u16,
    info: &'static PlatformInfo,
    config: DriverConfig,
    gem: Arc<GemManager>,
    wq: Arc<WorkQueue>,
    gts: Vec<Arc<Gt>>,
    irq: IrqController,
}

pub struct IntelDeviceBuilder {
    device_id: u16,
    config: Option<DriverConfig>,
    tiles: Vec<Arc<dyn RegisterIo>>,
    clients: Option<Arc<dyn IrqClients>>,
    uevent: Option<Arc<dyn UeventSink>>,
}

impl IntelDeviceBuilder {
    pub fn config(mut self, config: DriverConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Register window of the next tile, starting at tile 0.
    pub fn tile(mut self, regs: Arc<dyn RegisterIo>) -> Self {
        self.tiles.push(regs);
        self
    }

    pub fn irq_clients(mut self, clients: Arc<dyn IrqClients>) -> Self {
        self.clients = Some(clients);
        self
    }

    pub fn uevent_sink(mut self, sink: Arc<dyn UeventSink>) -> Self {
        self.uevent = Some(sink);
        self
    }

    pub fn build(self) -> Result<IntelDevice> {
        let info = Platform::lookup(self.device_id)?;

        if self.tiles.is_empty() {
            return Err(Error::InvalidArgument("no register window"));
        }
        if self.tiles.len() > info.max_tiles {
            return Err(Error::InvalidArgument("more tiles than the platform has"));
        }

        let config = self.config.unwrap_or_else(DriverConfig::from_env);
        let gem = Arc::new(GemManager::new());
        let wq = Arc::new(WorkQueue::new("inteld-wq", config.workqueue_threads));
        let uevent = self.uevent.unwrap_or_else(|| Arc::new(LogUeventSink));

        let gts: Vec<Arc<Gt>> = self
            .tiles
            .into_iter()
            .enumerate()
            .map(|(id, regs)| {
                Gt::new(
                    GtDesc {
                        id,
                        info,
                        regs,
                        gem: Arc::clone(&gem),
                        wq: Arc::clone(&wq),
                        uevent: Arc::clone(&uevent),
                    },
                    &config,
                )
            })
            .collect();

        let clients = self.clients.unwrap_or_else(|| Arc::new(NoIrqClients));
        let irq = IrqController::new(info, gts.clone(), clients);

        log::info!(
            "inteld: Intel GPU {:04x}:{:04x} ({}, Gen{}, {} tile{})",
            INTEL_VENDOR_ID,
            self.device_id,
            info.name,
            info.graphics_ver,
            gts.len(),
            if gts.len() == 1 { "" } else { "s" }
        );

        Ok(IntelDevice {
            device_id: self.device_id,
            info,
            config,
            gem,
            wq,
            gts,
            irq,
        })
    }
}

impl IntelDevice {
    pub fn builder(device_id: u16) -> IntelDeviceBuilder {
        IntelDeviceBuilder {
            device_id,
            config: None,
            tiles: Vec::new(),
            clients: None,
            uevent: None,
        }
    }

    pub fn vendor_id(&self) -> u16 {
        INTEL_VENDOR_ID
    }
    pub fn device_id(&self) -> u16 {
        self.device_id
    }
    pub fn generation(&self) -> u8 {
        self.info.graphics_ver
    }

    pub fn info(&self) -> &'static PlatformInfo {
        self.info
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn gem(&self) -> &Arc<GemManager> {
        &self.gem
    }

    pub fn workqueue(&self) -> &Arc<WorkQueue> {
        &self.wq
    }

    pub fn gts(&self) -> &[Arc<Gt>] {
        &self.gts
    }

    pub fn gt(&self, id: usize) -> Option<&Arc<Gt>> {
        self.gts.get(id)
    }

    pub fn engine(&self, gt: usize, name: &str) -> Option<&Arc<Engine>> {
        self.gt(gt)?.engine(name)
    }

    pub fn irq(&self) -> &IrqController {
        &self.irq
    }

    /// Upload the GuC firmware to every tile that schedules through it.
    pub fn load_firmware(&self, fw: &GucFirmware) -> Result<()> {
        for gt in &self.gts {
            if !gt.engines().iter().any(|e| e.uses_guc()) {
                continue;
            }
            guc::upload(gt, &self.gem, fw, self.config.guc_load_timeout)?;
        }
        Ok(())
    }

    /// New context on `engine` with the configured ring size.
    pub fn create_context(&self, engine: &Arc<Engine>) -> Arc<IntelContext> {
        let ce = IntelContext::create(engine);
        if let Err(e) = ce.set_ring_size(self.config.ring_size) {
            log::warn!("inteld: keeping default ring size: {}", e);
        }
        ce
    }
}

impl Drop for IntelDevice {
    fn drop(&mut self) {
        self.irq.uninstall();
        self.wq.flush();
    }
}
