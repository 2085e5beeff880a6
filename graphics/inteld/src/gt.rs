// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Graphics tiles
//!
//! One [`Gt`] per tile. It owns the tile's register window, its engines and
//! GGTT, the hardware error counters and the deferred work that turns
//! memory sparing events into uevents. Everything touched from the
//! interrupt handler is either atomic or behind `irq_lock`, a spin lock.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use crate::config::DriverConfig;
use crate::engine::{Engine, EngineClass, EngineDesc, EngineProps};
use crate::gem::GemManager;
use crate::gtt::Ggtt;
use crate::hw_error::{DispatchPhase, HardwareError, HwErrorCounters, MemHealth};
use crate::mmio::RegisterIo;
use crate::platform::PlatformInfo;
use crate::ratelimit::RateLimit;
use crate::regs::{
    BANK_CORRECTABLE_ERROR, BANK_SPARNG_DIS_PCLS_EXCEEDED, BANK_SPARNG_ENA_PCLS_UNCORRECTABLE,
    BANK_SPARNG_ERR_MITIGATION_DOWNGRADED,
};
use crate::uevent::{UeventSink, MEMORY_HEALTH_UEVENT};
use crate::workqueue::{WorkItem, WorkQueue};

/// Rate-limited hardware error report for one tile.
macro_rules! hw_err {
    ($gt:expr, $($arg:tt)*) => {
        if $gt.ratelimit.check() {
            log::error!("[HW ERROR] GT{} detected {}", $gt.id, format_args!($($arg)*));
        }
    };
}
pub(crate) use hw_err;

/// State only touched with `Gt::irq_lock` held.
#[derive(Debug, Default)]
pub(crate) struct IrqLocked {
    /// Firmware-reported memory sparing cause, consumed by the health work.
    pub(crate) mem_sparing_cause: u32,
}

pub struct Gt {
    pub(crate) id: usize,
    pub(crate) info: &'static PlatformInfo,
    pub(crate) regs: Arc<dyn RegisterIo>,
    pub(crate) irq_lock: spin::Mutex<IrqLocked>,
    pub(crate) errors: HwErrorCounters,
    pub(crate) ratelimit: RateLimit,
    pub(crate) mem_health_work: Arc<WorkItem>,
    pub(crate) gsc_hw_error_work: Arc<WorkItem>,
    mem_health: AtomicU8,
    reset_pending: AtomicBool,
    dispatch_phase: [AtomicU8; HardwareError::COUNT],
    wq: Arc<WorkQueue>,
    uevent: Arc<dyn UeventSink>,
    ggtt: Arc<Ggtt>,
    engines: Vec<Arc<Engine>>,
}

impl fmt::Debug for Gt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gt")
            .field("id", &self.id)
            .field("platform", &self.info.name)
            .field("engines", &self.engines)
            .finish()
    }
}

type UeventEnv = &'static [(&'static str, &'static str)];

const HEALTH_ALARM: UeventEnv = &[("MEM_HEALTH_ALARM", "1")];
const HEALTH_EC_PENDING: UeventEnv = &[("RESET_REQUIRED", "1"), ("EC_PENDING", "1")];
const HEALTH_DEGRADED: UeventEnv = &[("DEGRADED", "1"), ("EC_FAILED", "1")];
const HEALTH_UNKNOWN: UeventEnv = &[("SPARING_STATUS_UNKNOWN", "1")];

const ENGINE_LAYOUT: &[EngineClass] = &[
    EngineClass::Render,
    EngineClass::Copy,
    EngineClass::VideoDecode,
    EngineClass::VideoEnhance,
    EngineClass::Compute,
];

pub(crate) struct GtDesc {
    pub(crate) id: usize,
    pub(crate) info: &'static PlatformInfo,
    pub(crate) regs: Arc<dyn RegisterIo>,
    pub(crate) gem: Arc<GemManager>,
    pub(crate) wq: Arc<WorkQueue>,
    pub(crate) uevent: Arc<dyn UeventSink>,
}

impl Gt {
    pub(crate) fn new(desc: GtDesc, config: &DriverConfig) -> Arc<Self> {
        let ggtt = Arc::new(Ggtt::new(config.ggtt_size));
        let props = EngineProps {
            preempt_timeout_ms: config.preempt_timeout_ms,
            timeslice_duration_ms: config.timeslice_duration_ms,
        };
        let engines = ENGINE_LAYOUT
            .iter()
            .enumerate()
            .map(|(id, &class)| {
                Engine::new(
                    EngineDesc {
                        id: id as u32,
                        class,
                        instance: 0,
                        gt_id: desc.id,
                        context_size: config.context_image_size,
                        uses_guc: desc.info.is_dgfx,
                        props,
                    },
                    Arc::clone(&desc.gem),
                    Arc::clone(&ggtt),
                )
            })
            .collect();

        Arc::new_cyclic(|this: &Weak<Gt>| {
            let health = this.clone();
            let gsc = this.clone();
            Gt {
                id: desc.id,
                info: desc.info,
                regs: desc.regs,
                irq_lock: spin::Mutex::new(IrqLocked::default()),
                errors: HwErrorCounters::new(),
                ratelimit: RateLimit::new(config.ratelimit_interval, config.ratelimit_burst),
                mem_health_work: WorkItem::new("mem-health", move || {
                    if let Some(gt) = health.upgrade() {
                        gt.mem_health_work();
                    }
                }),
                gsc_hw_error_work: WorkItem::new("gsc-hw-error", move || {
                    if let Some(gt) = gsc.upgrade() {
                        gt.gsc_hw_error_work();
                    }
                }),
                mem_health: AtomicU8::new(MemHealth::Ok as u8),
                reset_pending: AtomicBool::new(false),
                dispatch_phase: Default::default(),
                wq: desc.wq,
                uevent: desc.uevent,
                ggtt,
                engines,
            }
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn info(&self) -> &'static PlatformInfo {
        self.info
    }

    pub fn regs(&self) -> &Arc<dyn RegisterIo> {
        &self.regs
    }

    pub fn ggtt(&self) -> &Arc<Ggtt> {
        &self.ggtt
    }

    pub fn engines(&self) -> &[Arc<Engine>] {
        &self.engines
    }

    /// Look up an engine by name, e.g. `"rcs0"`.
    pub fn engine(&self, name: &str) -> Option<&Arc<Engine>> {
        self.engines.iter().find(|e| e.name() == name)
    }

    pub fn errors(&self) -> &HwErrorCounters {
        &self.errors
    }

    pub fn mem_health(&self) -> MemHealth {
        MemHealth::from_u8(self.mem_health.load(Ordering::Acquire))
    }

    fn set_mem_health(&self, status: MemHealth) {
        self.mem_health.store(status as u8, Ordering::Release);
    }

    /// A fatal GT error was seen and the tile needs a reset.
    pub fn reset_pending(&self) -> bool {
        self.reset_pending.load(Ordering::Acquire)
    }

    /// Consume the pending reset request.
    pub fn take_reset_pending(&self) -> bool {
        self.reset_pending.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn set_reset_pending(&self) {
        if !self.reset_pending.swap(true, Ordering::AcqRel) {
            log::warn!("inteld: GT{} fatal error, reset required", self.id);
        }
    }

    pub fn dispatch_phase(&self, hw_err: HardwareError) -> DispatchPhase {
        DispatchPhase::from_u8(self.dispatch_phase[hw_err as usize].load(Ordering::Acquire))
    }

    pub(crate) fn set_dispatch_phase(&self, hw_err: HardwareError, phase: DispatchPhase) {
        self.dispatch_phase[hw_err as usize].store(phase as u8, Ordering::Release);
    }

    pub(crate) fn schedule(&self, work: &Arc<WorkItem>) -> bool {
        self.wq.schedule(work)
    }

    /// Report an inconsistency in what the hardware told us.
    pub(crate) fn log_driver_error(&self, args: fmt::Arguments<'_>) {
        self.errors.driver_error();
        if self.ratelimit.check() {
            log::error!("inteld: GT{} driver error: {}", self.id, args);
        }
    }

    fn mem_health_work(&self) {
        let cause = std::mem::take(&mut self.irq_lock.lock().mem_sparing_cause);
        if cause == 0 {
            return;
        }

        let (status, env) = match cause {
            BANK_SPARNG_ERR_MITIGATION_DOWNGRADED => (MemHealth::Alarm, HEALTH_ALARM),
            // correctable threshold hit in firmware, repair runs on reset
            BANK_SPARNG_DIS_PCLS_EXCEEDED => (MemHealth::EcPending, HEALTH_EC_PENDING),
            BANK_SPARNG_ENA_PCLS_UNCORRECTABLE => {
                log::error!("inteld: GT{} memory degraded, card needs replacement", self.id);
                (MemHealth::Degraded, HEALTH_DEGRADED)
            }
            BANK_CORRECTABLE_ERROR => return,
            _ => (MemHealth::Unknown, HEALTH_UNKNOWN),
        };

        self.set_mem_health(status);

        let mut event = vec![(MEMORY_HEALTH_UEVENT, "1")];
        event.extend_from_slice(env);
        self.uevent.notify(MEMORY_HEALTH_UEVENT, &event);
    }

    fn gsc_hw_error_work(&self) {
        self.set_mem_health(MemHealth::Unknown);
        log::warn!(
            "inteld: GT{} unknown memory health status, reset required",
            self.id
        );
        self.uevent.notify(
            MEMORY_HEALTH_UEVENT,
            &[
                (MEMORY_HEALTH_UEVENT, "1"),
                ("SPARING_STATUS_UNKNOWN", "1"),
                ("RESET_REQUIRED", "1"),
            ],
        );
    }
}
