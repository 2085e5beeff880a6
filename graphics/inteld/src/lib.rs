// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Intel GPU Driver Core (Xe/i915)
//!
//! Context pinning and interrupt/error dispatch for Intel Gen12 GPUs:
//!
//! - Execution contexts pinned into the GGTT with a lock-free fast path
//!   and a wound-wait protected slow path
//! - Activation tracking that keeps a context's objects bound while
//!   requests are in flight
//! - Top-level interrupt handling for single- and multi-tile parts
//! - RAS error classification (GT, GSC, SOC, SG blocks) into per-tile
//!   counters, with memory health reported to user space
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          IntelDevice                             │
//! │   PlatformInfo · DriverConfig · GemManager · WorkQueue · uevents │
//! └───────────────┬───────────────────────────────┬──────────────────┘
//!                 │                               │
//! ┌───────────────▼──────────────┐  ┌─────────────▼──────────────────┐
//! │          Gt (per tile)       │  │         IrqController          │
//! │  Ggtt · Engines · irq_lock   │◄─┤  master disable → snapshot →   │
//! │  HwErrorCounters · mem health│  │  ack → dispatch → enable       │
//! └───────────────┬──────────────┘  └─────────────┬──────────────────┘
//!                 │                               │ ERROR_IRQ(sev)
//! ┌───────────────▼──────────────┐  ┌─────────────▼──────────────────┐
//! │        IntelContext          │  │           hw_error             │
//! │  pin / unpin · ActiveTracker │  │  DEV_ERR_STAT → GT / GSC / SOC │
//! │  Ring · Timeline · image Vma │  │  counters · deferred work      │
//! └───────────────┬──────────────┘  └────────────────────────────────┘
//!                 │ ww transaction
//! ┌───────────────▼──────────────┐
//! │   GemObject · Vma · Ggtt     │
//! └──────────────────────────────┘
//! ```
//!
//! Registers are reached only through [`mmio::RegisterIo`]; [`mmio::SimMmio`]
//! stands in for hardware during bring-up and in tests.

pub mod active;
pub mod config;
pub mod context;
pub mod device;
pub mod engine;
pub mod error;
pub mod gem;
pub mod gt;
pub mod gtt;
pub mod guc;
pub mod hw_error;
pub mod irq;
pub mod mmio;
pub mod platform;
pub mod ratelimit;
pub mod regs;
pub mod request;
pub mod ring;
pub mod timeline;
pub mod uevent;
pub mod workqueue;
pub mod ww;

pub use config::DriverConfig;
pub use context::{ContextFlags, IntelContext, SchedulePolicy};
pub use device::{IntelDevice, IntelDeviceBuilder};
pub use error::{Error, Result};
pub use gt::Gt;
pub use hw_error::{
    ErrorSource, GscHwError, GtHwError, HardwareError, HwErrorCounters, MemHealth, SocErrIndex,
};
pub use irq::{IrqClients, IrqReturn};
pub use ww::{ww_transaction, CancelToken, WwAcquireCtx};
