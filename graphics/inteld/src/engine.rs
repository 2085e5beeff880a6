// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Hardware engines

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::gem::GemManager;
use crate::gtt::Ggtt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineClass {
    Render,
    Copy,
    VideoDecode,
    VideoEnhance,
    Compute,
}

impl EngineClass {
    pub fn short_name(self) -> &'static str {
        match self {
            EngineClass::Render => "rcs",
            EngineClass::Copy => "bcs",
            EngineClass::VideoDecode => "vcs",
            EngineClass::VideoEnhance => "vecs",
            EngineClass::Compute => "ccs",
        }
    }

    /// Engines that need a logical ring context image.
    pub fn has_context_image(self) -> bool {
        matches!(self, EngineClass::Render | EngineClass::Compute)
    }
}

/// Scheduling defaults applied to new contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineProps {
    pub preempt_timeout_ms: u32,
    pub timeslice_duration_ms: u32,
}

pub struct Engine {
    id: u32,
    class: EngineClass,
    instance: u8,
    name: String,
    gt_id: usize,
    context_size: u32,
    uses_guc: bool,
    props: spin::Mutex<EngineProps>,
    wakeref: AtomicU32,
    gem: Arc<GemManager>,
    ggtt: Arc<Ggtt>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("name", &self.name)
            .field("gt", &self.gt_id)
            .finish()
    }
}

pub struct EngineDesc {
    pub id: u32,
    pub class: EngineClass,
    pub instance: u8,
    pub gt_id: usize,
    pub context_size: u32,
    pub uses_guc: bool,
    pub props: EngineProps,
}

impl Engine {
    pub fn new(desc: EngineDesc, gem: Arc<GemManager>, ggtt: Arc<Ggtt>) -> Arc<Self> {
        let context_size = if desc.class.has_context_image() {
            desc.context_size
        } else {
            0
        };

        Arc::new(Self {
            id: desc.id,
            class: desc.class,
            instance: desc.instance,
            name: format!("{}{}", desc.class.short_name(), desc.instance),
            gt_id: desc.gt_id,
            context_size,
            uses_guc: desc.uses_guc,
            props: spin::Mutex::new(desc.props),
            wakeref: AtomicU32::new(0),
            gem,
            ggtt,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn class(&self) -> EngineClass {
        self.class
    }

    pub fn instance(&self) -> u8 {
        self.instance
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn gt_id(&self) -> usize {
        self.gt_id
    }

    pub fn context_size(&self) -> u32 {
        self.context_size
    }

    pub fn uses_guc(&self) -> bool {
        self.uses_guc
    }

    pub fn props(&self) -> EngineProps {
        *self.props.lock()
    }

    /// Change the engine defaults (sysfs knobs).
    pub fn set_props(&self, props: EngineProps) {
        *self.props.lock() = props;
    }

    pub fn gem(&self) -> &Arc<GemManager> {
        &self.gem
    }

    pub fn ggtt(&self) -> &Arc<Ggtt> {
        &self.ggtt
    }

    pub fn pm_get(&self) {
        if self.wakeref.fetch_add(1, Ordering::AcqRel) == 0 {
            log::debug!("inteld: {} unparked", self.name);
        }
    }

    pub fn pm_put(&self) {
        let prev = self.wakeref.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unbalanced engine wakeref");
        if prev == 1 {
            log::debug!("inteld: {} parked", self.name);
        }
    }

    pub fn is_awake(&self) -> bool {
        self.wakeref.load(Ordering::Acquire) > 0
    }
}
