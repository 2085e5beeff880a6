// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Driver configuration
//!
//! Defaults match the values the hardware and firmware expect; every field
//! can be overridden from the environment (`INTELD_*`) when the driver is
//! started.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Default engine preemption timeout
    pub preempt_timeout_ms: u32,
    /// Default engine timeslice
    pub timeslice_duration_ms: u32,
    /// Ring buffer size for newly created contexts
    pub ring_size: u32,
    /// Size of the logical ring context image for render/compute engines
    pub context_image_size: u32,
    /// Size of the global GTT per tile
    pub ggtt_size: u64,
    /// Hardware error log rate limit window
    pub ratelimit_interval: Duration,
    /// Hardware error log messages allowed per window
    pub ratelimit_burst: u32,
    /// Time allowed for the GuC to report ready after DMA
    pub guc_load_timeout: Duration,
    /// Worker threads backing the deferred work queue
    pub workqueue_threads: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            preempt_timeout_ms: 640,
            timeslice_duration_ms: 1,
            ring_size: 4096,
            context_image_size: 22 * 4096,
            ggtt_size: 2 * 1024 * 1024 * 1024,
            ratelimit_interval: Duration::from_secs(5),
            ratelimit_burst: 10,
            guc_load_timeout: Duration::from_millis(1000),
            workqueue_threads: 1,
        }
    }
}

impl DriverConfig {
    /// Build a configuration from `INTELD_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = DriverConfig::default();

        if let Some(n) = var("INTELD_PREEMPT_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            config.preempt_timeout_ms = n;
        }

        if let Some(n) = var("INTELD_TIMESLICE_MS").and_then(|v| v.parse().ok()) {
            config.timeslice_duration_ms = n;
        }

        if let Some(n) = var("INTELD_RING_SIZE").and_then(|v| v.parse::<u32>().ok()) {
            // Rings are page granular
            if n >= 4096 && n.is_power_of_two() {
                config.ring_size = n;
            } else {
                log::warn!("inteld: ignoring INTELD_RING_SIZE={}", n);
            }
        }

        if let Some(n) = var("INTELD_CONTEXT_IMAGE_SIZE").and_then(|v| v.parse().ok()) {
            config.context_image_size = n;
        }

        if let Some(n) = var("INTELD_GGTT_SIZE").and_then(|v| v.parse().ok()) {
            config.ggtt_size = n;
        }

        if let Some(n) = var("INTELD_RATELIMIT_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            config.ratelimit_interval = Duration::from_millis(n);
        }

        if let Some(n) = var("INTELD_RATELIMIT_BURST").and_then(|v| v.parse().ok()) {
            config.ratelimit_burst = n;
        }

        if let Some(n) = var("INTELD_GUC_LOAD_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            config.guc_load_timeout = Duration::from_millis(n);
        }

        if let Some(n) = var("INTELD_WORKQUEUE_THREADS").and_then(|v| v.parse::<usize>().ok()) {
            config.workqueue_threads = n.max(1);
        }

        config
    }
}
