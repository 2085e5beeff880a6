// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! User space notification
//!
//! Deferred error work reports state changes (memory health, reset required)
//! through a [`UeventSink`]. Delivery is best effort and never blocks the
//! caller.

use std::collections::VecDeque;

pub const MEMORY_HEALTH_UEVENT: &str = "MEMORY_HEALTH";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uevent {
    pub name: String,
    pub env: Vec<(String, String)>,
}

impl Uevent {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

pub trait UeventSink: Send + Sync {
    fn notify(&self, name: &str, env: &[(&str, &str)]);
}

/// Writes events to the log.
pub struct LogUeventSink;

impl UeventSink for LogUeventSink {
    fn notify(&self, name: &str, env: &[(&str, &str)]) {
        let env: Vec<String> = env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        log::info!("inteld: uevent {} [{}]", name, env.join(" "));
    }
}

/// Keeps the most recent events in memory.
pub struct MemoryUeventSink {
    capacity: usize,
    events: spin::Mutex<VecDeque<Uevent>>,
}

impl MemoryUeventSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: spin::Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn events(&self) -> Vec<Uevent> {
        self.events.lock().iter().cloned().collect()
    }

    pub fn take(&self) -> Vec<Uevent> {
        self.events.lock().drain(..).collect()
    }
}

impl UeventSink for MemoryUeventSink {
    fn notify(&self, name: &str, env: &[(&str, &str)]) {
        let event = Uevent {
            name: name.to_string(),
            env: env
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };

        // Drop rather than wait on a reader.
        let Some(mut events) = self.events.try_lock() else {
            log::warn!("inteld: uevent {} dropped", name);
            return;
        };
        if self.capacity == 0 {
            return;
        }
        while events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }
}
