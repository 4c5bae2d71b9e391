//! Host-process resource usage.
//!
//! This is an external read of the host, not something the core derives:
//! CPU and memory come from the OS, connection counts from the caller.

use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::System;

/// Point-in-time host resource usage for the status surface.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemResourceUsage {
    /// Global CPU usage percent (0-100). May read 0 until a second refresh.
    pub cpu_usage: f32,
    /// Used memory in bytes.
    pub memory_usage: u64,
    pub memory_usage_percent: f32,
    pub active_connections: usize,
    pub idle_connections: usize,
}

/// Cached `sysinfo` handle so repeated reads get real CPU deltas.
pub struct SystemResources {
    system: Mutex<System>,
}

impl SystemResources {
    #[must_use]
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    #[must_use]
    pub fn collect(&self, active_connections: usize, idle_connections: usize) -> SystemResourceUsage {
        let mut system = self.system.lock();
        system.refresh_memory();
        system.refresh_cpu_usage();

        let total = system.total_memory();
        let used = system.used_memory();
        #[allow(clippy::cast_precision_loss)]
        let memory_usage_percent = if total > 0 {
            (used as f32 / total as f32) * 100.0
        } else {
            0.0
        };

        SystemResourceUsage {
            cpu_usage: system.global_cpu_info().cpu_usage(),
            memory_usage: used,
            memory_usage_percent,
            active_connections,
            idle_connections,
        }
    }
}

impl Default for SystemResources {
    fn default() -> Self {
        Self::new()
    }
}
