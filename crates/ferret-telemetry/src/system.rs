// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Host machine description used at startup.

use sysinfo::System;

/// Upper bound on worker threads regardless of core count.
pub const MAX_WORKER_THREADS: usize = 32;

/// A snapshot of the host machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInfo {
    /// Logical processors.
    pub logical_cpus: usize,
    /// Physical memory in bytes.
    pub total_memory_bytes: u64,
    /// Operating system name.
    pub os_name: String,
    /// Operating system version.
    pub os_version: String,
    /// CPU architecture the binary was built for.
    pub arch: &'static str,
}

impl SystemInfo {
    /// Queries the host.
    pub fn collect() -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        system.refresh_memory();

        let logical_cpus = match system.cpus().len() {
            0 => std::thread::available_parallelism().map_or(1, |n| n.get()),
            n => n,
        };

        Self {
            logical_cpus,
            total_memory_bytes: system.total_memory(),
            os_name: System::name().unwrap_or_else(|| "unknown".to_owned()),
            os_version: System::os_version().unwrap_or_default(),
            arch: std::env::consts::ARCH,
        }
    }

    /// Number of pool threads to allow, between 1 and `cap`.
    pub fn worker_threads(&self, cap: usize) -> usize {
        self.logical_cpus
            .clamp(1, MAX_WORKER_THREADS)
            .min(cap.max(1))
    }

    /// Writes the snapshot to the log.
    pub fn log_summary(&self) {
        log::info!(
            "System: {} {} ({}), {} logical CPUs, {} MiB RAM.",
            self.os_name,
            self.os_version,
            self.arch,
            self.logical_cpus,
            self.total_memory_bytes / (1024 * 1024)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(cpus: usize) -> SystemInfo {
        SystemInfo {
            logical_cpus: cpus,
            total_memory_bytes: 0,
            os_name: String::new(),
            os_version: String::new(),
            arch: "test",
        }
    }

    #[test]
    fn worker_threads_are_clamped() {
        assert_eq!(info(0).worker_threads(8), 1);
        assert_eq!(info(4).worker_threads(8), 4);
        assert_eq!(info(64).worker_threads(8), 8);
        assert_eq!(info(64).worker_threads(100), MAX_WORKER_THREADS);
        assert_eq!(info(4).worker_threads(0), 1);
    }

    #[test]
    fn collect_reports_at_least_one_cpu() {
        let info = SystemInfo::collect();
        assert!(info.logical_cpus >= 1);
        assert!(!info.arch.is_empty());
    }
}
