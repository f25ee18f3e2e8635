use sysinfo::System;

/// Host CPU and memory sampler.
///
/// CPU usage is measured between consecutive refreshes, so the first sample
/// after construction reads low. Keep one probe alive for the whole run.
pub struct SystemProbe {
    system: System,
}

impl SystemProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        Self { system }
    }

    /// Returns `(cpu_percent, ram_percent)`.
    pub fn sample(&mut self) -> (f32, f32) {
        self.system.refresh_cpu();
        self.system.refresh_memory();

        let cpu = self.system.global_cpu_info().cpu_usage();
        let total = self.system.total_memory();
        let ram = if total == 0 {
            0.0
        } else {
            (self.system.used_memory() as f64 / total as f64 * 100.0) as f32
        };
        (cpu.clamp(0.0, 100.0), ram.clamp(0.0, 100.0))
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}
