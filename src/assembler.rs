use crate::collectors::counters::CounterCache;
use crate::collectors::selector::GpuSelection;
use crate::collectors::SensorSet;
use crate::state::{
    free_mb, CpuStats, DiskStats, GpuStats, MemoryStats, NetStats, Snapshot,
};
use std::panic::{self, AssertUnwindSafe};
use tracing::{error, info, trace};

/// Cross-cycle state owned by the poll loop and lent to providers.
#[derive(Debug, Default)]
pub struct PollContext {
    pub gpu: GpuSelection,
    pub counters: CounterCache,
}

/// Builds one [`Snapshot`] per call from the active providers.
pub struct Assembler {
    sensors: SensorSet,
    ctx: PollContext,
    network_interface: String,
    interval_secs: f64,
}

impl Assembler {
    pub fn new(sensors: SensorSet, network_interface: impl Into<String>, interval_secs: f64) -> Self {
        Self {
            sensors,
            ctx: PollContext::default(),
            network_interface: network_interface.into(),
            interval_secs,
        }
    }

    #[cfg(test)]
    pub fn context(&self) -> &PollContext {
        &self.ctx
    }

    /// Drops the cached GPU choice; the next cycle enumerates devices again.
    pub fn request_gpu_redetect(&mut self) {
        info!("GPU re-detect requested");
        self.ctx.gpu.redetect();
    }

    /// One read pass over every provider. Never fails: a provider that
    /// panics has its whole section reported as sentinels.
    pub fn assemble(&mut self) -> Snapshot {
        guarded("shared", (), || self.sensors.refresh_shared());

        let cpu = guarded("cpu", CpuStats::UNAVAILABLE, || {
            let cpu = &mut self.sensors.cpu;
            cpu.refresh();
            CpuStats {
                percentage: cpu.percentage(),
                frequency_ghz: cpu.frequency(),
                temperature_c: cpu.temperature(),
                fan_rpm: cpu.fan_rpm(),
            }
        });

        let gpu = guarded("gpu", GpuStats::UNAVAILABLE, || {
            let gpu = &mut self.sensors.gpu;
            gpu.refresh();
            if !gpu.is_available(&mut self.ctx.gpu) {
                return GpuStats::UNAVAILABLE;
            }
            let selection = &self.ctx.gpu;
            let r = gpu.stats(selection);
            GpuStats {
                available: true,
                load_pct: r.load_pct,
                mem_pct: r.mem_pct,
                mem_used_mb: r.mem_used_mb,
                mem_total_mb: r.mem_total_mb,
                mem_free_mb: free_mb(r.mem_total_mb, r.mem_used_mb),
                temperature_c: r.temperature_c,
                fan_rpm: gpu.fan_rpm(selection),
                frequency_ghz: gpu.frequency(selection),
                fps: gpu.fps(selection),
            }
        });

        let memory = guarded("memory", MemoryStats::UNAVAILABLE, || {
            let memory = &mut self.sensors.memory;
            memory.refresh();
            MemoryStats::from_parts(memory.percentage(), memory.used_bytes(), memory.free_bytes())
        });

        let disk = guarded("disk", DiskStats::UNAVAILABLE, || {
            let disk = &mut self.sensors.disk;
            disk.refresh();
            DiskStats::from_parts(disk.percentage(), disk.used_bytes(), disk.free_bytes())
        });

        let net = guarded("net", NetStats::UNAVAILABLE, || {
            let net = &mut self.sensors.net;
            net.refresh();
            net.stats(&self.network_interface, self.interval_secs, &mut self.ctx.counters)
                .into()
        });

        let snapshot = Snapshot {
            cpu,
            gpu,
            memory,
            disk,
            net,
        };
        trace!(?snapshot, "snapshot assembled");
        snapshot
    }
}

fn guarded<T>(domain: &'static str, fallback: T, read: impl FnOnce() -> T) -> T {
    match panic::catch_unwind(AssertUnwindSafe(read)) {
        Ok(value) => value,
        Err(_) => {
            error!(domain = %domain, "sensor provider panicked, reporting sentinels");
            fallback
        }
    }
}
