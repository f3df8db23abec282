//! OS-generic backend: sysinfo counters, sysfs and `nvidia-smi`.

use crate::collectors::counters::{CounterCache, CounterSample, Rates};
use crate::collectors::hwmon::{self, DrmReading, FanReading};
use crate::collectors::nvidia::{self, NvidiaReading};
use crate::collectors::selector::{GpuIdentity, GpuSelection};
use crate::collectors::{
    BackendKind, CpuSensor, DiskSensor, GpuSensor, MemorySensor, NetSensor, SensorSet,
};
use crate::config::Config;
use crate::state::{percent_of, GpuReading, NetReading, SENTINEL, SENTINEL_BYTES};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use sysinfo::{ComponentExt, CpuExt, DiskExt, NetworkExt, NetworksExt, System, SystemExt};
use tracing::{debug, warn};

/// hwmon chip families that report the CPU die temperature, by priority.
const CPU_TEMP_CHIPS: [&str; 4] = ["coretemp", "k10temp", "cpu_thermal", "zenpower"];

pub fn sensor_set(cfg: &Config) -> SensorSet {
    SensorSet::new(
        BackendKind::System,
        Box::new(SysCpu::new(cfg.sysfs_root.clone(), cfg.cpu_fan.clone())),
        Box::new(SysGpu::new(cfg.sysfs_root.clone())),
        Box::new(SysMemory::new()),
        Box::new(SysDisk::new()),
        Box::new(SysNet::new()),
    )
}

pub struct SysCpu {
    system: System,
    sysfs_root: PathBuf,
    fan_name: Option<String>,
}

impl SysCpu {
    pub fn new(sysfs_root: PathBuf, fan_name: Option<String>) -> Self {
        let mut system = System::new();
        // Usage is a delta between two refreshes; prime the first one.
        system.refresh_cpu();
        system.refresh_components_list();
        Self {
            system,
            sysfs_root,
            fan_name,
        }
    }
}

impl CpuSensor for SysCpu {
    fn refresh(&mut self) {
        self.system.refresh_cpu();
        self.system.refresh_components();
    }

    fn percentage(&mut self) -> f64 {
        if self.system.cpus().is_empty() {
            return SENTINEL;
        }
        self.system.global_cpu_info().cpu_usage() as f64
    }

    fn frequency(&mut self) -> f64 {
        let mhz: Vec<f64> = self
            .system
            .cpus()
            .iter()
            .map(|c| c.frequency() as f64)
            .filter(|f| *f > 0.0)
            .collect();
        mean(&mhz).map(|m| m / 1000.0).unwrap_or(SENTINEL)
    }

    fn temperature(&mut self) -> f64 {
        let components: Vec<(String, f64)> = self
            .system
            .components()
            .iter()
            .map(|c| (c.label().to_string(), c.temperature() as f64))
            .collect();
        cpu_temperature(&components)
    }

    fn fan_rpm(&mut self) -> f64 {
        let fans = hwmon::read_fans(&self.sysfs_root);
        cpu_fan(&fans, self.fan_name.as_deref())
            .map(|f| f.rpm)
            .unwrap_or(SENTINEL)
    }
}

/// First component of the highest-priority CPU chip family.
///
/// sysinfo labels hwmon components as `<chip> <label>`, e.g.
/// `k10temp Tctl`.
fn cpu_temperature(components: &[(String, f64)]) -> f64 {
    CPU_TEMP_CHIPS
        .iter()
        .find_map(|chip| {
            components
                .iter()
                .find(|(label, _)| label.to_ascii_lowercase().starts_with(chip))
                .map(|(_, t)| *t)
        })
        .filter(|t| t.is_finite() && *t > 0.0)
        .unwrap_or(SENTINEL)
}

fn is_cpu_fan(label: &str) -> bool {
    let label = label.to_ascii_lowercase();
    label.contains("cpu") || label.contains("proc")
}

/// A pinned `chip/label` wins; otherwise the first fan that looks like a CPU fan.
fn cpu_fan<'a>(fans: &'a [FanReading], pinned: Option<&str>) -> Option<&'a FanReading> {
    match pinned {
        Some(name) => fans.iter().find(|f| f.qualified_name() == name),
        None => fans.iter().find(|f| is_cpu_fan(&f.label) || is_cpu_fan(&f.chip)),
    }
}

fn gpu_fan(fans: &[FanReading]) -> Option<&FanReading> {
    fans.iter()
        .find(|f| f.label.to_ascii_lowercase().contains("gpu"))
}

/// Readings of the selected GPU, taken once per cycle.
#[derive(Debug, Clone, PartialEq)]
struct DeviceReading {
    load_pct: f64,
    mem_used_mb: f64,
    mem_total_mb: f64,
    temperature_c: f64,
    clock_mhz: f64,
    /// The card's own fan, when the driver exposes one.
    fan_rpm: f64,
}

impl DeviceReading {
    const UNAVAILABLE: Self = Self {
        load_pct: SENTINEL,
        mem_used_mb: SENTINEL,
        mem_total_mb: SENTINEL,
        temperature_c: SENTINEL,
        clock_mhz: SENTINEL,
        fan_rpm: SENTINEL,
    };
}

impl From<NvidiaReading> for DeviceReading {
    fn from(r: NvidiaReading) -> Self {
        Self {
            load_pct: r.load_pct,
            mem_used_mb: r.mem_used_mb,
            mem_total_mb: r.mem_total_mb,
            temperature_c: r.temperature_c,
            clock_mhz: r.clock_mhz,
            fan_rpm: SENTINEL,
        }
    }
}

impl From<DrmReading> for DeviceReading {
    fn from(r: DrmReading) -> Self {
        Self {
            load_pct: r.load_pct,
            mem_used_mb: r.vram_used_mb,
            mem_total_mb: r.vram_total_mb,
            temperature_c: r.temperature_c,
            clock_mhz: r.clock_mhz,
            fan_rpm: r.fan_rpm,
        }
    }
}

pub struct SysGpu {
    sysfs_root: PathBuf,
    reading: Option<DeviceReading>,
}

impl SysGpu {
    pub fn new(sysfs_root: PathBuf) -> Self {
        Self {
            sysfs_root,
            reading: None,
        }
    }

    fn reading(&mut self, selection: &GpuSelection) -> DeviceReading {
        let Some(gpu) = selection.current() else {
            return DeviceReading::UNAVAILABLE;
        };
        self.reading
            .get_or_insert_with(|| read_device(gpu))
            .clone()
    }
}

fn read_device(gpu: &GpuIdentity) -> DeviceReading {
    match gpu.key.strip_prefix(nvidia::KEY_PREFIX) {
        Some(index) => nvidia::query(index)
            .map(DeviceReading::from)
            .unwrap_or(DeviceReading::UNAVAILABLE),
        None => hwmon::read_drm_gpu(Path::new(&gpu.key)).into(),
    }
}

impl GpuSensor for SysGpu {
    fn refresh(&mut self) {
        self.reading = None;
    }

    fn is_available(&mut self, selection: &mut GpuSelection) -> bool {
        let sysfs_root = &self.sysfs_root;
        selection
            .resolve_with(|| {
                let mut devices = nvidia::list_devices();
                let skip_nvidia = !devices.is_empty();
                devices.extend(hwmon::list_drm_gpus(sysfs_root, skip_nvidia));
                devices
            })
            .is_some()
    }

    fn stats(&mut self, selection: &GpuSelection) -> GpuReading {
        if selection.current().is_none() {
            return GpuReading::UNAVAILABLE;
        }
        let r = self.reading(selection);
        GpuReading {
            load_pct: r.load_pct,
            mem_pct: percent_of(r.mem_used_mb, r.mem_total_mb),
            mem_used_mb: r.mem_used_mb,
            mem_total_mb: r.mem_total_mb,
            temperature_c: r.temperature_c,
        }
    }

    fn fan_rpm(&mut self, selection: &GpuSelection) -> f64 {
        if selection.current().is_none() {
            return SENTINEL;
        }
        let fans = hwmon::read_fans(&self.sysfs_root);
        match gpu_fan(&fans) {
            Some(fan) => fan.rpm,
            None => self.reading(selection).fan_rpm,
        }
    }

    fn frequency(&mut self, selection: &GpuSelection) -> f64 {
        let mhz = self.reading(selection).clock_mhz;
        if mhz < 0.0 {
            return SENTINEL;
        }
        mhz / 1000.0
    }

    fn fps(&mut self, _selection: &GpuSelection) -> f64 {
        SENTINEL
    }
}

pub struct SysMemory {
    system: System,
}

impl SysMemory {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        Self { system }
    }

    fn total_and_available(&self) -> Option<(u64, u64)> {
        let total = self.system.total_memory();
        if total == 0 {
            return None;
        }
        Some((total, self.system.available_memory().min(total)))
    }
}

impl MemorySensor for SysMemory {
    fn refresh(&mut self) {
        self.system.refresh_memory();
    }

    fn percentage(&mut self) -> f64 {
        match self.total_and_available() {
            Some((total, available)) => percent_of((total - available) as f64, total as f64),
            None => SENTINEL,
        }
    }

    // "used" as reported by the OS overlaps with caches differently per
    // platform; total - available is the comparable figure.
    fn used_bytes(&mut self) -> i64 {
        match self.total_and_available() {
            Some((total, available)) => to_i64(total - available),
            None => SENTINEL_BYTES,
        }
    }

    fn free_bytes(&mut self) -> i64 {
        match self.total_and_available() {
            Some((_, available)) => to_i64(available),
            None => SENTINEL_BYTES,
        }
    }
}

/// One mounted partition as `(mount point, total bytes, available bytes)`.
type Partition = (String, u64, u64);

pub struct SysDisk {
    system: System,
    primary_mount: String,
}

impl SysDisk {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_disks_list();
        Self {
            system,
            primary_mount: primary_mount(),
        }
    }

    fn partitions(&self) -> Vec<Partition> {
        self.system
            .disks()
            .iter()
            .map(|d| {
                (
                    d.mount_point().to_string_lossy().to_string(),
                    d.total_space(),
                    d.available_space(),
                )
            })
            .collect()
    }
}

#[cfg(target_os = "windows")]
fn primary_mount() -> String {
    let drive = std::env::var("SystemDrive").unwrap_or_else(|_| "C:".to_string());
    format!("{}\\", drive.trim_end_matches('\\'))
}

#[cfg(not(target_os = "windows"))]
fn primary_mount() -> String {
    "/".to_string()
}

impl DiskSensor for SysDisk {
    fn refresh(&mut self) {
        // Mounts come and go; re-enumerate rather than refresh the old list.
        self.system.refresh_disks_list();
    }

    fn percentage(&mut self) -> f64 {
        primary_volume_percent(&self.partitions(), &self.primary_mount)
    }

    fn used_bytes(&mut self) -> i64 {
        let parts = self.partitions();
        if parts.is_empty() {
            return SENTINEL_BYTES;
        }
        to_i64(
            parts
                .iter()
                .map(|(_, total, available)| total.saturating_sub(*available))
                .sum(),
        )
    }

    fn free_bytes(&mut self) -> i64 {
        let parts = self.partitions();
        if parts.is_empty() {
            return SENTINEL_BYTES;
        }
        to_i64(parts.iter().map(|(_, _, available)| *available).sum())
    }
}

/// Usage of the primary mount, or of the first partition when it isn't mounted.
fn primary_volume_percent(partitions: &[Partition], primary: &str) -> f64 {
    let volume = partitions
        .iter()
        .find(|(mount, _, _)| mount.eq_ignore_ascii_case(primary))
        .or_else(|| partitions.first());
    match volume {
        Some((_, total, available)) => {
            percent_of(total.saturating_sub(*available) as f64, *total as f64)
        }
        None => SENTINEL,
    }
}

pub struct SysNet {
    system: System,
    warned_missing: HashSet<String>,
}

impl SysNet {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_networks_list();
        Self {
            system,
            warned_missing: HashSet::new(),
        }
    }
}

impl NetSensor for SysNet {
    fn refresh(&mut self) {
        self.system.refresh_networks_list();
    }

    fn stats(
        &mut self,
        interface_name: &str,
        interval_secs: f64,
        counters: &mut CounterCache,
    ) -> NetReading {
        let mut interfaces: Vec<(String, u64, u64)> = self
            .system
            .networks()
            .iter()
            .map(|(name, data)| (name.clone(), data.total_transmitted(), data.total_received()))
            .collect();
        interfaces.sort();

        match interface_reading(&interfaces, interface_name, interval_secs, counters) {
            Some(reading) => reading,
            None => {
                if self.warned_missing.insert(interface_name.to_string()) {
                    warn!(
                        interface = %interface_name,
                        available = ?interfaces.iter().map(|(n, _, _)| n.as_str()).collect::<Vec<_>>(),
                        "network interface not found, check network_interface in config"
                    );
                }
                NetReading::UNAVAILABLE
            }
        }
    }
}

/// Picks the interface (first one when `wanted` is empty) and derives its
/// rates through the counter cache. `None` when the interface doesn't exist.
///
/// Interfaces missing from `interfaces` are flagged in the cache, so one that
/// comes back starts from zero instead of a rate against its old counters.
fn interface_reading(
    interfaces: &[(String, u64, u64)],
    wanted: &str,
    interval_secs: f64,
    counters: &mut CounterCache,
) -> Option<NetReading> {
    counters.mark_missing(interfaces.iter().map(|(name, _, _)| name.as_str()));

    let (name, sent, received) = if wanted.is_empty() {
        interfaces.first()?
    } else {
        interfaces.iter().find(|(name, _, _)| name == wanted)?
    };

    let rates = counters
        .observe(CounterSample::new(name.as_str(), *sent, *received), interval_secs)
        .unwrap_or_else(|| {
            debug!(interface = %name, "no previous counter sample, rate starts at zero");
            Rates::ZERO
        });

    Some(NetReading {
        upload_rate_bps: rates.upload_bps,
        uploaded_bytes: to_i64(*sent),
        download_rate_bps: rates.download_bps,
        downloaded_bytes: to_i64(*received),
    })
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

fn to_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}
