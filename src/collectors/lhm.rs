//! LibreHardwareMonitor backend.
//!
//! LHM publishes its hardware tree in a WMI namespace; every cycle the whole
//! tree is fetched once through PowerShell and the providers below pick their
//! sensors out of that shared copy.

use crate::collectors::counters::CounterCache;
use crate::collectors::selector::{GpuDevice, GpuSelection, GpuVendor};
use crate::collectors::system::SysDisk;
use crate::collectors::{
    parse_f64_loose, BackendKind, CpuSensor, GpuSensor, MemorySensor, NetSensor, SensorSet,
};
use crate::config::Config;
use crate::state::{percent_of, GpuReading, NetReading, SENTINEL, SENTINEL_BYTES};
use std::collections::HashSet;
use std::process::{Command, Output};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

const GB: f64 = 1_000_000_000.0;

/// CPU temperature sensors by priority, matched as name prefixes.
const CPU_TEMP_PREFIXES: [&str; 4] = ["Core Average", "Core Max", "CPU Package", "Core"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareKind {
    Cpu,
    GpuNvidia,
    GpuAmd,
    GpuIntel,
    Memory,
    Motherboard,
    SuperIo,
    Network,
    Storage,
    Other,
}

impl HardwareKind {
    fn from_wmi(s: &str) -> Self {
        match s {
            "Cpu" | "CPU" => Self::Cpu,
            "GpuNvidia" => Self::GpuNvidia,
            "GpuAmd" | "GpuAti" => Self::GpuAmd,
            "GpuIntel" => Self::GpuIntel,
            "Memory" | "RAM" => Self::Memory,
            "Motherboard" | "Mainboard" => Self::Motherboard,
            "SuperIO" => Self::SuperIo,
            "Network" => Self::Network,
            "Storage" | "HDD" => Self::Storage,
            _ => Self::Other,
        }
    }

    pub fn gpu_vendor(self) -> Option<GpuVendor> {
        match self {
            Self::GpuNvidia => Some(GpuVendor::Nvidia),
            Self::GpuAmd => Some(GpuVendor::Amd),
            Self::GpuIntel => Some(GpuVendor::Intel),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    Load,
    Clock,
    Temperature,
    Fan,
    Data,
    SmallData,
    Factor,
    Throughput,
    Other,
}

impl SensorKind {
    fn from_wmi(s: &str) -> Self {
        match s {
            "Load" => Self::Load,
            "Clock" => Self::Clock,
            "Temperature" => Self::Temperature,
            "Fan" => Self::Fan,
            "Data" => Self::Data,
            "SmallData" => Self::SmallData,
            "Factor" => Self::Factor,
            "Throughput" => Self::Throughput,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sensor {
    pub name: String,
    pub kind: SensorKind,
    /// `None` when LHM has no current value for the sensor.
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hardware {
    pub identifier: String,
    pub name: String,
    pub kind: HardwareKind,
    /// Identifier of the parent hardware, e.g. a SuperIO chip below the motherboard.
    pub parent: Option<String>,
    pub sensors: Vec<Sensor>,
}

impl Hardware {
    /// Live values of `kind` sensors whose name satisfies `pred`, in tree order.
    fn values<'a>(
        &'a self,
        kind: SensorKind,
        pred: impl Fn(&str) -> bool + 'a,
    ) -> impl Iterator<Item = f64> + 'a {
        self.sensors
            .iter()
            .filter(move |s| s.kind == kind && pred(&s.name))
            .filter_map(|s| s.value)
    }

    fn value<'a>(&'a self, kind: SensorKind, pred: impl Fn(&str) -> bool + 'a) -> Option<f64> {
        self.values(kind, pred).next()
    }

    fn has_core_load(&self) -> bool {
        self.sensors
            .iter()
            .any(|s| s.kind == SensorKind::Load && s.name.starts_with("GPU Core"))
    }
}

/// Parses the `H|...` / `S|...` lines emitted by the WMI query script.
///
/// Hardware lines: `H|type|name|identifier|parent`.
/// Sensor lines: `S|type|name|value|identifier|parent`, where `parent` is the
/// owning hardware's identifier. Sensors of unknown hardware are dropped.
pub fn parse_tree(text: &str) -> Vec<Hardware> {
    let mut hardware: Vec<Hardware> = Vec::new();
    let mut sensors: Vec<(String, Sensor)> = Vec::new();

    for line in text.lines() {
        let parts: Vec<&str> = line.split('|').map(str::trim).collect();
        match parts.as_slice() {
            ["H", kind, name, identifier, parent] => hardware.push(Hardware {
                identifier: identifier.to_string(),
                name: name.to_string(),
                kind: HardwareKind::from_wmi(kind),
                parent: (!parent.is_empty()).then(|| parent.to_string()),
                sensors: Vec::new(),
            }),
            ["S", kind, name, value, _identifier, parent] => sensors.push((
                parent.to_string(),
                Sensor {
                    name: name.to_string(),
                    kind: SensorKind::from_wmi(kind),
                    value: parse_f64_loose(value).filter(|v| v.is_finite()),
                },
            )),
            [] | [""] => {}
            _ => debug!(line = %line, "skipping unrecognised sensor tree line"),
        }
    }

    for (parent, sensor) in sensors {
        if let Some(hw) = hardware.iter_mut().find(|h| h.identifier == parent) {
            hw.sensors.push(sensor);
        }
    }
    hardware
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to start powershell: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("WMI query on namespace {namespace} failed, is LibreHardwareMonitor running as administrator? {stderr}")]
    Query { namespace: String, stderr: String },
    #[error("LibreHardwareMonitor published no hardware")]
    NoHardware,
}

/// Where the sensor tree comes from.
pub trait SensorSource: Send + Sync {
    fn query(&self) -> Result<Vec<Hardware>, SourceError>;
}

/// Queries LibreHardwareMonitor's WMI classes through PowerShell.
pub struct WmiSource {
    namespace: String,
}

impl WmiSource {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
        }
    }

    fn script(&self) -> String {
        format!(
            "$ns='{}'; \
             $h=Get-CimInstance -Namespace $ns -ClassName Hardware -ErrorAction Stop; \
             $s=Get-CimInstance -Namespace $ns -ClassName Sensor -ErrorAction Stop; \
             $h | ForEach-Object {{ \"H|$($_.HardwareType)|$($_.Name)|$($_.Identifier)|$($_.Parent)\" }}; \
             $s | ForEach-Object {{ \"S|$($_.SensorType)|$($_.Name)|$($_.Value)|$($_.Identifier)|$($_.Parent)\" }}",
            self.namespace.replace('\'', "''")
        )
    }
}

impl SensorSource for WmiSource {
    fn query(&self) -> Result<Vec<Hardware>, SourceError> {
        let output = run_powershell(&self.script())?;
        if !output.status.success() {
            return Err(SourceError::Query {
                namespace: self.namespace.clone(),
                stderr: decode_cmd_stdout(&output.stderr).trim().to_string(),
            });
        }
        Ok(parse_tree(&decode_cmd_stdout(&output.stdout)))
    }
}

fn run_powershell(script: &str) -> std::io::Result<Output> {
    let wrapped_script = format!(
        "[Console]::OutputEncoding=[System.Text.UTF8Encoding]::new($false); $OutputEncoding=[System.Text.UTF8Encoding]::new($false); {script}"
    );
    let args = ["-NoProfile", "-NonInteractive", "-Command", wrapped_script.as_str()];
    match Command::new("powershell").args(args).output() {
        Ok(output) => Ok(output),
        #[cfg(target_os = "windows")]
        Err(_) => Command::new(r"C:\Windows\System32\WindowsPowerShell\v1.0\powershell.exe")
            .args(args)
            .output(),
        #[cfg(not(target_os = "windows"))]
        Err(e) => Err(e),
    }
}

fn decode_cmd_stdout(bytes: &[u8]) -> String {
    if let Ok(utf8) = std::str::from_utf8(bytes) {
        return utf8.to_string();
    }

    // Windows PowerShell may still answer in UTF-16LE.
    if bytes.len() >= 2 && bytes.len() % 2 == 0 {
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        if let Ok(s) = String::from_utf16(&units) {
            return s;
        }
    }

    String::from_utf8_lossy(bytes).to_string()
}

/// The most recent copy of the hardware tree, shared by all LHM providers.
pub struct SensorTree {
    source: Box<dyn SensorSource>,
    hardware: Mutex<Vec<Hardware>>,
    failing: AtomicBool,
}

impl SensorTree {
    /// First query; any failure here means the backend is unusable.
    pub fn probe(source: Box<dyn SensorSource>) -> Result<Self, SourceError> {
        let hardware = source.query()?;
        if hardware.is_empty() {
            return Err(SourceError::NoHardware);
        }
        for hw in &hardware {
            info!(kind = ?hw.kind, name = %hw.name, sensors = hw.sensors.len(), "found hardware");
        }
        Ok(Self {
            source,
            hardware: Mutex::new(hardware),
            failing: AtomicBool::new(false),
        })
    }

    /// Re-reads the tree. A failed read empties it so every read this cycle
    /// reports the sentinel.
    pub fn refresh(&self) {
        let fresh = match self.source.query() {
            Ok(hardware) => {
                if self.failing.swap(false, Ordering::Relaxed) {
                    info!("sensor tree readable again");
                }
                hardware
            }
            Err(e) => {
                if !self.failing.swap(true, Ordering::Relaxed) {
                    warn!(error = %e, "sensor tree refresh failed");
                }
                Vec::new()
            }
        };
        *self.hardware.lock().unwrap_or_else(PoisonError::into_inner) = fresh;
    }

    fn with<R>(&self, f: impl FnOnce(&[Hardware]) -> R) -> R {
        let hardware = self.hardware.lock().unwrap_or_else(PoisonError::into_inner);
        f(&hardware)
    }

    fn first_of(&self, kind: HardwareKind) -> Option<Hardware> {
        self.with(|hw| hw.iter().find(|h| h.kind == kind).cloned())
    }
}

pub fn sensor_set(tree: Arc<SensorTree>, _cfg: &Config) -> SensorSet {
    SensorSet::new(
        BackendKind::Lhm,
        Box::new(LhmCpu::new(tree.clone())),
        Box::new(LhmGpu::new(tree.clone())),
        Box::new(LhmMemory::new(tree.clone())),
        // LHM has no partition view.
        Box::new(SysDisk::new()),
        Box::new(LhmNet::new(tree.clone())),
    )
    .with_tree(tree)
}

pub struct LhmCpu {
    tree: Arc<SensorTree>,
}

impl LhmCpu {
    pub fn new(tree: Arc<SensorTree>) -> Self {
        Self { tree }
    }

    fn read(&self, f: impl FnOnce(&Hardware) -> Option<f64>) -> f64 {
        self.tree
            .first_of(HardwareKind::Cpu)
            .and_then(|cpu| f(&cpu))
            .unwrap_or(SENTINEL)
    }
}

impl CpuSensor for LhmCpu {
    fn percentage(&mut self) -> f64 {
        self.read(|cpu| cpu.value(SensorKind::Load, |n| n.starts_with("CPU Total")))
    }

    fn frequency(&mut self) -> f64 {
        self.read(|cpu| {
            let clocks: Vec<f64> = cpu
                .values(SensorKind::Clock, |n| n.contains("Core #") && !n.contains("Effective"))
                .collect();
            if clocks.is_empty() {
                return None;
            }
            Some(clocks.iter().sum::<f64>() / clocks.len() as f64 / 1000.0)
        })
    }

    fn temperature(&mut self) -> f64 {
        self.read(cpu_temperature)
    }

    fn fan_rpm(&mut self) -> f64 {
        self.tree.with(|hw| {
            let Some(board) = hw.iter().find(|h| h.kind == HardwareKind::Motherboard) else {
                return SENTINEL;
            };
            hw.iter()
                .filter(|h| h.parent.as_deref() == Some(board.identifier.as_str()))
                .find_map(|sub| sub.value(SensorKind::Fan, |n| n.contains("#2")))
                .unwrap_or(SENTINEL)
        })
    }
}

fn cpu_temperature(cpu: &Hardware) -> Option<f64> {
    CPU_TEMP_PREFIXES
        .iter()
        .find_map(|prefix| cpu.value(SensorKind::Temperature, |n| n.starts_with(prefix)))
}

/// Keeps the last positive FPS reading; LHM reports 0 between frames.
#[derive(Debug, Default)]
pub struct FpsTracker {
    last: f64,
}

impl FpsTracker {
    pub fn update(&mut self, reading: f64) -> f64 {
        if reading > 0.0 {
            self.last = reading;
        }
        self.last
    }
}

pub struct LhmGpu {
    tree: Arc<SensorTree>,
    fps: FpsTracker,
}

impl LhmGpu {
    pub fn new(tree: Arc<SensorTree>) -> Self {
        Self {
            tree,
            fps: FpsTracker::default(),
        }
    }

    fn selected(&self, selection: &GpuSelection) -> Option<Hardware> {
        let gpu = selection.current()?;
        self.tree
            .with(|hw| hw.iter().find(|h| h.identifier == gpu.key).cloned())
    }
}

impl GpuSensor for LhmGpu {
    fn is_available(&mut self, selection: &mut GpuSelection) -> bool {
        let tree = &self.tree;
        selection
            .resolve_with(|| tree.with(gpu_devices))
            .is_some()
    }

    fn stats(&mut self, selection: &GpuSelection) -> GpuReading {
        self.selected(selection)
            .map(|gpu| gpu_reading(&gpu))
            .unwrap_or(GpuReading::UNAVAILABLE)
    }

    fn fan_rpm(&mut self, selection: &GpuSelection) -> f64 {
        self.selected(selection)
            .and_then(|gpu| gpu.value(SensorKind::Fan, |_| true))
            .unwrap_or(SENTINEL)
    }

    fn frequency(&mut self, selection: &GpuSelection) -> f64 {
        self.selected(selection)
            .and_then(|gpu| {
                gpu.value(SensorKind::Clock, |n| n.contains("Core") && !n.contains("Effective"))
            })
            .map(|mhz| mhz / 1000.0)
            .unwrap_or(SENTINEL)
    }

    fn fps(&mut self, selection: &GpuSelection) -> f64 {
        let reading = self
            .selected(selection)
            .and_then(|gpu| gpu.value(SensorKind::Factor, |n| n.contains("FPS")));
        match reading {
            Some(v) => self.fps.update(v),
            None => SENTINEL,
        }
    }
}

fn gpu_devices(hardware: &[Hardware]) -> Vec<GpuDevice> {
    hardware
        .iter()
        .filter_map(|h| {
            let vendor = h.kind.gpu_vendor()?;
            Some(GpuDevice::new(
                h.name.clone(),
                vendor,
                h.identifier.clone(),
                h.has_core_load(),
            ))
        })
        .collect()
}

/// `primary` unless it is missing or exactly zero, in which case `fallback`
/// is used when present.
fn zero_fallback(primary: Option<f64>, fallback: Option<f64>) -> f64 {
    match primary {
        Some(v) if v != 0.0 => v,
        Some(v) => fallback.unwrap_or(v),
        None => fallback.unwrap_or(SENTINEL),
    }
}

fn gpu_reading(gpu: &Hardware) -> GpuReading {
    let is_d3d_mem = |suffix: &'static str| move |n: &str| n.starts_with("D3D") && n.ends_with(suffix);

    let load_pct = zero_fallback(
        gpu.value(SensorKind::Load, |n| n.starts_with("GPU Core")),
        gpu.value(SensorKind::Load, |n| n.starts_with("D3D 3D")),
    );
    let mem_used_mb = zero_fallback(
        gpu.value(SensorKind::SmallData, |n| n.starts_with("GPU Memory Used")),
        gpu.value(SensorKind::SmallData, is_d3d_mem("Memory Used")),
    );
    let mem_total_mb = zero_fallback(
        gpu.value(SensorKind::SmallData, |n| n.starts_with("GPU Memory Total")),
        gpu.value(SensorKind::SmallData, is_d3d_mem("Memory Total")),
    );

    GpuReading {
        load_pct,
        mem_pct: percent_of(mem_used_mb, mem_total_mb),
        mem_used_mb,
        mem_total_mb,
        temperature_c: gpu
            .value(SensorKind::Temperature, |n| n.starts_with("GPU Core"))
            .unwrap_or(SENTINEL),
    }
}

fn gb_to_bytes(gb: Option<f64>) -> i64 {
    match gb {
        Some(v) if v >= 0.0 => (v * GB) as i64,
        _ => SENTINEL_BYTES,
    }
}

pub struct LhmMemory {
    tree: Arc<SensorTree>,
}

impl LhmMemory {
    pub fn new(tree: Arc<SensorTree>) -> Self {
        Self { tree }
    }

    fn data(&self, prefix: &str) -> i64 {
        gb_to_bytes(
            self.tree
                .first_of(HardwareKind::Memory)
                .and_then(|mem| mem.value(SensorKind::Data, |n| n.starts_with(prefix))),
        )
    }
}

impl MemorySensor for LhmMemory {
    fn percentage(&mut self) -> f64 {
        self.tree
            .first_of(HardwareKind::Memory)
            .and_then(|mem| mem.value(SensorKind::Load, |n| n.starts_with("Memory")))
            .unwrap_or(SENTINEL)
    }

    fn used_bytes(&mut self) -> i64 {
        self.data("Memory Used")
    }

    fn free_bytes(&mut self) -> i64 {
        self.data("Memory Available")
    }
}

/// LHM computes throughput itself, so the counter cache stays unused here.
pub struct LhmNet {
    tree: Arc<SensorTree>,
    warned_missing: HashSet<String>,
}

impl LhmNet {
    pub fn new(tree: Arc<SensorTree>) -> Self {
        Self {
            tree,
            warned_missing: HashSet::new(),
        }
    }
}

impl NetSensor for LhmNet {
    fn stats(
        &mut self,
        interface_name: &str,
        _interval_secs: f64,
        _counters: &mut CounterCache,
    ) -> NetReading {
        let nic = self.tree.with(|hw| {
            hw.iter()
                .filter(|h| h.kind == HardwareKind::Network)
                .find(|h| interface_name.is_empty() || h.name == interface_name)
                .cloned()
        });

        match nic {
            Some(nic) => net_reading(&nic),
            None => {
                if self.warned_missing.insert(interface_name.to_string()) {
                    warn!(
                        interface = %interface_name,
                        "network interface not found, check network_interface in config"
                    );
                }
                NetReading::UNAVAILABLE
            }
        }
    }
}

fn net_reading(nic: &Hardware) -> NetReading {
    let rate = |prefix: &str| {
        nic.value(SensorKind::Throughput, |n| n.starts_with(prefix))
            .unwrap_or(SENTINEL)
    };
    let total = |prefix: &str| gb_to_bytes(nic.value(SensorKind::Data, |n| n.starts_with(prefix)));

    NetReading {
        upload_rate_bps: rate("Upload Speed"),
        uploaded_bytes: total("Data Uploaded"),
        download_rate_bps: rate("Download Speed"),
        downloaded_bytes: total("Data Downloaded"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Replays canned query outputs, repeating the last one.
    struct ScriptedSource {
        frames: Vec<String>,
        next: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(frames: &[&str]) -> Self {
            Self {
                frames: frames.iter().map(|f| f.to_string()).collect(),
                next: AtomicUsize::new(0),
            }
        }
    }

    impl SensorSource for ScriptedSource {
        fn query(&self) -> Result<Vec<Hardware>, SourceError> {
            let i = self.next.fetch_add(1, Ordering::Relaxed);
            let frame = &self.frames[i.min(self.frames.len() - 1)];
            if frame == "fail" {
                return Err(SourceError::Query {
                    namespace: "root/LibreHardwareMonitor".to_string(),
                    stderr: "Invalid namespace".to_string(),
                });
            }
            Ok(parse_tree(frame))
        }
    }

    fn tree(frames: &[&str]) -> Arc<SensorTree> {
        Arc::new(SensorTree::probe(Box::new(ScriptedSource::new(frames))).expect("probe"))
    }

    const DESKTOP: &str = "\
H|Motherboard|MAG B550|/motherboard|
H|SuperIO|Nuvoton NCT6687D|/lpc/nct6687d|/motherboard
H|Cpu|AMD Ryzen 7 5800X|/amdcpu/0|
H|Memory|Generic Memory|/ram|
H|GpuAmd|AMD Radeon RX 6700 XT|/gpu-amd/0|
H|Network|Ethernet|/nic/{a}|
H|Network|Wi-Fi|/nic/{b}|
S|Fan|Fan #1|650|/lpc/nct6687d/fan/0|/lpc/nct6687d
S|Fan|Fan #2|1210|/lpc/nct6687d/fan/1|/lpc/nct6687d
S|Load|CPU Total|12.5|/amdcpu/0/load/0|/amdcpu/0
S|Load|CPU Core #1|20|/amdcpu/0/load/1|/amdcpu/0
S|Clock|Core #1|3800|/amdcpu/0/clock/1|/amdcpu/0
S|Clock|Core #2|4200|/amdcpu/0/clock/2|/amdcpu/0
S|Clock|Core #1 (Effective)|100|/amdcpu/0/clock/3|/amdcpu/0
S|Temperature|Core (Tctl/Tdie)|55.5|/amdcpu/0/temperature/2|/amdcpu/0
S|Temperature|CPU Package|60|/amdcpu/0/temperature/3|/amdcpu/0
S|Load|Memory|42|/ram/load/0|/ram
S|Data|Memory Used|6.5|/ram/data/0|/ram
S|Data|Memory Available|9.5|/ram/data/1|/ram
S|Data|Virtual Memory Used|12|/ram/data/2|/ram
S|Load|GPU Core|0|/gpu-amd/0/load/0|/gpu-amd/0
S|Load|D3D 3D|37|/gpu-amd/0/load/5|/gpu-amd/0
S|SmallData|GPU Memory Used|3072|/gpu-amd/0/smalldata/0|/gpu-amd/0
S|SmallData|GPU Memory Total|12288|/gpu-amd/0/smalldata/1|/gpu-amd/0
S|Temperature|GPU Core|48|/gpu-amd/0/temperature/0|/gpu-amd/0
S|Clock|GPU Core|2450|/gpu-amd/0/clock/0|/gpu-amd/0
S|Fan|GPU Fan|0|/gpu-amd/0/fan/0|/gpu-amd/0
S|Data|Data Uploaded|0.25|/nic/{a}/data/2|/nic/{a}
S|Data|Data Downloaded|1.5|/nic/{a}/data/3|/nic/{a}
S|Throughput|Upload Speed|1024|/nic/{a}/throughput/7|/nic/{a}
S|Throughput|Download Speed|8192|/nic/{a}/throughput/8|/nic/{a}
";

    #[test]
    fn parses_hardware_and_attaches_sensors() {
        let hw = parse_tree(DESKTOP);
        assert_eq!(hw.len(), 7);
        assert_eq!(hw[1].kind, HardwareKind::SuperIo);
        assert_eq!(hw[1].parent.as_deref(), Some("/motherboard"));
        assert_eq!(hw[0].parent, None);
        assert_eq!(hw[2].sensors.len(), 7);
        assert_eq!(hw[6].sensors.len(), 0);
    }

    #[test]
    fn empty_and_comma_values_parse() {
        let hw = parse_tree(
            "H|Cpu|X|/cpu|\nS|Load|CPU Total||/cpu/load/0|/cpu\nS|Clock|Core #1|3800,5|/cpu/clock/1|/cpu\nS|Load|Orphan|1|/x/load/0|/x\n",
        );
        assert_eq!(hw[0].sensors[0].value, None);
        assert_eq!(hw[0].sensors[1].value, Some(3800.5));
        assert_eq!(hw[0].sensors.len(), 2);
    }

    #[test]
    fn decodes_utf16_powershell_output() {
        let bytes: Vec<u8> = "H|Cpu|é"
            .encode_utf16()
            .flat_map(|u| u.to_le_bytes())
            .collect();
        assert_eq!(decode_cmd_stdout(&bytes), "H|Cpu|é");
        assert_eq!(decode_cmd_stdout(b"plain"), "plain");
    }

    #[test]
    fn probe_rejects_failing_or_empty_source() {
        let failing = SensorTree::probe(Box::new(ScriptedSource::new(&["fail"])));
        assert!(matches!(failing, Err(SourceError::Query { .. })));
        let empty = SensorTree::probe(Box::new(ScriptedSource::new(&[""])));
        assert!(matches!(empty, Err(SourceError::NoHardware)));
    }

    #[test]
    fn cpu_reads() {
        let mut cpu = LhmCpu::new(tree(&[DESKTOP]));
        assert_eq!(cpu.percentage(), 12.5);
        assert_eq!(cpu.frequency(), 4.0);
        // No "Core Average"/"Core Max"; CPU Package beats the generic Core sensor.
        assert_eq!(cpu.temperature(), 60.0);
        assert_eq!(cpu.fan_rpm(), 1210.0);
    }

    #[test]
    fn cpu_temperature_priority() {
        let hw = parse_tree(
            "H|Cpu|X|/cpu|\n\
             S|Temperature|Core Max|71|/cpu/t/0|/cpu\n\
             S|Temperature|CPU Package|70|/cpu/t/1|/cpu\n\
             S|Temperature|Core Average|64|/cpu/t/2|/cpu\n",
        );
        assert_eq!(cpu_temperature(&hw[0]), Some(64.0));

        let hw = parse_tree("H|Cpu|X|/cpu|\nS|Temperature|Core #3|50|/cpu/t/0|/cpu\n");
        assert_eq!(cpu_temperature(&hw[0]), Some(50.0));

        let hw = parse_tree("H|Cpu|X|/cpu|\nS|Temperature|Core Average||/cpu/t/0|/cpu\n");
        assert_eq!(cpu_temperature(&hw[0]), None);
    }

    #[test]
    fn gpu_reads_with_zero_fallbacks() {
        let mut gpu = LhmGpu::new(tree(&[DESKTOP]));
        let mut selection = GpuSelection::new();
        assert!(gpu.is_available(&mut selection));
        assert_eq!(selection.current().unwrap().key, "/gpu-amd/0");

        let r = gpu.stats(&selection);
        // GPU Core load reads exactly zero, so D3D 3D is used.
        assert_eq!(r.load_pct, 37.0);
        assert_eq!(r.mem_used_mb, 3072.0);
        assert_eq!(r.mem_total_mb, 12288.0);
        assert_eq!(r.mem_pct, 25.0);
        assert_eq!(r.temperature_c, 48.0);
        assert_eq!(gpu.frequency(&selection), 2.45);
        assert_eq!(gpu.fan_rpm(&selection), 0.0);
        assert_eq!(gpu.fps(&selection), SENTINEL);
    }

    #[test]
    fn zero_fallback_rules() {
        assert_eq!(zero_fallback(Some(10.0), Some(5.0)), 10.0);
        assert_eq!(zero_fallback(Some(0.0), Some(5.0)), 5.0);
        assert_eq!(zero_fallback(Some(0.0), None), 0.0);
        assert_eq!(zero_fallback(None, Some(5.0)), 5.0);
        assert_eq!(zero_fallback(None, None), SENTINEL);
    }

    #[test]
    fn d3d_memory_fallback() {
        let hw = parse_tree(
            "H|GpuIntel|Iris Xe|/gpu-intel-integrated/0|\n\
             S|SmallData|D3D Shared Memory Used|512|/g/s/0|/gpu-intel-integrated/0\n\
             S|SmallData|D3D Shared Memory Total|8192|/g/s/1|/gpu-intel-integrated/0\n",
        );
        let r = gpu_reading(&hw[0]);
        assert_eq!(r.load_pct, SENTINEL);
        assert_eq!(r.mem_used_mb, 512.0);
        assert_eq!(r.mem_total_mb, 8192.0);
        assert_eq!(r.mem_pct, 6.25);
        assert_eq!(r.temperature_c, SENTINEL);
    }

    #[test]
    fn fps_tracker_holds_last_positive_value() {
        let mut fps = FpsTracker::default();
        let seen: Vec<f64> = [45.0, 0.0, 0.0, 30.0].iter().map(|v| fps.update(*v)).collect();
        assert_eq!(seen, [45.0, 45.0, 45.0, 30.0]);
        assert_eq!(FpsTracker::default().update(0.0), 0.0);
    }

    #[test]
    fn fps_across_refreshes() {
        let frame = |fps: u32| {
            format!("H|GpuNvidia|RTX 4070|/gpu-nvidia/0|\nS|Factor|Fullscreen FPS|{fps}|/gpu-nvidia/0/factor/0|/gpu-nvidia/0\n")
        };
        let frames = [frame(45), frame(0), frame(0), frame(30)];
        let refs: Vec<&str> = frames.iter().map(String::as_str).collect();
        let tree = tree(&refs);
        let mut gpu = LhmGpu::new(tree.clone());
        let mut selection = GpuSelection::new();
        assert!(gpu.is_available(&mut selection));

        let mut seen = vec![gpu.fps(&selection)];
        for _ in 0..3 {
            tree.refresh();
            seen.push(gpu.fps(&selection));
        }
        assert_eq!(seen, [45.0, 45.0, 45.0, 30.0]);
    }

    #[test]
    fn failed_refresh_reads_sentinel_then_recovers() {
        let tree = tree(&[DESKTOP, "fail", DESKTOP]);
        let mut cpu = LhmCpu::new(tree.clone());
        tree.refresh();
        assert_eq!(cpu.percentage(), SENTINEL);
        assert_eq!(cpu.fan_rpm(), SENTINEL);
        tree.refresh();
        assert_eq!(cpu.percentage(), 12.5);
    }

    #[test]
    fn memory_reads_in_bytes() {
        let mut mem = LhmMemory::new(tree(&[DESKTOP]));
        assert_eq!(mem.percentage(), 42.0);
        assert_eq!(mem.used_bytes(), 6_500_000_000);
        assert_eq!(mem.free_bytes(), 9_500_000_000);
    }

    #[test]
    fn net_reads_default_and_named_interface() {
        let mut net = LhmNet::new(tree(&[DESKTOP]));
        let mut counters = CounterCache::new();

        let r = net.stats("", 0.5, &mut counters);
        assert_eq!(r.upload_rate_bps, 1024.0);
        assert_eq!(r.uploaded_bytes, 250_000_000);
        assert_eq!(r.download_rate_bps, 8192.0);
        assert_eq!(r.downloaded_bytes, 1_500_000_000);

        // Known interface without sensors yet.
        let r = net.stats("Wi-Fi", 0.5, &mut counters);
        assert_eq!(r, NetReading::UNAVAILABLE);

        let r = net.stats("Ethernet 9", 0.5, &mut counters);
        assert_eq!(r, NetReading::UNAVAILABLE);
        assert_eq!(counters.len(), 0);
    }

    #[test]
    fn missing_interface_is_warned_once() {
        let mut net = LhmNet::new(tree(&[DESKTOP]));
        let mut counters = CounterCache::new();
        for _ in 0..3 {
            assert_eq!(net.stats("wlan9", 0.5, &mut counters), NetReading::UNAVAILABLE);
        }
        assert_eq!(net.warned_missing.len(), 1);

        net.stats("Ethernet 9", 0.5, &mut counters);
        assert_eq!(net.warned_missing.len(), 2);
    }

    #[test]
    fn gpu_devices_mark_core_load() {
        let hw = parse_tree(
            "H|GpuAmd|Radeon Graphics|/gpu-amd/1|\n\
             H|GpuAmd|RX 7900 XT|/gpu-amd/0|\n\
             S|Load|GPU Core|3|/gpu-amd/0/load/0|/gpu-amd/0\n",
        );
        let devices = gpu_devices(&hw);
        assert_eq!(devices.len(), 2);
        assert!(!devices[0].has_core_load);
        assert!(devices[1].has_core_load);
        assert_eq!(devices[1].identity.vendor, GpuVendor::Amd);
    }
}
