pub mod counters;
pub mod hwmon;
pub mod lhm;
pub mod nvidia;
pub mod selector;
pub mod system;

use crate::config::{BackendChoice, Config};
use crate::state::{GpuReading, NetReading};
use counters::CounterCache;
use selector::GpuSelection;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

// Every read below fails soft: an unreadable sensor is reported as the
// sentinel and never retried within the cycle.

pub trait CpuSensor: Send {
    /// Re-acquires device handles; called once per cycle before any read.
    fn refresh(&mut self) {}
    fn percentage(&mut self) -> f64;
    /// GHz.
    fn frequency(&mut self) -> f64;
    /// °C.
    fn temperature(&mut self) -> f64;
    fn fan_rpm(&mut self) -> f64;
}

pub trait GpuSensor: Send {
    fn refresh(&mut self) {}
    /// Resolves the GPU to report, enumerating devices only if `selection`
    /// has not been evaluated yet. Must precede the other reads.
    fn is_available(&mut self, selection: &mut GpuSelection) -> bool;
    fn stats(&mut self, selection: &GpuSelection) -> GpuReading;
    fn fan_rpm(&mut self, selection: &GpuSelection) -> f64;
    /// GHz.
    fn frequency(&mut self, selection: &GpuSelection) -> f64;
    fn fps(&mut self, selection: &GpuSelection) -> f64;
}

pub trait MemorySensor: Send {
    fn refresh(&mut self) {}
    fn percentage(&mut self) -> f64;
    fn used_bytes(&mut self) -> i64;
    fn free_bytes(&mut self) -> i64;
}

pub trait DiskSensor: Send {
    fn refresh(&mut self) {}
    /// Usage of the primary volume only.
    fn percentage(&mut self) -> f64;
    /// Sum over all mounted partitions.
    fn used_bytes(&mut self) -> i64;
    /// Sum over all mounted partitions.
    fn free_bytes(&mut self) -> i64;
}

pub trait NetSensor: Send {
    fn refresh(&mut self) {}
    /// An empty `interface_name` picks the backend's default interface.
    fn stats(
        &mut self,
        interface_name: &str,
        interval_secs: f64,
        counters: &mut CounterCache,
    ) -> NetReading;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// LibreHardwareMonitor sensor tree.
    Lhm,
    /// sysinfo, sysfs and `nvidia-smi`.
    System,
}

/// The active provider for each domain, fixed for the process lifetime.
pub struct SensorSet {
    pub backend: BackendKind,
    pub cpu: Box<dyn CpuSensor>,
    pub gpu: Box<dyn GpuSensor>,
    pub memory: Box<dyn MemorySensor>,
    pub disk: Box<dyn DiskSensor>,
    pub net: Box<dyn NetSensor>,
    tree: Option<Arc<lhm::SensorTree>>,
}

impl SensorSet {
    pub fn new(
        backend: BackendKind,
        cpu: Box<dyn CpuSensor>,
        gpu: Box<dyn GpuSensor>,
        memory: Box<dyn MemorySensor>,
        disk: Box<dyn DiskSensor>,
        net: Box<dyn NetSensor>,
    ) -> Self {
        Self {
            backend,
            cpu,
            gpu,
            memory,
            disk,
            net,
            tree: None,
        }
    }

    pub fn with_tree(mut self, tree: Arc<lhm::SensorTree>) -> Self {
        self.tree = Some(tree);
        self
    }

    /// Re-reads state shared between providers. Providers refresh themselves.
    pub fn refresh_shared(&self) {
        if let Some(tree) = &self.tree {
            tree.refresh();
        }
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("LibreHardwareMonitor backend unavailable: {0}")]
    VendorUnavailable(#[from] lhm::SourceError),
}

/// Picks the backend for this process and builds its providers.
///
/// The vendor backend is probed once here; failing that probe is fatal for
/// the caller, it is never retried per cycle.
pub fn build_sensors(cfg: &Config) -> Result<SensorSet, BackendError> {
    let backend = resolve_backend(cfg.backend);
    info!(backend = ?backend, "sensor backend selected");
    match backend {
        BackendKind::System => Ok(system::sensor_set(cfg)),
        BackendKind::Lhm => {
            let source = lhm::WmiSource::new(&cfg.lhm_namespace);
            let tree = lhm::SensorTree::probe(Box::new(source))?;
            Ok(lhm::sensor_set(Arc::new(tree), cfg))
        }
    }
}

pub fn resolve_backend(choice: BackendChoice) -> BackendKind {
    match choice {
        BackendChoice::Lhm => BackendKind::Lhm,
        BackendChoice::System => BackendKind::System,
        BackendChoice::Auto if cfg!(target_os = "windows") => BackendKind::Lhm,
        BackendChoice::Auto => BackendKind::System,
    }
}

pub(crate) fn parse_f64_loose(input: &str) -> Option<f64> {
    let trimmed = input.trim();
    if let Ok(v) = trimmed.parse::<f64>() {
        return Some(v);
    }

    if let Ok(v) = trimmed.replace(',', ".").parse::<f64>() {
        return Some(v);
    }

    let filtered: String = trimmed
        .chars()
        .filter(|c| {
            c.is_ascii_digit()
                || *c == '.'
                || *c == ','
                || *c == 'e'
                || *c == 'E'
                || *c == '-'
                || *c == '+'
        })
        .collect();
    if filtered.is_empty() {
        return None;
    }

    filtered.replace(',', ".").parse::<f64>().ok()
}
