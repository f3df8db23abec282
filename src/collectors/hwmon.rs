//! sysfs readers: hwmon fans and DRM cards.
//!
//! Every function takes the sysfs root so tests can point it at a fixture
//! tree. On hosts without sysfs they simply find nothing.

use crate::collectors::parse_f64_loose;
use crate::collectors::selector::{GpuDevice, GpuVendor};
use crate::state::SENTINEL;
use std::fs;
use std::path::{Path, PathBuf};

const VENDOR_NVIDIA: &str = "0x10de";
const VENDOR_AMD: &str = "0x1002";
const VENDOR_INTEL: &str = "0x8086";

#[derive(Debug, Clone, PartialEq)]
pub struct FanReading {
    /// hwmon chip name, e.g. `nct6775` or `amdgpu`.
    pub chip: String,
    /// `fanN_label` contents, or `fanN` when the driver provides no label.
    pub label: String,
    pub rpm: f64,
}

impl FanReading {
    /// `chip/label`, the form used to pin a fan in the config.
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.chip, self.label)
    }
}

/// Every readable fan below `<sys_root>/class/hwmon`.
pub fn read_fans(sys_root: &Path) -> Vec<FanReading> {
    let mut out = Vec::new();
    for dir in hwmon_dirs(sys_root) {
        let chip = read_trimmed(&dir.join("name")).unwrap_or_default();
        let mut inputs = fan_inputs(&dir);
        // Some drivers keep the attributes one level down.
        if inputs.is_empty() {
            inputs = fan_inputs(&dir.join("device"));
        }
        for (base, input) in inputs {
            let Some(rpm) = read_number(&input) else {
                continue;
            };
            let label_path = input.with_file_name(format!("{base}_label"));
            let label = read_trimmed(&label_path).unwrap_or_else(|| base.clone());
            out.push(FanReading {
                chip: chip.clone(),
                label,
                rpm,
            });
        }
    }
    out
}

fn hwmon_dirs(sys_root: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(sys_root.join("class/hwmon")) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("hwmon"))
        })
        .collect();
    dirs.sort();
    dirs
}

/// `(fanN, path to fanN_input)` pairs in `dir`, sorted by name.
fn fan_inputs(dir: &Path) -> Vec<(String, PathBuf)> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut inputs: Vec<(String, PathBuf)> = entries
        .flatten()
        .filter_map(|e| {
            let name = e.file_name().to_str()?.to_string();
            let base = name.strip_suffix("_input")?;
            base.starts_with("fan").then(|| (base.to_string(), e.path()))
        })
        .collect();
    inputs.sort();
    inputs
}

/// DRM cards below `<sys_root>/class/drm`, in card order.
///
/// NVIDIA cards are skipped when `skip_nvidia` is set, since `nvidia-smi`
/// already reports them with richer data.
pub fn list_drm_gpus(sys_root: &Path, skip_nvidia: bool) -> Vec<GpuDevice> {
    let Ok(entries) = fs::read_dir(sys_root.join("class/drm")) else {
        return Vec::new();
    };
    let mut cards: Vec<(u32, PathBuf)> = entries
        .flatten()
        .filter_map(|e| {
            let name = e.file_name().to_str()?.to_string();
            let index = name.strip_prefix("card")?.parse::<u32>().ok()?;
            Some((index, e.path()))
        })
        .collect();
    cards.sort();

    cards
        .into_iter()
        .filter_map(|(index, card)| {
            let device = card.join("device");
            let vendor = match read_trimmed(&device.join("vendor"))?.to_ascii_lowercase().as_str() {
                VENDOR_NVIDIA if skip_nvidia => return None,
                VENDOR_NVIDIA => GpuVendor::Nvidia,
                VENDOR_AMD => GpuVendor::Amd,
                VENDOR_INTEL => GpuVendor::Intel,
                _ => return None,
            };
            let name = read_trimmed(&device.join("product_name"))
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| format!("{vendor:?} card{index}"));
            let has_core_load = device.join("gpu_busy_percent").exists();
            Some(GpuDevice::new(
                name,
                vendor,
                card.to_string_lossy(),
                has_core_load,
            ))
        })
        .collect()
}

/// Readings of one DRM card; unreadable attributes are the sentinel.
#[derive(Debug, Clone, PartialEq)]
pub struct DrmReading {
    pub load_pct: f64,
    pub vram_used_mb: f64,
    pub vram_total_mb: f64,
    pub temperature_c: f64,
    pub clock_mhz: f64,
    pub fan_rpm: f64,
}

pub fn read_drm_gpu(card: &Path) -> DrmReading {
    let device = card.join("device");
    let hwmon = first_hwmon(&device);
    let mb = |file: &str| {
        read_number(&device.join(file))
            .map(|b| b / 1024.0 / 1024.0)
            .unwrap_or(SENTINEL)
    };

    DrmReading {
        load_pct: read_number(&device.join("gpu_busy_percent")).unwrap_or(SENTINEL),
        vram_used_mb: mb("mem_info_vram_used"),
        vram_total_mb: mb("mem_info_vram_total"),
        temperature_c: hwmon
            .as_ref()
            .and_then(|h| read_number(&h.join("temp1_input")))
            .map(|milli| milli / 1000.0)
            .unwrap_or(SENTINEL),
        clock_mhz: fs::read_to_string(device.join("pp_dpm_sclk"))
            .ok()
            .and_then(|s| active_dpm_level_mhz(&s))
            .unwrap_or(SENTINEL),
        fan_rpm: hwmon
            .as_ref()
            .and_then(|h| read_number(&h.join("fan1_input")))
            .unwrap_or(SENTINEL),
    }
}

fn first_hwmon(device: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(device.join("hwmon")).ok()?;
    let mut dirs: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
    dirs.sort();
    dirs.into_iter().next()
}

/// The level marked with `*` in a `pp_dpm_sclk` table, e.g. `1: 1800Mhz *`.
fn active_dpm_level_mhz(table: &str) -> Option<f64> {
    let line = table.lines().find(|l| l.trim_end().ends_with('*'))?;
    let (_, value) = line.split_once(':')?;
    let value = value.trim().trim_end_matches('*').trim();
    let digits = value.trim_end_matches(|c: char| c.is_ascii_alphabetic());
    parse_f64_loose(digits)
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

fn read_number(path: &Path) -> Option<f64> {
    read_trimmed(path)
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 0.0)
}
