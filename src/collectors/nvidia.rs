//! `nvidia-smi` queries for the OS-generic backend.

use crate::collectors::parse_f64_loose;
use crate::collectors::selector::{GpuDevice, GpuVendor};
use crate::state::SENTINEL;
use std::process::Command;

/// Prefix of selection keys for devices enumerated through `nvidia-smi`.
pub const KEY_PREFIX: &str = "nvidia-smi:";

/// One row of `nvidia-smi --query-gpu` output.
#[derive(Debug, Clone, PartialEq)]
pub struct NvidiaReading {
    pub load_pct: f64,
    pub mem_used_mb: f64,
    pub mem_total_mb: f64,
    pub temperature_c: f64,
    pub clock_mhz: f64,
}

pub fn list_devices() -> Vec<GpuDevice> {
    let Some(text) = run_nvidia_smi(&["--query-gpu=index,name", "--format=csv,noheader,nounits"]) else {
        return Vec::new();
    };
    parse_device_list(&text)
}

pub fn query(index: &str) -> Option<NvidiaReading> {
    let id = format!("--id={index}");
    let text = run_nvidia_smi(&[
        id.as_str(),
        "--query-gpu=utilization.gpu,memory.used,memory.total,temperature.gpu,clocks.gr",
        "--format=csv,noheader,nounits",
    ])?;
    text.lines().find_map(parse_reading)
}

fn parse_device_list(text: &str) -> Vec<GpuDevice> {
    text.lines()
        .filter_map(|line| {
            let (index, name) = line.split_once(',')?;
            let index = index.trim();
            if index.is_empty() || !index.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            Some(GpuDevice::new(
                name.trim(),
                GpuVendor::Nvidia,
                format!("{KEY_PREFIX}{index}"),
                true,
            ))
        })
        .collect()
}

fn parse_reading(line: &str) -> Option<NvidiaReading> {
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() < 5 {
        return None;
    }
    // Unsupported fields come back as "[N/A]" or "[Not Supported]".
    let field = |i: usize| parse_f64_loose(parts[i]).filter(|v| *v >= 0.0).unwrap_or(SENTINEL);
    Some(NvidiaReading {
        load_pct: field(0),
        mem_used_mb: field(1),
        mem_total_mb: field(2),
        temperature_c: field(3),
        clock_mhz: field(4),
    })
}

fn run_nvidia_smi(args: &[&str]) -> Option<String> {
    let output = Command::new("nvidia-smi").args(args).output().ok().or_else(|| {
        #[cfg(target_os = "windows")]
        {
            Command::new(r"C:\Windows\System32\nvidia-smi.exe")
                .args(args)
                .output()
                .ok()
        }
        #[cfg(not(target_os = "windows"))]
        {
            None
        }
    })?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout).ok()
}
