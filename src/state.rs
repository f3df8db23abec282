use serde::{Deserialize, Serialize};

/// Reserved "unreadable/unsupported" value for every numeric metric.
pub const SENTINEL: f64 = -1.0;
pub const SENTINEL_BYTES: i64 = -1;

/// One complete set of readings for a single poll cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "Cpu")]
    pub cpu: CpuStats,
    #[serde(rename = "Gpu")]
    pub gpu: GpuStats,
    #[serde(rename = "Memory")]
    pub memory: MemoryStats,
    #[serde(rename = "Disk")]
    pub disk: DiskStats,
    #[serde(rename = "Net")]
    pub net: NetStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuStats {
    pub percentage: f64,
    #[serde(rename = "frequency")]
    pub frequency_ghz: f64,
    #[serde(rename = "temperature")]
    pub temperature_c: f64,
    pub fan_rpm: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuStats {
    #[serde(rename = "is_available")]
    pub available: bool,
    #[serde(rename = "load")]
    pub load_pct: f64,
    #[serde(rename = "percentage")]
    pub mem_pct: f64,
    #[serde(rename = "used")]
    pub mem_used_mb: f64,
    #[serde(rename = "total")]
    pub mem_total_mb: f64,
    #[serde(rename = "free")]
    pub mem_free_mb: f64,
    #[serde(rename = "temperature")]
    pub temperature_c: f64,
    pub fan_rpm: f64,
    #[serde(rename = "frequency")]
    pub frequency_ghz: f64,
    pub fps: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub percentage: f64,
    #[serde(rename = "used")]
    pub used_bytes: i64,
    #[serde(rename = "free")]
    pub free_bytes: i64,
    #[serde(rename = "total")]
    pub total_bytes: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskStats {
    pub percentage: f64,
    #[serde(rename = "used")]
    pub used_bytes: i64,
    #[serde(rename = "free")]
    pub free_bytes: i64,
    #[serde(rename = "total")]
    pub total_bytes: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetStats {
    #[serde(rename = "upload_rate")]
    pub upload_rate_bps: f64,
    #[serde(rename = "uploaded")]
    pub uploaded_bytes: i64,
    #[serde(rename = "download_rate")]
    pub download_rate_bps: f64,
    #[serde(rename = "downloaded")]
    pub downloaded_bytes: i64,
}

/// Raw GPU reading as returned by a provider's `stats()`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpuReading {
    pub load_pct: f64,
    pub mem_pct: f64,
    pub mem_used_mb: f64,
    pub mem_total_mb: f64,
    pub temperature_c: f64,
}

impl GpuReading {
    pub const UNAVAILABLE: Self = Self {
        load_pct: SENTINEL,
        mem_pct: SENTINEL,
        mem_used_mb: SENTINEL,
        mem_total_mb: SENTINEL,
        temperature_c: SENTINEL,
    };
}

/// Raw network reading as returned by a provider's `stats()`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetReading {
    pub upload_rate_bps: f64,
    pub uploaded_bytes: i64,
    pub download_rate_bps: f64,
    pub downloaded_bytes: i64,
}

impl NetReading {
    pub const UNAVAILABLE: Self = Self {
        upload_rate_bps: SENTINEL,
        uploaded_bytes: SENTINEL_BYTES,
        download_rate_bps: SENTINEL,
        downloaded_bytes: SENTINEL_BYTES,
    };
}

impl CpuStats {
    pub const UNAVAILABLE: Self = Self {
        percentage: SENTINEL,
        frequency_ghz: SENTINEL,
        temperature_c: SENTINEL,
        fan_rpm: SENTINEL,
    };
}

impl GpuStats {
    pub const UNAVAILABLE: Self = Self {
        available: false,
        load_pct: SENTINEL,
        mem_pct: SENTINEL,
        mem_used_mb: SENTINEL,
        mem_total_mb: SENTINEL,
        mem_free_mb: SENTINEL,
        temperature_c: SENTINEL,
        fan_rpm: SENTINEL,
        frequency_ghz: SENTINEL,
        fps: SENTINEL,
    };
}

impl MemoryStats {
    pub const UNAVAILABLE: Self = Self {
        percentage: SENTINEL,
        used_bytes: SENTINEL_BYTES,
        free_bytes: SENTINEL_BYTES,
        total_bytes: SENTINEL_BYTES,
    };

    pub fn from_parts(percentage: f64, used_bytes: i64, free_bytes: i64) -> Self {
        Self {
            percentage,
            used_bytes,
            free_bytes,
            total_bytes: sum_bytes(used_bytes, free_bytes),
        }
    }
}

impl DiskStats {
    pub const UNAVAILABLE: Self = Self {
        percentage: SENTINEL,
        used_bytes: SENTINEL_BYTES,
        free_bytes: SENTINEL_BYTES,
        total_bytes: SENTINEL_BYTES,
    };

    pub fn from_parts(percentage: f64, used_bytes: i64, free_bytes: i64) -> Self {
        Self {
            percentage,
            used_bytes,
            free_bytes,
            total_bytes: sum_bytes(used_bytes, free_bytes),
        }
    }
}

impl NetStats {
    pub const UNAVAILABLE: Self = Self {
        upload_rate_bps: SENTINEL,
        uploaded_bytes: SENTINEL_BYTES,
        download_rate_bps: SENTINEL,
        downloaded_bytes: SENTINEL_BYTES,
    };
}

impl From<NetReading> for NetStats {
    fn from(r: NetReading) -> Self {
        Self {
            upload_rate_bps: r.upload_rate_bps,
            uploaded_bytes: r.uploaded_bytes,
            download_rate_bps: r.download_rate_bps,
            downloaded_bytes: r.downloaded_bytes,
        }
    }
}

/// `used + free`, or the sentinel when either side is unreadable.
pub fn sum_bytes(used: i64, free: i64) -> i64 {
    if used < 0 || free < 0 {
        return SENTINEL_BYTES;
    }
    used.saturating_add(free)
}

/// `total - used` for GPU memory, or the sentinel when either side is unreadable.
pub fn free_mb(total: f64, used: f64) -> f64 {
    if total < 0.0 || used < 0.0 {
        return SENTINEL;
    }
    total - used
}

/// Percentage of `part` in `whole`, sentinel when it can't be computed.
pub fn percent_of(part: f64, whole: f64) -> f64 {
    if part < 0.0 || whole <= 0.0 || !part.is_finite() || !whole.is_finite() {
        return SENTINEL;
    }
    part / whole * 100.0
}
