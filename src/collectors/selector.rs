use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
}

/// Stable identity of a GPU, valid across poll cycles.
///
/// `key` is backend specific: a sensor-tree identifier, an `nvidia-smi`
/// index or a DRM card path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuIdentity {
    pub name: String,
    pub vendor: GpuVendor,
    pub key: String,
}

/// A GPU as seen during enumeration.
#[derive(Debug, Clone, PartialEq)]
pub struct GpuDevice {
    pub identity: GpuIdentity,
    /// Whether the device exposes a "GPU Core"-class load sensor. Integrated
    /// APU graphics usually don't.
    pub has_core_load: bool,
}

impl GpuDevice {
    pub fn new(name: impl Into<String>, vendor: GpuVendor, key: impl Into<String>, has_core_load: bool) -> Self {
        Self {
            identity: GpuIdentity {
                name: name.into(),
                vendor,
                key: key.into(),
            },
            has_core_load,
        }
    }
}

/// Picks the GPU to report from an enumerated device list.
///
/// NVIDIA wins over AMD, which wins over Intel. With several AMD devices only
/// one exposing a core load sensor is accepted; if none does, nothing is
/// selected.
pub fn select_gpu(devices: &[GpuDevice]) -> Option<&GpuDevice> {
    match devices {
        [] => return None,
        [only] => return Some(only),
        _ => {}
    }

    let of = move |vendor: GpuVendor| devices.iter().filter(move |d| d.identity.vendor == vendor);

    if let Some(nvidia) = of(GpuVendor::Nvidia).next() {
        return Some(nvidia);
    }

    let amd_count = of(GpuVendor::Amd).count();
    if amd_count == 1 {
        return of(GpuVendor::Amd).next();
    }
    if amd_count > 1 {
        return of(GpuVendor::Amd).find(|d| d.has_core_load);
    }

    of(GpuVendor::Intel).next()
}

/// The Selected GPU Identity, evaluated at most once until a re-detect.
#[derive(Debug, Default)]
pub struct GpuSelection {
    evaluated: bool,
    selected: Option<GpuIdentity>,
}

impl GpuSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs device selection on first use and returns the cached identity.
    ///
    /// `enumerate` is only invoked when no evaluation happened yet.
    pub fn resolve_with<F>(&mut self, enumerate: F) -> Option<&GpuIdentity>
    where
        F: FnOnce() -> Vec<GpuDevice>,
    {
        if !self.evaluated {
            let devices = enumerate();
            self.selected = select_gpu(&devices).map(|d| d.identity.clone());
            self.evaluated = true;
            log_selection(&devices, self.selected.as_ref());
        }
        self.selected.as_ref()
    }

    pub fn current(&self) -> Option<&GpuIdentity> {
        self.selected.as_ref()
    }

    #[cfg(test)]
    pub fn is_evaluated(&self) -> bool {
        self.evaluated
    }

    /// Forgets the cached identity; the next `resolve_with` enumerates again.
    pub fn redetect(&mut self) {
        self.evaluated = false;
        self.selected = None;
    }
}

fn log_selection(devices: &[GpuDevice], selected: Option<&GpuIdentity>) {
    if devices.len() > 1 {
        let count = |v: GpuVendor| devices.iter().filter(|d| d.identity.vendor == v).count();
        warn!(
            total = devices.len(),
            amd = count(GpuVendor::Amd),
            nvidia = count(GpuVendor::Nvidia),
            intel = count(GpuVendor::Intel),
            "multiple GPUs found, picking one for stats"
        );
    }
    for d in devices {
        debug!(name = %d.identity.name, vendor = ?d.identity.vendor, key = %d.identity.key, core_load = d.has_core_load, "gpu candidate");
    }

    match selected {
        Some(gpu) => info!(name = %gpu.name, vendor = ?gpu.vendor, "GPU selected for stats"),
        None if devices.is_empty() => warn!("no supported GPU found"),
        None => warn!("no supported GPU found (no GPU with load sensor)"),
    }
}
