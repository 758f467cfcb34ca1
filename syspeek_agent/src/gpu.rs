// gpu.rs
use gfxinfo::active_gpu;
use nvml_wrapper::enum_wrappers::device::TemperatureSensor;
use nvml_wrapper::Nvml;
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use crate::types::GpuInfo;

// Runtime toggle (read once)
fn gpu_enabled() -> bool {
    static ON: OnceCell<bool> = OnceCell::new();
    *ON.get_or_init(|| {
        std::env::var("SYSPEEK_GPU")
            .map(|v| v != "0")
            .unwrap_or(true)
    })
}

// NVML is loaded once; a failed init is remembered as None.
fn nvml() -> Option<&'static Nvml> {
    static NVML: OnceCell<Option<Nvml>> = OnceCell::new();
    NVML.get_or_init(|| match Nvml::init() {
        Ok(n) => {
            info!("NVML initialised");
            Some(n)
        }
        Err(e) => {
            debug!("NVML unavailable: {e}");
            None
        }
    })
    .as_ref()
}

// Set after the first probe that found no adapter at all, so later calls
// don't rescan.
static NONE_FOUND: AtomicBool = AtomicBool::new(false);

fn from_nvml(nvml: &Nvml) -> Option<GpuInfo> {
    let device = nvml.device_by_index(0).ok()?;
    let (used, total, free) = device
        .memory_info()
        .map(|m| (m.used, m.total, m.free))
        .unwrap_or((0, 0, 0));
    Some(GpuInfo {
        available: true,
        name: device.name().unwrap_or_else(|_| "NVIDIA GPU".into()),
        driver: nvml.sys_driver_version().unwrap_or_default(),
        memory_total: total,
        memory_used: used,
        memory_free: free,
        usage_percent: device.utilization_rates().map(|u| u.gpu as f64).unwrap_or(0.0),
        temperature: device
            .temperature(TemperatureSensor::Gpu)
            .map(f64::from)
            .unwrap_or(0.0),
        power_draw: device.power_usage().map(|mw| mw as f64 / 1000.0).unwrap_or(0.0),
        power_limit: device
            .enforced_power_limit()
            .map(|mw| mw as f64 / 1000.0)
            .unwrap_or(0.0),
        fan_speed: device.fan_speed(0).unwrap_or(0),
    })
}

fn from_gfxinfo() -> Option<GpuInfo> {
    let gpu = active_gpu().ok()?;
    let info = gpu.info();
    let total = info.total_vram();
    let used = info.used_vram();
    Some(GpuInfo {
        available: true,
        name: gpu.model().to_string(),
        memory_total: total,
        memory_used: used,
        memory_free: total.saturating_sub(used),
        usage_percent: info.load_pct() as f64,
        ..Default::default()
    })
}

/// Current state of the primary GPU, or `available: false` if none is found.
pub fn probe() -> GpuInfo {
    if !gpu_enabled() || NONE_FOUND.load(Ordering::Relaxed) {
        return GpuInfo::default();
    }
    if let Some(info) = nvml().and_then(from_nvml) {
        return info;
    }
    match from_gfxinfo() {
        Some(info) => info,
        None => {
            if nvml().is_none() && !NONE_FOUND.swap(true, Ordering::Relaxed) {
                info!("no GPU detected; gpu payload reports unavailable");
            }
            GpuInfo::default()
        }
    }
}
