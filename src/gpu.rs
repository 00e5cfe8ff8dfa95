//! GPU memory and utilization snapshots through NVML.
//!
//! Only compiled in with the `nvml` feature. Without it, or on a host with no
//! NVIDIA driver, every query returns `None` and reports simply omit the
//! GPU fields.

use serde::{Deserialize, Serialize};

const MIB: f64 = 1024.0 * 1024.0;

/// One reading of device 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpuStats {
    pub memory_used_mb: f64,
    pub memory_total_mb: f64,
    /// Percent of the last sample period the device was busy.
    pub utilization_percent: u32,
}

impl GpuStats {
    pub fn from_bytes(used: u64, total: u64, utilization_percent: u32) -> Self {
        Self {
            memory_used_mb: used as f64 / MIB,
            memory_total_mb: total as f64 / MIB,
            utilization_percent,
        }
    }
}

/// Current memory use and utilization of device 0.
pub fn sample() -> Option<GpuStats> {
    backend::sample()
}

/// Name of device 0.
pub fn device_name() -> Option<String> {
    backend::device_name()
}

#[cfg(feature = "nvml")]
mod backend {
    use nvml_wrapper::Nvml;
    use tracing::debug;

    use super::GpuStats;

    fn init() -> Option<Nvml> {
        match Nvml::init() {
            Ok(nvml) => Some(nvml),
            Err(e) => {
                debug!(error = %e, "NVML unavailable");
                None
            }
        }
    }

    pub fn sample() -> Option<GpuStats> {
        let nvml = init()?;
        let device = nvml.device_by_index(0).ok()?;
        let memory = device.memory_info().ok()?;
        let utilization = device.utilization_rates().ok()?;
        Some(GpuStats::from_bytes(memory.used, memory.total, utilization.gpu))
    }

    pub fn device_name() -> Option<String> {
        let nvml = init()?;
        nvml.device_by_index(0).ok()?.name().ok()
    }
}

#[cfg(not(feature = "nvml"))]
mod backend {
    use super::GpuStats;

    pub fn sample() -> Option<GpuStats> {
        None
    }

    pub fn device_name() -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_to_mebibytes() {
        let s = GpuStats::from_bytes(512 * 1024 * 1024, 16 * 1024 * 1024 * 1024, 37);
        assert_eq!(s.memory_used_mb, 512.0);
        assert_eq!(s.memory_total_mb, 16384.0);
        assert_eq!(s.utilization_percent, 37);
    }

    #[cfg(not(feature = "nvml"))]
    #[test]
    fn no_readings_without_nvml() {
        assert!(sample().is_none());
        assert!(device_name().is_none());
    }
}
