// Common model utilities

use anyhow::Result;
use candle_core::Device;
use std::path::Path;

/// Pick the compute device: CUDA when available, CPU otherwise.
pub fn get_device() -> Result<Device> {
    if candle_core::utils::cuda_is_available() {
        Ok(Device::new_cuda(0)?)
    } else {
        Ok(Device::Cpu)
    }
}

/// Short device name for status reporting.
pub fn device_label(device: &Device) -> &'static str {
    match device {
        Device::Cpu => "cpu",
        Device::Cuda(_) => "cuda",
        Device::Metal(_) => "metal",
    }
}

/// Render a parameter count with thousands separators, e.g. `1,111,946`.
pub fn format_param_count(count: usize) -> String {
    let digits = count.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Model persistence
pub trait Saveable {
    fn save(&self, path: &Path) -> Result<()>;
    fn load(path: &Path) -> Result<Self>
    where
        Self: Sized;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_param_count() {
        assert_eq!(format_param_count(0), "0");
        assert_eq!(format_param_count(999), "999");
        assert_eq!(format_param_count(1_000), "1,000");
        assert_eq!(format_param_count(1_111_946), "1,111,946");
    }

    #[test]
    fn test_device_label_cpu() {
        assert_eq!(device_label(&Device::Cpu), "cpu");
    }
}
