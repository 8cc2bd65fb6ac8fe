use candle_core::Device;

/// Metal when compiled in and available, CPU otherwise.
pub fn select_device() -> Device {
    #[cfg(feature = "metal")]
    {
        if let Ok(dev) = Device::new_metal(0) {
            tracing::info!("device: metal");
            return dev;
        }
    }
    tracing::info!("device: cpu");
    Device::Cpu
}
