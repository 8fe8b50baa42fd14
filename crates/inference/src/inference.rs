use {
    crate::{InferError, vsr::{VideoUpscaler, VsrConfig}},
    candle_core::Device,
    std::path::Path,
};

#[derive(Debug)]
pub struct Inference {
    device: Device,
}

impl Inference {
    pub fn cpu() -> Result<Self, InferError> {
        base::log_info!("Inference device: CPU");
        Ok(Self {
            device: Device::Cpu,
        })
    }

    #[cfg(feature = "cuda")]
    pub fn cuda(ordinal: usize) -> Result<Self, InferError> {
        let device = Device::new_cuda(ordinal)?;
        if device.is_cuda() {
            base::log_info!("Inference device: CUDA (ordinal {})", ordinal);
        } else {
            base::log_warn!(
                "Inference device: requested CUDA ordinal {} but device reports non-CUDA",
                ordinal
            );
        }
        Ok(Self { device })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Video upscaler with scale, window and width read from the weights file.
    pub fn use_video_upscaler(&self, model_path: impl AsRef<Path>) -> Result<VideoUpscaler, InferError> {
        VideoUpscaler::new(model_path, None, self.device.clone())
    }

    /// Video upscaler with an explicit configuration.
    pub fn use_video_upscaler_with(
        &self,
        model_path: impl AsRef<Path>,
        config: VsrConfig,
    ) -> Result<VideoUpscaler, InferError> {
        VideoUpscaler::new(model_path, Some(config), self.device.clone())
    }
}
