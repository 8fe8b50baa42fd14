use {
    crate::InferError,
    serde::{Deserialize, Serialize},
    std::path::Path,
};

pub const SUPPORTED_SCALES: [usize; 4] = [1, 2, 3, 4];

/// Width of the shared upsampler tail in both networks.
pub const UPSAMPLER_CHANNELS: usize = 64;

/// Residual shuffle blocks in the flow estimator and the SR network.
pub const FLOW_RES_BLOCKS: usize = 3;
pub const SR_RES_BLOCKS: usize = 8;

/// SOF-VSR model configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct VsrConfig {
    /// Upscaling factor, one of `SUPPORTED_SCALES`.
    pub scale: usize,
    /// Frames per temporal window, centre included.
    pub n_frames: usize,
    /// Feature width of the residual trunks.
    pub channels: usize,
}

impl Default for VsrConfig {
    fn default() -> Self {
        Self {
            scale: 4,
            n_frames: 3,
            channels: 320,
        }
    }
}

impl VsrConfig {
    pub fn new(scale: usize, n_frames: usize, channels: usize) -> Self {
        Self {
            scale,
            n_frames,
            channels,
        }
    }

    /// Read a JSON config file; absent fields keep their defaults.
    pub fn from_json(path: impl AsRef<Path>) -> Result<Self, InferError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), InferError> {
        if !SUPPORTED_SCALES.contains(&self.scale) {
            return Err(InferError::Config(format!(
                "unsupported scale {}, expected one of {:?}",
                self.scale, SUPPORTED_SCALES
            )));
        }
        if self.n_frames < 2 {
            return Err(InferError::Config(format!(
                "n_frames must be at least 2, got {}",
                self.n_frames
            )));
        }
        if self.channels == 0 || self.channels % 2 != 0 {
            return Err(InferError::Config(format!(
                "channels must be even and non-zero, got {}",
                self.channels
            )));
        }
        Ok(())
    }

    /// Index of the reference frame inside a window.
    pub fn center(&self) -> usize {
        (self.n_frames - 1) / 2
    }

    pub fn neighbours(&self) -> usize {
        self.n_frames - 1
    }

    /// Frames needed after the centre before a window is complete.
    pub fn lookahead(&self) -> usize {
        self.n_frames - 1 - self.center()
    }

    /// Channel count of the draft cube fed to the SR network.
    pub fn draft_channels(&self) -> usize {
        1 + self.neighbours() * self.scale * self.scale
    }
}
