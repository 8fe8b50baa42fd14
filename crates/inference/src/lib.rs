pub mod error;
pub mod inference;
pub mod vsr;

pub use error::InferError;
pub use inference::Inference;
pub use vsr::{BilinearWarp, FlowPyramid, Sofvsr, VideoUpscaler, VsrConfig, VsrOutput, Warp, detect_config};
