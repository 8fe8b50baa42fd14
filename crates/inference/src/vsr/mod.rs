// SOF-VSR video super-resolution: coarse-to-fine optical flow, draft-cube
// motion compensation and a residual shuffle SR network, on candle.

mod blocks;
mod config;
mod detect;
mod flow;
mod model;
mod ops;
mod srnet;
mod upscaler;
mod warp;

pub use blocks::{CasResB, ResB, Upsampler, conv_same};
pub use config::{FLOW_RES_BLOCKS, SR_RES_BLOCKS, SUPPORTED_SCALES, UPSAMPLER_CHANNELS, VsrConfig};
pub use detect::detect_config;
pub use flow::{FlowEstimator, FlowPyramid};
pub use model::{Sofvsr, VsrOutput};
pub use ops::{LEAKY_SLOPE, channel_shuffle, leaky_relu, pixel_shuffle, resize_bilinear, subsample};
pub use srnet::SrNet;
pub use upscaler::VideoUpscaler;
pub use warp::{BilinearWarp, SOF_FLOW_GAIN, Warp};
