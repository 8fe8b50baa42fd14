// Building blocks shared by the flow estimator and the SR network.
// Parameter names follow the sequential layout of the published checkpoints.

use {
    super::{
        config::UPSAMPLER_CHANNELS,
        ops::{LEAKY_SLOPE, channel_shuffle, leaky_relu, pixel_shuffle},
    },
    candle_core::{Error, Result, Tensor},
    candle_nn::{Conv2d, Conv2dConfig, Module, VarBuilder, conv2d_no_bias},
};

fn conv_config(padding: usize, groups: usize) -> Conv2dConfig {
    Conv2dConfig {
        stride: 1,
        padding,
        groups,
        dilation: 1,
        ..Default::default()
    }
}

/// Bias-free `k x k` convolution with "same" padding.
pub fn conv_same(vb: VarBuilder, c1: usize, c2: usize, k: usize) -> Result<Conv2d> {
    conv2d_no_bias(c1, c2, k, conv_config(k / 2, 1), vb)
}

/// Residual shuffle block.
///
/// The first half of the channels passes through untouched, the second half
/// through a pointwise/depthwise/pointwise body; the halves are then
/// interleaved with a two-group channel shuffle.
#[derive(Debug)]
pub struct ResB {
    pw1: Conv2d,
    dw: Conv2d,
    pw2: Conv2d,
    half: usize,
}

impl ResB {
    pub fn load(vb: VarBuilder, channels: usize) -> Result<Self> {
        if channels < 2 || channels % 2 != 0 {
            return Err(Error::Msg(format!(
                "ResB needs an even channel count, got {channels}"
            )));
        }
        let half = channels / 2;
        let pw1 = conv2d_no_bias(half, half, 1, conv_config(0, 1), vb.pp("body.0"))?;
        let dw = conv2d_no_bias(half, half, 3, conv_config(1, half), vb.pp("body.2"))?;
        let pw2 = conv2d_no_bias(half, half, 1, conv_config(0, 1), vb.pp("body.3"))?;
        Ok(Self { pw1, dw, pw2, half })
    }
}

impl Module for ResB {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let passthrough = xs.narrow(1, 0, self.half)?;
        let body = xs.narrow(1, self.half, self.half)?.contiguous()?;
        let body = leaky_relu(&body.apply(&self.pw1)?, LEAKY_SLOPE)?;
        let body = body.apply(&self.dw)?.apply(&self.pw2)?;
        let body = leaky_relu(&body, LEAKY_SLOPE)?;
        channel_shuffle(&Tensor::cat(&[&passthrough, &body], 1)?, 2)
    }
}

/// Cascade of residual shuffle blocks.
#[derive(Debug)]
pub struct CasResB {
    blocks: Vec<ResB>,
}

impl CasResB {
    pub fn load(vb: VarBuilder, n: usize, channels: usize) -> Result<Self> {
        let blocks = (0..n)
            .map(|i| ResB::load(vb.pp(format!("body.{i}")), channels))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { blocks })
    }
}

impl Module for CasResB {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut xs = xs.clone();
        for block in &self.blocks {
            xs = xs.apply(block)?;
        }
        Ok(xs)
    }
}

#[derive(Debug)]
struct UpStage {
    conv: Conv2d,
    shuffle: usize,
}

/// Scale-dependent upsampling tail: 1x1 conv, pixel shuffle, LeakyReLU.
///
/// Always ends with `UPSAMPLER_CHANNELS` feature maps at `scale` times the
/// input resolution.
#[derive(Debug)]
pub struct Upsampler {
    stages: Vec<UpStage>,
}

impl Upsampler {
    /// Loads the tail starting at layer `first` of the enclosing sequential.
    /// Returns the upsampler and the index of the layer that follows it.
    pub fn load(vb: VarBuilder, scale: usize, channels: usize, first: usize) -> Result<(Self, usize)> {
        let c = UPSAMPLER_CHANNELS;
        // (in, out, shuffle)
        let plan: Vec<(usize, usize, usize)> = match scale {
            4 => vec![(channels, c * 4, 2), (c, c * 4, 2)],
            3 => vec![(channels, c * 9, 3)],
            2 => vec![(channels, c * 4, 2)],
            1 => vec![(channels, c, 1)],
            _ => return Err(Error::Msg(format!("unsupported upscaling factor {scale}"))),
        };

        let mut index = first;
        let mut stages = Vec::with_capacity(plan.len());
        for (c1, c2, shuffle) in plan {
            let conv = conv2d_no_bias(c1, c2, 1, conv_config(0, 1), vb.pp(index.to_string()))?;
            stages.push(UpStage { conv, shuffle });
            // conv, [pixel shuffle,] activation
            index += if shuffle > 1 { 3 } else { 2 };
        }
        Ok((Self { stages }, index))
    }
}

impl Module for Upsampler {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut xs = xs.clone();
        for stage in &self.stages {
            xs = pixel_shuffle(&xs.apply(&stage.conv)?, stage.shuffle)?;
            xs = leaky_relu(&xs, LEAKY_SLOPE)?;
        }
        Ok(xs)
    }
}
