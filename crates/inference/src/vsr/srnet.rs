use {
    super::{
        blocks::{CasResB, Upsampler, conv_same},
        config::{SR_RES_BLOCKS, UPSAMPLER_CHANNELS},
        ops::{LEAKY_SLOPE, leaky_relu},
    },
    candle_core::{Result, Tensor},
    candle_nn::{Conv2d, Conv2dConfig, Module, VarBuilder, conv2d},
};

/// Fuses a draft cube into one super-resolved luma frame.
#[derive(Debug)]
pub struct SrNet {
    head: Conv2d,
    trunk: CasResB,
    up: Upsampler,
    tail: Conv2d,
}

impl SrNet {
    pub fn load(vb: VarBuilder, scale: usize, channels: usize, draft_channels: usize) -> Result<Self> {
        let body = vb.pp("body");
        let head = conv_same(body.pp("0"), draft_channels, channels, 3)?;
        let trunk = CasResB::load(body.pp("2"), SR_RES_BLOCKS, channels)?;
        let (up, next) = Upsampler::load(body.clone(), scale, channels, 3)?;
        // the only biased layer of the model
        let tail = conv2d(
            UPSAMPLER_CHANNELS,
            1,
            3,
            Conv2dConfig {
                padding: 1,
                ..Default::default()
            },
            body.pp(next.to_string()),
        )?;
        Ok(Self {
            head,
            trunk,
            up,
            tail,
        })
    }
}

impl Module for SrNet {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = leaky_relu(&xs.apply(&self.head)?, LEAKY_SLOPE)?;
        xs.apply(&self.trunk)?.apply(&self.up)?.apply(&self.tail)
    }
}
