use {
    super::{
        blocks::{CasResB, Upsampler, conv_same},
        config::{FLOW_RES_BLOCKS, UPSAMPLER_CHANNELS},
        ops::{LEAKY_SLOPE, leaky_relu, resize_bilinear, zeros_like_planes},
        warp::Warp,
    },
    candle_core::{Error, Result, Tensor},
    candle_nn::{Conv2d, Module, VarBuilder},
    std::sync::Arc,
};

/// Flow fields of one frame pair at the three refinement levels.
#[derive(Debug, Clone)]
pub struct FlowPyramid {
    /// `[b, 2, h/2, w/2]`
    pub coarse: Tensor,
    /// `[b, 2, h, w]`
    pub medium: Tensor,
    /// `[b, 2, h*s, w*s]`
    pub fine: Tensor,
}

impl FlowPyramid {
    /// Select rows `start..start+len` of every level.
    pub fn narrow_batch(&self, start: usize, len: usize) -> Result<Self> {
        Ok(Self {
            coarse: self.coarse.narrow(0, start, len)?,
            medium: self.medium.narrow(0, start, len)?,
            fine: self.fine.narrow(0, start, len)?,
        })
    }
}

/// Coarse-to-fine optical flow network (OFRnet).
///
/// One recurrent trunk (`RNN1` + `RNN2`) is shared by the half-resolution and
/// full-resolution stages; the last stage reuses `RNN1` and predicts a
/// super-resolved flow through its own upsampling head.
#[derive(Debug)]
pub struct FlowEstimator {
    rnn1_conv: Conv2d,
    rnn1_trunk: CasResB,
    rnn2: Conv2d,
    sr_trunk: CasResB,
    sr_up: Upsampler,
    sr_out: Conv2d,
    scale: usize,
    warp: Arc<dyn Warp>,
}

impl FlowEstimator {
    pub fn load(vb: VarBuilder, scale: usize, channels: usize, warp: Arc<dyn Warp>) -> Result<Self> {
        let rnn1_conv = conv_same(vb.pp("RNN1.0"), 4, channels, 3)?;
        let rnn1_trunk = CasResB::load(vb.pp("RNN1.2"), FLOW_RES_BLOCKS, channels)?;
        let rnn2 = conv_same(vb.pp("RNN2.0"), channels, 2, 3)?;

        let sr = vb.pp("SR");
        let sr_trunk = CasResB::load(sr.pp("0"), FLOW_RES_BLOCKS, channels)?;
        let (sr_up, next) = Upsampler::load(sr.clone(), scale, channels, 1)?;
        let sr_out = conv_same(sr.pp(next.to_string()), UPSAMPLER_CHANNELS, 2, 3)?;

        Ok(Self {
            rnn1_conv,
            rnn1_trunk,
            rnn2,
            sr_trunk,
            sr_up,
            sr_out,
            scale,
            warp,
        })
    }

    fn rnn1(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = leaky_relu(&xs.apply(&self.rnn1_conv)?, LEAKY_SLOPE)?;
        self.rnn1_trunk.forward(&xs)
    }

    fn sr_head(&self, xs: &Tensor) -> Result<Tensor> {
        xs.apply(&self.sr_trunk)?
            .apply(&self.sr_up)?
            .apply(&self.sr_out)
    }

    /// Estimate flow from channel 0 (neighbour) towards channel 1 (centre)
    /// of `pairs`, shaped `[n, 2, h, w]`.
    pub fn forward(&self, pairs: &Tensor) -> Result<FlowPyramid> {
        let (_n, c, h, w) = pairs.dims4()?;
        if c != 2 {
            return Err(Error::Msg(format!(
                "flow estimator expects frame pairs with 2 channels, got {c}"
            )));
        }
        if h < 2 || w < 2 {
            return Err(Error::Msg(format!(
                "flow estimator needs at least 2x2 frames, got {h}x{w}"
            )));
        }
        let neighbour = pairs.narrow(1, 0, 1)?;
        let centre = pairs.narrow(1, 1, 1)?;

        // Stage 1: half resolution, starting from zero flow.
        let half = pairs.avg_pool2d(2)?;
        let input = Tensor::cat(&[&half, &zeros_like_planes(&half, 2)?], 1)?;
        let coarse = self.rnn1(&input)?.apply(&self.rnn2)?;

        // Stage 2: full resolution residual on top of the upsampled coarse flow.
        // Resized to exactly h x w so odd frame sizes line up.
        let coarse_up = resize_bilinear(&coarse, h, w)?.affine(2.0, 0.0)?;
        let warped = self.warp.warp(&neighbour, &coarse_up)?;
        let input = Tensor::cat(&[&warped, &centre, &coarse_up], 1)?;
        let medium = self.rnn1(&input)?.apply(&self.rnn2)?.add(&coarse_up)?;

        // Stage 3: super-resolved flow.
        let s = self.scale;
        let warped = self.warp.warp(&neighbour, &medium)?;
        let input = Tensor::cat(&[&warped, &centre, &medium], 1)?;
        let medium_up = resize_bilinear(&medium, h * s, w * s)?.affine(s as f64, 0.0)?;
        let fine = self.sr_head(&self.rnn1(&input)?)?.add(&medium_up)?;

        Ok(FlowPyramid {
            coarse,
            medium,
            fine,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vsr::warp::BilinearWarp;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn estimator(scale: usize) -> (VarMap, FlowEstimator) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = FlowEstimator::load(vb, scale, 8, Arc::new(BilinearWarp::default())).unwrap();
        (varmap, model)
    }

    #[test]
    fn test_pyramid_shapes() {
        for scale in [1, 2, 3, 4] {
            let (_varmap, model) = estimator(scale);
            let pairs = Tensor::rand(0f32, 1.0, (3, 2, 8, 6), &Device::Cpu).unwrap();
            let flows = model.forward(&pairs).unwrap();
            assert_eq!(flows.coarse.dims(), &[3, 2, 4, 3]);
            assert_eq!(flows.medium.dims(), &[3, 2, 8, 6]);
            assert_eq!(flows.fine.dims(), &[3, 2, 8 * scale, 6 * scale]);
        }
    }

    #[test]
    fn test_odd_frame_size() {
        let (_varmap, model) = estimator(2);
        let pairs = Tensor::rand(0f32, 1.0, (1, 2, 7, 9), &Device::Cpu).unwrap();
        let flows = model.forward(&pairs).unwrap();
        assert_eq!(flows.coarse.dims(), &[1, 2, 3, 4]);
        assert_eq!(flows.medium.dims(), &[1, 2, 7, 9]);
        assert_eq!(flows.fine.dims(), &[1, 2, 14, 18]);
    }

    #[test]
    fn test_rejects_wrong_channels_and_tiny_frames() {
        let (_varmap, model) = estimator(2);
        let three = Tensor::zeros((1, 3, 8, 8), DType::F32, &Device::Cpu).unwrap();
        assert!(model.forward(&three).is_err());
        let tiny = Tensor::zeros((1, 2, 1, 8), DType::F32, &Device::Cpu).unwrap();
        assert!(model.forward(&tiny).is_err());
    }

    #[test]
    fn test_parameter_layout_scale4() {
        let (varmap, _model) = estimator(4);
        let data = varmap.data().lock().unwrap();
        for key in [
            "RNN1.0.weight",
            "RNN1.2.body.2.body.3.weight",
            "RNN2.0.weight",
            "SR.0.body.0.body.0.weight",
            "SR.1.weight",
            "SR.4.weight",
            "SR.7.weight",
        ] {
            assert!(data.contains_key(key), "missing {key}");
        }
        assert_eq!(data["RNN1.0.weight"].dims(), &[8, 4, 3, 3]);
        assert_eq!(data["SR.7.weight"].dims(), &[2, 64, 3, 3]);
    }

    #[test]
    fn test_medium_flow_adds_doubled_coarse_flow() {
        let (varmap, model) = estimator(2);
        {
            let data = varmap.data().lock().unwrap();
            for var in data.values() {
                var.set(&var.as_tensor().zeros_like().unwrap()).unwrap();
            }
            // RNN1 copies input channel 0 (the neighbour plane) into feature 0,
            // which every shuffle block passes through; RNN2 emits it as u.
            let tap = |out_c: usize, in_c: usize| {
                let mut w = vec![0f32; out_c * in_c * 9];
                w[4] = 1.0;
                Tensor::from_vec(w, (out_c, in_c, 3, 3), &Device::Cpu).unwrap()
            };
            data["RNN1.0.weight"].set(&tap(8, 4)).unwrap();
            data["RNN2.0.weight"].set(&tap(2, 8)).unwrap();
        }

        // constant neighbour: every warp of it returns the same value
        let neighbour = Tensor::full(0.1f32, (1, 1, 4, 4), &Device::Cpu).unwrap();
        let centre = Tensor::full(0.5f32, (1, 1, 4, 4), &Device::Cpu).unwrap();
        let pairs = Tensor::cat(&[&neighbour, &centre], 1).unwrap();
        let flows = model.forward(&pairs).unwrap();

        let plane = |t: &Tensor, c: usize| -> Vec<f32> {
            t.narrow(1, c, 1).unwrap().flatten_all().unwrap().to_vec1().unwrap()
        };
        assert!(plane(&flows.coarse, 0).iter().all(|&u| (u - 0.1).abs() < 1e-6));
        // stage 2: rnn output 0.1 plus the upsampled coarse flow doubled to 0.2
        assert!(plane(&flows.medium, 0).iter().all(|&u| (u - 0.3).abs() < 1e-5));
        assert!(plane(&flows.medium, 1).iter().all(|&v| v.abs() < 1e-6));
    }

    #[test]
    fn test_zero_weights_give_zero_flow() {
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        let model = FlowEstimator::load(vb, 2, 8, Arc::new(BilinearWarp::default())).unwrap();
        let pairs = Tensor::rand(0f32, 1.0, (2, 2, 6, 6), &Device::Cpu).unwrap();
        let flows = model.forward(&pairs).unwrap();
        let total: f32 = flows.fine.abs().unwrap().sum_all().unwrap().to_scalar().unwrap();
        assert_eq!(total, 0.0);
    }
}
