use {
    super::{
        config::VsrConfig,
        flow::{FlowEstimator, FlowPyramid},
        ops::subsample,
        srnet::SrNet,
        warp::{BilinearWarp, Warp},
    },
    crate::InferError,
    candle_core::Tensor,
    candle_nn::{Module, VarBuilder},
    std::sync::Arc,
};

/// Everything one forward pass produces.
#[derive(Debug, Clone)]
pub struct VsrOutput {
    /// One entry per input frame; `None` at the centre frame.
    pub flows: Vec<Option<FlowPyramid>>,
    /// Super-resolved centre frame, `[b, 1, h*s, w*s]`.
    pub sr: Tensor,
}

/// SOF-VSR: flow estimation, draft-cube motion compensation and SR fusion.
#[derive(Debug)]
pub struct Sofvsr {
    config: VsrConfig,
    ofr: FlowEstimator,
    sr: SrNet,
    warp: Arc<dyn Warp>,
}

impl Sofvsr {
    /// Build the model from `vb`. Parameters live under `OFR.*` and `SR.*`.
    pub fn load(vb: VarBuilder, config: VsrConfig, warp: Arc<dyn Warp>) -> Result<Self, InferError> {
        config.validate()?;
        let ofr = FlowEstimator::load(vb.pp("OFR"), config.scale, config.channels, Arc::clone(&warp))?;
        let sr = SrNet::load(vb.pp("SR"), config.scale, config.channels, config.draft_channels())?;
        Ok(Self {
            config,
            ofr,
            sr,
            warp,
        })
    }

    /// `load` with the bilinear warp used by published checkpoints.
    pub fn load_default(vb: VarBuilder, config: VsrConfig) -> Result<Self, InferError> {
        Self::load(vb, config, Arc::new(BilinearWarp::default()))
    }

    pub fn config(&self) -> &VsrConfig {
        &self.config
    }

    fn check_frames(&self, frames: &Tensor) -> Result<(usize, usize, usize), InferError> {
        let (b, n, c, h, w) = frames.dims5()?;
        if n != self.config.n_frames {
            return Err(InferError::Shape(format!(
                "expected {} frames per window, got {}",
                self.config.n_frames, n
            )));
        }
        if c != 1 {
            return Err(InferError::Shape(format!(
                "expected single-channel (luma) frames, got {c} channels"
            )));
        }
        if h < 2 || w < 2 {
            return Err(InferError::Shape(format!(
                "frames must be at least 2x2, got {h}x{w}"
            )));
        }
        Ok((b, h, w))
    }

    fn frame(frames: &Tensor, index: usize) -> Result<Tensor, InferError> {
        Ok(frames.narrow(1, index, 1)?.squeeze(1)?)
    }

    /// Indices of the neighbour frames in temporal order.
    fn neighbour_indices(&self) -> impl Iterator<Item = usize> + '_ {
        let center = self.config.center();
        (0..self.config.n_frames).filter(move |&i| i != center)
    }

    /// Pair every neighbour with the centre frame: `[b*(n-1), 2, h, w]`,
    /// neighbour on channel 0, neighbours stacked on the batch axis.
    pub fn pair_inputs(&self, frames: &Tensor) -> Result<Tensor, InferError> {
        self.check_frames(frames)?;
        let centre = Self::frame(frames, self.config.center())?;
        let pairs = self
            .neighbour_indices()
            .map(|i| -> Result<Tensor, InferError> {
                Ok(Tensor::cat(&[&Self::frame(frames, i)?, &centre], 1)?)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Tensor::cat(&pairs, 0)?)
    }

    /// Run the flow estimator once over all pairs and split the result per
    /// neighbour, in temporal order.
    pub fn estimate_flows(&self, frames: &Tensor) -> Result<Vec<FlowPyramid>, InferError> {
        let (b, _h, _w) = self.check_frames(frames)?;
        let stacked = self.ofr.forward(&self.pair_inputs(frames)?)?;
        (0..self.config.neighbours())
            .map(|k| stacked.narrow_batch(k * b, b).map_err(InferError::from))
            .collect()
    }

    /// Centre frame followed by `s*s` warped candidates per neighbour:
    /// `[b, 1 + (n-1)*s*s, h, w]`.
    pub fn draft_cube(&self, frames: &Tensor, flows: &[FlowPyramid]) -> Result<Tensor, InferError> {
        self.check_frames(frames)?;
        if flows.len() != self.config.neighbours() {
            return Err(InferError::Shape(format!(
                "expected {} flow pyramids, got {}",
                self.config.neighbours(),
                flows.len()
            )));
        }
        let s = self.config.scale;
        let mut cube = Vec::with_capacity(self.config.draft_channels());
        cube.push(Self::frame(frames, self.config.center())?);
        for (index, flow) in self.neighbour_indices().zip(flows) {
            let neighbour = Self::frame(frames, index)?;
            for i in 0..s {
                for j in 0..s {
                    let phase = subsample(&flow.fine, s, i, j)?.affine(1.0 / s as f64, 0.0)?;
                    cube.push(self.warp.warp(&neighbour, &phase)?);
                }
            }
        }
        Ok(Tensor::cat(&cube, 1)?)
    }

    /// Full pass over a window `[b, n, 1, h, w]`.
    pub fn forward(&self, frames: &Tensor) -> Result<VsrOutput, InferError> {
        let pyramids = self.estimate_flows(frames)?;
        let cube = self.draft_cube(frames, &pyramids)?;
        let sr = self.sr.forward(&cube)?;

        let center = self.config.center();
        let mut pyramids = pyramids.into_iter();
        let flows = (0..self.config.n_frames)
            .map(|i| if i == center { None } else { pyramids.next() })
            .collect();
        Ok(VsrOutput { flows, sr })
    }

    /// Super-resolved centre frame only.
    pub fn upscale(&self, frames: &Tensor) -> Result<Tensor, InferError> {
        Ok(self.forward(frames)?.sr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn model(config: VsrConfig) -> (VarMap, Sofvsr) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = Sofvsr::load_default(vb, config).unwrap();
        (varmap, model)
    }

    fn frames(n: usize, h: usize, w: usize) -> Tensor {
        Tensor::rand(0f32, 1.0, (1, n, 1, h, w), &Device::Cpu).unwrap()
    }

    #[test]
    fn test_forward_shapes() {
        let (_varmap, model) = model(VsrConfig::new(2, 3, 8));
        let output = model.forward(&frames(3, 6, 8)).unwrap();

        assert_eq!(output.sr.dims(), &[1, 1, 12, 16]);
        assert_eq!(output.flows.len(), 3);
        assert!(output.flows[1].is_none());
        for k in [0, 2] {
            let flow = output.flows[k].as_ref().unwrap();
            assert_eq!(flow.coarse.dims(), &[1, 2, 3, 4]);
            assert_eq!(flow.medium.dims(), &[1, 2, 6, 8]);
            assert_eq!(flow.fine.dims(), &[1, 2, 12, 16]);
        }
    }

    #[test]
    fn test_pair_inputs_order() {
        let (_varmap, model) = model(VsrConfig::new(1, 3, 8));
        // frame k filled with value k
        let frames = Tensor::arange(0f32, 3.0, &Device::Cpu)
            .unwrap()
            .reshape((1, 3, 1, 1, 1))
            .unwrap()
            .broadcast_as((1, 3, 1, 2, 2))
            .unwrap()
            .contiguous()
            .unwrap();
        let pairs = model.pair_inputs(&frames).unwrap();
        assert_eq!(pairs.dims(), &[2, 2, 2, 2]);
        let firsts: Vec<f32> = pairs.narrow(1, 0, 1).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        let centres: Vec<f32> = pairs.narrow(1, 1, 1).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(firsts, vec![0.0, 0.0, 0.0, 0.0, 2.0, 2.0, 2.0, 2.0]);
        assert!(centres.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_draft_cube_with_zero_flow_repeats_neighbours() {
        let (_varmap, model) = model(VsrConfig::new(2, 3, 8));
        let frames = frames(3, 4, 4);
        let zero = Tensor::zeros((1, 2, 8, 8), DType::F32, &Device::Cpu).unwrap();
        let flows: Vec<FlowPyramid> = (0..2)
            .map(|_| FlowPyramid {
                coarse: Tensor::zeros((1, 2, 2, 2), DType::F32, &Device::Cpu).unwrap(),
                medium: Tensor::zeros((1, 2, 4, 4), DType::F32, &Device::Cpu).unwrap(),
                fine: zero.clone(),
            })
            .collect();
        let cube = model.draft_cube(&frames, &flows).unwrap();
        assert_eq!(cube.dims(), &[1, 9, 4, 4]);

        let expect = |channel: usize, frame: usize| {
            let a = cube.narrow(1, channel, 1).unwrap();
            let b = frames.narrow(1, frame, 1).unwrap().squeeze(1).unwrap();
            let diff: f32 = a.sub(&b).unwrap().abs().unwrap().sum_all().unwrap().to_scalar().unwrap();
            assert!(diff < 1e-5, "channel {channel} should be frame {frame}");
        };
        expect(0, 1);
        for c in 1..5 {
            expect(c, 0);
        }
        for c in 5..9 {
            expect(c, 2);
        }
    }

    #[test]
    fn test_draft_cube_phase_order_and_scaling() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = Sofvsr::load(vb, VsrConfig::new(2, 3, 8), Arc::new(BilinearWarp::pixels())).unwrap();

        // frame k holds 16k + raster index
        let frames = Tensor::arange(0f32, 48.0, &Device::Cpu)
            .unwrap()
            .reshape((1, 3, 1, 4, 4))
            .unwrap();
        // horizontal flow = phase index i*s + j at every (i, j) = (y % 2, x % 2)
        let u: Vec<f32> = (0..64).map(|p| ((p / 8 % 2) * 2 + p % 8 % 2) as f32).collect();
        let u = Tensor::from_vec(u, (1, 1, 8, 8), &Device::Cpu).unwrap();
        let v = Tensor::zeros((1, 1, 8, 8), DType::F32, &Device::Cpu).unwrap();
        let fine = Tensor::cat(&[&u, &v], 1).unwrap();
        let flows: Vec<FlowPyramid> = (0..2)
            .map(|_| FlowPyramid {
                coarse: Tensor::zeros((1, 2, 2, 2), DType::F32, &Device::Cpu).unwrap(),
                medium: Tensor::zeros((1, 2, 4, 4), DType::F32, &Device::Cpu).unwrap(),
                fine: fine.clone(),
            })
            .collect();

        let cube = model.draft_cube(&frames, &flows).unwrap();
        let top_left: Vec<f32> = cube
            .narrow(2, 0, 1)
            .unwrap()
            .narrow(3, 0, 1)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        // centre, then per neighbour shifts of 0, 0.5, 1, 1.5 pixels
        assert_eq!(top_left, vec![16.0, 0.0, 0.5, 1.0, 1.5, 32.0, 32.5, 33.0, 33.5]);
    }

    #[test]
    fn test_even_window_uses_lower_center() {
        let (_varmap, model) = model(VsrConfig::new(1, 4, 8));
        let output = model.forward(&frames(4, 4, 4)).unwrap();
        let missing: Vec<usize> = output
            .flows
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_none())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(missing, vec![1]);
        assert_eq!(output.sr.dims(), &[1, 1, 4, 4]);
    }

    #[test]
    fn test_rejects_wrong_window() {
        let (_varmap, model) = model(VsrConfig::new(2, 3, 8));
        assert!(matches!(model.forward(&frames(5, 4, 4)), Err(InferError::Shape(_))));
        let rgb = Tensor::zeros((1, 3, 3, 4, 4), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(model.forward(&rgb), Err(InferError::Shape(_))));
    }

    #[test]
    fn test_rejects_invalid_config() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        assert!(matches!(
            Sofvsr::load_default(vb, VsrConfig::new(5, 3, 8)),
            Err(InferError::Config(_))
        ));
    }

    #[test]
    fn test_backward_reaches_all_parameters() {
        let (varmap, model) = model(VsrConfig::new(2, 3, 4));
        let output = model.forward(&frames(3, 4, 4)).unwrap();
        let loss = output.sr.sqr().unwrap().mean_all().unwrap();
        let grads = loss.backward().unwrap();
        for var in varmap.all_vars() {
            assert!(grads.get(var.as_tensor()).is_some());
        }
    }
}
