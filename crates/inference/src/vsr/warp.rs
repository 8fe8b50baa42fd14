use {
    super::ops::ensure_float,
    candle_core::{DType, Error, Result, Tensor},
    std::fmt,
};

/// Flow gain of published SOF-VSR checkpoints: their sampler normalises the
/// grid by `(size - 1)` and then scales flow by 31 in `[-1, 1]` space, which
/// is 15.5 pixels per flow unit.
pub const SOF_FLOW_GAIN: f64 = 15.5;

/// Motion-compensation operator.
///
/// `image` is `[b, c, h, w]`, `flow` is `[b, 2, h, w]` with channel 0 the
/// horizontal and channel 1 the vertical displacement. Output pixel `(x, y)`
/// is read from the image at the displaced position.
pub trait Warp: Send + Sync + fmt::Debug {
    fn warp(&self, image: &Tensor, flow: &Tensor) -> Result<Tensor>;
}

/// Backward warp with bilinear sampling and border padding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BilinearWarp {
    /// Pixels of displacement per flow unit.
    pub gain: f64,
}

impl Default for BilinearWarp {
    fn default() -> Self {
        Self {
            gain: SOF_FLOW_GAIN,
        }
    }
}

impl BilinearWarp {
    pub fn new(gain: f64) -> Self {
        Self { gain }
    }

    /// Flow measured directly in pixels.
    pub fn pixels() -> Self {
        Self { gain: 1.0 }
    }
}

impl Warp for BilinearWarp {
    fn warp(&self, image: &Tensor, flow: &Tensor) -> Result<Tensor> {
        ensure_float(image, "warp image")?;
        let (b, c, h, w) = image.dims4()?;
        let (fb, fc, fh, fw) = flow.dims4()?;
        if (fb, fc, fh, fw) != (b, 2, h, w) {
            return Err(Error::Msg(format!(
                "warp: flow {:?} does not match image {:?}",
                flow.dims(),
                image.dims()
            )));
        }
        let device = image.device();
        let dtype = image.dtype();
        let max_x = (w - 1) as f64;
        let max_y = (h - 1) as f64;

        // positions stay in f32: half precision loses integers past 2048
        let flow = flow.to_dtype(DType::F32)?;
        let grid_x = Tensor::arange(0u32, w as u32, device)?
            .to_dtype(DType::F32)?
            .reshape((1, 1, w))?;
        let grid_y = Tensor::arange(0u32, h as u32, device)?
            .to_dtype(DType::F32)?
            .reshape((1, h, 1))?;

        // sample positions [b, h, w], clamped to the border
        let sx = flow
            .narrow(1, 0, 1)?
            .squeeze(1)?
            .affine(self.gain, 0.0)?
            .broadcast_add(&grid_x)?
            .clamp(0.0, max_x)?;
        let sy = flow
            .narrow(1, 1, 1)?
            .squeeze(1)?
            .affine(self.gain, 0.0)?
            .broadcast_add(&grid_y)?
            .clamp(0.0, max_y)?;

        // integer corners carry no gradient
        let x0 = sx.detach().floor()?;
        let y0 = sy.detach().floor()?;
        let x1 = x0.affine(1.0, 1.0)?.clamp(0.0, max_x)?;
        let y1 = y0.affine(1.0, 1.0)?.clamp(0.0, max_y)?;

        let fx = sx.sub(&x0)?;
        let fy = sy.sub(&y0)?;
        let gx = fx.affine(-1.0, 1.0)?;
        let gy = fy.affine(-1.0, 1.0)?;

        let stride = Tensor::full(w as u32, (b, h, w), device)?;
        let flat = image.reshape((b, c, h * w))?.contiguous()?;
        let corner = |xi: &Tensor, yi: &Tensor, weight: Tensor| -> Result<Tensor> {
            let index = yi
                .to_dtype(DType::U32)?
                .mul(&stride)?
                .add(&xi.to_dtype(DType::U32)?)?
                .reshape((b, 1, h * w))?
                .broadcast_as((b, c, h * w))?
                .contiguous()?;
            let weight = weight.to_dtype(dtype)?.reshape((b, 1, h * w))?;
            flat.gather(&index, 2)?.broadcast_mul(&weight)
        };

        corner(&x0, &y0, gx.mul(&gy)?)?
            .add(&corner(&x1, &y0, fx.mul(&gy)?)?)?
            .add(&corner(&x0, &y1, gx.mul(&fy)?)?)?
            .add(&corner(&x1, &y1, fx.mul(&fy)?)?)?
            .reshape((b, c, h, w))
    }
}
