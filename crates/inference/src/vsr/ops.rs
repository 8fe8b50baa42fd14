// Tensor rearrangements and resampling shared by the SOF-VSR networks.
// Everything is composed from candle ops so gradients flow through.

use candle_core::{DType, Error, Result, Tensor};

pub const LEAKY_SLOPE: f64 = 0.1;

/// `max(x, slope * x)`, valid for `slope < 1`.
pub fn leaky_relu(xs: &Tensor, slope: f64) -> Result<Tensor> {
    xs.maximum(&xs.affine(slope, 0.0)?)
}

/// Interleave `groups` channel groups: `[b, g*k, h, w] -> [b, k*g, h, w]`.
///
/// Output channel `i * groups + g` is input channel `g * (c / groups) + i`.
pub fn channel_shuffle(xs: &Tensor, groups: usize) -> Result<Tensor> {
    let (b, c, h, w) = xs.dims4()?;
    if groups == 0 || c % groups != 0 {
        return Err(Error::Msg(format!(
            "channel_shuffle: {c} channels not divisible into {groups} groups"
        )));
    }
    xs.reshape((b, groups, c / groups, h, w))?
        .transpose(1, 2)?
        .contiguous()?
        .reshape((b, c, h, w))
}

/// Source indices and weights for 1-D linear resampling, half-pixel centres.
fn linear_taps(in_len: usize, out_len: usize) -> (Vec<u32>, Vec<u32>, Vec<f32>) {
    let ratio = in_len as f32 / out_len as f32;
    let mut lo = Vec::with_capacity(out_len);
    let mut hi = Vec::with_capacity(out_len);
    let mut frac = Vec::with_capacity(out_len);
    for o in 0..out_len {
        let src = ((o as f32 + 0.5) * ratio - 0.5).max(0.0);
        let i0 = (src.floor() as usize).min(in_len - 1);
        let i1 = (i0 + 1).min(in_len - 1);
        lo.push(i0 as u32);
        hi.push(i1 as u32);
        frac.push(src - i0 as f32);
    }
    (lo, hi, frac)
}

fn resample_axis(xs: &Tensor, dim: usize, out_len: usize) -> Result<Tensor> {
    let in_len = xs.dim(dim)?;
    if in_len == out_len {
        return Ok(xs.clone());
    }
    let device = xs.device();
    let (lo, hi, frac) = linear_taps(in_len, out_len);
    let lo = Tensor::from_vec(lo, out_len, device)?;
    let hi = Tensor::from_vec(hi, out_len, device)?;
    let mut weight_shape = vec![1usize; xs.rank()];
    weight_shape[dim] = out_len;
    let frac = Tensor::from_vec(frac, weight_shape, device)?.to_dtype(xs.dtype())?;

    let a = xs.index_select(&lo, dim)?;
    let b = xs.index_select(&hi, dim)?;
    // a + (b - a) * frac
    a.add(&b.sub(&a)?.broadcast_mul(&frac)?)
}

/// Bilinear resize of `[b, c, h, w]` to `[b, c, out_h, out_w]`.
///
/// Pixel centres sit at half-integer positions (no corner alignment); edges
/// are clamped. Matches `F.interpolate(mode="bilinear", align_corners=False)`.
pub fn resize_bilinear(xs: &Tensor, out_h: usize, out_w: usize) -> Result<Tensor> {
    let (_b, _c, h, w) = xs.dims4()?;
    if h == 0 || w == 0 || out_h == 0 || out_w == 0 {
        return Err(Error::Msg(format!(
            "resize_bilinear: cannot resize {h}x{w} to {out_h}x{out_w}"
        )));
    }
    let xs = resample_axis(xs, 2, out_h)?;
    resample_axis(&xs, 3, out_w)
}

/// Strided phase of a high-resolution field: `xs[:, :, i::scale, j::scale]`.
pub fn subsample(xs: &Tensor, scale: usize, i: usize, j: usize) -> Result<Tensor> {
    let (b, c, h, w) = xs.dims4()?;
    if scale == 0 || h % scale != 0 || w % scale != 0 || i >= scale || j >= scale {
        return Err(Error::Msg(format!(
            "subsample: {h}x{w} field, scale {scale}, phase ({i}, {j})"
        )));
    }
    let (lh, lw) = (h / scale, w / scale);
    xs.reshape((b, c, lh, scale, lw, scale))?
        .narrow(3, i, 1)?
        .narrow(5, j, 1)?
        .reshape((b, c, lh, lw))
}

/// `[b, c*r*r, h, w] -> [b, c, h*r, w*r]`.
pub fn pixel_shuffle(xs: &Tensor, factor: usize) -> Result<Tensor> {
    if factor == 1 {
        return Ok(xs.clone());
    }
    candle_nn::ops::pixel_shuffle(xs, factor)
}

/// All-zero tensor shaped like `[b, c, h, w]` of `like`'s dtype and device.
pub fn zeros_like_planes(like: &Tensor, c: usize) -> Result<Tensor> {
    let (b, _c, h, w) = like.dims4()?;
    Tensor::zeros((b, c, h, w), like.dtype(), like.device())
}

pub(crate) fn ensure_float(xs: &Tensor, what: &str) -> Result<()> {
    match xs.dtype() {
        DType::F16 | DType::BF16 | DType::F32 | DType::F64 => Ok(()),
        dtype => Err(Error::Msg(format!("{what}: expected float tensor, got {dtype:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn ramp(shape: (usize, usize, usize, usize)) -> Tensor {
        let n = shape.0 * shape.1 * shape.2 * shape.3;
        Tensor::arange(0f32, n as f32, &Device::Cpu)
            .unwrap()
            .reshape(shape)
            .unwrap()
    }

    #[test]
    fn test_leaky_relu() {
        let xs = Tensor::new(&[-2f32, -0.5, 0.0, 3.0], &Device::Cpu).unwrap();
        let ys: Vec<f32> = leaky_relu(&xs, LEAKY_SLOPE).unwrap().to_vec1().unwrap();
        let expected = [-0.2f32, -0.05, 0.0, 3.0];
        for (y, e) in ys.iter().zip(expected) {
            assert!((y - e).abs() < 1e-6);
        }
    }

    #[test]
    fn test_channel_shuffle_interleaves_halves() {
        // channel k holds value k
        let xs = Tensor::arange(0f32, 6.0, &Device::Cpu)
            .unwrap()
            .reshape((1, 6, 1, 1))
            .unwrap();
        let ys: Vec<f32> = channel_shuffle(&xs, 2).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(ys, vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
    }

    #[test]
    fn test_channel_shuffle_rejects_indivisible() {
        let xs = ramp((1, 5, 2, 2));
        assert!(channel_shuffle(&xs, 2).is_err());
    }

    #[test]
    fn test_resize_same_size_is_identity() {
        let xs = ramp((1, 2, 3, 5));
        let ys = resize_bilinear(&xs, 3, 5).unwrap();
        let diff: f32 = xs.sub(&ys).unwrap().abs().unwrap().sum_all().unwrap().to_scalar().unwrap();
        assert_eq!(diff, 0.0);
    }

    #[test]
    fn test_resize_upscale_row() {
        // [0, 1] upscaled x2 with half-pixel centres -> [0, 0.25, 0.75, 1]
        let xs = Tensor::new(&[0f32, 1.0], &Device::Cpu).unwrap().reshape((1, 1, 1, 2)).unwrap();
        let ys: Vec<f32> = resize_bilinear(&xs, 1, 4).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        let expected = [0.0f32, 0.25, 0.75, 1.0];
        for (y, e) in ys.iter().zip(expected) {
            assert!((y - e).abs() < 1e-6, "{ys:?}");
        }
    }

    #[test]
    fn test_resize_downscale_averages_pairs() {
        let xs = Tensor::new(&[0f32, 2.0, 4.0, 6.0], &Device::Cpu).unwrap().reshape((1, 1, 1, 4)).unwrap();
        let ys: Vec<f32> = resize_bilinear(&xs, 1, 2).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(ys, vec![1.0, 5.0]);
    }

    #[test]
    fn test_resize_odd_target() {
        let xs = ramp((2, 2, 3, 3));
        let ys = resize_bilinear(&xs, 7, 5).unwrap();
        assert_eq!(ys.dims(), &[2, 2, 7, 5]);
    }

    #[test]
    fn test_subsample_picks_phase() {
        let xs = ramp((1, 1, 4, 4));
        let ys: Vec<f32> = subsample(&xs, 2, 1, 0).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        // rows 1 and 3, columns 0 and 2
        assert_eq!(ys, vec![4.0, 6.0, 12.0, 14.0]);
    }

    #[test]
    fn test_subsample_rejects_bad_phase() {
        let xs = ramp((1, 1, 4, 4));
        assert!(subsample(&xs, 2, 2, 0).is_err());
        assert!(subsample(&xs, 3, 0, 0).is_err());
    }

    #[test]
    fn test_pixel_shuffle_shape() {
        let xs = ramp((1, 8, 3, 5));
        let ys = pixel_shuffle(&xs, 2).unwrap();
        assert_eq!(ys.dims(), &[1, 2, 6, 10]);
    }
}
