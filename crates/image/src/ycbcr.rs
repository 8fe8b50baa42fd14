// Full-range BT.601 (JFIF) conversion between packed RGB8 and planar YCbCr in [0, 1].

/// Planar YCbCr, one `f32` plane per component, values in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct YCbCrPlanes {
    pub y: Vec<f32>,
    pub cb: Vec<f32>,
    pub cr: Vec<f32>,
}

pub fn rgb_to_ycbcr(data: &[u8]) -> YCbCrPlanes {
    let pixels = data.len() / 3;
    let mut planes = YCbCrPlanes {
        y: Vec::with_capacity(pixels),
        cb: Vec::with_capacity(pixels),
        cr: Vec::with_capacity(pixels),
    };
    for px in data.chunks_exact(3) {
        let (r, g, b) = (px[0] as f32, px[1] as f32, px[2] as f32);
        planes.y.push((0.299 * r + 0.587 * g + 0.114 * b) / 255.0);
        planes.cb.push((128.0 - 0.168736 * r - 0.331264 * g + 0.5 * b) / 255.0);
        planes.cr.push((128.0 + 0.5 * r - 0.418688 * g - 0.081312 * b) / 255.0);
    }
    planes
}

pub fn ycbcr_to_rgb(planes: &YCbCrPlanes) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(planes.y.len() * 3);
    for ((&y, &cb), &cr) in planes.y.iter().zip(&planes.cb).zip(&planes.cr) {
        let y = y * 255.0;
        let cb = cb * 255.0 - 128.0;
        let cr = cr * 255.0 - 128.0;
        rgb.push(to_u8(y + 1.402 * cr));
        rgb.push(to_u8(y - 0.344136 * cb - 0.714136 * cr));
        rgb.push(to_u8(y + 1.772 * cb));
    }
    rgb
}

/// Quantize a `[0, 1]` plane to bytes.
pub fn plane_to_u8(plane: &[f32]) -> Vec<u8> {
    plane.iter().map(|&v| to_u8(v * 255.0)).collect()
}

/// Expand bytes to a `[0, 1]` plane.
pub fn u8_to_plane(data: &[u8]) -> Vec<f32> {
    data.iter().map(|&v| v as f32 / 255.0).collect()
}

fn to_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}
