use {
    super::{config::VsrConfig, detect::detect_config, model::Sofvsr, ops::resize_bilinear},
    crate::InferError,
    base::Vec2,
    candle_core::{DType, Device, Tensor},
    futures_core::Stream,
    futures_sink::Sink,
    image::{Image, PixelFormat, YCbCrPlanes},
    std::{
        collections::VecDeque,
        fmt,
        future::Future,
        path::Path,
        pin::Pin,
        sync::{Arc, OnceLock},
        task::{Context, Poll, Waker},
    },
};

/// One received frame, split into the luma plane the network consumes and
/// the chroma planes that are only resized.
#[derive(Debug)]
struct PreparedFrame {
    luma: Vec<f32>,
    chroma: Option<(Vec<f32>, Vec<f32>)>,
}

impl PreparedFrame {
    fn from_image(image: &Image) -> Self {
        match image.format {
            PixelFormat::Rgb8 => {
                let YCbCrPlanes { y, cb, cr } = image::rgb_to_ycbcr(&image.data);
                Self {
                    luma: y,
                    chroma: Some((cb, cr)),
                }
            }
            PixelFormat::Luma8 => Self {
                luma: image::u8_to_plane(&image.data),
                chroma: None,
            },
        }
    }
}

/// A buffered input frame. Planes are computed on first use, on the
/// blocking pool, and shared by every window that contains the frame.
#[derive(Debug)]
struct BufferedFrame {
    image: Image,
    prepared: OnceLock<PreparedFrame>,
}

impl BufferedFrame {
    fn new(image: Image) -> Self {
        Self {
            image,
            prepared: OnceLock::new(),
        }
    }

    fn prepared(&self) -> &PreparedFrame {
        self.prepared.get_or_init(|| PreparedFrame::from_image(&self.image))
    }
}

/// Frame indices of the window centred on `t`, replicating the first and
/// last frame at the sequence edges.
fn window_indices(t: usize, center: usize, n_frames: usize, last: usize) -> Vec<usize> {
    (0..n_frames)
        .map(|k| (t + k).saturating_sub(center).min(last))
        .collect()
}

type Inflight = Pin<Box<dyn Future<Output = Result<Image, InferError>> + Send>>;

/// Streaming video super-resolution.
///
/// Implements `Sink<Image>` for low-resolution frames in display order and
/// `Stream<Item = Result<Image>>` for the upscaled frames, one output per
/// input. Output `t` is produced once frame `t + lookahead` has arrived or
/// the sink has been closed; missing neighbours at either end of the
/// sequence are filled by repeating the edge frame.
///
/// RGB frames are converted to YCbCr, only the luma goes through the
/// network and the chroma of the centre frame is resized bilinearly.
/// Grayscale frames stay grayscale.
pub struct VideoUpscaler {
    model: Arc<Sofvsr>,
    device: Device,
    frames: VecDeque<Arc<BufferedFrame>>,
    first_index: usize,
    received: usize,
    next_output: usize,
    frame_size: Option<Vec2<usize>>,
    format: Option<PixelFormat>,
    closed: bool,
    inflight: Option<Inflight>,
    stream_waker: Option<Waker>,
}

impl fmt::Debug for VideoUpscaler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoUpscaler")
            .field("config", self.model.config())
            .field("device", &self.device)
            .field("buffered", &self.frames.len())
            .field("received", &self.received)
            .field("next_output", &self.next_output)
            .field("closed", &self.closed)
            .field("inflight", &self.inflight.is_some())
            .finish()
    }
}

impl VideoUpscaler {
    pub(crate) fn new(
        model_path: impl AsRef<Path>,
        config: Option<VsrConfig>,
        device: Device,
    ) -> Result<Self, InferError> {
        let config = match config {
            Some(config) => config,
            None => detect_config(model_path.as_ref())?,
        };
        let weights = unsafe {
            candle_nn::VarBuilder::from_mmaped_safetensors(&[model_path.as_ref()], DType::F32, &device)?
        };
        let model = Sofvsr::load_default(weights, config)?;
        Ok(Self::from_model(model, device))
    }

    /// Wrap an already constructed model. Its parameters must live on `device`.
    pub fn from_model(model: Sofvsr, device: Device) -> Self {
        Self {
            model: Arc::new(model),
            device,
            frames: VecDeque::new(),
            first_index: 0,
            received: 0,
            next_output: 0,
            frame_size: None,
            format: None,
            closed: false,
            inflight: None,
            stream_waker: None,
        }
    }

    pub fn config(&self) -> &VsrConfig {
        self.model.config()
    }

    fn check_frame(&mut self, image: &Image) -> Result<(), InferError> {
        if image.size.x < 2 || image.size.y < 2 {
            return Err(InferError::Shape(format!(
                "frames must be at least 2x2, got {}",
                image.size
            )));
        }
        let expected = image.size.area() * image.format.bytes_per_pixel();
        if image.data.len() != expected {
            return Err(InferError::Shape(format!(
                "frame {} {:?} needs {} bytes, got {}",
                image.size,
                image.format,
                expected,
                image.data.len()
            )));
        }
        match self.frame_size {
            Some(size) if size != image.size => {
                return Err(InferError::Shape(format!(
                    "frame size changed from {} to {}",
                    size, image.size
                )));
            }
            _ => self.frame_size = Some(image.size),
        }
        match self.format {
            Some(format) if format != image.format => {
                return Err(InferError::Runtime(format!(
                    "pixel format changed from {:?} to {:?}",
                    format, image.format
                )));
            }
            _ => self.format = Some(image.format),
        }
        Ok(())
    }

    fn output_ready(&self) -> bool {
        let lookahead = self.model.config().lookahead();
        self.next_output < self.received && (self.closed || self.received > self.next_output + lookahead)
    }

    /// Drop frames no later window can reach.
    fn prune(&mut self) {
        let keep_from = self.next_output.saturating_sub(self.model.config().center());
        while self.first_index < keep_from && self.frames.len() > 1 {
            self.frames.pop_front();
            self.first_index += 1;
        }
    }

    /// Spawn upscaling of the next output frame as an inflight future.
    fn start_upscale(&mut self) {
        let t = self.next_output;
        let config = *self.model.config();
        let window: Vec<Arc<BufferedFrame>> = window_indices(t, config.center(), config.n_frames, self.received - 1)
            .into_iter()
            .map(|i| Arc::clone(&self.frames[i - self.first_index]))
            .collect();
        let centre = Arc::clone(&window[config.center()]);
        self.next_output += 1;
        self.prune();

        let model = Arc::clone(&self.model);
        let device = self.device.clone();
        // check_frame has run before any frame was buffered
        let size = self.frame_size.unwrap_or_default();

        self.inflight = Some(Box::pin(async move {
            tokio::task::spawn_blocking(move || -> Result<Image, InferError> {
                let image = upscale_window(&model, &device, size, &window, &centre)?;
                base::log_debug!("upscaled frame {}: {} -> {}", t, size, image.size);
                Ok(image)
            })
            .await
            .map_err(|e| InferError::Runtime(format!("upscaling task failed: {e}")))?
        }));
    }
}

fn plane_tensor(planes: &[&[f32]], size: Vec2<usize>, device: &Device) -> Result<Tensor, InferError> {
    let data: Vec<f32> = planes.iter().flat_map(|p| p.iter().copied()).collect();
    Ok(Tensor::from_vec(data, (1, planes.len(), size.y, size.x), device)?)
}

fn upscale_window(
    model: &Sofvsr,
    device: &Device,
    size: Vec2<usize>,
    window: &[Arc<BufferedFrame>],
    centre: &BufferedFrame,
) -> Result<Image, InferError> {
    let s = model.config().scale;
    let out_size = size * s;

    let lumas: Vec<&[f32]> = window.iter().map(|f| f.prepared().luma.as_slice()).collect();
    let frames = plane_tensor(&lumas, size, device)?.unsqueeze(2)?;
    let y: Vec<f32> = model
        .upscale(&frames)?
        .clamp(0f32, 1f32)?
        .flatten_all()?
        .to_vec1()?;

    match &centre.prepared().chroma {
        Some((cb, cr)) => {
            let chroma = plane_tensor(&[cb.as_slice(), cr.as_slice()], size, device)?;
            let chroma = resize_bilinear(&chroma, out_size.y, out_size.x)?;
            let cb = chroma.narrow(1, 0, 1)?.flatten_all()?.to_vec1()?;
            let cr = chroma.narrow(1, 1, 1)?.flatten_all()?.to_vec1()?;
            let rgb = image::ycbcr_to_rgb(&YCbCrPlanes { y, cb, cr });
            Ok(Image::new(out_size, rgb, PixelFormat::Rgb8))
        }
        None => Ok(Image::new(out_size, image::plane_to_u8(&y), PixelFormat::Luma8)),
    }
}

impl Sink<Image> for VideoUpscaler {
    type Error = InferError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), InferError>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: Image) -> Result<(), InferError> {
        let this = self.get_mut();
        if this.closed {
            return Err(InferError::Runtime("video upscaler sink is closed".to_string()));
        }
        this.check_frame(&item)?;
        this.frames.push_back(Arc::new(BufferedFrame::new(item)));
        this.received += 1;
        if let Some(waker) = this.stream_waker.take() {
            waker.wake();
        }
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), InferError>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), InferError>> {
        let this = self.get_mut();
        this.closed = true;
        if let Some(waker) = this.stream_waker.take() {
            waker.wake();
        }
        Poll::Ready(Ok(()))
    }
}

impl Stream for VideoUpscaler {
    type Item = Result<Image, InferError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.inflight.is_none() && this.output_ready() {
            this.start_upscale();
        }

        if let Some(fut) = this.inflight.as_mut() {
            return match fut.as_mut().poll(cx) {
                Poll::Ready(result) => {
                    this.inflight = None;
                    Poll::Ready(Some(result))
                }
                Poll::Pending => Poll::Pending,
            };
        }

        if this.closed && this.next_output >= this.received {
            return Poll::Ready(None);
        }

        // waiting for more frames
        this.stream_waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

fn _assert_send() {
    fn assert<T: Send>() {}
    assert::<VideoUpscaler>();
}
