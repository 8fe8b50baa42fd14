use {
    super::config::{UPSAMPLER_CHANNELS, VsrConfig},
    crate::InferError,
    safetensors::SafeTensors,
    std::path::Path,
};

/// Infer scale, window length and trunk width from a SOF-VSR safetensors file.
///
/// Memory-maps the file and only reads tensor metadata.
pub fn detect_config(path: impl AsRef<Path>) -> Result<VsrConfig, InferError> {
    let file = std::fs::File::open(path.as_ref())?;
    let mmap = unsafe { memmap2::Mmap::map(&file) }
        .map_err(|e| InferError::Io(format!("failed to memory-map safetensors file: {e}")))?;
    let tensors = SafeTensors::deserialize(&mmap)
        .map_err(|e| InferError::Io(format!("failed to deserialize safetensors: {e}")))?;
    config_from_tensors(&tensors)
}

fn shape_of(tensors: &SafeTensors, key: &str) -> Result<Vec<usize>, InferError> {
    let view = tensors
        .tensor(key)
        .map_err(|e| InferError::Shape(format!("key '{key}' not found in safetensors: {e}")))?;
    let shape = view.shape().to_vec();
    if shape.len() != 4 {
        return Err(InferError::Shape(format!(
            "expected a conv weight for {key}, got shape {shape:?}"
        )));
    }
    Ok(shape)
}

fn config_from_tensors(tensors: &SafeTensors) -> Result<VsrConfig, InferError> {
    let channels = shape_of(tensors, "OFR.RNN1.0.weight")?[0];

    // x4 is the only variant with two upsampling stages, pushing the tail to 9
    let scale = if tensors.tensor("SR.body.9.weight").is_ok() {
        4
    } else {
        let out = shape_of(tensors, "SR.body.3.weight")?[0];
        match out / UPSAMPLER_CHANNELS {
            9 if out % UPSAMPLER_CHANNELS == 0 => 3,
            4 if out % UPSAMPLER_CHANNELS == 0 => 2,
            1 if out == UPSAMPLER_CHANNELS => 1,
            _ => {
                return Err(InferError::Shape(format!(
                    "cannot infer scale from upsampler width {out}"
                )));
            }
        }
    };

    let draft = shape_of(tensors, "SR.body.0.weight")?[1];
    let per_neighbour = scale * scale;
    if draft < 1 + per_neighbour || (draft - 1) % per_neighbour != 0 {
        return Err(InferError::Shape(format!(
            "draft cube width {draft} does not fit scale {scale}"
        )));
    }
    let config = VsrConfig::new(scale, (draft - 1) / per_neighbour + 1, channels);
    config.validate()?;
    base::log_debug!(
        "detected SOF-VSR x{}, {} frames, {} channels",
        config.scale,
        config.n_frames,
        config.channels
    );
    Ok(config)
}
