use {
    base::*,
    futures_util::{SinkExt, StreamExt},
    inference::Inference,
    std::path::{Path, PathBuf},
};

const EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

/// Frame files of `dir` in name order.
fn list_frames(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .collect();
    frames.sort();
    Ok(frames)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    base::init_stdout_logger();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 4 {
        eprintln!("Usage: {} <weights.safetensors> <input_dir> <output_dir>", args[0]);
        std::process::exit(1);
    }
    let weights = &args[1];
    let input_dir = Path::new(&args[2]);
    let output_dir = PathBuf::from(&args[3]);

    let frames = list_frames(input_dir)?;
    if frames.is_empty() {
        eprintln!("No frames found in {}", input_dir.display());
        std::process::exit(1);
    }
    tokio::fs::create_dir_all(&output_dir).await?;

    log_info!("Loading SOF-VSR weights from {}", weights);
    #[cfg(feature = "cuda")]
    let inference = Inference::cuda(0)?;
    #[cfg(not(feature = "cuda"))]
    let inference = Inference::cpu()?;
    let upscaler = inference.use_video_upscaler(weights)?;
    log_info!("Model loaded: {:?}", upscaler.config());

    let names: Vec<PathBuf> = frames
        .iter()
        .map(|path| output_dir.join(path.with_extension("png").file_name().unwrap_or_default()))
        .collect();
    let (mut sink, mut stream) = upscaler.split();

    let feed = async {
        let sent = async {
            for path in &frames {
                let bytes = tokio::fs::read(path).await?;
                let image = image::decode_image(&bytes).await?;
                sink.send(image).await?;
            }
            Ok::<_, Box<dyn std::error::Error>>(())
        }
        .await;
        // closing lets the drain finish even after a failed read
        sink.close().await?;
        sent
    };

    let drain = async {
        let mut written = 0;
        for name in &names {
            let Some(result) = stream.next().await else {
                break;
            };
            let image = result?;
            let size = image.size;
            tokio::fs::write(name, image::encode_png(image).await?).await?;
            log_info!("Wrote {} ({})", name.display(), size);
            written += 1;
        }
        Ok::<_, Box<dyn std::error::Error>>(written)
    };

    let (fed, written) = tokio::join!(feed, drain);
    fed?;
    println!("Upscaled {} frames into {}", written?, output_dir.display());
    Ok(())
}
