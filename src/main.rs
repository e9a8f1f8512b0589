use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::Parser;

use deepzoom_capture::memory::MemoryViewer;
use deepzoom_capture::{
    CaptureConfig, CaptureOptions, FsDownloadManager, ImageFormat, Rect, Screenshot, Viewer,
};

/// Capture a snapshot of an image shown through an in-memory deep-zoom viewer
#[derive(Parser, Debug)]
#[command(name = "deepzoom-capture", version)]
struct Args {
    /// Source image to open in the viewer
    #[arg(short, long)]
    input: PathBuf,

    /// Where to save the capture
    #[arg(short, long)]
    output: PathBuf,

    /// Viewer surface size, as WIDTHxHEIGHT
    #[arg(long, default_value = "800x600", value_parser = parse_size)]
    surface: (u32, u32),

    /// Visible region in world coordinates, as x,y,width,height (defaults to home)
    #[arg(long, value_parser = parse_rect)]
    viewport: Option<Rect>,

    /// Output format (png, jpeg, webp); defaults to the output file's extension
    #[arg(short, long)]
    format: Option<ImageFormat>,

    /// Quality for lossy formats, 0..=1
    #[arg(short, long, default_value_t = 0.9)]
    quality: f32,

    /// Output scale factor
    #[arg(short, long, default_value_t = 1.0)]
    scale: f64,

    /// Overlay image painted over the surface (repeatable, painted in order)
    #[arg(long = "overlay")]
    overlays: Vec<PathBuf>,

    /// Capture the current view instead of fitting the whole image
    #[arg(long)]
    no_fit: bool,

    /// JSON file with capture timing and hardening settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Pretend the image takes this long to finish loading
    #[arg(long, default_value_t = 0)]
    load_latency_ms: u64,
}

fn parse_size(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s.split_once('x').ok_or_else(|| format!("expected WIDTHxHEIGHT, got {:?}", s))?;
    let w = w.trim().parse::<u32>().map_err(|e| e.to_string())?;
    let h = h.trim().parse::<u32>().map_err(|e| e.to_string())?;
    if w == 0 || h == 0 {
        return Err("surface size must be non-zero".into());
    }
    Ok((w, h))
}

fn parse_rect(s: &str) -> Result<Rect, String> {
    let parts = s
        .split(',')
        .map(|p| p.trim().parse::<f64>().map_err(|e| e.to_string()))
        .collect::<Result<Vec<_>, _>>()?;
    match parts[..] {
        [x, y, w, h] if w > 0.0 && h > 0.0 => Ok(Rect::new(x, y, w, h)),
        [_, _, _, _] => Err("viewport width and height must be positive".into()),
        _ => Err(format!("expected x,y,width,height, got {:?}", s)),
    }
}

fn format_for(args: &Args) -> anyhow::Result<ImageFormat> {
    if let Some(format) = args.format {
        return Ok(format);
    }
    let ext = args
        .output
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| anyhow!("cannot infer a format from {}; pass --format", args.output.display()))?;
    ext.parse().map_err(|e: String| anyhow!(e))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => CaptureConfig::from_json_file(path)?,
        None => CaptureConfig::default(),
    };

    let source = image::open(&args.input)
        .with_context(|| format!("failed to open {}", args.input.display()))?
        .to_rgba8();
    let overlays = args
        .overlays
        .iter()
        .map(|p| {
            image::open(p)
                .map(|img| img.to_rgba8())
                .with_context(|| format!("failed to open overlay {}", p.display()))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let (width, height) = args.surface;
    let viewer = Arc::new(MemoryViewer::new(width, height));
    let aspect = source.height() as f64 / source.width().max(1) as f64;
    let loaded = args.load_latency_ms == 0;
    let index = viewer.add_item(source, Rect::new(0.0, 0.0, 1.0, aspect), loaded);
    viewer.open();
    match args.viewport {
        Some(bounds) => viewer.fit_bounds(bounds, true),
        None => viewer.go_home(),
    }
    if !loaded {
        let _ = viewer.load_after(index, Duration::from_millis(args.load_latency_ms));
    }

    let filename = args
        .output
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("{} is not a file path", args.output.display()))?
        .to_string();
    let out_dir = match args.output.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let options = CaptureOptions {
        format: format_for(&args)?,
        quality: args.quality,
        scale: args.scale,
        overlays,
        fit_image_to_viewport: !args.no_fit,
        image_index: index,
    };

    let cleanup = config.cleanup_delay();
    let screenshot = Screenshot::with_config(viewer, config)
        .with_download_manager(Arc::new(FsDownloadManager::new(out_dir)));
    screenshot.download_as(&filename, &options).await?;

    // Let the deferred release of the staged file run before the runtime shuts down.
    tokio::time::sleep(cleanup + Duration::from_millis(10)).await;
    println!("wrote {}", args.output.display());
    Ok(())
}
