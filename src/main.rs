use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use detail_crop::source::is_supported_image;
use detail_crop::{ChannelListener, Coordinator, CropWindow, PipelineSettings, Rect};

const USAGE: &str = "usage: detail-crop <image> [x y w h [skip]] [-o out.png] [--analysis]";
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, PartialEq)]
struct CliArgs {
    input: PathBuf,
    rect: Option<Rect>,
    skip: u32,
    output: Option<PathBuf>,
    analysis: bool,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> anyhow::Result<CliArgs> {
    let mut input = None;
    let mut numbers = Vec::new();
    let mut output = None;
    let mut analysis = false;
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-o" | "--output" => {
                output = Some(PathBuf::from(args.next().context(USAGE)?));
            }
            "--analysis" => analysis = true,
            _ if input.is_none() => input = Some(PathBuf::from(arg)),
            _ => numbers.push(
                arg.parse::<i32>()
                    .with_context(|| format!("invalid number {:?}\n{}", arg, USAGE))?,
            ),
        }
    }
    let input: PathBuf = input.context(USAGE)?;
    if !is_supported_image(&input) {
        bail!("unsupported image type: {}", input.display());
    }
    let (rect, skip) = match numbers.as_slice() {
        [] => (None, 1),
        [x, y, w, h] => (Some(Rect::new(*x, *y, *w, *h)), 1),
        [x, y, w, h, s] if *s > 0 => (Some(Rect::new(*x, *y, *w, *h)), *s as u32),
        _ => bail!(USAGE),
    };
    Ok(CliArgs {
        input,
        rect,
        skip,
        output,
        analysis,
    })
}

fn default_output(input: &Path) -> PathBuf {
    let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("image");
    input.with_file_name(format!("{}-crop.png", stem))
}

fn analysis_output(output: &Path) -> PathBuf {
    let stem = output.file_stem().and_then(|s| s.to_str()).unwrap_or("crop");
    output.with_file_name(format!("{}-analysis.png", stem))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = parse_args(std::env::args().skip(1))?;
    let settings = PipelineSettings::load();
    let coordinator = Coordinator::open(&args.input, settings)
        .with_context(|| format!("opening {}", args.input.display()))?;
    let full = coordinator.full_size();
    let window = CropWindow::new(args.rect.unwrap_or(full.whole()), args.skip);

    let (tx, rx) = mpsc::channel();
    let listener = Arc::new(ChannelListener::new(tx, args.analysis));
    let region = coordinator.subscribe(window, Some(listener));

    let t0 = Instant::now();
    region.request_update();
    let crop = rx
        .recv_timeout(DELIVERY_TIMEOUT)
        .context("pipeline delivered no crop")?;
    let elapsed_ms = t0.elapsed().as_secs_f64() * 1000.0;
    region.destroy();

    let output = args.output.unwrap_or_else(|| default_output(&args.input));
    crop.display
        .save(&output)
        .with_context(|| format!("writing {}", output.display()))?;
    eprintln!(
        "detail-crop: {}x{} crop of {}x{} at skip {} in {:.1} ms -> {}",
        crop.display.width(),
        crop.display.height(),
        full.w,
        full.h,
        window.skip,
        elapsed_ms,
        output.display()
    );
    if let Some(analysis) = crop.analysis {
        let path = analysis_output(&output);
        analysis
            .save(&path)
            .with_context(|| format!("writing {}", path.display()))?;
        eprintln!("detail-crop: analysis copy -> {}", path.display());
    }
    Ok(())
}
