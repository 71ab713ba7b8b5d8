use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use detail_crop::source::is_raw_image;
use detail_crop::viewport::Viewport;
use detail_crop::{ChannelListener, Coordinator, CropWindow, PipelineSettings, Rect};

const VIEW_W: u32 = 1200;
const VIEW_H: u32 = 800;
const DETAIL_EDGE: i32 = 400;
const BURST: usize = 16;
const WAIT: Duration = Duration::from_secs(120);

fn list_raw_files(dir: &Path, limit: usize) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("read_dir failed for {}", dir.display()))?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_raw_image(p))
        .collect();
    files.sort();
    files.truncate(limit);
    Ok(files)
}

fn median_ms(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) * 0.5
    } else {
        sorted[mid]
    }
}

struct Sample {
    first_ms: f64,
    slider_ms: f64,
    burst_deliveries: usize,
}

fn probe(path: &Path, settings: &PipelineSettings) -> Result<Sample> {
    let coordinator = Coordinator::open(path, settings.clone())
        .with_context(|| format!("open failed for {}", path.display()))?;
    let full = coordinator.full_size();

    let (tx, rx) = mpsc::channel();
    let view = Viewport::fit(full, VIEW_W, VIEW_H);
    let main = coordinator.subscribe(
        view.crop_window(full),
        Some(Arc::new(ChannelListener::new(tx.clone(), false))),
    );
    let t0 = Instant::now();
    main.request_update();
    rx.recv_timeout(WAIT).context("no first delivery")?;
    let first_ms = t0.elapsed().as_secs_f64() * 1000.0;

    // Slider move: only the late stages rerun.
    let mut params = (*coordinator.params()).clone();
    params.rgb_curve.contrast = 0.25;
    params.luma_curve.shadows = 0.2;
    let t0 = Instant::now();
    coordinator.update_params(params);
    rx.recv_timeout(WAIT).context("no delivery after slider move")?;
    let slider_ms = t0.elapsed().as_secs_f64() * 1000.0;

    // Drag a 100% detail window across the image.
    let detail = coordinator.subscribe(
        CropWindow::new(Rect::new(0, 0, DETAIL_EDGE, DETAIL_EDGE), 1),
        Some(Arc::new(ChannelListener::new(tx, false))),
    );
    let step = ((full.w - DETAIL_EDGE).max(1) / BURST as i32).max(1);
    for i in 0..BURST as i32 {
        detail.request(CropWindow::new(
            Rect::new(i * step, full.h / 3, DETAIL_EDGE, DETAIL_EDGE),
            1,
        ));
    }
    let deadline = Instant::now() + WAIT;
    let mut burst_deliveries = 0;
    while let Ok(crop) = rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        burst_deliveries += 1;
        if crop.window == detail.window() {
            break;
        }
    }

    detail.destroy();
    main.destroy();
    Ok(Sample {
        first_ms,
        slider_ms,
        burst_deliveries,
    })
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args();
    let _bin = args.next();
    let dir = args
        .next()
        .map(PathBuf::from)
        .context("usage: perf_probe <raw-dir> [count]")?;
    let count = args
        .next()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(20);

    let files = list_raw_files(&dir, count)?;
    if files.is_empty() {
        anyhow::bail!("No RAW files found in {}", dir.display());
    }
    eprintln!("Using {} RAW files from {}", files.len(), dir.display());

    let settings = PipelineSettings::load();
    let mut first = Vec::with_capacity(files.len());
    let mut slider = Vec::with_capacity(files.len());
    let mut max_burst = 0;
    for path in &files {
        let sample = probe(path, &settings)?;
        first.push(sample.first_ms);
        slider.push(sample.slider_ms);
        max_burst = max_burst.max(sample.burst_deliveries);
    }

    println!("METRIC file_count={}", files.len());
    println!("METRIC worker_threads={}", settings.worker_threads);
    println!("METRIC first_update_ms_median={:.2}", median_ms(&first));
    println!("METRIC slider_ms_median={:.2}", median_ms(&slider));
    println!("METRIC burst_requests={}", BURST);
    println!("METRIC burst_deliveries_max={}", max_burst);

    Ok(())
}
