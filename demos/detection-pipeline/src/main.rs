mod detector;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use image::{Rgb, RgbImage};
use inflight::overlay::draw_detections;
use inflight::{
    AsyncPipeline, Completed, Detection, DetectionPostProcessor, PipelineConfig, PipelineError,
    StopHandle, run_ordered,
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::detector::{SimulatedDetector, preprocess};

#[derive(Parser)]
#[command(name = "detection-pipeline")]
#[command(about = "Runs a simulated SSD detector over synthetic frames, several requests in flight")]
struct Args {
    /// Session configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of frames to push through the pipeline
    #[arg(short = 'n', long, default_value_t = 200)]
    frames: u32,

    /// Overrides the configured number of request slots
    #[arg(long)]
    max_num_requests: Option<usize>,

    /// Overrides the configured device, e.g. CPU, GPU.0 or AUTO
    #[arg(short, long)]
    device: Option<String>,

    #[arg(long, default_value_t = 640)]
    width: u32,

    #[arg(long, default_value_t = 480)]
    height: u32,

    /// Lower bound of the simulated inference latency
    #[arg(long, default_value_t = 20)]
    min_latency_ms: u64,

    /// Upper bound of the simulated inference latency
    #[arg(long, default_value_t = 60)]
    max_latency_ms: u64,

    /// Where annotated frames are written
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Write every n-th annotated frame
    #[arg(long, default_value_t = 25)]
    save_every: u64,
}

/// A moving gradient, so consecutive frames differ.
fn synthetic_frame(index: u32, width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let shift = index.wrapping_mul(4);
        Rgb([
            (x.wrapping_add(shift) % 256) as u8,
            (y.wrapping_add(shift) % 256) as u8,
            (index % 256) as u8,
        ])
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(n) = args.max_num_requests {
        config.max_num_requests = n;
    }
    if let Some(device) = &args.device {
        config.device = Some(device.clone());
    }
    if let Some(dir) = &args.output_dir {
        std::fs::create_dir_all(dir)?;
    }

    let engine = SimulatedDetector::new(
        Duration::from_millis(args.min_latency_ms),
        Duration::from_millis(args.max_latency_ms),
    );
    let pipeline: AsyncPipeline<SimulatedDetector, DetectionPostProcessor, RgbImage> =
        AsyncPipeline::new(engine, DetectionPostProcessor::from_config(&config), &config)?;
    info!(
        device = %pipeline.device(),
        slots = pipeline.capacity(),
        frames = args.frames,
        "starting"
    );

    let stop = StopHandle::new();
    let ctrl_c = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, finishing the current frame");
            ctrl_c.stop();
        }
    });

    let (width, height) = (args.width, args.height);
    let frames = (0..args.frames).filter_map(move |index| {
        let frame = synthetic_frame(index, width, height);
        match preprocess(&frame) {
            Ok(input) => Some((input, frame)),
            Err(e) => {
                warn!(index, error = %e, "skipping frame that failed to preprocess");
                None
            }
        }
    });

    let mut detections_seen = 0usize;
    let mut sink = |mut done: Completed<Vec<Detection>, RgbImage>| -> Result<(), PipelineError> {
        detections_seen += done.output.len();
        draw_detections(&mut done.meta, &done.output, 2);

        if let Some(dir) = &args.output_dir {
            if done.correlation_id % args.save_every.max(1) == 0 {
                let path = dir.join(format!("frame_{:05}.png", done.correlation_id));
                done.meta.save(&path).map_err(|e| PipelineError::Sink {
                    correlation_id: done.correlation_id,
                    message: e.to_string(),
                })?;
            }
        }
        Ok(())
    };

    let summary = run_ordered(pipeline, frames, &mut sink, &stop, config.metrics_window()).await?;

    info!(
        shown = summary.shown,
        submitted = summary.submitted,
        interrupted = summary.interrupted,
        detections = detections_seen,
        fps = summary.metrics.fps(),
        mean_latency_ms = summary.metrics.mean_latency().as_millis() as u64,
        "done"
    );
    Ok(())
}
