// THEORY:
// `sentinel_tester` is the visual harness for the motion engine. It replays a
// directory of still frames through either pipeline and, when asked, writes
// every frame back out with the detected box drawn on it. Flipping through the
// output is the quickest way to judge whether the thresholds suit a scene.

use anyhow::{Context, Result};
use clap::Parser;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use motion_sentinel::frame_io::ImageSequenceSource;
use motion_sentinel::{
    BoundingBox, CycleMetadata, FrameSink, MotionPipeline, ParallelPipeline, PipelineConfig,
    RawFrame, RunSummary,
};
use std::path::PathBuf;
use tracing::{info, warn};

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_THICKNESS: u32 = 2;

#[derive(Parser, Debug)]
#[command(name = "sentinel_tester", about = "Replay frames through the motion pipeline")]
struct Args {
    /// Directory of still frames, read in file-name order.
    input: PathBuf,

    /// Write annotated frames into this directory.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// TOML pipeline configuration; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use the multi-frame pipeline.
    #[arg(long)]
    parallel: bool,

    /// Worker count for --parallel (defaults to the number of CPUs).
    #[arg(long)]
    workers: Option<usize>,

    /// Nominal frame rate reported alongside each frame.
    #[arg(long)]
    fps: Option<f64>,
}

/// Draws a hollow rectangle `thickness` pixels wide, growing inwards.
///
/// Edges falling outside the image are clipped by the line drawing.
fn draw_box(image: &mut RgbImage, bbox: BoundingBox, thickness: u32, color: Rgb<u8>) {
    for inset in 0..thickness {
        let (width, height) = (
            bbox.width.saturating_sub(2 * inset),
            bbox.height.saturating_sub(2 * inset),
        );
        if width == 0 || height == 0 {
            break;
        }
        let rect = Rect::at((bbox.x + inset) as i32, (bbox.y + inset) as i32).of_size(width, height);
        draw_hollow_rect_mut(image, rect, color);
    }
}

/// Logs detections and optionally saves annotated frames.
#[derive(Debug, Default)]
struct AnnotatingSink {
    output: Option<PathBuf>,
    detections: u64,
    written: u64,
    failed_writes: u64,
}

impl AnnotatingSink {
    fn new(output: Option<PathBuf>) -> Self {
        Self {
            output,
            ..Self::default()
        }
    }
}

impl FrameSink for AnnotatingSink {
    fn consume(&mut self, frame: &RawFrame, detection: Option<BoundingBox>, meta: &CycleMetadata) {
        if let Some(bbox) = detection {
            self.detections += 1;
            info!(
                frame = meta.frame_index,
                x = bbox.x,
                y = bbox.y,
                width = bbox.width,
                height = bbox.height,
                area = meta.region_area,
                "motion detected"
            );
        }

        let Some(dir) = &self.output else {
            return;
        };
        let mut annotated = frame.to_rgb();
        if let Some(bbox) = detection {
            draw_box(&mut annotated, bbox, BOX_THICKNESS, BOX_COLOR);
        }
        let path = dir.join(format!("frame_{:06}.png", meta.frame_index));
        match annotated.save(&path) {
            Ok(()) => self.written += 1,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to write annotated frame");
                self.failed_writes += 1;
            }
        }
    }
}

async fn run(args: Args) -> Result<(RunSummary, AnnotatingSink)> {
    let config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    if let Some(dir) = &args.output {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating output directory {}", dir.display()))?;
    }

    let mut source = ImageSequenceSource::open(&args.input)?;
    if let Some(fps) = args.fps {
        source = source.with_fps(fps);
    }
    info!(
        input = %args.input.display(),
        frames = source.remaining(),
        parallel = args.parallel,
        "starting replay"
    );

    let mut sink = AnnotatingSink::new(args.output.clone());
    let summary = if args.parallel {
        let mut pipeline = ParallelPipeline::new(config)?;
        if let Some(workers) = args.workers {
            pipeline = pipeline.with_workers(workers);
        }
        pipeline.run(source, &mut sink).await?
    } else {
        MotionPipeline::new(config)?.run(&mut source, &mut sink)
    };
    Ok((summary, sink))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let (summary, sink) = run(args).await?;
    info!(
        frames = summary.frames,
        motion = summary.motion,
        no_motion = summary.no_motion,
        errors = summary.errors,
        written = sink.written,
        "replay complete"
    );
    Ok(())
}
