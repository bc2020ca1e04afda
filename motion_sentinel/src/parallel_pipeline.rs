// THEORY:
// `ParallelPipeline` produces exactly the reports `MotionPipeline` would, but
// keeps more than one frame in flight. A stream is split into three overlapping
// stages:
//
// 1.  Acquisition runs on its own blocking task and pushes frames into a
//     bounded channel, so a slow camera never stalls analysis and a slow
//     analysis applies back-pressure instead of buffering without limit.
// 2.  Preprocessing (gray + blur) of several frames runs at once on the
//     blocking pool. `buffered` hands results back in frame order.
// 3.  Pairing walks the preprocessed frames in order, swaps each one into the
//     `SharedFrameBuffer` and takes out its predecessor. The pair is then
//     analysed on the pool, again with ordered delivery to the sink.
//
// The only ordering constraint in the whole cycle is the buffer swap, and that
// happens in stage 3 strictly in frame order. Everything else is a pure
// function of its inputs, which is why fanning it out changes nothing.

use crate::config::PipelineConfig;
use crate::core_modules::frame::{PreprocessedFrame, RawFrame};
use crate::core_modules::frame_buffer::SharedFrameBuffer;
use crate::error::{ConfigError, PipelineError, SourceError};
use crate::frame_io::{CycleMetadata, FrameSink, FrameSource};
use crate::pipeline::{Detection, Report, RunSummary, Stages};
use futures::{stream, FutureExt, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A frame that made it through preprocessing.
struct Prepared {
    raw: RawFrame,
    current: PreprocessedFrame,
    started: Instant,
}

/// A frame with its final report.
struct Analysed {
    raw: RawFrame,
    report: Report,
    started: Instant,
    /// The frame's size differed from the reference, so it primed afresh.
    reprimed: bool,
}

async fn prepare(
    stages: Arc<Stages>,
    next: Result<RawFrame, SourceError>,
) -> Result<Prepared, PipelineError> {
    let raw = next?;
    let started = Instant::now();
    let (raw, current) = tokio::task::spawn_blocking(move || {
        let current = stages.preprocess(&raw);
        (raw, current)
    })
    .await?;
    Ok(Prepared {
        raw,
        current: current?,
        started,
    })
}

async fn analyse(
    stages: Arc<Stages>,
    current: Arc<PreprocessedFrame>,
    previous: Option<Arc<PreprocessedFrame>>,
) -> Result<Report, PipelineError> {
    let Some(previous) = previous else {
        return Ok(Report::Primed);
    };
    let detection: Option<Detection> =
        tokio::task::spawn_blocking(move || stages.detect(&current, &previous)).await??;
    Ok(detection.map_or(Report::NoMotion, Report::Motion))
}

/// The multi-frame, in-order motion pipeline.
pub struct ParallelPipeline {
    stages: Arc<Stages>,
    buffer: SharedFrameBuffer,
    workers: usize,
}

impl ParallelPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            stages: Arc::new(Stages::new(&config)?),
            buffer: SharedFrameBuffer::new(),
            workers: num_cpus::get().max(1),
        })
    }

    /// Caps how many frames are processed concurrently in each stage.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn frame_buffer(&self) -> &SharedFrameBuffer {
        &self.buffer
    }

    pub fn reset(&self) {
        self.buffer.reset();
    }

    /// Runs one cycle on the blocking pool.
    ///
    /// Same contract as `MotionPipeline::process_frame`: a rejected frame
    /// leaves the buffer as it was.
    pub async fn process_frame(&self, raw: RawFrame) -> Result<Report, PipelineError> {
        let prepared = prepare(self.stages.clone(), Ok(raw)).await?;
        let current = Arc::new(prepared.current);
        let previous = self.buffer.replace_matching(current.clone())?;
        analyse(self.stages.clone(), current, previous).await
    }

    /// Drains `source` through all three stages and feeds `sink` in frame order.
    ///
    /// Per-frame failures are logged and counted exactly as the sequential
    /// run loop does. Only a panicked worker aborts the run.
    pub async fn run<S, K>(&self, mut source: S, sink: &mut K) -> Result<RunSummary, PipelineError>
    where
        S: FrameSource + Send + 'static,
        K: FrameSink + ?Sized,
    {
        let fps = source.fps();
        let workers = self.workers;
        let (frame_tx, frame_rx) = mpsc::channel(workers * 2);
        info!(workers, ?fps, "parallel motion pipeline started");

        let acquisition = tokio::task::spawn_blocking(move || {
            while let Some(next) = source.next_frame() {
                if frame_tx.blocking_send(next).is_err() {
                    break;
                }
            }
        });

        let frames = stream::unfold(frame_rx, |mut rx| async move {
            rx.recv().await.map(|next| (next, rx))
        });

        let stages = self.stages.clone();
        let prepared = frames
            .enumerate()
            .map(move |(index, next)| {
                prepare(stages.clone(), next).map(move |result| (index as u64, result))
            })
            .buffered(workers);

        let stages = self.stages.clone();
        let buffer = self.buffer.clone();
        let analysed = prepared
            .map(move |(frame_index, prepared)| {
                let stages = stages.clone();
                let paired = prepared.map(|p| {
                    let current = Arc::new(p.current);
                    let mut previous = buffer.replace(current.clone());
                    let reprimed = previous
                        .as_ref()
                        .is_some_and(|prev| prev.dimensions() != current.dimensions());
                    if reprimed {
                        warn!(frame_index, "frame size changed, re-priming");
                        previous = None;
                    }
                    (p.raw, p.started, current, previous, reprimed)
                });
                async move {
                    let result = match paired {
                        Err(e) => Err(e),
                        Ok((raw, started, current, previous, reprimed)) => {
                            analyse(stages, current, previous).await.map(|report| Analysed {
                                raw,
                                report,
                                started,
                                reprimed,
                            })
                        }
                    };
                    (frame_index, result)
                }
            })
            .buffered(workers);

        let mut analysed = std::pin::pin!(analysed);
        let mut summary = RunSummary::default();
        while let Some((frame_index, result)) = analysed.next().await {
            summary.frames += 1;
            let cycle = match result {
                Ok(cycle) => cycle,
                Err(e @ PipelineError::Worker(_)) => return Err(e),
                Err(e) => {
                    warn!(frame_index, error = %e, "cycle skipped");
                    summary.errors += 1;
                    continue;
                }
            };
            if cycle.reprimed {
                summary.errors += 1;
            }
            summary.record(&cycle.report);

            let meta = CycleMetadata {
                frame_index,
                fps,
                elapsed: cycle.started.elapsed(),
                region_area: cycle.report.detection().map(|d| d.area),
                primed: cycle.report == Report::Primed,
            };
            debug!(frame_index, report = ?cycle.report, "cycle complete");
            sink.consume(&cycle.raw, cycle.report.bounding_box(), &meta);
        }

        acquisition.await?;
        info!(
            frames = summary.frames,
            motion = summary.motion,
            errors = summary.errors,
            "parallel motion pipeline finished"
        );
        Ok(summary)
    }
}
