// THEORY:
// The `pipeline` module is the top-level API of the motion engine. It chains the
// stages into a per-frame cycle:
//
//   raw frame -> preprocess -> (first frame? store and stop) -> difference
//             -> threshold -> morphological cleanup -> largest region -> box
//
// and then replaces the buffered reference frame with the current one. The
// only state that survives a cycle is that one preprocessed frame, so the whole
// cycle is also available as a pure function, `analyze_frame`, that takes the
// previous frame explicitly and returns the next one.
//
// Failures are local to a cycle. A rejected frame leaves the buffer exactly as
// it was; the caller decides whether to reset and carry on.

use crate::config::PipelineConfig;
use crate::core_modules::binarizer::binarizer;
use crate::core_modules::differencer::differencer;
use crate::core_modules::frame::{BinaryMask, PreprocessedFrame, RawFrame};
use crate::core_modules::frame_buffer::FrameBuffer;
use crate::core_modules::morphology::MorphologicalCleaner;
use crate::core_modules::preprocessor::Preprocessor;
use crate::core_modules::region_extractor;
use crate::error::{ConfigError, PipelineError};
use crate::frame_io::{CycleMetadata, FrameSink, FrameSource};
use std::time::Instant;
use tracing::{debug, info, warn};

// Re-export key data structures for the public API.
pub use crate::core_modules::bounding_box::BoundingBox;
pub use crate::core_modules::frame::ChannelOrder;

/// The motion found in one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub bounding_box: BoundingBox,
    /// Pixels enclosed by the region's outer boundary.
    pub area: usize,
}

/// The primary output of the pipeline for a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Report {
    /// The buffer was empty; this frame became the reference and nothing was compared.
    Primed,
    NoMotion,
    Motion(Detection),
}

impl Report {
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        match self {
            Report::Motion(detection) => Some(detection.bounding_box),
            _ => None,
        }
    }

    pub fn detection(&self) -> Option<Detection> {
        match self {
            Report::Motion(detection) => Some(*detection),
            _ => None,
        }
    }
}

/// The stateless part of the pipeline, built once from a config.
#[derive(Debug, Clone)]
pub struct Stages {
    preprocessor: Preprocessor,
    cleaner: MorphologicalCleaner,
    diff_threshold: u8,
    min_region_area: usize,
}

impl Stages {
    pub fn new(config: &PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            preprocessor: Preprocessor::new(config.blur_kernel_size, config.blur_sigma),
            cleaner: MorphologicalCleaner::from_config(config),
            diff_threshold: config.diff_threshold,
            min_region_area: config.min_region_area,
        })
    }

    pub fn preprocess(&self, frame: &RawFrame) -> Result<PreprocessedFrame, PipelineError> {
        self.preprocessor.preprocess(frame)
    }

    /// Difference and threshold, before any cleanup.
    pub fn difference_mask(
        &self,
        curr: &PreprocessedFrame,
        prev: &PreprocessedFrame,
    ) -> Result<BinaryMask, PipelineError> {
        let diff = differencer::diff(curr, prev)?;
        Ok(binarizer::threshold(&diff, self.diff_threshold))
    }

    /// The cleaned motion mask that region extraction runs on.
    pub fn motion_mask(
        &self,
        curr: &PreprocessedFrame,
        prev: &PreprocessedFrame,
    ) -> Result<BinaryMask, PipelineError> {
        Ok(self.cleaner.clean(&self.difference_mask(curr, prev)?))
    }

    /// Compares two preprocessed frames and reports the largest moving region.
    pub fn detect(
        &self,
        curr: &PreprocessedFrame,
        prev: &PreprocessedFrame,
    ) -> Result<Option<Detection>, PipelineError> {
        let mask = self.motion_mask(curr, prev)?;
        Ok(
            region_extractor::extract_largest_region(&mask, self.min_region_area).map(|region| {
                Detection {
                    bounding_box: region.bounding_box(),
                    area: region.area(),
                }
            }),
        )
    }
}

/// One full cycle as a pure function of the raw frame and the previous reference.
///
/// Returns the report and the frame that should become the next reference.
pub fn analyze_frame(
    stages: &Stages,
    raw: &RawFrame,
    previous: Option<&PreprocessedFrame>,
) -> Result<(Report, PreprocessedFrame), PipelineError> {
    let current = stages.preprocess(raw)?;
    let Some(previous) = previous else {
        return Ok((Report::Primed, current));
    };
    let report = match stages.detect(&current, previous)? {
        Some(detection) => Report::Motion(detection),
        None => Report::NoMotion,
    };
    Ok((report, current))
}

/// Counters accumulated by a run over a whole stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub primed: u64,
    pub motion: u64,
    pub no_motion: u64,
    /// Frames that could not be acquired or analysed.
    pub errors: u64,
}

impl RunSummary {
    pub fn record(&mut self, report: &Report) {
        match report {
            Report::Primed => self.primed += 1,
            Report::NoMotion => self.no_motion += 1,
            Report::Motion(_) => self.motion += 1,
        }
    }
}

/// The synchronous, single-consumer motion pipeline.
pub struct MotionPipeline {
    stages: Stages,
    config: PipelineConfig,
    buffer: FrameBuffer,
}

impl MotionPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            stages: Stages::new(&config)?,
            config,
            buffer: FrameBuffer::new(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn stages(&self) -> &Stages {
        &self.stages
    }

    pub fn frame_buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    /// Forgets the reference frame; the next frame primes the pipeline again.
    pub fn reset(&mut self) {
        self.buffer.reset();
    }

    /// Runs one cycle. The buffer is replaced only when the cycle succeeds.
    pub fn process_frame(&mut self, raw: &RawFrame) -> Result<Report, PipelineError> {
        let (report, current) = analyze_frame(&self.stages, raw, self.buffer.get())?;
        self.buffer.set(current);
        Ok(report)
    }

    pub fn motion_detected(&mut self, raw: &RawFrame) -> Result<bool, PipelineError> {
        Ok(matches!(self.process_frame(raw)?, Report::Motion(_)))
    }

    /// Drains `source`, handing every analysed frame to `sink`.
    ///
    /// Acquisition failures and empty frames are skipped. A frame whose size
    /// differs from the reference resets the buffer and primes it afresh.
    pub fn run<S, K>(&mut self, source: &mut S, sink: &mut K) -> RunSummary
    where
        S: FrameSource + ?Sized,
        K: FrameSink + ?Sized,
    {
        let fps = source.fps();
        let mut summary = RunSummary::default();
        info!(?fps, "motion pipeline started");

        while let Some(next) = source.next_frame() {
            let frame_index = summary.frames;
            summary.frames += 1;

            let raw = match next {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(frame_index, error = %e, "failed to acquire frame, skipping");
                    summary.errors += 1;
                    continue;
                }
            };

            let started = Instant::now();
            let outcome = match self.process_frame(&raw) {
                Err(e @ PipelineError::DimensionMismatch { .. }) => {
                    warn!(frame_index, error = %e, "frame size changed, re-priming");
                    summary.errors += 1;
                    self.reset();
                    self.process_frame(&raw)
                }
                other => other,
            };

            let report = match outcome {
                Ok(report) => report,
                Err(e) => {
                    warn!(frame_index, error = %e, "cycle skipped");
                    summary.errors += 1;
                    continue;
                }
            };
            summary.record(&report);

            let meta = CycleMetadata {
                frame_index,
                fps,
                elapsed: started.elapsed(),
                region_area: report.detection().map(|d| d.area),
                primed: report == Report::Primed,
            };
            debug!(frame_index, ?report, elapsed_us = meta.elapsed.as_micros() as u64, "cycle complete");
            sink.consume(&raw, report.bounding_box(), &meta);
        }

        info!(
            frames = summary.frames,
            motion = summary.motion,
            errors = summary.errors,
            "motion pipeline finished"
        );
        summary
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::frame_io::MemorySource;
    use image::{Rgb, RgbImage};

    pub(crate) fn gray_frame(width: u32, height: u32, f: impl Fn(u32, u32) -> u8) -> RawFrame {
        RawFrame::from_rgb(RgbImage::from_fn(width, height, |x, y| Rgb([f(x, y); 3])))
    }

    /// A flat background at 50 with a 50x50 square at 250 (delta 200) at `(sx, sy)`.
    pub(crate) fn square_frame(sx: u32, sy: u32) -> RawFrame {
        gray_frame(160, 120, move |x, y| {
            if (sx..sx + 50).contains(&x) && (sy..sy + 50).contains(&y) {
                250
            } else {
                50
            }
        })
    }

    pub(crate) fn background() -> RawFrame {
        gray_frame(160, 120, |_, _| 50)
    }

    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub(crate) seen: Vec<(Option<BoundingBox>, CycleMetadata)>,
    }

    impl FrameSink for RecordingSink {
        fn consume(&mut self, _frame: &RawFrame, detection: Option<BoundingBox>, meta: &CycleMetadata) {
            self.seen.push((detection, meta.clone()));
        }
    }

    fn pipeline() -> MotionPipeline {
        MotionPipeline::new(PipelineConfig::default()).expect("default config is valid")
    }

    #[test]
    fn first_frame_only_primes_the_buffer() {
        let mut pipeline = pipeline();
        assert!(!pipeline.frame_buffer().has_previous());
        assert_eq!(pipeline.process_frame(&background()).expect("cycle"), Report::Primed);
        assert!(pipeline.frame_buffer().has_previous());
    }

    #[test]
    fn identical_frames_report_no_motion() {
        let mut pipeline = pipeline();
        let frame = square_frame(30, 20);
        pipeline.process_frame(&frame).expect("prime");
        assert_eq!(pipeline.process_frame(&frame).expect("cycle"), Report::NoMotion);
        assert!(!pipeline.motion_detected(&frame).expect("cycle"));
    }

    #[test]
    fn raw_square_is_boxed_exactly_without_smoothing_or_cleanup() {
        let config = PipelineConfig {
            blur_kernel_size: 1,
            open_iterations: 0,
            close_iterations: 0,
            dilate_iterations: 0,
            ..PipelineConfig::default()
        };
        let mut pipeline = MotionPipeline::new(config).expect("valid config");
        pipeline.process_frame(&background()).expect("prime");
        let report = pipeline.process_frame(&square_frame(60, 35)).expect("cycle");
        assert_eq!(
            report,
            Report::Motion(Detection {
                bounding_box: BoundingBox::new(60, 35, 50, 50),
                area: 2500,
            })
        );
    }

    #[test]
    fn default_cleanup_grows_the_square_by_a_fixed_margin() {
        let mut pipeline = pipeline();
        pipeline.process_frame(&background()).expect("prime");
        let report = pipeline.process_frame(&square_frame(50, 40)).expect("cycle");
        // One pixel of blur spill on each side, then three from the final dilation.
        assert_eq!(report.bounding_box(), Some(BoundingBox::new(46, 36, 58, 58)));
        assert!(report.detection().map(|d| d.area > 2500).unwrap_or(false));
    }

    #[test]
    fn isolated_noise_is_cleaned_away() {
        let mut pipeline = pipeline();
        let dark = gray_frame(140, 100, |_, _| 0);
        let speckled = gray_frame(140, 100, |x, y| if x % 7 == 3 && y % 7 == 3 { 255 } else { 0 });

        let stages = pipeline.stages().clone();
        let prev = stages.preprocess(&dark).expect("preprocess");
        let curr = stages.preprocess(&speckled).expect("preprocess");
        assert!(stages.difference_mask(&curr, &prev).expect("same size").count_foreground() > 0);
        assert_eq!(stages.motion_mask(&curr, &prev).expect("same size").count_foreground(), 0);

        pipeline.process_frame(&dark).expect("prime");
        assert_eq!(pipeline.process_frame(&speckled).expect("cycle"), Report::NoMotion);
    }

    #[test]
    fn buffer_always_holds_the_latest_frame() {
        let mut pipeline = pipeline();
        let frames = [background(), square_frame(10, 10), square_frame(90, 60), background()];
        for frame in &frames {
            pipeline.process_frame(frame).expect("cycle");
            let expected = pipeline.stages().preprocess(frame).expect("preprocess");
            assert_eq!(pipeline.frame_buffer().get(), Some(&expected));
        }
    }

    #[test]
    fn size_mismatch_leaves_the_buffer_untouched() {
        let mut pipeline = pipeline();
        let reference = background();
        pipeline.process_frame(&reference).expect("prime");
        let before = pipeline.frame_buffer().get().cloned();

        let err = pipeline.process_frame(&gray_frame(80, 60, |_, _| 50)).unwrap_err();
        assert!(matches!(err, PipelineError::DimensionMismatch { .. }));
        assert_eq!(pipeline.frame_buffer().get().cloned(), before);

        pipeline.reset();
        assert_eq!(
            pipeline.process_frame(&gray_frame(80, 60, |_, _| 50)).expect("re-prime"),
            Report::Primed
        );
    }

    #[test]
    fn empty_frames_are_rejected_before_preprocessing() {
        let mut pipeline = pipeline();
        pipeline.process_frame(&background()).expect("prime");
        let err = pipeline
            .process_frame(&RawFrame::from_rgb(RgbImage::new(0, 0)))
            .unwrap_err();
        assert!(matches!(err, PipelineError::EmptyFrame { .. }));
        assert!(pipeline.frame_buffer().has_previous());
    }

    #[test]
    fn analyze_frame_is_pure() {
        let stages = Stages::new(&PipelineConfig::default()).expect("valid");
        let prev = stages.preprocess(&background()).expect("preprocess");
        let raw = square_frame(40, 30);
        let first = analyze_frame(&stages, &raw, Some(&prev)).expect("cycle");
        let second = analyze_frame(&stages, &raw, Some(&prev)).expect("cycle");
        assert_eq!(first, second);
        assert!(matches!(first.0, Report::Motion(_)));

        let (report, _) = analyze_frame(&stages, &raw, None).expect("cycle");
        assert_eq!(report, Report::Primed);
    }

    #[test]
    fn run_drains_the_source_and_feeds_the_sink() {
        let mut pipeline = pipeline();
        let mut source = MemorySource::new([
            background(),
            square_frame(20, 20),
            square_frame(20, 20),
            gray_frame(64, 48, |_, _| 50),
            RawFrame::from_rgb(RgbImage::new(0, 5)),
            gray_frame(64, 48, |_, _| 50),
        ])
        .with_fps(30.0);
        let mut sink = RecordingSink::default();

        let summary = pipeline.run(&mut source, &mut sink);

        assert_eq!(
            summary,
            RunSummary {
                frames: 6,
                primed: 2,
                motion: 1,
                no_motion: 2,
                errors: 2,
            }
        );
        let indices: Vec<u64> = sink.seen.iter().map(|(_, m)| m.frame_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 5]);
        assert!(sink.seen[0].1.primed);
        assert!(sink.seen[1].0.is_some());
        assert!(sink.seen[1].1.region_area.is_some());
        assert!(sink.seen[3].1.primed);
        assert!(sink.seen.iter().all(|(_, m)| m.fps == Some(30.0)));
    }
}
