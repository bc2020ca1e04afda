// THEORY:
// The pipeline does not own a camera and does not draw anything. It talks to
// the outside world through two seams:
//
// - A `FrameSource` hands over one raw frame per call and signals the end of
//   the stream with `None`. It is the only place that may block.
// - A `FrameSink` receives every frame after analysis, together with the box
//   (if any) and some bookkeeping. Sinks only observe; nothing they do feeds
//   back into detection.
//
// A few implementations live here: an in-memory source for tests and replay, a
// directory-of-stills source, and a broadcast bus that fans detections out to
// any number of async subscribers.

use crate::core_modules::bounding_box::BoundingBox;
use crate::core_modules::frame::RawFrame;
use crate::error::SourceError;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

/// Supplies raw frames on demand.
pub trait FrameSource {
    /// The next frame, an acquisition error, or `None` at end of stream.
    fn next_frame(&mut self) -> Option<Result<RawFrame, SourceError>>;

    /// Nominal frame rate, when the source knows it.
    fn fps(&self) -> Option<f64> {
        None
    }
}

/// Bookkeeping delivered alongside every analysed frame.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleMetadata {
    /// Zero-based position of the frame in the stream.
    pub frame_index: u64,
    pub fps: Option<f64>,
    /// Time spent inside the pipeline for this frame.
    pub elapsed: Duration,
    /// Enclosed pixel count of the reported region.
    pub region_area: Option<usize>,
    /// True when this frame only primed the buffer and could not be compared.
    pub primed: bool,
}

/// Consumes analysed frames for display, annotation or logging.
pub trait FrameSink {
    fn consume(&mut self, frame: &RawFrame, detection: Option<BoundingBox>, meta: &CycleMetadata);
}

/// Replays a fixed list of frames.
#[derive(Debug, Default)]
pub struct MemorySource {
    frames: VecDeque<RawFrame>,
    fps: Option<f64>,
}

impl MemorySource {
    pub fn new(frames: impl IntoIterator<Item = RawFrame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            fps: None,
        }
    }

    pub fn with_fps(mut self, fps: f64) -> Self {
        self.fps = Some(fps);
        self
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for MemorySource {
    fn next_frame(&mut self) -> Option<Result<RawFrame, SourceError>> {
        self.frames.pop_front().map(Ok)
    }

    fn fps(&self) -> Option<f64> {
        self.fps
    }
}

const STILL_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "bmp", "tif", "tiff", "webp"];

/// Reads a directory of still images in file-name order, one per frame.
#[derive(Debug)]
pub struct ImageSequenceSource {
    paths: VecDeque<PathBuf>,
    fps: Option<f64>,
}

impl ImageSequenceSource {
    pub fn open(dir: &Path) -> Result<Self, SourceError> {
        let io_err = |source| SourceError::Io {
            path: dir.display().to_string(),
            source,
        };
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            let is_still = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| STILL_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if path.is_file() && is_still {
                paths.push(path);
            }
        }
        paths.sort();
        debug!(dir = %dir.display(), frames = paths.len(), "opened image sequence");
        Ok(Self {
            paths: paths.into(),
            fps: None,
        })
    }

    pub fn with_fps(mut self, fps: f64) -> Self {
        self.fps = Some(fps);
        self
    }

    pub fn remaining(&self) -> usize {
        self.paths.len()
    }
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Option<Result<RawFrame, SourceError>> {
        let path = self.paths.pop_front()?;
        Some(
            image::open(&path)
                .map(|img| RawFrame::from_rgb(img.to_rgb8()))
                .map_err(|source| SourceError::Decode {
                    path: path.display().to_string(),
                    source,
                }),
        )
    }

    fn fps(&self) -> Option<f64> {
        self.fps
    }
}

/// One analysed frame as seen by bus subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionEvent {
    pub frame_index: u64,
    pub bounding_box: Option<BoundingBox>,
    pub region_area: Option<usize>,
    pub width: u32,
    pub height: u32,
}

/// A sink that broadcasts detection events to async subscribers.
///
/// Slow subscribers lag and lose the oldest events; the pipeline never waits on them.
#[derive(Clone)]
pub struct DetectionBus {
    pub events_tx: broadcast::Sender<DetectionEvent>,
}

impl DetectionBus {
    pub fn new(capacity: usize) -> Self {
        let (events_tx, _) = broadcast::channel::<DetectionEvent>(capacity.max(1));
        Self { events_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DetectionEvent> {
        self.events_tx.subscribe()
    }
}

impl FrameSink for DetectionBus {
    fn consume(&mut self, frame: &RawFrame, detection: Option<BoundingBox>, meta: &CycleMetadata) {
        // Sending only fails when nobody is subscribed.
        let _ = self.events_tx.send(DetectionEvent {
            frame_index: meta.frame_index,
            bounding_box: detection,
            region_area: meta.region_area,
            width: frame.width(),
            height: frame.height(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn solid(value: u8) -> RawFrame {
        RawFrame::from_rgb(RgbImage::from_pixel(6, 4, Rgb([value; 3])))
    }

    #[test]
    fn memory_source_replays_in_order_then_ends() {
        let mut source = MemorySource::new([solid(1), solid(2)]).with_fps(15.0);
        assert_eq!(source.fps(), Some(15.0));
        let first = source.next_frame().expect("frame").expect("ok");
        assert_eq!(first.image().get_pixel(0, 0), &Rgb([1, 1, 1]));
        assert_eq!(source.remaining(), 1);
        assert!(source.next_frame().is_some());
        assert!(source.next_frame().is_none());
    }

    #[test]
    fn image_sequence_reads_stills_sorted_by_name() {
        let dir = tempfile::tempdir().expect("temp dir");
        for (name, value) in [("frame_002.png", 20u8), ("frame_001.png", 10), ("frame_003.png", 30)] {
            RgbImage::from_pixel(5, 3, Rgb([value; 3]))
                .save(dir.path().join(name))
                .expect("write still");
        }
        std::fs::write(dir.path().join("notes.txt"), "not a frame").expect("write note");

        let mut source = ImageSequenceSource::open(dir.path()).expect("open dir");
        assert_eq!(source.remaining(), 3);
        let values: Vec<u8> = std::iter::from_fn(|| source.next_frame())
            .map(|f| f.expect("decodes").image().get_pixel(0, 0).0[0])
            .collect();
        assert_eq!(values, vec![10, 20, 30]);
    }

    #[test]
    fn undecodable_stills_surface_as_errors() {
        let dir = tempfile::tempdir().expect("temp dir");
        std::fs::write(dir.path().join("broken.png"), b"definitely not png").expect("write");
        let mut source = ImageSequenceSource::open(dir.path()).expect("open dir");
        let err = source.next_frame().expect("one entry").unwrap_err();
        assert!(matches!(err, SourceError::Decode { .. }));
        assert!(source.next_frame().is_none());
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = ImageSequenceSource::open(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, SourceError::Io { .. }));
    }

    #[tokio::test]
    async fn bus_delivers_events_to_every_subscriber() {
        let mut bus = DetectionBus::new(4);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        let meta = CycleMetadata {
            frame_index: 7,
            fps: None,
            elapsed: Duration::ZERO,
            region_area: Some(900),
            primed: false,
        };
        let bbox = BoundingBox::new(1, 2, 3, 4);
        bus.consume(&solid(0), Some(bbox), &meta);

        for rx in [&mut a, &mut b] {
            let event = rx.recv().await.expect("event");
            assert_eq!(event.frame_index, 7);
            assert_eq!(event.bounding_box, Some(bbox));
            assert_eq!((event.width, event.height), (6, 4));
        }
    }
}
