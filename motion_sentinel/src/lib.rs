// THEORY:
// This file is the entry point for the `motion_sentinel` library crate.
//
// The public surface is deliberately small: a `PipelineConfig`, the
// `MotionPipeline` (or its `ParallelPipeline` twin) and the `Report` it returns
// for every frame. The stages in `core_modules` are public too so they can be
// driven and tested one at a time, but a consumer only ever needs the
// pipelines plus the `FrameSource` / `FrameSink` seams in `frame_io`.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod frame_io;
pub mod parallel_pipeline;
pub mod pipeline;

pub use config::{MorphShape, PipelineConfig};
pub use core_modules::bounding_box::BoundingBox;
pub use core_modules::frame::{ChannelOrder, RawFrame};
pub use error::{ConfigError, PipelineError, SourceError};
pub use frame_io::{CycleMetadata, FrameSink, FrameSource};
pub use parallel_pipeline::ParallelPipeline;
pub use pipeline::{analyze_frame, Detection, MotionPipeline, Report, RunSummary, Stages};
