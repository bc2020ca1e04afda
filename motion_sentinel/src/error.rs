// THEORY:
// Every failure the engine can surface lives here. A failed cycle is always
// local: the caller learns what went wrong, skips that frame, and carries on.
// None of these variants is raised after the frame buffer has been touched, so
// an error never leaves a half-updated reference frame behind.

use thiserror::Error;

/// Errors produced while running a single pipeline cycle.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A frame with no pixels was supplied. It is rejected before preprocessing.
    #[error("frame is empty ({width}x{height})")]
    EmptyFrame { width: u32, height: u32 },

    /// The current frame does not match the size of the buffered reference frame.
    /// The buffer must be reset before differencing can resume.
    #[error(
        "frame is {actual_width}x{actual_height} but the reference frame is {expected_width}x{expected_height}"
    )]
    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    /// A raw byte buffer does not hold `width * height` samples of the declared layout.
    #[error("buffer of {len} bytes cannot hold a {width}x{height} frame with {channels} channels")]
    MalformedFrame {
        len: usize,
        width: u32,
        height: u32,
        channels: usize,
    },

    #[error(transparent)]
    Source(#[from] SourceError),

    /// A blocking worker panicked or was cancelled.
    #[error("worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Errors raised by a frame source while acquiring the next frame.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: image::ImageError,
    },
}

/// Errors raised while loading or validating a [`crate::config::PipelineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}
