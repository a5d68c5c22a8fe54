pub mod gst;

pub use gst::VideoSource;

use thiserror::Error;

/// Outcome of a successful pull from the producer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStep {
    /// A frame landed in the destination buffer
    Frame,
    /// The stream is exhausted
    EndOfStream,
}

/// Producer failures, split by whether playback can continue
#[derive(Debug, Error)]
pub enum VideoError {
    /// One frame failed to decode; the destination buffer holds whatever
    /// the decoder managed to produce
    #[error("failed to decode frame: {0}")]
    Decode(String),
    /// The pipeline itself died; no further frames will arrive
    #[error("video pipeline failed: {0}")]
    Pipeline(String),
}
