//! Source abstraction: pull-based audio producers

mod buffering;
mod future;
mod memory;
mod sine;

pub use buffering::BufferingSource;
pub use future::{FutureSource, FutureStatus, SourceFuture, SourcePromise, source_promise};
pub use memory::MemorySource;
pub use sine::SineWaveSource;

use crate::buffer::ReadRequest;
use crate::error::Result;

/// A pull-based producer of audio samples.
///
/// Once opened at a buffer size and sample rate those parameters are fixed
/// until the source is closed and reopened. `read` fills the requested range
/// and returns the number of frames that carry real content; any deficit is
/// zeroed (silence) rather than reported as an error.
pub trait AudioSource: Send {
    /// Negotiates the processing block size and sample rate.
    fn open(&mut self, buffer_size: usize, sample_rate: u32) -> Result<()>;

    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// The block size negotiated at open, 0 when closed.
    fn buffer_size(&self) -> usize;

    /// The sample rate negotiated at open, 0 when closed.
    fn sample_rate(&self) -> u32;

    /// Pulls samples into the request range. Returns the number of frames of
    /// real content; the remainder of the range is zeroed by the source.
    fn read(&mut self, request: &mut ReadRequest) -> usize;
}

/// An [`AudioSource`] with a seekable read cursor and a known (or unbounded)
/// total length.
pub trait PositionableSource: AudioSource {
    /// The frame index the next `read` will start at.
    fn next_read_position(&self) -> u64;

    /// Moves the read cursor. Positions past the end are clamped to the
    /// length for bounded sources.
    fn set_next_read_position(&mut self, pos: u64);

    /// Total length in frames, or `None` for an unbounded source.
    fn length(&self) -> Option<u64>;
}

/// Open/closed state shared by every source implementation.
///
/// Keeps the negotiated parameters so `buffer_size()`/`sample_rate()` answer
/// consistently while open and report zero when closed.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamState {
    spec: Option<(usize, u32)>,
}

impl StreamState {
    pub fn open(&mut self, buffer_size: usize, sample_rate: u32) {
        self.spec = Some((buffer_size, sample_rate));
    }

    pub fn close(&mut self) {
        self.spec = None;
    }

    pub fn is_open(&self) -> bool {
        self.spec.is_some()
    }

    pub fn buffer_size(&self) -> usize {
        self.spec.map(|(b, _)| b).unwrap_or(0)
    }

    pub fn sample_rate(&self) -> u32 {
        self.spec.map(|(_, r)| r).unwrap_or(0)
    }
}
