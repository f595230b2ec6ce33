//! Decoded-audio access: the reader contract and its source adapter

mod symphonia;

pub use self::symphonia::SymphoniaReader;

use crate::buffer::ReadRequest;
use crate::error::Result;
use crate::source::{AudioSource, PositionableSource, StreamState};

/// Sequential access to decoded PCM, independent of the container format.
///
/// `read` fills an interleaved f32 slice and returns the number of whole
/// frames written; fewer than requested means end of stream. Errors are for
/// genuine I/O or decode failures, not for running out of content.
pub trait AudioFormatReader: Send {
    fn channel_count(&self) -> usize;

    /// The content's native sample rate.
    fn sample_rate(&self) -> u32;

    /// Total length in frames when the container declares one.
    fn length(&self) -> Option<u64>;

    /// Decodes into `out` (interleaved). Returns frames written.
    fn read(&mut self, out: &mut [f32]) -> Result<usize>;

    fn seek(&mut self, frame: u64) -> Result<()>;
}

/// Leaf [`PositionableSource`] over any [`AudioFormatReader`].
///
/// Transient reader errors surface as a silent block and a bumped fault
/// counter rather than tearing down playback; the next read tries again.
pub struct FormatReaderSource {
    state: StreamState,
    reader: Box<dyn AudioFormatReader>,
    staging: Vec<f32>,
    position: u64,
    faults: u64,
}

impl FormatReaderSource {
    pub fn new(reader: Box<dyn AudioFormatReader>) -> Self {
        Self {
            state: StreamState::default(),
            reader,
            staging: Vec::new(),
            position: 0,
            faults: 0,
        }
    }

    /// The reader's native sample rate, for pairing with a
    /// [`ResampledSource`](crate::resampler::ResampledSource).
    pub fn reader_sample_rate(&self) -> u32 {
        self.reader.sample_rate()
    }

    pub fn reader_channel_count(&self) -> usize {
        self.reader.channel_count()
    }

    /// Number of reads or seeks the reader has failed so far.
    pub fn faults(&self) -> u64 {
        self.faults
    }
}

impl AudioSource for FormatReaderSource {
    fn open(&mut self, buffer_size: usize, sample_rate: u32) -> Result<()> {
        if buffer_size == 0 || sample_rate == 0 {
            return Err(crate::error::SonoflowError::Configuration(
                "Buffer size and sample rate must be greater than 0".to_string(),
            ));
        }
        self.staging = vec![0.0; buffer_size * self.reader.channel_count()];
        self.state.open(buffer_size, sample_rate);
        Ok(())
    }

    fn close(&mut self) {
        self.state.close();
    }

    fn is_open(&self) -> bool {
        self.state.is_open()
    }

    fn buffer_size(&self) -> usize {
        self.state.buffer_size()
    }

    fn sample_rate(&self) -> u32 {
        self.state.sample_rate()
    }

    fn read(&mut self, request: &mut ReadRequest) -> usize {
        let reader_channels = self.reader.channel_count();
        let needed = request.frames * reader_channels;
        if self.staging.len() < needed {
            self.staging.resize(needed, 0.0);
        }
        let frames = match self.reader.read(&mut self.staging[..needed]) {
            Ok(frames) => frames,
            Err(e) => {
                log::warn!("FormatReaderSource: read failed, emitting silence: {}", e);
                self.faults += 1;
                request.fill_silence();
                return 0;
            }
        };

        let channels = reader_channels.min(request.dest.channel_count());
        for frame in 0..frames {
            for ch in 0..channels {
                request.dest.set_sample(
                    ch,
                    request.dest_start + frame,
                    self.staging[frame * reader_channels + ch],
                );
            }
        }
        for ch in 0..request.dest.channel_count() {
            let silent_from = if ch < channels { frames } else { 0 };
            request.dest.clear_range(
                ch,
                request.dest_start + silent_from,
                request.frames - silent_from,
            );
        }
        self.position += frames as u64;
        frames
    }
}

impl PositionableSource for FormatReaderSource {
    fn next_read_position(&self) -> u64 {
        self.position
    }

    fn set_next_read_position(&mut self, pos: u64) {
        let pos = match self.reader.length() {
            Some(len) => pos.min(len),
            None => pos,
        };
        match self.reader.seek(pos) {
            Ok(()) => self.position = pos,
            Err(e) => {
                log::warn!("FormatReaderSource: seek to {} failed: {}", pos, e);
                self.faults += 1;
            }
        }
    }

    fn length(&self) -> Option<u64> {
        self.reader.length()
    }
}
