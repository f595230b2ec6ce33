//! Synthetic sine wave source

use crate::buffer::ReadRequest;
use crate::error::{Result, SonoflowError};
use crate::source::{AudioSource, PositionableSource, StreamState};

/// Generates an unbounded sine wave on every channel of the request buffer.
///
/// The phase is derived from the read cursor, so the output is deterministic
/// for a given position regardless of how reads are chunked.
pub struct SineWaveSource {
    state: StreamState,
    frequency: f64,
    position: u64,
}

impl SineWaveSource {
    pub fn new(frequency: f64) -> Self {
        Self {
            state: StreamState::default(),
            frequency,
            position: 0,
        }
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn set_frequency(&mut self, frequency: f64) {
        self.frequency = frequency;
    }
}

impl AudioSource for SineWaveSource {
    fn open(&mut self, buffer_size: usize, sample_rate: u32) -> Result<()> {
        if buffer_size == 0 || sample_rate == 0 {
            return Err(SonoflowError::Configuration(
                "Buffer size and sample rate must be greater than 0".to_string(),
            ));
        }
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
        if !self.state.is_open() {
            request.fill_silence();
            return 0;
        }
        let sample_rate = self.state.sample_rate() as f64;
        for i in 0..request.frames {
            let t = (self.position + i as u64) as f64;
            let sample =
                (2.0 * std::f64::consts::PI * self.frequency * t / sample_rate).sin() as f32;
            for ch in 0..request.dest.channel_count() {
                request.dest.set_sample(ch, request.dest_start + i, sample);
            }
        }
        self.position += request.frames as u64;
        request.frames
    }
}

impl PositionableSource for SineWaveSource {
    fn next_read_position(&self) -> u64 {
        self.position
    }

    fn set_next_read_position(&mut self, pos: u64) {
        self.position = pos;
    }

    fn length(&self) -> Option<u64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::AudioBuffer;

    #[test]
    fn test_sine_deterministic_across_chunkings() {
        let mut src = SineWaveSource::new(440.0);
        src.open(256, 48000).unwrap();
        let mut whole = AudioBuffer::new(1, 512);
        let mut request = ReadRequest::new(&mut whole, 0, 512);
        assert_eq!(src.read(&mut request), 512);

        let mut chunked = AudioBuffer::new(1, 512);
        src.set_next_read_position(0);
        for block in 0..4 {
            let mut request = ReadRequest::new(&mut chunked, block * 128, 128);
            assert_eq!(src.read(&mut request), 128);
        }
        assert_eq!(whole.channel(0), chunked.channel(0));
        assert_eq!(src.next_read_position(), 512);
    }

    #[test]
    fn test_sine_is_unbounded() {
        let src = SineWaveSource::new(440.0);
        assert_eq!(src.length(), None);
    }

    #[test]
    fn test_read_while_closed_is_silence() {
        let mut src = SineWaveSource::new(440.0);
        let mut buf = AudioBuffer::new(2, 64);
        let mut request = ReadRequest::new(&mut buf, 0, 64);
        assert_eq!(src.read(&mut request), 0);
        assert!(buf.channel(0).iter().all(|&s| s == 0.0));
    }
}
