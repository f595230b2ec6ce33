//! In-memory bounded source

use crate::buffer::{AudioBuffer, ReadRequest};
use crate::error::{Result, SonoflowError};
use crate::source::{AudioSource, PositionableSource, StreamState};

/// Produces audio from an owned [`AudioBuffer`].
///
/// Bounded by the buffer's frame count; reads past the end yield silence.
pub struct MemorySource {
    state: StreamState,
    buffer: AudioBuffer,
    position: u64,
}

impl MemorySource {
    pub fn new(buffer: AudioBuffer) -> Self {
        Self {
            state: StreamState::default(),
            buffer,
            position: 0,
        }
    }

    pub fn buffer(&self) -> &AudioBuffer {
        &self.buffer
    }

    /// Replaces the underlying buffer and rewinds the read cursor.
    pub fn set_buffer(&mut self, buffer: AudioBuffer) {
        self.buffer = buffer;
        self.position = 0;
    }
}

impl AudioSource for MemorySource {
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
        let total = self.buffer.frame_count() as u64;
        let available = total.saturating_sub(self.position) as usize;
        let content = request.frames.min(available);
        let channels = self
            .buffer
            .channel_count()
            .min(request.dest.channel_count());
        for ch in 0..channels {
            request.dest.copy_range_from(
                ch,
                request.dest_start,
                content,
                &self.buffer,
                ch,
                self.position as usize,
            );
        }
        for ch in 0..request.dest.channel_count() {
            let silent_from = if ch < channels { content } else { 0 };
            request.dest.clear_range(
                ch,
                request.dest_start + silent_from,
                request.frames - silent_from,
            );
        }
        self.position += content as u64;
        content
    }
}

impl PositionableSource for MemorySource {
    fn next_read_position(&self) -> u64 {
        self.position
    }

    fn set_next_read_position(&mut self, pos: u64) {
        self.position = pos.min(self.buffer.frame_count() as u64);
    }

    fn length(&self) -> Option<u64> {
        Some(self.buffer.frame_count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_source(frames: usize) -> MemorySource {
        let mut buf = AudioBuffer::new(2, frames);
        for i in 0..frames {
            buf.set_sample(0, i, i as f32);
            buf.set_sample(1, i, -(i as f32));
        }
        MemorySource::new(buf)
    }

    #[test]
    fn test_reads_partition_the_source() {
        // Successive reads at any request size cover [0, L) exactly, then
        // silence forever after.
        for request_size in [7usize, 64, 100] {
            let mut src = ramp_source(100);
            src.open(64, 44100).unwrap();
            let mut produced: Vec<f32> = Vec::new();
            loop {
                let mut buf = AudioBuffer::new(2, request_size);
                let mut request = ReadRequest::new(&mut buf, 0, request_size);
                let n = src.read(&mut request);
                produced.extend_from_slice(&buf.channel(0)[..n]);
                if n == 0 {
                    break;
                }
            }
            let expected: Vec<f32> = (0..100).map(|i| i as f32).collect();
            assert_eq!(produced, expected, "request size {request_size}");
        }
    }

    #[test]
    fn test_read_past_end_is_silence_not_error() {
        let mut src = ramp_source(10);
        src.open(64, 44100).unwrap();
        src.set_next_read_position(8);
        let mut buf = AudioBuffer::new(2, 8);
        let mut request = ReadRequest::new(&mut buf, 0, 8);
        assert_eq!(src.read(&mut request), 2);
        assert_eq!(&buf.channel(0)[..2], &[8.0, 9.0]);
        assert!(buf.channel(0)[2..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_seek_clamps_to_length() {
        let mut src = ramp_source(10);
        src.set_next_read_position(1000);
        assert_eq!(src.next_read_position(), 10);
    }
}
