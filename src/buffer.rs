//! Rectangular sample storage and the per-pull read descriptor

/// A rectangular store of f32 samples indexed by (channel, frame).
///
/// Channel count and frame capacity are fixed at construction. Samples are
/// kept channel-major so each channel is a contiguous slice, which is what
/// the resampler and the device boundary both want.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    channels: usize,
    frames: usize,
    data: Vec<f32>,
}

impl AudioBuffer {
    /// Creates a silent buffer with the given shape.
    pub fn new(channels: usize, frames: usize) -> Self {
        Self {
            channels,
            frames,
            data: vec![0.0; channels * frames],
        }
    }

    /// Builds a buffer from interleaved samples (frame-major, as decoders
    /// and devices produce them).
    pub fn from_interleaved(samples: &[f32], channels: usize) -> Self {
        let frames = if channels == 0 {
            0
        } else {
            samples.len() / channels
        };
        let mut buf = Self::new(channels, frames);
        buf.fill_from_interleaved(samples, 0, frames);
        buf
    }

    pub fn channel_count(&self) -> usize {
        self.channels
    }

    pub fn frame_count(&self) -> usize {
        self.frames
    }

    pub fn channel(&self, channel: usize) -> &[f32] {
        let start = channel * self.frames;
        &self.data[start..start + self.frames]
    }

    pub fn channel_mut(&mut self, channel: usize) -> &mut [f32] {
        let start = channel * self.frames;
        &mut self.data[start..start + self.frames]
    }

    pub fn sample(&self, channel: usize, frame: usize) -> f32 {
        self.data[channel * self.frames + frame]
    }

    pub fn set_sample(&mut self, channel: usize, frame: usize, value: f32) {
        self.data[channel * self.frames + frame] = value;
    }

    /// Zeroes the whole buffer.
    pub fn clear(&mut self) {
        self.data.fill(0.0);
    }

    /// Zeroes `len` frames of one channel starting at `start`.
    pub fn clear_range(&mut self, channel: usize, start: usize, len: usize) {
        self.channel_mut(channel)[start..start + len].fill(0.0);
    }

    /// Copies `len` frames of `src_channel` in `src` (starting at
    /// `src_start`) into `channel` of this buffer (starting at `dest_start`).
    pub fn copy_range_from(
        &mut self,
        channel: usize,
        dest_start: usize,
        len: usize,
        src: &AudioBuffer,
        src_channel: usize,
        src_start: usize,
    ) {
        let dst = &mut self.channel_mut(channel)[dest_start..dest_start + len];
        dst.copy_from_slice(&src.channel(src_channel)[src_start..src_start + len]);
    }

    /// Scatters interleaved samples into the buffer starting at `dest_start`.
    pub fn fill_from_interleaved(&mut self, samples: &[f32], dest_start: usize, frames: usize) {
        for frame in 0..frames {
            for ch in 0..self.channels {
                self.data[ch * self.frames + dest_start + frame] =
                    samples[frame * self.channels + ch];
            }
        }
    }

    /// Gathers `frames` frames starting at `src_start` into an interleaved
    /// slice. `out` must hold at least `frames * channel_count` samples.
    pub fn write_interleaved(&self, src_start: usize, frames: usize, out: &mut [f32]) {
        for frame in 0..frames {
            for ch in 0..self.channels {
                out[frame * self.channels + ch] = self.data[ch * self.frames + src_start + frame];
            }
        }
    }
}

/// The descriptor a source receives on each pull: fill `frames` frames of
/// `dest` starting at `dest_start`.
///
/// A source either fills the full range with content or zeroes whatever it
/// cannot supply; the `read` return value reports how many frames carry real
/// content.
pub struct ReadRequest<'a> {
    pub dest: &'a mut AudioBuffer,
    pub dest_start: usize,
    pub frames: usize,
}

impl<'a> ReadRequest<'a> {
    pub fn new(dest: &'a mut AudioBuffer, dest_start: usize, frames: usize) -> Self {
        debug_assert!(dest_start + frames <= dest.frame_count());
        Self {
            dest,
            dest_start,
            frames,
        }
    }

    /// Zeroes the whole requested range on every channel.
    pub fn fill_silence(&mut self) {
        for ch in 0..self.dest.channel_count() {
            self.dest.clear_range(ch, self.dest_start, self.frames);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_shape_fixed_at_construction() {
        let buf = AudioBuffer::new(2, 64);
        assert_eq!(buf.channel_count(), 2);
        assert_eq!(buf.frame_count(), 64);
        assert!(buf.channel(1).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_interleaved_round_trip() {
        let interleaved = [0.1, -0.1, 0.2, -0.2, 0.3, -0.3];
        let buf = AudioBuffer::from_interleaved(&interleaved, 2);
        assert_eq!(buf.frame_count(), 3);
        assert_eq!(buf.channel(0), &[0.1, 0.2, 0.3]);
        assert_eq!(buf.channel(1), &[-0.1, -0.2, -0.3]);

        let mut out = [0.0f32; 6];
        buf.write_interleaved(0, 3, &mut out);
        assert_eq!(out, interleaved);
    }

    #[test]
    fn test_copy_range_with_offsets() {
        let mut src = AudioBuffer::new(1, 8);
        for i in 0..8 {
            src.set_sample(0, i, i as f32);
        }
        let mut dst = AudioBuffer::new(1, 8);
        dst.copy_range_from(0, 2, 4, &src, 0, 1);
        assert_eq!(dst.channel(0), &[0.0, 0.0, 1.0, 2.0, 3.0, 4.0, 0.0, 0.0]);
    }

    #[test]
    fn test_request_fill_silence() {
        let mut buf = AudioBuffer::new(2, 4);
        for ch in 0..2 {
            for f in 0..4 {
                buf.set_sample(ch, f, 1.0);
            }
        }
        let mut request = ReadRequest::new(&mut buf, 1, 2);
        request.fill_silence();
        assert_eq!(buf.channel(0), &[1.0, 0.0, 0.0, 1.0]);
        assert_eq!(buf.channel(1), &[1.0, 0.0, 0.0, 1.0]);
    }
}
