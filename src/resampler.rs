//! Sample rate conversion built on rubato's fixed-output resamplers

use crate::buffer::{AudioBuffer, ReadRequest};
use crate::error::{Result, SonoflowError};
use crate::source::{AudioSource, PositionableSource, StreamState};
use rubato::{
    FastFixedOut, PolynomialDegree, Resampler, SincFixedOut, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};

/// Resampling quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResampleQuality {
    /// Polynomial interpolation, cheaper but audibly rougher.
    Fast,
    /// Sinc interpolation, higher quality.
    Sinc,
}

impl Default for ResampleQuality {
    fn default() -> Self {
        Self::Sinc
    }
}

enum ResamplerImpl {
    Fast(FastFixedOut<f32>),
    Sinc(SincFixedOut<f32>),
}

impl ResamplerImpl {
    fn process(
        &mut self,
        input: &[Vec<f32>],
    ) -> std::result::Result<Vec<Vec<f32>>, rubato::ResampleError> {
        match self {
            Self::Fast(r) => r.process(input, None),
            Self::Sinc(r) => r.process(input, None),
        }
    }

    fn input_frames_next(&self) -> usize {
        match self {
            Self::Fast(r) => r.input_frames_next(),
            Self::Sinc(r) => r.input_frames_next(),
        }
    }

    fn input_frames_max(&self) -> usize {
        match self {
            Self::Fast(r) => r.input_frames_max(),
            Self::Sinc(r) => r.input_frames_max(),
        }
    }

    fn output_delay(&self) -> usize {
        match self {
            Self::Fast(r) => r.output_delay(),
            Self::Sinc(r) => r.output_delay(),
        }
    }

    fn reset(&mut self) {
        match self {
            Self::Fast(r) => r.reset(),
            Self::Sinc(r) => r.reset(),
        }
    }
}

/// Supplies input-rate samples to [`MultichannelResampler::process`] on
/// demand. A short fill (the remainder zeroed per [`ReadRequest`] semantics)
/// marks the end of the stream.
pub trait ResampleInput {
    fn supply(&mut self, request: &mut ReadRequest) -> usize;
}

/// Pull-model rate converter for a whole channel group.
///
/// Each `process` call fills an output request by draining an internal
/// per-channel store, pulling exactly the input frames rubato asks for
/// through the [`ResampleInput`] hook whenever the store runs short. The
/// converter's intrinsic latency (`output_delay`) is swallowed so the first
/// output frame corresponds to the first input frame.
pub struct MultichannelResampler {
    resampler: Option<ResamplerImpl>,
    input_rate: u32,
    output_rate: u32,
    channels: usize,
    staging: AudioBuffer,
    pending: Vec<Vec<f32>>,
    pending_offset: usize,
    delay_remaining: usize,
}

impl MultichannelResampler {
    /// `chunk` is the fixed number of output frames produced per internal
    /// conversion step. Equal rates short-circuit to a plain copy.
    pub fn new(
        input_rate: u32,
        output_rate: u32,
        channels: usize,
        chunk: usize,
        quality: ResampleQuality,
    ) -> Result<Self> {
        if input_rate == 0 || output_rate == 0 {
            return Err(SonoflowError::Resample(
                "Sample rates must be greater than 0".to_string(),
            ));
        }
        if channels == 0 {
            return Err(SonoflowError::Resample(
                "Channel count must be greater than 0".to_string(),
            ));
        }
        if chunk == 0 {
            return Err(SonoflowError::Resample(
                "Chunk size must be greater than 0".to_string(),
            ));
        }

        if input_rate == output_rate {
            return Ok(Self {
                resampler: None,
                input_rate,
                output_rate,
                channels,
                staging: AudioBuffer::new(0, 0),
                pending: Vec::new(),
                pending_offset: 0,
                delay_remaining: 0,
            });
        }

        // output/input: rubato wants the ratio the signal is stretched by.
        let resample_ratio = output_rate as f64 / input_rate as f64;
        log::info!(
            "Creating {:?} resampler: {} Hz -> {} Hz (fixed output: {} frames)",
            quality,
            input_rate,
            output_rate,
            chunk
        );

        let resampler = match quality {
            ResampleQuality::Fast => {
                let fast = FastFixedOut::new(
                    resample_ratio,
                    1.0, // ratio is fixed for the converter's lifetime
                    PolynomialDegree::Septic,
                    chunk,
                    channels,
                )
                .map_err(|e| {
                    SonoflowError::Resample(format!("Failed to create fast resampler: {}", e))
                })?;
                ResamplerImpl::Fast(fast)
            }
            ResampleQuality::Sinc => {
                let params = SincInterpolationParameters {
                    sinc_len: 256,
                    f_cutoff: 0.95,
                    interpolation: SincInterpolationType::Linear,
                    oversampling_factor: 256,
                    window: WindowFunction::BlackmanHarris2,
                };
                let sinc = SincFixedOut::new(resample_ratio, 1.0, params, chunk, channels)
                    .map_err(|e| {
                        SonoflowError::Resample(format!("Failed to create sinc resampler: {}", e))
                    })?;
                ResamplerImpl::Sinc(sinc)
            }
        };

        let staging = AudioBuffer::new(channels, resampler.input_frames_max());
        let delay = resampler.output_delay();
        Ok(Self {
            resampler: Some(resampler),
            input_rate,
            output_rate,
            channels,
            staging,
            pending: vec![Vec::new(); channels],
            pending_offset: 0,
            delay_remaining: delay,
        })
    }

    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels
    }

    /// output frames per input frame
    pub fn ratio(&self) -> f64 {
        self.output_rate as f64 / self.input_rate as f64
    }

    /// Fills the whole request with output-rate samples, pulling from `input`
    /// as needed. Once the hook reports end of stream the conversion tail is
    /// padded with silence, so the request is always filled completely.
    pub fn process(&mut self, input: &mut dyn ResampleInput, request: &mut ReadRequest) -> Result<()> {
        if self.resampler.is_none() {
            input.supply(request);
            return Ok(());
        }

        let mut written = 0;
        while written < request.frames {
            let available = self.pending_frames();
            if available == 0 {
                self.generate(input)?;
                continue;
            }
            let take = available.min(request.frames - written);
            let channels = self.channels.min(request.dest.channel_count());
            for ch in 0..channels {
                let src = &self.pending[ch][self.pending_offset..self.pending_offset + take];
                request.dest.channel_mut(ch)[request.dest_start + written..]
                    [..take]
                    .copy_from_slice(src);
            }
            for ch in self.channels..request.dest.channel_count() {
                request.dest.clear_range(ch, request.dest_start + written, take);
            }
            self.pending_offset += take;
            written += take;
        }
        Ok(())
    }

    /// Clears conversion state, including buffered output and the
    /// latency-skip countdown. Call after repositioning the input.
    pub fn reset(&mut self) {
        if let Some(resampler) = &mut self.resampler {
            resampler.reset();
            self.delay_remaining = resampler.output_delay();
        }
        for ch in &mut self.pending {
            ch.clear();
        }
        self.pending_offset = 0;
    }

    fn pending_frames(&self) -> usize {
        self.pending
            .first()
            .map(|ch| ch.len() - self.pending_offset)
            .unwrap_or(0)
    }

    fn generate(&mut self, input: &mut dyn ResampleInput) -> Result<()> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(());
        };
        let need = resampler.input_frames_next();
        let mut request = ReadRequest::new(&mut self.staging, 0, need);
        input.supply(&mut request);

        let mut waves: Vec<Vec<f32>> = Vec::with_capacity(self.channels);
        for ch in 0..self.channels {
            waves.push(self.staging.channel(ch)[..need].to_vec());
        }
        let output = resampler
            .process(&waves)
            .map_err(|e| SonoflowError::Resample(format!("Resampling error: {}", e)))?;

        let produced = output.first().map(|ch| ch.len()).unwrap_or(0);
        let skip = self.delay_remaining.min(produced);
        self.delay_remaining -= skip;
        self.pending = output;
        self.pending_offset = skip;
        Ok(())
    }
}

struct SourceInput<'a> {
    source: &'a mut dyn PositionableSource,
}

impl ResampleInput for SourceInput<'_> {
    fn supply(&mut self, request: &mut ReadRequest) -> usize {
        self.source.read(request)
    }
}

/// A [`PositionableSource`] whose content plays at whatever rate `open`
/// negotiates, converting from the wrapped source's native rate.
///
/// Positions and lengths are in output frames; seeks are mapped back to the
/// nearest input frame and the converter state is reset.
pub struct ResampledSource {
    state: StreamState,
    source: Box<dyn PositionableSource + Send>,
    channels: usize,
    source_rate: u32,
    quality: ResampleQuality,
    resampler: Option<MultichannelResampler>,
    position: u64,
}

impl ResampledSource {
    /// `source_rate` is the wrapped source's native sample rate.
    pub fn new(
        source: Box<dyn PositionableSource + Send>,
        channels: usize,
        source_rate: u32,
        quality: ResampleQuality,
    ) -> Self {
        Self {
            state: StreamState::default(),
            source,
            channels,
            source_rate,
            quality,
            resampler: None,
            position: 0,
        }
    }

    fn ratio(&self) -> Option<f64> {
        self.resampler.as_ref().map(|r| r.ratio())
    }

    fn output_length(&self) -> Option<u64> {
        let ratio = self.ratio()?;
        let input_len = self.source.length()?;
        Some((input_len as f64 * ratio).ceil() as u64)
    }

    fn input_position(&self, output_pos: u64) -> u64 {
        match self.ratio() {
            Some(ratio) => (output_pos as f64 / ratio).floor() as u64,
            None => output_pos,
        }
    }
}

impl AudioSource for ResampledSource {
    fn open(&mut self, buffer_size: usize, sample_rate: u32) -> Result<()> {
        // The wrapped source runs at its own rate regardless of ours.
        self.source.open(buffer_size, self.source_rate)?;
        let resampler = MultichannelResampler::new(
            self.source_rate,
            sample_rate,
            self.channels,
            buffer_size.max(1),
            self.quality,
        )?;
        self.resampler = Some(resampler);
        self.state.open(buffer_size, sample_rate);
        let input_pos = self.input_position(self.position);
        self.source.set_next_read_position(input_pos);
        Ok(())
    }

    fn close(&mut self) {
        self.source.close();
        self.resampler = None;
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
        let Some(resampler) = self.resampler.as_mut() else {
            request.fill_silence();
            return 0;
        };
        let remaining = match self.source.length() {
            Some(len) => {
                let total = (len as f64 * resampler.ratio()).ceil() as u64;
                total.saturating_sub(self.position) as usize
            }
            None => request.frames,
        };
        let produce = request.frames.min(remaining);
        if produce > 0 {
            let mut sub = ReadRequest::new(&mut *request.dest, request.dest_start, produce);
            let mut hook = SourceInput {
                source: self.source.as_mut(),
            };
            if let Err(e) = resampler.process(&mut hook, &mut sub) {
                log::error!("ResampledSource: {}", e);
                request.fill_silence();
                return 0;
            }
        }
        for ch in 0..request.dest.channel_count() {
            request
                .dest
                .clear_range(ch, request.dest_start + produce, request.frames - produce);
        }
        self.position += produce as u64;
        produce
    }
}

impl PositionableSource for ResampledSource {
    fn next_read_position(&self) -> u64 {
        self.position
    }

    fn set_next_read_position(&mut self, pos: u64) {
        let pos = match self.output_length() {
            Some(len) => pos.min(len),
            None => pos,
        };
        self.position = pos;
        let input_pos = self.input_position(pos);
        self.source.set_next_read_position(input_pos);
        if let Some(resampler) = &mut self.resampler {
            resampler.reset();
        }
    }

    fn length(&self) -> Option<u64> {
        self.output_length()
    }
}
