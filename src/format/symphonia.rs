//! Symphonia-backed format reader

use crate::error::{Result, SonoflowError};
use crate::format::AudioFormatReader;
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};

/// Streaming decoder over any container/codec symphonia can probe
/// (MP3, WAV, FLAC, OGG, ...). Decodes packets on demand rather than
/// loading the whole file.
pub struct SymphoniaReader {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    channels: usize,
    sample_rate: u32,
    length: Option<u64>,
    /// Interleaved samples decoded past what the last read consumed.
    leftover: Vec<f32>,
    leftover_offset: usize,
}

impl SymphoniaReader {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| {
                SonoflowError::AudioFormat(format!("Failed to probe audio format: {:?}", e))
            })?;

        let format = probed.format;
        let track = format.default_track().ok_or_else(|| {
            SonoflowError::AudioFormat("No default audio track found".to_string())
        })?;

        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| SonoflowError::AudioFormat("Sample rate not found".to_string()))?;
        let channels = track
            .codec_params
            .channels
            .ok_or_else(|| SonoflowError::AudioFormat("Channel count not found".to_string()))?
            .count();
        let length = track.codec_params.n_frames;
        let track_id = track.id;

        let decoder = get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| {
                SonoflowError::AudioFormat(format!("Failed to create decoder: {:?}", e))
            })?;

        log::info!(
            "SymphoniaReader: {} ch, {} Hz, {:?} frames: {}",
            channels,
            sample_rate,
            length,
            path.display()
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            channels,
            sample_rate,
            length,
            leftover: Vec::new(),
            leftover_offset: 0,
        })
    }

    /// Decodes the next packet into `leftover`. Returns false at end of
    /// stream.
    fn decode_next(&mut self) -> Result<bool> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(Error::IoError(_)) => return Ok(false), // end-of-file
                Err(Error::ResetRequired) => return Ok(false),
                Err(e) => {
                    return Err(SonoflowError::AudioFormat(format!(
                        "Error reading packet: {:?}",
                        e
                    )));
                }
            };
            if packet.track_id() != self.track_id {
                continue;
            }
            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(Error::IoError(_)) => return Ok(false), // also EOF in some formats
                Err(Error::DecodeError(e)) => {
                    // recoverable corruption
                    log::warn!("SymphoniaReader: skipping undecodable packet: {}", e);
                    continue;
                }
                Err(e) => {
                    return Err(SonoflowError::AudioFormat(format!(
                        "Error decoding packet: {:?}",
                        e
                    )));
                }
            };

            let spec = *decoded.spec();
            let mut tmp = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            tmp.copy_interleaved_ref(decoded);
            self.leftover.clear();
            self.leftover.extend_from_slice(tmp.samples());
            self.leftover_offset = 0;
            return Ok(true);
        }
    }
}

impl AudioFormatReader for SymphoniaReader {
    fn channel_count(&self) -> usize {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn length(&self) -> Option<u64> {
        self.length
    }

    fn read(&mut self, out: &mut [f32]) -> Result<usize> {
        let want = out.len() / self.channels * self.channels;
        let mut filled = 0;
        while filled < want {
            if self.leftover_offset >= self.leftover.len() {
                if !self.decode_next()? {
                    break;
                }
            }
            let take = (want - filled).min(self.leftover.len() - self.leftover_offset);
            out[filled..filled + take]
                .copy_from_slice(&self.leftover[self.leftover_offset..self.leftover_offset + take]);
            self.leftover_offset += take;
            filled += take;
        }
        Ok(filled / self.channels)
    }

    fn seek(&mut self, frame: u64) -> Result<()> {
        let seeked = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::TimeStamp {
                    ts: frame,
                    track_id: self.track_id,
                },
            )
            .map_err(|e| SonoflowError::AudioFormat(format!("Seek failed: {:?}", e)))?;
        self.decoder.reset();
        self.leftover.clear();
        self.leftover_offset = 0;

        // Some codecs land on the preceding sync point; decode past the gap.
        let mut to_skip = frame.saturating_sub(seeked.actual_ts) as usize * self.channels;
        while to_skip > 0 {
            if self.leftover_offset >= self.leftover.len() && !self.decode_next()? {
                break;
            }
            let drop = to_skip.min(self.leftover.len() - self.leftover_offset);
            self.leftover_offset += drop;
            to_skip -= drop;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_an_error() {
        let result = SymphoniaReader::from_path("/nonexistent/audio.wav");
        assert!(result.is_err());
    }
}
