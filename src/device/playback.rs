//! Bridging a pull source onto a device callback

use crate::buffer::ReadRequest;
use crate::device::DeviceSpec;
use crate::source::AudioSource;
use std::sync::{Arc, Mutex};

/// Receives the device lifecycle and one `work` call per hardware period.
///
/// All three methods run with the callback mutex held, so a driver never
/// overlaps `work` with attach or detach.
pub trait DeviceCallback: Send {
    /// Called once before the first period with the negotiated stream shape.
    fn device_will_start(&mut self, spec: DeviceSpec);

    /// Fills one device period. Runs on the backend's real-time thread.
    fn work(&mut self, request: &mut ReadRequest);

    /// Called after the last period when the device stops.
    fn device_stopped(&mut self);
}

/// How callbacks are handed to devices. The mutex serializes start/stop
/// against periods already in flight.
pub type SharedDeviceCallback = Arc<Mutex<dyn DeviceCallback + Send>>;

/// Plays an [`AudioSource`] on a device: opens it with the negotiated
/// parameters on start, pulls one whole buffer per period, closes it on
/// stop. A source that fails to open leaves the playback silent.
pub struct AudioSourcePlayback {
    source: Box<dyn AudioSource>,
    active: bool,
}

impl AudioSourcePlayback {
    pub fn new(source: Box<dyn AudioSource>) -> Self {
        Self {
            source,
            active: false,
        }
    }

    pub fn into_source(self) -> Box<dyn AudioSource> {
        self.source
    }

    pub fn source_mut(&mut self) -> &mut dyn AudioSource {
        self.source.as_mut()
    }

    /// Wraps a playback in the form devices accept.
    pub fn shared(source: Box<dyn AudioSource>) -> SharedDeviceCallback {
        Arc::new(Mutex::new(Self::new(source)))
    }
}

impl DeviceCallback for AudioSourcePlayback {
    fn device_will_start(&mut self, spec: DeviceSpec) {
        match self.source.open(spec.buffer_size, spec.sample_rate) {
            Ok(()) => {
                self.active = true;
                log::info!(
                    "AudioSourcePlayback: source opened at {} frames / {} Hz",
                    spec.buffer_size,
                    spec.sample_rate
                );
            }
            Err(e) => {
                self.active = false;
                log::error!("AudioSourcePlayback: source failed to open: {}", e);
            }
        }
    }

    fn work(&mut self, request: &mut ReadRequest) {
        if self.active {
            self.source.read(request);
        } else {
            request.fill_silence();
        }
    }

    fn device_stopped(&mut self) {
        if self.active {
            self.source.close();
            self.active = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::AudioBuffer;
    use crate::source::SineWaveSource;

    #[test]
    fn test_playback_opens_and_closes_the_source() {
        let mut playback = AudioSourcePlayback::new(Box::new(SineWaveSource::new(440.0)));
        playback.device_will_start(DeviceSpec {
            buffer_size: 256,
            sample_rate: 48000,
            channel_count: 2,
        });

        let mut buf = AudioBuffer::new(2, 256);
        let mut request = ReadRequest::new(&mut buf, 0, 256);
        playback.work(&mut request);
        assert!(buf.channel(0).iter().any(|&s| s != 0.0));

        playback.device_stopped();
        let source = playback.into_source();
        assert!(!source.is_open());
    }

    #[test]
    fn test_work_before_start_is_silence() {
        let mut playback = AudioSourcePlayback::new(Box::new(SineWaveSource::new(440.0)));
        let mut buf = AudioBuffer::new(2, 64);
        let mut request = ReadRequest::new(&mut buf, 0, 64);
        playback.work(&mut request);
        assert!(buf.channel(0).iter().all(|&s| s == 0.0));
    }
}
