//! cpal-backed driver and device

use crate::buffer::{AudioBuffer, ReadRequest};
use crate::device::{AudioDevice, AudioDriver, DeviceSpec, DeviceState, SharedDeviceCallback};
use crate::error::{Result, SonoflowError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// One cpal host exposed as a driver.
pub struct CpalDriver {
    host_id: cpal::HostId,
    host: Option<cpal::Host>,
}

impl CpalDriver {
    pub fn new(host_id: cpal::HostId) -> Self {
        Self {
            host_id,
            host: None,
        }
    }

    fn host(&self) -> Result<&cpal::Host> {
        self.host
            .as_ref()
            .ok_or_else(|| SonoflowError::AudioDriver("Driver not initialized".to_string()))
    }
}

impl AudioDriver for CpalDriver {
    fn name(&self) -> &str {
        self.host_id.name()
    }

    fn initialize(&mut self) -> Result<()> {
        let host = cpal::host_from_id(self.host_id).map_err(|e| {
            SonoflowError::AudioDriver(format!(
                "Failed to initialize host {}: {}",
                self.host_id.name(),
                e
            ))
        })?;
        log::info!("CpalDriver: initialized host {}", self.host_id.name());
        self.host = Some(host);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.host.is_some()
    }

    fn devices(&self) -> Result<Vec<String>> {
        let host = self.host()?;
        let devices = host.output_devices().map_err(|e| {
            SonoflowError::AudioDriver(format!("Failed to enumerate devices: {}", e))
        })?;
        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }

    fn default_device(&self) -> Option<String> {
        self.host
            .as_ref()?
            .default_output_device()
            .and_then(|d| d.name().ok())
    }

    fn create_device(&mut self, name: &str) -> Result<Box<dyn AudioDevice>> {
        let host = self.host()?;
        let devices = host.output_devices().map_err(|e| {
            SonoflowError::AudioDriver(format!("Failed to enumerate devices: {}", e))
        })?;
        for device in devices {
            if device.name().map(|n| n == name).unwrap_or(false) {
                return Ok(Box::new(CpalDevice::new(name.to_string(), device)));
            }
        }
        Err(SonoflowError::AudioDevice(format!(
            "No output device named '{}'",
            name
        )))
    }
}

/// One cpal output endpoint.
///
/// `open` clamps the requested sample rate and period size into the ranges
/// the backend reports. The stream itself exists only while Started; stop
/// tears it down and a later start rebuilds it.
pub struct CpalDevice {
    name: String,
    device: cpal::Device,
    state: DeviceState,
    spec: Option<DeviceSpec>,
    stream: Option<cpal::Stream>,
    callback: Option<SharedDeviceCallback>,
    failed: Arc<AtomicBool>,
}

impl CpalDevice {
    pub fn new(name: String, device: cpal::Device) -> Self {
        Self {
            name,
            device,
            state: DeviceState::Closed,
            spec: None,
            stream: None,
            callback: None,
            failed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn build_stream<T>(
        &self,
        config: &cpal::StreamConfig,
        callback: SharedDeviceCallback,
        spec: DeviceSpec,
    ) -> Result<cpal::Stream>
    where
        T: SizedSample + FromSample<f32>,
    {
        let channels = spec.channel_count;
        // Preallocated outside the period closure; regrown only if the
        // backend delivers a larger period than negotiated.
        let mut staging = AudioBuffer::new(channels, spec.buffer_size);
        let failed = Arc::clone(&self.failed);

        let stream = self
            .device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    let frames = data.len() / channels;
                    if staging.frame_count() < frames {
                        staging = AudioBuffer::new(channels, frames);
                    }
                    match callback.lock() {
                        Ok(mut guard) => {
                            let mut request = ReadRequest::new(&mut staging, 0, frames);
                            guard.work(&mut request);
                        }
                        Err(_) => {
                            for sample in data.iter_mut() {
                                *sample = T::from_sample(0.0f32);
                            }
                            return;
                        }
                    }
                    for frame in 0..frames {
                        for ch in 0..channels {
                            data[frame * channels + ch] =
                                T::from_sample(staging.sample(ch, frame));
                        }
                    }
                },
                move |err| {
                    log::error!("Audio stream error: {}", err);
                    failed.store(true, Ordering::Release);
                },
                None,
            )
            .map_err(|e| SonoflowError::AudioDevice(format!("Failed to build stream: {}", e)))?;
        Ok(stream)
    }
}

impl AudioDevice for CpalDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> DeviceState {
        if self.state == DeviceState::Started && self.failed.load(Ordering::Acquire) {
            DeviceState::Stopped
        } else {
            self.state
        }
    }

    fn preferred_buffer_size(&self) -> usize {
        match self.device.default_output_config() {
            Ok(config) => match config.buffer_size() {
                cpal::SupportedBufferSize::Range { min, max } => {
                    1024usize.clamp(*min as usize, *max as usize)
                }
                cpal::SupportedBufferSize::Unknown => 1024,
            },
            Err(_) => 1024,
        }
    }

    fn preferred_sample_rate(&self) -> u32 {
        self.device
            .default_output_config()
            .map(|c| c.sample_rate().0)
            .unwrap_or(48000)
    }

    fn spec(&self) -> Option<DeviceSpec> {
        self.spec
    }

    fn open(&mut self, buffer_size: usize, sample_rate: u32) -> Result<()> {
        if self.state != DeviceState::Closed {
            self.close();
        }
        let default = self.device.default_output_config().map_err(|e| {
            SonoflowError::AudioDevice(format!("Failed to query device config: {}", e))
        })?;
        let channels = default.channels();

        let mut min_rate = default.sample_rate().0;
        let mut max_rate = default.sample_rate().0;
        if let Ok(configs) = self.device.supported_output_configs() {
            for config in configs.filter(|c| c.channels() == channels) {
                min_rate = min_rate.min(config.min_sample_rate().0);
                max_rate = max_rate.max(config.max_sample_rate().0);
            }
        }
        let sample_rate = sample_rate.clamp(min_rate, max_rate);
        let buffer_size = match default.buffer_size() {
            cpal::SupportedBufferSize::Range { min, max } => {
                buffer_size.clamp(*min as usize, *max as usize)
            }
            cpal::SupportedBufferSize::Unknown => buffer_size,
        };

        self.spec = Some(DeviceSpec {
            buffer_size,
            sample_rate,
            channel_count: channels as usize,
        });
        self.state = DeviceState::Open;
        log::info!(
            "CpalDevice '{}': negotiated {} frames / {} Hz / {} ch",
            self.name,
            buffer_size,
            sample_rate,
            channels
        );
        Ok(())
    }

    fn start(&mut self, callback: SharedDeviceCallback) -> Result<()> {
        if !matches!(self.state, DeviceState::Open | DeviceState::Stopped) {
            return Err(SonoflowError::AudioDevice(format!(
                "Cannot start from {:?}",
                self.state
            )));
        }
        let spec = self
            .spec
            .ok_or_else(|| SonoflowError::AudioDevice("Device has no negotiated spec".into()))?;
        let default = self.device.default_output_config().map_err(|e| {
            SonoflowError::AudioDevice(format!("Failed to query device config: {}", e))
        })?;

        self.failed.store(false, Ordering::Release);
        callback
            .lock()
            .map_err(|_| SonoflowError::AudioDevice("Callback mutex poisoned".to_string()))?
            .device_will_start(spec);

        let config = cpal::StreamConfig {
            channels: spec.channel_count as u16,
            sample_rate: cpal::SampleRate(spec.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(spec.buffer_size as u32),
        };
        let stream = match default.sample_format() {
            cpal::SampleFormat::F32 => self.build_stream::<f32>(&config, callback.clone(), spec)?,
            cpal::SampleFormat::I16 => self.build_stream::<i16>(&config, callback.clone(), spec)?,
            cpal::SampleFormat::U16 => self.build_stream::<u16>(&config, callback.clone(), spec)?,
            other => {
                return Err(SonoflowError::AudioFormat(format!(
                    "Unsupported sample format: {:?}",
                    other
                )));
            }
        };
        stream
            .play()
            .map_err(|e| SonoflowError::AudioDevice(format!("Failed to start stream: {}", e)))?;

        self.stream = Some(stream);
        self.callback = Some(callback);
        self.state = DeviceState::Started;
        Ok(())
    }

    fn stop(&mut self) {
        if self.state != DeviceState::Started {
            return;
        }
        // Dropping the stream ends period delivery before the callback is
        // notified; the mutex orders us after any period in flight.
        self.stream = None;
        if let Some(callback) = self.callback.take() {
            match callback.lock() {
                Ok(mut guard) => guard.device_stopped(),
                Err(_) => log::error!("CpalDevice '{}': callback mutex poisoned", self.name),
            }
        }
        self.state = DeviceState::Stopped;
    }

    fn close(&mut self) {
        self.stop();
        self.spec = None;
        self.state = DeviceState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::AudioDriverManager;

    #[test]
    fn test_built_in_drivers_have_names() {
        // Host enumeration works without audio hardware.
        let manager = AudioDriverManager::built_in_manager();
        for name in manager.drivers() {
            assert!(!name.is_empty());
        }
    }
}
