//! Device abstraction: drivers, devices, and the playback bridge

mod cpal_driver;
mod playback;

pub use cpal_driver::CpalDriver;
pub use playback::{AudioSourcePlayback, DeviceCallback, SharedDeviceCallback};

use crate::error::Result;

/// Lifecycle of a device.
///
/// Closed -> Open -> Started -> Stopped, with Stopped able to restart or
/// close. A fatal backend error is reported as Stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Closed,
    Open,
    Started,
    Stopped,
}

/// The negotiated shape of an open device stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSpec {
    pub buffer_size: usize,
    pub sample_rate: u32,
    pub channel_count: usize,
}

/// One output endpoint of a driver.
///
/// `open` negotiates stream parameters; the backend may coerce requested
/// values into its supported ranges, and the result is observable through
/// `spec()`. Devices are driven from the thread that owns them; backends
/// are not required to be `Send`.
pub trait AudioDevice {
    fn name(&self) -> &str;

    fn state(&self) -> DeviceState;

    /// Backend's preferred period size, valid before `open`.
    fn preferred_buffer_size(&self) -> usize;

    /// Backend's preferred sample rate, valid before `open`.
    fn preferred_sample_rate(&self) -> u32;

    /// The negotiated stream shape while not Closed.
    fn spec(&self) -> Option<DeviceSpec>;

    /// Negotiates the stream. Failure leaves the device Closed.
    fn open(&mut self, buffer_size: usize, sample_rate: u32) -> Result<()>;

    /// Attaches the callback and begins periods. Valid from Open or Stopped.
    fn start(&mut self, callback: SharedDeviceCallback) -> Result<()>;

    /// Pauses periods. Idempotent.
    fn stop(&mut self);

    /// Releases backend resources from any state, stopping first if needed.
    fn close(&mut self);
}

/// One audio backend (a cpal host, in practice).
pub trait AudioDriver {
    fn name(&self) -> &str;

    /// Probes the backend. Failure is reported, not fatal to the manager.
    fn initialize(&mut self) -> Result<()>;

    fn is_initialized(&self) -> bool;

    /// Output device names, in backend order.
    fn devices(&self) -> Result<Vec<String>>;

    fn default_device(&self) -> Option<String>;

    /// Binds a device by name without opening it.
    fn create_device(&mut self, name: &str) -> Result<Box<dyn AudioDevice>>;
}

/// Registry of available drivers, in registration order.
#[derive(Default)]
pub struct AudioDriverManager {
    drivers: Vec<Box<dyn AudioDriver>>,
}

impl AudioDriverManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// A manager pre-populated with one driver per backend cpal knows about
    /// on this platform. Drivers are registered uninitialized.
    pub fn built_in_manager() -> Self {
        let mut manager = Self::new();
        for host_id in cpal::available_hosts() {
            manager.add_driver(Box::new(CpalDriver::new(host_id)));
        }
        log::info!(
            "AudioDriverManager: {} built-in driver(s): {:?}",
            manager.drivers.len(),
            manager.drivers()
        );
        manager
    }

    pub fn add_driver(&mut self, driver: Box<dyn AudioDriver>) {
        self.drivers.push(driver);
    }

    /// Driver names in registration order.
    pub fn drivers(&self) -> Vec<&str> {
        self.drivers.iter().map(|d| d.name()).collect()
    }

    pub fn driver(&mut self, name: &str) -> Option<&mut dyn AudioDriver> {
        match self.drivers.iter_mut().find(|d| d.name() == name) {
            Some(driver) => Some(driver.as_mut()),
            None => None,
        }
    }
}
