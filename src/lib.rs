//! Real-time audio streaming: pull-based sources, buffering, resampling,
//! and device playback.
//!
//! Audio flows through [`source::AudioSource`] implementations that a device
//! pulls from once per hardware period. [`source::BufferingSource`] moves
//! slow producers off the real-time thread, [`resampler::ResampledSource`]
//! converts between rates, and [`device::AudioSourcePlayback`] bridges the
//! chain onto a [`device::AudioDevice`].

pub mod buffer;
pub mod device;
pub mod error;
pub mod format;
pub mod resampler;
pub mod source;

pub use buffer::{AudioBuffer, ReadRequest};
pub use device::{
    AudioDevice, AudioDriver, AudioDriverManager, AudioSourcePlayback, CpalDriver, DeviceCallback,
    DeviceSpec, DeviceState, SharedDeviceCallback,
};
pub use error::{Result, SonoflowError};
pub use format::{AudioFormatReader, FormatReaderSource, SymphoniaReader};
pub use resampler::{MultichannelResampler, ResampleInput, ResampleQuality, ResampledSource};
pub use source::{
    AudioSource, BufferingSource, FutureSource, FutureStatus, MemorySource, PositionableSource,
    SineWaveSource, SourceFuture, SourcePromise, source_promise,
};
