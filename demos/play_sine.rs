//! Plays a 440 Hz sine wave on the default output device for two seconds.
//!
//! Run with `cargo run --example play_sine`.

use sonoflow::{
    AudioDriverManager, AudioSourcePlayback, Result, SineWaveSource, SonoflowError,
};
use std::time::Duration;

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let mut manager = AudioDriverManager::built_in_manager();
    let driver_name = manager
        .drivers()
        .first()
        .map(|n| n.to_string())
        .ok_or_else(|| SonoflowError::AudioDriver("No audio backends available".to_string()))?;
    let driver = manager
        .driver(&driver_name)
        .ok_or_else(|| SonoflowError::AudioDriver("Driver lookup failed".to_string()))?;
    driver.initialize()?;

    let device_name = driver
        .default_device()
        .ok_or_else(|| SonoflowError::AudioDevice("No default output device".to_string()))?;
    log::info!("Using driver '{}', device '{}'", driver_name, device_name);

    let mut device = driver.create_device(&device_name)?;
    device.open(device.preferred_buffer_size(), device.preferred_sample_rate())?;

    let playback = AudioSourcePlayback::shared(Box::new(SineWaveSource::new(440.0)));
    device.start(playback)?;

    std::thread::sleep(Duration::from_secs(2));

    device.stop();
    device.close();
    Ok(())
}
