use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use dotmatrix_core::audio_queue::AudioConsumer;

/// Sample rate of the default output device, for configuring the APU before
/// the stream starts.
pub fn preferred_sample_rate() -> Option<u32> {
    let host = cpal::default_host();
    let device = host.default_output_device()?;
    let config = device.default_output_config().ok()?;
    Some(config.sample_rate().0)
}

/// Start audio playback using `cpal`, draining mono samples produced by the
/// APU. Underruns are filled with silence so glitches do not propagate.
///
/// Returns the active [`cpal::Stream`] if successful.
pub fn start_stream(consumer: AudioConsumer) -> Option<cpal::Stream> {
    let host = cpal::default_host();
    let device = host.default_output_device()?;
    let supported = match device.default_output_config() {
        Ok(c) => c,
        Err(e) => {
            log::warn!("no supported audio output config: {e}");
            return None;
        }
    };
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    let channels = config.channels as usize;
    let err_fn = |err| log::warn!("cpal stream error: {err}");

    let stream = match sample_format {
        cpal::SampleFormat::F32 => device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _| {
                    for frame in data.chunks_mut(channels) {
                        let sample = consumer.pop().unwrap_or(0.0);
                        for out in frame.iter_mut() {
                            *out = sample;
                        }
                    }
                },
                err_fn,
                None,
            )
            .ok()?,
        cpal::SampleFormat::I16 => device
            .build_output_stream(
                &config,
                move |data: &mut [i16], _| {
                    for frame in data.chunks_mut(channels) {
                        let sample = consumer.pop().unwrap_or(0.0);
                        let val = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                        for out in frame.iter_mut() {
                            *out = val;
                        }
                    }
                },
                err_fn,
                None,
            )
            .ok()?,
        cpal::SampleFormat::U16 => device
            .build_output_stream(
                &config,
                move |data: &mut [u16], _| {
                    for frame in data.chunks_mut(channels) {
                        let sample = consumer.pop().unwrap_or(0.0);
                        let val = ((sample.clamp(-1.0, 1.0) * 0.5 + 0.5) * u16::MAX as f32) as u16;
                        for out in frame.iter_mut() {
                            *out = val;
                        }
                    }
                },
                err_fn,
                None,
            )
            .ok()?,
        _ => {
            log::warn!("unsupported audio sample format {sample_format:?}");
            return None;
        }
    };

    if let Err(e) = stream.play() {
        log::warn!("failed to start audio stream: {e}");
        return None;
    }
    Some(stream)
}
