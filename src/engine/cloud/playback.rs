//! Speaker playback of synthesized MP3

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use crate::{Error, Result};

/// Sample rate of `OpenAI` TTS output
const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Decode MP3 bytes to mono f32 samples
///
/// # Errors
///
/// Returns error if the data is not valid MP3
pub fn decode_mp3(mp3: &[u8]) -> Result<Vec<f32>> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3));
    let mut samples = Vec::new();

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|pair| {
                        let left = f32::from(pair[0]) / 32768.0;
                        let right = f32::from(pair.get(1).copied().unwrap_or(pair[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok(samples)
}

fn output_config(device: &cpal::Device) -> Result<StreamConfig> {
    let fits = |c: &cpal::SupportedStreamConfigRange, channels: u16| {
        c.channels() == channels
            && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
            && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
    };

    let configs: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .collect();

    configs
        .iter()
        .find(|c| fits(c, 1))
        .or_else(|| configs.iter().find(|c| fits(c, 2)))
        .map(|c| c.clone().with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE)).config())
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))
}

/// Play samples on the default output, blocking until done or `stop` is set
///
/// # Errors
///
/// Returns error if the output device cannot be opened
pub fn play_blocking(samples: Vec<f32>, stop: &AtomicBool) -> Result<()> {
    if samples.is_empty() {
        return Ok(());
    }

    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;
    let config = output_config(&device)?;
    let channels = usize::from(config.channels);

    let total = samples.len();
    let position = Arc::new(AtomicUsize::new(0));
    let cursor = Arc::clone(&position);

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels) {
                    let pos = cursor.load(Ordering::Relaxed);
                    let sample = samples.get(pos).copied().unwrap_or(0.0);
                    frame.fill(sample);
                    if pos < samples.len() {
                        cursor.store(pos + 1, Ordering::Relaxed);
                    }
                }
            },
            |err| tracing::error!(error = %err, "audio playback error"),
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    let expected = Duration::from_millis(
        u64::try_from(total).unwrap_or(u64::MAX) * 1000 / u64::from(PLAYBACK_SAMPLE_RATE),
    );
    let deadline = Instant::now() + expected + Duration::from_millis(500);

    while position.load(Ordering::Relaxed) < total {
        if stop.load(Ordering::Relaxed) {
            tracing::debug!("playback interrupted");
            break;
        }
        if Instant::now() > deadline {
            tracing::warn!("playback overran, giving up");
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    // let the device drain its last buffer
    std::thread::sleep(Duration::from_millis(100));
    drop(stream);
    tracing::debug!(samples = total, "playback complete");
    Ok(())
}
