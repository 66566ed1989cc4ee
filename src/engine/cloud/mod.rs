//! Cloud speech engines over the host's microphone and speaker
//!
//! Capture records from the pinned (or default) input device on a dedicated
//! thread, ends the utterance with energy endpointing and sends it to
//! Whisper. Synthesis fetches `OpenAI` speech and plays it on the default
//! output.

mod playback;
mod stt;
mod tts;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::SampleRate;
use tokio::task::JoinHandle;

pub use stt::SpeechToText;
pub use tts::TextToSpeech;

use super::endpoint::{Endpoint, Endpointer};
use super::{
    CaptureEngine, CaptureError, CaptureEvent, CaptureRequest, SynthesisEngine, SynthesisEvent,
    UtteranceId,
};
use crate::arbiter::{Event, EventSender};
use crate::audio::host::{PinnedDevice, input_device};
use crate::{Error, Result};

/// Capture sample rate (16 kHz mono speech)
pub const SAMPLE_RATE: u32 = 16000;

/// How often the recording thread checks the endpointer
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Microphone + Whisper capture engine
pub struct CloudCapture {
    stt: SpeechToText,
    events: EventSender,
    pinned: PinnedDevice,
    max_wait: Duration,
    generation: Arc<AtomicU64>,
    active: Arc<AtomicBool>,
    finish: Option<Arc<AtomicBool>>,
}

impl CloudCapture {
    /// Create a capture engine
    ///
    /// `max_wait` is how long an attempt waits for speech to begin.
    #[must_use]
    pub fn new(stt: SpeechToText, events: EventSender, pinned: PinnedDevice, max_wait: Duration) -> Self {
        Self {
            stt,
            events,
            pinned,
            max_wait,
            generation: Arc::new(AtomicU64::new(0)),
            active: Arc::new(AtomicBool::new(false)),
            finish: None,
        }
    }

    fn pinned_name(&self) -> Option<String> {
        self.pinned.read().ok().and_then(|name| name.clone())
    }
}

/// State shared by one attempt's thread and transcription task
#[derive(Clone)]
struct Attempt {
    id: u64,
    generation: Arc<AtomicU64>,
    active: Arc<AtomicBool>,
    events: EventSender,
}

impl Attempt {
    fn is_current(&self) -> bool {
        self.generation.load(Ordering::Relaxed) == self.id
    }

    /// Post from the recording thread
    fn post_blocking(&self, event: CaptureEvent) {
        if !self.is_current() {
            return;
        }
        if self.events.blocking_send(Event::Capture(event)).is_err() {
            tracing::trace!("arbiter gone, capture event dropped");
        }
    }

    /// Post the attempt's result from the async side
    async fn finish(&self, event: CaptureEvent) {
        if !self.is_current() {
            tracing::debug!(attempt = self.id, "superseded capture result dropped");
            return;
        }
        self.active.store(false, Ordering::Relaxed);
        if self.events.send(Event::Capture(event)).await.is_err() {
            tracing::trace!("arbiter gone, capture result dropped");
        }
    }
}

impl CaptureEngine for CloudCapture {
    fn start(&mut self, request: &CaptureRequest) -> Result<()> {
        self.cancel();

        let id = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let finish = Arc::new(AtomicBool::new(false));
        self.finish = Some(Arc::clone(&finish));
        self.active.store(true, Ordering::Relaxed);

        let attempt = Attempt {
            id,
            generation: Arc::clone(&self.generation),
            active: Arc::clone(&self.active),
            events: self.events.clone(),
        };
        let device = self.pinned_name();
        let stt = self.stt.clone();
        let request = request.clone();
        let max_wait = self.max_wait;
        let runtime = tokio::runtime::Handle::current();

        std::thread::Builder::new()
            .name("earpiece-capture".to_string())
            .spawn(move || {
                let recorded = record(device.as_deref(), &request, max_wait, &finish, &attempt);
                let samples = match recorded {
                    Ok(Some(samples)) => samples,
                    Ok(None) => {
                        runtime.block_on(attempt.finish(CaptureEvent::Error(CaptureError::SpeechTimeout)));
                        return;
                    }
                    Err(code) => {
                        runtime.block_on(attempt.finish(CaptureEvent::Error(code)));
                        return;
                    }
                };

                let wav = match samples_to_wav(&samples, SAMPLE_RATE) {
                    Ok(wav) => wav,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to encode utterance");
                        runtime.block_on(attempt.finish(CaptureEvent::Error(CaptureError::Audio)));
                        return;
                    }
                };

                runtime.spawn(async move {
                    let event = match stt.transcribe(wav, &request.locale).await {
                        Ok(text) => CaptureEvent::Final(text),
                        Err(code) => CaptureEvent::Error(code),
                    };
                    attempt.finish(event).await;
                });
            })
            .map_err(|e| Error::Capture(format!("failed to spawn capture thread: {e}")))?;

        Ok(())
    }

    fn stop(&mut self) {
        if let Some(finish) = &self.finish {
            finish.store(true, Ordering::Relaxed);
        }
    }

    fn cancel(&mut self) {
        if let Some(finish) = self.finish.take() {
            finish.store(true, Ordering::Relaxed);
        }
        self.generation.fetch_add(1, Ordering::Relaxed);
        self.active.store(false, Ordering::Relaxed);
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }
}

/// Record one utterance; `None` when nothing was said
fn record(
    device: Option<&str>,
    request: &CaptureRequest,
    max_wait: Duration,
    finish: &AtomicBool,
    attempt: &Attempt,
) -> std::result::Result<Option<Vec<f32>>, CaptureError> {
    let device = input_device(device).map_err(|e| {
        tracing::error!(error = %e, "no usable input device");
        CaptureError::Audio
    })?;

    let config = device
        .supported_input_configs()
        .map_err(|e| {
            tracing::error!(error = %e, "cannot query input configs");
            CaptureError::Audio
        })?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        })
        .ok_or_else(|| {
            tracing::error!("input device has no 16 kHz mono config");
            CaptureError::Audio
        })?
        .with_sample_rate(SampleRate(SAMPLE_RATE))
        .config();

    let buffer = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&buffer);
    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if let Ok(mut buf) = sink.lock() {
                    buf.extend_from_slice(data);
                }
            },
            |err| tracing::error!(error = %err, "audio capture error"),
            None,
        )
        .map_err(|e| {
            tracing::error!(error = %e, "failed to open input stream");
            CaptureError::Audio
        })?;
    stream.play().map_err(|e| {
        tracing::error!(error = %e, "failed to start input stream");
        CaptureError::Audio
    })?;

    attempt.post_blocking(CaptureEvent::Ready);
    let max_wait_ms = u64::try_from(max_wait.as_millis()).unwrap_or(u64::MAX);
    let mut endpointer = Endpointer::new(SAMPLE_RATE, request.silence_ms, max_wait_ms);

    loop {
        std::thread::sleep(POLL_INTERVAL);
        let chunk = buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default();

        if finish.load(Ordering::Relaxed) {
            return Ok(endpointer.heard_speech().then(|| endpointer.take()));
        }

        match endpointer.push(&chunk) {
            Endpoint::Pending => {}
            Endpoint::Complete => return Ok(Some(endpointer.take())),
            Endpoint::NoSpeech => return Ok(None),
        }
    }
}

/// Encode mono f32 samples as 16-bit PCM WAV
///
/// # Errors
///
/// Returns error if encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;
        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let pcm = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(pcm)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }
        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

/// `OpenAI` TTS + speaker synthesis engine
pub struct CloudSynthesis {
    tts: TextToSpeech,
    events: EventSender,
    current: Option<(JoinHandle<()>, Arc<AtomicBool>)>,
}

impl CloudSynthesis {
    /// Create a synthesis engine
    #[must_use]
    pub const fn new(tts: TextToSpeech, events: EventSender) -> Self {
        Self {
            tts,
            events,
            current: None,
        }
    }
}

impl SynthesisEngine for CloudSynthesis {
    fn speak(&mut self, text: &str, id: UtteranceId) -> Result<()> {
        self.stop();

        let interrupted = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&interrupted);
        let tts = self.tts.clone();
        let events = self.events.clone();
        let text = text.to_string();

        let task = tokio::spawn(async move {
            if events.send(SynthesisEvent::Started(id).into()).await.is_err() {
                return;
            }

            let played = match tts.synthesize(&text).await {
                Ok(mp3) => tokio::task::spawn_blocking(move || {
                    playback::decode_mp3(&mp3).and_then(|samples| playback::play_blocking(samples, &flag))
                })
                .await
                .map_err(|e| Error::Synthesis(e.to_string()))
                .and_then(|r| r),
                Err(e) => Err(e),
            };

            let event = match played {
                Ok(()) => SynthesisEvent::Done(id),
                Err(e) => SynthesisEvent::Failed(id, e.to_string()),
            };
            if events.send(event.into()).await.is_err() {
                tracing::trace!(id, "arbiter gone, synthesis result dropped");
            }
        });

        self.current = Some((task, interrupted));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some((task, interrupted)) = self.current.take() {
            interrupted.store(true, Ordering::Relaxed);
            task.abort();
        }
    }
}
