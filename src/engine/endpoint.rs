//! Energy-based utterance endpointing
//!
//! Decides when a spoken utterance has ended: speech energy followed by a
//! stretch of silence. Audio arrives in arbitrary chunks.

/// Default RMS energy above which a chunk counts as speech
pub const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum speech before an utterance can end (0.3 s at 16 kHz)
const MIN_SPEECH_SAMPLES: usize = 4800;

/// Endpointer verdict after a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Keep feeding audio
    Pending,
    /// Speech followed by enough silence
    Complete,
    /// Nothing was said before the wait expired
    NoSpeech,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Waiting,
    Speech,
}

/// Accumulates one utterance and detects its end
#[derive(Debug)]
pub struct Endpointer {
    threshold: f32,
    silence_samples: usize,
    max_wait_samples: usize,
    phase: Phase,
    waited: usize,
    speech: usize,
    silence: usize,
    buffer: Vec<f32>,
}

impl Endpointer {
    /// Create an endpointer for audio at `sample_rate`
    ///
    /// `silence_ms` of quiet after speech ends the utterance; `max_wait_ms`
    /// without any speech gives up.
    #[must_use]
    pub fn new(sample_rate: u32, silence_ms: u64, max_wait_ms: u64) -> Self {
        Self {
            threshold: ENERGY_THRESHOLD,
            silence_samples: samples_for(sample_rate, silence_ms),
            max_wait_samples: samples_for(sample_rate, max_wait_ms),
            phase: Phase::Waiting,
            waited: 0,
            speech: 0,
            silence: 0,
            buffer: Vec::new(),
        }
    }

    /// Override the speech energy threshold
    #[must_use]
    pub const fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Feed the next chunk
    pub fn push(&mut self, samples: &[f32]) -> Endpoint {
        let is_speech = rms_energy(samples) > self.threshold;

        match self.phase {
            Phase::Waiting => {
                if is_speech {
                    self.phase = Phase::Speech;
                    self.buffer.extend_from_slice(samples);
                    self.speech = samples.len();
                    self.silence = 0;
                    tracing::trace!("speech started");
                } else {
                    self.waited += samples.len();
                    if self.waited >= self.max_wait_samples {
                        return Endpoint::NoSpeech;
                    }
                }
            }
            Phase::Speech => {
                self.buffer.extend_from_slice(samples);
                if is_speech {
                    self.speech += samples.len();
                    self.silence = 0;
                } else {
                    self.silence += samples.len();
                }

                if self.silence >= self.silence_samples && self.speech > MIN_SPEECH_SAMPLES {
                    tracing::debug!(samples = self.buffer.len(), "utterance complete");
                    return Endpoint::Complete;
                }

                // a click too short to be speech: start waiting again
                if self.silence >= self.silence_samples {
                    self.phase = Phase::Waiting;
                    self.buffer.clear();
                    self.speech = 0;
                    self.silence = 0;
                }
            }
        }

        Endpoint::Pending
    }

    /// Whether any speech has been heard
    #[must_use]
    pub fn heard_speech(&self) -> bool {
        self.phase == Phase::Speech
    }

    /// Take the accumulated utterance
    pub fn take(&mut self) -> Vec<f32> {
        self.phase = Phase::Waiting;
        self.speech = 0;
        self.silence = 0;
        self.waited = 0;
        std::mem::take(&mut self.buffer)
    }
}

fn samples_for(sample_rate: u32, ms: u64) -> usize {
    usize::try_from(u64::from(sample_rate) * ms / 1000).unwrap_or(usize::MAX)
}

/// RMS energy of a chunk
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 16_000;

    fn chunk(level: f32) -> Vec<f32> {
        vec![level; 1600]
    }

    #[test]
    fn test_energy() {
        assert!(rms_energy(&[0.0; 100]) < 0.001);
        assert!(rms_energy(&[0.5; 100]) > 0.4);
        assert!(rms_energy(&[]) < f32::EPSILON);
    }

    #[test]
    fn test_speech_then_silence_completes() {
        let mut endpointer = Endpointer::new(RATE, 500, 8000);
        for _ in 0..5 {
            assert_eq!(endpointer.push(&chunk(0.2)), Endpoint::Pending);
        }
        assert!(endpointer.heard_speech());

        // 0.5 s of silence = 5 chunks of 0.1 s
        let verdicts: Vec<Endpoint> = (0..5).map(|_| endpointer.push(&chunk(0.0))).collect();
        assert_eq!(verdicts.last(), Some(&Endpoint::Complete));
        assert_eq!(endpointer.take().len(), 10 * 1600);
    }

    #[test]
    fn test_silence_gives_up() {
        let mut endpointer = Endpointer::new(RATE, 500, 1000);
        let verdicts: Vec<Endpoint> = (0..10).map(|_| endpointer.push(&chunk(0.0))).collect();
        assert_eq!(verdicts[8], Endpoint::Pending);
        assert_eq!(verdicts[9], Endpoint::NoSpeech);
    }

    #[test]
    fn test_short_click_is_ignored() {
        let mut endpointer = Endpointer::new(RATE, 500, 8000);
        endpointer.push(&chunk(0.2));
        for _ in 0..5 {
            assert_eq!(endpointer.push(&chunk(0.0)), Endpoint::Pending);
        }
        assert!(!endpointer.heard_speech());
    }
}
