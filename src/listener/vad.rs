//! Voice-activity state machine
//!
//! Classifies incoming PCM chunks as speech or silence by RMS volume and
//! tracks the Idle → Speaking → Processing cycle that drives the rest of
//! the pipeline. Timing is derived from accumulated sample counts rather
//! than wall clock, so the machine behaves identically under test and in
//! production.

use serde::{Deserialize, Serialize};

/// Voice-activity thresholds for one listening session
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// RMS volume above which a chunk counts as voiced (0.0 – 1.0)
    pub volume_threshold: f32,
    /// Sustained silence that closes a speech segment, in seconds
    pub silence_duration_secs: f32,
    /// Segments shorter than this are discarded as noise, in seconds
    pub min_speech_duration_secs: f32,
    /// Segments are force-closed after this long, in seconds
    pub max_speech_duration_secs: f32,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            volume_threshold: 0.02,
            silence_duration_secs: 1.5,
            min_speech_duration_secs: 0.3,
            max_speech_duration_secs: 30.0,
        }
    }
}

impl ListenerConfig {
    /// Thresholds tuned for the livestream scenario: a higher volume gate so
    /// game audio does not trigger, longer pauses allowed mid-commentary,
    /// and room for long continuous explanations.
    pub fn livestream() -> Self {
        Self {
            volume_threshold: 0.035,
            silence_duration_secs: 2.5,
            min_speech_duration_secs: 0.5,
            max_speech_duration_secs: 60.0,
        }
    }
}

/// Listener lifecycle state
///
/// Owned by the listener; consumers observe transitions through events and
/// never mutate the state directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ListenerState {
    /// Waiting for speech
    #[default]
    Idle,
    /// Accumulating a speech segment
    Speaking,
    /// A segment is being recognized/analyzed downstream
    Processing,
}

/// One captured utterance, consumed exactly once by the orchestrator
#[derive(Debug, Clone)]
pub struct SpeechSegment {
    /// 16-bit little-endian mono PCM
    pub pcm: Vec<u8>,
    /// Sample rate of the PCM data in Hz
    pub sample_rate: u32,
    /// Segment length in seconds, including the trailing silence
    pub duration_seconds: f32,
}

/// Speech boundary detected while processing a chunk
#[derive(Debug, Clone)]
pub enum VadEvent {
    /// Volume crossed the threshold; a segment has opened
    SpeechStarted,
    /// A segment closed with enough audio to hand downstream
    SpeechEnded { segment: SpeechSegment },
    /// A segment closed below the minimum duration and was dropped
    SegmentDiscarded { duration_seconds: f32 },
}

/// Errors from detector construction
#[derive(Debug, Clone, thiserror::Error)]
pub enum VadError {
    #[error("invalid sample rate: {0}")]
    InvalidSampleRate(u32),
}

/// RMS-based voice activity detector
pub struct VoiceActivityDetector {
    config: ListenerConfig,
    sample_rate: u32,
    state: ListenerState,
    /// Everything accumulated since the segment opened, silence included
    buffer: Vec<f32>,
    /// Samples of uninterrupted silence at the tail of the buffer
    silence_samples: u64,
}

impl VoiceActivityDetector {
    pub fn new(config: ListenerConfig, sample_rate: u32) -> Result<Self, VadError> {
        if sample_rate == 0 {
            return Err(VadError::InvalidSampleRate(sample_rate));
        }
        Ok(Self {
            config,
            sample_rate,
            state: ListenerState::Idle,
            buffer: Vec::new(),
            silence_samples: 0,
        })
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// Length of the open segment in seconds (0 outside Speaking)
    pub fn recording_duration(&self) -> f32 {
        if self.state == ListenerState::Speaking {
            self.buffer.len() as f32 / self.sample_rate as f32
        } else {
            0.0
        }
    }

    /// Accumulated samples in the open segment
    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }

    /// Feed a chunk of mono f32 samples (-1.0 to 1.0)
    ///
    /// Returns a boundary event when the chunk opens or closes a segment.
    pub fn process_chunk(&mut self, chunk: &[f32]) -> Option<VadEvent> {
        if chunk.is_empty() {
            return None;
        }

        let rms = rms(chunk);
        let voiced = rms > self.config.volume_threshold;

        match self.state {
            ListenerState::Idle => {
                if voiced {
                    self.open_segment(chunk);
                    tracing::debug!("VAD: speech started (rms {:.4})", rms);
                    return Some(VadEvent::SpeechStarted);
                }
                None
            }

            ListenerState::Speaking => {
                self.buffer.extend_from_slice(chunk);
                if voiced {
                    self.silence_samples = 0;
                } else {
                    self.silence_samples += chunk.len() as u64;
                }

                let speech_secs = self.buffer.len() as f32 / self.sample_rate as f32;
                let silence_secs = self.silence_samples as f32 / self.sample_rate as f32;

                if speech_secs > self.config.max_speech_duration_secs {
                    tracing::warn!(
                        "VAD: segment reached max duration ({:.1}s), force-closing",
                        speech_secs
                    );
                    return Some(self.emit_segment());
                }

                if silence_secs >= self.config.silence_duration_secs {
                    tracing::debug!("VAD: {:.1}s of silence, closing segment", silence_secs);
                    return Some(self.close_segment());
                }

                None
            }

            ListenerState::Processing => {
                // The pipeline is still working on the previous segment, but
                // the user may already be speaking again.
                if voiced {
                    self.open_segment(chunk);
                    tracing::debug!("VAD: new speech during processing (rms {:.4})", rms);
                    return Some(VadEvent::SpeechStarted);
                }
                None
            }
        }
    }

    /// Signal that the downstream chain for the last segment terminated
    ///
    /// Returns the machine to Idle unless a fresh segment has already
    /// re-opened Speaking in the meantime.
    pub fn finish_processing(&mut self) {
        if self.state == ListenerState::Processing {
            self.state = ListenerState::Idle;
        }
    }

    /// Return to Idle, dropping any open segment
    pub fn reset(&mut self) {
        self.state = ListenerState::Idle;
        self.buffer.clear();
        self.silence_samples = 0;
    }

    fn open_segment(&mut self, chunk: &[f32]) {
        self.state = ListenerState::Speaking;
        self.buffer.clear();
        self.buffer.extend_from_slice(chunk);
        self.silence_samples = 0;
    }

    /// Close on silence: segments whose voiced portion is below the minimum
    /// duration are noise. The trailing silence is excluded from the check -
    /// otherwise the silence wait alone would always satisfy the minimum.
    fn close_segment(&mut self) -> VadEvent {
        let voiced_samples = self.buffer.len() as u64 - self.silence_samples;
        let voiced_secs = voiced_samples as f32 / self.sample_rate as f32;
        if voiced_secs < self.config.min_speech_duration_secs {
            tracing::debug!(
                "VAD: segment too short ({:.2}s < {:.2}s), discarding",
                voiced_secs,
                self.config.min_speech_duration_secs
            );
            self.reset();
            return VadEvent::SegmentDiscarded {
                duration_seconds: voiced_secs,
            };
        }
        self.emit_segment()
    }

    /// Hand the accumulated buffer downstream and enter Processing
    fn emit_segment(&mut self) -> VadEvent {
        let samples = std::mem::take(&mut self.buffer);
        let duration = samples.len() as f32 / self.sample_rate as f32;
        self.silence_samples = 0;
        self.state = ListenerState::Processing;

        tracing::info!("VAD: segment closed ({:.2}s, {} samples)", duration, samples.len());

        VadEvent::SpeechEnded {
            segment: SpeechSegment {
                pcm: to_pcm_bytes(&samples),
                sample_rate: self.sample_rate,
                duration_seconds: duration,
            },
        }
    }
}

/// Root-mean-square volume of a chunk
fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|&s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Convert f32 samples to 16-bit little-endian PCM bytes
fn to_pcm_bytes(samples: &[f32]) -> Vec<u8> {
    let mut pcm = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
        pcm.extend_from_slice(&value.to_le_bytes());
    }
    pcm
}
