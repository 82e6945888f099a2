//! Mikrofon Capture
//!
//! Verwendet cpal für Cross-Platform Audio Input. Aufgenommenes Audio wird
//! auf Mono gemischt, auf 8kHz resampled und in einen Ring-Buffer
//! geschrieben, aus dem der Frame-Pump 20ms-Frames für G.711 (PCMU) liest.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig, SupportedStreamConfigRange};
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Sample Rate des PCMU-Tracks
pub const SAMPLE_RATE: u32 = 8000;

/// Frame-Dauer
pub const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Frame Size in Samples (20ms @ 8kHz = 160 samples)
pub const FRAME_SIZE: usize = 160;

/// Bevorzugte Geräte-Rate, falls unterstützt
const PREFERRED_DEVICE_RATE: u32 = 48000;

/// Buffer Size (500ms), ältere Samples werden bei Überlauf verworfen
const RING_BUFFER_SIZE: usize = FRAME_SIZE * 25;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("No audio input device found")]
    NoInputDevice,

    #[error("Unsupported audio configuration: {0}")]
    UnsupportedConfig(String),

    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),
}

// ============================================================================
// CAPTURE BUFFER
// ============================================================================

/// Geteilter Ring-Buffer mit Mono-Samples @ `SAMPLE_RATE`
#[derive(Clone)]
pub struct CaptureBuffer {
    inner: Arc<Mutex<HeapRb<f32>>>,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HeapRb::new(RING_BUFFER_SIZE))),
        }
    }

    /// Schreibt Samples; bei vollem Buffer werden die ältesten überschrieben
    pub fn write(&self, samples: &[f32]) {
        let mut buffer = self.inner.lock();
        for sample in samples {
            buffer.push_overwrite(*sample);
        }
    }

    /// Liest einen kompletten Frame, falls genug Samples da sind
    pub fn read_frame(&self) -> Option<Vec<f32>> {
        let mut buffer = self.inner.lock();
        if buffer.occupied_len() < FRAME_SIZE {
            return None;
        }

        let mut frame = Vec::with_capacity(FRAME_SIZE);
        for _ in 0..FRAME_SIZE {
            if let Some(sample) = buffer.try_pop() {
                frame.push(sample);
            }
        }
        Some(frame)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CaptureBuffer {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// MICROPHONE CAPTURE
// ============================================================================

/// Exklusiver Zugriff auf das Standard-Eingabegerät
pub struct MicrophoneCapture {
    device: Device,
    // Stream wird bei stop() gedroppt, damit das Gerät freigegeben wird
    stream: Option<Stream>,
    buffer: CaptureBuffer,
    /// Audio Level (0.0 - 1.0) für Visualisierung
    input_level: Arc<Mutex<f32>>,
}

// cpal::Stream ist nicht Send; der Stream wird nur erzeugt und gedroppt,
// nie aus einem anderen Thread benutzt.
unsafe impl Send for MicrophoneCapture {}

impl MicrophoneCapture {
    /// Öffnet das Standard-Eingabegerät
    pub fn new() -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or_else(|| {
            tracing::warn!("No audio input device found");
            AudioError::NoInputDevice
        })?;

        Ok(Self {
            device,
            stream: None,
            buffer: CaptureBuffer::new(),
            input_level: Arc::new(Mutex::new(0.0)),
        })
    }

    /// Startet die Aufnahme
    pub fn start(&mut self) -> Result<(), AudioError> {
        let config = Self::find_best_input_config(&self.device)?;

        tracing::info!(
            "Starting audio capture: {} Hz, {} channels",
            config.sample_rate.0,
            config.channels
        );

        let buffer = self.buffer.clone();
        let input_level = Arc::clone(&self.input_level);
        let source_rate = config.sample_rate.0;
        let channels = config.channels as usize;

        let stream = self
            .device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mono = downmix(data, channels);
                    *input_level.lock() = rms(&mono).min(1.0);
                    buffer.write(&resample_linear(&mono, source_rate, SAMPLE_RATE));
                },
                |err| {
                    tracing::error!("Audio capture error: {}", err);
                },
                None,
            )
            .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;

        self.stream = Some(stream);
        Ok(())
    }

    /// Stoppt die Aufnahme und gibt das Gerät frei
    pub fn stop(&mut self) {
        if self.stream.take().is_some() {
            *self.input_level.lock() = 0.0;
            tracing::info!("Audio capture stopped");
        }
    }

    pub fn buffer(&self) -> CaptureBuffer {
        self.buffer.clone()
    }

    pub fn input_level(&self) -> f32 {
        *self.input_level.lock()
    }

    fn find_best_input_config(device: &Device) -> Result<StreamConfig, AudioError> {
        let configs = device
            .supported_input_configs()
            .map_err(|e| AudioError::UnsupportedConfig(e.to_string()))?;

        select_best_config(configs.collect())
    }
}

impl Drop for MicrophoneCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Wählt eine F32-Konfiguration, bevorzugt 48kHz
fn select_best_config(configs: Vec<SupportedStreamConfigRange>) -> Result<StreamConfig, AudioError> {
    let preferred = cpal::SampleRate(PREFERRED_DEVICE_RATE);
    let f32_configs: Vec<_> = configs
        .into_iter()
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .collect();

    if let Some(config) = f32_configs
        .iter()
        .find(|c| c.min_sample_rate() <= preferred && c.max_sample_rate() >= preferred)
    {
        return Ok(config.clone().with_sample_rate(preferred).into());
    }

    f32_configs
        .into_iter()
        .next()
        .map(|c| c.with_max_sample_rate().into())
        .ok_or_else(|| {
            AudioError::UnsupportedConfig("No f32 input configuration found".to_string())
        })
}

// ============================================================================
// DSP HELPERS
// ============================================================================

/// Mischt interleaved Samples auf Mono
pub fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Einfaches Linear-Resampling
pub fn resample_linear(data: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate || data.is_empty() {
        return data.to_vec();
    }

    let ratio = target_rate as f32 / source_rate as f32;
    let new_len = (data.len() as f32 * ratio) as usize;
    (0..new_len)
        .map(|i| {
            let src_idx = i as f32 / ratio;
            let idx = src_idx as usize;
            let frac = src_idx - idx as f32;
            let s1 = data.get(idx).copied().unwrap_or(0.0);
            let s2 = data.get(idx + 1).copied().unwrap_or(s1);
            s1 + (s2 - s1) * frac
        })
        .collect()
}

/// RMS-Pegel eines Blocks
pub fn rms(data: &[f32]) -> f32 {
    if data.is_empty() {
        return 0.0;
    }
    (data.iter().map(|s| s * s).sum::<f32>() / data.len() as f32).sqrt()
}

/// f32 [-1.0, 1.0] → i16 PCM
pub fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// G.711 µ-law Encoding eines 16-bit Samples
pub fn linear_to_mulaw(sample: i16) -> u8 {
    const BIAS: i32 = 0x84;
    const CLIP: i32 = 32635;

    let mut pcm = sample as i32;
    let sign = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0
    };
    pcm = pcm.min(CLIP) + BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && pcm & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (pcm >> (exponent + 3)) & 0x0F;

    !((sign | (exponent << 4) | mantissa) as u8)
}

/// Kodiert einen Frame als PCMU-Payload
pub fn encode_pcmu(frame: &[f32]) -> Vec<u8> {
    frame
        .iter()
        .map(|s| linear_to_mulaw(to_i16(*s)))
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mulaw_reference_values() {
        assert_eq!(linear_to_mulaw(0), 0xFF);
        assert_eq!(linear_to_mulaw(i16::MAX), 0x80);
        assert_eq!(linear_to_mulaw(i16::MIN), 0x00);
        assert_eq!(linear_to_mulaw(-1), 0x7F);
    }

    #[test]
    fn test_mulaw_is_monotonic_for_positive_input() {
        // Größere Amplitude → kleinerer (invertierter) Code
        let codes: Vec<u8> = [0i16, 100, 1000, 10000, 30000]
            .iter()
            .map(|s| linear_to_mulaw(*s))
            .collect();
        assert!(codes.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_downmix_stereo() {
        let mono = downmix(&[1.0, 0.0, 0.5, 0.5, -1.0, 1.0], 2);
        assert_eq!(mono, vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_resample_48k_to_8k() {
        let input = vec![0.25f32; 960];
        let output = resample_linear(&input, 48000, SAMPLE_RATE);
        assert_eq!(output.len(), FRAME_SIZE);
        assert!(output.iter().all(|s| (*s - 0.25).abs() < f32::EPSILON));
    }

    #[test]
    fn test_capture_buffer_frames() {
        let buffer = CaptureBuffer::new();
        buffer.write(&vec![0.1; FRAME_SIZE + 10]);

        let frame = buffer.read_frame().unwrap();
        assert_eq!(frame.len(), FRAME_SIZE);
        assert_eq!(buffer.len(), 10);
        assert!(buffer.read_frame().is_none());
    }

    #[test]
    fn test_capture_buffer_overflow_keeps_newest() {
        let buffer = CaptureBuffer::new();
        let samples: Vec<f32> = (0..RING_BUFFER_SIZE + FRAME_SIZE).map(|i| i as f32).collect();
        buffer.write(&samples);

        assert_eq!(buffer.len(), RING_BUFFER_SIZE);
        let frame = buffer.read_frame().unwrap();
        assert_eq!(frame[0], FRAME_SIZE as f32);
        assert_eq!(frame[FRAME_SIZE - 1], (2 * FRAME_SIZE - 1) as f32);
    }

    #[test]
    fn test_encode_pcmu_frame() {
        let payload = encode_pcmu(&[0.0; FRAME_SIZE]);
        assert_eq!(payload.len(), FRAME_SIZE);
        assert!(payload.iter().all(|b| *b == 0xFF));
    }

    #[test]
    fn test_rms_of_silence() {
        assert_eq!(rms(&[]), 0.0);
        assert_eq!(rms(&[0.0; 32]), 0.0);
    }
}
