use std::path::Path;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use rtrb::{Consumer, Producer, RingBuffer};

use crate::decode::{DecodedAudio, decode_file};
use crate::error::AudioError;

/// Flux audio live consommé par l'enregistreur : échantillons f32 entrelacés.
pub trait AudioFeed {
    fn sample_rate(&self) -> u32;
    fn channels(&self) -> u16;
    /// Vide les échantillons disponibles dans `out` (effacé d'abord).
    /// Retourne le nombre d'échantillons lus.
    fn drain(&mut self, out: &mut Vec<f32>) -> usize;
}

/// Capture micro via cpal.
///
/// Le callback cpal pousse les échantillons entrelacés dans un ring buffer
/// lock-free ; le consommateur les vide à chaque tick.
///
/// # Example
/// ```no_run
/// use af_audio::capture::{AudioFeed, MicFeed};
/// let mut mic = MicFeed::start_default().unwrap();
/// let mut buf = Vec::new();
/// mic.drain(&mut buf);
/// ```
pub struct MicFeed {
    _stream: cpal::Stream,
    consumer: Consumer<f32>,
    sample_rate: u32,
    channels: u16,
}

impl MicFeed {
    /// Start capturing from the default input device.
    ///
    /// # Errors
    /// Returns an error if no input device is available or the stream
    /// cannot be built.
    pub fn start_default() -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(AudioError::NoInputDevice)?;

        let supported = device
            .default_input_config()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        let format = supported.sample_format();
        let config: StreamConfig = supported.into();

        // Ring buffer : 2 secondes d'audio entrelacé
        let (producer, consumer) =
            RingBuffer::new(sample_rate as usize * usize::from(channels) * 2);

        let stream = match format {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, producer)?,
            SampleFormat::I16 => build_stream::<i16>(&device, &config, producer)?,
            SampleFormat::U16 => build_stream::<u16>(&device, &config, producer)?,
            other => return Err(AudioError::UnsupportedFormat(format!("{other:?}"))),
        };
        stream
            .play()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        log::info!("Capture micro : {sample_rate}Hz, {channels} canaux ({format:?})");
        Ok(Self {
            _stream: stream,
            consumer,
            sample_rate,
            channels,
        })
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: Producer<f32>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                // Ring plein : les échantillons les plus récents sont perdus
                for &s in data {
                    let _ = producer.push(s.to_sample::<f32>());
                }
            },
            |err| {
                log::error!("Audio stream error: {err}");
            },
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))
}

impl AudioFeed for MicFeed {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn drain(&mut self, out: &mut Vec<f32>) -> usize {
        drain_ring(&mut self.consumer, out)
    }
}

/// Piste d'un fichier relue au rythme de l'horloge murale.
///
/// Le fichier est décodé en entier à l'ouverture ; chaque `drain` rend les
/// échantillons écoulés depuis le précédent, à partir de `start_secs`.
///
/// # Example
/// ```
/// use af_audio::capture::{AudioFeed, FileFeed};
/// use af_audio::decode::DecodedAudio;
/// let audio = DecodedAudio { samples: vec![0.0; 200], sample_rate: 100, channels: 2 };
/// let feed = FileFeed::from_decoded(audio, 0.5);
/// assert_eq!(feed.remaining(), 100);
/// ```
pub struct FileFeed {
    audio: DecodedAudio,
    start_frame: usize,
    /// Prochain échantillon entrelacé à rendre.
    cursor: usize,
    started: Instant,
}

impl FileFeed {
    /// Décode `path` et démarre la lecture à `start_secs`.
    ///
    /// # Errors
    /// Same as [`decode_file`].
    pub fn open(path: impl AsRef<Path>, start_secs: f64) -> Result<Self, AudioError> {
        let audio = decode_file(path)?;
        log::info!(
            "Audio fichier : {}Hz, {} canaux, départ à {start_secs:.2}s",
            audio.sample_rate,
            audio.channels
        );
        Ok(Self::from_decoded(audio, start_secs))
    }

    #[must_use]
    pub fn from_decoded(audio: DecodedAudio, start_secs: f64) -> Self {
        let start = if start_secs.is_finite() { start_secs.max(0.0) } else { 0.0 };
        let start_frame = ((start * f64::from(audio.sample_rate)) as usize).min(audio.frames());
        Self {
            cursor: start_frame * usize::from(audio.channels.max(1)),
            start_frame,
            audio,
            started: Instant::now(),
        }
    }

    /// Échantillons entrelacés pas encore rendus.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.audio.samples.len().saturating_sub(self.cursor)
    }

    /// Rend tout ce qui précède `elapsed` depuis le départ.
    fn drain_until(&mut self, elapsed: Duration, out: &mut Vec<f32>) -> usize {
        out.clear();
        let frames = (elapsed.as_secs_f64() * f64::from(self.audio.sample_rate)) as usize;
        let end_frame = (self.start_frame + frames).min(self.audio.frames());
        let end = end_frame * usize::from(self.audio.channels.max(1));
        if end > self.cursor {
            out.extend_from_slice(&self.audio.samples[self.cursor..end]);
            self.cursor = end;
        }
        out.len()
    }
}

impl AudioFeed for FileFeed {
    fn sample_rate(&self) -> u32 {
        self.audio.sample_rate
    }

    fn channels(&self) -> u16 {
        self.audio.channels
    }

    fn drain(&mut self, out: &mut Vec<f32>) -> usize {
        let elapsed = self.started.elapsed();
        self.drain_until(elapsed, out)
    }
}

/// Vide un consommateur rtrb dans `out`.
pub fn drain_ring(consumer: &mut Consumer<f32>, out: &mut Vec<f32>) -> usize {
    out.clear();
    out.reserve(consumer.slots());
    while let Ok(sample) = consumer.pop() {
        out.push(sample);
    }
    out.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_empties_ring_in_order() {
        let (mut producer, mut consumer) = RingBuffer::new(8);
        for s in [0.1f32, 0.2, 0.3] {
            producer.push(s).unwrap();
        }
        let mut out = vec![9.0];
        assert_eq!(drain_ring(&mut consumer, &mut out), 3);
        assert_eq!(out, vec![0.1, 0.2, 0.3]);
        assert_eq!(drain_ring(&mut consumer, &mut out), 0);
        assert!(out.is_empty());
    }

    fn ramp(frames: usize) -> DecodedAudio {
        DecodedAudio {
            samples: (0..frames).flat_map(|f| [f as f32, -(f as f32)]).collect(),
            sample_rate: 100,
            channels: 2,
        }
    }

    #[test]
    fn file_feed_starts_at_requested_position() {
        let mut feed = FileFeed::from_decoded(ramp(300), 1.0);
        let mut out = Vec::new();
        assert_eq!(feed.drain_until(Duration::from_millis(100), &mut out), 20);
        assert_eq!(out[0], 100.0);
        assert_eq!(out[1], -100.0);
        assert_eq!(out[18], 109.0);
    }

    #[test]
    fn file_feed_paces_on_elapsed_time_and_stops_at_end() {
        let mut feed = FileFeed::from_decoded(ramp(300), 2.5);
        let mut out = Vec::new();
        assert_eq!(feed.drain_until(Duration::from_millis(200), &mut out), 40);
        assert_eq!(feed.drain_until(Duration::from_millis(200), &mut out), 0);
        assert_eq!(feed.drain_until(Duration::from_secs(10), &mut out), 60);
        assert_eq!(out.last().copied(), Some(-299.0));
        assert_eq!(feed.remaining(), 0);
    }

    #[test]
    fn file_feed_clamps_start_past_the_end() {
        let feed = FileFeed::from_decoded(ramp(50), 99.0);
        assert_eq!(feed.remaining(), 0);
        assert_eq!((feed.sample_rate(), feed.channels()), (100, 2));
    }
}
