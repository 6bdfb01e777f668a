use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::AudioError;

/// Audio entièrement décodé, échantillons f32 entrelacés.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DecodedAudio {
    /// Interleaved samples, `frames × channels`.
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Fenêtre d'audio entrelacé horodatée, unité de travail de l'encodeur audio.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioChunk {
    /// Interleaved samples, `frames × channels`.
    pub samples: Vec<f32>,
    pub frames: u32,
    pub channels: u16,
    pub sample_rate: u32,
    /// Horodatage du premier frame, en microsecondes.
    pub timestamp_us: i64,
}

impl DecodedAudio {
    /// Nombre de frames (un frame = un échantillon par canal).
    #[must_use]
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels.max(1))
    }

    /// Durée en secondes.
    #[must_use]
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / f64::from(self.sample_rate)
    }

    /// Découpe en fenêtres d'une seconde nominale ; la dernière peut être plus courte.
    ///
    /// # Example
    /// ```
    /// use af_audio::decode::DecodedAudio;
    /// let audio = DecodedAudio { samples: vec![0.0; 2 * 150], sample_rate: 100, channels: 2 };
    /// let chunks: Vec<_> = audio.chunks().collect();
    /// assert_eq!(chunks.len(), 2);
    /// assert_eq!(chunks[1].frames, 50);
    /// assert_eq!(chunks[1].timestamp_us, 1_000_000);
    /// ```
    pub fn chunks(&self) -> impl Iterator<Item = AudioChunk> + '_ {
        let channels = usize::from(self.channels.max(1));
        let window = self.sample_rate.max(1) as usize * channels;
        self.samples
            .chunks(window)
            .enumerate()
            .map(move |(i, samples)| AudioChunk {
                samples: samples.to_vec(),
                frames: (samples.len() / channels) as u32,
                channels: self.channels,
                sample_rate: self.sample_rate,
                timestamp_us: i as i64 * 1_000_000,
            })
    }
}

/// Décode la première piste audio de `path` (WAV, MP3, FLAC, OGG, AAC, MP4, MKV).
///
/// Les paquets corrompus sont ignorés avec un warning ; une piste sans aucun
/// échantillon décodé est une erreur.
///
/// # Errors
/// Returns an error if the file cannot be opened, holds no audio track, or
/// the codec is not supported.
///
/// # Example
/// ```no_run
/// use af_audio::decode::decode_file;
/// let audio = decode_file("clip.mp4").unwrap();
/// println!("{} s", audio.duration_secs());
/// ```
pub fn decode_file(path: impl AsRef<Path>) -> Result<DecodedAudio, AudioError> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| AudioError::UnsupportedFormat(e.to_string()))?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL && t.codec_params.sample_rate.is_some())
        .ok_or(AudioError::NoAudioTrack)?;

    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(44100);
    let mut channels = track
        .codec_params
        .channels
        .map_or(1, |c| c.count() as u16);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AudioError::UnsupportedFormat(e.to_string()))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut max_frames: usize = 0;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => {
                log::warn!("Audio decode packet error: {e}");
                break;
            }
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("Audio decode frame error: {e}");
                continue;
            }
            Err(e) => return Err(AudioError::DecodeError(e.to_string())),
        };

        let spec = *decoded.spec();
        sample_rate = spec.rate;
        channels = spec.channels.count() as u16;
        let num_frames = decoded.capacity();
        // Réalloue seulement si ce paquet dépasse la capacité courante
        if sample_buf.is_none() || num_frames > max_frames {
            sample_buf = Some(SampleBuffer::<f32>::new(num_frames as u64, spec));
            max_frames = num_frames;
        }
        let Some(buf) = sample_buf.as_mut() else {
            continue;
        };
        buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buf.samples());
    }

    if samples.is_empty() {
        return Err(AudioError::DecodeError(format!(
            "aucun échantillon dans {}",
            path.display()
        )));
    }

    let audio = DecodedAudio {
        samples,
        sample_rate,
        channels,
    };
    log::info!(
        "Audio décodé : {:.2}s @ {}Hz, {} canaux ({})",
        audio.duration_secs(),
        audio.sample_rate,
        audio.channels,
        path.display()
    );
    Ok(audio)
}
