//! Contrats encodeur / conteneur consommés par l'export muxé.
//!
//! Les encodeurs sont asynchrones : `submit` met une unité de travail en
//! file, les paquets arrivent plus tard sur `packets()`, dans l'ordre
//! d'entrée. `flush` est la barrière qui garantit que tous les paquets des
//! unités soumises sont disponibles.

use std::path::Path;

use af_audio::{AudioChunk, AudioError, DecodedAudio};
use af_core::frame::FrameBuffer;

use crate::error::ExportError;

/// Unité encodée, prête pour le conteneur.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedPacket {
    pub data: Vec<u8>,
    pub timestamp_us: i64,
    pub duration_us: i64,
    pub keyframe: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VideoConfig {
    /// Pair.
    pub width: u32,
    /// Pair.
    pub height: u32,
    pub fps: u32,
    /// Une keyframe forcée toutes les `keyframe_interval` frames.
    pub keyframe_interval: u32,
}

impl VideoConfig {
    /// Durée nominale d'une frame.
    ///
    /// # Example
    /// ```
    /// use af_export::codec::VideoConfig;
    /// let config = VideoConfig { width: 2, height: 2, fps: 30, keyframe_interval: 30 };
    /// assert_eq!(config.timestamp_us(30), 1_000_000);
    /// assert_eq!(config.frame_duration_us(), 33_333);
    /// ```
    #[must_use]
    pub fn frame_duration_us(&self) -> i64 {
        1_000_000 / i64::from(self.fps.max(1))
    }

    /// Horodatage de la frame `index`.
    #[must_use]
    pub fn timestamp_us(&self, index: u32) -> i64 {
        i64::from(index) * 1_000_000 / i64::from(self.fps.max(1))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Capacités d'encodage annoncées par l'hôte.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub video: bool,
    pub audio: bool,
}

pub trait VideoEncoder {
    /// Met une frame en file ; `keyframe` force une image clé.
    ///
    /// # Errors
    /// Encoder closed or frame rejected.
    fn submit(&mut self, frame: &FrameBuffer, timestamp_us: i64, keyframe: bool) -> Result<(), ExportError>;

    /// Bloque jusqu'à ce que chaque frame soumise ait produit ses paquets.
    ///
    /// # Errors
    /// Encoder failure.
    fn flush(&mut self) -> Result<(), ExportError>;

    fn packets(&self) -> &flume::Receiver<EncodedPacket>;
}

pub trait AudioEncoder {
    /// # Errors
    /// Encoder closed or chunk rejected.
    fn submit(&mut self, chunk: &AudioChunk) -> Result<(), ExportError>;

    /// # Errors
    /// Encoder failure.
    fn flush(&mut self) -> Result<(), ExportError>;

    fn packets(&self) -> &flume::Receiver<EncodedPacket>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

/// Poignée sur une piste d'un conteneur. Non clonable : une piste, un
/// propriétaire, jusqu'à la finalisation du conteneur qui l'a créée.
#[derive(Debug, PartialEq, Eq)]
pub struct PacketTrack {
    id: usize,
    kind: TrackKind,
}

impl PacketTrack {
    /// Réservé aux implémentations de `ContainerWriter`.
    #[must_use]
    pub fn new(id: usize, kind: TrackKind) -> Self {
        Self { id, kind }
    }

    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> TrackKind {
        self.kind
    }
}

/// Conteneur multi-pistes ; rend un unique buffer à la finalisation.
pub trait ContainerWriter {
    /// # Errors
    /// Track rejected by the container.
    fn add_video_track(&mut self, config: &VideoConfig) -> Result<PacketTrack, ExportError>;

    /// # Errors
    /// Track rejected by the container.
    fn add_audio_track(&mut self, config: &AudioConfig) -> Result<PacketTrack, ExportError>;

    /// Les paquets d'une piste arrivent dans l'ordre d'émission de l'encodeur.
    ///
    /// # Errors
    /// Packet rejected.
    fn write_packet(&mut self, track: &PacketTrack, packet: EncodedPacket) -> Result<(), ExportError>;

    /// # Errors
    /// Container could not be completed.
    fn finalize(self: Box<Self>) -> Result<Vec<u8>, ExportError>;
}

/// Fabrique d'encodeurs et de conteneurs.
pub trait MediaBackend {
    fn capabilities(&self) -> Capabilities;

    /// # Errors
    /// Encoder could not be configured.
    fn video_encoder(&self, config: &VideoConfig) -> Result<Box<dyn VideoEncoder>, ExportError>;

    /// # Errors
    /// Encoder could not be configured.
    fn audio_encoder(&self, config: &AudioConfig) -> Result<Box<dyn AudioEncoder>, ExportError>;

    /// # Errors
    /// Container could not be created.
    fn container(&self) -> Result<Box<dyn ContainerWriter>, ExportError>;
}

/// Décodage complet de l'audio d'une source.
pub trait AudioProvider {
    /// # Errors
    /// Any decode failure; the muxed export treats it as "no audio".
    fn decode(&self, path: &Path) -> Result<DecodedAudio, AudioError>;
}

/// Décodage via symphonia.
#[derive(Clone, Copy, Debug, Default)]
pub struct SymphoniaAudio;

impl AudioProvider for SymphoniaAudio {
    fn decode(&self, path: &Path) -> Result<DecodedAudio, AudioError> {
        af_audio::decode_file(path)
    }
}

/// Transfère vers `track` tous les paquets déjà disponibles.
///
/// # Errors
/// Propagates the container's rejection.
pub fn forward_packets(
    packets: &flume::Receiver<EncodedPacket>,
    container: &mut dyn ContainerWriter,
    track: &PacketTrack,
) -> Result<usize, ExportError> {
    let mut count = 0;
    for packet in packets.try_iter() {
        container.write_packet(track, packet)?;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBackend;

    fn packet(timestamp_us: i64) -> EncodedPacket {
        EncodedPacket {
            data: vec![1],
            timestamp_us,
            duration_us: 33_333,
            keyframe: timestamp_us == 0,
        }
    }

    #[test]
    fn forward_packets_drains_what_is_ready() {
        let backend = FakeBackend::default();
        let mut container = backend.container().unwrap();
        let config = VideoConfig { width: 4, height: 4, fps: 30, keyframe_interval: 30 };
        let track = container.add_video_track(&config).unwrap();
        let (tx, rx) = flume::unbounded();
        for i in 0..3 {
            tx.send(packet(config.timestamp_us(i))).unwrap();
        }
        assert_eq!(forward_packets(&rx, container.as_mut(), &track).unwrap(), 3);
        assert_eq!(forward_packets(&rx, container.as_mut(), &track).unwrap(), 0);
        let written = backend.log().lock().unwrap().written.clone();
        assert_eq!(
            written,
            vec![
                (TrackKind::Video, 0, true),
                (TrackKind::Video, 33_333, false),
                (TrackKind::Video, 66_666, false),
            ]
        );
    }

    #[test]
    fn container_rejection_stops_forwarding() {
        let backend = FakeBackend {
            reject_after: Some(1),
            ..FakeBackend::default()
        };
        let mut container = backend.container().unwrap();
        let track = container.add_audio_track(&AudioConfig { sample_rate: 100, channels: 2 }).unwrap();
        let (tx, rx) = flume::unbounded();
        tx.send(packet(0)).unwrap();
        tx.send(packet(10_000)).unwrap();
        assert!(matches!(
            forward_packets(&rx, container.as_mut(), &track),
            Err(ExportError::Container(_))
        ));
    }
}
