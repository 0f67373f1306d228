//! Audio-track inspection of received files.
//!
//! The server only needs a yes/no answer: does the file contain something
//! AudioLooper can play? The default inspector asks Symphonia to probe the
//! container and looks for a track with a known codec and a sample rate.

use std::fs::File;
use std::path::Path;

use symphonia::core::codecs::CODEC_TYPE_NULL;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

pub trait MediaInspector: Send + Sync {
    /// `true` when the file at `path` holds at least one audio track.
    fn has_audio_track(&self, path: &Path) -> bool;
}

pub struct SymphoniaInspector;

impl MediaInspector for SymphoniaInspector {
    fn has_audio_track(&self, path: &Path) -> bool {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "media: open failed");
                return false;
            }
        };
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = match symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        ) {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "media: probe failed");
                return false;
            }
        };

        probed
            .format
            .tracks()
            .iter()
            .any(|t| t.codec_params.codec != CODEC_TYPE_NULL && t.codec_params.sample_rate.is_some())
    }
}

/// Accepts everything; for embedders that validate elsewhere.
pub struct AcceptAll;

impl MediaInspector for AcceptAll {
    fn has_audio_track(&self, _path: &Path) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn wav_bytes() -> Vec<u8> {
        let samples: Vec<i16> = (0..800).map(|i| ((i % 50) as i16 - 25) * 400).collect();
        let data_len = (samples.len() * 2) as u32;
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVEfmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes()); // PCM
        out.extend_from_slice(&1u16.to_le_bytes()); // mono
        out.extend_from_slice(&8000u32.to_le_bytes());
        out.extend_from_slice(&16000u32.to_le_bytes());
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&16u16.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        for s in samples {
            out.extend_from_slice(&s.to_le_bytes());
        }
        out
    }

    #[test]
    fn wav_has_audio() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        std::fs::File::create(&path).unwrap().write_all(&wav_bytes()).unwrap();
        assert!(SymphoniaInspector.has_audio_track(&path));
    }

    #[test]
    fn garbage_has_no_audio() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"definitely not audio").unwrap();
        assert!(!SymphoniaInspector.has_audio_track(&path));
        assert!(!SymphoniaInspector.has_audio_track(&dir.path().join("missing.mp3")));
    }
}
