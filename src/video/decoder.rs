//! Decoder seam
//!
//! The engine backend drives a [`FrameDecoder`] from its own thread. Actual
//! codec libraries plug in through [`DecoderFactory`]; the crate ships a
//! probe-only factory that reads container metadata but produces no frames.

use std::path::Path;

use super::probe::{self, Container};
use super::{BackendError, DecodedFrame};

/// Stream metadata known once a source is opened
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    /// Seconds, 0 for live sources
    pub duration: f64,
    /// Codec name as used by the backend policy, empty if unknown
    pub codec: String,
    /// Live sources cannot seek and have no duration
    pub live: bool,
}

impl Default for MediaInfo {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            frame_rate: 30.0,
            duration: 0.0,
            codec: String::new(),
            live: false,
        }
    }
}

/// A decoder instance for one opened source
pub trait FrameDecoder: Send {
    fn info(&self) -> &MediaInfo;

    /// Decode the frame presented at `position` seconds.
    /// `Ok(None)` means no picture is available for that time.
    fn decode_at(&mut self, position: f64) -> Result<Option<DecodedFrame>, BackendError>;

    /// Output volume 0-100 for decoders that also render audio
    fn set_volume(&mut self, _volume: f32) {}
}

/// Opens decoders for a backend
pub trait DecoderFactory: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    fn open(&self, source: &str) -> Result<Box<dyn FrameDecoder>, BackendError>;
}

/// Whether a source string names a network location rather than a file
pub fn is_url(source: &str) -> bool {
    source
        .split_once("://")
        .is_some_and(|(scheme, _)| !scheme.is_empty() && scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+'))
}

/// Factory that validates sources and reports header metadata only
#[derive(Debug, Default)]
pub struct ProbeDecoderFactory;

struct ProbeDecoder {
    info: MediaInfo,
}

impl FrameDecoder for ProbeDecoder {
    fn info(&self) -> &MediaInfo {
        &self.info
    }

    fn decode_at(&mut self, _position: f64) -> Result<Option<DecodedFrame>, BackendError> {
        Ok(None)
    }
}

impl DecoderFactory for ProbeDecoderFactory {
    fn name(&self) -> &str {
        "probe"
    }

    fn open(&self, source: &str) -> Result<Box<dyn FrameDecoder>, BackendError> {
        if is_url(source) {
            return Ok(Box::new(ProbeDecoder {
                info: MediaInfo {
                    live: true,
                    ..MediaInfo::default()
                },
            }));
        }

        let probed = probe::probe_file(Path::new(source)).map_err(|e| BackendError::OpenFailed {
            path: source.to_string(),
            reason: e.to_string(),
        })?;
        if probed.container == Container::Unknown {
            return Err(BackendError::Unsupported(source.to_string()));
        }

        Ok(Box::new(ProbeDecoder {
            info: MediaInfo {
                width: probed.width,
                height: probed.height,
                duration: probed.duration,
                codec: probed.codec.unwrap_or_default(),
                ..MediaInfo::default()
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_detection() {
        assert!(is_url("rtsp://camera/stream"));
        assert!(is_url("srt+udp://host:9000"));
        assert!(!is_url("/media/clip.mp4"));
        assert!(!is_url("C:\\media\\clip.mp4"));
        assert!(!is_url("://nothing"));
    }

    #[test]
    fn test_probe_factory_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.mp4");
        let result = ProbeDecoderFactory.open(missing.to_str().unwrap());
        assert!(matches!(result, Err(BackendError::OpenFailed { .. })));
    }

    #[test]
    fn test_probe_factory_rejects_unknown_container() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.mp4");
        std::fs::write(&path, b"plain text, not a movie").unwrap();
        let result = ProbeDecoderFactory.open(path.to_str().unwrap());
        assert!(matches!(result, Err(BackendError::Unsupported(_))));
    }

    #[test]
    fn test_probe_factory_treats_urls_as_live() {
        let decoder = ProbeDecoderFactory.open("udp://239.0.0.1:5000").unwrap();
        assert!(decoder.info().live);
    }
}
