//! Container header probing
//!
//! Reads just enough of a media file to report its container, video codec
//! and dimensions. The codec names match the ones used in the backend
//! policy lists (`h264`, `hevc`, `hap`, `hap_q`, ...).

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// Detected container format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    /// ISO base media (mp4, mov, m4v)
    IsoMedia,
    /// Matroska / WebM
    Matroska,
    Png,
    Jpeg,
    Unknown,
}

/// What a header probe found
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeInfo {
    pub container: Container,
    pub codec: Option<String>,
    pub width: u32,
    pub height: u32,
    /// Duration in seconds, 0 when not stored in the header
    pub duration: f64,
}

impl ProbeInfo {
    fn unknown(container: Container) -> Self {
        Self {
            container,
            codec: None,
            width: 0,
            height: 0,
            duration: 0.0,
        }
    }
}

const MATROSKA_MAGIC: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];
const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const MATROSKA_SCAN_LIMIT: u64 = 1 << 20;
const MAX_ATOM_DEPTH: usize = 8;

/// Map an ISO sample-entry fourcc to a codec name
pub fn codec_for_fourcc(fourcc: &[u8; 4]) -> Option<&'static str> {
    let codec = match fourcc {
        b"avc1" | b"avc3" => "h264",
        b"hvc1" | b"hev1" => "hevc",
        b"Hap1" => "hap",
        b"Hap5" => "hap_alpha",
        b"HapY" => "hap_q",
        b"HapM" => "hap_q_alpha",
        b"ap4h" | b"apch" | b"apcn" | b"apcs" | b"apco" | b"ap4x" => "prores",
        b"av01" => "av1",
        b"vp09" => "vp9",
        b"mp4v" => "mpeg4",
        b"jpeg" | b"mjpa" => "mjpeg",
        _ => return None,
    };
    Some(codec)
}

/// Matroska codec ids and their codec names
const MATROSKA_CODECS: &[(&str, &str)] = &[
    ("V_MPEG4/ISO/AVC", "h264"),
    ("V_MPEGH/ISO/HEVC", "hevc"),
    ("V_VP9", "vp9"),
    ("V_VP8", "vp8"),
    ("V_AV1", "av1"),
    ("V_PRORES", "prores"),
    ("V_MJPEG", "mjpeg"),
];

/// Probe a file on disk
pub fn probe_file(path: &Path) -> io::Result<ProbeInfo> {
    let file = File::open(path)?;
    let mut info = probe_reader(&mut BufReader::new(file))?;

    if matches!(info.container, Container::Jpeg | Container::Png) && info.width == 0 {
        if let Ok((w, h)) = image::image_dimensions(path) {
            info.width = w;
            info.height = h;
        }
    }
    Ok(info)
}

/// Probe any seekable stream positioned anywhere
pub fn probe_reader<R: Read + Seek>(reader: &mut R) -> io::Result<ProbeInfo> {
    let end = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(0))?;

    let mut head = [0u8; 16];
    let n = read_up_to(reader, &mut head)?;
    let head = &head[..n];

    if head.starts_with(&PNG_MAGIC) {
        let mut info = ProbeInfo::unknown(Container::Png);
        info.codec = Some("png".to_string());
        // IHDR follows the signature: length, "IHDR", width, height
        let mut ihdr = [0u8; 8];
        reader.seek(SeekFrom::Start(16))?;
        if read_up_to(reader, &mut ihdr)? == 8 {
            info.width = be_u32(&ihdr[0..4]);
            info.height = be_u32(&ihdr[4..8]);
        }
        return Ok(info);
    }

    if head.starts_with(&[0xFF, 0xD8, 0xFF]) {
        let mut info = ProbeInfo::unknown(Container::Jpeg);
        info.codec = Some("mjpeg".to_string());
        return Ok(info);
    }

    if head.starts_with(&MATROSKA_MAGIC) {
        return probe_matroska(reader, end);
    }

    if head.len() >= 8 && matches!(&head[4..8], b"ftyp" | b"moov" | b"mdat" | b"wide" | b"free") {
        let mut state = AtomState::default();
        walk_atoms(reader, 0, end, 0, &mut state)?;
        let mut info = ProbeInfo::unknown(Container::IsoMedia);
        info.codec = state.codec;
        info.width = state.width;
        info.height = state.height;
        if state.timescale > 0 {
            info.duration = state.duration as f64 / state.timescale as f64;
        }
        return Ok(info);
    }

    Ok(ProbeInfo::unknown(Container::Unknown))
}

#[derive(Default)]
struct AtomState {
    timescale: u32,
    duration: u64,
    in_video_track: bool,
    codec: Option<String>,
    width: u32,
    height: u32,
}

fn walk_atoms<R: Read + Seek>(
    reader: &mut R,
    start: u64,
    end: u64,
    depth: usize,
    state: &mut AtomState,
) -> io::Result<()> {
    if depth > MAX_ATOM_DEPTH {
        return Ok(());
    }

    let mut offset = start;
    while offset + 8 <= end && state.codec.is_none() {
        reader.seek(SeekFrom::Start(offset))?;
        let mut header = [0u8; 8];
        reader.read_exact(&mut header)?;
        let mut size = be_u32(&header[0..4]) as u64;
        let kind = [header[4], header[5], header[6], header[7]];
        let mut body = offset + 8;

        if size == 1 {
            let mut large = [0u8; 8];
            reader.read_exact(&mut large)?;
            size = u64::from_be_bytes(large);
            body += 8;
        } else if size == 0 {
            size = end - offset;
        }
        if size < body - offset || offset + size > end {
            tracing::debug!("Malformed atom {:?} at {}", String::from_utf8_lossy(&kind), offset);
            break;
        }
        let atom_end = offset + size;

        match &kind {
            b"moov" | b"mdia" | b"minf" | b"stbl" => {
                walk_atoms(reader, body, atom_end, depth + 1, state)?;
            }
            b"trak" => {
                state.in_video_track = false;
                walk_atoms(reader, body, atom_end, depth + 1, state)?;
            }
            b"mvhd" => read_mvhd(reader, state)?,
            b"hdlr" => {
                let mut buf = [0u8; 12];
                if read_up_to(reader, &mut buf)? == 12 {
                    state.in_video_track = &buf[8..12] == b"vide";
                }
            }
            b"stsd" if state.in_video_track => read_stsd(reader, state)?,
            _ => {}
        }

        offset = atom_end;
    }
    Ok(())
}

fn read_mvhd<R: Read>(reader: &mut R, state: &mut AtomState) -> io::Result<()> {
    let mut version = [0u8; 4];
    reader.read_exact(&mut version)?;
    if version[0] == 1 {
        let mut buf = [0u8; 28];
        reader.read_exact(&mut buf)?;
        state.timescale = be_u32(&buf[16..20]);
        state.duration = u64::from_be_bytes([
            buf[20], buf[21], buf[22], buf[23], buf[24], buf[25], buf[26], buf[27],
        ]);
    } else {
        let mut buf = [0u8; 16];
        reader.read_exact(&mut buf)?;
        state.timescale = be_u32(&buf[8..12]);
        state.duration = be_u32(&buf[12..16]) as u64;
    }
    Ok(())
}

fn read_stsd<R: Read>(reader: &mut R, state: &mut AtomState) -> io::Result<()> {
    // version/flags, entry count, then the first visual sample entry
    let mut buf = [0u8; 8 + 8 + 8 + 16 + 4];
    if read_up_to(reader, &mut buf)? < buf.len() {
        return Ok(());
    }
    let fourcc = [buf[12], buf[13], buf[14], buf[15]];
    let codec = codec_for_fourcc(&fourcc)
        .map(str::to_string)
        .unwrap_or_else(|| String::from_utf8_lossy(&fourcc).trim().to_lowercase());
    let dims = &buf[16 + 8 + 16..];
    state.width = u16::from_be_bytes([dims[0], dims[1]]) as u32;
    state.height = u16::from_be_bytes([dims[2], dims[3]]) as u32;
    state.codec = Some(codec);
    Ok(())
}

fn probe_matroska<R: Read + Seek>(reader: &mut R, end: u64) -> io::Result<ProbeInfo> {
    reader.seek(SeekFrom::Start(0))?;
    let mut buf = Vec::new();
    reader.take(end.min(MATROSKA_SCAN_LIMIT)).read_to_end(&mut buf)?;

    let mut info = ProbeInfo::unknown(Container::Matroska);
    info.codec = MATROSKA_CODECS
        .iter()
        .find(|(id, _)| contains(&buf, id.as_bytes()))
        .map(|(_, codec)| codec.to_string());
    Ok(info)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn atom(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
        out.extend_from_slice(kind);
        out.extend_from_slice(payload);
        out
    }

    fn visual_entry(fourcc: &[u8; 4], width: u16, height: u16) -> Vec<u8> {
        let mut payload = vec![0u8; 8]; // reserved + data reference index
        payload.extend_from_slice(&[0u8; 16]); // pre_defined / reserved
        payload.extend_from_slice(&width.to_be_bytes());
        payload.extend_from_slice(&height.to_be_bytes());
        payload.extend_from_slice(&[0u8; 50]);
        atom(fourcc, &payload)
    }

    fn movie(handler: &[u8; 4], fourcc: &[u8; 4]) -> Vec<u8> {
        let mut mvhd = vec![0u8; 4];
        mvhd.extend_from_slice(&[0u8; 8]);
        mvhd.extend_from_slice(&600u32.to_be_bytes());
        mvhd.extend_from_slice(&6000u32.to_be_bytes());
        mvhd.extend_from_slice(&[0u8; 80]);

        let mut hdlr = vec![0u8; 8];
        hdlr.extend_from_slice(handler);
        hdlr.extend_from_slice(&[0u8; 13]);

        let mut stsd = vec![0u8; 4];
        stsd.extend_from_slice(&1u32.to_be_bytes());
        stsd.extend_from_slice(&visual_entry(fourcc, 1920, 1080));

        let stbl = atom(b"stbl", &atom(b"stsd", &stsd));
        let minf = atom(b"minf", &stbl);
        let mut mdia_body = atom(b"hdlr", &hdlr);
        mdia_body.extend_from_slice(&minf);
        let trak = atom(b"trak", &atom(b"mdia", &mdia_body));

        let mut moov_body = atom(b"mvhd", &mvhd);
        moov_body.extend_from_slice(&trak);

        let mut file = atom(b"ftyp", b"qt  \0\0\0\0qt  ");
        file.extend_from_slice(&atom(b"moov", &moov_body));
        file
    }

    #[test]
    fn test_hap_movie_is_detected() {
        let bytes = movie(b"vide", b"Hap1");
        let info = probe_reader(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(info.container, Container::IsoMedia);
        assert_eq!(info.codec.as_deref(), Some("hap"));
        assert_eq!((info.width, info.height), (1920, 1080));
        assert!((info.duration - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_non_video_track_is_ignored() {
        let bytes = movie(b"soun", b"avc1");
        let info = probe_reader(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(info.codec, None);
    }

    #[test]
    fn test_matroska_codec_id() {
        let mut bytes = MATROSKA_MAGIC.to_vec();
        bytes.extend_from_slice(&[0u8; 32]);
        bytes.extend_from_slice(b"\x86\x8fV_MPEGH/ISO/HEVC");
        let info = probe_reader(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(info.container, Container::Matroska);
        assert_eq!(info.codec.as_deref(), Some("hevc"));
    }

    #[test]
    fn test_png_dimensions_from_header() {
        let mut bytes = PNG_MAGIC.to_vec();
        bytes.extend_from_slice(&13u32.to_be_bytes());
        bytes.extend_from_slice(b"IHDR");
        bytes.extend_from_slice(&640u32.to_be_bytes());
        bytes.extend_from_slice(&480u32.to_be_bytes());
        let info = probe_reader(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(info.container, Container::Png);
        assert_eq!((info.width, info.height), (640, 480));
    }

    #[test]
    fn test_fourcc_table() {
        assert_eq!(codec_for_fourcc(b"HapY"), Some("hap_q"));
        assert_eq!(codec_for_fourcc(b"apcn"), Some("prores"));
        assert_eq!(codec_for_fourcc(b"zzzz"), None);
    }
}
