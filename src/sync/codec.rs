//! Wire codec for sync frames
//!
//! Frames are an ordered, position-tagged byte sequence: scalars are written
//! in fixed-width native byte order, strings as a `u32` length followed by
//! UTF-8 bytes. There are no type markers, so the reader must consume fields
//! in exactly the order the writer produced them.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use glam::Vec3;

/// Errors raised while decoding a sync frame
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The frame ended before a field could be read
    #[error("frame truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    /// A string field was not valid UTF-8
    #[error("invalid UTF-8 in string field: {0}")]
    InvalidString(#[from] std::str::Utf8Error),
    /// An enum field carried a value outside its range
    #[error("invalid value {value} for {field}")]
    InvalidTag { field: &'static str, value: u8 },
    /// A layer entry did not consume the length announced by its trailer
    #[error("layer {layer} entry length mismatch: trailer says {expected} bytes, decoded {actual}")]
    EntryLength { layer: u32, expected: u32, actual: u32 },
    /// A layer entry could not be attached to a local layer
    #[error("layer {0} could not be created locally")]
    LayerUnavailable(u32),
}

/// Appends fields to an outgoing frame.
#[derive(Debug, Default)]
pub struct SyncWriter {
    buf: BytesMut,
}

impl SyncWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn put_bool(&mut self, value: bool) {
        self.buf.put_u8(value as u8);
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.put_u32_ne(value);
    }

    pub fn put_i32(&mut self, value: i32) {
        self.buf.put_i32_ne(value);
    }

    pub fn put_u64(&mut self, value: u64) {
        self.buf.put_u64_ne(value);
    }

    pub fn put_f32(&mut self, value: f32) {
        self.buf.put_f32_ne(value);
    }

    pub fn put_f64(&mut self, value: f64) {
        self.buf.put_f64_ne(value);
    }

    pub fn put_vec3(&mut self, value: Vec3) {
        self.put_f32(value.x);
        self.put_f32(value.y);
        self.put_f32(value.z);
    }

    /// Write a length-prefixed UTF-8 string
    pub fn put_str(&mut self, value: &str) {
        self.buf.put_u32_ne(value.len() as u32);
        self.buf.put_slice(value.as_bytes());
    }

    /// Number of bytes written so far
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Reserve a `u32` slot to be filled in later with [`patch_u32`](Self::patch_u32)
    pub fn reserve_u32(&mut self) -> usize {
        let at = self.buf.len();
        self.buf.put_u32_ne(0);
        at
    }

    /// Overwrite a slot previously returned by [`reserve_u32`](Self::reserve_u32)
    pub fn patch_u32(&mut self, at: usize, value: u32) {
        self.buf[at..at + 4].copy_from_slice(&value.to_ne_bytes());
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Reads fields from an incoming frame in the order they were written.
#[derive(Debug)]
pub struct SyncReader<'a> {
    buf: &'a [u8],
    total: usize,
}

impl<'a> SyncReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            total: buf.len(),
        }
    }

    fn ensure(&self, needed: usize) -> Result<(), SyncError> {
        if self.buf.remaining() < needed {
            return Err(SyncError::Truncated {
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn bool(&mut self) -> Result<bool, SyncError> {
        Ok(self.u8()? != 0)
    }

    pub fn u8(&mut self) -> Result<u8, SyncError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn u32(&mut self) -> Result<u32, SyncError> {
        self.ensure(4)?;
        Ok(self.buf.get_u32_ne())
    }

    pub fn i32(&mut self) -> Result<i32, SyncError> {
        self.ensure(4)?;
        Ok(self.buf.get_i32_ne())
    }

    pub fn u64(&mut self) -> Result<u64, SyncError> {
        self.ensure(8)?;
        Ok(self.buf.get_u64_ne())
    }

    pub fn f32(&mut self) -> Result<f32, SyncError> {
        self.ensure(4)?;
        Ok(self.buf.get_f32_ne())
    }

    pub fn f64(&mut self) -> Result<f64, SyncError> {
        self.ensure(8)?;
        Ok(self.buf.get_f64_ne())
    }

    pub fn vec3(&mut self) -> Result<Vec3, SyncError> {
        Ok(Vec3::new(self.f32()?, self.f32()?, self.f32()?))
    }

    pub fn string(&mut self) -> Result<String, SyncError> {
        let len = self.u32()? as usize;
        self.ensure(len)?;
        let text = std::str::from_utf8(&self.buf[..len])?.to_owned();
        self.buf.advance(len);
        Ok(text)
    }

    /// Bytes consumed since the reader was created
    pub fn position(&self) -> usize {
        self.total - self.buf.remaining()
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }
}

/// Enums that travel as a single byte.
pub trait WireEnum: Sized + Copy {
    /// Field name used in decode errors
    const FIELD: &'static str;

    fn to_wire(self) -> u8;

    fn from_wire(value: u8) -> Option<Self>;

    fn write(self, w: &mut SyncWriter) {
        w.put_u8(self.to_wire());
    }

    fn read(r: &mut SyncReader<'_>) -> Result<Self, SyncError> {
        let value = r.u8()?;
        Self::from_wire(value).ok_or(SyncError::InvalidTag {
            field: Self::FIELD,
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_read_back_in_order() {
        let mut w = SyncWriter::new();
        w.put_bool(true);
        w.put_u32(42);
        w.put_f64(12.5);
        w.put_str("clip.mkv");
        w.put_vec3(Vec3::new(1.0, 2.0, 3.0));
        let bytes = w.freeze();

        let mut r = SyncReader::new(&bytes);
        assert!(r.bool().unwrap());
        assert_eq!(r.u32().unwrap(), 42);
        assert_eq!(r.f64().unwrap(), 12.5);
        assert_eq!(r.string().unwrap(), "clip.mkv");
        assert_eq!(r.vec3().unwrap(), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_truncated_frame_is_an_error() {
        let mut w = SyncWriter::new();
        w.put_u8(7);
        let bytes = w.freeze();

        let mut r = SyncReader::new(&bytes);
        assert!(matches!(
            r.u32(),
            Err(SyncError::Truncated { needed: 4, remaining: 1 })
        ));
    }

    #[test]
    fn test_string_length_beyond_frame() {
        let mut w = SyncWriter::new();
        w.put_u32(100);
        w.put_u8(b'a');
        let bytes = w.freeze();

        let mut r = SyncReader::new(&bytes);
        assert!(matches!(r.string(), Err(SyncError::Truncated { .. })));
    }

    #[test]
    fn test_patch_reserved_slot() {
        let mut w = SyncWriter::new();
        let slot = w.reserve_u32();
        w.put_u8(1);
        w.patch_u32(slot, 9);
        let bytes = w.freeze();

        let mut r = SyncReader::new(&bytes);
        assert_eq!(r.u32().unwrap(), 9);
        assert_eq!(r.position(), 4);
    }
}
