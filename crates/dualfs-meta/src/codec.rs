//! Binary encoding of attribute records exchanged between nodes.
//!
//! All integers are big-endian. Strings are a presence byte, a `u16` byte length and
//! the text in modified UTF-8: NUL is written as `C0 80` and characters outside the basic
//! multilingual plane as two three-byte surrogates, the form JVM peers read and write.
//! Mode values travel as their `i8` ordinal.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;

use crate::attributes::AttributeRecord;
use crate::error::{ConfigError, Result};
use crate::path::FsPath;
use crate::types::FsMode;

/// Current attribute record format version.
pub const FORMAT_VERSION: u8 = 1;

/// Encoder for attribute record fields.
pub struct AttrEncoder {
    buf: BytesMut,
}

impl AttrEncoder {
    /// Creates a new AttrEncoder.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    /// Encodes a single byte.
    pub fn encode_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    /// Encodes a 32-bit signed integer.
    pub fn encode_i32(&mut self, v: i32) {
        self.buf.put_i32(v);
    }

    /// Encodes a boolean as one byte (0 or 1).
    pub fn encode_bool(&mut self, v: bool) {
        self.buf.put_u8(v as u8);
    }

    /// Encodes a mode as its ordinal byte.
    pub fn encode_mode(&mut self, mode: FsMode) {
        self.buf.put_i8(mode.ordinal());
    }

    /// Encodes a present string. Fails if its encoding does not fit a `u16` length.
    pub fn encode_string(&mut self, s: &str) -> Result<()> {
        let bytes = to_modified_utf8(s);
        let len = u16::try_from(bytes.len()).map_err(|_| ConfigError::InvalidAttribute {
            field: "string",
            reason: format!("{} bytes exceeds {}", bytes.len(), u16::MAX),
        })?;
        self.buf.put_u8(1);
        self.buf.put_u16(len);
        self.buf.put_slice(&bytes);
        Ok(())
    }

    /// Consumes the encoder and returns the encoded bytes.
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

impl Default for AttrEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decoder for attribute record fields.
pub struct AttrDecoder<'a> {
    buf: &'a [u8],
}

impl<'a> AttrDecoder<'a> {
    /// Creates a new AttrDecoder over encoded bytes.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn ensure_available(&self, len: usize) -> Result<()> {
        if self.buf.remaining() < len {
            return Err(ConfigError::DecodeError {
                reason: "truncated data".to_string(),
            });
        }
        Ok(())
    }

    /// Decodes a single byte.
    pub fn decode_u8(&mut self) -> Result<u8> {
        self.ensure_available(1)?;
        Ok(self.buf.get_u8())
    }

    /// Decodes a 32-bit signed integer.
    pub fn decode_i32(&mut self) -> Result<i32> {
        self.ensure_available(4)?;
        Ok(self.buf.get_i32())
    }

    /// Decodes a boolean, rejecting bytes other than 0 and 1.
    pub fn decode_bool(&mut self) -> Result<bool> {
        match self.decode_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(ConfigError::DecodeError {
                reason: format!("invalid boolean byte {}", other),
            }),
        }
    }

    /// Decodes a mode ordinal.
    pub fn decode_mode(&mut self) -> Result<FsMode> {
        self.ensure_available(1)?;
        FsMode::from_ordinal(self.buf.get_i8())
    }

    /// Decodes a string; `None` when the presence flag is cleared.
    pub fn decode_opt_string(&mut self) -> Result<Option<String>> {
        if !self.decode_bool()? {
            return Ok(None);
        }
        self.ensure_available(2)?;
        let len = self.buf.get_u16() as usize;
        self.ensure_available(len)?;
        let decoded = from_modified_utf8(&self.buf[..len]);
        self.buf.advance(len);
        decoded.map(Some)
    }

    /// Decodes a string that must be present.
    pub fn decode_string(&mut self, field: &'static str) -> Result<String> {
        self.decode_opt_string()?
            .ok_or_else(|| ConfigError::DecodeError {
                reason: format!("missing required string '{}'", field),
            })
    }

    /// Bytes left unread.
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }
}

fn to_modified_utf8(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    for unit in s.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}

fn from_modified_utf8(bytes: &[u8]) -> Result<String> {
    let malformed = |at: usize| ConfigError::DecodeError {
        reason: format!("malformed modified UTF-8 at byte {}", at),
    };
    let continuation = |at: usize| match bytes.get(at) {
        Some(b) if b & 0xC0 == 0x80 => Ok(u16::from(b & 0x3F)),
        _ => Err(malformed(at)),
    };

    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        let unit = match b >> 4 {
            0x0..=0x7 => {
                i += 1;
                u16::from(b)
            }
            0xC | 0xD => {
                let unit = (u16::from(b & 0x1F) << 6) | continuation(i + 1)?;
                i += 2;
                unit
            }
            0xE => {
                let unit = (u16::from(b & 0x0F) << 12)
                    | (continuation(i + 1)? << 6)
                    | continuation(i + 2)?;
                i += 3;
                unit
            }
            _ => return Err(malformed(i)),
        };
        units.push(unit);
    }

    String::from_utf16(&units).map_err(|e| ConfigError::DecodeError {
        reason: format!("invalid string: {}", e),
    })
}

impl AttributeRecord {
    /// Encodes the record in the versioned wire format.
    ///
    /// Path modes are written in prefix order, so records with equal contents encode to
    /// identical bytes regardless of how they were built.
    pub fn encode(&self) -> Result<Bytes> {
        let mut enc = AttrEncoder::new();
        enc.encode_u8(FORMAT_VERSION);
        enc.encode_string(self.name())?;
        enc.encode_i32(self.block_size() as i32);
        enc.encode_i32(self.group_size() as i32);
        enc.encode_string(self.meta_store())?;
        enc.encode_string(self.data_store())?;
        enc.encode_mode(self.default_mode());
        enc.encode_bool(self.fragmentizer_enabled());

        enc.encode_bool(true);
        enc.encode_i32(self.path_modes().len() as i32);
        for (prefix, mode) in self.path_modes() {
            enc.encode_string(prefix.as_str())?;
            enc.encode_mode(*mode);
        }

        Ok(enc.finish())
    }

    /// Decodes a record, rejecting unknown versions, unknown mode ordinals, malformed
    /// prefixes, duplicate prefixes and trailing garbage.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut dec = AttrDecoder::new(buf);

        let version = dec.decode_u8()?;
        if version != FORMAT_VERSION {
            return Err(ConfigError::UnsupportedVersion(version));
        }

        let name = dec.decode_string("name")?;
        let block_size = dec.decode_i32()?;
        let group_size = dec.decode_i32()?;
        let meta_store = dec.decode_string("metaStoreName")?;
        let data_store = dec.decode_string("dataStoreName")?;
        let default_mode = dec.decode_mode()?;
        let fragmentizer_enabled = dec.decode_bool()?;

        let mut path_modes = BTreeMap::new();
        if dec.decode_bool()? {
            let count = dec.decode_i32()?;
            if count < 0 {
                return Err(ConfigError::DecodeError {
                    reason: format!("negative path mode count {}", count),
                });
            }
            for _ in 0..count {
                let raw = dec.decode_string("pathModes prefix")?;
                let mode = dec.decode_mode()?;
                let prefix = FsPath::parse(&raw)?;
                if path_modes.insert(prefix, mode).is_some() {
                    return Err(ConfigError::DecodeError {
                        reason: format!("duplicate path mode prefix '{}'", raw),
                    });
                }
            }
        }

        if dec.remaining() != 0 {
            return Err(ConfigError::DecodeError {
                reason: format!("{} trailing bytes", dec.remaining()),
            });
        }

        AttributeRecord::from_parts(
            name,
            block_size,
            group_size,
            meta_store,
            data_store,
            default_mode,
            path_modes,
            fragmentizer_enabled,
        )
    }
}
