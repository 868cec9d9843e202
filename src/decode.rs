//! Bytes-to-value decoding.
//!
//! A single recursive reader walks the encoded bytes and materializes
//! values. Every read is preceded by a bounds check against the current
//! window; in one-shot mode a failed check is an error, while the streaming
//! decoder's window refills itself from the underlying file.

use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt};

use crate::cache::{self, StringCache};
use crate::depth::{DepthBudget, DEFAULT_MAX_DEPTH};
use crate::error::{Error, Result};
use crate::ext::{ExtDecodeTable, ExtPayload, PayloadMode};
use crate::marker::Marker;
use crate::value::Value;

/// Longest string the fixstr header can carry, and therefore the longest
/// string worth interning.
const FIXSTR_MAX: usize = 31;

/// A source of encoded bytes: either a borrowed slice or a file-backed
/// window that refills on demand.
pub(crate) trait Input {
    /// Make at least `need` unread bytes available at `pos`, returning the
    /// possibly relocated cursor. Refilling implementations may move the
    /// unread tail to the front of the window.
    fn ensure(&mut self, pos: usize, need: usize) -> Result<usize>;

    /// The window of currently valid bytes.
    fn window(&self) -> &[u8];
}

/// One-shot input over caller-provided bytes.
pub(crate) struct SliceInput<'a> {
    data: &'a [u8],
}

impl<'a> SliceInput<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl Input for SliceInput<'_> {
    fn ensure(&mut self, pos: usize, need: usize) -> Result<usize> {
        let remaining = self.data.len().saturating_sub(pos);
        if need > remaining {
            return Err(Error::Overread {
                needed: need - remaining,
                remaining,
            });
        }
        Ok(pos)
    }

    fn window(&self) -> &[u8] {
        self.data
    }
}

/// Configuration for decoding. Doubles as the one-shot decoder.
///
/// ```
/// use mpack::{DecodeOptions, Value};
///
/// let value = DecodeOptions::new().decode(&[0x93, 0x01, 0x02, 0x03])?;
/// assert_eq!(value, Value::Array(vec![1u8.into(), 2u8.into(), 3u8.into()]));
/// # Ok::<(), mpack::Error>(())
/// ```
#[derive(Clone)]
pub struct DecodeOptions {
    pub(crate) ext: Option<Arc<ExtDecodeTable>>,
    pub(crate) strict_keys: bool,
    pub(crate) max_depth: usize,
    pub(crate) allow_trailing: bool,
    pub(crate) cache: Arc<StringCache>,
}

impl DecodeOptions {
    pub fn new() -> Self {
        Self {
            ext: None,
            strict_keys: false,
            max_depth: DEFAULT_MAX_DEPTH,
            allow_trailing: true,
            cache: cache::global(),
        }
    }

    /// Attach an ext table for decoding ext values.
    pub fn ext_types(mut self, table: Arc<ExtDecodeTable>) -> Self {
        self.ext = Some(table);
        self
    }

    /// Restrict map keys to strings. Off by default.
    pub fn strict_keys(mut self, strict: bool) -> Self {
        self.strict_keys = strict;
        self
    }

    /// Maximum container nesting depth. Defaults to 512.
    pub fn max_depth(mut self, max: usize) -> Self {
        self.max_depth = max;
        self
    }

    /// Whether one-shot decoding tolerates bytes after the first value.
    /// Defaults to `true`.
    pub fn allow_trailing(mut self, allow: bool) -> Self {
        self.allow_trailing = allow;
        self
    }

    /// Use a private string cache instead of the process-wide one.
    pub fn string_cache(mut self, cache: Arc<StringCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Decode one value from the given bytes.
    pub fn decode(&self, bytes: &[u8]) -> Result<Value> {
        let mut input = SliceInput::new(bytes);
        let mut reader = Reader::new(&mut input, self);
        let value = reader.read_value(DepthBudget::new(self.max_depth))?;
        let remaining = bytes.len() - reader.position();
        if !self.allow_trailing && remaining != 0 {
            return Err(Error::TrailingBytes { remaining });
        }
        Ok(value)
    }
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Cursor over an [`Input`], providing the checked reads the decoder core
/// is built from.
pub(crate) struct Reader<'a, I: Input> {
    input: &'a mut I,
    opts: &'a DecodeOptions,
    pos: usize,
}

impl<'a, I: Input> Reader<'a, I> {
    pub fn new(input: &'a mut I, opts: &'a DecodeOptions) -> Self {
        Self::at(input, opts, 0)
    }

    /// A reader starting mid-window, for streaming decoders that keep
    /// unread bytes between calls.
    pub fn at(input: &'a mut I, opts: &'a DecodeOptions, pos: usize) -> Self {
        Self { input, opts, pos }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bounds check: everything read out of the window passes through here
    /// first. May relocate the cursor when the input refills.
    fn check(&mut self, need: usize) -> Result<()> {
        self.pos = self.input.ensure(self.pos, need)?;
        Ok(())
    }

    /// The next byte. Only valid directly after a successful `check`.
    fn take_byte(&mut self) -> u8 {
        let byte = self.input.window()[self.pos];
        self.pos += 1;
        byte
    }

    /// The next `n` bytes. Only valid directly after a successful `check`.
    fn take(&mut self, n: usize) -> &[u8] {
        let bytes = &self.input.window()[self.pos..self.pos + n];
        self.pos += n;
        bytes
    }

    fn read_u16(&mut self) -> Result<u16> {
        self.check(2)?;
        let mut bytes = self.take(2);
        bytes.read_u16::<BigEndian>().map_err(|_| Error::Overread {
            needed: 2,
            remaining: 0,
        })
    }

    fn read_u32(&mut self) -> Result<u32> {
        self.check(4)?;
        let mut bytes = self.take(4);
        bytes.read_u32::<BigEndian>().map_err(|_| Error::Overread {
            needed: 4,
            remaining: 0,
        })
    }

    fn read_u64(&mut self) -> Result<u64> {
        self.check(8)?;
        let mut bytes = self.take(8);
        bytes.read_u64::<BigEndian>().map_err(|_| Error::Overread {
            needed: 8,
            remaining: 0,
        })
    }

    fn read_i16(&mut self) -> Result<i16> {
        self.read_u16().map(|v| v as i16)
    }

    fn read_i32(&mut self) -> Result<i32> {
        self.read_u32().map(|v| v as i32)
    }

    fn read_i64(&mut self) -> Result<i64> {
        self.read_u64().map(|v| v as i64)
    }

    /// Read one value and advance the cursor past it.
    pub fn read_value(&mut self, depth: DepthBudget) -> Result<Value> {
        self.check(1)?;
        let marker = Marker::from_u8(self.take_byte());
        match marker {
            Marker::PosFixInt(v) => Ok(Value::from(v)),
            // Sign extension of the 5-bit two's complement happened when
            // the marker byte was reinterpreted as i8.
            Marker::NegFixInt(v) => Ok(Value::from(v)),
            Marker::FixStr(len) => self.read_fixstr(len as usize),
            Marker::FixArray(len) => self.read_array(len as usize, depth),
            Marker::FixMap(len) => self.read_map(len as usize, depth),
            Marker::Null => Ok(Value::Null),
            Marker::True => Ok(Value::Boolean(true)),
            Marker::False => Ok(Value::Boolean(false)),
            Marker::UInt8 => {
                self.check(1)?;
                Ok(Value::from(self.take_byte()))
            }
            Marker::UInt16 => Ok(Value::from(self.read_u16()?)),
            Marker::UInt32 => Ok(Value::from(self.read_u32()?)),
            Marker::UInt64 => Ok(Value::from(self.read_u64()?)),
            Marker::Int8 => {
                self.check(1)?;
                Ok(Value::from(self.take_byte() as i8))
            }
            Marker::Int16 => Ok(Value::from(self.read_i16()?)),
            Marker::Int32 => Ok(Value::from(self.read_i32()?)),
            Marker::Int64 => Ok(Value::from(self.read_i64()?)),
            Marker::F32 => Ok(Value::Float(f32::from_bits(self.read_u32()?) as f64)),
            Marker::F64 => Ok(Value::Float(f64::from_bits(self.read_u64()?))),
            Marker::Str8 => {
                self.check(1)?;
                let len = self.take_byte() as usize;
                self.read_str(len)
            }
            Marker::Str16 => {
                let len = self.read_u16()? as usize;
                self.read_str(len)
            }
            Marker::Str32 => {
                let len = self.read_u32()? as usize;
                self.read_str(len)
            }
            Marker::Bin8 => {
                self.check(1)?;
                let len = self.take_byte() as usize;
                self.read_bin(len)
            }
            Marker::Bin16 => {
                let len = self.read_u16()? as usize;
                self.read_bin(len)
            }
            Marker::Bin32 => {
                let len = self.read_u32()? as usize;
                self.read_bin(len)
            }
            Marker::Array16 => {
                let len = self.read_u16()? as usize;
                self.read_array(len, depth)
            }
            Marker::Array32 => {
                let len = self.read_u32()? as usize;
                self.read_array(len, depth)
            }
            Marker::Map16 => {
                let len = self.read_u16()? as usize;
                self.read_map(len, depth)
            }
            Marker::Map32 => {
                let len = self.read_u32()? as usize;
                self.read_map(len, depth)
            }
            Marker::FixExt1 => self.read_ext_body(1),
            Marker::FixExt2 => self.read_ext_body(2),
            Marker::FixExt4 => self.read_ext_body(4),
            Marker::FixExt8 => self.read_ext_body(8),
            Marker::FixExt16 => self.read_ext_body(16),
            Marker::Ext8 => {
                self.check(1)?;
                let len = self.take_byte() as usize;
                self.read_ext_body(len)
            }
            Marker::Ext16 => {
                let len = self.read_u16()? as usize;
                self.read_ext_body(len)
            }
            Marker::Ext32 => {
                let len = self.read_u32()? as usize;
                self.read_ext_body(len)
            }
            Marker::Reserved => Err(Error::BadHeader(marker.into_u8())),
        }
    }

    /// Fixstr fast path: short strings go through the interning cache.
    fn read_fixstr(&mut self, len: usize) -> Result<Value> {
        debug_assert!(len <= FIXSTR_MAX);
        self.check(len)?;
        let opts = self.opts;
        let bytes = self.take(len);
        Ok(Value::String(opts.cache.intern(bytes)?))
    }

    fn read_str(&mut self, len: usize) -> Result<Value> {
        self.check(len)?;
        let bytes = self.take(len);
        let s = std::str::from_utf8(bytes).map_err(|_| Error::BadUtf8)?;
        Ok(Value::String(s.into()))
    }

    fn read_bin(&mut self, len: usize) -> Result<Value> {
        self.check(len)?;
        Ok(Value::Binary(self.take(len).to_vec()))
    }

    fn read_array(&mut self, nitems: usize, depth: DepthBudget) -> Result<Value> {
        let depth = depth.descend()?;
        let mut items = Vec::with_capacity(nitems);
        for _ in 0..nitems {
            items.push(self.read_value(depth)?);
        }
        Ok(Value::Array(items))
    }

    fn read_map(&mut self, npairs: usize, depth: DepthBudget) -> Result<Value> {
        let depth = depth.descend()?;
        let strict = self.opts.strict_keys;
        let mut pairs = Vec::with_capacity(npairs);
        for _ in 0..npairs {
            // String keys dominate real maps; a fixstr header skips the
            // general dispatch and goes straight to the interning path.
            self.check(1)?;
            let first = self.input.window()[self.pos];
            let key = if first & 0b1110_0000 == 0xA0 {
                self.pos += 1;
                self.read_fixstr((first & 0x1F) as usize)?
            } else {
                let key = self.read_value(depth)?;
                if strict && !matches!(key, Value::String(_)) {
                    return Err(Error::KeyType {
                        kind: key.kind_name(),
                    });
                }
                key
            };
            let val = self.read_value(depth)?;
            pairs.push((key, val));
        }
        Ok(Value::Map(pairs))
    }

    /// Shared tail for every ext header: the id byte, then the payload,
    /// then dispatch through the decode table.
    fn read_ext_body(&mut self, len: usize) -> Result<Value> {
        self.check(1)?;
        let id = self.take_byte() as i8;
        if len == 0 {
            return Err(Error::EmptyExt);
        }
        self.check(len)?;
        let opts = self.opts;
        let table = opts.ext.as_deref().ok_or(Error::UnknownExtId(id))?;
        let func = table.lookup(id).ok_or(Error::UnknownExtId(id))?;
        let payload = match table.mode() {
            PayloadMode::Owned => ExtPayload::Owned(self.take(len).to_vec()),
            PayloadMode::View => ExtPayload::View(self.take(len)),
        };
        func(payload)
    }
}
