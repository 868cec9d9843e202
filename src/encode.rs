//! Value-to-bytes encoding.
//!
//! A single recursive writer walks the value tree and appends MessagePack
//! bytes to an adaptively sized buffer. Every variable-size family is
//! written with the smallest header class that fits; all multi-byte fields
//! are big-endian.

use std::sync::Arc;

use crate::adaptive::{self, AllocStats};
use crate::depth::{DepthBudget, DEFAULT_MAX_DEPTH};
use crate::error::{Error, Result};
use crate::ext::ExtEncodeTable;
use crate::integer::{IntPriv, Integer};
use crate::marker::Marker;
use crate::value::Value;

/// Largest size any single family can encode.
const LIMIT_LARGE: u64 = u32::MAX as u64;

/// Fallback reservation when the predicted allocation is refused.
pub(crate) const BUFFER_DEFAULT_SIZE: usize = 256;

/// Configuration for encoding. Doubles as the one-shot encoder.
///
/// ```
/// use mpack::{EncodeOptions, Value};
///
/// let opts = EncodeOptions::new().strict_keys(true);
/// let bytes = opts.encode(&Value::from("hi"))?;
/// assert_eq!(bytes, [0xA2, b'h', b'i']);
/// # Ok::<(), mpack::Error>(())
/// ```
#[derive(Clone)]
pub struct EncodeOptions {
    pub(crate) ext: Option<Arc<ExtEncodeTable>>,
    pub(crate) strict_keys: bool,
    pub(crate) max_depth: usize,
    pub(crate) stats: Arc<AllocStats>,
}

impl EncodeOptions {
    pub fn new() -> Self {
        Self {
            ext: None,
            strict_keys: false,
            max_depth: DEFAULT_MAX_DEPTH,
            stats: adaptive::global(),
        }
    }

    /// Attach an ext table for encoding [`Value::Custom`] payloads.
    pub fn ext_types(mut self, table: Arc<ExtEncodeTable>) -> Self {
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

    /// Use a private set of allocation statistics instead of the
    /// process-wide one.
    pub fn alloc_stats(mut self, stats: Arc<AllocStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Encode one value to a fresh byte vector.
    pub fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        encode_into(&mut buf, value, self)?;
        Ok(buf)
    }
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode `value` into `buf` (appending at its current length), sizing the
/// buffer from the allocation statistics up front and feeding the outcome
/// back afterwards. Shared by the one-shot path and the streaming encoder.
pub(crate) fn encode_into(buf: &mut Vec<u8>, value: &Value, opts: &EncodeOptions) -> Result<()> {
    let nitems = match value {
        Value::Array(items) => items.len(),
        Value::Map(pairs) => pairs.len(),
        _ => 0,
    };

    let predicted = opts.stats.predict(nitems);
    if buf.try_reserve_exact(predicted).is_err() {
        // The prediction can be refused under memory pressure; retry with a
        // small flat reservation before giving up.
        buf.try_reserve(BUFFER_DEFAULT_SIZE).map_err(|_| Error::Memory {
            requested: BUFFER_DEFAULT_SIZE,
        })?;
    }

    let start = buf.len();
    let mut writer = Writer { buf, opts };
    writer.write_value(value, DepthBudget::new(opts.max_depth))?;

    opts.stats.record(buf.len() - start, nitems);
    Ok(())
}

struct Writer<'a> {
    buf: &'a mut Vec<u8>,
    opts: &'a EncodeOptions,
}

impl Writer<'_> {
    /// Keep capacity ahead of the write cursor, growing by 1.5x of the
    /// total requirement when it falls short.
    fn ensure_space(&mut self, extra: usize) -> Result<()> {
        let needed = self.buf.len() + extra;
        if needed > self.buf.capacity() {
            let target = needed + needed / 2;
            self.buf
                .try_reserve_exact(target - self.buf.len())
                .map_err(|_| Error::Memory { requested: target })?;
        }
        Ok(())
    }

    fn write_value(&mut self, value: &Value, depth: DepthBudget) -> Result<()> {
        match value {
            Value::String(v) => self.write_str(v),
            Value::Int(v) => self.write_int(*v),
            Value::Float(v) => self.write_f64(*v),
            Value::Boolean(v) => self.write_bool(*v),
            Value::Array(items) => {
                self.write_array_header(items.len())?;
                let depth = depth.descend()?;
                for item in items {
                    self.write_value(item, depth)?;
                }
                Ok(())
            }
            Value::Map(pairs) => {
                self.write_map_header(pairs.len())?;
                let depth = depth.descend()?;
                for (key, val) in pairs {
                    if self.opts.strict_keys && !matches!(key, Value::String(_)) {
                        return Err(Error::KeyType {
                            kind: key.kind_name(),
                        });
                    }
                    self.write_value(key, depth)?;
                    self.write_value(val, depth)?;
                }
                Ok(())
            }
            Value::Null => self.write_nil(),
            Value::Binary(v) => self.write_bin(v),
            Value::Ext(v) => self.write_ext(v.id, &v.data),
            Value::Custom(v) => {
                let any = v.as_any();
                let table = self.opts.ext.as_deref();
                let func = table
                    .and_then(|t| t.lookup(any.type_id()))
                    .or_else(|| {
                        // One retry against the declared parent type.
                        table.zip(v.parent_type()).and_then(|(t, tid)| t.lookup(tid))
                    })
                    .ok_or_else(|| Error::UnsupportedType(format!("{:?}", v)))?;
                let (id, data) = func(any)?;
                self.write_ext(id, &data)
            }
        }
    }

    fn write_str(&mut self, v: &str) -> Result<()> {
        let len = v.len();
        check_limit("String", len)?;
        self.ensure_space(5 + len)?;
        if len <= 31 {
            self.buf.push(Marker::FixStr(len as u8).into());
        } else if len <= u8::MAX as usize {
            self.buf.push(Marker::Str8.into());
            self.buf.push(len as u8);
        } else if len <= u16::MAX as usize {
            self.buf.push(Marker::Str16.into());
            self.buf.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            self.buf.push(Marker::Str32.into());
            self.buf.extend_from_slice(&(len as u32).to_be_bytes());
        }
        self.buf.extend_from_slice(v.as_bytes());
        Ok(())
    }

    fn write_bin(&mut self, v: &[u8]) -> Result<()> {
        let len = v.len();
        check_limit("Binary", len)?;
        self.ensure_space(5 + len)?;
        if len <= u8::MAX as usize {
            self.buf.push(Marker::Bin8.into());
            self.buf.push(len as u8);
        } else if len <= u16::MAX as usize {
            self.buf.push(Marker::Bin16.into());
            self.buf.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            self.buf.push(Marker::Bin32.into());
            self.buf.extend_from_slice(&(len as u32).to_be_bytes());
        }
        self.buf.extend_from_slice(v);
        Ok(())
    }

    fn write_array_header(&mut self, nitems: usize) -> Result<()> {
        check_limit("Array", nitems)?;
        self.ensure_space(5)?;
        if nitems <= 15 {
            self.buf.push(Marker::FixArray(nitems as u8).into());
        } else if nitems <= u16::MAX as usize {
            self.buf.push(Marker::Array16.into());
            self.buf.extend_from_slice(&(nitems as u16).to_be_bytes());
        } else {
            self.buf.push(Marker::Array32.into());
            self.buf.extend_from_slice(&(nitems as u32).to_be_bytes());
        }
        Ok(())
    }

    fn write_map_header(&mut self, npairs: usize) -> Result<()> {
        check_limit("Map", npairs)?;
        self.ensure_space(5)?;
        if npairs <= 15 {
            self.buf.push(Marker::FixMap(npairs as u8).into());
        } else if npairs <= u16::MAX as usize {
            self.buf.push(Marker::Map16.into());
            self.buf.extend_from_slice(&(npairs as u16).to_be_bytes());
        } else {
            self.buf.push(Marker::Map32.into());
            self.buf.extend_from_slice(&(npairs as u32).to_be_bytes());
        }
        Ok(())
    }

    fn write_int(&mut self, v: Integer) -> Result<()> {
        self.ensure_space(9)?;
        match v.parts() {
            IntPriv::PosInt(v) => {
                if v <= 127 {
                    self.buf.push(Marker::PosFixInt(v as u8).into());
                } else if v <= u8::MAX as u64 {
                    self.buf.push(Marker::UInt8.into());
                    self.buf.push(v as u8);
                } else if v <= u16::MAX as u64 {
                    self.buf.push(Marker::UInt16.into());
                    self.buf.extend_from_slice(&(v as u16).to_be_bytes());
                } else if v <= u32::MAX as u64 {
                    self.buf.push(Marker::UInt32.into());
                    self.buf.extend_from_slice(&(v as u32).to_be_bytes());
                } else {
                    self.buf.push(Marker::UInt64.into());
                    self.buf.extend_from_slice(&v.to_be_bytes());
                }
            }
            IntPriv::NegInt(v) => {
                if v >= -32 {
                    self.buf.push(Marker::NegFixInt(v as i8).into());
                } else if v >= i8::MIN as i64 {
                    self.buf.push(Marker::Int8.into());
                    self.buf.push(v as u8);
                } else if v >= i16::MIN as i64 {
                    self.buf.push(Marker::Int16.into());
                    self.buf.extend_from_slice(&(v as i16).to_be_bytes());
                } else if v >= i32::MIN as i64 {
                    self.buf.push(Marker::Int32.into());
                    self.buf.extend_from_slice(&(v as i32).to_be_bytes());
                } else {
                    self.buf.push(Marker::Int64.into());
                    self.buf.extend_from_slice(&v.to_be_bytes());
                }
            }
        }
        Ok(())
    }

    fn write_f64(&mut self, v: f64) -> Result<()> {
        self.ensure_space(9)?;
        self.buf.push(Marker::F64.into());
        self.buf.extend_from_slice(&v.to_bits().to_be_bytes());
        Ok(())
    }

    fn write_bool(&mut self, v: bool) -> Result<()> {
        self.ensure_space(1)?;
        self.buf
            .push(if v { Marker::True } else { Marker::False }.into());
        Ok(())
    }

    fn write_nil(&mut self) -> Result<()> {
        self.ensure_space(1)?;
        self.buf.push(Marker::Null.into());
        Ok(())
    }

    fn write_ext(&mut self, id: i8, data: &[u8]) -> Result<()> {
        let len = data.len();
        if len == 0 {
            return Err(Error::EmptyExt);
        }
        check_limit("Ext", len)?;
        self.ensure_space(6 + len)?;
        if let Some(fixext) = Marker::fixext_for_len(len) {
            self.buf.push(fixext.into());
        } else if len <= u8::MAX as usize {
            self.buf.push(Marker::Ext8.into());
            self.buf.push(len as u8);
        } else if len <= u16::MAX as usize {
            self.buf.push(Marker::Ext16.into());
            self.buf.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            self.buf.push(Marker::Ext32.into());
            self.buf.extend_from_slice(&(len as u32).to_be_bytes());
        }
        self.buf.push(id as u8);
        self.buf.extend_from_slice(data);
        Ok(())
    }
}

fn check_limit(family: &'static str, size: usize) -> Result<()> {
    if size as u64 > LIMIT_LARGE {
        return Err(Error::SizeLimit { family, size });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ExtValue;

    fn encode(value: &Value) -> Vec<u8> {
        EncodeOptions::new().encode(value).expect("encode should succeed")
    }

    mod integers {
        use super::*;

        #[test]
        fn spec() {
            let test_cases: Vec<(i64, Vec<u8>)> = vec![
                (0, vec![0x00]),
                (127, vec![0x7f]),
                (128, vec![0xcc, 0x80]),
                (255, vec![0xcc, 0xff]),
                (256, vec![0xcd, 0x01, 0x00]),
                (65535, vec![0xcd, 0xff, 0xff]),
                (65536, vec![0xce, 0x00, 0x01, 0x00, 0x00]),
                (-1, vec![0xff]),
                (-32, vec![0xe0]),
                (-33, vec![0xd0, 0xdf]),
                (-128, vec![0xd0, 0x80]),
                (-129, vec![0xd1, 0xff, 0x7f]),
                (-32768, vec![0xd1, 0x80, 0x00]),
                (-32769, vec![0xd2, 0xff, 0xff, 0x7f, 0xff]),
                (
                    i64::MIN,
                    vec![0xd3, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
                ),
            ];
            for (num, expected) in test_cases {
                assert_eq!(encode(&Value::from(num)), expected, "encoding {}", num);
            }
        }

        #[test]
        fn uint64_above_i64_range() {
            assert_eq!(
                encode(&Value::from(u64::MAX)),
                vec![0xcf, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]
            );
            assert_eq!(
                encode(&Value::from(u32::MAX as u64 + 1)),
                vec![0xcf, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00]
            );
        }
    }

    mod floats {
        use super::*;

        #[test]
        fn always_f64() {
            assert_eq!(
                encode(&Value::Float(1.5)),
                vec![0xcb, 0x3f, 0xf8, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
            );
            // f32 input widens before encoding
            assert_eq!(encode(&Value::from(1.5f32))[0], 0xcb);
        }
    }

    mod strings {
        use super::*;

        #[test]
        fn spec() {
            assert_eq!(encode(&Value::from("hi")), vec![0xa2, b'h', b'i']);
            assert_eq!(encode(&Value::from("")), vec![0xa0]);

            let s31 = "a".repeat(31);
            assert_eq!(encode(&Value::from(s31.as_str()))[0], 0xbf);

            let s32 = "a".repeat(32);
            assert_eq!(&encode(&Value::from(s32.as_str()))[..2], &[0xd9, 0x20]);

            let s256 = "a".repeat(256);
            assert_eq!(&encode(&Value::from(s256.as_str()))[..3], &[0xda, 0x01, 0x00]);

            let s65536 = "a".repeat(65536);
            assert_eq!(
                &encode(&Value::from(s65536.as_str()))[..5],
                &[0xdb, 0x00, 0x01, 0x00, 0x00]
            );
        }
    }

    mod binary {
        use super::*;

        #[test]
        fn smallest_class() {
            assert_eq!(encode(&Value::from(vec![0u8; 3]))[..2], [0xc4, 0x03]);
            assert_eq!(encode(&Value::from(vec![0u8; 255]))[..2], [0xc4, 0xff]);
            assert_eq!(encode(&Value::from(vec![0u8; 256]))[..3], [0xc5, 0x01, 0x00]);
            assert_eq!(
                encode(&Value::from(vec![0u8; 65536]))[..5],
                [0xc6, 0x00, 0x01, 0x00, 0x00]
            );
        }
    }

    mod containers {
        use super::*;

        #[test]
        fn spec() {
            let arr = Value::Array(vec![Value::from(1u8), Value::from(2u8), Value::from(3u8)]);
            assert_eq!(encode(&arr), vec![0x93, 0x01, 0x02, 0x03]);

            let map = Value::Map(vec![(Value::from("a"), Value::from(1u8))]);
            assert_eq!(encode(&map), vec![0x81, 0xa1, b'a', 0x01]);
        }

        #[test]
        fn header_classes() {
            let arr16 = Value::Array(vec![Value::Null; 16]);
            assert_eq!(encode(&arr16)[..3], [0xdc, 0x00, 0x10]);

            let arr32 = Value::Array(vec![Value::Null; 65536]);
            assert_eq!(encode(&arr32)[..5], [0xdd, 0x00, 0x01, 0x00, 0x00]);

            let map16 = Value::Map(
                (0..16u64)
                    .map(|i| (Value::from(i), Value::Null))
                    .collect::<Vec<_>>(),
            );
            assert_eq!(encode(&map16)[..3], [0xde, 0x00, 0x10]);
        }

        #[test]
        fn map_preserves_pair_order() {
            let map = Value::Map(vec![
                (Value::from("b"), Value::from(2u8)),
                (Value::from("a"), Value::from(1u8)),
            ]);
            assert_eq!(
                encode(&map),
                vec![0x82, 0xa1, b'b', 0x02, 0xa1, b'a', 0x01]
            );
        }

        #[test]
        fn strict_keys_rejects_non_string_keys() {
            let map = Value::Map(vec![(Value::from(1u8), Value::Null)]);
            let err = EncodeOptions::new()
                .strict_keys(true)
                .encode(&map)
                .unwrap_err();
            assert!(matches!(err, Error::KeyType { kind: "int" }));
            // Permissive by default
            assert_eq!(encode(&map), vec![0x81, 0x01, 0xc0]);
        }

        #[test]
        fn depth_limit() {
            let mut value = Value::Null;
            for _ in 0..10 {
                value = Value::Array(vec![value]);
            }
            assert!(EncodeOptions::new().max_depth(10).encode(&value).is_ok());
            let err = EncodeOptions::new().max_depth(9).encode(&value).unwrap_err();
            assert!(matches!(err, Error::DepthLimit(9)));
        }
    }

    mod states {
        use super::*;

        #[test]
        fn spec() {
            assert_eq!(encode(&Value::Null), vec![0xc0]);
            assert_eq!(encode(&Value::from(true)), vec![0xc3]);
            assert_eq!(encode(&Value::from(false)), vec![0xc2]);
        }
    }

    mod adaptive {
        use super::*;

        #[test]
        fn prediction_converges_to_the_workload() {
            let stats = Arc::new(AllocStats::new());
            let opts = EncodeOptions::new().alloc_stats(stats.clone());

            let nitems = 10usize;
            let value = Value::Array(
                (0..nitems as u32)
                    .map(|i| Value::from(format!("element-{:04}", i)))
                    .collect(),
            );

            let mut size = 0;
            for _ in 0..64 {
                size = opts.encode(&value).unwrap().len();
            }

            // Steady state: the up-front reservation covers the whole
            // output (no growth), without overshooting past 2x.
            let predicted = stats.predict(nitems);
            assert!(predicted >= size, "predicted {} < actual {}", predicted, size);
            assert!(predicted <= size * 2, "predicted {} > 2x actual {}", predicted, size);
        }

        #[test]
        fn isolated_stats_do_not_touch_the_global_ones() {
            let stats = Arc::new(AllocStats::new());
            let before = stats.predict(0);
            EncodeOptions::new()
                .encode(&Value::Binary(vec![0; 100_000]))
                .unwrap();
            assert_eq!(stats.predict(0), before);
        }
    }

    mod ext {
        use super::*;

        #[test]
        fn fixext_for_power_of_two_payloads() {
            let cases: Vec<(usize, u8)> =
                vec![(1, 0xd4), (2, 0xd5), (4, 0xd6), (8, 0xd7), (16, 0xd8)];
            for (len, marker) in cases {
                let v = Value::Ext(ExtValue {
                    id: 7,
                    data: vec![0; len],
                });
                let enc = encode(&v);
                assert_eq!(enc[0], marker, "payload len {}", len);
                assert_eq!(enc[1], 7);
                assert_eq!(enc.len(), 2 + len);
            }
        }

        #[test]
        fn varlen_ext_classes() {
            let enc = encode(&Value::Ext(ExtValue {
                id: -1,
                data: vec![0; 3],
            }));
            assert_eq!(&enc[..3], &[0xc7, 0x03, 0xff]);

            let enc = encode(&Value::Ext(ExtValue {
                id: 5,
                data: vec![0; 256],
            }));
            assert_eq!(&enc[..4], &[0xc8, 0x01, 0x00, 0x05]);

            let enc = encode(&Value::Ext(ExtValue {
                id: 5,
                data: vec![0; 65536],
            }));
            assert_eq!(&enc[..6], &[0xc9, 0x00, 0x01, 0x00, 0x00, 0x05]);
        }

        #[test]
        fn empty_payload_is_rejected() {
            let err = EncodeOptions::new()
                .encode(&Value::Ext(ExtValue {
                    id: 0,
                    data: Vec::new(),
                }))
                .unwrap_err();
            assert!(matches!(err, Error::EmptyExt));
        }
    }

    mod custom {
        use super::*;
        use crate::ext::{CustomExt, ExtEncodeTable};
        use std::any::{Any, TypeId};

        #[derive(Debug)]
        struct Blob;
        impl CustomExt for Blob {
            fn as_any(&self) -> &dyn Any {
                self
            }
        }

        #[derive(Debug)]
        struct ChildBlob;
        impl CustomExt for ChildBlob {
            fn as_any(&self) -> &dyn Any {
                self
            }
            fn parent_type(&self) -> Option<TypeId> {
                Some(TypeId::of::<Blob>())
            }
        }

        fn table() -> Arc<ExtEncodeTable> {
            Arc::new(
                ExtEncodeTable::builder()
                    .register::<Blob, _>(|_| Ok((7, vec![0, 0, 0, 0])))
                    .build(),
            )
        }

        #[test]
        fn dispatches_through_the_table() {
            let enc = EncodeOptions::new()
                .ext_types(table())
                .encode(&Value::custom(Blob))
                .unwrap();
            assert_eq!(enc, vec![0xd6, 0x07, 0x00, 0x00, 0x00, 0x00]);
        }

        #[test]
        fn falls_back_to_the_parent_type_once() {
            let enc = EncodeOptions::new()
                .ext_types(table())
                .encode(&Value::custom(ChildBlob))
                .unwrap();
            assert_eq!(enc, vec![0xd6, 0x07, 0x00, 0x00, 0x00, 0x00]);
        }

        #[test]
        fn unmatched_type_fails() {
            let err = EncodeOptions::new()
                .ext_types(table())
                .encode(&Value::custom(LocalOnly))
                .unwrap_err();
            assert!(matches!(err, Error::UnsupportedType(_)));

            // No table at all fails the same way
            let err = EncodeOptions::new().encode(&Value::custom(Blob)).unwrap_err();
            assert!(matches!(err, Error::UnsupportedType(_)));
        }

        #[derive(Debug)]
        struct LocalOnly;
        impl CustomExt for LocalOnly {
            fn as_any(&self) -> &dyn Any {
                self
            }
        }
    }
}
