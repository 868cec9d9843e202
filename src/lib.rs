//! A fast MessagePack encoder and decoder.
//!
//! The codec maps a [`Value`] tree to and from the standard MessagePack
//! wire format, always choosing the smallest header class that fits.
//! Around the core sit the pieces that make steady-state workloads fast:
//! output buffers sized from rolling averages of previous encodes
//! ([`AllocStats`]), an interning cache for the short strings that dominate
//! map keys ([`StringCache`]), and user-extensible dispatch tables for
//! MessagePack ext types ([`ExtEncodeTable`], [`ExtDecodeTable`]).
//!
//! One-shot use goes through [`encode`] and [`decode`], or through
//! [`EncodeOptions`] / [`DecodeOptions`] when ext types, strict keys, or
//! other knobs are needed:
//!
//! ```
//! use mpack::{decode, encode, Value};
//!
//! let value = Value::Map(vec![
//!     (Value::from("answer"), Value::from(42u8)),
//! ]);
//! let bytes = encode(&value)?;
//! assert_eq!(bytes, [0x81, 0xA6, b'a', b'n', b's', b'w', b'e', b'r', 0x2A]);
//! assert_eq!(decode(&bytes)?, value);
//! # Ok::<(), mpack::Error>(())
//! ```
//!
//! Streaming to and from files goes through [`Encoder`] and [`Decoder`],
//! which read and write bare concatenations of MessagePack values.

mod adaptive;
mod cache;
mod decode;
mod depth;
mod encode;
mod error;
mod ext;
mod integer;
mod marker;
mod stream;
mod value;

pub use self::adaptive::AllocStats;
pub use self::cache::StringCache;
pub use self::decode::DecodeOptions;
pub use self::depth::DEFAULT_MAX_DEPTH;
pub use self::encode::EncodeOptions;
pub use self::error::{Error, Result};
pub use self::ext::{
    CustomExt, ExtDecodeTable, ExtDecodeTableBuilder, ExtEncodeTable, ExtEncodeTableBuilder,
    ExtPayload, PayloadMode,
};
pub use self::integer::Integer;
pub use self::stream::{Decoder, Encoder};
pub use self::value::{ExtValue, Value};

/// Encode one value to MessagePack bytes with default options.
pub fn encode(value: &Value) -> Result<Vec<u8>> {
    EncodeOptions::new().encode(value)
}

/// Decode one value from MessagePack bytes with default options.
pub fn decode(bytes: &[u8]) -> Result<Value> {
    DecodeOptions::new().decode(bytes)
}
