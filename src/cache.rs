//! Interned short strings for the decode hot path.
//!
//! Map keys and other short strings repeat heavily in real workloads.
//! Decoding a fixstr first consults this cache: on a hit the stored
//! `Arc<str>` is cloned instead of validated and allocated again. Slots are
//! replaced on collision, so the cache never grows and never needs eviction
//! bookkeeping.

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Slot count used by the process-wide cache. Must be a power of two.
const DEFAULT_SLOTS: usize = 1024;

/// A fixed-size, FNV-1a-indexed cache of short strings.
///
/// One entry per slot; a colliding store simply replaces the old entry. Only
/// pure-ASCII strings are stored, keeping the common map-key case hot
/// without holding on to larger multi-byte strings of the same length.
///
/// Slots are individually locked, so replacement always publishes a fully
/// constructed string. A process-wide instance backs [`DecodeOptions`] by
/// default; decoders can isolate their interning by supplying their own.
///
/// [`DecodeOptions`]: crate::DecodeOptions
#[derive(Debug)]
pub struct StringCache {
    slots: Box<[Mutex<Option<Arc<str>>>]>,
    mask: usize,
}

impl StringCache {
    /// A cache with the default slot count.
    pub fn new() -> Self {
        Self::with_slots(DEFAULT_SLOTS)
    }

    /// A cache with `slots` entries, rounded up to a power of two.
    pub fn with_slots(slots: usize) -> Self {
        let slots = slots.max(1).next_power_of_two();
        let slots: Box<[Mutex<Option<Arc<str>>>]> =
            (0..slots).map(|_| Mutex::new(None)).collect();
        let mask = slots.len() - 1;
        Self { slots, mask }
    }

    /// Validate `bytes` as UTF-8 and return the string, shared with the
    /// cache when possible.
    pub(crate) fn intern(&self, bytes: &[u8]) -> Result<Arc<str>> {
        let idx = fnv1a(bytes) as usize & self.mask;
        let mut slot = self.slots[idx].lock();

        if let Some(cached) = slot.as_ref() {
            if cached.len() == bytes.len() && cached.as_bytes() == bytes {
                return Ok(cached.clone());
            }
        }

        let fresh: Arc<str> = std::str::from_utf8(bytes)
            .map_err(|_| Error::BadUtf8)?
            .into();

        if bytes.is_ascii() {
            *slot = Some(fresh.clone());
        }

        Ok(fresh)
    }
}

impl Default for StringCache {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide cache used when options don't supply their own.
pub(crate) fn global() -> Arc<StringCache> {
    static GLOBAL: OnceLock<Arc<StringCache>> = OnceLock::new();
    GLOBAL.get_or_init(|| Arc::new(StringCache::new())).clone()
}

/// FNV-1a, 32-bit variant. Only used to index the cache slots.
fn fnv1a(data: &[u8]) -> u32 {
    let mut hash: u32 = 0x811C_9DC5;
    for &byte in data {
        hash = (hash ^ byte as u32).wrapping_mul(0x0100_0193);
    }
    hash
}
