//! User-extensible dispatch for MessagePack ext types.
//!
//! Encoding dispatches on the runtime type of a [`Value::Custom`] payload
//! through a bucketed table built once and shared immutably between any
//! number of encoders. Decoding dispatches on the one-byte ext id through a
//! dense 256-slot array.
//!
//! [`Value::Custom`]: crate::Value::Custom

use std::any::{Any, TypeId};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{Error, Result};
use crate::value::Value;

/// Number of buckets in the encode table and slots in the decode table.
const EXT_TABLE_SLOTS: usize = 256;

/// A user type routed through the ext encode table.
///
/// Implementors are stored in [`Value::Custom`] and matched against the
/// table by their [`TypeId`]. `parent_type` may name a fallback type to try
/// when the concrete type has no table entry; the lookup retries exactly
/// once.
///
/// [`Value::Custom`]: crate::Value::Custom
pub trait CustomExt: Any + fmt::Debug + Send + Sync {
    /// The value as `Any`, for downcasting inside encode functions.
    fn as_any(&self) -> &dyn Any;

    /// Optional fallback type to look up when this type has no entry.
    fn parent_type(&self) -> Option<TypeId> {
        None
    }
}

/// How decoded ext payloads are handed to read functions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PayloadMode {
    /// Copy the payload out of the decode buffer into owned bytes.
    Owned,
    /// Borrow the payload from the decode buffer, zero-copy.
    View,
}

/// An ext payload as delivered to a decode function, per [`PayloadMode`].
#[derive(Debug)]
pub enum ExtPayload<'a> {
    Owned(Vec<u8>),
    View(&'a [u8]),
}

impl ExtPayload<'_> {
    /// The payload bytes, whichever way they are held.
    pub fn as_slice(&self) -> &[u8] {
        match self {
            ExtPayload::Owned(v) => v,
            ExtPayload::View(s) => s,
        }
    }

    /// The payload as owned bytes, copying only if borrowed.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            ExtPayload::Owned(v) => v,
            ExtPayload::View(s) => s.to_vec(),
        }
    }
}

type ExtEncodeFn = Box<dyn Fn(&dyn Any) -> Result<(i8, Vec<u8>)> + Send + Sync>;
type ExtDecodeFn = Box<dyn Fn(ExtPayload<'_>) -> Result<Value> + Send + Sync>;

/// Immutable dispatch table mapping runtime types to ext encode functions.
///
/// Layout: a type hashes to one of 256 buckets; each bucket owns a slice of
/// a single flat pairs array, located by a prefix-sum offset and a length.
/// Lookup is one hash, one indexed load, and a short linear scan, with no
/// per-bucket allocation.
pub struct ExtEncodeTable {
    offsets: [u16; EXT_TABLE_SLOTS],
    lengths: [u16; EXT_TABLE_SLOTS],
    pairs: Vec<(TypeId, ExtEncodeFn)>,
}

impl ExtEncodeTable {
    pub fn builder() -> ExtEncodeTableBuilder {
        ExtEncodeTableBuilder {
            entries: Vec::new(),
        }
    }

    /// Find the encode function for a concrete type, if registered.
    pub(crate) fn lookup(&self, tid: TypeId) -> Option<&ExtEncodeFn> {
        let bucket = bucket_of(tid);
        let offset = self.offsets[bucket] as usize;
        let length = self.lengths[bucket] as usize;
        self.pairs[offset..offset + length]
            .iter()
            .find(|(key, _)| *key == tid)
            .map(|(_, f)| f)
    }
}

impl fmt::Debug for ExtEncodeTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ExtEncodeTable")
            .field("entries", &self.pairs.len())
            .finish()
    }
}

/// Builder for [`ExtEncodeTable`]. Registration order is irrelevant; a type
/// registered twice keeps its last function.
pub struct ExtEncodeTableBuilder {
    entries: Vec<(TypeId, ExtEncodeFn)>,
}

impl ExtEncodeTableBuilder {
    /// Register an encode function for values of type `T`. The function
    /// returns the ext id and the payload bytes; the payload must be
    /// non-empty.
    pub fn register<T, F>(mut self, f: F) -> Self
    where
        T: CustomExt,
        F: Fn(&T) -> Result<(i8, Vec<u8>)> + Send + Sync + 'static,
    {
        let shim: ExtEncodeFn = Box::new(move |any| {
            let value = any
                .downcast_ref::<T>()
                .ok_or_else(|| Error::UnsupportedType(std::any::type_name::<T>().to_string()))?;
            f(value)
        });
        self.entries.retain(|(key, _)| *key != TypeId::of::<T>());
        self.entries.push((TypeId::of::<T>(), shim));
        self
    }

    /// Lay the registered entries out into the bucketed table.
    pub fn build(self) -> ExtEncodeTable {
        assert!(
            self.entries.len() <= u16::MAX as usize,
            "too many ext encode entries"
        );

        // Count how many entries land in each bucket.
        let mut lengths = [0u16; EXT_TABLE_SLOTS];
        for (tid, _) in &self.entries {
            lengths[bucket_of(*tid)] += 1;
        }

        // Prefix sums give each bucket its slice of the flat pairs array.
        let mut offsets = [0u16; EXT_TABLE_SLOTS];
        for i in 1..EXT_TABLE_SLOTS {
            offsets[i] = offsets[i - 1] + lengths[i - 1];
        }

        // Place each entry in its bucket slice, filling from the back.
        let mut remaining = lengths;
        let mut pairs: Vec<Option<(TypeId, ExtEncodeFn)>> =
            self.entries.iter().map(|_| None).collect();
        for (tid, f) in self.entries {
            let bucket = bucket_of(tid);
            remaining[bucket] -= 1;
            let slot = offsets[bucket] as usize + remaining[bucket] as usize;
            pairs[slot] = Some((tid, f));
        }
        let pairs = pairs.into_iter().flatten().collect();

        ExtEncodeTable {
            offsets,
            lengths,
            pairs,
        }
    }
}

/// Immutable dispatch table mapping ext ids to decode functions: a dense
/// 256-slot array indexed by the id reinterpreted as unsigned.
pub struct ExtDecodeTable {
    reads: [Option<ExtDecodeFn>; EXT_TABLE_SLOTS],
    mode: PayloadMode,
}

impl ExtDecodeTable {
    pub fn builder() -> ExtDecodeTableBuilder {
        ExtDecodeTableBuilder {
            reads: std::array::from_fn(|_| None),
            mode: PayloadMode::Owned,
        }
    }

    pub(crate) fn lookup(&self, id: i8) -> Option<&ExtDecodeFn> {
        self.reads[id as u8 as usize].as_ref()
    }

    pub(crate) fn mode(&self) -> PayloadMode {
        self.mode
    }
}

impl fmt::Debug for ExtDecodeTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let entries = self.reads.iter().filter(|r| r.is_some()).count();
        f.debug_struct("ExtDecodeTable")
            .field("entries", &entries)
            .field("mode", &self.mode)
            .finish()
    }
}

/// Builder for [`ExtDecodeTable`]. Ids are `i8`, so the `[-128, 127]` range
/// holds by construction; an id registered twice keeps its last function.
pub struct ExtDecodeTableBuilder {
    reads: [Option<ExtDecodeFn>; EXT_TABLE_SLOTS],
    mode: PayloadMode,
}

impl ExtDecodeTableBuilder {
    /// Register a read function for ext values with the given id.
    pub fn register<F>(mut self, id: i8, f: F) -> Self
    where
        F: Fn(ExtPayload<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        self.reads[id as u8 as usize] = Some(Box::new(f));
        self
    }

    /// Select how payloads are delivered to read functions.
    pub fn payload_mode(mut self, mode: PayloadMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn build(self) -> ExtDecodeTable {
        ExtDecodeTable {
            reads: self.reads,
            mode: self.mode,
        }
    }
}

/// Bucket index for a type: hash the type-id, drop the low byte, mask to
/// the slot count. Type-ids stand in for the stable type identities the
/// dispatch is keyed on.
fn bucket_of(tid: TypeId) -> usize {
    let mut hasher = DefaultHasher::new();
    tid.hash(&mut hasher);
    (hasher.finish() >> 8) as usize & (EXT_TABLE_SLOTS - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Point(u8, u8);
    #[derive(Debug)]
    struct Tag(u8);
    #[derive(Debug)]
    struct Orphan;

    impl CustomExt for Point {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }
    impl CustomExt for Tag {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }
    impl CustomExt for Orphan {
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn parent_type(&self) -> Option<TypeId> {
            Some(TypeId::of::<Tag>())
        }
    }

    #[test]
    fn each_type_resolves_to_its_function() {
        let table = ExtEncodeTable::builder()
            .register::<Point, _>(|p| Ok((1, vec![p.0, p.1])))
            .register::<Tag, _>(|t| Ok((2, vec![t.0])))
            .build();

        let point = Point(3, 4);
        let f = table.lookup(point.as_any().type_id()).expect("Point registered");
        assert_eq!(f(point.as_any()).unwrap(), (1, vec![3, 4]));

        let tag = Tag(9);
        let f = table.lookup(tag.as_any().type_id()).expect("Tag registered");
        assert_eq!(f(tag.as_any()).unwrap(), (2, vec![9]));
    }

    #[test]
    fn unregistered_type_misses() {
        let table = ExtEncodeTable::builder()
            .register::<Point, _>(|p| Ok((1, vec![p.0, p.1])))
            .build();
        assert!(table.lookup(TypeId::of::<Tag>()).is_none());
    }

    #[test]
    fn empty_table_misses_everything() {
        let table = ExtEncodeTable::builder().build();
        assert!(table.lookup(TypeId::of::<Point>()).is_none());
    }

    #[test]
    fn reregistering_replaces() {
        let table = ExtEncodeTable::builder()
            .register::<Tag, _>(|_| Ok((1, vec![0])))
            .register::<Tag, _>(|_| Ok((2, vec![0])))
            .build();
        let tag = Tag(0);
        let f = table.lookup(tag.as_any().type_id()).unwrap();
        assert_eq!(f(tag.as_any()).unwrap().0, 2);
    }

    #[test]
    fn many_types_survive_bucket_collisions() {
        // Enough entries that several share buckets; every one must still
        // resolve to its own function.
        macro_rules! probe {
            ($($name:ident => $id:expr),* $(,)?) => {{
                $(
                    #[derive(Debug)]
                    struct $name;
                    impl CustomExt for $name {
                        fn as_any(&self) -> &dyn Any { self }
                    }
                )*
                let table = ExtEncodeTable::builder()
                    $(.register::<$name, _>(|_| Ok(($id, vec![0]))))*
                    .build();
                $(
                    let v = $name;
                    let f = table.lookup(v.as_any().type_id()).expect("registered type must resolve");
                    assert_eq!(f(v.as_any()).unwrap().0, $id);
                )*
            }};
        }
        probe! {
            A0 => 0, A1 => 1, A2 => 2, A3 => 3, A4 => 4, A5 => 5, A6 => 6, A7 => 7,
            A8 => 8, A9 => 9, B0 => 10, B1 => 11, B2 => 12, B3 => 13, B4 => 14, B5 => 15,
        }
    }

    #[test]
    fn decode_table_indexes_negative_ids() {
        let table = ExtDecodeTable::builder()
            .register(-128, |p| Ok(Value::from(p.as_slice().len() as u64)))
            .register(-1, |_| Ok(Value::Null))
            .register(127, |_| Ok(Value::Boolean(true)))
            .build();
        assert!(table.lookup(-128).is_some());
        assert!(table.lookup(-1).is_some());
        assert!(table.lookup(127).is_some());
        assert!(table.lookup(0).is_none());
    }

    #[test]
    fn payload_accessors() {
        let owned = ExtPayload::Owned(vec![1, 2, 3]);
        assert_eq!(owned.as_slice(), &[1, 2, 3]);
        let bytes = [4u8, 5];
        let view = ExtPayload::View(&bytes);
        assert_eq!(view.into_bytes(), vec![4, 5]);
    }

    #[test]
    fn parent_type_hook_reports_the_fallback() {
        let orphan = Orphan;
        assert_eq!(orphan.parent_type(), Some(TypeId::of::<Tag>()));
        assert!(Point(0, 0).parent_type().is_none());
    }
}
