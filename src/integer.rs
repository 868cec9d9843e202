use std::cmp::Ordering;
use std::convert::TryFrom;
use std::fmt::{self, Debug, Display};

use crate::error::Error;

/// Internal representation. `PosInt` holds every non-negative value (up to
/// `u64::MAX`), `NegInt` holds every negative value, so each integer has
/// exactly one representation and derived equality is sound.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum IntPriv {
    /// Always zero or greater.
    PosInt(u64),
    /// Always less than zero.
    NegInt(i64),
}

/// A MessagePack integer, whether signed or unsigned.
///
/// Covers the full wire range: `[-2^63, 2^64-1]`. Values above `i64::MAX`
/// stay unsigned, values below zero stay signed; anything outside the range
/// is rejected at conversion time with [`Error::IntOverflow`].
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Integer {
    n: IntPriv,
}

impl Integer {
    /// Minimum representable integer, equivalent to `i64::MIN`.
    pub const MIN: Integer = Integer {
        n: IntPriv::NegInt(i64::MIN),
    };

    /// Maximum representable integer, equivalent to `u64::MAX`.
    pub const MAX: Integer = Integer {
        n: IntPriv::PosInt(u64::MAX),
    };

    /// Returns `true` if the integer can be represented as `i64`.
    #[inline]
    pub fn is_i64(&self) -> bool {
        match self.n {
            IntPriv::PosInt(n) => n <= i64::MAX as u64,
            IntPriv::NegInt(..) => true,
        }
    }

    /// Returns `true` if the integer can be represented as `u64`.
    #[inline]
    pub fn is_u64(&self) -> bool {
        matches!(self.n, IntPriv::PosInt(..))
    }

    /// Returns the integer as `i64` if it fits, or else `None`.
    #[inline]
    pub fn as_i64(&self) -> Option<i64> {
        match self.n {
            IntPriv::PosInt(n) => i64::try_from(n).ok(),
            IntPriv::NegInt(n) => Some(n),
        }
    }

    /// Returns the integer as `u64` if it is non-negative, or else `None`.
    #[inline]
    pub fn as_u64(&self) -> Option<u64> {
        match self.n {
            IntPriv::PosInt(n) => Some(n),
            IntPriv::NegInt(..) => None,
        }
    }

    /// Returns the integer converted to `f64`. Lossy above 2^53.
    #[inline]
    pub fn as_f64(&self) -> f64 {
        match self.n {
            IntPriv::PosInt(n) => n as f64,
            IntPriv::NegInt(n) => n as f64,
        }
    }

    /// Returns the integer widened to `i128`, which always fits.
    #[inline]
    pub fn as_i128(&self) -> i128 {
        match self.n {
            IntPriv::PosInt(n) => n as i128,
            IntPriv::NegInt(n) => n as i128,
        }
    }

    #[inline]
    pub(crate) fn parts(&self) -> IntPriv {
        self.n
    }
}

impl Default for Integer {
    fn default() -> Self {
        Integer {
            n: IntPriv::PosInt(0),
        }
    }
}

impl Ord for Integer {
    fn cmp(&self, other: &Integer) -> Ordering {
        match (self.n, other.n) {
            (IntPriv::NegInt(lhs), IntPriv::NegInt(rhs)) => lhs.cmp(&rhs),
            (IntPriv::NegInt(_), IntPriv::PosInt(_)) => Ordering::Less,
            (IntPriv::PosInt(_), IntPriv::NegInt(_)) => Ordering::Greater,
            (IntPriv::PosInt(lhs), IntPriv::PosInt(rhs)) => lhs.cmp(&rhs),
        }
    }
}

impl PartialOrd for Integer {
    fn partial_cmp(&self, other: &Integer) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Debug for Integer {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        Debug::fmt(&self.n, fmt)
    }
}

impl Display for Integer {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        match self.n {
            IntPriv::PosInt(v) => Display::fmt(&v, fmt),
            IntPriv::NegInt(v) => Display::fmt(&v, fmt),
        }
    }
}

macro_rules! impl_from_unsigned {
    ($t: ty) => {
        impl From<$t> for Integer {
            fn from(n: $t) -> Self {
                Integer {
                    n: IntPriv::PosInt(n as u64),
                }
            }
        }
    };
}

macro_rules! impl_from_signed {
    ($t: ty) => {
        impl From<$t> for Integer {
            fn from(n: $t) -> Self {
                if n < 0 {
                    Integer {
                        n: IntPriv::NegInt(n as i64),
                    }
                } else {
                    Integer {
                        n: IntPriv::PosInt(n as u64),
                    }
                }
            }
        }
    };
}

impl_from_unsigned!(u8);
impl_from_unsigned!(u16);
impl_from_unsigned!(u32);
impl_from_unsigned!(u64);
impl_from_unsigned!(usize);
impl_from_signed!(i8);
impl_from_signed!(i16);
impl_from_signed!(i32);
impl_from_signed!(i64);
impl_from_signed!(isize);

/// The wide-integer entry point. Anything outside `[-2^63, 2^64-1]` is an
/// overflow error, matching what the wire format can carry.
impl TryFrom<i128> for Integer {
    type Error = Error;

    fn try_from(n: i128) -> Result<Self, Error> {
        if n < 0 {
            let n = i64::try_from(n).map_err(|_| Error::IntOverflow)?;
            Ok(Integer {
                n: IntPriv::NegInt(n),
            })
        } else {
            let n = u64::try_from(n).map_err(|_| Error::IntOverflow)?;
            Ok(Integer {
                n: IntPriv::PosInt(n),
            })
        }
    }
}

impl TryFrom<u128> for Integer {
    type Error = Error;

    fn try_from(n: u128) -> Result<Self, Error> {
        let n = u64::try_from(n).map_err(|_| Error::IntOverflow)?;
        Ok(Integer {
            n: IntPriv::PosInt(n),
        })
    }
}

macro_rules! impl_try_into {
    ($t: ty) => {
        impl TryFrom<Integer> for $t {
            type Error = Integer;
            fn try_from(v: Integer) -> Result<Self, Self::Error> {
                match v.n {
                    IntPriv::PosInt(n) => TryFrom::try_from(n).map_err(|_| v),
                    IntPriv::NegInt(n) => TryFrom::try_from(n).map_err(|_| v),
                }
            }
        }
    };
}

impl_try_into!(u8);
impl_try_into!(u16);
impl_try_into!(u32);
impl_try_into!(u64);
impl_try_into!(usize);
impl_try_into!(i8);
impl_try_into!(i16);
impl_try_into!(i32);
impl_try_into!(i64);
impl_try_into!(isize);

use serde::{
    de::{Deserialize, Deserializer},
    ser::{Serialize, Serializer},
};

impl Serialize for Integer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.n {
            IntPriv::PosInt(v) => serializer.serialize_u64(v),
            IntPriv::NegInt(v) => serializer.serialize_i64(v),
        }
    }
}

impl<'de> Deserialize<'de> for Integer {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct IntVisitor;
        impl serde::de::Visitor<'_> for IntVisitor {
            type Value = Integer;

            fn expecting(&self, fmt: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
                write!(fmt, "an integer")
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
                Ok(Integer::from(v))
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(Integer::from(v))
            }
        }

        deserializer.deserialize_any(IntVisitor)
    }
}
