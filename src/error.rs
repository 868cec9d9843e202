//! Library error types.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// An mpack Result, normally returning an mpack [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An mpack error. Encompasses any issue that can happen during encoding,
/// decoding, or streaming to and from files.
#[derive(Clone, Debug)]
pub enum Error {
    /// Encoded data began a value with a byte that is not a valid MessagePack
    /// header (the reserved byte `0xC1`).
    BadHeader(u8),
    /// The decoder would have to read past the end of the encoded data.
    Overread {
        /// How many more bytes the current item needed
        needed: usize,
        /// How many bytes were actually left
        remaining: usize,
    },
    /// A string, binary, array, map, or ext value exceeded the 2^32-1 size
    /// limit of its largest header class.
    SizeLimit {
        /// Which header family hit the limit
        family: &'static str,
        /// The offending size
        size: usize,
    },
    /// A string payload was not valid UTF-8.
    BadUtf8,
    /// An integer fell outside the encodable range of `u64` / `i64`.
    IntOverflow,
    /// Ext payloads must hold at least one byte.
    EmptyExt,
    /// An ext id was decoded with no matching read function registered.
    UnknownExtId(i8),
    /// A value had no builtin encoding and no ext table entry matched its
    /// type. Carries the `Debug` rendering of the value.
    UnsupportedType(String),
    /// A map key was not a string while `strict_keys` was set.
    KeyType {
        /// Name of the value kind that appeared as a key
        kind: &'static str,
    },
    /// Nesting exceeded the configured `max_depth`.
    DepthLimit(usize),
    /// One-shot decoding finished with undecoded bytes left over, and
    /// `allow_trailing` was disabled.
    TrailingBytes {
        /// Number of bytes left after the decoded value
        remaining: usize,
    },
    /// An allocation was refused by the allocator.
    Memory {
        /// Size of the refused allocation
        requested: usize,
    },
    /// A file operation failed. Carries the OS error and the file involved.
    Io {
        /// What the codec was doing when the failure hit
        op: &'static str,
        /// Path of the file involved
        path: PathBuf,
        /// The underlying OS error
        source: Arc<std::io::Error>,
    },
    /// A streaming read found the file exhausted before the next value.
    Eof {
        /// Path of the file involved
        path: PathBuf,
    },
    /// A streaming write came up short. When `restored` is set, the file was
    /// truncated back to its pre-write length; otherwise partial data remains
    /// and the file handle was dropped, forcing a reopen on the next call.
    ShortWrite {
        /// Path of the file involved
        path: PathBuf,
        /// Bytes the OS accepted
        written: usize,
        /// Bytes the encoded value required
        expected: usize,
        /// Whether truncating back to the old length succeeded
        restored: bool,
    },
}

impl Error {
    pub(crate) fn io(op: &'static str, path: &std::path::Path, source: std::io::Error) -> Self {
        Error::Io {
            op,
            path: path.to_path_buf(),
            source: Arc::new(source),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::BadHeader(byte) => write!(
                f,
                "Received invalid encoded data (invalid header byte 0x{:02X})",
                byte
            ),
            Error::Overread { needed, remaining } => write!(
                f,
                "Received invalid encoded data (overread: needed {} more bytes, {} left)",
                needed, remaining
            ),
            Error::SizeLimit { family, size } => write!(
                f,
                "{} values can only hold up to 4294967295 bytes (2^32-1), got a size of {}",
                family, size
            ),
            Error::BadUtf8 => write!(f, "String payload wasn't valid UTF-8"),
            Error::IntOverflow => write!(
                f,
                "Integer values cannot exceed 18446744073709551615 (2^64-1) or -9223372036854775808 (-2^63)"
            ),
            Error::EmptyExt => write!(f, "Ext types do not support zero-length data"),
            Error::UnknownExtId(id) => {
                write!(f, "Could not match an ext function for decoding on id {}", id)
            }
            Error::UnsupportedType(ref value) => {
                write!(f, "Received unsupported type: '{}'", value)
            }
            Error::KeyType { kind } => write!(
                f,
                "Only string types are supported as map keys in strict mode, received a key of type '{}'",
                kind
            ),
            Error::DepthLimit(max) => {
                write!(f, "Nesting depth exceeded the maximum of {}", max)
            }
            Error::TrailingBytes { remaining } => write!(
                f,
                "Received invalid encoded data ({} trailing bytes after the value)",
                remaining
            ),
            Error::Memory { requested } => {
                write!(f, "Failed to allocate {} bytes", requested)
            }
            Error::Io {
                op,
                ref path,
                ref source,
            } => write!(f, "Unable to {} file '{}': {}", op, path.display(), source),
            Error::Eof { ref path } => write!(
                f,
                "Unable to read data from file '{}', reached End Of File (EOF)",
                path.display()
            ),
            Error::ShortWrite {
                ref path,
                written,
                expected,
                restored,
            } => {
                if restored {
                    write!(
                        f,
                        "Failed to write encoded data to file '{}' ({} of {} bytes written); the file was truncated back to its old size",
                        path.display(),
                        written,
                        expected
                    )
                } else {
                    write!(
                        f,
                        "Failed to write encoded data to file '{}' ({} of {} bytes written), and truncating it back failed, leaving partially written data",
                        path.display(),
                        written,
                        expected
                    )
                }
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            Error::Io { ref source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}
