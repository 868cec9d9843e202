//! File-backed streaming.
//!
//! A streaming [`Encoder`] appends each encoded value to a file; a
//! streaming [`Decoder`] reads values back one at a time through a
//! fixed-size window that refills itself from the file. The file format is
//! a bare concatenation of MessagePack values with no separator, so a file
//! written by the encoder (or any conforming implementation) can be read
//! back value by value.

use std::fs::{File, OpenOptions};
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::decode::{DecodeOptions, Input, Reader};
use crate::depth::DepthBudget;
use crate::encode::{encode_into, EncodeOptions, BUFFER_DEFAULT_SIZE};
use crate::error::{Error, Result};
use crate::value::Value;

/// Streaming encoder: encodes values into a reusable in-memory buffer and
/// appends the bytes to a file.
pub struct Encoder {
    opts: EncodeOptions,
    path: PathBuf,
    file: Option<File>,
    buf: Vec<u8>,
}

impl Encoder {
    /// Open `path` for appending (creating it if needed) and return a
    /// streaming encoder.
    pub fn create<P: AsRef<Path>>(path: P, opts: EncodeOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = open_append(&path)?;
        debug!(path = %path.display(), "opened streaming encode file");
        Ok(Self {
            opts,
            path,
            file: Some(file),
            buf: Vec::new(),
        })
    }

    /// Encode one value and append its bytes to the file in a single write.
    ///
    /// A short write is rolled back by truncating the file to its pre-call
    /// length. If the truncation fails as well, the file handle is dropped
    /// (the next call reopens the file) and [`Error::ShortWrite`] reports
    /// `restored: false`.
    pub fn encode(&mut self, value: &Value) -> Result<()> {
        self.buf.clear();
        encode_into(&mut self.buf, value, &self.opts)?;

        let mut file = match self.file.take() {
            Some(file) => file,
            None => {
                debug!(path = %self.path.display(), "reopening streaming encode file");
                open_append(&self.path)?
            }
        };

        let result = append_record(&mut file, &self.path, &self.buf);
        let keep = !matches!(
            result,
            Err(Error::ShortWrite {
                restored: false,
                ..
            })
        );
        if keep {
            self.file = Some(file);
        }
        result
    }

    /// The file this encoder appends to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::io("open", path, e))
}

/// The slice of file behavior the append path needs. Split out so the
/// short-write recovery can be exercised without an actual failing disk.
trait RecordSink {
    fn sink_len(&mut self) -> std::io::Result<u64>;
    fn write_chunk(&mut self, buf: &[u8]) -> std::io::Result<usize>;
    fn truncate(&mut self, len: u64) -> std::io::Result<()>;
}

impl RecordSink for File {
    fn sink_len(&mut self) -> std::io::Result<u64> {
        self.metadata().map(|m| m.len())
    }

    fn write_chunk(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        std::io::Write::write(self, buf)
    }

    fn truncate(&mut self, len: u64) -> std::io::Result<()> {
        self.set_len(len)
    }
}

/// Append `bytes` to the sink in one write, restoring the old length when
/// the write comes up short.
fn append_record<S: RecordSink>(sink: &mut S, path: &Path, bytes: &[u8]) -> Result<()> {
    let old_len = sink.sink_len().map_err(|e| Error::io("write", path, e))?;

    let written = match sink.write_chunk(bytes) {
        Ok(n) => n,
        Err(e) => {
            // Whether anything landed is unknown; trim back to be safe.
            let _ = sink.truncate(old_len);
            return Err(Error::io("write", path, e));
        }
    };

    if written != bytes.len() {
        let restored = sink.truncate(old_len).is_ok();
        debug!(
            path = %path.display(),
            written,
            expected = bytes.len(),
            restored,
            "short streaming write"
        );
        return Err(Error::ShortWrite {
            path: path.to_path_buf(),
            written,
            expected: bytes.len(),
            restored,
        });
    }

    Ok(())
}

/// Streaming decoder: reads one value per call from a file, buffering
/// through an owned window.
pub struct Decoder {
    opts: DecodeOptions,
    input: FileInput,
    pos: usize,
}

impl Decoder {
    /// Open `path` for reading and return a streaming decoder.
    pub fn open<P: AsRef<Path>>(path: P, opts: DecodeOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| Error::io("open", &path, e))?;
        debug!(path = %path.display(), "opened streaming decode file");
        Ok(Self {
            opts,
            input: FileInput::new(file, path),
            pos: 0,
        })
    }

    /// Decode the next value from the file.
    ///
    /// Returns [`Error::Eof`] once the file is exhausted at a value
    /// boundary. After any error the window is discarded, so a subsequent
    /// call starts from the file's current position.
    pub fn decode_next(&mut self) -> Result<Value> {
        let mut reader = Reader::at(&mut self.input, &self.opts, self.pos);
        match reader.read_value(DepthBudget::new(self.opts.max_depth)) {
            Ok(value) => {
                self.pos = reader.position();
                Ok(value)
            }
            Err(err) => {
                self.pos = 0;
                self.input.clear();
                Err(err)
            }
        }
    }

    /// The file this decoder reads from.
    pub fn path(&self) -> &Path {
        self.input.path()
    }
}

/// File-backed decode window. Bytes already buffered but not yet consumed
/// survive across refills: the unread tail is moved to the front of the
/// window before more data is read, and the window grows (with 1.2x
/// headroom) whenever a single item needs more than it can hold.
struct FileInput {
    file: File,
    path: PathBuf,
    window: Vec<u8>,
    end: usize,
}

impl FileInput {
    fn new(file: File, path: PathBuf) -> Self {
        Self {
            file,
            path,
            window: vec![0; BUFFER_DEFAULT_SIZE],
            end: 0,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn clear(&mut self) {
        self.end = 0;
    }
}

impl Input for FileInput {
    fn ensure(&mut self, pos: usize, need: usize) -> Result<usize> {
        if pos + need <= self.end {
            return Ok(pos);
        }

        // Carry the unread tail to the front before refilling.
        self.window.copy_within(pos..self.end, 0);
        self.end -= pos;

        if need > self.window.len() {
            let newsize = need + need / 5;
            self.window
                .try_reserve_exact(newsize - self.window.len())
                .map_err(|_| Error::Memory { requested: newsize })?;
            self.window.resize(newsize, 0);
            trace!(newsize, "grew streaming decode window");
        }

        while self.end < need {
            let n = match self.file.read(&mut self.window[self.end..]) {
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::io("read", &self.path, e)),
            };
            if n == 0 {
                return Err(Error::Eof {
                    path: self.path.clone(),
                });
            }
            self.end += n;
            trace!(read = n, buffered = self.end, "refilled streaming decode window");
        }

        Ok(0)
    }

    fn window(&self) -> &[u8] {
        &self.window[..self.end]
    }
}
