//! Tailing of a single growing access log file.
//!
//! Uses synchronous `std::fs` reads since these are quick local operations.
//! Each [`LogTail::poll`] returns the complete lines appended since the last
//! call and never blocks waiting for data.

use std::fs::{self, File, Metadata};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

/// Lines longer than this are skipped.
const MAX_LINE_LEN: usize = 1_048_576;

/// Upper bound on bytes consumed by a single poll.
const MAX_READ_PER_POLL: u64 = 8_388_608;

/// Errors from reading the log file.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The log file does not exist (yet, or any more).
    #[error("log file {} is not available", path.display())]
    Unavailable {
        /// Path that was looked up.
        path: PathBuf,
    },
    /// The log file exists but could not be read.
    #[error("failed to read log file {}: {source}", path.display())]
    Io {
        /// Path being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Where a freshly opened tail starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartPosition {
    /// Start at the first byte of the file.
    Beginning,
    /// Start at the current end of the file; only new lines are returned.
    #[default]
    End,
}

/// Identity of the file behind a path, used to detect rotation by rename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileId {
    dev: u64,
    ino: u64,
}

#[cfg(unix)]
fn file_id(metadata: &Metadata) -> Option<FileId> {
    use std::os::unix::fs::MetadataExt;
    Some(FileId {
        dev: metadata.dev(),
        ino: metadata.ino(),
    })
}

#[cfg(not(unix))]
fn file_id(_metadata: &Metadata) -> Option<FileId> {
    None
}

/// Incremental reader over an append-only log file.
///
/// Tracks the byte offset of the last complete line read. Rotation (the
/// file shrinking below that offset, or the path now naming a different
/// file) resets the offset to the start of the new file.
#[derive(Debug)]
pub struct LogTail {
    path: PathBuf,
    offset: u64,
    file_id: Option<FileId>,
    vanished: bool,
    /// Inside an oversized line whose head was already dropped.
    discarding: bool,
}

impl LogTail {
    /// Open a tail on `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Unavailable`] if the file does not exist, or
    /// [`SourceError::Io`] if its metadata cannot be read. Callers are
    /// expected to retry with backoff.
    pub fn open(path: impl Into<PathBuf>, start: StartPosition) -> Result<Self, SourceError> {
        let path = path.into();
        let metadata = stat(&path)?;
        let offset = match start {
            StartPosition::Beginning => 0,
            StartPosition::End => metadata.len(),
        };
        debug!(path = %path.display(), offset, "log tail opened");
        Ok(Self {
            file_id: file_id(&metadata),
            path,
            offset,
            vanished: false,
            discarding: false,
        })
    }

    /// Path being tailed.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Byte offset just past the last complete line returned.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read complete lines appended since the last poll.
    ///
    /// An unterminated trailing line is left unread until its newline
    /// arrives. Returns an empty vector when there is nothing new.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Unavailable`] if the file disappeared, or
    /// [`SourceError::Io`] on read failures.
    pub fn poll(&mut self) -> Result<Vec<String>, SourceError> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) => {
                // Whatever appears at this path next is a new file, even if
                // the filesystem hands it the old inode number.
                if e.kind() == io::ErrorKind::NotFound {
                    self.vanished = true;
                }
                return Err(self.io_error(e));
            }
        };
        let metadata = file.metadata().map_err(|e| self.io_error(e))?;
        let len = metadata.len();
        let id = file_id(&metadata);

        if self.vanished || id != self.file_id {
            info!(path = %self.path.display(), "log file replaced, reading new file from start");
            self.vanished = false;
            self.discarding = false;
            self.file_id = id;
            self.offset = 0;
        } else if len < self.offset {
            info!(
                path = %self.path.display(),
                offset = self.offset,
                len,
                "log file truncated, reading from start"
            );
            self.discarding = false;
            self.offset = 0;
        }

        if len == self.offset {
            return Ok(Vec::new());
        }

        let buf = self.read_from_offset(&mut file, MAX_READ_PER_POLL)?;
        let split = split_complete_lines(&buf, self.discarding);
        self.discarding = split.discarding;
        self.advance(split.consumed);

        Ok(split.lines)
    }

    /// Consume whatever follows the last complete line, treating it as a
    /// finished line.
    ///
    /// Only meaningful once the file is known to be complete, as in a dry
    /// run over a static file. Returns `None` when there is no trailing text
    /// or it belongs to an oversized line.
    ///
    /// # Errors
    ///
    /// Same as [`LogTail::poll`].
    pub fn take_remainder(&mut self) -> Result<Option<String>, SourceError> {
        let mut file = File::open(&self.path).map_err(|e| self.io_error(e))?;
        let limit = u64::try_from(MAX_LINE_LEN).unwrap_or(u64::MAX).saturating_add(1);
        let buf = self.read_from_offset(&mut file, limit)?;
        if buf.is_empty() {
            return Ok(None);
        }
        self.advance(buf.len());

        if self.discarding || buf.len() > MAX_LINE_LEN {
            self.discarding = false;
            warn!(path = %self.path.display(), "skipping oversized trailing log line");
            return Ok(None);
        }

        let text = String::from_utf8_lossy(&buf);
        let text = text.trim_end_matches(['\n', '\r']);
        Ok((!text.is_empty()).then(|| text.to_owned()))
    }

    fn read_from_offset(&self, file: &mut File, limit: u64) -> Result<Vec<u8>, SourceError> {
        file.seek(SeekFrom::Start(self.offset))
            .map_err(|e| self.io_error(e))?;
        let mut buf = Vec::new();
        file.take(limit)
            .read_to_end(&mut buf)
            .map_err(|e| self.io_error(e))?;
        Ok(buf)
    }

    fn advance(&mut self, consumed: usize) {
        let consumed = u64::try_from(consumed).unwrap_or(u64::MAX);
        self.offset = self.offset.saturating_add(consumed);
    }

    fn io_error(&self, source: io::Error) -> SourceError {
        if source.kind() == io::ErrorKind::NotFound {
            SourceError::Unavailable {
                path: self.path.clone(),
            }
        } else {
            SourceError::Io {
                path: self.path.clone(),
                source,
            }
        }
    }
}

fn stat(path: &Path) -> Result<Metadata, SourceError> {
    fs::metadata(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            SourceError::Unavailable {
                path: path.to_path_buf(),
            }
        } else {
            SourceError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

/// Result of [`split_complete_lines`].
#[derive(Debug, PartialEq, Eq)]
struct Split {
    lines: Vec<String>,
    consumed: usize,
    discarding: bool,
}

/// Split `buf` into newline-terminated lines.
///
/// Bytes after the final newline are not consumed unless they already exceed
/// [`MAX_LINE_LEN`]. In that case they are dropped so the tail cannot stall,
/// and `discarding` stays set until the rest of that line has been skipped.
fn split_complete_lines(buf: &[u8], mut discarding: bool) -> Split {
    let mut lines = Vec::new();
    let mut consumed = 0usize;

    for chunk in buf.split_inclusive(|b| *b == b'\n') {
        let terminated = chunk.last() == Some(&b'\n');
        if discarding {
            consumed = consumed.saturating_add(chunk.len());
            if !terminated {
                break;
            }
            discarding = false;
            continue;
        }
        if !terminated {
            if chunk.len() > MAX_LINE_LEN {
                warn!(len = chunk.len(), "dropping oversized unterminated log line");
                consumed = consumed.saturating_add(chunk.len());
                discarding = true;
            }
            break;
        }
        consumed = consumed.saturating_add(chunk.len());

        if chunk.len() > MAX_LINE_LEN {
            warn!(len = chunk.len(), "skipping oversized log line");
            continue;
        }

        let text = String::from_utf8_lossy(chunk);
        let text = text.trim_end_matches(['\n', '\r']);
        if !text.is_empty() {
            lines.push(text.to_owned());
        }
    }

    Split {
        lines,
        consumed,
        discarding,
    }
}
