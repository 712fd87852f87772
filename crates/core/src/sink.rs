//! Append-only output destinations.
//!
//! A [`Sink`] persists each [`ExtractedDocument`] as one plain-text record.
//! Records are written whole or not at all: [`FileSink`] rolls the file back
//! to its previous length when a write fails.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::extract::ExtractedDocument;
use crate::{GleanerError, Result};

/// Destination for extracted documents.
pub trait Sink {
    /// Appends one record. Returns the number of bytes written.
    fn write(&mut self, doc: &ExtractedDocument) -> Result<usize>;

    /// Flushes buffered output.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn write(&mut self, doc: &ExtractedDocument) -> Result<usize> {
        (**self).write(doc)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

/// Serializes `doc`, preceded by `separator` when this is not the first record.
fn encode(doc: &ExtractedDocument, separator: Option<&str>, first: bool) -> Vec<u8> {
    let record = doc.to_record();
    let mut buf = Vec::with_capacity(record.len() + separator.map_or(0, str::len));
    if !first && let Some(sep) = separator {
        buf.extend_from_slice(sep.as_bytes());
    }
    buf.extend_from_slice(record.as_bytes());
    buf
}

/// A file opened once in append mode and held for the life of the run.
///
/// The handle is released when the sink is dropped, on every exit path.
#[derive(Debug)]
pub struct FileSink {
    file: File,
    separator: Option<String>,
    has_records: bool,
}

impl FileSink {
    /// Opens (creating if needed) `path` for appending.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let has_records = file.metadata()?.len() > 0;
        tracing::debug!(path = %path.display(), existing = has_records, "output opened");
        Ok(Self { file, separator: None, has_records })
    }

    /// Writes `separator` between consecutive records.
    ///
    /// If the file already holds content, the first record of this run is
    /// separated from it too.
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = Some(separator.into()).filter(|s| !s.is_empty());
        self
    }

    /// Flushes and syncs the file, then releases it.
    pub fn close(mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

/// Writes `buf` through `writer`; on failure `file` is cut back to the
/// length it had before, so no partial record survives.
fn append_or_truncate<W: Write>(file: &File, writer: &mut W, buf: &[u8]) -> io::Result<()> {
    let before = file.metadata()?.len();
    let result = writer.write_all(buf).and_then(|_| writer.flush());
    if result.is_err()
        && let Err(rollback) = file.set_len(before)
    {
        tracing::error!(error = %rollback, "failed to roll back partial record");
    }
    result
}

impl Sink for FileSink {
    fn write(&mut self, doc: &ExtractedDocument) -> Result<usize> {
        let buf = encode(doc, self.separator.as_deref(), !self.has_records);
        let mut writer = &self.file;
        append_or_truncate(&self.file, &mut writer, &buf)?;

        self.has_records = true;
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<()> {
        self.file.flush().map_err(GleanerError::from)
    }
}

/// Sink over any writer, e.g. stdout or an in-memory buffer.
///
/// Each record goes out in one `write_all` call.
#[derive(Debug)]
pub struct WriterSink<W: Write> {
    writer: W,
    separator: Option<String>,
    has_records: bool,
}

impl<W: Write> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, separator: None, has_records: false }
    }

    /// Writes `separator` between consecutive records.
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = Some(separator.into()).filter(|s| !s.is_empty());
        self
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Sink for WriterSink<W> {
    fn write(&mut self, doc: &ExtractedDocument) -> Result<usize> {
        let buf = encode(doc, self.separator.as_deref(), !self.has_records);
        self.writer.write_all(&buf)?;
        self.writer.flush()?;
        self.has_records = true;
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(GleanerError::from)
    }
}

/// Cloneable handle that serializes writers through one lock.
///
/// Each record is written while the lock is held, so concurrent writers never
/// interleave.
#[derive(Debug)]
pub struct SharedSink<S> {
    inner: Arc<Mutex<S>>,
}

impl<S> Clone for SharedSink<S> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<S: Sink> SharedSink<S> {
    pub fn new(sink: S) -> Self {
        Self { inner: Arc::new(Mutex::new(sink)) }
    }

    /// Appends one record under the lock.
    pub fn write(&self, doc: &ExtractedDocument) -> Result<usize> {
        let mut sink = self.inner.lock().map_err(|_| poisoned())?;
        sink.write(doc)
    }

    pub fn flush(&self) -> Result<()> {
        self.inner.lock().map_err(|_| poisoned())?.flush()
    }

    /// Returns the inner sink if this is the last handle.
    pub fn try_unwrap(self) -> std::result::Result<S, Self> {
        match Arc::try_unwrap(self.inner) {
            Ok(mutex) => Ok(mutex.into_inner().unwrap_or_else(|poison| poison.into_inner())),
            Err(inner) => Err(Self { inner }),
        }
    }
}

impl<S: Sink> Sink for SharedSink<S> {
    fn write(&mut self, doc: &ExtractedDocument) -> Result<usize> {
        SharedSink::write(self, doc)
    }

    fn flush(&mut self) -> Result<()> {
        SharedSink::flush(self)
    }
}

fn poisoned() -> GleanerError {
    GleanerError::SinkError(io::Error::other("output lock poisoned"))
}
