use std::error::Error;
use std::io::{IoSlice, Read, Result as IOResult, Write};

use crate::error::{read_result, PipeError};
use crate::state::{ReaderGate, SharedState, WriterGate};

/// Creates a synchronous in-memory pipe.
///
/// Reads on the returned `PipeReader` are matched with writes on the
/// `PipeWriter`: a write blocks until readers have consumed all of its
/// bytes, and a read blocks until a writer offers some. There is no
/// internal buffering beyond the single write in flight.
///
/// Both handles may be shared between threads. Concurrent reads, and
/// concurrent writes, are serialized one call at a time.
///
/// # Example
///
/// ```rust
/// use std::io::{read_to_string, Write};
/// use std::thread::spawn;
/// use handoff_pipe::pipe;
///
/// let (reader, mut writer) = pipe();
/// spawn(move || {
///     writer.write_all("hello".as_bytes()).unwrap();
/// });
///
/// assert_eq!("hello".to_string(), read_to_string(reader).unwrap());
/// ```
pub fn pipe() -> (PipeReader, PipeWriter) {
    let state = SharedState::default();

    (
        PipeReader {
            state: state.clone(),
        },
        PipeWriter { state },
    )
}

/// The read half of a pipe.
///
/// Reading blocks until a writer arrives or the write half is closed. Once
/// the write half is closed with [`PipeWriter::close`] (or dropped), reads
/// return `Ok(0)`; if it was closed with an error, reads fail with that
/// error. `Read` is also implemented for `&PipeReader`, so one reader can be
/// shared between threads.
///
/// Dropping the reader closes it.
#[derive(Debug)]
pub struct PipeReader {
    pub(crate) state: SharedState,
}

impl PipeReader {
    /// Closes the reader; subsequent writes fail with [`PipeError::Closed`].
    pub fn close(&self) {
        self.state.close_read(None)
    }

    /// Closes the reader; subsequent writes fail with `err`.
    ///
    /// ```rust
    /// use std::io::{ErrorKind, Write};
    /// use handoff_pipe::pipe;
    ///
    /// let (reader, mut writer) = pipe();
    /// reader.close_with_error(std::io::Error::new(ErrorKind::ConnectionAborted, "shutting down"));
    ///
    /// let err = writer.write(b"late").unwrap_err();
    /// assert_eq!(ErrorKind::ConnectionAborted, err.kind());
    /// ```
    pub fn close_with_error<E>(&self, err: E)
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        self.state.close_read(Some(PipeError::custom(err)))
    }

    /// Locks the read side, so that the reads made through the returned
    /// guard are not interleaved with reads from other threads.
    ///
    /// Reading through the `PipeReader` itself on the thread that holds the
    /// lock deadlocks.
    pub fn lock(&self) -> PipeReaderLock<'_> {
        PipeReaderLock {
            state: &self.state,
            gate: self.state.reader_gate(),
        }
    }
}

impl Read for &PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> IOResult<usize> {
        let gate = self.state.reader_gate();
        read_result(self.state.read(&gate, buf))
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> IOResult<usize> {
        (&*self).read(buf)
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.state.close_read(None)
    }
}

/// Exclusive access to the read side of a pipe, returned by [`PipeReader::lock`].
pub struct PipeReaderLock<'a> {
    state: &'a SharedState,
    gate: ReaderGate<'a>,
}

impl Read for PipeReaderLock<'_> {
    fn read(&mut self, buf: &mut [u8]) -> IOResult<usize> {
        read_result(self.state.read(&self.gate, buf))
    }
}

/// The write half of a pipe.
///
/// Writing blocks until readers have consumed all the data or the read half
/// is closed. If the read half is closed with an error, writes fail with
/// that error; otherwise they fail with [`PipeError::Closed`]. A write cut
/// short by a closure after some bytes were consumed returns the short count,
/// and the next write reports the error.
///
/// `Write` is also implemented for `&PipeWriter`, so one writer can be
/// shared between threads. Dropping the writer closes it.
///
/// # Example
///
/// ```rust
/// use std::io::Write;
/// use handoff_pipe::pipe;
///
/// let (reader, mut writer) = pipe();
/// drop(reader);
/// assert!(writer.write("hello".as_bytes()).is_err());
/// ```
#[derive(Debug)]
pub struct PipeWriter {
    pub(crate) state: SharedState,
}

impl PipeWriter {
    /// Closes the writer; once the bytes in flight are consumed, reads
    /// return `Ok(0)`.
    pub fn close(&self) {
        self.state.close_write(None)
    }

    /// Closes the writer; once the bytes in flight are consumed, reads fail
    /// with `err`.
    pub fn close_with_error<E>(&self, err: E)
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        self.state.close_write(Some(PipeError::custom(err)))
    }

    /// Locks the write side, so that the writes made through the returned
    /// guard reach readers back to back.
    ///
    /// ```rust
    /// use std::io::{read_to_string, Write};
    /// use std::thread::spawn;
    /// use handoff_pipe::pipe;
    ///
    /// let (reader, writer) = pipe();
    /// spawn(move || {
    ///     let mut lock = writer.lock();
    ///     lock.write_all(b"head,").unwrap();
    ///     lock.write_all(b"tail").unwrap();
    /// });
    ///
    /// assert_eq!("head,tail", read_to_string(reader).unwrap());
    /// ```
    ///
    /// Writing through the `PipeWriter` itself on the thread that holds the
    /// lock deadlocks.
    pub fn lock(&self) -> PipeWriterLock<'_> {
        PipeWriterLock {
            state: &self.state,
            gate: self.state.writer_gate(),
        }
    }
}

fn concat(bufs: &[IoSlice<'_>]) -> Vec<u8> {
    let data_len = bufs.iter().map(|b| b.len()).sum();
    let mut data = Vec::with_capacity(data_len);

    for buf in bufs {
        data.extend_from_slice(buf)
    }
    data
}

impl Write for &PipeWriter {
    fn write(&mut self, buf: &[u8]) -> IOResult<usize> {
        self.lock().write(buf)
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> IOResult<usize> {
        self.lock().write_vectored(bufs)
    }

    fn flush(&mut self) -> IOResult<()> {
        Ok(())
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> IOResult<usize> {
        (&*self).write(buf)
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> IOResult<usize> {
        (&*self).write_vectored(bufs)
    }

    fn flush(&mut self) -> IOResult<()> {
        Ok(())
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.state.close_write(None)
    }
}

/// Exclusive access to the write side of a pipe, returned by [`PipeWriter::lock`].
pub struct PipeWriterLock<'a> {
    state: &'a SharedState,
    gate: WriterGate<'a>,
}

impl Write for PipeWriterLock<'_> {
    fn write(&mut self, buf: &[u8]) -> IOResult<usize> {
        self.state.write(&self.gate, buf.to_vec()).into_io()
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> IOResult<usize> {
        self.state.write(&self.gate, concat(bufs)).into_io()
    }

    fn flush(&mut self) -> IOResult<()> {
        Ok(())
    }
}
