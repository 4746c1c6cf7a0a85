use std::error::Error;
use std::io::{IoSlice, Result as IOResult};
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use futures_io::{AsyncRead, AsyncWrite};

use crate::error::{read_result, PipeError};
use crate::state::SharedState;
#[cfg(feature = "sync")]
use crate::{PipeReader, PipeWriter};

/// Creates a pair of asynchronous reader and writer objects.
///
/// The pipe behaves like [`pipe`](crate::pipe): a write completes once the
/// reader has consumed all of its bytes, and nothing is buffered beyond the
/// write in flight.
///
/// # Example
///
/// ```rust
/// use futures::{executor::block_on, AsyncReadExt, AsyncWriteExt};
/// use handoff_pipe::async_pipe;
///
/// block_on(async {
///     let (mut reader, mut writer) = async_pipe();
///     let write = async move {
///         writer.write_all(b"hello").await.unwrap();
///         writer.close().await.unwrap();
///     };
///     let read = async move {
///         let mut str = String::new();
///         reader.read_to_string(&mut str).await.unwrap();
///         str
///     };
///
///     let ((), str) = futures::join!(write, read);
///     assert_eq!("hello", str);
/// });
/// ```
pub fn async_pipe() -> (AsyncPipeReader, AsyncPipeWriter) {
    let state = SharedState::default();

    (
        AsyncPipeReader {
            state: state.clone(),
        },
        AsyncPipeWriter {
            state,
            pending: None,
        },
    )
}

/// Creates a pair of asynchronous reader and synchronous writer objects.
///
/// # Example
///
/// ```rust
/// use std::io::Write;
/// use std::thread::spawn;
/// use futures::{executor::block_on, AsyncReadExt};
/// use handoff_pipe::async_reader_pipe;
///
/// let (mut reader, mut writer) = async_reader_pipe();
/// spawn(move || writer.write_all(b"hello").unwrap());
///
/// let mut str = String::new();
/// block_on(reader.read_to_string(&mut str)).unwrap();
/// assert_eq!("hello", str);
/// ```
#[cfg(feature = "sync")]
pub fn async_reader_pipe() -> (AsyncPipeReader, PipeWriter) {
    let state = SharedState::default();

    (
        AsyncPipeReader {
            state: state.clone(),
        },
        PipeWriter { state },
    )
}

/// Creates a pair of synchronous reader and asynchronous writer objects.
#[cfg(feature = "sync")]
pub fn async_writer_pipe() -> (PipeReader, AsyncPipeWriter) {
    let state = SharedState::default();

    (
        PipeReader {
            state: state.clone(),
        },
        AsyncPipeWriter {
            state,
            pending: None,
        },
    )
}

/// The read half of an asynchronous pipe, implementing `AsyncRead`.
///
/// Dropping the reader closes it.
#[derive(Debug)]
pub struct AsyncPipeReader {
    state: SharedState,
}

impl AsyncPipeReader {
    /// Closes the reader; subsequent writes fail with [`PipeError::Closed`].
    pub fn close(&self) {
        self.state.close_read(None)
    }

    /// Closes the reader; subsequent writes fail with `err`.
    pub fn close_with_error<E>(&self, err: E)
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        self.state.close_read(Some(PipeError::custom(err)))
    }
}

impl AsyncRead for AsyncPipeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<IOResult<usize>> {
        self.state.poll_read(cx, buf).map(read_result)
    }
}

impl Drop for AsyncPipeReader {
    fn drop(&mut self) {
        self.state.close_read(None)
    }
}

/// The write half of an asynchronous pipe, implementing `AsyncWrite`.
///
/// The first poll of a write offers the buffer to the reader; the write
/// completes once the reader has consumed it. Polls that retry with the same
/// bytes keep waiting on that offer. A poll with different bytes means the
/// earlier write was abandoned: its offer is taken back and the new bytes
/// are offered instead.
///
/// Closing the writer with `AsyncWriteExt::close`, with
/// [`AsyncPipeWriter::close_with_error`], or by dropping it also takes a
/// pending offer back, after which the reader sees the closure.
#[derive(Debug)]
pub struct AsyncPipeWriter {
    state: SharedState,
    pending: Option<Vec<u8>>,
}

impl AsyncPipeWriter {
    /// Closes the writer; once the bytes in flight are consumed, reads fail
    /// with `err`. A write still pending on this writer is withdrawn.
    pub fn close_with_error<E>(&mut self, err: E)
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        self.withdraw();
        self.state.close_write(Some(PipeError::custom(err)))
    }

    fn poll_offer<'b, I>(&mut self, cx: &mut Context<'_>, bytes: I) -> Poll<IOResult<usize>>
    where
        I: Iterator<Item = &'b u8> + Clone,
    {
        let stale = self
            .pending
            .as_ref()
            .is_some_and(|offered| !offered.iter().eq(bytes.clone()));
        if stale {
            self.withdraw();
        }

        let len = match &self.pending {
            Some(offered) => offered.len(),
            None => {
                let data = bytes.copied().collect::<Vec<u8>>();
                let len = data.len();
                self.state.offer(data.clone())?;
                self.pending = Some(data);
                len
            }
        };

        let written = ready!(self.state.poll_written(cx, len));
        self.pending = None;
        Poll::Ready(written.into_io())
    }

    fn withdraw(&mut self) {
        if self.pending.take().is_some() {
            self.state.withdraw();
        }
    }
}

impl AsyncWrite for AsyncPipeWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<IOResult<usize>> {
        self.get_mut().poll_offer(cx, buf.iter())
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[IoSlice<'_>],
    ) -> Poll<IOResult<usize>> {
        self.get_mut()
            .poll_offer(cx, bufs.iter().flat_map(|b| b.iter()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<IOResult<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<IOResult<()>> {
        let this = self.get_mut();
        this.withdraw();
        this.state.close_write(None);
        Poll::Ready(Ok(()))
    }
}

impl Drop for AsyncPipeWriter {
    fn drop(&mut self) {
        self.withdraw();
        self.state.close_write(None)
    }
}
