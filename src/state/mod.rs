#[cfg(not(feature = "fast-mutex"))]
mod std_state;

#[cfg(not(feature = "fast-mutex"))]
use std_state::{Condvar, Mutex, MutexGuard};

#[cfg(feature = "fast-mutex")]
mod parking_lot_state;

#[cfg(feature = "fast-mutex")]
use parking_lot_state::{Condvar, Mutex, MutexGuard};

use std::io;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use tracing::{debug, trace};

use crate::error::PipeError;

/// The writer's buffer currently offered to readers, with a read cursor.
///
/// An empty segment is a valid offer, so presence is always tracked with
/// `Option<Segment>` rather than by length.
#[derive(Debug)]
struct Segment {
    data: Vec<u8>,
    pos: usize,
}

impl Segment {
    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn copy_to(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.remaining());
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        n
    }
}

/// Everything guarded by the state lock.
#[derive(Debug, Default)]
struct Inner {
    inflight: Option<Segment>,
    reader_closed: Option<PipeError>,
    writer_closed: Option<PipeError>,
    #[cfg_attr(not(test), allow(dead_code))]
    reader_parked: bool,
    reader_waker: Option<Waker>,
    writer_waker: Option<Waker>,
}

#[derive(Debug, Default)]
struct Pipe {
    reader_gate: Mutex<()>,
    writer_gate: Mutex<()>,
    inner: Mutex<Inner>,
    reader_wait: Condvar,
    writer_wait: Condvar,
}

impl Pipe {
    fn wake_reader(&self, inner: &mut Inner) {
        self.reader_wait.notify_one();
        if let Some(waker) = inner.reader_waker.take() {
            waker.wake();
        }
    }

    fn wake_writer(&self, inner: &mut Inner) {
        self.writer_wait.notify_one();
        if let Some(waker) = inner.writer_waker.take() {
            waker.wake();
        }
    }

    fn poll_read_locked(
        &self,
        inner: &mut Inner,
        buf: &mut [u8],
    ) -> Poll<Result<usize, PipeError>> {
        if inner.reader_closed.is_some() {
            return Poll::Ready(Err(PipeError::Closed));
        }

        if let Some(segment) = inner.inflight.as_mut() {
            let n = segment.copy_to(buf);
            if segment.remaining() == 0 {
                inner.inflight = None;
                self.wake_writer(inner);
            }
            // A drained empty segment is a zero-byte hand-off, not the end of stream.
            if n > 0 || buf.is_empty() {
                trace!(n, "pipe segment handed off");
                return Poll::Ready(Ok(n));
            }
        }

        match &inner.writer_closed {
            Some(err) => Poll::Ready(Err(err.clone())),
            None => Poll::Pending,
        }
    }

    fn offer_locked(&self, inner: &mut Inner, data: Vec<u8>) -> Result<(), PipeError> {
        if inner.writer_closed.is_some() {
            return Err(PipeError::Closed);
        }

        inner.inflight = Some(Segment { data, pos: 0 });
        self.wake_reader(inner);
        Ok(())
    }

    fn poll_written_locked(&self, inner: &mut Inner, len: usize) -> Poll<Written> {
        let error = if inner.inflight.is_none() {
            None
        } else if let Some(err) = &inner.reader_closed {
            Some(err.clone())
        } else if inner.writer_closed.is_some() {
            Some(PipeError::Closed)
        } else {
            return Poll::Pending;
        };

        // Cleared on every exit so a failed write leaves nothing behind.
        let remaining = inner.inflight.take().map_or(0, |segment| segment.remaining());
        Poll::Ready(Written {
            n: len - remaining,
            error,
        })
    }
}

/// Outcome of the write path: bytes consumed by readers, and the closure
/// that ended the call early, if any. Both may be set.
#[derive(Debug)]
pub(crate) struct Written {
    pub(crate) n: usize,
    pub(crate) error: Option<PipeError>,
}

impl Written {
    fn failed(error: PipeError) -> Self {
        Self {
            n: 0,
            error: Some(error),
        }
    }

    /// A partial write is reported as a short write; the closure stays
    /// recorded, so the next call reports it.
    pub(crate) fn into_io(self) -> io::Result<usize> {
        match self.error {
            Some(err) if self.n == 0 => Err(err.into()),
            _ => Ok(self.n),
        }
    }
}

/// Proof that the calling thread holds the reader gate.
pub(crate) struct ReaderGate<'a>(#[allow(dead_code)] MutexGuard<'a, ()>);

/// Proof that the calling thread holds the writer gate.
pub(crate) struct WriterGate<'a>(#[allow(dead_code)] MutexGuard<'a, ()>);

/// The pipe shared by one reader handle and one writer handle.
#[derive(Clone, Debug, Default)]
pub(crate) struct SharedState(Arc<Pipe>);

impl SharedState {
    pub(crate) fn reader_gate(&self) -> ReaderGate<'_> {
        ReaderGate(self.0.reader_gate.lock())
    }

    pub(crate) fn writer_gate(&self) -> WriterGate<'_> {
        WriterGate(self.0.writer_gate.lock())
    }

    /// Blocks until bytes are delivered into `buf` or a closure is observed.
    pub(crate) fn read(
        &self,
        _gate: &ReaderGate<'_>,
        buf: &mut [u8],
    ) -> Result<usize, PipeError> {
        let mut inner = self.0.inner.lock();
        loop {
            if let Poll::Ready(res) = self.0.poll_read_locked(&mut inner, buf) {
                return res;
            }
            trace!("pipe reader parked");
            inner.reader_parked = true;
            inner = self.0.reader_wait.wait(inner);
            inner.reader_parked = false;
        }
    }

    /// Offers `data` to readers and blocks until it is drained or a closure
    /// is observed.
    pub(crate) fn write(&self, _gate: &WriterGate<'_>, data: Vec<u8>) -> Written {
        let len = data.len();
        let mut inner = self.0.inner.lock();
        if let Err(err) = self.0.offer_locked(&mut inner, data) {
            return Written::failed(err);
        }

        loop {
            if let Poll::Ready(written) = self.0.poll_written_locked(&mut inner, len) {
                return written;
            }
            trace!(len, "pipe writer parked");
            inner = self.0.writer_wait.wait(inner);
        }
    }

    /// Non-blocking read path; registers the task to be woken when it cannot
    /// make progress.
    #[cfg_attr(not(feature = "async"), allow(dead_code))]
    pub(crate) fn poll_read(
        &self,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<Result<usize, PipeError>> {
        let mut inner = self.0.inner.lock();
        let res = self.0.poll_read_locked(&mut inner, buf);
        if res.is_pending() {
            inner.reader_waker = Some(cx.waker().clone());
        }
        res
    }

    /// First half of the non-blocking write path.
    #[cfg_attr(not(feature = "async"), allow(dead_code))]
    pub(crate) fn offer(&self, data: Vec<u8>) -> Result<(), PipeError> {
        let mut inner = self.0.inner.lock();
        self.0.offer_locked(&mut inner, data)
    }

    /// Second half of the non-blocking write path: completes the offer of
    /// `len` bytes made by [`SharedState::offer`].
    #[cfg_attr(not(feature = "async"), allow(dead_code))]
    pub(crate) fn poll_written(&self, cx: &mut Context<'_>, len: usize) -> Poll<Written> {
        let mut inner = self.0.inner.lock();
        let res = self.0.poll_written_locked(&mut inner, len);
        if res.is_pending() {
            inner.writer_waker = Some(cx.waker().clone());
        }
        res
    }

    /// Takes back an offer whose writer went away before completion.
    #[cfg_attr(not(feature = "async"), allow(dead_code))]
    pub(crate) fn withdraw(&self) {
        let mut inner = self.0.inner.lock();
        if inner.inflight.take().is_some() {
            trace!("pipe segment withdrawn");
        }
        inner.writer_waker = None;
    }

    #[cfg(test)]
    fn wait_until(&self, ready: impl Fn(&Inner) -> bool) {
        while !ready(&*self.0.inner.lock()) {
            std::thread::yield_now();
        }
    }

    /// Returns once a blocking reader is waiting for a writer.
    #[cfg(test)]
    pub(crate) fn wait_for_parked_reader(&self) {
        self.wait_until(|inner| inner.reader_parked)
    }

    /// Returns once a blocking writer has offered its buffer. The offer and
    /// the wait happen under one hold of the state lock, so the writer is
    /// parked by the time the offer is visible.
    #[cfg(test)]
    pub(crate) fn wait_for_parked_writer(&self) {
        self.wait_until(|inner| inner.inflight.is_some())
    }

    #[cfg(test)]
    pub(crate) fn has_inflight(&self) -> bool {
        self.0.inner.lock().inflight.is_some()
    }

    /// Closes the read side. The first recorded error wins.
    pub(crate) fn close_read(&self, err: Option<PipeError>) {
        let mut inner = self.0.inner.lock();
        if inner.reader_closed.is_some() {
            return;
        }

        let err = err.unwrap_or(PipeError::Closed);
        debug!(error = %err, "pipe reader closed");
        inner.reader_closed = Some(err);
        self.0.wake_reader(&mut inner);
        self.0.wake_writer(&mut inner);
    }

    /// Closes the write side. The first recorded error wins.
    pub(crate) fn close_write(&self, err: Option<PipeError>) {
        let mut inner = self.0.inner.lock();
        if inner.writer_closed.is_some() {
            return;
        }

        let err = err.unwrap_or(PipeError::Eof);
        debug!(error = %err, "pipe writer closed");
        inner.writer_closed = Some(err);
        self.0.wake_reader(&mut inner);
        self.0.wake_writer(&mut inner);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::task::{Context, Poll, Wake, Waker};
    use std::thread;

    use super::{SharedState, Written};
    use crate::error::PipeError;

    struct Flag(AtomicBool);

    impl Wake for Flag {
        fn wake(self: Arc<Self>) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    fn flag_waker() -> (Arc<Flag>, Waker) {
        let flag = Arc::new(Flag(AtomicBool::new(false)));
        (flag.clone(), Waker::from(flag))
    }

    fn read(state: &SharedState, buf: &mut [u8]) -> Result<usize, PipeError> {
        let gate = state.reader_gate();
        state.read(&gate, buf)
    }

    fn write(state: &SharedState, data: &[u8]) -> Written {
        let gate = state.writer_gate();
        state.write(&gate, data.to_vec())
    }

    #[test]
    fn partial_reads_complete_one_write() {
        let state = SharedState::default();
        let writer = thread::spawn({
            let state = state.clone();
            move || write(&state, b"HELLO")
        });

        let mut buf = [0; 3];
        assert_eq!(3, read(&state, &mut buf).unwrap());
        assert_eq!(b"HEL", &buf);
        assert_eq!(2, read(&state, &mut buf).unwrap());
        assert_eq!(b"LO", &buf[..2]);

        let written = writer.join().unwrap();
        assert_eq!(5, written.n);
        assert!(written.error.is_none());
    }

    #[test]
    fn reader_close_reports_partial_count() {
        let state = SharedState::default();
        let writer = thread::spawn({
            let state = state.clone();
            move || write(&state, b"HELLO")
        });

        let mut buf = [0; 2];
        assert_eq!(2, read(&state, &mut buf).unwrap());
        state.close_read(None);

        let written = writer.join().unwrap();
        assert_eq!(2, written.n);
        assert!(matches!(written.error, Some(PipeError::Closed)));
        assert_eq!(2, written.into_io().unwrap());

        let written = write(&state, b"again");
        assert_eq!(0, written.n);
        assert!(written.into_io().is_err());
    }

    #[test]
    fn empty_write_is_a_handoff() {
        let state = SharedState::default();
        let writer = thread::spawn({
            let state = state.clone();
            move || {
                let empty = write(&state, b"");
                let byte = write(&state, b"x");
                (empty, byte)
            }
        });

        // The empty segment is consumed without ending this read.
        let mut buf = [0; 4];
        assert_eq!(1, read(&state, &mut buf).unwrap());
        assert_eq!(b'x', buf[0]);

        let (empty, byte) = writer.join().unwrap();
        assert_eq!(0, empty.n);
        assert!(empty.error.is_none());
        assert_eq!(1, byte.n);
    }

    #[test]
    fn empty_buffer_read_leaves_segment() {
        let state = SharedState::default();
        state.offer(b"ab".to_vec()).unwrap();

        assert_eq!(0, read(&state, &mut []).unwrap());

        let mut buf = [0; 2];
        assert_eq!(2, read(&state, &mut buf).unwrap());
    }

    #[test]
    fn closes_keep_first_error() {
        let state = SharedState::default();
        state.close_write(Some(PipeError::custom("first")));
        state.close_write(None);
        state.close_write(Some(PipeError::custom("second")));

        let err = read(&state, &mut [0; 1]).unwrap_err();
        assert_eq!("first", err.to_string());

        state.close_read(None);
        state.close_read(Some(PipeError::custom("late")));
        assert!(matches!(read(&state, &mut [0; 1]), Err(PipeError::Closed)));
    }

    #[test]
    fn write_on_closed_writer_fails() {
        let state = SharedState::default();
        state.close_write(None);

        let written = write(&state, b"x");
        assert_eq!(0, written.n);
        assert!(matches!(written.error, Some(PipeError::Closed)));
    }

    #[test]
    fn parked_writer_sees_own_side_close() {
        let state = SharedState::default();
        let writer = thread::spawn({
            let state = state.clone();
            move || write(&state, b"stuck")
        });

        state.wait_for_parked_writer();
        state.close_write(Some(PipeError::custom("not this one")));

        let written = writer.join().unwrap();
        assert_eq!(0, written.n);
        assert!(matches!(written.error, Some(PipeError::Closed)));
        assert!(!state.has_inflight());
    }

    #[test]
    fn bytes_in_flight_outlive_writer_close() {
        let state = SharedState::default();
        state.offer(b"tail".to_vec()).unwrap();
        state.close_write(None);

        let mut buf = [0; 8];
        assert_eq!(4, read(&state, &mut buf).unwrap());
        assert!(matches!(read(&state, &mut buf), Err(PipeError::Eof)));
    }

    #[test]
    fn poll_read_wakes_on_offer() {
        let state = SharedState::default();
        let (flag, waker) = flag_waker();
        let mut cx = Context::from_waker(&waker);

        let mut buf = [0; 4];
        assert!(state.poll_read(&mut cx, &mut buf).is_pending());
        assert!(!flag.0.load(Ordering::SeqCst));

        state.offer(b"ping".to_vec()).unwrap();
        assert!(flag.0.load(Ordering::SeqCst));
        assert!(matches!(state.poll_read(&mut cx, &mut buf), Poll::Ready(Ok(4))));
    }

    #[test]
    fn poll_written_wakes_on_drain() {
        let state = SharedState::default();
        let (flag, waker) = flag_waker();
        let mut cx = Context::from_waker(&waker);

        state.offer(b"pong".to_vec()).unwrap();
        assert!(state.poll_written(&mut cx, 4).is_pending());

        assert_eq!(4, read(&state, &mut [0; 4]).unwrap());
        assert!(flag.0.load(Ordering::SeqCst));
        match state.poll_written(&mut cx, 4) {
            Poll::Ready(written) => {
                assert_eq!(4, written.n);
                assert!(written.error.is_none());
            }
            Poll::Pending => panic!("drained write still pending"),
        }
    }

    #[test]
    fn withdraw_clears_offer() {
        let state = SharedState::default();
        state.offer(b"gone".to_vec()).unwrap();
        state.withdraw();
        state.close_write(None);

        assert!(matches!(read(&state, &mut [0; 4]), Err(PipeError::Eof)));
    }
}
