use std::error::Error;
use std::io::{self, ErrorKind};
use std::sync::Arc;

/// The reason a pipe call could not complete.
///
/// A closed side records one `PipeError` and every later call on the
/// opposite side observes a clone of it. The handles hand it out wrapped in
/// an [`io::Error`]; use [`PipeError::from_io`] to get it back.
#[derive(Clone, Debug, thiserror::Error)]
pub enum PipeError {
    /// The writer closed without an error and no bytes are left.
    #[error("end of stream")]
    Eof,
    /// Read or write on a closed pipe.
    #[error("read/write on closed pipe")]
    Closed,
    /// An error supplied by the caller of `close_with_error`.
    #[error(transparent)]
    Custom(Arc<dyn Error + Send + Sync>),
}

impl PipeError {
    /// Wraps a caller-supplied error.
    pub fn custom<E>(err: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        Self::Custom(Arc::from(err.into()))
    }

    /// Returns the caller-supplied error if it is of type `E`.
    ///
    /// ```rust
    /// use handoff_pipe::PipeError;
    /// use std::fmt;
    ///
    /// #[derive(Debug)]
    /// struct Aborted;
    ///
    /// impl fmt::Display for Aborted {
    ///     fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    ///         f.write_str("aborted")
    ///     }
    /// }
    ///
    /// impl std::error::Error for Aborted {}
    ///
    /// let err = PipeError::custom(Aborted);
    /// assert!(err.downcast_ref::<Aborted>().is_some());
    /// assert!(PipeError::Closed.downcast_ref::<Aborted>().is_none());
    /// ```
    pub fn downcast_ref<E: Error + 'static>(&self) -> Option<&E> {
        match self {
            Self::Custom(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// Recovers the `PipeError` carried by an error returned from a pipe handle.
    pub fn from_io(err: &io::Error) -> Option<&PipeError> {
        err.get_ref()?.downcast_ref::<PipeError>()
    }

    pub(crate) fn kind(&self) -> ErrorKind {
        match self {
            Self::Eof => ErrorKind::UnexpectedEof,
            Self::Closed => ErrorKind::BrokenPipe,
            Self::Custom(err) => err
                .downcast_ref::<io::Error>()
                .map_or(ErrorKind::Other, io::Error::kind),
        }
    }
}

impl From<PipeError> for io::Error {
    fn from(err: PipeError) -> Self {
        io::Error::new(err.kind(), err)
    }
}

/// Maps the outcome of the read path onto the `Read` convention, where the
/// end of stream is a zero-length read.
pub(crate) fn read_result(res: Result<usize, PipeError>) -> io::Result<usize> {
    match res {
        Ok(n) => Ok(n),
        Err(PipeError::Eof) => Ok(0),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, ErrorKind};

    use super::{read_result, PipeError};

    #[derive(Debug, thiserror::Error)]
    #[error("producer failed")]
    struct ProducerFailed;

    #[test]
    fn closed_is_broken_pipe() {
        let err = io::Error::from(PipeError::Closed);
        assert_eq!(ErrorKind::BrokenPipe, err.kind());
        assert!(matches!(PipeError::from_io(&err), Some(PipeError::Closed)));
        assert_eq!("read/write on closed pipe", err.to_string());
    }

    #[test]
    fn custom_keeps_io_kind() {
        let err = io::Error::from(PipeError::custom(io::Error::new(
            ErrorKind::TimedOut,
            "too slow",
        )));
        assert_eq!(ErrorKind::TimedOut, err.kind());
        assert_eq!("too slow", err.to_string());
    }

    #[test]
    fn custom_is_attributable() {
        let err = io::Error::from(PipeError::custom(ProducerFailed));
        assert_eq!(ErrorKind::Other, err.kind());

        let pipe_err = PipeError::from_io(&err).unwrap();
        assert!(pipe_err.downcast_ref::<ProducerFailed>().is_some());
        assert!(pipe_err.downcast_ref::<io::Error>().is_none());
    }

    #[test]
    fn eof_reads_as_zero() {
        assert_eq!(0, read_result(Err(PipeError::Eof)).unwrap());
        assert_eq!(3, read_result(Ok(3)).unwrap());
        assert!(read_result(Err(PipeError::Closed)).is_err());
    }

    #[test]
    fn from_io_ignores_foreign_errors() {
        let err = io::Error::new(ErrorKind::Other, "not ours");
        assert!(PipeError::from_io(&err).is_none());
    }
}
