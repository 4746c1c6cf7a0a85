//! # Handoff pipe
//! A synchronous in-memory pipe connecting code that expects a `Write` with
//! code that expects a `Read`.
//!
//! Reads on one end are matched with writes on the other, and bytes are handed
//! directly from the writer's buffer to the reader. Nothing is queued: a write
//! returns only once readers have consumed all of it, or once either end is
//! closed. Short reads are normal; a reader may drain one write over several
//! calls.
//!
//! Closing the writer is the end of stream for the reader. Closing the reader
//! makes pending and later writes fail. Both ends can be closed with a custom
//! error that the other end then observes; the first close wins.
//!
//! Single thread usage example:
//! ```rust
//! use std::io::Read;
//!
//! let (mut reader, writer) = handoff_pipe::pipe();
//! writer.close();
//!
//! assert_eq!(0, reader.read(&mut [0; 8]).unwrap());
//! ```
//!
//! Multi thread usage example:
//! ```rust
//! use std::io::{read_to_string, Write};
//! use std::thread::spawn;
//! use handoff_pipe::pipe;
//!
//! let (reader, mut writer) = pipe();
//! spawn(move || {
//!     writer.write_all("hello".as_bytes()).unwrap();
//! });
//!
//! assert_eq!("hello".to_string(), read_to_string(reader).unwrap());
//! ```
//!
//! ## Features
//!
//! - `sync` (default): blocking [`PipeReader`] and [`PipeWriter`].
//! - `async`: `futures-io` handles, see `async_pipe`.
//! - `fast-mutex`: use `parking_lot` locks instead of `std::sync`.
#![cfg_attr(docsrs, feature(doc_cfg))]

mod error;
mod state;

#[cfg(feature = "sync")]
mod sync_pipe;

#[cfg(feature = "async")]
mod async_pipe;

pub use error::PipeError;

#[cfg(feature = "sync")]
pub use sync_pipe::{pipe, PipeReader, PipeReaderLock, PipeWriter, PipeWriterLock};

#[cfg(feature = "async")]
#[cfg_attr(docsrs, doc(cfg(feature = "async")))]
pub use async_pipe::{async_pipe, AsyncPipeReader, AsyncPipeWriter};

#[cfg(all(feature = "async", feature = "sync"))]
#[cfg_attr(docsrs, doc(cfg(all(feature = "async", feature = "sync"))))]
pub use async_pipe::{async_reader_pipe, async_writer_pipe};
