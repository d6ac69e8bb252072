//! TorZip: a reproducible Zip encoder.
//!
//! A TorrentZip file is an ordinary Zip file whose bytes are a pure function
//! of the set of (name, content) pairs it contains: entries are written in
//! case-folded name order, every field a conventional Zip writer varies
//! (timestamps, version-made-by, attributes) is pinned to a constant, and the
//! end-of-central-directory comment carries a CRC-32 of the central directory
//! itself so the format can be recognised and verified without re-encoding.
//!
//! The encoder streams to a seekable sink: each entry's local header is
//! reserved up front, the payload is compressed straight onto the sink, and
//! the header is fixed up in place once the compressed size is known. See
//! [`Writer`] for the write-ordering contract and [`is_torzip`] for the
//! verification gate.

#![warn(clippy::unwrap_used, missing_docs)]
#![deny(rust_2018_idioms)]

#[doc(inline)]
pub use self::constants::*;
mod constants;

pub mod check;
pub mod encode;
pub mod error;
pub mod format;

pub use check::is_torzip;
pub use encode::{EntryWriter, Writer};
pub use error::{Error, Result};
