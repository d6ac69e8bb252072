//! Error types for the encoder and the [`is_torzip`](crate::is_torzip) check.

use miette::Diagnostic;
use thiserror::Error;

/// Convenience return type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by [`Writer`](crate::Writer) and
/// [`is_torzip`](crate::is_torzip).
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
	/// I/O error from the underlying sink or source.
	#[error(transparent)]
	Io(#[from] std::io::Error),

	/// An entry was declared after iteration had already started.
	#[error("create called after writing has started")]
	CreateAfterWrite,

	/// An entry was opened without first advancing the iterator.
	#[error("no entry selected for writing")]
	NoEntrySelected,

	/// An entry was closed having received a different number of bytes
	/// than it declared.
	#[error("entry size mismatch: declared {declared} bytes, wrote {written}")]
	SizeMismatch {
		/// Size passed to open.
		declared: u64,
		/// Bytes actually written.
		written: u64,
	},

	/// The writer was closed before every created entry was written.
	#[error("not all created entries were written")]
	NotAllWritten,

	/// Compressed data crossed the Zip64 threshold while the uncompressed
	/// size did not, which the format cannot express.
	#[error("compressed data too large for a sub-Zip64 entry")]
	EncodingLimit,

	/// DEFLATE stream error.
	#[error("deflate: {0}")]
	Compress(#[from] flate2::CompressError),

	/// A wire record failed to serialise or parse.
	#[error("zip record: {0}")]
	Record(#[from] deku::DekuError),
}
