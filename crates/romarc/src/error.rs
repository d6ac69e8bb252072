//! Error types shared across the crate.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Convenience return type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by manifest parsing, container I/O, the digest database,
/// and the validate/fix pipeline.
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
	/// I/O error without a more specific location.
	#[error(transparent)]
	Io(#[from] std::io::Error),

	/// I/O error tied to a path.
	#[error("{}: {source}", path.display())]
	Path {
		/// Underlying error.
		source: std::io::Error,
		/// The file or directory involved.
		path: PathBuf,
	},

	/// The manifest was not parseable as a DAT file.
	#[error("invalid dat file: {0}")]
	ManifestParse(String),

	/// The digest database failed beneath its transactional API.
	#[error("digest database: {0}")]
	Db(String),

	/// A stored database row could not be decoded; the affected keys are
	/// deleted and the entry treated as absent.
	#[error("digest database corruption: {0}")]
	DbCorruption(String),

	/// The Zip encoder hit a format limit (see [`torzip::Error`]).
	#[error(transparent)]
	#[diagnostic(transparent)]
	Encoding(#[from] torzip::Error),

	/// A Zip could not be read.
	#[error("zip archive: {0}")]
	Zip(#[from] zip::result::ZipError),

	/// A general archive could not be read or written.
	#[error("archive: {0}")]
	Archive(String),

	/// One or more machines failed validation or repair.
	#[error("{failed} of {total} machines not clean")]
	Validation {
		/// Machines that failed.
		failed: usize,
		/// Machines examined.
		total: usize,
	},

	/// The broadcast stop signal was observed.
	#[error("stopped")]
	Stopped,
}

impl Error {
	/// Attach a path to an I/O error.
	pub fn path(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
		Self::Path {
			source,
			path: path.into(),
		}
	}

	/// True when this error is the cancellation sentinel.
	pub fn is_stopped(&self) -> bool {
		matches!(self, Self::Stopped)
	}
}

impl From<redb::Error> for Error {
	fn from(err: redb::Error) -> Self {
		Self::Db(err.to_string())
	}
}

impl From<redb::DatabaseError> for Error {
	fn from(err: redb::DatabaseError) -> Self {
		Self::Db(err.to_string())
	}
}

impl From<redb::TransactionError> for Error {
	fn from(err: redb::TransactionError) -> Self {
		Self::Db(err.to_string())
	}
}

impl From<redb::TableError> for Error {
	fn from(err: redb::TableError) -> Self {
		Self::Db(err.to_string())
	}
}

impl From<redb::StorageError> for Error {
	fn from(err: redb::StorageError) -> Self {
		Self::Db(err.to_string())
	}
}

impl From<redb::CommitError> for Error {
	fn from(err: redb::CommitError) -> Self {
		Self::Db(err.to_string())
	}
}

impl From<quick_xml::DeError> for Error {
	fn from(err: quick_xml::DeError) -> Self {
		Self::ManifestParse(err.to_string())
	}
}
