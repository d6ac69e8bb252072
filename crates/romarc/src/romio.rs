//! Reading and writing machine containers under one interface.
//!
//! A machine lives on disk as a directory subtree, a Zip file, or a general
//! archive. Readers enumerate entries and open them for reading; writers
//! follow the declare-then-iterate contract of the reproducible Zip encoder
//! (directory and archive writers simply iterate in creation order). The
//! copy operation between two Zips moves the raw compressed stream instead
//! of decompressing and recompressing; the capability is discovered through
//! [`RomReader::as_zip`] / [`RomWriter::as_zip`].

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::trace;

use crate::error::{Error, Result};

mod archive;
mod dir;
mod zip;

pub use archive::{ArchiveKind, ArchiveReader, ArchiveWriter};
pub use dir::{DirReader, DirWriter};
pub use zip::{ZipReader, ZipWriter};

/// One entry inside a machine: a forward-slash path relative to the machine
/// root, its size, and its modification time where the container records one.
#[derive(Clone, Debug)]
pub struct RomFile {
	/// Entry name relative to the machine root, forward slashes.
	pub name: String,
	/// Uncompressed size in bytes.
	pub size: u64,
	/// Modification time. Containers without per-entry times report the
	/// container's own.
	pub mod_time: Option<SystemTime>,
}

/// Container shape of a machine on disk.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Format {
	/// A filesystem subtree.
	Dir,
	/// A Zip file.
	Zip,
	/// A general archive, read-mostly.
	Archive(ArchiveKind),
}

impl Format {
	/// Shape implied by a path's extension; an empty extension means a
	/// directory.
	pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
		match mach_ext(&path).as_str() {
			"" => Some(Self::Dir),
			".zip" => Some(Self::Zip),
			ext => ArchiveKind::from_ext(ext).map(Self::Archive),
		}
	}

	/// Natural file extension for this shape (empty for directories).
	pub fn ext(self) -> &'static str {
		match self {
			Self::Dir => "",
			Self::Zip => ".zip",
			Self::Archive(kind) => kind.ext(),
		}
	}
}

/// Lowercased extension of a machine path, with the leading dot.
pub fn mach_ext(path: impl AsRef<Path>) -> String {
	path.as_ref()
		.extension()
		.map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
		.unwrap_or_default()
}

/// Machine name for a path: the lowercased file stem.
pub fn mach_name(path: impl AsRef<Path>) -> String {
	path.as_ref()
		.file_stem()
		.map(|stem| stem.to_string_lossy().to_lowercase())
		.unwrap_or_default()
}

/// Reader over one machine container.
pub trait RomReader {
	/// Machine name (lowercased stem of the container path).
	fn name(&self) -> &str;

	/// Path of the container.
	fn path(&self) -> &Path;

	/// Container shape.
	fn format(&self) -> Format;

	/// Entries in enumeration order.
	fn files(&self) -> &[RomFile];

	/// Entry metadata by exact name.
	fn stat(&self, name: &str) -> Option<RomFile> {
		self.files().iter().find(|file| file.name == name).cloned()
	}

	/// Open an entry for reading.
	fn open(&mut self, name: &str) -> Result<Box<dyn Read + '_>>;

	/// The concrete Zip reader, when this reader offers the raw
	/// compressed-stream fast path.
	fn as_zip(&mut self) -> Option<&mut ZipReader> {
		None
	}
}

/// Sink for one entry being written; obtained from [`RomWriter::open`].
pub trait EntrySink: Write {
	/// Flush and commit the entry.
	fn finish(self: Box<Self>) -> Result<()>;
}

/// Writer over one machine container.
///
/// The contract mirrors the reproducible Zip encoder: declare every entry
/// with [`create`](RomWriter::create), then iterate with
/// [`first`](RomWriter::first) / [`next`](RomWriter::next) — which yield
/// creation-order indices, in whatever order the container mandates — and
/// write each entry through [`open`](RomWriter::open).
pub trait RomWriter {
	/// Machine name (lowercased stem of the container path).
	fn name(&self) -> &str;

	/// Path of the container.
	fn path(&self) -> &Path;

	/// Declare an entry.
	fn create(&mut self, name: &str) -> Result<()>;

	/// Begin iteration; returns the creation index of the first entry.
	fn first(&mut self) -> Option<usize>;

	/// Creation index of the next entry, or `None` when done.
	fn next(&mut self) -> Option<usize>;

	/// Open the current entry for writing.
	fn open(
		&mut self,
		size: u64,
		mod_time: Option<SystemTime>,
	) -> Result<Box<dyn EntrySink + '_>>;

	/// Finish the container, flushing everything to disk.
	fn finish(&mut self) -> Result<()>;

	/// The concrete Zip writer, when this writer accepts raw compressed
	/// streams.
	fn as_zip(&mut self) -> Option<&mut ZipWriter> {
		None
	}
}

/// Can this path hold a machine we know how to read?
pub fn is_rom_reader(path: impl AsRef<Path>) -> bool {
	let ext = mach_ext(&path);
	ext.is_empty() || ext == ".zip" || ArchiveKind::from_ext(&ext).is_some()
}

/// Can this path hold a machine we know how to write?
pub fn is_rom_writer(path: impl AsRef<Path>) -> bool {
	let ext = mach_ext(&path);
	ext.is_empty() || ext == ".zip" || ArchiveKind::writer_from_ext(&ext).is_some()
}

/// Open a machine by path, dispatching on what is on disk.
///
/// Returns `Ok(None)` when nothing usable is at the path.
pub fn open_reader(path: impl AsRef<Path>) -> Result<Option<Box<dyn RomReader>>> {
	let path = path.as_ref();
	let meta = match std::fs::metadata(path) {
		Ok(meta) => meta,
		Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
		Err(err) => return Err(Error::path(err, path)),
	};

	if meta.is_dir() {
		return Ok(Some(Box::new(DirReader::open(path)?)));
	}
	if meta.is_file() {
		let ext = mach_ext(path);
		if ext == ".zip" {
			return Ok(Some(Box::new(ZipReader::open(path)?)));
		}
		if ArchiveKind::from_ext(&ext).is_some() {
			return Ok(Some(Box::new(ArchiveReader::open(path)?)));
		}
	}

	Ok(None)
}

/// Open a machine by bare name, probing: directory, then `<name>.zip`, then
/// each readable archive extension.
pub fn open_reader_by_name(name: impl AsRef<Path>) -> Result<Option<Box<dyn RomReader>>> {
	let name = name.as_ref();

	if name.is_dir() {
		return Ok(Some(Box::new(DirReader::open(name)?)));
	}

	let zip_path = with_ext(name, ".zip");
	if zip_path.is_file() {
		return Ok(Some(Box::new(ZipReader::open(&zip_path)?)));
	}

	for &ext in ArchiveKind::READER_EXTS {
		let path = with_ext(name, ext);
		if path.is_file() {
			return Ok(Some(Box::new(ArchiveReader::open(&path)?)));
		}
	}

	Ok(None)
}

fn with_ext(name: &Path, ext: &str) -> PathBuf {
	let mut path = name.as_os_str().to_owned();
	path.push(ext);
	PathBuf::from(path)
}

/// Create a machine writer at a path, dispatching on its extension.
pub fn create_writer(path: impl AsRef<Path>) -> Result<Box<dyn RomWriter>> {
	let path = path.as_ref();
	let ext = mach_ext(path);
	if ext.is_empty() {
		Ok(Box::new(DirWriter::create(path)?))
	} else if ext == ".zip" {
		Ok(Box::new(ZipWriter::create(path)?))
	} else {
		Ok(Box::new(ArchiveWriter::create(path)?))
	}
}

/// Create a machine writer with a fresh unique name inside `dir`: a
/// temporary directory when `is_dir`, otherwise a temporary `.zip`.
pub fn create_writer_temp(dir: impl AsRef<Path>, is_dir: bool) -> Result<Box<dyn RomWriter>> {
	let dir = dir.as_ref();
	if is_dir {
		let tmp = tempfile::Builder::new()
			.prefix("romarc")
			.tempdir_in(dir)
			.map_err(|err| Error::path(err, dir))?;
		Ok(Box::new(DirWriter::create(tmp.into_path())?))
	} else {
		let (file, path) = tempfile::Builder::new()
			.prefix("romarc")
			.suffix(".zip")
			.tempfile_in(dir)
			.map_err(|err| Error::path(err, dir))?
			.keep()
			.map_err(|err| Error::Io(err.error))?;
		Ok(Box::new(ZipWriter::from_file(file, path)))
	}
}

/// Copy one entry from a reader into a writer.
///
/// The writer must be positioned (via its iterator) on the entry named
/// `dst_name`. When both sides are Zips and the source entry is stored with
/// DEFLATE, the raw compressed stream is moved and the source CRC-32 reused.
pub fn copy_rom(
	writer: &mut dyn RomWriter,
	dst_name: &str,
	reader: &mut dyn RomReader,
	src_name: &str,
) -> Result<()> {
	let src = reader.stat(src_name).ok_or_else(|| {
		Error::path(
			std::io::Error::from(std::io::ErrorKind::NotFound),
			reader.path().join(src_name),
		)
	})?;

	if writer.as_zip().is_some() {
		if let Some(zr) = reader.as_zip() {
			if let Some((mut raw, crc32, size)) = zr.open_raw(src_name)? {
				trace!(src = %src_name, dst = %dst_name, "raw zip copy");
				// UNWRAP: checked as_zip above; no other borrow survives.
				#[allow(clippy::unwrap_used)]
				let zw = writer.as_zip().unwrap();
				let mut sink = zw.open_raw(size, crc32)?;
				std::io::copy(&mut raw, &mut sink)?;
				return sink.finish();
			}
		}
	}

	trace!(src = %src_name, dst = %dst_name, "stream copy");
	let mod_time = src.mod_time;
	let mut rc = reader.open(src_name)?;
	let mut sink = writer.open(src.size, mod_time)?;
	std::io::copy(&mut rc, &mut sink)?;
	sink.finish()
}
