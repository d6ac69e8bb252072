//! Zip-backed machines.
//!
//! Reading uses the `zip` crate; writing always goes through the
//! reproducible encoder, so anything this module writes is TorrentZipped.
//! The reader can hand out the raw compressed stream of an entry, which the
//! copy path feeds straight into the encoder's raw mode.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use zip::CompressionMethod;

use crate::error::{Error, Result};

use super::{mach_name, EntrySink, Format, RomFile, RomReader, RomWriter};

/// Reader over a machine stored as a Zip file.
///
/// Per-entry modification times are the container's own: the Zip's DOS
/// timestamps are pinned by the reproducible format and carry no
/// information.
pub struct ZipReader {
	name: String,
	path: PathBuf,
	files: Vec<RomFile>,
	index: HashMap<String, usize>,
	archive: zip::ZipArchive<File>,
}

impl ZipReader {
	/// Open and enumerate a Zip machine.
	pub fn open(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let meta = std::fs::metadata(path).map_err(|err| Error::path(err, path))?;
		let file = File::open(path).map_err(|err| Error::path(err, path))?;
		let mut archive = zip::ZipArchive::new(file)?;

		let mod_time = meta.modified().ok();
		let mut files = Vec::new();
		let mut index = HashMap::new();
		for i in 0..archive.len() {
			let entry = archive.by_index_raw(i)?;
			if entry.is_dir() {
				continue;
			}
			index.insert(entry.name().to_owned(), i);
			files.push(RomFile {
				name: entry.name().to_owned(),
				size: entry.size(),
				mod_time,
			});
		}

		Ok(Self {
			name: mach_name(path),
			path: path.to_path_buf(),
			files,
			index,
			archive,
		})
	}

	/// Open an entry's raw compressed stream, returning the reader, the
	/// recorded CRC-32, and the uncompressed size.
	///
	/// Returns `Ok(None)` when the entry is not DEFLATE-compressed, in
	/// which case the raw bytes would be useless to the encoder and the
	/// caller must fall back to a streamed copy.
	pub fn open_raw(&mut self, name: &str) -> Result<Option<(Box<dyn Read + '_>, u32, u64)>> {
		let index = *self.index.get(name).ok_or_else(|| {
			Error::path(
				std::io::Error::from(std::io::ErrorKind::NotFound),
				self.path.join(name),
			)
		})?;

		let entry = self.archive.by_index_raw(index)?;
		if entry.compression() != CompressionMethod::Deflated {
			return Ok(None);
		}

		let crc32 = entry.crc32();
		let size = entry.size();
		Ok(Some((Box::new(entry), crc32, size)))
	}
}

impl RomReader for ZipReader {
	fn name(&self) -> &str {
		&self.name
	}

	fn path(&self) -> &Path {
		&self.path
	}

	fn format(&self) -> Format {
		Format::Zip
	}

	fn files(&self) -> &[RomFile] {
		&self.files
	}

	fn open(&mut self, name: &str) -> Result<Box<dyn Read + '_>> {
		let index = *self.index.get(name).ok_or_else(|| {
			Error::path(
				std::io::Error::from(std::io::ErrorKind::NotFound),
				self.path.join(name),
			)
		})?;
		Ok(Box::new(self.archive.by_index(index)?))
	}

	fn as_zip(&mut self) -> Option<&mut ZipReader> {
		Some(self)
	}
}

/// Writer for a machine stored as a Zip file, delegating to the
/// reproducible encoder.
pub struct ZipWriter {
	name: String,
	path: PathBuf,
	tzw: Option<torzip::Writer<File>>,
}

impl ZipWriter {
	/// Create a Zip machine at a path.
	pub fn create(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let file = File::create(path).map_err(|err| Error::path(err, path))?;
		Ok(Self::from_file(file, path.to_path_buf()))
	}

	/// Wrap an already-created file (used for temporary containers).
	pub fn from_file(file: File, path: PathBuf) -> Self {
		Self {
			name: mach_name(&path),
			path,
			tzw: Some(torzip::Writer::new(file)),
		}
	}

	fn encoder(&mut self) -> Result<&mut torzip::Writer<File>> {
		self.tzw
			.as_mut()
			.ok_or_else(|| Error::Io(std::io::Error::other("zip writer already finished")))
	}

	/// Open the current entry in raw mode with a caller-supplied CRC-32.
	pub fn open_raw(&mut self, size: u64, crc32: u32) -> Result<Box<dyn EntrySink + '_>> {
		let entry = self.encoder()?.open_raw(size, crc32)?;
		Ok(Box::new(ZipEntrySink { entry: Some(entry) }))
	}
}

impl RomWriter for ZipWriter {
	fn name(&self) -> &str {
		&self.name
	}

	fn path(&self) -> &Path {
		&self.path
	}

	fn create(&mut self, name: &str) -> Result<()> {
		Ok(self.encoder()?.create(name)?)
	}

	fn first(&mut self) -> Option<usize> {
		self.tzw.as_mut().and_then(|tzw| tzw.first())
	}

	fn next(&mut self) -> Option<usize> {
		self.tzw.as_mut().and_then(|tzw| tzw.next())
	}

	fn open(
		&mut self,
		size: u64,
		_mod_time: Option<SystemTime>,
	) -> Result<Box<dyn EntrySink + '_>> {
		let entry = self.encoder()?.open(size)?;
		Ok(Box::new(ZipEntrySink { entry: Some(entry) }))
	}

	fn finish(&mut self) -> Result<()> {
		let tzw = self
			.tzw
			.take()
			.ok_or_else(|| Error::Io(std::io::Error::other("zip writer already finished")))?;
		let mut file = tzw.finish()?;
		file.flush()?;
		Ok(())
	}

	fn as_zip(&mut self) -> Option<&mut ZipWriter> {
		Some(self)
	}
}

struct ZipEntrySink<'w> {
	entry: Option<torzip::EntryWriter<'w, File>>,
}

impl Write for ZipEntrySink<'_> {
	fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
		match self.entry.as_mut() {
			Some(entry) => entry.write(buf),
			None => Err(std::io::Error::other("entry already finished")),
		}
	}

	fn flush(&mut self) -> std::io::Result<()> {
		match self.entry.as_mut() {
			Some(entry) => entry.flush(),
			None => Ok(()),
		}
	}
}

impl EntrySink for ZipEntrySink<'_> {
	fn finish(mut self: Box<Self>) -> Result<()> {
		match self.entry.take() {
			Some(entry) => Ok(entry.finish()?),
			None => Ok(()),
		}
	}
}
