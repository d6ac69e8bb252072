//! General-archive machines: 7z, rar, tgz, gz.
//!
//! These formats only offer sequential access, so readers materialise one
//! entry at a time by re-streaming the archive from the start; the digest
//! database's container-granularity caching keeps that from mattering in
//! practice. Writers cover the subset of shapes that can be produced
//! without a global cursor: 7z, tgz, and gz.

use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::{Compression, GzBuilder};
use tracing::trace;

use crate::error::{Error, Result};

use super::{mach_ext, mach_name, EntrySink, Format, RomFile, RomReader, RomWriter};

/// The general-archive shapes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArchiveKind {
	/// 7-Zip.
	SevenZ,
	/// RAR (read only).
	Rar,
	/// Gzipped tarball.
	Tgz,
	/// Single gzipped file.
	Gz,
}

impl ArchiveKind {
	/// Extensions the archive reader understands, in probe order.
	pub const READER_EXTS: &'static [&'static str] = &[".7z", ".rar", ".tgz", ".gz"];

	/// Shape for a (lowercased, dotted) extension.
	pub fn from_ext(ext: &str) -> Option<Self> {
		match ext {
			".7z" => Some(Self::SevenZ),
			".rar" => Some(Self::Rar),
			".tgz" => Some(Self::Tgz),
			".gz" => Some(Self::Gz),
			_ => None,
		}
	}

	/// Shape for an extension we can also write.
	pub fn writer_from_ext(ext: &str) -> Option<Self> {
		match Self::from_ext(ext) {
			Some(Self::Rar) | None => None,
			some => some,
		}
	}

	/// Natural file extension.
	pub fn ext(self) -> &'static str {
		match self {
			Self::SevenZ => ".7z",
			Self::Rar => ".rar",
			Self::Tgz => ".tgz",
			Self::Gz => ".gz",
		}
	}
}

fn archive_err(err: impl std::fmt::Display) -> Error {
	Error::Archive(err.to_string())
}

/// Entry names in archives occasionally arrive with backslashes.
fn normal_name(name: impl AsRef<str>) -> String {
	name.as_ref().replace('\\', "/")
}

/// Reader over a machine stored as a general archive.
#[derive(Debug)]
pub struct ArchiveReader {
	name: String,
	path: PathBuf,
	kind: ArchiveKind,
	files: Vec<RomFile>,
}

impl ArchiveReader {
	/// Open and enumerate an archive machine.
	pub fn open(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let kind = ArchiveKind::from_ext(&mach_ext(path))
			.ok_or_else(|| Error::Archive(format!("invalid archive format: {}", path.display())))?;

		let mod_time = std::fs::metadata(path)
			.map_err(|err| Error::path(err, path))?
			.modified()
			.ok();

		let files = match kind {
			ArchiveKind::SevenZ => list_sevenz(path, mod_time)?,
			ArchiveKind::Rar => list_rar(path, mod_time)?,
			ArchiveKind::Tgz => list_tgz(path)?,
			ArchiveKind::Gz => list_gz(path, mod_time)?,
		};

		Ok(Self {
			name: mach_name(path),
			path: path.to_path_buf(),
			kind,
			files,
		})
	}

	/// Stream the archive from the start and return the named entry's
	/// contents.
	fn extract(&self, name: &str) -> Result<Vec<u8>> {
		trace!(archive = %self.path.display(), entry = %name, "sequential extract");
		match self.kind {
			ArchiveKind::SevenZ => extract_sevenz(&self.path, name),
			ArchiveKind::Rar => extract_rar(&self.path, name),
			ArchiveKind::Tgz => extract_tgz(&self.path, name),
			ArchiveKind::Gz => extract_gz(&self.path),
		}
	}
}

impl RomReader for ArchiveReader {
	fn name(&self) -> &str {
		&self.name
	}

	fn path(&self) -> &Path {
		&self.path
	}

	fn format(&self) -> Format {
		Format::Archive(self.kind)
	}

	fn files(&self) -> &[RomFile] {
		&self.files
	}

	fn open(&mut self, name: &str) -> Result<Box<dyn Read + '_>> {
		if self.stat(name).is_none() {
			return Err(Error::path(
				std::io::Error::from(std::io::ErrorKind::NotFound),
				self.path.join(name),
			));
		}
		let contents = self.extract(name)?;
		Ok(Box::new(Cursor::new(contents)))
	}
}

fn list_sevenz(path: &Path, mod_time: Option<SystemTime>) -> Result<Vec<RomFile>> {
	let mut sz =
		sevenz_rust::SevenZReader::open(path, sevenz_rust::Password::empty()).map_err(archive_err)?;
	let mut files = Vec::new();
	sz.for_each_entries(|entry, _reader| {
		if !entry.is_directory() {
			files.push(RomFile {
				name: normal_name(entry.name()),
				size: entry.size(),
				mod_time,
			});
		}
		Ok(true)
	})
	.map_err(archive_err)?;
	Ok(files)
}

fn extract_sevenz(path: &Path, name: &str) -> Result<Vec<u8>> {
	let mut sz =
		sevenz_rust::SevenZReader::open(path, sevenz_rust::Password::empty()).map_err(archive_err)?;
	let mut found = None;
	sz.for_each_entries(|entry, reader| {
		if !entry.is_directory() && normal_name(entry.name()) == name {
			let mut contents = Vec::with_capacity(entry.size() as usize);
			reader.read_to_end(&mut contents)?;
			found = Some(contents);
			return Ok(false);
		}
		Ok(true)
	})
	.map_err(archive_err)?;

	found.ok_or_else(|| {
		Error::path(
			std::io::Error::from(std::io::ErrorKind::NotFound),
			path.join(name),
		)
	})
}

fn list_rar(path: &Path, mod_time: Option<SystemTime>) -> Result<Vec<RomFile>> {
	let archive = unrar::Archive::new(path)
		.open_for_listing()
		.map_err(archive_err)?;

	let mut files = Vec::new();
	for entry in archive {
		let entry = entry.map_err(archive_err)?;
		if entry.is_file() {
			files.push(RomFile {
				name: normal_name(entry.filename.to_string_lossy()),
				size: entry.unpacked_size as u64,
				mod_time,
			});
		}
	}
	Ok(files)
}

fn extract_rar(path: &Path, name: &str) -> Result<Vec<u8>> {
	let mut archive = unrar::Archive::new(path)
		.open_for_processing()
		.map_err(archive_err)?;

	while let Some(header) = archive.read_header().map_err(archive_err)? {
		let matches = header.entry().is_file()
			&& normal_name(header.entry().filename.to_string_lossy()) == name;
		if matches {
			let (contents, _rest) = header.read().map_err(archive_err)?;
			return Ok(contents);
		}
		archive = header.skip().map_err(archive_err)?;
	}

	Err(Error::path(
		std::io::Error::from(std::io::ErrorKind::NotFound),
		path.join(name),
	))
}

fn open_tgz(path: &Path) -> Result<tar::Archive<GzDecoder<File>>> {
	let file = File::open(path).map_err(|err| Error::path(err, path))?;
	Ok(tar::Archive::new(GzDecoder::new(file)))
}

fn list_tgz(path: &Path) -> Result<Vec<RomFile>> {
	let mut archive = open_tgz(path)?;
	let mut files = Vec::new();
	for entry in archive.entries().map_err(|err| Error::path(err, path))? {
		let entry = entry.map_err(|err| Error::path(err, path))?;
		if !entry.header().entry_type().is_file() {
			continue;
		}
		let name = normal_name(
			entry
				.path()
				.map_err(|err| Error::path(err, path))?
				.to_string_lossy(),
		);
		let mtime = entry.header().mtime().unwrap_or(0);
		files.push(RomFile {
			name,
			size: entry.size(),
			mod_time: Some(SystemTime::UNIX_EPOCH + Duration::from_secs(mtime)),
		});
	}
	Ok(files)
}

fn extract_tgz(path: &Path, name: &str) -> Result<Vec<u8>> {
	let mut archive = open_tgz(path)?;
	for entry in archive.entries().map_err(|err| Error::path(err, path))? {
		let mut entry = entry.map_err(|err| Error::path(err, path))?;
		let entry_name = normal_name(
			entry
				.path()
				.map_err(|err| Error::path(err, path))?
				.to_string_lossy(),
		);
		if entry.header().entry_type().is_file() && entry_name == name {
			let mut contents = Vec::with_capacity(entry.size() as usize);
			entry
				.read_to_end(&mut contents)
				.map_err(|err| Error::path(err, path))?;
			return Ok(contents);
		}
	}

	Err(Error::path(
		std::io::Error::from(std::io::ErrorKind::NotFound),
		path.join(name),
	))
}

/// A bare gzip file is a machine with a single entry. The entry is named by
/// the gzip header when one is recorded, and by the container's stem
/// otherwise; the size is only known by decompressing.
fn list_gz(path: &Path, mod_time: Option<SystemTime>) -> Result<Vec<RomFile>> {
	let file = File::open(path).map_err(|err| Error::path(err, path))?;
	let mut decoder = GzDecoder::new(file);

	let mut size = 0u64;
	let mut buf = [0u8; 64 * 1024];
	loop {
		let got = decoder.read(&mut buf).map_err(|err| Error::path(err, path))?;
		if got == 0 {
			break;
		}
		size += got as u64;
	}

	let name = decoder
		.header()
		.and_then(|header| header.filename())
		.map(|bytes| normal_name(String::from_utf8_lossy(bytes)))
		.unwrap_or_else(|| {
			path.file_stem()
				.map(|stem| stem.to_string_lossy().into_owned())
				.unwrap_or_default()
		});

	Ok(vec![RomFile {
		name,
		size,
		mod_time,
	}])
}

fn extract_gz(path: &Path) -> Result<Vec<u8>> {
	let file = File::open(path).map_err(|err| Error::path(err, path))?;
	let mut decoder = GzDecoder::new(file);
	let mut contents = Vec::new();
	decoder
		.read_to_end(&mut contents)
		.map_err(|err| Error::path(err, path))?;
	Ok(contents)
}

enum Backend {
	SevenZ(Option<sevenz_rust::SevenZWriter<File>>),
	Tgz(Option<tar::Builder<GzEncoder<File>>>),
	Gz(Option<File>),
}

/// Writer for a machine stored as a general archive (7z, tgz, or gz).
/// Entries are written in creation order.
pub struct ArchiveWriter {
	name: String,
	path: PathBuf,
	kind: ArchiveKind,
	names: Vec<String>,
	next: usize,
	backend: Backend,
}

impl ArchiveWriter {
	/// Create an archive machine at a path; the extension picks the shape.
	pub fn create(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let kind = ArchiveKind::writer_from_ext(&mach_ext(path))
			.ok_or_else(|| Error::Archive(format!("invalid archive format: {}", path.display())))?;

		let backend = match kind {
			ArchiveKind::SevenZ => Backend::SevenZ(Some(
				sevenz_rust::SevenZWriter::create(path).map_err(archive_err)?,
			)),
			ArchiveKind::Tgz => {
				let file = File::create(path).map_err(|err| Error::path(err, path))?;
				Backend::Tgz(Some(tar::Builder::new(GzEncoder::new(
					file,
					Compression::default(),
				))))
			}
			ArchiveKind::Gz => {
				let file = File::create(path).map_err(|err| Error::path(err, path))?;
				Backend::Gz(Some(file))
			}
			ArchiveKind::Rar => unreachable!("writer_from_ext never yields rar"),
		};

		Ok(Self {
			name: mach_name(path),
			path: path.to_path_buf(),
			kind,
			names: Vec::new(),
			next: 0,
			backend,
		})
	}

	/// Shape of this writer.
	pub fn kind(&self) -> ArchiveKind {
		self.kind
	}
}

impl RomWriter for ArchiveWriter {
	fn name(&self) -> &str {
		&self.name
	}

	fn path(&self) -> &Path {
		&self.path
	}

	fn create(&mut self, name: &str) -> Result<()> {
		if matches!(self.backend, Backend::Gz(_)) && !self.names.is_empty() {
			return Err(Error::Archive(
				"gz archives hold exactly one entry".to_owned(),
			));
		}
		self.names.push(name.to_owned());
		Ok(())
	}

	fn first(&mut self) -> Option<usize> {
		if self.next != 0 || self.names.is_empty() {
			return None;
		}
		self.next = 1;
		Some(0)
	}

	fn next(&mut self) -> Option<usize> {
		if self.next == 0 || self.next == self.names.len() {
			return None;
		}
		let index = self.next;
		self.next += 1;
		Some(index)
	}

	fn open(
		&mut self,
		size: u64,
		mod_time: Option<SystemTime>,
	) -> Result<Box<dyn EntrySink + '_>> {
		if self.next == 0 {
			return Err(Error::Io(std::io::Error::other("no entry selected")));
		}

		let name = self.names[self.next - 1].clone();
		Ok(Box::new(ArchiveEntrySink {
			backend: &mut self.backend,
			name,
			mod_time,
			buf: Vec::with_capacity(size as usize),
		}))
	}

	fn finish(&mut self) -> Result<()> {
		match &mut self.backend {
			Backend::SevenZ(writer) => {
				if let Some(writer) = writer.take() {
					writer.finish().map_err(archive_err)?;
				}
			}
			Backend::Tgz(builder) => {
				if let Some(builder) = builder.take() {
					let encoder = builder.into_inner()?;
					encoder.finish()?.flush()?;
				}
			}
			Backend::Gz(file) => {
				// A gz writer finished without an entry still has to leave
				// a valid (empty) stream behind.
				if let Some(file) = file.take() {
					GzEncoder::new(file, Compression::default()).finish()?.flush()?;
				}
			}
		}
		Ok(())
	}
}

struct ArchiveEntrySink<'w> {
	backend: &'w mut Backend,
	name: String,
	mod_time: Option<SystemTime>,
	buf: Vec<u8>,
}

impl Write for ArchiveEntrySink<'_> {
	fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
		self.buf.extend_from_slice(buf);
		Ok(buf.len())
	}

	fn flush(&mut self) -> std::io::Result<()> {
		Ok(())
	}
}

impl EntrySink for ArchiveEntrySink<'_> {
	fn finish(self: Box<Self>) -> Result<()> {
		let sink = *self;
		match sink.backend {
			Backend::SevenZ(writer) => {
				let writer = writer
					.as_mut()
					.ok_or_else(|| Error::Archive("archive already finished".to_owned()))?;
				let mut entry = sevenz_rust::SevenZArchiveEntry::default();
				entry.name = sink.name;
				entry.has_stream = true;
				writer
					.push_archive_entry(entry, Some(Cursor::new(sink.buf)))
					.map_err(archive_err)?;
			}
			Backend::Tgz(builder) => {
				let builder = builder
					.as_mut()
					.ok_or_else(|| Error::Archive("archive already finished".to_owned()))?;
				let mut header = tar::Header::new_gnu();
				header.set_size(sink.buf.len() as u64);
				header.set_mode(0o644);
				let mtime = sink
					.mod_time
					.and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
					.map(|d| d.as_secs())
					.unwrap_or(0);
				header.set_mtime(mtime);
				builder.append_data(&mut header, &sink.name, Cursor::new(sink.buf))?;
			}
			Backend::Gz(file) => {
				let file = file
					.take()
					.ok_or_else(|| Error::Archive("gz archive already written".to_owned()))?;
				let mut encoder = GzBuilder::new()
					.filename(sink.name.as_str())
					.write(file, Compression::default());
				encoder.write_all(&sink.buf)?;
				encoder.finish()?.flush()?;
			}
		}
		Ok(())
	}
}
