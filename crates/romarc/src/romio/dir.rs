//! Directory-backed machines.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use walkdir::WalkDir;

use crate::error::{Error, Result};

use super::{mach_name, EntrySink, Format, RomFile, RomReader, RomWriter};

/// Reader over a machine stored as a filesystem subtree.
///
/// Enumeration is a depth-first walk with sorted siblings; dot files and dot
/// directories are skipped. Entry names are forward-slash joins relative to
/// the machine root.
#[derive(Debug)]
pub struct DirReader {
	name: String,
	path: PathBuf,
	files: Vec<RomFile>,
}

impl DirReader {
	/// Enumerate a directory machine.
	pub fn open(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let mut files = Vec::new();

		let walk = WalkDir::new(path)
			.sort_by_file_name()
			.into_iter()
			.filter_entry(|entry| {
				entry.depth() == 0 || !entry.file_name().to_string_lossy().starts_with('.')
			});
		for entry in walk {
			let entry = entry.map_err(|err| Error::path(err.into(), path))?;
			if !entry.file_type().is_file() {
				continue;
			}

			let meta = entry
				.metadata()
				.map_err(|err| Error::path(err.into(), entry.path()))?;
			let rel = entry
				.path()
				.strip_prefix(path)
				.map_err(|_| {
					Error::path(
						std::io::Error::from(std::io::ErrorKind::InvalidData),
						entry.path(),
					)
				})?
				.components()
				.map(|c| c.as_os_str().to_string_lossy())
				.collect::<Vec<_>>()
				.join("/");

			files.push(RomFile {
				name: rel,
				size: meta.len(),
				mod_time: meta.modified().ok(),
			});
		}

		Ok(Self {
			name: mach_name(path),
			path: path.to_path_buf(),
			files,
		})
	}
}

impl RomReader for DirReader {
	fn name(&self) -> &str {
		&self.name
	}

	fn path(&self) -> &Path {
		&self.path
	}

	fn format(&self) -> Format {
		Format::Dir
	}

	fn files(&self) -> &[RomFile] {
		&self.files
	}

	fn open(&mut self, name: &str) -> Result<Box<dyn Read + '_>> {
		let path = self.path.join(name);
		let file = File::open(&path).map_err(|err| Error::path(err, path))?;
		Ok(Box::new(file))
	}
}

/// Writer for a machine stored as a filesystem subtree. Entries are written
/// in creation order.
#[derive(Debug)]
pub struct DirWriter {
	name: String,
	path: PathBuf,
	names: Vec<String>,
	next: usize,
}

impl DirWriter {
	/// Create the machine directory (and the writer over it).
	pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
		let path = path.into();
		std::fs::create_dir_all(&path).map_err(|err| Error::path(err, &path))?;

		Ok(Self {
			name: mach_name(&path),
			path,
			names: Vec::new(),
			next: 0,
		})
	}
}

impl RomWriter for DirWriter {
	fn name(&self) -> &str {
		&self.name
	}

	fn path(&self) -> &Path {
		&self.path
	}

	fn create(&mut self, name: &str) -> Result<()> {
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
		_size: u64,
		mod_time: Option<SystemTime>,
	) -> Result<Box<dyn EntrySink + '_>> {
		if self.next == 0 {
			return Err(Error::Io(std::io::Error::other("no entry selected")));
		}

		let name = &self.names[self.next - 1];
		let path = self.path.join(name);
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent).map_err(|err| Error::path(err, parent))?;
		}

		let file = File::create(&path).map_err(|err| Error::path(err, &path))?;
		Ok(Box::new(DirEntrySink { file, mod_time }))
	}

	fn finish(&mut self) -> Result<()> {
		Ok(())
	}
}

struct DirEntrySink {
	file: File,
	mod_time: Option<SystemTime>,
}

impl Write for DirEntrySink {
	fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
		self.file.write(buf)
	}

	fn flush(&mut self) -> std::io::Result<()> {
		self.file.flush()
	}
}

impl EntrySink for DirEntrySink {
	fn finish(mut self: Box<Self>) -> Result<()> {
		self.file.flush()?;
		if let Some(mod_time) = self.mod_time {
			self.file.set_modified(mod_time)?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn walk_is_sorted_and_skips_dot_files() {
		let dir = tempfile::tempdir().expect("tempdir");
		let root = dir.path().join("machine1");
		std::fs::create_dir_all(root.join("sub")).expect("mkdir");
		std::fs::write(root.join("b.bin"), b"bb").expect("write");
		std::fs::write(root.join("a.bin"), b"a").expect("write");
		std::fs::write(root.join(".hidden"), b"x").expect("write");
		std::fs::write(root.join("sub/c.bin"), b"ccc").expect("write");

		let reader = DirReader::open(&root).expect("open");
		assert_eq!(reader.name(), "machine1");
		let names: Vec<_> = reader.files().iter().map(|f| f.name.as_str()).collect();
		assert_eq!(names, vec!["a.bin", "b.bin", "sub/c.bin"]);
		assert_eq!(reader.stat("b.bin").expect("stat").size, 2);
	}

	#[test]
	fn writer_round_trip() {
		let dir = tempfile::tempdir().expect("tempdir");
		let root = dir.path().join("out");

		let mut writer = DirWriter::create(&root).expect("create");
		RomWriter::create(&mut writer, "sub/two.bin").expect("declare");
		RomWriter::create(&mut writer, "one.bin").expect("declare");

		let payloads: Vec<&[u8]> = vec![b"2222", b"1"];
		let mut position = writer.first();
		while let Some(index) = position {
			let mut sink = writer.open(payloads[index].len() as u64, None).expect("open");
			sink.write_all(payloads[index]).expect("write");
			sink.finish().expect("finish");
			position = writer.next();
		}
		writer.finish().expect("finish writer");

		assert_eq!(std::fs::read(root.join("sub/two.bin")).expect("read"), b"2222");
		assert_eq!(std::fs::read(root.join("one.bin")).expect("read"), b"1");
	}
}
