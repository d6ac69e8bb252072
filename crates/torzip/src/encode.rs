//! The streaming TorrentZip writer.
//!
//! The API is shaped for I/O efficiency: entries are declared up front, then
//! written in the order the format mandates, so the encoder never has to
//! spool compressed data through a temporary file. The cost is that the sink
//! must be seekable, because each entry's local header is reserved before the
//! payload and fixed up once the compressed size is known.
//!
//! ```no_run
//! # fn main() -> torzip::Result<()> {
//! let sink = std::fs::File::create("set.zip")?;
//! let mut tzw = torzip::Writer::new(sink);
//! tzw.create("rom_2.bin")?;
//! tzw.create("rom_1.bin")?;
//!
//! let payloads: Vec<&[u8]> = vec![b"two", b"one"];
//! let mut position = tzw.first();
//! while let Some(index) = position {
//! 	let mut entry = tzw.open(payloads[index].len() as u64)?;
//! 	std::io::Write::write_all(&mut entry, payloads[index])?;
//! 	entry.finish()?;
//! 	position = tzw.next();
//! }
//! tzw.finish()?;
//! # Ok(())
//! # }
//! ```

use std::io::{BufWriter, Seek, SeekFrom, Write};

use crc32fast::Hasher;
use deku::DekuContainerWrite;
use flate2::{Compress, Compression, FlushCompress, Status};
use tracing::trace;

use crate::constants::{BUFFER_SIZE, U16_MAX, U32_MAX};
use crate::error::{Error, Result};
use crate::format::{
	CentralDirHeader, EndCentralDir, EndCentralDir64, EndCentralDir64Locator, LocalFileHeader,
};

/// One declared entry and the state accumulated while writing it.
#[derive(Debug)]
struct FileSpec {
	/// Entry name as given to [`Writer::create`].
	name: String,
	/// Case-folded name used for ordering.
	sort_name: String,
	/// Creation-order index handed back by the iterator.
	index: usize,
	/// Declared uncompressed size.
	size: u64,
	/// Offset of the reserved local header.
	offset: u64,
	/// Reserved local header length.
	header_len: u64,
	/// Compressed size, known after the entry is finished.
	comp_size: u64,
	/// CRC-32 of the uncompressed payload.
	crc32: u32,
	/// Raw entries receive pre-compressed data and a caller-supplied CRC.
	raw: bool,
}

/// Streaming writer producing a byte-reproducible Zip.
///
/// Usage follows a strict sequence: [`create`](Writer::create) every entry,
/// then iterate with [`first`](Writer::first) / [`next`](Writer::next), which
/// yield *creation-order indices in sorted output order*. At each position,
/// [`open`](Writer::open) the entry, stream its payload, and
/// [`finish`](EntryWriter::finish) it. Finally [`finish`](Writer::finish) the
/// writer to emit the central directory.
pub struct Writer<W: Write + Seek> {
	out: CountWriter<BufWriter<W>>,
	flate: Compress,
	scratch: Vec<u8>,
	files: Vec<FileSpec>,
	next: usize,
}

impl<W: Write + Seek> std::fmt::Debug for Writer<W> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Writer")
			.field("flate", &"deflate compression context")
			.field("files", &self.files)
			.field("next", &self.next)
			.field("offset", &self.out.count)
			.finish()
	}
}

impl<W: Write + Seek> Writer<W> {
	/// Create a writer over a seekable sink.
	///
	/// Writes are buffered internally; the sink only needs to keep up with
	/// large sequential writes and the occasional header fixup seek.
	pub fn new(sink: W) -> Self {
		Self {
			out: CountWriter {
				inner: BufWriter::with_capacity(BUFFER_SIZE, sink),
				count: 0,
			},
			flate: Compress::new(Compression::new(9), false),
			scratch: Vec::with_capacity(64 * 1024),
			files: Vec::new(),
			next: 0,
		}
	}

	/// Declare an entry by name.
	///
	/// All entries must be declared before iteration starts.
	pub fn create(&mut self, name: &str) -> Result<()> {
		if self.next != 0 {
			return Err(Error::CreateAfterWrite);
		}

		self.files.push(FileSpec {
			name: name.to_owned(),
			sort_name: name.to_lowercase(),
			index: self.files.len(),
			size: 0,
			offset: 0,
			header_len: 0,
			comp_size: 0,
			crc32: 0,
			raw: false,
		});

		Ok(())
	}

	/// Begin iteration: sort the declared entries, drop redundant
	/// directory markers, and return the creation index of the first entry
	/// to write. Returns `None` when nothing was declared or iteration has
	/// already started.
	pub fn first(&mut self) -> Option<usize> {
		if self.next != 0 || self.files.is_empty() {
			return None;
		}

		self.files
			.sort_by(|a, b| a.sort_name.cmp(&b.sort_name));

		// A directory entry is redundant when the next sorted entry lives
		// inside it; the implicit path segment carries the same information.
		let sorted = std::mem::take(&mut self.files);
		let mut clean = Vec::with_capacity(sorted.len());
		let mut iter = sorted.into_iter().peekable();
		while let Some(file) = iter.next() {
			let redundant = file.sort_name.ends_with('/')
				&& iter
					.peek()
					.is_some_and(|following| following.sort_name.starts_with(&file.sort_name));
			if !redundant {
				clean.push(file);
			}
		}
		self.files = clean;

		self.next = 1;
		Some(self.files[0].index)
	}

	/// Advance to the next sorted position, returning its creation index,
	/// or `None` once every entry has been visited.
	pub fn next(&mut self) -> Option<usize> {
		if self.next == 0 || self.next == self.files.len() {
			return None;
		}

		let index = self.files[self.next].index;
		self.next += 1;

		Some(index)
	}

	/// Open the entry at the current iterator position for writing.
	///
	/// `size` is the uncompressed payload length; the entry fails to close
	/// if a different number of bytes is written.
	pub fn open(&mut self, size: u64) -> Result<EntryWriter<'_, W>> {
		self.open_inner(size)?;
		self.flate.reset();

		Ok(EntryWriter {
			tzw: self,
			crc: Hasher::new(),
			written: 0,
			raw: false,
		})
	}

	/// Open the entry at the current iterator position in raw mode: the
	/// payload is already-compressed DEFLATE data and the CRC-32 of the
	/// uncompressed form is supplied by the caller.
	pub fn open_raw(&mut self, size: u64, crc32: u32) -> Result<EntryWriter<'_, W>> {
		self.open_inner(size)?;

		let file = &mut self.files[self.next - 1];
		file.crc32 = crc32;
		file.raw = true;

		Ok(EntryWriter {
			tzw: self,
			crc: Hasher::new(),
			written: 0,
			raw: true,
		})
	}

	fn open_inner(&mut self, size: u64) -> Result<()> {
		if self.next == 0 {
			return Err(Error::NoEntrySelected);
		}

		let offset = self.out.count;
		let file = &mut self.files[self.next - 1];
		file.size = size;
		file.offset = offset;
		file.header_len = LocalFileHeader::reserved_len(file.name.len(), size) as u64;
		trace!(name = %file.name, %size, %offset, "reserve local header");

		// Reserve the header; it is rewritten in place on entry close.
		let header_len = file.header_len as usize;
		self.out.write_all(&vec![0u8; header_len])?;

		Ok(())
	}

	/// Write the central directory and end records, flush, and return the
	/// sink. Errors if any declared entry was never written.
	pub fn finish(mut self) -> Result<W> {
		if self.next != self.files.len() {
			return Err(Error::NotAllWritten);
		}

		let cd_offset = self.out.count;
		let mut cd_crc = Hasher::new();
		for file in &self.files {
			let record = CentralDirHeader::build(
				file.name.as_bytes(),
				file.crc32,
				file.size,
				file.comp_size,
				file.offset,
			)
			.to_bytes()?;
			cd_crc.update(&record);
			self.out.write_all(&record)?;
		}
		let cd_size = self.out.count - cd_offset;
		let records = self.files.len() as u64;

		if records >= U16_MAX || cd_size >= U32_MAX || cd_offset >= U32_MAX {
			let eocd64_offset = self.out.count;
			let eocd64 = EndCentralDir64::build(records, cd_size, cd_offset).to_bytes()?;
			self.out.write_all(&eocd64)?;
			let locator = EndCentralDir64Locator::build(eocd64_offset).to_bytes()?;
			self.out.write_all(&locator)?;
		}

		let cd_crc = cd_crc.finalize();
		trace!(%records, %cd_size, %cd_offset, crc = %format!("{cd_crc:08X}"), "write end of central directory");
		let eocd = EndCentralDir::build(records, cd_size, cd_offset, cd_crc).to_bytes()?;
		self.out.write_all(&eocd)?;

		self.out.flush()?;
		self.out
			.inner
			.into_inner()
			.map_err(|err| Error::Io(err.into_error()))
	}
}

/// Writer for a single open entry. Obtained from [`Writer::open`] or
/// [`Writer::open_raw`]; must be closed with [`finish`](EntryWriter::finish).
pub struct EntryWriter<'w, W: Write + Seek> {
	tzw: &'w mut Writer<W>,
	crc: Hasher,
	written: u64,
	raw: bool,
}

impl<W: Write + Seek> Write for EntryWriter<'_, W> {
	fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
		if self.raw {
			// Raw data bypasses the CRC and DEFLATE tee.
			self.tzw.out.write_all(buf)?;
			self.written += buf.len() as u64;
			return Ok(buf.len());
		}

		self.crc.update(buf);

		let mut input = buf;
		while !input.is_empty() {
			let before = self.tzw.flate.total_in();
			self.tzw.scratch.clear();
			self.tzw
				.flate
				.compress_vec(input, &mut self.tzw.scratch, FlushCompress::None)
				.map_err(std::io::Error::other)?;
			let consumed = (self.tzw.flate.total_in() - before) as usize;
			self.tzw.out.write_all(&self.tzw.scratch)?;
			input = &input[consumed..];
		}

		self.written += buf.len() as u64;
		Ok(buf.len())
	}

	fn flush(&mut self) -> std::io::Result<()> {
		self.tzw.out.flush()
	}
}

impl<W: Write + Seek> EntryWriter<'_, W> {
	/// Close the entry: drain the compressor, verify the declared size,
	/// and rewrite the reserved local header with the real CRC and sizes.
	pub fn finish(mut self) -> Result<()> {
		if !self.raw {
			loop {
				self.tzw.scratch.clear();
				let status =
					self.tzw
						.flate
						.compress_vec(&[], &mut self.tzw.scratch, FlushCompress::Finish)?;
				self.tzw.out.write_all(&self.tzw.scratch)?;
				if status == Status::StreamEnd {
					break;
				}
			}
		}

		let end = self.tzw.out.count;
		let file = &mut self.tzw.files[self.tzw.next - 1];

		if !file.raw {
			if self.written != file.size {
				return Err(Error::SizeMismatch {
					declared: file.size,
					written: self.written,
				});
			}
			file.crc32 = self.crc.finalize();
		}

		file.comp_size = end - file.offset - file.header_len;

		// Reserved corner of the format: a compressed stream can in theory
		// outgrow the 32-bit field while the uncompressed size fits it, and
		// the local header has nowhere to put the wide value.
		if file.size < U32_MAX && file.comp_size >= U32_MAX {
			return Err(Error::EncodingLimit);
		}

		trace!(
			name = %file.name,
			size = %file.size,
			comp_size = %file.comp_size,
			crc = %format!("{:08x}", file.crc32),
			"fix up local header"
		);

		let header =
			LocalFileHeader::build(file.name.as_bytes(), file.crc32, file.size, file.comp_size)
				.to_bytes()?;
		debug_assert_eq!(header.len() as u64, file.header_len);

		let offset = file.offset;
		self.tzw.out.inner.flush()?;
		let sink = self.tzw.out.inner.get_mut();
		sink.seek(SeekFrom::Start(offset))?;
		sink.write_all(&header)?;
		sink.seek(SeekFrom::End(0))?;

		Ok(())
	}
}

/// Write adapter tracking how many bytes have passed through.
#[derive(Debug)]
struct CountWriter<W> {
	inner: W,
	count: u64,
}

impl<W: Write> Write for CountWriter<W> {
	fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
		let n = self.inner.write(buf)?;
		self.count += n as u64;
		Ok(n)
	}

	fn flush(&mut self) -> std::io::Result<()> {
		self.inner.flush()
	}
}

#[cfg(test)]
mod tests {
	use std::io::Cursor;

	use super::*;

	fn write_set(entries: &[(&str, &[u8])]) -> Vec<u8> {
		let mut tzw = Writer::new(Cursor::new(Vec::new()));
		for (name, _) in entries {
			tzw.create(name).expect("create");
		}

		let mut position = tzw.first();
		while let Some(index) = position {
			let payload = entries[index].1;
			let mut entry = tzw.open(payload.len() as u64).expect("open");
			entry.write_all(payload).expect("write");
			entry.finish().expect("finish entry");
			position = tzw.next();
		}

		tzw.finish().expect("finish writer").into_inner()
	}

	#[test]
	fn create_after_write_rejected() {
		let mut tzw = Writer::new(Cursor::new(Vec::new()));
		tzw.create("a.bin").expect("create");
		assert!(tzw.first().is_some());
		assert!(matches!(
			tzw.create("b.bin"),
			Err(Error::CreateAfterWrite)
		));
	}

	#[test]
	fn open_before_first_rejected() {
		let mut tzw = Writer::new(Cursor::new(Vec::new()));
		tzw.create("a.bin").expect("create");
		assert!(matches!(tzw.open(1), Err(Error::NoEntrySelected)));
	}

	#[test]
	fn size_mismatch_rejected() {
		let mut tzw = Writer::new(Cursor::new(Vec::new()));
		tzw.create("a.bin").expect("create");
		tzw.first();
		let mut entry = tzw.open(4).expect("open");
		entry.write_all(b"abc").expect("write");
		assert!(matches!(
			entry.finish(),
			Err(Error::SizeMismatch {
				declared: 4,
				written: 3
			})
		));
	}

	#[test]
	fn finish_requires_all_entries() {
		let mut tzw = Writer::new(Cursor::new(Vec::new()));
		tzw.create("a.bin").expect("create");
		tzw.create("b.bin").expect("create");
		tzw.first();
		let mut entry = tzw.open(1).expect("open");
		entry.write_all(b"x").expect("write");
		entry.finish().expect("finish entry");
		assert!(matches!(tzw.finish(), Err(Error::NotAllWritten)));
	}

	#[test]
	fn iteration_is_case_folded_sorted() {
		let mut tzw = Writer::new(Cursor::new(Vec::new()));
		for name in ["Zeta.bin", "alpha.bin", "MIDDLE.bin"] {
			tzw.create(name).expect("create");
		}

		let mut order = Vec::new();
		let mut position = tzw.first();
		while let Some(index) = position {
			order.push(index);
			let entry = tzw.open(0).expect("open");
			entry.finish().expect("finish entry");
			position = tzw.next();
		}

		// alpha (1), MIDDLE (2), Zeta (0) in case-folded order.
		assert_eq!(order, vec![1, 2, 0]);
	}

	#[test]
	fn redundant_directories_pruned() {
		let mut tzw = Writer::new(Cursor::new(Vec::new()));
		tzw.create("sub/").expect("create");
		tzw.create("sub/rom.bin").expect("create");
		tzw.create("empty/").expect("create");

		let mut visited = Vec::new();
		let mut position = tzw.first();
		while let Some(index) = position {
			visited.push(index);
			let entry = tzw.open(0).expect("open");
			entry.finish().expect("finish entry");
			position = tzw.next();
		}

		// `sub/` is implied by `sub/rom.bin` and dropped; `empty/` is kept.
		assert_eq!(visited, vec![2, 1]);
	}

	#[test]
	fn output_is_permutation_invariant() {
		let forward = write_set(&[("rom_1.bin", &[1u8; 512]), ("rom_2.bin", &[2u8; 512])]);
		let reversed = write_set(&[("rom_2.bin", &[2u8; 512]), ("rom_1.bin", &[1u8; 512])]);
		assert_eq!(forward, reversed);
		assert!(!forward.is_empty());
	}

	#[test]
	fn raw_copy_preserves_compressed_bytes() {
		// Encode once, then replay the compressed stream through raw mode
		// and expect a byte-identical archive.
		let original = write_set(&[("rom.bin", &[7u8; 4096])]);

		let mut archive = zip::ZipArchive::new(Cursor::new(original.clone())).expect("read");
		let (compressed, crc32, size) = {
			use std::io::Read;
			let mut entry = archive.by_index_raw(0).expect("raw entry");
			let mut compressed = Vec::new();
			entry.read_to_end(&mut compressed).expect("raw bytes");
			(compressed, entry.crc32(), entry.size())
		};

		let mut tzw = Writer::new(Cursor::new(Vec::new()));
		tzw.create("rom.bin").expect("create");
		tzw.first();
		let mut entry = tzw.open_raw(size, crc32).expect("open raw");
		entry.write_all(&compressed).expect("write raw");
		entry.finish().expect("finish entry");
		let replayed = tzw.finish().expect("finish writer").into_inner();

		assert_eq!(original, replayed);
	}
}
