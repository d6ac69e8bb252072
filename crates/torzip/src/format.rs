//! Zip wire records as little-endian structs.
//!
//! Every record the encoder emits is described here, with the fields a
//! conventional Zip writer varies pinned to the constants in
//! [`constants`](crate::constants). The variable-length Zip64 extra data is
//! assembled by the builders below rather than modelled field-by-field, since
//! which of its members are present depends on which values overflowed.

use deku::prelude::*;

use crate::constants::*;

/// Local file header, written twice: once as a zero reservation and once,
/// after the payload, with the real CRC and sizes.
#[derive(Clone, Debug, Eq, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct LocalFileHeader {
	/// Signature. Always [`LOCAL_FILE_SIG`].
	pub signature: u32,

	/// Version needed to extract.
	pub version: u16,

	/// General purpose flags. Always [`GENERAL_PURPOSE_FLAG`].
	pub flags: u16,

	/// Compression method. Always [`COMPRESSION_METHOD`].
	pub method: u16,

	/// DOS time. Always [`LAST_MOD_TIME`].
	pub mod_time: u16,

	/// DOS date. Always [`LAST_MOD_DATE`].
	pub mod_date: u16,

	/// CRC-32 of the uncompressed payload.
	pub crc32: u32,

	/// Compressed size, or the Zip64 sentinel.
	pub compressed_size: u32,

	/// Uncompressed size, or the Zip64 sentinel.
	pub uncompressed_size: u32,

	/// Length of the entry name in bytes.
	pub name_len: u16,

	/// Length of the extra field in bytes.
	pub extra_len: u16,

	/// Entry name, forward slashes, no drive or leading slash.
	#[deku(count = "name_len")]
	pub name: Vec<u8>,

	/// Zip64 extra field when the entry overflows, otherwise empty.
	#[deku(count = "extra_len")]
	pub extra: Vec<u8>,
}

impl LocalFileHeader {
	/// Build the finalised header for an entry.
	///
	/// Both sizes move to the Zip64 extra field when the uncompressed size
	/// crosses the threshold. A compressed size crossing the threshold on
	/// its own cannot be represented; the encoder rejects that case before
	/// building the record.
	pub fn build(name: &[u8], crc32: u32, size: u64, compressed_size: u64) -> Self {
		let zip64 = size >= U32_MAX;
		let mut extra = Vec::new();
		if zip64 {
			extra = zip64_extra(&[size, compressed_size]);
		}

		Self {
			signature: LOCAL_FILE_SIG,
			version: if zip64 { ZIP64_VERSION } else { ZIP_VERSION },
			flags: GENERAL_PURPOSE_FLAG,
			method: COMPRESSION_METHOD,
			mod_time: LAST_MOD_TIME,
			mod_date: LAST_MOD_DATE,
			crc32,
			compressed_size: clamp32(compressed_size, zip64),
			uncompressed_size: clamp32(size, zip64),
			name_len: name.len() as u16,
			extra_len: extra.len() as u16,
			name: name.to_vec(),
			extra,
		}
	}

	/// Wire length of this header, including name and extra.
	pub fn len(&self) -> usize {
		LOCAL_FILE_LEN + self.name.len() + self.extra.len()
	}

	/// Reserved length for an entry of the given name and size, before the
	/// compressed size is known.
	pub fn reserved_len(name_len: usize, size: u64) -> usize {
		let mut len = LOCAL_FILE_LEN + name_len;
		if size >= U32_MAX {
			len += EXTRA_FIELD_LEN;
		}
		len
	}
}

/// Central directory header, one per entry, in sorted order.
#[derive(Clone, Debug, Eq, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct CentralDirHeader {
	/// Signature. Always [`CENTRAL_DIR_SIG`].
	pub signature: u32,

	/// Version made by. Always [`VERSION_MADE_BY`] (FAT attributes).
	pub version_made_by: u16,

	/// Version needed to extract.
	pub version: u16,

	/// General purpose flags. Always [`GENERAL_PURPOSE_FLAG`].
	pub flags: u16,

	/// Compression method. Always [`COMPRESSION_METHOD`].
	pub method: u16,

	/// DOS time. Always [`LAST_MOD_TIME`].
	pub mod_time: u16,

	/// DOS date. Always [`LAST_MOD_DATE`].
	pub mod_date: u16,

	/// CRC-32 of the uncompressed payload.
	pub crc32: u32,

	/// Compressed size, or the Zip64 sentinel.
	pub compressed_size: u32,

	/// Uncompressed size, or the Zip64 sentinel.
	pub uncompressed_size: u32,

	/// Length of the entry name in bytes.
	pub name_len: u16,

	/// Length of the extra field in bytes.
	pub extra_len: u16,

	/// Comment length. Always zero.
	pub comment_len: u16,

	/// Disk number start. Always zero.
	pub disk_start: u16,

	/// Internal attributes. Always zero.
	pub internal_attrs: u16,

	/// External attributes. Always zero.
	pub external_attrs: u32,

	/// Offset of the local header, or the Zip64 sentinel.
	pub local_offset: u32,

	/// Entry name.
	#[deku(count = "name_len")]
	pub name: Vec<u8>,

	/// Zip64 extra field carrying only the overflowed values, in the
	/// fixed order: uncompressed size, compressed size, local offset.
	#[deku(count = "extra_len")]
	pub extra: Vec<u8>,
}

impl CentralDirHeader {
	/// Build the central directory record for an entry.
	pub fn build(name: &[u8], crc32: u32, size: u64, compressed_size: u64, offset: u64) -> Self {
		let mut wide = Vec::new();
		if size >= U32_MAX {
			wide.push(size);
		}
		if compressed_size >= U32_MAX {
			wide.push(compressed_size);
		}
		if offset >= U32_MAX {
			wide.push(offset);
		}
		let zip64 = !wide.is_empty();
		let extra = if zip64 { zip64_extra(&wide) } else { Vec::new() };

		Self {
			signature: CENTRAL_DIR_SIG,
			version_made_by: VERSION_MADE_BY,
			version: if zip64 { ZIP64_VERSION } else { ZIP_VERSION },
			flags: GENERAL_PURPOSE_FLAG,
			method: COMPRESSION_METHOD,
			mod_time: LAST_MOD_TIME,
			mod_date: LAST_MOD_DATE,
			crc32,
			compressed_size: clamp32(compressed_size, compressed_size >= U32_MAX),
			uncompressed_size: clamp32(size, size >= U32_MAX),
			name_len: name.len() as u16,
			extra_len: extra.len() as u16,
			comment_len: 0,
			disk_start: 0,
			internal_attrs: 0,
			external_attrs: 0,
			local_offset: clamp32(offset, offset >= U32_MAX),
			name: name.to_vec(),
			extra,
		}
	}
}

/// Zip64 end of central directory record.
#[derive(Clone, Debug, Eq, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct EndCentralDir64 {
	/// Signature. Always [`END_CENTRAL_DIR64_SIG`].
	pub signature: u32,

	/// Size of the remainder of this record.
	pub record_size: u64,

	/// Version made by.
	pub version_made_by: u16,

	/// Version needed to extract.
	pub version: u16,

	/// Number of this disk. Always zero.
	pub disk: u32,

	/// Disk with the central directory. Always zero.
	pub cd_disk: u32,

	/// Entries in the central directory on this disk.
	pub records_disk: u64,

	/// Entries in the central directory.
	pub records: u64,

	/// Size of the central directory in bytes.
	pub cd_size: u64,

	/// Offset of the central directory.
	pub cd_offset: u64,
}

impl EndCentralDir64 {
	/// Build the Zip64 EOCD for a finished central directory.
	pub fn build(records: u64, cd_size: u64, cd_offset: u64) -> Self {
		Self {
			signature: END_CENTRAL_DIR64_SIG,
			record_size: (END_CENTRAL_DIR64_LEN - 12) as u64,
			version_made_by: ZIP64_VERSION,
			version: ZIP64_VERSION,
			disk: 0,
			cd_disk: 0,
			records_disk: records,
			records,
			cd_size,
			cd_offset,
		}
	}
}

/// Zip64 end of central directory locator.
#[derive(Clone, Debug, Eq, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct EndCentralDir64Locator {
	/// Signature. Always [`END_CENTRAL_DIR64_LOC_SIG`].
	pub signature: u32,

	/// Disk with the Zip64 EOCD. Always zero.
	pub disk: u32,

	/// Offset of the Zip64 EOCD record.
	pub eocd64_offset: u64,

	/// Total number of disks. Always one.
	pub disks: u32,
}

impl EndCentralDir64Locator {
	/// Build the locator pointing at a Zip64 EOCD.
	pub fn build(eocd64_offset: u64) -> Self {
		Self {
			signature: END_CENTRAL_DIR64_LOC_SIG,
			disk: 0,
			eocd64_offset,
			disks: 1,
		}
	}
}

/// Classic end of central directory record, with the TorrentZip comment.
#[derive(Clone, Debug, Eq, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct EndCentralDir {
	/// Signature. Always [`END_CENTRAL_DIR_SIG`].
	pub signature: u32,

	/// Number of this disk. Always zero.
	pub disk: u16,

	/// Disk with the central directory. Always zero.
	pub cd_disk: u16,

	/// Entries on this disk, clamped to the Zip64 sentinel.
	pub records_disk: u16,

	/// Entries in the central directory, clamped to the Zip64 sentinel.
	pub records: u16,

	/// Size of the central directory, clamped to the Zip64 sentinel.
	pub cd_size: u32,

	/// Offset of the central directory, clamped to the Zip64 sentinel.
	pub cd_offset: u32,

	/// Comment length. Always [`COMMENT_LENGTH`].
	pub comment_len: u16,

	/// `TORRENTZIPPED-` followed by eight upper-case hex digits of the
	/// central directory CRC-32.
	#[deku(count = "comment_len")]
	pub comment: Vec<u8>,
}

impl EndCentralDir {
	/// Build the classic EOCD with the TorrentZip comment.
	pub fn build(records: u64, cd_size: u64, cd_offset: u64, cd_crc: u32) -> Self {
		Self {
			signature: END_CENTRAL_DIR_SIG,
			disk: 0,
			cd_disk: 0,
			records_disk: records.min(U16_MAX) as u16,
			records: records.min(U16_MAX) as u16,
			cd_size: cd_size.min(U32_MAX) as u32,
			cd_offset: cd_offset.min(U32_MAX) as u32,
			comment_len: COMMENT_LENGTH as u16,
			comment: format!("TORRENTZIPPED-{cd_crc:08X}").into_bytes(),
		}
	}
}

/// Assemble a Zip64 extended information extra field from the values that
/// overflowed, already in field order.
fn zip64_extra(values: &[u64]) -> Vec<u8> {
	let mut extra = Vec::with_capacity(4 + values.len() * 8);
	extra.extend_from_slice(&EXTRA_FIELD_ID.to_le_bytes());
	extra.extend_from_slice(&((values.len() * 8) as u16).to_le_bytes());
	for value in values {
		extra.extend_from_slice(&value.to_le_bytes());
	}
	extra
}

/// Clamp a 64-bit value into a 32-bit field, substituting the sentinel when
/// the value lives in the extra field instead.
fn clamp32(value: u64, zip64: bool) -> u32 {
	if zip64 {
		U32_MAX as u32
	} else {
		value as u32
	}
}

#[cfg(test)]
mod tests {
	use deku::DekuContainerWrite;

	use super::*;

	#[test]
	fn local_header_wire_length() {
		let header = LocalFileHeader::build(b"rom_1.bin", 0xc26a1549, 4096, 1234);
		let bytes = header.to_bytes().expect("serialise");
		assert_eq!(bytes.len(), LOCAL_FILE_LEN + 9);
		assert_eq!(bytes.len(), header.len());
		assert_eq!(bytes.len(), LocalFileHeader::reserved_len(9, 4096));
	}

	#[test]
	fn local_header_zip64_length() {
		let size = U32_MAX + 1;
		let header = LocalFileHeader::build(b"big.bin", 0, size, size / 2);
		let bytes = header.to_bytes().expect("serialise");
		assert_eq!(bytes.len(), LOCAL_FILE_LEN + 7 + EXTRA_FIELD_LEN);
		assert_eq!(header.uncompressed_size, U32_MAX as u32);
		assert_eq!(header.compressed_size, U32_MAX as u32);
		assert_eq!(header.version, ZIP64_VERSION);
	}

	#[test]
	fn central_header_selective_extras() {
		// Only the offset overflows: one wide field.
		let header = CentralDirHeader::build(b"a", 0, 10, 5, U32_MAX + 7);
		let bytes = header.to_bytes().expect("serialise");
		assert_eq!(bytes.len(), CENTRAL_DIR_LEN + 1 + 4 + 8);
		assert_eq!(header.local_offset, U32_MAX as u32);
		assert_eq!(header.uncompressed_size, 10);

		// Nothing overflows: no extra at all.
		let header = CentralDirHeader::build(b"a", 0, 10, 5, 0);
		let bytes = header.to_bytes().expect("serialise");
		assert_eq!(bytes.len(), CENTRAL_DIR_LEN + 1);
		assert_eq!(header.version, ZIP_VERSION);
	}

	#[test]
	fn eocd_records() {
		let eocd = EndCentralDir::build(3, 150, 4096, 0xdeadbeef);
		let bytes = eocd.to_bytes().expect("serialise");
		assert_eq!(bytes.len(), END_CENTRAL_DIR_LEN + COMMENT_LENGTH);
		assert_eq!(&eocd.comment[..14], COMMENT_PREFIX);
		assert_eq!(&eocd.comment[14..], b"DEADBEEF");

		let eocd64 = EndCentralDir64::build(3, 150, 4096);
		assert_eq!(
			eocd64.to_bytes().expect("serialise").len(),
			END_CENTRAL_DIR64_LEN
		);

		let locator = EndCentralDir64Locator::build(4246);
		assert_eq!(
			locator.to_bytes().expect("serialise").len(),
			END_CENTRAL_DIR64_LOC_LEN
		);
	}
}
