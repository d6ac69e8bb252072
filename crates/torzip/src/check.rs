//! Recognising files that are already in TorrentZip form.
//!
//! The end-of-central-directory comment advertises a CRC-32 of the central
//! directory bytes; verifying it is the only fast-path gate needed to skip
//! re-encoding an archive. Nothing else about the file is validated here.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crc32fast::Hasher;
use deku::DekuContainerRead;
use tracing::trace;

use crate::constants::*;
use crate::error::Result;
use crate::format::{EndCentralDir, EndCentralDir64, EndCentralDir64Locator};

/// Check whether a Zip file is already TorrentZipped.
///
/// Reads the classic end-of-central-directory record (following the Zip64
/// locator when the sizes demand it), requires the `TORRENTZIPPED-` comment,
/// and verifies the comment's CRC-32 against the central directory bytes.
/// Returns `Ok(false)` for anything structurally unexpected; I/O failures
/// surface as errors.
pub fn is_torzip(path: impl AsRef<Path>) -> Result<bool> {
	let mut file = File::open(path.as_ref())?;

	// A TorrentZipped file always ends with a fixed-size EOCD record: the
	// comment never varies in length.
	let eocd_len = (END_CENTRAL_DIR_LEN + COMMENT_LENGTH) as u64;
	if file.metadata()?.len() < eocd_len {
		return Ok(false);
	}

	let buf = read_at(&mut file, SeekFrom::End(-(eocd_len as i64)), eocd_len as usize)?;
	let Ok((_, eocd)) = EndCentralDir::from_bytes((buf.as_slice(), 0)) else {
		return Ok(false);
	};
	if eocd.signature != END_CENTRAL_DIR_SIG {
		return Ok(false);
	}

	if eocd.comment.len() != COMMENT_LENGTH || &eocd.comment[..14] != COMMENT_PREFIX {
		return Ok(false);
	}

	// UNWRAP: the slice is exactly the 8 bytes following the prefix.
	let digits = std::str::from_utf8(&eocd.comment[14..]).unwrap_or("");
	let Ok(expected) = u32::from_str_radix(digits, 16) else {
		return Ok(false);
	};

	let mut cd_size = u64::from(eocd.cd_size);
	let mut cd_offset = u64::from(eocd.cd_offset);

	// Either size at its sentinel means the real values live in a Zip64
	// record found through the locator just before the EOCD.
	if cd_size == U32_MAX || cd_offset == U32_MAX {
		let locator_from_end = -((eocd_len + END_CENTRAL_DIR64_LOC_LEN as u64) as i64);
		let buf = read_at(
			&mut file,
			SeekFrom::End(locator_from_end),
			END_CENTRAL_DIR64_LOC_LEN,
		)?;
		let Ok((_, locator)) = EndCentralDir64Locator::from_bytes((buf.as_slice(), 0)) else {
			return Ok(false);
		};
		if locator.signature != END_CENTRAL_DIR64_LOC_SIG {
			return Ok(false);
		}

		let buf = read_at(
			&mut file,
			SeekFrom::Start(locator.eocd64_offset),
			END_CENTRAL_DIR64_LEN,
		)?;
		let Ok((_, eocd64)) = EndCentralDir64::from_bytes((buf.as_slice(), 0)) else {
			return Ok(false);
		};
		if eocd64.signature != END_CENTRAL_DIR64_SIG {
			return Ok(false);
		}

		if cd_size == U32_MAX {
			cd_size = eocd64.cd_size;
		}
		if cd_offset == U32_MAX {
			cd_offset = eocd64.cd_offset;
		}
	}

	// CRC the central directory and compare with the comment.
	file.seek(SeekFrom::Start(cd_offset))?;
	let mut crc = Hasher::new();
	let mut remaining = cd_size;
	let mut buf = vec![0u8; 64 * 1024];
	while remaining > 0 {
		let want = remaining.min(buf.len() as u64) as usize;
		let got = file.read(&mut buf[..want])?;
		if got == 0 {
			return Ok(false);
		}
		crc.update(&buf[..got]);
		remaining -= got as u64;
	}

	let actual = crc.finalize();
	trace!(
		expected = %format!("{expected:08X}"),
		actual = %format!("{actual:08X}"),
		"verify central directory digest"
	);

	Ok(actual == expected)
}

fn read_at(file: &mut File, pos: SeekFrom, len: usize) -> Result<Vec<u8>> {
	file.seek(pos)?;
	let mut buf = vec![0u8; len];
	file.read_exact(&mut buf)?;
	Ok(buf)
}
