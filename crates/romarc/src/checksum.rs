//! Digest primitives: CRC-32 and SHA-1 newtypes and the streaming
//! checksum-a-reader operation.
//!
//! Digests are fixed-width binary values with canonical lowercase hex string
//! forms; manifests carry them as hex attributes. The streaming operation
//! can skip the fixed-length dump headers some cartridge formats prepend, so
//! that a headered dump digests the same as the bare ROM.

use std::fmt;
use std::io::Read;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest as _, Sha1 as Sha1Hasher};

use crate::error::{Error, Result};

/// Read granularity for digesting.
const BUFFER_SIZE: usize = 256 * 1024;

/// Bytes needed to decide whether a known cartridge header is present.
const HEADER_PROBE: usize = 128;

/// A 32-bit CRC (IEEE polynomial), stored big-endian so the byte order
/// matches the canonical hex form.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Crc32(pub [u8; 4]);

/// A 160-bit SHA-1 digest.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Sha1(pub [u8; 20]);

macro_rules! hex_digest {
	($name:ident, $len:expr) => {
		impl $name {
			/// Digest width in bytes.
			pub const SIZE: usize = $len;

			/// True for the all-zero value, which stands for "not declared"
			/// in manifests.
			pub fn is_zero(&self) -> bool {
				self.0 == [0u8; $len]
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				for byte in &self.0 {
					write!(f, "{byte:02x}")?;
				}
				Ok(())
			}
		}

		impl FromStr for $name {
			type Err = Error;

			fn from_str(hex: &str) -> Result<Self> {
				if hex.is_empty() {
					return Ok(Self::default());
				}
				if hex.len() != $len * 2 || !hex.is_ascii() {
					return Err(Error::ManifestParse(format!(
						"invalid {} digest: {hex:?}",
						stringify!($name),
					)));
				}

				let mut out = [0u8; $len];
				for (i, chunk) in hex.as_bytes().chunks_exact(2).enumerate() {
					// The string is ASCII, so every 2-byte chunk is UTF-8.
					let pair = std::str::from_utf8(chunk).unwrap_or_default();
					out[i] = u8::from_str_radix(pair, 16).map_err(|_| {
						Error::ManifestParse(format!(
							"invalid {} digest: {hex:?}",
							stringify!($name),
						))
					})?;
				}
				Ok(Self(out))
			}
		}

		impl From<[u8; $len]> for $name {
			fn from(bytes: [u8; $len]) -> Self {
				Self(bytes)
			}
		}

		impl AsRef<[u8]> for $name {
			fn as_ref(&self) -> &[u8] {
				&self.0
			}
		}

		impl Serialize for $name {
			fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
				serializer.collect_str(self)
			}
		}

		impl<'de> Deserialize<'de> for $name {
			fn deserialize<D: Deserializer<'de>>(
				deserializer: D,
			) -> std::result::Result<Self, D::Error> {
				let hex = String::deserialize(deserializer)?;
				hex.parse().map_err(serde::de::Error::custom)
			}
		}
	};
}

hex_digest!(Crc32, 4);
hex_digest!(Sha1, 20);

impl Crc32 {
	/// From the numeric CRC value.
	pub fn from_u32(value: u32) -> Self {
		Self(value.to_be_bytes())
	}

	/// As the numeric CRC value.
	pub fn to_u32(self) -> u32 {
		u32::from_be_bytes(self.0)
	}
}

impl TryFrom<&[u8]> for Sha1 {
	type Error = Error;

	fn try_from(bytes: &[u8]) -> Result<Self> {
		let bytes: [u8; 20] = bytes
			.try_into()
			.map_err(|_| Error::DbCorruption(format!("digest of {} bytes", bytes.len())))?;
		Ok(Self(bytes))
	}
}

impl<C> minicbor::Encode<C> for Sha1 {
	fn encode<W: minicbor::encode::Write>(
		&self,
		e: &mut minicbor::Encoder<W>,
		_ctx: &mut C,
	) -> std::result::Result<(), minicbor::encode::Error<W::Error>> {
		e.bytes(&self.0).map(drop)
	}
}

impl<'b, C> minicbor::Decode<'b, C> for Sha1 {
	fn decode(
		d: &mut minicbor::Decoder<'b>,
		_ctx: &mut C,
	) -> std::result::Result<Self, minicbor::decode::Error> {
		let bytes: [u8; 20] = d
			.bytes()?
			.try_into()
			.map_err(|_| minicbor::decode::Error::message("sha1 digest must be 20 bytes"))?;
		Ok(Self(bytes))
	}
}

/// What to compute, and whether to skip a recognised cartridge header.
#[derive(Clone, Copy, Debug, Default)]
pub struct DigestOptions {
	/// Detect and skip a known fixed-length dump header before hashing.
	pub skip_header: bool,
	/// Do not compute the CRC-32.
	pub no_crc32: bool,
	/// Do not compute the SHA-1.
	pub no_sha1: bool,
}

/// Result of digesting a stream: the byte count after any header skip and
/// whichever digests were requested (the others are zero).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Digests {
	/// Bytes hashed (payload after the skipped header, if any).
	pub size: u64,
	/// CRC-32 of the hashed bytes.
	pub crc32: Crc32,
	/// SHA-1 of the hashed bytes.
	pub sha1: Sha1,
}

/// Known cartridge dump headers: match offset, magic, header length.
const ROM_HEADERS: &[(usize, &[u8], usize)] = &[
	// NES
	(0x0, &[0x4e, 0x45, 0x53, 0x1a], 0x10),
	// Atari 7800
	(0x1, b"ATARI7800", 0x80),
	// Atari Lynx
	(0x0, b"LYNX", 0x40),
];

/// Length of the recognised header at the front of `buffer`, or zero.
fn header_size(buffer: &[u8]) -> usize {
	for (offset, magic, size) in ROM_HEADERS {
		let end = offset + magic.len();
		if buffer.len() >= end && &buffer[*offset..end] == *magic {
			return *size;
		}
	}
	0
}

/// Digest a reader in streaming fashion.
pub fn digest_reader(rd: &mut impl Read, options: DigestOptions) -> Result<Digests> {
	let mut digests = Digests::default();
	let mut sha1 = Sha1Hasher::new();
	let mut crc32 = crc32fast::Hasher::new();
	let mut buffer = vec![0u8; BUFFER_SIZE];

	let mut update = |digests: &mut Digests, bytes: &[u8]| {
		if !options.no_sha1 {
			sha1.update(bytes);
		}
		if !options.no_crc32 {
			crc32.update(bytes);
		}
		digests.size += bytes.len() as u64;
	};

	if options.skip_header {
		// Pull in enough to cover the longest known header, then hash from
		// just past it. Streams shorter than the probe simply have no
		// header to skip.
		let mut filled = 0;
		while filled < HEADER_PROBE {
			let got = rd.read(&mut buffer[filled..])?;
			if got == 0 {
				break;
			}
			filled += got;
		}
		let offset = header_size(&buffer[..filled]).min(filled);
		update(&mut digests, &buffer[offset..filled]);
	}

	loop {
		let got = rd.read(&mut buffer)?;
		if got == 0 {
			break;
		}
		update(&mut digests, &buffer[..got]);
	}

	if !options.no_sha1 {
		digests.sha1 = Sha1(sha1.finalize().into());
	}
	if !options.no_crc32 {
		digests.crc32 = Crc32::from_u32(crc32.finalize());
	}

	Ok(digests)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn hex_round_trip() {
		let crc: Crc32 = "c26a1549".parse().expect("crc");
		assert_eq!(crc.to_string(), "c26a1549");
		assert_eq!(crc.to_u32(), 0xc26a1549);

		let sha1: Sha1 = "325701a893c1102805329f8af2d8410e40c14c79"
			.parse()
			.expect("sha1");
		assert_eq!(
			sha1.to_string(),
			"325701a893c1102805329f8af2d8410e40c14c79"
		);
	}

	#[test]
	fn empty_hex_is_zero() {
		let crc: Crc32 = "".parse().expect("empty crc");
		assert!(crc.is_zero());
		let sha1: Sha1 = "".parse().expect("empty sha1");
		assert!(sha1.is_zero());
	}

	#[test]
	fn bad_hex_rejected() {
		assert!("c26a15".parse::<Crc32>().is_err());
		assert!("zzzzzzzz".parse::<Crc32>().is_err());
		assert!("deadbeef00".parse::<Crc32>().is_err());
	}

	#[test]
	fn digest_known_bytes() {
		// SHA-1 and CRC-32 of the ASCII string "abc" are fixed points of
		// the respective specifications.
		let mut rd = &b"abc"[..];
		let digests = digest_reader(&mut rd, DigestOptions::default()).expect("digest");
		assert_eq!(digests.size, 3);
		assert_eq!(
			digests.sha1.to_string(),
			"a9993e364706816aba3e25717850c26c9cd0d89d"
		);
		assert_eq!(digests.crc32.to_string(), "352441c2");
	}

	#[test]
	fn options_suppress_work() {
		let mut rd = &b"abc"[..];
		let digests = digest_reader(
			&mut rd,
			DigestOptions {
				no_crc32: true,
				..Default::default()
			},
		)
		.expect("digest");
		assert!(digests.crc32.is_zero());
		assert!(!digests.sha1.is_zero());
	}

	#[test]
	fn nes_header_skipped() {
		let mut dump = vec![0x4e, 0x45, 0x53, 0x1a];
		dump.resize(16, 0xaa);
		dump.extend_from_slice(&[7u8; 64]);

		let mut bare = &[7u8; 64][..];
		let expected = digest_reader(&mut bare, DigestOptions::default()).expect("bare");

		let mut rd = &dump[..];
		let skipped = digest_reader(
			&mut rd,
			DigestOptions {
				skip_header: true,
				..Default::default()
			},
		)
		.expect("headered");

		assert_eq!(skipped.size, 64);
		assert_eq!(skipped.sha1, expected.sha1);
		assert_eq!(skipped.crc32, expected.crc32);

		// Without the option the header is hashed too.
		let mut rd = &dump[..];
		let plain = digest_reader(&mut rd, DigestOptions::default()).expect("plain");
		assert_eq!(plain.size, 80);
		assert_ne!(plain.sha1, expected.sha1);
	}

	#[test]
	fn short_stream_with_skip_option() {
		let mut rd = &b"tiny"[..];
		let digests = digest_reader(
			&mut rd,
			DigestOptions {
				skip_header: true,
				..Default::default()
			},
		)
		.expect("digest");
		assert_eq!(digests.size, 4);
	}
}
