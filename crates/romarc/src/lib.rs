//! Romarc: curated ROM collections, checked and repaired against DAT
//! manifests.
//!
//! A collection is a directory with one container per machine: a
//! subdirectory, a Zip, or a general archive. A DAT manifest declares what
//! each machine should contain, identified by size, CRC-32, and SHA-1. This
//! crate parses manifests ([`dat`]), reads and writes the container shapes
//! under one interface ([`romio`]), memoises entry digests in an on-disk
//! database with a content-addressed reverse index ([`romdb`]), classifies
//! machines ([`validate`]), and repairs them by pulling known-good content
//! from source trees into fresh reproducible containers ([`fix`]).
//!
//! Zip output is byte-reproducible TorrentZip, produced by the companion
//! [`torzip`] crate.

#![warn(clippy::unwrap_used, missing_docs)]
#![deny(rust_2018_idioms)]

pub mod cancel;
pub mod checksum;
pub mod dat;
pub mod error;
pub mod fix;
pub mod romdb;
pub mod romio;
pub mod validate;

pub use cancel::StopToken;
pub use checksum::{digest_reader, Crc32, DigestOptions, Digests, Sha1};
pub use dat::{machine_to_xml, parse_dat_file, DatHeader, Machine, Rom};
pub use error::{Error, Result};
pub use fix::{fix_dat, FixEvent, FixOptions, FixStats};
pub use romdb::{RomDb, RomDbEntry};
pub use romio::{
	copy_rom, create_writer, create_writer_temp, open_reader, open_reader_by_name, ArchiveKind,
	Format, RomFile, RomReader, RomWriter,
};
pub use validate::{
	check_dat, validate_checksums, validate_sizes, CheckOptions, CheckReport, MachineCheck,
	RomStatus, Validation,
};
