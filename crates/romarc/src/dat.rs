//! DAT manifest parsing and serialisation.
//!
//! A manifest is an XML document with a `datafile` root, an optional
//! `header`, and a sequence of `machine` (or `game`) elements declaring each
//! machine's expected entries by name, size, CRC-32, and SHA-1. Manifests
//! whose extension is `.gz` are transparently decompressed. ROM names use
//! backslashes on the wire; they are normalised to forward slashes on read
//! and re-emitted as backslashes on write.

use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize, Serializer};
use tracing::debug;

use crate::checksum::{Crc32, Sha1};
use crate::error::{Error, Result};
use crate::romio::mach_name;

/// Manifest header metadata.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct DatHeader {
	/// Collection name.
	#[serde(default)]
	pub name: String,

	/// Free-form description.
	#[serde(default)]
	pub description: String,

	/// Version string.
	#[serde(default)]
	pub version: String,

	/// Author.
	#[serde(default)]
	pub author: String,
}

/// One declared machine.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Machine {
	/// Machine identifier; matches the container name on disk.
	#[serde(rename = "@name")]
	pub name: String,

	/// Free-form description.
	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub description: String,

	/// Release year, when declared.
	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub year: String,

	/// Manufacturer, when declared.
	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub manufacturer: String,

	/// Category, when declared.
	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub category: String,

	/// Declared entries, in manifest order.
	#[serde(rename = "rom", default)]
	pub roms: Vec<Rom>,
}

/// One declared entry of a machine.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Rom {
	/// Entry name, forward slashes after parsing.
	#[serde(rename = "@name", serialize_with = "ser_dat_path")]
	pub name: String,

	/// Declared size in bytes.
	#[serde(rename = "@size", default)]
	pub size: u64,

	/// Declared CRC-32; zero when the manifest omits it.
	#[serde(rename = "@crc", default, skip_serializing_if = "Crc32::is_zero")]
	pub crc: Crc32,

	/// Declared SHA-1; zero when the manifest omits it.
	#[serde(rename = "@sha1", default, skip_serializing_if = "Sha1::is_zero")]
	pub sha1: Sha1,
}

#[derive(Debug, Deserialize)]
struct DatDocument {
	header: Option<DatHeader>,
	#[serde(rename = "machine", default)]
	machines: Vec<Machine>,
	#[serde(rename = "game", default)]
	games: Vec<Machine>,
}

/// Manifest path separator to native: backslashes become forward slashes.
pub fn from_dat_path(path: &str) -> String {
	path.replace('\\', "/")
}

/// Native path separator to manifest form: forward slashes become
/// backslashes.
pub fn to_dat_path(path: &str) -> String {
	path.replace('/', "\\")
}

fn ser_dat_path<S: Serializer>(name: &str, serializer: S) -> std::result::Result<S::Ok, S::Error> {
	serializer.serialize_str(&to_dat_path(name))
}

/// Normalise declared entry names: manifest separators, and a leading
/// `<machine name>/` segment some manifests prepend, are stripped.
fn normalize_rom_names(machine: &mut Machine) {
	let prefix = format!("{}/", machine.name);
	for rom in &mut machine.roms {
		let name = from_dat_path(&rom.name);
		rom.name = match name.strip_prefix(&prefix) {
			Some(stripped) => stripped.to_owned(),
			None => name,
		};
	}
}

/// Verify the document's root element is `datafile`.
fn check_root(text: &str) -> Result<()> {
	let mut reader = quick_xml::Reader::from_str(text);
	loop {
		match reader.read_event() {
			Ok(quick_xml::events::Event::Start(start)) => {
				if start.name().as_ref() == b"datafile" {
					return Ok(());
				}
				return Err(Error::ManifestParse(format!(
					"root element is {:?}, expected datafile",
					String::from_utf8_lossy(start.name().as_ref())
				)));
			}
			Ok(quick_xml::events::Event::Eof) => {
				return Err(Error::ManifestParse("empty document".to_owned()));
			}
			Err(err) => return Err(Error::ManifestParse(err.to_string())),
			Ok(_) => continue,
		}
	}
}

/// Parse a manifest, invoking `header_fn` for the header (when present) and
/// `mach_fn` for each machine in document order.
///
/// `mach_filter` is a list of machine names (paths are reduced to their
/// lowercased stem); when non-empty, only the named machines are reported
/// and parsing stops early once all of them have been seen.
pub fn parse_dat_file(
	path: impl AsRef<Path>,
	mach_filter: &[String],
	mut header_fn: impl FnMut(&DatHeader) -> Result<()>,
	mut mach_fn: impl FnMut(Machine) -> Result<()>,
) -> Result<()> {
	let path = path.as_ref();
	let file = std::fs::File::open(path).map_err(|err| Error::path(err, path))?;

	let mut text = String::new();
	if crate::romio::mach_ext(path) == ".gz" {
		GzDecoder::new(file)
			.read_to_string(&mut text)
			.map_err(|err| Error::path(err, path))?;
	} else {
		std::io::BufReader::new(file)
			.read_to_string(&mut text)
			.map_err(|err| Error::path(err, path))?;
	}

	check_root(&text)?;
	let document: DatDocument = quick_xml::de::from_str(&text)?;
	debug!(
		path = %path.display(),
		machines = document.machines.len() + document.games.len(),
		"parsed manifest"
	);

	if let Some(header) = &document.header {
		header_fn(header)?;
	}

	let filter: Vec<String> = mach_filter.iter().map(mach_name).collect();
	let mut remaining = filter.len();

	for mut machine in document.machines.into_iter().chain(document.games) {
		if !filter.is_empty() {
			if !filter.iter().any(|name| *name == machine.name) {
				continue;
			}
			remaining -= 1;
		}

		normalize_rom_names(&mut machine);
		mach_fn(machine)?;

		if !filter.is_empty() && remaining == 0 {
			break;
		}
	}

	Ok(())
}

/// Serialise one machine back to its manifest form.
pub fn machine_to_xml(machine: &Machine) -> Result<String> {
	quick_xml::se::to_string_with_root("machine", machine)
		.map_err(|err| Error::ManifestParse(err.to_string()))
}
