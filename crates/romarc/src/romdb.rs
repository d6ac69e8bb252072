//! The on-disk digest database.
//!
//! A `.gorom.db` file inside a collection directory memoises the SHA-1 of
//! every entry of every machine under it, keyed by
//! `machine path || NUL || entry name`, with a reverse table from digest back
//! to that key for content-addressed retrieval. Rows carry the entry's
//! modification time; a row whose stored time no longer matches the on-disk
//! one (to millisecond precision, tolerating cross-filesystem rounding) is
//! stale and gets rehashed.
//!
//! Containers and directories invalidate differently: a Zip or archive is
//! treated as a unit, since the container's own modification time stands in
//! for every entry, while a directory machine refreshes entries one by one.
//! The forward and reverse tables are only ever updated inside one
//! transaction; a reverse hit whose forward row disagrees is deleted on
//! sight by [`RomDb::lookup`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use minicbor::{Decode, Encode};
use redb::{Database, ReadableTable, TableDefinition};
use tracing::{debug, trace, warn};

use crate::cancel::StopToken;
use crate::checksum::{digest_reader, DigestOptions, Sha1};
use crate::error::{Error, Result};
use crate::romio::{self, Format, RomFile, RomReader};

/// Database file name, stored inside the directory it describes.
pub const DB_FILE: &str = ".gorom.db";

/// How long to retry acquiring the database lock before giving up.
const OPEN_TIMEOUT: Duration = Duration::from_secs(3);

/// Forward table: `mach_path \0 entry_name` to encoded [`RomDbEntry`].
const ROM_TABLE: TableDefinition<'_, &[u8], &[u8]> = TableDefinition::new("rom");

/// Reverse table: SHA-1 digest to forward key.
const CHECKSUM_TABLE: TableDefinition<'_, &[u8], &[u8]> = TableDefinition::new("checksum");

/// One forward row.
#[derive(Clone, Debug, Encode, Decode)]
pub struct RomDbEntry {
	/// Relative on-disk path of the machine container.
	#[n(0)]
	pub mach_path: String,

	/// Entry name within the machine.
	#[n(1)]
	pub rom_path: String,

	/// Entry modification time, milliseconds since the epoch.
	#[n(2)]
	pub mod_time_ms: i64,

	/// SHA-1 of the entry contents.
	#[n(3)]
	pub sha1: Sha1,
}

/// Digest database over one collection directory.
pub struct RomDb {
	dir: PathBuf,
	db: Database,
	skip_header: bool,
}

impl std::fmt::Debug for RomDb {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RomDb")
			.field("dir", &self.dir)
			.field("skip_header", &self.skip_header)
			.finish()
	}
}

/// Modification time rounded to milliseconds since the epoch.
fn round_millis(time: Option<SystemTime>) -> i64 {
	time.and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
		.map(|d| {
			let nanos = d.as_nanos();
			((nanos + 500_000) / 1_000_000) as i64
		})
		.unwrap_or(0)
}

fn rom_key(mach_path: &str, rom_path: &str) -> Vec<u8> {
	let mut key = Vec::with_capacity(mach_path.len() + 1 + rom_path.len());
	key.extend_from_slice(mach_path.as_bytes());
	key.push(0);
	key.extend_from_slice(rom_path.as_bytes());
	key
}

impl RomDb {
	/// Open (or create) the database for a collection directory.
	///
	/// `skip_header` controls whether recognised cartridge headers are
	/// skipped when entries are hashed; it applies to every row this
	/// handle writes. The lock is retried for up to three seconds so that
	/// short-lived sibling processes don't fail a run.
	pub fn open(dir: impl Into<PathBuf>, skip_header: bool) -> Result<Self> {
		let dir = dir.into();
		let path = dir.join(DB_FILE);

		let start = Instant::now();
		let db = loop {
			match Database::create(&path) {
				Ok(db) => break db,
				Err(err) if start.elapsed() < OPEN_TIMEOUT => {
					trace!(path = %path.display(), %err, "database locked, retrying");
					std::thread::sleep(Duration::from_millis(50));
				}
				Err(err) => {
					return Err(Error::Db(format!("{}: {err}", path.display())));
				}
			}
		};

		// Make sure both tables exist so every later transaction can open
		// them unconditionally.
		let tx = db.begin_write()?;
		{
			tx.open_table(ROM_TABLE)?;
			tx.open_table(CHECKSUM_TABLE)?;
		}
		tx.commit()?;

		Ok(Self {
			dir,
			db,
			skip_header,
		})
	}

	/// The collection directory this database describes.
	pub fn dir(&self) -> &Path {
		&self.dir
	}

	/// Insert rows for a machine's entries, digests in entry order. The
	/// forward row and its reverse entry are written in one transaction;
	/// a pre-existing row's old reverse entry is removed first.
	fn add_files(&self, mach_path: &str, files: &[RomFile], sums: &[Sha1]) -> Result<()> {
		let tx = self.db.begin_write()?;
		{
			let mut rom = tx.open_table(ROM_TABLE)?;
			let mut checksum = tx.open_table(CHECKSUM_TABLE)?;

			for (file, sum) in files.iter().zip(sums) {
				let key = rom_key(mach_path, &file.name);

				// Retire the reverse entry of whatever this row replaces.
				let old_sum = rom.get(key.as_slice())?.and_then(|row| {
					minicbor::decode::<RomDbEntry>(row.value())
						.ok()
						.map(|entry| entry.sha1)
				});
				if let Some(old_sum) = old_sum {
					checksum.remove(old_sum.as_ref())?;
				}

				let entry = RomDbEntry {
					mach_path: mach_path.to_owned(),
					rom_path: file.name.clone(),
					mod_time_ms: round_millis(file.mod_time),
					sha1: *sum,
				};
				let value = minicbor::to_vec(&entry)
					.map_err(|err| Error::Db(format!("encode row: {err}")))?;
				rom.insert(key.as_slice(), value.as_slice())?;
				checksum.insert(sum.as_ref(), key.as_slice())?;
			}
		}
		tx.commit()?;
		Ok(())
	}

	/// Delete every row (and reverse entry) belonging to a machine.
	pub fn delete_all_for(&self, mach_path: &str) -> Result<()> {
		let mut prefix = mach_path.as_bytes().to_vec();
		prefix.push(0);

		let tx = self.db.begin_write()?;
		{
			let mut rom = tx.open_table(ROM_TABLE)?;
			let mut checksum = tx.open_table(CHECKSUM_TABLE)?;

			let mut doomed = Vec::new();
			for item in rom.iter()? {
				let (key, value) = item?;
				if key.value().starts_with(&prefix) {
					let sum = minicbor::decode::<RomDbEntry>(value.value())
						.ok()
						.map(|entry| entry.sha1);
					doomed.push((key.value().to_vec(), sum));
				}
			}

			for (key, sum) in doomed {
				rom.remove(key.as_slice())?;
				if let Some(sum) = sum {
					checksum.remove(sum.as_ref())?;
				}
			}
		}
		tx.commit()?;
		Ok(())
	}

	/// Stored digest for one entry, if present and fresh.
	fn fresh_row(
		rom: &impl ReadableTable<&'static [u8], &'static [u8]>,
		mach_path: &str,
		file: &RomFile,
	) -> Result<Option<Sha1>> {
		let key = rom_key(mach_path, &file.name);
		let Some(row) = rom.get(key.as_slice())? else {
			return Ok(None);
		};
		let Ok(entry) = minicbor::decode::<RomDbEntry>(row.value()) else {
			return Ok(None);
		};
		if entry.mod_time_ms == round_millis(file.mod_time) {
			Ok(Some(entry.sha1))
		} else {
			Ok(None)
		}
	}

	fn digest_entry(&self, reader: &mut dyn RomReader, name: &str) -> Result<Sha1> {
		let mut rc = reader.open(name)?;
		let digests = digest_reader(
			&mut rc,
			DigestOptions {
				skip_header: self.skip_header,
				no_crc32: true,
				no_sha1: false,
			},
		)?;
		Ok(digests.sha1)
	}

	/// Produce the SHA-1 of every entry in an open machine, through the
	/// cache.
	///
	/// Zip and archive machines are treated as a unit: one stale or
	/// missing row purges and rehashes the whole machine. Directory
	/// machines refresh entries independently. `each` is called once per
	/// entry in enumeration order; an error from it aborts the operation.
	pub fn checksum_container(
		&self,
		reader: &mut dyn RomReader,
		mut each: impl FnMut(&str, Sha1) -> Result<()>,
	) -> Result<()> {
		let mach_path = reader
			.path()
			.file_name()
			.map(|name| name.to_string_lossy().into_owned())
			.unwrap_or_default();
		let per_entry = reader.format() == Format::Dir;

		// Read pass: collect fresh digests without touching the payloads.
		let mut sums: Vec<Option<Sha1>> = {
			let tx = self.db.begin_read()?;
			let rom = tx.open_table(ROM_TABLE)?;
			reader
				.files()
				.iter()
				.map(|file| Self::fresh_row(&rom, &mach_path, file))
				.collect::<Result<_>>()?
		};

		if per_entry {
			// Rehash only the stale entries.
			let files = reader.files().to_vec();
			let mut added_files = Vec::new();
			let mut added_sums = Vec::new();
			for (i, file) in files.iter().enumerate() {
				if sums[i].is_none() {
					let sum = self.digest_entry(reader, &file.name)?;
					trace!(machine = %mach_path, entry = %file.name, %sum, "hashed");
					sums[i] = Some(sum);
					added_files.push(file.clone());
					added_sums.push(sum);
				}
			}
			if !added_files.is_empty() {
				self.add_files(&mach_path, &added_files, &added_sums)?;
			}
		} else if sums.iter().any(Option::is_none) {
			// One stale entry invalidates the container: purge and rehash
			// everything.
			debug!(machine = %mach_path, "container stale, rehashing");
			self.delete_all_for(&mach_path)?;

			let files = reader.files().to_vec();
			let mut fresh = Vec::with_capacity(files.len());
			for (i, file) in files.iter().enumerate() {
				let sum = self.digest_entry(reader, &file.name)?;
				trace!(machine = %mach_path, entry = %file.name, %sum, "hashed");
				sums[i] = Some(sum);
				fresh.push(sum);
			}
			self.add_files(&mach_path, &files, &fresh)?;
		}

		for (file, sum) in reader.files().iter().zip(sums) {
			// UNWRAP: every slot was filled above.
			#[allow(clippy::unwrap_used)]
			each(&file.name, sum.unwrap())?;
		}

		Ok(())
	}

	/// Resolve a digest to its forward row.
	///
	/// Self-healing: a reverse entry pointing at a forward row with a
	/// different digest is deleted and reported as absent.
	pub fn lookup(&self, sum: Sha1) -> Result<Option<RomDbEntry>> {
		let row = {
			let tx = self.db.begin_read()?;
			let checksum = tx.open_table(CHECKSUM_TABLE)?;
			let Some(key) = checksum.get(sum.as_ref())? else {
				return Ok(None);
			};
			let key = key.value().to_vec();

			let rom = tx.open_table(ROM_TABLE)?;
			rom.get(key.as_slice())?
				.map(|row| minicbor::decode::<RomDbEntry>(row.value()))
		};

		let entry = match row {
			None => None,
			Some(Ok(entry)) => Some(entry),
			Some(Err(err)) => {
				warn!(%sum, %err, "undecodable forward row, dropping reverse entry");
				None
			}
		};

		match entry {
			Some(entry) if entry.sha1 == sum => Ok(Some(entry)),
			_ => {
				// The forward row disagrees (or is gone): the reverse
				// entry is lying and gets deleted.
				let tx = self.db.begin_write()?;
				{
					let mut checksum = tx.open_table(CHECKSUM_TABLE)?;
					checksum.remove(sum.as_ref())?;
				}
				tx.commit()?;
				Ok(None)
			}
		}
	}

	/// Walk every forward row.
	pub fn dump(&self, mut f: impl FnMut(&RomDbEntry)) -> Result<()> {
		let tx = self.db.begin_read()?;
		let rom = tx.open_table(ROM_TABLE)?;
		for item in rom.iter()? {
			let (_key, value) = item?;
			match minicbor::decode::<RomDbEntry>(value.value()) {
				Ok(entry) => f(&entry),
				Err(err) => warn!(%err, "undecodable forward row"),
			}
		}
		Ok(())
	}

	/// Refresh the database against the collection directory.
	///
	/// Every top-level, dot-skipped child that looks like a machine
	/// container is opened and passed through
	/// [`checksum_container`](Self::checksum_container), across up to
	/// `parallelism` worker threads. Once all workers drain, rows that no
	/// surviving entry touched are deleted along with their reverse
	/// entries. `scan_fn` is told about each machine as its worker
	/// finishes.
	pub fn scan(
		&self,
		parallelism: usize,
		stop: &StopToken,
		mut scan_fn: impl FnMut(&str, Option<&Error>),
	) -> Result<()> {
		let parallelism = if parallelism == 0 {
			num_cpus::get()
		} else {
			parallelism
		};

		let mut names: Vec<String> = std::fs::read_dir(&self.dir)
			.map_err(|err| Error::path(err, &self.dir))?
			.filter_map(|entry| entry.ok())
			.map(|entry| entry.file_name().to_string_lossy().into_owned())
			.filter(|name| !name.starts_with('.'))
			.filter(|name| romio::is_rom_reader(name))
			.collect();
		names.sort();

		let (job_tx, job_rx) = crossbeam_channel::unbounded::<String>();
		let (result_tx, result_rx) =
			crossbeam_channel::unbounded::<(String, Result<HashSet<Vec<u8>>>)>();
		for name in &names {
			// UNWRAP: the channel cannot disconnect while both ends live.
			#[allow(clippy::unwrap_used)]
			job_tx.send(name.clone()).unwrap();
		}
		drop(job_tx);

		let mut touched: HashSet<Vec<u8>> = HashSet::new();
		std::thread::scope(|scope| {
			for _ in 0..parallelism.min(names.len()) {
				let job_rx = job_rx.clone();
				let result_tx = result_tx.clone();
				let stop = stop.clone();
				scope.spawn(move || {
					for name in job_rx.iter() {
						let outcome = self.scan_one(&name, &stop);
						if result_tx.send((name, outcome)).is_err() {
							break;
						}
					}
				});
			}
			drop(result_tx);

			for (name, outcome) in result_rx.iter() {
				match outcome {
					Ok(keys) => {
						scan_fn(&name, None);
						touched.extend(keys);
					}
					Err(err) => scan_fn(&name, Some(&err)),
				}
			}
		});

		stop.check()?;

		// Sweep rows no surviving entry touched.
		let tx = self.db.begin_write()?;
		{
			let mut rom = tx.open_table(ROM_TABLE)?;
			let mut checksum = tx.open_table(CHECKSUM_TABLE)?;

			let mut doomed = Vec::new();
			for item in rom.iter()? {
				let (key, value) = item?;
				if !touched.contains(key.value()) {
					let sum = minicbor::decode::<RomDbEntry>(value.value())
						.ok()
						.map(|entry| entry.sha1);
					doomed.push((key.value().to_vec(), sum));
				}
			}

			for (key, sum) in doomed {
				debug!(key = %String::from_utf8_lossy(&key), "sweeping stale row");
				rom.remove(key.as_slice())?;
				if let Some(sum) = sum {
					checksum.remove(sum.as_ref())?;
				}
			}
		}
		tx.commit()?;

		Ok(())
	}

	fn scan_one(&self, name: &str, stop: &StopToken) -> Result<HashSet<Vec<u8>>> {
		stop.check()?;

		let mut keys = HashSet::new();
		let Some(mut reader) = romio::open_reader(self.dir.join(name))? else {
			return Ok(keys);
		};

		self.checksum_container(reader.as_mut(), |_, _| stop.check())?;
		for file in reader.files() {
			keys.insert(rom_key(name, &file.name));
		}

		Ok(keys)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn mod_time_rounding_tolerates_sub_millisecond_jitter() {
		let base = SystemTime::UNIX_EPOCH + Duration::from_millis(1_700_000);
		let jittered = base + Duration::from_nanos(400_000);
		assert_eq!(round_millis(Some(base)), round_millis(Some(jittered)));
		assert_eq!(round_millis(Some(base)), 1_700_000);
		assert_eq!(round_millis(None), 0);
	}

	#[test]
	fn rom_key_is_nul_separated() {
		assert_eq!(rom_key("m.zip", "a/b.bin"), b"m.zip\0a/b.bin".to_vec());
	}
}
