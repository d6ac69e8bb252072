//! Classifying machines against their manifest declarations.
//!
//! A validate pass opens each declared machine by name, obtains per-entry
//! digests through the database cache, and classifies every declared entry
//! as OK, corrupt, renamed, or missing; container entries no declaration
//! consumed are extras. A size-only fast path skips digesting entirely at
//! the cost of not being able to recognise renames.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::cancel::StopToken;
use crate::checksum::Sha1;
use crate::dat::{parse_dat_file, DatHeader, Machine};
use crate::error::{Error, Result};
use crate::romdb::RomDb;
use crate::romio::{self, Format, RomReader as _};

/// Classification of one declared entry.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum RomStatus {
	/// Not yet classified (also used for extras in reports).
	#[default]
	Unknown,
	/// Present under its declared name with the declared digest.
	Ok,
	/// Present under its declared name with a different digest.
	Corrupt,
	/// Absent, and no present entry carries the declared digest.
	Missing,
	/// The declared digest is present under a different name.
	BadName,
}

/// Two-way map between entry names and digests for one container.
#[derive(Debug, Default)]
pub struct ChecksumMap {
	to_sum: HashMap<String, Sha1>,
	to_name: HashMap<Sha1, String>,
}

impl ChecksumMap {
	/// An empty map.
	pub fn new() -> Self {
		Self::default()
	}

	/// Record one entry.
	pub fn add(&mut self, name: &str, sum: Sha1) {
		self.to_sum.insert(name.to_owned(), sum);
		self.to_name.insert(sum, name.to_owned());
	}

	/// Remove one entry by both keys.
	pub fn remove(&mut self, name: &str, sum: Sha1) {
		self.to_sum.remove(name);
		self.to_name.remove(&sum);
	}

	/// Digest recorded for a name.
	pub fn by_name(&self, name: &str) -> Option<Sha1> {
		self.to_sum.get(name).copied()
	}

	/// Name recorded for a digest.
	pub fn by_sum(&self, sum: Sha1) -> Option<String> {
		self.to_name.get(&sum).cloned()
	}

	/// Names still in the map, sorted.
	pub fn names(&self) -> Vec<String> {
		let mut names: Vec<String> = self.to_sum.keys().cloned().collect();
		names.sort();
		names
	}
}

/// Result of validating one machine that was found on disk.
#[derive(Clone, Debug)]
pub struct Validation {
	/// Container path the machine was bound to.
	pub path: PathBuf,
	/// Container shape.
	pub format: Format,
	/// Status of each declared entry, parallel to `machine.roms`.
	pub statuses: Vec<RomStatus>,
	/// Declared name to the actual on-disk name, for renamed entries.
	pub bad_names: HashMap<String, String>,
	/// Container entries no declared entry consumed, sorted.
	pub extras: Vec<String>,
}

impl Validation {
	/// All entries OK and nothing extra.
	pub fn is_clean(&self) -> bool {
		self.extras.is_empty() && self.statuses.iter().all(|s| *s == RomStatus::Ok)
	}

	/// How many declared entries hold each status.
	pub fn count(&self, status: RomStatus) -> usize {
		self.statuses.iter().filter(|s| **s == status).count()
	}
}

/// Validate the presence, digest, and name of each declared entry of a
/// machine rooted in `db`'s directory.
///
/// Returns `Ok(None)` when no container for the machine exists, in which
/// case every declared entry is missing.
pub fn validate_checksums(machine: &Machine, db: &RomDb) -> Result<Option<Validation>> {
	let Some(mut reader) = romio::open_reader_by_name(db.dir().join(&machine.name))? else {
		return Ok(None);
	};

	let mut map = ChecksumMap::new();
	db.checksum_container(reader.as_mut(), |name, sum| {
		map.add(name, sum);
		Ok(())
	})?;

	let mut statuses = vec![RomStatus::Unknown; machine.roms.len()];
	let mut bad_names = HashMap::new();

	for (i, rom) in machine.roms.iter().enumerate() {
		if let Some(sum) = map.by_name(&rom.name) {
			statuses[i] = if sum == rom.sha1 {
				RomStatus::Ok
			} else {
				RomStatus::Corrupt
			};
			map.remove(&rom.name, sum);
		} else if let Some(actual) = map.by_sum(rom.sha1) {
			statuses[i] = RomStatus::BadName;
			map.remove(&actual, rom.sha1);
			bad_names.insert(rom.name.clone(), actual);
		} else {
			statuses[i] = RomStatus::Missing;
		}
	}

	Ok(Some(Validation {
		path: reader.path().to_path_buf(),
		format: reader.format(),
		statuses,
		bad_names,
		extras: map.names(),
	}))
}

/// Validate presence and size only.
///
/// Much faster than [`validate_checksums`] but not authoritative: corrupt
/// entries of the right size pass, and renamed entries show up as a
/// missing/extra pair because no digests are computed.
pub fn validate_sizes(machine: &Machine, dir: &Path) -> Result<Option<Validation>> {
	let Some(reader) = romio::open_reader_by_name(dir.join(&machine.name))? else {
		return Ok(None);
	};

	let index: HashMap<&str, usize> = machine
		.roms
		.iter()
		.enumerate()
		.map(|(i, rom)| (rom.name.as_str(), i))
		.collect();

	let mut statuses = vec![RomStatus::Unknown; machine.roms.len()];
	let mut extras = Vec::new();

	for file in reader.files() {
		match index.get(file.name.as_str()) {
			Some(&i) => {
				statuses[i] = if file.size == machine.roms[i].size {
					RomStatus::Ok
				} else {
					RomStatus::Corrupt
				};
			}
			None => extras.push(file.name.clone()),
		}
	}

	for status in &mut statuses {
		if *status == RomStatus::Unknown {
			*status = RomStatus::Missing;
		}
	}
	extras.sort();

	Ok(Some(Validation {
		path: reader.path().to_path_buf(),
		format: reader.format(),
		statuses,
		bad_names: HashMap::new(),
		extras,
	}))
}

/// Options for a whole-manifest check.
#[derive(Clone, Debug)]
pub struct CheckOptions {
	/// Worker pool size; zero means the CPU count.
	pub parallelism: usize,
	/// Compare sizes only, skipping all digest work.
	pub size_only: bool,
	/// Skip recognised cartridge headers when digesting.
	pub skip_header: bool,
}

impl Default for CheckOptions {
	fn default() -> Self {
		Self {
			parallelism: 0,
			size_only: false,
			skip_header: false,
		}
	}
}

/// One machine's outcome within a [`CheckReport`].
#[derive(Debug)]
pub struct MachineCheck {
	/// The declared machine.
	pub machine: Machine,
	/// Validation outcome; `Ok(None)` means the container is missing
	/// entirely, and `Err` that this machine could not be examined.
	pub result: Result<Option<Validation>>,
}

impl MachineCheck {
	/// All entries OK and nothing extra.
	pub fn is_clean(&self) -> bool {
		matches!(&self.result, Ok(Some(validation)) if validation.is_clean())
	}
}

/// Outcome of checking a whole manifest.
#[derive(Debug, Default)]
pub struct CheckReport {
	/// Manifest header, when present.
	pub header: Option<DatHeader>,
	/// Per-machine outcomes, in manifest order.
	pub machines: Vec<MachineCheck>,
	/// Top-level container paths no manifest machine claims, sorted.
	pub extras: Vec<String>,
}

impl CheckReport {
	/// Every machine clean and no extra containers.
	pub fn is_clean(&self) -> bool {
		self.extras.is_empty() && self.machines.iter().all(MachineCheck::is_clean)
	}

	/// Machines that are not clean.
	pub fn failed(&self) -> usize {
		self.machines.iter().filter(|m| !m.is_clean()).count()
	}

	/// Error summarising the run for a non-clean report.
	pub fn into_result(self) -> Result<Self> {
		if self.is_clean() {
			Ok(self)
		} else {
			Err(Error::Validation {
				failed: self.failed() + self.extras.len(),
				total: self.machines.len(),
			})
		}
	}
}

/// Check every machine a manifest declares against the collection in `dir`.
///
/// Machines are validated on a worker pool bounded by
/// [`parallelism`](CheckOptions::parallelism), but outcomes are reported
/// (and returned) in manifest order: each new job beyond the limit first
/// drains the oldest outstanding result. `each` observes every outcome as
/// it is drained.
pub fn check_dat(
	dat_file: impl AsRef<Path>,
	dir: impl AsRef<Path>,
	mach_filter: &[String],
	options: &CheckOptions,
	stop: &StopToken,
	mut each: impl FnMut(&MachineCheck),
) -> Result<CheckReport> {
	let dir = dir.as_ref();
	let limit = if options.parallelism == 0 {
		num_cpus::get()
	} else {
		options.parallelism
	};

	let db = if options.size_only {
		None
	} else {
		Some(RomDb::open(dir, options.skip_header)?)
	};

	let mut report = CheckReport::default();
	let mut machines = Vec::new();
	parse_dat_file(
		&dat_file,
		mach_filter,
		|header| {
			report.header = Some(header.clone());
			Ok(())
		},
		|machine| {
			machines.push(machine);
			Ok(())
		},
	)?;
	debug!(machines = machines.len(), "checking manifest");

	std::thread::scope(|scope| -> Result<()> {
		let db = db.as_ref();
		let mut pending: VecDeque<crossbeam_channel::Receiver<MachineCheck>> = VecDeque::new();

		let mut drain_one =
			|pending: &mut VecDeque<crossbeam_channel::Receiver<MachineCheck>>,
			 report: &mut CheckReport| {
				if let Some(rx) = pending.pop_front() {
					if let Ok(check) = rx.recv() {
						each(&check);
						report.machines.push(check);
					}
				}
			};

		for machine in machines.drain(..) {
			if stop.is_stopped() {
				break;
			}
			if pending.len() == limit {
				drain_one(&mut pending, &mut report);
			}

			let (tx, rx) = crossbeam_channel::bounded::<MachineCheck>(1);
			pending.push_back(rx);
			scope.spawn(move || {
				let result = match db {
					Some(db) => validate_checksums(&machine, db),
					None => validate_sizes(&machine, dir),
				};
				let _ = tx.send(MachineCheck { machine, result });
			});
		}

		while !pending.is_empty() {
			drain_one(&mut pending, &mut report);
		}
		Ok(())
	})?;

	stop.check()?;

	// Containers in the collection that no declared machine accounts for.
	if mach_filter.is_empty() {
		let claimed: std::collections::HashSet<String> = report
			.machines
			.iter()
			.map(|check| check.machine.name.clone())
			.collect();

		let mut entries: Vec<String> = std::fs::read_dir(dir)
			.map_err(|err| Error::path(err, dir))?
			.filter_map(|entry| entry.ok())
			.map(|entry| entry.file_name().to_string_lossy().into_owned())
			.filter(|name| !name.starts_with('.'))
			.collect();
		entries.sort();

		for name in entries {
			if !claimed.contains(&romio::mach_name(&name)) {
				report.extras.push(name);
			}
		}
	}

	Ok(report)
}
