//! Repairing machines from auxiliary source trees.
//!
//! A fix pass validates each declared machine, then rebuilds every machine
//! that is not clean: entries that are already correct (or merely misnamed)
//! are copied from the existing container, and everything else is located
//! by digest through the reverse index of one or more source databases. The
//! rebuilt machine is written to a fresh temporary container and only swapped
//! into place after it closes cleanly; the displaced original goes to a
//! sibling `.trash/` directory, so repairs are reversible by hand.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::cancel::StopToken;
use crate::dat::{parse_dat_file, Machine};
use crate::error::{Error, Result};
use crate::romdb::RomDb;
use crate::romio::{self, Format, RomWriter as _};
use crate::validate::{validate_checksums, RomStatus};

/// Name of the trash directory, a sibling of the machines it preserves.
pub const TRASH_DIR: &str = ".trash";

/// Options for a fix run.
#[derive(Clone, Debug, Default)]
pub struct FixOptions {
	/// Copy-job pool size; zero means the CPU count.
	pub parallelism: usize,
	/// Trust the databases as they stand instead of rescanning each
	/// directory first.
	pub skip_scan: bool,
	/// Build absent machines as directories instead of Zips.
	pub create_dir: bool,
	/// Skip recognised cartridge headers when digesting.
	pub skip_header: bool,
	/// Move containers no manifest machine claims into the trash.
	pub trash_extras: bool,
}

/// Counters for a fix run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FixStats {
	/// Machines that were already clean.
	pub ok: usize,
	/// Machines rebuilt successfully.
	pub fixed: usize,
	/// Machines that could not be rebuilt.
	pub failed: usize,
	/// Unclaimed containers moved to the trash.
	pub extra: usize,
	/// Machines examined.
	pub total: usize,
}

impl FixStats {
	/// Did every machine end up clean?
	pub fn is_clean(&self) -> bool {
		self.failed == 0
	}
}

/// Progress notifications from a fix run.
#[derive(Debug)]
pub enum FixEvent<'a> {
	/// A source directory is about to be scanned into its database.
	ScanDir {
		/// The directory.
		dir: &'a Path,
	},
	/// A machine validated clean and is left untouched.
	MachineOk {
		/// The machine.
		machine: &'a Machine,
		/// Its container path.
		path: &'a Path,
	},
	/// A machine is about to be rebuilt.
	MachineFixing {
		/// The machine.
		machine: &'a Machine,
		/// The container path being rebuilt.
		path: &'a Path,
	},
	/// Validation failed outright; the machine is rebuilt from sources.
	MachineError {
		/// The machine.
		machine: &'a Machine,
		/// What went wrong.
		error: &'a Error,
	},
	/// A declared entry is carried over unchanged.
	RomOk {
		/// Entry name.
		name: &'a str,
	},
	/// A declared entry is renamed from a misnamed original.
	RomRename {
		/// Declared name.
		name: &'a str,
		/// Name it currently has.
		from: &'a str,
	},
	/// A declared entry is fetched from a source container.
	RomCopy {
		/// Entry name.
		name: &'a str,
		/// Source container path.
		source: &'a Path,
	},
	/// No source holds the declared digest.
	RomNotFound {
		/// Entry name.
		name: &'a str,
	},
	/// The machine cannot be rebuilt.
	MachineFailed {
		/// The machine.
		machine: &'a Machine,
	},
	/// A copy job failed; the original is untouched.
	CopyError {
		/// Container path that was being rebuilt.
		path: &'a Path,
		/// What went wrong.
		error: &'a Error,
	},
	/// An unclaimed container was moved to the trash.
	MachineExtra {
		/// The container path.
		path: &'a str,
	},
}

/// One planned entry copy.
#[derive(Clone, Debug)]
struct CopySpec {
	dst_name: String,
	src_name: String,
	src_path: PathBuf,
}

/// Outcome of one copy job.
struct JobOutcome {
	/// Final container path.
	target: PathBuf,
	/// Paths to displace into the trash before the rename.
	displaced: Vec<PathBuf>,
	/// The temporary container, when one was created.
	tmp: Option<PathBuf>,
	result: Result<()>,
}

/// Build a machine into a fresh temporary container in `dir`.
///
/// Returns the temporary's path (when one was created) so the caller can
/// discard it on error.
fn copy_machine(
	dir: &Path,
	is_dir: bool,
	roms: &[CopySpec],
	stop: &StopToken,
) -> (Option<PathBuf>, Result<()>) {
	let mut writer = match romio::create_writer_temp(dir, is_dir) {
		Ok(writer) => writer,
		Err(err) => return (None, Err(err)),
	};
	let tmp = writer.path().to_path_buf();

	let mut run = || -> Result<()> {
		for rom in roms {
			writer.create(&rom.dst_name)?;
		}

		let mut position = writer.first();
		while let Some(index) = position {
			stop.check()?;

			let rom = &roms[index];
			let mut reader = romio::open_reader(&rom.src_path)?.ok_or_else(|| {
				Error::path(
					std::io::Error::from(std::io::ErrorKind::NotFound),
					&rom.src_path,
				)
			})?;
			romio::copy_rom(writer.as_mut(), &rom.dst_name, reader.as_mut(), &rom.src_name)?;

			position = writer.next();
		}

		writer.finish()
	};

	let result = run();
	(Some(tmp), result)
}

/// Fix a collection in `dir` against a manifest, pulling replacement
/// content from `dir` itself and then from each of `source_dirs` in order.
///
/// Copy jobs run on a worker pool bounded by
/// [`parallelism`](FixOptions::parallelism); results are consumed in
/// manifest order. Failures are isolated per machine: a failed job leaves
/// the original container untouched and the run continues.
pub fn fix_dat(
	dat_file: impl AsRef<Path>,
	dir: impl AsRef<Path>,
	source_dirs: &[PathBuf],
	mach_filter: &[String],
	options: &FixOptions,
	stop: &StopToken,
	mut event: impl FnMut(FixEvent<'_>),
) -> Result<FixStats> {
	let dir = dir.as_ref();
	let limit = if options.parallelism == 0 {
		num_cpus::get()
	} else {
		options.parallelism
	};

	// The collection's own database comes first: content already in place
	// wins over the sources.
	let mut dbs = Vec::with_capacity(1 + source_dirs.len());
	dbs.push(RomDb::open(dir, options.skip_header)?);
	for source in source_dirs {
		dbs.push(RomDb::open(source, options.skip_header)?);
	}

	if !options.skip_scan {
		for db in &dbs {
			event(FixEvent::ScanDir { dir: db.dir() });
			db.scan(limit, stop, |mach_path, err| {
				if let Some(err) = err {
					warn!(machine = %mach_path, %err, "scan failed");
				}
			})?;
		}
	}

	let mut stats = FixStats::default();
	let mut rename_list: Vec<JobOutcome> = Vec::new();
	let mut claimed: Vec<String> = Vec::new();

	std::thread::scope(|scope| -> Result<()> {
		let mut pending: VecDeque<crossbeam_channel::Receiver<JobOutcome>> = VecDeque::new();

		fn drain_one(
			pending: &mut VecDeque<crossbeam_channel::Receiver<JobOutcome>>,
			rename_list: &mut Vec<JobOutcome>,
			stats: &mut FixStats,
			event: &mut dyn FnMut(FixEvent<'_>),
		) {
			let Some(rx) = pending.pop_front() else {
				return;
			};
			let Ok(outcome) = rx.recv() else {
				return;
			};

			match &outcome.result {
				Ok(()) => {
					stats.fixed += 1;
					rename_list.push(outcome);
				}
				Err(error) => {
					stats.failed += 1;
					event(FixEvent::CopyError {
						path: &outcome.target,
						error,
					});
					if let Some(tmp) = &outcome.tmp {
						if tmp.is_dir() {
							let _ = std::fs::remove_dir_all(tmp);
						} else {
							let _ = std::fs::remove_file(tmp);
						}
					}
				}
			}
		}

		let parsed = parse_dat_file(
			&dat_file,
			mach_filter,
			|_header| Ok(()),
			|machine| {
				stop.check()?;
				stats.total += 1;
				claimed.push(machine.name.clone());

				let validation = match validate_checksums(&machine, &dbs[0]) {
					Ok(validation) => validation,
					Err(err) if err.is_stopped() => return Err(err),
					Err(err) => {
						event(FixEvent::MachineError {
							machine: &machine,
							error: &err,
						});
						None
					}
				};

				if let Some(validation) = &validation {
					if validation.is_clean() {
						stats.ok += 1;
						event(FixEvent::MachineOk {
							machine: &machine,
							path: &validation.path,
						});
						return Ok(());
					}
				}

				// A directory machine is rebuilt as a directory; anything
				// else, including an absent machine (unless configured
				// otherwise), becomes a Zip.
				let is_dir = match &validation {
					Some(validation) => validation.format == Format::Dir,
					None => options.create_dir,
				};
				let target = match &validation {
					Some(validation) if validation.format == Format::Dir => {
						validation.path.clone()
					}
					_ => {
						let suffix = if is_dir { "" } else { ".zip" };
						dir.join(format!("{}{suffix}", machine.name))
					}
				};
				event(FixEvent::MachineFixing {
					machine: &machine,
					path: &target,
				});

				// Plan: keep what the existing container already has.
				let statuses = match &validation {
					Some(validation) => validation.statuses.clone(),
					None => vec![RomStatus::Missing; machine.roms.len()],
				};
				let mut roms = Vec::with_capacity(machine.roms.len());
				if let Some(validation) = &validation {
					for (rom, status) in machine.roms.iter().zip(&statuses) {
						match status {
							RomStatus::Ok => {
								event(FixEvent::RomOk { name: &rom.name });
								roms.push(CopySpec {
									dst_name: rom.name.clone(),
									src_name: rom.name.clone(),
									src_path: validation.path.clone(),
								});
							}
							RomStatus::BadName => {
								// UNWRAP: BadName always records the actual name.
								#[allow(clippy::unwrap_used)]
								let actual = validation.bad_names.get(&rom.name).unwrap();
								event(FixEvent::RomRename {
									name: &rom.name,
									from: actual,
								});
								roms.push(CopySpec {
									dst_name: rom.name.clone(),
									src_name: actual.clone(),
									src_path: validation.path.clone(),
								});
							}
							_ => {}
						}
					}
				}

				// Resolve the rest by digest across the source databases.
				let mut failed = false;
				for (rom, status) in machine.roms.iter().zip(&statuses) {
					if !matches!(
						status,
						RomStatus::Unknown | RomStatus::Corrupt | RomStatus::Missing
					) {
						continue;
					}

					let mut found = None;
					for db in &dbs {
						if let Some(entry) = db.lookup(rom.sha1)? {
							found = Some((db.dir().join(&entry.mach_path), entry.rom_path));
							break;
						}
					}

					match found {
						Some((src_path, src_name)) => {
							event(FixEvent::RomCopy {
								name: &rom.name,
								source: &src_path,
							});
							roms.push(CopySpec {
								dst_name: rom.name.clone(),
								src_name,
								src_path,
							});
						}
						None => {
							event(FixEvent::RomNotFound { name: &rom.name });
							failed = true;
							break;
						}
					}
				}

				if failed {
					stats.failed += 1;
					event(FixEvent::MachineFailed { machine: &machine });
					return Ok(());
				}

				// Displace the old container (and anything sitting at the
				// target) before the temporary moves in.
				let mut displaced = Vec::new();
				if let Some(validation) = &validation {
					displaced.push(validation.path.clone());
				}
				if !displaced.contains(&target) {
					displaced.push(target.clone());
				}

				if pending.len() == limit {
					drain_one(&mut pending, &mut rename_list, &mut stats, &mut event);
				}

				let (tx, rx) = crossbeam_channel::bounded::<JobOutcome>(1);
				pending.push_back(rx);
				let stop = stop.clone();
				scope.spawn(move || {
					let (tmp, result) = copy_machine(dir, is_dir, &roms, &stop);
					let _ = tx.send(JobOutcome {
						target,
						displaced,
						tmp,
						result,
					});
				});

				Ok(())
			},
		);

		// Outstanding jobs are always drained, even on an early error, so
		// that failed or abandoned temporaries are cleaned up.
		while !pending.is_empty() {
			drain_one(&mut pending, &mut rename_list, &mut stats, &mut event);
		}
		parsed
	})?;

	if stop.is_stopped() {
		// Cancelled: discard finished temporaries too. Nothing has been
		// renamed yet, so the collection itself is untouched.
		for outcome in &rename_list {
			if let Some(tmp) = &outcome.tmp {
				if tmp.is_dir() {
					let _ = std::fs::remove_dir_all(tmp);
				} else {
					let _ = std::fs::remove_file(tmp);
				}
			}
		}
		return Err(Error::Stopped);
	}

	// Swap phase: displace originals into the trash, then move each
	// temporary into its machine path.
	if !rename_list.is_empty() {
		info!(machines = rename_list.len(), "renaming temporary containers");
		let trash = dir.join(TRASH_DIR);
		std::fs::create_dir_all(&trash).map_err(|err| Error::path(err, &trash))?;

		for outcome in &rename_list {
			for old in &outcome.displaced {
				if !old.exists() {
					continue;
				}
				let doomed = trash.join(old.file_name().unwrap_or(old.as_os_str()));
				debug!(from = %old.display(), to = %doomed.display(), "trashing");
				if let Err(err) = std::fs::rename(old, &doomed) {
					warn!(path = %old.display(), %err, "trash failed");
				}
			}

			// UNWRAP: successful jobs always created a temporary.
			#[allow(clippy::unwrap_used)]
			let tmp = outcome.tmp.as_ref().unwrap();
			if let Err(err) = std::fs::rename(tmp, &outcome.target) {
				warn!(
					from = %tmp.display(),
					to = %outcome.target.display(),
					%err,
					"rename failed"
				);
			}
		}
	}

	// Optionally sweep containers no machine claims.
	if options.trash_extras && mach_filter.is_empty() {
		let trash = dir.join(TRASH_DIR);
		std::fs::create_dir_all(&trash).map_err(|err| Error::path(err, &trash))?;

		let claimed: std::collections::HashSet<&str> =
			claimed.iter().map(String::as_str).collect();
		let mut entries: Vec<String> = std::fs::read_dir(dir)
			.map_err(|err| Error::path(err, dir))?
			.filter_map(|entry| entry.ok())
			.map(|entry| entry.file_name().to_string_lossy().into_owned())
			.filter(|name| !name.starts_with('.'))
			.collect();
		entries.sort();

		for name in entries {
			if !claimed.contains(romio::mach_name(&name).as_str()) {
				stats.extra += 1;
				event(FixEvent::MachineExtra { path: &name });
				if let Err(err) = std::fs::rename(dir.join(&name), trash.join(&name)) {
					warn!(path = %name, %err, "trash failed");
				}
			}
		}
	}

	Ok(stats)
}
