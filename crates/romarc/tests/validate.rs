//! Validate-pass scenarios: clean collections, corruption, renames,
//! missing machines, extras, and the size-only fast path.

mod common;

use common::{content, reference_set, write_machine, zip_layout};
use romarc::{
	check_dat, validate_checksums, validate_sizes, CheckOptions, RomDb, RomStatus, StopToken,
};

#[test]
fn clean_zip_collection_is_all_ok() {
	let machines = reference_set();
	let layout = zip_layout(&machines);

	let report = check_dat(
		&layout.dat,
		&layout.roms,
		&[],
		&CheckOptions::default(),
		&StopToken::new(),
		|_| {},
	)
	.expect("check");

	assert_eq!(report.machines.len(), 3);
	assert!(report.extras.is_empty());
	assert!(report.is_clean());
	assert_eq!(report.header.as_ref().expect("header").name, "reference");

	// Reporting follows manifest order regardless of completion order.
	let names: Vec<&str> = report
		.machines
		.iter()
		.map(|check| check.machine.name.as_str())
		.collect();
	assert_eq!(names, vec!["machine1", "machine2", "machine3"]);

	for check in &report.machines {
		let validation = check
			.result
			.as_ref()
			.expect("validated")
			.as_ref()
			.expect("bound");
		assert!(validation.extras.is_empty());
		assert!(validation.statuses.iter().all(|s| *s == RomStatus::Ok));
	}
}

#[test]
fn corrupt_entry_is_detected_exactly() {
	let machines = reference_set();
	let layout = zip_layout(&machines);

	// Rebuild machine2 with one entry's content altered by a single byte.
	let machine2 = &machines[1];
	let mut corrupted: Vec<(&str, Vec<u8>)> = machine2
		.roms
		.iter()
		.map(|rom| (rom.name, rom.data.clone()))
		.collect();
	corrupted[1].1[100] ^= 0x01;
	let roms: Vec<(&str, &[u8])> = corrupted
		.iter()
		.map(|(name, data)| (*name, data.as_slice()))
		.collect();
	write_machine(&layout.roms.join("machine2.zip"), &roms);

	let report = check_dat(
		&layout.dat,
		&layout.roms,
		&[],
		&CheckOptions::default(),
		&StopToken::new(),
		|_| {},
	)
	.expect("check");

	assert!(!report.is_clean());
	assert_eq!(report.failed(), 1);

	let check = &report.machines[1];
	assert_eq!(check.machine.name, "machine2");
	let validation = check
		.result
		.as_ref()
		.expect("validated")
		.as_ref()
		.expect("bound");
	assert_eq!(
		validation.statuses,
		vec![RomStatus::Ok, RomStatus::Corrupt, RomStatus::Ok]
	);
	assert!(validation.extras.is_empty());

	// The aggregate maps onto a nonzero exit.
	assert!(report.into_result().is_err());
}

#[test]
fn renamed_entries_classify_as_bad_names() {
	let machines = reference_set();
	let layout = zip_layout(&machines);

	// Same bytes as machine1, entries renamed.
	let machine1 = &machines[0];
	write_machine(
		&layout.roms.join("machine1.zip"),
		&[
			("A.BIN", machine1.roms[0].data.as_slice()),
			("B.BIN", machine1.roms[1].data.as_slice()),
		],
	);

	let parsed = common::parse_machines(&layout.dat);
	let db = RomDb::open(&layout.roms, false).expect("open db");
	let validation = validate_checksums(&parsed[0], &db)
		.expect("validate")
		.expect("bound");

	assert_eq!(
		validation.statuses,
		vec![RomStatus::BadName, RomStatus::BadName]
	);
	assert_eq!(
		validation.bad_names.get("rom_1.bin").map(String::as_str),
		Some("A.BIN")
	);
	assert_eq!(
		validation.bad_names.get("rom_2.bin").map(String::as_str),
		Some("B.BIN")
	);
	assert!(validation.extras.is_empty());
	assert!(!validation.is_clean());
}

#[test]
fn missing_machine_and_extra_container() {
	let machines = reference_set();
	let layout = zip_layout(&machines);

	std::fs::remove_file(layout.roms.join("machine3.zip")).expect("remove");
	write_machine(
		&layout.roms.join("stranger.zip"),
		&[("odd.bin", content(99, 128).as_slice())],
	);

	let report = check_dat(
		&layout.dat,
		&layout.roms,
		&[],
		&CheckOptions::default(),
		&StopToken::new(),
		|_| {},
	)
	.expect("check");

	assert!(!report.is_clean());
	assert!(report.machines[2].result.as_ref().expect("ran").is_none());
	assert_eq!(report.extras, vec!["stranger.zip".to_owned()]);
}

#[test]
fn extra_entries_inside_a_machine() {
	let machines = reference_set();
	let layout = zip_layout(&machines);

	let machine1 = &machines[0];
	let spare = content(77, 256);
	write_machine(
		&layout.roms.join("machine1.zip"),
		&[
			("rom_1.bin", machine1.roms[0].data.as_slice()),
			("rom_2.bin", machine1.roms[1].data.as_slice()),
			("leftover.bin", spare.as_slice()),
		],
	);

	let parsed = common::parse_machines(&layout.dat);
	let db = RomDb::open(&layout.roms, false).expect("open db");
	let validation = validate_checksums(&parsed[0], &db)
		.expect("validate")
		.expect("bound");

	assert!(validation.statuses.iter().all(|s| *s == RomStatus::Ok));
	assert_eq!(validation.extras, vec!["leftover.bin".to_owned()]);
	assert!(!validation.is_clean());
}

#[test]
fn size_only_fast_path() {
	let machines = reference_set();
	let layout = zip_layout(&machines);

	// Corrupt one entry, keeping its size: invisible to the fast path.
	let machine1 = &machines[0];
	let mut altered = machine1.roms[0].data.clone();
	altered[0] ^= 0xff;
	// Truncate the other: caught by the fast path.
	let short = &machine1.roms[1].data[..1000];
	write_machine(
		&layout.roms.join("machine1.zip"),
		&[("rom_1.bin", altered.as_slice()), ("rom_2.bin", short)],
	);

	let parsed = common::parse_machines(&layout.dat);
	let validation = validate_sizes(&parsed[0], &layout.roms)
		.expect("validate")
		.expect("bound");

	assert_eq!(
		validation.statuses,
		vec![RomStatus::Ok, RomStatus::Corrupt]
	);
	assert!(validation.bad_names.is_empty());
}

#[test]
fn directory_machines_validate_like_zips() {
	let machines = reference_set();
	let layout = zip_layout(&machines);

	// Replace machine1.zip with an equivalent directory tree.
	std::fs::remove_file(layout.roms.join("machine1.zip")).expect("remove");
	let machine1 = &machines[0];
	let roms: Vec<(&str, &[u8])> = machine1
		.roms
		.iter()
		.map(|rom| (rom.name, rom.data.as_slice()))
		.collect();
	write_machine(&layout.roms.join("machine1"), &roms);

	let report = check_dat(
		&layout.dat,
		&layout.roms,
		&[],
		&CheckOptions::default(),
		&StopToken::new(),
		|_| {},
	)
	.expect("check");

	assert!(report.is_clean(), "directory machine should validate clean");
	let validation = report.machines[0]
		.result
		.as_ref()
		.expect("validated")
		.as_ref()
		.expect("bound");
	assert_eq!(validation.format, romarc::Format::Dir);
}

#[test]
fn machine_filter_checks_only_named_machines() {
	let machines = reference_set();
	let layout = zip_layout(&machines);
	std::fs::remove_file(layout.roms.join("machine3.zip")).expect("remove");

	let report = check_dat(
		&layout.dat,
		&layout.roms,
		&["machine1".to_owned()],
		&CheckOptions::default(),
		&StopToken::new(),
		|_| {},
	)
	.expect("check");

	// machine3 is broken but unexamined; the filter limits scope.
	assert_eq!(report.machines.len(), 1);
	assert_eq!(report.machines[0].machine.name, "machine1");
	assert!(report.is_clean());
}
