//! Shared fixture: a three-machine reference collection with deterministic
//! 4 KiB entries, written through the library's own writers, plus the
//! matching manifest.

#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};

use romarc::{digest_reader, romio, Crc32, DigestOptions, RomWriter, Sha1};

/// One generated entry.
pub struct TestRom {
	pub name: &'static str,
	pub data: Vec<u8>,
}

/// One generated machine.
pub struct TestMachine {
	pub name: &'static str,
	pub roms: Vec<TestRom>,
}

/// Deterministic pseudo-content, distinct per seed.
pub fn content(seed: u8, len: usize) -> Vec<u8> {
	let mut state = seed as u32 | 0x9e37;
	(0..len)
		.map(|_| {
			state = state.wrapping_mul(1664525).wrapping_add(1013904223);
			(state >> 16) as u8
		})
		.collect()
}

/// Digests of a byte slice.
pub fn digests_of(data: &[u8]) -> (Crc32, Sha1) {
	let mut rd = data;
	let digests = digest_reader(&mut rd, DigestOptions::default()).expect("digest");
	(digests.crc32, digests.sha1)
}

/// The three-machine reference set: machine1 holds rom_1 and rom_2,
/// machine2 holds rom_3 through rom_5, machine3 holds rom_6 through rom_9.
/// Every entry is 4096 bytes.
pub fn reference_set() -> Vec<TestMachine> {
	let names: [&[&'static str]; 3] = [
		&["rom_1.bin", "rom_2.bin"],
		&["rom_3.bin", "rom_4.bin", "rom_5.bin"],
		&["rom_6.bin", "rom_7.bin", "rom_8.bin", "rom_9.bin"],
	];

	let mut seed = 0u8;
	names
		.iter()
		.enumerate()
		.map(|(i, roms)| TestMachine {
			name: ["machine1", "machine2", "machine3"][i],
			roms: roms
				.iter()
				.map(|name| {
					seed += 1;
					TestRom {
						name,
						data: content(seed, 4096),
					}
				})
				.collect(),
		})
		.collect()
}

/// Write one machine through a library writer at the given container path
/// (shape from the extension; empty extension makes a directory).
pub fn write_machine(path: &Path, roms: &[(&str, &[u8])]) {
	let mut writer = romio::create_writer(path).expect("create writer");
	for (name, _) in roms {
		writer.create(name).expect("declare");
	}
	let mut position = writer.first();
	while let Some(index) = position {
		let payload = roms[index].1;
		let mut sink = writer.open(payload.len() as u64, None).expect("open");
		sink.write_all(payload).expect("write");
		sink.finish().expect("finish entry");
		position = writer.next();
	}
	writer.finish().expect("finish machine");
}

/// Write each machine of the set as `<name>.zip` under `dir`.
pub fn write_zip_collection(dir: &Path, machines: &[TestMachine]) {
	for machine in machines {
		let roms: Vec<(&str, &[u8])> = machine
			.roms
			.iter()
			.map(|rom| (rom.name, rom.data.as_slice()))
			.collect();
		write_machine(&dir.join(format!("{}.zip", machine.name)), &roms);
	}
}

/// Write the manifest for a set of machines, digests computed from the
/// actual content.
pub fn write_dat(path: &Path, name: &str, machines: &[TestMachine]) {
	let mut xml = String::new();
	xml.push_str("<?xml version=\"1.0\"?>\n<datafile>\n");
	xml.push_str(&format!(
		"  <header>\n    <name>{name}</name>\n    <description>{name}</description>\n  </header>\n"
	));
	for machine in machines {
		xml.push_str(&format!("  <machine name=\"{}\">\n", machine.name));
		for rom in &machine.roms {
			let (crc, sha1) = digests_of(&rom.data);
			xml.push_str(&format!(
				"    <rom name=\"{}\" size=\"{}\" crc=\"{crc}\" sha1=\"{sha1}\"/>\n",
				rom.name,
				rom.data.len(),
			));
		}
		xml.push_str("  </machine>\n");
	}
	xml.push_str("</datafile>\n");

	std::fs::write(path, xml).expect("write dat");
}

/// A scratch layout holding a manifest at `dats/set.dat` and the collection
/// under `roms/`.
pub struct Layout {
	pub root: tempfile::TempDir,
	pub dat: PathBuf,
	pub roms: PathBuf,
}

/// Build the standard layout for a set of machines, with every machine
/// written as a Zip.
pub fn zip_layout(machines: &[TestMachine]) -> Layout {
	let root = tempfile::tempdir().expect("tempdir");
	let dats = root.path().join("dats");
	let roms = root.path().join("roms");
	std::fs::create_dir_all(&dats).expect("mkdir dats");
	std::fs::create_dir_all(&roms).expect("mkdir roms");

	let dat = dats.join("set.dat");
	write_dat(&dat, "reference", machines);
	write_zip_collection(&roms, machines);

	Layout { root, dat, roms }
}

/// Parsed manifest machines, in manifest order.
pub fn parse_machines(dat: &Path) -> Vec<romarc::Machine> {
	let mut machines = Vec::new();
	romarc::parse_dat_file(dat, &[], |_| Ok(()), |machine| {
		machines.push(machine);
		Ok(())
	})
	.expect("parse dat");
	machines
}
