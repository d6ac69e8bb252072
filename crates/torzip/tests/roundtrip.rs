//! End-to-end properties of the encoder: re-readability with a conventional
//! Zip reader, recognition via the comment gate, and reproducibility.

use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use tempfile::TempDir;
use torzip::{is_torzip, Writer};

/// Deterministic pseudo-content so every test run writes the same bytes.
fn content(seed: u8, len: usize) -> Vec<u8> {
	let mut state = seed as u32 | 0x9e37;
	(0..len)
		.map(|_| {
			state = state.wrapping_mul(1664525).wrapping_add(1013904223);
			(state >> 16) as u8
		})
		.collect()
}

fn encode(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
	let mut tzw = Writer::new(Cursor::new(Vec::new()));
	for (name, _) in entries {
		tzw.create(name).expect("create");
	}

	let mut position = tzw.first();
	while let Some(index) = position {
		let payload = &entries[index].1;
		let mut entry = tzw.open(payload.len() as u64).expect("open");
		entry.write_all(payload).expect("write");
		entry.finish().expect("finish entry");
		position = tzw.next();
	}

	tzw.finish().expect("finish writer").into_inner()
}

fn machine1() -> Vec<(&'static str, Vec<u8>)> {
	vec![
		("rom_1.bin", content(1, 4096)),
		("rom_2.bin", content(2, 4096)),
	]
}

#[test]
fn zip_reader_round_trip() {
	let entries = machine1();
	let bytes = encode(&entries);

	let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).expect("open archive");
	assert_eq!(archive.len(), 2);

	for (name, payload) in &entries {
		let mut entry = archive.by_name(name).expect("entry by name");
		assert_eq!(entry.size(), payload.len() as u64);

		let mut read_back = Vec::new();
		entry.read_to_end(&mut read_back).expect("read entry");
		assert_eq!(&read_back, payload);

		let mut crc = crc32fast::Hasher::new();
		crc.update(payload);
		assert_eq!(entry.crc32(), crc.finalize());
	}
}

#[test]
fn encoder_output_is_recognised() {
	let dir = TempDir::new().expect("tempdir");
	let path = dir.path().join("machine1.zip");

	let mut tzw = Writer::new(std::fs::File::create(&path).expect("create file"));
	let entries = machine1();
	for (name, _) in &entries {
		tzw.create(name).expect("create");
	}
	let mut position = tzw.first();
	while let Some(index) = position {
		let payload = &entries[index].1;
		let mut entry = tzw.open(payload.len() as u64).expect("open");
		entry.write_all(payload).expect("write");
		entry.finish().expect("finish entry");
		position = tzw.next();
	}
	tzw.finish().expect("finish writer");

	assert!(is_torzip(&path).expect("check"));
}

#[test]
fn reproducible_across_invocations_and_order() {
	let entries = machine1();
	let mut reversed = entries.clone();
	reversed.reverse();

	let first = encode(&entries);
	let second = encode(&entries);
	let third = encode(&reversed);

	assert_eq!(first, second);
	assert_eq!(first, third);
}

#[test]
fn plain_zip_is_not_torzip() {
	let dir = TempDir::new().expect("tempdir");
	let path = dir.path().join("plain.zip");

	let file = std::fs::File::create(&path).expect("create file");
	let mut plain = zip::ZipWriter::new(file);
	plain
		.start_file("rom_1.bin", zip::write::FileOptions::default())
		.expect("start entry");
	plain.write_all(&content(1, 4096)).expect("write entry");
	plain.finish().expect("finish zip");

	assert!(!is_torzip(&path).expect("check"));
}

#[test]
fn bad_comment_digest_is_not_torzip() {
	let dir = TempDir::new().expect("tempdir");
	let path = dir.path().join("tampered.zip");

	std::fs::write(&path, encode(&machine1())).expect("write archive");
	assert!(is_torzip(&path).expect("check"));

	// Corrupt one hex digit of the advertised digest. The prefix still
	// matches, so only the CRC comparison can reject the file.
	let mut file = std::fs::OpenOptions::new()
		.read(true)
		.write(true)
		.open(&path)
		.expect("reopen");
	file.seek(SeekFrom::End(-1)).expect("seek");
	let mut last = [0u8; 1];
	file.read_exact(&mut last).expect("read digit");
	last[0] = if last[0] == b'0' { b'1' } else { b'0' };
	file.seek(SeekFrom::End(-1)).expect("seek back");
	file.write_all(&last).expect("write digit");

	assert!(!is_torzip(&path).expect("check"));
}

#[test]
fn zip64_locator_path_is_followed() {
	use deku::DekuContainerWrite;
	use torzip::format::{EndCentralDir, EndCentralDir64, EndCentralDir64Locator};
	use torzip::{COMMENT_LENGTH, U32_MAX};

	// Synthesize the tail of an archive whose classic EOCD carries the
	// Zip64 sentinels, forcing the check through the locator. The central
	// directory stands in as opaque bytes; only its CRC matters here.
	let cd: Vec<u8> = (0u8..46).collect();
	let mut crc = crc32fast::Hasher::new();
	crc.update(&cd);
	let cd_crc = crc.finalize();

	let mut file = cd.clone();
	let eocd64_offset = file.len() as u64;
	file.extend(
		EndCentralDir64::build(1, cd.len() as u64, 0)
			.to_bytes()
			.expect("eocd64"),
	);
	file.extend(
		EndCentralDir64Locator::build(eocd64_offset)
			.to_bytes()
			.expect("locator"),
	);
	let mut eocd = EndCentralDir::build(1, cd.len() as u64, 0, cd_crc);
	eocd.cd_size = U32_MAX as u32;
	eocd.cd_offset = U32_MAX as u32;
	assert_eq!(eocd.comment.len(), COMMENT_LENGTH);
	file.extend(eocd.to_bytes().expect("eocd"));

	let dir = TempDir::new().expect("tempdir");
	let path = dir.path().join("wide.zip");
	std::fs::write(&path, &file).expect("write archive");
	assert!(is_torzip(&path).expect("check"));

	// A wrong digest still fails through the same path.
	let mut eocd = EndCentralDir::build(1, cd.len() as u64, 0, cd_crc ^ 1);
	eocd.cd_size = U32_MAX as u32;
	eocd.cd_offset = U32_MAX as u32;
	let tail = file.len() - eocd.to_bytes().expect("eocd").len();
	file.truncate(tail);
	file.extend(eocd.to_bytes().expect("eocd"));
	std::fs::write(&path, &file).expect("rewrite archive");
	assert!(!is_torzip(&path).expect("check"));
}

#[test]
fn truncated_file_is_not_torzip() {
	let dir = TempDir::new().expect("tempdir");
	let path = dir.path().join("short.zip");
	std::fs::write(&path, b"PK").expect("write stub");

	assert!(!is_torzip(&path).expect("check"));
}
