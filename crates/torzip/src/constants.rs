//! Signatures, record lengths, and the fixed field values that make the
//! output reproducible.

/// Minimum Zip version needed to extract a plain DEFLATE entry.
pub const ZIP_VERSION: u16 = 20;

/// Minimum Zip version needed when any Zip64 field is present.
pub const ZIP64_VERSION: u16 = 45;

/// Local file header signature (`PK\x03\x04`).
pub const LOCAL_FILE_SIG: u32 = 0x04034b50;

/// Central directory header signature (`PK\x01\x02`).
pub const CENTRAL_DIR_SIG: u32 = 0x02014b50;

/// Zip64 end of central directory signature (`PK\x06\x06`).
pub const END_CENTRAL_DIR64_SIG: u32 = 0x06064b50;

/// Zip64 end of central directory locator signature (`PK\x06\x07`).
pub const END_CENTRAL_DIR64_LOC_SIG: u32 = 0x07064b50;

/// End of central directory signature (`PK\x05\x06`).
pub const END_CENTRAL_DIR_SIG: u32 = 0x06054b50;

/// Length of a local file header without name or extra field.
pub const LOCAL_FILE_LEN: usize = 30;

/// Length of a central directory header without name or extra field.
pub const CENTRAL_DIR_LEN: usize = 46;

/// Length of the Zip64 end of central directory record.
pub const END_CENTRAL_DIR64_LEN: usize = 56;

/// Length of the Zip64 end of central directory locator.
pub const END_CENTRAL_DIR64_LOC_LEN: usize = 20;

/// Length of the end of central directory record without comment.
pub const END_CENTRAL_DIR_LEN: usize = 22;

/// Header ID of the Zip64 extended information extra field.
pub const EXTRA_FIELD_ID: u16 = 1;

/// Length of the Zip64 extra field in a local header (both sizes).
pub const EXTRA_FIELD_LEN: usize = 20;

/// General purpose flag: bit 1 set, advertising maximum compression.
pub const GENERAL_PURPOSE_FLAG: u16 = 2;

/// Compression method 8: DEFLATE.
pub const COMPRESSION_METHOD: u16 = 8;

/// Fixed DOS modification time (11:32 PM).
pub const LAST_MOD_TIME: u16 = 48128;

/// Fixed DOS modification date (1996-12-24).
pub const LAST_MOD_DATE: u16 = 8600;

/// Version made by 0: FAT/FAT32 attributes.
pub const VERSION_MADE_BY: u16 = 0;

/// The fixed comment is `TORRENTZIPPED-XXXXXXXX`, 22 bytes.
pub const COMMENT_LENGTH: usize = 22;

/// Comment prefix preceding the central directory CRC.
pub const COMMENT_PREFIX: &[u8; 14] = b"TORRENTZIPPED-";

/// Threshold above which a 16-bit record count moves to Zip64.
pub const U16_MAX: u64 = 0xffff;

/// Threshold above which a 32-bit size or offset moves to Zip64.
pub const U32_MAX: u64 = 0xffff_ffff;

/// Size of the buffer between the compressor and the sink.
pub(crate) const BUFFER_SIZE: usize = 1024 * 1024;
