//! Raw on-disk layout assertions and damaged-file handling.

use std::io::Cursor;

use mzgf::{MzgfError, MzgfReader, MzgfWriter, UBLOCK_SIZE};
use tempfile::NamedTempFile;

/// Header fixed fields plus XLEN.
const HEADER_SIZE: usize = 12;
/// Size of the trailing end-of-file member.
const EOF_MEMBER_SIZE: usize = 42;

fn compress(data: &[u8]) -> Vec<u8> {
    let mut writer = MzgfWriter::with_mtime(1_400_000_000);
    let mut out = Vec::new();
    writer.deflate(&mut Cursor::new(data), &mut out).unwrap();
    out
}

fn open_err(bytes: &[u8]) -> MzgfError {
    let file = NamedTempFile::with_suffix(".mgz").unwrap();
    std::fs::write(file.path(), bytes).unwrap();
    MzgfReader::open(file.path()).unwrap_err()
}

fn u16_at(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn u32_at(bytes: &[u8], at: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(buf)
}

fn u64_at(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}

/// Offset of the end-of-file member's "BO" payload fields.
fn eof_member_at(bytes: &[u8]) -> usize {
    bytes.len() - EOF_MEMBER_SIZE
}

#[test]
fn test_opening_member_layout() {
    let compressed = compress(b"payload");

    // ID1 ID2 CM FLG, then MTIME, XFL=0, OS, XLEN=5
    assert_eq!(&compressed[..4], &[0x1F, 0x8B, 0x08, 0x04]);
    assert_eq!(u32_at(&compressed, 4), 1_400_000_000);
    assert_eq!(compressed[8], 0);
    assert_eq!(u16_at(&compressed, 10), 5);

    // "MZ" subfield: LEN=1, payload = version 1
    assert_eq!(&compressed[12..14], b"MZ");
    assert_eq!(u16_at(&compressed, 14), 1);
    assert_eq!(compressed[16], 1);
}

#[test]
fn test_eof_member_layout() {
    let data = vec![7u8; 1000];
    let compressed = compress(&data);

    let eof = eof_member_at(&compressed);
    assert_eq!(&compressed[eof..eof + 4], &[0x1F, 0x8B, 0x08, 0x04]);
    assert_eq!(u16_at(&compressed, eof + 10), 20); // XLEN
    assert_eq!(&compressed[eof + 12..eof + 14], b"BO");
    assert_eq!(u16_at(&compressed, eof + 14), 16); // LEN

    // payload: uncompressed size, then first index member offset
    assert_eq!(u64_at(&compressed, eof + 16), 1000);
    let first_bindex = u64_at(&compressed, eof + 24);
    assert!(first_bindex > 0 && first_bindex < compressed.len() as u64);

    // empty stored block and an all-zero trailer close the member
    assert_eq!(&compressed[eof + 32..eof + 34], &[0x03, 0x00]);
    assert_eq!(&compressed[eof + 34..], &[0u8; 8]);
}

#[test]
fn test_index_member_layout() {
    let data = vec![3u8; 2 * UBLOCK_SIZE + 50]; // three blocks
    let compressed = compress(&data);

    let eof = eof_member_at(&compressed);
    let first_bindex = u64_at(&compressed, eof + 24) as usize;

    assert_eq!(&compressed[first_bindex..first_bindex + 4], &[0x1F, 0x8B, 0x08, 0x04]);
    assert_eq!(&compressed[first_bindex + 12..first_bindex + 14], b"BI");

    // LEN covers the next-offset field plus three 16-byte entries
    let len = u16_at(&compressed, first_bindex + 14) as usize;
    assert_eq!(len, 8 + 3 * 16);
    let xlen = u16_at(&compressed, first_bindex + 10) as usize;
    assert_eq!(xlen, len + 4);

    // single index member, so the chain terminates immediately
    assert_eq!(u64_at(&compressed, first_bindex + 16), 0);

    // entries ascend from the data payload start
    let entries_at = first_bindex + 24;
    assert_eq!(u64_at(&compressed, entries_at), 17); // zoffset of block 0
    assert_eq!(u64_at(&compressed, entries_at + 8), 0);
    assert_eq!(u64_at(&compressed, entries_at + 24), UBLOCK_SIZE as u64);
    assert_eq!(u64_at(&compressed, entries_at + 40), 2 * UBLOCK_SIZE as u64);
}

#[test]
fn test_data_member_trailer() {
    let data: Vec<u8> = (0..100_000).map(|i| (i % 256) as u8).collect();
    let compressed = compress(&data);

    let eof = eof_member_at(&compressed);
    let first_bindex = u64_at(&compressed, eof + 24) as usize;

    // the data member's trailer sits immediately before the first index member
    let crc = u32_at(&compressed, first_bindex - 8);
    let isize = u32_at(&compressed, first_bindex - 4);
    assert_eq!(crc, crc32fast::hash(&data));
    assert_eq!(isize, data.len() as u32);
}

#[test]
fn test_corrupt_eof_subfield_id() {
    let mut compressed = compress(b"some data");
    let eof = eof_member_at(&compressed);
    compressed[eof + 13] = b'X'; // "BO" -> "BX"
    assert!(matches!(open_err(&compressed), MzgfError::BadFormat(_)));
}

#[test]
fn test_corrupt_opening_subfield_id() {
    let mut compressed = compress(b"some data");
    compressed[12] = b'X'; // "MZ" -> "XZ"
    assert!(matches!(open_err(&compressed), MzgfError::NotMzgzip));
}

#[test]
fn test_corrupt_magic() {
    let mut compressed = compress(b"some data");
    compressed[0] = 0x1E;
    assert!(matches!(open_err(&compressed), MzgfError::NotGzip));
}

#[test]
fn test_unknown_version() {
    let mut compressed = compress(b"some data");
    compressed[16] = 2; // "MZ" payload byte
    assert!(matches!(open_err(&compressed), MzgfError::BadVersion(2)));
}

#[test]
fn test_corrupt_index_subfield_id() {
    let mut compressed = compress(b"some data");
    let eof = eof_member_at(&compressed);
    let first_bindex = u64_at(&compressed, eof + 24) as usize;
    compressed[first_bindex + 12] = b'X'; // "BI" -> "XI"
    assert!(matches!(open_err(&compressed), MzgfError::BadFormat(_)));
}

#[test]
fn test_truncated_opening_header() {
    assert!(matches!(
        open_err(&[0x1F, 0x8B, 0x08, 0x04, 0x00]),
        MzgfError::TruncatedHeader
    ));
}

#[test]
fn test_header_without_fextra_flag() {
    let mut compressed = compress(b"some data");
    compressed[3] = 0;
    assert!(matches!(open_err(&compressed), MzgfError::BadFormat(_)));
}

#[test]
fn test_every_member_is_fextra_gzip() {
    // the data, index, and end-of-file members all start with a gzip header
    // that has the FEXTRA flag set
    let compressed = compress(&vec![9u8; UBLOCK_SIZE + 9]);

    let eof = eof_member_at(&compressed);
    let first_bindex = u64_at(&compressed, eof + 24) as usize;

    for at in [0, first_bindex, eof] {
        assert_eq!(&compressed[at..at + 4], &[0x1F, 0x8B, 0x08, 0x04], "member at {at}");
        let xlen = u16_at(&compressed, at + 10) as usize;
        assert!(xlen >= 5, "member at {at}");
        assert!(at + HEADER_SIZE + xlen <= compressed.len(), "member at {at}");
    }
}
