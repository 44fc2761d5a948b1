//! Single gzip member framing (RFC 1952).
//!
//! Every member written by this crate sets `FEXTRA` and carries exactly one
//! MZGF subfield in its extra region:
//!
//! | id     | member       | payload                                          |
//! |--------|--------------|--------------------------------------------------|
//! | `"MZ"` | opening data | one byte: format version                         |
//! | `"BI"` | index        | next index member offset, then `(z, u)` pairs    |
//! | `"BO"` | end-of-file  | uncompressed file size, first index member offset|
//!
//! Index and end-of-file members have an empty uncompressed payload encoded
//! as the two-byte stored final block `0x03 0x00`, so a standard gunzip of
//! the whole file yields exactly the original input.

use std::io::{self, Read, Write};

use crate::error::{MzgfError, Result};
use crate::format::MZGF_VERSION;

const GZIP_ID1: u8 = 0x1F;
const GZIP_ID2: u8 = 0x8B;
const GZIP_CM_DEFLATE: u8 = 8;
const GZIP_FLG_FEXTRA: u8 = 0x04;

#[cfg(windows)]
const GZIP_OS: u8 = 0;
#[cfg(target_os = "linux")]
const GZIP_OS: u8 = 3;
#[cfg(not(any(windows, target_os = "linux")))]
const GZIP_OS: u8 = 255;

/// Cap on the `FEXTRA` region; `XLEN` is a u16.
pub const GZIP_FEXTRA_MAX: usize = 0xFFFF;

/// Fixed portion of a member header: ID1 ID2 CM FLG MTIME XFL OS XLEN.
pub const HEADER_SIZE: usize = 12;

/// Member trailer: CRC32 then ISIZE.
pub const TRAILER_SIZE: usize = 8;

/// DEFLATE stream encoding zero uncompressed bytes (one final stored block).
pub const EMPTY_DEFLATE_BLOCK: [u8; 2] = [0x03, 0x00];

/// Subfield id marking a file as MZGF; only in the opening member.
pub const SUBFIELD_MZ: [u8; 2] = *b"MZ";
/// Subfield id of index members.
pub const SUBFIELD_BI: [u8; 2] = *b"BI";
/// Subfield id of the end-of-file member.
pub const SUBFIELD_BO: [u8; 2] = *b"BO";

/// Extra region of the opening member: the `"MZ"` subfield and its one-byte
/// version payload.
pub const MZ_EXTRA_LEN: usize = 5;

/// Extra region of the end-of-file member: the `"BO"` subfield and its
/// 16-byte payload.
pub const BO_EXTRA_LEN: usize = 20;

/// Total size of the end-of-file member. The size is constant, so the member
/// is located by seeking this many bytes back from end of file.
pub const EOF_MEMBER_SIZE: usize =
    HEADER_SIZE + BO_EXTRA_LEN + EMPTY_DEFLATE_BLOCK.len() + TRAILER_SIZE;

// Little-endian packers. The on-disk format is little-endian irrespective of
// host endianness; callers guarantee slice capacity.

pub(crate) fn pack_u16(buf: &mut [u8], value: u16) {
    buf[..2].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn pack_u32(buf: &mut [u8], value: u32) {
    buf[..4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn pack_u64(buf: &mut [u8], value: u64) {
    buf[..8].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn unpack_u16(buf: &[u8]) -> u16 {
    let mut bytes = [0u8; 2];
    bytes.copy_from_slice(&buf[..2]);
    u16::from_le_bytes(bytes)
}

pub(crate) fn unpack_u32(buf: &[u8]) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[..4]);
    u32::from_le_bytes(bytes)
}

pub(crate) fn unpack_u64(buf: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[..8]);
    u64::from_le_bytes(bytes)
}

/// Parsed fixed header plus the raw `FEXTRA` region of one member.
#[derive(Debug)]
pub(crate) struct MemberHeader {
    /// MTIME field; the reader records it but attaches no semantics.
    pub mtime: u32,
    /// The complete extra region, subfield headers included.
    pub extra: Vec<u8>,
}

/// Write a member header with `extra` as the `FEXTRA` region.
///
/// Returns the number of bytes written so the caller can advance its
/// compressed-stream cursor exactly.
pub(crate) fn write_header<W: Write>(dst: &mut W, mtime: u32, extra: &[u8]) -> Result<u64> {
    debug_assert!(extra.len() <= GZIP_FEXTRA_MAX);

    let mut header = [0u8; HEADER_SIZE];
    header[0] = GZIP_ID1;
    header[1] = GZIP_ID2;
    header[2] = GZIP_CM_DEFLATE;
    header[3] = GZIP_FLG_FEXTRA;
    pack_u32(&mut header[4..8], mtime);
    header[8] = 0; // XFL
    header[9] = GZIP_OS;
    pack_u16(&mut header[10..12], extra.len() as u16);

    dst.write_all(&header)?;
    dst.write_all(extra)?;
    Ok((HEADER_SIZE + extra.len()) as u64)
}

/// Write the 8-byte member trailer.
pub(crate) fn write_trailer<W: Write>(dst: &mut W, crc32: u32, isize: u32) -> Result<u64> {
    let mut trailer = [0u8; TRAILER_SIZE];
    pack_u32(&mut trailer[..4], crc32);
    pack_u32(&mut trailer[4..8], isize);
    dst.write_all(&trailer)?;
    Ok(TRAILER_SIZE as u64)
}

/// Write a complete member whose uncompressed payload is empty.
///
/// Index and end-of-file members are framed this way: all of their content
/// lives in the extra region, and the payload contributes zero bytes to a
/// standard gunzip of the file.
pub(crate) fn write_empty_member<W: Write>(dst: &mut W, mtime: u32, extra: &[u8]) -> Result<u64> {
    let mut written = write_header(dst, mtime, extra)?;
    dst.write_all(&EMPTY_DEFLATE_BLOCK)?;
    written += EMPTY_DEFLATE_BLOCK.len() as u64;
    written += write_trailer(dst, 0, 0)?;
    Ok(written)
}

/// Read and validate a member header, including its extra region.
///
/// The DEFLATE payload and trailer are left unread for the caller. `max_extra`
/// is the largest `XLEN` the caller is prepared to accept for this member.
pub(crate) fn read_header<R: Read>(src: &mut R, max_extra: usize) -> Result<MemberHeader> {
    let mut fixed = [0u8; HEADER_SIZE];
    read_exact_or_truncated(src, &mut fixed)?;

    if fixed[0] != GZIP_ID1 || fixed[1] != GZIP_ID2 || fixed[2] != GZIP_CM_DEFLATE {
        return Err(MzgfError::NotGzip);
    }
    if fixed[3] & GZIP_FLG_FEXTRA == 0 {
        return Err(MzgfError::BadFormat(
            "missing extra field(s) in gzip header".into(),
        ));
    }

    let mtime = unpack_u32(&fixed[4..8]);
    let xlen = unpack_u16(&fixed[10..12]) as usize;
    if xlen > max_extra {
        return Err(MzgfError::BadFormat(format!(
            "extra field length {xlen} exceeds expected {max_extra}"
        )));
    }

    let mut extra = vec![0u8; xlen];
    read_exact_or_truncated(src, &mut extra)?;
    Ok(MemberHeader { mtime, extra })
}

fn read_exact_or_truncated<R: Read>(src: &mut R, buf: &mut [u8]) -> Result<()> {
    match src.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(MzgfError::TruncatedHeader),
        Err(e) => Err(e.into()),
    }
}

/// Walk the `FEXTRA` region for the subfield with the given two-byte id and
/// return its payload. Both id bytes must match.
pub(crate) fn find_subfield<'a>(extra: &'a [u8], id: [u8; 2]) -> Option<&'a [u8]> {
    let mut pos = 0;
    while pos + 4 <= extra.len() {
        let len = unpack_u16(&extra[pos + 2..pos + 4]) as usize;
        let start = pos + 4;
        let end = start + len;
        if end > extra.len() {
            return None;
        }
        if extra[pos] == id[0] && extra[pos + 1] == id[1] {
            return Some(&extra[start..end]);
        }
        pos = end;
    }
    None
}

/// `FEXTRA` region of the opening member.
pub(crate) fn mz_extra() -> [u8; MZ_EXTRA_LEN] {
    [SUBFIELD_MZ[0], SUBFIELD_MZ[1], 1, 0, MZGF_VERSION]
}

/// `FEXTRA` region of the end-of-file member: total uncompressed size and
/// the compressed-stream offset of the first index member.
pub(crate) fn bo_extra(ufilesize: u64, first_bindex_offset: u64) -> [u8; BO_EXTRA_LEN] {
    let mut extra = [0u8; BO_EXTRA_LEN];
    extra[0] = SUBFIELD_BO[0];
    extra[1] = SUBFIELD_BO[1];
    pack_u16(&mut extra[2..4], 16);
    pack_u64(&mut extra[4..12], ufilesize);
    pack_u64(&mut extra[12..20], first_bindex_offset);
    extra
}
