//! MZGF reader: sequential reads and random access over the blocked
//! container.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use flate2::{Decompress, FlushDecompress, Status};
use log::debug;

use crate::error::{MzgfError, Result};
use crate::format::member;
use crate::format::{BlockIndexEntry, VirtualOffset, MAX_BLOCK_SIZE, MZGF_VERSION, UBLOCK_SIZE};

/// Random-access MZGF decompressor.
///
/// [`MzgfReader::open`] validates the opening member, parses the end-of-file
/// member, and materializes the whole block index up front. Reads then
/// inflate one indexed block at a time into an internal buffer; every
/// indexed offset is a full-flush boundary, so a fresh inflater is valid at
/// each block start and seeks never need to rewind a compression state.
///
/// The cursor is a pair of the current index entry and an offset into that
/// block's uncompressed payload; [`MzgfReader::vtell`] exposes it as a
/// [`VirtualOffset`].
#[derive(Debug)]
pub struct MzgfReader {
    file: File,
    version: u8,
    mtime: u32,
    ufilesize: u64,
    zfilesize: u64,
    /// One past the last byte of the data member's DEFLATE payload.
    data_end: u64,
    bindex: Vec<BlockIndexEntry>,

    /// Index entry the cursor is in.
    cur: usize,
    /// Offset into the current block's uncompressed payload.
    boffset: u64,
    /// Length of the loaded block; meaningful only while `loaded`.
    blen: u64,
    loaded: bool,
    is_eof: bool,

    ublock: Vec<u8>,
    zblock: Vec<u8>,
}

impl MzgfReader {
    /// Open a finalized MZGF file for reading.
    ///
    /// # Errors
    ///
    /// [`MzgfError::NotGzip`] if the file is not gzip at all,
    /// [`MzgfError::NotMzgzip`] if the opening member lacks the `"MZ"`
    /// subfield, [`MzgfError::BadVersion`] for an unknown version byte, and
    /// [`MzgfError::BadFormat`] for a damaged end-of-file member or index
    /// chain.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)?;

        let opening = member::read_header(&mut file, member::MZ_EXTRA_LEN)?;
        let mz = member::find_subfield(&opening.extra, member::SUBFIELD_MZ)
            .filter(|payload| payload.len() == 1)
            .ok_or(MzgfError::NotMzgzip)?;
        let version = mz[0];
        if version != MZGF_VERSION {
            return Err(MzgfError::BadVersion(version));
        }
        let data_start = (member::HEADER_SIZE + opening.extra.len()) as u64;

        let (ufilesize, first_bindex_offset) = read_eof_member(&mut file)?;
        if first_bindex_offset <= data_start + member::TRAILER_SIZE as u64 {
            return Err(MzgfError::BadFormat(format!(
                "block index offset {first_bindex_offset} out of range"
            )));
        }
        let bindex = read_bindex(&mut file, first_bindex_offset)?;
        let zfilesize = file.metadata()?.len();
        let data_end = first_bindex_offset - member::TRAILER_SIZE as u64;

        debug!(
            "opened: version={version} ufilesize={ufilesize} zfilesize={zfilesize} \
             blocks={}",
            bindex.len()
        );

        // leave the handle at the first byte of the data member's payload
        file.seek(SeekFrom::Start(data_start))?;

        Ok(MzgfReader {
            file,
            version,
            mtime: opening.mtime,
            ufilesize,
            zfilesize,
            data_end,
            bindex,
            cur: 0,
            boffset: 0,
            blen: 0,
            loaded: false,
            is_eof: false,
            ublock: vec![0u8; UBLOCK_SIZE],
            zblock: vec![0u8; MAX_BLOCK_SIZE],
        })
    }

    /// MZGF format version of the open file.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// MTIME recorded in the opening member header, seconds since the epoch.
    pub fn mtime(&self) -> u32 {
        self.mtime
    }

    /// Total uncompressed byte count, from the end-of-file member.
    pub fn ufilesize(&self) -> u64 {
        self.ufilesize
    }

    /// Size of the compressed file on disk.
    pub fn zfilesize(&self) -> u64 {
        self.zfilesize
    }

    /// The materialized block index, ordered by uncompressed offset.
    pub fn bindex(&self) -> &[BlockIndexEntry] {
        &self.bindex
    }

    /// True once a read has observed the end of the uncompressed stream.
    /// Cleared by any seek.
    pub fn eof(&self) -> bool {
        self.is_eof
    }

    /// Current position of the underlying compressed stream.
    pub fn tell(&mut self) -> Result<u64> {
        Ok(self.file.stream_position()?)
    }

    /// Copy up to `buf.len()` decompressed bytes at the cursor.
    ///
    /// Returns the number of bytes copied; `Ok(0)` only at end of stream,
    /// after which further reads keep returning `Ok(0)` without advancing.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.is_eof || buf.is_empty() {
            return Ok(0);
        }

        let mut copied = 0;
        while copied < buf.len() {
            // Move the cursor onto the block that actually holds it; a seek
            // may have parked it past the current block's end.
            while self.boffset >= self.block_usize(self.cur) && self.cur + 1 < self.bindex.len() {
                self.boffset -= self.block_usize(self.cur);
                self.cur += 1;
                self.loaded = false;
            }
            if self.boffset >= self.block_usize(self.cur) {
                self.is_eof = true;
                break;
            }
            if !self.loaded {
                self.read_block()?;
            }

            let avail = (self.blen - self.boffset) as usize;
            let have = avail.min(buf.len() - copied);
            let at = self.boffset as usize;
            buf[copied..copied + have].copy_from_slice(&self.ublock[at..at + have]);
            self.boffset += have as u64;
            copied += have;

            if self.boffset >= self.blen && self.cur + 1 == self.bindex.len() {
                // drained the final block
                self.is_eof = true;
                break;
            }
        }
        Ok(copied)
    }

    /// Virtual offset of the read cursor.
    pub fn vtell(&self) -> VirtualOffset {
        VirtualOffset::new(self.bindex[self.cur].zoffset, self.boffset)
    }

    /// Position the cursor at a virtual offset previously returned by
    /// [`MzgfReader::vtell`] or derived from the index.
    ///
    /// Returns [`MzgfError::InvalidOffset`] when the compressed half of the
    /// offset is not an indexed block boundary.
    pub fn vseek(&mut self, voffset: VirtualOffset) -> Result<()> {
        let zoffset = voffset.zoffset();
        let boffset = voffset.boffset();

        if self.bindex[self.cur].zoffset == zoffset {
            self.boffset = boffset;
            self.is_eof = false;
            return Ok(());
        }

        let cur = self
            .bindex
            .binary_search_by_key(&zoffset, |entry| entry.zoffset)
            .map_err(|_| MzgfError::InvalidOffset(voffset.as_raw()))?;
        debug!("vseek to block {cur} zoffset={zoffset} boffset={boffset}");
        self.cur = cur;
        self.boffset = boffset;
        self.blen = 0;
        self.loaded = false;
        self.is_eof = false;
        Ok(())
    }

    /// Position the cursor at an offset into the uncompressed stream by way
    /// of the block index.
    pub fn useek(&mut self, uoffset: u64) -> Result<()> {
        // greatest entry with uoffset <= target
        let cur = match self
            .bindex
            .binary_search_by_key(&uoffset, |entry| entry.uoffset)
        {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let boffset = uoffset - self.bindex[cur].uoffset;
        debug!("useek {uoffset} -> block {cur} boffset={boffset}");

        if cur == self.cur {
            self.boffset = boffset;
            self.is_eof = false;
            return Ok(());
        }
        self.cur = cur;
        self.boffset = boffset;
        self.blen = 0;
        self.loaded = false;
        self.is_eof = false;
        Ok(())
    }

    /// Uncompressed size of block `i`.
    fn block_usize(&self, i: usize) -> u64 {
        let start = self.bindex[i].uoffset;
        let end = if i + 1 < self.bindex.len() {
            self.bindex[i + 1].uoffset
        } else {
            self.ufilesize
        };
        end.saturating_sub(start)
    }

    /// Compressed extent of block `i`.
    fn block_zextent(&self, i: usize) -> (u64, u64) {
        let start = self.bindex[i].zoffset;
        let end = if i + 1 < self.bindex.len() {
            self.bindex[i + 1].zoffset
        } else {
            self.data_end
        };
        (start, end)
    }

    /// Load block `cur`: read its compressed extent and inflate it into the
    /// block buffer with a fresh inflater.
    fn read_block(&mut self) -> Result<()> {
        let (zstart, zend) = self.block_zextent(self.cur);
        if zend <= zstart || zend - zstart > MAX_BLOCK_SIZE as u64 {
            return Err(MzgfError::BadFormat(format!(
                "implausible block extent {zstart}..{zend}"
            )));
        }
        let zsize = (zend - zstart) as usize;
        let expected = self.block_usize(self.cur) as usize;
        debug!(
            "inflating block {} extent {zstart}..{zend} expecting {expected} bytes",
            self.cur
        );

        self.file.seek(SeekFrom::Start(zstart))?;
        self.file.read_exact(&mut self.zblock[..zsize])?;

        let mut engine = Decompress::new(false);
        let mut in_pos = 0;
        let mut out_pos = 0;
        while out_pos < expected {
            let before_in = engine.total_in();
            let before_out = engine.total_out();
            let status = engine
                .decompress(
                    &self.zblock[in_pos..zsize],
                    &mut self.ublock[out_pos..expected],
                    FlushDecompress::None,
                )
                .map_err(|e| MzgfError::Inflate(e.to_string()))?;
            in_pos += (engine.total_in() - before_in) as usize;
            out_pos += (engine.total_out() - before_out) as usize;
            match status {
                Status::StreamEnd => break,
                _ if in_pos >= zsize && out_pos < expected => {
                    return Err(MzgfError::Inflate("compressed block ended early".into()));
                }
                _ => {}
            }
        }
        if out_pos != expected {
            return Err(MzgfError::Inflate(format!(
                "block inflated to {out_pos} bytes, expected {expected}"
            )));
        }

        self.blen = expected as u64;
        self.loaded = true;
        Ok(())
    }
}

impl Read for MzgfReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        MzgfReader::read(self, buf).map_err(|e| match e {
            MzgfError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        })
    }
}

/// Parse the fixed-size end-of-file member, returning the uncompressed file
/// size and the offset of the first index member.
fn read_eof_member(file: &mut File) -> Result<(u64, u64)> {
    file.seek(SeekFrom::End(-(member::EOF_MEMBER_SIZE as i64)))?;
    let header = member::read_header(file, member::BO_EXTRA_LEN)?;
    let bo = member::find_subfield(&header.extra, member::SUBFIELD_BO)
        .ok_or_else(|| MzgfError::BadFormat("missing end-of-file subfield".into()))?;
    if bo.len() != 16 {
        return Err(MzgfError::BadFormat(format!(
            "end-of-file subfield has length {}",
            bo.len()
        )));
    }
    Ok((member::unpack_u64(&bo[..8]), member::unpack_u64(&bo[8..16])))
}

/// Walk the index member chain and materialize all entries.
fn read_bindex(file: &mut File, first_offset: u64) -> Result<Vec<BlockIndexEntry>> {
    let mut bindex = Vec::new();
    let mut offset = first_offset;
    while offset != 0 {
        debug!("reading index member at zoffset {offset}");
        file.seek(SeekFrom::Start(offset))?;
        let header = member::read_header(file, member::GZIP_FEXTRA_MAX)?;
        let bi = member::find_subfield(&header.extra, member::SUBFIELD_BI)
            .ok_or_else(|| MzgfError::BadFormat("missing block index subfield".into()))?;
        if bi.len() < 8 || (bi.len() - 8) % 16 != 0 {
            return Err(MzgfError::BadFormat(format!(
                "block index subfield has length {}",
                bi.len()
            )));
        }
        let next = member::unpack_u64(&bi[..8]);
        for pair in bi[8..].chunks_exact(16) {
            bindex.push(BlockIndexEntry {
                zoffset: member::unpack_u64(&pair[..8]),
                uoffset: member::unpack_u64(&pair[8..16]),
            });
        }
        if next != 0 && next <= offset {
            return Err(MzgfError::BadFormat(
                "block index chain does not advance".into(),
            ));
        }
        offset = next;
    }
    if bindex.is_empty() {
        return Err(MzgfError::BadFormat("empty block index".into()));
    }
    Ok(bindex)
}
