//! MZGF writer: deflates a byte stream into the blocked container.

use std::io::{self, Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use flate2::{Compress, Compression, FlushCompress, Status};
use log::debug;

use crate::error::{MzgfError, Result};
use crate::format::member;
use crate::format::{BlockIndexEntry, MAX_BLOCK_SIZE, UBLOCK_SIZE};

/// Streaming MZGF compressor.
///
/// [`MzgfWriter::deflate`] reads the whole source, emits the data member
/// block by block with a full flush at every [`UBLOCK_SIZE`] boundary,
/// then appends the block index members and the end-of-file member. The
/// destination only ever sees forward writes; on error the partial output is
/// left as-is for the caller to dispose of.
pub struct MzgfWriter {
    mtime: u32,
    bindex: Vec<BlockIndexEntry>,
}

impl MzgfWriter {
    /// Create a writer stamping member headers with the current time.
    pub fn new() -> Self {
        let mtime = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        Self::with_mtime(mtime)
    }

    /// Create a writer with an explicit MTIME.
    ///
    /// Output is byte-identical for identical input and identical mtime.
    pub fn with_mtime(mtime: u32) -> Self {
        MzgfWriter {
            mtime,
            bindex: Vec::new(),
        }
    }

    /// Block index recorded by the last [`MzgfWriter::deflate`] call.
    pub fn bindex(&self) -> &[BlockIndexEntry] {
        &self.bindex
    }

    /// Read all of `src`, deflate it, and write the finished container to
    /// `dst`.
    pub fn deflate<R: Read, W: Write>(&mut self, src: &mut R, dst: &mut W) -> Result<()> {
        self.deflate_inner(src, dst, member::GZIP_FEXTRA_MAX)
    }

    fn deflate_inner<R: Read, W: Write>(
        &mut self,
        src: &mut R,
        dst: &mut W,
        index_extra_cap: usize,
    ) -> Result<()> {
        self.bindex.clear();

        // Raw deflate; the gzip framing is written by hand.
        let mut engine = Compress::new(Compression::default(), false);
        let mut ublock = vec![0u8; UBLOCK_SIZE];
        let mut zblock = vec![0u8; MAX_BLOCK_SIZE];

        let mut zcursor = member::write_header(dst, self.mtime, &member::mz_extra())?;
        let mut ucursor: u64 = 0;
        let mut crc = crc32fast::Hasher::new();

        loop {
            let n = fill_block(src, &mut ublock)?;
            let last = n < UBLOCK_SIZE;
            // The entry is recorded before the block's compressed bytes so
            // its zoffset lands on the flush boundary. A trailing zero-length
            // read after a full block closes the stream without an entry.
            if n > 0 || ucursor == 0 {
                self.bindex.push(BlockIndexEntry {
                    zoffset: zcursor,
                    uoffset: ucursor,
                });
            }
            crc.update(&ublock[..n]);
            let flush = if last {
                FlushCompress::Finish
            } else {
                FlushCompress::Full
            };
            debug!("block uoffset={ucursor} zoffset={zcursor} len={n} last={last}");
            zcursor += deflate_block(&mut engine, &ublock[..n], &mut zblock, flush, dst)?;
            ucursor += n as u64;
            if last {
                break;
            }
        }

        zcursor += member::write_trailer(dst, crc.finalize(), ucursor as u32)?;

        let first_bindex_offset = zcursor;
        self.write_bindex(dst, &mut zcursor, index_extra_cap)?;
        member::write_empty_member(dst, self.mtime, &member::bo_extra(ucursor, first_bindex_offset))?;
        Ok(())
    }

    /// Emit the block index as a chain of empty members, splitting whenever
    /// the extra region would outgrow `max_extra`.
    fn write_bindex<W: Write>(&self, dst: &mut W, zcursor: &mut u64, max_extra: usize) -> Result<()> {
        debug!("writing {} index entries at zoffset {zcursor}", self.bindex.len());

        // Packed (zoffset, uoffset) pairs for the member being assembled.
        let mut entries: Vec<u8> = Vec::new();
        for (i, entry) in self.bindex.iter().enumerate() {
            entries.extend_from_slice(&entry.zoffset.to_le_bytes());
            entries.extend_from_slice(&entry.uoffset.to_le_bytes());

            let last = i + 1 == self.bindex.len();
            let full = 12 + entries.len() + 16 > max_extra;
            if last || full {
                let xlen = 12 + entries.len();
                let next = if last {
                    0
                } else {
                    *zcursor
                        + (member::HEADER_SIZE + xlen) as u64
                        + member::EMPTY_DEFLATE_BLOCK.len() as u64
                        + member::TRAILER_SIZE as u64
                };
                let mut extra = Vec::with_capacity(xlen);
                extra.extend_from_slice(&member::SUBFIELD_BI);
                extra.extend_from_slice(&((8 + entries.len()) as u16).to_le_bytes());
                extra.extend_from_slice(&next.to_le_bytes());
                extra.extend_from_slice(&entries);
                *zcursor += member::write_empty_member(dst, self.mtime, &extra)?;
                entries.clear();
            }
        }
        Ok(())
    }
}

impl Default for MzgfWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Fill `buf` from `src`, looping over short reads. Returns less than
/// `buf.len()` only at end of input.
fn fill_block<R: Read>(src: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match src.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// Feed one uncompressed block to the engine, writing everything it emits.
/// Returns the number of compressed bytes written.
fn deflate_block<W: Write>(
    engine: &mut Compress,
    mut input: &[u8],
    zblock: &mut [u8],
    flush: FlushCompress,
    dst: &mut W,
) -> Result<u64> {
    let mut written: u64 = 0;
    loop {
        let before_in = engine.total_in();
        let before_out = engine.total_out();
        let status = engine
            .compress(input, zblock, flush)
            .map_err(|e| MzgfError::Deflate(e.to_string()))?;
        let consumed = (engine.total_in() - before_in) as usize;
        let produced = (engine.total_out() - before_out) as usize;
        input = &input[consumed..];
        if produced > 0 {
            dst.write_all(&zblock[..produced])?;
            written += produced as u64;
        }
        match status {
            Status::StreamEnd => break,
            Status::BufError if consumed == 0 && produced == 0 => {
                // A flush that completed exactly on the buffer boundary has
                // nothing left to emit; anything else is a stuck engine.
                if input.is_empty() && !matches!(flush, FlushCompress::Finish) {
                    break;
                }
                return Err(MzgfError::Deflate("deflate made no progress".into()));
            }
            _ => {}
        }
        if matches!(flush, FlushCompress::Finish) {
            continue; // run to stream end
        }
        if input.is_empty() && produced < zblock.len() {
            // Input consumed and all pending output flushed.
            break;
        }
    }
    Ok(written)
}
