//! Sparse image to raw image conversion.
//!
//! `simg2img` does the work when it is installed. Otherwise the chunk stream
//! is expanded in-process. Either way the result is checked against the size
//! the sparse header declares.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::process::{CancelToken, Cmd, CommandRunner};

use super::detect::SPARSE_MAGIC;

pub const SPARSE_HEADER_LEN: usize = 28;
pub const CHUNK_HEADER_LEN: usize = 12;

const CHUNK_TYPE_RAW: u16 = 0xCAC1;
const CHUNK_TYPE_FILL: u16 = 0xCAC2;
const CHUNK_TYPE_DONT_CARE: u16 = 0xCAC3;
const CHUNK_TYPE_CRC32: u16 = 0xCAC4;

/// Largest block size accepted from a header.
const MAX_BLOCK_SIZE: u32 = 64 << 20;
/// FILL chunks are written through a buffer of this size, a multiple of 4.
const FILL_BUF_LEN: usize = 64 << 10;

/// Parsed sparse file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SparseHeader {
    pub major_version: u16,
    pub minor_version: u16,
    pub file_header_len: u16,
    pub chunk_header_len: u16,
    pub block_size: u32,
    pub total_blocks: u32,
    pub total_chunks: u32,
    pub checksum: u32,
}

impl SparseHeader {
    pub fn parse(bytes: &[u8; SPARSE_HEADER_LEN]) -> io::Result<Self> {
        if bytes[0..4] != SPARSE_MAGIC {
            return Err(invalid("bad sparse magic"));
        }
        let u16_at = |o: usize| u16::from_le_bytes([bytes[o], bytes[o + 1]]);
        let u32_at =
            |o: usize| u32::from_le_bytes([bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3]]);

        let header = Self {
            major_version: u16_at(4),
            minor_version: u16_at(6),
            file_header_len: u16_at(8),
            chunk_header_len: u16_at(10),
            block_size: u32_at(12),
            total_blocks: u32_at(16),
            total_chunks: u32_at(20),
            checksum: u32_at(24),
        };

        if header.major_version != 1 {
            return Err(invalid(format!(
                "unsupported sparse major version {}",
                header.major_version
            )));
        }
        if (header.file_header_len as usize) < SPARSE_HEADER_LEN
            || (header.chunk_header_len as usize) < CHUNK_HEADER_LEN
        {
            return Err(invalid("sparse header sizes too small"));
        }
        if header.block_size == 0 || header.block_size % 4 != 0 || header.block_size > MAX_BLOCK_SIZE {
            return Err(invalid(format!("bad block size {}", header.block_size)));
        }
        Ok(header)
    }

    pub fn read_from(path: &Path) -> io::Result<Self> {
        let mut bytes = [0u8; SPARSE_HEADER_LEN];
        File::open(path)?.read_exact(&mut bytes)?;
        Self::parse(&bytes)
    }

    /// Size of the expanded raw image.
    pub fn raw_size(&self) -> u64 {
        self.block_size as u64 * self.total_blocks as u64
    }
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Convert `sparse` to a raw image.
///
/// `dest` is overwritten if it exists; with `None` a temporary path is
/// generated and ownership of the file passes to the caller. The sparse
/// input is never modified or removed.
pub fn convert_sparse(
    runner: &dyn CommandRunner,
    sparse: &Path,
    dest: Option<&Path>,
    cancel: Option<&CancelToken>,
) -> Result<PathBuf> {
    let conversion = |diagnostic: String| Error::Conversion {
        path: sparse.to_path_buf(),
        diagnostic,
    };

    let header = SparseHeader::read_from(sparse).map_err(|e| conversion(e.to_string()))?;

    let dest = match dest {
        Some(path) => path.to_path_buf(),
        None => generated_dest().map_err(|e| conversion(e.to_string()))?,
    };
    if dest.exists() {
        fs::remove_file(&dest).map_err(|e| conversion(format!("cannot replace {}: {}", dest.display(), e)))?;
    }

    let converted = if runner.has_tool("simg2img") {
        let mut cmd = Cmd::new("simg2img").arg_path(sparse).arg_path(&dest);
        if let Some(token) = cancel {
            cmd = cmd.cancel_on(token);
        }
        match cmd.run(runner) {
            Ok(result) if result.success() => Ok(()),
            Ok(result) => Err(conversion(result.diagnostic("simg2img"))),
            Err(e) => Err(e),
        }
    } else {
        debug!(image = %sparse.display(), "simg2img not found, expanding sparse image in-process");
        decode_sparse(sparse, &dest).map_err(|e| conversion(e.to_string()))
    };

    let verified = converted.and_then(|()| {
        let actual = fs::metadata(&dest)
            .map_err(|e| conversion(format!("no output at {}: {}", dest.display(), e)))?
            .len();
        if actual < header.raw_size() {
            return Err(conversion(format!(
                "raw image truncated: {} bytes, header declares {}",
                actual,
                header.raw_size()
            )));
        }
        Ok(())
    });

    if let Err(e) = verified {
        let _ = fs::remove_file(&dest);
        return Err(e);
    }

    info!(
        image = %sparse.display(),
        raw = %dest.display(),
        bytes = header.raw_size(),
        "converted sparse image"
    );
    Ok(dest)
}

fn generated_dest() -> io::Result<PathBuf> {
    let temp = tempfile::Builder::new()
        .prefix("vendortree-")
        .suffix(".raw.img")
        .tempfile()?;
    temp.into_temp_path()
        .keep()
        .map_err(|e| e.error)
}

/// Expand a sparse image into `dest` without external tools.
pub fn decode_sparse(sparse: &Path, dest: &Path) -> io::Result<()> {
    let mut input = BufReader::new(File::open(sparse)?);
    let mut bytes = [0u8; SPARSE_HEADER_LEN];
    input.read_exact(&mut bytes)?;
    let header = SparseHeader::parse(&bytes)?;
    skip(&mut input, header.file_header_len as u64 - SPARSE_HEADER_LEN as u64)?;

    let out = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(dest)?;
    let mut output = BufWriter::new(out);
    let block_size = header.block_size as u64;
    let mut blocks_written: u64 = 0;

    for index in 0..header.total_chunks {
        let mut chunk = [0u8; CHUNK_HEADER_LEN];
        input.read_exact(&mut chunk)?;
        skip(&mut input, header.chunk_header_len as u64 - CHUNK_HEADER_LEN as u64)?;

        let chunk_type = u16::from_le_bytes([chunk[0], chunk[1]]);
        let chunk_blocks = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]) as u64;
        let total_len = u32::from_le_bytes([chunk[8], chunk[9], chunk[10], chunk[11]]) as u64;
        let data_len = total_len
            .checked_sub(header.chunk_header_len as u64)
            .ok_or_else(|| invalid(format!("chunk {} shorter than its header", index)))?;
        let out_len = chunk_blocks * block_size;

        match chunk_type {
            CHUNK_TYPE_RAW => {
                if data_len != out_len {
                    return Err(invalid(format!("raw chunk {} has {} data bytes, expected {}", index, data_len, out_len)));
                }
                let copied = io::copy(&mut (&mut input).take(data_len), &mut output)?;
                if copied != data_len {
                    return Err(invalid(format!("raw chunk {} truncated", index)));
                }
            }
            CHUNK_TYPE_FILL => {
                if data_len != 4 {
                    return Err(invalid(format!("fill chunk {} has {} data bytes", index, data_len)));
                }
                let mut pattern = [0u8; 4];
                input.read_exact(&mut pattern)?;
                let buf: Vec<u8> = pattern.iter().copied().cycle().take(FILL_BUF_LEN).collect();
                let mut remaining = out_len;
                while remaining > 0 {
                    let n = remaining.min(FILL_BUF_LEN as u64) as usize;
                    output.write_all(&buf[..n])?;
                    remaining -= n as u64;
                }
            }
            CHUNK_TYPE_DONT_CARE => {
                output.flush()?;
                output.seek(SeekFrom::Current(out_len as i64))?;
            }
            CHUNK_TYPE_CRC32 => {
                skip(&mut input, data_len)?;
                continue;
            }
            other => return Err(invalid(format!("unknown chunk type {:#06x} at chunk {}", other, index))),
        }
        blocks_written += chunk_blocks;
    }

    if blocks_written != header.total_blocks as u64 {
        return Err(invalid(format!(
            "chunks cover {} blocks, header declares {}",
            blocks_written, header.total_blocks
        )));
    }

    let file = output.into_inner().map_err(|e| e.into_error())?;
    // A trailing DONT_CARE run only moved the cursor.
    file.set_len(header.raw_size())?;
    file.sync_all()?;
    Ok(())
}

fn skip<R: Read>(reader: &mut R, len: u64) -> io::Result<()> {
    if len == 0 {
        return Ok(());
    }
    let skipped = io::copy(&mut reader.take(len), &mut io::sink())?;
    if skipped != len {
        return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
    }
    Ok(())
}
