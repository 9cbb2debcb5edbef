//! Header sniffing for partition images.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{Error, Result};

use super::ImageFormat;

/// Android sparse image magic (`0xED26FF3A`, stored little-endian).
pub const SPARSE_MAGIC: [u8; 4] = [0x3A, 0xFF, 0x26, 0xED];

/// ELF magic: `\x7fELF`.
pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// Logical-partition geometry magic (`0x616c4467`, "gDla") found at offset
/// 4096 of a dynamic-partition super image.
pub const LP_GEOMETRY_MAGIC: [u8; 4] = [0x67, 0x44, 0x6c, 0x61];
pub const LP_GEOMETRY_OFFSET: u64 = 4096;

pub const HEADER_LEN: usize = 4;

/// Classify an image by its first four bytes.
///
/// Fails when the file cannot be opened or is shorter than the header.
pub fn detect_format(path: &Path) -> Result<ImageFormat> {
    let header = read_header(path)?;
    Ok(format_from_header(&header))
}

/// Verdict for an already-read header.
pub fn format_from_header(header: &[u8; HEADER_LEN]) -> ImageFormat {
    if *header == SPARSE_MAGIC {
        ImageFormat::Sparse
    } else {
        ImageFormat::Raw
    }
}

fn read_header(path: &Path) -> Result<[u8; HEADER_LEN]> {
    let fail = |reason: String| Error::FormatDetection {
        path: path.to_path_buf(),
        reason,
    };

    let mut file = File::open(path).map_err(|e| fail(e.to_string()))?;
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        match file.read(&mut header[filled..]) {
            Ok(0) => {
                return Err(fail(format!(
                    "truncated header ({} of {} bytes)",
                    filled, HEADER_LEN
                )))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(fail(e.to_string())),
        }
    }
    Ok(header)
}

/// True when the file starts with the ELF magic. Unreadable or short files are not ELF.
pub fn is_elf(path: &Path) -> bool {
    read_header(path)
        .map(|header| header == ELF_MAGIC)
        .unwrap_or(false)
}

/// True when a raw image carries LP metadata geometry, i.e. is a super container.
pub fn has_lp_geometry(path: &Path) -> bool {
    let Ok(mut file) = File::open(path) else {
        return false;
    };
    if file.seek(SeekFrom::Start(LP_GEOMETRY_OFFSET)).is_err() {
        return false;
    }
    let mut magic = [0u8; 4];
    file.read_exact(&mut magic).is_ok() && magic == LP_GEOMETRY_MAGIC
}
