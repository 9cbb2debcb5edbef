//! Detect command - reports what each image looks like.

use std::path::PathBuf;

use anyhow::{Context, Result};

use vendortree::image::{ImageFormat, PartitionImage, SparseHeader};

/// Execute the detect command.
pub fn cmd_detect(images: &[PathBuf]) -> Result<()> {
    for path in images {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let image = PartitionImage::probe(name, path)
            .with_context(|| format!("cannot inspect {}", path.display()))?;

        print!("{}: {}, {} bytes", path.display(), image.format(), image.size());
        if image.format() == ImageFormat::Sparse {
            match SparseHeader::read_from(path) {
                Ok(header) => print!(
                    ", raw size {} bytes ({} blocks of {})",
                    header.raw_size(),
                    header.total_blocks,
                    header.block_size
                ),
                Err(e) => print!(", unreadable sparse header: {}", e),
            }
        }
        if image.is_super() {
            print!(", super container");
        }
        println!();
    }
    Ok(())
}
