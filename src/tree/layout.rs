//! Fixed directory skeleton under `proprietary/`.

use std::fs;
use std::io;
use std::path::Path;

const COMMON_DIRS: &[&str] = &["bin", "etc", "lib", "lib64"];
const MIRRORED_PARTITIONS: &[&str] = &["vendor", "system", "product"];

/// Relative directories created before any copy.
pub fn layout_dirs() -> Vec<String> {
    let mut dirs: Vec<String> = COMMON_DIRS.iter().map(|d| d.to_string()).collect();
    for partition in MIRRORED_PARTITIONS {
        for dir in COMMON_DIRS {
            dirs.push(format!("{}/{}", partition, dir));
        }
    }
    dirs.push("vendor/firmware".to_string());
    dirs
}

pub fn create_layout(proprietary: &Path) -> io::Result<()> {
    for dir in layout_dirs() {
        fs::create_dir_all(proprietary.join(dir))?;
    }
    Ok(())
}
