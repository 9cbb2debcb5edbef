//! Shared utilities across vendortree modules.

pub mod files;
pub mod hash;
pub mod temp;

pub use files::{write_file_atomic, write_file_with_dirs};
pub use hash::sha256_file;
pub use temp::{cleanup_work_dir, prepare_work_dir};
