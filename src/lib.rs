//! Vendortree library.
//!
//! Rebuilds an Android vendor tree (`vendor/<vendor>/<device>`) from
//! partition images: images are unpacked, proprietary files are picked out by
//! path rules, copied under `proprietary/`, and listed in a manifest and
//! build files.

pub mod catalog;
pub mod common;
pub mod config;
pub mod emit;
pub mod error;
pub mod image;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod rules;
pub mod timing;
pub mod tree;
pub mod unpack;

pub use error::{Error, Result};
