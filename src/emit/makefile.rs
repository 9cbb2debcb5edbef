//! Make fragments: `Android.mk`, `BoardConfig.mk` and `<device>-vendor.mk`.

use std::collections::BTreeSet;

use crate::catalog::Catalog;

use super::blueprint::library_modules;
use super::manifest::escape;
use super::{copy_out_var, install_path, BuildFile, BuildIdentity, PROPRIETARY_DIR};

pub struct AndroidMk;

impl BuildFile for AndroidMk {
    fn file_name(&self, _identity: &BuildIdentity) -> String {
        "Android.mk".to_string()
    }

    fn render(&self, identity: &BuildIdentity, _catalog: &Catalog) -> String {
        let mut out = identity.generated_header("#");
        out.push_str("LOCAL_PATH := $(call my-dir)\n\n");
        out.push_str(&format!("ifeq ($(TARGET_DEVICE),{})\n\n", identity.device));
        out.push_str("endif\n");
        out
    }
}

pub struct BoardConfigMk;

impl BuildFile for BoardConfigMk {
    fn file_name(&self, _identity: &BuildIdentity) -> String {
        "BoardConfig.mk".to_string()
    }

    fn render(&self, identity: &BuildIdentity, _catalog: &Catalog) -> String {
        let mut out = identity.generated_header("#");
        out.push_str(&format!("# Android {}\n", identity.android_version));
        out.push_str(&format!("BOARD_VENDOR := {}\n", identity.vendor));
        out
    }
}

/// Product makefile that installs every blob.
///
/// Library modules from `Android.bp` go into `PRODUCT_PACKAGES`; everything
/// else is a `PRODUCT_COPY_FILES` pair.
pub struct DeviceVendorMk;

impl BuildFile for DeviceVendorMk {
    fn file_name(&self, identity: &BuildIdentity) -> String {
        format!("{}-vendor.mk", identity.device)
    }

    fn render(&self, identity: &BuildIdentity, catalog: &Catalog) -> String {
        let tree = identity.tree_path();
        let modules = library_modules(catalog);
        let packaged: BTreeSet<&str> = modules.iter().flat_map(|m| m.sources()).collect();

        let mut out = identity.generated_header("#");
        out.push_str(&format!("PRODUCT_SOONG_NAMESPACES += \\\n    {}\n", tree));

        let copies: Vec<String> = catalog
            .entries()
            .iter()
            .filter(|entry| !packaged.contains(entry.relative_path()))
            .map(|entry| {
                format!(
                    "{}/{}/{}:{}/{}",
                    tree,
                    PROPRIETARY_DIR,
                    escape(entry.relative_path()),
                    copy_out_var(entry.partition()),
                    escape(install_path(entry))
                )
            })
            .collect();
        if !copies.is_empty() {
            out.push_str("\nPRODUCT_COPY_FILES += \\\n");
            out.push_str(&continuation(&copies));
        }

        if !modules.is_empty() {
            let names: Vec<String> = modules.into_iter().map(|m| m.name).collect();
            out.push_str("\nPRODUCT_PACKAGES += \\\n");
            out.push_str(&continuation(&names));
        }
        out
    }
}

/// Indented lines joined with make line continuations.
fn continuation(lines: &[String]) -> String {
    let mut out = String::new();
    for (i, line) in lines.iter().enumerate() {
        out.push_str("    ");
        out.push_str(line);
        out.push_str(if i + 1 < lines.len() { " \\\n" } else { "\n" });
    }
    out
}
