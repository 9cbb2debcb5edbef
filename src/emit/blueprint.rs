//! `Android.bp`: a Soong namespace plus prebuilt modules for the shared
//! libraries that sit directly in a partition's `lib/` or `lib64/`.

use std::collections::{BTreeMap, BTreeSet};

use crate::catalog::{Catalog, CatalogEntry};

use super::{install_path, BuildFile, BuildIdentity, PROPRIETARY_DIR};

/// A `cc_prebuilt_library_shared` built from one or two ABI variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryModule {
    pub name: String,
    pub partition: String,
    pub lib32: Option<String>,
    pub lib64: Option<String>,
}

impl LibraryModule {
    fn multilib(&self) -> &'static str {
        match (&self.lib32, &self.lib64) {
            (Some(_), Some(_)) => "both",
            (Some(_), None) => "32",
            _ => "64",
        }
    }

    /// Catalog paths this module installs.
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.lib32.iter().chain(self.lib64.iter()).map(String::as_str)
    }
}

enum Abi {
    Lib32,
    Lib64,
}

/// The library stem and ABI if the entry is a top-level ELF shared library.
fn library_of(entry: &CatalogEntry) -> Option<(&str, Abi)> {
    if !entry.is_elf() {
        return None;
    }
    let (dir, file) = install_path(entry).split_once('/')?;
    let stem = file.strip_suffix(".so")?;
    if stem.is_empty() || stem.contains('/') {
        return None;
    }
    match dir {
        "lib" => Some((stem, Abi::Lib32)),
        "lib64" => Some((stem, Abi::Lib64)),
        _ => None,
    }
}

/// Library modules in (partition, stem) order.
///
/// A stem present in several partitions gets the partition name as a prefix
/// in every partition so module names stay unique inside the namespace.
pub fn library_modules(catalog: &Catalog) -> Vec<LibraryModule> {
    let mut grouped: BTreeMap<(String, String), LibraryModule> = BTreeMap::new();
    for entry in catalog.entries() {
        let Some((stem, abi)) = library_of(entry) else {
            continue;
        };
        let module = grouped
            .entry((entry.partition().to_string(), stem.to_string()))
            .or_insert_with(|| LibraryModule {
                name: stem.to_string(),
                partition: entry.partition().to_string(),
                lib32: None,
                lib64: None,
            });
        let slot = match abi {
            Abi::Lib32 => &mut module.lib32,
            Abi::Lib64 => &mut module.lib64,
        };
        *slot = Some(entry.relative_path().to_string());
    }

    let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
    for (_, stem) in grouped.keys() {
        *seen.entry(stem.as_str()).or_default() += 1;
    }
    let colliding: BTreeSet<String> = seen
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(stem, _)| stem.to_string())
        .collect();

    // Names kept as-is are claimed first so a prefixed name never shadows one.
    let mut used: BTreeSet<String> = grouped
        .keys()
        .map(|(_, stem)| stem.clone())
        .filter(|stem| !colliding.contains(stem))
        .collect();

    grouped
        .into_values()
        .map(|mut module| {
            if colliding.contains(&module.name) {
                let base = format!("{}_{}", module.partition, module.name);
                let mut name = base.clone();
                let mut n = 2;
                while used.contains(&name) {
                    name = format!("{}_{}", base, n);
                    n += 1;
                }
                used.insert(name.clone());
                module.name = name;
            }
            module
        })
        .collect()
}

fn partition_flag(partition: &str) -> Option<&'static str> {
    match partition {
        "vendor" => Some("soc_specific"),
        "product" => Some("product_specific"),
        "system_ext" => Some("system_ext_specific"),
        "odm" => Some("device_specific"),
        _ => None,
    }
}

pub struct AndroidBp;

impl BuildFile for AndroidBp {
    fn file_name(&self, _identity: &BuildIdentity) -> String {
        "Android.bp".to_string()
    }

    fn render(&self, identity: &BuildIdentity, catalog: &Catalog) -> String {
        let mut out = identity.generated_header("//");
        out.push_str("soong_namespace {\n}\n");

        for module in library_modules(catalog) {
            out.push_str("\ncc_prebuilt_library_shared {\n");
            out.push_str(&format!("    name: \"{}\",\n", module.name));
            out.push_str(&format!("    owner: \"{}\",\n", identity.vendor));
            out.push_str("    strip: {\n        none: true,\n    },\n");
            out.push_str("    target: {\n");
            if let Some(src) = &module.lib32 {
                out.push_str(&target_block("android_arm", src));
            }
            if let Some(src) = &module.lib64 {
                out.push_str(&target_block("android_arm64", src));
            }
            out.push_str("    },\n");
            out.push_str(&format!("    compile_multilib: \"{}\",\n", module.multilib()));
            out.push_str("    check_elf_files: false,\n");
            out.push_str("    prefer: true,\n");
            if let Some(flag) = partition_flag(&module.partition) {
                out.push_str(&format!("    {}: true,\n", flag));
            }
            out.push_str("}\n");
        }
        out
    }
}

fn target_block(target: &str, src: &str) -> String {
    format!(
        "        {}: {{\n            srcs: [\"{}/{}\"],\n        }},\n",
        target, PROPRIETARY_DIR, src
    )
}
