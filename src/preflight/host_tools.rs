//! Host tool availability checks.

use super::types::CheckResult;

/// A host tool the extraction chain can use.
pub struct HostTool {
    pub name: &'static str,
    pub package: &'static str,
    pub purpose: &'static str,
    pub required: bool,
}

pub const HOST_TOOLS: &[HostTool] = &[
    HostTool {
        name: "lpunpack",
        package: "android-sdk-libsparse-utils / otatools",
        purpose: "Unpacks super (dynamic partition) images",
        required: false,
    },
    HostTool {
        name: "simg2img",
        package: "android-sdk-libsparse-utils",
        purpose: "Converts sparse images (built-in decoder used otherwise)",
        required: false,
    },
    HostTool {
        name: "mount",
        package: "util-linux",
        purpose: "Loop-mounts images for the mount backend",
        required: false,
    },
    HostTool {
        name: "umount",
        package: "util-linux",
        purpose: "Releases loop mounts",
        required: false,
    },
    HostTool {
        name: "cp",
        package: "coreutils",
        purpose: "Copies mounted partition contents",
        required: true,
    },
    HostTool {
        name: "debugfs",
        package: "e2fsprogs",
        purpose: "Dumps ext4 images without mounting",
        required: false,
    },
    HostTool {
        name: "7z",
        package: "p7zip",
        purpose: "Last-resort archive extraction",
        required: false,
    },
    HostTool {
        name: "sudo",
        package: "sudo",
        purpose: "Runs mount and copy as root",
        required: false,
    },
];

/// Check every host tool using `locate` to find it.
pub fn check_host_tools(locate: impl Fn(&str) -> Option<String>) -> Vec<CheckResult> {
    HOST_TOOLS
        .iter()
        .map(|tool| match locate(tool.name) {
            Some(path) => CheckResult::pass_with(tool.name, &path),
            None => {
                let msg = format!("Not found. Install '{}'. {}", tool.package, tool.purpose);
                if tool.required {
                    CheckResult::fail(tool.name, &msg)
                } else {
                    CheckResult::warn(tool.name, &msg)
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preflight::types::CheckStatus;

    #[test]
    fn test_missing_backend_is_warning() {
        let results = check_host_tools(|name| (name != "debugfs").then(|| format!("/usr/bin/{}", name)));
        let debugfs = results.iter().find(|r| r.name == "debugfs").unwrap();
        assert_eq!(debugfs.status, CheckStatus::Warn);
        assert!(results.iter().filter(|r| r.name != "debugfs").all(|r| r.status == CheckStatus::Pass));
    }

    #[test]
    fn test_missing_cp_is_failure() {
        let results = check_host_tools(|_| None);
        let cp = results.iter().find(|r| r.name == "cp").unwrap();
        assert_eq!(cp.status, CheckStatus::Fail);
        assert_eq!(results.iter().filter(|r| r.status == CheckStatus::Fail).count(), 1);
    }
}
