//! Shared test utilities for vendortree tests.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Mutex;

use tempfile::TempDir;
use walkdir::WalkDir;

use vendortree::emit::BuildIdentity;
use vendortree::pipeline::GenerateRequest;
use vendortree::process::{CancelToken, CommandResult, CommandRunner, Invocation};

/// Minimal 64-bit little-endian ELF header prefix.
pub const ELF_BYTES: &[u8] = b"\x7fELF\x02\x01\x01\x00\x00\x00\x00\x00\x00\x00\x00\x00";

/// Test environment with temporary directories for images, fixture trees and output.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    /// Input directory handed to discovery
    pub images: PathBuf,
    /// Contents the fake runner pretends each image holds
    pub fixtures: PathBuf,
    pub output: PathBuf,
    pub scratch: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base = temp_dir.path();

        let images = base.join("images");
        let fixtures = base.join("fixtures");
        let output = base.join("out");
        let scratch = base.join("scratch");
        fs::create_dir_all(&images).expect("Failed to create images dir");
        fs::create_dir_all(&fixtures).expect("Failed to create fixtures dir");

        Self {
            _temp_dir: temp_dir,
            images,
            fixtures,
            output,
            scratch,
        }
    }

    /// Write `<images>/<name>.img` with filler bytes and return its path.
    pub fn raw_image(&self, name: &str) -> PathBuf {
        let path = self.images.join(format!("{}.img", name));
        fs::write(&path, vec![0u8; 4096]).expect("Failed to write image");
        path
    }

    /// Fixture tree for `partition`, created on first use.
    pub fn tree(&self, partition: &str) -> PathBuf {
        let dir = self.fixtures.join(partition);
        fs::create_dir_all(&dir).expect("Failed to create fixture tree");
        dir
    }

    pub fn request(&self) -> GenerateRequest {
        GenerateRequest {
            identity: BuildIdentity {
                vendor: "acme".to_string(),
                device: "rocket".to_string(),
                android_version: "13".to_string(),
            },
            input: self.images.clone(),
            output: self.output.clone(),
            rules: None,
            scratch_dir: Some(self.scratch.clone()),
            jobs: 1,
            timeout: None,
        }
    }
}

/// Create a file with parents.
pub fn write_file(path: &Path, content: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent dir");
    }
    fs::write(path, content).expect("Failed to write file");
}

/// Create a mock shared library with an ELF header.
pub fn create_mock_library(path: &Path) {
    let mut content = ELF_BYTES.to_vec();
    content.extend_from_slice(path.to_string_lossy().as_bytes());
    write_file(path, &content);
}

/// Sparse image whose single RAW chunk holds `data` followed by
/// `dont_care_blocks` skipped blocks.
pub fn write_sparse_image(path: &Path, block_size: u32, data: &[u8], dont_care_blocks: u32) -> u64 {
    assert_eq!(data.len() % block_size as usize, 0, "data must be whole blocks");
    let raw_blocks = (data.len() / block_size as usize) as u32;
    let total_blocks = raw_blocks + dont_care_blocks;

    let mut bytes = Vec::new();
    bytes.extend_from_slice(&[0x3A, 0xFF, 0x26, 0xED]);
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&0u16.to_le_bytes());
    bytes.extend_from_slice(&28u16.to_le_bytes());
    bytes.extend_from_slice(&12u16.to_le_bytes());
    bytes.extend_from_slice(&block_size.to_le_bytes());
    bytes.extend_from_slice(&total_blocks.to_le_bytes());
    bytes.extend_from_slice(&2u32.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());

    bytes.extend_from_slice(&0xCAC1u16.to_le_bytes());
    bytes.extend_from_slice(&0u16.to_le_bytes());
    bytes.extend_from_slice(&raw_blocks.to_le_bytes());
    bytes.extend_from_slice(&(12 + data.len() as u32).to_le_bytes());
    bytes.extend_from_slice(data);

    bytes.extend_from_slice(&0xCAC3u16.to_le_bytes());
    bytes.extend_from_slice(&0u16.to_le_bytes());
    bytes.extend_from_slice(&dont_care_blocks.to_le_bytes());
    bytes.extend_from_slice(&12u32.to_le_bytes());

    write_file(path, &bytes);
    block_size as u64 * total_blocks as u64
}

/// Copy every file under `src` into `dest`, creating directories.
pub fn copy_tree(src: &Path, dest: &Path) {
    for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry.expect("Failed to walk fixture");
        let target = dest.join(entry.path().strip_prefix(src).unwrap());
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).expect("Failed to create dir");
        } else if entry.file_type().is_file() {
            write_file(&target, &fs::read(entry.path()).expect("Failed to read fixture"));
        }
    }
}

/// Relative paths of every regular file under `root`.
pub fn files_under(root: &Path) -> BTreeSet<String> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .into_owned()
        })
        .collect()
}

/// The partition an image, raw copy or container member belongs to.
///
/// `vendor.img`, `vendor_a.img` and `vendor-mount.3.raw.img` all map to
/// `vendor`.
pub fn partition_key(image: &Path) -> String {
    let name = image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name.split('.').next().unwrap_or_default();
    let stem = stem.split('-').next().unwrap_or_default();
    stem.strip_suffix("_a")
        .or_else(|| stem.strip_suffix("_b"))
        .unwrap_or(stem)
        .to_string()
}

fn exit(code: i32) -> ExitStatus {
    ExitStatus::from_raw(code << 8)
}

fn result(code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> CommandResult {
    CommandResult {
        status: exit(code),
        stdout: stdout.into(),
        stderr: stderr.into(),
    }
}

/// Fake host that "mounts" fixture trees instead of images.
///
/// Each image is looked up by [`partition_key`] in the fixture directory:
/// `<fixtures>/<partition>` is what mounting, dumping or extracting it
/// yields, and `<fixtures>/<partition>.members` holds the images `lpunpack`
/// writes for a super image.
pub struct FakeRunner {
    fixtures: PathBuf,
    failing: HashSet<String>,
    missing: HashSet<String>,
    calls: Mutex<Vec<Invocation>>,
    mounted: Mutex<HashMap<PathBuf, String>>,
    mounted_sizes: Mutex<Vec<u64>>,
    interrupt: Option<(String, CancelToken)>,
}

impl FakeRunner {
    pub fn new(fixtures: &Path) -> Self {
        Self {
            fixtures: fixtures.to_path_buf(),
            failing: HashSet::new(),
            missing: ["simg2img".to_string()].into_iter().collect(),
            calls: Mutex::new(Vec::new()),
            mounted: Mutex::new(HashMap::new()),
            mounted_sizes: Mutex::new(Vec::new()),
            interrupt: None,
        }
    }

    /// Make every run of `program` exit non-zero.
    pub fn failing(mut self, program: &str) -> Self {
        self.failing.insert(program.to_string());
        self
    }

    /// Fire `token` while `program` runs, as a Ctrl-C in mid-command would.
    pub fn interrupting(mut self, program: &str, token: &CancelToken) -> Self {
        self.interrupt = Some((program.to_string(), token.clone()));
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, program: &str) -> usize {
        self.calls().iter().filter(|c| c.program == program).count()
    }

    /// Mount points currently mounted.
    pub fn mounted(&self) -> Vec<PathBuf> {
        self.mounted.lock().unwrap().keys().cloned().collect()
    }

    /// Size of each image at the moment it was mounted.
    pub fn mounted_sizes(&self) -> Vec<u64> {
        self.mounted_sizes.lock().unwrap().clone()
    }

    fn fixture_for(&self, image: &Path) -> Option<PathBuf> {
        let dir = self.fixtures.join(partition_key(image));
        dir.is_dir().then_some(dir)
    }

    fn mount(&self, args: &[String]) -> CommandResult {
        let (image, mount_point) = (Path::new(&args[2]), PathBuf::from(&args[3]));
        if self.fixture_for(image).is_none() {
            return result(32, "", "mount: wrong fs type, bad option, bad superblock");
        }
        self.mounted_sizes
            .lock()
            .unwrap()
            .push(fs::metadata(image).map(|m| m.len()).unwrap_or(0));
        self.mounted
            .lock()
            .unwrap()
            .insert(mount_point, partition_key(image));
        result(0, "", "")
    }

    fn copy_out(&self, args: &[String]) -> CommandResult {
        let source = args[1].trim_end_matches("/.");
        let dest = Path::new(&args[2]);
        let partition = self.mounted.lock().unwrap().get(Path::new(source)).cloned();
        match partition {
            Some(partition) => {
                copy_tree(&self.fixtures.join(partition), dest);
                result(0, "", "")
            }
            None => result(1, "", format!("cp: cannot stat '{}': No such file or directory", source)),
        }
    }

    fn debugfs(&self, args: &[String]) -> CommandResult {
        let request = &args[1];
        let image = Path::new(&args[2]);
        let Some(tree) = self.fixture_for(image) else {
            return result(0, "", "debugfs: Bad magic number in super-block");
        };
        if request == "ls -p /" {
            let mut listing = String::from("/2/040755/0/0/./\n/2/040755/0/0/../\n");
            let mut names: Vec<String> = fs::read_dir(&tree)
                .unwrap()
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            for name in names {
                listing.push_str(&format!("/12/040755/0/0/{}//\n", name));
            }
            return result(0, listing, "");
        }
        // rdump "/a" "/b" "<dest>"
        let dest = request
            .rsplit('"')
            .nth(1)
            .map(PathBuf::from)
            .expect("rdump request without destination");
        copy_tree(&tree, &dest);
        result(0, "", "")
    }

    fn seven_zip(&self, args: &[String]) -> CommandResult {
        let dest = PathBuf::from(args[2].trim_start_matches("-o"));
        let image = Path::new(&args[3]);
        match self.fixture_for(image) {
            Some(tree) => {
                copy_tree(&tree, &dest);
                result(0, "Everything is Ok", "")
            }
            None => result(2, "", "ERROR: Can not open the file as archive"),
        }
    }

    fn lpunpack(&self, args: &[String]) -> CommandResult {
        let image = Path::new(&args[0]);
        let out = Path::new(&args[1]);
        let members = self.fixtures.join(format!("{}.members", partition_key(image)));
        if !members.is_dir() {
            return result(1, "", "lpunpack: invalid metadata");
        }
        copy_tree(&members, out);
        result(0, "", "")
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, invocation: &Invocation, cancel: Option<&CancelToken>) -> vendortree::Result<CommandResult> {
        self.calls.lock().unwrap().push(invocation.clone());
        if let Some(token) = cancel {
            token.check()?;
        }
        let args = &invocation.args;
        let program = invocation.program.as_str();
        if let Some((trigger, token)) = &self.interrupt {
            if trigger == program {
                token.cancel();
            }
        }

        if self.failing.contains(program) {
            return Ok(result(1, "", format!("{}: simulated failure", program)));
        }

        Ok(match program {
            "mount" => self.mount(args),
            "umount" => {
                let mount_point = PathBuf::from(args.last().unwrap());
                match self.mounted.lock().unwrap().remove(&mount_point) {
                    Some(_) => result(0, "", ""),
                    None => result(32, "", "umount: not mounted"),
                }
            }
            "cp" => self.copy_out(args),
            "chown" | "chmod" => result(0, "", ""),
            "debugfs" => self.debugfs(args),
            "7z" => self.seven_zip(args),
            "lpunpack" => self.lpunpack(args),
            other => result(127, "", format!("{}: command not found", other)),
        })
    }

    fn has_tool(&self, program: &str) -> bool {
        !self.missing.contains(program)
    }
}
