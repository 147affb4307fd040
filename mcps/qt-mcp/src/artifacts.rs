//! Probe and launcher artifact naming and local lookup
//!
//! Release archives carry one probe library per Qt version, platform and
//! compiler, plus a launcher executable. Fetching them is handled elsewhere;
//! this module knows their names, finds an already installed probe library
//! on disk and checks it against the `SHA256SUMS` shipped beside it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Qt versions the release workflow builds probes for
pub const AVAILABLE_VERSIONS: &[&str] = &["5.15", "5.15-patched", "6.5", "6.8", "6.9"];

const PATCHED_SUFFIX: &str = "-patched";

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Qt version '{version}' not available. Available versions: {}", AVAILABLE_VERSIONS.join(", "))]
    VersionNotFound { version: String },

    #[error("Unsupported platform: {0}. Supported platforms: linux, windows")]
    UnsupportedPlatform(String),

    #[error("Checksum not found for {0} in SHA256SUMS")]
    ChecksumMissing(String),

    #[error("Checksum verification failed for {filename}. File may be corrupted or tampered with.")]
    ChecksumMismatch { filename: String },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ArtifactError {
    /// Process exit code for the CLI, one per reporting category
    pub fn exit_code(&self) -> i32 {
        match self {
            ArtifactError::VersionNotFound { .. } => 2,
            ArtifactError::UnsupportedPlatform(_) => 3,
            ArtifactError::ChecksumMissing(_) | ArtifactError::ChecksumMismatch { .. } => 4,
            ArtifactError::Io { .. } => 1,
        }
    }
}

/// Host platform as named in artifact file names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    Windows,
}

impl Platform {
    pub fn detect() -> Result<Self, ArtifactError> {
        Self::from_os(std::env::consts::OS)
    }

    pub fn from_os(os: &str) -> Result<Self, ArtifactError> {
        match os {
            "linux" => Ok(Platform::Linux),
            "windows" => Ok(Platform::Windows),
            other => Err(ArtifactError::UnsupportedPlatform(other.to_string())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Platform::Linux => "linux",
            Platform::Windows => "windows",
        }
    }

    pub fn library_extension(self) -> &'static str {
        match self {
            Platform::Linux => "so",
            Platform::Windows => "dll",
        }
    }

    pub fn default_compiler(self) -> &'static str {
        match self {
            Platform::Linux => "gcc13",
            Platform::Windows => "msvc17",
        }
    }

    /// Glob patterns matching any installed probe library
    fn probe_patterns(self) -> &'static [&'static str] {
        match self {
            Platform::Linux => &["libqtmcp-probe*.so", "qtmcp-probe*.so"],
            Platform::Windows => &["qtmcp-probe*.dll"],
        }
    }
}

/// `6.8.0` becomes `6.8`; a `-patched` suffix is kept
pub fn normalize_version(qt_version: &str) -> String {
    let (base, patched) = match qt_version.strip_suffix(PATCHED_SUFFIX) {
        Some(base) => (base, true),
        None => (qt_version, false),
    };

    let mut parts = base.split('.');
    let normalized = match (parts.next(), parts.next()) {
        (Some(major), Some(minor)) => format!("{major}.{minor}"),
        _ => base.to_string(),
    };

    if patched {
        format!("{normalized}{PATCHED_SUFFIX}")
    } else {
        normalized
    }
}

/// Normalize and check the version against [`AVAILABLE_VERSIONS`]
pub fn ensure_available(qt_version: &str) -> Result<String, ArtifactError> {
    let version = normalize_version(qt_version);
    if AVAILABLE_VERSIONS.contains(&version.as_str()) {
        Ok(version)
    } else {
        Err(ArtifactError::VersionNotFound { version })
    }
}

/// e.g. `qtmcp-probe-qt6.8-linux-gcc13.so`
pub fn probe_filename(qt_version: &str, platform: Platform) -> String {
    format!(
        "qtmcp-probe-qt{}-{}-{}.{}",
        normalize_version(qt_version),
        platform.name(),
        platform.default_compiler(),
        platform.library_extension()
    )
}

pub fn launcher_filename(platform: Platform) -> &'static str {
    match platform {
        Platform::Linux => "qtmcp-launcher",
        Platform::Windows => "qtmcp-launcher.exe",
    }
}

/// Parse `SHA256SUMS` content into file name -> hex digest
///
/// Lines are `hash  name` or `hash *name` (binary mode).
pub fn parse_checksums(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let hash = fields.next()?;
            let name = fields.last()?;
            Some((name.trim_start_matches('*').to_string(), hash.to_string()))
        })
        .collect()
}

/// Expected digest for `filename`
pub fn expected_checksum<'a>(
    checksums: &'a HashMap<String, String>,
    filename: &str,
) -> Result<&'a str, ArtifactError> {
    checksums
        .get(filename)
        .map(String::as_str)
        .ok_or_else(|| ArtifactError::ChecksumMissing(filename.to_string()))
}

/// Compare a computed digest with the expected one, case-insensitively
pub fn check_digest(filename: &str, expected: &str, actual: &str) -> Result<(), ArtifactError> {
    if expected.eq_ignore_ascii_case(actual) {
        Ok(())
    } else {
        Err(ArtifactError::ChecksumMismatch {
            filename: filename.to_string(),
        })
    }
}

/// Checksum file shipped next to release artifacts
pub const CHECKSUMS_FILE: &str = "SHA256SUMS";

/// Lowercase hex SHA-256 of a file's contents
pub fn sha256_file(path: &Path) -> Result<String, ArtifactError> {
    let data = std::fs::read(path).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Check `artifact` against the `SHA256SUMS` in its directory
///
/// Returns `Ok(false)` when there is no checksum file to check against.
pub fn verify_artifact(artifact: &Path) -> Result<bool, ArtifactError> {
    let sums_path = artifact
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(CHECKSUMS_FILE);
    if !sums_path.is_file() {
        return Ok(false);
    }

    let content = std::fs::read_to_string(&sums_path).map_err(|source| ArtifactError::Io {
        path: sums_path.clone(),
        source,
    })?;
    let checksums = parse_checksums(&content);

    let filename = artifact
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let expected = expected_checksum(&checksums, &filename)?;
    let actual = sha256_file(artifact)?;
    check_digest(&filename, expected, &actual)?;

    tracing::debug!(file = %filename, "Checksum verified");
    Ok(true)
}

/// Locate an executable on `PATH`
pub fn find_in_path(program: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// Directories searched for a probe library: cwd, then the launcher's directory
pub fn probe_search_dirs(launcher_path: Option<&Path>, platform: Platform) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd);
    }

    let launcher = launcher_path
        .map(Path::to_path_buf)
        .or_else(|| find_in_path(launcher_filename(platform)));
    if let Some(parent) = launcher.as_deref().and_then(Path::parent) {
        if !parent.as_os_str().is_empty() {
            dirs.push(parent.to_path_buf());
        }
    }
    dirs
}

/// First probe library in `dirs` matching `qt_version` (alphabetical on ties)
pub fn find_probe_library(
    dirs: &[PathBuf],
    qt_version: Option<&str>,
    platform: Platform,
) -> Option<PathBuf> {
    let tag = qt_version.map(|v| format!("qt{v}"));

    for dir in dirs.iter().filter(|d| d.is_dir()) {
        for pattern in platform.probe_patterns() {
            let full = dir.join(pattern);
            let Ok(entries) = glob::glob(&full.to_string_lossy()) else {
                continue;
            };

            let mut matches: Vec<PathBuf> = entries
                .filter_map(Result::ok)
                .filter(|path| match (&tag, path.file_name()) {
                    (Some(tag), Some(name)) => name.to_string_lossy().contains(tag.as_str()),
                    (None, _) => true,
                    (Some(_), None) => false,
                })
                .collect();
            matches.sort();

            if matches.len() > 1 {
                tracing::warn!(
                    candidates = ?matches,
                    chosen = %matches[0].display(),
                    "Multiple probe libraries found; pass probe_path to pick one"
                );
            }
            if let Some(first) = matches.into_iter().next() {
                return Some(first);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_version() {
        assert_eq!(normalize_version("6.8.0"), "6.8");
        assert_eq!(normalize_version("6.8"), "6.8");
        assert_eq!(normalize_version("5.15.2-patched"), "5.15-patched");
        assert_eq!(normalize_version("6"), "6");
    }

    #[test]
    fn test_ensure_available() {
        assert_eq!(ensure_available("6.9.1").unwrap(), "6.9");
        assert_eq!(ensure_available("5.15-patched").unwrap(), "5.15-patched");

        let err = ensure_available("4.8").unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("5.15, 5.15-patched, 6.5, 6.8, 6.9"));
    }

    #[test]
    fn test_platform_detection() {
        assert_eq!(Platform::from_os("linux").unwrap(), Platform::Linux);
        assert_eq!(Platform::from_os("windows").unwrap(), Platform::Windows);
        let err = Platform::from_os("macos").unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_filenames() {
        assert_eq!(
            probe_filename("6.8.0", Platform::Linux),
            "qtmcp-probe-qt6.8-linux-gcc13.so"
        );
        assert_eq!(
            probe_filename("5.15-patched", Platform::Windows),
            "qtmcp-probe-qt5.15-patched-windows-msvc17.dll"
        );
        assert_eq!(launcher_filename(Platform::Windows), "qtmcp-launcher.exe");
    }

    #[test]
    fn test_parse_checksums() {
        let sums = parse_checksums(
            "abc123  qtmcp-probe-qt6.8-linux-gcc13.so\n\
             \n\
             DEF456 *qtmcp-launcher.exe\n\
             malformed\n",
        );
        assert_eq!(sums.len(), 2);
        assert_eq!(
            expected_checksum(&sums, "qtmcp-launcher.exe").unwrap(),
            "DEF456"
        );
        assert!(matches!(
            expected_checksum(&sums, "missing.so"),
            Err(ArtifactError::ChecksumMissing(_))
        ));
        assert!(check_digest("qtmcp-launcher.exe", "DEF456", "def456").is_ok());
        assert_eq!(
            check_digest("x", "aa", "bb").unwrap_err().exit_code(),
            4
        );
    }

    #[test]
    fn test_sha256_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("probe.so");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );

        let err = sha256_file(&dir.path().join("missing.so")).unwrap_err();
        assert!(matches!(err, ArtifactError::Io { .. }));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_verify_artifact() {
        let dir = TempDir::new().unwrap();
        let probe = dir.path().join("qtmcp-probe-qt6.8-linux-gcc13.so");
        std::fs::write(&probe, b"abc").unwrap();

        // No SHA256SUMS beside it: nothing to check
        assert!(!verify_artifact(&probe).unwrap());

        let sums = dir.path().join(CHECKSUMS_FILE);
        std::fs::write(
            &sums,
            "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD  qtmcp-probe-qt6.8-linux-gcc13.so\n",
        )
        .unwrap();
        assert!(verify_artifact(&probe).unwrap());

        std::fs::write(&probe, b"tampered").unwrap();
        let err = verify_artifact(&probe).unwrap_err();
        assert!(matches!(err, ArtifactError::ChecksumMismatch { .. }));
        assert_eq!(err.exit_code(), 4);

        let other = dir.path().join("libqtmcp-probe-qt6.8.so");
        std::fs::write(&other, b"abc").unwrap();
        assert!(matches!(
            verify_artifact(&other),
            Err(ArtifactError::ChecksumMissing(_))
        ));
    }

    #[test]
    fn test_find_probe_library_filters_by_version() {
        let dir = TempDir::new().unwrap();
        for name in [
            "libqtmcp-probe-qt6.8.so",
            "libqtmcp-probe-qt5.15.so",
            "qtmcp-probe-qt6.8-linux-gcc13.so",
            "unrelated.so",
        ] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let dirs = vec![dir.path().to_path_buf()];

        let found = find_probe_library(&dirs, Some("5.15"), Platform::Linux).unwrap();
        assert_eq!(found.file_name().unwrap(), "libqtmcp-probe-qt5.15.so");

        // Several matches: alphabetical first wins
        let found = find_probe_library(&dirs, None, Platform::Linux).unwrap();
        assert_eq!(found.file_name().unwrap(), "libqtmcp-probe-qt5.15.so");

        let found = find_probe_library(&dirs, Some("6.8"), Platform::Linux).unwrap();
        assert_eq!(found.file_name().unwrap(), "libqtmcp-probe-qt6.8.so");

        assert!(find_probe_library(&dirs, Some("6.9"), Platform::Linux).is_none());
    }

    #[test]
    fn test_search_dirs_include_launcher_dir() {
        let dir = TempDir::new().unwrap();
        let launcher = dir.path().join("qtmcp-launcher");
        let dirs = probe_search_dirs(Some(&launcher), Platform::Linux);
        assert_eq!(dirs.last().unwrap(), dir.path());
    }
}
