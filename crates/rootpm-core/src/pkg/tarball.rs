//! Tarball download, verification and extraction.
//!
//! Registry tarballs wrap their contents in a single top-level directory
//! (usually `package/`, sometimes the bare package name). Extraction strips
//! that first path component so `<dest>/package.json` is the package manifest.

use super::error::PkgError;
use bytes::Bytes;
use flate2::read::GzDecoder;
use reqwest::Client;
use sha1::{Digest, Sha1};
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tar::Archive;

/// Maximum tarball size (200 MB).
pub const MAX_TARBALL_SIZE: u64 = 200 * 1024 * 1024;

/// Download timeout in seconds.
const DOWNLOAD_TIMEOUT_SECS: u64 = 60;

static EXTRACT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Download a tarball from a URL.
///
/// # Errors
/// Returns an error if the download fails or exceeds the size limit.
pub async fn download_tarball(client: &Client, url: &str, max_bytes: u64) -> Result<Bytes, PkgError> {
    let response = client
        .get(url)
        .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
        .send()
        .await
        .map_err(|e| PkgError::download_failed(format!("Failed to download '{url}': {e}")))?;

    if !response.status().is_success() {
        return Err(PkgError::download_failed(format!(
            "Download failed with status {} for '{url}'",
            response.status()
        )));
    }

    if let Some(len) = response.content_length() {
        if len > max_bytes {
            return Err(PkgError::download_failed(format!(
                "Tarball too large: {len} bytes (max: {max_bytes})"
            )));
        }
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| PkgError::download_failed(format!("Failed to read response body: {e}")))?;

    if bytes.len() as u64 > max_bytes {
        return Err(PkgError::download_failed(format!(
            "Tarball too large: {} bytes (max: {max_bytes})",
            bytes.len()
        )));
    }

    Ok(bytes)
}

/// Hex SHA-1 of `bytes`, the format registries publish as `dist.shasum`.
#[must_use]
pub fn shasum_hex(bytes: &[u8]) -> String {
    hex::encode(Sha1::digest(bytes))
}

/// Check `bytes` against a published shasum. An empty `expected` always passes.
///
/// # Errors
/// Returns `PKG_INTEGRITY_MISMATCH` if the digests differ.
pub fn verify_shasum(bytes: &[u8], expected: &str, name: &str, version: &str) -> Result<(), PkgError> {
    let expected = expected.trim();
    if expected.is_empty() {
        return Ok(());
    }

    let actual = shasum_hex(bytes);
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(PkgError::integrity_mismatch(name, version, expected, &actual))
    }
}

/// Extract a gzipped tarball into `dest` atomically.
///
/// Entries are unpacked into a sibling temp directory with their first path
/// component removed, then the temp directory is renamed onto `dest`. If
/// `dest` already exists (another extraction won the race) this is a no-op.
///
/// # Errors
/// Returns an error if extraction fails or the tarball is invalid.
pub fn extract_tgz_atomic(bytes: &[u8], dest: &Path) -> Result<(), PkgError> {
    let parent = dest
        .parent()
        .ok_or_else(|| PkgError::extract_failed("Destination has no parent"))?;
    fs::create_dir_all(parent)?;

    if dest.exists() {
        return Ok(());
    }

    let temp_dir = temp_sibling(dest);
    if temp_dir.exists() {
        let _ = fs::remove_dir_all(&temp_dir);
    }
    fs::create_dir_all(&temp_dir)?;

    let extracted = match extract_stripped(bytes, &temp_dir) {
        Ok(n) => n,
        Err(e) => {
            let _ = fs::remove_dir_all(&temp_dir);
            return Err(e);
        }
    };

    if extracted == 0 {
        let _ = fs::remove_dir_all(&temp_dir);
        return Err(PkgError::extract_failed("Tarball does not contain any files"));
    }

    match fs::rename(&temp_dir, dest) {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = fs::remove_dir_all(&temp_dir);
            if dest.exists() {
                return Ok(());
            }
            Err(PkgError::extract_failed(format!(
                "Failed to move extracted package to {}: {e}",
                dest.display()
            )))
        }
    }
}

fn temp_sibling(dest: &Path) -> PathBuf {
    let seq = EXTRACT_SEQ.fetch_add(1, Ordering::Relaxed);
    let file_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().replace('/', "_"))
        .unwrap_or_default();
    dest.with_file_name(format!(".tmp-{file_name}-{}-{seq}", std::process::id()))
}

/// Unpack regular files and directories, dropping the first path component.
/// Returns the number of files written.
fn extract_stripped(bytes: &[u8], dest: &Path) -> Result<usize, PkgError> {
    let gz = GzDecoder::new(bytes);
    let mut archive = Archive::new(gz);
    let mut files = 0;

    for entry in archive
        .entries()
        .map_err(|e| PkgError::extract_failed(format!("Failed to read tarball entries: {e}")))?
    {
        let mut entry = entry
            .map_err(|e| PkgError::extract_failed(format!("Failed to read tarball entry: {e}")))?;

        let path = entry
            .path()
            .map_err(|e| PkgError::extract_failed(format!("Failed to read entry path: {e}")))?
            .into_owned();
        let path_str = path.to_string_lossy().into_owned();

        if path.is_absolute() {
            return Err(PkgError::extract_failed(format!(
                "Tarball contains absolute path: {path_str}"
            )));
        }

        let mut relative = PathBuf::new();
        for component in path.components().skip(1) {
            match component {
                Component::Normal(part) => relative.push(part),
                Component::CurDir => {}
                _ => {
                    return Err(PkgError::extract_failed(format!(
                        "Tarball contains path traversal: {path_str}"
                    )));
                }
            }
        }

        // The top-level directory itself.
        if relative.as_os_str().is_empty() {
            continue;
        }

        let dest_path = dest.join(&relative);
        let entry_type = entry.header().entry_type();

        if entry_type.is_dir() {
            fs::create_dir_all(&dest_path)?;
        } else if entry_type.is_file() {
            if let Some(parent) = dest_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = File::create(&dest_path)?;
            io::copy(&mut entry, &mut file)?;
            files += 1;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Ok(mode) = entry.header().mode() {
                    let _ = fs::set_permissions(&dest_path, fs::Permissions::from_mode(mode | 0o600));
                }
            }
        }
        // Symlinks and other special entries are skipped.
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tar::Builder;
    use tempfile::tempdir;

    fn tgz(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut tar_bytes = Vec::new();
        {
            let mut builder = Builder::new(&mut tar_bytes);
            for (path, data) in entries {
                let mut header = tar::Header::new_gnu();
                header.set_path(path).unwrap();
                header.set_size(data.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();
                builder.append(&header, *data).unwrap();
            }
            builder.finish().unwrap();
        }

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar_bytes).unwrap();
        encoder.finish().unwrap()
    }

    fn package_tgz() -> Vec<u8> {
        tgz(&[
            ("package/package.json", br#"{"name":"test","version":"1.0.0"}"#),
            ("package/index.js", b"module.exports = 42;"),
            ("package/lib/util.js", b"exports.x = 1;"),
        ])
    }

    #[test]
    fn test_extract_strips_first_component() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("packages").join("test@1.0.0");

        extract_tgz_atomic(&package_tgz(), &dest).unwrap();

        assert!(dest.join("package.json").exists());
        assert!(dest.join("index.js").exists());
        assert!(dest.join("lib").join("util.js").exists());
        assert!(!dest.join("package").exists());
    }

    #[test]
    fn test_extract_twice_is_idempotent() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("test@1.0.0");

        extract_tgz_atomic(&package_tgz(), &dest).unwrap();
        extract_tgz_atomic(&package_tgz(), &dest).unwrap();

        assert!(dest.join("package.json").exists());
    }

    #[test]
    fn test_non_package_prefix() {
        let archive = tgz(&[("node/index.d.ts", b"export {};")]);
        let dir = tempdir().unwrap();
        let dest = dir.path().join("@types").join("node@20.0.0");

        extract_tgz_atomic(&archive, &dest).unwrap();
        assert!(dest.join("index.d.ts").exists());
    }

    #[test]
    fn test_reject_empty_tarball() {
        let archive = tgz(&[]);
        let dir = tempdir().unwrap();
        let dest = dir.path().join("empty@1.0.0");

        assert!(extract_tgz_atomic(&archive, &dest).is_err());
        assert!(!dest.exists());
    }

    #[test]
    fn test_reject_garbage() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("garbage@1.0.0");

        let err = extract_tgz_atomic(b"definitely not gzip", &dest).unwrap_err();
        assert_eq!(err.code(), crate::pkg::error::codes::PKG_EXTRACT_FAILED);
        assert!(!dest.exists());
    }

    #[test]
    fn test_no_temp_dirs_left_behind() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("test@1.0.0");
        extract_tgz_atomic(&package_tgz(), &dest).unwrap();

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_shasum() {
        // sha1("abc")
        assert_eq!(shasum_hex(b"abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");

        assert!(verify_shasum(b"abc", "a9993e364706816aba3e25717850c26c9cd0d89d", "a", "1").is_ok());
        assert!(verify_shasum(b"abc", "A9993E364706816ABA3E25717850C26C9CD0D89D", "a", "1").is_ok());
        assert!(verify_shasum(b"abc", "", "a", "1").is_ok());

        let err = verify_shasum(b"abd", "a9993e364706816aba3e25717850c26c9cd0d89d", "a", "1")
            .unwrap_err();
        assert_eq!(err.code(), crate::pkg::error::codes::PKG_INTEGRITY_MISMATCH);
    }
}
