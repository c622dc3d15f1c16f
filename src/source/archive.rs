//! ZIP extraction for uploaded module archives.
//!
//! Entries whose normalised path escapes the extraction root (`..` segments
//! or an absolute prefix) are silently dropped, per the registry's upload
//! contract. File mode bits are preserved when the archive carries them.

use crate::error::{RegistryError, Result};
use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use zip::ZipArchive;

/// Extract a ZIP archive into `dest`, returning the relative paths of the
/// files that were written.
///
/// # Errors
///
/// Returns an error when the archive cannot be opened or an entry cannot
/// be written. Unsafe entries are skipped, not errors.
pub async fn extract_zip(archive_path: &Path, dest: &Path) -> Result<Vec<String>> {
    let archive_path = archive_path.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || extract_zip_blocking(&archive_path, &dest))
        .await
        .map_err(|e| {
            crate::err!(Internal {
                message: format!("archive extraction task failed: {e}"),
            })
        })?
}

fn extract_zip_blocking(archive_path: &Path, dest: &Path) -> Result<Vec<String>> {
    let file = fs::File::open(archive_path)
        .map_err(|e| RegistryError::io(archive_path, e, file!(), line!()))?;
    let mut archive = ZipArchive::new(file).map_err(|e| {
        crate::err!(InvalidInput {
            message: format!("not a readable ZIP archive: {e}"),
        })
    })?;

    fs::create_dir_all(dest).map_err(|e| RegistryError::io(dest, e, file!(), line!()))?;

    let mut extracted = Vec::new();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(|e| {
            crate::err!(InvalidInput {
                message: format!("corrupt ZIP entry at index {index}: {e}"),
            })
        })?;

        let raw_name = entry.name().to_string();
        let Some(relative) = safe_entry_path(&raw_name) else {
            tracing::warn!(entry = %raw_name, "Dropping unsafe archive entry");
            continue;
        };

        let target = dest.join(&relative);
        if entry.is_dir() {
            fs::create_dir_all(&target)
                .map_err(|e| RegistryError::io(&target, e, file!(), line!()))?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| RegistryError::io(parent, e, file!(), line!()))?;
        }

        let mut content = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
        entry
            .read_to_end(&mut content)
            .map_err(|e| RegistryError::io(&target, e, file!(), line!()))?;
        fs::write(&target, &content)
            .map_err(|e| RegistryError::io(&target, e, file!(), line!()))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&target, fs::Permissions::from_mode(mode));
        }

        extracted.push(
            relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
        );
    }

    extracted.sort();
    Ok(extracted)
}

/// Normalise an archive entry name, rejecting anything that could escape
/// the extraction root.
fn safe_entry_path(name: &str) -> Option<PathBuf> {
    let name = name.replace('\\', "/");
    if name.starts_with('/') {
        return None;
    }

    let path = Path::new(&name);
    let mut normalised = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => normalised.push(part),
            Component::CurDir => {}
            // `..`, a root, or a windows prefix all escape the root
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    if normalised.as_os_str().is_empty() {
        None
    } else {
        Some(normalised)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;

    fn build_zip(dir: &Path, entries: &[(&str, &str)]) -> PathBuf {
        let path = dir.join("upload.zip");
        let file = fs::File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, content) in entries {
            writer.start_file(*name, FileOptions::default()).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    #[test]
    fn test_safe_entry_path_normal() {
        assert_eq!(safe_entry_path("a/b/main.tf"), Some(PathBuf::from("a/b/main.tf")));
        assert_eq!(safe_entry_path("./main.tf"), Some(PathBuf::from("main.tf")));
    }

    #[test]
    fn test_safe_entry_path_rejects_traversal() {
        assert!(safe_entry_path("../evil.tf").is_none());
        assert!(safe_entry_path("a/../../evil.tf").is_none());
        assert!(safe_entry_path("/etc/x").is_none());
        assert!(safe_entry_path("").is_none());
    }

    #[tokio::test]
    async fn test_extract_drops_unsafe_entries() {
        let scratch = tempfile::tempdir().unwrap();
        let archive = build_zip(
            scratch.path(),
            &[
                ("a.tf", "resource {}"),
                ("../evil.tf", "boom"),
                ("/etc/x", "boom"),
            ],
        );
        let dest = tempfile::tempdir().unwrap();

        let extracted = extract_zip(&archive, dest.path()).await.unwrap();
        assert_eq!(extracted, vec!["a.tf".to_string()]);
        assert!(dest.path().join("a.tf").exists());
        assert!(!dest.path().join("evil.tf").exists());
    }

    #[tokio::test]
    async fn test_extract_preserves_nested_layout() {
        let scratch = tempfile::tempdir().unwrap();
        let archive = build_zip(
            scratch.path(),
            &[("main.tf", "{}"), ("modules/vpc/main.tf", "{}")],
        );
        let dest = tempfile::tempdir().unwrap();

        let extracted = extract_zip(&archive, dest.path()).await.unwrap();
        assert_eq!(
            extracted,
            vec!["main.tf".to_string(), "modules/vpc/main.tf".to_string()]
        );
        assert!(dest.path().join("modules/vpc/main.tf").exists());
    }

    #[tokio::test]
    async fn test_extract_rejects_non_zip() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("not.zip");
        fs::write(&bogus, b"plain text").unwrap();

        let err = extract_zip(&bogus, &dir.path().join("out")).await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidInput { .. }));
    }
}
