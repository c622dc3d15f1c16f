//! Downloadable archive generation.
//!
//! Produces ZIP (deflate) and tar.gz artifacts containing every eligible
//! file under a module root, after applying the module's ignore filter.
//! Entries are written in sorted relative-path order with pinned metadata
//! timestamps, so repeated generations over identical inputs produce
//! byte-identical archives.
//!
//! A failure while writing removes the partial artifact.

use crate::error::{RegistryError, Result};
use crate::pathspec::PathFilter;
use crate::types::ArchiveFormat;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::CompressionMethod;

/// Collect the files an archive will contain: `(absolute, relative)` pairs
/// sorted by relative path.
///
/// The VCS bookkeeping directory is never shipped; everything else is
/// subject to the ignore filter.
///
/// # Errors
///
/// Returns an I/O error if the tree cannot be walked.
pub fn collect_files(root: &Path, filter: &PathFilter) -> Result<Vec<(PathBuf, String)>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).into_iter().filter_entry(|e| {
        e.file_name()
            .to_str()
            .map_or(true, |name| !(e.file_type().is_dir() && name == ".git"))
    }) {
        let entry = entry.map_err(|e| {
            crate::err!(Internal {
                message: format!("failed to walk module tree: {e}"),
            })
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| {
                crate::err!(Internal {
                    message: format!("walked path escaped the module root: {e}"),
                })
            })?
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if filter.matches(&relative) {
            tracing::debug!(path = %relative, "Excluded from archive by ignore rule");
            continue;
        }

        files.push((entry.path().to_path_buf(), relative));
    }

    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}

/// Generate the requested archive formats for a module tree.
///
/// Returns the paths of the artifacts that were written, one per format.
///
/// # Errors
///
/// Any file failure aborts the affected archive and removes the partial
/// output before the error propagates.
pub async fn generate_archives(
    root: &Path,
    filter: &PathFilter,
    formats: &[ArchiveFormat],
    output_dir: &Path,
    basename: &str,
) -> Result<Vec<PathBuf>> {
    let files = collect_files(root, filter)?;
    tracing::info!(
        files = files.len(),
        formats = formats.len(),
        basename = basename,
        "Generating module archives"
    );

    fs::create_dir_all(output_dir)
        .map_err(|e| RegistryError::io(output_dir, e, file!(), line!()))?;

    let mut written = Vec::new();
    for format in formats {
        let target = output_dir.join(format!("{basename}.{}", format.extension()));
        let result = {
            let files = files.clone();
            let target = target.clone();
            let format = *format;
            tokio::task::spawn_blocking(move || match format {
                ArchiveFormat::Zip => write_zip(&files, &target),
                ArchiveFormat::TarGz => write_tar_gz(&files, &target),
            })
            .await
            .map_err(|e| {
                crate::err!(Internal {
                    message: format!("archive task failed: {e}"),
                })
            })?
        };

        if let Err(e) = result {
            // Never leave a truncated artifact behind
            let _ = fs::remove_file(&target);
            return Err(e);
        }
        written.push(target);
    }

    Ok(written)
}

/// Write a deflate-compressed ZIP with pinned entry timestamps.
fn write_zip(files: &[(PathBuf, String)], target: &Path) -> Result<()> {
    let file = fs::File::create(target)
        .map_err(|e| RegistryError::io(target, e, file!(), line!()))?;
    let mut writer = zip::ZipWriter::new(file);

    for (absolute, relative) in files {
        let metadata = fs::metadata(absolute)
            .map_err(|e| RegistryError::io(absolute, e, file!(), line!()))?;

        let mut options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(zip::DateTime::default());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            options = options.unix_permissions(metadata.permissions().mode());
        }
        #[cfg(not(unix))]
        {
            let _ = &metadata;
        }

        writer.start_file(relative.as_str(), options).map_err(|e| {
            crate::err!(Internal {
                message: format!("failed to start zip entry '{relative}': {e}"),
            })
        })?;

        let content = fs::read(absolute)
            .map_err(|e| RegistryError::io(absolute, e, file!(), line!()))?;
        writer
            .write_all(&content)
            .map_err(|e| RegistryError::io(target, e, file!(), line!()))?;
    }

    writer.finish().map_err(|e| {
        crate::err!(Internal {
            message: format!("failed to finish zip archive: {e}"),
        })
    })?;
    Ok(())
}

/// Write a gzip-compressed tarball of regular files with pinned metadata.
fn write_tar_gz(files: &[(PathBuf, String)], target: &Path) -> Result<()> {
    let file = fs::File::create(target)
        .map_err(|e| RegistryError::io(target, e, file!(), line!()))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for (absolute, relative) in files {
        let metadata = fs::metadata(absolute)
            .map_err(|e| RegistryError::io(absolute, e, file!(), line!()))?;
        let content = fs::read(absolute)
            .map_err(|e| RegistryError::io(absolute, e, file!(), line!()))?;

        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            header.set_mode(metadata.permissions().mode());
        }
        #[cfg(not(unix))]
        {
            let _ = &metadata;
            header.set_mode(0o644);
        }
        header.set_cksum();

        builder
            .append_data(&mut header, relative.as_str(), content.as_slice())
            .map_err(|e| RegistryError::io(target, e, file!(), line!()))?;
    }

    let encoder = builder.into_inner().map_err(|e| RegistryError::io(target, e, file!(), line!()))?;
    encoder
        .finish()
        .map_err(|e| RegistryError::io(target, e, file!(), line!()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn module_fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (rel, content) in [
            ("main.tf", "resource \"aws_vpc\" \"main\" {}"),
            ("variables.tf", "variable \"a\" {}"),
            ("docs/usage.md", "# usage"),
            (".git/HEAD", "ref: refs/heads/main"),
            ("secrets.auto.tfvars", "password = \"x\""),
        ] {
            let path = dir.path().join(rel);
            tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
            tokio::fs::write(path, content).await.unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn test_collect_respects_filter_and_skips_git() {
        let dir = module_fixture().await;
        let filter = PathFilter::from_lines("*.tfvars\n");

        let files = collect_files(dir.path(), &filter).unwrap();
        let relative: Vec<&str> = files.iter().map(|(_, r)| r.as_str()).collect();
        assert_eq!(relative, vec!["docs/usage.md", "main.tf", "variables.tf"]);
    }

    #[tokio::test]
    async fn test_generate_both_formats() {
        let dir = module_fixture().await;
        let out = tempfile::tempdir().unwrap();

        let written = generate_archives(
            dir.path(),
            &PathFilter::empty(),
            &[ArchiveFormat::Zip, ArchiveFormat::TarGz],
            out.path(),
            "net-aws-1.0.0",
        )
        .await
        .unwrap();

        assert_eq!(written.len(), 2);
        assert!(out.path().join("net-aws-1.0.0.zip").exists());
        assert!(out.path().join("net-aws-1.0.0.tar.gz").exists());
    }

    #[tokio::test]
    async fn test_archives_are_deterministic() {
        let dir = module_fixture().await;
        let out = tempfile::tempdir().unwrap();
        let filter = PathFilter::from_lines("*.tfvars\n");
        let formats = [ArchiveFormat::Zip, ArchiveFormat::TarGz];

        let first = generate_archives(dir.path(), &filter, &formats, out.path(), "one")
            .await
            .unwrap();
        let second = generate_archives(dir.path(), &filter, &formats, out.path(), "two")
            .await
            .unwrap();

        for (a, b) in first.iter().zip(second.iter()) {
            let bytes_a = tokio::fs::read(a).await.unwrap();
            let bytes_b = tokio::fs::read(b).await.unwrap();
            assert_eq!(bytes_a, bytes_b, "{} and {} differ", a.display(), b.display());
        }
    }

    #[tokio::test]
    async fn test_zip_contains_sorted_entries() {
        let dir = module_fixture().await;
        let out = tempfile::tempdir().unwrap();

        let written = generate_archives(
            dir.path(),
            &PathFilter::empty(),
            &[ArchiveFormat::Zip],
            out.path(),
            "sorted",
        )
        .await
        .unwrap();

        let file = std::fs::File::open(&written[0]).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }
}
