//! Module source preparation.
//!
//! Turns an ingest request into a local directory rooted at the module's
//! source tree. Three flavours are supported:
//!
//! - **Path**: an existing directory is used as-is, with no cleanup.
//! - **Archive**: an uploaded ZIP is extracted into a scratch directory.
//! - **Git**: the provider's repository is cloned into a scratch directory,
//!   the version tag checked out, and the provider's subpath applied.
//!
//! Scratch directories are owned by the returned [`PreparedSource`] and are
//! removed when it drops, on every exit path.

pub mod archive;
pub mod git;

use crate::config::Config;
use crate::error::Result;
use crate::types::{IngestRequest, ModuleProvider, SourceType};
use crate::version::Version;
use std::path::PathBuf;
use tempfile::TempDir;

/// A locally materialised module source.
///
/// Holds the scratch directory (when one was created) so the checkout or
/// extraction lives exactly as long as the ingestion needs it.
#[derive(Debug)]
pub struct PreparedSource {
    /// Directory rooted at the module source tree
    pub path: PathBuf,
    /// Commit the source was checked out from, for git sources
    pub commit_sha: Option<String>,
    /// Scratch directory keeping the checkout alive; dropped on cleanup
    _scratch: Option<TempDir>,
}

/// Prepares module sources per the request's source type.
#[derive(Debug, Clone)]
pub struct SourcePreparer {
    config: Config,
}

impl SourcePreparer {
    /// Create a preparer from the process configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Materialise the module source for an ingest request.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` when the request lacks the path its source type needs
    /// - `Configuration` when a git provider has no clone URL
    /// - tagged `Subprocess` errors when git fails
    pub async fn prepare(
        &self,
        request: &IngestRequest,
        provider: &ModuleProvider,
        version: &Version,
    ) -> Result<PreparedSource> {
        match request.source_type {
            SourceType::Path => self.prepare_path(request),
            SourceType::Archive => self.prepare_archive(request).await,
            SourceType::Git => self.prepare_git(request, provider, version).await,
        }
    }

    fn prepare_path(&self, request: &IngestRequest) -> Result<PreparedSource> {
        let path = request.module_path.clone().ok_or_else(|| {
            crate::err!(InvalidInput {
                message: "source type 'path' requires module_path".to_string(),
            })
        })?;
        if !path.is_dir() {
            return Err(crate::err!(InvalidInput {
                message: format!("module path '{}' is not a directory", path.display()),
            }));
        }
        Ok(PreparedSource {
            path,
            commit_sha: None,
            _scratch: None,
        })
    }

    async fn prepare_archive(&self, request: &IngestRequest) -> Result<PreparedSource> {
        let archive_path = request.archive_path.clone().ok_or_else(|| {
            crate::err!(InvalidInput {
                message: "source type 'archive' requires archive_path".to_string(),
            })
        })?;

        let scratch = self.scratch_dir("extract")?;
        let extracted = archive::extract_zip(&archive_path, scratch.path()).await?;
        tracing::info!(
            archive = %archive_path.display(),
            files = extracted.len(),
            "Extracted upload archive"
        );

        Ok(PreparedSource {
            path: scratch.path().to_path_buf(),
            commit_sha: None,
            _scratch: Some(scratch),
        })
    }

    async fn prepare_git(
        &self,
        request: &IngestRequest,
        provider: &ModuleProvider,
        version: &Version,
    ) -> Result<PreparedSource> {
        let clone_url = provider.clone_url()?;
        let tag = request
            .git_tag
            .clone()
            .unwrap_or_else(|| provider.tag_for_version(version));

        let scratch = self.scratch_dir("clone")?;
        let checkout = scratch.path().join("repo");

        let git = git::GitSource::new(self.config.git.clone());
        git.clone_module(&clone_url, Some(&tag), &checkout).await?;
        let commit_sha = git.head_sha(&checkout).await?;

        let module_root = match provider.git_path.as_deref().filter(|p| !p.is_empty()) {
            Some(subpath) => {
                let candidate = checkout.join(subpath.trim_start_matches('/'));
                if !candidate.is_dir() {
                    return Err(crate::err!(Configuration {
                        message: format!(
                            "provider subpath '{subpath}' does not exist in {}",
                            provider.identity()
                        ),
                    }));
                }
                candidate
            }
            None => checkout,
        };

        tracing::info!(
            provider = %provider.identity(),
            tag = %tag,
            sha = %commit_sha,
            "Prepared git source"
        );

        Ok(PreparedSource {
            path: module_root,
            commit_sha: Some(commit_sha),
            _scratch: Some(scratch),
        })
    }

    /// Create a scratch directory under the registry's upload area,
    /// falling back to the system temp dir when it isn't writable.
    fn scratch_dir(&self, prefix: &str) -> Result<TempDir> {
        let base = self.config.paths.upload_dir();
        if std::fs::create_dir_all(&base).is_ok() {
            if let Ok(dir) = tempfile::Builder::new()
                .prefix(&format!("terravault-{prefix}-"))
                .tempdir_in(&base)
            {
                return Ok(dir);
            }
        }
        tempfile::Builder::new()
            .prefix(&format!("terravault-{prefix}-"))
            .tempdir()
            .map_err(|e| crate::error::RegistryError::io(std::env::temp_dir(), e, file!(), line!()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IngestOptions;

    fn provider_fixture() -> ModuleProvider {
        ModuleProvider {
            id: 1,
            namespace: "alice".to_string(),
            module: "net".to_string(),
            provider: "aws".to_string(),
            repo_clone_url_template: None,
            tag_format: "v{version}".to_string(),
            git_path: None,
            repo_browse_url_template: None,
            verified: false,
        }
    }

    fn request(source_type: SourceType, module_path: Option<PathBuf>) -> IngestRequest {
        IngestRequest {
            namespace: "alice".to_string(),
            module: "net".to_string(),
            provider: "aws".to_string(),
            version: Some("1.0.0".to_string()),
            git_tag: None,
            archive_path: None,
            module_path,
            source_type,
            options: IngestOptions::default(),
        }
    }

    #[tokio::test]
    async fn test_path_source_used_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let preparer = SourcePreparer::new(Config::default());
        let version = Version::parse("1.0.0").unwrap();

        let prepared = preparer
            .prepare(
                &request(SourceType::Path, Some(dir.path().to_path_buf())),
                &provider_fixture(),
                &version,
            )
            .await
            .unwrap();
        assert_eq!(prepared.path, dir.path());
        assert!(prepared.commit_sha.is_none());
    }

    #[tokio::test]
    async fn test_path_source_requires_directory() {
        let preparer = SourcePreparer::new(Config::default());
        let version = Version::parse("1.0.0").unwrap();

        let err = preparer
            .prepare(
                &request(SourceType::Path, Some(PathBuf::from("/no/such/dir"))),
                &provider_fixture(),
                &version,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::RegistryError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_missing_module_path_is_invalid_input() {
        let preparer = SourcePreparer::new(Config::default());
        let version = Version::parse("1.0.0").unwrap();

        let err = preparer
            .prepare(&request(SourceType::Path, None), &provider_fixture(), &version)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::RegistryError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_git_source_without_clone_url_is_configuration_error() {
        let preparer = SourcePreparer::new(Config::default());
        let version = Version::parse("1.0.0").unwrap();

        let err = preparer
            .prepare(&request(SourceType::Git, None), &provider_fixture(), &version)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::RegistryError::Configuration { .. }));
    }
}
