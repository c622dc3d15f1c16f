//! Module metadata discovery and validation.
//!
//! Locates `terrareg.json` (preferred) or `.terrareg.json` in the module
//! root and parses the optional attribute set modules may declare. Also
//! loads `.terraformignore` into a [`PathFilter`] for the archive
//! generator. A module with no metadata file is perfectly valid.

use crate::error::Result;
use crate::pathspec::PathFilter;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// File names probed for metadata, in preference order.
const METADATA_FILENAMES: [&str; 2] = ["terrareg.json", ".terrareg.json"];

/// Ignore-file name consulted for the pathspec filter.
const IGNORE_FILENAME: &str = ".terraformignore";

/// Parsed module metadata. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleMetadata {
    /// Module owner
    pub owner: Option<String>,
    /// Module description
    pub description: Option<String>,
    /// Clone URL override for the source repository
    pub repo_clone_url: Option<String>,
    /// Browse URL override for the source repository
    pub repo_browse_url: Option<String>,
    /// Issue tracker URL
    pub issues_url: Option<String>,
    /// License identifier
    pub license: Option<String>,
    /// Free-form provider attribute map
    pub provider: HashMap<String, String>,
    /// Opaque input template passed through to the UI
    pub variable_template: Option<serde_json::Value>,
}

impl ModuleMetadata {
    /// Resolve a requested attribute: dedicated fields first, then the
    /// `provider` map.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<String> {
        match name {
            "owner" => self.owner.clone(),
            "description" => self.description.clone(),
            "repo_clone_url" => self.repo_clone_url.clone(),
            "repo_browse_url" => self.repo_browse_url.clone(),
            "issues_url" => self.issues_url.clone(),
            "license" => self.license.clone(),
            other => self.provider.get(other).cloned(),
        }
    }

    /// Check that every requested attribute is present and non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataValidation`](crate::error::RegistryError::MetadataValidation)
    /// enumerating every missing attribute.
    pub fn check_required_attributes(&self, required: &[String]) -> Result<()> {
        let missing: Vec<String> = required
            .iter()
            .filter(|name| {
                self.attribute(name)
                    .map_or(true, |value| value.trim().is_empty())
            })
            .cloned()
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(crate::err!(MetadataValidation { missing: missing }))
        }
    }
}

/// The outcome of metadata discovery for a module root.
#[derive(Debug, Clone, Default)]
pub struct MetadataReadResult {
    /// The parsed metadata, when a metadata file existed
    pub metadata: Option<ModuleMetadata>,
    /// Which file the metadata came from
    pub source_file: Option<String>,
    /// The parsed `.terraformignore` filter (empty when absent)
    pub path_filter: PathFilter,
}

/// Read metadata and the ignore filter from a module root.
///
/// # Errors
///
/// Returns an error when a metadata file exists but is unreadable or not
/// valid JSON. A missing metadata file is not an error.
pub async fn read_module_metadata(module_root: &Path) -> Result<MetadataReadResult> {
    let mut result = MetadataReadResult::default();

    for filename in METADATA_FILENAMES {
        let candidate = module_root.join(filename);
        if !candidate.is_file() {
            continue;
        }

        let content = tokio::fs::read_to_string(&candidate)
            .await
            .map_err(|e| crate::error::RegistryError::io(&candidate, e, file!(), line!()))?;
        let metadata: ModuleMetadata = serde_json::from_str(&content).map_err(|e| {
            crate::err!(InvalidInput {
                message: format!("invalid metadata in {filename}: {e}"),
            })
        })?;

        tracing::debug!(file = filename, "Parsed module metadata");
        result.metadata = Some(metadata);
        result.source_file = Some(filename.to_string());
        break;
    }

    let ignore_path = module_root.join(IGNORE_FILENAME);
    if ignore_path.is_file() {
        let content = tokio::fs::read_to_string(&ignore_path)
            .await
            .map_err(|e| crate::error::RegistryError::io(&ignore_path, e, file!(), line!()))?;
        result.path_filter = PathFilter::from_lines(&content);
        tracing::debug!(rules = result.path_filter.len(), "Loaded .terraformignore");
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata_with(license: Option<&str>) -> ModuleMetadata {
        ModuleMetadata {
            owner: Some("platform-team".to_string()),
            description: Some("VPC module".to_string()),
            license: license.map(String::from),
            provider: HashMap::from([("support_tier".to_string(), "gold".to_string())]),
            ..ModuleMetadata::default()
        }
    }

    #[test]
    fn test_attribute_resolution() {
        let metadata = metadata_with(Some("MIT"));
        assert_eq!(metadata.attribute("owner").as_deref(), Some("platform-team"));
        assert_eq!(metadata.attribute("license").as_deref(), Some("MIT"));
        // Unknown names fall through to the provider map
        assert_eq!(metadata.attribute("support_tier").as_deref(), Some("gold"));
        assert!(metadata.attribute("nonexistent").is_none());
    }

    #[test]
    fn test_required_attributes_pass() {
        let metadata = metadata_with(Some("MIT"));
        metadata
            .check_required_attributes(&["owner".to_string(), "license".to_string()])
            .unwrap();
    }

    #[test]
    fn test_required_attributes_enumerate_missing() {
        let metadata = metadata_with(None);
        let err = metadata
            .check_required_attributes(&[
                "owner".to_string(),
                "license".to_string(),
                "issues_url".to_string(),
            ])
            .unwrap_err();
        match err {
            crate::error::RegistryError::MetadataValidation { missing, .. } => {
                assert_eq!(missing, vec!["license".to_string(), "issues_url".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_metadata_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = read_module_metadata(dir.path()).await.unwrap();
        assert!(result.metadata.is_none());
        assert!(result.path_filter.is_empty());
    }

    #[tokio::test]
    async fn test_terrareg_json_preferred_over_hidden() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("terrareg.json"), r#"{"owner": "visible"}"#)
            .await
            .unwrap();
        tokio::fs::write(dir.path().join(".terrareg.json"), r#"{"owner": "hidden"}"#)
            .await
            .unwrap();

        let result = read_module_metadata(dir.path()).await.unwrap();
        assert_eq!(result.source_file.as_deref(), Some("terrareg.json"));
        assert_eq!(result.metadata.unwrap().owner.as_deref(), Some("visible"));
    }

    #[tokio::test]
    async fn test_hidden_metadata_fallback() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(".terrareg.json"), r#"{"license": "MIT"}"#)
            .await
            .unwrap();

        let result = read_module_metadata(dir.path()).await.unwrap();
        assert_eq!(result.source_file.as_deref(), Some(".terrareg.json"));
        assert_eq!(result.metadata.unwrap().license.as_deref(), Some("MIT"));
    }

    #[tokio::test]
    async fn test_invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("terrareg.json"), "{not json")
            .await
            .unwrap();

        assert!(read_module_metadata(dir.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_terraformignore_loaded() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(".terraformignore"), "# header\n*.log\nvendor/\n")
            .await
            .unwrap();

        let result = read_module_metadata(dir.path()).await.unwrap();
        assert_eq!(result.path_filter.len(), 2);
        assert!(result.path_filter.matches("debug.log"));
        assert!(result.path_filter.matches("vendor/lib/main.tf"));
    }
}
