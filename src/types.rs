//! Core data types used throughout TerraVault.
//!
//! This module defines the fundamental data structures for representing:
//! - Namespaces, module providers and module versions
//! - The per-version details aggregate and owned files
//! - Ingestion requests, options and per-phase results

use crate::version::Version;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// The flavour of a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceType {
    /// No particular ownership semantics
    #[default]
    None,
    /// Owned by an individual user
    User,
    /// Owned by a team
    Team,
}

impl NamespaceType {
    /// Stable string form used in storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::User => "user",
            Self::Team => "team",
        }
    }

    /// Parse the stored string form.
    #[must_use]
    pub fn from_str_or_default(s: &str) -> Self {
        match s {
            "user" => Self::User,
            "team" => Self::Team,
            _ => Self::None,
        }
    }
}

/// A registry namespace. Unique by name; owns module providers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    /// Row id assigned on persist
    pub id: i64,
    /// Namespace identifier
    pub name: String,
    /// Ownership flavour
    pub namespace_type: NamespaceType,
}

/// A `(namespace, module, provider)` triple with its git configuration.
///
/// Exclusively owns its module versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleProvider {
    /// Row id assigned on persist
    pub id: i64,
    /// Owning namespace name
    pub namespace: String,
    /// Module name
    pub module: String,
    /// Provider name (e.g. "aws")
    pub provider: String,
    /// Clone-URL template; `{namespace}`, `{name}` and `{provider}` are substituted
    pub repo_clone_url_template: Option<String>,
    /// Tag format template; `{version}` is substituted (e.g. `v{version}`)
    pub tag_format: String,
    /// Subdirectory within the cloned repository holding the module
    pub git_path: Option<String>,
    /// Browse-URL template for source links
    pub repo_browse_url_template: Option<String>,
    /// Whether this provider is marked verified
    pub verified: bool,
}

impl ModuleProvider {
    /// The `namespace/module/provider` identity string.
    #[must_use]
    pub fn identity(&self) -> String {
        format!("{}/{}/{}", self.namespace, self.module, self.provider)
    }

    /// Render the clone URL for this provider.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no clone-URL template is set.
    pub fn clone_url(&self) -> crate::Result<String> {
        let template = self.repo_clone_url_template.as_deref().ok_or_else(|| {
            crate::err!(Configuration {
                message: format!("module provider {} has no repository clone URL", self.identity()),
            })
        })?;
        Ok(template
            .replace("{namespace}", &self.namespace)
            .replace("{name}", &self.module)
            .replace("{provider}", &self.provider))
    }

    /// Render the git tag for a version using the provider's tag format.
    #[must_use]
    pub fn tag_for_version(&self, version: &Version) -> String {
        self.tag_format.replace("{version}", &version.to_string())
    }
}

/// A persisted module version row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleVersionRow {
    /// Row id assigned on persist (0 before the first insert)
    pub id: i64,
    /// Owning module provider id
    pub provider_id: i64,
    /// The semantic version value
    pub version: Version,
    /// True iff the version carries a prerelease label
    pub beta: bool,
    /// Whether the version is visible to consumers
    pub published: bool,
    /// Module owner, from metadata
    pub owner: Option<String>,
    /// Module description, from metadata
    pub description: Option<String>,
    /// The commit the version was built from
    pub git_sha: Option<String>,
}

impl ModuleVersionRow {
    /// A fresh, unpersisted version row for a provider.
    #[must_use]
    pub fn new(provider_id: i64, version: Version) -> Self {
        let beta = version.is_beta();
        Self {
            id: 0,
            provider_id,
            version,
            beta,
            published: false,
            owner: None,
            description: None,
            git_sha: None,
        }
    }
}

/// The per-version details blob aggregate.
///
/// Each field is independently settable; the `with_*` builders yield a new
/// value so phases can layer their outputs without mutating shared state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDetails {
    /// README content (raw markdown)
    pub readme: Option<String>,
    /// Raw terraform-docs output
    pub terraform_docs: Option<String>,
    /// tfsec scan result JSON
    pub tfsec: Option<String>,
    /// infracost result JSON
    pub infracost: Option<String>,
    /// `terraform graph` output
    pub terraform_graph: Option<String>,
    /// `.terraform/modules/modules.json` content
    pub terraform_modules: Option<String>,
    /// `terraform version -json` output
    pub terraform_version: Option<String>,
}

impl ModuleDetails {
    /// Set the README content.
    #[must_use]
    pub fn with_readme(mut self, readme: Option<String>) -> Self {
        self.readme = readme;
        self
    }

    /// Set the terraform-docs output.
    #[must_use]
    pub fn with_terraform_docs(mut self, docs: Option<String>) -> Self {
        self.terraform_docs = docs;
        self
    }

    /// Set the tfsec result blob.
    #[must_use]
    pub fn with_tfsec(mut self, tfsec: Option<String>) -> Self {
        self.tfsec = tfsec;
        self
    }

    /// Set the infracost result blob.
    #[must_use]
    pub fn with_infracost(mut self, infracost: Option<String>) -> Self {
        self.infracost = infracost;
        self
    }

    /// Set the dependency graph text.
    #[must_use]
    pub fn with_terraform_graph(mut self, graph: Option<String>) -> Self {
        self.terraform_graph = graph;
        self
    }

    /// Set the modules.json content.
    #[must_use]
    pub fn with_terraform_modules(mut self, modules: Option<String>) -> Self {
        self.terraform_modules = modules;
        self
    }

    /// Set the `terraform version -json` output.
    #[must_use]
    pub fn with_terraform_version(mut self, version: Option<String>) -> Self {
        self.terraform_version = version;
        self
    }
}

/// A submodule discovered under `./modules`, keyed by relative path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submodule {
    /// Row id assigned on persist
    pub id: i64,
    /// Owning module version id
    pub module_version_id: i64,
    /// Relative path within the module tree (e.g. `modules/vpc`)
    pub path: String,
}

/// An example discovered under `./examples`, keyed by relative path.
///
/// Examples additionally own their extracted files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    /// Row id assigned on persist
    pub id: i64,
    /// Owning module version id
    pub module_version_id: i64,
    /// Relative path within the module tree (e.g. `examples/basic`)
    pub path: String,
}

/// A file belonging to an example.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExampleFile {
    /// Row id assigned on persist
    pub id: i64,
    /// Owning example id
    pub example_id: i64,
    /// Path relative to the example directory
    pub path: String,
    /// Raw file content
    pub content: Vec<u8>,
}

/// A stored per-version file: `(module_version_id, path)` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleVersionFile {
    /// Row id assigned on persist
    pub id: i64,
    /// Owning module version id
    pub module_version_id: i64,
    /// Forward-slash relative path, no `..` segments, no absolute prefix
    pub path: String,
    /// Stored content (possibly post-processed)
    pub content: Vec<u8>,
    /// Derived content type (e.g. `text/markdown`)
    pub content_type: String,
}

/// Historical mapping from a moved `(namespace, module, provider)` triple
/// to the module provider now serving it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleProviderRedirect {
    /// Row id assigned on persist
    pub id: i64,
    /// Previous namespace name
    pub from_namespace: String,
    /// Previous module name
    pub from_module: String,
    /// Previous provider name
    pub from_provider: String,
    /// The provider rows now serving this triple
    pub to_module_provider_id: i64,
}

/// How a module source reaches the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Clone from the provider's git repository
    Git,
    /// Extract an uploaded ZIP archive
    Archive,
    /// Use a local filesystem path as-is
    Path,
}

/// Output archive formats the generator can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum ArchiveFormat {
    /// Deflate-compressed ZIP
    #[serde(rename = "zip")]
    #[value(name = "zip")]
    Zip,
    /// Gzip-compressed tarball
    #[serde(rename = "tar.gz")]
    #[value(name = "tar.gz")]
    TarGz,
}

impl ArchiveFormat {
    /// The file extension used for generated artifacts.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::TarGz => "tar.gz",
        }
    }
}

/// Per-phase toggles and knobs for an ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestOptions {
    /// Skip ZIP extraction even if an archive path is present
    pub skip_archive_extraction: bool,
    /// Skip the terraform init/graph/version phase
    pub skip_terraform_processing: bool,
    /// Skip terrareg.json metadata processing
    pub skip_metadata_processing: bool,
    /// Skip the tfsec scan
    pub skip_security_scanning: bool,
    /// Skip per-file content storage
    pub skip_file_content_storage: bool,
    /// Skip archive generation
    pub skip_archive_generation: bool,
    /// Whether security scanning is enabled at all
    pub security_scan_enabled: bool,
    /// Whether Markdown post-processing is applied to stored files
    pub file_processing_enabled: bool,
    /// Whether to produce downloadable archives
    pub generate_archives: bool,
    /// Which archive formats to produce
    pub archive_formats: Vec<ArchiveFormat>,
    /// Metadata attributes that must be present for the version to index
    pub required_metadata_fields: Vec<String>,
    /// Whether the wrapper should publish on success
    pub publish_module: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            skip_archive_extraction: false,
            skip_terraform_processing: false,
            skip_metadata_processing: false,
            skip_security_scanning: false,
            skip_file_content_storage: false,
            skip_archive_generation: false,
            security_scan_enabled: true,
            file_processing_enabled: true,
            generate_archives: true,
            archive_formats: vec![ArchiveFormat::Zip, ArchiveFormat::TarGz],
            required_metadata_fields: Vec::new(),
            publish_module: true,
        }
    }
}

/// An ingestion request.
///
/// Exactly one of `version` and `git_tag` must be supplied; for git sources
/// the tag is resolved against the provider's tag format, for the others
/// the version names the row to create.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    /// Namespace name
    pub namespace: String,
    /// Module name
    pub module: String,
    /// Provider name
    pub provider: String,
    /// Version to index (exclusive with `git_tag`)
    pub version: Option<String>,
    /// Git tag to resolve the version from (exclusive with `version`)
    pub git_tag: Option<String>,
    /// ZIP archive to extract when `source_type` is `archive`
    pub archive_path: Option<PathBuf>,
    /// Module directory when `source_type` is `path`
    pub module_path: Option<PathBuf>,
    /// How the module source is materialised
    pub source_type: SourceType,
    /// Phase toggles
    pub options: IngestOptions,
}

/// The phases an ingestion runs through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestPhase {
    /// ZIP extraction into the scratch directory
    ArchiveExtraction,
    /// tfswitch + terraform init/graph/version + modules.json
    TerraformProcessing,
    /// terrareg.json discovery and required-attribute validation
    MetadataProcessing,
    /// README, terraform-docs and submodule/example extraction
    ModuleParsing,
    /// Per-file validation, processing and persistence
    FileContentStorage,
    /// tfsec scan and result persistence
    SecurityScanning,
    /// ZIP / tar.gz artifact production
    ArchiveGeneration,
}

impl IngestPhase {
    /// Stable name used in savepoints and result maps.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ArchiveExtraction => "archive_extraction",
            Self::TerraformProcessing => "terraform_processing",
            Self::MetadataProcessing => "metadata_processing",
            Self::ModuleParsing => "module_parsing",
            Self::FileContentStorage => "file_content_storage",
            Self::SecurityScanning => "security_scanning",
            Self::ArchiveGeneration => "archive_generation",
        }
    }
}

impl std::fmt::Display for IngestPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The outcome of one pipeline phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseResult {
    /// Whether the phase completed (skipped phases count as successes)
    pub success: bool,
    /// Wall-clock duration of the phase
    pub duration: Duration,
    /// Failure description when `success` is false
    pub error: Option<String>,
    /// Phase-specific payload (e.g. tfsec summary, archive list)
    pub data: Option<serde_json::Value>,
    /// Why a phase was deliberately not run (still a success)
    pub skipped_reason: Option<String>,
}

impl PhaseResult {
    /// A successful phase result.
    #[must_use]
    pub fn success(duration: Duration, data: Option<serde_json::Value>) -> Self {
        Self {
            success: true,
            duration,
            error: None,
            data,
            skipped_reason: None,
        }
    }

    /// A skipped phase (success with a reason).
    #[must_use]
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            success: true,
            duration: Duration::ZERO,
            error: None,
            data: None,
            skipped_reason: Some(reason.into()),
        }
    }

    /// A failed phase result.
    #[must_use]
    pub fn failure(duration: Duration, error: impl Into<String>) -> Self {
        Self {
            success: false,
            duration,
            error: Some(error.into()),
            data: None,
            skipped_reason: None,
        }
    }
}

/// The result of a single ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResult {
    /// Overall success
    pub success: bool,
    /// The persisted module version id on success
    pub module_version_id: Option<i64>,
    /// The version that was (or would have been) indexed
    pub version: String,
    /// Per-phase outcomes keyed by phase name
    pub phase_results: HashMap<String, PhaseResult>,
    /// Failure description on error; for phase failures this carries
    /// `"<step> failed: <detail>"` for the first fatal phase
    pub error: Option<String>,
    /// Whether any phase savepoint was rolled back
    pub savepoint_rolled_back: bool,
    /// When the ingestion finished
    pub timestamp: DateTime<Utc>,
}

/// Aggregate result for a batch of independent ingestions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchIngestResult {
    /// Number of requests that fully succeeded
    pub successful: usize,
    /// Number of requests that failed
    pub failed: usize,
    /// Per-request results in input order
    pub results: Vec<IngestResult>,
}

impl BatchIngestResult {
    /// True iff some requests succeeded and some failed.
    #[must_use]
    pub fn partial_success(&self) -> bool {
        self.successful > 0 && self.failed > 0
    }

    /// True iff every request succeeded.
    #[must_use]
    pub fn overall_success(&self) -> bool {
        self.failed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_clone_url_substitution() {
        let provider = ModuleProvider {
            id: 1,
            namespace: "alice".to_string(),
            module: "net".to_string(),
            provider: "aws".to_string(),
            repo_clone_url_template: Some("https://{namespace}/{name}-{provider}.git".to_string()),
            tag_format: "v{version}".to_string(),
            git_path: None,
            repo_browse_url_template: None,
            verified: false,
        };
        assert_eq!(provider.clone_url().unwrap(), "https://alice/net-aws.git");
    }

    #[test]
    fn test_provider_missing_clone_url_is_configuration_error() {
        let provider = ModuleProvider {
            id: 1,
            namespace: "alice".to_string(),
            module: "net".to_string(),
            provider: "aws".to_string(),
            repo_clone_url_template: None,
            tag_format: "v{version}".to_string(),
            git_path: None,
            repo_browse_url_template: None,
            verified: false,
        };
        assert!(matches!(
            provider.clone_url(),
            Err(crate::error::RegistryError::Configuration { .. })
        ));
    }

    #[test]
    fn test_tag_for_version() {
        let provider = ModuleProvider {
            id: 1,
            namespace: "alice".to_string(),
            module: "net".to_string(),
            provider: "aws".to_string(),
            repo_clone_url_template: None,
            tag_format: "v{version}".to_string(),
            git_path: None,
            repo_browse_url_template: None,
            verified: false,
        };
        let v = crate::version::Version::parse("1.2.3").unwrap();
        assert_eq!(provider.tag_for_version(&v), "v1.2.3");
    }

    #[test]
    fn test_details_builders_layer() {
        let details = ModuleDetails::default()
            .with_readme(Some("# hi".to_string()))
            .with_terraform_graph(Some("digraph {}".to_string()));
        assert_eq!(details.readme.as_deref(), Some("# hi"));
        assert_eq!(details.terraform_graph.as_deref(), Some("digraph {}"));
        assert!(details.tfsec.is_none());
    }

    #[test]
    fn test_new_version_row_derives_beta() {
        let v = crate::version::Version::parse("1.0.0-rc1").unwrap();
        let row = ModuleVersionRow::new(7, v);
        assert!(row.beta);
        assert!(!row.published);
        assert_eq!(row.id, 0);
    }

    #[test]
    fn test_phase_names_are_savepoint_safe() {
        for phase in [
            IngestPhase::ArchiveExtraction,
            IngestPhase::TerraformProcessing,
            IngestPhase::MetadataProcessing,
            IngestPhase::ModuleParsing,
            IngestPhase::FileContentStorage,
            IngestPhase::SecurityScanning,
            IngestPhase::ArchiveGeneration,
        ] {
            let name = phase.as_str();
            assert!(name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
            assert!(!name.starts_with(|c: char| c.is_ascii_digit()));
        }
    }
}
