//! Configuration module for TerraVault.
//!
//! This module handles loading and validating configuration from:
//! - YAML configuration files (`terravault.yaml`)
//! - Environment variables
//! - CLI arguments
//!
//! Configuration is read once at startup and treated as read-only for the
//! lifetime of the process; changing e.g. the reindex mode requires a
//! restart.
//!
//! # Configuration File Format
//!
//! ```yaml
//! # terravault.yaml
//!
//! paths:
//!   data_directory: /var/lib/terravault
//!   upload_directory: uploads
//!
//! git:
//!   clone_timeout_seconds: 300
//!   upstream_username: ${TERRAVAULT_GIT_USERNAME}
//!   upstream_password: ${TERRAVAULT_GIT_PASSWORD}
//!
//! terraform:
//!   default_version: "1.7.5"
//!   lock_timeout_seconds: 60
//!
//! ingestion:
//!   reindex_mode: legacy
//!   auto_publish: true
//!
//! namespaces:
//!   trusted:
//!     - platform
//! ```

use crate::error::{RegistryError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Governs what happens when an ingested version already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReindexMode {
    /// Delete the existing version and re-create it
    #[default]
    Legacy,
    /// Refuse to overwrite an existing version
    Prohibit,
    /// Delete and re-create, preserving the predecessor's published state
    AutoPublish,
}

/// Filesystem roots used by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathOptions {
    /// Root directory for registry state (artifacts, database)
    pub data_directory: PathBuf,

    /// Directory (under data) holding generated module archives
    pub modules_directory: String,

    /// Directory (under data) holding extracted example content
    pub examples_directory: String,

    /// Directory (under data) where uploaded archives are stashed
    pub upload_directory: String,
}

impl Default for PathOptions {
    fn default() -> Self {
        let data_directory = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("terravault");
        Self {
            data_directory,
            modules_directory: "modules".to_string(),
            examples_directory: "examples".to_string(),
            upload_directory: "upload".to_string(),
        }
    }
}

impl PathOptions {
    /// Absolute path of the generated-archives directory.
    #[must_use]
    pub fn modules_dir(&self) -> PathBuf {
        self.data_directory.join(&self.modules_directory)
    }

    /// Absolute path of the upload stash directory.
    #[must_use]
    pub fn upload_dir(&self) -> PathBuf {
        self.data_directory.join(&self.upload_directory)
    }
}

/// Git options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitOptions {
    /// Clone timeout in seconds
    #[serde(default = "default_clone_timeout")]
    pub clone_timeout_seconds: u64,

    /// Optional HTTP basic username injected into upstream clone URLs
    pub upstream_username: Option<String>,

    /// Optional HTTP basic password injected into upstream clone URLs
    pub upstream_password: Option<String>,
}

impl Default for GitOptions {
    fn default() -> Self {
        Self {
            clone_timeout_seconds: default_clone_timeout(),
            upstream_username: None,
            upstream_password: None,
        }
    }
}

impl GitOptions {
    /// Load upstream credentials from environment variables when not set
    /// in the configuration file.
    pub fn load_from_env(&mut self) {
        let get_non_empty_env = |var: &str| -> Option<String> {
            std::env::var(var).ok().filter(|s| !s.is_empty())
        };

        if self.upstream_username.is_none() {
            if let Some(user) = get_non_empty_env("TERRAVAULT_UPSTREAM_GIT_USERNAME") {
                tracing::debug!("Loaded upstream git username from environment");
                self.upstream_username = Some(user);
            }
        }
        if self.upstream_password.is_none() {
            if let Some(pass) = get_non_empty_env("TERRAVAULT_UPSTREAM_GIT_PASSWORD") {
                tracing::debug!("Loaded upstream git password from environment");
                self.upstream_password = Some(pass);
            }
        }
    }
}

/// Terraform execution options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerraformOptions {
    /// Terraform version installed by tfswitch (`TF_DEFAULT_VERSION`)
    pub default_version: Option<String>,

    /// Product selector passed to tfswitch (`TF_PRODUCT`, e.g. "terraform" or "opentofu")
    pub product: Option<String>,

    /// Mirror URL for terraform release archives (`TERRAFORM_ARCHIVE_MIRROR`)
    pub archive_mirror: Option<String>,

    /// Executable used for all terraform invocations
    #[serde(default = "default_terraform_binary")]
    pub binary_path: String,

    /// Seconds to wait for the global terraform lock
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_seconds: u64,

    /// Seconds before a terraform subprocess is killed
    #[serde(default = "default_command_timeout")]
    pub command_timeout_seconds: u64,
}

impl Default for TerraformOptions {
    fn default() -> Self {
        Self {
            default_version: None,
            product: None,
            archive_mirror: None,
            binary_path: default_terraform_binary(),
            lock_timeout_seconds: default_lock_timeout(),
            command_timeout_seconds: default_command_timeout(),
        }
    }
}

/// Ingestion pipeline options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionOptions {
    /// What to do when the ingested version already exists
    pub reindex_mode: ReindexMode,

    /// Default publish decision for newly indexed versions
    #[serde(default = "default_true")]
    pub auto_publish: bool,

    /// Skip archive generation for externally-hosted modules
    pub delete_externally_hosted_artifacts: bool,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            reindex_mode: ReindexMode::default(),
            auto_publish: true,
            delete_externally_hosted_artifacts: false,
        }
    }
}

/// Namespace policy lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespaceOptions {
    /// Namespaces allowed to ingest without review
    pub trusted: Vec<String>,

    /// Namespaces whose modules are displayed as verified
    pub verified: Vec<String>,
}

/// Security scanning options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityOptions {
    /// Whether tfsec scanning runs during ingestion
    #[serde(default = "default_true")]
    pub scan_enabled: bool,

    /// tfsec binary name or path
    #[serde(default = "default_tfsec_binary")]
    pub tfsec_binary: String,
}

impl Default for SecurityOptions {
    fn default() -> Self {
        Self {
            scan_enabled: true,
            tfsec_binary: default_tfsec_binary(),
        }
    }
}

/// Main configuration structure with nested sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Filesystem roots
    pub paths: PathOptions,

    /// Git options
    pub git: GitOptions,

    /// Terraform execution options
    pub terraform: TerraformOptions,

    /// Ingestion pipeline options
    pub ingestion: IngestionOptions,

    /// Namespace policy lists
    pub namespaces: NamespaceOptions,

    /// Security scanning options
    pub security: SecurityOptions,
}

fn default_clone_timeout() -> u64 {
    300
}

fn default_lock_timeout() -> u64 {
    60
}

fn default_command_timeout() -> u64 {
    600
}

fn default_terraform_binary() -> String {
    "terraform".to_string()
}

fn default_tfsec_binary() -> String {
    "tfsec".to_string()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn from_yaml(content: &str) -> Result<Self> {
        tracing::debug!("Parsing configuration from YAML");
        // First, expand environment variables
        let expanded = expand_env_vars(content);

        let config: Config = serde_yaml::from_str(&expanded).map_err(|e| RegistryError::ConfigParse {
            message: e.to_string(),
            source: None,
            src_path: file!(),
            src_line: line!(),
        })?;

        tracing::debug!(
            reindex_mode = ?config.ingestion.reindex_mode,
            auto_publish = config.ingestion.auto_publish,
            data_directory = %config.paths.data_directory.display(),
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Load configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RegistryError::io(path, e, file!(), line!()))?;
        let mut config = Self::from_yaml(&content)?;
        config.git.load_from_env();
        Ok(config)
    }

    /// Generate an example YAML configuration.
    #[must_use]
    pub fn example_yaml() -> String {
        r#"# TerraVault Configuration File

# Filesystem roots
paths:
  # Root directory for registry state (artifacts, database)
  # data_directory: /var/lib/terravault

  # Subdirectory holding generated module archives
  modules_directory: modules

  # Subdirectory holding extracted example content
  examples_directory: examples

  # Subdirectory where uploaded archives are stashed
  upload_directory: upload

# Git options (for cloning upstream module repositories)
git:
  # Seconds before a clone is aborted
  clone_timeout_seconds: 300

  # HTTP basic credentials for upstream clones (can use environment variables)
  # upstream_username: ${TERRAVAULT_UPSTREAM_GIT_USERNAME}
  # upstream_password: ${TERRAVAULT_UPSTREAM_GIT_PASSWORD}

# Terraform execution
terraform:
  # Version installed by tfswitch before processing
  # default_version: "1.7.5"

  # Product selector for tfswitch ("terraform" or "opentofu")
  # product: terraform

  # Mirror for terraform release archives
  # archive_mirror: https://releases.example.com/terraform

  # Executable used for all terraform invocations
  binary_path: terraform

  # Seconds to wait for the global terraform lock
  lock_timeout_seconds: 60

# Ingestion pipeline
ingestion:
  # What to do when an ingested version already exists:
  #   legacy       - delete the existing version and re-create it
  #   prohibit     - refuse to overwrite
  #   auto-publish - re-create, preserving the predecessor's published state
  reindex_mode: legacy

  # Default publish decision for newly indexed versions
  auto_publish: true

  # Skip archive generation for externally-hosted modules
  delete_externally_hosted_artifacts: false

# Namespace policy
namespaces:
  # Namespaces allowed to ingest without review
  # trusted:
  #   - platform

  # Namespaces whose modules are displayed as verified
  # verified:
  #   - platform

# Security scanning
security:
  # Whether tfsec runs during ingestion
  scan_enabled: true

  # tfsec binary name or path
  tfsec_binary: tfsec
"#
        .to_string()
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
fn expand_env_vars(content: &str) -> String {
    let mut result = content.to_string();

    // Find all ${VAR} patterns
    if let Ok(re) = regex::Regex::new(r"\$\{([^}]+)\}") {
        for cap in re.captures_iter(content) {
            let var_name = &cap[1];
            if let Ok(value) = std::env::var(var_name) {
                result = result.replace(&cap[0], &value);
            }
        }
    }

    // Find all $VAR patterns (word boundary)
    if let Ok(re) = regex::Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)") {
        let snapshot = result.clone();
        for cap in re.captures_iter(&snapshot) {
            let var_name = &cap[1];
            if let Ok(value) = std::env::var(var_name) {
                result = result.replace(&cap[0], &value);
            }
        }
    }

    result
}
