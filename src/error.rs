//! Error types for TerraVault.
//!
//! This module defines a comprehensive error hierarchy using `thiserror`
//! for proper error handling throughout the application. All errors
//! include context and can be easily propagated using the `?` operator.
//!
//! # Error Categories
//!
//! - **Input errors**: bad ingest requests, illegal paths, invalid versions
//! - **Lookup errors**: unknown namespaces, providers, versions, redirects
//! - **Subprocess errors**: git/tfswitch/terraform/tfsec non-zero exits
//! - **Storage errors**: filesystem and database persistence failures
//! - **Lock errors**: terraform critical-section acquisition timeouts

use std::path::PathBuf;
use thiserror::Error;

/// Macro to create errors with automatic source location tracking.
///
/// Usage:
/// ```ignore
/// return Err(err!(Configuration { message: "no clone URL".to_string() }));
/// ```
#[macro_export]
macro_rules! err {
    ($variant:ident { $($field:ident: $value:expr),* $(,)? }) => {
        $crate::error::RegistryError::$variant {
            $($field: $value,)*
            src_path: file!(),
            src_line: line!(),
        }
    };
}

/// A specialized Result type for TerraVault operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// The step of a subprocess pipeline that produced a failure.
///
/// Used to tag [`RegistryError::Subprocess`] so callers can distinguish
/// e.g. a failed `terraform init` from a missing binary without string
/// matching on the error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubprocessStep {
    /// `git clone` / `git checkout` / `git rev-parse`
    Git,
    /// `tfswitch` terraform version installation
    Tfswitch,
    /// `terraform init`
    TerraformInit,
    /// `terraform graph`
    TerraformGraph,
    /// `terraform version`
    TerraformVersion,
    /// `terraform fmt`
    TerraformFmt,
    /// `terraform validate`
    TerraformValidate,
    /// `tfsec` security scan
    Tfsec,
    /// `terraform-docs` documentation extraction
    TerraformDocs,
    /// The subprocess binary could not be executed at all
    CommandNotFound,
    /// Permission denied while spawning or reading output
    PermissionDenied,
    /// A referenced file or directory was missing
    FileNotFound,
    /// The subprocess exceeded its time budget and was terminated
    Timeout,
    /// The subprocess was killed by a signal
    ProcessKilled,
}

impl std::fmt::Display for SubprocessStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            Self::Git => "git",
            Self::Tfswitch => "tfswitch",
            Self::TerraformInit => "terraform_init",
            Self::TerraformGraph => "terraform_graph",
            Self::TerraformVersion => "terraform_version",
            Self::TerraformFmt => "terraform_fmt",
            Self::TerraformValidate => "terraform_validate",
            Self::Tfsec => "tfsec",
            Self::TerraformDocs => "terraform_docs",
            Self::CommandNotFound => "command_not_found",
            Self::PermissionDenied => "permission_denied",
            Self::FileNotFound => "file_not_found",
            Self::Timeout => "timeout",
            Self::ProcessKilled => "process_killed",
        };
        write!(f, "{tag}")
    }
}

/// The main error type for TerraVault.
///
/// This enum covers all error conditions that can occur during source
/// preparation, terraform execution, parsing, persistence and publication.
#[derive(Error, Debug)]
pub enum RegistryError {
    // =========================================================================
    // I/O and File System Errors
    // =========================================================================
    /// I/O error with path context.
    #[error("I/O error at '{path}' ({src_path}:{src_line}): {source}")]
    Io {
        /// The path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Source file path
        src_path: &'static str,
        /// Source line number
        src_line: u32,
    },

    // =========================================================================
    // Input Errors
    // =========================================================================
    /// Invalid ingest input (missing/both of version and git tag, bad path).
    #[error("Invalid input ({src_path}:{src_line}): {message}")]
    InvalidInput {
        /// What was wrong with the input
        message: String,
        /// Source file path
        src_path: &'static str,
        /// Source line number
        src_line: u32,
    },

    /// Version string does not match `v?MAJOR.MINOR.PATCH(-PRERELEASE)?`.
    #[error("Invalid version '{version}' ({src_path}:{src_line}): {message}")]
    VersionParse {
        /// The version string that failed to parse
        version: String,
        /// Why it was rejected
        message: String,
        /// Source file path
        src_path: &'static str,
        /// Source line number
        src_line: u32,
    },

    /// Invalid version constraint syntax.
    #[error("Invalid version constraint '{constraint}' ({src_path}:{src_line}): {message}")]
    ConstraintParse {
        /// The constraint string that failed to parse
        constraint: String,
        /// Error message
        message: String,
        /// Source file path
        src_path: &'static str,
        /// Source line number
        src_line: u32,
    },

    /// A file path failed the registry's safety rules.
    #[error("Unsafe file path '{path}' ({src_path}:{src_line}): {message}")]
    PathValidation {
        /// The rejected path
        path: String,
        /// Which rule rejected it
        message: String,
        /// Source file path
        src_path: &'static str,
        /// Source line number
        src_line: u32,
    },

    // =========================================================================
    // Lookup Errors
    // =========================================================================
    /// A namespace, provider, version, file or redirect was not found.
    #[error("{entity} not found: {name} ({src_path}:{src_line})")]
    NotFound {
        /// The kind of entity (e.g. "module provider")
        entity: &'static str,
        /// The identifier that was looked up
        name: String,
        /// Source file path
        src_path: &'static str,
        /// Source line number
        src_line: u32,
    },

    /// A module version already exists and the reindex mode prohibits overwriting.
    #[error("Module version already exists: {name} ({src_path}:{src_line})")]
    AlreadyExists {
        /// The `namespace/module/provider version` identifier
        name: String,
        /// Source file path
        src_path: &'static str,
        /// Source line number
        src_line: u32,
    },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// A provider or process configuration prevents the operation.
    #[error("Configuration error ({src_path}:{src_line}): {message}")]
    Configuration {
        /// Error message
        message: String,
        /// Source file path
        src_path: &'static str,
        /// Source line number
        src_line: u32,
    },

    /// Configuration file parsing error.
    #[error("Failed to parse configuration ({src_path}:{src_line}): {message}")]
    ConfigParse {
        /// Error message
        message: String,
        /// The underlying error (if any)
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        /// Source file path
        src_path: &'static str,
        /// Source line number
        src_line: u32,
    },

    // =========================================================================
    // Subprocess Errors
    // =========================================================================
    /// A subprocess exited non-zero or could not be run.
    #[error("{step} failed ({src_path}:{src_line}): {message}")]
    Subprocess {
        /// Which pipeline step failed
        step: SubprocessStep,
        /// Error message (usually captured stderr)
        message: String,
        /// Source file path
        src_path: &'static str,
        /// Source line number
        src_line: u32,
    },

    /// The global terraform mutex could not be acquired within the budget.
    #[error("Timed out waiting for the terraform lock after {waited_secs}s ({src_path}:{src_line})")]
    LockTimeout {
        /// How long acquisition was attempted
        waited_secs: u64,
        /// Source file path
        src_path: &'static str,
        /// Source line number
        src_line: u32,
    },

    // =========================================================================
    // Metadata Errors
    // =========================================================================
    /// Required metadata attributes are missing from terrareg.json.
    #[error("Missing required metadata attributes: {} ({src_path}:{src_line})", missing.join(", "))]
    MetadataValidation {
        /// The attributes that were required but absent
        missing: Vec<String>,
        /// Source file path
        src_path: &'static str,
        /// Source line number
        src_line: u32,
    },

    /// HCL parsing error while extracting module structure.
    #[error("Failed to parse HCL in '{file}' ({src_path}:{src_line}): {message}")]
    HclParse {
        /// The file being parsed
        file: PathBuf,
        /// Error message
        message: String,
        /// Source file path
        src_path: &'static str,
        /// Source line number
        src_line: u32,
    },

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Database persistence failure.
    #[error("Storage error ({src_path}:{src_line}): {message}")]
    Storage {
        /// Error message
        message: String,
        /// The underlying database error (if any)
        #[source]
        source: Option<rusqlite::Error>,
        /// Source file path
        src_path: &'static str,
        /// Source line number
        src_line: u32,
    },

    // =========================================================================
    // Cancellation
    // =========================================================================
    /// The operation was cancelled before completion.
    #[error("Operation cancelled ({src_path}:{src_line}): {message}")]
    Cancelled {
        /// What was cancelled
        message: String,
        /// Source file path
        src_path: &'static str,
        /// Source line number
        src_line: u32,
    },

    // =========================================================================
    // Generic Errors
    // =========================================================================
    /// Internal error (should not happen in normal operation).
    #[error("Internal error ({src_path}:{src_line}): {message}")]
    Internal {
        /// Error message
        message: String,
        /// Source file path
        src_path: &'static str,
        /// Source line number
        src_line: u32,
    },

    /// Multiple errors occurred.
    #[error("Multiple errors occurred ({count} total)")]
    Multiple {
        /// Number of errors
        count: usize,
        /// The individual errors
        errors: Vec<RegistryError>,
    },
}

impl RegistryError {
    /// Creates an `Io` error.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error, src_path: &'static str, src_line: u32) -> Self {
        Self::Io { path: path.into(), source, src_path, src_line }
    }

    /// Creates a `Subprocess` error from a failed command.
    #[must_use]
    pub fn subprocess(step: SubprocessStep, message: String, src_path: &'static str, src_line: u32) -> Self {
        Self::Subprocess { step, message, src_path, src_line }
    }

    /// Creates a `Storage` error wrapping a database failure.
    #[must_use]
    pub fn storage(message: String, source: Option<rusqlite::Error>, src_path: &'static str, src_line: u32) -> Self {
        Self::Storage { message, source, src_path, src_line }
    }

    /// The subprocess step tag, when this is a subprocess failure.
    #[must_use]
    pub fn subprocess_step(&self) -> Option<SubprocessStep> {
        match self {
            Self::Subprocess { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// Determines if the error is retriable (the same request may succeed later).
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::LockTimeout { .. }
                | Self::Subprocess { step: SubprocessStep::Timeout, .. }
                | Self::Cancelled { .. }
        )
    }

    /// Returns the appropriate exit code for the error.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Io { source, .. } if source.kind() == std::io::ErrorKind::PermissionDenied => 13,
            Self::InvalidInput { .. } | Self::VersionParse { .. } | Self::ConstraintParse { .. } => 14,
            Self::PathValidation { .. } => 15,
            Self::NotFound { .. } => 16,
            Self::AlreadyExists { .. } => 17,
            Self::Configuration { .. } | Self::ConfigParse { .. } => 18,
            Self::Subprocess { .. } => 19,
            Self::LockTimeout { .. } => 20,
            Self::MetadataValidation { .. } => 21,
            Self::Storage { .. } => 22,
            Self::Multiple { .. } => 23,
            _ => 1, // Generic unhandled error
        }
    }

    /// Consolidates multiple errors into a single `RegistryError::Multiple` if there's more than one.
    /// Otherwise, returns the single error or `Ok(())` if no errors.
    pub fn collect(mut errors: Vec<Self>) -> Result<()> {
        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(Self::Multiple {
                count: errors.len(),
                errors,
            })
        }
    }
}

impl From<std::io::Error> for RegistryError {
    fn from(source: std::io::Error) -> Self {
        // This conversion is used when a PathBuf is not readily available.
        // For errors where a path is known, prefer RegistryError::io(path, source, file!(), line!())
        Self::Io {
            path: PathBuf::new(),
            source,
            src_path: file!(),
            src_line: line!(),
        }
    }
}

impl From<rusqlite::Error> for RegistryError {
    fn from(source: rusqlite::Error) -> Self {
        Self::Storage {
            message: source.to_string(),
            source: Some(source),
            src_path: file!(),
            src_line: line!(),
        }
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(source: serde_json::Error) -> Self {
        Self::Internal {
            message: format!("JSON serialization/deserialization error: {}", source),
            src_path: file!(),
            src_line: line!(),
        }
    }
}

/// A utility for collecting multiple errors during batch processing.
#[derive(Debug, Default)]
pub struct ErrorCollector {
    errors: Vec<RegistryError>,
}

impl ErrorCollector {
    /// Create a new error collector.
    #[must_use]
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// Add an error to the collection.
    pub fn add(&mut self, error: RegistryError) {
        self.errors.push(error);
    }

    /// Get the number of collected errors.
    #[must_use]
    pub fn count(&self) -> usize {
        self.errors.len()
    }

    /// Check if there are any errors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Convert to a Result, returning Multiple error if there are any errors.
    pub fn into_result(self) -> Result<()> {
        RegistryError::collect(self.errors)
    }
}
