//! # TerraVault
//!
//! A private Terraform/OpenTofu module registry core.
//!
//! TerraVault ingests module sources — git tags, uploaded ZIP archives, or
//! local paths — through a transactional, phased pipeline and indexes the
//! result as a queryable module version: README and documentation, declared
//! variables and outputs, submodules and examples, per-file content,
//! security scan results, and downloadable archives.
//!
//! ## Features
//!
//! - **Three source flavours**: clone a provider's git repository at a tag,
//!   extract an uploaded ZIP, or index a local directory
//! - **Phased ingestion**: each pipeline phase runs in its own database
//!   savepoint; a fatal phase rolls the whole version back
//! - **Reindex policy**: existing versions can be prohibited, replaced, or
//!   replaced with their published state preserved
//! - **External tooling**: `tfswitch` + `terraform` under a process-wide
//!   lock, `tfsec` scanning, `terraform-docs` extraction
//! - **Deterministic artifacts**: byte-identical ZIP and tar.gz archives
//!   for identical inputs
//!
//! ## Example
//!
//! ```rust,no_run
//! use terravault::{Config, Registry};
//! use terravault::types::{IngestOptions, IngestRequest, SourceType};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = Registry::open(Config::default())?;
//!
//!     let request = IngestRequest {
//!         namespace: "alice".to_string(),
//!         module: "net".to_string(),
//!         provider: "aws".to_string(),
//!         version: None,
//!         git_tag: Some("v1.2.3".to_string()),
//!         archive_path: None,
//!         module_path: None,
//!         source_type: SourceType::Git,
//!         options: IngestOptions::default(),
//!     };
//!
//!     let result = registry.ingest(&request).await?;
//!     println!("indexed: {}", result.success);
//!     Ok(())
//! }
//! ```

#![warn(clippy::all, missing_docs, rust_2018_idioms)]

pub mod archives;
pub mod audit;
pub mod cli;
pub mod config;
pub mod error;
pub mod filestore;
pub mod ingest;
pub mod metadata;
pub mod parser;
pub mod pathspec;
pub mod process;
pub mod security;
pub mod source;
pub mod store;
pub mod terraform;
pub mod types;
pub mod version;

// Re-export commonly used types at crate root
pub use config::{Config, ReindexMode};
pub use error::{RegistryError, Result};
pub use ingest::{Orchestrator, WebhookImportResult};
pub use types::{IngestRequest, IngestResult, ModuleProvider};
pub use version::{Constraint, Version};

use crate::store::{repos, Database};
use crate::types::{BatchIngestResult, NamespaceType};

/// The registry entry point.
///
/// Owns the database handle and the ingestion orchestrator. This is the
/// primary surface for using TerraVault as a library; the CLI is a thin
/// layer over it.
pub struct Registry {
    config: Config,
    db: Database,
    orchestrator: Orchestrator,
}

impl Registry {
    /// Open the registry, creating the database under the configured data
    /// directory if needed.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the database cannot be opened.
    pub fn open(config: Config) -> Result<Self> {
        let db_path = config.paths.data_directory.join("terravault.db");
        let db = Database::open(&db_path)?;
        Ok(Self::with_database(config, db))
    }

    /// Open a registry over an in-memory database. Used by tests.
    ///
    /// # Errors
    ///
    /// Returns a storage error when schema initialisation fails.
    pub fn open_in_memory(config: Config) -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self::with_database(config, db))
    }

    fn with_database(config: Config, db: Database) -> Self {
        let orchestrator = Orchestrator::new(config.clone(), db.clone());
        Self {
            config,
            db,
            orchestrator,
        }
    }

    /// The process configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The underlying database handle.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Register a module provider, creating its namespace if needed.
    ///
    /// The `verified` flag is set when the namespace is configured as a
    /// verified namespace.
    ///
    /// # Errors
    ///
    /// Returns a storage error on database failure, including an existing
    /// `(namespace, module, provider)` triple.
    pub async fn register_provider(&self, provider: &ModuleProvider) -> Result<ModuleProvider> {
        let tx = self.db.begin().await?;

        let namespace_type = if self.config.namespaces.trusted.contains(&provider.namespace) {
            NamespaceType::Team
        } else {
            NamespaceType::None
        };
        repos::ensure_namespace(tx.conn(), &provider.namespace, namespace_type)?;

        let mut stored = provider.clone();
        stored.verified = self
            .config
            .namespaces
            .verified
            .contains(&provider.namespace);
        stored.id = repos::create_module_provider(tx.conn(), &stored)?;

        audit::queue_event(
            tx.conn(),
            "module_provider_created",
            &stored.identity(),
            &serde_json::json!({ "verified": stored.verified }),
        )?;
        tx.commit()?;

        tracing::info!(provider = %stored.identity(), verified = stored.verified, "Registered module provider");
        Ok(stored)
    }

    /// Ingest a single module version.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the outer transaction itself breaks;
    /// pipeline failures are reported in the result.
    pub async fn ingest(&self, request: &IngestRequest) -> Result<IngestResult> {
        self.orchestrator.ingest(request).await
    }

    /// Ingest a batch of requests, each in its own transaction.
    pub async fn ingest_batch(&self, requests: &[IngestRequest]) -> BatchIngestResult {
        self.orchestrator.ingest_batch(requests).await
    }

    /// Import multiple webhook-announced versions with per-version
    /// isolation.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the outer transaction breaks.
    pub async fn import_versions(
        &self,
        imports: &[ingest::VersionImport],
    ) -> Result<WebhookImportResult> {
        ingest::process_versions(&self.orchestrator, imports).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_creation() {
        let config = Config::default();
        let _registry = Registry::open_in_memory(config).unwrap();
    }
}
