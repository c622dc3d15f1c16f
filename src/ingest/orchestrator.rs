//! The ingestion orchestrator.
//!
//! Drives one module version through the phased pipeline inside a single
//! outer transaction: source materialisation, then archive extraction,
//! terraform processing, metadata processing, module parsing, file content
//! storage, security scanning and archive generation — each phase isolated
//! in its own savepoint. The first fatal phase failure rolls the outer
//! transaction, so no partial version ever survives.

use crate::config::Config;
use crate::error::{RegistryError, Result};
use crate::ingest::wrapper::{self, CreationOutcome};
use crate::metadata;
use crate::parser;
use crate::pathspec::PathFilter;
use crate::security;
use crate::source::{PreparedSource, SourcePreparer};
use crate::store::{repos, Database, Transaction};
use crate::terraform::TerraformExecutor;
use crate::types::{
    BatchIngestResult, IngestPhase, IngestRequest, IngestResult, ModuleDetails, ModuleProvider,
    ModuleVersionRow, PhaseResult, SourceType,
};
use crate::version::Version;
use crate::{archives, audit, filestore};
use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::time::Instant;

/// Orchestrates module ingestions against one registry database.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    config: Config,
    db: Database,
    preparer: SourcePreparer,
    terraform: TerraformExecutor,
}

impl Orchestrator {
    /// Create an orchestrator from the process configuration.
    #[must_use]
    pub fn new(config: Config, db: Database) -> Self {
        let preparer = SourcePreparer::new(config.clone());
        let terraform = TerraformExecutor::new(config.terraform.clone());
        Self {
            config,
            db,
            preparer,
            terraform,
        }
    }

    /// The database this orchestrator writes to.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Ingest a single module version in its own outer transaction.
    ///
    /// Pipeline failures are reported inside the returned [`IngestResult`];
    /// only infrastructure failures (the transaction itself breaking)
    /// surface as `Err`.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the outer transaction cannot be opened,
    /// committed or rolled back.
    pub async fn ingest(&self, request: &IngestRequest) -> Result<IngestResult> {
        let tx = self.db.begin().await?;
        let (result, _outcome) = self.ingest_in_tx(&tx, request).await;

        if result.success {
            tx.commit()?;
            // Fire-and-forget: a failed dispatch never affects the
            // committed ingestion; rows stay queued for the next pass.
            if let Err(e) = audit::dispatch_pending(&self.db).await {
                tracing::warn!(error = %e, "Audit dispatch failed, events remain queued");
            }
        } else {
            tx.rollback()?;
        }

        Ok(result)
    }

    /// Run the pipeline inside an existing transaction scope.
    ///
    /// Used directly by the webhook processor, which wraps each call in a
    /// per-version savepoint. Returns the result report plus the wrapper
    /// outcome on success.
    pub async fn ingest_in_tx(
        &self,
        tx: &Transaction,
        request: &IngestRequest,
    ) -> (IngestResult, Option<CreationOutcome>) {
        let mut phases: HashMap<String, PhaseResult> = HashMap::new();
        let mut rolled_back = false;

        let pipeline = self
            .run_pipeline(tx, request, &mut phases, &mut rolled_back)
            .await;

        match pipeline {
            Ok(outcome) => {
                let result = IngestResult {
                    success: true,
                    module_version_id: Some(outcome.module_version.id),
                    version: outcome.module_version.version.to_string(),
                    phase_results: phases,
                    error: None,
                    savepoint_rolled_back: rolled_back,
                    timestamp: Utc::now(),
                };
                (result, Some(outcome))
            }
            Err(e) => {
                let result = IngestResult {
                    success: false,
                    module_version_id: None,
                    version: request
                        .version
                        .clone()
                        .or_else(|| request.git_tag.clone())
                        .unwrap_or_default(),
                    phase_results: phases,
                    error: Some(error_text(&e)),
                    savepoint_rolled_back: rolled_back,
                    timestamp: Utc::now(),
                };
                (result, None)
            }
        }
    }

    /// Ingest a batch of requests, each in its own independent outer
    /// transaction; one failing request never touches another's work.
    pub async fn ingest_batch(&self, requests: &[IngestRequest]) -> BatchIngestResult {
        let mut batch = BatchIngestResult::default();

        for request in requests {
            let result = match self.ingest(request).await {
                Ok(result) => result,
                Err(e) => IngestResult {
                    success: false,
                    module_version_id: None,
                    version: request.version.clone().unwrap_or_default(),
                    phase_results: HashMap::new(),
                    error: Some(error_text(&e)),
                    savepoint_rolled_back: false,
                    timestamp: Utc::now(),
                },
            };

            if result.success {
                batch.successful += 1;
            } else {
                batch.failed += 1;
            }
            batch.results.push(result);
        }

        tracing::info!(
            successful = batch.successful,
            failed = batch.failed,
            "Batch ingestion complete"
        );
        batch
    }

    /// Resolve the request's provider and version, then run the creation
    /// wrapper with the phased extraction function.
    async fn run_pipeline(
        &self,
        tx: &Transaction,
        request: &IngestRequest,
        phases: &mut HashMap<String, PhaseResult>,
        rolled_back: &mut bool,
    ) -> Result<CreationOutcome> {
        let provider = repos::resolve_module_provider(
            tx.conn(),
            &request.namespace,
            &request.module,
            &request.provider,
        )?
        .ok_or_else(|| {
            crate::err!(NotFound {
                entity: "module provider",
                name: format!("{}/{}/{}", request.namespace, request.module, request.provider),
            })
        })?;

        let version = resolve_version(request, &provider)?;

        tracing::info!(
            provider = %provider.identity(),
            version = %version,
            source = ?request.source_type,
            "Starting module ingestion"
        );

        wrapper::create_module_version(
            tx,
            &self.config.ingestion,
            provider.id,
            &version,
            None,
            request.options.publish_module,
            |row| self.extraction(tx, request, &provider, &version, row, phases, rolled_back),
        )
        .await
    }

    /// The extraction function: source materialisation plus the phase
    /// sequence, run against the freshly prepared version row.
    #[allow(clippy::too_many_arguments)]
    async fn extraction(
        &self,
        tx: &Transaction,
        request: &IngestRequest,
        provider: &ModuleProvider,
        version: &Version,
        mut row: ModuleVersionRow,
        phases: &mut HashMap<String, PhaseResult>,
        rolled_back: &mut bool,
    ) -> Result<ModuleVersionRow> {
        let opts = &request.options;
        let version_id = row.id;

        // Source materialisation. Git sources clone before any phase runs;
        // archive sources materialise inside the archive-extraction phase.
        let mut scratch: Option<PreparedSource> = None;
        let mut module_dir: Option<PathBuf> = match request.source_type {
            SourceType::Git => {
                let prepared = self.preparer.prepare(request, provider, version).await?;
                if let Some(sha) = prepared.commit_sha.clone() {
                    repos::set_git_sha(tx.conn(), version_id, &sha)?;
                    row.git_sha = Some(sha);
                }
                let dir = prepared.path.clone();
                scratch = Some(prepared);
                Some(dir)
            }
            SourceType::Path => request.module_path.clone(),
            SourceType::Archive => None,
        };

        // a. Archive extraction
        let phase = IngestPhase::ArchiveExtraction;
        if request.source_type == SourceType::Archive
            && request.archive_path.is_some()
            && !opts.skip_archive_extraction
        {
            let prepared = run_phase(tx, phases, rolled_back, phase, async {
                let prepared = self.preparer.prepare(request, provider, version).await?;
                let data = serde_json::json!({ "extracted_to": prepared.path.display().to_string() });
                Ok((prepared, Some(data)))
            })
            .await?;
            module_dir = Some(prepared.path.clone());
            scratch = Some(prepared);
        } else {
            phases.insert(
                phase.as_str().to_string(),
                PhaseResult::skipped(skip_reason(request.source_type == SourceType::Archive, opts.skip_archive_extraction)),
            );
        }

        // b. Terraform processing
        let phase = IngestPhase::TerraformProcessing;
        if let (Some(dir), false) = (module_dir.clone(), opts.skip_terraform_processing) {
            run_phase(tx, phases, rolled_back, phase, async {
                let output = self.terraform.process_module(&dir).await?;
                let details = ModuleDetails::default()
                    .with_terraform_graph(Some(output.graph.clone()))
                    .with_terraform_version(Some(output.version_json.clone()))
                    .with_terraform_modules(Some(output.modules_json.clone()));
                repos::upsert_module_details(tx.conn(), version_id, &details)?;
                let data = serde_json::json!({
                    "overrides_written": output.overrides_written.len(),
                    "graph_bytes": output.graph.len(),
                });
                Ok(((), Some(data)))
            })
            .await?;
        } else {
            phases.insert(
                phase.as_str().to_string(),
                PhaseResult::skipped(skip_reason(module_dir.is_some(), opts.skip_terraform_processing)),
            );
        }

        // c. Metadata processing
        let phase = IngestPhase::MetadataProcessing;
        let mut path_filter = PathFilter::empty();
        if let (Some(dir), false) = (module_dir.clone(), opts.skip_metadata_processing) {
            let required = opts.required_metadata_fields.clone();
            let (metadata, filter) = run_phase(tx, phases, rolled_back, phase, async {
                let read = metadata::read_module_metadata(&dir).await?;
                let metadata = read.metadata.unwrap_or_default();
                metadata.check_required_attributes(&required)?;
                repos::update_version_metadata(
                    tx.conn(),
                    version_id,
                    metadata.owner.as_deref(),
                    metadata.description.as_deref(),
                )?;
                let data = serde_json::json!({
                    "source_file": read.source_file,
                    "ignore_rules": read.path_filter.len(),
                });
                Ok(((metadata, read.path_filter), Some(data)))
            })
            .await?;
            path_filter = filter;
            row.owner = metadata.owner.clone();
            row.description = metadata.description.clone();
        } else {
            phases.insert(
                phase.as_str().to_string(),
                PhaseResult::skipped(skip_reason(module_dir.is_some(), opts.skip_metadata_processing)),
            );
        }

        // d. Module parsing (readme, terraform-docs, submodules, examples)
        let phase = IngestPhase::ModuleParsing;
        if let Some(dir) = module_dir.clone() {
            run_phase(tx, phases, rolled_back, phase, async {
                let parsed = parser::parse_module(&dir).await?;

                // terraform-docs output when the tool exists, the structured
                // extraction otherwise, so the docs blob is never empty.
                let docs = match parsed.terraform_docs.clone() {
                    Some(output) => Some(output),
                    None => Some(serde_json::to_string(&parsed.extract)?),
                };
                let details = ModuleDetails::default()
                    .with_readme(parsed.readme.clone())
                    .with_terraform_docs(docs);
                repos::upsert_module_details(tx.conn(), version_id, &details)?;

                for submodule in &parsed.submodules {
                    repos::insert_submodule(tx.conn(), version_id, &submodule.path)?;
                }
                for example in &parsed.examples {
                    let example_id = repos::insert_example(tx.conn(), version_id, &example.path)?;
                    for (path, content) in &example.files {
                        repos::insert_example_file(tx.conn(), example_id, path, content)?;
                    }
                }

                let data = serde_json::json!({
                    "readme": parsed.readme.is_some(),
                    "variables": parsed.extract.variables.len(),
                    "outputs": parsed.extract.outputs.len(),
                    "resources": parsed.extract.resources.len(),
                    "submodules": parsed.submodules.len(),
                    "examples": parsed.examples.len(),
                });
                Ok(((), Some(data)))
            })
            .await?;
        } else {
            phases.insert(
                phase.as_str().to_string(),
                PhaseResult::skipped("no module directory"),
            );
        }

        // e. File content storage
        let phase = IngestPhase::FileContentStorage;
        if let (Some(dir), false) = (module_dir.clone(), opts.skip_file_content_storage) {
            let processing_enabled = opts.file_processing_enabled;
            let filter = path_filter.clone();
            run_phase(tx, phases, rolled_back, phase, async {
                let collected = archives::collect_files(&dir, &filter)?;
                let mut files = Vec::with_capacity(collected.len());
                for (absolute, relative) in collected {
                    let content = tokio::fs::read(&absolute)
                        .await
                        .map_err(|e| RegistryError::io(&absolute, e, file!(), line!()))?;
                    files.push((relative, content));
                }
                let batch =
                    filestore::store_files(tx.conn(), version_id, &files, processing_enabled)?;
                let data = serde_json::json!({ "stored": batch.stored });
                Ok(((), Some(data)))
            })
            .await?;
        } else {
            phases.insert(
                phase.as_str().to_string(),
                PhaseResult::skipped(skip_reason(module_dir.is_some(), opts.skip_file_content_storage)),
            );
        }

        // f. Security scanning
        let phase = IngestPhase::SecurityScanning;
        let scan_enabled = opts.security_scan_enabled && self.config.security.scan_enabled;
        if let (Some(dir), true, false) = (module_dir.clone(), scan_enabled, opts.skip_security_scanning) {
            let binary = self.config.security.tfsec_binary.clone();
            run_phase(tx, phases, rolled_back, phase, async {
                let scan = security::scan_directory(&binary, &dir).await?;
                let details = ModuleDetails::default().with_tfsec(Some(scan.to_json()?));
                repos::upsert_module_details(tx.conn(), version_id, &details)?;
                let data = serde_json::to_value(scan.summary)?;
                Ok(((), Some(data)))
            })
            .await?;
        } else {
            phases.insert(
                phase.as_str().to_string(),
                PhaseResult::skipped(if scan_enabled {
                    skip_reason(module_dir.is_some(), opts.skip_security_scanning)
                } else {
                    "security scanning disabled".to_string()
                }),
            );
        }

        // g. Archive generation
        let phase = IngestPhase::ArchiveGeneration;
        let externally_hosted = provider.repo_clone_url_template.is_some();
        if opts.generate_archives && !opts.skip_archive_generation && module_dir.is_some() {
            if externally_hosted && self.config.ingestion.delete_externally_hosted_artifacts {
                // Not a failure: consumers fetch externally-hosted modules
                // straight from git, so no artifact is retained.
                phases.insert(
                    phase.as_str().to_string(),
                    PhaseResult::skipped("externally-hosted module artifacts are not retained"),
                );
            } else {
                let dir = module_dir.clone().unwrap_or_default();
                let filter = path_filter.clone();
                let formats = opts.archive_formats.clone();
                let output_dir = self.config.paths.modules_dir();
                let basename = format!(
                    "{}-{}-{}-{}",
                    provider.namespace, provider.module, provider.provider, version
                );
                run_phase(tx, phases, rolled_back, phase, async {
                    let written =
                        archives::generate_archives(&dir, &filter, &formats, &output_dir, &basename)
                            .await?;
                    let names: Vec<String> =
                        written.iter().map(|p| p.display().to_string()).collect();
                    Ok(((), Some(serde_json::json!({ "artifacts": names }))))
                })
                .await?;
            }
        } else {
            phases.insert(
                phase.as_str().to_string(),
                PhaseResult::skipped(skip_reason(
                    opts.generate_archives && module_dir.is_some(),
                    opts.skip_archive_generation,
                )),
            );
        }

        audit::queue_event(
            tx.conn(),
            "module_version_indexed",
            &format!("{} {}", provider.identity(), version),
            &serde_json::json!({
                "module_version_id": version_id,
                "source_type": request.source_type,
            }),
        )?;

        drop(scratch);
        Ok(row)
    }
}

/// Run one phase inside its own savepoint.
///
/// Success releases the savepoint and records the phase result; failure
/// rolls the savepoint back, records the failure, and propagates the error
/// so the wrapper aborts the whole ingestion.
async fn run_phase<T, Fut>(
    tx: &Transaction,
    phases: &mut HashMap<String, PhaseResult>,
    rolled_back: &mut bool,
    phase: IngestPhase,
    work: Fut,
) -> Result<T>
where
    Fut: Future<Output = Result<(T, Option<serde_json::Value>)>>,
{
    let savepoint = tx.savepoint(phase.as_str())?;
    let started = Instant::now();
    tracing::debug!(phase = %phase, "Phase started");

    match work.await {
        Ok((value, data)) => {
            savepoint.release()?;
            let duration = started.elapsed();
            tracing::debug!(phase = %phase, duration_ms = duration.as_millis() as u64, "Phase complete");
            phases.insert(phase.as_str().to_string(), PhaseResult::success(duration, data));
            Ok(value)
        }
        Err(e) => {
            let duration = started.elapsed();
            tracing::warn!(phase = %phase, error = %e, "Phase failed, rolling back savepoint");
            if let Err(rollback_err) = savepoint.rollback() {
                tracing::error!(phase = %phase, error = %rollback_err, "Savepoint rollback failed");
            }
            *rolled_back = true;
            phases.insert(
                phase.as_str().to_string(),
                PhaseResult::failure(duration, error_text(&e)),
            );
            Err(e)
        }
    }
}

/// Resolve the version to index: the explicit version, or the git tag
/// matched against the provider's tag format.
fn resolve_version(request: &IngestRequest, provider: &ModuleProvider) -> Result<Version> {
    match (&request.version, &request.git_tag) {
        (Some(_), Some(_)) => Err(crate::err!(InvalidInput {
            message: "supply exactly one of version and git_tag, not both".to_string(),
        })),
        (None, None) => Err(crate::err!(InvalidInput {
            message: "supply exactly one of version and git_tag".to_string(),
        })),
        (Some(version), None) => Version::parse(version),
        (None, Some(tag)) => version_from_tag(&provider.tag_format, tag),
    }
}

/// Invert a tag format template: `v{version}` applied to `v1.2.3` yields
/// `1.2.3`.
pub fn version_from_tag(tag_format: &str, tag: &str) -> Result<Version> {
    let Some((prefix, suffix)) = tag_format.split_once("{version}") else {
        return Err(crate::err!(Configuration {
            message: format!("tag format '{tag_format}' has no {{version}} placeholder"),
        }));
    };

    let stripped = tag
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_suffix(suffix))
        .ok_or_else(|| {
            crate::err!(InvalidInput {
                message: format!("git tag '{tag}' does not match tag format '{tag_format}'"),
            })
        })?;

    Version::parse(stripped)
}

/// Human-readable error text for result reports: subprocess failures render
/// as `"<step> failed: <detail>"`, everything else uses its display form.
pub(crate) fn error_text(e: &RegistryError) -> String {
    match e {
        RegistryError::Subprocess { step, message, .. } => format!("{step} failed: {message}"),
        other => other.to_string(),
    }
}

fn skip_reason(prerequisite_met: bool, skip_flag: bool) -> String {
    if skip_flag {
        "skipped by request option".to_string()
    } else if !prerequisite_met {
        "input prerequisite not present".to_string()
    } else {
        "not applicable".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider_with_format(tag_format: &str) -> ModuleProvider {
        ModuleProvider {
            id: 1,
            namespace: "alice".to_string(),
            module: "net".to_string(),
            provider: "aws".to_string(),
            repo_clone_url_template: None,
            tag_format: tag_format.to_string(),
            git_path: None,
            repo_browse_url_template: None,
            verified: false,
        }
    }

    #[test]
    fn test_version_from_tag() {
        let v = version_from_tag("v{version}", "v1.2.3").unwrap();
        assert_eq!(v, Version::parse("1.2.3").unwrap());

        let v = version_from_tag("release-{version}", "release-2.0.0-beta1").unwrap();
        assert_eq!(v, Version::parse("2.0.0-beta1").unwrap());
    }

    #[test]
    fn test_version_from_tag_mismatch() {
        assert!(version_from_tag("v{version}", "release-1.2.3").is_err());
        assert!(version_from_tag("no-placeholder", "v1.2.3").is_err());
    }

    #[test]
    fn test_resolve_version_requires_exactly_one() {
        let provider = provider_with_format("v{version}");
        let mut request = crate::types::IngestRequest {
            namespace: "alice".to_string(),
            module: "net".to_string(),
            provider: "aws".to_string(),
            version: None,
            git_tag: None,
            archive_path: None,
            module_path: None,
            source_type: SourceType::Path,
            options: crate::types::IngestOptions::default(),
        };

        assert!(resolve_version(&request, &provider).is_err());

        request.version = Some("1.0.0".to_string());
        request.git_tag = Some("v1.0.0".to_string());
        assert!(resolve_version(&request, &provider).is_err());

        request.git_tag = None;
        assert!(resolve_version(&request, &provider).is_ok());
    }

    #[test]
    fn test_error_text_formats_subprocess_step() {
        let e = crate::err!(Subprocess {
            step: crate::error::SubprocessStep::TerraformInit,
            message: "Error: backend configuration changed".to_string(),
        });
        assert_eq!(
            error_text(&e),
            "terraform_init failed: Error: backend configuration changed"
        );
    }
}
