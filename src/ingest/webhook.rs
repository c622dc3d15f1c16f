//! Multi-version webhook import.
//!
//! A repository webhook can announce several tags at once. Each resolved
//! version is ingested under its own savepoint inside one outer
//! transaction, so a failing version is rolled back in isolation and the
//! batch carries on; versions that succeeded stay persisted when the
//! transaction commits.

use crate::error::Result;
use crate::ingest::orchestrator::Orchestrator;
use crate::types::{IngestRequest, IngestResult};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// One tag announced by a webhook, resolved to the version it names.
#[derive(Debug, Clone)]
pub struct VersionImport {
    /// The git tag as announced
    pub tag: String,
    /// The version resolved from the tag
    pub version: String,
    /// The ingest request to run for this version
    pub request: IngestRequest,
}

/// Outcome status for one imported version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    /// The version was ingested and persisted
    Success,
    /// The version failed and its savepoint was rolled back
    Failed,
}

/// Per-version accounting entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionImportOutcome {
    /// The version text
    pub version: String,
    /// Success or failure
    pub status: ImportStatus,
    /// Wall-clock duration of this version's ingestion
    pub duration: Duration,
    /// The persisted module version id on success
    pub module_version_id: Option<i64>,
    /// Failure description on error
    pub error: Option<String>,
    /// The full ingest result report
    pub result: IngestResult,
}

/// Aggregate result of a multi-version import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookImportResult {
    /// Failed iff any version failed
    pub overall_status: ImportStatus,
    /// Number of versions persisted
    pub success_count: usize,
    /// Number of versions rolled back
    pub failure_count: usize,
    /// One line per failed version
    pub failure_summary: Vec<String>,
    /// Per-version outcomes keyed by version text
    pub versions: HashMap<String, VersionImportOutcome>,
}

/// Process an ordered list of tag imports.
///
/// # Errors
///
/// Returns a storage error when the outer transaction cannot be opened or
/// committed. Per-version failures are accounted, never propagated.
pub async fn process_versions(
    orchestrator: &Orchestrator,
    imports: &[VersionImport],
) -> Result<WebhookImportResult> {
    let tx = orchestrator.database().begin().await?;

    let progress = ProgressBar::new(imports.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    let mut result = WebhookImportResult {
        overall_status: ImportStatus::Success,
        success_count: 0,
        failure_count: 0,
        failure_summary: Vec::new(),
        versions: HashMap::new(),
    };

    for import in imports {
        progress.set_message(format!("Importing {}", import.version));
        let started = Instant::now();

        let savepoint = tx.savepoint(&import.version)?;
        let (ingest_result, _outcome) = orchestrator.ingest_in_tx(&tx, &import.request).await;
        let duration = started.elapsed();

        if ingest_result.success {
            savepoint.release()?;
            result.success_count += 1;
            tracing::info!(
                tag = %import.tag,
                version = %import.version,
                duration_ms = duration.as_millis() as u64,
                "Webhook version imported"
            );
            result.versions.insert(
                import.version.clone(),
                VersionImportOutcome {
                    version: import.version.clone(),
                    status: ImportStatus::Success,
                    duration,
                    module_version_id: ingest_result.module_version_id,
                    error: None,
                    result: ingest_result,
                },
            );
        } else {
            savepoint.rollback()?;
            result.failure_count += 1;
            let error = ingest_result
                .error
                .clone()
                .unwrap_or_else(|| "unknown failure".to_string());
            tracing::warn!(
                tag = %import.tag,
                version = %import.version,
                error = %error,
                "Webhook version failed, continuing with remaining tags"
            );
            result
                .failure_summary
                .push(format!("{}: {}", import.version, error));
            result.versions.insert(
                import.version.clone(),
                VersionImportOutcome {
                    version: import.version.clone(),
                    status: ImportStatus::Failed,
                    duration,
                    module_version_id: None,
                    error: Some(error),
                    result: ingest_result,
                },
            );
        }

        progress.inc(1);
    }

    if result.failure_count > 0 {
        result.overall_status = ImportStatus::Failed;
    }

    progress.finish_with_message(format!(
        "Imported {} versions ({} failed)",
        result.success_count, result.failure_count
    ));

    tx.commit()?;

    // Successful versions committed; their audit events dispatch now.
    if let Err(e) = crate::audit::dispatch_pending(orchestrator.database()).await {
        tracing::warn!(error = %e, "Audit dispatch failed, events remain queued");
    }

    Ok(result)
}
