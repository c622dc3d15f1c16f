//! The module creation wrapper.
//!
//! Owns the lifecycle of one module version row inside an already-open
//! outer transaction: honour the reindex policy against any existing row,
//! insert the fresh row, run the caller's extraction function, and publish
//! on success. Any error propagates to the caller, whose transaction (or
//! version savepoint) rollback discards everything the wrapper did.
//!
//! Version state machine: `Initial → Prepared → Extracted → Published`,
//! with any failure at or before `Extracted` aborting the row entirely.

use crate::config::{IngestionOptions, ReindexMode};
use crate::error::Result;
use crate::store::{repos, Transaction};
use crate::types::{ModuleProvider, ModuleVersionRow};
use crate::version::Version;
use std::future::Future;

/// The wrapper's successful outcome.
#[derive(Debug, Clone)]
pub struct CreationOutcome {
    /// The persisted (and possibly published) version row
    pub module_version: ModuleVersionRow,
    /// Whether the wrapper published the row
    pub published: bool,
}

/// Create (or re-create) a module version and run `extraction` against it.
///
/// `publish_requested` is the request-level switch; the effective publish
/// decision additionally honours the reindex mode:
///
/// - `legacy`: the configured auto-publish default
/// - `auto-publish`: the predecessor's published state, captured *before*
///   its deletion; the auto-publish default when there was no predecessor
/// - `prohibit`: never (a pre-existing version is an error instead)
///
/// # Errors
///
/// - `NotFound` when `module_provider_id` doesn't resolve
/// - `AlreadyExists` when the version exists and the mode is `prohibit`
/// - anything `extraction` or the storage layer return
pub async fn create_module_version<F, Fut>(
    tx: &Transaction,
    ingestion: &IngestionOptions,
    module_provider_id: i64,
    version: &Version,
    commit_sha: Option<&str>,
    publish_requested: bool,
    extraction: F,
) -> Result<CreationOutcome>
where
    F: FnOnce(ModuleVersionRow) -> Fut,
    Fut: Future<Output = Result<ModuleVersionRow>>,
{
    let provider: ModuleProvider = repos::get_module_provider(tx.conn(), module_provider_id)?
        .ok_or_else(|| {
            crate::err!(NotFound {
                entity: "module provider",
                name: format!("id {module_provider_id}"),
            })
        })?;

    // Reindex policy: decide what an existing row means before touching it.
    let existing = repos::find_module_version(tx.conn(), module_provider_id, version)?;
    let mut predecessor_published: Option<bool> = None;

    if let Some(existing) = existing {
        match ingestion.reindex_mode {
            ReindexMode::Prohibit => {
                return Err(crate::err!(AlreadyExists {
                    name: format!("{} {}", provider.identity(), version),
                }));
            }
            ReindexMode::Legacy | ReindexMode::AutoPublish => {
                // Capture the published flag before the delete destroys it;
                // auto-publish mode preserves it across the reindex.
                predecessor_published = Some(existing.published);
                tracing::info!(
                    provider = %provider.identity(),
                    version = %version,
                    old_id = existing.id,
                    was_published = existing.published,
                    "Reindexing existing module version"
                );
                repos::delete_module_version(tx.conn(), existing.id)?;
            }
        }
    }

    let should_publish = publish_requested
        && match ingestion.reindex_mode {
            ReindexMode::Legacy => ingestion.auto_publish,
            ReindexMode::AutoPublish => predecessor_published.unwrap_or(ingestion.auto_publish),
            ReindexMode::Prohibit => false,
        };

    // Prepared: a fresh row with a fresh id, never the deleted row's.
    let mut row = ModuleVersionRow::new(module_provider_id, version.clone());
    repos::insert_module_version(tx.conn(), &mut row)?;

    if let Some(sha) = commit_sha {
        repos::set_git_sha(tx.conn(), row.id, sha)?;
        row.git_sha = Some(sha.to_string());
    }

    tracing::debug!(
        provider = %provider.identity(),
        version = %version,
        id = row.id,
        "Module version prepared, running extraction"
    );

    // Extracted: the caller's pipeline runs inside the same transaction.
    let mut row = extraction(row).await?;

    // Published: only ever after a fully successful extraction.
    if should_publish {
        repos::set_published(tx.conn(), row.id, true)?;
        row.published = true;
    }

    Ok(CreationOutcome {
        module_version: row,
        published: should_publish,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;

    fn ingestion(mode: ReindexMode, auto_publish: bool) -> IngestionOptions {
        IngestionOptions {
            reindex_mode: mode,
            auto_publish,
            delete_externally_hosted_artifacts: false,
        }
    }

    async fn setup() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        let provider_id = {
            let tx = db.begin().await.unwrap();
            let id = repos::create_module_provider(
                tx.conn(),
                &ModuleProvider {
                    id: 0,
                    namespace: "alice".to_string(),
                    module: "net".to_string(),
                    provider: "aws".to_string(),
                    repo_clone_url_template: None,
                    tag_format: "v{version}".to_string(),
                    git_path: None,
                    repo_browse_url_template: None,
                    verified: false,
                },
            )
            .unwrap();
            tx.commit().unwrap();
            id
        };
        (db, provider_id)
    }

    #[tokio::test]
    async fn test_create_and_publish() {
        let (db, provider_id) = setup().await;
        let tx = db.begin().await.unwrap();
        let version = Version::parse("1.0.0").unwrap();

        let outcome = create_module_version(
            &tx,
            &ingestion(ReindexMode::Legacy, true),
            provider_id,
            &version,
            Some("abc123"),
            true,
            |row| async move { Ok(row) },
        )
        .await
        .unwrap();

        assert!(outcome.published);
        assert_eq!(outcome.module_version.git_sha.as_deref(), Some("abc123"));

        let stored = repos::get_module_version(tx.conn(), outcome.module_version.id)
            .unwrap()
            .unwrap();
        assert!(stored.published);
        tx.commit().unwrap();
    }

    #[tokio::test]
    async fn test_prohibit_mode_rejects_existing() {
        let (db, provider_id) = setup().await;
        let version = Version::parse("1.0.0").unwrap();

        {
            let tx = db.begin().await.unwrap();
            let mut row = ModuleVersionRow::new(provider_id, version.clone());
            repos::insert_module_version(tx.conn(), &mut row).unwrap();
            tx.commit().unwrap();
        }

        let tx = db.begin().await.unwrap();
        let err = create_module_version(
            &tx,
            &ingestion(ReindexMode::Prohibit, true),
            provider_id,
            &version,
            None,
            true,
            |row| async move { Ok(row) },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, crate::error::RegistryError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_legacy_mode_replaces_with_fresh_id() {
        let (db, provider_id) = setup().await;
        let version = Version::parse("1.0.0").unwrap();

        let old_id = {
            let tx = db.begin().await.unwrap();
            let mut row = ModuleVersionRow::new(provider_id, version.clone());
            repos::insert_module_version(tx.conn(), &mut row).unwrap();
            repos::set_published(tx.conn(), row.id, true).unwrap();
            tx.commit().unwrap();
            row.id
        };

        let tx = db.begin().await.unwrap();
        let outcome = create_module_version(
            &tx,
            &ingestion(ReindexMode::Legacy, true),
            provider_id,
            &version,
            None,
            true,
            |row| async move { Ok(row) },
        )
        .await
        .unwrap();
        tx.commit().unwrap();

        assert_ne!(outcome.module_version.id, old_id);
        let gone = db
            .read(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM module_versions WHERE id = ?1",
                    rusqlite::params![old_id],
                    |r| r.get::<_, i64>(0),
                )
            })
            .await
            .unwrap();
        assert_eq!(gone, 0);
    }

    #[tokio::test]
    async fn test_auto_publish_mode_preserves_predecessor_state() {
        let (db, provider_id) = setup().await;
        let version = Version::parse("1.0.0").unwrap();

        // Predecessor exists but was never published
        {
            let tx = db.begin().await.unwrap();
            let mut row = ModuleVersionRow::new(provider_id, version.clone());
            repos::insert_module_version(tx.conn(), &mut row).unwrap();
            tx.commit().unwrap();
        }

        let tx = db.begin().await.unwrap();
        // auto_publish default is true, but the predecessor's state wins
        let outcome = create_module_version(
            &tx,
            &ingestion(ReindexMode::AutoPublish, true),
            provider_id,
            &version,
            None,
            true,
            |row| async move { Ok(row) },
        )
        .await
        .unwrap();
        tx.commit().unwrap();

        assert!(!outcome.published);
    }

    #[tokio::test]
    async fn test_extraction_failure_propagates() {
        let (db, provider_id) = setup().await;
        let tx = db.begin().await.unwrap();
        let version = Version::parse("2.0.0").unwrap();

        let err = create_module_version(
            &tx,
            &ingestion(ReindexMode::Legacy, true),
            provider_id,
            &version,
            None,
            true,
            |_row| async move {
                Err(crate::err!(InvalidInput {
                    message: "extraction exploded".to_string(),
                }))
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, crate::error::RegistryError::InvalidInput { .. }));

        // Roll back like the orchestrator would; no row survives
        tx.rollback().unwrap();
        let count: i64 = db
            .read(|conn| conn.query_row("SELECT COUNT(*) FROM module_versions", [], |r| r.get(0)))
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_unknown_provider_is_not_found() {
        let (db, _) = setup().await;
        let tx = db.begin().await.unwrap();
        let version = Version::parse("1.0.0").unwrap();

        let err = create_module_version(
            &tx,
            &ingestion(ReindexMode::Legacy, true),
            9999,
            &version,
            None,
            true,
            |row| async move { Ok(row) },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, crate::error::RegistryError::NotFound { .. }));
    }
}
