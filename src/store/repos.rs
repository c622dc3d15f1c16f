//! Repository operations over the module index schema.
//!
//! All functions take a plain [`rusqlite::Connection`] reference so they can
//! run inside either an outer [`Transaction`](super::Transaction) or a phase
//! [`Savepoint`](super::Savepoint) scope — callers decide the rollback
//! boundary, repositories only read and write rows.

use crate::error::Result;
use crate::types::{
    ModuleDetails, ModuleProvider, ModuleProviderRedirect, ModuleVersionFile, ModuleVersionRow,
    Namespace, NamespaceType,
};
use crate::version::Version;
use rusqlite::{params, Connection, OptionalExtension};

/// Insert a namespace if it doesn't exist yet, returning the stored row.
///
/// # Errors
///
/// Returns a storage error on database failure.
pub fn ensure_namespace(conn: &Connection, name: &str, namespace_type: NamespaceType) -> Result<Namespace> {
    conn.execute(
        "INSERT INTO namespaces (name, namespace_type) VALUES (?1, ?2)
         ON CONFLICT (name) DO NOTHING",
        params![name, namespace_type.as_str()],
    )?;
    let row = conn.query_row(
        "SELECT id, name, namespace_type FROM namespaces WHERE name = ?1",
        params![name],
        |row| {
            Ok(Namespace {
                id: row.get(0)?,
                name: row.get(1)?,
                namespace_type: NamespaceType::from_str_or_default(&row.get::<_, String>(2)?),
            })
        },
    )?;
    Ok(row)
}

/// Look up a namespace by name.
///
/// # Errors
///
/// Returns a storage error on database failure.
pub fn get_namespace(conn: &Connection, name: &str) -> Result<Option<Namespace>> {
    let row = conn
        .query_row(
            "SELECT id, name, namespace_type FROM namespaces WHERE name = ?1",
            params![name],
            |row| {
                Ok(Namespace {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    namespace_type: NamespaceType::from_str_or_default(&row.get::<_, String>(2)?),
                })
            },
        )
        .optional()?;
    Ok(row)
}

fn provider_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ModuleProvider> {
    Ok(ModuleProvider {
        id: row.get(0)?,
        namespace: row.get(1)?,
        module: row.get(2)?,
        provider: row.get(3)?,
        repo_clone_url_template: row.get(4)?,
        tag_format: row.get(5)?,
        git_path: row.get(6)?,
        repo_browse_url_template: row.get(7)?,
        verified: row.get(8)?,
    })
}

const PROVIDER_COLUMNS: &str = "id, namespace, module, provider, repo_clone_url_template, \
                                tag_format, git_path, repo_browse_url_template, verified";

/// Persist a module provider, returning its assigned id.
///
/// # Errors
///
/// Returns a storage error on database failure (including a violated
/// `(namespace, module, provider)` uniqueness constraint).
pub fn create_module_provider(conn: &Connection, provider: &ModuleProvider) -> Result<i64> {
    conn.execute(
        "INSERT INTO module_providers
         (namespace, module, provider, repo_clone_url_template, tag_format, git_path, repo_browse_url_template, verified)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            provider.namespace,
            provider.module,
            provider.provider,
            provider.repo_clone_url_template,
            provider.tag_format,
            provider.git_path,
            provider.repo_browse_url_template,
            provider.verified,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Fetch a module provider by id.
///
/// # Errors
///
/// Returns a storage error on database failure.
pub fn get_module_provider(conn: &Connection, id: i64) -> Result<Option<ModuleProvider>> {
    let row = conn
        .query_row(
            &format!("SELECT {PROVIDER_COLUMNS} FROM module_providers WHERE id = ?1"),
            params![id],
            provider_from_row,
        )
        .optional()?;
    Ok(row)
}

/// Find a module provider by its `(namespace, module, provider)` triple,
/// following a historical redirect if the triple has moved.
///
/// # Errors
///
/// Returns a storage error on database failure.
pub fn resolve_module_provider(
    conn: &Connection,
    namespace: &str,
    module: &str,
    provider: &str,
) -> Result<Option<ModuleProvider>> {
    let direct = conn
        .query_row(
            &format!(
                "SELECT {PROVIDER_COLUMNS} FROM module_providers
                 WHERE namespace = ?1 AND module = ?2 AND provider = ?3"
            ),
            params![namespace, module, provider],
            provider_from_row,
        )
        .optional()?;
    if direct.is_some() {
        return Ok(direct);
    }

    // Fall back to a redirect left behind by a moved provider.
    let redirected = conn
        .query_row(
            &format!(
                "SELECT {} FROM module_providers p
                 JOIN module_provider_redirects r ON r.to_module_provider_id = p.id
                 WHERE r.from_namespace = ?1 AND r.from_module = ?2 AND r.from_provider = ?3",
                PROVIDER_COLUMNS
                    .split(", ")
                    .map(|c| format!("p.{c}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            params![namespace, module, provider],
            provider_from_row,
        )
        .optional()?;
    if redirected.is_some() {
        tracing::debug!(
            namespace = namespace,
            module = module,
            provider = provider,
            "Resolved module provider through redirect"
        );
    }
    Ok(redirected)
}

/// Record a redirect from a moved triple to its new provider row.
///
/// # Errors
///
/// Returns a storage error on database failure.
pub fn create_redirect(conn: &Connection, redirect: &ModuleProviderRedirect) -> Result<i64> {
    conn.execute(
        "INSERT INTO module_provider_redirects
         (from_namespace, from_module, from_provider, to_module_provider_id)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            redirect.from_namespace,
            redirect.from_module,
            redirect.from_provider,
            redirect.to_module_provider_id,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn version_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ModuleVersionRow> {
    let version_text: String = row.get(2)?;
    let version = Version::parse(&version_text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())),
        )
    })?;
    Ok(ModuleVersionRow {
        id: row.get(0)?,
        provider_id: row.get(1)?,
        version,
        beta: row.get(3)?,
        published: row.get(4)?,
        owner: row.get(5)?,
        description: row.get(6)?,
        git_sha: row.get(7)?,
    })
}

const VERSION_COLUMNS: &str = "id, provider_id, version, beta, published, owner, description, git_sha";

/// Insert a module version row, assigning its id in place.
///
/// The `AUTOINCREMENT` rowid guarantees the assigned id differs from every
/// previously deleted row's id.
///
/// # Errors
///
/// Returns a storage error on database failure (including the
/// `(provider_id, version)` uniqueness constraint).
pub fn insert_module_version(conn: &Connection, row: &mut ModuleVersionRow) -> Result<i64> {
    conn.execute(
        "INSERT INTO module_versions
         (provider_id, version, beta, published, owner, description, git_sha)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            row.provider_id,
            row.version.to_string(),
            row.beta,
            row.published,
            row.owner,
            row.description,
            row.git_sha,
        ],
    )?;
    row.id = conn.last_insert_rowid();
    Ok(row.id)
}

/// Find a provider's version row by version string.
///
/// # Errors
///
/// Returns a storage error on database failure.
pub fn find_module_version(
    conn: &Connection,
    provider_id: i64,
    version: &Version,
) -> Result<Option<ModuleVersionRow>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {VERSION_COLUMNS} FROM module_versions
                 WHERE provider_id = ?1 AND version = ?2"
            ),
            params![provider_id, version.to_string()],
            version_from_row,
        )
        .optional()?;
    Ok(row)
}

/// Fetch a module version by id.
///
/// # Errors
///
/// Returns a storage error on database failure.
pub fn get_module_version(conn: &Connection, id: i64) -> Result<Option<ModuleVersionRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {VERSION_COLUMNS} FROM module_versions WHERE id = ?1"),
            params![id],
            version_from_row,
        )
        .optional()?;
    Ok(row)
}

/// List all version rows of a provider, unsorted.
///
/// # Errors
///
/// Returns a storage error on database failure.
pub fn list_module_versions(conn: &Connection, provider_id: i64) -> Result<Vec<ModuleVersionRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {VERSION_COLUMNS} FROM module_versions WHERE provider_id = ?1"
    ))?;
    let rows = stmt
        .query_map(params![provider_id], version_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Delete a module version row; details, files, submodules and examples
/// cascade with it.
///
/// # Errors
///
/// Returns a storage error on database failure.
pub fn delete_module_version(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM module_versions WHERE id = ?1", params![id])?;
    Ok(())
}

/// Flip a version's published flag.
///
/// # Errors
///
/// Returns a storage error on database failure.
pub fn set_published(conn: &Connection, id: i64, published: bool) -> Result<()> {
    conn.execute(
        "UPDATE module_versions SET published = ?2 WHERE id = ?1",
        params![id, published],
    )?;
    Ok(())
}

/// Record the commit a version was built from.
///
/// # Errors
///
/// Returns a storage error on database failure.
pub fn set_git_sha(conn: &Connection, id: i64, git_sha: &str) -> Result<()> {
    conn.execute(
        "UPDATE module_versions SET git_sha = ?2 WHERE id = ?1",
        params![id, git_sha],
    )?;
    Ok(())
}

/// Update the owner/description fields read from module metadata.
///
/// # Errors
///
/// Returns a storage error on database failure.
pub fn update_version_metadata(
    conn: &Connection,
    id: i64,
    owner: Option<&str>,
    description: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE module_versions SET owner = COALESCE(?2, owner), description = COALESCE(?3, description)
         WHERE id = ?1",
        params![id, owner, description],
    )?;
    Ok(())
}

/// Insert or replace the details blob aggregate for a version.
///
/// # Errors
///
/// Returns a storage error on database failure.
pub fn upsert_module_details(conn: &Connection, module_version_id: i64, details: &ModuleDetails) -> Result<()> {
    conn.execute(
        "INSERT INTO module_details
         (module_version_id, readme, terraform_docs, tfsec, infracost, terraform_graph, terraform_modules, terraform_version)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT (module_version_id) DO UPDATE SET
           readme = COALESCE(excluded.readme, readme),
           terraform_docs = COALESCE(excluded.terraform_docs, terraform_docs),
           tfsec = COALESCE(excluded.tfsec, tfsec),
           infracost = COALESCE(excluded.infracost, infracost),
           terraform_graph = COALESCE(excluded.terraform_graph, terraform_graph),
           terraform_modules = COALESCE(excluded.terraform_modules, terraform_modules),
           terraform_version = COALESCE(excluded.terraform_version, terraform_version)",
        params![
            module_version_id,
            details.readme,
            details.terraform_docs,
            details.tfsec,
            details.infracost,
            details.terraform_graph,
            details.terraform_modules,
            details.terraform_version,
        ],
    )?;
    Ok(())
}

/// Fetch the details aggregate for a version.
///
/// # Errors
///
/// Returns a storage error on database failure.
pub fn get_module_details(conn: &Connection, module_version_id: i64) -> Result<Option<ModuleDetails>> {
    let row = conn
        .query_row(
            "SELECT readme, terraform_docs, tfsec, infracost, terraform_graph, terraform_modules, terraform_version
             FROM module_details WHERE module_version_id = ?1",
            params![module_version_id],
            |row| {
                Ok(ModuleDetails {
                    readme: row.get(0)?,
                    terraform_docs: row.get(1)?,
                    tfsec: row.get(2)?,
                    infracost: row.get(3)?,
                    terraform_graph: row.get(4)?,
                    terraform_modules: row.get(5)?,
                    terraform_version: row.get(6)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

/// Record a submodule path, returning its id.
///
/// # Errors
///
/// Returns a storage error on database failure.
pub fn insert_submodule(conn: &Connection, module_version_id: i64, path: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO submodules (module_version_id, path) VALUES (?1, ?2)",
        params![module_version_id, path],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Record an example path, returning its id.
///
/// # Errors
///
/// Returns a storage error on database failure.
pub fn insert_example(conn: &Connection, module_version_id: i64, path: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO examples (module_version_id, path) VALUES (?1, ?2)",
        params![module_version_id, path],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Record a file belonging to an example.
///
/// # Errors
///
/// Returns a storage error on database failure.
pub fn insert_example_file(conn: &Connection, example_id: i64, path: &str, content: &[u8]) -> Result<i64> {
    conn.execute(
        "INSERT INTO example_files (example_id, path, content) VALUES (?1, ?2, ?3)",
        params![example_id, path, content],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Persist a per-version file tuple.
///
/// # Errors
///
/// Returns a storage error on database failure (including the
/// `(module_version_id, path)` uniqueness constraint).
pub fn insert_module_version_file(conn: &Connection, file: &ModuleVersionFile) -> Result<i64> {
    conn.execute(
        "INSERT INTO module_version_files (module_version_id, path, content, content_type)
         VALUES (?1, ?2, ?3, ?4)",
        params![file.module_version_id, file.path, file.content, file.content_type],
    )?;
    Ok(conn.last_insert_rowid())
}

/// List the stored files of a version, sorted by path.
///
/// # Errors
///
/// Returns a storage error on database failure.
pub fn list_module_version_files(conn: &Connection, module_version_id: i64) -> Result<Vec<ModuleVersionFile>> {
    let mut stmt = conn.prepare(
        "SELECT id, module_version_id, path, content, content_type
         FROM module_version_files WHERE module_version_id = ?1 ORDER BY path",
    )?;
    let rows = stmt
        .query_map(params![module_version_id], |row| {
            Ok(ModuleVersionFile {
                id: row.get(0)?,
                module_version_id: row.get(1)?,
                path: row.get(2)?,
                content: row.get(3)?,
                content_type: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// List a version's submodule paths, sorted.
///
/// # Errors
///
/// Returns a storage error on database failure.
pub fn list_submodule_paths(conn: &Connection, module_version_id: i64) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT path FROM submodules WHERE module_version_id = ?1 ORDER BY path")?;
    let rows = stmt
        .query_map(params![module_version_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// List a version's example paths, sorted.
///
/// # Errors
///
/// Returns a storage error on database failure.
pub fn list_example_paths(conn: &Connection, module_version_id: i64) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT path FROM examples WHERE module_version_id = ?1 ORDER BY path")?;
    let rows = stmt
        .query_map(params![module_version_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;

    fn provider_fixture() -> ModuleProvider {
        ModuleProvider {
            id: 0,
            namespace: "alice".to_string(),
            module: "net".to_string(),
            provider: "aws".to_string(),
            repo_clone_url_template: Some("https://{namespace}/{name}-{provider}.git".to_string()),
            tag_format: "v{version}".to_string(),
            git_path: None,
            repo_browse_url_template: None,
            verified: false,
        }
    }

    #[tokio::test]
    async fn test_version_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let tx = db.begin().await.unwrap();

        let provider_id = create_module_provider(tx.conn(), &provider_fixture()).unwrap();
        let version = Version::parse("1.2.3-beta1").unwrap();
        let mut row = ModuleVersionRow::new(provider_id, version.clone());
        insert_module_version(tx.conn(), &mut row).unwrap();
        assert!(row.id > 0);

        let found = find_module_version(tx.conn(), provider_id, &version)
            .unwrap()
            .unwrap();
        assert_eq!(found.id, row.id);
        assert!(found.beta);
        assert!(!found.published);

        tx.commit().unwrap();
    }

    #[tokio::test]
    async fn test_fresh_id_after_delete() {
        let db = Database::open_in_memory().unwrap();
        let tx = db.begin().await.unwrap();

        let provider_id = create_module_provider(tx.conn(), &provider_fixture()).unwrap();
        let version = Version::parse("1.0.0").unwrap();

        let mut first = ModuleVersionRow::new(provider_id, version.clone());
        insert_module_version(tx.conn(), &mut first).unwrap();
        let old_id = first.id;

        delete_module_version(tx.conn(), old_id).unwrap();

        let mut second = ModuleVersionRow::new(provider_id, version);
        insert_module_version(tx.conn(), &mut second).unwrap();
        assert_ne!(second.id, old_id, "reindex must assign a fresh id");

        tx.commit().unwrap();
    }

    #[tokio::test]
    async fn test_delete_cascades_to_children() {
        let db = Database::open_in_memory().unwrap();
        let tx = db.begin().await.unwrap();

        let provider_id = create_module_provider(tx.conn(), &provider_fixture()).unwrap();
        let mut row = ModuleVersionRow::new(provider_id, Version::parse("1.0.0").unwrap());
        insert_module_version(tx.conn(), &mut row).unwrap();

        upsert_module_details(
            tx.conn(),
            row.id,
            &ModuleDetails::default().with_readme(Some("# doc".to_string())),
        )
        .unwrap();
        insert_submodule(tx.conn(), row.id, "modules/vpc").unwrap();
        let example_id = insert_example(tx.conn(), row.id, "examples/basic").unwrap();
        insert_example_file(tx.conn(), example_id, "main.tf", b"{}").unwrap();
        insert_module_version_file(
            tx.conn(),
            &ModuleVersionFile {
                id: 0,
                module_version_id: row.id,
                path: "main.tf".to_string(),
                content: b"{}".to_vec(),
                content_type: "text/plain".to_string(),
            },
        )
        .unwrap();

        delete_module_version(tx.conn(), row.id).unwrap();

        for table in ["module_details", "submodules", "examples", "example_files", "module_version_files"] {
            let count: i64 = tx
                .conn()
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
                .unwrap();
            assert_eq!(count, 0, "{table} should be empty after cascade");
        }

        tx.commit().unwrap();
    }

    #[tokio::test]
    async fn test_redirect_resolution() {
        let db = Database::open_in_memory().unwrap();
        let tx = db.begin().await.unwrap();

        let provider_id = create_module_provider(tx.conn(), &provider_fixture()).unwrap();
        create_redirect(
            tx.conn(),
            &ModuleProviderRedirect {
                id: 0,
                from_namespace: "old".to_string(),
                from_module: "net".to_string(),
                from_provider: "aws".to_string(),
                to_module_provider_id: provider_id,
            },
        )
        .unwrap();

        let resolved = resolve_module_provider(tx.conn(), "old", "net", "aws")
            .unwrap()
            .unwrap();
        assert_eq!(resolved.id, provider_id);

        let missing = resolve_module_provider(tx.conn(), "nobody", "net", "aws").unwrap();
        assert!(missing.is_none());

        tx.commit().unwrap();
    }
}
