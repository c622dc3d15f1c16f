//! Per-file content storage.
//!
//! Validates file paths against the registry's safety rules, optionally
//! post-processes Markdown into sanitised HTML, derives a content type from
//! the extension, and persists the batch. The caller wraps the batch in a
//! savepoint: the batch succeeds iff every file succeeds, and any failure
//! rolls the whole savepoint back.

use crate::error::{ErrorCollector, Result};
use crate::store::repos;
use crate::types::ModuleVersionFile;
use pulldown_cmark::{html, Options, Parser};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

/// Characters never allowed anywhere in a stored path.
const FORBIDDEN_CHARS: [char; 7] = ['<', '>', ':', '"', '|', '?', '*'];

/// How a single file failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFailureKind {
    /// The path violated a safety rule
    Validation,
    /// Content post-processing failed
    Processing,
    /// The database rejected the row
    Storage,
}

/// Summary of a stored batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredBatch {
    /// Number of files persisted
    pub stored: usize,
    /// Paths in the order they were persisted
    pub paths: Vec<String>,
}

/// Validate a path against the registry's safety rules: relative,
/// forward-slash form, no `..` segments, no reserved characters, and every
/// segment drawn from `[A-Za-z0-9._-]`.
///
/// # Errors
///
/// Returns [`PathValidation`](crate::error::RegistryError::PathValidation)
/// naming the violated rule.
pub fn validate_path(path: &str) -> Result<()> {
    let fail = |message: &str| {
        Err(crate::err!(PathValidation {
            path: path.to_string(),
            message: message.to_string(),
        }))
    };

    if path.is_empty() {
        return fail("path is empty");
    }
    if path.starts_with('/') || path.starts_with('\\') {
        return fail("path is absolute");
    }
    if path.contains("..") {
        return fail("path contains a parent-directory segment");
    }
    if path.contains(&FORBIDDEN_CHARS[..]) {
        return fail("path contains a reserved character");
    }

    for segment in path.split('/') {
        if segment.is_empty() {
            return fail("path contains an empty segment");
        }
        if !segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return fail("path segment contains a disallowed character");
        }
    }

    Ok(())
}

/// Derive the stored content type from a path's extension.
#[must_use]
pub fn content_type_for(path: &str) -> &'static str {
    let extension = path.rsplit('.').next().unwrap_or("");
    match extension {
        "md" | "markdown" => "text/markdown",
        "json" => "application/json",
        "yml" | "yaml" => "application/x-yaml",
        _ => "text/plain",
    }
}

/// True when the path's content type gets Markdown post-processing.
#[must_use]
pub fn is_markdown(path: &str) -> bool {
    content_type_for(path) == "text/markdown"
}

/// Render Markdown to sanitised HTML.
#[must_use]
pub fn render_markdown(input: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let parser = Parser::new_ext(input, options);
    let mut rendered = String::with_capacity(input.len() * 2);
    html::push_html(&mut rendered, parser);

    ammonia::clean(&rendered)
}

/// Validate, process and persist a batch of files for a module version.
///
/// Every failure is accumulated so the caller sees the complete picture,
/// then the combined error rolls the surrounding savepoint.
///
/// # Errors
///
/// Returns the collected per-file errors when any file fails.
pub fn store_files(
    conn: &Connection,
    module_version_id: i64,
    files: &[(String, Vec<u8>)],
    processing_enabled: bool,
) -> Result<StoredBatch> {
    let mut errors = ErrorCollector::new();
    let mut batch = StoredBatch::default();

    for (path, content) in files {
        if let Err(e) = validate_path(path) {
            tracing::warn!(path = %path, error = %e, "Rejected file path");
            errors.add(e);
            continue;
        }

        let processed = if processing_enabled && is_markdown(path) {
            match String::from_utf8(content.clone()) {
                Ok(text) => render_markdown(&text).into_bytes(),
                Err(e) => {
                    errors.add(crate::err!(InvalidInput {
                        message: format!("markdown file '{path}' is not valid UTF-8: {e}"),
                    }));
                    continue;
                }
            }
        } else {
            content.clone()
        };

        let file = ModuleVersionFile {
            id: 0,
            module_version_id,
            path: path.clone(),
            content: processed,
            content_type: content_type_for(path).to_string(),
        };

        match repos::insert_module_version_file(conn, &file) {
            Ok(_) => {
                batch.stored += 1;
                batch.paths.push(path.clone());
            }
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "Failed to persist file");
                errors.add(e);
            }
        }
    }

    errors.into_result()?;
    Ok(batch)
}

/// Classify an error produced by [`store_files`] for reporting.
#[must_use]
pub fn classify_failure(error: &crate::error::RegistryError) -> FileFailureKind {
    use crate::error::RegistryError;
    match error {
        RegistryError::PathValidation { .. } => FileFailureKind::Validation,
        RegistryError::Storage { .. } => FileFailureKind::Storage,
        _ => FileFailureKind::Processing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;

    #[test]
    fn test_validate_path_accepts_normal_paths() {
        validate_path("main.tf").unwrap();
        validate_path("modules/vpc/variables.tf").unwrap();
        validate_path("docs/how-to_use.md").unwrap();
    }

    #[test]
    fn test_validate_path_rejections() {
        assert!(validate_path("").is_err());
        assert!(validate_path("/etc/passwd").is_err());
        assert!(validate_path("a/../b.tf").is_err());
        assert!(validate_path("a//b.tf").is_err());
        assert!(validate_path("warm?.tf").is_err());
        assert!(validate_path("space name.tf").is_err());
        assert!(validate_path("quote\".tf").is_err());
    }

    #[test]
    fn test_content_type_map() {
        assert_eq!(content_type_for("README.md"), "text/markdown");
        assert_eq!(content_type_for("data.json"), "application/json");
        assert_eq!(content_type_for("stack.yml"), "application/x-yaml");
        assert_eq!(content_type_for("stack.yaml"), "application/x-yaml");
        assert_eq!(content_type_for("main.tf"), "text/plain");
        assert_eq!(content_type_for("terraform.tfvars"), "text/plain");
        assert_eq!(content_type_for("LICENSE"), "text/plain");
    }

    #[test]
    fn test_render_markdown_sanitises_scripts() {
        let html = render_markdown("# Title\n\n<script>alert(1)</script>\n\n*em*");
        assert!(html.contains("<h1>"));
        assert!(html.contains("<em>"));
        assert!(!html.contains("<script>"));
    }

    #[tokio::test]
    async fn test_store_files_batch() {
        let db = Database::open_in_memory().unwrap();
        let tx = db.begin().await.unwrap();
        let version_id = version_fixture(tx.conn());

        let files = vec![
            ("main.tf".to_string(), b"resource {}".to_vec()),
            ("README.md".to_string(), b"# doc".to_vec()),
        ];
        let batch = store_files(tx.conn(), version_id, &files, true).unwrap();
        assert_eq!(batch.stored, 2);

        let stored = repos::list_module_version_files(tx.conn(), version_id).unwrap();
        assert_eq!(stored.len(), 2);
        let readme = stored.iter().find(|f| f.path == "README.md").unwrap();
        assert_eq!(readme.content_type, "text/markdown");
        // Markdown was rendered to HTML
        assert!(String::from_utf8_lossy(&readme.content).contains("<h1>"));

        tx.commit().unwrap();
    }

    #[tokio::test]
    async fn test_store_files_fails_whole_batch_on_bad_path() {
        let db = Database::open_in_memory().unwrap();
        let tx = db.begin().await.unwrap();
        let version_id = version_fixture(tx.conn());

        let files = vec![
            ("good.tf".to_string(), b"{}".to_vec()),
            ("../evil.tf".to_string(), b"{}".to_vec()),
        ];
        let err = store_files(tx.conn(), version_id, &files, false).unwrap_err();
        assert_eq!(classify_failure(&err), FileFailureKind::Validation);

        tx.commit().unwrap();
    }

    fn version_fixture(conn: &Connection) -> i64 {
        let provider = crate::types::ModuleProvider {
            id: 0,
            namespace: "alice".to_string(),
            module: "net".to_string(),
            provider: "aws".to_string(),
            repo_clone_url_template: None,
            tag_format: "v{version}".to_string(),
            git_path: None,
            repo_browse_url_template: None,
            verified: false,
        };
        let provider_id = repos::create_module_provider(conn, &provider).unwrap();
        let mut row = crate::types::ModuleVersionRow::new(
            provider_id,
            crate::version::Version::parse("1.0.0").unwrap(),
        );
        repos::insert_module_version(conn, &mut row).unwrap();
        row.id
    }
}
