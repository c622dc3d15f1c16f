//! Module parsing.
//!
//! Produces, from a prepared module directory, everything the registry
//! indexes about a version: README content, raw `terraform-docs` output,
//! the structured HCL lists, and the discovered submodules and examples
//! with their extracted files.

pub mod hcl;

use crate::error::{Result, SubprocessStep};
use crate::process;
use std::path::Path;
use std::time::Duration;
use walkdir::WalkDir;

/// README names probed in the module root, in preference order.
const README_FILENAMES: [&str; 3] = ["README.md", "README.markdown", "README"];

/// Terraform file extension used for submodule/example detection.
const TERRAFORM_EXTENSION: &str = "tf";

/// A submodule or example directory discovered in the module tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildModule {
    /// Path relative to the module root (e.g. `modules/vpc`)
    pub path: String,
    /// Extracted files: (path relative to the child directory, content)
    pub files: Vec<(String, Vec<u8>)>,
}

/// Everything the parser extracts from a module directory.
#[derive(Debug, Clone, Default)]
pub struct ParsedModule {
    /// README content, when one of the known names exists
    pub readme: Option<String>,
    /// Raw terraform-docs output; absent when the tool isn't installed
    pub terraform_docs: Option<String>,
    /// Structured HCL extraction for the root module
    pub extract: hcl::HclExtract,
    /// Submodules under `./modules`
    pub submodules: Vec<ChildModule>,
    /// Examples under `./examples`
    pub examples: Vec<ChildModule>,
}

/// Parse a module directory.
///
/// # Errors
///
/// Returns an error when the directory is unreadable or every `.tf` file
/// fails to parse. A missing `terraform-docs` binary is not an error.
pub async fn parse_module(root: &Path) -> Result<ParsedModule> {
    let readme = read_readme(root).await?;
    let terraform_docs = run_terraform_docs(root).await?;
    let extract = hcl::extract_from_directory(root).await?;
    let submodules = discover_children(root, "modules", false)?;
    let examples = discover_children(root, "examples", true)?;

    tracing::info!(
        readme = readme.is_some(),
        variables = extract.variables.len(),
        submodules = submodules.len(),
        examples = examples.len(),
        "Parsed module directory"
    );

    Ok(ParsedModule {
        readme,
        terraform_docs,
        extract,
        submodules,
        examples,
    })
}

/// Read the first README candidate that exists.
///
/// # Errors
///
/// Returns an I/O error if an existing README cannot be read.
pub async fn read_readme(root: &Path) -> Result<Option<String>> {
    for name in README_FILENAMES {
        let candidate = root.join(name);
        if candidate.is_file() {
            let content = tokio::fs::read_to_string(&candidate)
                .await
                .map_err(|e| crate::error::RegistryError::io(&candidate, e, file!(), line!()))?;
            return Ok(Some(content));
        }
    }
    Ok(None)
}

/// Run `terraform-docs json .` for the module, returning its raw output.
///
/// Missing binary yields `None` — documentation extraction is best-effort,
/// mirroring the security scanner's policy for absent tools.
///
/// # Errors
///
/// Returns an error on non-zero exits from an installed terraform-docs.
pub async fn run_terraform_docs(root: &Path) -> Result<Option<String>> {
    let result = process::run(
        "terraform-docs",
        &["json", "."],
        Some(root),
        &[],
        Duration::from_secs(120),
    )
    .await;

    match result {
        Ok(output) if output.success => Ok(Some(output.stdout)),
        Ok(output) => Err(crate::err!(Subprocess {
            step: SubprocessStep::TerraformDocs,
            message: output.stderr.trim().to_string(),
        })),
        Err(e) if e.subprocess_step() == Some(SubprocessStep::CommandNotFound) => {
            tracing::debug!("terraform-docs not installed, skipping documentation extraction");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Discover immediate child directories of `root/<container>` that contain
/// at least one `.tf` file, extracting their files.
///
/// `.tf` files sitting directly in the container (no deeper grouping) are
/// skipped with a warning.
fn discover_children(root: &Path, container: &str, skip_hidden_files: bool) -> Result<Vec<ChildModule>> {
    let container_path = root.join(container);
    if !container_path.is_dir() {
        return Ok(Vec::new());
    }

    let mut children = Vec::new();
    let entries = std::fs::read_dir(&container_path)
        .map_err(|e| crate::error::RegistryError::io(&container_path, e, file!(), line!()))?;

    for entry in entries {
        let entry = entry.map_err(|e| crate::error::RegistryError::io(&container_path, e, file!(), line!()))?;
        let path = entry.path();

        if path.is_file() {
            if path.extension().and_then(|e| e.to_str()) == Some(TERRAFORM_EXTENSION) {
                tracing::warn!(
                    file = %path.display(),
                    "Terraform file at the top of ./{container} has no grouping directory, skipping"
                );
            }
            continue;
        }

        if !directory_has_terraform_files(&path) {
            tracing::debug!(dir = %path.display(), "No terraform files, not a child module");
            continue;
        }

        let dir_name = entry.file_name().to_string_lossy().into_owned();
        let files = extract_files(&path, skip_hidden_files)?;
        children.push(ChildModule {
            path: format!("{container}/{dir_name}"),
            files,
        });
    }

    children.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(children)
}

fn directory_has_terraform_files(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries.flatten().any(|e| {
                e.path().is_file()
                    && e.path().extension().and_then(|x| x.to_str()) == Some(TERRAFORM_EXTENSION)
            })
        })
        .unwrap_or(false)
}

/// Recursively extract a child directory's files as (relative path, bytes).
///
/// When `skip_hidden_files` is set, dotfiles and editor temp files (`*~`)
/// are omitted — the policy for example content.
fn extract_files(dir: &Path, skip_hidden_files: bool) -> Result<Vec<(String, Vec<u8>)>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(dir).into_iter() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read directory entry");
                continue;
            }
        };
        if !entry.path().is_file() {
            continue;
        }

        let file_name = entry.file_name().to_string_lossy();
        if skip_hidden_files && (file_name.starts_with('.') || file_name.ends_with('~')) {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| {
                crate::err!(Internal {
                    message: format!("walked path escaped its root: {e}"),
                })
            })?
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let content = std::fs::read(entry.path())
            .map_err(|e| crate::error::RegistryError::io(entry.path(), e, file!(), line!()))?;
        files.push((relative, content));
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.unwrap();
        }
        tokio::fs::write(path, content).await.unwrap();
    }

    #[tokio::test]
    async fn test_readme_preference_order() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "README", "plain").await;
        write(dir.path(), "README.md", "markdown").await;

        let readme = read_readme(dir.path()).await.unwrap();
        assert_eq!(readme.as_deref(), Some("markdown"));
    }

    #[tokio::test]
    async fn test_no_readme_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_readme(dir.path()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_submodule_discovery() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "main.tf", "resource \"aws_vpc\" \"main\" {}").await;
        write(dir.path(), "modules/vpc/main.tf", "variable \"a\" {}").await;
        write(dir.path(), "modules/empty/notes.txt", "not terraform").await;
        // Ungrouped file at the top of ./modules is skipped
        write(dir.path(), "modules/loose.tf", "variable \"b\" {}").await;

        let parsed = parse_module(dir.path()).await.unwrap();
        assert_eq!(parsed.submodules.len(), 1);
        assert_eq!(parsed.submodules[0].path, "modules/vpc");
        assert_eq!(parsed.submodules[0].files.len(), 1);
        assert_eq!(parsed.submodules[0].files[0].0, "main.tf");
    }

    #[tokio::test]
    async fn test_example_files_skip_dotfiles_and_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "examples/basic/main.tf", "module \"m\" { source = \"../..\" }").await;
        write(dir.path(), "examples/basic/.hidden", "secret").await;
        write(dir.path(), "examples/basic/main.tf~", "editor droppings").await;
        write(dir.path(), "examples/basic/outputs.tf", "output \"x\" { value = 1 }").await;

        let parsed = parse_module(dir.path()).await.unwrap();
        assert_eq!(parsed.examples.len(), 1);
        let files: Vec<&str> = parsed.examples[0].files.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(files, vec!["main.tf", "outputs.tf"]);
    }

    #[tokio::test]
    async fn test_parse_module_collects_structured_lists() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "main.tf",
            r#"
variable "region" {
  type    = string
  default = "eu-west-1"
}

resource "aws_s3_bucket" "artifacts" {}

terraform {
  required_providers {
    aws = {
      source  = "hashicorp/aws"
      version = "~> 5.0"
    }
  }
}
"#,
        )
        .await;
        write(dir.path(), "README.md", "# The module").await;

        let parsed = parse_module(dir.path()).await.unwrap();
        assert_eq!(parsed.readme.as_deref(), Some("# The module"));
        assert_eq!(parsed.extract.variables.len(), 1);
        assert_eq!(parsed.extract.resources.len(), 1);
        assert_eq!(parsed.extract.providers.len(), 1);
    }
}
