//! Command-line interface module.
//!
//! This module defines the CLI structure using Clap, including
//! all commands, arguments, and options.
//!
//! # Commands
//!
//! - `register`: Register a module provider in the registry
//! - `ingest`: Ingest one module version from git, an archive, or a path
//! - `import`: Import multiple webhook-announced tags for one provider
//! - `init`: Create an example configuration file
//! - `validate`: Validate a configuration file
//!
//! # Example Usage
//!
//! ```bash
//! # Register a provider backed by a git repository
//! terravault register alice/net/aws \
//!     --clone-url "https://git.example.com/{namespace}/{name}-{provider}.git"
//!
//! # Ingest a tagged release
//! terravault ingest alice/net/aws --git-tag v1.2.3
//!
//! # Ingest an uploaded archive as version 1.2.3
//! terravault ingest alice/net/aws --version 1.2.3 --source archive --archive-path ./upload.zip
//!
//! # Import several tags announced by a webhook
//! terravault import alice/net/aws --tag v1.0.0 --tag v1.0.1 --tag v1.1.0
//!
//! # Initialize configuration
//! terravault init
//! ```

use crate::error::Result;
use crate::types::{ArchiveFormat, SourceType};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// TerraVault - private Terraform/OpenTofu module registry.
#[derive(Parser, Debug)]
#[command(
    name = "terravault",
    author,
    version,
    about = "Private Terraform/OpenTofu module registry",
    long_about = "TerraVault ingests Terraform/OpenTofu module sources through a transactional, \
                  phased pipeline and indexes each version's documentation, structure, files, \
                  security scan results and downloadable archives."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "TERRAVAULT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Register a module provider
    Register(RegisterArgs),

    /// Ingest one module version
    #[command(visible_alias = "i")]
    Ingest(IngestArgs),

    /// Import multiple tags for one provider
    Import(ImportArgs),

    /// Create an example configuration file
    Init,

    /// Validate a configuration file
    Validate(ValidateArgs),
}

/// Arguments for the register command.
#[derive(Args, Debug)]
pub struct RegisterArgs {
    /// The provider triple, as namespace/module/provider
    #[arg(value_name = "NAMESPACE/MODULE/PROVIDER")]
    pub triple: String,

    /// Clone-URL template; {namespace}, {name} and {provider} are substituted
    #[arg(long, value_name = "URL")]
    pub clone_url: Option<String>,

    /// Tag format template; {version} is substituted
    #[arg(long, value_name = "FORMAT", default_value = "v{version}")]
    pub tag_format: String,

    /// Subdirectory of the repository holding the module
    #[arg(long, value_name = "PATH")]
    pub git_path: Option<String>,

    /// Browse-URL template for source links
    #[arg(long, value_name = "URL")]
    pub browse_url: Option<String>,
}

/// Arguments for the ingest command.
#[derive(Args, Debug)]
pub struct IngestArgs {
    /// The provider triple, as namespace/module/provider
    #[arg(value_name = "NAMESPACE/MODULE/PROVIDER")]
    pub triple: String,

    /// Version to index (exclusive with --git-tag)
    #[arg(long, value_name = "VERSION", conflicts_with = "git_tag")]
    pub version: Option<String>,

    /// Git tag to resolve the version from
    #[arg(long, value_name = "TAG")]
    pub git_tag: Option<String>,

    /// How the module source is materialised
    #[arg(long, default_value = "git", value_enum)]
    pub source: SourceType,

    /// ZIP archive to extract (source type: archive)
    #[arg(long, value_name = "FILE")]
    pub archive_path: Option<PathBuf>,

    /// Module directory to index (source type: path)
    #[arg(long, value_name = "DIR")]
    pub module_path: Option<PathBuf>,

    /// Skip terraform init/graph/version processing
    #[arg(long)]
    pub skip_terraform: bool,

    /// Skip the tfsec security scan
    #[arg(long)]
    pub skip_scan: bool,

    /// Do not generate downloadable archives
    #[arg(long)]
    pub no_archives: bool,

    /// Archive formats to produce
    #[arg(long = "archive-format", value_name = "FORMAT", value_enum)]
    pub archive_formats: Vec<ArchiveFormat>,

    /// Metadata attributes that must be present (repeatable)
    #[arg(long = "required-field", value_name = "NAME")]
    pub required_fields: Vec<String>,

    /// Leave the version unpublished after indexing
    #[arg(long)]
    pub no_publish: bool,
}

/// Arguments for the import command.
#[derive(Args, Debug)]
pub struct ImportArgs {
    /// The provider triple, as namespace/module/provider
    #[arg(value_name = "NAMESPACE/MODULE/PROVIDER")]
    pub triple: String,

    /// Tags to import, in order (repeatable)
    #[arg(long = "tag", value_name = "TAG", required = true)]
    pub tags: Vec<String>,

    /// Leave imported versions unpublished
    #[arg(long)]
    pub no_publish: bool,
}

/// Arguments for the validate command.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Configuration file to validate
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
}

/// Split a `namespace/module/provider` triple.
///
/// # Errors
///
/// Returns an input error unless the value has exactly three non-empty
/// segments.
pub fn parse_triple(value: &str) -> Result<(String, String, String)> {
    let parts: Vec<&str> = value.split('/').collect();
    match parts.as_slice() {
        [namespace, module, provider]
            if !namespace.is_empty() && !module.is_empty() && !provider.is_empty() =>
        {
            Ok(((*namespace).to_string(), (*module).to_string(), (*provider).to_string()))
        }
        _ => Err(crate::err!(InvalidInput {
            message: format!("expected NAMESPACE/MODULE/PROVIDER, got '{value}'"),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_triple() {
        let (ns, module, provider) = parse_triple("alice/net/aws").unwrap();
        assert_eq!(ns, "alice");
        assert_eq!(module, "net");
        assert_eq!(provider, "aws");
    }

    #[test]
    fn test_parse_triple_rejects_malformed() {
        assert!(parse_triple("alice/net").is_err());
        assert!(parse_triple("alice/net/aws/extra").is_err());
        assert!(parse_triple("alice//aws").is_err());
        assert!(parse_triple("").is_err());
    }

    #[test]
    fn test_cli_parses_ingest() {
        let cli = Cli::try_parse_from([
            "terravault",
            "ingest",
            "alice/net/aws",
            "--git-tag",
            "v1.2.3",
        ])
        .unwrap();
        match cli.command {
            Commands::Ingest(args) => {
                assert_eq!(args.triple, "alice/net/aws");
                assert_eq!(args.git_tag.as_deref(), Some("v1.2.3"));
                assert_eq!(args.source, SourceType::Git);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_rejects_version_and_tag_together() {
        let result = Cli::try_parse_from([
            "terravault",
            "ingest",
            "alice/net/aws",
            "--version",
            "1.2.3",
            "--git-tag",
            "v1.2.3",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_parses_import_tags_in_order() {
        let cli = Cli::try_parse_from([
            "terravault",
            "import",
            "alice/net/aws",
            "--tag",
            "v1.0.0",
            "--tag",
            "v1.1.0",
        ])
        .unwrap();
        match cli.command {
            Commands::Import(args) => {
                assert_eq!(args.tags, vec!["v1.0.0".to_string(), "v1.1.0".to_string()]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
