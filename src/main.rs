//! TerraVault CLI entry point.
//!
//! This binary provides the command-line interface for TerraVault.

use clap::Parser;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Table};
use std::error::Error;
use std::process::ExitCode;
use terravault::cli::{Cli, Commands, IngestArgs, ImportArgs, RegisterArgs};
use terravault::ingest::{orchestrator, ImportStatus, VersionImport};
use terravault::store::repos;
use terravault::types::{IngestOptions, IngestRequest, IngestResult, SourceType};
use terravault::{Config, ModuleProvider, Registry};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.quiet);

    // Run the appropriate command
    match run(cli).await {
        Ok(exit_code) => exit_code,
        Err(e) => {
            tracing::error!(error = %e, "Fatal error");

            // Print error with full chain
            eprintln!("Error: {e}");

            let mut source = e.source();
            if source.is_some() {
                eprintln!("\nCaused by:");
                let mut i = 0;
                while let Some(cause) = source {
                    eprintln!("  {i}: {cause}");
                    source = cause.source();
                    i += 1;
                }
            }

            ExitCode::from(1)
        }
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        // First try to use RUST_LOG from environment, otherwise use verbose flag
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let base_level = match verbose {
                0 => "warn",
                1 => "info",
                2 => "debug",
                _ => "trace",
            };
            // Filter string: terravault at the chosen level, everything else at warn
            EnvFilter::new(format!("warn,terravault={base_level}"))
        })
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    tracing::debug!("Loading configuration");
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Register(args) => {
            let registry = Registry::open(config)?;
            register(&registry, args).await
        }
        Commands::Ingest(args) => {
            let registry = Registry::open(config)?;
            ingest(&registry, args).await
        }
        Commands::Import(args) => {
            let registry = Registry::open(config)?;
            import(&registry, args).await
        }
        Commands::Init => init_config(),
        Commands::Validate(args) => {
            Config::from_file(&args.file)?;
            println!("{} {}", "valid:".green().bold(), args.file.display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    if let Some(path) = &cli.config {
        return Ok(Config::from_file(path)?);
    }

    let default_path = std::path::Path::new("terravault.yaml");
    if default_path.is_file() {
        return Ok(Config::from_file(default_path)?);
    }

    tracing::debug!("No configuration file found, using defaults");
    Ok(Config::default())
}

async fn register(registry: &Registry, args: RegisterArgs) -> anyhow::Result<ExitCode> {
    let (namespace, module, provider) = terravault::cli::parse_triple(&args.triple)?;

    let stored = registry
        .register_provider(&ModuleProvider {
            id: 0,
            namespace,
            module,
            provider,
            repo_clone_url_template: args.clone_url,
            tag_format: args.tag_format,
            git_path: args.git_path,
            repo_browse_url_template: args.browse_url,
            verified: false,
        })
        .await?;

    println!(
        "{} {} (id {})",
        "registered:".green().bold(),
        stored.identity(),
        stored.id
    );
    Ok(ExitCode::SUCCESS)
}

async fn ingest(registry: &Registry, args: IngestArgs) -> anyhow::Result<ExitCode> {
    let (namespace, module, provider) = terravault::cli::parse_triple(&args.triple)?;

    let mut options = IngestOptions {
        skip_terraform_processing: args.skip_terraform,
        skip_security_scanning: args.skip_scan,
        generate_archives: !args.no_archives,
        required_metadata_fields: args.required_fields,
        publish_module: !args.no_publish,
        ..IngestOptions::default()
    };
    if !args.archive_formats.is_empty() {
        options.archive_formats = args.archive_formats;
    }

    let request = IngestRequest {
        namespace,
        module,
        provider,
        version: args.version,
        git_tag: args.git_tag,
        archive_path: args.archive_path,
        module_path: args.module_path,
        source_type: args.source,
        options,
    };

    let result = registry.ingest(&request).await?;
    print_ingest_result(&result);

    if result.success {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(1))
    }
}

async fn import(registry: &Registry, args: ImportArgs) -> anyhow::Result<ExitCode> {
    let (namespace, module, provider) = terravault::cli::parse_triple(&args.triple)?;

    let provider_row = registry
        .database()
        .read(|conn| {
            // read() surfaces rusqlite errors; lookup misses handled below
            Ok(repos::resolve_module_provider(conn, &namespace, &module, &provider).ok().flatten())
        })
        .await?
        .ok_or_else(|| anyhow::anyhow!("module provider {namespace}/{module}/{provider} not found"))?;

    let mut imports = Vec::with_capacity(args.tags.len());
    for tag in &args.tags {
        let version = orchestrator::version_from_tag(&provider_row.tag_format, tag)?;
        imports.push(VersionImport {
            tag: tag.clone(),
            version: version.to_string(),
            request: IngestRequest {
                namespace: namespace.clone(),
                module: module.clone(),
                provider: provider.clone(),
                version: None,
                git_tag: Some(tag.clone()),
                archive_path: None,
                module_path: None,
                source_type: SourceType::Git,
                options: IngestOptions {
                    publish_module: !args.no_publish,
                    ..IngestOptions::default()
                },
            },
        });
    }

    let result = registry.import_versions(&imports).await?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Version", "Status", "Duration", "Detail"]);
    let mut versions: Vec<_> = result.versions.values().collect();
    versions.sort_by(|a, b| a.version.cmp(&b.version));
    for outcome in versions {
        let status = match outcome.status {
            ImportStatus::Success => "success".green().to_string(),
            ImportStatus::Failed => "failed".red().to_string(),
        };
        table.add_row(vec![
            outcome.version.clone(),
            status,
            format!("{:.2}s", outcome.duration.as_secs_f64()),
            outcome.error.clone().unwrap_or_default(),
        ]);
    }
    println!("{table}");

    println!(
        "{} {} succeeded, {} failed",
        "import:".bold(),
        result.success_count,
        result.failure_count
    );

    match result.overall_status {
        ImportStatus::Success => Ok(ExitCode::SUCCESS),
        ImportStatus::Failed => Ok(ExitCode::from(1)),
    }
}

fn init_config() -> anyhow::Result<ExitCode> {
    let path = std::path::Path::new("terravault.yaml");
    if path.exists() {
        anyhow::bail!("terravault.yaml already exists, refusing to overwrite");
    }
    std::fs::write(path, Config::example_yaml())?;
    println!("{} terravault.yaml", "wrote:".green().bold());
    Ok(ExitCode::SUCCESS)
}

fn print_ingest_result(result: &IngestResult) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Phase", "Status", "Duration", "Detail"]);

    let mut phases: Vec<_> = result.phase_results.iter().collect();
    phases.sort_by(|a, b| a.0.cmp(b.0));
    for (name, phase) in phases {
        let status = if let Some(reason) = &phase.skipped_reason {
            format!("{} ({reason})", "skipped".yellow())
        } else if phase.success {
            "ok".green().to_string()
        } else {
            "failed".red().to_string()
        };
        let detail = phase
            .error
            .clone()
            .or_else(|| phase.data.as_ref().map(ToString::to_string))
            .unwrap_or_default();
        table.add_row(vec![
            name.clone(),
            status,
            format!("{:.2}s", phase.duration.as_secs_f64()),
            detail,
        ]);
    }
    println!("{table}");

    if result.success {
        println!(
            "{} version {} indexed (module version id {})",
            "success:".green().bold(),
            result.version,
            result.module_version_id.unwrap_or_default()
        );
    } else {
        println!(
            "{} {}",
            "failed:".red().bold(),
            result.error.clone().unwrap_or_default()
        );
    }
}
