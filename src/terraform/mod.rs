//! Terraform execution under a process-wide lock.
//!
//! `tfswitch` mutates a shared terraform installation, so every terraform
//! callback in the process is serialised behind one mutex. Acquisition is
//! bounded by a configurable timeout and surfaces as a retriable
//! [`LockTimeout`](crate::error::RegistryError::LockTimeout); the lock is
//! released on every exit path, including panics and cancellation.
//!
//! No callsite locks directly — [`TerraformExecutor::run_under_lock`] is the
//! single primitive. If multi-process deployment is ever needed, this is the
//! one place to swap in a file or advisory lock.

use crate::config::TerraformOptions;
use crate::error::{Result, SubprocessStep};
use crate::process;
use once_cell::sync::Lazy;
use regex::Regex;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// The single process-wide terraform mutex.
static TERRAFORM_LOCK: Lazy<Arc<Mutex<()>>> = Lazy::new(|| Arc::new(Mutex::new(())));

/// Matches a `terraform { ... backend "name" { ...` block.
///
/// Intentionally permissive: a false positive only writes a harmless
/// override, a false negative would let init touch a real backend.
static BACKEND_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)terraform\s*\{.*?backend\s+"([A-Za-z0-9_-]+)"\s*\{"#)
        .unwrap_or_else(|e| panic!("backend regex failed to compile: {e}"))
});

/// The override block pointed at a throwaway local state file.
const LOCAL_BACKEND_OVERRIDE: &str = r#"terraform {
  backend "local" {
    path = "./.local-state"
  }
}
"#;

/// Captured outputs of the canonical terraform phase sequence.
#[derive(Debug, Clone, Default)]
pub struct TerraformOutput {
    /// `terraform graph` stdout
    pub graph: String,
    /// `terraform version -json` stdout
    pub version_json: String,
    /// `.terraform/modules/modules.json` content, `{}` when absent
    pub modules_json: String,
    /// Backend override files written before init
    pub overrides_written: Vec<PathBuf>,
}

/// Runs `tfswitch` and `terraform` while holding the global lock.
#[derive(Debug, Clone)]
pub struct TerraformExecutor {
    options: TerraformOptions,
}

impl TerraformExecutor {
    /// Create an executor from the configured terraform options.
    #[must_use]
    pub fn new(options: TerraformOptions) -> Self {
        Self { options }
    }

    /// Acquire the global terraform lock, run `tfswitch` for `dir`, then run
    /// the callback inside the critical section.
    ///
    /// # Errors
    ///
    /// - [`LockTimeout`](crate::error::RegistryError::LockTimeout) when the
    ///   mutex isn't acquired within the configured budget
    /// - whatever `tfswitch` or the callback return
    pub async fn run_under_lock<T, Fut>(
        &self,
        dir: &Path,
        callback: impl FnOnce() -> Fut,
    ) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let waited_secs = self.options.lock_timeout_seconds;
        let guard = tokio::time::timeout(
            Duration::from_secs(waited_secs),
            Arc::clone(&TERRAFORM_LOCK).lock_owned(),
        )
        .await
        .map_err(|_| crate::err!(LockTimeout { waited_secs: waited_secs }))?;

        tracing::debug!(dir = %dir.display(), "Entered terraform critical section");

        // Everything from here runs inside the critical section; the guard
        // drops on success, error and unwind alike.
        let result = async {
            self.run_tfswitch(dir).await?;
            callback().await
        }
        .await;

        drop(guard);
        tracing::debug!(dir = %dir.display(), "Left terraform critical section");
        result
    }

    /// The canonical phase sequence: backend override, `init`, `graph`,
    /// `version -json`, then the modules.json read — all under the lock.
    ///
    /// # Errors
    ///
    /// Any failing step fails the sequence; a missing modules.json does not.
    pub async fn process_module(&self, dir: &Path) -> Result<TerraformOutput> {
        self.run_under_lock(dir, || async {
            let overrides_written = self.write_backend_overrides(dir).await?;

            self.terraform(SubprocessStep::TerraformInit, dir, &["init", "-input=false", "-no-color"])
                .await?;

            let graph = self
                .terraform(SubprocessStep::TerraformGraph, dir, &["graph"])
                .await?;

            let version_json = self
                .terraform(SubprocessStep::TerraformVersion, dir, &["version", "-json"])
                .await?;

            // modules.json only exists once init resolved child modules;
            // its absence is recorded, not failed.
            let modules_path = dir.join(".terraform").join("modules").join("modules.json");
            let modules_json = match tokio::fs::read_to_string(&modules_path).await {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => "{}".to_string(),
                Err(e) => {
                    return Err(crate::error::RegistryError::io(
                        &modules_path,
                        e,
                        file!(),
                        line!(),
                    ))
                }
            };

            Ok(TerraformOutput {
                graph,
                version_json,
                modules_json,
                overrides_written,
            })
        })
        .await
    }

    /// Install the configured terraform version via tfswitch.
    async fn run_tfswitch(&self, dir: &Path) -> Result<()> {
        let mut envs: Vec<(&str, String)> = Vec::new();
        if let Some(version) = &self.options.default_version {
            envs.push(("TF_DEFAULT_VERSION", version.clone()));
        }
        if let Some(product) = &self.options.product {
            envs.push(("TF_PRODUCT", product.clone()));
        }
        if let Some(mirror) = &self.options.archive_mirror {
            envs.push(("TERRAFORM_ARCHIVE_MIRROR", mirror.clone()));
        }

        let bin_arg;
        let mut args: Vec<&str> = Vec::new();
        if Path::new(&self.options.binary_path).is_absolute() {
            bin_arg = format!("--bin={}", self.options.binary_path);
            args.push(&bin_arg);
        }

        process::run_checked(
            SubprocessStep::Tfswitch,
            "tfswitch",
            &args,
            Some(dir),
            &envs,
            self.command_timeout(),
        )
        .await?;
        Ok(())
    }

    /// Run one terraform subcommand, returning stdout. Non-zero exits are
    /// tagged with `step`; spawn-level failures keep their own tags and the
    /// output text is inspected for refinement.
    async fn terraform(&self, step: SubprocessStep, dir: &Path, args: &[&str]) -> Result<String> {
        let output = process::run(
            &self.options.binary_path,
            args,
            Some(dir),
            &[],
            self.command_timeout(),
        )
        .await?;

        if !output.success {
            let combined = output.combined();
            let message = combined.trim().to_string();
            return Err(crate::err!(Subprocess {
                step: refine_step(step, &message),
                message: message,
            }));
        }

        Ok(output.stdout)
    }

    /// Scan top-level `*.tf` files for a non-local backend block and write
    /// `<name>_override.tf` files pinning init to a local backend.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a directory listing or write fails.
    pub async fn write_backend_overrides(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();

        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| crate::error::RegistryError::io(dir, e, file!(), line!()))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| crate::error::RegistryError::io(dir, e, file!(), line!()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("tf") {
                continue;
            }
            // Skip override files we may have written on a previous pass
            if path
                .file_stem()
                .and_then(|s| s.to_str())
                .is_some_and(|s| s.ends_with("_override"))
            {
                continue;
            }

            let content = match tokio::fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "Skipping unreadable .tf file");
                    continue;
                }
            };

            let Some(caps) = BACKEND_RE.captures(&content) else {
                continue;
            };
            let backend = caps.get(1).map_or("", |m| m.as_str());
            if backend == "local" {
                continue;
            }

            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("backend");
            let override_path = dir.join(format!("{stem}_override.tf"));
            tokio::fs::write(&override_path, LOCAL_BACKEND_OVERRIDE)
                .await
                .map_err(|e| crate::error::RegistryError::io(&override_path, e, file!(), line!()))?;

            tracing::info!(
                file = %path.display(),
                backend = backend,
                override_file = %override_path.display(),
                "Wrote local backend override"
            );
            written.push(override_path);
        }

        written.sort();
        Ok(written)
    }

    fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.options.command_timeout_seconds)
    }
}

/// Refine a step tag using the failure text, mapping permission and
/// missing-file messages onto their dedicated tags.
fn refine_step(step: SubprocessStep, message: &str) -> SubprocessStep {
    let lower = message.to_lowercase();
    if lower.contains("permission denied") {
        SubprocessStep::PermissionDenied
    } else if lower.contains("no such file or directory") {
        SubprocessStep::FileNotFound
    } else {
        step
    }
}
