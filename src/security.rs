//! Security scanning via tfsec.
//!
//! Runs `tfsec` against a module directory and normalises its JSON output
//! into finding records and a severity summary. The scan is best-effort in
//! one specific way: a missing tfsec binary yields an empty result, not a
//! failure. An installed tfsec that errors still fails the phase.

use crate::error::{Result, SubprocessStep};
use crate::process;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// One normalised tfsec finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityFinding {
    /// tfsec rule identifier (e.g. `aws-s3-enable-versioning`)
    pub rule_id: String,
    /// Uppercased severity label
    pub severity: String,
    /// Short rule title
    pub title: String,
    /// Longer description of the finding
    pub description: String,
    /// File the finding was raised in, relative to the module root
    pub filename: String,
    /// First line of the finding
    pub start_line: u64,
    /// Last line of the finding
    pub end_line: u64,
    /// Documentation links
    pub links: Vec<String>,
}

/// Counts per severity bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecuritySummary {
    /// CRITICAL findings
    pub critical: usize,
    /// HIGH findings
    pub high: usize,
    /// MEDIUM findings
    pub medium: usize,
    /// LOW findings
    pub low: usize,
    /// INFO findings
    pub info: usize,
    /// Findings tfsec flagged as warnings rather than failures
    pub warnings: usize,
}

impl SecuritySummary {
    /// Critical and high folded together — the count used when deciding
    /// whether a scan should gate publication.
    #[must_use]
    pub fn high_failures(&self) -> usize {
        self.critical + self.high
    }

    /// Total findings across all buckets.
    #[must_use]
    pub fn total(&self) -> usize {
        self.critical + self.high + self.medium + self.low + self.info + self.warnings
    }
}

/// The result of one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityScanResult {
    /// Normalised findings
    pub findings: Vec<SecurityFinding>,
    /// Severity summary
    pub summary: SecuritySummary,
}

impl SecurityScanResult {
    /// Serialise for storage in the details aggregate.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Raw tfsec JSON output shape.
#[derive(Debug, Deserialize)]
struct TfsecReport {
    #[serde(default)]
    results: Option<Vec<TfsecResult>>,
}

#[derive(Debug, Deserialize)]
struct TfsecResult {
    #[serde(default)]
    rule_id: String,
    #[serde(default)]
    rule_description: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    severity: String,
    #[serde(default)]
    warning: bool,
    #[serde(default)]
    links: Vec<String>,
    #[serde(default)]
    location: Option<TfsecLocation>,
}

#[derive(Debug, Deserialize)]
struct TfsecLocation {
    #[serde(default)]
    filename: String,
    #[serde(default)]
    start_line: u64,
    #[serde(default)]
    end_line: u64,
}

/// Run tfsec against a module directory.
///
/// # Errors
///
/// Returns a tagged subprocess error on non-zero exits or unparsable
/// output from an installed tfsec. A missing binary returns an empty
/// result.
pub async fn scan_directory(tfsec_binary: &str, dir: &Path) -> Result<SecurityScanResult> {
    let dir_str = dir.to_string_lossy().into_owned();
    let args = [
        "--ignore-hcl-errors",
        "--format",
        "json",
        "--no-module-downloads",
        "--soft-fail",
        "--no-colour",
        "--include-ignored",
        "--include-passed",
        "--disable-grouping",
        dir_str.as_str(),
    ];

    let output = match process::run(tfsec_binary, &args, None, &[], Duration::from_secs(300)).await {
        Ok(output) => output,
        Err(e) if e.subprocess_step() == Some(SubprocessStep::CommandNotFound) => {
            tracing::info!("tfsec not installed, recording empty scan result");
            return Ok(SecurityScanResult::default());
        }
        Err(e) => return Err(e),
    };

    if !output.success {
        return Err(crate::err!(Subprocess {
            step: SubprocessStep::Tfsec,
            message: output.stderr.trim().to_string(),
        }));
    }

    parse_report(&output.stdout, dir)
}

/// Parse tfsec's JSON report, normalising severities and stripping the
/// module-root prefix from filenames.
///
/// # Errors
///
/// Returns a tagged subprocess error when the JSON doesn't parse.
pub fn parse_report(json: &str, module_root: &Path) -> Result<SecurityScanResult> {
    let report: TfsecReport = serde_json::from_str(json).map_err(|e| {
        crate::err!(Subprocess {
            step: SubprocessStep::Tfsec,
            message: format!("unparsable tfsec output: {e}"),
        })
    })?;

    let mut result = SecurityScanResult::default();
    for raw in report.results.unwrap_or_default() {
        let severity = raw.severity.to_uppercase();
        let location = raw.location.unwrap_or(TfsecLocation {
            filename: String::new(),
            start_line: 0,
            end_line: 0,
        });

        if raw.warning {
            result.summary.warnings += 1;
        } else {
            match severity.as_str() {
                "CRITICAL" => result.summary.critical += 1,
                "HIGH" => result.summary.high += 1,
                "MEDIUM" => result.summary.medium += 1,
                "LOW" => result.summary.low += 1,
                _ => result.summary.info += 1,
            }
        }

        result.findings.push(SecurityFinding {
            rule_id: raw.rule_id,
            severity,
            title: raw.rule_description,
            description: raw.description,
            filename: strip_root(&location.filename, module_root),
            start_line: location.start_line,
            end_line: location.end_line,
            links: raw.links,
        });
    }

    tracing::debug!(
        findings = result.findings.len(),
        critical = result.summary.critical,
        high = result.summary.high,
        "Parsed tfsec report"
    );

    Ok(result)
}

/// Reduce an absolute finding path to a module-relative one.
fn strip_root(filename: &str, module_root: &Path) -> String {
    let root = module_root.to_string_lossy();
    filename
        .strip_prefix(root.as_ref())
        .map(|rest| rest.trim_start_matches('/').to_string())
        .unwrap_or_else(|| filename.trim_start_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const SAMPLE: &str = r#"{
        "results": [
            {
                "rule_id": "aws-s3-enable-versioning",
                "rule_description": "S3 Data should be versioned",
                "description": "Bucket does not have versioning enabled",
                "severity": "MEDIUM",
                "warning": false,
                "links": ["https://example.com/doc"],
                "location": {"filename": "/scratch/mod/main.tf", "start_line": 3, "end_line": 9}
            },
            {
                "rule_id": "aws-iam-no-wildcards",
                "rule_description": "IAM policies should not use wildcards",
                "description": "Wildcard action in policy",
                "severity": "critical",
                "warning": false,
                "links": [],
                "location": {"filename": "/scratch/mod/iam.tf", "start_line": 1, "end_line": 2}
            },
            {
                "rule_id": "aws-misc",
                "rule_description": "Some advisory",
                "description": "Advisory only",
                "severity": "HIGH",
                "warning": true,
                "links": [],
                "location": {"filename": "other.tf", "start_line": 1, "end_line": 1}
            }
        ]
    }"#;

    #[test]
    fn test_parse_report_buckets_and_paths() {
        let result = parse_report(SAMPLE, &PathBuf::from("/scratch/mod")).unwrap();
        assert_eq!(result.findings.len(), 3);

        assert_eq!(result.summary.medium, 1);
        assert_eq!(result.summary.critical, 1);
        // The warning-flagged finding lands in warnings, not high
        assert_eq!(result.summary.high, 0);
        assert_eq!(result.summary.warnings, 1);
        assert_eq!(result.summary.high_failures(), 1);

        assert_eq!(result.findings[0].filename, "main.tf");
        assert_eq!(result.findings[1].filename, "iam.tf");
        // Lowercase severities are normalised
        assert_eq!(result.findings[1].severity, "CRITICAL");
    }

    #[test]
    fn test_parse_report_null_results() {
        let result = parse_report(r#"{"results": null}"#, &PathBuf::from("/x")).unwrap();
        assert!(result.findings.is_empty());
        assert_eq!(result.summary.total(), 0);
    }

    #[test]
    fn test_parse_report_garbage_is_error() {
        let err = parse_report("tfsec exploded", &PathBuf::from("/x")).unwrap_err();
        assert_eq!(err.subprocess_step(), Some(SubprocessStep::Tfsec));
    }

    #[tokio::test]
    async fn test_missing_binary_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let result = scan_directory("terravault-no-such-tfsec", dir.path())
            .await
            .unwrap();
        assert!(result.findings.is_empty());
    }

    #[test]
    fn test_roundtrip_json() {
        let result = parse_report(SAMPLE, &PathBuf::from("/scratch/mod")).unwrap();
        let json = result.to_json().unwrap();
        let back: SecurityScanResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }
}
