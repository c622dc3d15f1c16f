//! Pathspec filtering for ignore rules.
//!
//! Implements the subset of pathspec semantics `.terraformignore` needs:
//!
//! - A rule containing wildcards is glob-matched against the relative path.
//! - A rule ending in `/` matches any path under that directory prefix.
//! - Otherwise a rule matches the exact path or any path it is a plain
//!   prefix of.
//!
//! Paths are compared in forward-slash relative form.

use std::path::Path;

/// A single parsed ignore rule.
#[derive(Debug, Clone)]
enum Rule {
    /// Glob pattern (rule contained `*`, `?` or `[`)
    Glob(glob::Pattern),
    /// Directory prefix (rule ended with `/`)
    DirPrefix(String),
    /// Exact path or plain prefix
    Plain(String),
}

/// An ordered set of ignore rules.
///
/// Built from `.terraformignore` content; an empty filter matches nothing.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    rules: Vec<Rule>,
}

impl PathFilter {
    /// An empty filter that excludes nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse filter rules from ignore-file content.
    ///
    /// Lines are trimmed; blank lines and lines beginning with `#` are
    /// skipped. Rules that fail to compile as globs are logged and ignored
    /// rather than failing the whole filter.
    #[must_use]
    pub fn from_lines(content: &str) -> Self {
        let mut rules = Vec::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let rule = line.trim_start_matches('/');
            if rule.contains('*') || rule.contains('?') || rule.contains('[') {
                match glob::Pattern::new(rule) {
                    Ok(pattern) => rules.push(Rule::Glob(pattern)),
                    Err(e) => {
                        tracing::warn!(rule = %rule, error = %e, "Ignoring unparsable pathspec rule");
                    }
                }
            } else if let Some(dir) = rule.strip_suffix('/') {
                rules.push(Rule::DirPrefix(format!("{dir}/")));
            } else {
                rules.push(Rule::Plain(rule.to_string()));
            }
        }

        Self { rules }
    }

    /// Number of parsed rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// True if the filter has no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether the given forward-slash relative path is excluded.
    #[must_use]
    pub fn matches(&self, relative_path: &str) -> bool {
        let path = relative_path.trim_start_matches('/');
        self.rules.iter().any(|rule| match rule {
            Rule::Glob(pattern) => pattern.matches(path),
            Rule::DirPrefix(prefix) => path.starts_with(prefix.as_str()),
            Rule::Plain(rule) => path == rule || path.starts_with(rule.as_str()),
        })
    }

    /// Convenience wrapper over [`Self::matches`] for `Path` values.
    #[must_use]
    pub fn matches_path(&self, relative_path: &Path) -> bool {
        let normalised = relative_path
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        self.matches(&normalised)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_matches_nothing() {
        let filter = PathFilter::empty();
        assert!(!filter.matches("main.tf"));
        assert!(filter.is_empty());
    }

    #[test]
    fn test_comments_and_blanks_skipped() {
        let filter = PathFilter::from_lines("# comment\n\n  \nmain.tf\n");
        assert_eq!(filter.len(), 1);
        assert!(filter.matches("main.tf"));
    }

    #[test]
    fn test_glob_rule() {
        let filter = PathFilter::from_lines("*.log\n");
        assert!(filter.matches("debug.log"));
        assert!(!filter.matches("main.tf"));
    }

    #[test]
    fn test_dir_prefix_rule() {
        let filter = PathFilter::from_lines("vendor/\n");
        assert!(filter.matches("vendor/module/main.tf"));
        assert!(!filter.matches("vendored.tf"));
    }

    #[test]
    fn test_exact_and_plain_prefix() {
        let filter = PathFilter::from_lines("secrets.tfvars\n");
        assert!(filter.matches("secrets.tfvars"));
        // Plain rules also match as a prefix
        assert!(filter.matches("secrets.tfvars.backup"));
        assert!(!filter.matches("main.tf"));
    }

    #[test]
    fn test_leading_slash_stripped() {
        let filter = PathFilter::from_lines("/build/\n");
        assert!(filter.matches("build/out.tf"));
    }

    #[test]
    fn test_matches_path_normalises_separators() {
        let filter = PathFilter::from_lines("modules/inner/\n");
        let p = Path::new("modules").join("inner").join("main.tf");
        assert!(filter.matches_path(&p));
    }
}
