//! HCL extraction for module documentation.
//!
//! Parses the `.tf` files of a module directory with the `hcl-rs` crate and
//! extracts the structured lists the registry indexes: variables, outputs,
//! provider requirements, resources and declared module dependencies.

use crate::error::{ErrorCollector, Result};
use hcl::{Block, Body, Expression, ObjectKey};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A `variable` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDef {
    /// Variable name
    pub name: String,
    /// Declared type expression, when present
    pub var_type: Option<String>,
    /// Description text
    pub description: Option<String>,
    /// Default value, when present
    pub default: Option<serde_json::Value>,
    /// A variable without a default is required
    pub required: bool,
}

/// An `output` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDef {
    /// Output name
    pub name: String,
    /// Description text
    pub description: Option<String>,
}

/// A `required_providers` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRequirement {
    /// Local provider name (e.g. "aws")
    pub name: String,
    /// Provider source (e.g. "hashicorp/aws")
    pub source: Option<String>,
    /// Version constraint text
    pub version: Option<String>,
}

/// A `resource` block header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDef {
    /// Resource type (e.g. "aws_vpc")
    pub resource_type: String,
    /// Resource name label
    pub name: String,
}

/// A `module` block declaring a dependency on another module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDependency {
    /// Module block label
    pub name: String,
    /// Source address
    pub source: String,
    /// Version constraint text, when present
    pub version: Option<String>,
}

/// Everything extracted from a module directory's HCL.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HclExtract {
    /// Declared variables
    pub variables: Vec<VariableDef>,
    /// Declared outputs
    pub outputs: Vec<OutputDef>,
    /// Provider requirements
    pub providers: Vec<ProviderRequirement>,
    /// Resource headers
    pub resources: Vec<ResourceDef>,
    /// Declared module dependencies
    pub dependencies: Vec<ModuleDependency>,
}

impl HclExtract {
    fn merge(&mut self, other: Self) {
        self.variables.extend(other.variables);
        self.outputs.extend(other.outputs);
        self.providers.extend(other.providers);
        self.resources.extend(other.resources);
        self.dependencies.extend(other.dependencies);
    }
}

/// Parse every top-level `.tf` file in a module directory.
///
/// Individual unparsable files are collected and logged; extraction
/// succeeds with whatever parsed cleanly unless *every* file failed.
///
/// # Errors
///
/// Returns an error when the directory cannot be listed, or when `.tf`
/// files exist but none of them parsed.
pub async fn extract_from_directory(dir: &Path) -> Result<HclExtract> {
    let mut result = HclExtract::default();
    let mut errors = ErrorCollector::new();
    let mut tf_files = 0usize;
    let mut parsed_files = 0usize;

    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| crate::error::RegistryError::io(dir, e, file!(), line!()))?;

    let mut paths = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| crate::error::RegistryError::io(dir, e, file!(), line!()))?
    {
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("tf") {
            paths.push(path);
        }
    }
    paths.sort();

    for path in paths {
        tf_files += 1;
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| crate::error::RegistryError::io(&path, e, file!(), line!()))?;

        match extract_from_content(&content, &path) {
            Ok(extract) => {
                parsed_files += 1;
                result.merge(extract);
            }
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "Failed to parse .tf file");
                errors.add(e);
            }
        }
    }

    if tf_files > 0 && parsed_files == 0 {
        return errors.into_result().map(|()| result);
    }

    tracing::debug!(
        variables = result.variables.len(),
        outputs = result.outputs.len(),
        providers = result.providers.len(),
        resources = result.resources.len(),
        dependencies = result.dependencies.len(),
        "HCL extraction complete"
    );

    Ok(result)
}

/// Parse one file's HCL content.
///
/// # Errors
///
/// Returns an `HclParse` error when the content is not valid HCL.
pub fn extract_from_content(content: &str, file_path: &Path) -> Result<HclExtract> {
    let body: Body = hcl::from_str(content).map_err(|e| {
        crate::err!(HclParse {
            file: file_path.to_path_buf(),
            message: e.to_string(),
        })
    })?;

    let mut result = HclExtract::default();

    for structure in body.into_inner() {
        if let hcl::Structure::Block(block) = structure {
            match block.identifier.as_str() {
                "variable" => {
                    if let Some(variable) = parse_variable_block(&block) {
                        result.variables.push(variable);
                    }
                }
                "output" => {
                    if let Some(output) = parse_output_block(&block) {
                        result.outputs.push(output);
                    }
                }
                "resource" => {
                    if let Some(resource) = parse_resource_block(&block) {
                        result.resources.push(resource);
                    }
                }
                "module" => {
                    if let Some(dependency) = parse_module_block(&block) {
                        result.dependencies.push(dependency);
                    } else {
                        tracing::warn!(
                            file = %file_path.display(),
                            "Module block missing source attribute"
                        );
                    }
                }
                "terraform" => {
                    result.providers.extend(parse_terraform_block(&block));
                }
                _ => {
                    // Ignore other block types (data, locals, provider, etc.)
                }
            }
        }
    }

    Ok(result)
}

fn parse_variable_block(block: &Block) -> Option<VariableDef> {
    let name = block.labels.first()?.as_str().to_string();
    let default = get_attribute(&block.body, "default")
        .and_then(|expr| serde_json::to_value(expr).ok());
    let required = default.is_none();

    Some(VariableDef {
        name,
        var_type: get_attribute(&block.body, "type").and_then(expression_to_display_string),
        description: get_string_attribute(&block.body, "description"),
        default,
        required,
    })
}

fn parse_output_block(block: &Block) -> Option<OutputDef> {
    let name = block.labels.first()?.as_str().to_string();
    Some(OutputDef {
        name,
        description: get_string_attribute(&block.body, "description"),
    })
}

fn parse_resource_block(block: &Block) -> Option<ResourceDef> {
    let mut labels = block.labels.iter();
    let resource_type = labels.next()?.as_str().to_string();
    let name = labels.next()?.as_str().to_string();
    Some(ResourceDef {
        resource_type,
        name,
    })
}

fn parse_module_block(block: &Block) -> Option<ModuleDependency> {
    let name = block
        .labels
        .first()
        .map_or_else(|| "unnamed".to_string(), |l| l.as_str().to_string());
    let source = get_string_attribute(&block.body, "source")?;
    Some(ModuleDependency {
        name,
        source,
        version: get_string_attribute(&block.body, "version"),
    })
}

/// Pull provider requirements out of a `terraform` block.
fn parse_terraform_block(block: &Block) -> Vec<ProviderRequirement> {
    let mut providers = Vec::new();

    for structure in block.body.clone().into_inner() {
        if let hcl::Structure::Block(nested) = &structure {
            if nested.identifier.as_str() != "required_providers" {
                continue;
            }
            for attr in nested.body.attributes() {
                let name = attr.key.as_str().to_string();
                let (source, version) = parse_provider_requirement(&attr.expr);
                providers.push(ProviderRequirement {
                    name,
                    source,
                    version,
                });
            }
        }
    }

    providers
}

/// A provider requirement value is either a bare version string (legacy,
/// pre-0.13 syntax) or an object with `source` and `version` keys.
fn parse_provider_requirement(expr: &Expression) -> (Option<String>, Option<String>) {
    match expr {
        Expression::String(version) => (None, Some(version.clone())),
        Expression::Object(object) => {
            let mut source = None;
            let mut version = None;
            for (key, value) in object.iter() {
                let key_name = match key {
                    ObjectKey::Identifier(ident) => ident.as_str().to_string(),
                    ObjectKey::Expression(Expression::String(s)) => s.clone(),
                    ObjectKey::Expression(_) => continue,
                    _ => continue,
                };
                if let Expression::String(s) = value {
                    match key_name.as_str() {
                        "source" => source = Some(s.clone()),
                        "version" => version = Some(s.clone()),
                        _ => {}
                    }
                }
            }
            (source, version)
        }
        _ => (None, None),
    }
}

fn get_attribute<'a>(body: &'a Body, key: &str) -> Option<&'a Expression> {
    body.attributes()
        .find(|attr| attr.key.as_str() == key)
        .map(|attr| &attr.expr)
}

fn get_string_attribute(body: &Body, key: &str) -> Option<String> {
    match get_attribute(body, key) {
        Some(Expression::String(s)) => Some(s.clone()),
        _ => None,
    }
}

/// Render an expression for display. Bare identifiers such as `string`
/// serialise as `${string}`; the interpolation wrapper is stripped.
fn expression_to_display_string(expr: &Expression) -> Option<String> {
    match expr {
        Expression::String(s) => Some(s.clone()),
        other => {
            let value = serde_json::to_value(other).ok()?;
            let text = match value {
                serde_json::Value::String(s) => s,
                v => v.to_string(),
            };
            let trimmed = text
                .strip_prefix("${")
                .and_then(|s| s.strip_suffix('}'))
                .unwrap_or(&text);
            Some(trimmed.to_string())
        }
    }
}
